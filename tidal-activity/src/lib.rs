//! Activity authoring SDK for Tidal.
//!
//! This crate provides the API for implementing activities, including
//! heartbeats, context access, and activity information.

pub mod context;

pub use context::*;
