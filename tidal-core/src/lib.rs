//! Core types for the Tidal workflow test harness.
//!
//! This crate defines the error taxonomy, the argument codec and the shared
//! data types used by the workflow, activity and test-environment crates.

pub mod encoded;
pub mod error;
pub mod types;

pub use encoded::*;
pub use error::*;
pub use types::*;
