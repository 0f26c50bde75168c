//! Workflow channels for coordinating between workflow code and the host.
//!
//! Channels are ephemeral (in-memory only). The harness uses them for the
//! mock-resolution handshake: a background task posts the resolved mock value
//! through a channel while the workflow suspends on the receiving end, which
//! keeps the main loop free. They work under the dispatcher's manual polling
//! because receive futures simply re-check the buffer on every poll.

use std::collections::VecDeque;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};

/// Error returned when trying to send on a full or closed channel
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TrySendError<T> {
    Full(T),
    Closed(T),
}

impl<T> fmt::Display for TrySendError<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TrySendError::Full(_) => write!(f, "channel full"),
            TrySendError::Closed(_) => write!(f, "channel closed"),
        }
    }
}

impl<T: fmt::Debug> std::error::Error for TrySendError<T> {}

/// Error returned when trying to receive from an empty channel
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TryRecvError {
    Empty,
    Closed,
}

impl fmt::Display for TryRecvError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TryRecvError::Empty => write!(f, "channel empty"),
            TryRecvError::Closed => write!(f, "channel closed"),
        }
    }
}

impl std::error::Error for TryRecvError {}

struct ChannelInner<T> {
    buffer: VecDeque<T>,
    capacity: usize,
    closed: bool,
    sender_count: usize,
}

impl<T> ChannelInner<T> {
    fn new(capacity: usize) -> Self {
        Self {
            buffer: VecDeque::new(),
            capacity,
            closed: false,
            sender_count: 1,
        }
    }

    fn is_closed_for_recv(&self) -> bool {
        self.closed && self.buffer.is_empty()
    }
}

/// Sending half of a channel
pub struct Sender<T> {
    inner: Arc<Mutex<ChannelInner<T>>>,
}

impl<T> Sender<T> {
    /// Send a value without blocking.
    pub fn try_send(&self, value: T) -> Result<(), TrySendError<T>> {
        let mut inner = self.inner.lock().unwrap();
        if inner.closed {
            return Err(TrySendError::Closed(value));
        }
        if inner.buffer.len() >= inner.capacity {
            return Err(TrySendError::Full(value));
        }
        inner.buffer.push_back(value);
        Ok(())
    }

    /// Close the channel from the sender side
    pub fn close(&self) {
        self.inner.lock().unwrap().closed = true;
    }
}

impl<T> Clone for Sender<T> {
    fn clone(&self) -> Self {
        self.inner.lock().unwrap().sender_count += 1;
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T> Drop for Sender<T> {
    fn drop(&mut self) {
        let mut inner = self.inner.lock().unwrap();
        inner.sender_count -= 1;
        if inner.sender_count == 0 {
            inner.closed = true;
        }
    }
}

/// Receiving half of a channel
pub struct Receiver<T> {
    inner: Arc<Mutex<ChannelInner<T>>>,
}

impl<T> Receiver<T> {
    /// Receive a value from the channel.
    ///
    /// Resolves to `None` once the channel is closed and drained.
    pub fn recv(&self) -> RecvFuture<T> {
        RecvFuture {
            receiver: self.clone(),
        }
    }

    /// Try to receive a value without blocking.
    pub fn try_recv(&self) -> Result<T, TryRecvError> {
        let mut inner = self.inner.lock().unwrap();
        if let Some(value) = inner.buffer.pop_front() {
            return Ok(value);
        }
        if inner.is_closed_for_recv() {
            Err(TryRecvError::Closed)
        } else {
            Err(TryRecvError::Empty)
        }
    }
}

impl<T> Clone for Receiver<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

/// Future returned by `Receiver::recv()`
pub struct RecvFuture<T> {
    receiver: Receiver<T>,
}

impl<T> Future for RecvFuture<T> {
    type Output = Option<T>;

    fn poll(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Self::Output> {
        let mut inner = self.receiver.inner.lock().unwrap();
        if let Some(value) = inner.buffer.pop_front() {
            return Poll::Ready(Some(value));
        }
        if inner.is_closed_for_recv() {
            return Poll::Ready(None);
        }
        Poll::Pending
    }
}

/// Create a new channel with the specified buffer capacity (>= 1).
pub fn channel<T>(capacity: usize) -> (Sender<T>, Receiver<T>) {
    let inner = Arc::new(Mutex::new(ChannelInner::new(capacity.max(1))));
    (
        Sender {
            inner: inner.clone(),
        },
        Receiver { inner },
    )
}
