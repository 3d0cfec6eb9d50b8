//! Single-assignment result slot.
//!
//! [`ResponseSlot`] is the producer side held by the flush cycle,
//! [`ResponseHandle`] the caller side. A slot accepts exactly one value;
//! later attempts are rejected and leave the first value in place.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::sync::oneshot;

/// The slot was dropped without ever being resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("response slot dropped before resolution")]
pub struct Unresolved;

/// Create a connected slot/handle pair.
pub fn channel<T>() -> (ResponseSlot<T>, ResponseHandle<T>) {
    let (tx, rx) = oneshot::channel();
    (ResponseSlot { tx: Some(tx) }, ResponseHandle { rx, taken: false })
}

#[derive(Debug)]
pub struct ResponseSlot<T> {
    tx: Option<oneshot::Sender<T>>,
}

impl<T> ResponseSlot<T> {
    /// Deliver `value`. Returns `false` if the slot was already resolved.
    ///
    /// A handle that was dropped still counts as delivered: the value is discarded.
    pub fn resolve(&mut self, value: T) -> bool {
        match self.tx.take() {
            Some(tx) => {
                if tx.send(value).is_err() {
                    tracing::trace!("response handle gone, outcome discarded");
                }
                true
            }
            None => false,
        }
    }

    pub fn is_resolved(&self) -> bool {
        self.tx.is_none()
    }

    /// True when the receiving handle has been dropped.
    pub fn is_abandoned(&self) -> bool {
        self.tx.as_ref().map(|tx| tx.is_closed()).unwrap_or(false)
    }
}

#[derive(Debug)]
pub struct ResponseHandle<T> {
    rx: oneshot::Receiver<T>,
    taken: bool,
}

impl<T> ResponseHandle<T> {
    /// Non-blocking check. `Ok(None)` while still pending, and again once
    /// the value has been taken.
    pub fn try_take(&mut self) -> std::result::Result<Option<T>, Unresolved> {
        if self.taken {
            return Ok(None);
        }
        match self.rx.try_recv() {
            Ok(v) => {
                self.taken = true;
                Ok(Some(v))
            }
            Err(oneshot::error::TryRecvError::Empty) => Ok(None),
            Err(oneshot::error::TryRecvError::Closed) => Err(Unresolved),
        }
    }

    /// True once the value has been handed out by `try_take` or a completed poll.
    pub fn is_taken(&self) -> bool {
        self.taken
    }

    /// Block the current thread until resolved. Must not be called from async context.
    pub fn blocking_wait(self) -> std::result::Result<T, Unresolved> {
        self.rx.blocking_recv().map_err(|_| Unresolved)
    }
}

impl<T> Future for ResponseHandle<T> {
    type Output = std::result::Result<T, Unresolved>;

    /// A handle whose value was already taken yields `Err(Unresolved)`.
    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        if self.taken {
            return Poll::Ready(Err(Unresolved));
        }
        let value = match Pin::new(&mut self.rx).poll(cx) {
            Poll::Pending => return Poll::Pending,
            Poll::Ready(v) => v,
        };
        self.taken = true;
        Poll::Ready(value.map_err(|_| Unresolved))
    }
}
