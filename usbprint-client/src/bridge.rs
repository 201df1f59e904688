//! Bridge abstraction between the client and the printer service host

use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::oneshot;

use crate::call::Call;
use crate::error::ClientResult;

/// Outcome of a call: success value or failure value, both opaque
pub type Outcome = Result<Value, Value>;

/// Dispatch capability injected into the client
///
/// `dispatch` returns as soon as the call has been handed off. The outcome
/// travels back through the [`Reply`].
#[async_trait]
pub trait Bridge: Send + Sync + std::fmt::Debug {
    async fn dispatch(&self, call: Call, reply: Reply) -> ClientResult<()>;
}

#[async_trait]
impl<B: Bridge + ?Sized> Bridge for Arc<B> {
    async fn dispatch(&self, call: Call, reply: Reply) -> ClientResult<()> {
        (**self).dispatch(call, reply).await
    }
}

/// Single-use completion handle carrying the success/failure continuations
///
/// Answering consumes the handle, so a call gets at most one outcome.
#[derive(Debug)]
pub struct Reply {
    tx: oneshot::Sender<Outcome>,
}

impl Reply {
    /// Create a reply handle and the receiver the caller waits on
    pub fn channel() -> (Self, oneshot::Receiver<Outcome>) {
        let (tx, rx) = oneshot::channel();
        (Self { tx }, rx)
    }

    pub fn success(self, value: Value) {
        self.send(Ok(value));
    }

    pub fn failure(self, error: Value) {
        self.send(Err(error));
    }

    pub fn send(self, outcome: Outcome) {
        if self.tx.send(outcome).is_err() {
            tracing::debug!("Caller went away before the outcome arrived");
        }
    }

    /// Whether the caller stopped waiting
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}
