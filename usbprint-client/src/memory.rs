//! In-process bridge
//!
//! The client end pushes [`Envelope`]s into a channel; the host end pulls
//! them in dispatch order and answers through each envelope's [`Reply`].

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::bridge::{Bridge, Reply};
use crate::call::Call;
use crate::error::{ClientError, ClientResult};

/// A dispatched call together with its completion handle
#[derive(Debug)]
pub struct Envelope {
    pub call: Call,
    pub reply: Reply,
}

/// Client end of the in-memory bridge
#[derive(Debug, Clone)]
pub struct MemoryBridge {
    tx: mpsc::UnboundedSender<Envelope>,
}

/// Host end of the in-memory bridge
#[derive(Debug)]
pub struct BridgeHost {
    rx: mpsc::UnboundedReceiver<Envelope>,
}

impl MemoryBridge {
    /// Create a connected client/host pair
    pub fn channel() -> (MemoryBridge, BridgeHost) {
        let (tx, rx) = mpsc::unbounded_channel();
        (MemoryBridge { tx }, BridgeHost { rx })
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

#[async_trait]
impl Bridge for MemoryBridge {
    async fn dispatch(&self, call: Call, reply: Reply) -> ClientResult<()> {
        self.tx
            .send(Envelope { call, reply })
            .map_err(|_| ClientError::BridgeClosed)
    }
}

impl BridgeHost {
    /// Wait for the next call. `None` once every client end is dropped.
    pub async fn recv(&mut self) -> Option<Envelope> {
        self.rx.recv().await
    }

    /// Take the next call if one is already queued
    pub fn try_recv(&mut self) -> Option<Envelope> {
        self.rx.try_recv().ok()
    }

    /// Stop accepting calls; later dispatches fail with `BridgeClosed`
    pub fn close(&mut self) {
        self.rx.close();
    }
}
