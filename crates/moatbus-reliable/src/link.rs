use std::future::Future;

use moatbus_frame::SerialBus;
use moatbus_message::{Address, BusMessage};
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, warn};

use crate::error::LinkError;
use crate::wire::WireMessage;

/// Unreliable, order-preserving carrier of [`WireMessage`]s.
///
/// Messages may be lost; the channel above retransmits.
pub trait Link: Send + Sync + 'static {
    fn send(&self, msg: WireMessage) -> impl Future<Output = Result<(), LinkError>> + Send;

    /// Next message; `None` once the link is gone.
    ///
    /// Must be cancel-safe: the channel polls it inside `select!`.
    fn recv(&self) -> impl Future<Output = Result<Option<WireMessage>, LinkError>> + Send;
}

/// In-process link, one half of a connected pair.
#[derive(Debug)]
pub struct MemoryLink {
    tx: mpsc::UnboundedSender<WireMessage>,
    rx: Mutex<mpsc::UnboundedReceiver<WireMessage>>,
}

impl MemoryLink {
    pub fn pair() -> (Self, Self) {
        let (a_tx, a_rx) = mpsc::unbounded_channel();
        let (b_tx, b_rx) = mpsc::unbounded_channel();
        (
            Self {
                tx: a_tx,
                rx: Mutex::new(b_rx),
            },
            Self {
                tx: b_tx,
                rx: Mutex::new(a_rx),
            },
        )
    }
}

impl Link for MemoryLink {
    async fn send(&self, msg: WireMessage) -> Result<(), LinkError> {
        self.tx.send(msg).map_err(|_| LinkError::Closed)
    }

    async fn recv(&self) -> Result<Option<WireMessage>, LinkError> {
        Ok(self.rx.lock().await.recv().await)
    }
}

/// Channel messages carried as JSON in bus messages between two nodes.
///
/// Only messages from `peer` to `local` with the configured code are
/// accepted; everything else on the bus is skipped.
pub struct BusLink {
    bus: SerialBus,
    local: Address,
    peer: Address,
    code: u8,
}

impl BusLink {
    pub fn new(bus: SerialBus, local: Address, peer: Address, code: u8) -> Self {
        Self {
            bus,
            local,
            peer,
            code,
        }
    }

    pub fn into_inner(self) -> SerialBus {
        self.bus
    }
}

impl Link for BusLink {
    async fn send(&self, msg: WireMessage) -> Result<(), LinkError> {
        let payload = msg.to_json()?;
        let bus_msg = BusMessage::with_data(self.local, self.peer, self.code, &payload)?;
        self.bus.send(bus_msg).await?;
        Ok(())
    }

    async fn recv(&self) -> Result<Option<WireMessage>, LinkError> {
        loop {
            let Some(msg) = self.bus.recv().await else {
                return Ok(None);
            };
            if msg.src() != self.peer || msg.dst() != self.local || msg.code() != self.code {
                debug!(%msg, "not for this channel");
                continue;
            }
            match WireMessage::from_json(msg.data()) {
                Ok(wire) => return Ok(Some(wire)),
                Err(err) => warn!(error = %err, "undecodable channel message dropped"),
            }
        }
    }
}
