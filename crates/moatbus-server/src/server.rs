use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use moatbus_frame::SerialBus;
use moatbus_message::{Address, BusMessage, ControlCommand, MessageKind};
use serde::Deserialize;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::addr::AddressController;
use crate::error::{Result, ServerError};
use crate::output::BusOutput;
use crate::poll::PollController;
use crate::store::{ClientStore, StoreEvent};

/// Code used by [`Server::reply`] unless told otherwise.
pub const REPLY_CODE: u8 = 3;

/// Bus server settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Server number 1..=3; the bus address is `server_id - 4`.
    pub server_id: u8,
    /// Time between poll broadcasts.
    #[serde(with = "millis")]
    pub poll_interval: Duration,
    /// Wait before the first poll.
    #[serde(with = "millis")]
    pub poll_delay: Duration,
    /// Reply window announced in poll requests.
    #[serde(with = "millis")]
    pub poll_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            server_id: 1,
            poll_interval: Duration::from_secs(100),
            poll_delay: Duration::from_secs(1),
            poll_timeout: Duration::from_secs(5),
        }
    }
}

mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer};

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }
}

/// A bus server: owns the client registry and routes control traffic to
/// the address and poll controllers.
pub struct Server<O> {
    me: Address,
    store: Arc<Mutex<ClientStore>>,
    out: O,
    addr: AddressController<O>,
    poll: PollController<O>,
}

impl<O: BusOutput> Server<O> {
    pub fn new(config: &ServerConfig, out: O) -> Result<Self> {
        let me = Address::server(config.server_id)
            .map_err(|_| ServerError::InvalidServerId(config.server_id))?;
        let store = Arc::new(Mutex::new(ClientStore::new()));
        let addr = AddressController::new(me, store.clone(), out.clone());
        let poll = PollController::new(me, store.clone(), out.clone())
            .with_interval(config.poll_interval)
            .with_delay(config.poll_delay)
            .with_reply_timeout(config.poll_timeout);
        Ok(Self {
            me,
            store,
            out,
            addr,
            poll,
        })
    }

    /// This server's bus address.
    pub fn address(&self) -> Address {
        self.me
    }

    pub fn store(&self) -> Arc<Mutex<ClientStore>> {
        self.store.clone()
    }

    pub fn watch(&self) -> broadcast::Receiver<StoreEvent> {
        crate::lock(&self.store).watch()
    }

    /// Start the periodic poll task.
    pub fn spawn_poller(&self) -> JoinHandle<()> {
        tokio::spawn(self.poll.clone().run())
    }

    /// Route one incoming message.
    ///
    /// Returns `Ok(false)` for messages that are not control traffic for
    /// this server; those belong to the application.
    pub async fn dispatch(&self, msg: &BusMessage) -> Result<bool> {
        if msg.src() == self.me {
            debug!(%msg, "own message echoed");
            return Ok(true);
        }
        match msg.kind() {
            MessageKind::Control(ControlCommand::AddressAssign) => {
                self.addr.process(msg).await?;
                Ok(true)
            }
            MessageKind::Control(ControlCommand::Poll) => {
                self.poll.process(msg, Instant::now())?;
                Ok(true)
            }
            MessageKind::Control(other) => {
                debug!(%msg, command = ?other, "control command not handled");
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    pub async fn send(&self, msg: BusMessage) -> Result<()> {
        self.out.send(msg).await
    }

    /// Answer `msg`: swapped addresses, `code` defaulting to [`REPLY_CODE`].
    pub async fn reply(&self, msg: &BusMessage, code: Option<u8>, data: &[u8]) -> Result<()> {
        let reply = BusMessage::with_data(
            msg.dst(),
            msg.src(),
            code.unwrap_or(REPLY_CODE),
            data,
        )?
        .with_prio(msg.prio())?;
        self.send(reply).await
    }

    /// Read `bus` until it closes, dispatching every message.
    ///
    /// Application messages are handed to `app`.
    pub async fn serve(&self, bus: &SerialBus, mut app: impl FnMut(BusMessage)) {
        info!(address = %self.me, "bus server running");
        while let Some(msg) = bus.recv().await {
            match self.dispatch(&msg).await {
                Ok(true) => {}
                Ok(false) => app(msg),
                Err(err) => warn!(%msg, error = %err, "control message rejected"),
            }
        }
        info!("bus closed, server stopping");
    }
}
