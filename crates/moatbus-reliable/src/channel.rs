use std::collections::HashMap;
use std::time::Instant;

use bytes::Bytes;
use tokio::sync::{mpsc, oneshot, watch, Mutex};
use tracing::{debug, trace, warn};

use crate::config::ReliableConfig;
use crate::error::{LinkError, ReliableError, Result};
use crate::link::Link;
use crate::session::{Session, SessionEvent, SessionStats, Ticket};
use crate::wire::WireMessage;

/// Observable state of a [`ReliableChannel`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    /// Handshake in progress.
    Connecting,
    Up,
    Closed,
}

enum Command {
    Send(Bytes, oneshot::Sender<Result<()>>),
    Close(Option<String>, oneshot::Sender<()>),
    Stats(oneshot::Sender<SessionStats>),
}

/// A reliable, ordered message channel over a lossy [`Link`].
///
/// A background task owns the link and the [`Session`]; this handle talks
/// to it through channels. Dropping every handle closes the channel and
/// tells the peer.
pub struct ReliableChannel {
    commands: mpsc::UnboundedSender<Command>,
    delivered: Mutex<mpsc::UnboundedReceiver<Bytes>>,
    state: watch::Receiver<ChannelState>,
}

impl ReliableChannel {
    /// Start the handshake on `link`. Must be called within a tokio runtime.
    pub fn open<L: Link>(link: L, config: ReliableConfig) -> Result<Self> {
        config.validate()?;
        let session = Session::new(config, rand::random(), Instant::now());
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(ChannelState::Connecting);
        let actor = Actor {
            link,
            session,
            waiters: HashMap::new(),
            delivered: out_tx,
            state: state_tx,
            link_alive: true,
        };
        tokio::spawn(actor.run(cmd_rx));
        Ok(Self {
            commands: cmd_tx,
            delivered: Mutex::new(out_rx),
            state: state_rx,
        })
    }

    /// Send `payload` and wait for the peer's acknowledgement.
    pub async fn send(&self, payload: impl Into<Bytes>) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(Command::Send(payload.into(), tx))
            .map_err(|_| ReliableError::Closed)?;
        rx.await.unwrap_or(Err(ReliableError::Closed))
    }

    /// Next delivered payload; `None` once the channel is finished.
    ///
    /// Cancel-safe.
    pub async fn recv(&self) -> Option<Bytes> {
        self.delivered.lock().await.recv().await
    }

    /// Close the channel, failing every pending send.
    pub async fn close(&self, reason: Option<String>) {
        let (tx, rx) = oneshot::channel();
        if self.commands.send(Command::Close(reason, tx)).is_ok() {
            let _ = rx.await;
        }
    }

    /// Wait for the handshake to complete.
    pub async fn wait_up(&self) -> Result<()> {
        let mut state = self.state.clone();
        let settled = state
            .wait_for(|s| *s != ChannelState::Connecting)
            .await
            .map(|s| *s);
        match settled {
            Ok(ChannelState::Up) => Ok(()),
            _ => Err(ReliableError::Closed),
        }
    }

    pub fn state(&self) -> ChannelState {
        *self.state.borrow()
    }

    pub async fn stats(&self) -> Option<SessionStats> {
        let (tx, rx) = oneshot::channel();
        self.commands.send(Command::Stats(tx)).ok()?;
        rx.await.ok()
    }
}

struct Actor<L> {
    link: L,
    session: Session,
    waiters: HashMap<Ticket, oneshot::Sender<Result<()>>>,
    delivered: mpsc::UnboundedSender<Bytes>,
    state: watch::Sender<ChannelState>,
    link_alive: bool,
}

impl<L: Link> Actor<L> {
    async fn run(mut self, mut commands: mpsc::UnboundedReceiver<Command>) {
        self.session.open(Instant::now());
        let mut handles_alive = true;
        let mut closers: Vec<oneshot::Sender<()>> = Vec::new();

        loop {
            self.flush().await;
            for done in closers.drain(..) {
                let _ = done.send(());
            }
            if !self.link_alive || (!handles_alive && self.session.is_closed()) {
                break;
            }

            let deadline = self.session.next_deadline();
            let sleep = async move {
                match deadline {
                    Some(at) => tokio::time::sleep_until(at.into()).await,
                    None => std::future::pending().await,
                }
            };

            tokio::select! {
                incoming = self.link.recv() => self.on_incoming(incoming),
                cmd = commands.recv(), if handles_alive => match cmd {
                    Some(Command::Send(payload, done)) => {
                        let ticket = self.session.submit(payload, Instant::now());
                        self.waiters.insert(ticket, done);
                    }
                    Some(Command::Close(reason, done)) => {
                        self.session.close(reason);
                        closers.push(done);
                    }
                    Some(Command::Stats(reply)) => {
                        let _ = reply.send(self.session.stats());
                    }
                    None => {
                        handles_alive = false;
                        self.session.close(None);
                    }
                },
                () = sleep => self.session.poll_timers(Instant::now()),
            }
        }
        debug!("reliable channel task finished");
    }

    fn on_incoming(&mut self, incoming: std::result::Result<Option<WireMessage>, LinkError>) {
        match incoming {
            Ok(Some(msg)) => {
                trace!(?msg, "channel message in");
                self.session.handle(msg, Instant::now());
            }
            Ok(None) => {
                debug!("link closed");
                self.link_alive = false;
                self.session
                    .shutdown(ReliableError::Transport("link closed".into()));
            }
            Err(err) => {
                warn!(error = %err, "link receive failed");
                self.link_alive = false;
                self.session.shutdown(ReliableError::Transport(err.to_string()));
            }
        }
    }

    /// Act on everything the session produced.
    async fn flush(&mut self) {
        while let Some(event) = self.session.poll_event() {
            match event {
                SessionEvent::Transmit(msg) => {
                    if !self.link_alive {
                        continue;
                    }
                    trace!(?msg, "channel message out");
                    if let Err(err) = self.link.send(msg).await {
                        warn!(error = %err, "link send failed");
                        self.link_alive = false;
                        self.session.shutdown(ReliableError::Transport(err.to_string()));
                    }
                }
                SessionEvent::Deliver(data) => {
                    let _ = self.delivered.send(data);
                }
                SessionEvent::Acked(ticket) => {
                    if let Some(done) = self.waiters.remove(&ticket) {
                        let _ = done.send(Ok(()));
                    }
                }
                SessionEvent::Failed(ticket, err) => {
                    if let Some(done) = self.waiters.remove(&ticket) {
                        let _ = done.send(Err(err));
                    }
                }
                SessionEvent::Up => {
                    self.state.send_replace(ChannelState::Up);
                }
                SessionEvent::Down => {
                    self.state.send_replace(ChannelState::Connecting);
                }
                SessionEvent::Closed(err) => {
                    debug!(error = %err, "channel closed");
                    self.state.send_replace(ChannelState::Closed);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::link::MemoryLink;
    use std::time::Duration;

    fn config() -> ReliableConfig {
        ReliableConfig::new(8, Duration::from_millis(50)).unwrap()
    }

    #[tokio::test]
    async fn send_and_receive_over_memory_link() {
        let (a, b) = MemoryLink::pair();
        let a = ReliableChannel::open(a, config()).unwrap();
        let b = ReliableChannel::open(b, config()).unwrap();
        a.wait_up().await.unwrap();
        b.wait_up().await.unwrap();

        a.send(&b"hello"[..]).await.unwrap();
        b.send(Bytes::from_static(b"back")).await.unwrap();
        assert_eq!(b.recv().await.unwrap(), Bytes::from_static(b"hello"));
        assert_eq!(a.recv().await.unwrap(), Bytes::from_static(b"back"));
        assert_eq!(a.state(), ChannelState::Up);
        assert_eq!(a.stats().await.unwrap().sent, 1);
    }

    #[tokio::test]
    async fn close_fails_pending_and_reaches_peer() {
        let (a, b) = MemoryLink::pair();
        let a = ReliableChannel::open(a, config()).unwrap();
        let b = ReliableChannel::open(b, config()).unwrap();
        a.wait_up().await.unwrap();

        a.close(Some("done".into())).await;
        assert_eq!(a.state(), ChannelState::Closed);
        assert_eq!(a.send(&b"x"[..]).await, Err(ReliableError::Closed));

        let mut state = b.state.clone();
        tokio::time::timeout(
            Duration::from_secs(2),
            state.wait_for(|s| *s == ChannelState::Closed),
        )
        .await
        .unwrap()
        .unwrap();
        match b.send(&b"y"[..]).await {
            Err(ReliableError::PeerClosed(reason)) => assert_eq!(reason.as_deref(), Some("done")),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn dropping_the_link_ends_recv() {
        let (a, b) = MemoryLink::pair();
        let a = ReliableChannel::open(a, config()).unwrap();
        drop(b);
        assert!(a.recv().await.is_none());
        assert!(a.wait_up().await.is_err());
    }

    #[test]
    fn rejects_invalid_config() {
        let (a, _b) = MemoryLink::pair();
        let cfg = ReliableConfig {
            window: 2,
            timeout: Duration::from_millis(50),
        };
        assert!(matches!(
            ReliableChannel::open(a, cfg),
            Err(ReliableError::Config(_))
        ));
    }
}
