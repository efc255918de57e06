use futures_util::{SinkExt, StreamExt};
use moatbus_message::BusMessage;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::codec::Framed;
use tracing::{debug, trace, warn};

use crate::async_codec::{Outgoing, SerialCodec};
use crate::codec::FramerConfig;
use crate::error::{Result, SerialError};
use crate::event::SerialEvent;
use crate::serial::log_console;

/// Cloneable handle for queueing outgoing messages on a [`SerialBus`].
#[derive(Debug, Clone)]
pub struct BusSender {
    tx: mpsc::Sender<BusMessage>,
}

impl BusSender {
    pub async fn send(&self, msg: BusMessage) -> Result<()> {
        self.tx
            .send(msg)
            .await
            .map_err(|_| SerialError::ConnectionClosed)
    }
}

/// A serial line driven by a background tokio task.
///
/// The task owns the stream and the framer, ticks the framer every
/// `FramerConfig::tick`, writes acknowledgements, logs console text and
/// framing errors, and forwards received messages to [`SerialBus::recv`].
pub struct SerialBus {
    sender: BusSender,
    inbound: Mutex<mpsc::Receiver<BusMessage>>,
    task: JoinHandle<Result<()>>,
}

impl SerialBus {
    pub fn spawn<S>(stream: S, config: FramerConfig) -> Self
    where
        S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    {
        let depth = config.queue_depth.max(1);
        let (out_tx, out_rx) = mpsc::channel(depth);
        let (in_tx, in_rx) = mpsc::channel(depth);
        let task = tokio::spawn(drive(stream, config, out_rx, in_tx));
        Self {
            sender: BusSender { tx: out_tx },
            inbound: Mutex::new(in_rx),
            task,
        }
    }

    pub async fn send(&self, msg: BusMessage) -> Result<()> {
        self.sender.send(msg).await
    }

    pub fn sender(&self) -> BusSender {
        self.sender.clone()
    }

    /// Next received message; `None` once the line is closed.
    ///
    /// Cancel-safe.
    pub async fn recv(&self) -> Option<BusMessage> {
        self.inbound.lock().await.recv().await
    }

    /// Stop the driver task.
    pub async fn shutdown(self) -> Result<()> {
        self.task.abort();
        match self.task.await {
            Ok(result) => result,
            Err(err) if err.is_cancelled() => Ok(()),
            Err(err) => Err(SerialError::Io(std::io::Error::other(err.to_string()))),
        }
    }
}

async fn drive<S>(
    stream: S,
    config: FramerConfig,
    mut outbound: mpsc::Receiver<BusMessage>,
    inbound: mpsc::Sender<BusMessage>,
) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut framed = Framed::new(stream, SerialCodec::new(&config));
    let mut tick = tokio::time::interval(config.tick);
    tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            event = framed.next() => match event {
                Some(Ok(event)) => handle_event(event, &mut framed, &inbound).await?,
                Some(Err(err)) => return Err(err),
                None => {
                    debug!("serial line closed");
                    return Ok(());
                }
            },
            msg = outbound.recv() => match msg {
                Some(msg) => {
                    trace!(%msg, "sending");
                    framed.send(Outgoing::Message(msg)).await?;
                }
                None => return Ok(()),
            },
            _ = tick.tick() => {
                framed.codec_mut().tick();
                while let Some(event) = framed.codec_mut().pop_event() {
                    handle_event(event, &mut framed, &inbound).await?;
                }
            }
        }
    }
}

async fn handle_event<S>(
    event: SerialEvent,
    framed: &mut Framed<S, SerialCodec>,
    inbound: &mpsc::Sender<BusMessage>,
) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    match event {
        SerialEvent::Message(msg) => {
            if inbound.send(msg).await.is_err() {
                debug!("no receiver for bus messages; dropping");
            }
        }
        SerialEvent::Output(bytes) => framed.send(Outgoing::Raw(bytes)).await?,
        SerialEvent::Ack => trace!("ack"),
        SerialEvent::Console(line) => log_console(&line),
        SerialEvent::Error(err) => warn!(%err, code = err.code(), "framing error"),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use moatbus_message::Address;

    use super::*;

    #[tokio::test]
    async fn two_buses_exchange_messages() {
        let (a, b) = tokio::io::duplex(4096);
        let left = SerialBus::spawn(a, FramerConfig::default());
        let right = SerialBus::spawn(b, FramerConfig::default());

        let ping = BusMessage::with_data(Address::Client(3), Address::Server(1), 2, b"ping").unwrap();
        let pong = BusMessage::with_data(Address::Server(1), Address::Client(3), 3, b"pong").unwrap();

        left.send(ping.clone()).await.unwrap();
        let got = tokio::time::timeout(Duration::from_secs(2), right.recv())
            .await
            .unwrap();
        assert_eq!(got, Some(ping));

        right.sender().send(pong.clone()).await.unwrap();
        let got = tokio::time::timeout(Duration::from_secs(2), left.recv())
            .await
            .unwrap();
        assert_eq!(got, Some(pong));

        left.shutdown().await.unwrap();
        right.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn frames_are_acked_while_the_consumer_lags() {
        use bytes::BytesMut;
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        use crate::codec::{encode_frame, ACK};

        let (a, mut line) = tokio::io::duplex(4096);
        let config = FramerConfig {
            queue_depth: 1,
            ..FramerConfig::default()
        };
        let bus = SerialBus::spawn(a, config);

        let mut wire = BytesMut::new();
        for code in 1..=3 {
            let msg = BusMessage::from_raw(5, -3, code).unwrap();
            encode_frame(&msg, &mut wire).unwrap();
        }
        line.write_all(&wire).await.unwrap();

        // the first message fills the queue and the second is held back,
        // yet both have been acknowledged
        let mut acks = [0u8; 2];
        tokio::time::timeout(Duration::from_secs(2), line.read_exact(&mut acks))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(acks, [ACK, ACK]);

        for code in 1..=3 {
            let got = tokio::time::timeout(Duration::from_secs(2), bus.recv())
                .await
                .unwrap()
                .unwrap();
            assert_eq!(got.code(), code);
        }
        bus.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn recv_ends_when_line_closes() {
        let (a, b) = tokio::io::duplex(64);
        let bus = SerialBus::spawn(a, FramerConfig::default());
        drop(b);
        let got = tokio::time::timeout(Duration::from_secs(2), bus.recv())
            .await
            .unwrap();
        assert_eq!(got, None);
    }
}
