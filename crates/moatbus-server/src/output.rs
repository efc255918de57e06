use std::future::Future;

use moatbus_message::BusMessage;

use crate::error::Result;

/// Where controllers put outgoing bus messages.
pub trait BusOutput: Clone + Send + Sync + 'static {
    fn send(&self, msg: BusMessage) -> impl Future<Output = Result<()>> + Send;
}

impl BusOutput for moatbus_frame::BusSender {
    async fn send(&self, msg: BusMessage) -> Result<()> {
        moatbus_frame::BusSender::send(self, msg).await?;
        Ok(())
    }
}

/// Collects sent messages on an unbounded channel.
#[derive(Debug, Clone)]
pub struct ChannelOutput {
    tx: tokio::sync::mpsc::UnboundedSender<BusMessage>,
}

impl ChannelOutput {
    pub fn channel() -> (Self, tokio::sync::mpsc::UnboundedReceiver<BusMessage>) {
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl BusOutput for ChannelOutput {
    async fn send(&self, msg: BusMessage) -> Result<()> {
        self.tx
            .send(msg)
            .map_err(|_| crate::error::ServerError::Bus("output closed".into()))
    }
}
