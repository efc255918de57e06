use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use moatbus_message::{Address, BusMessage};
use tracing::{debug, trace, warn};

use crate::aa::{poll_request, PollReply};
use crate::error::Result;
use crate::lock;
use crate::output::BusOutput;
use crate::store::ClientStore;

/// Periodically polls sleeping devices and tracks their replies.
#[derive(Clone)]
pub struct PollController<O> {
    me: Address,
    store: Arc<Mutex<ClientStore>>,
    out: O,
    interval: Duration,
    delay: Duration,
    reply_timeout: Duration,
}

impl<O: BusOutput> PollController<O> {
    pub fn new(me: Address, store: Arc<Mutex<ClientStore>>, out: O) -> Self {
        Self {
            me,
            store,
            out,
            interval: Duration::from_secs(100),
            delay: Duration::from_secs(1),
            reply_timeout: Duration::from_secs(5),
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Wait before the first poll.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// How long devices may take to answer.
    pub fn with_reply_timeout(mut self, timeout: Duration) -> Self {
        self.reply_timeout = timeout;
        self
    }

    pub fn poll_message(&self) -> Result<BusMessage> {
        Ok(BusMessage::with_data(
            self.me,
            Address::Broadcast,
            0,
            &poll_request(self.reply_timeout),
        )?)
    }

    /// Send poll requests forever.
    pub async fn run(self) {
        tokio::time::sleep(self.delay).await;
        loop {
            match self.poll_message() {
                Ok(msg) => {
                    trace!("polling devices");
                    if let Err(err) = self.out.send(msg).await {
                        warn!(error = %err, "poll request failed");
                    }
                }
                Err(err) => warn!(error = %err, "cannot build poll request"),
            }
            tokio::time::sleep(self.interval).await;
        }
    }

    /// Handle a device's poll reply.
    pub fn process(&self, msg: &BusMessage, now: Instant) -> Result<()> {
        let Address::Client(client_id) = msg.src() else {
            debug!(%msg, "poll traffic from a server ignored");
            return Ok(());
        };
        let reply = PollReply::unpack(msg.data())?;
        let mut store = lock(&self.store);
        let Some(obj) = store.obj_client_mut(client_id) else {
            warn!(client_id, "poll reply from unknown client");
            return Ok(());
        };
        if !obj.polled {
            warn!(%obj, "poll reply from a device not marked as polled");
            obj.polled = true;
        }
        if let Some(live) = reply.live() {
            obj.set_working(now, live);
            debug!(%obj, ?live, "device awake");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::obj::Serial;
    use crate::output::ChannelOutput;

    #[tokio::test]
    async fn sends_poll_requests() {
        let store = Arc::new(Mutex::new(ClientStore::new()));
        let (out, mut rx) = ChannelOutput::channel();
        let poll = PollController::new(Address::Server(2), store, out)
            .with_delay(Duration::from_millis(1))
            .with_interval(Duration::from_millis(10));
        let task = tokio::spawn(poll.run());

        for _ in 0..2 {
            let msg = tokio::time::timeout(Duration::from_secs(2), rx.recv())
                .await
                .unwrap()
                .unwrap();
            assert_eq!(msg.src(), Address::Server(2));
            assert_eq!(msg.dst(), Address::Broadcast);
            assert_eq!(msg.data(), &[0x09u8, 0x14][..]);
        }
        task.abort();
    }

    #[test]
    fn reply_refreshes_working_window() {
        let store = Arc::new(Mutex::new(ClientStore::new()));
        let serial = Serial::new(b"sleepy").unwrap();
        lock(&store).register_claimed(&serial, 9).unwrap();
        let (out, _rx) = ChannelOutput::channel();
        let poll = PollController::new(Address::Server(1), store.clone(), out);

        let now = Instant::now();
        let reply = BusMessage::with_data(
            Address::Client(9),
            Address::Server(1),
            0,
            &PollReply { t_live: Some(0x14) }.pack(),
        )
        .unwrap();
        poll.process(&reply, now).unwrap();

        let store = lock(&store);
        let obj = store.obj_client(9).unwrap();
        assert!(obj.polled);
        assert_eq!(obj.working_until(), Some(now + Duration::from_secs(5)));
    }

    #[test]
    fn unknown_client_is_ignored() {
        let store = Arc::new(Mutex::new(ClientStore::new()));
        let (out, _rx) = ChannelOutput::channel();
        let poll = PollController::new(Address::Server(1), store, out);
        let reply = BusMessage::with_data(Address::Client(3), Address::Server(1), 0, &[0x01]).unwrap();
        poll.process(&reply, Instant::now()).unwrap();
    }
}
