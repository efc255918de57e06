use std::sync::{Arc, Mutex};

use moatbus_message::{Address, BusMessage};
use tracing::{debug, error, info, warn};

use crate::aa::AaRecord;
use crate::error::Result;
use crate::output::BusOutput;
use crate::store::{ClientStore, Lookup};
use crate::lock;

/// Assigns client addresses in answer to broadcast requests.
#[derive(Clone)]
pub struct AddressController<O> {
    me: Address,
    store: Arc<Mutex<ClientStore>>,
    out: O,
}

impl<O: BusOutput> AddressController<O> {
    pub fn new(me: Address, store: Arc<Mutex<ClientStore>>, out: O) -> Self {
        Self { me, store, out }
    }

    /// Handle one address-assignment message.
    pub async fn process(&self, msg: &BusMessage) -> Result<()> {
        let aa = AaRecord::unpack(msg.data())?;
        match (msg.src(), msg.dst()) {
            (Address::Broadcast, Address::Broadcast) => self.request(aa).await,
            (Address::Broadcast, _) => {
                warn!(%msg, "reserved address message");
                Ok(())
            }
            (src, _) if src == self.me => {
                error!(%msg, "address message from myself");
                Ok(())
            }
            (Address::Server(_), _) => {
                debug!(%msg, "other server's address traffic ignored");
                Ok(())
            }
            (Address::Client(id), dst) if dst == self.me => self.client_reply(id, aa),
            (Address::Client(_), Address::Broadcast) => {
                warn!(%msg, "address collision report not handled");
                Ok(())
            }
            (Address::Client(_), _) => {
                debug!(%msg, "address message not for this server");
                Ok(())
            }
        }
    }

    /// A device asks for an address.
    async fn request(&self, aa: AaRecord) -> Result<()> {
        let lookup = if aa.must_exist() {
            Lookup::Existing
        } else {
            Lookup::Any
        };
        let client_id = {
            let mut store = lock(&self.store);
            store.obj_serial(&aa.serial, lookup)?.polled = aa.polled();
            store.register(&aa.serial)?
        };

        let reply = BusMessage::with_data(
            self.me,
            Address::client(client_id)?,
            0,
            &AaRecord::new(aa.serial.clone()).pack(),
        )?;
        match aa.continue_delay() {
            Some(delay) => {
                debug!(serial = %aa.serial, ?delay, "delaying address accept");
                let out = self.out.clone();
                tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    if let Err(err) = out.send(reply).await {
                        warn!(error = %err, "delayed address accept failed");
                    }
                });
            }
            None => self.out.send(reply).await?,
        }
        info!(serial = %aa.serial, client_id, "address accepted");
        Ok(())
    }

    /// A device tells us which address it holds.
    fn client_reply(&self, client_id: u8, aa: AaRecord) -> Result<()> {
        let mut store = lock(&self.store);
        store.obj_serial(&aa.serial, Lookup::Any)?.polled = aa.polled();
        store.register_claimed(&aa.serial, client_id)
    }
}
