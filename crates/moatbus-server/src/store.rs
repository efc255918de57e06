use std::collections::{BTreeMap, HashMap};

use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::error::{Result, ServerError};
use crate::obj::{BusObject, Serial};

/// Lowest assignable client id.
pub const FIRST_CLIENT_ID: u8 = 1;
/// Highest assignable client id; 0 and 127 stay reserved.
pub const LAST_CLIENT_ID: u8 = 126;

const EVENT_BUFFER: usize = 64;

/// A device and the address it holds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientInfo {
    pub serial: Serial,
    pub client_id: u8,
}

/// Registry changes, broadcast to every [`ClientStore::watch`] receiver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreEvent {
    /// A device got a fresh address.
    New(ClientInfo),
    /// A device showed up with an address it already had.
    Old(ClientInfo),
    /// A device lost its address.
    Drop(ClientInfo),
}

/// How [`ClientStore::obj_serial`] treats unknown serials.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lookup {
    /// Create the object if needed.
    Any,
    /// The object must exist.
    Existing,
    /// The object must not exist yet.
    New,
}

/// Devices by serial number and by assigned client id.
pub struct ClientStore {
    objects: HashMap<Serial, BusObject>,
    by_id: BTreeMap<u8, Serial>,
    next_id: u8,
    events: broadcast::Sender<StoreEvent>,
}

impl Default for ClientStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ClientStore {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_BUFFER);
        Self {
            objects: HashMap::new(),
            by_id: BTreeMap::new(),
            next_id: FIRST_CLIENT_ID,
            events,
        }
    }

    /// Subscribe to registry changes.
    pub fn watch(&self) -> broadcast::Receiver<StoreEvent> {
        self.events.subscribe()
    }

    pub fn obj_serial(&mut self, serial: &Serial, lookup: Lookup) -> Result<&mut BusObject> {
        let known = self.objects.contains_key(serial);
        match lookup {
            Lookup::Existing if !known => return Err(ServerError::UnknownSerial(serial.clone())),
            Lookup::New if known => return Err(ServerError::SerialExists(serial.clone())),
            _ => {}
        }
        Ok(self
            .objects
            .entry(serial.clone())
            .or_insert_with(|| BusObject::new(serial.clone())))
    }

    pub fn get(&self, serial: &Serial) -> Option<&BusObject> {
        self.objects.get(serial)
    }

    /// The device currently holding `client_id`.
    pub fn obj_client(&self, client_id: u8) -> Option<&BusObject> {
        self.by_id.get(&client_id).and_then(|s| self.objects.get(s))
    }

    pub fn obj_client_mut(&mut self, client_id: u8) -> Option<&mut BusObject> {
        let serial = self.by_id.get(&client_id)?;
        self.objects.get_mut(serial)
    }

    /// Registered devices in address order.
    pub fn clients(&self) -> impl Iterator<Item = &BusObject> + '_ {
        self.by_id.values().filter_map(|s| self.objects.get(s))
    }

    /// Number of registered devices.
    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }

    /// Next unused id, searching round-robin from the last assignment.
    pub fn free_client_id(&mut self) -> Result<u8> {
        let start = self.next_id;
        let mut id = start;
        loop {
            let next = if id >= LAST_CLIENT_ID {
                FIRST_CLIENT_ID
            } else {
                id + 1
            };
            if !self.by_id.contains_key(&id) {
                self.next_id = next;
                return Ok(id);
            }
            id = next;
            if id == start {
                return Err(ServerError::NoFreeId);
            }
        }
    }

    /// Give `serial` an address, allocating one if it has none.
    ///
    /// Registering an already registered device returns its address.
    pub fn register(&mut self, serial: &Serial) -> Result<u8> {
        if let Some(id) = self.objects.get(serial).and_then(|o| o.client_id()) {
            return Ok(id);
        }
        let id = self.free_client_id()?;
        self.bind(serial, id);
        info!(%serial, client_id = id, "client registered");
        self.report(StoreEvent::New(ClientInfo {
            serial: serial.clone(),
            client_id: id,
        }));
        Ok(id)
    }

    /// Accept the address a device says it holds.
    ///
    /// A different device bound to that address is deregistered first; if
    /// `serial` held another address it is moved. The newest claim wins.
    pub fn register_claimed(&mut self, serial: &Serial, client_id: u8) -> Result<()> {
        if !(FIRST_CLIENT_ID..=LAST_CLIENT_ID).contains(&client_id) {
            return Err(ServerError::ReservedId(client_id));
        }
        if let Some(holder) = self.by_id.get(&client_id).cloned() {
            if &holder == serial {
                return Ok(());
            }
            warn!(client_id, new = %serial, known = %holder, "conflicting serial for client id");
            self.deregister(&holder);
        }
        if let Some(old) = self.objects.get(serial).and_then(|o| o.client_id()) {
            warn!(%serial, new = client_id, known = old, "device moved to another client id");
            self.deregister(serial);
        }
        self.bind(serial, client_id);
        debug!(%serial, client_id, "client re-registered");
        self.report(StoreEvent::Old(ClientInfo {
            serial: serial.clone(),
            client_id,
        }));
        Ok(())
    }

    /// Drop the address of `serial`; returns the id it held.
    pub fn deregister(&mut self, serial: &Serial) -> Option<u8> {
        let obj = self.objects.get_mut(serial)?;
        let id = obj.client_id()?;
        obj.set_client_id(None);
        self.by_id.remove(&id);
        info!(%serial, client_id = id, "client deregistered");
        self.report(StoreEvent::Drop(ClientInfo {
            serial: serial.clone(),
            client_id: id,
        }));
        Some(id)
    }

    fn bind(&mut self, serial: &Serial, id: u8) {
        let obj = self
            .objects
            .entry(serial.clone())
            .or_insert_with(|| BusObject::new(serial.clone()));
        obj.set_client_id(Some(id));
        self.by_id.insert(id, serial.clone());
    }

    fn report(&self, event: StoreEvent) {
        // No watchers is fine.
        let _ = self.events.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn serial(n: u8) -> Serial {
        Serial::new(&[0xAB, n]).unwrap()
    }

    #[test]
    fn allocates_round_robin() {
        let mut store = ClientStore::new();
        assert_eq!(store.register(&serial(1)).unwrap(), 1);
        assert_eq!(store.register(&serial(2)).unwrap(), 2);
        store.deregister(&serial(1));
        // The cursor keeps moving forward.
        assert_eq!(store.register(&serial(3)).unwrap(), 3);
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn register_is_idempotent() {
        let mut store = ClientStore::new();
        let mut events = store.watch();
        let id = store.register(&serial(1)).unwrap();
        assert_eq!(store.register(&serial(1)).unwrap(), id);
        assert!(matches!(events.try_recv(), Ok(StoreEvent::New(_))));
        assert!(events.try_recv().is_err());
        assert_eq!(store.deregister(&serial(1)), Some(id));
        assert_eq!(store.deregister(&serial(1)), None);
    }

    #[test]
    fn full_lap_reports_no_free_id() {
        let mut store = ClientStore::new();
        for n in 0..126u8 {
            let s = Serial::new(&[n, n]).unwrap();
            store.register(&s).unwrap();
        }
        assert!(matches!(
            store.register(&serial(200)),
            Err(ServerError::NoFreeId)
        ));
        store.deregister(&Serial::new(&[40, 40]).unwrap());
        assert_eq!(store.register(&serial(200)).unwrap(), 41);
    }

    #[test]
    fn claim_of_taken_id_evicts_holder() {
        let mut store = ClientStore::new();
        let mut events = store.watch();
        store.register_claimed(&serial(1), 7).unwrap();
        store.register_claimed(&serial(2), 7).unwrap();

        assert_eq!(store.obj_client(7).unwrap().serial(), &serial(2));
        assert_eq!(store.get(&serial(1)).unwrap().client_id(), None);
        assert!(!store.get(&serial(1)).unwrap().is_attached());

        let seen: Vec<_> = std::iter::from_fn(|| events.try_recv().ok()).collect();
        assert_eq!(
            seen,
            vec![
                StoreEvent::Old(ClientInfo { serial: serial(1), client_id: 7 }),
                StoreEvent::Drop(ClientInfo { serial: serial(1), client_id: 7 }),
                StoreEvent::Old(ClientInfo { serial: serial(2), client_id: 7 }),
            ]
        );
    }

    #[test]
    fn claim_moves_device_to_new_id() {
        let mut store = ClientStore::new();
        let old = store.register(&serial(1)).unwrap();
        store.register_claimed(&serial(1), 30).unwrap();
        assert!(store.obj_client(old).is_none());
        assert_eq!(store.get(&serial(1)).unwrap().client_id(), Some(30));
        assert!(matches!(
            store.register_claimed(&serial(1), 127),
            Err(ServerError::ReservedId(127))
        ));
    }

    #[test]
    fn lookup_modes() {
        let mut store = ClientStore::new();
        assert!(matches!(
            store.obj_serial(&serial(1), Lookup::Existing),
            Err(ServerError::UnknownSerial(_))
        ));
        store.obj_serial(&serial(1), Lookup::New).unwrap().polled = true;
        assert!(matches!(
            store.obj_serial(&serial(1), Lookup::New),
            Err(ServerError::SerialExists(_))
        ));
        assert!(store.obj_serial(&serial(1), Lookup::Any).unwrap().polled);
        // Known but not registered.
        assert!(store.is_empty());
    }
}
