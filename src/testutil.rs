//! In-memory fakes of the §6 external traits, for exercising the state
//! machine without a kernel socket or a running daemon (§10.4).
//!
//! Every fake exposes test-only "drive" methods (`fire_svc_complete`,
//! `resolve_auth`, `push_incoming`, `hangup`) that a test calls to simulate
//! what the real adapter/transport/authorization layers would eventually
//! call back with.

use crate::external::{
    Adapter, AuthorizationProvider, Channel, Device, IoCondition, ListenOptions, Listener, Transport,
};
use crate::ids::{AuthRequestId, SvcWaitId, WatchId};
use crate::service::ServiceRef;
use crate::{Address, Error, ErrorKind, Result};
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;
use uuid::Uuid;

/// A fake local controller: tracks known devices by address.
#[derive(Default)]
pub struct FakeAdapter {
    address: Address,
    devices: RefCell<HashMap<Address, Rc<FakeDevice>>>,
}

impl FakeAdapter {
    /// Creates a fake adapter at the given address.
    pub fn new(address: Address) -> Rc<Self> {
        Rc::new(Self { address, devices: RefCell::new(HashMap::new()) })
    }

    /// Registers a device as known to this adapter.
    pub fn add_device(self: &Rc<Self>, device: Rc<FakeDevice>) {
        self.devices.borrow_mut().insert(device.address(), device);
    }
}

impl Adapter for FakeAdapter {
    fn address(&self) -> Address {
        self.address
    }

    fn find_device(&self, address: Address) -> Option<Rc<dyn Device>> {
        self.devices.borrow().get(&address).map(|d| d.clone() as Rc<dyn Device>)
    }
}

/// A fake remote peer: tracks advertised UUIDs and bound services.
pub struct FakeDevice {
    address: Address,
    adapter: Rc<dyn Adapter>,
    uuids: RefCell<Vec<Uuid>>,
    services: RefCell<HashMap<Uuid, ServiceRef>>,
    svc_waits: RefCell<Vec<(SvcWaitId, Box<dyn FnOnce(Result<()>)>)>>,
}

impl FakeDevice {
    /// Creates a fake device at the given address, belonging to `adapter`.
    pub fn new(address: Address, adapter: Rc<dyn Adapter>) -> Rc<Self> {
        Rc::new(Self {
            address,
            adapter,
            uuids: RefCell::new(Vec::new()),
            services: RefCell::new(HashMap::new()),
            svc_waits: RefCell::new(Vec::new()),
        })
    }

    /// Binds a Service to this device for `uuid`, as `device.get_service`
    /// would return once probing has created one.
    pub fn bind_service(&self, uuid: Uuid, service: ServiceRef) {
        self.services.borrow_mut().insert(uuid, service);
    }

    /// Fires every pending "service discovery complete" wait with `result`,
    /// as the real SDP layer would once resolution finishes.
    pub fn fire_svc_complete(&self, result: Result<()>) {
        let waits = self.svc_waits.take();
        for (_, cb) in waits {
            cb(result.clone());
        }
    }

    /// Number of outstanding service-discovery waits.
    pub fn pending_svc_waits(&self) -> usize {
        self.svc_waits.borrow().len()
    }
}

impl Device for FakeDevice {
    fn address(&self) -> Address {
        self.address
    }

    fn adapter(&self) -> Rc<dyn Adapter> {
        self.adapter.clone()
    }

    fn add_uuid(&self, uuid: Uuid) {
        let mut uuids = self.uuids.borrow_mut();
        if !uuids.contains(&uuid) {
            uuids.push(uuid);
        }
    }

    fn get_service(&self, uuid: Uuid) -> Option<ServiceRef> {
        self.services.borrow().get(&uuid).cloned()
    }

    fn wait_for_svc_complete(&self, cb: Box<dyn FnOnce(Result<()>)>) -> SvcWaitId {
        let id = SvcWaitId::next();
        self.svc_waits.borrow_mut().push((id, cb));
        id
    }

    fn cancel_svc_complete(&self, id: SvcWaitId) {
        self.svc_waits.borrow_mut().retain(|(i, _)| *i != id);
    }
}

/// A fake transport channel with test-visible call counters.
pub struct FakeChannel {
    source: Address,
    destination: Address,
    psm: Option<u16>,
    rfcomm_channel: Option<u8>,
    watch_cb: RefCell<Option<Box<dyn FnMut(IoCondition)>>>,
    accepted: RefCell<bool>,
    shutdown_calls: RefCell<u32>,
    fail_accept: RefCell<Option<Error>>,
}

impl FakeChannel {
    /// Creates a fake RFCOMM-shaped channel.
    pub fn rfcomm(source: Address, destination: Address, channel: u8) -> Rc<Self> {
        Rc::new(Self {
            source,
            destination,
            psm: None,
            rfcomm_channel: Some(channel),
            watch_cb: RefCell::new(None),
            accepted: RefCell::new(false),
            shutdown_calls: RefCell::new(0),
            fail_accept: RefCell::new(None),
        })
    }

    /// Creates a fake L2CAP-shaped channel.
    pub fn l2cap(source: Address, destination: Address, psm: u16) -> Rc<Self> {
        Rc::new(Self {
            source,
            destination,
            psm: Some(psm),
            rfcomm_channel: None,
            watch_cb: RefCell::new(None),
            accepted: RefCell::new(false),
            shutdown_calls: RefCell::new(0),
            fail_accept: RefCell::new(None),
        })
    }

    /// Makes the next `accept` call fail with `err`.
    pub fn fail_next_accept(&self, err: Error) {
        *self.fail_accept.borrow_mut() = Some(err);
    }

    /// Simulates a HUP/ERR/NVAL delivered on this channel's watch.
    pub fn simulate_condition(&self, cond: IoCondition) {
        if let Some(cb) = self.watch_cb.borrow_mut().as_mut() {
            cb(cond);
        }
    }

    /// How many times `shutdown` was called.
    pub fn shutdown_calls(&self) -> u32 {
        *self.shutdown_calls.borrow()
    }

    /// Whether transport accept ever succeeded on this channel.
    pub fn was_accepted(&self) -> bool {
        *self.accepted.borrow()
    }
}

impl Channel for FakeChannel {
    fn source(&self) -> Address {
        self.source
    }

    fn destination(&self) -> Address {
        self.destination
    }

    fn psm(&self) -> Option<u16> {
        self.psm
    }

    fn rfcomm_channel(&self) -> Option<u8> {
        self.rfcomm_channel
    }

    fn accept(&self, cb: Box<dyn FnOnce(Result<()>)>) {
        if let Some(err) = self.fail_accept.borrow_mut().take() {
            cb(Err(err));
            return;
        }
        *self.accepted.borrow_mut() = true;
        cb(Ok(()));
    }

    fn shutdown(&self, _linger: bool) {
        *self.shutdown_calls.borrow_mut() += 1;
        self.watch_cb.borrow_mut().take();
    }

    fn watch(&self, cb: Box<dyn FnMut(IoCondition)>) -> WatchId {
        *self.watch_cb.borrow_mut() = Some(cb);
        WatchId::next()
    }

    fn cancel_watch(&self, _id: WatchId) {
        self.watch_cb.borrow_mut().take();
    }
}

/// A fake listening endpoint; tests drive it with [`FakeListener::push_incoming`].
#[derive(Default)]
pub struct FakeListener {
    incoming_cb: RefCell<Option<Box<dyn FnMut(Rc<dyn Channel>)>>>,
    shut_down: RefCell<bool>,
}

impl FakeListener {
    /// Creates an idle fake listener.
    pub fn new() -> Rc<Self> {
        Rc::new(Self::default())
    }

    /// Delivers `channel` to the registered incoming-connection callback, as
    /// a real transport would once it accepts a raw connection.
    pub fn push_incoming(&self, channel: Rc<dyn Channel>) {
        if let Some(cb) = self.incoming_cb.borrow_mut().as_mut() {
            cb(channel);
        }
    }

    /// Whether `shutdown` was ever called.
    pub fn is_shut_down(&self) -> bool {
        *self.shut_down.borrow()
    }
}

impl Listener for FakeListener {
    fn watch_incoming(&self, cb: Box<dyn FnMut(Rc<dyn Channel>)>) -> WatchId {
        *self.incoming_cb.borrow_mut() = Some(cb);
        WatchId::next()
    }

    fn shutdown(&self) {
        *self.shut_down.borrow_mut() = true;
        self.incoming_cb.borrow_mut().take();
    }
}

/// A fake transport: every `listen` call returns a fresh [`FakeListener`],
/// kept so tests can drive it afterwards.
#[derive(Default)]
pub struct FakeTransport {
    listeners: RefCell<Vec<Rc<FakeListener>>>,
}

impl FakeTransport {
    /// Creates a fake transport with no listeners yet.
    pub fn new() -> Rc<Self> {
        Rc::new(Self::default())
    }

    /// All listeners created so far, in creation order.
    pub fn listeners(&self) -> Vec<Rc<FakeListener>> {
        self.listeners.borrow().clone()
    }
}

impl Transport for FakeTransport {
    fn listen(&self, _opts: &ListenOptions) -> Result<Rc<dyn Listener>> {
        let listener = FakeListener::new();
        self.listeners.borrow_mut().push(listener.clone());
        Ok(listener)
    }
}

/// A fake authorization provider; tests resolve requests with [`FakeAuthorizationProvider::resolve`].
#[derive(Default)]
pub struct FakeAuthorizationProvider {
    pending: RefCell<HashMap<u64, Box<dyn FnOnce(Result<()>)>>>,
}

impl FakeAuthorizationProvider {
    /// Creates a fake authorization provider with no requests pending.
    pub fn new() -> Rc<Self> {
        Rc::new(Self::default())
    }

    /// Resolves the request with the given id.
    pub fn resolve(&self, id: AuthRequestId, result: Result<()>) {
        if let Some(cb) = self.pending.borrow_mut().remove(&id.value()) {
            cb(result);
        }
    }

    /// Number of outstanding authorization requests.
    pub fn pending_count(&self) -> usize {
        self.pending.borrow().len()
    }

    /// Resolves an arbitrary outstanding request, for tests that don't care
    /// which one (there is usually exactly one).
    pub fn resolve_first(&self, result: Result<()>) {
        let id = match self.pending.borrow().keys().next().copied() {
            Some(id) => id,
            None => return,
        };
        if let Some(cb) = self.pending.borrow_mut().remove(&id) {
            cb(result);
        }
    }
}

impl AuthorizationProvider for FakeAuthorizationProvider {
    fn request_authorization(
        &self, _src: Address, _dst: Address, _uuid: Uuid, cb: Box<dyn FnOnce(Result<()>)>,
    ) -> AuthRequestId {
        let id = AuthRequestId::next();
        self.pending.borrow_mut().insert(id.value(), cb);
        id
    }

    fn cancel_authorization(&self, id: AuthRequestId) {
        self.pending.borrow_mut().remove(&id.value());
    }
}

/// Shorthand for a rejected result, for tests asserting on error kinds.
pub fn rejected() -> Result<()> {
    Err(Error::new(ErrorKind::Rejected))
}
