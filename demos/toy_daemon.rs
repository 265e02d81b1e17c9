//! Wires the profile/service/server/connection core up to a toy transport
//! and adapter, in the style of `bluer`'s `examples/rfcomm_server.rs`: a
//! minimal, runnable sketch rather than a full daemon.

use btprofcore::external::{
    Adapter, AuthorizationProvider, Channel, IoCondition, ListenOptions, Listener, Transport,
};
use btprofcore::ids::{AuthRequestId, SvcWaitId, WatchId};
use btprofcore::registry::{Profile, ProfileRegistry};
use btprofcore::server::Server;
use btprofcore::service::{Service, ServiceRef};
use btprofcore::{Address, Result};
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;
use uuid::Uuid;

struct ToyAdapter {
    address: Address,
    devices: RefCell<HashMap<Address, Rc<ToyDevice>>>,
}

impl Adapter for ToyAdapter {
    fn address(&self) -> Address {
        self.address
    }

    fn find_device(&self, address: Address) -> Option<Rc<dyn btprofcore::external::Device>> {
        self.devices.borrow().get(&address).map(|d| d.clone() as Rc<dyn btprofcore::external::Device>)
    }
}

struct ToyDevice {
    address: Address,
    adapter: Rc<dyn Adapter>,
    services: RefCell<HashMap<Uuid, ServiceRef>>,
}

impl btprofcore::external::Device for ToyDevice {
    fn address(&self) -> Address {
        self.address
    }

    fn adapter(&self) -> Rc<dyn Adapter> {
        self.adapter.clone()
    }

    fn add_uuid(&self, uuid: Uuid) {
        log::debug!("device {} advertises {uuid}", self.address);
    }

    fn get_service(&self, uuid: Uuid) -> Option<ServiceRef> {
        self.services.borrow().get(&uuid).cloned()
    }

    fn wait_for_svc_complete(&self, cb: Box<dyn FnOnce(Result<()>)>) -> SvcWaitId {
        // A toy device has already finished discovery by the time it is known.
        cb(Ok(()));
        SvcWaitId::next()
    }

    fn cancel_svc_complete(&self, _id: SvcWaitId) {}
}

struct ToyChannel {
    source: Address,
    destination: Address,
    rfcomm_channel: Option<u8>,
}

impl Channel for ToyChannel {
    fn source(&self) -> Address {
        self.source
    }

    fn destination(&self) -> Address {
        self.destination
    }

    fn psm(&self) -> Option<u16> {
        None
    }

    fn rfcomm_channel(&self) -> Option<u8> {
        self.rfcomm_channel
    }

    fn accept(&self, cb: Box<dyn FnOnce(Result<()>)>) {
        cb(Ok(()))
    }

    fn shutdown(&self, _linger: bool) {
        log::info!("channel {} -> {} shut down", self.source, self.destination);
    }

    fn watch(&self, _cb: Box<dyn FnMut(IoCondition)>) -> WatchId {
        WatchId::next()
    }

    fn cancel_watch(&self, _id: WatchId) {}
}

#[derive(Default)]
struct ToyListener {
    incoming: RefCell<Option<Box<dyn FnMut(Rc<dyn Channel>)>>>,
}

impl Listener for ToyListener {
    fn watch_incoming(&self, cb: Box<dyn FnMut(Rc<dyn Channel>)>) -> WatchId {
        *self.incoming.borrow_mut() = Some(cb);
        WatchId::next()
    }

    fn shutdown(&self) {
        self.incoming.borrow_mut().take();
    }
}

#[derive(Default)]
struct ToyTransport;

impl Transport for ToyTransport {
    fn listen(&self, opts: &ListenOptions) -> Result<Rc<dyn Listener>> {
        log::info!("listening with options {opts:?}");
        Ok(Rc::new(ToyListener::default()))
    }
}

struct AlwaysAuthorize;

impl AuthorizationProvider for AlwaysAuthorize {
    fn request_authorization(
        &self, _src: Address, _dst: Address, _uuid: Uuid, cb: Box<dyn FnOnce(Result<()>)>,
    ) -> AuthRequestId {
        cb(Ok(()));
        AuthRequestId::next()
    }

    fn cancel_authorization(&self, _id: AuthRequestId) {}
}

fn main() {
    env_logger::init();

    let headset_uuid = Uuid::parse_str("0000111e-0000-1000-8000-00805f9b34fb").unwrap();

    let mut registry = ProfileRegistry::new();
    let mut profile = Profile::new("toy-hfp", headset_uuid, headset_uuid);
    profile.connect = Some(Box::new(|svc| {
        log::info!("profile asked to connect to {}", svc.remote_uuid());
        Ok(())
    }));
    profile.disconnect = Some(Box::new(|svc| {
        log::info!("profile asked to disconnect from {}", svc.remote_uuid());
        Ok(())
    }));
    let profile = registry.register(profile).expect("name is unique");

    let adapter: Rc<dyn Adapter> = Rc::new(ToyAdapter { address: Address::any(), devices: RefCell::new(HashMap::new()) });
    let server = Server::create(adapter.clone(), profile.clone()).expect("toy adapter never rejects probe");

    let transport = ToyTransport::default();
    let endpoint = server
        .listen(
            &transport,
            ListenOptions { channel: Some(1), ..Default::default() },
            Some(Rc::new(AlwaysAuthorize)),
            Rc::new(|_conn, result| {
                log::info!("connection accepted: {result:?}");
                Ok(())
            }),
            Rc::new(|_conn| log::info!("connection torn down")),
        )
        .expect("listen should succeed against a fresh toy transport");
    log::info!("endpoint authorize={}", endpoint.authorize());

    let service = Service::new(headset_uuid, true);
    service.add_state_cb(Box::new(|old, new| log::info!("service {old} -> {new}")));

    let device_address = Address::new([0x11, 0x22, 0x33, 0x44, 0x55, 0x66]);
    let device = Rc::new(ToyDevice { address: device_address, adapter: adapter.clone(), services: RefCell::new(HashMap::new()) });
    device.services.borrow_mut().insert(headset_uuid, service.add_ref());

    service.probe(device.clone(), profile.clone()).expect("toy profile always probes successfully");
    service.connect().expect("service is DISCONNECTED with a connect callback");
    service.connecting_complete(Ok(()));

    let channel: Rc<dyn Channel> =
        Rc::new(ToyChannel { source: adapter.address(), destination: device_address, rfcomm_channel: Some(1) });
    let _ = channel;

    service.disconnect().expect("service is CONNECTED with a disconnect callback");
    service.disconnecting_complete(Ok(()));

    server.destroy();
}
