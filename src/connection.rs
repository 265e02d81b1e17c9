//! A single accepted transport channel attached to a Service (§4.4).
//!
//! A `Connection` is created by the inbound accept path
//! ([`crate::service::Service::incoming_conn`]) and must clear two
//! independent gates — SDP-complete and, if required, authorization —
//! before the transport accept is finalized and the owning profile's
//! connect-callback is invoked. Either gate failing, or a hangup arriving
//! before both clear, releases the Connection without ever reaching the
//! profile.

use crate::external::{AuthorizationProvider, Channel, Device, IoCondition};
use crate::ids::{AuthRequestId, SvcWaitId, WatchId};
use crate::server::Server;
use crate::service::Service;
use crate::{Address, Error, Result};
use std::cell::Cell;
use std::rc::{Rc, Weak};
use uuid::Uuid;

/// Invoked exactly once per Connection with the outcome of gating and
/// transport accept. A profile returning `Err` from this callback declines
/// an otherwise-successfully-accepted connection; the disconnect callback is
/// then suppressed (§4.2 "If `accept_cb` returns negative").
pub type ConnectCompleteCb = Rc<dyn Fn(&Rc<Connection>, Result<()>) -> Result<()>>;

/// Invoked exactly once, only if the Connection ever reached "connected",
/// when it is torn down.
pub type DisconnectCb = Rc<dyn Fn(&Rc<Connection>)>;

/// Counts down the two independent gates of §4.4 ("awaiting N of 2"),
/// grounded on `bluer::agent::RegisteredAgent::call_with_cancel`'s single
/// completion funnel for a request raced against cancellation — here
/// adapted to counting down two independent completions instead of one.
struct GateState {
    remaining: Cell<u8>,
}

impl GateState {
    fn new(authorize: bool) -> Self {
        Self { remaining: Cell::new(if authorize { 2 } else { 1 }) }
    }

    /// Returns `true` if this was the last outstanding gate.
    fn clear_one(&self) -> bool {
        let r = self.remaining.get();
        debug_assert!(r > 0, "gate cleared more times than it was armed");
        self.remaining.set(r.saturating_sub(1));
        r <= 1
    }
}

/// A transport channel in the process of being gated, or already attached
/// to a Service's connection set.
#[derive(custom_debug::Debug)]
pub struct Connection {
    #[debug(skip)]
    server: Weak<Server>,
    #[debug(skip)]
    service: Weak<Service>,
    #[debug(skip)]
    device: Rc<dyn Device>,
    #[debug(skip)]
    auth: Option<Rc<dyn AuthorizationProvider>>,
    channel: Rc<dyn Channel>,
    #[debug(skip)]
    gate: GateState,
    svc_wait_id: Cell<Option<SvcWaitId>>,
    auth_id: Cell<Option<AuthRequestId>>,
    watch_id: Cell<Option<WatchId>>,
    connected: Cell<bool>,
    released: Cell<bool>,
    #[debug(skip)]
    on_connect: ConnectCompleteCb,
    #[debug(skip)]
    on_disconnect: DisconnectCb,
}

impl Connection {
    /// Begins the inbound gating sequence for a freshly accepted raw
    /// channel, registering the SDP-complete wait and, if `authorize` is
    /// set, the authorization request.
    pub(crate) fn begin_inbound(
        server: &Rc<Server>, service: &Rc<Service>, device: Rc<dyn Device>, channel: Rc<dyn Channel>,
        authorize: bool, remote_uuid: Uuid, auth: Option<Rc<dyn AuthorizationProvider>>,
        on_connect: ConnectCompleteCb, on_disconnect: DisconnectCb,
    ) -> Rc<Connection> {
        let conn = Rc::new(Connection {
            server: Rc::downgrade(server),
            service: Rc::downgrade(service),
            device: device.clone(),
            auth: auth.clone(),
            channel,
            gate: GateState::new(authorize),
            svc_wait_id: Cell::new(None),
            auth_id: Cell::new(None),
            watch_id: Cell::new(None),
            connected: Cell::new(false),
            released: Cell::new(false),
            on_connect,
            on_disconnect,
        });

        // Installed before either gate is armed (mirrors upstream's
        // connection_set_io running before the SDP/authorization waits are
        // registered), so a hangup arriving mid-gating is observed instead of
        // silently going nowhere (§5 "Inbound channel hangup that occurs
        // before gates clear releases the Connection").
        let watch_conn = conn.clone();
        let watch_id = conn.channel.watch(Box::new(move |cond| watch_conn.on_io_condition(cond)));
        conn.watch_id.set(Some(watch_id));

        let svc_cb_conn = conn.clone();
        let svc_wait_id = device.wait_for_svc_complete(Box::new(move |result| {
            svc_cb_conn.svc_wait_id.set(None);
            svc_cb_conn.gate_cleared(result);
        }));
        conn.svc_wait_id.set(Some(svc_wait_id));

        if authorize {
            if let Some(auth) = &auth {
                let src = conn.channel.source();
                let dst = conn.channel.destination();
                let auth_cb_conn = conn.clone();
                let auth_id = auth.request_authorization(
                    src,
                    dst,
                    remote_uuid,
                    Box::new(move |result| {
                        auth_cb_conn.auth_id.set(None);
                        auth_cb_conn.gate_cleared(result);
                    }),
                );
                conn.auth_id.set(Some(auth_id));
            } else {
                log::warn!("listening endpoint requires authorization but no provider is configured");
            }
        }

        conn
    }

    /// Creates a Connection already past gating, for an outbound channel the
    /// profile established itself (§2 "Outbound" data flow). Skips both
    /// gates and attaches directly to the Service's connection set.
    pub fn attach_established(
        service: &Rc<Service>, device: Rc<dyn Device>, channel: Rc<dyn Channel>,
        on_disconnect: DisconnectCb,
    ) -> Rc<Connection> {
        let conn = Rc::new(Connection {
            server: Weak::new(),
            service: Rc::downgrade(service),
            device,
            auth: None,
            channel,
            gate: GateState::new(false),
            svc_wait_id: Cell::new(None),
            auth_id: Cell::new(None),
            watch_id: Cell::new(None),
            connected: Cell::new(true),
            released: Cell::new(false),
            on_connect: Rc::new(|_, _| Ok(())),
            on_disconnect,
        });
        let watch_conn = conn.clone();
        let watch_id = conn.channel.watch(Box::new(move |cond| watch_conn.on_io_condition(cond)));
        conn.watch_id.set(Some(watch_id));
        service.attach_connection(&conn);
        conn
    }

    fn gate_cleared(self: &Rc<Self>, result: Result<()>) {
        if self.released.get() {
            return;
        }
        match result {
            Ok(()) => {
                if self.gate.clear_one() {
                    self.finalize_accept();
                }
            }
            Err(e) => self.fail(e),
        }
    }

    fn finalize_accept(self: &Rc<Self>) {
        let conn = self.clone();
        self.channel.accept(Box::new(move |result| conn.on_transport_accept(result)));
    }

    fn on_transport_accept(self: &Rc<Self>, result: Result<()>) {
        if self.released.get() {
            return;
        }
        match result {
            Ok(()) => {
                if let Some(service) = self.service.upgrade() {
                    service.promote_pending(self);
                }
                self.connected.set(true);
                log::trace!("connection {:?} accepted", self.channel);
                if let Err(e) = (self.on_connect)(self, Ok(())) {
                    log::debug!("profile declined accepted connection: {e}; suppressing disconnect callback");
                    self.connected.set(false);
                    self.release_internal(false);
                }
            }
            Err(e) => {
                log::debug!("transport accept failed: {e}");
                let _ = (self.on_connect)(self, Err(e));
                self.release_internal(false);
            }
        }
    }

    fn fail(self: &Rc<Self>, err: Error) {
        if self.released.get() {
            return;
        }
        log::debug!("inbound connection failed during gating: {err}");
        let _ = (self.on_connect)(self, Err(err));
        self.release_internal(false);
    }

    fn on_io_condition(self: &Rc<Self>, cond: IoCondition) {
        if self.released.get() {
            return;
        }
        log::trace!("connection {:?} io condition {cond}", self.channel);
        if matches!(cond, IoCondition::Nval) {
            self.watch_id.set(None);
        }
        self.release_internal(true);
    }

    /// Forces release from the Service side (shutdown, disconnect drain).
    pub(crate) fn force_release(self: &Rc<Self>) {
        self.release_internal(true);
    }

    fn release_internal(self: &Rc<Self>, call_disconnect: bool) {
        if self.released.replace(true) {
            return;
        }
        if let Some(id) = self.auth_id.take() {
            if let Some(auth) = &self.auth {
                auth.cancel_authorization(id);
            }
        }
        if let Some(id) = self.svc_wait_id.take() {
            self.device.cancel_svc_complete(id);
        }
        if let Some(id) = self.watch_id.take() {
            self.channel.cancel_watch(id);
        }
        self.channel.shutdown(false);
        if let Some(service) = self.service.upgrade() {
            service.remove_connection(self);
        }
        if call_disconnect && self.connected.get() {
            (self.on_disconnect)(self);
        }
    }

    /// Source (local) address of the underlying channel.
    pub fn source(&self) -> Address {
        self.channel.source()
    }

    /// Destination (remote) address of the underlying channel.
    pub fn destination(&self) -> Address {
        self.channel.destination()
    }

    /// PSM of the underlying channel, if it is L2CAP.
    pub fn psm(&self) -> Option<u16> {
        self.channel.psm()
    }

    /// RFCOMM channel number of the underlying channel, if it is RFCOMM.
    pub fn rfcomm_channel(&self) -> Option<u8> {
        self.channel.rfcomm_channel()
    }

    /// The Service this Connection belongs to, if it is still alive.
    pub fn service(&self) -> Option<Rc<Service>> {
        self.service.upgrade()
    }

    /// The Server that accepted this Connection, if it is still alive.
    ///
    /// `None` for a Connection created via [`Connection::attach_established`]:
    /// an outbound channel the profile established itself was never handed
    /// to a listening Server in the first place.
    pub fn server(&self) -> Option<Rc<Server>> {
        self.server.upgrade()
    }

    /// Whether this Connection has reached "connected" (transport accept
    /// completed and the profile accepted it).
    pub fn is_connected(&self) -> bool {
        self.connected.get()
    }

    /// Whether this Connection has been released (all resources freed).
    pub fn is_released(&self) -> bool {
        self.released.get()
    }
}

