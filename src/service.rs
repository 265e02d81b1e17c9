//! Per (device, profile) service state machine (§4.3).
//!
//! UNAVAILABLE → DISCONNECTED → CONNECTING ↔ CONNECTED → DISCONNECTING, with
//! shutdown reachable from any state. Every transition where old ≠ new
//! notifies this Service's [`Observer`](crate::observer::Observer),
//! synchronously, in registration order.

use crate::connection::{Connection, ConnectCompleteCb, DisconnectCb};
use crate::external::{AuthorizationProvider, Channel, Device};
use crate::ids::StateCbId;
use crate::observer::{Observer, StateCb};
use crate::registry::Profile;
use crate::server::Server;
use crate::{Error, ErrorKind, Result};
use std::cell::{Cell, RefCell};
use std::fmt::{self, Debug};
use std::ops::Deref;
use std::rc::Rc;
use uuid::Uuid;

/// A Service's position in its lifecycle (§4.3).
#[derive(Clone, Copy, Debug, Eq, PartialEq, strum::Display, strum::EnumString)]
pub enum State {
    /// No profile has successfully probed this device yet.
    #[strum(serialize = "unavailable")]
    Unavailable,
    /// Probed successfully; neither connecting nor connected.
    #[strum(serialize = "disconnected")]
    Disconnected,
    /// A connect attempt is in flight.
    #[strum(serialize = "connecting")]
    Connecting,
    /// Connected; the connection set may be non-empty.
    #[strum(serialize = "connected")]
    Connected,
    /// A disconnect attempt is in flight.
    #[strum(serialize = "disconnecting")]
    Disconnecting,
}

/// Per (device, profile) state machine and connection set (§3, §4.3).
pub struct Service {
    remote_uuid: Uuid,
    state: Cell<State>,
    refcount: Cell<u32>,
    coerce_already_disconnected: bool,
    device: RefCell<Option<Rc<dyn Device>>>,
    profile: RefCell<Option<Rc<Profile>>>,
    pending: RefCell<Vec<Rc<Connection>>>,
    connections: RefCell<Vec<Rc<Connection>>>,
    last_error: RefCell<Option<Error>>,
    observer: Observer,
}

impl Service {
    /// Creates a new Service in state UNAVAILABLE with reference count 1
    /// (§4.3 "Reference counting... starting at 1").
    pub fn new(remote_uuid: Uuid, coerce_already_disconnected: bool) -> Rc<Service> {
        Rc::new(Service {
            remote_uuid,
            state: Cell::new(State::Unavailable),
            refcount: Cell::new(1),
            coerce_already_disconnected,
            device: RefCell::new(None),
            profile: RefCell::new(None),
            pending: RefCell::new(Vec::new()),
            connections: RefCell::new(Vec::new()),
            last_error: RefCell::new(None),
            observer: Observer::new(),
        })
    }

    /// UUID this Service was created for.
    pub fn remote_uuid(&self) -> Uuid {
        self.remote_uuid
    }

    /// Current state.
    pub fn get_state(&self) -> State {
        self.state.get()
    }

    /// Most recently recorded error, if any (§4.3 "err recorded").
    pub fn last_error(&self) -> Option<Error> {
        self.last_error.borrow().clone()
    }

    /// The device bound to this Service, if state ≠ UNAVAILABLE.
    pub fn device(&self) -> Option<Rc<dyn Device>> {
        self.device.borrow().clone()
    }

    /// The profile bound to this Service, if state ≠ UNAVAILABLE.
    pub fn profile(&self) -> Option<Rc<Profile>> {
        self.profile.borrow().clone()
    }

    /// Active (gated and transport-accepted) connections.
    pub fn connections(&self) -> Vec<Rc<Connection>> {
        self.connections.borrow().clone()
    }

    /// Connections still in the gating phase.
    pub fn pending_connections(&self) -> Vec<Rc<Connection>> {
        self.pending.borrow().clone()
    }

    /// Registers a state-change observer. Returns a non-zero id.
    pub fn add_state_cb(&self, cb: StateCb) -> StateCbId {
        self.observer.add(cb)
    }

    /// Removes a previously registered observer. Returns whether one was found.
    pub fn remove_state_cb(&self, id: StateCbId) -> bool {
        self.observer.remove(id)
    }

    /// Increments the reference count, returning an RAII guard that
    /// decrements it on drop (§3 `[ADDED]`, grounded on `bluer`'s
    /// handle-unregisters-on-drop idiom).
    pub fn add_ref(self: &Rc<Self>) -> ServiceRef {
        self.refcount.set(self.refcount.get() + 1);
        ServiceRef(self.clone())
    }

    fn unref(&self) {
        let count = self.refcount.get();
        debug_assert!(count > 0, "unref on a Service with a zero reference count");
        self.refcount.set(count.saturating_sub(1));
    }

    /// Current reference count.
    pub fn refcount(&self) -> u32 {
        self.refcount.get()
    }

    /// Whether this Service has no outstanding references and is
    /// UNAVAILABLE, i.e. its owner may drop its own `Rc` (§8 "Reference
    /// counting").
    pub fn is_collectible(&self) -> bool {
        self.refcount.get() == 0 && self.state.get() == State::Unavailable
    }

    /// Attempts to transition UNAVAILABLE → DISCONNECTED by probing the
    /// profile against a device (§4.3, first table row).
    ///
    /// On success, `device` and `profile` become the Service's bound
    /// references. On failure the Service remains UNAVAILABLE, the error is
    /// recorded, and no references are retained.
    pub fn probe(self: &Rc<Self>, device: Rc<dyn Device>, profile: Rc<Profile>) -> Result<()> {
        if self.state.get() != State::Unavailable {
            return Err(Error::new(ErrorKind::InvalidState));
        }
        *self.device.borrow_mut() = Some(device);
        *self.profile.borrow_mut() = Some(profile.clone());

        let result = match &profile.device_probe {
            Some(cb) => cb(self),
            None => Ok(()),
        };
        match result {
            Ok(()) => {
                log::trace!("probe succeeded for uuid {}", self.remote_uuid);
                self.transition(State::Disconnected);
                Ok(())
            }
            Err(e) => {
                log::warn!("probe failed for uuid {}: {e}", self.remote_uuid);
                *self.device.borrow_mut() = None;
                *self.profile.borrow_mut() = None;
                *self.last_error.borrow_mut() = Some(e.clone());
                Err(e)
            }
        }
    }

    /// Starts an outbound connection attempt (§4.3 `connect`).
    pub fn connect(self: &Rc<Self>) -> Result<()> {
        match self.state.get() {
            State::Unavailable => return Err(Error::new(ErrorKind::InvalidState)),
            State::Connecting | State::Connected => return Err(Error::new(ErrorKind::Already)),
            State::Disconnecting => return Err(Error::new(ErrorKind::Busy)),
            State::Disconnected => {}
        }
        let profile =
            self.profile.borrow().clone().expect("profile is set whenever state != UNAVAILABLE");
        let Some(connect_cb) = &profile.connect else {
            return Err(Error::new(ErrorKind::Unsupported));
        };

        self.transition(State::Connecting);
        match connect_cb(self) {
            Ok(()) => Ok(()),
            Err(e) => {
                log::warn!("connect failed immediately for uuid {}: {e}", self.remote_uuid);
                *self.last_error.borrow_mut() = Some(e.clone());
                self.transition(State::Disconnected);
                Err(e)
            }
        }
    }

    /// Reports the outcome of an in-flight outbound connection attempt
    /// (§4.3 `connecting_complete`). Ignored unless the Service is
    /// CONNECTING.
    pub fn connecting_complete(self: &Rc<Self>, result: Result<()>) {
        if self.state.get() != State::Connecting {
            log::trace!(
                "connecting_complete ignored: service {} is {}, not CONNECTING",
                self.remote_uuid,
                self.state.get()
            );
            return;
        }
        match result {
            Ok(()) => self.transition(State::Connected),
            Err(e) => {
                log::warn!("connecting_complete failed for uuid {}: {e}", self.remote_uuid);
                *self.last_error.borrow_mut() = Some(e);
                self.transition(State::Disconnected);
            }
        }
    }

    /// Starts a disconnect (§4.3 `disconnect`).
    ///
    /// A `disconnect_cb` that fails synchronously drives `disconnecting_complete`
    /// immediately rather than leaving the Service stuck in DISCONNECTING:
    /// [`ErrorKind::Already`] (not connected) is coerced into a successful
    /// completion, any other error drives a failed completion back to
    /// CONNECTED (§4.3 line 237, mirroring the async `disconnecting_complete`
    /// path's own coercion).
    pub fn disconnect(self: &Rc<Self>) -> Result<()> {
        match self.state.get() {
            State::Unavailable => return Err(Error::new(ErrorKind::InvalidState)),
            State::Disconnected | State::Disconnecting => return Err(Error::new(ErrorKind::Already)),
            State::Connecting | State::Connected => {}
        }
        let profile =
            self.profile.borrow().clone().expect("profile is set whenever state != UNAVAILABLE");
        let Some(disconnect_cb) = &profile.disconnect else {
            return Err(Error::new(ErrorKind::Unsupported));
        };

        self.transition(State::Disconnecting);
        match disconnect_cb(self) {
            Ok(()) => Ok(()),
            Err(e) if e.kind == ErrorKind::Already => {
                log::trace!(
                    "disconnect reported not-connected for uuid {}; coercing to disconnecting_complete(Ok)",
                    self.remote_uuid
                );
                self.disconnecting_complete(Ok(()));
                Ok(())
            }
            Err(e) => {
                log::warn!("disconnect failed immediately for uuid {}: {e}", self.remote_uuid);
                self.disconnecting_complete(Err(e.clone()));
                Err(e)
            }
        }
    }

    /// Reports the outcome of an in-flight disconnect (§4.3
    /// `disconnecting_complete`). Ignored unless the Service is
    /// DISCONNECTING.
    ///
    /// An error kind of [`ErrorKind::Already`] is coerced to success when
    /// `coerce_already_disconnected` was set at construction (§7
    /// "Already-disconnected transport").
    pub fn disconnecting_complete(self: &Rc<Self>, result: Result<()>) {
        if self.state.get() != State::Disconnecting {
            log::trace!(
                "disconnecting_complete ignored: service {} is {}, not DISCONNECTING",
                self.remote_uuid,
                self.state.get()
            );
            return;
        }
        let result = match result {
            Err(e) if e.kind == ErrorKind::Already && self.coerce_already_disconnected => {
                log::trace!("coercing already-disconnected transport into success");
                Ok(())
            }
            other => other,
        };
        match result {
            Ok(()) => {
                self.drain_connections();
                self.transition(State::Disconnected);
            }
            Err(e) => {
                log::warn!("disconnect refused for uuid {}: {e}", self.remote_uuid);
                *self.last_error.borrow_mut() = Some(e);
                self.transition(State::Connected);
            }
        }
    }

    /// Creates an inbound Connection and begins its gating sequence (§4.2
    /// accept path step (e), §4.4).
    ///
    /// Does not itself change the Service's state: an inbound connection
    /// simply joins the connection set once its gates clear and the
    /// transport accepts it (§8 scenario 1).
    #[allow(clippy::too_many_arguments)]
    pub fn incoming_conn(
        self: &Rc<Self>, server: &Rc<Server>, channel: Rc<dyn Channel>, authorize: bool,
        auth: Option<Rc<dyn AuthorizationProvider>>, accept_cb: ConnectCompleteCb,
        disconn_cb: DisconnectCb,
    ) -> Result<Rc<Connection>> {
        let device = self.device.borrow().clone().ok_or_else(|| Error::new(ErrorKind::InvalidState))?;
        let conn = Connection::begin_inbound(
            server,
            self,
            device,
            channel,
            authorize,
            self.remote_uuid,
            auth,
            accept_cb,
            disconn_cb,
        );
        self.pending.borrow_mut().push(conn.clone());
        Ok(conn)
    }

    /// Transitions to UNAVAILABLE from any state, draining all connections
    /// and clearing device/profile references (§4.3 `shutdown`).
    ///
    /// Idempotent: shutting down an already-UNAVAILABLE Service is a no-op,
    /// since old == new is not a transition (§10.5 "Idempotent shutdown").
    pub fn shutdown(self: &Rc<Self>) {
        if self.state.get() == State::Unavailable {
            return;
        }
        self.drain_connections();
        *self.device.borrow_mut() = None;
        *self.profile.borrow_mut() = None;
        self.transition(State::Unavailable);
    }

    fn drain_connections(self: &Rc<Self>) {
        for conn in self.connections.take() {
            conn.force_release();
        }
        for conn in self.pending.take() {
            conn.force_release();
        }
    }

    fn transition(self: &Rc<Self>, new: State) {
        let old = self.state.get();
        if old == new {
            return;
        }
        self.state.set(new);
        log::trace!("service {} transition {old} -> {new}", self.remote_uuid);
        self.observer.notify(old, new);
    }

    pub(crate) fn attach_connection(self: &Rc<Self>, conn: &Rc<Connection>) {
        self.connections.borrow_mut().push(conn.clone());
    }

    pub(crate) fn promote_pending(self: &Rc<Self>, conn: &Rc<Connection>) {
        let mut pending = self.pending.borrow_mut();
        if let Some(pos) = pending.iter().position(|c| Rc::ptr_eq(c, conn)) {
            let moved = pending.remove(pos);
            drop(pending);
            self.connections.borrow_mut().push(moved);
        }
    }

    pub(crate) fn remove_connection(&self, conn: &Rc<Connection>) {
        self.pending.borrow_mut().retain(|c| !Rc::ptr_eq(c, conn));
        self.connections.borrow_mut().retain(|c| !Rc::ptr_eq(c, conn));
    }
}

impl fmt::Debug for Service {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Service")
            .field("remote_uuid", &self.remote_uuid)
            .field("state", &self.state.get())
            .field("refcount", &self.refcount.get())
            .finish_non_exhaustive()
    }
}

/// An RAII reference to a [`Service`] that decrements the reference count
/// on drop (§3 `[ADDED]`).
///
/// Cloning a `ServiceRef` bumps the count again, mirroring `bluer`'s
/// `ProfileHandle`/`AgentHandle`, whose `Drop` unregisters rather than
/// requiring the caller to call an explicit `unref`.
pub struct ServiceRef(Rc<Service>);

impl ServiceRef {
    /// Access to the underlying `Rc<Service>`, e.g. to call methods that
    /// require a `Service`-owning receiver.
    pub fn as_rc(&self) -> &Rc<Service> {
        &self.0
    }
}

impl Clone for ServiceRef {
    fn clone(&self) -> Self {
        self.0.add_ref()
    }
}

impl Drop for ServiceRef {
    fn drop(&mut self) {
        self.0.unref();
    }
}

impl Deref for ServiceRef {
    type Target = Service;

    fn deref(&self) -> &Service {
        &self.0
    }
}

impl fmt::Debug for ServiceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        Debug::fmt(&*self.0, f)
    }
}
