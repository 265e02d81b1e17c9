//! Per (adapter, profile) listener (§4.2).
//!
//! A `Server` owns a set of listening endpoints on one adapter for one
//! profile. Accepted raw channels are resolved to a device and a Service,
//! then handed to [`crate::service::Service::incoming_conn`] to begin
//! gating.

use crate::connection::{ConnectCompleteCb, DisconnectCb};
use crate::external::{Adapter, AuthorizationProvider, Channel, Listener, ListenOptions, Transport};
use crate::registry::Profile;
use crate::Result;
use std::cell::RefCell;
use std::rc::Rc;

/// A single listening endpoint owned by a [`Server`] (§3 "Listening endpoint").
pub struct Endpoint {
    listener: Rc<dyn Listener>,
    authorize: bool,
}

impl Endpoint {
    /// Whether inbound connections on this endpoint require authorization.
    pub fn authorize(&self) -> bool {
        self.authorize
    }
}

/// Per (adapter, profile) listener (§4.2).
pub struct Server {
    adapter: Rc<dyn Adapter>,
    profile: Rc<Profile>,
    endpoints: RefCell<Vec<Rc<Endpoint>>>,
}

impl Server {
    /// Creates a Server for `profile` on `adapter`, invoking
    /// `profile.adapter_probe` if defined.
    ///
    /// If `adapter_probe` fails, the Server is destroyed (every endpoint it
    /// may have opened during probing is released) and creation fails with
    /// the same error (§4.2 "Creation").
    pub fn create(adapter: Rc<dyn Adapter>, profile: Rc<Profile>) -> Result<Rc<Server>> {
        let server = Rc::new(Server { adapter, profile: profile.clone(), endpoints: RefCell::new(Vec::new()) });

        if let Some(adapter_probe) = &profile.adapter_probe {
            if let Err(e) = adapter_probe(&server) {
                log::warn!("adapter_probe failed for profile {:?}: {e}", profile.name);
                server.destroy();
                return Err(e);
            }
        }
        log::trace!("server created for profile {:?} on adapter {}", profile.name, server.adapter.address());
        Ok(server)
    }

    /// The adapter this Server listens on.
    pub fn adapter(&self) -> &Rc<dyn Adapter> {
        &self.adapter
    }

    /// The profile this Server was created for.
    pub fn profile(&self) -> &Rc<Profile> {
        &self.profile
    }

    /// Currently open endpoints.
    pub fn endpoints(&self) -> Vec<Rc<Endpoint>> {
        self.endpoints.borrow().clone()
    }

    /// Opens a new listening endpoint (§4.2 "Listening").
    ///
    /// `accept_cb`/`disconn_cb` are the per-connection callbacks handed to
    /// every inbound [`crate::connection::Connection`] accepted on this
    /// endpoint. On failure, nothing is added to the Server's endpoint set.
    pub fn listen(
        self: &Rc<Server>, transport: &dyn Transport, opts: ListenOptions,
        auth: Option<Rc<dyn AuthorizationProvider>>, accept_cb: ConnectCompleteCb, disconn_cb: DisconnectCb,
    ) -> Result<Rc<Endpoint>> {
        let listener = transport.listen(&opts)?;
        let endpoint = Rc::new(Endpoint { listener: listener.clone(), authorize: opts.authorize });

        let server = self.clone();
        let ep = endpoint.clone();
        listener.watch_incoming(Box::new(move |channel| {
            server.handle_incoming(&ep, channel, auth.clone(), accept_cb.clone(), disconn_cb.clone());
        }));

        self.endpoints.borrow_mut().push(endpoint.clone());
        log::trace!("listening endpoint opened for profile {:?}", self.profile.name);
        Ok(endpoint)
    }

    fn handle_incoming(
        self: &Rc<Server>, endpoint: &Rc<Endpoint>, channel: Rc<dyn Channel>,
        auth: Option<Rc<dyn AuthorizationProvider>>, accept_cb: ConnectCompleteCb, disconn_cb: DisconnectCb,
    ) {
        let dst = channel.destination();
        let Some(device) = self.adapter.find_device(dst) else {
            log::debug!("incoming channel from unknown destination {dst}, dropping");
            channel.shutdown(false);
            return;
        };
        device.add_uuid(self.profile.remote_uuid);
        let Some(service) = device.get_service(self.profile.remote_uuid) else {
            log::debug!(
                "no service bound for uuid {} on device {dst}, dropping incoming channel",
                self.profile.remote_uuid
            );
            channel.shutdown(false);
            return;
        };
        match service.as_rc().incoming_conn(self, channel, endpoint.authorize, auth, accept_cb, disconn_cb) {
            Ok(_conn) => {}
            Err(e) => log::warn!("incoming connection on profile {:?} rejected: {e}", self.profile.name),
        }
    }

    /// Calls `profile.adapter_remove` if defined, then releases every
    /// endpoint (§4.2 "Destruction").
    pub fn destroy(&self) {
        if let Some(adapter_remove) = &self.profile.adapter_remove {
            adapter_remove(self);
        }
        for endpoint in self.endpoints.take() {
            endpoint.listener.shutdown();
        }
        log::trace!("server destroyed for profile {:?}", self.profile.name);
    }
}


impl std::fmt::Debug for Server {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Server")
            .field("profile", &self.profile.name)
            .field("adapter", &self.adapter.address())
            .field("endpoints", &self.endpoints.borrow().len())
            .finish()
    }
}
