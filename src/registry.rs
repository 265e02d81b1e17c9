//! Profile registry (§4.1).
//!
//! A process-wide table of [`Profile`] descriptors, keyed by name, matched
//! against devices by `remote_uuid`. The registry does not own the
//! adapters/devices it instructs on unregistration — those are supplied by
//! the caller, since this core has no adapter/device directory of its own
//! (§6 "consumed from adapter/device layer").

use crate::{server::Server, service::{Service, ServiceRef}, Error, ErrorKind, Result};
use std::rc::Rc;
use uuid::Uuid;

/// Called during `probe` to test whether a profile applies to a device's
/// Service, which starts out in state UNAVAILABLE (§4.3).
pub type DeviceProbeFn = Box<dyn Fn(&Service) -> Result<()>>;

/// Called as a side effect of profile unregistration, once per Service
/// still bound to the profile.
pub type DeviceRemoveFn = Box<dyn Fn(&Service)>;

/// Called when a [`Server`](crate::server::Server) is created for this
/// profile on an adapter (§4.2 `create`).
pub type AdapterProbeFn = Box<dyn Fn(&Server) -> Result<()>>;

/// Called on `Server` destruction or profile unregistration (§4.2
/// `destroy`, §4.1 unregister side effect).
pub type AdapterRemoveFn = Box<dyn Fn(&Server)>;

/// Called to initiate an outbound connection (§4.3 `connect` start).
pub type ConnectFn = Box<dyn Fn(&Service) -> Result<()>>;

/// Called to initiate a disconnect (§4.3 `disconnect` start).
pub type DisconnectFn = Box<dyn Fn(&Service) -> Result<()>>;

/// An immutable profile descriptor, once registered (§3).
///
/// All callbacks are optional; their absence drives the "unsupported"
/// rejection rules of §4.3 (`connect`/`disconnect` without the matching
/// callback) rather than a panic or a default no-op.
pub struct Profile {
    /// Human-readable, registry-unique identifier.
    pub name: String,
    /// UUID this profile serves locally.
    pub local_uuid: Uuid,
    /// UUID this profile seeks on remote devices; the matching key for
    /// probing (§4.1).
    pub remote_uuid: Uuid,
    /// Whether the daemon should initiate a connection as soon as a Service
    /// for this profile reaches DISCONNECTED via a successful probe.
    pub auto_connect: bool,
    /// Called to test whether this profile applies to a device.
    pub device_probe: Option<DeviceProbeFn>,
    /// Called as a side effect of unregistration, once per bound Service.
    pub device_remove: Option<DeviceRemoveFn>,
    /// Called when a Server is created on an adapter for this profile.
    pub adapter_probe: Option<AdapterProbeFn>,
    /// Called on Server destruction or profile unregistration.
    pub adapter_remove: Option<AdapterRemoveFn>,
    /// Called to initiate an outbound connection.
    pub connect: Option<ConnectFn>,
    /// Called to initiate a disconnect.
    pub disconnect: Option<DisconnectFn>,
}

impl Profile {
    /// Creates a bare profile descriptor with no callbacks set.
    ///
    /// Callers typically follow this with direct field assignment, mirroring
    /// `bluer::rfcomm::Profile`'s plain-struct-with-`Option`-fields shape.
    pub fn new(name: impl Into<String>, local_uuid: Uuid, remote_uuid: Uuid) -> Self {
        Self {
            name: name.into(),
            local_uuid,
            remote_uuid,
            auto_connect: false,
            device_probe: None,
            device_remove: None,
            adapter_probe: None,
            adapter_remove: None,
            connect: None,
            disconnect: None,
        }
    }
}

impl std::fmt::Debug for Profile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Profile")
            .field("name", &self.name)
            .field("local_uuid", &self.local_uuid)
            .field("remote_uuid", &self.remote_uuid)
            .field("auto_connect", &self.auto_connect)
            .finish_non_exhaustive()
    }
}

/// The process-wide profile registry (§4.1).
#[derive(Default)]
pub struct ProfileRegistry {
    /// Insertion-ordered so that probe-time tie-breaks are deterministic.
    profiles: Vec<Rc<Profile>>,
}

impl ProfileRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a profile descriptor.
    ///
    /// Fails with [`ErrorKind::AlreadyExists`] if a profile with the same
    /// name is already registered; names are unique (§4.1).
    pub fn register(&mut self, profile: Profile) -> Result<Rc<Profile>> {
        if self.profiles.iter().any(|p| p.name == profile.name) {
            log::warn!("profile registration rejected: name {:?} already in use", &profile.name);
            return Err(Error::with_message(
                ErrorKind::AlreadyExists,
                format!("profile {:?} is already registered", &profile.name),
            ));
        }
        let profile = Rc::new(profile);
        log::trace!("registered profile {:?} (remote_uuid={})", &profile.name, &profile.remote_uuid);
        self.profiles.push(profile.clone());
        Ok(profile)
    }

    /// Unregisters the named profile, invoking `adapter_remove` on every
    /// given Server and `device_remove` on every given Service first.
    ///
    /// Per §4.1 the side effects run before the descriptor is released; the
    /// caller supplies the Servers/Services still bound to this profile,
    /// since the registry has no adapter/device directory of its own.
    pub fn unregister(
        &mut self, name: &str, servers: &[Rc<Server>], services: &[ServiceRef],
    ) -> Result<Rc<Profile>> {
        let pos = self.profiles.iter().position(|p| p.name == name).ok_or_else(|| {
            Error::with_message(ErrorKind::NotFound, format!("no profile named {name:?} is registered"))
        })?;
        let profile = self.profiles.remove(pos);

        for server in servers {
            if let Some(adapter_remove) = &profile.adapter_remove {
                log::trace!("unregister {:?}: adapter_remove on {:?}", name, server);
                adapter_remove(server);
            }
        }
        for service in services {
            if let Some(device_remove) = &profile.device_remove {
                log::trace!("unregister {:?}: device_remove on {:?}", name, service);
                device_remove(service);
            }
        }

        log::trace!("unregistered profile {:?}", name);
        Ok(profile)
    }

    /// Looks up a registered profile by name.
    pub fn find_by_name(&self, name: &str) -> Option<&Rc<Profile>> {
        self.profiles.iter().find(|p| p.name == name)
    }

    /// Every profile eligible to probe a device advertising `uuid`
    /// (`remote_uuid == uuid`), in registration order (§4.1 matching rule).
    pub fn profiles_for_uuid(&self, uuid: Uuid) -> impl Iterator<Item = &Rc<Profile>> {
        self.profiles.iter().filter(move |p| p.remote_uuid == uuid)
    }

    /// All registered profiles, in registration order.
    pub fn iter(&self) -> impl Iterator<Item = &Rc<Profile>> {
        self.profiles.iter()
    }

    /// Number of registered profiles.
    pub fn len(&self) -> usize {
        self.profiles.len()
    }

    /// Whether the registry holds no profiles.
    pub fn is_empty(&self) -> bool {
        self.profiles.is_empty()
    }
}
