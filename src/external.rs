//! Abstract interfaces consumed from the surrounding daemon (§6).
//!
//! The core never talks to a kernel socket, an SDP cache, or a D-Bus
//! authorization agent directly. It only ever talks to these traits, which
//! the surrounding daemon implements against whatever it actually has.
//! [`crate::testutil`] provides in-memory fakes of all four for tests.

use crate::{service::ServiceRef, Address, Result};
use crate::ids::{AuthRequestId, SvcWaitId, WatchId};
use std::fmt;
use std::rc::Rc;
use uuid::Uuid;

/// A local Bluetooth controller instance, identified by its address.
///
/// Consumed per §6: `adapter.address()`, `adapter.find_device(address)`.
pub trait Adapter {
    /// The adapter's own Bluetooth address.
    fn address(&self) -> Address;

    /// Looks up a known remote device by its address.
    ///
    /// Returns `None` if the adapter has no knowledge of that device; the
    /// [Server accept path](crate::server) aborts quietly in that case.
    fn find_device(&self, address: Address) -> Option<Rc<dyn Device>>;
}

/// A remote Bluetooth peer known to an [`Adapter`].
///
/// Consumed per §6: `device.address()`, `device.adapter()`,
/// `device.add_uuid(uuid)`, `device.get_service(uuid)`,
/// `device.wait_for_svc_complete(cb) → id`, `device.cancel_svc_complete(id)`.
pub trait Device {
    /// The device's Bluetooth address.
    fn address(&self) -> Address;

    /// The adapter this device was discovered on.
    fn adapter(&self) -> Rc<dyn Adapter>;

    /// Annotates the device with a UUID it is now known to advertise.
    ///
    /// The [Server accept path](crate::server) calls this with the
    /// profile's `remote_uuid` before resolving the target Service.
    fn add_uuid(&self, uuid: Uuid);

    /// Looks up the Service bound to this device for the given profile UUID.
    fn get_service(&self, uuid: Uuid) -> Option<ServiceRef>;

    /// Registers a one-shot callback for "remote service discovery complete."
    ///
    /// Returns an id that can be passed to [`Device::cancel_svc_complete`]
    /// to cancel the wait before it fires.
    fn wait_for_svc_complete(&self, cb: Box<dyn FnOnce(Result<()>)>) -> SvcWaitId;

    /// Cancels a pending service-discovery wait registered with
    /// [`Device::wait_for_svc_complete`]. A no-op if it already fired.
    fn cancel_svc_complete(&self, id: SvcWaitId);
}

/// A single transport-level channel: an accepted inbound connection or an
/// in-progress outbound one.
///
/// Consumed per §6: `channel.get(opt)` (rendered here as typed accessors
/// rather than a generic getter, matching the accessor style of
/// `bluer::rfcomm::ConnectRequest`), `channel.shutdown(linger)`, and an
/// I/O-condition watch delivering HUP/ERR/NVAL.
pub trait Channel {
    /// Source (local) address of the channel.
    fn source(&self) -> Address;

    /// Destination (remote) address of the channel.
    fn destination(&self) -> Address;

    /// PSM the channel was opened on, if it is an L2CAP channel.
    fn psm(&self) -> Option<u16>;

    /// RFCOMM channel number, if it is an RFCOMM channel.
    fn rfcomm_channel(&self) -> Option<u8>;

    /// Finalizes acceptance of the channel at the transport level.
    ///
    /// Invoked once both gates of [`crate::connection::Connection`] have
    /// cleared (§4.4 step 3). `cb` is invoked exactly once with the
    /// outcome; an error removes the Connection without ever reaching the
    /// profile's connect-callback.
    fn accept(&self, cb: Box<dyn FnOnce(Result<()>)>);

    /// Shuts the channel down, optionally lingering to flush queued data.
    fn shutdown(&self, linger: bool);

    /// Registers a watch for HUP/ERR/NVAL on this channel.
    fn watch(&self, cb: Box<dyn FnMut(IoCondition)>) -> WatchId;

    /// Cancels a watch registered with [`Channel::watch`].
    fn cancel_watch(&self, id: WatchId);
}

impl fmt::Debug for dyn Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Channel")
            .field("source", &self.source())
            .field("destination", &self.destination())
            .field("psm", &self.psm())
            .field("rfcomm_channel", &self.rfcomm_channel())
            .finish()
    }
}

/// An I/O condition delivered by a [`Channel`] watch.
///
/// NVAL must never be re-dispatched once delivered (§4.4): the source is
/// already dead, so a second watch callback for the same channel would be
/// observing a freed Connection.
#[derive(Clone, Copy, Debug, Eq, PartialEq, strum::Display)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum IoCondition {
    /// The peer closed the connection.
    Hup,
    /// An error occurred on the channel.
    Err,
    /// The channel's underlying descriptor is no longer valid.
    Nval,
}

/// The transport collaborator: creates listening endpoints.
///
/// Consumed per §6: `listen(opts…) → channel`. The core treats the
/// returned [`Listener`] opaquely (§9 "Variadic listen options").
pub trait Transport {
    /// Binds a listening endpoint with the given options.
    ///
    /// On failure, anything partially constructed must already have been
    /// released before this returns (§7 "Construction failure").
    fn listen(&self, opts: &ListenOptions) -> Result<Rc<dyn Listener>>;
}

/// A bound listening endpoint, as returned by [`Transport::listen`].
pub trait Listener {
    /// Registers the callback invoked once per accepted inbound channel.
    fn watch_incoming(&self, cb: Box<dyn FnMut(Rc<dyn Channel>)>) -> WatchId;

    /// Shuts the listening socket down and releases it.
    ///
    /// Called by [`crate::server::Server`] on every exit path, including
    /// when the Server's own construction fails (§3 invariant on listening
    /// endpoints).
    fn shutdown(&self);
}

/// Transport-layer options for [`Transport::listen`] (§9).
///
/// An opaque option bag from the core's point of view; rendered as a plain
/// struct of `Option<T>` fields in the style of
/// `bluer::rfcomm::profile::Profile`, rather than a variadic argument list.
#[derive(Clone, Debug, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ListenOptions {
    /// PSM to listen on, for an L2CAP endpoint.
    pub psm: Option<u16>,
    /// RFCOMM channel to listen on, for an RFCOMM endpoint.
    pub channel: Option<u8>,
    /// Required security level for incoming connections.
    pub security: SecurityLevel,
    /// Whether inbound connections on this endpoint require authorization
    /// (§4.4 gate 2) before being handed to the profile.
    pub authorize: bool,
    /// Byte value used by the transport to terminate an invalid/truncated
    /// frame, if applicable. Opaque to the core.
    pub invalid_terminator: Option<u8>,
}

/// Required security level for a transport-layer connection.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, PartialOrd, Ord, strum::Display, strum::EnumString)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum SecurityLevel {
    /// No authentication or encryption required.
    #[strum(serialize = "low")]
    Low,
    /// Authentication required.
    #[strum(serialize = "medium")]
    #[default]
    Medium,
    /// Authentication and encryption required.
    #[strum(serialize = "high")]
    High,
    /// Authentication, encryption and a 128-bit equivalent key required.
    #[strum(serialize = "sdp")]
    Sdp,
}

/// The out-of-band authorization collaborator (§6).
///
/// Consumed per §6: `request_authorization(src, dst, uuid, cb) → id` and
/// `cancel_authorization(id)`.
pub trait AuthorizationProvider {
    /// Requests authorization for an inbound connection identified by
    /// `(src, dst, uuid)`. `cb` is invoked exactly once with the decision.
    fn request_authorization(
        &self, src: Address, dst: Address, uuid: Uuid, cb: Box<dyn FnOnce(Result<()>)>,
    ) -> AuthRequestId;

    /// Cancels a pending authorization request.
    ///
    /// Called before any socket is shut down on Connection release (§5
    /// "Cancellation semantics"), so a late decision can never dereference
    /// a freed Connection.
    fn cancel_authorization(&self, id: AuthRequestId);
}
