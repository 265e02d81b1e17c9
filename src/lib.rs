//! # BtProfCore — profile, service, server and connection core for a Bluetooth host daemon
//!
//! This crate implements the part of a Bluetooth host daemon that manages,
//! for each (local adapter, remote device, profile) triple, the lifecycle
//! of a logical "service" and of the transport-level connections belonging
//! to it: probing when a profile becomes applicable to a device, listening
//! for incoming transport connections on behalf of an adapter, authorizing
//! and validating inbound connections, and driving a small, well-defined
//! state machine through connect/disconnect transitions with deterministic
//! failure semantics.
//!
//! Five components compose the core, each in its own module:
//!
//! * [`registry`] — the process-wide [`registry::ProfileRegistry`] of
//!   [`registry::Profile`] descriptors, matching UUIDs to profiles.
//! * [`server`] — [`server::Server`], the per (adapter, profile) listener.
//! * [`service`] — [`service::Service`], the per (device, profile) state
//!   machine (UNAVAILABLE → DISCONNECTED → CONNECTING ↔ CONNECTED →
//!   DISCONNECTING).
//! * [`connection`] — [`connection::Connection`], a single accepted or
//!   originated transport channel attached to a Service.
//! * [`observer`] — the state-change broadcaster invoked on every Service
//!   transition.
//!
//! Everything this core needs from the surrounding daemon — adapters,
//! devices, transport sockets, the authorization agent — is consumed only
//! through the abstract traits in [`external`]; see that module's
//! documentation for what a daemon must implement to drive this crate.
//!
//! The core is single-threaded and cooperative: all state transitions,
//! observer invocations and callback dispatches run on one event loop, and
//! no locks are required anywhere in this crate. Suspension is always
//! external and always represented by one of the ids in [`ids`], so a
//! [`connection::Connection`] can cancel whatever it is waiting on without
//! the core ever blocking.

#![warn(missing_docs)]

use std::{
    convert::TryInto,
    fmt::{self, Debug, Display, Formatter},
    ops::{Deref, DerefMut},
    str::FromStr,
};

use macaddr::MacAddr6;

pub mod connection;
pub mod external;
pub mod ids;
pub mod observer;
pub mod registry;
pub mod server;
pub mod service;
mod uuid_ext;

#[cfg(test)]
pub(crate) mod testutil;

pub use uuid_ext::UuidExt;
#[doc(no_inline)]
pub use uuid::Uuid;

/// Error produced by this crate's operations.
///
/// Mirrors the shape of `bluer::Error`: a closed [`ErrorKind`] paired with a
/// free-form, non-exhaustive message, so that a caller can `match` on the
/// kind while still getting a human-readable string for logs.
#[derive(Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Error {
    /// Error kind.
    pub kind: ErrorKind,
    /// Detailed error message, if one is available beyond the kind itself.
    pub message: String,
}

/// Error kind, corresponding to the categories of §7.
#[derive(Clone, Debug, displaydoc::Display, Eq, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[non_exhaustive]
pub enum ErrorKind {
    /// operation is not valid in the current state
    InvalidState,
    /// operation is not supported by this profile
    Unsupported,
    /// operation is already satisfied or already in progress
    Already,
    /// the service is busy disconnecting
    Busy,
    /// the request was rejected
    Rejected,
    /// a profile with this name is already registered
    AlreadyExists,
    /// no matching device, service, profile or endpoint was found
    NotFound,
    /// I/O error: {0}
    Io(String),
    /// internal error: {0}
    Internal(String),
}

impl Error {
    /// Creates an error with an empty message.
    pub fn new(kind: ErrorKind) -> Self {
        Self { kind, message: String::new() }
    }

    /// Creates an error with the given kind and message.
    pub fn with_message(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self { kind, message: message.into() }
    }
}

impl Display for Error {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        if self.message.is_empty() {
            write!(f, "{}", &self.kind)
        } else {
            write!(f, "{}: {}", &self.kind, &self.message)
        }
    }
}

impl std::error::Error for Error {}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Self { kind: ErrorKind::Io(err.kind().to_string()), message: err.to_string() }
    }
}

/// Result type used throughout this crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Bluetooth address.
///
/// The serialized representation is a string in colon-hexadecimal
/// notation. Carried over from `bluer::Address` unchanged, since the core
/// needs the same value type for adapter, device and channel addresses
/// (§6) and there is no reason to invent a second one.
#[derive(Clone, Copy, Default, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Address(pub [u8; 6]);

impl Address {
    /// Creates a new Bluetooth address with the specified value.
    pub const fn new(addr: [u8; 6]) -> Self {
        Self(addr)
    }

    /// Any Bluetooth address.
    ///
    /// Corresponds to `00:00:00:00:00:00`.
    pub const fn any() -> Self {
        Self([0; 6])
    }
}

impl Deref for Address {
    type Target = [u8; 6];

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl DerefMut for Address {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.0
    }
}

impl Display for Address {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:02X}:{:02X}:{:02X}:{:02X}:{:02X}:{:02X}",
            self.0[0], self.0[1], self.0[2], self.0[3], self.0[4], self.0[5]
        )
    }
}

impl Debug for Address {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{self}")
    }
}

impl From<MacAddr6> for Address {
    fn from(addr: MacAddr6) -> Self {
        Self(addr.into_array())
    }
}

impl From<Address> for MacAddr6 {
    fn from(addr: Address) -> Self {
        addr.0.into()
    }
}

/// Invalid Bluetooth address error.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct InvalidAddress(pub String);

impl Display for InvalidAddress {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "invalid Bluetooth address: {}", &self.0)
    }
}

impl std::error::Error for InvalidAddress {}

impl FromStr for Address {
    type Err = InvalidAddress;

    fn from_str(s: &str) -> std::result::Result<Self, InvalidAddress> {
        let fields = s
            .split(':')
            .map(|s| u8::from_str_radix(s, 16).map_err(|_| InvalidAddress(s.to_string())))
            .collect::<std::result::Result<Vec<_>, InvalidAddress>>()?;
        Ok(Self(fields.try_into().map_err(|_| InvalidAddress(s.to_string()))?))
    }
}

impl From<[u8; 6]> for Address {
    fn from(addr: [u8; 6]) -> Self {
        Self(addr)
    }
}

impl From<Address> for [u8; 6] {
    fn from(addr: Address) -> Self {
        addr.0
    }
}

/// Engine-wide configuration knobs (§10.3).
///
/// Carries nothing parsed from a config file, CLI flag or environment
/// variable — all of that is out of scope (§1 Non-goals) — just the small
/// number of values every embedding daemon needs a place to set. Construct
/// one in code; there is no `from_file`/`from_env` on this type.
#[derive(Clone, Debug)]
pub struct EngineConfig {
    /// Whether a `disconnect` that the transport reports as "not
    /// connected" is coerced into a successful `disconnecting_complete(0)`
    /// (§7 "Already-disconnected transport"). Always `true` in a
    /// spec-conforming engine; exposed so tests can assert on the
    /// behavior explicitly rather than relying on a hard-coded default.
    pub coerce_already_disconnected: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self { coerce_already_disconnected: true }
    }
}
