//! Monotonic identifiers for outstanding suspensions and registrations.
//!
//! The core never sleeps and never blocks (§5); every suspended operation —
//! an I/O watch, a service-discovery wait, an authorization request, an
//! observer registration — is represented by one of these ids so that it
//! can be looked up and cancelled without the core holding a live reference
//! into the external collaborator that owns the underlying resource.

use std::sync::atomic::{AtomicU64, Ordering};
use std::fmt;

macro_rules! define_id {
    ($(#[$outer:meta])* $name:ident) => {
        $(#[$outer])*
        #[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
        #[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
        pub struct $name(u64);

        impl $name {
            /// Allocates the next id from a process-wide monotonic counter.
            ///
            /// Ids start at 1; 0 is reserved so that callers can use it as
            /// an "unset" sentinel without an `Option` wrapper.
            pub(crate) fn next() -> Self {
                static COUNTER: AtomicU64 = AtomicU64::new(1);
                Self(COUNTER.fetch_add(1, Ordering::Relaxed))
            }

            /// The raw numeric value of this id.
            pub fn value(&self) -> u64 {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}#{}", stringify!($name), self.0)
            }
        }
    };
}

define_id!(
    /// Identifies a pending "wait for service discovery complete" registration.
    SvcWaitId
);

define_id!(
    /// Identifies a pending authorization request.
    AuthRequestId
);

define_id!(
    /// Identifies an I/O-condition watch (HUP/ERR/NVAL) on a channel.
    WatchId
);

define_id!(
    /// Identifies a registered state-change observer.
    ///
    /// Returned by [`crate::service::Service::add_state_cb`]; 0 is never
    /// returned for a successful registration (§4.3).
    StateCbId
);
