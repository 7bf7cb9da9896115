use std::borrow::Borrow;
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

mod error;

pub use error::{Error, Result};

/// The maximum allowed length for a [`GuestUuid`].
const GUEST_UUID_MAX_LEN: usize = 64;

/// The maximum allowed length for a [`GuestRef`].
const GUEST_REF_MAX_LEN: usize = 255;

/// Other-config key that opts a guest into container monitoring.
pub const MONITOR_FLAG_KEY: &str = "guestmon-monitor";

/// Sentinel value of [`MONITOR_FLAG_KEY`] that turns monitoring on.
pub const MONITOR_FLAG_ON: &str = "True";

/// A validated guest UUID as reported by the host control plane.
///
/// # Examples
///
/// ```
/// # use guestmon::guest::GuestUuid;
/// let uuid = GuestUuid::new("3f1c6d2a-0b4e-4a7d-9c58-1f2e3d4c5b6a").unwrap();
/// assert_eq!(uuid.as_ref(), "3f1c6d2a-0b4e-4a7d-9c58-1f2e3d4c5b6a");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct GuestUuid(Arc<str>);

impl GuestUuid {
    /// Creates a new `GuestUuid` from the given raw uuid.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidGuestUuid`] if the input is empty, longer than
    /// [`GUEST_UUID_MAX_LEN`], or contains characters other than lowercase
    /// hex digits and dashes.
    pub fn new(src: impl AsRef<str>) -> Result<Self> {
        let src = src.as_ref();
        if src.is_empty()
            || src.len() > GUEST_UUID_MAX_LEN
            || !src
                .chars()
                .all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase() || c == '-')
        {
            return Err(Error::InvalidGuestUuid(src.to_owned()));
        }

        Ok(Self(src.into()))
    }
}

impl FromStr for GuestUuid {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::new(s)
    }
}

impl AsRef<str> for GuestUuid {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl Borrow<str> for GuestUuid {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for GuestUuid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// An opaque guest reference, the host's handle for one guest object.
///
/// Unlike [`GuestUuid`] the ref is only stable for the lifetime of the object
/// on one host; it is the key the host's event feed reports changes under.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct GuestRef(Arc<str>);

impl GuestRef {
    /// Creates a new `GuestRef` from the given opaque handle.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidGuestRef`] if the input is empty or exceeds
    /// [`GUEST_REF_MAX_LEN`].
    pub fn new(src: impl AsRef<str>) -> Result<Self> {
        let src = src.as_ref();
        if src.is_empty() || src.len() > GUEST_REF_MAX_LEN {
            return Err(Error::InvalidGuestRef(src.to_owned()));
        }

        Ok(Self(src.into()))
    }
}

impl AsRef<str> for GuestRef {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl Borrow<str> for GuestRef {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for GuestRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// An opaque reference to a physical host in the pool.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct HostRef(Arc<str>);

impl HostRef {
    pub fn new(src: impl AsRef<str>) -> Self {
        Self(src.as_ref().into())
    }
}

impl AsRef<str> for HostRef {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for HostRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Guest power state as reported by the host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PowerState {
    Running,
    Halted,
    Other(String),
}

impl From<&str> for PowerState {
    fn from(s: &str) -> Self {
        match s {
            "Running" => PowerState::Running,
            "Halted" => PowerState::Halted,
            other => PowerState::Other(other.to_owned()),
        }
    }
}

/// Immutable point-in-time view of one host-managed guest.
///
/// Produced by the host event watcher on every change notification and fed
/// through the monitor registry; never mutated, only superseded by a newer
/// snapshot for the same guest.
#[derive(Debug, Clone)]
pub struct GuestSnapshot {
    pub uuid: GuestUuid,
    pub power_state: PowerState,
    pub resident_on: HostRef,
    pub other_config: HashMap<String, String>,
    pub is_control_domain: bool,
    /// Whether the guest agent has published its metrics record. Without it
    /// no network information is available, so the guest is unreachable.
    pub has_guest_metrics: bool,
}

impl GuestSnapshot {
    /// Decides whether this guest should be monitored from `local_host`.
    ///
    /// All five conditions must hold: the monitoring flag is set to the "on"
    /// sentinel, the guest is running, it is resident on this host, its guest
    /// metrics are published, and it is not the control domain.
    pub fn should_monitor(&self, local_host: &HostRef) -> bool {
        if self
            .other_config
            .get(MONITOR_FLAG_KEY)
            .is_none_or(|value| value != MONITOR_FLAG_ON)
        {
            return false;
        }
        if self.power_state != PowerState::Running {
            return false;
        }
        if &self.resident_on != local_host {
            return false;
        }
        if !self.has_guest_metrics {
            return false;
        }
        if self.is_control_domain {
            return false;
        }

        true
    }
}
