//! The seam to the host control plane.
//!
//! Everything the monitoring engine needs from the host - guest snapshots,
//! the change-event feed, per-guest metadata upserts, operator messages and
//! credential material - goes through the [`HostApi`] trait. The concrete
//! client lives outside this crate; tests use an in-memory double.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::guest::{GuestRef, GuestSnapshot, GuestUuid, HostRef};

/// Other-config keys under which a guest's TLS secret uuids are published.
/// The registry caches these so the secrets can be reference-counted away
/// after the guest is deleted.
pub const TLS_SECRET_KEYS: [&str; 3] = [
    "guestmon-tls-client-cert",
    "guestmon-tls-client-key",
    "guestmon-tls-ca-cert",
];

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("host control plane unreachable: {0}")]
    Connection(String),
    #[error("event subscription failed: {0}")]
    Subscribe(String),
    #[error("event poll failed: {0}")]
    Poll(String),
    #[error("no address published for guest {guest}")]
    NoAddress { guest: GuestUuid },
    #[error("missing {what} for guest {guest}")]
    MissingCredential { guest: GuestUuid, what: &'static str },
    #[error("host api call failed: {0}")]
    Call(String),
}

pub type Result<T> = std::result::Result<T, Error>;

/// Opaque resumption cursor for the host's change-event feed.
///
/// The default (empty) token means "now"; polling with it returns a fresh
/// cursor without replaying history.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventToken(Arc<str>);

impl EventToken {
    pub fn new(src: impl AsRef<str>) -> Self {
        Self(src.as_ref().into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for EventToken {
    fn default() -> Self {
        Self(Arc::from(""))
    }
}

/// One notification from the host's change-event feed.
#[derive(Debug, Clone)]
pub enum HostEvent {
    /// The guest object changed; carries the new snapshot.
    Modified {
        guest: GuestRef,
        snapshot: GuestSnapshot,
    },
    /// The guest object was deleted from the host entirely.
    Removed { guest: GuestRef },
}

/// The per-guest metadata slots the engine publishes engine state under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InfoKind {
    Info,
    Version,
    ProcessList,
}

impl InfoKind {
    pub const ALL: [InfoKind; 3] = [InfoKind::Info, InfoKind::Version, InfoKind::ProcessList];

    /// The other-config key this kind is stored under on the host.
    pub fn key(self) -> &'static str {
        match self {
            InfoKind::Info => "docker_info",
            InfoKind::Version => "docker_version",
            InfoKind::ProcessList => "docker_ps",
        }
    }
}

impl fmt::Display for InfoKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

/// Handle to a previously raised operator message, used to retract it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageHandle(Arc<str>);

impl MessageHandle {
    pub fn new(src: impl AsRef<str>) -> Self {
        Self(src.as_ref().into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// How to reach a guest's container engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectMode {
    Ssh,
    Tls,
}

/// Key material for the SSH transport.
#[derive(Debug, Clone)]
pub struct SshCredentials {
    pub username: String,
    pub private_key_pem: String,
}

/// PEM material for the mutual-TLS transport.
#[derive(Debug, Clone)]
pub struct TlsMaterial {
    pub client_cert_pem: String,
    pub client_key_pem: String,
    pub ca_cert_pem: String,
}

/// Host control-plane operations the monitoring engine depends on.
#[async_trait]
pub trait HostApi: Send + Sync + 'static {
    /// Resolves the host this process runs on. Re-resolved on every watcher
    /// reconnect, in case the host joined a pool in the meantime.
    async fn local_host(&self) -> Result<HostRef>;

    /// All current guest snapshots, for full reconciliation passes.
    async fn all_snapshots(&self) -> Result<Vec<(GuestRef, GuestSnapshot)>>;

    /// Obtains a resumption token representing "now".
    async fn subscribe(&self) -> Result<EventToken>;

    /// Long-polls for guest change events since `token`, waiting at most
    /// `timeout`, and returns the events plus the advanced token.
    async fn poll_since(
        &self,
        token: &EventToken,
        timeout: Duration,
    ) -> Result<(Vec<HostEvent>, EventToken)>;

    /// Idempotent upsert of one metadata slot for a guest.
    async fn write_info(&self, guest: &GuestUuid, kind: InfoKind, value: &str) -> Result<()>;

    /// Idempotent delete of one metadata slot for a guest.
    async fn clear_info(&self, guest: &GuestUuid, kind: InfoKind) -> Result<()>;

    /// Raises an operator-visible message against a guest.
    async fn send_message(
        &self,
        guest: &GuestUuid,
        title: &str,
        body: &str,
    ) -> Result<MessageHandle>;

    /// Retracts a previously raised message.
    async fn destroy_message(&self, message: MessageHandle) -> Result<()>;

    /// The configured transport for this guest's container engine.
    async fn connection_mode(&self, guest: &GuestUuid) -> Result<ConnectMode>;

    /// The guest's published addresses, unfiltered.
    async fn guest_addresses(&self, guest: &GuestUuid) -> Result<Vec<String>>;

    async fn ssh_credentials(&self, guest: &GuestUuid) -> Result<SshCredentials>;

    /// The remembered host-identity fingerprint for this guest, if any.
    async fn pinned_fingerprint(&self, guest: &GuestUuid) -> Result<Option<String>>;

    /// Records the fingerprint presented on first contact.
    async fn pin_fingerprint(&self, guest: &GuestUuid, fingerprint: &str) -> Result<()>;

    async fn tls_material(&self, guest: &GuestUuid) -> Result<TlsMaterial>;

    /// How many guests currently reference the given secret.
    async fn secret_refcount(&self, secret_uuid: &str) -> Result<usize>;

    async fn destroy_secret(&self, secret_uuid: &str) -> Result<()>;
}

/// Picks the address to contact a guest on.
///
/// IPv6 is skipped since the control domain cannot route it; host-internal
/// link-local addresses are preferred over routed ones.
pub fn choose_address(addresses: &[String]) -> Option<&str> {
    let mut candidates: Vec<&str> = Vec::with_capacity(addresses.len());
    for address in addresses {
        if address.contains(':') {
            continue;
        }
        if address.starts_with("169.254.") {
            candidates.insert(0, address);
        } else {
            candidates.push(address);
        }
    }
    candidates.first().copied()
}
