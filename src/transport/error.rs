use crate::guest::GuestUuid;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("no suitable address for guest {guest}")]
    NoAddress { guest: GuestUuid },
    #[error("failed to connect to {addr}: {source}")]
    Connect {
        addr: String,
        #[source]
        source: std::io::Error,
    },
    #[error("authentication failed for guest {guest}")]
    Authentication { guest: GuestUuid },
    #[error(
        "host identity of guest {guest} does not match the fingerprint on record; \
         if this is expected, clear the recorded fingerprint to re-pin"
    )]
    FingerprintMismatch { guest: GuestUuid },
    #[error("invalid credential material for guest {guest}: {reason}")]
    Credentials { guest: GuestUuid, reason: String },
    #[error("ssh session failed: {0}")]
    Ssh(#[from] russh::Error),
    #[error("failed to decode ssh private key: {0}")]
    PrivateKey(#[from] russh_keys::Error),
    #[error("tls configuration rejected: {0}")]
    TlsConfig(#[from] rustls::Error),
    #[error("`{0}` is not a valid server name")]
    ServerName(String),
    #[error("i/o failure on the engine channel: {0}")]
    Io(#[from] std::io::Error),
    #[error("remote relay command exited with status {status}")]
    RelayExit { status: u32 },
    #[error("response exceeded the {cap}-byte buffer")]
    OversizedResponse { cap: usize },
    #[error(transparent)]
    Host(#[from] crate::hostapi::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
