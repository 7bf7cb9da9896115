//! Authenticated byte-stream transports to a guest's container engine.
//!
//! Two interchangeable variants: an SSH tunnel that relays to the engine's
//! unix socket, and a mutual-TLS socket straight to the engine's TLS port.
//! The variant is selected once per task start from the guest's configured
//! connection mode.

use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::io::AsyncRead;

use crate::config::MonitorConfig;
use crate::guest::GuestUuid;
use crate::hostapi::{ConnectMode, HostApi};

mod error;
pub mod ssh;
pub mod tls;

pub use error::{Error, Result};

/// Upper bound on a one-shot response. Anything larger indicates a runaway
/// peer rather than a legitimate control-plane answer.
pub const MAX_RESPONSE_BYTES: usize = 4 * 1024 * 1024;

/// The raw response byte stream of a long-lived request.
pub type ByteStream = Pin<Box<dyn AsyncRead + Send>>;

/// An established, authenticated channel to one guest's container engine.
#[async_trait]
pub trait EngineTransport: Send {
    /// Sends one request and collects the complete response, bounded by
    /// [`MAX_RESPONSE_BYTES`].
    async fn execute(&mut self, request: &str) -> Result<Vec<u8>>;

    /// Sends one request and hands back the unbounded response stream, for
    /// the long-lived events endpoint. The transport must stay alive while
    /// the stream is being read.
    async fn open_event_stream(&mut self, request: &str) -> Result<ByteStream>;
}

/// Opens a transport for a guest. Implemented by [`ModeConnector`] for real
/// connections; tests substitute scripted connectors.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    async fn connect(
        &self,
        api: &Arc<dyn HostApi>,
        guest: &GuestUuid,
        config: &MonitorConfig,
    ) -> Result<Box<dyn EngineTransport>>;
}

/// Dispatches to the SSH or TLS variant based on the guest's configured mode.
pub struct ModeConnector;

#[async_trait]
impl Connector for ModeConnector {
    async fn connect(
        &self,
        api: &Arc<dyn HostApi>,
        guest: &GuestUuid,
        config: &MonitorConfig,
    ) -> Result<Box<dyn EngineTransport>> {
        match api.connection_mode(guest).await? {
            ConnectMode::Ssh => Ok(Box::new(
                ssh::SshTransport::connect(api, guest, config).await?,
            )),
            ConnectMode::Tls => Ok(Box::new(
                tls::TlsTransport::connect(api, guest, config).await?,
            )),
        }
    }
}

/// Resolves the address to contact `guest` on, or the typed no-route error.
pub(crate) async fn resolve_address(
    api: &Arc<dyn HostApi>,
    guest: &GuestUuid,
) -> Result<String> {
    let addresses = api.guest_addresses(guest).await?;
    crate::hostapi::choose_address(&addresses)
        .map(str::to_owned)
        .ok_or_else(|| Error::NoAddress {
            guest: guest.clone(),
        })
}
