//! Mutual-TLS transport straight to the engine's TLS port.
//!
//! Authenticates with a per-guest client certificate against a shared CA,
//! TLS 1.2 minimum with a pinned cipher-suite set. Each request dials a fresh
//! connection; the engine's protocol closes the connection per exchange.

use std::sync::Arc;

use async_trait::async_trait;
use rustls::pki_types::{PrivateKeyDer, ServerName};
use rustls::{CipherSuite, ClientConfig, RootCertStore};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;
use tokio_rustls::client::TlsStream;

use crate::config::MonitorConfig;
use crate::guest::GuestUuid;
use crate::hostapi::{HostApi, TlsMaterial};

use super::{ByteStream, EngineTransport, Error, MAX_RESPONSE_BYTES, Result};

/// The only cipher suites the engine connection may negotiate.
const PINNED_CIPHER_SUITES: [CipherSuite; 3] = [
    CipherSuite::TLS13_AES_128_GCM_SHA256,
    CipherSuite::TLS_ECDHE_RSA_WITH_AES_128_GCM_SHA256,
    CipherSuite::TLS_ECDHE_ECDSA_WITH_AES_128_GCM_SHA256,
];

pub struct TlsTransport {
    guest: GuestUuid,
    addr: String,
    port: u16,
    server_name: ServerName<'static>,
    connector: TlsConnector,
}

impl TlsTransport {
    pub async fn connect(
        api: &Arc<dyn HostApi>,
        guest: &GuestUuid,
        config: &MonitorConfig,
    ) -> Result<Self> {
        let material = api.tls_material(guest).await?;
        let addr = super::resolve_address(api, guest).await?;
        log::info!("tls connect for guest {guest} via {addr}:{}", config.tls_port);

        let client_config = build_client_config(guest, &material)?;
        let server_name = ServerName::try_from(addr.clone())
            .map_err(|_| Error::ServerName(addr.clone()))?;
        let transport = Self {
            guest: guest.clone(),
            addr,
            port: config.tls_port,
            server_name,
            connector: TlsConnector::from(Arc::new(client_config)),
        };
        // Handshake once up front so connect/auth failures surface here and
        // not on the first request.
        let stream = transport.dial().await?;
        if let Some(protocol) = stream.get_ref().1.protocol_version() {
            log::debug!("guest {guest} negotiated {protocol:?}");
        }

        Ok(transport)
    }

    async fn dial(&self) -> Result<TlsStream<TcpStream>> {
        let addr = format!("{}:{}", self.addr, self.port);
        let tcp = TcpStream::connect(&addr)
            .await
            .map_err(|source| Error::Connect {
                addr: addr.clone(),
                source,
            })?;
        self.connector
            .connect(self.server_name.clone(), tcp)
            .await
            .map_err(|source| Error::Connect { addr, source })
    }
}

#[async_trait]
impl EngineTransport for TlsTransport {
    async fn execute(&mut self, request: &str) -> Result<Vec<u8>> {
        let mut stream = self.dial().await?;
        stream.write_all(request.as_bytes()).await?;

        let mut out = Vec::new();
        let mut buf = [0u8; 4096];
        loop {
            let n = stream.read(&mut buf).await?;
            if n == 0 {
                break;
            }
            if out.len() + n > MAX_RESPONSE_BYTES {
                return Err(Error::OversizedResponse {
                    cap: MAX_RESPONSE_BYTES,
                });
            }
            out.extend_from_slice(&buf[..n]);
        }
        Ok(out)
    }

    async fn open_event_stream(&mut self, request: &str) -> Result<ByteStream> {
        let mut stream = self.dial().await?;
        stream.write_all(request.as_bytes()).await?;
        log::info!("event stream opened for guest {}", self.guest);
        Ok(Box::pin(stream))
    }
}

fn build_client_config(guest: &GuestUuid, material: &TlsMaterial) -> Result<ClientConfig> {
    let mut roots = RootCertStore::empty();
    for cert in rustls_pemfile::certs(&mut material.ca_cert_pem.as_bytes()) {
        roots.add(cert?)?;
    }
    if roots.is_empty() {
        return Err(Error::Credentials {
            guest: guest.clone(),
            reason: "CA certificate contains no certificates".to_owned(),
        });
    }

    let client_certs = rustls_pemfile::certs(&mut material.client_cert_pem.as_bytes())
        .collect::<std::io::Result<Vec<_>>>()?;
    let client_key: PrivateKeyDer<'static> =
        rustls_pemfile::private_key(&mut material.client_key_pem.as_bytes())?.ok_or_else(|| {
            Error::Credentials {
                guest: guest.clone(),
                reason: "client key contains no private key".to_owned(),
            }
        })?;

    let mut provider = rustls::crypto::ring::default_provider();
    provider
        .cipher_suites
        .retain(|suite| PINNED_CIPHER_SUITES.contains(&suite.suite()));

    let config = ClientConfig::builder_with_provider(Arc::new(provider))
        .with_protocol_versions(&[&rustls::version::TLS12, &rustls::version::TLS13])?
        .with_root_certificates(roots)
        .with_client_auth_cert(client_certs, client_key)?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_material_without_certificates() {
        let guest = GuestUuid::new("0a1b2c3d-0000-4000-8000-00000000000a").unwrap();
        let material = TlsMaterial {
            client_cert_pem: String::new(),
            client_key_pem: String::new(),
            ca_cert_pem: String::new(),
        };
        let err = build_client_config(&guest, &material).unwrap_err();
        assert!(matches!(err, Error::Credentials { .. }));
    }
}
