//! SSH transport: tunnels requests to the engine's unix socket through a
//! relay command executed inside the guest.
//!
//! Host identity is pinned trust-on-first-use: the fingerprint presented on
//! first contact is persisted against the guest, and every later connection
//! must match it exactly. A mismatch is a hard failure that only an explicit
//! operator reset of the recorded fingerprint clears.

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use async_trait::async_trait;
use russh::ChannelMsg;
use russh::client;
use russh_keys::key::PublicKey;
use tokio::io::{AsyncRead, ReadBuf};

use crate::config::MonitorConfig;
use crate::guest::GuestUuid;
use crate::hostapi::HostApi;

use super::{ByteStream, EngineTransport, Error, MAX_RESPONSE_BYTES, Result};

/// Outcome of comparing a presented host key against the record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Pinning {
    /// Matches the fingerprint on record.
    Match,
    /// No fingerprint on record yet; remember this one.
    FirstUse,
    /// Differs from the record; possible spoofing.
    Mismatch,
}

pub(crate) fn verify_fingerprint(pinned: Option<&str>, presented: &str) -> Pinning {
    match pinned {
        Some(pinned) if pinned == presented => Pinning::Match,
        Some(_) => Pinning::Mismatch,
        None => Pinning::FirstUse,
    }
}

/// russh client handler enforcing the trust-on-first-use pinning policy.
struct HostKeyCheck {
    api: Arc<dyn HostApi>,
    guest: GuestUuid,
}

#[async_trait]
impl client::Handler for HostKeyCheck {
    type Error = Error;

    async fn check_server_key(
        &mut self,
        server_public_key: &PublicKey,
    ) -> std::result::Result<bool, Self::Error> {
        let presented = server_public_key.fingerprint();
        match verify_fingerprint(
            self.api.pinned_fingerprint(&self.guest).await?.as_deref(),
            &presented,
        ) {
            Pinning::Match => Ok(true),
            Pinning::FirstUse => {
                log::debug!(
                    "no host key on record for guest {}, pinning {presented}",
                    self.guest
                );
                self.api.pin_fingerprint(&self.guest, &presented).await?;
                Ok(true)
            }
            Pinning::Mismatch => {
                log::error!(
                    "host key for guest {} does not match the fingerprint on record",
                    self.guest
                );
                Err(Error::FingerprintMismatch {
                    guest: self.guest.clone(),
                })
            }
        }
    }
}

pub struct SshTransport {
    guest: GuestUuid,
    session: client::Handle<HostKeyCheck>,
    socket_path: String,
}

impl SshTransport {
    pub async fn connect(
        api: &Arc<dyn HostApi>,
        guest: &GuestUuid,
        config: &MonitorConfig,
    ) -> Result<Self> {
        let credentials = api.ssh_credentials(guest).await?;
        let addr = super::resolve_address(api, guest).await?;
        log::info!(
            "ssh connect for guest {guest} via {}@{addr}",
            credentials.username
        );

        let key = russh_keys::decode_secret_key(&credentials.private_key_pem, None)?;
        let handler = HostKeyCheck {
            api: Arc::clone(api),
            guest: guest.clone(),
        };
        let mut session = client::connect(
            Arc::new(client::Config::default()),
            (addr.as_str(), config.ssh_port),
            handler,
        )
        .await?;
        let authenticated = session
            .authenticate_publickey(credentials.username.as_str(), Arc::new(key))
            .await?;
        if !authenticated {
            return Err(Error::Authentication {
                guest: guest.clone(),
            });
        }

        Ok(Self {
            guest: guest.clone(),
            session,
            socket_path: config.engine_socket_path.clone(),
        })
    }

    fn relay_command(&self) -> String {
        relay_command(&self.socket_path)
    }

    /// Runs a command in the guest, feeding `stdin` if given, and collects
    /// stdout. A non-zero exit status is an error.
    pub(crate) async fn run(&mut self, command: &str, stdin: Option<&str>) -> Result<Vec<u8>> {
        let mut channel = self.session.channel_open_session().await?;
        channel.exec(true, command).await?;
        if let Some(stdin) = stdin {
            channel.data(stdin.as_bytes()).await?;
        }
        channel.eof().await?;

        let mut out = Vec::new();
        let mut exit_status = None;
        while let Some(msg) = channel.wait().await {
            match msg {
                ChannelMsg::Data { ref data } => {
                    if out.len() + data.len() > MAX_RESPONSE_BYTES {
                        return Err(Error::OversizedResponse {
                            cap: MAX_RESPONSE_BYTES,
                        });
                    }
                    out.extend_from_slice(data);
                }
                ChannelMsg::ExitStatus { exit_status: code } => exit_status = Some(code),
                _ => {}
            }
        }
        match exit_status {
            Some(status) if status != 0 => {
                log::info!(
                    "`{command}` on guest {} exited with status {status}",
                    self.guest
                );
                Err(Error::RelayExit { status })
            }
            _ => Ok(out),
        }
    }
}

#[async_trait]
impl EngineTransport for SshTransport {
    async fn execute(&mut self, request: &str) -> Result<Vec<u8>> {
        let command = self.relay_command();
        self.run(&command, Some(request)).await
    }

    async fn open_event_stream(&mut self, request: &str) -> Result<ByteStream> {
        let channel = self.session.channel_open_session().await?;
        channel.exec(true, self.relay_command()).await?;
        channel.data(request.as_bytes()).await?;
        log::info!("event stream opened for guest {}", self.guest);
        Ok(Box::pin(ChannelRead {
            inner: channel.into_stream(),
        }))
    }
}

/// AsyncRead adapter over the relay channel's output.
struct ChannelRead {
    inner: russh::ChannelStream<russh::client::Msg>,
}

impl AsyncRead for ChannelRead {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_read(cx, buf)
    }
}

/// The in-guest command that relays stdin/stdout to the engine socket.
pub(crate) fn relay_command(socket_path: &str) -> String {
    format!("ncat -U {socket_path}")
}
