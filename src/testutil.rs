//! In-memory doubles for the host control plane and the guest transports.

use std::collections::{HashMap, VecDeque};
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncRead, ReadBuf};

use crate::config::MonitorConfig;
use crate::guest::{GuestRef, GuestSnapshot, GuestUuid, HostRef, PowerState};
use crate::hostapi::{
    self, ConnectMode, EventToken, HostApi, HostEvent, InfoKind, MessageHandle, SshCredentials,
    TlsMaterial,
};
use crate::transport::{self, ByteStream, Connector, EngineTransport, Error};

pub(crate) const LOCAL_HOST: &str = "OpaqueRef:local-host";

pub(crate) fn guest_uuid(n: u8) -> GuestUuid {
    GuestUuid::new(format!("0a1b2c3d-0000-4000-8000-{n:012x}")).unwrap()
}

pub(crate) fn guest_ref(n: u8) -> GuestRef {
    GuestRef::new(format!("OpaqueRef:guest-{n}")).unwrap()
}

pub(crate) fn eligible_snapshot(n: u8) -> GuestSnapshot {
    let mut other_config = HashMap::new();
    other_config.insert(
        crate::guest::MONITOR_FLAG_KEY.to_owned(),
        crate::guest::MONITOR_FLAG_ON.to_owned(),
    );
    GuestSnapshot {
        uuid: guest_uuid(n),
        power_state: PowerState::Running,
        resident_on: HostRef::new(LOCAL_HOST),
        other_config,
        is_control_domain: false,
        has_guest_metrics: true,
    }
}

pub(crate) fn halted_snapshot(n: u8) -> GuestSnapshot {
    GuestSnapshot {
        power_state: PowerState::Halted,
        ..eligible_snapshot(n)
    }
}

pub(crate) fn http_ok(body: &str) -> Vec<u8> {
    format!("HTTP/1.0 200 OK\r\nContent-Type: application/json\r\n\r\n{body}").into_bytes()
}

/// A raw event-feed stream: response header followed by back-to-back objects.
pub(crate) fn event_stream(statuses: &[&str]) -> Vec<u8> {
    let mut out = b"HTTP/1.0 200 OK\r\n\r\n".to_vec();
    for status in statuses {
        out.extend_from_slice(format!("{{\"status\":\"{status}\"}}").as_bytes());
    }
    out
}

#[derive(Default)]
pub(crate) struct MockState {
    pub snapshots: Vec<(GuestRef, GuestSnapshot)>,
    pub polls: VecDeque<hostapi::Result<(Vec<HostEvent>, EventToken)>>,
    pub subscribes: u32,
    pub writes: Vec<(GuestUuid, InfoKind)>,
    pub clears: Vec<(GuestUuid, InfoKind)>,
    pub messages_sent: Vec<String>,
    pub messages_destroyed: u32,
    pub secret_refcounts: HashMap<String, usize>,
    pub destroyed_secrets: Vec<String>,
}

pub(crate) struct MockHostApi {
    pub state: Mutex<MockState>,
}

impl MockHostApi {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(MockState::default()),
        })
    }

    pub(crate) fn writes_of(&self, kind: InfoKind) -> usize {
        self.state
            .lock()
            .unwrap()
            .writes
            .iter()
            .filter(|(_, k)| *k == kind)
            .count()
    }

    pub(crate) fn cleared_kinds(&self, guest: &GuestUuid) -> Vec<InfoKind> {
        self.state
            .lock()
            .unwrap()
            .clears
            .iter()
            .filter(|(uuid, _)| uuid == guest)
            .map(|(_, kind)| *kind)
            .collect()
    }
}

#[async_trait]
impl HostApi for MockHostApi {
    async fn local_host(&self) -> hostapi::Result<HostRef> {
        Ok(HostRef::new(LOCAL_HOST))
    }

    async fn all_snapshots(&self) -> hostapi::Result<Vec<(GuestRef, GuestSnapshot)>> {
        Ok(self.state.lock().unwrap().snapshots.clone())
    }

    async fn subscribe(&self) -> hostapi::Result<EventToken> {
        self.state.lock().unwrap().subscribes += 1;
        Ok(EventToken::new("token-0"))
    }

    async fn poll_since(
        &self,
        _token: &EventToken,
        _timeout: Duration,
    ) -> hostapi::Result<(Vec<HostEvent>, EventToken)> {
        let next = self.state.lock().unwrap().polls.pop_front();
        match next {
            Some(result) => result,
            // script exhausted: behave like a quiet long poll
            None => std::future::pending().await,
        }
    }

    async fn write_info(
        &self,
        guest: &GuestUuid,
        kind: InfoKind,
        _value: &str,
    ) -> hostapi::Result<()> {
        self.state.lock().unwrap().writes.push((guest.clone(), kind));
        Ok(())
    }

    async fn clear_info(&self, guest: &GuestUuid, kind: InfoKind) -> hostapi::Result<()> {
        self.state.lock().unwrap().clears.push((guest.clone(), kind));
        Ok(())
    }

    async fn send_message(
        &self,
        _guest: &GuestUuid,
        title: &str,
        _body: &str,
    ) -> hostapi::Result<MessageHandle> {
        let mut state = self.state.lock().unwrap();
        state.messages_sent.push(title.to_owned());
        Ok(MessageHandle::new(format!(
            "msg-{}",
            state.messages_sent.len()
        )))
    }

    async fn destroy_message(&self, _message: MessageHandle) -> hostapi::Result<()> {
        self.state.lock().unwrap().messages_destroyed += 1;
        Ok(())
    }

    async fn connection_mode(&self, _guest: &GuestUuid) -> hostapi::Result<ConnectMode> {
        Ok(ConnectMode::Ssh)
    }

    async fn guest_addresses(&self, _guest: &GuestUuid) -> hostapi::Result<Vec<String>> {
        Ok(Vec::new())
    }

    async fn ssh_credentials(&self, guest: &GuestUuid) -> hostapi::Result<SshCredentials> {
        Err(hostapi::Error::MissingCredential {
            guest: guest.clone(),
            what: "ssh credentials",
        })
    }

    async fn pinned_fingerprint(&self, _guest: &GuestUuid) -> hostapi::Result<Option<String>> {
        Ok(None)
    }

    async fn pin_fingerprint(&self, _guest: &GuestUuid, _fingerprint: &str) -> hostapi::Result<()> {
        Ok(())
    }

    async fn tls_material(&self, guest: &GuestUuid) -> hostapi::Result<TlsMaterial> {
        Err(hostapi::Error::MissingCredential {
            guest: guest.clone(),
            what: "tls material",
        })
    }

    async fn secret_refcount(&self, secret_uuid: &str) -> hostapi::Result<usize> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .secret_refcounts
            .get(secret_uuid)
            .copied()
            .unwrap_or(0))
    }

    async fn destroy_secret(&self, secret_uuid: &str) -> hostapi::Result<()> {
        self.state
            .lock()
            .unwrap()
            .destroyed_secrets
            .push(secret_uuid.to_owned());
        Ok(())
    }
}

pub(crate) enum ConnectOutcome {
    Refused,
    FingerprintMismatch,
    /// Never resolves, like a TCP connect into a blackholing firewall.
    Hang,
    Transport(MockTransport),
}

/// Connector that plays back a fixed sequence of connect outcomes; once the
/// script runs out every further connect is refused.
pub(crate) struct ScriptedConnector {
    outcomes: Mutex<VecDeque<ConnectOutcome>>,
    pub connects: Mutex<u32>,
}

impl ScriptedConnector {
    pub(crate) fn new(outcomes: impl IntoIterator<Item = ConnectOutcome>) -> Arc<Self> {
        Arc::new(Self {
            outcomes: Mutex::new(outcomes.into_iter().collect()),
            connects: Mutex::new(0),
        })
    }
}

#[async_trait]
impl Connector for ScriptedConnector {
    async fn connect(
        &self,
        _api: &Arc<dyn HostApi>,
        guest: &GuestUuid,
        _config: &MonitorConfig,
    ) -> transport::Result<Box<dyn EngineTransport>> {
        *self.connects.lock().unwrap() += 1;
        // the lock must not be held across the hanging await
        let outcome = self.outcomes.lock().unwrap().pop_front();
        match outcome {
            Some(ConnectOutcome::Transport(transport)) => Ok(Box::new(transport)),
            Some(ConnectOutcome::FingerprintMismatch) => Err(Error::FingerprintMismatch {
                guest: guest.clone(),
            }),
            Some(ConnectOutcome::Hang) => std::future::pending().await,
            Some(ConnectOutcome::Refused) | None => Err(Error::Connect {
                addr: "10.0.0.5:22".to_owned(),
                source: std::io::Error::from(std::io::ErrorKind::ConnectionRefused),
            }),
        }
    }
}

/// Reader that never yields data and never closes, like a quiet event feed.
struct PendingRead;

impl AsyncRead for PendingRead {
    fn poll_read(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        _buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        Poll::Pending
    }
}

pub(crate) struct MockTransport {
    responses: Mutex<VecDeque<Vec<u8>>>,
    stream: Mutex<Option<ByteStream>>,
}

impl MockTransport {
    pub(crate) fn new() -> Self {
        Self {
            responses: Mutex::new(VecDeque::new()),
            stream: Mutex::new(None),
        }
    }

    /// A transport whose three sync requests answer `{}` and whose event
    /// stream stays silent until torn down.
    pub(crate) fn syncable() -> Self {
        Self::new()
            .respond(http_ok("{}"))
            .respond(http_ok("{}"))
            .respond(http_ok("[]"))
            .quiet_stream()
    }

    pub(crate) fn respond(self, raw: Vec<u8>) -> Self {
        self.responses.lock().unwrap().push_back(raw);
        self
    }

    pub(crate) fn stream(self, raw: Vec<u8>) -> Self {
        *self.stream.lock().unwrap() = Some(Box::pin(std::io::Cursor::new(raw)));
        self
    }

    pub(crate) fn quiet_stream(self) -> Self {
        *self.stream.lock().unwrap() = Some(Box::pin(PendingRead));
        self
    }
}

#[async_trait]
impl EngineTransport for MockTransport {
    async fn execute(&mut self, _request: &str) -> transport::Result<Vec<u8>> {
        self.responses.lock().unwrap().pop_front().ok_or_else(|| {
            Error::Io(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                "no scripted response left",
            ))
        })
    }

    async fn open_event_stream(&mut self, _request: &str) -> transport::Result<ByteStream> {
        self.stream.lock().unwrap().take().ok_or_else(|| {
            Error::Io(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                "no scripted stream left",
            ))
        })
    }
}

/// Polls `predicate` until it holds or the timeout elapses.
pub(crate) async fn wait_for(predicate: impl Fn() -> bool) {
    tokio::time::timeout(Duration::from_secs(600), async {
        while !predicate() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}
