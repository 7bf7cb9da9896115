//! Probable-cause analysis for guests that stay unreachable.
//!
//! A fixed sequence of increasingly specific probes. Early probes
//! short-circuit (no point testing socket permissions without a network
//! path); the later ones accumulate. The result is never empty - it feeds
//! the one operator-visible diagnostic notice.

use std::sync::Arc;

use crate::config::MonitorConfig;
use crate::guest::GuestUuid;
use crate::hostapi::{ConnectMode, HostApi};
use crate::protocol;
use crate::transport::ssh::SshTransport;
use crate::transport::tls::TlsTransport;
use crate::transport::{self, EngineTransport};

const SSH_CAUSE_NETWORK: &str =
    "Error: Cannot find a valid IP that allows SSH connections to the guest. Please make sure \
     that the guest agent is installed, a network route is set up, and there is an SSH server \
     running inside the guest that is reachable from this host.";

const TLS_CAUSE_NETWORK: &str =
    "Error: Cannot find a valid IP that allows TLS connections to the container engine on the \
     guest. Please make sure that the guest agent is installed, a network route is set up, the \
     engine is running and configured for TLS, and the TLS port is reachable from this host. \
     Please particularly check the firewall configuration inside the guest.";

const CAUSE_AUTH: &str =
    "Unable to verify key-based authentication. Please prepare the guest to install a key. ";

const CAUSE_FINGERPRINT: &str =
    "The SSH host key of the guest has unexpectedly changed, which could potentially be a \
     security breach. If you think this is safe and expected, you can reset the recorded \
     fingerprint to re-pin on the next connection. ";

const CAUSE_SSH: &str =
    "Unable to connect to the guest using SSH. Please check the logs inside the guest and also \
     try connecting manually. ";

const CAUSE_TLS: &str =
    "Unable to connect to the guest using TLS. Please check the logs inside the guest and also \
     try connecting manually. The cause may be a problem with the TLS certificates. ";

const CAUSE_UNDETERMINED: &str = "Unable to determine cause of failure.";

/// Works out the most likely reason a guest cannot be monitored.
pub(crate) async fn determine_failure_cause(
    api: &Arc<dyn HostApi>,
    guest: &GuestUuid,
    config: &MonitorConfig,
) -> String {
    match api.connection_mode(guest).await {
        Ok(ConnectMode::Ssh) => diagnose_ssh(api, guest, config).await,
        Ok(ConnectMode::Tls) => diagnose_tls(api, guest, config).await,
        Err(err) => format!("Unable to determine the guest's connection mode: {err}"),
    }
}

async fn diagnose_ssh(api: &Arc<dyn HostApi>, guest: &GuestUuid, config: &MonitorConfig) -> String {
    if transport::resolve_address(api, guest).await.is_err() {
        return SSH_CAUSE_NETWORK.to_owned();
    }

    let mut transport = match SshTransport::connect(api, guest, config).await {
        Ok(transport) => transport,
        Err(transport::Error::Authentication { .. }) => return CAUSE_AUTH.trim_end().to_owned(),
        Err(transport::Error::FingerprintMismatch { .. }) => {
            return CAUSE_FINGERPRINT.trim_end().to_owned();
        }
        Err(_) => return CAUSE_SSH.trim_end().to_owned(),
    };

    let mut cause = String::new();
    if transport.run("command -v ncat", None).await.is_err() {
        cause.push_str("Unable to find ncat inside the guest. Please install ncat. ");
    }
    let socket = &config.engine_socket_path;
    if transport
        .run(&format!("test -S {socket}"), None)
        .await
        .is_err()
    {
        cause.push_str(&format!(
            "Unable to find the container engine socket at {socket}. Please install and run the \
             container engine."
        ));
        // no point checking permissions on a socket that is not there
        return cause;
    }
    if transport
        .run(&format!("test -r \"{socket}\" && test -w \"{socket}\""), None)
        .await
        .is_err()
    {
        cause.push_str(
            "Unable to access the container engine socket. Please make sure the configured user \
             account belongs to the engine's socket group. ",
        );
    }

    if cause.is_empty() {
        CAUSE_UNDETERMINED.to_owned()
    } else {
        cause.trim_end().to_owned()
    }
}

async fn diagnose_tls(api: &Arc<dyn HostApi>, guest: &GuestUuid, config: &MonitorConfig) -> String {
    if transport::resolve_address(api, guest).await.is_err() {
        return TLS_CAUSE_NETWORK.to_owned();
    }

    let probe = async {
        let mut transport = TlsTransport::connect(api, guest, config).await?;
        let request = protocol::build_request("GET", "/info");
        let raw = transport.execute(&request).await?;
        protocol::Response::parse(&raw)?.into_success_body()?;
        Ok::<_, crate::engine::Error>(())
    };
    if probe.await.is_err() {
        return CAUSE_TLS.trim_end().to_owned();
    }

    CAUSE_UNDETERMINED.to_owned()
}
