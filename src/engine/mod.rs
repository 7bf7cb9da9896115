//! State-sync operations against a guest's container engine.
//!
//! Each sync issues one request through the framer and publishes the body
//! into the guest's metadata slot on the host. Payload-to-markup conversion
//! is handled by the metadata collaborator; bodies pass through as received.

use crate::hostapi::{self, HostApi, InfoKind};
use crate::protocol;
use crate::transport::EngineTransport;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Transport(#[from] crate::transport::Error),
    #[error(transparent)]
    Protocol(#[from] protocol::Error),
    #[error(transparent)]
    Host(#[from] hostapi::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

/// The engine's long-lived event feed endpoint.
pub const EVENTS_PATH: &str = "/events";

const INFO_PATH: &str = "/info";
const VERSION_PATH: &str = "/version";
const PROCESS_LIST_PATH: &str = "/containers/json?all=1&size=1";

/// What a stream event obliges us to refresh.
///
/// A process-list sync is cheap and covers container churn; the full engine
/// info sync is more expensive and reserved for lifecycle-altering events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resync {
    ProcessList,
    FullInfo,
    Ignore,
}

/// Maps an event status to the resync it requires. Statuses outside the
/// known vocabulary (e.g. `untag`) change nothing we publish.
pub fn resync_for_status(status: &str) -> Resync {
    match status {
        "create" | "destroy" | "die" | "kill" | "pause" | "restart" | "start" | "stop"
        | "unpause" => Resync::ProcessList,
        "delete" => Resync::FullInfo,
        _ => Resync::Ignore,
    }
}

async fn fetch(transport: &mut dyn EngineTransport, path: &str) -> Result<String> {
    let request = protocol::build_request("GET", path);
    let raw = transport.execute(&request).await?;
    let body = protocol::Response::parse(&raw)?.into_success_body()?;
    Ok(String::from_utf8_lossy(&body).into_owned())
}

async fn sync(
    api: &dyn HostApi,
    transport: &mut dyn EngineTransport,
    guest: &crate::guest::GuestUuid,
    kind: InfoKind,
    path: &str,
) -> Result<()> {
    let body = fetch(transport, path).await?;
    api.write_info(guest, kind, &body).await?;
    log::debug!("published {kind} for guest {guest}");
    Ok(())
}

pub async fn sync_info(
    api: &dyn HostApi,
    transport: &mut dyn EngineTransport,
    guest: &crate::guest::GuestUuid,
) -> Result<()> {
    sync(api, transport, guest, InfoKind::Info, INFO_PATH).await
}

pub async fn sync_version(
    api: &dyn HostApi,
    transport: &mut dyn EngineTransport,
    guest: &crate::guest::GuestUuid,
) -> Result<()> {
    sync(api, transport, guest, InfoKind::Version, VERSION_PATH).await
}

pub async fn sync_process_list(
    api: &dyn HostApi,
    transport: &mut dyn EngineTransport,
    guest: &crate::guest::GuestUuid,
) -> Result<()> {
    sync(api, transport, guest, InfoKind::ProcessList, PROCESS_LIST_PATH).await
}

/// Writes the guest's full current engine state: info, version and the
/// process list, in that order.
pub async fn sync_full(
    api: &dyn HostApi,
    transport: &mut dyn EngineTransport,
    guest: &crate::guest::GuestUuid,
) -> Result<()> {
    sync_info(api, transport, guest).await?;
    sync_version(api, transport, guest).await?;
    sync_process_list(api, transport, guest).await
}

/// Clears every published metadata slot for the guest. Stale data is worse
/// than absent data, so this runs before the first sync and after any
/// listening failure.
pub async fn wipe_published(api: &dyn HostApi, guest: &crate::guest::GuestUuid) -> Result<()> {
    for kind in InfoKind::ALL {
        api.clear_info(guest, kind).await?;
    }
    Ok(())
}
