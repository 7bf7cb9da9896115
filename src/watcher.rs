//! The host event watcher: the outermost loop of the monitoring engine.
//!
//! Subscribes to the host's object-change feed, keeps the [`Registry`]
//! converged with it, and survives control-plane restarts by resubscribing
//! and re-reconciling from scratch. Per-guest monitor tasks are untouched by
//! feed loss; only the control path restarts.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::config::MonitorConfig;
use crate::hostapi::{self, HostApi, HostEvent};
use crate::monitor::Registry;
use crate::transport::ModeConnector;

/// Runs the monitoring engine until `shutdown` fires.
///
/// This is the crate's main entry point. It never returns early on host API
/// errors; those are logged and retried after a short pause, because the
/// control plane restarting is a normal event in this engine's life.
pub async fn monitor_host(
    api: Arc<dyn HostApi>,
    config: MonitorConfig,
    shutdown: CancellationToken,
) {
    let config = Arc::new(config);
    let mut registry: Option<Registry> = None;

    loop {
        let attempt = tokio::select! {
            () = shutdown.cancelled() => break,
            result = watch_once(&api, &config, &mut registry) => result,
        };
        if let Err(err) = attempt {
            log::warn!(
                "lost the host event feed, retrying in {:?}: {err}",
                config.host_retry_interval
            );
        }
        tokio::select! {
            () = shutdown.cancelled() => break,
            () = tokio::time::sleep(config.host_retry_interval) => {}
        }
    }

    if let Some(registry) = registry {
        registry.tear_down_all().await;
    }
    log::info!("host watcher stopped");
}

/// One subscription lifetime: resolve the local host ref, reconcile every
/// current guest, then relay change events until the feed breaks.
async fn watch_once(
    api: &Arc<dyn HostApi>,
    config: &Arc<MonitorConfig>,
    registry: &mut Option<Registry>,
) -> hostapi::Result<()> {
    // the host ref can change when the host joins or leaves a pool, so it is
    // re-resolved on every subscription rather than cached once
    let local_host = api.local_host().await?;
    let registry = registry.get_or_insert_with(|| {
        Registry::new(
            Arc::clone(api),
            Arc::new(ModeConnector),
            local_host.clone(),
            Arc::clone(config),
        )
    });
    registry.set_local_host(local_host);

    let mut token = api.subscribe().await?;
    log::info!("subscribed to host events as {}", registry.local_host());
    registry.refresh().await?;

    loop {
        let (events, next) = api.poll_since(&token, config.event_poll_timeout).await?;
        token = next;
        for event in events {
            match event {
                HostEvent::Modified { guest, snapshot } => {
                    registry.process_snapshot(&guest, &snapshot);
                }
                HostEvent::Removed { guest } => {
                    registry.process_removal(&guest).await;
                }
            }
        }
    }
}
