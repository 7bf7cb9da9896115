//! The per-guest monitoring loop.
//!
//! One task per monitored guest: sync the engine's full state, listen on the
//! event feed and react per event, and on any failure back off and retry.
//! Cancellation is cooperative, checked at every suspension point, and
//! terminal: a cancelled task never re-enters the connecting phase.

use std::sync::Arc;

use tokio::io::AsyncReadExt;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::config::MonitorConfig;
use crate::engine::{self, Resync};
use crate::guest::GuestUuid;
use crate::hostapi::{HostApi, MessageHandle};
use crate::protocol::demux::{EventDemux, StreamEvent};
use crate::transport::Connector;
use crate::{protocol, transport};

use super::diagnose;

const NOTICE_TITLE: &str = "Container management cannot monitor guest";

pub(crate) struct TaskContext {
    pub api: Arc<dyn HostApi>,
    pub connector: Arc<dyn Connector>,
    pub guest: GuestUuid,
    pub cancel: CancellationToken,
    pub config: Arc<MonitorConfig>,
}

/// Runs until the guest's engine becomes unmonitorable for good, i.e. until
/// the registry cancels the task.
pub(crate) async fn run(ctx: TaskContext) {
    log::info!("monitor loop starting for guest {}", ctx.guest);
    let started = Instant::now();
    let mut notice: Option<MessageHandle> = None;

    // a previous incarnation may have left stale state behind
    wipe_quietly(&ctx).await;

    while !ctx.cancel.is_cancelled() {
        if let Err(err) = monitor_pass(&ctx, &mut notice).await {
            log::info!("could not monitor guest {}, will retry: {err}", ctx.guest);
            if notice.is_none() && started.elapsed() >= ctx.config.warning_threshold {
                send_notice(&ctx, &mut notice).await;
            }
        }
        tokio::select! {
            _ = ctx.cancel.cancelled() => break,
            _ = tokio::time::sleep(ctx.config.retry_interval) => {}
        }
    }

    // never leave a notice behind for a guest nobody monitors anymore
    clear_notice(&ctx, &mut notice).await;
    log::info!("monitor loop finished for guest {}", ctx.guest);
}

/// One sync-then-listen pass. Returns when the feed ends or fails; published
/// metadata is wiped on the way out so it can never go stale.
async fn monitor_pass(
    ctx: &TaskContext,
    notice: &mut Option<MessageHandle>,
) -> engine::Result<()> {
    let Some(mut transport) = connect(ctx).await? else {
        return Ok(());
    };
    engine::sync_full(ctx.api.as_ref(), transport.as_mut(), &ctx.guest).await?;
    // the engine answered again - retract any outstanding notice
    clear_notice(ctx, notice).await;

    let result = listen(ctx, transport.as_mut()).await;
    wipe_quietly(ctx).await;
    result
}

/// Opens a transport, abandoning the attempt when the task is cancelled.
/// Connecting can block as long as the OS connect timeout on a blackholed
/// guest, so it is a suspension point cancellation must reach, just like the
/// feed reads.
async fn connect(
    ctx: &TaskContext,
) -> engine::Result<Option<Box<dyn transport::EngineTransport>>> {
    tokio::select! {
        _ = ctx.cancel.cancelled() => Ok(None),
        connected = ctx.connector.connect(&ctx.api, &ctx.guest, &ctx.config) => {
            Ok(Some(connected?))
        }
    }
}

/// Consumes the guest's event feed until cancellation, end of stream or a
/// stream failure, reacting to each decoded event.
async fn listen(ctx: &TaskContext, transport: &mut dyn transport::EngineTransport) -> engine::Result<()> {
    let request = protocol::build_request("GET", engine::EVENTS_PATH);
    let mut stream = transport.open_event_stream(&request).await?;
    let mut demux = EventDemux::new(ctx.config.max_event_buffer);
    let mut buf = [0u8; 1024];
    loop {
        let read = tokio::select! {
            _ = ctx.cancel.cancelled() => return Ok(()),
            read = stream.read(&mut buf) => read,
        };
        let n = read.map_err(transport::Error::Io)?;
        if n == 0 {
            demux.finish()?;
            log::info!("event feed for guest {} ended", ctx.guest);
            return Ok(());
        }
        for event in demux.feed(&buf[..n])? {
            react(ctx, &event).await;
        }
    }
}

/// Applies one stream event: cheap process-list resync for container
/// lifecycle churn, the full info sync only when the engine's inventory
/// changed, nothing for the rest.
async fn react(ctx: &TaskContext, event: &StreamEvent) {
    let Some(status) = event.status.as_deref() else {
        return;
    };
    let what = engine::resync_for_status(status);
    if what == Resync::Ignore {
        return;
    }
    if let Err(err) = resync(ctx, what).await {
        // the engine may have stopped between the event and the resync
        log::warn!(
            "resync after `{status}` event failed for guest {}: {err}",
            ctx.guest
        );
    }
}

/// Resyncs run over a fresh connection: the listening connection is parked
/// on the event feed and cannot carry requests.
async fn resync(ctx: &TaskContext, what: Resync) -> engine::Result<()> {
    let Some(mut transport) = connect(ctx).await? else {
        return Ok(());
    };
    match what {
        Resync::ProcessList => {
            engine::sync_process_list(ctx.api.as_ref(), transport.as_mut(), &ctx.guest).await
        }
        Resync::FullInfo => engine::sync_info(ctx.api.as_ref(), transport.as_mut(), &ctx.guest).await,
        Resync::Ignore => Ok(()),
    }
}

async fn wipe_quietly(ctx: &TaskContext) {
    if let Err(err) = engine::wipe_published(ctx.api.as_ref(), &ctx.guest).await {
        log::warn!("failed to wipe published state for guest {}: {err}", ctx.guest);
    }
}

/// Raises the one diagnostic notice for this task instance.
async fn send_notice(ctx: &TaskContext, notice: &mut Option<MessageHandle>) {
    let cause =
        diagnose::determine_failure_cause(&ctx.api, &ctx.guest, &ctx.config).await;
    log::info!("raising monitor notice for guest {}: {cause}", ctx.guest);
    match ctx.api.send_message(&ctx.guest, NOTICE_TITLE, &cause).await {
        Ok(handle) => *notice = Some(handle),
        // the control plane may itself be down right now
        Err(err) => log::warn!("could not raise notice for guest {}: {err}", ctx.guest),
    }
}

async fn clear_notice(ctx: &TaskContext, notice: &mut Option<MessageHandle>) {
    if let Some(handle) = notice.take() {
        log::info!("retracting monitor notice for guest {}", ctx.guest);
        if let Err(err) = ctx.api.destroy_message(handle).await {
            // the operator may have dismissed it manually in the meantime
            log::warn!("could not retract notice for guest {}: {err}", ctx.guest);
        }
    }
}
