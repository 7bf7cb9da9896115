//! The monitor registry: owns the set of actively monitored guests.
//!
//! Converges actual monitoring state with desired state by evaluating each
//! guest snapshot's eligibility, starting and cancelling per-guest tasks as
//! the verdict flips. Snapshot processing runs on the watcher's single
//! control path; the tasks themselves run independently.

use std::collections::HashMap;
use std::sync::Arc;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::MonitorConfig;
use crate::guest::{GuestRef, GuestSnapshot, GuestUuid, HostRef};
use crate::hostapi::{self, HostApi, TLS_SECRET_KEYS};
use crate::transport::Connector;

mod diagnose;
mod task;

struct MonitoredGuest {
    uuid: GuestUuid,
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

pub struct Registry {
    api: Arc<dyn HostApi>,
    connector: Arc<dyn Connector>,
    config: Arc<MonitorConfig>,
    local_host: HostRef,
    guests: DashMap<GuestRef, MonitoredGuest>,
    /// TLS secret uuids seen on each guest's snapshots, remembered so the
    /// secrets can be tidied after the guest object is deleted.
    secret_cache: DashMap<GuestRef, HashMap<&'static str, String>>,
}

impl Registry {
    pub fn new(
        api: Arc<dyn HostApi>,
        connector: Arc<dyn Connector>,
        local_host: HostRef,
        config: Arc<MonitorConfig>,
    ) -> Self {
        Self {
            api,
            connector,
            config,
            local_host,
            guests: DashMap::new(),
            secret_cache: DashMap::new(),
        }
    }

    pub fn local_host(&self) -> &HostRef {
        &self.local_host
    }

    /// Re-targets the registry after the host joined a pool and its ref
    /// changed. Running tasks are unaffected; the next snapshots decide.
    pub fn set_local_host(&mut self, local_host: HostRef) {
        self.local_host = local_host;
    }

    /// Full reconciliation pass: pulls every current snapshot and processes
    /// it. Used at watcher start and after event-feed loss.
    pub async fn refresh(&self) -> hostapi::Result<()> {
        for (guest, snapshot) in self.api.all_snapshots().await? {
            self.process_snapshot(&guest, &snapshot);
        }
        Ok(())
    }

    /// Converges one guest: starts a task when it became eligible, cancels
    /// the task when it no longer is. Redundant notifications are no-ops.
    pub fn process_snapshot(&self, guest: &GuestRef, snapshot: &GuestSnapshot) {
        let is_monitored = self.guests.contains_key(guest);
        let should_monitor = snapshot.should_monitor(&self.local_host);
        if should_monitor && !is_monitored {
            self.start_monitoring(guest, snapshot);
        } else if !should_monitor && is_monitored {
            self.stop_monitoring(guest);
        }
        self.remember_secrets(guest, snapshot);
    }

    fn start_monitoring(&self, guest: &GuestRef, snapshot: &GuestSnapshot) {
        match self.guests.entry(guest.clone()) {
            // the entry check keeps at most one task per guest even when
            // notifications race a slow tear-down
            Entry::Occupied(_) => {}
            Entry::Vacant(slot) => {
                log::info!("starting to monitor guest {} ({guest})", snapshot.uuid);
                let cancel = CancellationToken::new();
                let handle = tokio::spawn(task::run(task::TaskContext {
                    api: Arc::clone(&self.api),
                    connector: Arc::clone(&self.connector),
                    guest: snapshot.uuid.clone(),
                    cancel: cancel.clone(),
                    config: Arc::clone(&self.config),
                }));
                slot.insert(MonitoredGuest {
                    uuid: snapshot.uuid.clone(),
                    cancel,
                    handle,
                });
            }
        }
    }

    fn stop_monitoring(&self, guest: &GuestRef) {
        if let Some((_, monitored)) = self.guests.remove(guest) {
            log::info!("stopping monitor for guest {} ({guest})", monitored.uuid);
            monitored.cancel.cancel();
        }
    }

    fn remember_secrets(&self, guest: &GuestRef, snapshot: &GuestSnapshot) {
        for key in TLS_SECRET_KEYS {
            if let Some(secret_uuid) = snapshot.other_config.get(key) {
                self.secret_cache
                    .entry(guest.clone())
                    .or_default()
                    .insert(key, secret_uuid.clone());
            }
        }
    }

    /// Handles the host reporting the guest object fully deleted: cancels
    /// any task and tidies secrets no other guest still references.
    pub async fn process_removal(&self, guest: &GuestRef) {
        self.stop_monitoring(guest);
        let Some((_, secrets)) = self.secret_cache.remove(guest) else {
            return;
        };
        for (key, secret_uuid) in secrets {
            match self.api.secret_refcount(&secret_uuid).await {
                Ok(0) => {
                    if let Err(err) = self.api.destroy_secret(&secret_uuid).await {
                        log::warn!("failed to delete secret {secret_uuid} ({key}): {err}");
                    } else {
                        log::info!("deleted unreferenced secret {secret_uuid} ({key})");
                    }
                }
                // still referenced by another guest - keep
                Ok(_) => {}
                Err(err) => {
                    log::warn!("could not count references of secret {secret_uuid}: {err}");
                }
            }
        }
    }

    /// Signals cancellation to every task, then waits a bounded grace period
    /// for them to confirm. Tasks that miss the deadline are left to finish
    /// asynchronously rather than blocking shutdown.
    pub async fn tear_down_all(&self) {
        let refs: Vec<GuestRef> = self.guests.iter().map(|entry| entry.key().clone()).collect();
        let mut stopping = Vec::with_capacity(refs.len());
        for guest in refs {
            if let Some((_, monitored)) = self.guests.remove(&guest) {
                monitored.cancel.cancel();
                stopping.push(monitored);
            }
        }
        log::info!("tearing down {} guest monitors", stopping.len());

        let deadline = tokio::time::Instant::now() + self.config.teardown_grace;
        for monitored in stopping {
            match tokio::time::timeout_at(deadline, monitored.handle).await {
                Ok(Ok(())) => {}
                Ok(Err(err)) => {
                    log::error!("monitor for guest {} panicked: {err}", monitored.uuid);
                }
                Err(_) => {
                    log::warn!(
                        "monitor for guest {} did not confirm stopping within the grace period",
                        monitored.uuid
                    );
                }
            }
        }
    }

    pub fn is_monitored(&self, guest: &GuestRef) -> bool {
        self.guests.contains_key(guest)
    }

    pub fn monitored_count(&self) -> usize {
        self.guests.len()
    }
}
