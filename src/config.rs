use std::time::Duration;

/// Tunables of the monitoring engine.
///
/// The defaults mirror the intervals the daemon has always shipped with;
/// deployments that need faster recovery or quieter guests adjust the fields
/// before handing the config to [`crate::monitor_host`].
#[derive(Debug, Clone)]
pub struct MonitorConfig {
    /// Backoff between attempts to reach a guest's engine.
    pub retry_interval: Duration,
    /// Time a guest may stay unreachable before the one diagnostic notice is
    /// raised.
    pub warning_threshold: Duration,
    /// Backoff between attempts to re-reach the host control plane.
    pub host_retry_interval: Duration,
    /// Bound on one event long-poll, so the watcher re-validates liveness
    /// even when nothing changes.
    pub event_poll_timeout: Duration,
    /// How long tear-down waits for monitor tasks to confirm they stopped.
    pub teardown_grace: Duration,
    /// Cap on the event demultiplexer's accumulation buffer.
    pub max_event_buffer: usize,
    pub ssh_port: u16,
    pub tls_port: u16,
    /// Path of the engine's control socket inside the guest (SSH relay).
    pub engine_socket_path: String,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            retry_interval: Duration::from_secs(20),
            warning_threshold: Duration::from_secs(120),
            host_retry_interval: Duration::from_secs(10),
            event_poll_timeout: Duration::from_secs(3600),
            teardown_grace: Duration::from_secs(5),
            max_event_buffer: crate::protocol::demux::DEFAULT_BUFFER_CAP,
            ssh_port: 22,
            tls_port: 2376,
            engine_socket_path: "/var/run/docker.sock".to_owned(),
        }
    }
}
