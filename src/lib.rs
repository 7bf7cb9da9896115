//! Guest Monitor: bridges a virtualization host's object-change event stream
//! with the container engines running inside its guests.
//!
//! The engine watches the host's guest records, opens an SSH or mutual-TLS
//! transport into each guest flagged for monitoring, mirrors the container
//! engine's metadata (info, version, process list) back into the guest
//! record, and follows the engine's event stream to keep that metadata fresh.
//!
//! [`monitor_host`] is the entry point; everything else supports it:
//!
//! - [`hostapi`]: the trait boundary to the virtualization host's control
//!   plane (snapshots, event polling, metadata slots, credentials).
//! - [`watcher`]: the outer loop that subscribes to host events and keeps
//!   the per-guest monitor registry converged.
//! - [`monitor`]: the registry and the per-guest monitor tasks.
//! - [`transport`]: SSH and mutual-TLS channels into a guest.
//! - [`protocol`]: the HTTP/1.0-over-socket request framing and the
//!   streaming event demultiplexer.
//! - [`engine`]: container engine endpoints and resync policy.

pub mod config;
pub mod engine;
pub mod guest;
pub mod hostapi;
pub mod monitor;
pub mod protocol;
pub mod transport;
pub mod watcher;

#[cfg(test)]
pub(crate) mod testutil;

pub use config::MonitorConfig;
pub use watcher::monitor_host;
