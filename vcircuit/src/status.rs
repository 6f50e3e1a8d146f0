//! Progress reporting.
//!
//! The client and server report what they are doing through a
//! [`StatusSink`]. The binaries use [`LogStatus`], which turns every report
//! into a `tracing` event.

use std::sync::Arc;
use tracing::{info, warn};

/// One progress report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Progress {
    /// Client: locate request sent.
    Searching { subject: String },
    /// Client: a server answered with its connect subject.
    Located { connect_subject: String },
    /// Client: first request about to go out.
    Starting,
    /// Client: `sent` reached a status multiple.
    Sent { sent: u32, received: u32 },
    /// Client: all requests sent and `received` reached a status multiple.
    Received { sent: u32, received: u32 },
    /// Client: the generator stopped after its last request.
    SendingDone { sent: u32, received: u32 },
    /// Client: the circuit went away before the run completed.
    Disconnected {
        reason: String,
        sent: u32,
        received: u32,
    },
    /// Server: a locate request arrived.
    SearchReceived { connect_subject: String },
    /// Server: `total` requests processed (status multiple or final).
    Processed { total: u32 },
}

/// Receiver of progress reports. Called from dispatch threads.
pub trait StatusSink: Send + Sync {
    fn report(&self, progress: Progress);
}

/// Shared sink handle.
pub type SharedStatus = Arc<dyn StatusSink>;

/// Logs every report at `info` (disconnects at `warn`).
#[derive(Debug, Default, Clone, Copy)]
pub struct LogStatus;

impl StatusSink for LogStatus {
    fn report(&self, progress: Progress) {
        match progress {
            Progress::Searching { subject } => {
                info!(%subject, "Searching for a server");
            }
            Progress::Located { connect_subject } => {
                info!(%connect_subject, "Located a server");
            }
            Progress::Starting => info!("Starting test..."),
            Progress::Sent { sent, received } | Progress::Received { sent, received } => {
                info!(sent, received, "{sent} requests sent, {received} responses received");
            }
            Progress::SendingDone { sent, received } => {
                info!(sent, received, "{sent} requests sent, {received} responses received while sending");
            }
            Progress::Disconnected {
                reason,
                sent,
                received,
            } => {
                warn!(%reason, sent, received, "Virtual circuit has been disconnected");
            }
            Progress::SearchReceived { connect_subject } => {
                info!(%connect_subject, "Client search message received");
            }
            Progress::Processed { total } => {
                info!(total, "{total} client requests processed");
            }
        }
    }
}

/// Discards every report.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullStatus;

impl StatusSink for NullStatus {
    fn report(&self, _progress: Progress) {}
}
