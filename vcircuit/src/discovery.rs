//! Locating a server.

use crate::error::{BenchError, Result};
use std::time::Duration;
use tracing::debug;
use vcircuit_core::error::TransportError;
use vcircuit_core::message::Message;
use vcircuit_core::subject::Subject;
use vcircuit_core::transport::Transport;

/// Send one locate request on `subject` and return the connect subject the
/// answering server put in its reply subject.
///
/// # Errors
///
/// - `DiscoveryTimeout` if no server answers within `timeout`
/// - `Transport` if the request cannot be sent or the reply carries no
///   connect subject
pub fn locate_server(transport: &Transport, subject: &Subject, timeout: Duration) -> Result<Subject> {
    debug!(%subject, ?timeout, "[DISCOVERY] Sending locate request");

    let reply = transport
        .send_request(Message::to(subject.clone()), timeout)
        .map_err(|e| {
            if e.is_timeout() {
                BenchError::DiscoveryTimeout(timeout)
            } else {
                BenchError::Transport(e)
            }
        })?;

    let connect_subject = reply
        .reply_subject()
        .cloned()
        .ok_or_else(|| TransportError::field("reply subject", "locate reply has no connect subject"))?;

    debug!(%connect_subject, "[DISCOVERY] Server located");
    Ok(connect_subject)
}
