//! Response collector: counts replies on the session's response subject.

use crate::completion::{Completion, Outcome};
use crate::session::{is_status_point, Session};
use crate::status::{Progress, SharedStatus};
use std::sync::Arc;
use tracing::{trace, warn};
use vcircuit_core::error::Result;
use vcircuit_core::event::Listener;
use vcircuit_core::message::Message;
use vcircuit_core::queue::Queue;
use vcircuit_core::transport::Transport;

/// Check a server reply: `sum` must be `x + y`.
fn verify(reply: &Message) -> bool {
    match (reply.get_u32("x"), reply.get_u32("y"), reply.get_u32("sum")) {
        (Ok(x), Ok(y), Ok(sum)) => x.wrapping_add(y) == sum,
        _ => false,
    }
}

/// Listen for responses on `transport`, running on `queue`.
///
/// Each reply bumps the received count. Once every request has been sent,
/// a status line is reported on each `status_frequency` multiple. The reply
/// that brings the count to the target signals `completion`.
pub fn start_collector(
    queue: &Queue,
    transport: &Transport,
    session: Arc<Session>,
    status_frequency: u32,
    status: SharedStatus,
    completion: Arc<Completion>,
) -> Result<Listener> {
    let pattern = session.reply_subject().clone();
    Listener::new(queue, transport, pattern, move |reply: &Message| {
        if !verify(reply) {
            warn!(reply = %reply, "[COLLECTOR] Reply with wrong or missing sum");
        }

        let Some(received) = session.record_received() else {
            trace!("[COLLECTOR] Reply beyond the expected count, ignored");
            return;
        };

        if session.all_sent() && is_status_point(received, status_frequency) {
            status.report(Progress::Received {
                sent: session.sent(),
                received,
            });
        }

        if received >= session.requested() {
            completion.signal(Outcome::Completed);
        }
    })
}
