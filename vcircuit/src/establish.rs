//! Turning a located connect subject into a live virtual circuit.

use crate::error::{BenchError, Result};
use std::time::Duration;
use tracing::debug;
use vcircuit_core::circuit::VirtualCircuit;
use vcircuit_core::options::CircuitOptions;
use vcircuit_core::subject::Subject;
use vcircuit_core::transport::Transport;

/// Connect to the acceptor at `connect_subject` and wait for it to confirm.
///
/// # Errors
///
/// - `ConnectTimeout` if the acceptor does not confirm within `timeout`
/// - `SessionDisconnected` if the circuit fails while waiting
pub fn establish(
    transport: &Transport,
    connect_subject: &Subject,
    timeout: Duration,
    options: CircuitOptions,
) -> Result<VirtualCircuit> {
    let circuit = VirtualCircuit::connect(transport, connect_subject, options)?;

    match circuit.wait_for_connection(timeout) {
        Ok(()) => {
            debug!(%connect_subject, local = %circuit.connect_subject(), "[ESTABLISH] Circuit up");
            Ok(circuit)
        }
        Err(e) if e.is_timeout() => Err(BenchError::ConnectTimeout(timeout)),
        Err(e) if e.is_connection_error() => Err(BenchError::SessionDisconnected {
            reason: e.to_string(),
            sent: 0,
            received: 0,
        }),
        Err(e) => Err(e.into()),
    }
}
