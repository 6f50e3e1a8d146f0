//! # vcircuit
//!
//! A request/response benchmark over virtual circuits.
//!
//! The client locates a server with a broadcast request, opens a dedicated
//! point-to-point circuit to it, and drives a stream of `{x, y}` requests
//! while a separate dispatch thread counts the `sum` replies. The run ends
//! when every reply is in or the circuit is lost, and the client reports
//! throughput.
//!
//! ## Layout
//!
//! - **`vcircuit-core`**: subjects, messages, queues, listeners, timers and
//!   virtual circuits over a pluggable bus
//! - **`vcircuit-wire`**: the `vcdaemon` broker and its TCP bus client
//! - **`vcircuit`**: the benchmark itself (this crate) and the `vcclient`,
//!   `vcserver` and `vcdaemon` programs
//!
//! ## In-process run
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use std::thread;
//! use vcircuit::prelude::*;
//!
//! # fn main() -> vcircuit::Result<()> {
//! let transport = Transport::local("demo");
//!
//! let server = Arc::new(Server::start(ServerConfig::default(), &transport, Arc::new(LogStatus))?);
//! let serving = server.clone();
//! thread::spawn(move || serving.run());
//!
//! let config = ClientConfig::default().with_requests(1000);
//! let report = run_client(&config, &transport, Arc::new(LogStatus))?;
//! println!("{report}");
//! server.shutdown();
//! # Ok(())
//! # }
//! ```

#![deny(unsafe_code)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::needless_pass_by_value)]
pub mod client;
pub mod collector;
pub mod completion;
pub mod config;
pub mod dev_tracing;
pub mod discovery;
pub mod error;
pub mod establish;
pub mod generator;
pub mod monitor;
pub mod server;
pub mod session;
pub mod stats;
pub mod status;

pub use client::run_client;
pub use error::{BenchError, Result};
pub use server::Server;
pub use stats::RunReport;

pub mod prelude {
    pub use crate::client::run_client;
    pub use crate::completion::{Completion, Ending, Outcome};
    pub use crate::config::{ClientConfig, Command, DaemonConfig, ServerConfig};
    pub use crate::error::BenchError;
    pub use crate::server::Server;
    pub use crate::session::{Session, SessionState, Tally};
    pub use crate::stats::RunReport;
    pub use crate::status::{LogStatus, NullStatus, Progress, StatusSink};
    pub use vcircuit_core::prelude::*;
}
