//! vcircuit Wire
//!
//! The networked substrate: a message daemon and the bus client that talks
//! to it.
//!
//! - Frame and message encoding (`codec`)
//! - Daemon addresses (`endpoint`)
//! - The routing hub and the daemon server (`hub`, `daemon`)
//! - `DaemonBus`, a [`Bus`](vcircuit_core::bus::Bus) over TCP (`client`)
//!
//! ```rust,no_run
//! use vcircuit_core::options::TransportOptions;
//! use vcircuit_core::transport::Transport;
//! use vcircuit_wire::DaemonBus;
//!
//! # fn main() -> vcircuit_core::error::Result<()> {
//! let options = TransportOptions::default().with_daemon("tcp:7500");
//! let transport = Transport::new(DaemonBus::connect(&options)?);
//! # let _ = transport;
//! # Ok(())
//! # }
//! ```

#![cfg_attr(not(test), deny(unsafe_code))]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::module_name_repetitions)]
pub mod client;
pub mod codec;
mod conn;
pub mod daemon;
pub mod endpoint;
pub mod hub;
pub mod reconnect;
pub mod tcp;

pub use client::DaemonBus;
pub use codec::{Frame, WireError};
pub use daemon::Daemon;
pub use endpoint::DaemonAddr;
