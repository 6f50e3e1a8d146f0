//! vcircuit Core
//!
//! The messaging substrate the benchmark harness runs on:
//! - Subjects with `*` / `>` wildcards (`subject`)
//! - Self-describing messages (`message`)
//! - Subject pattern index (`index`)
//! - The bus seam and the in-process bus (`bus`)
//! - Send / request / reply facade (`transport`)
//! - Event queues and dispatch threads (`queue`)
//! - Listeners and timers (`event`)
//! - Point-to-point virtual circuits and their advisories (`circuit`, `advisory`)
//! - Error types (`error`)

#![deny(unsafe_code)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::needless_pass_by_value)]
#![allow(clippy::match_same_arms)]
pub mod advisory;
pub mod bus;
pub mod circuit;
pub mod error;
pub mod event;
pub mod index;
pub mod message;
pub mod options;
pub mod queue;
pub mod subject;
pub mod transport;

pub mod prelude {
    pub use crate::advisory::CircuitEvent;
    pub use crate::bus::{process_bus, Bus, DeliverySink, LocalBus, SubscriptionId};
    pub use crate::circuit::{CircuitState, VirtualCircuit};
    pub use crate::error::{Result, TransportError};
    pub use crate::event::{Listener, Timer, TimerHandle};
    pub use crate::message::{FieldValue, Message};
    pub use crate::options::{CircuitOptions, TransportOptions};
    pub use crate::queue::{Dispatcher, Queue};
    pub use crate::subject::Subject;
    pub use crate::transport::Transport;
}
