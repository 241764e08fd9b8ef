//! Network simulation core module.
//!
//! This module provides the complete discrete-event infrastructure for a
//! multi-node vehicular network. It integrates:
//! - An event queue with a nanosecond logical clock
//! - Per-node protocol stacks built from pluggable layer tasks
//! - Channel models deciding who hears which transmission
//! - PHY interference, CSMA/CA contention and multicast relaying
//! - Aggregate statistics
//!
//! ## Module Organization
//!
//! - `time`, `types`, `message`, `event`: core data structures
//! - `scheduler`: time-ordered `EventQueue`
//! - `buffer`, `node`: per-node soft state and task dispatch
//! - `tasks`: APP/TRANSPORT/NET/LINK/PHY task implementations
//! - `signal_calculations`: padding, airtime and path loss math
//! - `channel_model`: `NetworkChannelModel` and its implementations
//! - `statistics`: counters and running averages
//! - `network`: the `Simulation` orchestrator
//! - `scenario`: scenario files and runner
//! - `log_capture`: per-node log routing
//!
//! ## Public API
//!
//! The main entry point is `Simulation`; `Scenario::run` builds and drives
//! one from a file.

pub mod buffer;
pub mod channel_model;
pub mod error;
pub mod event;
pub mod log_capture;
pub mod message;
pub mod network;
pub mod node;
pub mod scenario;
pub mod scheduler;
pub mod signal_calculations;
pub mod statistics;
pub mod tasks;
pub mod time;
pub mod types;

pub use error::SimulationError;
pub use network::Simulation;
pub use scenario::{Scenario, load_scenario};
