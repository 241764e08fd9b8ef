//! Discrete-event simulator of a layered vehicular network stack.
//!
//! `common` holds configuration, address derivation and payload encoding;
//! `simulation` holds the event queue, nodes, protocol tasks, channel models
//! and the `Simulation` orchestrator.

pub mod common;
pub mod simulation;
