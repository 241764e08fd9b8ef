//! Error type for fallible simulation APIs.
//!
//! Protocol irregularities inside tasks are never errors: they are logged and
//! the simulation continues. Only API misuse surfaces here.

use super::time::SimTime;
use super::types::NodeId;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SimulationError {
    /// A node id was referenced that the simulation does not know.
    UnknownNode(NodeId),
    /// An object id was referenced that no node is bound to.
    UnknownObject(u64),
    /// A second node was requested for an object that already has one.
    DuplicateObject(u64),
    /// Attempted to schedule an event before the current time.
    NonCausalSchedule { requested: SimTime, now: SimTime },
    /// The settings failed validation.
    InvalidSettings(String),
}

impl std::fmt::Display for SimulationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SimulationError::UnknownNode(id) => write!(f, "node {} not found", id),
            SimulationError::UnknownObject(id) => write!(f, "no node is bound to object {}", id),
            SimulationError::DuplicateObject(id) => write!(f, "object {} is already bound to a node", id),
            SimulationError::NonCausalSchedule { requested, now } => {
                write!(f, "cannot schedule event at {} ns when current time is {} ns", requested, now)
            }
            SimulationError::InvalidSettings(msg) => write!(f, "invalid settings: {}", msg),
        }
    }
}

impl std::error::Error for SimulationError {}
