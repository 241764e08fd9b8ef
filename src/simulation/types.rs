//! Type definitions shared across the simulation.
//!
//! Contains the identifiers used to address nodes and radio channels and the
//! snapshot of the external physical object a node is bound to. The physics
//! engine owns the real object; the simulator only ever sees the values copied
//! in through `Simulation::update_object`.

use serde::Deserialize;

/// Index of a node inside a `Simulation`.
pub type NodeId = u32;

/// Radio channel number (for 802.11p-like settings, e.g. 172..184).
pub type ChannelId = u32;

/// Simple 2D point in meters.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Default)]
pub struct Position {
    pub x: f64,
    pub y: f64,
}

impl Position {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    /// Squared Euclidean distance (avoids a sqrt when only comparing ranges).
    pub fn distance2(&self, other: &Position) -> f64 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        dx * dx + dy * dy
    }

    pub fn distance(&self, other: &Position) -> f64 {
        self.distance2(other).sqrt()
    }
}

/// Snapshot of the mobile or static object a node is attached to.
///
/// `kind` selects the protocol task list from the settings (for example
/// `"vehicle"` or `"base_station"`).
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct PhysicalObject {
    pub object_id: u64,
    pub kind: String,
    #[serde(default)]
    pub position: Position,
    /// Speed in m/s.
    #[serde(default)]
    pub speed: f64,
    /// Heading in degrees, 0 = north, clockwise.
    #[serde(default)]
    pub compass: f64,
}

impl PhysicalObject {
    pub fn new(object_id: u64, kind: &str, position: Position) -> Self {
        Self {
            object_id,
            kind: kind.to_string(),
            position,
            speed: 0.0,
            compass: 0.0,
        }
    }

    /// Sensor values in the order they are packed into beacon payloads.
    pub fn sensor_values(&self) -> [f32; 4] {
        [self.position.x as f32, self.position.y as f32, self.speed as f32, self.compass as f32]
    }
}
