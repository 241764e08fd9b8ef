//! Scenario files: settings, channel model, objects and scheduled traffic.
//!
//! A scenario is everything needed for a reproducible run without an
//! external physics engine: the objects keep the positions given in the file.
//! JSON and TOML are both accepted, chosen by file extension.
//!
//! ```json
//! {
//!   "settings": { "seed": 7 },
//!   "channel": { "type": "distance", "wired_kinds": ["base_station"] },
//!   "objects": [
//!     { "object_id": 1, "kind": "vehicle", "position": { "x": 0.0, "y": 0.0 } },
//!     { "object_id": 2, "kind": "base_station", "position": { "x": 150.0, "y": 0.0 } }
//!   ],
//!   "traffic": [ { "at_ns": 1000, "from_object": 1, "content": "hello" } ],
//!   "duration_ns": 1000000000
//! }
//! ```

use anyhow::Context;
use serde::Deserialize;
use std::collections::HashSet;
use std::fs;

use crate::common::settings::{NetworkSettings, SettingsLoadError, is_toml_path, validate_settings};

use super::channel_model::{DistanceChannelModel, DistanceChannelParameters, IdealChannelModel, NetworkChannelModel};
use super::error::SimulationError;
use super::network::Simulation;
use super::time::SimTime;
use super::types::{ChannelId, PhysicalObject};

/// Which channel model a scenario runs with.
#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChannelModelConfig {
    Distance(DistanceChannelParameters),
    Ideal {
        #[serde(default)]
        channel_id: ChannelId,
        #[serde(default)]
        modulation_index: usize,
        #[serde(default)]
        wired_kinds: Vec<String>,
    },
}

impl Default for ChannelModelConfig {
    fn default() -> Self {
        ChannelModelConfig::Ideal {
            channel_id: 0,
            modulation_index: 0,
            wired_kinds: Vec::new(),
        }
    }
}

impl ChannelModelConfig {
    pub fn build(&self) -> Box<dyn NetworkChannelModel> {
        match self {
            ChannelModelConfig::Distance(params) => Box::new(DistanceChannelModel::new(params.clone())),
            ChannelModelConfig::Ideal {
                channel_id,
                modulation_index,
                wired_kinds,
            } => Box::new(IdealChannelModel {
                channel_id: *channel_id,
                modulation_index: *modulation_index,
                wired_kinds: wired_kinds.clone(),
            }),
        }
    }
}

/// One application send. `to_object: None` addresses all nodes.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct TrafficItem {
    pub at_ns: SimTime,
    pub from_object: u64,
    #[serde(default)]
    pub to_object: Option<u64>,
    pub content: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct Scenario {
    #[serde(default)]
    pub settings: NetworkSettings,
    #[serde(default)]
    pub channel: ChannelModelConfig,
    pub objects: Vec<PhysicalObject>,
    #[serde(default)]
    pub traffic: Vec<TrafficItem>,
    pub duration_ns: SimTime,
}

/// Load, parse and validate a scenario from a `.json` or `.toml` file.
///
/// # Parameters
///
/// * `path` - Path to the scenario file
///
/// # Returns
///
/// The validated `Scenario` or an error.
pub fn load_scenario(path: &str) -> Result<Scenario, SettingsLoadError> {
    let data = fs::read_to_string(path)
        .with_context(|| format!("Failed to read file: {}", path))
        .map_err(|e| SettingsLoadError::FileReadError(e.to_string()))?;

    let scenario = parse_scenario(&data, is_toml_path(path))?;
    validate_scenario(&scenario).map_err(SettingsLoadError::ValidationError)?;
    log::info!(
        "Loaded scenario {}: {} objects, {} traffic items, {} ns",
        path,
        scenario.objects.len(),
        scenario.traffic.len(),
        scenario.duration_ns
    );
    Ok(scenario)
}

/// Parse scenario text without validating it.
pub fn parse_scenario(data: &str, toml_format: bool) -> Result<Scenario, SettingsLoadError> {
    if toml_format {
        toml::from_str(data)
            .context("Invalid TOML format")
            .map_err(|e| SettingsLoadError::ParseError(format!("{:#}", e)))
    } else {
        serde_json::from_str(data)
            .context("Invalid JSON format")
            .map_err(|e| SettingsLoadError::ParseError(format!("{:#}", e)))
    }
}

/// Validate a scenario.
///
/// # Returns
///
/// `Ok(())` if validation passes, `Err(String)` with error description otherwise.
pub fn validate_scenario(scenario: &Scenario) -> Result<(), String> {
    validate_settings(&scenario.settings)?;

    if scenario.duration_ns == 0 {
        return Err("duration_ns must be positive".to_string());
    }
    if scenario.objects.is_empty() {
        return Err("Scenario must contain at least one object".to_string());
    }

    let mut ids = HashSet::new();
    for object in &scenario.objects {
        if !ids.insert(object.object_id) {
            return Err(format!("Duplicate object_id: {}", object.object_id));
        }
        if scenario.settings.tasks_for_kind(&object.kind).is_empty() {
            log::warn!("Object {} has kind '{}' with no task assignment", object.object_id, object.kind);
        }
    }

    for (idx, item) in scenario.traffic.iter().enumerate() {
        if !ids.contains(&item.from_object) {
            return Err(format!("traffic[{}] sends from unknown object {}", idx, item.from_object));
        }
        if let Some(to) = item.to_object {
            if !ids.contains(&to) {
                return Err(format!("traffic[{}] addresses unknown object {}", idx, to));
            }
        }
        if item.at_ns > scenario.duration_ns {
            return Err(format!(
                "traffic[{}] at {} ns is after the scenario end {} ns",
                idx, item.at_ns, scenario.duration_ns
            ));
        }
    }

    Ok(())
}

impl Scenario {
    /// Build a simulation with every object bound and all traffic scheduled.
    pub fn build(&self) -> Result<Simulation, SimulationError> {
        let mut sim = Simulation::new(self.settings.clone(), self.channel.build())?;
        for object in &self.objects {
            sim.add_node(object.clone())?;
        }
        for item in &self.traffic {
            let from = sim
                .node_for_object(item.from_object)
                .ok_or(SimulationError::UnknownObject(item.from_object))?;
            let to = match item.to_object {
                Some(object) => Some(sim.node_for_object(object).ok_or(SimulationError::UnknownObject(object))?),
                None => None,
            };
            sim.send_text(from, to, &item.content, item.at_ns)?;
        }
        Ok(sim)
    }

    /// Build and run until `duration_ns`.
    pub fn run(&self) -> Result<Simulation, SimulationError> {
        let mut sim = self.build()?;
        let processed = sim.run_until(self.duration_ns)?;
        log::info!("Scenario finished after {} events", processed);
        Ok(sim)
    }
}
