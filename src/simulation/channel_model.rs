//! Pluggable channel models.
//!
//! The orchestrator asks the channel model, once per transmission and once per
//! potential receiver, whether that receiver hears the frame and how. Tasks
//! also ask it which channels a node uses and which modulation row it sends
//! with. The model is a strategy owned by the `Simulation`, not by any node.

use rand::SeedableRng;
use rand::rngs::StdRng;
use serde::Deserialize;
use std::collections::HashMap;

use super::message::NetworkMessage;
use super::node::NodeState;
use super::signal_calculations::{PathLossParameters, calculate_effective_distance, calculate_rssi};
use super::types::ChannelId;

/// Default 802.11p control channel.
pub const DEFAULT_CHANNEL: ChannelId = 178;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReceptionKind {
    /// Decodable frame; subject to PHY interference accounting.
    Message,
    /// Energy on the channel that cannot be decoded.
    Interference,
    /// Contention-free delivery (wired backhaul).
    Direct,
}

/// How one receiver hears one transmission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Reception {
    pub channel_id: ChannelId,
    /// Highest modulation row the pair supports; `None` means any.
    pub max_modulation_index: Option<usize>,
    pub kind: ReceptionKind,
}

pub trait NetworkChannelModel {
    /// Called once before the first event is dispatched.
    fn on_simulation_start(&mut self, _nodes: &[&NodeState]) {}

    /// Whether and how `receiver` hears `message` sent by `sender`.
    fn compute_transmission(&mut self, sender: &NodeState, receiver: &NodeState, message: &NetworkMessage) -> Option<Reception>;

    /// Channels `node` sends on (`sending`) or listens on.
    fn compute_channel_ids(&self, node: &NodeState, sending: bool) -> Vec<ChannelId>;

    /// Modulation table row `node` transmits with.
    fn compute_modulation_index(&self, node: &NodeState) -> usize;
}

fn default_tx_power() -> f32 {
    23.0
}

fn default_carrier_sense() -> f32 {
    -95.0
}

fn default_snr_thresholds() -> Vec<f32> {
    vec![5.0, 6.0, 8.0, 11.0, 15.0, 20.0, 25.0, 26.0]
}

/// Parameters of the distance-based channel model.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct DistanceChannelParameters {
    #[serde(default)]
    pub path_loss: PathLossParameters,
    #[serde(default = "default_tx_power")]
    pub tx_power_dbm: f32,
    /// Minimum SNR (dB) per modulation row, same order as the modulation table.
    #[serde(default = "default_snr_thresholds")]
    pub snr_thresholds_db: Vec<f32>,
    /// Weaker signals are not even sensed as interference.
    #[serde(default = "default_carrier_sense")]
    pub carrier_sense_threshold_dbm: f32,
    /// Channel ids per object kind; kinds not listed use `DEFAULT_CHANNEL`.
    #[serde(default)]
    pub channels: HashMap<String, Vec<ChannelId>>,
    /// Modulation row per object kind; kinds not listed use row 0.
    #[serde(default)]
    pub modulation_indices: HashMap<String, usize>,
    /// Object kinds connected to the wired backhaul.
    #[serde(default)]
    pub wired_kinds: Vec<String>,
    #[serde(default)]
    pub seed: u64,
}

impl Default for DistanceChannelParameters {
    fn default() -> Self {
        Self {
            path_loss: PathLossParameters::default(),
            tx_power_dbm: default_tx_power(),
            snr_thresholds_db: default_snr_thresholds(),
            carrier_sense_threshold_dbm: default_carrier_sense(),
            channels: HashMap::new(),
            modulation_indices: HashMap::new(),
            wired_kinds: Vec::new(),
            seed: 0,
        }
    }
}

/// Log-distance path loss channel.
///
/// A receiver decodes a frame if the sampled RSSI clears the SNR threshold of
/// at least the lowest modulation row; it senses interference if the RSSI is
/// only above the carrier-sense threshold. Sender and receiver must share a
/// channel.
pub struct DistanceChannelModel {
    params: DistanceChannelParameters,
    rng: StdRng,
}

impl DistanceChannelModel {
    pub fn new(params: DistanceChannelParameters) -> Self {
        let rng = StdRng::seed_from_u64(params.seed);
        Self { params, rng }
    }

    fn channels_for_kind(&self, kind: &str) -> Vec<ChannelId> {
        self.params.channels.get(kind).cloned().unwrap_or_else(|| vec![DEFAULT_CHANNEL])
    }

    fn is_wired(&self, node: &NodeState) -> bool {
        self.params.wired_kinds.iter().any(|k| k == node.kind())
    }

    /// Highest row whose SNR threshold `snr_db` meets.
    fn best_modulation(&self, snr_db: f32) -> Option<usize> {
        self.params.snr_thresholds_db.iter().rposition(|threshold| snr_db >= *threshold)
    }
}

impl NetworkChannelModel for DistanceChannelModel {
    fn on_simulation_start(&mut self, nodes: &[&NodeState]) {
        let lowest = self.params.snr_thresholds_db.first().copied().unwrap_or(0.0);
        let range = calculate_effective_distance(
            self.params.tx_power_dbm,
            self.params.path_loss.noise_floor + lowest,
            &self.params.path_loss,
        );
        log::info!("Distance channel model: {} nodes, nominal decoding range {:.0} m", nodes.len(), range);
    }

    fn compute_transmission(&mut self, sender: &NodeState, receiver: &NodeState, message: &NetworkMessage) -> Option<Reception> {
        if message.wired {
            if self.is_wired(sender) && self.is_wired(receiver) {
                return Some(Reception {
                    channel_id: 0,
                    max_modulation_index: None,
                    kind: ReceptionKind::Direct,
                });
            }
            return None;
        }

        let listening = self.channels_for_kind(receiver.kind());
        let channel_id = if listening.contains(&message.phy.channel_id) {
            message.phy.channel_id
        } else {
            return None;
        };

        let distance = sender.position().distance(&receiver.position()) as f32;
        let rssi = calculate_rssi(distance, self.params.tx_power_dbm, &self.params.path_loss, &mut self.rng);
        if rssi < self.params.carrier_sense_threshold_dbm {
            return None;
        }

        let snr = rssi - self.params.path_loss.noise_floor;
        let reception = match self.best_modulation(snr) {
            Some(index) => Reception {
                channel_id,
                max_modulation_index: Some(index),
                kind: ReceptionKind::Message,
            },
            None => Reception {
                channel_id,
                max_modulation_index: None,
                kind: ReceptionKind::Interference,
            },
        };
        Some(reception)
    }

    fn compute_channel_ids(&self, node: &NodeState, _sending: bool) -> Vec<ChannelId> {
        self.channels_for_kind(node.kind())
    }

    fn compute_modulation_index(&self, node: &NodeState) -> usize {
        self.params.modulation_indices.get(node.kind()).copied().unwrap_or(0)
    }
}

/// Every node hears every other node perfectly on a single channel.
#[derive(Debug, Clone, Default)]
pub struct IdealChannelModel {
    pub channel_id: ChannelId,
    pub modulation_index: usize,
    /// Kinds reached by wired copies; empty means every node.
    pub wired_kinds: Vec<String>,
}

impl IdealChannelModel {
    pub fn new() -> Self {
        Self::default()
    }
}

impl NetworkChannelModel for IdealChannelModel {
    fn compute_transmission(&mut self, sender: &NodeState, receiver: &NodeState, message: &NetworkMessage) -> Option<Reception> {
        if message.wired {
            let connected = |node: &NodeState| self.wired_kinds.is_empty() || self.wired_kinds.iter().any(|k| k == node.kind());
            if !(connected(sender) && connected(receiver)) {
                return None;
            }
            return Some(Reception {
                channel_id: self.channel_id,
                max_modulation_index: None,
                kind: ReceptionKind::Direct,
            });
        }
        Some(Reception {
            channel_id: self.channel_id,
            max_modulation_index: None,
            kind: ReceptionKind::Message,
        })
    }

    fn compute_channel_ids(&self, _node: &NodeState, _sending: bool) -> Vec<ChannelId> {
        vec![self.channel_id]
    }

    fn compute_modulation_index(&self, _node: &NodeState) -> usize {
        self.modulation_index
    }
}
