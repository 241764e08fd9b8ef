//! Network settings loading, parsing, and validation.
//!
//! `NetworkSettings` bundles every scenario-level knob the protocol tasks read:
//! address prefixes, buffer limits, per-layer header sizes and processing
//! jitter, CSMA/CA timing, the PHY modulation table and the task list per
//! object kind. Settings are read from JSON or TOML (chosen by file extension)
//! and validated before a simulation may be built from them.

use anyhow::Context;
use serde::Deserialize;
use std::collections::HashMap;
use std::fs;
use std::path::Path;

use crate::simulation::time::{DelayRange, SimTime, micros, millis};

/// Error type for settings loading failures.
#[derive(Debug)]
pub enum SettingsLoadError {
    FileReadError(String),
    ParseError(String),
    ValidationError(String),
}

impl std::fmt::Display for SettingsLoadError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SettingsLoadError::FileReadError(msg) => write!(f, "Failed to read file: {}", msg),
            SettingsLoadError::ParseError(msg) => write!(f, "Failed to parse settings: {}", msg),
            SettingsLoadError::ValidationError(msg) => write!(f, "Validation error: {}", msg),
        }
    }
}

impl std::error::Error for SettingsLoadError {}

/// Bounds of the per-node "recently received" logs.
#[derive(Debug, Deserialize, Clone)]
pub struct BufferSettings {
    /// Maximum number of entries per buffer; the oldest entry is evicted first.
    pub capacity: usize,
    /// Entries older than this are soft state that has expired.
    pub freshness_ns: SimTime,
}

/// Processing jitter for each hand-over between adjacent layers.
#[derive(Debug, Deserialize, Clone)]
pub struct LayerDelays {
    pub app_transport: DelayRange,
    pub transport_network: DelayRange,
    pub network_link: DelayRange,
    pub link_physical: DelayRange,
}

/// Fixed header cost each layer adds on the send path.
#[derive(Debug, Deserialize, Clone)]
pub struct HeaderBits {
    pub application: u64,
    pub transport: u64,
    pub network: u64,
    pub link: u64,
    /// PHY service/tail/header overhead, including the slow segment.
    pub physical: u64,
}

/// Header compression ratios of the buffered ROHC link task.
#[derive(Debug, Deserialize, Clone)]
pub struct CompressionSettings {
    pub network_factor: u64,
    pub transport_factor: u64,
}

/// CSMA/CA timing and contention window.
#[derive(Debug, Deserialize, Clone)]
pub struct CsmaSettings {
    pub difs_ns: SimTime,
    pub slot_ns: SimTime,
    pub cw_min: u32,
    pub cw_max: u32,
    /// Fraction of `cw_max` used as upper bound of the window for broadcast traffic.
    pub broadcast_fraction: f64,
    /// Granularity of the DIFS/backoff countdown; must divide `difs_ns` and `slot_ns`.
    pub refresh_ns: SimTime,
}

/// One row of the modulation/rate table.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct Modulation {
    pub data_rate_kbits: u32,
    pub bits_per_signal: u32,
    pub code_rate: f64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct PhySettings {
    /// Scheduled cellular access: no OFDM padding, no contention on the sender side.
    pub cellular: bool,
    pub slow_segment_bits: u64,
    pub slow_data_rate_kbits: u32,
    /// Latency of the fixed backhaul between base stations.
    pub wired_delay_ns: SimTime,
    pub modulation_table: Vec<Modulation>,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct NetworkSettings {
    pub seed: u64,
    pub mac_prefix: String,
    pub ipv6_prefix: String,
    pub buffer: BufferSettings,
    pub delays: LayerDelays,
    pub header_bits: HeaderBits,
    pub compression: CompressionSettings,
    pub csma: CsmaSettings,
    pub phy: PhySettings,
    pub hop_limit: u8,
    /// Period of the application beacon; `None` disables beacons.
    pub beacon_interval_ns: Option<SimTime>,
    /// Capacity of the delivered-message inbox per node.
    pub inbox_capacity: usize,
    /// Task id strings per object kind, top of the stack first.
    pub task_assignments: HashMap<String, Vec<String>>,
}

impl Default for NetworkSettings {
    fn default() -> Self {
        let jitter = DelayRange::new(micros(1), micros(5));
        let mut task_assignments = HashMap::new();
        task_assignments.insert(
            "vehicle".to_string(),
            ["app_simple", "transport_simple", "net_simple", "link_csma", "phy_interference"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
        );
        task_assignments.insert(
            "base_station".to_string(),
            ["app_simple", "transport_simple", "net_multicast", "link_csma", "phy_interference"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
        );

        Self {
            seed: 1,
            mac_prefix: "02:00".to_string(),
            ipv6_prefix: "fd00:0:0:0".to_string(),
            buffer: BufferSettings {
                capacity: 64,
                freshness_ns: millis(1000),
            },
            delays: LayerDelays {
                app_transport: jitter,
                transport_network: jitter,
                network_link: jitter,
                link_physical: jitter,
            },
            // UDP 8 bytes, IPv6 40 bytes, 802.11 MAC header + FCS 34 bytes,
            // PHY SIGNAL (24) + SERVICE (16) + tail (6).
            header_bits: HeaderBits {
                application: 0,
                transport: 64,
                network: 320,
                link: 272,
                physical: 46,
            },
            compression: CompressionSettings {
                network_factor: 10,
                transport_factor: 8,
            },
            // 802.11p, 10 MHz channel.
            csma: CsmaSettings {
                difs_ns: micros(58),
                slot_ns: micros(13),
                cw_min: 0,
                cw_max: 1023,
                broadcast_fraction: 0.015,
                refresh_ns: micros(1),
            },
            phy: PhySettings {
                cellular: false,
                slow_segment_bits: 24,
                slow_data_rate_kbits: 3000,
                wired_delay_ns: millis(1),
                modulation_table: vec![
                    Modulation { data_rate_kbits: 3000, bits_per_signal: 1, code_rate: 0.5 },
                    Modulation { data_rate_kbits: 4500, bits_per_signal: 1, code_rate: 0.75 },
                    Modulation { data_rate_kbits: 6000, bits_per_signal: 2, code_rate: 0.5 },
                    Modulation { data_rate_kbits: 9000, bits_per_signal: 2, code_rate: 0.75 },
                    Modulation { data_rate_kbits: 12000, bits_per_signal: 4, code_rate: 0.5 },
                    Modulation { data_rate_kbits: 18000, bits_per_signal: 4, code_rate: 0.75 },
                    Modulation { data_rate_kbits: 24000, bits_per_signal: 6, code_rate: 2.0 / 3.0 },
                    Modulation { data_rate_kbits: 27000, bits_per_signal: 6, code_rate: 0.75 },
                ],
            },
            hop_limit: 8,
            beacon_interval_ns: None,
            inbox_capacity: 256,
            task_assignments,
        }
    }
}

impl NetworkSettings {
    /// Look up a modulation row; an out-of-range index is logged and the first row used.
    pub fn modulation(&self, index: usize) -> Option<&Modulation> {
        match self.phy.modulation_table.get(index) {
            Some(m) => Some(m),
            None => {
                log::warn!(
                    "Modulation index {} out of range (table has {} rows), using row 0",
                    index,
                    self.phy.modulation_table.len()
                );
                self.phy.modulation_table.first()
            }
        }
    }

    /// Task id strings for an object kind (empty if the kind is not configured).
    pub fn tasks_for_kind(&self, kind: &str) -> &[String] {
        self.task_assignments.get(kind).map(|v| v.as_slice()).unwrap_or(&[])
    }
}

/// Load and parse settings from a `.json` or `.toml` file.
///
/// # Parameters
///
/// * `path` - Path to the settings file
///
/// # Returns
///
/// Parsed and validated `NetworkSettings` or an error.
pub fn load_settings(path: &str) -> Result<NetworkSettings, SettingsLoadError> {
    let data = fs::read_to_string(path)
        .with_context(|| format!("Failed to read file: {}", path))
        .map_err(|e| SettingsLoadError::FileReadError(e.to_string()))?;

    let settings = parse_settings(&data, is_toml_path(path))?;
    validate_settings(&settings).map_err(SettingsLoadError::ValidationError)?;
    Ok(settings)
}

pub(crate) fn is_toml_path(path: &str) -> bool {
    Path::new(path).extension().and_then(|e| e.to_str()).is_some_and(|e| e.eq_ignore_ascii_case("toml"))
}

/// Parse settings text without validating it.
pub fn parse_settings(data: &str, toml_format: bool) -> Result<NetworkSettings, SettingsLoadError> {
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

/// Validate settings.
///
/// Address prefixes and modulation indices are deliberately not checked here:
/// those fall back to defaults at use time with a warning.
///
/// # Returns
///
/// `Ok(())` if validation passes, `Err(String)` with error description otherwise.
pub fn validate_settings(settings: &NetworkSettings) -> Result<(), String> {
    let csma = &settings.csma;
    if csma.refresh_ns == 0 {
        return Err("csma.refresh_ns must be positive".to_string());
    }
    // Otherwise the DIFS/backoff countdown drifts by a partial tick per wait.
    if csma.difs_ns % csma.refresh_ns != 0 || csma.slot_ns % csma.refresh_ns != 0 {
        return Err(format!(
            "csma.refresh_ns {} must evenly divide difs_ns {} and slot_ns {}",
            csma.refresh_ns, csma.difs_ns, csma.slot_ns
        ));
    }
    if csma.cw_min > csma.cw_max {
        return Err(format!("csma.cw_min {} exceeds cw_max {}", csma.cw_min, csma.cw_max));
    }
    if !(csma.broadcast_fraction > 0.0 && csma.broadcast_fraction <= 1.0) {
        return Err(format!("csma.broadcast_fraction {} must be in (0, 1]", csma.broadcast_fraction));
    }

    if settings.phy.modulation_table.is_empty() {
        return Err("phy.modulation_table must not be empty".to_string());
    }
    for (idx, row) in settings.phy.modulation_table.iter().enumerate() {
        if row.data_rate_kbits == 0 {
            return Err(format!("phy.modulation_table[{}] has zero data rate", idx));
        }
    }
    if settings.phy.slow_data_rate_kbits == 0 {
        return Err("phy.slow_data_rate_kbits must be positive".to_string());
    }
    if settings.phy.slow_segment_bits > settings.header_bits.physical {
        return Err(format!(
            "phy.slow_segment_bits {} exceeds header_bits.physical {}",
            settings.phy.slow_segment_bits, settings.header_bits.physical
        ));
    }

    let delays = [
        ("app_transport", &settings.delays.app_transport),
        ("transport_network", &settings.delays.transport_network),
        ("network_link", &settings.delays.network_link),
        ("link_physical", &settings.delays.link_physical),
    ];
    for (name, range) in delays {
        if range.min_ns > range.max_ns {
            return Err(format!("delays.{} has min {} > max {}", name, range.min_ns, range.max_ns));
        }
    }

    if settings.compression.network_factor == 0 || settings.compression.transport_factor == 0 {
        return Err("compression factors must be at least 1".to_string());
    }
    if settings.buffer.capacity == 0 {
        return Err("buffer.capacity must be positive".to_string());
    }
    if settings.hop_limit == 0 {
        return Err("hop_limit must be positive".to_string());
    }
    if settings.beacon_interval_ns == Some(0) {
        return Err("beacon_interval_ns must be positive when set".to_string());
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let settings = NetworkSettings::default();
        assert!(validate_settings(&settings).is_ok());
        assert_eq!(settings.tasks_for_kind("vehicle").len(), 5);
        assert!(settings.tasks_for_kind("pedestrian").is_empty());
    }

    #[test]
    fn refresh_must_divide_difs_and_slot() {
        let mut settings = NetworkSettings::default();
        settings.csma.refresh_ns = micros(2);
        let err = validate_settings(&settings).unwrap_err();
        assert!(err.contains("evenly divide"), "{}", err);

        settings.csma.refresh_ns = 0;
        assert!(validate_settings(&settings).is_err());
    }

    #[test]
    fn rejects_inverted_contention_window() {
        let mut settings = NetworkSettings::default();
        settings.csma.cw_min = 100;
        settings.csma.cw_max = 10;
        assert!(validate_settings(&settings).is_err());
    }

    #[test]
    fn rejects_empty_modulation_table() {
        let mut settings = NetworkSettings::default();
        settings.phy.modulation_table.clear();
        assert!(validate_settings(&settings).is_err());
    }

    #[test]
    fn out_of_range_modulation_falls_back_to_first_row() {
        let settings = NetworkSettings::default();
        assert_eq!(settings.modulation(2).unwrap().data_rate_kbits, 6000);
        assert_eq!(settings.modulation(99).unwrap().data_rate_kbits, 3000);
    }

    #[test]
    fn partial_json_uses_defaults() {
        let settings = parse_settings(r#"{ "seed": 99, "hop_limit": 3, "task_assignments": { "rsu": ["app_simple"] } }"#, false).unwrap();
        assert_eq!(settings.seed, 99);
        assert_eq!(settings.hop_limit, 3);
        assert_eq!(settings.csma.difs_ns, 58_000);
        assert_eq!(settings.tasks_for_kind("rsu"), ["app_simple".to_string()]);
    }

    #[test]
    fn parses_toml() {
        let text = r#"
seed = 5
mac_prefix = "02:aa"

[csma]
difs_ns = 32000
slot_ns = 9000
cw_min = 15
cw_max = 1023
broadcast_fraction = 1.0
refresh_ns = 1000
"#;
        let settings = parse_settings(text, true).unwrap();
        assert_eq!(settings.seed, 5);
        assert_eq!(settings.mac_prefix, "02:aa");
        assert_eq!(settings.csma.cw_min, 15);
        assert!(validate_settings(&settings).is_ok());
    }

    #[test]
    fn malformed_json_is_parse_error() {
        match parse_settings("{ not json", false) {
            Err(SettingsLoadError::ParseError(msg)) => assert!(msg.contains("Invalid JSON format")),
            other => panic!("expected parse error, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn missing_file_is_read_error() {
        assert!(matches!(load_settings("/nonexistent/settings.json"), Err(SettingsLoadError::FileReadError(_))));
    }

    #[test]
    fn toml_detection_by_extension() {
        assert!(is_toml_path("a/b/settings.TOML"));
        assert!(!is_toml_path("settings.json"));
    }
}
