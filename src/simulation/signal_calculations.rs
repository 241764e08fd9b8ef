//! Radio signal and timing calculations.
//!
//! Contains helpers for:
//! - OFDM symbol size and frame padding
//! - Two-rate frame transmission time (slow PLCP segment + assigned rate)
//! - Log-distance path loss with optional log-normal shadowing
//! - RSSI sampling and effective range
//!
//! Units:
//! - Power: dBm
//! - Time: nanoseconds (`SimTime`)
//! - Distance: meters

use rand::rngs::StdRng;
use rand_distr::{Distribution, Normal};
use serde::Deserialize;

use super::message::NetworkMessage;
use super::time::SimTime;

/// Padding candidates are searched this many symbol steps around the naive ceiling.
const PADDING_SEARCH_STEPS: i64 = 2;

/// Parameters defining the radio channel propagation model.
///
/// These parameters determine how signal strength decays over distance and
/// how much random variation (shadowing) is applied.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct PathLossParameters {
    /// Path loss exponent (n).
    ///
    /// - n = 2.0: Free space
    /// - n = 2.7 to 3.5: Urban areas
    pub path_loss_exponent: f32,

    /// Standard deviation for log-normal shadowing (σ) in dB. 0.0 disables shadowing.
    #[serde(default)]
    pub shadowing_sigma: f32,

    /// Path loss at the reference distance d₀ (1 meter) in dB.
    pub path_loss_at_reference_distance: f32,

    /// The thermal noise floor of the receiver in dBm.
    pub noise_floor: f32,
}

impl Default for PathLossParameters {
    fn default() -> Self {
        Self {
            path_loss_exponent: 2.7,
            shadowing_sigma: 0.0,
            path_loss_at_reference_distance: 47.9,
            noise_floor: -98.0,
        }
    }
}

/// OFDM symbol size in bits for a data rate: `data_rate_kbits / 1000 * 8`.
pub fn ofdm_symbol_bits(data_rate_kbits: u32) -> u64 {
    (data_rate_kbits as f64 / 1000.0 * 8.0).round() as u64
}

/// Smallest padding that makes `length_bits + fixed_overhead_bits + padding` a
/// whole number of OFDM symbols.
///
/// The naive ceiling is computed in floating point, so the candidates within
/// ±2 symbol steps of it are checked against the exact integer condition.
///
/// # Returns
///
/// The padding in `[0, symbol_bits)`, or `None` if no candidate validates
/// (including a zero symbol size). The caller logs the failure.
pub fn ofdm_padding(length_bits: u64, fixed_overhead_bits: u64, symbol_bits: u64) -> Option<u64> {
    if symbol_bits == 0 {
        return None;
    }
    let total = (length_bits + fixed_overhead_bits) as i64;
    let size = symbol_bits as i64;
    let naive = ((total as f64 / size as f64).ceil() * size as f64) as i64 - total;

    (-PADDING_SEARCH_STEPS..=PADDING_SEARCH_STEPS)
        .map(|step| naive + step * size)
        .find(|candidate| *candidate >= 0 && *candidate < size && (total + candidate) % size == 0)
        .map(|padding| padding as u64)
}

/// Time to push `bits` through a link of `rate_kbits`, rounded up to whole ns.
fn bits_duration_ns(bits: u64, rate_kbits: u32) -> SimTime {
    if bits == 0 {
        return 0;
    }
    // kbit/s -> bits per ns is rate / 1e6
    ((bits as u128 * 1_000_000).div_ceil(rate_kbits.max(1) as u128)) as SimTime
}

/// Airtime of a frame: the slow segment at `slow_rate_kbits`, the rest at the
/// frame's assigned data rate.
///
/// A frame without an assigned rate is sent entirely at the slow rate.
pub fn transmission_time_ns(message: &NetworkMessage, slow_rate_kbits: u32) -> SimTime {
    let length = message.length_bits();
    let slow_bits = message.phy.slow_segment_bits.min(length);
    let fast_bits = length - slow_bits;
    let fast_rate = if message.phy.data_rate_kbits > 0 { message.phy.data_rate_kbits } else { slow_rate_kbits };
    bits_duration_ns(slow_bits, slow_rate_kbits) + bits_duration_ns(fast_bits, fast_rate)
}

/// Calculate the path loss (in dB) at a given distance using a log-distance
/// path loss model with log-normal shadowing.
///
/// # Formula
///
/// ```text
/// PL(d) = PL(d₀) + 10 × n × log₁₀(d/d₀) + X_σ
/// where d₀ = 1 meter (reference distance)
/// ```
///
/// # Parameters
///
/// - `distance`: The distance between transmitter and receiver in meters
/// - `params`: Path loss model parameters
/// - `rng`: Source of the shadowing sample
///
/// # Returns
///
/// Path loss in decibels (dB). For distances < 1.0 meter, the reference path loss.
pub fn calculate_path_loss(distance: f32, params: &PathLossParameters, rng: &mut StdRng) -> f32 {
    if distance < 1.0 {
        return params.path_loss_at_reference_distance;
    }
    let path_loss = params.path_loss_at_reference_distance + 10.0 * params.path_loss_exponent * distance.log10();
    let shadowing = if params.shadowing_sigma > 0.0 {
        match Normal::new(0.0_f32, params.shadowing_sigma) {
            Ok(normal) => normal.sample(rng),
            Err(_) => 0.0,
        }
    } else {
        0.0
    };
    path_loss + shadowing
}

/// RSSI(dBm) = P_tx(dBm) - PL(dB). Stochastic when shadowing is enabled.
pub fn calculate_rssi(distance: f32, tx_power_dbm: f32, params: &PathLossParameters, rng: &mut StdRng) -> f32 {
    tx_power_dbm - calculate_path_loss(distance, params, rng)
}

/// Distance at which the mean received power drops to `limit_dbm` (no shadowing).
pub fn calculate_effective_distance(tx_power_dbm: f32, limit_dbm: f32, params: &PathLossParameters) -> f32 {
    let numerator = tx_power_dbm - limit_dbm - params.path_loss_at_reference_distance;
    if numerator <= 0.0 {
        return 0.0;
    }
    10.0_f32.powf(numerator / (10.0 * params.path_loss_exponent))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    fn default_pathloss() -> PathLossParameters {
        PathLossParameters {
            path_loss_exponent: 2.0,
            shadowing_sigma: 0.0,
            path_loss_at_reference_distance: 40.0,
            noise_floor: -120.0,
        }
    }

    #[test]
    fn symbol_size_follows_data_rate() {
        assert_eq!(ofdm_symbol_bits(6000), 48);
        assert_eq!(ofdm_symbol_bits(3000), 24);
        assert_eq!(ofdm_symbol_bits(27000), 216);
    }

    #[test]
    fn padding_is_minimal_and_below_symbol_size() {
        for symbol in [24_u64, 48, 72, 96, 144, 192, 216] {
            for length in 0..500_u64 {
                let overhead = 46;
                let padding = ofdm_padding(length, overhead, symbol).unwrap();
                assert!(padding < symbol);
                let padded = length + overhead + padding;
                assert_eq!(padded % symbol, 0);
                assert!(padded >= length + overhead);
                assert!(padded - (length + overhead) < symbol);
            }
        }
    }

    #[test]
    fn exact_multiple_needs_no_padding() {
        assert_eq!(ofdm_padding(90, 6, 48), Some(0));
    }

    #[test]
    fn zero_symbol_size_has_no_padding() {
        assert_eq!(ofdm_padding(100, 0, 0), None);
    }

    #[test]
    fn transmission_time_uses_both_rates() {
        let mut msg = NetworkMessage::with_bit_string("1".repeat(624));
        msg.phy.slow_segment_bits = 24;
        msg.phy.data_rate_kbits = 6000;
        // 24 bits @ 3 Mbit/s = 8 us, 600 bits @ 6 Mbit/s = 100 us
        assert_eq!(transmission_time_ns(&msg, 3000), 108_000);
    }

    #[test]
    fn transmission_time_rounds_up() {
        let mut msg = NetworkMessage::with_bit_string("1".repeat(1));
        msg.phy.data_rate_kbits = 3000;
        assert_eq!(transmission_time_ns(&msg, 3000), 334);
    }

    #[test]
    fn path_loss_is_deterministic_without_shadowing() {
        let mut rng = StdRng::seed_from_u64(1);
        let p = default_pathloss();
        assert_eq!(calculate_path_loss(0.5, &p, &mut rng), 40.0);
        assert!((calculate_path_loss(100.0, &p, &mut rng) - 80.0).abs() < 1e-4);
        assert!((calculate_rssi(100.0, 20.0, &p, &mut rng) + 60.0).abs() < 1e-4);
    }

    #[test]
    fn shadowing_is_reproducible_with_seed() {
        let mut p = default_pathloss();
        p.shadowing_sigma = 4.0;
        let mut a = StdRng::seed_from_u64(9);
        let mut b = StdRng::seed_from_u64(9);
        assert_eq!(calculate_path_loss(50.0, &p, &mut a), calculate_path_loss(50.0, &p, &mut b));
    }

    #[test]
    fn effective_distance_monotonic_with_tx_power() {
        let pl = default_pathloss();
        let d_low = calculate_effective_distance(0.0, -100.0, &pl);
        let d_high = calculate_effective_distance(20.0, -100.0, &pl);
        assert!(d_low < d_high);
        assert_eq!(calculate_effective_distance(-100.0, -100.0, &pl), 0.0);
    }
}
