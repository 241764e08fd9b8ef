//! Aggregate performance statistics of one simulation run.
//!
//! Tasks record into the single `NetworkStatistics` owned by the `Simulation`.
//! Wired (backhaul) messages are never counted.

use std::fmt::Write as _;

use super::message::{Layer, NetworkMessage};
use super::time::{SimTime, format_time};

/// Incremental mean: `(n * avg + x) / (n + 1)`.
pub fn running_average(average: f64, samples: u64, value: f64) -> f64 {
    (samples as f64 * average + value) / (samples as f64 + 1.0)
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct RunningAverage {
    value: f64,
    samples: u64,
}

impl RunningAverage {
    pub fn update(&mut self, x: f64) {
        self.value = running_average(self.value, self.samples, x);
        self.samples += 1;
    }

    pub fn value(&self) -> f64 {
        self.value
    }

    pub fn samples(&self) -> u64 {
        self.samples
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct NetworkStatistics {
    sent: [u64; 5],
    received: [u64; 5],
    latency_ns: RunningAverage,
    frame_bits: RunningAverage,
    data_rate_kbits: RunningAverage,
    interruptions: u64,
    relayed: u64,
}

fn layer_index(layer: Layer) -> usize {
    match layer {
        Layer::Application => 0,
        Layer::Transport => 1,
        Layer::Network => 2,
        Layer::Link => 3,
        Layer::Physical => 4,
    }
}

impl NetworkStatistics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_sent(&mut self, layer: Layer, message: &NetworkMessage) {
        if !message.wired {
            self.sent[layer_index(layer)] += 1;
        }
    }

    pub fn record_received(&mut self, layer: Layer, message: &NetworkMessage) {
        if !message.wired {
            self.received[layer_index(layer)] += 1;
        }
    }

    /// Frame size and data rate of a frame leaving a PHY.
    pub fn record_frame(&mut self, message: &NetworkMessage) {
        if message.wired {
            return;
        }
        self.frame_bits.update(message.length_bits() as f64);
        self.data_rate_kbits.update(message.phy.data_rate_kbits as f64);
    }

    /// End-to-end latency of a message delivered to an application.
    pub fn record_latency(&mut self, message: &NetworkMessage) {
        if !message.wired {
            self.latency_ns.update(message.latency() as f64);
        }
    }

    pub fn record_interruption(&mut self) {
        self.interruptions += 1;
    }

    pub fn record_relay(&mut self) {
        self.relayed += 1;
    }

    pub fn sent(&self, layer: Layer) -> u64 {
        self.sent[layer_index(layer)]
    }

    pub fn received(&self, layer: Layer) -> u64 {
        self.received[layer_index(layer)]
    }

    pub fn average_latency_ns(&self) -> f64 {
        self.latency_ns.value()
    }

    pub fn latency_samples(&self) -> u64 {
        self.latency_ns.samples()
    }

    pub fn average_frame_bits(&self) -> f64 {
        self.frame_bits.value()
    }

    pub fn average_data_rate_kbits(&self) -> f64 {
        self.data_rate_kbits.value()
    }

    pub fn interruptions(&self) -> u64 {
        self.interruptions
    }

    pub fn relayed(&self) -> u64 {
        self.relayed
    }

    /// Share of PHY receptions that survived interference, in percent.
    pub fn phy_success_rate(&self) -> f64 {
        let received = self.received(Layer::Physical);
        let attempts = received + self.interruptions;
        if attempts == 0 {
            return 0.0;
        }
        received as f64 * 100.0 / attempts as f64
    }

    pub fn summary(&self) -> String {
        let mut out = String::from("Network statistics\n");
        for layer in Layer::ALL {
            let _ = writeln!(out, "  {:<9} sent: {:>8}  received: {:>8}", layer.name(), self.sent(layer), self.received(layer));
        }
        let _ = writeln!(
            out,
            "  Average latency: {} ({} samples)",
            format_time(self.average_latency_ns().round() as SimTime),
            self.latency_samples()
        );
        let _ = writeln!(out, "  Average frame size: {:.1} bits", self.average_frame_bits());
        let _ = writeln!(out, "  Average data rate: {:.1} kbit/s", self.average_data_rate_kbits());
        let _ = writeln!(out, "  Interrupted receptions: {} (PHY success {:.1}%)", self.interruptions, self.phy_success_rate());
        let _ = write!(out, "  Multicast relays: {}", self.relayed);
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn delivered(latency: SimTime) -> NetworkMessage {
        let mut msg = NetworkMessage::with_text("x");
        msg.creation_time = 100;
        msg.receive_time = 100 + latency;
        msg
    }

    #[test]
    fn running_average_matches_incremental_formula() {
        let mut stats = NetworkStatistics::new();
        for latency in [10, 20, 30] {
            stats.record_latency(&delivered(latency));
        }
        assert_eq!(stats.average_latency_ns(), 20.0);
        assert_eq!(stats.latency_samples(), 3);
    }

    #[test]
    fn every_update_follows_running_average() {
        let mut avg = RunningAverage::default();
        let mut expected = 0.0;
        for (n, x) in [4.0, 8.0, 15.0, 16.0, 23.0, 42.0].into_iter().enumerate() {
            expected = (n as f64 * expected + x) / (n as f64 + 1.0);
            avg.update(x);
            assert_eq!(avg.value(), expected);
        }
    }

    #[test]
    fn wired_messages_are_not_counted() {
        let mut stats = NetworkStatistics::new();
        let mut msg = delivered(50);
        msg.wired = true;
        stats.record_sent(Layer::Network, &msg);
        stats.record_received(Layer::Network, &msg);
        stats.record_latency(&msg);
        stats.record_frame(&msg);
        assert_eq!(stats.sent(Layer::Network), 0);
        assert_eq!(stats.received(Layer::Network), 0);
        assert_eq!(stats.latency_samples(), 0);
        assert_eq!(stats.average_frame_bits(), 0.0);
    }

    #[test]
    fn per_layer_counters_are_independent() {
        let mut stats = NetworkStatistics::new();
        let msg = delivered(0);
        stats.record_sent(Layer::Application, &msg);
        stats.record_sent(Layer::Physical, &msg);
        stats.record_sent(Layer::Physical, &msg);
        stats.record_received(Layer::Link, &msg);
        assert_eq!(stats.sent(Layer::Application), 1);
        assert_eq!(stats.sent(Layer::Physical), 2);
        assert_eq!(stats.received(Layer::Link), 1);
        assert_eq!(stats.received(Layer::Physical), 0);
    }

    #[test]
    fn success_rate_and_summary() {
        let mut stats = NetworkStatistics::new();
        let msg = delivered(0);
        stats.record_received(Layer::Physical, &msg);
        stats.record_received(Layer::Physical, &msg);
        stats.record_received(Layer::Physical, &msg);
        stats.record_interruption();
        assert_eq!(stats.phy_success_rate(), 75.0);
        let summary = stats.summary();
        assert!(summary.contains("Interrupted receptions: 1"));
        assert!(summary.contains("PHY"));
    }
}
