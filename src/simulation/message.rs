//! Simulated network message.
//!
//! A `NetworkMessage` is the single record that travels down one node's stack,
//! across the channel and up the receivers' stacks. Every layer accounts for
//! the header bits it adds (send path) or removes (receive path) through the
//! methods here, which keep the total frame length equal to
//! `payload_bits + Σ additional bits` at all times. Transmission time and all
//! frame-size statistics are derived from that total.
//!
//! Messages are plain owned values: broadcasting to several receivers clones
//! the message once per receiver so no two nodes ever share one instance.

use std::fmt;

use super::time::SimTime;
use super::types::ChannelId;

/// Protocol layer a header-bit counter belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Layer {
    Application,
    Transport,
    Network,
    Link,
    Physical,
}

impl Layer {
    pub const ALL: [Layer; 5] = [Layer::Application, Layer::Transport, Layer::Network, Layer::Link, Layer::Physical];

    pub fn name(self) -> &'static str {
        match self {
            Layer::Application => "APP",
            Layer::Transport => "TRANSPORT",
            Layer::Network => "NET",
            Layer::Link => "LINK",
            Layer::Physical => "PHY",
        }
    }
}

/// Additional (header/trailer/padding) bits per layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LayerBits {
    pub application: u64,
    pub transport: u64,
    pub network: u64,
    pub link: u64,
    pub physical: u64,
}

impl LayerBits {
    pub fn get(&self, layer: Layer) -> u64 {
        match layer {
            Layer::Application => self.application,
            Layer::Transport => self.transport,
            Layer::Network => self.network,
            Layer::Link => self.link,
            Layer::Physical => self.physical,
        }
    }

    fn slot(&mut self, layer: Layer) -> &mut u64 {
        match layer {
            Layer::Application => &mut self.application,
            Layer::Transport => &mut self.transport,
            Layer::Network => &mut self.network,
            Layer::Link => &mut self.link,
            Layer::Physical => &mut self.physical,
        }
    }

    pub fn total(&self) -> u64 {
        self.application + self.transport + self.network + self.link + self.physical
    }
}

/// Bits dropped by integer division during header compression.
///
/// Kept next to the compressed counters so the decompressor restores the
/// original header sizes exactly. Not part of the on-air frame length.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CompressionResidual {
    pub network: u64,
    pub transport: u64,
}

/// PHY parameters assigned to a frame when it is handed to the radio.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PhyParameters {
    pub data_rate_kbits: u32,
    pub bits_per_signal: u32,
    pub code_rate: f64,
    pub channel_id: ChannelId,
    /// Leading bits transmitted at the slow (robust) rate.
    pub slow_segment_bits: u64,
}

impl Default for PhyParameters {
    fn default() -> Self {
        Self {
            data_rate_kbits: 0,
            bits_per_signal: 0,
            code_rate: 0.0,
            channel_id: 0,
            slow_segment_bits: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct NetworkMessage {
    /// Human readable text or a packed '0'/'1' bit string (see `common::encoding`).
    pub content: String,
    payload_bits: u64,
    additional_bits: LayerBits,
    length_bits: u64,

    // transport
    pub sequence_number: u32,
    pub source_port: u16,
    pub destination_port: u16,

    // network
    pub ipv6_sender: String,
    pub ipv6_receiver: String,
    pub hop_limit: u8,

    // link
    pub mac_sender: String,
    pub mac_receiver: String,
    pub mac_sequence_number: u32,

    pub phy: PhyParameters,

    pub creation_time: SimTime,
    pub receive_time: SimTime,

    /// Exempt from channel contention and statistics (fixed backhaul copy).
    pub wired: bool,
    /// `Some` while network/transport headers are compressed.
    pub compression: Option<CompressionResidual>,
}

impl NetworkMessage {
    /// Message whose content is text; every character byte counts 8 bits.
    pub fn with_text(content: &str) -> Self {
        Self::build(content.to_string(), content.len() as u64 * 8)
    }

    /// Message whose content is a packed bit string; every character is one bit.
    pub fn with_bit_string(bits: String) -> Self {
        let payload_bits = bits.len() as u64;
        Self::build(bits, payload_bits)
    }

    fn build(content: String, payload_bits: u64) -> Self {
        Self {
            content,
            payload_bits,
            additional_bits: LayerBits::default(),
            length_bits: payload_bits,
            sequence_number: 0,
            source_port: 0,
            destination_port: 0,
            ipv6_sender: String::new(),
            ipv6_receiver: String::new(),
            hop_limit: 0,
            mac_sender: String::new(),
            mac_receiver: String::new(),
            mac_sequence_number: 0,
            phy: PhyParameters::default(),
            creation_time: 0,
            receive_time: 0,
            wired: false,
            compression: None,
        }
    }

    pub fn payload_bits(&self) -> u64 {
        self.payload_bits
    }

    pub fn length_bits(&self) -> u64 {
        self.length_bits
    }

    pub fn additional_bits(&self) -> &LayerBits {
        &self.additional_bits
    }

    pub fn layer_bits(&self, layer: Layer) -> u64 {
        self.additional_bits.get(layer)
    }

    /// Add header bits for `layer`, growing the total length by the same amount.
    pub fn add_layer_bits(&mut self, layer: Layer, bits: u64) {
        *self.additional_bits.slot(layer) += bits;
        self.length_bits += bits;
    }

    /// Remove up to `bits` header bits for `layer`. Returns the bits actually removed.
    pub fn remove_layer_bits(&mut self, layer: Layer, bits: u64) -> u64 {
        let slot = self.additional_bits.slot(layer);
        let removed = bits.min(*slot);
        *slot -= removed;
        self.length_bits -= removed;
        removed
    }

    /// Replace the `layer` counter, adjusting the total length accordingly.
    pub fn set_layer_bits(&mut self, layer: Layer, bits: u64) {
        let slot = self.additional_bits.slot(layer);
        let old = *slot;
        *slot = bits;
        self.length_bits = self.length_bits - old + bits;
    }

    /// Drop link and PHY overhead so it can be recomputed on the next hop.
    pub fn strip_link_and_physical(&mut self) {
        self.set_layer_bits(Layer::Link, 0);
        self.set_layer_bits(Layer::Physical, 0);
        self.phy = PhyParameters::default();
    }

    /// Whether the total length equals payload plus all per-layer counters.
    pub fn is_length_consistent(&self) -> bool {
        self.length_bits == self.payload_bits + self.additional_bits.total()
    }

    pub fn latency(&self) -> SimTime {
        self.receive_time.saturating_sub(self.creation_time)
    }
}

impl fmt::Display for NetworkMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "msg(seq: {}, {} -> {}, {} bits{})",
            self.sequence_number,
            self.ipv6_sender,
            self.ipv6_receiver,
            self.length_bits,
            if self.wired { ", wired" } else { "" }
        )
    }
}
