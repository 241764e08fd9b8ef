//! Buffered link task with simulated robust header compression.
//!
//! Frames are compressed on the way down (network and transport headers
//! divided by the configured factors) and restored on the way up. There is no
//! contention: a queued frame goes to PHY as soon as the node's sending
//! channels are free.

use std::collections::VecDeque;

use crate::common::settings::CompressionSettings;

use super::super::event::{EventKind, NetworkEvent, ScheduledEvent};
use super::super::message::{CompressionResidual, Layer, NetworkMessage};
use super::super::time::SimTime;
use super::TaskContext;
use super::simple::{link_prepare, link_receive};

/// Shrink network and transport headers by the compression factors.
///
/// The integer-division remainders are kept on the message so `decompress`
/// restores the exact original counters. Compressing twice is a no-op.
pub fn compress(message: &mut NetworkMessage, factors: &CompressionSettings) {
    if message.compression.is_some() {
        return;
    }
    let network = message.layer_bits(Layer::Network);
    let transport = message.layer_bits(Layer::Transport);
    let network_factor = factors.network_factor.max(1);
    let transport_factor = factors.transport_factor.max(1);

    message.set_layer_bits(Layer::Network, network / network_factor);
    message.set_layer_bits(Layer::Transport, transport / transport_factor);
    message.compression = Some(CompressionResidual {
        network: network % network_factor,
        transport: transport % transport_factor,
    });
}

/// Restore headers shrunk by `compress`. Returns false if the message was not compressed.
pub fn decompress(message: &mut NetworkMessage, factors: &CompressionSettings) -> bool {
    let Some(residual) = message.compression.take() else {
        return false;
    };
    let network = message.layer_bits(Layer::Network) * factors.network_factor.max(1) + residual.network;
    let transport = message.layer_bits(Layer::Transport) * factors.transport_factor.max(1) + residual.transport;
    message.set_layer_bits(Layer::Network, network);
    message.set_layer_bits(Layer::Transport, transport);
    true
}

#[derive(Debug, Default)]
pub struct RohcLinkTask {
    /// New frames enter at the front; the back is sent next.
    queue: VecDeque<NetworkMessage>,
    forward_until: Option<SimTime>,
}

impl RohcLinkTask {
    pub const HANDLED: &'static [EventKind] = &[EventKind::LinkSend, EventKind::LinkReceive, EventKind::LinkCheckChannelStatus];

    pub fn new() -> Self {
        Self::default()
    }

    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }

    pub fn handle(&mut self, event: &NetworkEvent, ctx: &mut TaskContext<'_>) -> Vec<ScheduledEvent> {
        match event.kind {
            EventKind::LinkSend => {
                let Some(mut message) = event.message.clone() else {
                    log::warn!("[{}] LinkSend without a message, ignoring", ctx.node_id());
                    return Vec::new();
                };
                compress(&mut message, &ctx.settings.compression);
                link_prepare(ctx, &mut message);
                if message.wired {
                    return vec![ctx.forward(ctx.settings.delays.link_physical, EventKind::PhySendStart, message)];
                }
                self.queue.push_front(message);
                vec![ctx.immediately(EventKind::LinkCheckChannelStatus)]
            }
            EventKind::LinkReceive => {
                let Some(mut message) = event.message.clone() else {
                    return Vec::new();
                };
                if !decompress(&mut message, &ctx.settings.compression) {
                    log::debug!("[{}] ROHC received uncompressed frame {}", ctx.node_id(), message);
                }
                link_receive(ctx, message).into_iter().collect()
            }
            EventKind::LinkCheckChannelStatus => self.check_channel(ctx),
            _ => Vec::new(),
        }
    }

    fn check_channel(&mut self, ctx: &mut TaskContext<'_>) -> Vec<ScheduledEvent> {
        if self.forward_until.is_some_and(|until| ctx.now < until) {
            return Vec::new();
        }
        self.forward_until = None;
        if self.queue.is_empty() || ctx.channel_busy() {
            return Vec::new();
        }
        let Some(message) = self.queue.pop_back() else {
            return Vec::new();
        };
        let delay = ctx.settings.delays.link_physical.sample(ctx.rng);
        self.forward_until = Some(ctx.now + delay);
        vec![
            ctx.after(delay, NetworkEvent::for_node(ctx.node_id(), EventKind::PhySendStart).with_message(message)),
            ctx.after(delay, NetworkEvent::for_node(ctx.node_id(), EventKind::LinkCheckChannelStatus)),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::super::simple::test_support::Harness;
    use super::*;
    use crate::common::settings::NetworkSettings;

    fn with_headers(network: u64, transport: u64) -> NetworkMessage {
        let mut msg = NetworkMessage::with_text("payload");
        msg.add_layer_bits(Layer::Transport, transport);
        msg.add_layer_bits(Layer::Network, network);
        msg
    }

    #[test]
    fn compression_round_trip_is_exact() {
        let factors = CompressionSettings {
            network_factor: 10,
            transport_factor: 8,
        };
        for (network, transport) in [(320, 64), (327, 71), (9, 7), (0, 0)] {
            let original = with_headers(network, transport);
            let mut msg = original.clone();
            compress(&mut msg, &factors);
            assert_eq!(msg.layer_bits(Layer::Network), network / 10);
            assert_eq!(msg.layer_bits(Layer::Transport), transport / 8);
            assert!(msg.is_length_consistent());
            assert!(decompress(&mut msg, &factors));
            assert_eq!(msg, original);
        }
    }

    #[test]
    fn compression_reduces_length_by_removed_bits() {
        let factors = CompressionSettings {
            network_factor: 10,
            transport_factor: 8,
        };
        let mut msg = with_headers(320, 64);
        let before = msg.length_bits();
        compress(&mut msg, &factors);
        assert_eq!(before - msg.length_bits(), (320 - 32) + (64 - 8));
        compress(&mut msg, &factors);
        assert_eq!(msg.layer_bits(Layer::Network), 32);
    }

    #[test]
    fn uncompressed_frames_pass_unchanged() {
        let factors = CompressionSettings {
            network_factor: 10,
            transport_factor: 8,
        };
        let mut msg = with_headers(320, 64);
        assert!(!decompress(&mut msg, &factors));
        assert_eq!(msg.layer_bits(Layer::Network), 320);
    }

    #[test]
    fn sends_when_channel_free_and_waits_when_busy() {
        let mut h = Harness::new(NetworkSettings::default());
        let mut task = RohcLinkTask::new();
        let send = NetworkEvent::for_node(0, EventKind::LinkSend).with_message(with_headers(320, 64));

        h.node.increment_sending(0);
        let out = task.handle(&send, &mut h.ctx());
        assert_eq!(out[0].event.kind, EventKind::LinkCheckChannelStatus);
        assert!(task.handle(&out[0].event, &mut h.ctx()).is_empty());
        assert_eq!(task.queue_len(), 1);

        h.node.decrement_sending(0);
        let out = task.handle(&out[0].event, &mut h.ctx());
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].event.kind, EventKind::PhySendStart);
        assert_eq!(out[1].event.kind, EventKind::LinkCheckChannelStatus);
        assert_eq!(out[1].at, out[0].at);
        let frame = out[0].event.message.clone().unwrap();
        assert!(frame.compression.is_some());
        assert_eq!(frame.layer_bits(Layer::Network), 32);
        assert!(frame.is_length_consistent());
        assert_eq!(task.queue_len(), 0);
    }

    #[test]
    fn receive_restores_headers_before_link_processing() {
        let mut h = Harness::new(NetworkSettings::default());
        let mut task = RohcLinkTask::new();
        let mut frame = with_headers(320, 64);
        compress(&mut frame, &h.settings.compression);
        frame.mac_sender = "02:00:00:00:00:09".to_string();
        frame.mac_receiver = crate::common::address::BROADCAST_MAC.to_string();
        let out = task.handle(&NetworkEvent::for_node(0, EventKind::LinkReceive).with_message(frame), &mut h.ctx());
        let up = out[0].event.message.clone().unwrap();
        assert_eq!(up.layer_bits(Layer::Network), 320);
        assert_eq!(up.layer_bits(Layer::Transport), 64);
        assert!(up.compression.is_none());
    }
}
