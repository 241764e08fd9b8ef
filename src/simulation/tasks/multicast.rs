//! Multicast relay NET task for road-side and cellular infrastructure.
//!
//! Unicast traffic is handled like the simple NET task. A received multicast
//! from another node is not passed up; it is re-emitted one hop further as a
//! wireless copy, plus a wired copy over the backhaul when it arrived over the
//! air. Each relay remembers what it already relayed and honours the hop
//! limit, so flooding terminates.

use std::collections::VecDeque;

use crate::common::address::is_multicast_ipv6;

use super::super::event::{EventKind, NetworkEvent, ScheduledEvent};
use super::super::message::NetworkMessage;
use super::TaskContext;
use super::simple::{net_accepts, net_deliver_up, net_send};

/// Number of `(sender, sequence)` pairs remembered for duplicate suppression.
const RELAY_MEMORY: usize = 256;

#[derive(Debug, Default)]
pub struct MulticastRelayTask {
    relayed: VecDeque<(String, u32)>,
}

impl MulticastRelayTask {
    pub const HANDLED: &'static [EventKind] = &[EventKind::NetSend, EventKind::NetReceive, EventKind::NetMulticast];

    pub fn new() -> Self {
        Self::default()
    }

    pub fn handle(&mut self, event: &NetworkEvent, ctx: &mut TaskContext<'_>) -> Vec<ScheduledEvent> {
        let Some(message) = event.message.clone() else {
            log::warn!("[{}] {:?} without a message, ignoring", ctx.node_id(), event.kind);
            return Vec::new();
        };
        match event.kind {
            EventKind::NetSend => vec![net_send(ctx, message)],
            EventKind::NetReceive => {
                if !net_accepts(ctx, &message) {
                    return Vec::new();
                }
                ctx.node.record_ipv6_reception(ctx.now, &message);
                if is_multicast_ipv6(&message.ipv6_receiver) {
                    vec![ctx.after(0, NetworkEvent::for_node(ctx.node_id(), EventKind::NetMulticast).with_message(message))]
                } else {
                    vec![net_deliver_up(ctx, message)]
                }
            }
            EventKind::NetMulticast => self.relay(ctx, message),
            _ => Vec::new(),
        }
    }

    fn already_relayed(&self, key: &(String, u32)) -> bool {
        self.relayed.iter().any(|k| k == key)
    }

    fn remember(&mut self, key: (String, u32)) {
        if self.relayed.len() >= RELAY_MEMORY {
            self.relayed.pop_front();
        }
        self.relayed.push_back(key);
    }

    fn relay(&mut self, ctx: &mut TaskContext<'_>, mut message: NetworkMessage) -> Vec<ScheduledEvent> {
        if message.ipv6_sender == ctx.node.ipv6_address() {
            return Vec::new();
        }
        let key = (message.ipv6_sender.clone(), message.sequence_number);
        if self.already_relayed(&key) {
            log::trace!("[{}] Multicast {} already relayed", ctx.node_id(), message);
            return Vec::new();
        }
        if message.hop_limit <= 1 {
            log::debug!("[{}] Multicast {} reached its hop limit", ctx.node_id(), message);
            return Vec::new();
        }
        self.remember(key);

        message.hop_limit -= 1;
        message.strip_link_and_physical();
        let arrived_wired = message.wired;
        message.wired = false;
        ctx.statistics.record_relay();
        log::debug!("[{}] Relaying multicast {} (hop limit {})", ctx.node_id(), message, message.hop_limit);

        let mut out = Vec::with_capacity(2);
        if !arrived_wired {
            let mut wired = message.clone();
            wired.wired = true;
            out.push(ctx.forward(ctx.settings.delays.network_link, EventKind::LinkSend, wired));
        }
        out.push(ctx.forward(ctx.settings.delays.network_link, EventKind::LinkSend, message));
        out
    }
}

#[cfg(test)]
mod tests {
    use super::super::simple::test_support::Harness;
    use super::*;
    use crate::common::address::ALL_NODES_MULTICAST;
    use crate::common::settings::NetworkSettings;
    use crate::simulation::message::Layer;

    fn multicast(sender: &str, seq: u32) -> NetworkMessage {
        let mut msg = NetworkMessage::with_text("beacon");
        msg.ipv6_sender = sender.to_string();
        msg.ipv6_receiver = ALL_NODES_MULTICAST.to_string();
        msg.sequence_number = seq;
        msg.hop_limit = 8;
        msg.add_layer_bits(Layer::Network, 320);
        msg.add_layer_bits(Layer::Link, 272);
        msg.add_layer_bits(Layer::Physical, 70);
        msg
    }

    fn receive(task: &mut MulticastRelayTask, h: &mut Harness, msg: NetworkMessage) -> Vec<ScheduledEvent> {
        let out = task.handle(&NetworkEvent::for_node(0, EventKind::NetReceive).with_message(msg), &mut h.ctx());
        out.into_iter()
            .flat_map(|e| {
                if e.event.kind == EventKind::NetMulticast {
                    task.handle(&e.event, &mut h.ctx())
                } else {
                    vec![e]
                }
            })
            .collect()
    }

    #[test]
    fn wireless_multicast_yields_one_wired_and_one_wireless_copy() {
        let mut h = Harness::new(NetworkSettings::default());
        let mut task = MulticastRelayTask::new();
        let out = receive(&mut task, &mut h, multicast("fd00:0:0:0:0:0:0:9", 1));
        assert_eq!(out.len(), 2);
        assert!(out.iter().all(|e| e.event.kind == EventKind::LinkSend));
        let copies: Vec<NetworkMessage> = out.into_iter().map(|e| e.event.message.unwrap()).collect();
        assert_eq!(copies.iter().filter(|m| m.wired).count(), 1);
        for copy in &copies {
            assert_eq!(copy.hop_limit, 7);
            assert_eq!(copy.layer_bits(Layer::Link), 0);
            assert_eq!(copy.layer_bits(Layer::Physical), 0);
            assert_eq!(copy.layer_bits(Layer::Network), 320);
            assert!(copy.is_length_consistent());
            assert_eq!(copy.ipv6_sender, "fd00:0:0:0:0:0:0:9");
        }
        assert_eq!(h.statistics.relayed(), 1);
    }

    #[test]
    fn wired_arrival_is_relayed_wireless_only() {
        let mut h = Harness::new(NetworkSettings::default());
        let mut task = MulticastRelayTask::new();
        let mut msg = multicast("fd00:0:0:0:0:0:0:9", 1);
        msg.wired = true;
        let out = receive(&mut task, &mut h, msg);
        assert_eq!(out.len(), 1);
        assert!(!out[0].event.message.as_ref().unwrap().wired);
    }

    #[test]
    fn own_and_duplicate_multicasts_are_not_relayed() {
        let mut h = Harness::new(NetworkSettings::default());
        let mut task = MulticastRelayTask::new();
        let own = h.node.ipv6_address().to_string();
        assert!(receive(&mut task, &mut h, multicast(&own, 1)).is_empty());

        assert_eq!(receive(&mut task, &mut h, multicast("fd00:0:0:0:0:0:0:9", 4)).len(), 2);
        assert!(receive(&mut task, &mut h, multicast("fd00:0:0:0:0:0:0:9", 4)).is_empty());
        assert_eq!(receive(&mut task, &mut h, multicast("fd00:0:0:0:0:0:0:9", 5)).len(), 2);
    }

    #[test]
    fn exhausted_hop_limit_stops_relay() {
        let mut h = Harness::new(NetworkSettings::default());
        let mut task = MulticastRelayTask::new();
        let mut msg = multicast("fd00:0:0:0:0:0:0:9", 1);
        msg.hop_limit = 1;
        assert!(receive(&mut task, &mut h, msg).is_empty());
    }

    #[test]
    fn unicast_goes_up_the_stack() {
        let mut h = Harness::new(NetworkSettings::default());
        let mut task = MulticastRelayTask::new();
        let mut msg = multicast("fd00:0:0:0:0:0:0:9", 1);
        msg.ipv6_receiver = h.node.ipv6_address().to_string();
        let out = receive(&mut task, &mut h, msg);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].event.kind, EventKind::TransportReceive);
    }
}
