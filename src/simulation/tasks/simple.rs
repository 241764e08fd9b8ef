//! Pass-through APP/TRANSPORT/NET/LINK/PHY tasks.
//!
//! On the send path each layer adds its header bits, fills in its addressing
//! fields and hands the message one layer down after a jittered delay. On the
//! receive path it validates addressing and hands the message up. The
//! `pub(crate)` helpers here are the layer logic the specialised tasks
//! (CSMA, ROHC, interference PHY, multicast relay) share.

use rand::Rng;

use crate::common::address::{ALL_NODES_MULTICAST, BROADCAST_MAC, is_broadcast_mac, is_multicast_ipv6};
use crate::common::encoding::encode_floats;

use super::super::event::{EventKind, NetworkEvent, ScheduledEvent};
use super::super::message::{Layer, NetworkMessage, PhyParameters};
use super::super::signal_calculations::{ofdm_padding, ofdm_symbol_bits, transmission_time_ns};
use super::super::types::ChannelId;
use super::TaskContext;

/// Destination port of application beacons.
pub const BEACON_PORT: u16 = 2001;

fn take_message(event: &NetworkEvent, ctx: &TaskContext<'_>) -> Option<NetworkMessage> {
    match &event.message {
        Some(message) => Some(message.clone()),
        None => {
            log::warn!("[{}] {:?} without a message, ignoring", ctx.node_id(), event.kind);
            None
        }
    }
}

// ---------------------------------------------------------------------------
// APP
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
pub struct AppSimpleTask {
    beacons_sent: u64,
}

impl AppSimpleTask {
    pub const HANDLED: &'static [EventKind] = &[EventKind::AppSend, EventKind::AppReceive, EventKind::AppBeacon];

    pub fn new() -> Self {
        Self::default()
    }

    pub fn beacons_sent(&self) -> u64 {
        self.beacons_sent
    }

    pub fn handle(&mut self, event: &NetworkEvent, ctx: &mut TaskContext<'_>) -> Vec<ScheduledEvent> {
        match event.kind {
            EventKind::AppSend => match take_message(event, ctx) {
                Some(message) => vec![app_send(ctx, message)],
                None => Vec::new(),
            },
            EventKind::AppReceive => {
                if let Some(message) = take_message(event, ctx) {
                    app_receive(ctx, message);
                }
                Vec::new()
            }
            EventKind::AppBeacon => self.beacon(ctx),
            _ => Vec::new(),
        }
    }

    /// Send the bound object's sensor values to all nodes and re-arm the timer.
    fn beacon(&mut self, ctx: &mut TaskContext<'_>) -> Vec<ScheduledEvent> {
        let Some(interval) = ctx.settings.beacon_interval_ns else {
            return Vec::new();
        };

        let mut message = NetworkMessage::with_bit_string(encode_floats(&ctx.node.object().sensor_values()));
        message.ipv6_receiver = ALL_NODES_MULTICAST.to_string();
        message.source_port = BEACON_PORT;
        message.destination_port = BEACON_PORT;
        self.beacons_sent += 1;

        let next = ctx.after(interval, NetworkEvent::for_node(ctx.node_id(), EventKind::AppBeacon));
        vec![app_send(ctx, message), next]
    }
}

pub(crate) fn app_send(ctx: &mut TaskContext<'_>, mut message: NetworkMessage) -> ScheduledEvent {
    message.creation_time = ctx.now;
    if message.ipv6_receiver.is_empty() {
        message.ipv6_receiver = ALL_NODES_MULTICAST.to_string();
    }
    message.add_layer_bits(Layer::Application, ctx.settings.header_bits.application);
    ctx.statistics.record_sent(Layer::Application, &message);
    log::trace!("[{}] APP send {}", ctx.node_id(), message);
    ctx.forward(ctx.settings.delays.app_transport, EventKind::TransportSend, message)
}

pub(crate) fn app_receive(ctx: &mut TaskContext<'_>, mut message: NetworkMessage) {
    message.remove_layer_bits(Layer::Application, ctx.settings.header_bits.application);
    message.receive_time = ctx.now;
    ctx.statistics.record_received(Layer::Application, &message);
    ctx.statistics.record_latency(&message);
    log::debug!("[{}] APP delivered {} after {} ns", ctx.node_id(), message, message.latency());
    ctx.node.deliver(message);
}

// ---------------------------------------------------------------------------
// TRANSPORT
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
pub struct TransportSimpleTask {
    next_sequence: u32,
}

impl TransportSimpleTask {
    pub const HANDLED: &'static [EventKind] = &[EventKind::TransportSend, EventKind::TransportReceive];

    pub fn new() -> Self {
        Self::default()
    }

    pub fn handle(&mut self, event: &NetworkEvent, ctx: &mut TaskContext<'_>) -> Vec<ScheduledEvent> {
        let Some(mut message) = take_message(event, ctx) else {
            return Vec::new();
        };
        match event.kind {
            EventKind::TransportSend => {
                message.sequence_number = self.next_sequence;
                self.next_sequence = self.next_sequence.wrapping_add(1);
                message.add_layer_bits(Layer::Transport, ctx.settings.header_bits.transport);
                ctx.statistics.record_sent(Layer::Transport, &message);
                vec![ctx.forward(ctx.settings.delays.transport_network, EventKind::NetSend, message)]
            }
            EventKind::TransportReceive => {
                message.remove_layer_bits(Layer::Transport, ctx.settings.header_bits.transport);
                ctx.statistics.record_received(Layer::Transport, &message);
                vec![ctx.forward(ctx.settings.delays.app_transport, EventKind::AppReceive, message)]
            }
            _ => Vec::new(),
        }
    }
}

// ---------------------------------------------------------------------------
// NET
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
pub struct NetSimpleTask;

impl NetSimpleTask {
    pub const HANDLED: &'static [EventKind] = &[EventKind::NetSend, EventKind::NetReceive];

    pub fn new() -> Self {
        Self
    }

    pub fn handle(&mut self, event: &NetworkEvent, ctx: &mut TaskContext<'_>) -> Vec<ScheduledEvent> {
        let Some(message) = take_message(event, ctx) else {
            return Vec::new();
        };
        match event.kind {
            EventKind::NetSend => vec![net_send(ctx, message)],
            EventKind::NetReceive => {
                if !net_accepts(ctx, &message) {
                    return Vec::new();
                }
                ctx.node.record_ipv6_reception(ctx.now, &message);
                vec![net_deliver_up(ctx, message)]
            }
            _ => Vec::new(),
        }
    }
}

pub(crate) fn net_send(ctx: &mut TaskContext<'_>, mut message: NetworkMessage) -> ScheduledEvent {
    message.ipv6_sender = ctx.node.ipv6_address().to_string();
    message.hop_limit = ctx.settings.hop_limit;
    message.add_layer_bits(Layer::Network, ctx.settings.header_bits.network);
    ctx.statistics.record_sent(Layer::Network, &message);
    ctx.forward(ctx.settings.delays.network_link, EventKind::LinkSend, message)
}

/// Unicast to this node or multicast, and not sent by this node.
pub(crate) fn net_accepts(ctx: &TaskContext<'_>, message: &NetworkMessage) -> bool {
    let own = ctx.node.ipv6_address();
    if message.ipv6_sender == own {
        log::trace!("[{}] NET dropping own message {}", ctx.node_id(), message);
        return false;
    }
    if message.ipv6_receiver == own || is_multicast_ipv6(&message.ipv6_receiver) {
        return true;
    }
    log::trace!("[{}] NET dropping message for {}", ctx.node_id(), message.ipv6_receiver);
    false
}

pub(crate) fn net_deliver_up(ctx: &mut TaskContext<'_>, mut message: NetworkMessage) -> ScheduledEvent {
    message.remove_layer_bits(Layer::Network, ctx.settings.header_bits.network);
    ctx.statistics.record_received(Layer::Network, &message);
    ctx.forward(ctx.settings.delays.transport_network, EventKind::TransportReceive, message)
}

// ---------------------------------------------------------------------------
// LINK
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
pub struct LinkSimpleTask;

impl LinkSimpleTask {
    pub const HANDLED: &'static [EventKind] = &[EventKind::LinkSend, EventKind::LinkReceive];

    pub fn new() -> Self {
        Self
    }

    pub fn handle(&mut self, event: &NetworkEvent, ctx: &mut TaskContext<'_>) -> Vec<ScheduledEvent> {
        let Some(mut message) = take_message(event, ctx) else {
            return Vec::new();
        };
        match event.kind {
            EventKind::LinkSend => {
                link_prepare(ctx, &mut message);
                vec![ctx.forward(ctx.settings.delays.link_physical, EventKind::PhySendStart, message)]
            }
            EventKind::LinkReceive => link_receive(ctx, message).into_iter().collect(),
            _ => Vec::new(),
        }
    }
}

/// Fill the link header: MAC sender, resolved MAC receiver, random sequence number.
pub(crate) fn link_prepare(ctx: &mut TaskContext<'_>, message: &mut NetworkMessage) {
    message.mac_sender = ctx.node.mac_address().to_string();
    message.mac_receiver = if is_multicast_ipv6(&message.ipv6_receiver) {
        BROADCAST_MAC.to_string()
    } else {
        ctx.node
            .resolve_mac(&message.ipv6_receiver, ctx.now, ctx.settings.hop_limit)
            .unwrap_or_else(|| BROADCAST_MAC.to_string())
    };
    message.mac_sequence_number = ctx.rng.r#gen();
    message.add_layer_bits(Layer::Link, ctx.settings.header_bits.link);
    ctx.statistics.record_sent(Layer::Link, message);
}

/// Unicast to this node or broadcast, and not sent by this node.
pub(crate) fn link_accepts(ctx: &TaskContext<'_>, message: &NetworkMessage) -> bool {
    let own = ctx.node.mac_address();
    if message.mac_sender == own {
        return false;
    }
    message.mac_receiver == own || is_broadcast_mac(&message.mac_receiver)
}

/// Validate, record and hand a received frame to NET.
pub(crate) fn link_receive(ctx: &mut TaskContext<'_>, mut message: NetworkMessage) -> Option<ScheduledEvent> {
    if !link_accepts(ctx, &message) {
        log::trace!("[{}] LINK dropping frame for {}", ctx.node_id(), message.mac_receiver);
        return None;
    }
    ctx.node.record_mac_reception(ctx.now, &message);
    message.remove_layer_bits(Layer::Link, ctx.settings.header_bits.link);
    ctx.statistics.record_received(Layer::Link, &message);
    Some(ctx.forward(ctx.settings.delays.network_link, EventKind::NetReceive, message))
}

// ---------------------------------------------------------------------------
// PHY
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
pub struct PhySimpleTask;

impl PhySimpleTask {
    pub const HANDLED: &'static [EventKind] = &[
        EventKind::PhySendStart,
        EventKind::PhySendEnd,
        EventKind::PhyReceiveMessageEnd,
        EventKind::PhyReceiveDirect,
    ];

    pub fn new() -> Self {
        Self
    }

    pub fn handle(&mut self, event: &NetworkEvent, ctx: &mut TaskContext<'_>) -> Vec<ScheduledEvent> {
        match event.kind {
            EventKind::PhySendStart => {
                let Some(mut message) = take_message(event, ctx) else {
                    return Vec::new();
                };
                if message.wired {
                    return vec![ctx.after(0, NetworkEvent::transmit(ctx.node_id(), message))];
                }
                let channel = phy_prepare(ctx, &mut message);
                let airtime = transmission_time_ns(&message, ctx.settings.phy.slow_data_rate_kbits);
                let mut out = vec![ctx.after(0, NetworkEvent::transmit(ctx.node_id(), message))];
                if !ctx.settings.phy.cellular {
                    out.push(ctx.after(airtime, NetworkEvent::for_node(ctx.node_id(), EventKind::PhySendEnd).on_channel(channel)));
                }
                out
            }
            EventKind::PhySendEnd => vec![ctx.immediately(EventKind::LinkCheckChannelStatus)],
            EventKind::PhyReceiveMessageEnd | EventKind::PhyReceiveDirect => match take_message(event, ctx) {
                Some(message) => vec![phy_deliver_up(ctx, message)],
                None => Vec::new(),
            },
            _ => Vec::new(),
        }
    }
}

/// Assign channel and modulation, add the PHY header and OFDM padding.
///
/// Records the frame in the statistics. Returns the channel the frame goes out on.
pub(crate) fn phy_prepare(ctx: &mut TaskContext<'_>, message: &mut NetworkMessage) -> ChannelId {
    let channel = ctx.sending_channels().first().copied().unwrap_or(0);
    let index = ctx.channel_model.compute_modulation_index(&*ctx.node);
    let (data_rate_kbits, bits_per_signal, code_rate) = match ctx.settings.modulation(index) {
        Some(m) => (m.data_rate_kbits, m.bits_per_signal, m.code_rate),
        None => (ctx.settings.phy.slow_data_rate_kbits, 1, 0.5),
    };
    message.phy = PhyParameters {
        data_rate_kbits,
        bits_per_signal,
        code_rate,
        channel_id: channel,
        slow_segment_bits: ctx.settings.phy.slow_segment_bits,
    };

    let overhead = ctx.settings.header_bits.physical;
    let padding = if ctx.settings.phy.cellular {
        0
    } else {
        let symbol = ofdm_symbol_bits(data_rate_kbits);
        match ofdm_padding(message.length_bits(), overhead, symbol) {
            Some(padding) => padding,
            None => {
                log::error!(
                    "[{}] No valid OFDM padding for {} + {} bits at symbol size {}, sending unpadded",
                    ctx.node_id(),
                    message.length_bits(),
                    overhead,
                    symbol
                );
                0
            }
        }
    };
    message.add_layer_bits(Layer::Physical, overhead + padding);

    ctx.statistics.record_sent(Layer::Physical, message);
    ctx.statistics.record_frame(message);
    log::trace!("[{}] PHY frame {} on channel {} at {} kbit/s", ctx.node_id(), message, channel, data_rate_kbits);
    channel
}

/// Strip PHY overhead and hand a received frame to LINK.
pub(crate) fn phy_deliver_up(ctx: &mut TaskContext<'_>, mut message: NetworkMessage) -> ScheduledEvent {
    message.set_layer_bits(Layer::Physical, 0);
    ctx.statistics.record_received(Layer::Physical, &message);
    ctx.forward(ctx.settings.delays.link_physical, EventKind::LinkReceive, message)
}


#[cfg(test)]
mod tests {
    use super::test_support::Harness;
    use super::*;
    use crate::common::encoding::decode_floats;
    use crate::common::settings::NetworkSettings;
    use crate::simulation::event::EventTarget;

    fn event(kind: EventKind, message: NetworkMessage) -> NetworkEvent {
        NetworkEvent::for_node(0, kind).with_message(message)
    }

    fn only(mut events: Vec<ScheduledEvent>) -> ScheduledEvent {
        assert_eq!(events.len(), 1);
        events.remove(0)
    }

    #[test]
    fn send_path_accumulates_headers_consistently() {
        let mut h = Harness::new(NetworkSettings::default());
        let mut app = AppSimpleTask::new();
        let mut transport = TransportSimpleTask::new();
        let mut net = NetSimpleTask::new();
        let mut link = LinkSimpleTask::new();
        let mut phy = PhySimpleTask::new();

        let e = only(app.handle(&event(EventKind::AppSend, NetworkMessage::with_text("hello")), &mut h.ctx()));
        assert_eq!(e.event.kind, EventKind::TransportSend);
        let e = only(transport.handle(&e.event, &mut h.ctx()));
        assert_eq!(e.event.kind, EventKind::NetSend);
        let e = only(net.handle(&e.event, &mut h.ctx()));
        assert_eq!(e.event.kind, EventKind::LinkSend);
        let e = only(link.handle(&e.event, &mut h.ctx()));
        assert_eq!(e.event.kind, EventKind::PhySendStart);
        let out = phy.handle(&e.event, &mut h.ctx());
        assert_eq!(out.len(), 2);

        let frame = out[0].event.message.clone().unwrap();
        assert_eq!(out[0].event.target, EventTarget::Channel { sender: 0 });
        assert!(frame.is_length_consistent());
        assert_eq!(frame.ipv6_receiver, ALL_NODES_MULTICAST);
        assert_eq!(frame.mac_receiver, BROADCAST_MAC);
        assert_eq!(frame.ipv6_sender, h.node.ipv6_address());
        assert_eq!(frame.hop_limit, h.settings.hop_limit);

        let symbol = ofdm_symbol_bits(frame.phy.data_rate_kbits);
        assert_eq!(frame.length_bits() % symbol, 0);
        let unpadded = 40 + 64 + 320 + 272 + 46;
        assert!(frame.length_bits() >= unpadded && frame.length_bits() < unpadded + symbol);

        let airtime = transmission_time_ns(&frame, h.settings.phy.slow_data_rate_kbits);
        assert_eq!(out[1].at, airtime);
        assert_eq!(out[1].event.kind, EventKind::PhySendEnd);
    }

    #[test]
    fn transport_sequence_numbers_increase() {
        let mut h = Harness::new(NetworkSettings::default());
        let mut transport = TransportSimpleTask::new();
        let a = only(transport.handle(&event(EventKind::TransportSend, NetworkMessage::with_text("a")), &mut h.ctx()));
        let b = only(transport.handle(&event(EventKind::TransportSend, NetworkMessage::with_text("b")), &mut h.ctx()));
        assert_eq!(a.event.message.unwrap().sequence_number, 0);
        assert_eq!(b.event.message.unwrap().sequence_number, 1);
    }

    #[test]
    fn delays_are_drawn_from_configured_range() {
        let mut h = Harness::new(NetworkSettings::default());
        h.now = 1_000;
        let range = h.settings.delays.app_transport;
        let mut app = AppSimpleTask::new();
        for _ in 0..50 {
            let e = only(app.handle(&event(EventKind::AppSend, NetworkMessage::with_text("x")), &mut h.ctx()));
            assert!(e.at >= 1_000 + range.min_ns && e.at <= 1_000 + range.max_ns);
        }
    }

    #[test]
    fn receive_drops_self_originated_and_foreign_unicast() {
        let mut h = Harness::new(NetworkSettings::default());
        let mut net = NetSimpleTask::new();

        let mut own = NetworkMessage::with_text("x");
        own.ipv6_sender = h.node.ipv6_address().to_string();
        own.ipv6_receiver = ALL_NODES_MULTICAST.to_string();
        assert!(net.handle(&event(EventKind::NetReceive, own), &mut h.ctx()).is_empty());

        let mut foreign = NetworkMessage::with_text("x");
        foreign.ipv6_sender = "fd00:0:0:0:0:0:0:9".to_string();
        foreign.ipv6_receiver = "fd00:0:0:0:0:0:0:8".to_string();
        assert!(net.handle(&event(EventKind::NetReceive, foreign), &mut h.ctx()).is_empty());

        let mut to_me = NetworkMessage::with_text("x");
        to_me.ipv6_sender = "fd00:0:0:0:0:0:0:9".to_string();
        to_me.ipv6_receiver = h.node.ipv6_address().to_string();
        to_me.add_layer_bits(Layer::Network, 320);
        let up = only(net.handle(&event(EventKind::NetReceive, to_me), &mut h.ctx()));
        assert_eq!(up.event.kind, EventKind::TransportReceive);
        let delivered = up.event.message.unwrap();
        assert_eq!(delivered.layer_bits(Layer::Network), 0);
        assert!(delivered.is_length_consistent());
        assert_eq!(h.node.ipv6_neighbors(0), vec!["fd00:0:0:0:0:0:0:9".to_string()]);
    }

    #[test]
    fn link_drops_frames_for_other_macs() {
        let mut h = Harness::new(NetworkSettings::default());
        let mut link = LinkSimpleTask::new();
        let mut frame = NetworkMessage::with_text("x");
        frame.mac_sender = "02:00:00:00:00:09".to_string();
        frame.mac_receiver = "02:00:00:00:00:08".to_string();
        assert!(link.handle(&event(EventKind::LinkReceive, frame.clone()), &mut h.ctx()).is_empty());

        frame.mac_receiver = BROADCAST_MAC.to_string();
        let up = only(link.handle(&event(EventKind::LinkReceive, frame), &mut h.ctx()));
        assert_eq!(up.event.kind, EventKind::NetReceive);
        assert_eq!(h.node.mac_neighbors(0).len(), 1);
    }

    #[test]
    fn unicast_link_resolves_known_neighbor() {
        let mut h = Harness::new(NetworkSettings::default());
        let mut heard = NetworkMessage::with_text("x");
        heard.ipv6_sender = "fd00:0:0:0:0:0:0:5".to_string();
        heard.mac_sender = "02:00:00:00:00:05".to_string();
        heard.hop_limit = h.settings.hop_limit;
        h.node.record_ipv6_reception(0, &heard);

        let mut outgoing = NetworkMessage::with_text("y");
        outgoing.ipv6_receiver = "fd00:0:0:0:0:0:0:5".to_string();
        link_prepare(&mut h.ctx(), &mut outgoing);
        assert_eq!(outgoing.mac_receiver, "02:00:00:00:00:05");

        let mut unknown = NetworkMessage::with_text("z");
        unknown.ipv6_receiver = "fd00:0:0:0:0:0:0:6".to_string();
        link_prepare(&mut h.ctx(), &mut unknown);
        assert_eq!(unknown.mac_receiver, BROADCAST_MAC);
    }

    #[test]
    fn app_receive_records_latency_and_inbox() {
        let mut h = Harness::new(NetworkSettings::default());
        h.now = 5_000;
        let mut app = AppSimpleTask::new();
        let mut msg = NetworkMessage::with_text("hi");
        msg.creation_time = 1_000;
        assert!(app.handle(&event(EventKind::AppReceive, msg), &mut h.ctx()).is_empty());
        assert_eq!(h.statistics.average_latency_ns(), 4_000.0);
        let inbox = h.node.take_delivered();
        assert_eq!(inbox.len(), 1);
        assert_eq!(inbox[0].receive_time, 5_000);
    }

    #[test]
    fn beacon_carries_sensor_values_and_rearms() {
        let mut settings = NetworkSettings::default();
        settings.beacon_interval_ns = Some(100_000_000);
        let mut h = Harness::new(settings);
        let mut app = AppSimpleTask::new();
        let out = app.handle(&NetworkEvent::for_node(0, EventKind::AppBeacon), &mut h.ctx());
        assert_eq!(out.len(), 2);
        let beacon = out[0].event.message.clone().unwrap();
        assert_eq!(beacon.destination_port, BEACON_PORT);
        assert_eq!(decode_floats(&beacon.content).unwrap(), h.node.object().sensor_values().to_vec());
        assert_eq!(out[1].event.kind, EventKind::AppBeacon);
        assert_eq!(out[1].at, 100_000_000);
        assert_eq!(app.beacons_sent(), 1);
    }

    #[test]
    fn cellular_phy_skips_padding_and_send_end() {
        let mut settings = NetworkSettings::default();
        settings.phy.cellular = true;
        let mut h = Harness::new(settings);
        let mut phy = PhySimpleTask::new();
        let out = phy.handle(&event(EventKind::PhySendStart, NetworkMessage::with_text("abc")), &mut h.ctx());
        assert_eq!(out.len(), 1);
        let frame = out[0].event.message.clone().unwrap();
        assert_eq!(frame.layer_bits(Layer::Physical), h.settings.header_bits.physical);
    }

    #[test]
    fn phy_receive_strips_overhead() {
        let mut h = Harness::new(NetworkSettings::default());
        let mut phy = PhySimpleTask::new();
        let mut frame = NetworkMessage::with_text("abc");
        frame.add_layer_bits(Layer::Physical, 70);
        let up = only(phy.handle(&event(EventKind::PhyReceiveMessageEnd, frame), &mut h.ctx()));
        let msg = up.event.message.unwrap();
        assert_eq!(msg.layer_bits(Layer::Physical), 0);
        assert_eq!(msg.length_bits(), 24);
        assert_eq!(h.statistics.received(Layer::Physical), 1);
    }
}
