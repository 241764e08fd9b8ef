//! PHY task with per-channel interference detection.
//!
//! Sending and receiving occupy a channel through the node's reference
//! counts. A reception succeeds only if it was the sole occupant of its
//! channel from start to end: any overlapping reception, interference burst
//! or own transmission on the same channel marks the channel interrupted and
//! every reception in that window is lost.

use std::collections::BTreeMap;

use super::super::event::{EventKind, NetworkEvent, ScheduledEvent};
use super::super::signal_calculations::transmission_time_ns;
use super::super::types::ChannelId;
use super::TaskContext;
use super::simple::{phy_deliver_up, phy_prepare};

#[derive(Debug, Default)]
pub struct PhyInterferenceTask {
    interrupted: BTreeMap<ChannelId, bool>,
}

impl PhyInterferenceTask {
    pub const HANDLED: &'static [EventKind] = &[
        EventKind::PhySendStart,
        EventKind::PhySendEnd,
        EventKind::PhyReceiveMessageStart,
        EventKind::PhyReceiveMessageEnd,
        EventKind::PhyReceiveInterferenceStart,
        EventKind::PhyReceiveInterferenceEnd,
        EventKind::PhyReceiveDirect,
    ];

    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_interrupted(&self, channel: ChannelId) -> bool {
        self.interrupted.get(&channel).copied().unwrap_or(false)
    }

    pub fn handle(&mut self, event: &NetworkEvent, ctx: &mut TaskContext<'_>) -> Vec<ScheduledEvent> {
        match event.kind {
            EventKind::PhySendStart => self.send_start(event, ctx),
            EventKind::PhySendEnd => {
                let Some(channel) = event.channel_id else {
                    log::warn!("[{}] PhySendEnd without a channel, ignoring", ctx.node_id());
                    return Vec::new();
                };
                if ctx.node.decrement_sending(channel) == Some(0) && ctx.node.receiving_count(channel) == 0 {
                    self.interrupted.remove(&channel);
                }
                vec![ctx.immediately(EventKind::LinkCheckChannelStatus)]
            }
            EventKind::PhyReceiveMessageStart | EventKind::PhyReceiveInterferenceStart => {
                let Some(channel) = event.channel_id else {
                    log::warn!("[{}] {:?} without a channel, ignoring", ctx.node_id(), event.kind);
                    return Vec::new();
                };
                let receiving = ctx.node.increment_receiving(channel);
                if receiving > 1 || ctx.node.sending_count(channel) > 0 {
                    self.interrupted.insert(channel, true);
                } else {
                    self.interrupted.insert(channel, false);
                }
                vec![ctx.immediately(EventKind::LinkCheckChannelStatus)]
            }
            EventKind::PhyReceiveInterferenceEnd => {
                let Some(channel) = event.channel_id else {
                    return Vec::new();
                };
                if ctx.node.decrement_receiving(channel) == Some(0) && ctx.node.sending_count(channel) == 0 {
                    self.interrupted.remove(&channel);
                }
                vec![ctx.immediately(EventKind::LinkCheckChannelStatus)]
            }
            EventKind::PhyReceiveMessageEnd => self.receive_end(event, ctx),
            EventKind::PhyReceiveDirect => match event.message.clone() {
                Some(message) => vec![phy_deliver_up(ctx, message)],
                None => Vec::new(),
            },
            _ => Vec::new(),
        }
    }

    fn send_start(&mut self, event: &NetworkEvent, ctx: &mut TaskContext<'_>) -> Vec<ScheduledEvent> {
        let Some(mut message) = event.message.clone() else {
            log::warn!("[{}] PhySendStart without a message, ignoring", ctx.node_id());
            return Vec::new();
        };
        if message.wired {
            return vec![ctx.after(0, NetworkEvent::transmit(ctx.node_id(), message))];
        }

        let channel = phy_prepare(ctx, &mut message);
        let airtime = transmission_time_ns(&message, ctx.settings.phy.slow_data_rate_kbits);
        if ctx.settings.phy.cellular {
            return vec![ctx.after(0, NetworkEvent::transmit(ctx.node_id(), message))];
        }

        let sending = ctx.node.increment_sending(channel);
        if sending > 1 {
            log::warn!("[{}] Already sending on channel {} ({} concurrent sends)", ctx.node_id(), channel, sending);
        }
        if ctx.node.receiving_count(channel) > 0 {
            log::debug!("[{}] Own transmission interrupts reception on channel {}", ctx.node_id(), channel);
            self.interrupted.insert(channel, true);
        }

        vec![
            ctx.after(0, NetworkEvent::transmit(ctx.node_id(), message)),
            ctx.after(airtime, NetworkEvent::for_node(ctx.node_id(), EventKind::PhySendEnd).on_channel(channel)),
            ctx.immediately(EventKind::LinkCheckChannelStatus),
        ]
    }

    fn receive_end(&mut self, event: &NetworkEvent, ctx: &mut TaskContext<'_>) -> Vec<ScheduledEvent> {
        let (Some(channel), Some(message)) = (event.channel_id, event.message.clone()) else {
            log::warn!("[{}] PhyReceiveMessageEnd without channel or message, ignoring", ctx.node_id());
            return Vec::new();
        };

        let remaining = ctx.node.decrement_receiving(channel);
        let interrupted = self.is_interrupted(channel);
        let success = remaining == Some(0) && !interrupted;
        if remaining == Some(0) && ctx.node.sending_count(channel) == 0 {
            self.interrupted.remove(&channel);
        }

        let mut out = Vec::with_capacity(2);
        if success {
            out.push(phy_deliver_up(ctx, message));
        } else {
            ctx.statistics.record_interruption();
            log::debug!("[{}] Reception of {} on channel {} lost to interference", ctx.node_id(), message, channel);
        }
        out.push(ctx.immediately(EventKind::LinkCheckChannelStatus));
        out
    }
}

#[cfg(test)]
mod tests {
    use super::super::simple::test_support::Harness;
    use super::*;
    use crate::common::settings::NetworkSettings;
    use crate::simulation::message::{Layer, NetworkMessage};

    const CH: ChannelId = 0;

    fn start(kind: EventKind) -> NetworkEvent {
        NetworkEvent::for_node(0, kind).on_channel(CH)
    }

    fn message_end() -> NetworkEvent {
        let mut frame = NetworkMessage::with_text("frame");
        frame.add_layer_bits(Layer::Physical, 46);
        NetworkEvent::for_node(0, EventKind::PhyReceiveMessageEnd).on_channel(CH).with_message(frame)
    }

    fn delivered(out: &[ScheduledEvent]) -> bool {
        out.iter().any(|e| e.event.kind == EventKind::LinkReceive)
    }

    #[test]
    fn lone_reception_succeeds() {
        let mut h = Harness::new(NetworkSettings::default());
        let mut phy = PhyInterferenceTask::new();
        phy.handle(&start(EventKind::PhyReceiveMessageStart), &mut h.ctx());
        assert!(!phy.is_interrupted(CH));
        let out = phy.handle(&message_end(), &mut h.ctx());
        assert!(delivered(&out));
        assert_eq!(h.statistics.interruptions(), 0);
        assert_eq!(h.node.receiving_count(CH), 0);
    }

    #[test]
    fn fully_overlapping_receptions_both_fail() {
        let mut h = Harness::new(NetworkSettings::default());
        let mut phy = PhyInterferenceTask::new();
        phy.handle(&start(EventKind::PhyReceiveMessageStart), &mut h.ctx());
        phy.handle(&start(EventKind::PhyReceiveMessageStart), &mut h.ctx());
        assert!(phy.is_interrupted(CH));
        assert!(!delivered(&phy.handle(&message_end(), &mut h.ctx())));
        assert!(!delivered(&phy.handle(&message_end(), &mut h.ctx())));
        assert_eq!(h.statistics.interruptions(), 2);
        assert_eq!(h.statistics.received(Layer::Physical), 0);
    }

    #[test]
    fn interference_burst_spoils_reception() {
        let mut h = Harness::new(NetworkSettings::default());
        let mut phy = PhyInterferenceTask::new();
        phy.handle(&start(EventKind::PhyReceiveMessageStart), &mut h.ctx());
        phy.handle(&start(EventKind::PhyReceiveInterferenceStart), &mut h.ctx());
        phy.handle(&start(EventKind::PhyReceiveInterferenceEnd), &mut h.ctx());
        assert!(!delivered(&phy.handle(&message_end(), &mut h.ctx())));

        // the next reception starts with a clean window
        phy.handle(&start(EventKind::PhyReceiveMessageStart), &mut h.ctx());
        assert!(delivered(&phy.handle(&message_end(), &mut h.ctx())));
    }

    #[test]
    fn own_transmission_interrupts_reception() {
        let mut h = Harness::new(NetworkSettings::default());
        let mut phy = PhyInterferenceTask::new();
        phy.handle(&start(EventKind::PhyReceiveMessageStart), &mut h.ctx());
        let send = NetworkEvent::for_node(0, EventKind::PhySendStart).with_message(NetworkMessage::with_text("mine"));
        let out = phy.handle(&send, &mut h.ctx());
        assert_eq!(out.len(), 3);
        assert_eq!(h.node.sending_count(CH), 1);
        assert!(!delivered(&phy.handle(&message_end(), &mut h.ctx())));
    }

    #[test]
    fn reception_during_own_send_fails() {
        let mut h = Harness::new(NetworkSettings::default());
        let mut phy = PhyInterferenceTask::new();
        let send = NetworkEvent::for_node(0, EventKind::PhySendStart).with_message(NetworkMessage::with_text("mine"));
        let out = phy.handle(&send, &mut h.ctx());
        let send_end = out.iter().find(|e| e.event.kind == EventKind::PhySendEnd).unwrap().event.clone();
        phy.handle(&start(EventKind::PhyReceiveMessageStart), &mut h.ctx());
        phy.handle(&send_end, &mut h.ctx());
        assert_eq!(h.node.sending_count(CH), 0);
        assert!(!delivered(&phy.handle(&message_end(), &mut h.ctx())));
    }

    #[test]
    fn double_send_on_one_channel_is_counted_and_tolerated() {
        let mut h = Harness::new(NetworkSettings::default());
        let mut phy = PhyInterferenceTask::new();
        let send = NetworkEvent::for_node(0, EventKind::PhySendStart).with_message(NetworkMessage::with_text("a"));
        let first = phy.handle(&send, &mut h.ctx());
        let second = phy.handle(&send, &mut h.ctx());
        assert_eq!(h.node.sending_count(CH), 2);

        for out in [first, second] {
            let end = out.iter().find(|e| e.event.kind == EventKind::PhySendEnd).unwrap().event.clone();
            phy.handle(&end, &mut h.ctx());
        }
        assert_eq!(h.node.sending_count(CH), 0);
        // a third end is ignored rather than going negative
        phy.handle(&start(EventKind::PhySendEnd), &mut h.ctx());
        assert_eq!(h.node.sending_count(CH), 0);
    }

    #[test]
    fn every_occupancy_change_triggers_channel_check() {
        let mut h = Harness::new(NetworkSettings::default());
        let mut phy = PhyInterferenceTask::new();
        for event in [start(EventKind::PhyReceiveInterferenceStart), start(EventKind::PhyReceiveInterferenceEnd)] {
            let out = phy.handle(&event, &mut h.ctx());
            assert_eq!(out.len(), 1);
            assert_eq!(out[0].event.kind, EventKind::LinkCheckChannelStatus);
        }
    }

    #[test]
    fn cellular_send_does_not_occupy_channel() {
        let mut settings = NetworkSettings::default();
        settings.phy.cellular = true;
        let mut h = Harness::new(settings);
        let mut phy = PhyInterferenceTask::new();
        let send = NetworkEvent::for_node(0, EventKind::PhySendStart).with_message(NetworkMessage::with_text("a"));
        let out = phy.handle(&send, &mut h.ctx());
        assert_eq!(out.len(), 1);
        assert_eq!(h.node.sending_count(CH), 0);
    }

    #[test]
    fn direct_delivery_bypasses_accounting() {
        let mut h = Harness::new(NetworkSettings::default());
        let mut phy = PhyInterferenceTask::new();
        phy.handle(&start(EventKind::PhyReceiveInterferenceStart), &mut h.ctx());
        let mut msg = NetworkMessage::with_text("backhaul");
        msg.wired = true;
        let out = phy.handle(&NetworkEvent::for_node(0, EventKind::PhyReceiveDirect).with_message(msg), &mut h.ctx());
        assert!(delivered(&out));
        assert_eq!(h.node.receiving_count(CH), 1);
    }
}
