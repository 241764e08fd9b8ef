//! Events exchanged between protocol tasks, nodes and the channel.
//!
//! Every hand-over between layers is an event scheduled at some (possibly
//! equal) future instant. Events addressed to a node are fanned out to each of
//! its tasks that declares the `EventKind`; events addressed to the channel are
//! handled by the orchestrator, which asks the channel model who hears a
//! transmission.

use std::fmt;

use super::message::NetworkMessage;
use super::time::SimTime;
use super::types::{ChannelId, NodeId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    AppSend,
    AppReceive,
    /// Periodic beacon timer of the application task.
    AppBeacon,
    TransportSend,
    TransportReceive,
    NetSend,
    NetReceive,
    /// Re-emission of a received multicast by a relay.
    NetMulticast,
    LinkSend,
    LinkReceive,
    LinkCheckChannelStatus,
    /// Refresh tick of the CSMA/CA DIFS/backoff timers.
    LinkWaitForSending,
    PhySendStart,
    PhySendEnd,
    PhyReceiveMessageStart,
    PhyReceiveMessageEnd,
    PhyReceiveInterferenceStart,
    PhyReceiveInterferenceEnd,
    /// Contention-free delivery (wired backhaul or cellular downlink).
    PhyReceiveDirect,
    /// A frame leaves a node's antenna; handled by the orchestrator.
    ChannelTransmit,
}

/// Who processes an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventTarget {
    Node(NodeId),
    Channel { sender: NodeId },
}

#[derive(Debug, Clone)]
pub struct NetworkEvent {
    pub target: EventTarget,
    pub kind: EventKind,
    pub message: Option<NetworkMessage>,
    pub channel_id: Option<ChannelId>,
    /// Generation stamp used by timer-driven tasks to ignore stale ticks.
    pub token: u64,
}

impl NetworkEvent {
    pub fn for_node(node: NodeId, kind: EventKind) -> Self {
        Self {
            target: EventTarget::Node(node),
            kind,
            message: None,
            channel_id: None,
            token: 0,
        }
    }

    pub fn with_message(mut self, message: NetworkMessage) -> Self {
        self.message = Some(message);
        self
    }

    pub fn on_channel(mut self, channel_id: ChannelId) -> Self {
        self.channel_id = Some(channel_id);
        self
    }

    pub fn with_token(mut self, token: u64) -> Self {
        self.token = token;
        self
    }

    pub fn transmit(sender: NodeId, message: NetworkMessage) -> Self {
        Self {
            target: EventTarget::Channel { sender },
            kind: EventKind::ChannelTransmit,
            message: Some(message),
            channel_id: None,
            token: 0,
        }
    }

    pub fn node(&self) -> Option<NodeId> {
        match self.target {
            EventTarget::Node(id) => Some(id),
            EventTarget::Channel { .. } => None,
        }
    }
}

impl fmt::Display for NetworkEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.target {
            EventTarget::Node(id) => write!(f, "{:?}@N{}", self.kind, id)?,
            EventTarget::Channel { sender } => write!(f, "{:?} from N{}", self.kind, sender)?,
        }
        if let Some(channel) = self.channel_id {
            write!(f, " ch{}", channel)?;
        }
        Ok(())
    }
}

/// An event together with the instant it fires at.
#[derive(Debug, Clone)]
pub struct ScheduledEvent {
    pub at: SimTime,
    pub event: NetworkEvent,
}

impl ScheduledEvent {
    pub fn new(at: SimTime, event: NetworkEvent) -> Self {
        Self { at, event }
    }
}
