//! Simulation context: nodes, event queue, channel model and statistics.
//!
//! High-level flow of each step:
//! 1) Pop the earliest event from the queue (ties in scheduling order).
//! 2) Node events are fanned out to the node's tasks, which return the
//!    follow-up events they want scheduled.
//! 3) Channel events (a frame leaving an antenna) are resolved here: the
//!    channel model is asked, per other node, whether and how it hears the
//!    frame, and matching reception start/end or direct-delivery events are
//!    scheduled on the receivers.
//!
//! Everything is owned by one `Simulation` value; there is no global state.
//! `reset` returns the context to its freshly-built state while keeping the
//! nodes' bound objects, so a scenario can be re-run deterministically.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::HashMap;

use crate::common::address::ALL_NODES_MULTICAST;
use crate::common::settings::{NetworkSettings, validate_settings};

use super::channel_model::{NetworkChannelModel, ReceptionKind};
use super::error::SimulationError;
use super::event::{EventKind, EventTarget, NetworkEvent, ScheduledEvent};
use super::message::NetworkMessage;
use super::node::{DispatchEnv, NetworkNode, NodeState};
use super::scheduler::EventQueue;
use super::signal_calculations::transmission_time_ns;
use super::statistics::NetworkStatistics;
use super::tasks::TaskObserver;
use super::time::SimTime;
use super::types::{NodeId, PhysicalObject, Position};

pub struct Simulation {
    settings: NetworkSettings,
    channel_model: Box<dyn NetworkChannelModel>,
    queue: EventQueue,
    nodes: Vec<NetworkNode>,
    objects: HashMap<u64, NodeId>,
    statistics: NetworkStatistics,
    observers: Vec<Box<dyn TaskObserver>>,
    rng: StdRng,
    started: bool,
    dispatched: u64,
}

impl Simulation {
    /// Build an empty simulation.
    ///
    /// # Parameters
    ///
    /// * `settings` - Validated before use
    /// * `channel_model` - Strategy deciding who hears which transmission
    ///
    /// # Returns
    ///
    /// The simulation, or `InvalidSettings` if validation fails.
    pub fn new(settings: NetworkSettings, channel_model: Box<dyn NetworkChannelModel>) -> Result<Self, SimulationError> {
        validate_settings(&settings).map_err(SimulationError::InvalidSettings)?;
        let rng = StdRng::seed_from_u64(settings.seed);
        Ok(Self {
            settings,
            channel_model,
            queue: EventQueue::new(),
            nodes: Vec::new(),
            objects: HashMap::new(),
            statistics: NetworkStatistics::new(),
            observers: Vec::new(),
            rng,
            started: false,
            dispatched: 0,
        })
    }

    /// Bind a new node to `object`. Its tasks come from the object's kind.
    pub fn add_node(&mut self, object: PhysicalObject) -> Result<NodeId, SimulationError> {
        if self.objects.contains_key(&object.object_id) {
            return Err(SimulationError::DuplicateObject(object.object_id));
        }
        let id = self.nodes.len() as NodeId;
        self.objects.insert(object.object_id, id);
        self.nodes.push(NetworkNode::new(id, object, &self.settings));
        if self.started {
            self.schedule_beacon(id)?;
        }
        Ok(id)
    }

    pub fn node(&self, id: NodeId) -> Option<&NetworkNode> {
        self.nodes.get(id as usize)
    }

    pub fn nodes(&self) -> impl Iterator<Item = &NetworkNode> {
        self.nodes.iter()
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn node_for_object(&self, object_id: u64) -> Option<NodeId> {
        self.objects.get(&object_id).copied()
    }

    /// Copy fresh physics values into the node bound to `object_id`.
    pub fn update_object(&mut self, object_id: u64, position: Position, speed: f64, compass: f64) -> Result<(), SimulationError> {
        let id = self.node_for_object(object_id).ok_or(SimulationError::UnknownObject(object_id))?;
        self.node_state_mut(id)?.update_object(position, speed, compass);
        Ok(())
    }

    pub fn register_observer(&mut self, observer: Box<dyn TaskObserver>) {
        self.observers.push(observer);
    }

    pub fn settings(&self) -> &NetworkSettings {
        &self.settings
    }

    pub fn statistics(&self) -> &NetworkStatistics {
        &self.statistics
    }

    pub fn now(&self) -> SimTime {
        self.queue.now()
    }

    pub fn pending_events(&self) -> usize {
        self.queue.len()
    }

    pub fn dispatched_events(&self) -> u64 {
        self.dispatched
    }

    /// Schedule an arbitrary event. `at` must not lie before `now()`.
    pub fn schedule(&mut self, at: SimTime, event: NetworkEvent) -> Result<(), SimulationError> {
        if let EventTarget::Node(id) = event.target {
            self.check_node(id)?;
        }
        self.queue.schedule(at, event)
    }

    /// Have the application of `from` send `message` at `at`.
    pub fn send_message(&mut self, from: NodeId, message: NetworkMessage, at: SimTime) -> Result<(), SimulationError> {
        self.schedule(at, NetworkEvent::for_node(from, EventKind::AppSend).with_message(message))
    }

    /// Send a text message from `from` to `to`, or to all nodes if `to` is `None`.
    pub fn send_text(&mut self, from: NodeId, to: Option<NodeId>, content: &str, at: SimTime) -> Result<(), SimulationError> {
        let mut message = NetworkMessage::with_text(content);
        message.ipv6_receiver = match to {
            Some(id) => self.node(id).ok_or(SimulationError::UnknownNode(id))?.state().ipv6_address().to_string(),
            None => ALL_NODES_MULTICAST.to_string(),
        };
        self.send_message(from, message, at)
    }

    /// Drain the messages delivered to the application of `node`.
    pub fn take_delivered(&mut self, node: NodeId) -> Result<Vec<NetworkMessage>, SimulationError> {
        Ok(self.node_state_mut(node)?.take_delivered())
    }

    /// Drop expired soft state on every node. Returns the number of entries removed.
    pub fn purge_soft_state(&mut self) -> usize {
        let now = self.queue.now();
        self.nodes.iter_mut().map(|n| n.state_mut().purge_soft_state(now)).sum()
    }

    /// Run the channel model's start hook and arm beacon timers. Idempotent.
    pub fn start(&mut self) -> Result<(), SimulationError> {
        if self.started {
            return Ok(());
        }
        let states: Vec<&NodeState> = self.nodes.iter().map(|n| n.state()).collect();
        self.channel_model.on_simulation_start(&states);
        self.started = true;
        for id in 0..self.nodes.len() as NodeId {
            self.schedule_beacon(id)?;
        }
        log::info!("Simulation started with {} nodes", self.nodes.len());
        Ok(())
    }

    /// Process the next event. Returns false when the queue is empty.
    pub fn step(&mut self) -> Result<bool, SimulationError> {
        self.start()?;
        let Some(next) = self.queue.pop_next() else {
            return Ok(false);
        };
        self.dispatched += 1;
        self.dispatch(next)?;
        Ok(true)
    }

    /// Process every event due at or before `end`. Returns how many were processed.
    pub fn run_until(&mut self, end: SimTime) -> Result<u64, SimulationError> {
        self.start()?;
        let mut processed = 0;
        while self.queue.peek_time().is_some_and(|at| at <= end) {
            self.step()?;
            processed += 1;
        }
        log::debug!("Ran until {} ns: {} events, {} pending", end, processed, self.queue.len());
        Ok(processed)
    }

    /// Return to the freshly-built state: empty queue, zero clock and
    /// statistics, reseeded rng, fresh tasks. Nodes and observers are kept.
    pub fn reset(&mut self) {
        self.queue.clear();
        self.statistics = NetworkStatistics::new();
        self.rng = StdRng::seed_from_u64(self.settings.seed);
        for node in self.nodes.iter_mut() {
            node.reset(&self.settings);
        }
        self.started = false;
        self.dispatched = 0;
    }

    fn check_node(&self, id: NodeId) -> Result<(), SimulationError> {
        if (id as usize) < self.nodes.len() { Ok(()) } else { Err(SimulationError::UnknownNode(id)) }
    }

    fn node_state_mut(&mut self, id: NodeId) -> Result<&mut NodeState, SimulationError> {
        self.nodes
            .get_mut(id as usize)
            .map(|n| n.state_mut())
            .ok_or(SimulationError::UnknownNode(id))
    }

    /// First beacon at a random offset inside one interval so nodes do not all fire together.
    fn schedule_beacon(&mut self, id: NodeId) -> Result<(), SimulationError> {
        let Some(interval) = self.settings.beacon_interval_ns.filter(|i| *i > 0) else {
            return Ok(());
        };
        let offset = self.rng.gen_range(0..interval);
        self.queue
            .schedule(self.queue.now() + offset, NetworkEvent::for_node(id, EventKind::AppBeacon))
    }

    fn dispatch(&mut self, scheduled: ScheduledEvent) -> Result<(), SimulationError> {
        let now = scheduled.at;
        let event = scheduled.event;
        log::trace!("{} at {} ns", event, now);
        match event.target {
            EventTarget::Node(id) => {
                let Some(node) = self.nodes.get_mut(id as usize) else {
                    log::warn!("Event {} addressed to unknown node {}, dropping", event, id);
                    return Ok(());
                };
                let mut env = DispatchEnv {
                    now,
                    settings: &self.settings,
                    channel_model: &*self.channel_model,
                    statistics: &mut self.statistics,
                    rng: &mut self.rng,
                    observers: &mut self.observers,
                };
                let follow_ups = node.dispatch(&event, &mut env);
                self.queue.schedule_all(follow_ups)
            }
            EventTarget::Channel { sender } => match event.message {
                Some(message) => self.transmit(now, sender, message),
                None => {
                    log::warn!("[{}] Channel transmission without a frame, dropping", sender);
                    Ok(())
                }
            },
        }
    }

    /// Whether a pair limited to `max_index` can decode a frame sent at `rate_kbits`.
    fn supports_rate(&self, max_index: Option<usize>, rate_kbits: u32) -> bool {
        match max_index {
            None => true,
            Some(index) => self
                .settings
                .phy
                .modulation_table
                .get(index)
                .is_none_or(|m| m.data_rate_kbits >= rate_kbits),
        }
    }

    /// Deliver a frame sent by `sender` to every node the channel model says hears it.
    fn transmit(&mut self, now: SimTime, sender: NodeId, message: NetworkMessage) -> Result<(), SimulationError> {
        let Some(sender_node) = self.nodes.get(sender as usize) else {
            log::warn!("Transmission from unknown node {}, dropping", sender);
            return Ok(());
        };
        let sender_state = sender_node.state();
        let airtime = transmission_time_ns(&message, self.settings.phy.slow_data_rate_kbits);
        let cellular = self.settings.phy.cellular;

        let mut scheduled = Vec::new();
        for receiver in &self.nodes {
            if receiver.id() == sender {
                continue;
            }
            let Some(reception) = self.channel_model.compute_transmission(sender_state, receiver.state(), &message) else {
                continue;
            };

            let kind = if message.wired {
                ReceptionKind::Direct
            } else if reception.kind == ReceptionKind::Message && !self.supports_rate(reception.max_modulation_index, message.phy.data_rate_kbits) {
                ReceptionKind::Interference
            } else {
                reception.kind
            };

            let mut copy = message.clone();
            if !message.wired {
                copy.phy.channel_id = reception.channel_id;
            }
            let to = receiver.id();
            let channel = reception.channel_id;

            match kind {
                ReceptionKind::Direct => {
                    let delay = if message.wired { self.settings.phy.wired_delay_ns } else { airtime };
                    scheduled.push(ScheduledEvent::new(
                        now + delay,
                        NetworkEvent::for_node(to, EventKind::PhyReceiveDirect).with_message(copy),
                    ));
                }
                ReceptionKind::Message if cellular => {
                    scheduled.push(ScheduledEvent::new(
                        now + airtime,
                        NetworkEvent::for_node(to, EventKind::PhyReceiveDirect).with_message(copy),
                    ));
                }
                ReceptionKind::Interference if cellular => {}
                ReceptionKind::Message => {
                    scheduled.push(ScheduledEvent::new(
                        now,
                        NetworkEvent::for_node(to, EventKind::PhyReceiveMessageStart).on_channel(channel),
                    ));
                    scheduled.push(ScheduledEvent::new(
                        now + airtime,
                        NetworkEvent::for_node(to, EventKind::PhyReceiveMessageEnd)
                            .on_channel(channel)
                            .with_message(copy),
                    ));
                }
                ReceptionKind::Interference => {
                    scheduled.push(ScheduledEvent::new(
                        now,
                        NetworkEvent::for_node(to, EventKind::PhyReceiveInterferenceStart).on_channel(channel),
                    ));
                    scheduled.push(ScheduledEvent::new(
                        now + airtime,
                        NetworkEvent::for_node(to, EventKind::PhyReceiveInterferenceEnd).on_channel(channel),
                    ));
                }
            }
        }

        log::trace!("[{}] Frame {} reaches {} receivers", sender, message, scheduled.len());
        self.queue.schedule_all(scheduled)
    }
}
