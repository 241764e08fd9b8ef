//! Simulated node: addresses, channel occupancy, soft state and its tasks.
//!
//! `NodeState` is everything the tasks of one node share. Tasks only reach it
//! through the accessor methods here, never by holding references into it, so
//! the channel reference counts and buffers are always mutated in one place.
//! `NetworkNode` pairs that state with the node's task list and fans events
//! out to the tasks.

use rand::rngs::StdRng;
use std::collections::{BTreeMap, BTreeSet, VecDeque};

use crate::common::address::{derive_ipv6_address, derive_mac_address};
use crate::common::settings::NetworkSettings;

use super::buffer::RecentMessageBuffer;
use super::channel_model::NetworkChannelModel;
use super::event::{NetworkEvent, ScheduledEvent};
use super::message::NetworkMessage;
use super::statistics::NetworkStatistics;
use super::tasks::{NetworkTask, TaskContext, TaskObserver, create_tasks};
use super::time::SimTime;
use super::types::{ChannelId, NodeId, PhysicalObject, Position};

#[derive(Debug, Clone)]
pub struct NodeState {
    id: NodeId,
    object: PhysicalObject,
    mac_address: String,
    ipv6_address: String,
    mac_buffer: RecentMessageBuffer,
    ipv6_buffer: RecentMessageBuffer,
    sending_channels: BTreeMap<ChannelId, u32>,
    receiving_channels: BTreeMap<ChannelId, u32>,
    inbox: VecDeque<NetworkMessage>,
    inbox_capacity: usize,
}

impl NodeState {
    pub fn new(id: NodeId, object: PhysicalObject, settings: &NetworkSettings) -> Self {
        let mac_address = derive_mac_address(object.object_id, &settings.mac_prefix);
        let ipv6_address = derive_ipv6_address(object.object_id, &settings.ipv6_prefix);
        Self {
            id,
            object,
            mac_address,
            ipv6_address,
            mac_buffer: RecentMessageBuffer::new(settings.buffer.capacity, settings.buffer.freshness_ns),
            ipv6_buffer: RecentMessageBuffer::new(settings.buffer.capacity, settings.buffer.freshness_ns),
            sending_channels: BTreeMap::new(),
            receiving_channels: BTreeMap::new(),
            inbox: VecDeque::new(),
            inbox_capacity: settings.inbox_capacity,
        }
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn object(&self) -> &PhysicalObject {
        &self.object
    }

    pub fn kind(&self) -> &str {
        &self.object.kind
    }

    pub fn position(&self) -> Position {
        self.object.position
    }

    pub fn mac_address(&self) -> &str {
        &self.mac_address
    }

    pub fn ipv6_address(&self) -> &str {
        &self.ipv6_address
    }

    /// Copy in the latest values from the physics engine.
    pub fn update_object(&mut self, position: Position, speed: f64, compass: f64) {
        self.object.position = position;
        self.object.speed = speed;
        self.object.compass = compass;
    }

    // ---- channel occupancy ----

    /// Count one more concurrent sender on `channel`. Returns the new count.
    pub fn increment_sending(&mut self, channel: ChannelId) -> u32 {
        increment(&mut self.sending_channels, channel)
    }

    /// Count one sender less on `channel`. Returns the new count, or `None`
    /// (with a warning) if the channel had no sender registered.
    pub fn decrement_sending(&mut self, channel: ChannelId) -> Option<u32> {
        let result = decrement(&mut self.sending_channels, channel);
        if result.is_none() {
            log::warn!("[{}] Sending count decrement on idle channel {}, ignoring", self.id, channel);
        }
        result
    }

    pub fn increment_receiving(&mut self, channel: ChannelId) -> u32 {
        increment(&mut self.receiving_channels, channel)
    }

    pub fn decrement_receiving(&mut self, channel: ChannelId) -> Option<u32> {
        let result = decrement(&mut self.receiving_channels, channel);
        if result.is_none() {
            log::warn!("[{}] Receiving count decrement on idle channel {}, ignoring", self.id, channel);
        }
        result
    }

    pub fn sending_count(&self, channel: ChannelId) -> u32 {
        self.sending_channels.get(&channel).copied().unwrap_or(0)
    }

    pub fn receiving_count(&self, channel: ChannelId) -> u32 {
        self.receiving_channels.get(&channel).copied().unwrap_or(0)
    }

    /// Union of the channels this node currently sends or receives on.
    pub fn busy_channels(&self) -> BTreeSet<ChannelId> {
        self.sending_channels.keys().chain(self.receiving_channels.keys()).copied().collect()
    }

    /// Whether any of `channels` is in the busy set.
    pub fn is_busy(&self, channels: &[ChannelId]) -> bool {
        let busy = self.busy_channels();
        channels.iter().any(|c| busy.contains(c))
    }

    // ---- soft state ----

    pub fn record_mac_reception(&mut self, now: SimTime, message: &NetworkMessage) {
        self.mac_buffer.push(&message.mac_sender, now, message.clone());
    }

    pub fn record_ipv6_reception(&mut self, now: SimTime, message: &NetworkMessage) {
        self.ipv6_buffer.push(&message.ipv6_sender, now, message.clone());
    }

    /// MAC address of a one-hop neighbour known by its IPv6 address.
    ///
    /// Only messages that arrived with an untouched hop limit are trusted: a
    /// relayed copy carries the relay's MAC, not the originator's.
    pub fn resolve_mac(&self, ipv6: &str, now: SimTime, initial_hop_limit: u8) -> Option<String> {
        self.ipv6_buffer
            .latest(ipv6, now)
            .filter(|entry| entry.message.hop_limit == initial_hop_limit && !entry.message.wired)
            .map(|entry| entry.message.mac_sender.clone())
    }

    pub fn mac_neighbors(&self, now: SimTime) -> Vec<String> {
        self.mac_buffer.neighbors(now)
    }

    pub fn ipv6_neighbors(&self, now: SimTime) -> Vec<String> {
        self.ipv6_buffer.neighbors(now)
    }

    /// Drop expired buffer entries. Returns how many were removed.
    pub fn purge_soft_state(&mut self, now: SimTime) -> usize {
        self.mac_buffer.purge(now) + self.ipv6_buffer.purge(now)
    }

    // ---- delivery ----

    /// Store a message delivered to the application. The oldest is dropped when full.
    pub fn deliver(&mut self, message: NetworkMessage) {
        if self.inbox_capacity == 0 {
            return;
        }
        if self.inbox.len() >= self.inbox_capacity {
            log::debug!("[{}] Inbox full, dropping oldest delivered message", self.id);
            self.inbox.pop_front();
        }
        self.inbox.push_back(message);
    }

    pub fn delivered(&self) -> &VecDeque<NetworkMessage> {
        &self.inbox
    }

    pub fn take_delivered(&mut self) -> Vec<NetworkMessage> {
        self.inbox.drain(..).collect()
    }

    /// Forget all runtime state; addresses and the bound object stay.
    pub fn clear_runtime_state(&mut self) {
        self.mac_buffer.clear();
        self.ipv6_buffer.clear();
        self.sending_channels.clear();
        self.receiving_channels.clear();
        self.inbox.clear();
    }
}

fn increment(map: &mut BTreeMap<ChannelId, u32>, channel: ChannelId) -> u32 {
    let count = map.entry(channel).or_insert(0);
    *count += 1;
    *count
}

fn decrement(map: &mut BTreeMap<ChannelId, u32>, channel: ChannelId) -> Option<u32> {
    let count = map.get_mut(&channel)?;
    *count -= 1;
    let remaining = *count;
    if remaining == 0 {
        map.remove(&channel);
    }
    Some(remaining)
}

/// Shared simulation resources lent to a node for one dispatch.
pub struct DispatchEnv<'a> {
    pub now: SimTime,
    pub settings: &'a NetworkSettings,
    pub channel_model: &'a dyn NetworkChannelModel,
    pub statistics: &'a mut NetworkStatistics,
    pub rng: &'a mut StdRng,
    pub observers: &'a mut [Box<dyn TaskObserver>],
}

#[derive(Debug)]
pub struct NetworkNode {
    state: NodeState,
    tasks: Vec<NetworkTask>,
}

impl NetworkNode {
    /// Build a node and its task list from the object kind.
    pub fn new(id: NodeId, object: PhysicalObject, settings: &NetworkSettings) -> Self {
        let tasks = create_tasks(settings, &object.kind, id);
        let state = NodeState::new(id, object, settings);
        log::debug!(
            "[{}] Node created for object {} ({}), mac {}, ipv6 {}, {} tasks",
            id,
            state.object().object_id,
            state.kind(),
            state.mac_address(),
            state.ipv6_address(),
            tasks.len()
        );
        Self { state, tasks }
    }

    pub fn id(&self) -> NodeId {
        self.state.id
    }

    pub fn state(&self) -> &NodeState {
        &self.state
    }

    pub fn state_mut(&mut self) -> &mut NodeState {
        &mut self.state
    }

    pub fn tasks(&self) -> &[NetworkTask] {
        &self.tasks
    }

    /// Hand `event` to every task that declares its kind, in task-list order.
    ///
    /// # Returns
    ///
    /// The events all tasks asked to schedule, in the order they were produced.
    pub fn dispatch(&mut self, event: &NetworkEvent, env: &mut DispatchEnv<'_>) -> Vec<ScheduledEvent> {
        let mut scheduled = Vec::new();
        for task in self.tasks.iter_mut() {
            if !task.handles(event.kind) {
                continue;
            }
            let task_id = task.id();

            let mut proceed = true;
            for observer in env.observers.iter_mut() {
                proceed &= observer.before_task(self.state.id, task_id, event);
            }
            if !proceed {
                log::trace!("[{}] {} vetoed {}", self.state.id, task_id, event);
                continue;
            }

            let mut ctx = TaskContext {
                now: env.now,
                node: &mut self.state,
                settings: env.settings,
                channel_model: env.channel_model,
                statistics: &mut *env.statistics,
                rng: &mut *env.rng,
            };
            scheduled.extend(task.handle(event, &mut ctx));

            for observer in env.observers.iter_mut() {
                observer.after_task(self.state.id, task_id, event);
            }
        }
        scheduled
    }

    /// Rebuild the task list and clear runtime state, keeping id, object and addresses.
    pub fn reset(&mut self, settings: &NetworkSettings) {
        self.tasks = create_tasks(settings, &self.state.object.kind, self.state.id);
        self.state.clear_runtime_state();
    }
}
