//! Per-node protocol tasks.
//!
//! A task is the state machine of one layer function on one node. Each task
//! declares the event kinds it handles; the owning node fans an event out to
//! every task declaring it. Tasks never call back into the scheduler: they
//! return the events they want scheduled, and the orchestrator enqueues them.
//!
//! ## Module Organization
//!
//! - `simple`: pass-through APP/TRANSPORT/NET/LINK/PHY tasks
//! - `csma`: CSMA/CA link task (DIFS + random backoff)
//! - `rohc`: buffered link task with simulated header compression
//! - `phy_interference`: PHY with per-channel interference detection
//! - `multicast`: multicast relay with wired backhaul copies

pub mod csma;
pub mod multicast;
pub mod phy_interference;
pub mod rohc;
pub mod simple;

use rand::rngs::StdRng;
use std::fmt;
use std::str::FromStr;

use crate::common::settings::NetworkSettings;

use super::channel_model::NetworkChannelModel;
use super::event::{EventKind, NetworkEvent, ScheduledEvent};
use super::message::NetworkMessage;
use super::node::NodeState;
use super::statistics::NetworkStatistics;
use super::time::{DelayRange, SimTime};
use super::types::{ChannelId, NodeId};

use csma::CsmaLinkTask;
use multicast::MulticastRelayTask;
use phy_interference::PhyInterferenceTask;
use rohc::RohcLinkTask;
use simple::{AppSimpleTask, LinkSimpleTask, NetSimpleTask, PhySimpleTask, TransportSimpleTask};

/// Configuration name of every task implementation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskId {
    AppSimple,
    TransportSimple,
    NetSimple,
    NetMulticast,
    LinkSimple,
    LinkCsma,
    LinkRohc,
    PhySimple,
    PhyInterference,
    NoOp,
}

impl TaskId {
    pub fn as_str(self) -> &'static str {
        match self {
            TaskId::AppSimple => "app_simple",
            TaskId::TransportSimple => "transport_simple",
            TaskId::NetSimple => "net_simple",
            TaskId::NetMulticast => "net_multicast",
            TaskId::LinkSimple => "link_simple",
            TaskId::LinkCsma => "link_csma",
            TaskId::LinkRohc => "link_rohc",
            TaskId::PhySimple => "phy_simple",
            TaskId::PhyInterference => "phy_interference",
            TaskId::NoOp => "noop",
        }
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "app_simple" => Ok(TaskId::AppSimple),
            "transport_simple" => Ok(TaskId::TransportSimple),
            "net_simple" => Ok(TaskId::NetSimple),
            "net_multicast" => Ok(TaskId::NetMulticast),
            "link_simple" => Ok(TaskId::LinkSimple),
            "link_csma" => Ok(TaskId::LinkCsma),
            "link_rohc" => Ok(TaskId::LinkRohc),
            "phy_simple" => Ok(TaskId::PhySimple),
            "phy_interference" => Ok(TaskId::PhyInterference),
            "noop" => Ok(TaskId::NoOp),
            other => Err(format!("unknown task id {:?}", other)),
        }
    }
}

/// Cross-cutting instrumentation hook around every task dispatch.
///
/// Observers only see events by shared reference and cannot alter messages.
/// If any observer returns `false` from `before_task`, that task skips the
/// event; all observers are still notified.
pub trait TaskObserver {
    fn before_task(&mut self, _node: NodeId, _task: TaskId, _event: &NetworkEvent) -> bool {
        true
    }

    fn after_task(&mut self, _node: NodeId, _task: TaskId, _event: &NetworkEvent) {}
}

/// Everything a task may touch while handling one event.
pub struct TaskContext<'a> {
    pub now: SimTime,
    pub node: &'a mut NodeState,
    pub settings: &'a NetworkSettings,
    pub channel_model: &'a dyn NetworkChannelModel,
    pub statistics: &'a mut NetworkStatistics,
    pub rng: &'a mut StdRng,
}

impl TaskContext<'_> {
    pub fn node_id(&self) -> NodeId {
        self.node.id()
    }

    /// Channels this node transmits on, per the channel model.
    pub fn sending_channels(&self) -> Vec<ChannelId> {
        self.channel_model.compute_channel_ids(&*self.node, true)
    }

    /// Whether any of this node's sending channels is currently occupied.
    pub fn channel_busy(&self) -> bool {
        self.node.is_busy(&self.sending_channels())
    }

    /// Event for this node at `now + delay`.
    pub fn after(&self, delay: SimTime, event: NetworkEvent) -> ScheduledEvent {
        ScheduledEvent::new(self.now + delay, event)
    }

    /// Event of `kind` for this node in the same instant.
    pub fn immediately(&self, kind: EventKind) -> ScheduledEvent {
        ScheduledEvent::new(self.now, NetworkEvent::for_node(self.node_id(), kind))
    }

    /// Hand `message` to the next layer after a processing delay drawn from `range`.
    pub fn forward(&mut self, range: DelayRange, kind: EventKind, message: NetworkMessage) -> ScheduledEvent {
        let delay = range.sample(self.rng);
        self.after(delay, NetworkEvent::for_node(self.node_id(), kind).with_message(message))
    }
}

/// Placeholder for a task id the factory did not recognise.
#[derive(Debug, Clone)]
pub struct NoOpTask {
    pub requested: String,
}

/// Closed set of task implementations.
#[derive(Debug)]
pub enum NetworkTask {
    AppSimple(AppSimpleTask),
    TransportSimple(TransportSimpleTask),
    NetSimple(NetSimpleTask),
    NetMulticast(MulticastRelayTask),
    LinkSimple(LinkSimpleTask),
    LinkCsma(CsmaLinkTask),
    LinkRohc(RohcLinkTask),
    PhySimple(PhySimpleTask),
    PhyInterference(PhyInterferenceTask),
    NoOp(NoOpTask),
}

impl NetworkTask {
    pub fn id(&self) -> TaskId {
        match self {
            NetworkTask::AppSimple(_) => TaskId::AppSimple,
            NetworkTask::TransportSimple(_) => TaskId::TransportSimple,
            NetworkTask::NetSimple(_) => TaskId::NetSimple,
            NetworkTask::NetMulticast(_) => TaskId::NetMulticast,
            NetworkTask::LinkSimple(_) => TaskId::LinkSimple,
            NetworkTask::LinkCsma(_) => TaskId::LinkCsma,
            NetworkTask::LinkRohc(_) => TaskId::LinkRohc,
            NetworkTask::PhySimple(_) => TaskId::PhySimple,
            NetworkTask::PhyInterference(_) => TaskId::PhyInterference,
            NetworkTask::NoOp(_) => TaskId::NoOp,
        }
    }

    pub fn handled_events(&self) -> &'static [EventKind] {
        match self {
            NetworkTask::AppSimple(_) => AppSimpleTask::HANDLED,
            NetworkTask::TransportSimple(_) => TransportSimpleTask::HANDLED,
            NetworkTask::NetSimple(_) => NetSimpleTask::HANDLED,
            NetworkTask::NetMulticast(_) => MulticastRelayTask::HANDLED,
            NetworkTask::LinkSimple(_) => LinkSimpleTask::HANDLED,
            NetworkTask::LinkCsma(_) => CsmaLinkTask::HANDLED,
            NetworkTask::LinkRohc(_) => RohcLinkTask::HANDLED,
            NetworkTask::PhySimple(_) => PhySimpleTask::HANDLED,
            NetworkTask::PhyInterference(_) => PhyInterferenceTask::HANDLED,
            NetworkTask::NoOp(_) => &[],
        }
    }

    pub fn handles(&self, kind: EventKind) -> bool {
        self.handled_events().contains(&kind)
    }

    pub fn handle(&mut self, event: &NetworkEvent, ctx: &mut TaskContext<'_>) -> Vec<ScheduledEvent> {
        match self {
            NetworkTask::AppSimple(task) => task.handle(event, ctx),
            NetworkTask::TransportSimple(task) => task.handle(event, ctx),
            NetworkTask::NetSimple(task) => task.handle(event, ctx),
            NetworkTask::NetMulticast(task) => task.handle(event, ctx),
            NetworkTask::LinkSimple(task) => task.handle(event, ctx),
            NetworkTask::LinkCsma(task) => task.handle(event, ctx),
            NetworkTask::LinkRohc(task) => task.handle(event, ctx),
            NetworkTask::PhySimple(task) => task.handle(event, ctx),
            NetworkTask::PhyInterference(task) => task.handle(event, ctx),
            NetworkTask::NoOp(_) => Vec::new(),
        }
    }
}

/// Build the task named `name` for `node`.
///
/// An unrecognised name yields a `NoOp` task and a warning so a typo in the
/// task assignment cannot take the simulation down.
pub fn create_task(name: &str, node: NodeId) -> NetworkTask {
    match name.parse::<TaskId>() {
        Ok(TaskId::AppSimple) => NetworkTask::AppSimple(AppSimpleTask::new()),
        Ok(TaskId::TransportSimple) => NetworkTask::TransportSimple(TransportSimpleTask::new()),
        Ok(TaskId::NetSimple) => NetworkTask::NetSimple(NetSimpleTask::new()),
        Ok(TaskId::NetMulticast) => NetworkTask::NetMulticast(MulticastRelayTask::new()),
        Ok(TaskId::LinkSimple) => NetworkTask::LinkSimple(LinkSimpleTask::new()),
        Ok(TaskId::LinkCsma) => NetworkTask::LinkCsma(CsmaLinkTask::new()),
        Ok(TaskId::LinkRohc) => NetworkTask::LinkRohc(RohcLinkTask::new()),
        Ok(TaskId::PhySimple) => NetworkTask::PhySimple(PhySimpleTask::new()),
        Ok(TaskId::PhyInterference) => NetworkTask::PhyInterference(PhyInterferenceTask::new()),
        Ok(TaskId::NoOp) => NetworkTask::NoOp(NoOpTask { requested: name.to_string() }),
        Err(err) => {
            log::warn!("[{}] {}, installing no-op task", node, err);
            NetworkTask::NoOp(NoOpTask { requested: name.to_string() })
        }
    }
}

/// Build the task list for an object kind from the settings.
pub fn create_tasks(settings: &NetworkSettings, kind: &str, node: NodeId) -> Vec<NetworkTask> {
    let names = settings.tasks_for_kind(kind);
    if names.is_empty() {
        log::warn!("[{}] No tasks configured for object kind {:?}", node, kind);
    }
    names.iter().map(|name| create_task(name, node)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn task_ids_round_trip_through_names() {
        for id in [
            TaskId::AppSimple,
            TaskId::TransportSimple,
            TaskId::NetSimple,
            TaskId::NetMulticast,
            TaskId::LinkSimple,
            TaskId::LinkCsma,
            TaskId::LinkRohc,
            TaskId::PhySimple,
            TaskId::PhyInterference,
        ] {
            assert_eq!(id.as_str().parse::<TaskId>(), Ok(id));
        }
        assert_eq!(" LINK_CSMA ".parse::<TaskId>(), Ok(TaskId::LinkCsma));
    }

    #[test]
    fn unknown_task_becomes_noop() {
        let task = create_task("link_tdma", 3);
        assert_eq!(task.id(), TaskId::NoOp);
        assert!(task.handled_events().is_empty());
        match task {
            NetworkTask::NoOp(noop) => assert_eq!(noop.requested, "link_tdma"),
            _ => panic!("expected no-op task"),
        }
    }

    #[test]
    fn factory_builds_configured_stack() {
        let settings = NetworkSettings::default();
        let tasks = create_tasks(&settings, "vehicle", 0);
        let ids: Vec<TaskId> = tasks.iter().map(|t| t.id()).collect();
        assert_eq!(
            ids,
            vec![TaskId::AppSimple, TaskId::TransportSimple, TaskId::NetSimple, TaskId::LinkCsma, TaskId::PhyInterference]
        );
        assert!(create_tasks(&settings, "unknown_kind", 0).is_empty());
    }

    #[test]
    fn declared_events_are_disjoint_per_layer() {
        let csma = create_task("link_csma", 0);
        assert!(csma.handles(EventKind::LinkCheckChannelStatus));
        assert!(csma.handles(EventKind::LinkWaitForSending));
        assert!(!csma.handles(EventKind::PhySendStart));

        let phy = create_task("phy_interference", 0);
        assert!(phy.handles(EventKind::PhyReceiveInterferenceStart));
        assert!(!phy.handles(EventKind::LinkSend));
    }
}
