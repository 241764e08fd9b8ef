//! CSMA/CA link task.
//!
//! Outgoing frames wait in a queue until the medium has been idle for DIFS and
//! then for a random backoff. Channel-status checks are raised by every send
//! or receive start/end on this node; waiting is done in refresh ticks
//! (`LinkWaitForSending`) so an interruption can be noticed at tick
//! granularity.
//!
//! Phases:
//!
//! ```text
//! Idle --busy & queued--> BackoffPending --idle--> WaitingDifs --DIFS elapsed--> WaitingBackoff
//!   ^                                                   |                              |
//!   |<-------- interrupted (retry on next check) -------+------------------------------+
//!   |                                                                                   |
//!   +<------------------------------ Transmitting <------- backoff elapsed -------------+
//! ```
//!
//! Stale ticks are recognised by a generation token: every time a wait starts
//! or ends the generation changes, and ticks carrying an older token are
//! ignored.

use rand::Rng;
use std::collections::VecDeque;

use super::super::event::{EventKind, NetworkEvent, ScheduledEvent};
use super::super::message::NetworkMessage;
use super::super::time::SimTime;
use super::TaskContext;
use super::simple::{link_prepare, link_receive};

/// Observable CSMA/CA phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CsmaPhase {
    Idle,
    BackoffPending,
    WaitingDifs,
    WaitingBackoff,
    Transmitting,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Wait {
    None,
    Difs { elapsed: SimTime, interrupted: bool },
    Backoff { last_tick: SimTime, interrupted_at: Option<SimTime> },
}

#[derive(Debug)]
pub struct CsmaLinkTask {
    /// New frames enter at the front; the back is sent next.
    queue: VecDeque<NetworkMessage>,
    wait: Wait,
    backoff_remaining: Option<SimTime>,
    /// Deaf to channel checks until this instant while a frame is handed to PHY.
    forward_until: Option<SimTime>,
    generation: u64,
}

impl Default for CsmaLinkTask {
    fn default() -> Self {
        Self {
            queue: VecDeque::new(),
            wait: Wait::None,
            backoff_remaining: None,
            forward_until: None,
            generation: 0,
        }
    }
}

impl CsmaLinkTask {
    pub const HANDLED: &'static [EventKind] = &[
        EventKind::LinkSend,
        EventKind::LinkReceive,
        EventKind::LinkCheckChannelStatus,
        EventKind::LinkWaitForSending,
    ];

    pub fn new() -> Self {
        Self::default()
    }

    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }

    pub fn backoff_remaining(&self) -> Option<SimTime> {
        self.backoff_remaining
    }

    pub fn phase(&self, now: SimTime) -> CsmaPhase {
        if self.forward_until.is_some_and(|until| now < until) {
            return CsmaPhase::Transmitting;
        }
        match self.wait {
            Wait::Difs { .. } => CsmaPhase::WaitingDifs,
            Wait::Backoff { .. } => CsmaPhase::WaitingBackoff,
            Wait::None if self.backoff_remaining.is_some() => CsmaPhase::BackoffPending,
            Wait::None => CsmaPhase::Idle,
        }
    }

    pub fn handle(&mut self, event: &NetworkEvent, ctx: &mut TaskContext<'_>) -> Vec<ScheduledEvent> {
        match event.kind {
            EventKind::LinkSend => {
                let Some(mut message) = event.message.clone() else {
                    log::warn!("[{}] LinkSend without a message, ignoring", ctx.node_id());
                    return Vec::new();
                };
                link_prepare(ctx, &mut message);
                if message.wired {
                    // backhaul copies do not contend for the radio
                    return vec![ctx.forward(ctx.settings.delays.link_physical, EventKind::PhySendStart, message)];
                }
                self.queue.push_front(message);
                vec![ctx.immediately(EventKind::LinkCheckChannelStatus)]
            }
            EventKind::LinkReceive => match event.message.clone() {
                Some(message) => link_receive(ctx, message).into_iter().collect(),
                None => Vec::new(),
            },
            EventKind::LinkCheckChannelStatus => self.check_channel(ctx),
            EventKind::LinkWaitForSending => {
                if event.token != self.generation {
                    return Vec::new();
                }
                self.tick(ctx)
            }
            _ => Vec::new(),
        }
    }

    fn draw_backoff(ctx: &mut TaskContext<'_>) -> SimTime {
        let csma = &ctx.settings.csma;
        let upper = ((csma.cw_max as f64 * csma.broadcast_fraction).floor() as u32).max(csma.cw_min);
        let slots = ctx.rng.gen_range(csma.cw_min..=upper);
        slots as SimTime * csma.slot_ns
    }

    fn schedule_tick(&self, ctx: &TaskContext<'_>, delay: SimTime) -> ScheduledEvent {
        ctx.after(delay, NetworkEvent::for_node(ctx.node_id(), EventKind::LinkWaitForSending).with_token(self.generation))
    }

    fn check_channel(&mut self, ctx: &mut TaskContext<'_>) -> Vec<ScheduledEvent> {
        if let Some(until) = self.forward_until {
            if ctx.now < until {
                return Vec::new();
            }
            self.forward_until = None;
        }

        if ctx.channel_busy() {
            if !self.queue.is_empty() && self.backoff_remaining.is_none() {
                let backoff = Self::draw_backoff(ctx);
                log::trace!("[{}] CSMA channel busy, backoff {} ns", ctx.node_id(), backoff);
                self.backoff_remaining = Some(backoff);
            }
            match &mut self.wait {
                Wait::Difs { interrupted, .. } => *interrupted = true,
                Wait::Backoff { interrupted_at, .. } if interrupted_at.is_none() => *interrupted_at = Some(ctx.now),
                _ => {}
            }
            return Vec::new();
        }

        if !self.queue.is_empty() && self.wait == Wait::None {
            self.generation += 1;
            self.wait = Wait::Difs {
                elapsed: 0,
                interrupted: false,
            };
            return vec![self.schedule_tick(ctx, ctx.settings.csma.refresh_ns)];
        }
        Vec::new()
    }

    fn tick(&mut self, ctx: &mut TaskContext<'_>) -> Vec<ScheduledEvent> {
        let refresh = ctx.settings.csma.refresh_ns;
        match self.wait {
            Wait::None => Vec::new(),
            Wait::Difs { interrupted: true, .. } => {
                log::trace!("[{}] CSMA DIFS interrupted, retrying", ctx.node_id());
                self.abandon_wait(ctx)
            }
            Wait::Difs { elapsed, interrupted: false } => {
                let elapsed = elapsed + refresh;
                if elapsed < ctx.settings.csma.difs_ns {
                    self.wait = Wait::Difs {
                        elapsed,
                        interrupted: false,
                    };
                    return vec![self.schedule_tick(ctx, refresh)];
                }
                match self.backoff_remaining {
                    Some(remaining) if remaining > 0 => {
                        self.wait = Wait::Backoff {
                            last_tick: ctx.now,
                            interrupted_at: None,
                        };
                        vec![self.schedule_tick(ctx, refresh)]
                    }
                    _ => self.transmit(ctx),
                }
            }
            Wait::Backoff {
                last_tick,
                interrupted_at: Some(at),
            } => {
                let credited = (at - last_tick) / refresh * refresh;
                let remaining = self.backoff_remaining.unwrap_or(0).saturating_sub(credited);
                log::trace!("[{}] CSMA backoff interrupted, {} ns left", ctx.node_id(), remaining);
                self.backoff_remaining = Some(remaining);
                self.abandon_wait(ctx)
            }
            Wait::Backoff {
                last_tick,
                interrupted_at: None,
            } => {
                let remaining = self.backoff_remaining.unwrap_or(0).saturating_sub(ctx.now - last_tick);
                if remaining == 0 {
                    return self.transmit(ctx);
                }
                self.backoff_remaining = Some(remaining);
                self.wait = Wait::Backoff {
                    last_tick: ctx.now,
                    interrupted_at: None,
                };
                vec![self.schedule_tick(ctx, refresh)]
            }
        }
    }

    /// Stop waiting but keep the queue and any frozen backoff; re-check right away
    /// so an already idle channel starts a fresh DIFS.
    fn abandon_wait(&mut self, ctx: &TaskContext<'_>) -> Vec<ScheduledEvent> {
        self.wait = Wait::None;
        self.generation += 1;
        vec![ctx.immediately(EventKind::LinkCheckChannelStatus)]
    }

    fn transmit(&mut self, ctx: &mut TaskContext<'_>) -> Vec<ScheduledEvent> {
        self.wait = Wait::None;
        self.backoff_remaining = None;
        self.generation += 1;
        let Some(message) = self.queue.pop_back() else {
            return Vec::new();
        };
        let delay = ctx.settings.delays.link_physical.sample(ctx.rng);
        self.forward_until = Some(ctx.now + delay);
        log::trace!("[{}] CSMA forwarding {} to PHY, {} still queued", ctx.node_id(), message, self.queue.len());
        // frames queued meanwhile are picked up once the deaf window closes
        vec![
            ctx.after(delay, NetworkEvent::for_node(ctx.node_id(), EventKind::PhySendStart).with_message(message)),
            ctx.after(delay, NetworkEvent::for_node(ctx.node_id(), EventKind::LinkCheckChannelStatus)),
        ]
    }
}
