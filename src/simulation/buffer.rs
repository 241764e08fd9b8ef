//! Bounded, time-windowed log of recently received messages.
//!
//! Each node keeps two of these, keyed by MAC sender and by IPv6 sender. They
//! double as the neighbour table: an entry is soft state that is only valid
//! for `freshness_ns` after it was recorded and is purged afterwards.

use std::collections::VecDeque;

use super::message::NetworkMessage;
use super::time::SimTime;

#[derive(Debug, Clone)]
pub struct BufferEntry {
    pub key: String,
    pub received_at: SimTime,
    pub message: NetworkMessage,
}

#[derive(Debug, Clone)]
pub struct RecentMessageBuffer {
    entries: VecDeque<BufferEntry>,
    capacity: usize,
    freshness_ns: SimTime,
}

impl RecentMessageBuffer {
    pub fn new(capacity: usize, freshness_ns: SimTime) -> Self {
        Self {
            entries: VecDeque::with_capacity(capacity.min(64)),
            capacity,
            freshness_ns,
        }
    }

    /// Record a message, purging expired entries and evicting the oldest if full.
    pub fn push(&mut self, key: &str, now: SimTime, message: NetworkMessage) {
        self.purge(now);
        if self.capacity == 0 {
            return;
        }
        while self.entries.len() >= self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(BufferEntry {
            key: key.to_string(),
            received_at: now,
            message,
        });
    }

    /// Drop every entry older than the freshness window. Returns how many were dropped.
    pub fn purge(&mut self, now: SimTime) -> usize {
        let before = self.entries.len();
        let window = self.freshness_ns;
        self.entries.retain(|e| now.saturating_sub(e.received_at) <= window);
        before - self.entries.len()
    }

    /// Most recent fresh entry for `key`.
    pub fn latest(&self, key: &str, now: SimTime) -> Option<&BufferEntry> {
        self.entries
            .iter()
            .rev()
            .find(|e| e.key == key && now.saturating_sub(e.received_at) <= self.freshness_ns)
    }

    /// Distinct keys with at least one fresh entry, in first-seen order.
    pub fn neighbors(&self, now: SimTime) -> Vec<String> {
        let mut keys: Vec<String> = Vec::new();
        for entry in &self.entries {
            if now.saturating_sub(entry.received_at) <= self.freshness_ns && !keys.contains(&entry.key) {
                keys.push(entry.key.clone());
            }
        }
        keys
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}
