//! Admission queue for servers that announced but have not described
//! themselves yet.
//!
//! A fixed ring of slots. When full, a new announce overwrites the slot at
//! the write cursor, so memory stays bounded under an announce flood at the
//! price of losing the oldest pending registration. That server re-announces
//! and gets another chance.

use std::time::{Duration, Instant};
use shared::types::ServerAddress;

#[derive(Debug, Clone)]
struct Slot {
    addr: ServerAddress,
    queued_at: Instant,
}

#[derive(Debug)]
pub struct AdmissionQueue {
    slots: Vec<Option<Slot>>,
    next: usize,
    load: usize,
}

impl AdmissionQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            slots: vec![None; capacity.max(1)],
            next: 0,
            load: 0,
        }
    }

    /// Put `addr` in the slot at the write cursor. Returns the pending
    /// address that was overwritten, if the slot was live.
    pub fn enqueue(&mut self, addr: ServerAddress, now: Instant) -> Option<ServerAddress> {
        let evicted = self.slots[self.next].replace(Slot { addr, queued_at: now });
        self.next = (self.next + 1) % self.slots.len();
        self.load = self.load.wrapping_add(1);
        evicted.map(|slot| slot.addr)
    }

    /// Clear the slot holding exactly `addr`.
    pub fn unqueue(&mut self, addr: &ServerAddress) -> bool {
        match self.position(addr) {
            Some(i) => {
                self.slots[i] = None;
                self.load = self.load.saturating_sub(1);
                true
            }
            None => false,
        }
    }

    /// Returns whether `addr` itself is queued, and how many other queued
    /// endpoints share its IP.
    pub fn contains(&self, addr: &ServerAddress) -> (bool, usize) {
        let mut found = false;
        let mut same_ip = 0;
        for slot in self.slots.iter().flatten() {
            if slot.addr == *addr {
                found = true;
            } else if slot.addr.ip() == addr.ip() {
                same_ip += 1;
            }
        }
        (found, same_ip)
    }

    /// Restart the pending clock of a queued address.
    pub fn refresh(&mut self, addr: &ServerAddress, now: Instant) -> bool {
        match self.position(addr) {
            Some(i) => {
                if let Some(slot) = self.slots[i].as_mut() {
                    slot.queued_at = now;
                }
                true
            }
            None => false,
        }
    }

    /// Drop pending entries that waited longer than `timeout` for their
    /// description.
    pub fn expire(&mut self, now: Instant, timeout: Duration) -> Vec<ServerAddress> {
        let mut expired = Vec::new();
        for slot in self.slots.iter_mut() {
            let stale = slot
                .as_ref()
                .is_some_and(|s| now.saturating_duration_since(s.queued_at) >= timeout);
            if stale {
                if let Some(s) = slot.take() {
                    expired.push(s.addr);
                }
            }
        }
        self.load = self.load.saturating_sub(expired.len());
        expired
    }

    /// Announce counter as shown in logs. Not an occupancy count; see
    /// [`occupied`](Self::occupied).
    pub fn load(&self) -> usize {
        self.load % self.slots.len()
    }

    pub fn occupied(&self) -> usize {
        self.slots.iter().flatten().count()
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    fn position(&self, addr: &ServerAddress) -> Option<usize> {
        self.slots
            .iter()
            .position(|slot| slot.as_ref().is_some_and(|s| s.addr == *addr))
    }
}
