//! Table of confirmed servers, keyed by canonical address.

use std::collections::{BTreeMap, BTreeSet};
use std::net::IpAddr;
use std::time::{Duration, Instant};
use chrono::{DateTime, Utc};
use shared::protocol::Fields;
use shared::types::{ServerAddress, ServerSummary};

/// A server that completed the describe handshake.
#[derive(Debug, Clone)]
pub struct ServerEntry {
    pub address: ServerAddress,

    /// Free-text description, unescaped
    pub description: String,

    pub tags: BTreeSet<String>,

    pub registered_at: DateTime<Utc>,

    /// Last ANNOUNCE or DESCRIPTION
    pub last_seen: Instant,
}

impl ServerEntry {
    pub fn new(address: ServerAddress, registered_at: DateTime<Utc>, now: Instant) -> Self {
        Self {
            address,
            description: String::new(),
            tags: BTreeSet::new(),
            registered_at,
            last_seen: now,
        }
    }

    /// Take description and tags from a DESCRIPTION. Both are replaced
    /// wholesale; a missing field resets to empty.
    pub fn apply(&mut self, fields: &Fields) {
        self.description = fields.description().unwrap_or_default().to_string();
        self.tags = fields.tags().unwrap_or_default();
    }

    pub fn touch(&mut self, now: Instant) {
        self.last_seen = now;
    }

    pub fn idle(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.last_seen)
    }

    pub fn is_expired(&self, now: Instant, timeout: Duration) -> bool {
        self.idle(now) >= timeout
    }

    pub fn summary(&self, now: Instant, timeout: Duration) -> ServerSummary {
        let idle = self.idle(now);
        ServerSummary {
            address: self.address,
            description: self.description.clone(),
            tags: self.tags.clone(),
            registered_at: self.registered_at,
            idle_secs: idle.as_secs(),
            expires_in_secs: timeout.saturating_sub(idle).as_secs(),
        }
    }
}

#[derive(Debug)]
pub struct ServerRegistry {
    servers: BTreeMap<ServerAddress, ServerEntry>,
    timeout: Duration,
}

impl ServerRegistry {
    pub fn new(timeout: Duration) -> Self {
        Self {
            servers: BTreeMap::new(),
            timeout,
        }
    }

    /// Insert or replace the entry for its address. Returns true if the
    /// address was not registered before.
    pub fn insert(&mut self, entry: ServerEntry) -> bool {
        self.servers.insert(entry.address, entry).is_none()
    }

    pub fn get(&self, addr: &ServerAddress) -> Option<&ServerEntry> {
        self.servers.get(addr)
    }

    pub fn get_mut(&mut self, addr: &ServerAddress) -> Option<&mut ServerEntry> {
        self.servers.get_mut(addr)
    }

    #[cfg(test)]
    pub fn contains(&self, addr: &ServerAddress) -> bool {
        self.servers.contains_key(addr)
    }

    /// Refresh the last-seen time of a registered server. Returns false if
    /// the address is not registered.
    pub fn touch(&mut self, addr: &ServerAddress, now: Instant) -> bool {
        match self.servers.get_mut(addr) {
            Some(entry) => {
                entry.touch(now);
                true
            }
            None => false,
        }
    }

    /// Number of registered endpoints on `ip`.
    pub fn count_ip(&self, ip: IpAddr) -> usize {
        self.servers.keys().filter(|a| a.ip() == ip).count()
    }

    /// Remove every server not heard from within the timeout.
    pub fn sweep(&mut self, now: Instant) -> Vec<ServerEntry> {
        let timeout = self.timeout;
        let expired: Vec<ServerAddress> = self
            .servers
            .values()
            .filter(|e| e.is_expired(now, timeout))
            .map(|e| e.address)
            .collect();

        expired
            .iter()
            .filter_map(|addr| self.servers.remove(addr))
            .collect()
    }

    /// Entries in address order.
    pub fn entries(&self) -> impl Iterator<Item = &ServerEntry> {
        self.servers.values()
    }

    pub fn len(&self) -> usize {
        self.servers.len()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.servers.is_empty()
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}
