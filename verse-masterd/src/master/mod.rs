//! The master server engine.
//!
//! [`Master`] owns the admission queue, the registry and the list jobs, and
//! is driven by two entry points: [`Master::handle_message`] for every
//! inbound datagram and [`Master::tick`] for periodic maintenance. Neither
//! does I/O; outbound datagrams are returned as [`Outgoing`] values.

pub mod jobs;
pub mod list;
pub mod queue;
pub mod registry;

use std::net::SocketAddr;
use std::time::{Duration, Instant};
use chrono::{DateTime, Utc};
use serde::Serialize;
use shared::protocol::{parse_fields, Command, DESCRIBE_REQUEST};
use shared::tags::TagFilter;
use shared::types::{ServerAddress, ServerSummary};
use crate::config::MasterConfig;
use self::jobs::ListJobs;
use self::queue::AdmissionQueue;
use self::registry::{ServerEntry, ServerRegistry};

/// A datagram to send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outgoing {
    pub to: SocketAddr,
    pub payload: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct MasterStats {
    pub registered: usize,
    pub pending: usize,
    pub queue_load: usize,
    pub queue_capacity: usize,
    pub list_jobs: usize,
    pub uptime_secs: u64,
}

pub struct Master {
    queue: AdmissionQueue,
    registry: ServerRegistry,
    jobs: ListJobs,
    max_per_ip: usize,
    pending_timeout: Duration,
    packet_budget: usize,
    status_interval: Duration,
    last_status: Instant,
    started: Instant,
    started_at: DateTime<Utc>,
}

impl Master {
    pub fn new(config: &MasterConfig, now: Instant) -> Self {
        Self {
            queue: AdmissionQueue::new(config.queue_size),
            registry: ServerRegistry::new(config.server_timeout()),
            jobs: ListJobs::new(config.list_period()),
            max_per_ip: config.max_per_ip,
            pending_timeout: config.pending_timeout(),
            packet_budget: config.packet_budget,
            status_interval: config.status_interval(),
            last_status: now,
            started: now,
            started_at: Utc::now(),
        }
    }

    /// Dispatch one inbound datagram from `from`.
    pub fn handle_message(&mut self, from: SocketAddr, message: &str, now: Instant) -> Option<Outgoing> {
        let addr = ServerAddress::from(from);
        match Command::parse(message) {
            Some(Command::Announce) => self.announce(addr, now),
            Some(Command::Description(payload)) => {
                self.describe(addr, payload, now);
                None
            }
            Some(Command::Get(payload)) => {
                self.get(addr, payload, now);
                None
            }
            Some(Command::Describe(_)) | Some(Command::List(_)) | None => {
                tracing::debug!(%addr, text = message, "ignoring unrecognized message");
                None
            }
        }
    }

    fn announce(&mut self, addr: ServerAddress, now: Instant) -> Option<Outgoing> {
        if self.registry.touch(&addr, now) {
            tracing::debug!(%addr, "ANNOUNCE from known server, refreshed");
            return None;
        }

        let (pending, queued_same_ip) = self.queue.contains(&addr);
        if pending {
            // Our DESCRIBE may have been lost; ask again without taking a new slot.
            self.queue.refresh(&addr, now);
            tracing::debug!(%addr, "ANNOUNCE from pending server, asking again");
            return Some(describe_request(addr));
        }

        let same_ip = queued_same_ip + self.registry.count_ip(addr.ip());
        if same_ip >= self.max_per_ip {
            tracing::debug!(%addr, same_ip, "ignoring ANNOUNCE, too many endpoints on this IP");
            return None;
        }

        if let Some(evicted) = self.queue.enqueue(addr, now) {
            tracing::debug!(%evicted, "admission queue full, dropped oldest pending server");
        }
        tracing::info!(%addr, queued = self.queue.load(), "ANNOUNCE from unknown server, queued");
        Some(describe_request(addr))
    }

    fn describe(&mut self, addr: ServerAddress, payload: &str, now: Instant) {
        if let Some(entry) = self.registry.get_mut(&addr) {
            entry.touch(now);
            match parse_fields(payload) {
                Ok(fields) => entry.apply(&fields),
                Err(e) => tracing::debug!(%addr, error = %e, "malformed DESCRIPTION from known server"),
            }
            return;
        }

        if !self.queue.contains(&addr).0 {
            tracing::debug!(%addr, "ignoring DESCRIPTION from unannounced server");
            return;
        }

        let fields = match parse_fields(payload) {
            Ok(fields) => fields,
            Err(e) => {
                tracing::debug!(%addr, error = %e, "dropping malformed DESCRIPTION");
                return;
            }
        };

        self.queue.unqueue(&addr);
        let mut entry = ServerEntry::new(addr, self.wall_clock(now), now);
        entry.apply(&fields);
        self.registry.insert(entry);
        tracing::info!(%addr, registered = self.registry.len(), "registered server");
    }

    fn get(&mut self, addr: ServerAddress, payload: &str, now: Instant) {
        let fields = match parse_fields(payload) {
            Ok(fields) => fields,
            Err(e) => {
                tracing::debug!(%addr, error = %e, "dropping malformed GET");
                return;
            }
        };

        let requested = fields.requested();
        let filter = fields.tag_filter();
        let packets = list::build_packets(
            self.registry.entries(),
            &requested,
            &filter,
            self.packet_budget,
        );
        tracing::debug!(%addr, ?requested, ?filter, packets = packets.len(), "GET");
        self.jobs.add(addr.socket_addr(), packets, now);
    }

    /// Periodic maintenance: advance list deliveries, expire silent servers
    /// and stale pending slots.
    pub fn tick(&mut self, now: Instant) -> Vec<Outgoing> {
        let out = self.jobs.flush(now);

        for entry in self.registry.sweep(now) {
            tracing::info!(
                addr = %entry.address,
                idle_secs = entry.idle(now).as_secs_f32(),
                "dropping expired server"
            );
        }

        let stale = self.queue.expire(now, self.pending_timeout);
        if !stale.is_empty() {
            tracing::debug!(count = stale.len(), "expired pending servers that never described themselves");
        }

        if now.saturating_duration_since(self.last_status) >= self.status_interval {
            tracing::info!(
                registered = self.registry.len(),
                pending = self.queue.occupied(),
                list_jobs = self.jobs.len(),
                "status"
            );
            self.last_status = now;
        }

        out
    }

    pub fn stats(&self, now: Instant) -> MasterStats {
        MasterStats {
            registered: self.registry.len(),
            pending: self.queue.occupied(),
            queue_load: self.queue.load(),
            queue_capacity: self.queue.capacity(),
            list_jobs: self.jobs.len(),
            uptime_secs: now.saturating_duration_since(self.started).as_secs(),
        }
    }

    /// Registered servers passing `filter`, in address order.
    pub fn snapshot(&self, filter: &TagFilter, now: Instant) -> Vec<ServerSummary> {
        let timeout = self.registry_timeout();
        self.registry
            .entries()
            .filter(|e| filter.matches(&e.tags))
            .map(|e| e.summary(now, timeout))
            .collect()
    }

    pub fn server(&self, addr: &ServerAddress, now: Instant) -> Option<ServerSummary> {
        self.registry
            .get(addr)
            .map(|e| e.summary(now, self.registry_timeout()))
    }

    #[cfg(test)]
    fn registry(&self) -> &ServerRegistry {
        &self.registry
    }

    #[cfg(test)]
    fn queue(&self) -> &AdmissionQueue {
        &self.queue
    }

    /// Wall-clock time of `now`, anchored at startup.
    fn wall_clock(&self, now: Instant) -> DateTime<Utc> {
        chrono::Duration::from_std(now.saturating_duration_since(self.started))
            .map(|elapsed| self.started_at + elapsed)
            .unwrap_or(self.started_at)
    }

    fn registry_timeout(&self) -> Duration {
        self.registry.timeout()
    }
}

fn describe_request(addr: ServerAddress) -> Outgoing {
    Outgoing {
        to: addr.socket_addr(),
        payload: DESCRIBE_REQUEST.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn master() -> (Master, Instant) {
        let now = Instant::now();
        (Master::new(&MasterConfig::default(), now), now)
    }

    fn sock(s: &str) -> SocketAddr {
        ServerAddress::parse(s).unwrap().socket_addr()
    }

    fn register(m: &mut Master, addr: &str, description: &str, now: Instant) {
        let from = sock(addr);
        assert!(m.handle_message(from, "ANNOUNCE", now).is_some());
        assert!(m.handle_message(from, description, now).is_none());
    }

    #[test]
    fn test_end_to_end_scenario() {
        let (mut m, now) = master();
        let server = sock("10.0.0.5:4950");
        let client = sock("192.168.1.20:40000");

        let reply = m.handle_message(server, "ANNOUNCE", now).unwrap();
        assert_eq!(reply.to, server);
        assert_eq!(reply.payload, "DESCRIBE DE,TA");

        m.handle_message(server, r#"DESCRIPTION DE="My Server" TA=open,sweden"#, now);
        assert_eq!(m.registry().len(), 1);
        assert_eq!(m.queue().occupied(), 0);

        assert!(m.handle_message(client, r#"GET IP="DE" TA=open"#, now).is_none());
        let out = m.tick(now);
        assert_eq!(
            out,
            vec![Outgoing {
                to: client,
                payload: r#"LIST IP=10.0.0.5 DE="My Server""#.to_string(),
            }]
        );
        assert_eq!(m.stats(now).list_jobs, 0);
    }

    #[test]
    fn test_registered_at_follows_injected_clock() {
        let (mut m, now) = master();
        let later = now + Duration::from_secs(90);
        register(&mut m, "10.0.0.5", "DESCRIPTION DE=a", later);

        let summary = m.server(&ServerAddress::parse("10.0.0.5").unwrap(), later).unwrap();
        assert_eq!(summary.registered_at, m.started_at + chrono::Duration::seconds(90));
    }

    #[test]
    fn test_legacy_prefix() {
        let (mut m, now) = master();
        let server = sock("10.0.0.5:5000");
        assert!(m.handle_message(server, "MS:ANNOUNCE", now).is_some());
        m.handle_message(server, "DESCRIPTION DE=x", now);
        m.handle_message(sock("10.0.0.7:1"), "MS:GET IP=DE", now);
        assert_eq!(m.tick(now)[0].payload, "LIST IP=10.0.0.5:5000 DE=\"x\"");
    }

    #[test]
    fn test_announce_from_registered_server_only_touches() {
        let (mut m, now) = master();
        register(&mut m, "10.0.0.5", "DESCRIPTION DE=a", now);

        let later = now + Duration::from_secs(60);
        assert!(m.handle_message(sock("10.0.0.5"), "ANNOUNCE", later).is_none());
        assert!(m.handle_message(sock("10.0.0.5"), "ANNOUNCE", later).is_none());

        assert_eq!(m.registry().len(), 1);
        assert_eq!(m.queue().occupied(), 0);
        let entry = m.registry().get(&ServerAddress::from(sock("10.0.0.5"))).unwrap();
        assert_eq!(entry.last_seen, later);
    }

    #[test]
    fn test_repeated_announce_while_pending_reuses_slot() {
        let (mut m, now) = master();
        let server = sock("10.0.0.5");
        assert!(m.handle_message(server, "ANNOUNCE", now).is_some());
        assert!(m.handle_message(server, "ANNOUNCE", now).is_some());
        assert_eq!(m.queue().occupied(), 1);
        assert!(m.registry().is_empty());
    }

    #[test]
    fn test_per_ip_cap() {
        let (mut m, now) = master();
        register(&mut m, "10.0.0.5:1", "DESCRIPTION", now);
        register(&mut m, "10.0.0.5:2", "DESCRIPTION", now);
        assert!(m.handle_message(sock("10.0.0.5:3"), "ANNOUNCE", now).is_some());
        assert!(m.handle_message(sock("10.0.0.5:4"), "ANNOUNCE", now).is_some());

        assert!(m.handle_message(sock("10.0.0.5:5"), "ANNOUNCE", now).is_none());
        let fifth = ServerAddress::from(sock("10.0.0.5:5"));
        assert!(!m.queue().contains(&fifth).0);
        assert!(!m.registry().contains(&fifth));

        // Other hosts are unaffected.
        assert!(m.handle_message(sock("10.0.0.6:1"), "ANNOUNCE", now).is_some());
    }

    #[test]
    fn test_per_ip_cap_frees_up_on_expiry() {
        let (mut m, now) = master();
        for port in 1..=4 {
            register(&mut m, &format!("10.0.0.5:{}", port), "DESCRIPTION", now);
        }
        assert!(m.handle_message(sock("10.0.0.5:5"), "ANNOUNCE", now).is_none());

        let later = now + Duration::from_secs(137);
        m.tick(later);
        assert!(m.registry().is_empty());
        assert!(m.handle_message(sock("10.0.0.5:5"), "ANNOUNCE", later).is_some());
    }

    #[test]
    fn test_orphan_description_ignored() {
        let (mut m, now) = master();
        m.handle_message(sock("10.0.0.5"), "DESCRIPTION DE=sneaky", now);
        assert!(m.registry().is_empty());
    }

    #[test]
    fn test_malformed_description_leaves_server_pending() {
        let (mut m, now) = master();
        let server = sock("10.0.0.5");
        m.handle_message(server, "ANNOUNCE", now);
        m.handle_message(server, r#"DESCRIPTION DE="unterminated"#, now);
        assert!(m.registry().is_empty());
        assert_eq!(m.queue().occupied(), 1);

        m.handle_message(server, "DESCRIPTION DE=fixed", now);
        assert_eq!(m.registry().len(), 1);
        assert_eq!(m.queue().occupied(), 0);
    }

    #[test]
    fn test_redescription_replaces_tags() {
        let (mut m, now) = master();
        register(&mut m, "10.0.0.5", "DESCRIPTION DE=a TA=open,sweden", now);
        m.handle_message(sock("10.0.0.5"), "DESCRIPTION TA=norway", now);

        let entry = m.registry().get(&ServerAddress::from(sock("10.0.0.5"))).unwrap();
        assert_eq!(entry.description, "");
        assert_eq!(entry.tags.iter().collect::<Vec<_>>(), vec!["norway"]);
        assert_eq!(m.registry().len(), 1);
    }

    #[test]
    fn test_malformed_get_dropped() {
        let (mut m, now) = master();
        register(&mut m, "10.0.0.5", "DESCRIPTION", now);
        m.handle_message(sock("10.0.0.7:1"), "GET IP=DE TA", now);
        assert!(m.tick(now).is_empty());
    }

    #[test]
    fn test_get_with_no_matches_sends_nothing() {
        let (mut m, now) = master();
        register(&mut m, "10.0.0.5", "DESCRIPTION TA=open", now);
        m.handle_message(sock("10.0.0.7:1"), "GET TA=closed", now);
        assert!(m.tick(now).is_empty());
        assert_eq!(m.stats(now).list_jobs, 0);
    }

    #[test]
    fn test_get_without_fields_lists_addresses() {
        let (mut m, now) = master();
        register(&mut m, "10.0.0.5", "DESCRIPTION DE=a", now);
        register(&mut m, "10.0.0.6:7000", "DESCRIPTION DE=b", now);
        m.handle_message(sock("10.0.0.7:1"), "GET", now);
        assert_eq!(m.tick(now)[0].payload, "LIST IP=10.0.0.5 IP=10.0.0.6:7000");
    }

    #[test]
    fn test_unknown_messages_ignored() {
        let (mut m, now) = master();
        assert!(m.handle_message(sock("10.0.0.5"), "HELLO", now).is_none());
        assert!(m.handle_message(sock("10.0.0.5"), "LIST IP=1.2.3.4", now).is_none());
        assert!(m.handle_message(sock("10.0.0.5"), "DESCRIBE DE", now).is_none());
        assert!(m.registry().is_empty());
        assert_eq!(m.queue().occupied(), 0);
    }

    #[test]
    fn test_tick_expires_registered_and_pending() {
        let (mut m, now) = master();
        register(&mut m, "10.0.0.5", "DESCRIPTION", now);
        m.handle_message(sock("10.0.0.6"), "ANNOUNCE", now);

        let just_before = now + Duration::from_millis(136_999);
        m.tick(just_before);
        assert_eq!(m.registry().len(), 1);
        assert_eq!(m.queue().occupied(), 1);

        m.tick(now + Duration::from_secs(137));
        assert!(m.registry().is_empty());
        assert_eq!(m.queue().occupied(), 0);
    }

    #[test]
    fn test_snapshot_and_stats() {
        let (mut m, now) = master();
        register(&mut m, "10.0.0.5", "DESCRIPTION DE=a TA=open", now);
        register(&mut m, "10.0.0.6", "DESCRIPTION DE=b TA=dev", now);
        m.handle_message(sock("10.0.0.7"), "ANNOUNCE", now);

        let all = m.snapshot(&TagFilter::default(), now);
        assert_eq!(all.len(), 2);
        let open = m.snapshot(&TagFilter::parse("-dev"), now);
        assert_eq!(open.len(), 1);
        assert_eq!(open[0].description, "a");

        assert!(m.server(&ServerAddress::parse("10.0.0.6").unwrap(), now).is_some());
        assert!(m.server(&ServerAddress::parse("10.0.0.7").unwrap(), now).is_none());

        let stats = m.stats(now + Duration::from_secs(5));
        assert_eq!(stats.registered, 2);
        assert_eq!(stats.pending, 1);
        assert_eq!(stats.queue_capacity, 512);
        assert_eq!(stats.uptime_secs, 5);
    }
}
