//! Paced delivery of multi-packet LIST replies.
//!
//! Each requester gets at most one packet per `period`, however large its
//! result. Delivery is fire-and-forget: a lost packet truncates that reply.

use std::collections::VecDeque;
use std::net::SocketAddr;
use std::time::{Duration, Instant};
use super::Outgoing;

#[derive(Debug)]
struct ListJob {
    target: SocketAddr,
    packets: VecDeque<String>,
    sent: usize,
    created: Instant,
    last_sent: Option<Instant>,
}

impl ListJob {
    fn is_due(&self, now: Instant, period: Duration) -> bool {
        match self.last_sent {
            Some(t) => now.saturating_duration_since(t) >= period,
            None => true,
        }
    }
}

#[derive(Debug)]
pub struct ListJobs {
    jobs: Vec<ListJob>,
    period: Duration,
}

impl ListJobs {
    pub fn new(period: Duration) -> Self {
        Self {
            jobs: Vec::new(),
            period,
        }
    }

    /// Queue `packets` for `target`. An empty reply is not queued. A target
    /// with a job already in flight has its remaining packets replaced and
    /// keeps its pacing.
    pub fn add(&mut self, target: SocketAddr, packets: Vec<String>, now: Instant) -> bool {
        if packets.is_empty() {
            return false;
        }

        if let Some(job) = self.jobs.iter_mut().find(|j| j.target == target) {
            tracing::debug!(client = %target, dropped = job.packets.len(), "replacing list job");
            job.packets = packets.into();
            job.sent = 0;
            job.created = now;
        } else {
            self.jobs.push(ListJob {
                target,
                packets: packets.into(),
                sent: 0,
                created: now,
                last_sent: None,
            });
        }
        true
    }

    /// Emit the next packet of every job whose period has elapsed, and
    /// retire jobs that run out of packets.
    pub fn flush(&mut self, now: Instant) -> Vec<Outgoing> {
        let period = self.period;
        let mut out = Vec::new();

        self.jobs.retain_mut(|job| {
            if job.is_due(now, period) {
                if let Some(payload) = job.packets.pop_front() {
                    out.push(Outgoing {
                        to: job.target,
                        payload,
                    });
                    job.sent += 1;
                    job.last_sent = Some(now);
                }
            }

            if job.packets.is_empty() {
                tracing::info!(
                    client = %job.target,
                    packets = job.sent,
                    elapsed_ms = now.saturating_duration_since(job.created).as_millis() as u64,
                    "sent LIST reply"
                );
                return false;
            }
            true
        });

        out
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    /// Packets still waiting for `target`.
    #[cfg(test)]
    pub fn pending_for(&self, target: SocketAddr) -> usize {
        self.jobs
            .iter()
            .find(|j| j.target == target)
            .map_or(0, |j| j.packets.len())
    }
}
