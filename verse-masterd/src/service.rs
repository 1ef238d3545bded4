use std::time::{Duration, Instant};
use tokio::net::UdpSocket;
use tokio::sync::{mpsc, oneshot};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use anyhow::Result;
use shared::tags::TagFilter;
use shared::types::{ServerAddress, ServerSummary};
use crate::master::{Master, MasterStats, Outgoing};

/// Largest datagram we accept; anything longer is truncated by the kernel
/// and then fails to parse.
const MAX_DATAGRAM: usize = 64 * 1024;

/// Queries answered by the master loop
pub enum MasterCommand {
    Snapshot(TagFilter, oneshot::Sender<Vec<ServerSummary>>),
    GetOne(ServerAddress, oneshot::Sender<Option<ServerSummary>>),
    Stats(oneshot::Sender<MasterStats>),
}

/// Handle to query the master loop from other tasks
#[derive(Clone)]
pub struct MasterHandle {
    tx: mpsc::Sender<MasterCommand>,
}

impl MasterHandle {
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<MasterCommand>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self { tx }, rx)
    }

    /// Registered servers passing `filter`
    pub async fn snapshot(&self, filter: TagFilter) -> Result<Vec<ServerSummary>> {
        let (reply, rx) = oneshot::channel();
        self.tx.send(MasterCommand::Snapshot(filter, reply)).await?;
        Ok(rx.await?)
    }

    pub async fn get_one(&self, addr: ServerAddress) -> Result<Option<ServerSummary>> {
        let (reply, rx) = oneshot::channel();
        self.tx.send(MasterCommand::GetOne(addr, reply)).await?;
        Ok(rx.await?)
    }

    pub async fn stats(&self) -> Result<MasterStats> {
        let (reply, rx) = oneshot::channel();
        self.tx.send(MasterCommand::Stats(reply)).await?;
        Ok(rx.await?)
    }
}

/// Master event loop - owns the master state and is the only task that
/// touches it. Every datagram, tick and query is handled to completion
/// before the next one.
pub async fn run(
    mut master: Master,
    socket: UdpSocket,
    mut commands: mpsc::Receiver<MasterCommand>,
    tick_interval: Duration,
    cancel: CancellationToken,
) -> Result<()> {
    let mut ticker = tokio::time::interval(tick_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut buf = vec![0u8; MAX_DATAGRAM];

    loop {
        tokio::select! {
            result = socket.recv_from(&mut buf) => {
                match result {
                    Ok((len, from)) => match std::str::from_utf8(&buf[..len]) {
                        Ok(message) => {
                            if let Some(out) = master.handle_message(from, message, Instant::now()) {
                                send(&socket, out).await;
                            }
                        }
                        Err(_) => {
                            tracing::debug!(%from, len, "dropping non-UTF-8 datagram");
                        }
                    },
                    Err(e) => {
                        tracing::warn!(error = %e, "recv_from failed");
                    }
                }
            }
            _ = ticker.tick() => {
                for out in master.tick(Instant::now()) {
                    send(&socket, out).await;
                }
            }
            Some(cmd) = commands.recv() => {
                let now = Instant::now();
                match cmd {
                    MasterCommand::Snapshot(filter, reply) => {
                        let _ = reply.send(master.snapshot(&filter, now));
                    }
                    MasterCommand::GetOne(addr, reply) => {
                        let _ = reply.send(master.server(&addr, now));
                    }
                    MasterCommand::Stats(reply) => {
                        let _ = reply.send(master.stats(now));
                    }
                }
            }
            _ = cancel.cancelled() => {
                tracing::info!("Master loop shutting down");
                break;
            }
        }
    }

    Ok(())
}

async fn send(socket: &UdpSocket, out: Outgoing) {
    if let Err(e) = socket.send_to(out.payload.as_bytes(), out.to).await {
        tracing::warn!(to = %out.to, error = %e, "send_to failed");
    }
}
