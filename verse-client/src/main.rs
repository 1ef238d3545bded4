//! Test client for the Verse master server.
//!
//! ```bash
//! # List servers tagged "open" but not "r6p0", with descriptions
//! verse-client --master localhost get --tags open,-r6p0
//!
//! # Pose as a server and stay registered
//! verse-client announce --bind 0.0.0.0:4950 --description "My Server" --tags open,sweden
//! ```

use std::net::SocketAddr;
use std::time::Duration;
use clap::{Parser, Subcommand};
use tokio::net::{lookup_host, UdpSocket};
use tokio::time::Instant;
use anyhow::{Context, Result};
use shared::protocol::{
    parse_list, Command, Fields, CMD_ANNOUNCE, CMD_DESCRIPTION, CMD_GET, DEFAULT_PORT,
    FIELD_ADDRESS, FIELD_DESCRIPTION, FIELD_TAGS,
};

#[derive(Parser, Debug)]
#[command(name = "verse-client")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Master server, as HOST[:PORT]
    #[arg(short, long, default_value = "localhost", global = true)]
    master: String,

    #[command(subcommand)]
    mode: Mode,
}

#[derive(Subcommand, Debug)]
enum Mode {
    /// Ask the master for its list of servers and print it
    Get {
        /// Tag filter, e.g. open,sweden,-r6p0
        #[arg(short, long)]
        tags: Option<String>,

        /// Per-server fields to ask for
        #[arg(short, long, default_value = "DE")]
        fields: String,

        /// Seconds to wait for replies; negative waits forever
        #[arg(short, long, default_value_t = 10.0, allow_negative_numbers = true)]
        duration: f64,

        /// Print LIST packets as received instead of decoding them
        #[arg(long)]
        raw: bool,
    },

    /// Register with the master as a server and keep the registration alive
    Announce {
        /// Local address to send from; the master registers this address
        #[arg(short, long, default_value = "0.0.0.0:0")]
        bind: SocketAddr,

        #[arg(short, long, default_value = "")]
        description: String,

        /// Comma-separated tags
        #[arg(short, long)]
        tags: Option<String>,

        /// Seconds between ANNOUNCEs
        #[arg(short, long, default_value_t = 60)]
        interval: u64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("verse_client=info"))
        )
        .with_writer(std::io::stderr)
        .init();

    let master = resolve(&args.master).await?;

    match args.mode {
        Mode::Get { tags, fields, duration, raw } => {
            get(master, tags, &fields, duration, raw).await
        }
        Mode::Announce { bind, description, tags, interval } => {
            announce(master, bind, &description, tags, Duration::from_secs(interval.max(1))).await
        }
    }
}

/// Resolve HOST[:PORT], defaulting to the master's well-known port.
async fn resolve(master: &str) -> Result<SocketAddr> {
    let target = if master.contains(':') && !master.starts_with('[') && master.matches(':').count() > 1 {
        // Bare IPv6 literal
        format!("[{}]:{}", master, DEFAULT_PORT)
    } else if master.contains(':') {
        master.to_string()
    } else {
        format!("{}:{}", master, DEFAULT_PORT)
    };

    let addr = lookup_host(&target)
        .await
        .with_context(|| format!("Failed to resolve {}", master))?
        .next()
        .with_context(|| format!("No address found for {}", master))?;
    Ok(addr)
}

async fn bind_for(master: SocketAddr) -> Result<UdpSocket> {
    let local = if master.is_ipv6() { "[::]:0" } else { "0.0.0.0:0" };
    UdpSocket::bind(local)
        .await
        .with_context(|| format!("Failed to bind to {}", local))
}

async fn get(master: SocketAddr, tags: Option<String>, fields: &str, duration: f64, raw: bool) -> Result<()> {
    let socket = bind_for(master).await?;

    let mut request = Fields::new();
    request.insert(FIELD_ADDRESS, fields);
    if let Some(tags) = tags {
        request.insert(FIELD_TAGS, tags);
    }
    let message = format!("{} {}", CMD_GET, request);
    socket
        .send_to(message.as_bytes(), master)
        .await
        .with_context(|| format!("Failed to send GET to {}", master))?;
    tracing::debug!(%master, %message, "sent");

    let deadline = (duration >= 0.0).then(|| Instant::now() + Duration::from_secs_f64(duration));
    let mut buf = vec![0u8; 64 * 1024];

    loop {
        let received = match deadline {
            Some(deadline) => match tokio::time::timeout_at(deadline, socket.recv_from(&mut buf)).await {
                Ok(received) => received,
                Err(_) => break,
            },
            None => socket.recv_from(&mut buf).await,
        };
        let (len, from) = received.context("Failed to receive")?;
        let text = String::from_utf8_lossy(&buf[..len]);

        if from != master {
            println!("Datagram from unknown host at {}: {}", from, text);
            continue;
        }
        if raw {
            println!("{}", text);
            continue;
        }

        match Command::parse(&text) {
            Some(Command::List(tail)) => match parse_list(tail) {
                Ok(servers) => {
                    for server in servers {
                        let mut line = server.address.list_form();
                        for (key, value) in server.fields.iter() {
                            line.push_str(&format!(" {}={:?}", key, value));
                        }
                        println!("{}", line);
                    }
                }
                Err(e) => tracing::warn!(error = %e, "malformed LIST packet"),
            },
            _ => tracing::warn!(%text, "unexpected reply from master"),
        }
    }

    Ok(())
}

async fn announce(
    master: SocketAddr,
    bind: SocketAddr,
    description: &str,
    tags: Option<String>,
    interval: Duration,
) -> Result<()> {
    let socket = UdpSocket::bind(bind)
        .await
        .with_context(|| format!("Failed to bind to {}", bind))?;
    tracing::info!(local = %socket.local_addr()?, %master, "announcing");

    let mut fields = Fields::new();
    fields.insert(FIELD_DESCRIPTION, description);
    if let Some(tags) = tags {
        fields.insert(FIELD_TAGS, tags);
    }
    let description = format!("{} {}", CMD_DESCRIPTION, fields);

    let mut ticker = tokio::time::interval(interval);
    let mut buf = vec![0u8; 64 * 1024];
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if let Err(e) = socket.send_to(CMD_ANNOUNCE.as_bytes(), master).await {
                    tracing::warn!(error = %e, "Failed to send ANNOUNCE");
                }
            }
            received = socket.recv_from(&mut buf) => {
                let (len, from) = received.context("Failed to receive")?;
                let text = String::from_utf8_lossy(&buf[..len]);
                match Command::parse(&text) {
                    Some(Command::Describe(_)) if from == master => {
                        tracing::info!("master asked for a description, replying");
                        if let Err(e) = socket.send_to(description.as_bytes(), master).await {
                            tracing::warn!(error = %e, "Failed to send DESCRIPTION");
                        }
                    }
                    _ => tracing::debug!(%from, %text, "ignoring datagram"),
                }
            }
            _ = &mut ctrl_c => {
                tracing::info!("stopping; the master drops us once the timeout passes");
                break;
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_resolve_defaults_port() {
        assert_eq!(resolve("127.0.0.1").await.unwrap(), "127.0.0.1:4950".parse::<SocketAddr>().unwrap());
        assert_eq!(resolve("127.0.0.1:5000").await.unwrap(), "127.0.0.1:5000".parse::<SocketAddr>().unwrap());
        assert_eq!(resolve("::1").await.unwrap(), "[::1]:4950".parse::<SocketAddr>().unwrap());
        assert_eq!(resolve("[::1]:5000").await.unwrap(), "[::1]:5000".parse::<SocketAddr>().unwrap());
    }

    #[tokio::test]
    async fn test_resolve_rejects_bad_port() {
        assert!(resolve("127.0.0.1:notaport").await.is_err());
    }
}
