use std::collections::BTreeSet;
use serde::Serialize;
use sha2::{Sha256, Digest};
use shared::types::{ServerAddress, ServerSummary};

/// Only the fields a LIST reply can carry. Timestamps move on every
/// ANNOUNCE without the list changing.
#[derive(Serialize)]
struct HashView<'a> {
    address: &'a ServerAddress,
    description: &'a str,
    tags: &'a BTreeSet<String>,
}

/// Computes a SHA-256 hash of the server list.
/// Servers are sorted by address for deterministic output.
pub fn compute_hash(servers: &[ServerSummary]) -> String {
    let mut views: Vec<HashView<'_>> = servers
        .iter()
        .map(|s| HashView {
            address: &s.address,
            description: &s.description,
            tags: &s.tags,
        })
        .collect();
    views.sort_by(|a, b| a.address.cmp(b.address));

    let json = serde_json::to_string(&views)
        .expect("Failed to serialize servers for hashing");

    let hash = Sha256::digest(json.as_bytes());
    hex::encode(hash)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn summary(addr: &str, description: &str) -> ServerSummary {
        ServerSummary {
            address: ServerAddress::parse(addr).unwrap(),
            description: description.to_string(),
            tags: ["open".to_string()].into_iter().collect(),
            registered_at: Utc::now(),
            idle_secs: 0,
            expires_in_secs: 137,
        }
    }

    #[test]
    fn test_hash_deterministic() {
        let a = summary("10.0.0.1", "a");
        let b = summary("10.0.0.2", "b");

        let hash1 = compute_hash(&[a.clone(), b.clone()]);
        let hash2 = compute_hash(&[b, a]);

        assert_eq!(hash1, hash2, "Hash should be same regardless of input order");
        assert_eq!(hash1.len(), 64);
    }

    #[test]
    fn test_hash_changes_on_modification() {
        let hash1 = compute_hash(&[summary("10.0.0.1", "a")]);
        let hash2 = compute_hash(&[summary("10.0.0.1", "b")]);

        assert_ne!(hash1, hash2, "Hash should change when the description changes");
    }

    #[test]
    fn test_hash_stable_across_keepalives() {
        let before = summary("10.0.0.1", "a");
        let mut after = before.clone();
        after.idle_secs = 60;
        after.expires_in_secs = 77;
        after.registered_at = Utc::now() - chrono::Duration::seconds(60);

        assert_eq!(compute_hash(&[before]), compute_hash(&[after]));
    }
}
