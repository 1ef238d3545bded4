//! Rendering of LIST replies.

use shared::protocol::{quote, CMD_LIST, FIELD_DESCRIPTION, FIELD_TAGS};
use shared::tags::TagFilter;
use super::registry::ServerEntry;

/// Render one server as ` IP=<addr>` followed by the requested fields
/// the master knows how to echo (`DE`, `TA`).
pub fn render_fragment(entry: &ServerEntry, requested: &[String]) -> String {
    let wants = |field: &str| requested.iter().any(|f| f == field);

    let mut fragment = format!(" IP={}", entry.address.list_form());
    if wants(FIELD_DESCRIPTION) {
        fragment.push_str(&format!(" {}=\"{}\"", FIELD_DESCRIPTION, quote(&entry.description)));
    }
    if wants(FIELD_TAGS) && !entry.tags.is_empty() {
        let tags: Vec<&str> = entry.tags.iter().map(String::as_str).collect();
        fragment.push_str(&format!(" {}={}", FIELD_TAGS, tags.join(",")));
    }
    fragment
}

/// Pack the fragments of every entry passing `filter` into LIST packets of
/// at most `budget` bytes. No matches, no packets.
pub fn build_packets<'a>(
    entries: impl IntoIterator<Item = &'a ServerEntry>,
    requested: &[String],
    filter: &TagFilter,
    budget: usize,
) -> Vec<String> {
    let mut packets = Vec::new();
    let mut packet = String::from(CMD_LIST);

    for entry in entries.into_iter().filter(|e| filter.matches(&e.tags)) {
        let mut fragment = render_fragment(entry, requested);
        if CMD_LIST.len() + fragment.len() > budget {
            tracing::debug!(
                address = %entry.address,
                size = fragment.len(),
                "fragment exceeds packet budget, listing address only"
            );
            fragment = render_fragment(entry, &[]);
            if CMD_LIST.len() + fragment.len() > budget {
                tracing::warn!(address = %entry.address, budget, "packet budget too small for address");
                continue;
            }
        }

        if packet.len() + fragment.len() > budget {
            packets.push(std::mem::replace(&mut packet, String::from(CMD_LIST)));
        }
        packet.push_str(&fragment);
    }

    if packet.len() > CMD_LIST.len() {
        packets.push(packet);
    }
    packets
}
