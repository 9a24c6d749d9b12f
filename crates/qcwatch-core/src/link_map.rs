//! Identifier resolution for scraped table cells.
//!
//! Host-page tables truncate record identifiers, so a scraped cell may hold
//! a full id, a leading fragment, or a trailing fragment. Rather than
//! substring-searching at lookup time, each record is indexed up front
//! under three keys — full id, fixed-length prefix, fixed-length suffix —
//! and a cell is resolved by trying its own three candidate keys in fixed
//! priority order.
//!
//! The map represents "currently visible" records only: it is rebuilt
//! wholesale from each page scrape and swapped, never mutated in place.
//! Later records overwrite earlier ones on prefix/suffix collisions.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tracing::debug;

/// Characters taken from the front of an id for the prefix key.
pub const ID_PREFIX_LEN: usize = 8;

/// Characters taken from the back of an id for the suffix key.
pub const ID_SUFFIX_LEN: usize = 8;

/// Deep-link template base for batch audit records.
const LOOKUP_URL_BASE: &str =
    "https://app.outlier.ai/en/expert/outlieradmin/tools/chat_bulk_audit";

/// One record scraped from the host page's node list.
///
/// Two id shapes are accepted: nested (`qaOperation { _id, relatedObjectId }`)
/// and flattened (`qaOperationId` / `qaOperationRelatedObjectId`). Nothing
/// beyond these documented variants is guessed at.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct HostPageNode {
    #[serde(rename = "_id")]
    pub mongo_id: Option<String>,
    pub id: Option<String>,
    #[serde(rename = "qaOperation")]
    pub qa_operation: Option<NestedQaOperation>,
    #[serde(rename = "qaOperationId")]
    pub qa_operation_id: Option<String>,
    #[serde(rename = "qaOperationRelatedObjectId")]
    pub qa_operation_related_object_id: Option<String>,
}

/// Nested id shape carried by some host-page payloads.
#[derive(Debug, Clone, Deserialize)]
pub struct NestedQaOperation {
    #[serde(rename = "_id")]
    pub id: Option<String>,
    #[serde(rename = "relatedObjectId")]
    pub related_object_id: Option<String>,
}

/// The host page's record list, as returned by a page scrape.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct HostPageData {
    #[serde(default)]
    pub nodes: Vec<HostPageNode>,
}

/// Resolved identifiers for one visible record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkMapEntry {
    /// Full QA operation id.
    pub qa_id: String,
    /// Batch / related-object id used for deep links.
    pub batch_id: String,
}

/// The three lookup keys derived from a scraped cell.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CellKeyCandidates {
    pub exact: String,
    pub prefix: String,
    pub suffix: String,
}

impl CellKeyCandidates {
    /// Derive lookup candidates from a scraped table-cell string.
    ///
    /// Whitespace is trimmed; the prefix/suffix use the same fixed lengths
    /// as map construction so truncated UI columns still resolve.
    #[must_use]
    pub fn derive(cell_text: &str) -> Self {
        let exact = cell_text.trim().to_string();
        Self {
            prefix: head(&exact, ID_PREFIX_LEN),
            suffix: tail(&exact, ID_SUFFIX_LEN),
            exact,
        }
    }
}

/// Three-tier identifier index for the currently visible page.
#[derive(Debug, Clone, Default)]
pub struct LinkMap {
    entries: HashMap<String, LinkMapEntry>,
}

impl LinkMap {
    /// Build a fresh link map from a host-page scrape.
    ///
    /// Nodes missing a usable record id or QA operation reference are
    /// skipped. Collisions are last-write-wins.
    #[must_use]
    pub fn build(data: &HostPageData) -> Self {
        let mut entries = HashMap::new();
        let mut skipped = 0usize;

        for node in &data.nodes {
            let Some((record_id, entry)) = index_node(node) else {
                skipped += 1;
                continue;
            };

            entries.insert(head(&record_id, ID_PREFIX_LEN), entry.clone());
            entries.insert(tail(&record_id, ID_SUFFIX_LEN), entry.clone());
            entries.insert(record_id, entry);
        }

        if skipped > 0 {
            debug!(skipped, total = data.nodes.len(), "Skipped malformed host-page nodes");
        }

        Self { entries }
    }

    /// Resolve a cell's candidates: exact, then prefix, then suffix.
    #[must_use]
    pub fn resolve(&self, candidates: &CellKeyCandidates) -> Option<&LinkMapEntry> {
        self.entries
            .get(&candidates.exact)
            .or_else(|| self.entries.get(&candidates.prefix))
            .or_else(|| self.entries.get(&candidates.suffix))
    }

    /// Convenience: derive candidates from raw cell text and resolve.
    #[must_use]
    pub fn resolve_cell(&self, cell_text: &str) -> Option<&LinkMapEntry> {
        self.resolve(&CellKeyCandidates::derive(cell_text))
    }

    /// Number of distinct keys in the index.
    #[must_use]
    pub fn key_count(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Build the deep-link URL for a batch record.
///
/// Pure string construction; `batch_id` is not validated beyond being
/// non-empty.
#[must_use]
pub fn build_lookup_url(batch_id: &str) -> Option<String> {
    if batch_id.is_empty() {
        return None;
    }
    Some(format!("{LOOKUP_URL_BASE}/{batch_id}"))
}

/// Extract the record id and link entry from a node, or `None` if either
/// documented shape is absent.
fn index_node(node: &HostPageNode) -> Option<(String, LinkMapEntry)> {
    let record_id = node
        .mongo_id
        .as_deref()
        .or(node.id.as_deref())
        .filter(|s| !s.is_empty())?
        .to_string();

    // Nested shape takes priority; the flattened shape is the fallback.
    let (qa_id, batch_id) = if let Some(op) = &node.qa_operation {
        (op.id.clone(), op.related_object_id.clone())
    } else {
        (
            node.qa_operation_id.clone(),
            node.qa_operation_related_object_id.clone(),
        )
    };

    let qa_id = qa_id.filter(|s| !s.is_empty())?;
    let batch_id = batch_id.filter(|s| !s.is_empty())?;

    Some((record_id, LinkMapEntry { qa_id, batch_id }))
}

fn head(s: &str, n: usize) -> String {
    s.chars().take(n).collect()
}

fn tail(s: &str, n: usize) -> String {
    let count = s.chars().count();
    s.chars().skip(count.saturating_sub(n)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const RECORD_ID: &str = "e0f7d12345abcdef67890123";

    fn nested_node(record_id: &str, qa_id: &str, batch_id: &str) -> serde_json::Value {
        serde_json::json!({
            "_id": record_id,
            "qaOperation": {"_id": qa_id, "relatedObjectId": batch_id},
        })
    }

    fn page(nodes: Vec<serde_json::Value>) -> HostPageData {
        serde_json::from_value(serde_json::json!({"nodes": nodes})).unwrap()
    }

    // ---- Construction ----

    #[test]
    fn build_indexes_full_prefix_and_suffix() {
        let data = page(vec![nested_node(RECORD_ID, "qaop_111", "rel_aaa")]);
        let map = LinkMap::build(&data);

        let expected = LinkMapEntry {
            qa_id: "qaop_111".to_string(),
            batch_id: "rel_aaa".to_string(),
        };
        assert_eq!(map.resolve_cell(RECORD_ID), Some(&expected));
        assert_eq!(map.resolve_cell("e0f7d123"), Some(&expected)); // prefix
        assert_eq!(map.resolve_cell("67890123"), Some(&expected)); // suffix
        assert_eq!(map.key_count(), 3);
    }

    #[test]
    fn build_accepts_flattened_shape() {
        let data = page(vec![serde_json::json!({
            "id": RECORD_ID,
            "qaOperationId": "qaop_222",
            "qaOperationRelatedObjectId": "rel_bbb",
        })]);
        let map = LinkMap::build(&data);

        let entry = map.resolve_cell(RECORD_ID).unwrap();
        assert_eq!(entry.qa_id, "qaop_222");
        assert_eq!(entry.batch_id, "rel_bbb");
    }

    #[test]
    fn build_skips_nodes_missing_ids() {
        let data = page(vec![
            serde_json::json!({"_id": RECORD_ID}),                 // no qa operation
            serde_json::json!({"qaOperationId": "qaop_1", "qaOperationRelatedObjectId": "rel_1"}), // no record id
            serde_json::json!({}),
        ]);
        let map = LinkMap::build(&data);
        assert!(map.is_empty());
    }

    #[test]
    fn later_records_win_on_collision() {
        // Same prefix/suffix (identical record id), different targets.
        let data = page(vec![
            nested_node(RECORD_ID, "qaop_old", "rel_old"),
            nested_node(RECORD_ID, "qaop_new", "rel_new"),
        ]);
        let map = LinkMap::build(&data);
        assert_eq!(map.resolve_cell("e0f7d123").unwrap().qa_id, "qaop_new");
    }

    #[test]
    fn rebuild_replaces_rather_than_accumulates() {
        let first = LinkMap::build(&page(vec![nested_node(RECORD_ID, "qa", "rel")]));
        assert!(!first.is_empty());

        let second = LinkMap::build(&HostPageData::default());
        assert!(second.is_empty());
    }

    // ---- Cell key derivation ----

    #[test]
    fn derive_trims_and_slices() {
        let keys = CellKeyCandidates::derive(&format!("  {RECORD_ID}\n"));
        assert_eq!(keys.exact, RECORD_ID);
        assert_eq!(keys.prefix, "e0f7d123");
        assert_eq!(keys.suffix, "67890123");
    }

    #[test]
    fn derive_short_cell_keeps_whole_string() {
        let keys = CellKeyCandidates::derive("abc");
        assert_eq!(keys.exact, "abc");
        assert_eq!(keys.prefix, "abc");
        assert_eq!(keys.suffix, "abc");
    }

    // ---- Resolution order ----

    #[test]
    fn exact_beats_prefix() {
        // A record whose full id equals another record's prefix key.
        let short_id = "e0f7d123";
        let data = page(vec![
            nested_node(RECORD_ID, "qaop_long", "rel_long"),
            nested_node(short_id, "qaop_short", "rel_short"),
        ]);
        let map = LinkMap::build(&data);
        // "e0f7d123" matches the short record exactly even though it is
        // also the long record's prefix key.
        assert_eq!(map.resolve_cell(short_id).unwrap().qa_id, "qaop_short");
    }

    #[test]
    fn unresolvable_cell_returns_none() {
        let map = LinkMap::build(&page(vec![nested_node(RECORD_ID, "qa", "rel")]));
        assert!(map.resolve_cell("ffffffffffffffffffffffff").is_none());
        assert!(map.resolve_cell("").is_none());
    }

    // ---- Lookup URL ----

    #[test]
    fn lookup_url_format() {
        assert_eq!(
            build_lookup_url("batch_x").as_deref(),
            Some("https://app.outlier.ai/en/expert/outlieradmin/tools/chat_bulk_audit/batch_x")
        );
    }

    #[test]
    fn lookup_url_rejects_empty() {
        assert!(build_lookup_url("").is_none());
    }

    // ---- Property tests ----

    mod props {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn full_prefix_suffix_always_resolve(id in "[0-9a-f]{24}") {
                let data = page(vec![nested_node(&id, "qa", "rel")]);
                let map = LinkMap::build(&data);
                prop_assert!(map.resolve_cell(&id).is_some());
                prop_assert!(map.resolve_cell(&id[..ID_PREFIX_LEN]).is_some());
                prop_assert!(map.resolve_cell(&id[id.len() - ID_SUFFIX_LEN..]).is_some());
            }

            #[test]
            fn derive_is_trim_invariant(pad in "[ \t]{0,4}", id in "[0-9a-f]{1,32}") {
                let padded = format!("{pad}{id}{pad}");
                prop_assert_eq!(
                    CellKeyCandidates::derive(&padded),
                    CellKeyCandidates::derive(&id)
                );
            }
        }
    }
}
