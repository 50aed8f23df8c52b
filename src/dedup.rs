use crate::normalize::comparable_title;
use crate::types::{ArticleDraft, SourceKind};
use sha2::{Digest, Sha256};
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use tokio::sync::Mutex;
use tracing::debug;

/// Stable identity hash for a draft: case-folded title, publish date
/// truncated to day, and the source-native identifier when one exists
/// (arXiv id or feed GUID). Scraped items carry no identifier, so
/// URL-distinct coverage of the same story collapses on title + day.
pub fn fingerprint(draft: &ArticleDraft) -> String {
    let mut hasher = Sha256::new();
    hasher.update(comparable_title(&draft.title).as_bytes());
    hasher.update(b"\n");
    hasher.update(draft.published_at.format("%Y-%m-%d").to_string().as_bytes());
    hasher.update(b"\n");
    if let Some(id) = &draft.identifier {
        hasher.update(id.trim().as_bytes());
    }
    let digest = hasher.finalize();
    digest.iter().map(|b| format!("{:02x}", b)).collect()
}

/// Merge a later sighting of the same fingerprint into an existing
/// draft: union of source sets, earliest publish date, latest fetch
/// time, longer abstract wins.
pub fn merge_drafts(existing: &mut ArticleDraft, incoming: ArticleDraft) {
    for url in incoming.source_urls {
        if !existing.source_urls.contains(&url) {
            existing.source_urls.push(url);
        }
    }
    existing.source_urls.sort();
    merge_kinds(&mut existing.source_kinds, &incoming.source_kinds);

    if incoming.published_at < existing.published_at {
        existing.published_at = incoming.published_at;
    }
    if incoming.fetched_at > existing.fetched_at {
        existing.fetched_at = incoming.fetched_at;
    }
    if existing.identifier.is_none() {
        existing.identifier = incoming.identifier;
    }
    let incoming_len = incoming.abstract_text.as_deref().map_or(0, str::len);
    let existing_len = existing.abstract_text.as_deref().map_or(0, str::len);
    if incoming_len > existing_len {
        existing.abstract_text = incoming.abstract_text;
    }
}

pub fn merge_kinds(existing: &mut Vec<SourceKind>, incoming: &[SourceKind]) {
    for kind in incoming {
        if !existing.contains(kind) {
            existing.push(*kind);
        }
    }
    existing.sort();
}

/// Within-cycle fingerprint resolution. The map is the single shared
/// structure connectors race on; all mutation goes through the lock so
/// one fingerprint resolves to one canonical draft even when two
/// connectors deliver it concurrently.
pub struct Deduplicator {
    seen: Mutex<HashMap<String, ArticleDraft>>,
}

impl Deduplicator {
    pub fn new() -> Self {
        Self {
            seen: Mutex::new(HashMap::new()),
        }
    }

    /// Admit one draft into the cycle, merging it into any draft
    /// already seen under the same fingerprint.
    pub async fn admit(&self, draft: ArticleDraft) -> String {
        let fp = fingerprint(&draft);
        let mut seen = self.seen.lock().await;
        match seen.entry(fp.clone()) {
            Entry::Occupied(mut entry) => {
                debug!("merging duplicate sighting of {} ({})", entry.get().title, fp);
                merge_drafts(entry.get_mut(), draft);
            }
            Entry::Vacant(entry) => {
                entry.insert(draft);
            }
        }
        fp
    }

    /// Drain the reduced set of canonical drafts for persistence.
    pub async fn into_drafts(self) -> Vec<(String, ArticleDraft)> {
        let seen = self.seen.into_inner();
        let mut drafts: Vec<(String, ArticleDraft)> = seen.into_iter().collect();
        // Deterministic persistence order.
        drafts.sort_by(|a, b| a.0.cmp(&b.0));
        drafts
    }
}

impl Default for Deduplicator {
    fn default() -> Self {
        Self::new()
    }
}
