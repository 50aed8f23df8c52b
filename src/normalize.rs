use crate::types::{ArticleDraft, RawItem};
use chrono::{DateTime, Utc};
use tracing::debug;

/// Why an item was rejected during normalization. Rejections are
/// counted per cycle, never fatal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    MissingTitle,
    MissingDate,
}

impl std::fmt::Display for RejectReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RejectReason::MissingTitle => f.write_str("missing title"),
            RejectReason::MissingDate => f.write_str("missing publish date"),
        }
    }
}

/// Trim and collapse internal whitespace, preserving original casing.
/// This is the display form.
pub fn canonical_title(raw: &str) -> String {
    raw.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Case-folded canonical form, used only for identity comparison.
pub fn comparable_title(raw: &str) -> String {
    canonical_title(raw).to_lowercase()
}

/// Map one source-specific raw item into a canonical article draft.
pub fn normalize(item: RawItem, fetched_at: DateTime<Utc>) -> Result<ArticleDraft, RejectReason> {
    let kind = item.source_kind();
    let (title, abstract_text, url, identifier, published_at) = match item {
        RawItem::Api {
            id,
            title,
            summary,
            url,
            published,
        } => (title, summary, url, Some(id), published),
        RawItem::Feed {
            guid,
            title,
            summary,
            url,
            published,
        } => (title, summary, url, guid, published),
        RawItem::Page {
            title,
            excerpt,
            url,
            observed_at,
        } => (title, excerpt, url, None, Some(observed_at)),
    };

    let title = canonical_title(&title);
    if title.is_empty() {
        debug!("rejecting item from {}: no title ({})", kind, url);
        return Err(RejectReason::MissingTitle);
    }

    let published_at = match published_at {
        Some(p) => p,
        None => {
            debug!("rejecting item from {}: no publish date ({})", kind, url);
            return Err(RejectReason::MissingDate);
        }
    };

    let abstract_text = abstract_text
        .map(|a| canonical_title(&a))
        .filter(|a| !a.is_empty());
    let identifier = identifier.filter(|i| !i.trim().is_empty());

    Ok(ArticleDraft {
        title,
        abstract_text,
        source_urls: vec![url],
        source_kinds: vec![kind],
        identifier,
        published_at,
        fetched_at,
    })
}
