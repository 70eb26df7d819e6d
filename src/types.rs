use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::SourceError;

/// Kind of a context item as reported by its source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemKind {
    Ticket,
    Message,
    Review,
    Comment,
}

impl ItemKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ItemKind::Ticket => "ticket",
            ItemKind::Message => "message",
            ItemKind::Review => "review",
            ItemKind::Comment => "comment",
        }
    }

    /// Topic a new item of this kind lands in when nobody chose one for it.
    pub fn default_topic(&self) -> &'static str {
        match self {
            ItemKind::Ticket => "Related Tickets",
            ItemKind::Message => "Related Discussions",
            ItemKind::Review => "Related Code",
            ItemKind::Comment => "Discussion",
        }
    }
}

pub const PRIMARY_TOPIC: &str = "Primary Ticket";

/// Exact-dedup key: (source, kind, source-native id).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct IdentityKey {
    pub source: String,
    pub kind: ItemKind,
    pub native_id: String,
}

impl IdentityKey {
    pub fn new(source: impl Into<String>, kind: ItemKind, native_id: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            kind,
            native_id: native_id.into(),
        }
    }

    /// Content-addressed storage key for this identity (blake3 hex).
    pub fn digest(&self) -> String {
        blake3::hash(self.to_string().as_bytes()).to_hex().to_string()
    }
}

impl std::fmt::Display for IdentityKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}:{}", self.source, self.kind.as_str(), self.native_id)
    }
}

/// A single piece of context fetched from a source. Never mutated after fetch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextItem {
    pub source: String,
    pub kind: ItemKind,
    pub native_id: String,
    pub title: String,
    pub body: String,
    pub url: String,
    pub author: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub metadata: serde_json::Value,
}

impl ContextItem {
    pub fn identity(&self) -> IdentityKey {
        IdentityKey::new(self.source.clone(), self.kind, self.native_id.clone())
    }

    /// Title and body joined, the text scanned for references.
    pub fn text(&self) -> String {
        format!("{}\n{}", self.title, self.body)
    }

    /// Reject items that cannot carry a stable identity.
    pub fn validate(&self, expected_source: &str) -> Result<(), SourceError> {
        if self.native_id.trim().is_empty() {
            return Err(SourceError::Malformed(format!(
                "{} item without a native id",
                self.source
            )));
        }
        if self.source != expected_source {
            return Err(SourceError::Malformed(format!(
                "item {} claims source '{}' but came from '{}'",
                self.native_id, self.source, expected_source
            )));
        }
        Ok(())
    }
}

/// One tracked work item and its generated document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackedItem {
    pub id: String,
    pub primary_source: String,
    pub keywords: Vec<String>,
    pub filename: String,
    pub last_updated: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl TrackedItem {
    pub fn new(
        id: &str,
        primary_source: &str,
        keywords: Vec<String>,
        now: DateTime<Utc>,
    ) -> Self {
        let id = normalize_id(id);
        let filename = document_filename(&id, &keywords);
        Self {
            id,
            primary_source: primary_source.to_string(),
            keywords,
            filename,
            last_updated: now,
            created_at: now,
        }
    }

    /// Case-insensitive match on id, keywords or filename.
    pub fn matches(&self, query: &str) -> bool {
        let query = query.trim().to_lowercase();
        if query.is_empty() {
            return false;
        }
        self.id.to_lowercase().contains(&query)
            || self.filename.to_lowercase().contains(&query)
            || self.keywords.iter().any(|k| k.to_lowercase().contains(&query))
    }
}

/// Tracked ids are case-insensitive; everything downstream sees upper case.
pub fn normalize_id(id: &str) -> String {
    id.trim().to_uppercase()
}

/// `{ID}_{kw1}_{kw2}_{kw3}_{kw4}.md`, or `{ID}.md` without usable keywords.
pub fn document_filename(id: &str, keywords: &[String]) -> String {
    let slug: Vec<String> = keywords
        .iter()
        .map(|k| {
            k.to_lowercase()
                .chars()
                .filter(|c| c.is_ascii_alphanumeric())
                .collect::<String>()
        })
        .filter(|k| !k.is_empty())
        .take(4)
        .collect();
    let safe_id: String = id
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '_' })
        .collect();
    if slug.is_empty() {
        format!("{}.md", safe_id)
    } else {
        format!("{}_{}.md", safe_id, slug.join("_"))
    }
}

/// Watermark of the newest item merged from one source for one tracked item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FetchCursor {
    pub source: String,
    pub last_fetched: DateTime<Utc>,
}

/// How an item was discovered. Provenance only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReferenceEdge {
    pub parent: IdentityKey,
    pub child: IdentityKey,
    pub hop: u32,
}

/// Where a retained item sits in the document: its topic section and the
/// citation entry it belongs to, named by that entry's anchor item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Placement {
    pub topic: String,
    pub anchor: IdentityKey,
}

/// An item kept for a tracked item, with its discovery hop and placement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetainedItem {
    pub item: ContextItem,
    pub hop: u32,
    pub placement: Placement,
    /// The item whose reference led here; `None` for the primary.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<IdentityKey>,
}

impl RetainedItem {
    pub fn edge(&self) -> Option<ReferenceEdge> {
        self.parent.as_ref().map(|parent| ReferenceEdge {
            parent: parent.clone(),
            child: self.item.identity(),
            hop: self.hop,
        })
    }
}
