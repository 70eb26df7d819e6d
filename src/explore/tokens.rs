//! Reference tokens: the strings one item uses to point at another.

use std::collections::{BTreeSet, HashSet};
use std::sync::LazyLock;

use regex::Regex;

static TICKET: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b[A-Z][A-Z0-9]{0,9}-\d+\b").expect("ticket regex"));
static REVIEW: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(?:pr|pull|issue)\s*#?\s*(\d+)\b|#(\d+)\b").expect("review regex")
});
static URL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"https?://[^\s<>()\[\]"'`|]+"#).expect("url regex"));

const STOP_WORDS: &[&str] = &[
    "what", "which", "where", "when", "does", "have", "with", "that", "this", "from", "about",
    "some", "there", "their", "they", "your", "been", "were", "how", "could", "would", "should",
    "shall", "will", "into", "also", "just", "like", "make", "using", "used", "need", "want",
    "find", "know", "tell", "many", "much", "very", "really", "please", "help", "more", "most",
    "only", "the", "and", "for", "are", "but", "not", "all", "any", "can", "has", "was", "our",
    "out", "see", "should", "them", "then", "than", "these", "those", "after", "before",
    "while", "because", "being", "other", "each", "over", "under", "again", "still", "here",
    "ticket", "issue", "task", "story", "bug", "todo", "fix", "add", "update", "comment",
];

/// Something to search for. Ordering (variant, then text) is the order
/// tokens are processed within a hop.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Token {
    /// Tracker-style id, `T-123`.
    Ticket(String),
    /// Review/issue number, normalized to `#847`.
    Review(String),
    Url(String),
    /// Topical search term from the primary item.
    Keyword(String),
}

impl Token {
    /// The string handed to an adapter's `search`.
    pub fn query(&self) -> &str {
        match self {
            Token::Ticket(s) | Token::Review(s) | Token::Url(s) | Token::Keyword(s) => s,
        }
    }
}

impl std::fmt::Display for Token {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let kind = match self {
            Token::Ticket(_) => "ticket",
            Token::Review(_) => "review",
            Token::Url(_) => "url",
            Token::Keyword(_) => "keyword",
        };
        write!(f, "{}:{}", kind, self.query())
    }
}

/// Ticket, review and URL references found in `text`.
pub fn extract_references(text: &str) -> BTreeSet<Token> {
    let mut tokens = BTreeSet::new();

    for m in TICKET.find_iter(text) {
        tokens.insert(Token::Ticket(m.as_str().to_string()));
    }

    for caps in REVIEW.captures_iter(text) {
        let Some(whole) = caps.get(0) else {
            continue;
        };
        // `&#39;` and friends are HTML entities, not references.
        if text[..whole.start()].ends_with('&') {
            continue;
        }
        if let Some(number) = caps.get(1).or_else(|| caps.get(2)) {
            tokens.insert(Token::Review(format!("#{}", number.as_str())));
        }
    }

    for m in URL.find_iter(text) {
        let url = m
            .as_str()
            .trim_end_matches(|c: char| matches!(c, '.' | ',' | ';' | ':' | '!' | '?' | '>'));
        if url.len() > "https://".len() {
            tokens.insert(Token::Url(url.to_string()));
        }
    }

    tokens
}

/// Deterministic keyword fallback: distinctive words from the title first,
/// then the body, stop words and reference-looking tokens removed.
pub fn extract_keywords(title: &str, body: &str, max: usize) -> Vec<String> {
    let mut keywords = Vec::new();

    for word in title.split_whitespace().chain(body.split_whitespace()) {
        let clean: String = word
            .chars()
            .filter(|c| c.is_alphanumeric() || *c == '-' || *c == '_')
            .collect();
        let clean = clean.trim_matches(|c| c == '-' || c == '_').to_lowercase();
        if clean.len() <= 3
            || STOP_WORDS.contains(&clean.as_str())
            || clean.chars().all(|c| c.is_ascii_digit())
            || TICKET.is_match(&clean.to_uppercase())
        {
            continue;
        }
        keywords.push(clean);
    }

    let mut seen = HashSet::new();
    keywords.retain(|k| seen.insert(k.clone()));
    keywords.truncate(max);
    keywords
}
