use serde::{Deserialize, Serialize};

use crate::types::IdentityKey;

/// Oracle classification of one candidate against the current document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Verdict {
    /// Same information as something already in the document.
    Duplicate,
    /// New information; goes into `topic` or the kind's default topic.
    New { topic: Option<String> },
    /// Belongs to the entry anchored at `entry`, as an extra attribution.
    RelatedMerge { entry: IdentityKey },
    /// Response could not be interpreted.
    Ambiguous,
}

/// Interpret an oracle reply of the form `DUPLICATE`, `NEW`, `NEW: <topic>`
/// or `MERGE: E<n>`. `entries` are the anchors in the order they were
/// numbered in the prompt (E1 = `entries[0]`).
pub fn parse_verdict(reply: &str, entries: &[IdentityKey]) -> Verdict {
    let Some(line) = reply
        .lines()
        .map(|l| l.trim().trim_matches(|c| c == '*' || c == '`' || c == '"').trim())
        .find(|l| !l.is_empty())
    else {
        return Verdict::Ambiguous;
    };

    let (head, rest) = match line.split_once(':') {
        Some((h, r)) => (h.trim(), r.trim()),
        None => (line, ""),
    };

    match head.to_ascii_uppercase().as_str() {
        "DUPLICATE" if rest.is_empty() => Verdict::Duplicate,
        "NEW" => Verdict::New {
            topic: Some(rest.trim_matches(|c| c == '"' || c == '\'').trim())
                .filter(|t| !t.is_empty())
                .map(str::to_string),
        },
        "MERGE" => {
            let index = rest
                .trim_start_matches(['E', 'e'])
                .parse::<usize>()
                .ok()
                .and_then(|n| n.checked_sub(1));
            match index.and_then(|i| entries.get(i)) {
                Some(anchor) => Verdict::RelatedMerge {
                    entry: anchor.clone(),
                },
                None => Verdict::Ambiguous,
            }
        }
        _ => Verdict::Ambiguous,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ItemKind;

    fn anchors() -> Vec<IdentityKey> {
        vec![
            IdentityKey::new("jira", ItemKind::Ticket, "T-1"),
            IdentityKey::new("github", ItemKind::Review, "847"),
        ]
    }

    #[test]
    fn test_parse_plain_verdicts() {
        assert_eq!(parse_verdict("DUPLICATE", &anchors()), Verdict::Duplicate);
        assert_eq!(parse_verdict("  new\n", &anchors()), Verdict::New { topic: None });
        assert_eq!(
            parse_verdict("**NEW: Deployment Notes**", &anchors()),
            Verdict::New {
                topic: Some("Deployment Notes".into())
            }
        );
    }

    #[test]
    fn test_parse_merge_resolves_entry() {
        assert_eq!(
            parse_verdict("MERGE: E2", &anchors()),
            Verdict::RelatedMerge {
                entry: anchors()[1].clone()
            }
        );
        assert_eq!(parse_verdict("MERGE: E9", &anchors()), Verdict::Ambiguous);
        assert_eq!(parse_verdict("MERGE: E0", &anchors()), Verdict::Ambiguous);
    }

    #[test]
    fn test_unparsable_is_ambiguous() {
        assert_eq!(parse_verdict("", &anchors()), Verdict::Ambiguous);
        assert_eq!(parse_verdict("I think it might be new", &anchors()), Verdict::Ambiguous);
        assert_eq!(parse_verdict("DUPLICATE: maybe", &anchors()), Verdict::Ambiguous);
    }
}
