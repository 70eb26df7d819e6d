use crate::assemble::DocumentModel;
use crate::types::{ContextItem, IdentityKey};

pub const CLASSIFY_SYSTEM: &str = r#"You maintain a context document for one work item. Each entry in the document is labelled E1, E2, ... and sits under a topic heading.

You are shown one new candidate item. Decide how it relates to the document and answer with exactly one line:

DUPLICATE         the candidate repeats information already in an entry, adding nothing
MERGE: E<n>       the candidate adds detail to entry E<n> and should be cited alongside it
NEW               the candidate is new information; use the default topic for its kind
NEW: <topic>      the candidate is new information that belongs under <topic> (an existing topic or a short new one)

Do not explain your answer."#;

/// Characters of body text shown per entry and for the candidate.
const EXCERPT_CHARS: usize = 400;

fn excerpt(text: &str) -> String {
    let text = text.trim();
    if text.chars().count() <= EXCERPT_CHARS {
        return text.to_string();
    }
    let cut: String = text.chars().take(EXCERPT_CHARS).collect();
    format!("{}…", cut)
}

/// User prompt for one classification, plus the anchors in E-number order.
pub fn classify_prompt(candidate: &ContextItem, document: &DocumentModel) -> (String, Vec<IdentityKey>) {
    let mut anchors = Vec::new();
    let mut prompt = format!("Document for {}: {}\n\n", document.tracked_id, document.title);

    for section in &document.sections {
        prompt.push_str(&format!("## {}\n", section.topic));
        for entry in &section.entries {
            anchors.push(entry.anchor.clone());
            let body = entry
                .citations
                .iter()
                .map(|c| c.item.body.as_str())
                .collect::<Vec<_>>()
                .join("\n");
            prompt.push_str(&format!(
                "E{} [{}] {}\n{}\n\n",
                anchors.len(),
                entry.anchor.source,
                entry.title(),
                excerpt(&body)
            ));
        }
    }

    prompt.push_str(&format!(
        "Candidate ({} {}, default topic \"{}\"):\n{}\n{}\n",
        candidate.source,
        candidate.kind.as_str(),
        candidate.kind.default_topic(),
        candidate.title,
        excerpt(&candidate.body)
    ));
    (prompt, anchors)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{item, ts};
    use crate::types::{ItemKind, Placement, RetainedItem, TrackedItem, PRIMARY_TOPIC};
    use std::collections::BTreeMap;

    #[test]
    fn test_entries_numbered_in_document_order() {
        let primary = item("jira", ItemKind::Ticket, "T-1", "T-1: Cache", "warm the cache", 0);
        let pr = item("github", ItemKind::Review, "5", "Cache warmer", "adds warmer", 3);
        let retained: Vec<RetainedItem> = [(primary, 0, PRIMARY_TOPIC), (pr, 1, "Related Code")]
            .into_iter()
            .map(|(i, hop, topic)| RetainedItem {
                placement: Placement {
                    topic: topic.into(),
                    anchor: i.identity(),
                },
                item: i,
                hop,
                parent: None,
            })
            .collect();
        let tracked = TrackedItem::new("T-1", "jira", vec![], ts(0));
        let model = DocumentModel::build(&tracked, &retained, &BTreeMap::new());
        let candidate = item("slack", ItemKind::Message, "C:1", "Message in #infra", "warmer is slow", 9);

        let (prompt, anchors) = classify_prompt(&candidate, &model);
        assert_eq!(anchors.len(), 2);
        assert_eq!(anchors[1], IdentityKey::new("github", ItemKind::Review, "5"));
        assert!(prompt.contains("E1 [jira] T-1: Cache"));
        assert!(prompt.contains("E2 [github] Cache warmer"));
        assert!(prompt.contains("default topic \"Related Discussions\""));
    }

    #[test]
    fn test_excerpt_truncates() {
        let long = "x".repeat(1000);
        assert_eq!(excerpt(&long).chars().count(), EXCERPT_CHARS + 1);
        assert_eq!(excerpt(" short "), "short");
    }
}
