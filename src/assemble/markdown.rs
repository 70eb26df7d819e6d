use super::{Citation, DocumentModel};

/// Lines of body text quoted per citation.
pub const MAX_EXCERPT_LINES: usize = 20;

/// Render the document. Only model contents reach the output, so equal
/// models render to equal bytes.
pub fn render(model: &DocumentModel) -> String {
    let mut lines: Vec<String> = Vec::new();

    lines.push(format!("# Context: {}", model.title));
    lines.push(String::new());
    let mut meta = format!("**Tracked item:** {}", model.tracked_id);
    if !model.keywords.is_empty() {
        meta.push_str(&format!(" | **Keywords:** {}", model.keywords.join(", ")));
    }
    lines.push(meta);
    lines.push(String::new());

    for section in &model.sections {
        lines.push(format!("## {}", section.topic));
        lines.push(String::new());
        for entry in &section.entries {
            let footnotes: Vec<String> = entry
                .citations
                .iter()
                .map(|c| format!("[{}]", c.footnote))
                .collect();
            lines.push(format!("### {} {}", entry.title(), footnotes.join("")));
            lines.push(String::new());
            for citation in &entry.citations {
                render_citation(citation, &mut lines);
            }
        }
    }

    lines.push("---".to_string());
    lines.push(String::new());
    lines.push("## Sources Consulted".to_string());
    lines.push(String::new());
    lines.push("| Source | Items | Fetched Through |".to_string());
    lines.push("|--------|-------|-----------------|".to_string());
    for summary in &model.sources {
        let cursor = summary
            .cursor
            .map(|c| c.format("%Y-%m-%d %H:%M:%S UTC").to_string())
            .unwrap_or_else(|| "—".to_string());
        lines.push(format!(
            "| {} | {} | {} |",
            summary.source.to_uppercase(),
            summary.items,
            cursor
        ));
    }
    lines.push(String::new());

    let citations: Vec<&Citation> = model
        .entries()
        .flat_map(|(_, e)| e.citations.iter())
        .collect();
    if !citations.is_empty() {
        lines.push("## References".to_string());
        lines.push(String::new());
        for c in citations {
            lines.push(format!(
                "[{}]: {} \"{}: {}\"",
                c.footnote,
                c.item.url,
                c.item.source,
                c.item.title.replace('"', "'")
            ));
        }
        lines.push(String::new());
    }

    lines.join("\n")
}

fn render_citation(citation: &Citation, lines: &mut Vec<String>) {
    let body = citation.item.body.trim();
    if !body.is_empty() {
        for line in body.lines().take(MAX_EXCERPT_LINES) {
            lines.push(format!("> {}", line).trim_end().to_string());
        }
        if body.lines().count() > MAX_EXCERPT_LINES {
            lines.push(">".to_string());
            lines.push("> …".to_string());
        }
        lines.push(String::new());
    }
    lines.push(format!(
        "*{} via {}, {}* [{}]",
        citation.item.author,
        citation.item.source.to_uppercase(),
        citation.item.timestamp.format("%Y-%m-%d"),
        citation.footnote
    ));
    lines.push(String::new());
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{item, ts};
    use crate::types::{ItemKind, Placement, RetainedItem, TrackedItem, PRIMARY_TOPIC};
    use std::collections::BTreeMap;

    fn retained(item: crate::types::ContextItem, hop: u32, topic: &str) -> RetainedItem {
        let anchor = item.identity();
        RetainedItem {
            item,
            hop,
            placement: Placement {
                topic: topic.into(),
                anchor,
            },
            parent: None,
        }
    }

    #[test]
    fn test_render_layout() {
        let tracked = TrackedItem::new("T-123", "jira", vec!["checkout".into()], ts(0));
        let items = vec![
            retained(
                item("jira", ItemKind::Ticket, "T-123", "T-123: Checkout", "Pay flow\nbroken", 0),
                0,
                PRIMARY_TOPIC,
            ),
            retained(
                item("github", ItemKind::Review, "847", "Retry \"logic\"", "", 10),
                1,
                "Related Code",
            ),
        ];
        let mut cursors = BTreeMap::new();
        cursors.insert("github".to_string(), ts(10));
        let model = DocumentModel::build(&tracked, &items, &cursors);
        let out = render(&model);

        assert!(out.starts_with("# Context: T-123: Checkout\n\n**Tracked item:** T-123 | **Keywords:** checkout\n"));
        assert!(out.contains("## Primary Ticket\n\n### T-123: Checkout [1]\n\n> Pay flow\n> broken\n"));
        assert!(out.contains("*tester via GITHUB, 2024-01-01* [2]"));
        assert!(out.contains("| GITHUB | 1 | 2024-01-01 00:10:00 UTC |"));
        assert!(out.contains("| JIRA | 1 | — |"));
        assert!(out.contains("[2]: https://github.example/847 \"github: Retry 'logic'\""));
        assert!(out.find("## Primary Ticket").unwrap() < out.find("## Related Code").unwrap());
    }

    #[test]
    fn test_excerpt_capped() {
        let body: Vec<String> = (0..30).map(|i| format!("line {i}")).collect();
        let tracked = TrackedItem::new("T-1", "jira", vec![], ts(0));
        let items = vec![retained(
            item("jira", ItemKind::Ticket, "T-1", "T-1", &body.join("\n"), 0),
            0,
            PRIMARY_TOPIC,
        )];
        let out = render(&DocumentModel::build(&tracked, &items, &BTreeMap::new()));
        assert!(out.contains("> line 19\n"));
        assert!(!out.contains("> line 20\n"));
    }

    #[test]
    fn test_render_is_deterministic() {
        let tracked = TrackedItem::new("T-1", "jira", vec![], ts(0));
        let items = vec![retained(item("jira", ItemKind::Ticket, "T-1", "T-1", "b", 0), 0, PRIMARY_TOPIC)];
        let a = render(&DocumentModel::build(&tracked, &items, &BTreeMap::new()));
        let b = render(&DocumentModel::build(&tracked, &items, &BTreeMap::new()));
        assert_eq!(a, b);
    }
}
