//! Document model: retained items grouped into topic sections and citation
//! entries, with footnotes numbered on every build.

pub mod markdown;
pub mod writer;

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};

use crate::types::{ContextItem, IdentityKey, RetainedItem, TrackedItem};

#[derive(Debug, Clone, PartialEq)]
pub struct DocumentModel {
    pub tracked_id: String,
    pub title: String,
    pub keywords: Vec<String>,
    pub sections: Vec<Section>,
    pub sources: Vec<SourceSummary>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Section {
    pub topic: String,
    pub entries: Vec<Entry>,
}

/// One block of the document: an anchor item plus everything merged into it.
#[derive(Debug, Clone, PartialEq)]
pub struct Entry {
    pub anchor: IdentityKey,
    pub citations: Vec<Citation>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Citation {
    pub footnote: usize,
    pub hop: u32,
    pub item: ContextItem,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceSummary {
    pub source: String,
    pub items: usize,
    pub cursor: Option<DateTime<Utc>>,
}

impl Entry {
    /// Title shown for the entry: the anchor's, or the first citation's.
    pub fn title(&self) -> &str {
        self.citations
            .iter()
            .find(|c| c.item.identity() == self.anchor)
            .or_else(|| self.citations.first())
            .map(|c| c.item.title.as_str())
            .unwrap_or_default()
    }

    fn earliest(&self) -> Option<DateTime<Utc>> {
        self.citations.iter().map(|c| c.item.timestamp).min()
    }
}

impl DocumentModel {
    /// Build from the full retained set. The result depends only on the
    /// set's contents, never on its order.
    pub fn build(
        tracked: &TrackedItem,
        retained: &[RetainedItem],
        cursors: &BTreeMap<String, DateTime<Utc>>,
    ) -> Self {
        // topic -> anchor -> citations
        let mut grouped: BTreeMap<&str, BTreeMap<&IdentityKey, Vec<&RetainedItem>>> = BTreeMap::new();
        for r in retained {
            grouped
                .entry(r.placement.topic.as_str())
                .or_default()
                .entry(&r.placement.anchor)
                .or_default()
                .push(r);
        }

        let mut sections: Vec<(u32, Section)> = grouped
            .into_iter()
            .map(|(topic, anchors)| {
                let min_hop = anchors
                    .values()
                    .flatten()
                    .map(|r| r.hop)
                    .min()
                    .unwrap_or(u32::MAX);
                let mut entries: Vec<Entry> = anchors
                    .into_iter()
                    .map(|(anchor, mut members)| {
                        members.sort_by(|a, b| {
                            a.item
                                .timestamp
                                .cmp(&b.item.timestamp)
                                .then_with(|| a.item.identity().cmp(&b.item.identity()))
                        });
                        Entry {
                            anchor: anchor.clone(),
                            citations: members
                                .into_iter()
                                .map(|r| Citation {
                                    footnote: 0,
                                    hop: r.hop,
                                    item: r.item.clone(),
                                })
                                .collect(),
                        }
                    })
                    .collect();
                entries.sort_by(|a, b| {
                    a.earliest()
                        .cmp(&b.earliest())
                        .then_with(|| a.anchor.cmp(&b.anchor))
                });
                (
                    min_hop,
                    Section {
                        topic: topic.to_string(),
                        entries,
                    },
                )
            })
            .collect();
        sections.sort_by(|(ha, a), (hb, b)| ha.cmp(hb).then_with(|| a.topic.cmp(&b.topic)));

        let mut sections: Vec<Section> = sections.into_iter().map(|(_, s)| s).collect();
        let mut footnote = 0;
        for citation in sections
            .iter_mut()
            .flat_map(|s| s.entries.iter_mut())
            .flat_map(|e| e.citations.iter_mut())
        {
            footnote += 1;
            citation.footnote = footnote;
        }

        let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
        for r in retained {
            *counts.entry(r.item.source.as_str()).or_default() += 1;
        }
        for source in cursors.keys() {
            counts.entry(source.as_str()).or_default();
        }
        let sources = counts
            .into_iter()
            .map(|(source, items)| SourceSummary {
                source: source.to_string(),
                items,
                cursor: cursors.get(source).copied(),
            })
            .collect();

        let title = retained
            .iter()
            .filter(|r| r.hop == 0)
            .min_by(|a, b| a.item.identity().cmp(&b.item.identity()))
            .map(|r| r.item.title.clone())
            .unwrap_or_else(|| tracked.id.clone());

        Self {
            tracked_id: tracked.id.clone(),
            title,
            keywords: tracked.keywords.clone(),
            sections,
            sources,
        }
    }

    pub fn entries(&self) -> impl Iterator<Item = (&Section, &Entry)> {
        self.sections
            .iter()
            .flat_map(|s| s.entries.iter().map(move |e| (s, e)))
    }

    /// Topic of the entry anchored at `anchor`, if there is one.
    pub fn entry_topic(&self, anchor: &IdentityKey) -> Option<&str> {
        self.entries()
            .find(|(_, e)| &e.anchor == anchor)
            .map(|(s, _)| s.topic.as_str())
    }

    pub fn citation_count(&self) -> usize {
        self.entries().map(|(_, e)| e.citations.len()).sum()
    }
}
