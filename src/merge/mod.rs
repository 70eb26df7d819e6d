//! Deduplication and merge of discovered items into a tracked item's
//! retained set.
//!
//! Stage one drops exact repeats by identity key. Stage two asks the
//! similarity oracle, in discovery order, where each survivor belongs; the
//! working document is rebuilt after every accepted item so later verdicts
//! see earlier ones. Any oracle failure switches the rest of the run to
//! exact-only mode; the run counts as degraded only if some survivor was
//! placed without a verdict.

pub mod oracle;
pub mod prompts;
pub mod verdict;

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::assemble::DocumentModel;
use crate::explore::Discovered;
use crate::types::{IdentityKey, Placement, RetainedItem, TrackedItem, PRIMARY_TOPIC};
use oracle::SimilarityOracle;
use verdict::Verdict;

#[derive(Debug, Clone, Default)]
pub struct MergeOutcome {
    /// Items to retain, with placements, in discovery order.
    pub accepted: Vec<RetainedItem>,
    /// Identities the oracle called duplicates.
    pub duplicates: Vec<IdentityKey>,
    /// Candidates dropped by identity.
    pub exact_skipped: usize,
    pub oracle_degraded: bool,
}

pub struct MergeEngine {
    oracle: Option<Arc<dyn SimilarityOracle>>,
}

impl MergeEngine {
    pub fn new(oracle: Option<Arc<dyn SimilarityOracle>>) -> Self {
        Self { oracle }
    }

    pub async fn merge(
        &self,
        tracked: &TrackedItem,
        existing: &[RetainedItem],
        seen: &HashSet<IdentityKey>,
        candidates: &[Discovered],
    ) -> MergeOutcome {
        let mut outcome = MergeOutcome::default();
        let mut oracle = self.oracle.as_ref();
        let mut known: HashSet<IdentityKey> = existing
            .iter()
            .map(|r| r.item.identity())
            .chain(seen.iter().cloned())
            .collect();
        let mut working: Vec<RetainedItem> = existing.to_vec();
        let no_cursors = BTreeMap::new();

        for candidate in candidates {
            let identity = candidate.item.identity();
            if !known.insert(identity.clone()) {
                outcome.exact_skipped += 1;
                continue;
            }

            let default_topic = candidate.item.kind.default_topic();
            let new_entry = |topic: &str| Placement {
                topic: topic.to_string(),
                anchor: identity.clone(),
            };

            let placement = if candidate.hop == 0 {
                new_entry(PRIMARY_TOPIC)
            } else if let Some(current) = oracle {
                let document = DocumentModel::build(tracked, &working, &no_cursors);
                match current.classify(&candidate.item, &document).await {
                    Ok(Verdict::Duplicate) => {
                        debug!(item = %identity, "oracle: duplicate");
                        outcome.duplicates.push(identity.clone());
                        continue;
                    }
                    Ok(Verdict::New { topic }) => {
                        let topic = topic
                            .as_deref()
                            .map(str::trim)
                            .filter(|t| !t.is_empty())
                            .unwrap_or(default_topic);
                        new_entry(topic)
                    }
                    Ok(Verdict::RelatedMerge { entry }) => match document.entry_topic(&entry) {
                        Some(topic) => Placement {
                            topic: topic.to_string(),
                            anchor: entry,
                        },
                        None => {
                            debug!(item = %identity, entry = %entry, "merge target unknown, keeping as new");
                            new_entry(default_topic)
                        }
                    },
                    Ok(Verdict::Ambiguous) => {
                        debug!(item = %identity, "oracle reply ambiguous, keeping as new");
                        new_entry(default_topic)
                    }
                    Err(e) => {
                        warn!(item = %identity, error = %e, "oracle failed, exact dedup only for the rest of the run");
                        oracle = None;
                        outcome.oracle_degraded = true;
                        new_entry(default_topic)
                    }
                }
            } else {
                outcome.oracle_degraded = true;
                new_entry(default_topic)
            };

            let retained = RetainedItem {
                item: candidate.item.clone(),
                hop: candidate.hop,
                placement,
                parent: candidate.parent.clone(),
            };
            working.push(retained.clone());
            outcome.accepted.push(retained);
        }

        info!(
            item = %tracked.id,
            accepted = outcome.accepted.len(),
            duplicates = outcome.duplicates.len(),
            exact_skipped = outcome.exact_skipped,
            oracle_degraded = outcome.oracle_degraded,
            "merge complete"
        );
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::OracleError;
    use crate::testing::{item, ts, FakeOracle};
    use crate::types::{ContextItem, ItemKind};
    use std::sync::atomic::Ordering;

    fn found(item: ContextItem, hop: u32) -> Discovered {
        Discovered {
            item,
            hop,
            parent: None,
        }
    }

    fn tracked() -> TrackedItem {
        TrackedItem::new("T-123", "jira", vec![], ts(0))
    }

    #[tokio::test]
    async fn test_exact_dedup_against_existing_seen_and_run() {
        let primary = item("jira", ItemKind::Ticket, "T-123", "T-123", "", 0);
        let existing = vec![RetainedItem {
            placement: Placement {
                topic: PRIMARY_TOPIC.into(),
                anchor: primary.identity(),
            },
            item: primary.clone(),
            hop: 0,
            parent: None,
        }];
        let dup = item("github", ItemKind::Review, "1", "old", "", 1);
        let seen: HashSet<IdentityKey> = [dup.identity()].into_iter().collect();
        let fresh = item("slack", ItemKind::Message, "C:1", "m", "", 2);

        let oracle = Arc::new(FakeOracle::default());
        let engine = MergeEngine::new(Some(oracle.clone()));
        let outcome = engine
            .merge(
                &tracked(),
                &existing,
                &seen,
                &[
                    found(primary, 0),
                    found(dup, 1),
                    found(fresh.clone(), 1),
                    found(fresh, 2),
                ],
            )
            .await;
        assert_eq!(outcome.accepted.len(), 1);
        assert_eq!(outcome.exact_skipped, 3);
        assert_eq!(oracle.calls.load(Ordering::SeqCst), 1);
        assert!(!outcome.oracle_degraded);
    }

    #[tokio::test]
    async fn test_verdicts_place_items() {
        let primary = item("jira", ItemKind::Ticket, "T-123", "T-123", "", 0);
        let pr = item("github", ItemKind::Review, "847", "PR", "", 1);
        let follow_up = item("slack", ItemKind::Message, "C:1", "m", "", 2);
        let repeat = item("slack", ItemKind::Message, "C:2", "m", "", 3);
        let odd = item("slack", ItemKind::Message, "C:3", "m", "", 4);
        let orphan = item("github", ItemKind::Review, "9", "x", "", 5);

        let oracle = Arc::new(FakeOracle::scripted(vec![
            Ok(Verdict::New { topic: None }),
            Ok(Verdict::RelatedMerge { entry: pr.identity() }),
            Ok(Verdict::Duplicate),
            Ok(Verdict::Ambiguous),
            Ok(Verdict::RelatedMerge {
                entry: IdentityKey::new("github", ItemKind::Review, "404"),
            }),
        ]));
        let engine = MergeEngine::new(Some(oracle.clone()));
        let outcome = engine
            .merge(
                &tracked(),
                &[],
                &HashSet::new(),
                &[
                    found(primary.clone(), 0),
                    found(pr.clone(), 1),
                    found(follow_up.clone(), 1),
                    found(repeat.clone(), 2),
                    found(odd.clone(), 2),
                    found(orphan.clone(), 2),
                ],
            )
            .await;

        // primary bypasses the oracle
        assert_eq!(oracle.calls.load(Ordering::SeqCst), 5);
        let placements: Vec<(String, String, IdentityKey)> = outcome
            .accepted
            .iter()
            .map(|r| (r.item.native_id.clone(), r.placement.topic.clone(), r.placement.anchor.clone()))
            .collect();
        assert_eq!(
            placements,
            vec![
                ("T-123".into(), PRIMARY_TOPIC.into(), primary.identity()),
                ("847".into(), "Related Code".into(), pr.identity()),
                ("C:1".into(), "Related Code".into(), pr.identity()),
                ("C:3".into(), "Related Discussions".into(), odd.identity()),
                ("9".into(), "Related Code".into(), orphan.identity()),
            ]
        );
        assert_eq!(outcome.duplicates, vec![repeat.identity()]);
    }

    #[tokio::test]
    async fn test_oracle_failure_degrades_rest_of_run() {
        let oracle = Arc::new(FakeOracle::scripted(vec![Err(OracleError::Unavailable(
            "timeout".into(),
        ))]));
        let engine = MergeEngine::new(Some(oracle.clone()));
        let a = item("slack", ItemKind::Message, "C:1", "same words", "", 1);
        let b = item("github", ItemKind::Comment, "c1", "same words", "", 2);
        let outcome = engine
            .merge(&tracked(), &[], &HashSet::new(), &[found(a, 1), found(b, 1)])
            .await;
        assert!(outcome.oracle_degraded);
        assert_eq!(outcome.accepted.len(), 2);
        assert_eq!(outcome.accepted[1].placement.topic, "Discussion");
        assert_eq!(oracle.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_no_oracle_means_degraded() {
        let engine = MergeEngine::new(None);
        let a = item("slack", ItemKind::Message, "C:1", "x", "", 1);
        let outcome = engine.merge(&tracked(), &[], &HashSet::new(), &[found(a, 1)]).await;
        assert!(outcome.oracle_degraded);
        assert_eq!(outcome.accepted[0].placement.topic, "Related Discussions");
    }

    #[tokio::test]
    async fn test_no_oracle_not_degraded_without_survivors() {
        let engine = MergeEngine::new(None);
        let primary = item("jira", ItemKind::Ticket, "T-123", "T-123", "", 0);
        let known = item("slack", ItemKind::Message, "C:1", "x", "", 1);
        let seen: HashSet<IdentityKey> = [known.identity()].into_iter().collect();
        let outcome = engine
            .merge(&tracked(), &[], &seen, &[found(primary, 0), found(known, 1)])
            .await;
        assert!(!outcome.oracle_degraded);
        assert_eq!(outcome.accepted.len(), 1);
        assert_eq!(outcome.exact_skipped, 1);
    }

    #[tokio::test]
    async fn test_custom_topic_from_oracle() {
        let oracle = Arc::new(FakeOracle::scripted(vec![Ok(Verdict::New {
            topic: Some(" Rollout ".into()),
        })]));
        let engine = MergeEngine::new(Some(oracle));
        let a = item("slack", ItemKind::Message, "C:1", "x", "", 1);
        let outcome = engine.merge(&tracked(), &[], &HashSet::new(), &[found(a, 1)]).await;
        assert_eq!(outcome.accepted[0].placement.topic, "Rollout");
    }
}
