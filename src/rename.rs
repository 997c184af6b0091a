//! Heuristic detection of attribute renames. There is no stable field
//! identifier across schema edits, so scoring favors false negatives
//! (a missed rename degrades to a safe delete+add) over false
//! positives (which could silently merge unrelated data columns).

use std::collections::HashSet;

use crate::config::RenameScoring;
use crate::content_type::{Attribute, AttributeKind};

/// A proposed rename pair. Ephemeral: produced and consumed entirely
/// within one migration pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenameCandidate {
    pub old_name: String,
    pub new_name: String,
    /// Confidence in `0..=100`.
    pub score: u32,
}

/// Partition of the original deleted/added key sets once renames are
/// resolved. This is the contract the table synchronizer consumes.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RenameResolution {
    /// `(old, new)` attribute-name pairs to rename in place.
    pub renames: Vec<(String, String)>,
    /// Deleted keys not consumed by a rename: genuine drops.
    pub actual_deletions: Vec<String>,
    /// Added keys not consumed by a rename: genuine additions.
    pub actual_additions: Vec<String>,
}

/// Propose rename pairs for the keys that appear on only one side of a
/// schema edit.
///
/// Candidates are scored, filtered against the confidence threshold,
/// sorted by score descending, and then greedily selected so that no
/// old or new key is consumed twice. Ties keep first-seen evaluation
/// order; that order follows the declaration's attribute order and is
/// an accepted ambiguity.
pub fn detect_renames(
    old_attrs: &[Attribute],
    new_attrs: &[Attribute],
    deleted: &[String],
    added: &[String],
    scoring: &RenameScoring,
) -> Vec<RenameCandidate> {
    let mut candidates = Vec::new();

    for old_name in deleted {
        let Some(old_attr) = old_attrs.iter().find(|a| &a.name == old_name) else {
            continue;
        };
        for new_name in added {
            let Some(new_attr) = new_attrs.iter().find(|a| &a.name == new_name) else {
                continue;
            };
            // Incompatible pairs are discarded before scoring
            if !compatible(&old_attr.kind, &new_attr.kind) {
                continue;
            }
            let score = score_pair(&old_attr.kind, &new_attr.kind, scoring);
            if score < scoring.threshold {
                continue;
            }
            candidates.push(RenameCandidate {
                old_name: old_name.clone(),
                new_name: new_name.clone(),
                score,
            });
        }
    }

    // Stable sort: ties keep first-seen order
    candidates.sort_by(|a, b| b.score.cmp(&a.score));

    let mut consumed_old: HashSet<&str> = HashSet::new();
    let mut consumed_new: HashSet<&str> = HashSet::new();
    let mut selected = Vec::new();
    for candidate in &candidates {
        if consumed_old.contains(candidate.old_name.as_str())
            || consumed_new.contains(candidate.new_name.as_str())
        {
            continue;
        }
        consumed_old.insert(candidate.old_name.as_str());
        consumed_new.insert(candidate.new_name.as_str());
        selected.push(candidate.clone());
    }

    selected
}

/// Partition the original key sets into renames, genuine deletions and
/// genuine additions.
pub fn apply_rename_detections(
    candidates: &[RenameCandidate],
    deleted: &[String],
    added: &[String],
) -> RenameResolution {
    let consumed_old: HashSet<&str> = candidates.iter().map(|c| c.old_name.as_str()).collect();
    let consumed_new: HashSet<&str> = candidates.iter().map(|c| c.new_name.as_str()).collect();

    RenameResolution {
        renames: candidates
            .iter()
            .map(|c| (c.old_name.clone(), c.new_name.clone()))
            .collect(),
        actual_deletions: deleted
            .iter()
            .filter(|k| !consumed_old.contains(k.as_str()))
            .cloned()
            .collect(),
        actual_additions: added
            .iter()
            .filter(|k| !consumed_new.contains(k.as_str()))
            .cloned()
            .collect(),
    }
}

/// Type-compatibility gate. Pairs failing this are never proposed, no
/// matter how similar their flags look.
fn compatible(old: &AttributeKind, new: &AttributeKind) -> bool {
    match (old, new) {
        (AttributeKind::Scalar(a), AttributeKind::Scalar(b)) => a.kind == b.kind,
        (AttributeKind::Relation(a), AttributeKind::Relation(b)) => {
            a.cardinality == b.cardinality && a.target == b.target
        }
        (AttributeKind::Component(a), AttributeKind::Component(b)) => {
            a.component == b.component && a.repeatable == b.repeatable
        }
        (AttributeKind::DynamicZone, AttributeKind::DynamicZone) => true,
        _ => false,
    }
}

/// Integer similarity score for a type-compatible pair.
fn score_pair(old: &AttributeKind, new: &AttributeKind, scoring: &RenameScoring) -> u32 {
    let mut score = scoring.base_type_match;

    match (old, new) {
        (AttributeKind::Scalar(a), AttributeKind::Scalar(b)) => {
            if a.required == b.required {
                score += scoring.flag_bonus;
            }
            if a.unique == b.unique {
                score += scoring.flag_bonus;
            }
            if a.private == b.private {
                score += scoring.flag_bonus;
            }
            if a.kind.is_text_like() {
                if a.min_length == b.min_length {
                    score += scoring.length_bonus;
                }
                if a.max_length == b.max_length {
                    score += scoring.length_bonus;
                }
            }
        }
        (AttributeKind::Relation(a), AttributeKind::Relation(b)) => {
            // The gate already requires these; the bonuses keep relation
            // scores comfortably above the threshold
            if a.target == b.target {
                score += scoring.relation_target_bonus;
            }
            if a.cardinality == b.cardinality {
                score += scoring.relation_cardinality_bonus;
            }
        }
        (AttributeKind::Component(a), AttributeKind::Component(b)) => {
            if a.component == b.component {
                score += scoring.component_ref_bonus;
            }
            if a.repeatable == b.repeatable {
                score += scoring.component_repeatable_bonus;
            }
        }
        _ => {}
    }

    score.min(RenameScoring::MAX_SCORE)
}
