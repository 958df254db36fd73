//! Patch application.
//!
//! Application is all-or-nothing per advisor: patches mutate a clone of the
//! document's view in the order the advisor returned them, and the first
//! conflict throws the whole candidate away. The caller only commits the
//! returned view, so a failed batch is never partially visible.

use crate::document::{ChangeCategory, ChangeRecord, StructuredView};
use crate::errors::PatchRejection;
use crate::patch::validator::{PatchAction, ValidPatch};

/// Apply a validated batch to a snapshot, producing the candidate view and
/// the change descriptors for the iteration record.
///
/// An empty batch yields an unchanged clone; the caller still records the
/// iteration (a null success advances the applied-advisor set).
pub fn apply_batch(
    view: &StructuredView,
    patches: &[ValidPatch],
) -> Result<(StructuredView, Vec<ChangeRecord>), PatchRejection> {
    let mut next = view.clone();
    let mut changes = Vec::with_capacity(patches.len());

    for patch in patches {
        let change = match &patch.action {
            PatchAction::Add { item } => {
                let section = next.ensure_section(&patch.path);
                if section.contains_id(&item.id) {
                    return Err(PatchRejection::DuplicateIdentifier {
                        path: patch.path.to_string(),
                        id: item.id.clone(),
                    });
                }
                section.entries.push(item.clone());
                describe(patch, ChangeCategory::Added, &item.id)
            }
            PatchAction::Replace { target, item } => {
                let section = next.section_mut(&patch.path).ok_or_else(|| {
                    PatchRejection::UnresolvedMatch {
                        path: patch.path.to_string(),
                        id: target.clone(),
                        count: 0,
                    }
                })?;
                // An earlier patch in the same batch may have consumed the
                // target, so resolution is re-checked here.
                let position =
                    section
                        .position_of(target)
                        .ok_or_else(|| PatchRejection::UnresolvedMatch {
                            path: patch.path.to_string(),
                            id: target.clone(),
                            count: 0,
                        })?;
                if item.id != *target && section.contains_id(&item.id) {
                    return Err(PatchRejection::DuplicateIdentifier {
                        path: patch.path.to_string(),
                        id: item.id.clone(),
                    });
                }
                section.entries[position] = item.clone();
                describe(patch, ChangeCategory::Replaced, &item.id)
            }
            PatchAction::Remove { target } => {
                let section = next.section_mut(&patch.path).ok_or_else(|| {
                    PatchRejection::UnresolvedMatch {
                        path: patch.path.to_string(),
                        id: target.clone(),
                        count: 0,
                    }
                })?;
                let position =
                    section
                        .position_of(target)
                        .ok_or_else(|| PatchRejection::UnresolvedMatch {
                            path: patch.path.to_string(),
                            id: target.clone(),
                            count: 0,
                        })?;
                section.entries.remove(position);
                describe(patch, ChangeCategory::Removed, target)
            }
        };
        changes.push(change);
    }

    Ok((next, changes))
}

fn describe(patch: &ValidPatch, category: ChangeCategory, id: &str) -> ChangeRecord {
    let description = patch
        .reasoning
        .clone()
        .unwrap_or_else(|| format!("{} '{}'", category, id));
    ChangeRecord::new(category, description).with_location(patch.path.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::{SectionEntry, TargetPath};

    fn path(raw: &str) -> TargetPath {
        TargetPath::parse(raw).unwrap()
    }

    fn sample_view() -> StructuredView {
        StructuredView::parse(
            "## Acceptance Criteria {#acceptance_criteria}\n\
- [AC-1] First criterion.\n\
- [AC-2] Second criterion.\n",
        )
    }

    fn valid(action: PatchAction, target: &str) -> ValidPatch {
        ValidPatch {
            advisor_id: "criteria-auditor".into(),
            path: path(target),
            action,
            reasoning: None,
        }
    }

    #[test]
    fn add_appends_to_the_collection() {
        let view = sample_view();
        let patch = valid(
            PatchAction::Add {
                item: SectionEntry::new("AC-3", "Third criterion."),
            },
            "acceptance_criteria",
        );

        let (next, changes) = apply_batch(&view, &[patch]).unwrap();
        let ids: Vec<_> = next
            .section(&path("acceptance_criteria"))
            .unwrap()
            .entries
            .iter()
            .map(|e| e.id.as_str())
            .collect();
        assert_eq!(ids, ["AC-1", "AC-2", "AC-3"]);
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].category, ChangeCategory::Added);
        assert_eq!(changes[0].location.as_deref(), Some("acceptance_criteria"));
    }

    #[test]
    fn add_to_missing_section_creates_it() {
        let view = sample_view();
        let patch = valid(
            PatchAction::Add {
                item: SectionEntry::new("NOTE-1", "A note."),
            },
            "notes.technical",
        );

        let (next, _) = apply_batch(&view, &[patch]).unwrap();
        let section = next.section(&path("notes.technical")).unwrap();
        assert_eq!(section.title, "Notes Technical");
        assert_eq!(section.entries.len(), 1);
    }

    #[test]
    fn add_duplicate_id_is_a_conflict() {
        let view = sample_view();
        let patch = valid(
            PatchAction::Add {
                item: SectionEntry::new("AC-1", "Shadowing entry."),
            },
            "acceptance_criteria",
        );

        let err = apply_batch(&view, &[patch]).unwrap_err();
        assert!(matches!(err, PatchRejection::DuplicateIdentifier { .. }));
    }

    #[test]
    fn replace_preserves_position() {
        let view = sample_view();
        let patch = valid(
            PatchAction::Replace {
                target: "AC-1".into(),
                item: SectionEntry::new("AC-1", "Sharper first criterion."),
            },
            "acceptance_criteria",
        );

        let (next, changes) = apply_batch(&view, &[patch]).unwrap();
        let entries = &next.section(&path("acceptance_criteria")).unwrap().entries;
        assert_eq!(entries[0].id, "AC-1");
        assert_eq!(entries[0].text, "Sharper first criterion.");
        assert_eq!(entries[1].id, "AC-2");
        assert_eq!(changes[0].category, ChangeCategory::Replaced);
    }

    #[test]
    fn remove_deletes_the_matched_entry() {
        let view = sample_view();
        let patch = valid(
            PatchAction::Remove {
                target: "AC-1".into(),
            },
            "acceptance_criteria",
        );

        let (next, changes) = apply_batch(&view, &[patch]).unwrap();
        let entries = &next.section(&path("acceptance_criteria")).unwrap().entries;
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].id, "AC-2");
        assert_eq!(changes[0].category, ChangeCategory::Removed);
    }

    #[test]
    fn patches_apply_in_returned_order() {
        let view = sample_view();
        let patches = vec![
            valid(
                PatchAction::Remove {
                    target: "AC-1".into(),
                },
                "acceptance_criteria",
            ),
            valid(
                PatchAction::Add {
                    item: SectionEntry::new("AC-1", "Re-added with new text."),
                },
                "acceptance_criteria",
            ),
        ];

        let (next, changes) = apply_batch(&view, &patches).unwrap();
        let entries = &next.section(&path("acceptance_criteria")).unwrap().entries;
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[1].id, "AC-1");
        assert_eq!(changes.len(), 2);
    }

    #[test]
    fn replace_of_entry_removed_earlier_in_batch_conflicts() {
        let view = sample_view();
        let patches = vec![
            valid(
                PatchAction::Remove {
                    target: "AC-2".into(),
                },
                "acceptance_criteria",
            ),
            valid(
                PatchAction::Replace {
                    target: "AC-2".into(),
                    item: SectionEntry::new("AC-2", "Ghost."),
                },
                "acceptance_criteria",
            ),
        ];

        let err = apply_batch(&view, &patches).unwrap_err();
        assert!(matches!(
            err,
            PatchRejection::UnresolvedMatch { count: 0, .. }
        ));
    }

    #[test]
    fn failed_batch_leaves_input_view_untouched() {
        let view = sample_view();
        let patches = vec![
            valid(
                PatchAction::Add {
                    item: SectionEntry::new("AC-3", "Good."),
                },
                "acceptance_criteria",
            ),
            valid(
                PatchAction::Add {
                    item: SectionEntry::new("AC-3", "Conflicts."),
                },
                "acceptance_criteria",
            ),
        ];

        assert!(apply_batch(&view, &patches).is_err());
        // The input snapshot is untouched either way.
        assert_eq!(
            view.section(&path("acceptance_criteria")).unwrap().entries.len(),
            2
        );
    }

    #[test]
    fn empty_batch_is_a_noop() {
        let view = sample_view();
        let (next, changes) = apply_batch(&view, &[]).unwrap();
        assert_eq!(next, view);
        assert!(changes.is_empty());
    }

    #[test]
    fn reasoning_becomes_the_change_description() {
        let view = sample_view();
        let mut patch = valid(
            PatchAction::Add {
                item: SectionEntry::new("AC-3", "Third."),
            },
            "acceptance_criteria",
        );
        patch.reasoning = Some("cover the retry case".into());

        let (_, changes) = apply_batch(&view, &[patch]).unwrap();
        assert_eq!(changes[0].description, "cover the retry case");
    }
}
