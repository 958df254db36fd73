//! Patch validation.
//!
//! Five rules, checked in order, first failure wins:
//!
//! 1. the target path must be inside the advisor's declared scope
//! 2. field presence must match the operation (and the reasoning, when
//!    present, must fit the wire limit)
//! 3. a `replace`/`remove` selector must resolve to exactly one element in
//!    the current document
//! 4. the item identifier must carry the prefix required at its path
//! 5. the metadata must name the invoking advisor
//!
//! Validation has no side effects. A failing patch discards its whole batch;
//! the rejections are recorded against the iteration, not raised.

use crate::document::{SectionEntry, StructuredView, TargetPath};
use crate::errors::PatchRejection;
use crate::patch::{MAX_REASONING_CHARS, Patch, PatchOp};
use indexmap::IndexMap;

/// Identifier rule attached to one document path.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct PathRule {
    /// Required identifier prefix; entries at this path carry ids of the
    /// form `<prefix>-<suffix>`.
    pub prefix: String,
}

/// Identifier rules for every addressable path.
pub type PathRules = IndexMap<TargetPath, PathRule>;

/// Everything validation needs to know about the invocation.
pub struct ValidationContext<'a> {
    /// Declared identity of the advisor whose batch is being validated.
    pub advisor_id: &'a str,
    /// The advisor's scope allow-list.
    pub scope: &'a [TargetPath],
    /// Snapshot of the document the batch was produced against.
    pub view: &'a StructuredView,
    /// Per-path identifier rules.
    pub rules: &'a PathRules,
}

/// A patch that passed all five rules, reduced to a closed action.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidPatch {
    pub advisor_id: String,
    pub path: TargetPath,
    pub action: PatchAction,
    pub reasoning: Option<String>,
}

/// The closed set of things a validated patch can do.
#[derive(Debug, Clone, PartialEq)]
pub enum PatchAction {
    Add { item: SectionEntry },
    Replace { target: String, item: SectionEntry },
    Remove { target: String },
}

/// Validate a single patch against the advisor's scope and the current
/// document snapshot.
pub fn validate(patch: &Patch, ctx: &ValidationContext<'_>) -> Result<ValidPatch, PatchRejection> {
    // Rule 1: scope membership. A syntactically invalid path cannot be a
    // member of any scope.
    let path = match TargetPath::parse(&patch.path) {
        Ok(path) => path,
        Err(_) => {
            return Err(PatchRejection::ScopeViolation {
                advisor: ctx.advisor_id.to_string(),
                path: patch.path.clone(),
            });
        }
    };
    if !ctx.scope.contains(&path) {
        return Err(PatchRejection::ScopeViolation {
            advisor: ctx.advisor_id.to_string(),
            path: patch.path.clone(),
        });
    }

    // Rule 2: field shape per operation.
    check_shape(patch)?;

    // Rule 3: selector resolution for replace/remove.
    if let Some(selector) = &patch.matcher {
        let count = ctx.view.match_count(&path, &selector.id);
        if count != 1 {
            return Err(PatchRejection::UnresolvedMatch {
                path: patch.path.clone(),
                id: selector.id.clone(),
                count,
            });
        }
    }

    // Rule 4: identifier prefix.
    if let Some(item) = &patch.item
        && let Some(rule) = ctx.rules.get(&path)
        && !item.id.starts_with(&format!("{}-", rule.prefix))
    {
        return Err(PatchRejection::IdentifierViolation {
            path: patch.path.clone(),
            id: item.id.clone(),
            prefix: rule.prefix.clone(),
        });
    }

    // Rule 5: declared identity.
    if patch.metadata.advisor_id != ctx.advisor_id {
        return Err(PatchRejection::IdentityMismatch {
            claimed: patch.metadata.advisor_id.clone(),
            actual: ctx.advisor_id.to_string(),
        });
    }

    let action = match (patch.op, &patch.matcher, &patch.item) {
        (PatchOp::Add, None, Some(item)) => PatchAction::Add {
            item: item.clone().into_entry(),
        },
        (PatchOp::Replace, Some(selector), Some(item)) => PatchAction::Replace {
            target: selector.id.clone(),
            item: item.clone().into_entry(),
        },
        (PatchOp::Remove, Some(selector), None) => PatchAction::Remove {
            target: selector.id.clone(),
        },
        _ => {
            return Err(PatchRejection::MalformedPatch {
                op: patch.op.to_string(),
                detail: "inconsistent field shape".to_string(),
            });
        }
    };

    Ok(ValidPatch {
        advisor_id: ctx.advisor_id.to_string(),
        path,
        action,
        reasoning: patch.metadata.reasoning.clone(),
    })
}

/// Validate a whole batch, preserving order.
///
/// All rejections are collected so the iteration record can name every
/// problem; any rejection discards the batch.
pub fn validate_batch(
    patches: &[Patch],
    ctx: &ValidationContext<'_>,
) -> Result<Vec<ValidPatch>, Vec<PatchRejection>> {
    let mut valid = Vec::with_capacity(patches.len());
    let mut rejections = Vec::new();
    for patch in patches {
        match validate(patch, ctx) {
            Ok(v) => valid.push(v),
            Err(r) => rejections.push(r),
        }
    }
    if rejections.is_empty() {
        Ok(valid)
    } else {
        Err(rejections)
    }
}

fn check_shape(patch: &Patch) -> Result<(), PatchRejection> {
    let malformed = |detail: &str| PatchRejection::MalformedPatch {
        op: patch.op.to_string(),
        detail: detail.to_string(),
    };

    match patch.op {
        PatchOp::Add => {
            if patch.item.is_none() {
                return Err(malformed("'item' is required"));
            }
            if patch.matcher.is_some() {
                return Err(malformed("'match' is forbidden"));
            }
        }
        PatchOp::Replace => {
            if patch.matcher.is_none() {
                return Err(malformed("'match' is required"));
            }
            if patch.item.is_none() {
                return Err(malformed("'item' is required"));
            }
        }
        PatchOp::Remove => {
            if patch.matcher.is_none() {
                return Err(malformed("'match' is required"));
            }
            if patch.item.is_some() {
                return Err(malformed("'item' is forbidden"));
            }
        }
    }

    if let Some(item) = &patch.item
        && item.id.trim().is_empty()
    {
        return Err(malformed("'item.id' is empty"));
    }

    if let Some(reasoning) = &patch.metadata.reasoning
        && reasoning.chars().count() > MAX_REASONING_CHARS
    {
        return Err(malformed("'metadata.reasoning' exceeds 240 characters"));
    }

    Ok(())
}
