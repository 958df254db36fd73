//! Audit records for advisor iterations.
//!
//! Every advisor that reaches a terminal state leaves a trace: a successful
//! (or null) application appends an [`IterationResult`] to the document's
//! history, and an advisor that exhausts its attempts is recorded as a
//! [`FailedIteration`]. Neither collection is ever pruned.

use crate::errors::{FailureReason, PatchRejection};
use crate::judge::JudgeResult;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// What kind of change one applied patch made.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeCategory {
    Added,
    Replaced,
    Removed,
    /// A judge-triggered rewrite repaired flagged locations.
    Rewrite,
}

impl fmt::Display for ChangeCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Added => "added",
            Self::Replaced => "replaced",
            Self::Removed => "removed",
            Self::Rewrite => "rewrite",
        };
        write!(f, "{}", s)
    }
}

/// One change descriptor inside an iteration record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeRecord {
    pub category: ChangeCategory,
    pub description: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
}

impl ChangeRecord {
    pub fn new(category: ChangeCategory, description: impl Into<String>) -> Self {
        Self {
            category,
            description: description.into(),
            location: None,
        }
    }

    pub fn with_location(mut self, location: impl Into<String>) -> Self {
        self.location = Some(location.into());
        self
    }
}

impl fmt::Display for ChangeRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.category, self.description)?;
        if let Some(ref location) = self.location {
            write!(f, " (at {})", location)?;
        }
        Ok(())
    }
}

/// One advisor application that reached `Applied` or `Rejected`.
///
/// The chain invariant holds across the history: the `input_content` of
/// iteration *n* equals the `output_content` of iteration *n-1*, and the
/// first iteration starts from the document's original content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IterationResult {
    pub advisor_id: String,
    pub input_content: String,
    pub output_content: String,
    #[serde(default)]
    pub changes_applied: Vec<ChangeRecord>,
    /// Validation rejections that discarded this advisor's batch, if any.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub rejections: Vec<PatchRejection>,
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub judge_result: Option<JudgeResult>,
    /// True when a judge-flagged violation was repaired by a rewrite.
    #[serde(default)]
    pub rewrite_applied: bool,
}

impl IterationResult {
    pub fn new(
        advisor_id: impl Into<String>,
        input_content: impl Into<String>,
        output_content: impl Into<String>,
    ) -> Self {
        Self {
            advisor_id: advisor_id.into(),
            input_content: input_content.into(),
            output_content: output_content.into(),
            changes_applied: Vec::new(),
            rejections: Vec::new(),
            timestamp: Utc::now(),
            duration_ms: None,
            judge_result: None,
            rewrite_applied: false,
        }
    }

    pub fn with_changes(mut self, changes: Vec<ChangeRecord>) -> Self {
        self.changes_applied = changes;
        self
    }

    pub fn with_rejections(mut self, rejections: Vec<PatchRejection>) -> Self {
        self.rejections = rejections;
        self
    }

    pub fn with_judge_result(mut self, judge_result: JudgeResult) -> Self {
        self.judge_result = Some(judge_result);
        self
    }

    pub fn with_rewrite_applied(mut self, rewrite_applied: bool) -> Self {
        self.rewrite_applied = rewrite_applied;
        self
    }

    pub fn with_duration_ms(mut self, duration_ms: u64) -> Self {
        self.duration_ms = Some(duration_ms);
        self
    }

    /// True for a null success: the advisor abstained or its batch was
    /// discarded, and the content passed through unchanged.
    pub fn is_noop(&self) -> bool {
        self.changes_applied.is_empty()
    }
}

/// An advisor that exhausted its attempts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailedIteration {
    pub advisor_id: String,
    pub reason: FailureReason,
    /// Total attempts consumed, including the first.
    pub attempts: u32,
    pub timestamp: DateTime<Utc>,
}

impl FailedIteration {
    pub fn new(advisor_id: impl Into<String>, reason: FailureReason, attempts: u32) -> Self {
        Self {
            advisor_id: advisor_id.into(),
            reason,
            attempts,
            timestamp: Utc::now(),
        }
    }
}

impl fmt::Display for FailedIteration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} failed after {} attempt(s): {}",
            self.advisor_id, self.attempts, self.reason
        )
    }
}
