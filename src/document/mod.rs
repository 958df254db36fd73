//! The versioned story document and its audit trail.
//!
//! A [`StoryDocument`] owns the immutable original text, the current
//! canonical text, the section-addressable [`StructuredView`] derived from
//! it, and the append-only iteration history. Version transitions happen
//! only through the orchestrator's apply step; advisors, judge, rewriter
//! and evaluator all work on snapshots.

mod history;
mod structured;

pub use history::{ChangeCategory, ChangeRecord, FailedIteration, IterationResult};
pub use structured::{Section, SectionEntry, StructuredView, TargetPath};

use crate::errors::DocumentError;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The artifact under enhancement.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoryDocument {
    id: Uuid,
    original_content: String,
    current_content: String,
    view: StructuredView,
    applied_iteration_ids: Vec<String>,
    iteration_history: Vec<IterationResult>,
    failed_iterations: Vec<FailedIteration>,
}

impl StoryDocument {
    /// Create a document from raw input text.
    ///
    /// The input is parsed into the structured view and the current content
    /// becomes its canonical rendering, so the round-trip invariant holds
    /// from the start. Empty or whitespace-only input is refused.
    ///
    /// # Examples
    ///
    /// ```
    /// use burnish::document::StoryDocument;
    ///
    /// let doc = StoryDocument::from_content("A story about a pipeline.").unwrap();
    /// assert_eq!(doc.original_content(), "A story about a pipeline.");
    /// assert!(doc.iteration_history().is_empty());
    ///
    /// assert!(StoryDocument::from_content("   \n ").is_err());
    /// ```
    pub fn from_content(input: &str) -> Result<Self, DocumentError> {
        if input.trim().is_empty() {
            return Err(DocumentError::EmptyContent);
        }
        let view = StructuredView::parse(input);
        let current_content = view.render();
        Ok(Self {
            id: Uuid::new_v4(),
            original_content: input.to_string(),
            current_content,
            view,
            applied_iteration_ids: Vec::new(),
            iteration_history: Vec::new(),
            failed_iterations: Vec::new(),
        })
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    /// The text captured at creation, never mutated.
    pub fn original_content(&self) -> &str {
        &self.original_content
    }

    /// Canonical text reflecting all successfully applied iterations.
    pub fn current_content(&self) -> &str {
        &self.current_content
    }

    pub fn view(&self) -> &StructuredView {
        &self.view
    }

    /// Advisor identifiers already applied, in application order.
    pub fn applied_iteration_ids(&self) -> &[String] {
        &self.applied_iteration_ids
    }

    pub fn has_applied(&self, advisor_id: &str) -> bool {
        self.applied_iteration_ids.iter().any(|id| id == advisor_id)
    }

    pub fn iteration_history(&self) -> &[IterationResult] {
        &self.iteration_history
    }

    pub fn failed_iterations(&self) -> &[FailedIteration] {
        &self.failed_iterations
    }

    /// Commit one terminal iteration, advancing the document version.
    ///
    /// Used for both real applications and null successes (abstentions and
    /// discarded batches commit with `output_content == input_content` and
    /// the unchanged view). The advisor id is recorded at most once.
    pub(crate) fn commit_iteration(&mut self, result: IterationResult, view: StructuredView) {
        debug_assert_eq!(
            result.input_content, self.current_content,
            "iteration input must chain from the current content"
        );
        self.current_content = result.output_content.clone();
        self.view = view;
        if !self.has_applied(&result.advisor_id) {
            self.applied_iteration_ids.push(result.advisor_id.clone());
        }
        self.iteration_history.push(result);
    }

    /// Record an advisor that exhausted its attempts. The document version
    /// is left untouched.
    pub(crate) fn record_failure(&mut self, failure: FailedIteration) {
        self.failed_iterations.push(failure);
    }
}
