//! Targeted repair of judge-flagged violations.
//!
//! The rewriter receives the candidate document and the judge's located
//! violations and asks the oracle for a corrected document. The acceptance
//! checks are structural and local: the rewritten document must keep the
//! same set of sections and the same set of entry identifiers, so a repair
//! can move or reword content but never silently drop a testable element.
//! Meaning preservation beyond that is verified downstream by the
//! evaluation gate.

use crate::context::SupportingFacts;
use crate::document::StructuredView;
use crate::errors::OracleError;
use crate::judge::Violation;
use crate::oracle::{Oracle, OracleRequest};
use thiserror::Error;
use tracing::debug;

/// Why a rewrite attempt did not produce a usable document.
#[derive(Debug, Error)]
pub enum RewriteError {
    /// The oracle call itself failed; retried like any transport failure.
    #[error(transparent)]
    Oracle(#[from] OracleError),

    /// The oracle answered, but the output failed the acceptance checks.
    /// Consumes the current attempt.
    #[error("rewrite output rejected: {0}")]
    Unacceptable(String),
}

/// An accepted rewrite: the new view and its canonical rendering, swapped
/// in atomically by the caller.
#[derive(Debug, Clone, PartialEq)]
pub struct RewriteOutcome {
    pub view: StructuredView,
    pub content: String,
}

/// Repairs judge violations through the oracle.
pub struct Rewriter<'a> {
    oracle: &'a dyn Oracle,
}

impl<'a> Rewriter<'a> {
    pub fn new(oracle: &'a dyn Oracle) -> Self {
        Self { oracle }
    }

    /// Produce a corrected document for the given violations.
    pub async fn rewrite(
        &self,
        view: &StructuredView,
        violations: &[Violation],
        facts: &SupportingFacts,
    ) -> Result<RewriteOutcome, RewriteError> {
        let content = view.render();
        let request = OracleRequest::new(
            REWRITER_SYSTEM,
            build_rewrite_prompt(&content, violations, facts),
        );
        let output = self.oracle.complete(request).await?;
        let outcome = accept_rewrite(view, &output).map_err(RewriteError::Unacceptable)?;
        debug!(
            violations = violations.len(),
            chars = outcome.content.len(),
            "rewrite accepted"
        );
        Ok(outcome)
    }
}

const REWRITER_SYSTEM: &str = "You repair flagged problems in story documents. \
You change only the cited locations, you keep every entry identifier, and you \
never introduce claims that are not backed by the supporting facts.";

/// Build the rewrite prompt.
pub fn build_rewrite_prompt(
    content: &str,
    violations: &[Violation],
    facts: &SupportingFacts,
) -> String {
    let violation_lines: Vec<String> = violations.iter().map(|v| format!("- {}", v)).collect();
    format!(
        r#"## DOCUMENT
{content}

## VIOLATIONS TO REPAIR
{violations}

## SUPPORTING FACTS
{facts}

## OUTPUT
Return the COMPLETE corrected document in exactly the same format:
- keep every `## Title {{#path}}` heading and every `- [ID] text` line shape
- repair only the violations listed above, leave everything else untouched
- keep every entry identifier; you may move or reword entries, never drop them
- no commentary before or after the document"#,
        content = content,
        violations = violation_lines.join("\n"),
        facts = facts.digest(),
    )
}

/// Check a rewrite against the structural acceptance rules.
///
/// Returns the parsed outcome, or a reason the output is unusable.
pub fn accept_rewrite(original: &StructuredView, output: &str) -> Result<RewriteOutcome, String> {
    let trimmed = output.trim();
    if trimmed.is_empty() {
        return Err("rewrite output is empty".to_string());
    }

    let view = StructuredView::parse(trimmed);
    if view.sections.is_empty() && !original.sections.is_empty() {
        return Err("rewrite output lost the document's section structure".to_string());
    }

    let mut expected_paths: Vec<String> = original
        .section_paths()
        .iter()
        .map(|p| p.to_string())
        .collect();
    expected_paths.sort();
    let mut actual_paths: Vec<String> = view.section_paths().iter().map(|p| p.to_string()).collect();
    actual_paths.sort();
    if expected_paths != actual_paths {
        return Err(format!(
            "rewrite changed the section set (expected [{}], got [{}])",
            expected_paths.join(", "),
            actual_paths.join(", ")
        ));
    }

    let expected_ids = original.sorted_entry_ids();
    let actual_ids = view.sorted_entry_ids();
    if expected_ids != actual_ids {
        return Err(format!(
            "rewrite changed the entry identifier set (expected [{}], got [{}])",
            expected_ids.join(", "),
            actual_ids.join(", ")
        ));
    }

    let content = view.render();
    Ok(RewriteOutcome { view, content })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oracle::ReplayOracle;

    const ORIGINAL: &str = "## Acceptance Criteria {#acceptance_criteria}\n\
- [AC-1] Vague criterion.\n\n\
## Technical Notes {#notes.technical}\n\
- [NOTE-1] A note that belongs in criteria.\n";

    fn original_view() -> StructuredView {
        StructuredView::parse(ORIGINAL)
    }

    #[test]
    fn accept_rewrite_takes_a_faithful_repair() {
        let repaired = "## Acceptance Criteria {#acceptance_criteria}\n\
- [AC-1] Given a draft, when no patch applies, then the draft is unchanged.\n\n\
## Technical Notes {#notes.technical}\n\
- [NOTE-1] A note that belongs in criteria.\n";

        let outcome = accept_rewrite(&original_view(), repaired).unwrap();
        assert!(outcome.content.contains("Given a draft"));
        assert_eq!(outcome.view.sections.len(), 2);
    }

    #[test]
    fn accept_rewrite_allows_moving_an_entry_between_sections() {
        let moved = "## Acceptance Criteria {#acceptance_criteria}\n\
- [AC-1] Vague criterion.\n\
- [NOTE-1] A note that belongs in criteria.\n\n\
## Technical Notes {#notes.technical}\n";

        // The notes section survives with zero entries, the id set is intact.
        let outcome = accept_rewrite(&original_view(), moved).unwrap();
        assert_eq!(outcome.view.sorted_entry_ids(), vec!["AC-1", "NOTE-1"]);
    }

    #[test]
    fn accept_rewrite_refuses_empty_output() {
        let err = accept_rewrite(&original_view(), "  \n ").unwrap_err();
        assert!(err.contains("empty"));
    }

    #[test]
    fn accept_rewrite_refuses_unstructured_output() {
        let err = accept_rewrite(&original_view(), "A lovely essay instead.").unwrap_err();
        assert!(err.contains("section structure"));
    }

    #[test]
    fn accept_rewrite_refuses_dropped_sections() {
        let dropped = "## Acceptance Criteria {#acceptance_criteria}\n\
- [AC-1] Vague criterion.\n- [NOTE-1] moved here\n";
        let err = accept_rewrite(&original_view(), dropped).unwrap_err();
        assert!(err.contains("section set"));
    }

    #[test]
    fn accept_rewrite_refuses_dropped_identifiers() {
        let dropped = "## Acceptance Criteria {#acceptance_criteria}\n\
- [AC-1] Vague criterion.\n\n\
## Technical Notes {#notes.technical}\n";
        let err = accept_rewrite(&original_view(), dropped).unwrap_err();
        assert!(err.contains("identifier set"));
    }

    #[test]
    fn prompt_cites_each_violation() {
        let violations = vec![
            Violation::new("criterion is vague", "acceptance_criteria"),
            Violation::new("note is misplaced", "notes.technical"),
        ];
        let prompt = build_rewrite_prompt(ORIGINAL, &violations, &SupportingFacts::new());
        assert!(prompt.contains("- criterion is vague (at acceptance_criteria)"));
        assert!(prompt.contains("- note is misplaced (at notes.technical)"));
        assert!(prompt.contains("COMPLETE corrected document"));
    }

    #[tokio::test]
    async fn rewriter_round_trips_through_the_oracle() {
        let oracle = ReplayOracle::new();
        oracle.enqueue(
            "## Acceptance Criteria {#acceptance_criteria}\n\
- [AC-1] Given a draft, when nothing applies, then it is unchanged.\n\n\
## Technical Notes {#notes.technical}\n\
- [NOTE-1] A note that belongs in criteria.\n",
        );

        let rewriter = Rewriter::new(&oracle);
        let outcome = rewriter
            .rewrite(
                &original_view(),
                &[Violation::new("criterion is vague", "acceptance_criteria")],
                &SupportingFacts::new(),
            )
            .await
            .unwrap();
        assert!(outcome.content.contains("Given a draft"));
    }

    #[tokio::test]
    async fn rewriter_flags_unacceptable_output() {
        let oracle = ReplayOracle::new();
        oracle.enqueue("Sorry, here is a poem.");

        let rewriter = Rewriter::new(&oracle);
        let err = rewriter
            .rewrite(
                &original_view(),
                &[Violation::new("vague", "acceptance_criteria")],
                &SupportingFacts::new(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, RewriteError::Unacceptable(_)));
    }

    #[tokio::test]
    async fn rewriter_propagates_transport_failures() {
        let oracle = ReplayOracle::new();
        oracle.enqueue_error(OracleError::Timeout { seconds: 1 });

        let rewriter = Rewriter::new(&oracle);
        let err = rewriter
            .rewrite(&original_view(), &[], &SupportingFacts::new())
            .await
            .unwrap_err();
        assert!(matches!(err, RewriteError::Oracle(_)));
    }
}
