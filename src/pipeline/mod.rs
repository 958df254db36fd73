//! The per-advisor enhancement pipeline.
//!
//! The orchestrator exclusively owns document-version transitions. For each
//! configured advisor it drives the state machine
//!
//! ```text
//! Pending -> Running -> { Applied, Rejected, RetryScheduled, Failed }
//!                          RetryScheduled -> Running (bounded)
//! ```
//!
//! One attempt is: build context, run the advisor, validate and apply its
//! batch, judge the candidate, rewrite if the judge asks for it, and gate
//! the result through the evaluator. Oracle transport failures, rewrite
//! failures and evaluation failures consume attempts and retry from the
//! same input snapshot; a judge reject fails immediately; a batch the
//! validator discards is a terminal null success. Patch application is
//! strictly serialized: the next advisor only ever sees the committed
//! output of the previous one.

use crate::advisor::{AdvisorCatalog, AdvisorRunner, AdvisorSpec};
use crate::context::{ContextBuilder, SupportingFacts};
use crate::document::{
    ChangeCategory, ChangeRecord, FailedIteration, IterationResult, StoryDocument,
};
use crate::errors::{FailureReason, PipelineError};
use crate::evaluate::Evaluator;
use crate::judge::{Judge, Recommendation};
use crate::oracle::Oracle;
use crate::patch::{PathRules, ValidationContext, apply_batch, validate_batch};
use crate::rewrite::{RewriteError, Rewriter};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

/// Default number of additional attempts after the first.
pub const DEFAULT_RETRY_BOUND: u32 = 2;

/// Default minimum acceptable overall judge score.
pub const DEFAULT_JUDGE_FLOOR: u8 = 2;

/// Tunable pipeline behaviour.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineSettings {
    /// Additional attempts allowed per advisor after the first one.
    pub retry_bound: u32,
    /// Judge scores below this floor reject the revision outright.
    pub judge_floor: u8,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            retry_bound: DEFAULT_RETRY_BOUND,
            judge_floor: DEFAULT_JUDGE_FLOOR,
        }
    }
}

/// Cooperative, document-level cancellation.
///
/// Cancellation is honored between advisors, never mid-apply: a batch that
/// started applying either commits fully or is discarded fully.
#[derive(Debug, Clone, Default)]
pub struct CancellationFlag(Arc<AtomicBool>);

impl CancellationFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Per-advisor pipeline state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdvisorState {
    Pending,
    Running { attempt: u32 },
    Applied,
    Rejected,
    RetryScheduled { attempt: u32 },
    Failed,
}

impl AdvisorState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Applied | Self::Rejected | Self::Failed)
    }

    /// Whether `next` is a legal successor of this state.
    pub fn can_transition_to(&self, next: &AdvisorState) -> bool {
        use AdvisorState::*;
        match (self, next) {
            (Pending, Running { attempt: 0 }) => true,
            (Running { .. }, Applied | Rejected | Failed) => true,
            (Running { attempt: a }, RetryScheduled { attempt: b }) => *b == a + 1,
            (RetryScheduled { attempt: a }, Running { attempt: b }) => a == b,
            _ => false,
        }
    }
}

/// How one advisor's run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutcomeKind {
    /// Patches applied, judged and verified.
    Applied,
    /// Null success: abstained or batch discarded, recorded in history.
    Rejected,
    /// Attempts exhausted, recorded in the failure list.
    Failed,
    /// Advisor was already applied to this document.
    Skipped,
}

impl OutcomeKind {
    pub fn emoji(&self) -> &'static str {
        match self {
            Self::Applied => "✓",
            Self::Rejected => "⚠",
            Self::Failed => "✗",
            Self::Skipped => "•",
        }
    }
}

impl fmt::Display for OutcomeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Applied => "applied",
            Self::Rejected => "rejected",
            Self::Failed => "failed",
            Self::Skipped => "skipped",
        };
        write!(f, "{}", s)
    }
}

/// One advisor's terminal outcome in a pipeline run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdvisorOutcome {
    pub advisor_id: String,
    pub kind: OutcomeKind,
    /// Attempts consumed, including the first. Zero for skipped advisors.
    pub attempts: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

/// Summary of a whole pipeline run.
///
/// The run always terminates with the enhanced document plus the full list
/// of advisors that did not make it; nothing is silently lost.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineReport {
    pub run_id: Uuid,
    pub outcomes: Vec<AdvisorOutcome>,
    /// True when a cancellation stopped the run early.
    pub cancelled: bool,
    /// Advisors never started because of cancellation.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub not_run: Vec<String>,
}

impl PipelineReport {
    pub fn count(&self, kind: OutcomeKind) -> usize {
        self.outcomes.iter().filter(|o| o.kind == kind).count()
    }

    pub fn failed_advisors(&self) -> Vec<&str> {
        self.outcomes
            .iter()
            .filter(|o| o.kind == OutcomeKind::Failed)
            .map(|o| o.advisor_id.as_str())
            .collect()
    }

    pub fn has_failures(&self) -> bool {
        self.outcomes.iter().any(|o| o.kind == OutcomeKind::Failed)
    }
}

impl fmt::Display for PipelineReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "Pipeline run {}: {} applied, {} rejected, {} failed{}",
            self.run_id,
            self.count(OutcomeKind::Applied),
            self.count(OutcomeKind::Rejected),
            self.count(OutcomeKind::Failed),
            if self.cancelled { " (cancelled)" } else { "" },
        )?;
        for outcome in &self.outcomes {
            write!(
                f,
                "  {} {}: {} ({} attempt(s))",
                outcome.kind.emoji(),
                outcome.advisor_id,
                outcome.kind,
                outcome.attempts
            )?;
            if let Some(ref detail) = outcome.detail {
                write!(f, " - {}", detail)?;
            }
            writeln!(f)?;
        }
        for advisor_id in &self.not_run {
            writeln!(f, "  • {}: not run", advisor_id)?;
        }
        Ok(())
    }
}

enum AttemptOutcome {
    Applied {
        result: IterationResult,
        view: crate::document::StructuredView,
    },
    NullSuccess {
        result: IterationResult,
        detail: String,
    },
    Retryable(FailureReason),
    Fatal(FailureReason),
}

/// Drives the per-advisor pipeline over one document.
///
/// Each document run owns its own orchestrator; concurrent runs over
/// different documents share nothing.
pub struct Orchestrator {
    catalog: AdvisorCatalog,
    order: Vec<String>,
    rules: PathRules,
    settings: PipelineSettings,
    oracle: Arc<dyn Oracle>,
    cancel: CancellationFlag,
}

impl Orchestrator {
    /// Build an orchestrator running the catalog's advisors in registration
    /// order.
    pub fn new(
        catalog: AdvisorCatalog,
        rules: PathRules,
        settings: PipelineSettings,
        oracle: Arc<dyn Oracle>,
    ) -> Self {
        let order = catalog.ids();
        Self {
            catalog,
            order,
            rules,
            settings,
            oracle,
            cancel: CancellationFlag::new(),
        }
    }

    /// Override the advisor ordering. Every identifier must be registered.
    pub fn with_order(mut self, order: Vec<String>) -> Result<Self, PipelineError> {
        for advisor_id in &order {
            self.catalog.get(advisor_id)?;
        }
        self.order = order;
        Ok(self)
    }

    /// Handle for cancelling this run from elsewhere.
    pub fn cancellation_flag(&self) -> CancellationFlag {
        self.cancel.clone()
    }

    /// Run every configured advisor to a terminal state.
    pub async fn run(
        &self,
        document: &mut StoryDocument,
        facts: &SupportingFacts,
    ) -> Result<PipelineReport, PipelineError> {
        let run_id = Uuid::new_v4();
        info!(%run_id, advisors = self.order.len(), document = %document.id(), "pipeline run started");

        let mut outcomes = Vec::with_capacity(self.order.len());
        let mut cancelled = false;
        let mut not_run = Vec::new();

        for (index, advisor_id) in self.order.iter().enumerate() {
            if self.cancel.is_cancelled() {
                cancelled = true;
                not_run = self.order[index..].to_vec();
                warn!(%run_id, advisor = %advisor_id, "cancelled before next advisor");
                break;
            }
            let spec = self.catalog.get(advisor_id)?;
            let outcome = self.run_advisor(document, spec, facts).await;
            info!(
                advisor = %advisor_id,
                kind = %outcome.kind,
                attempts = outcome.attempts,
                "advisor reached a terminal state"
            );
            outcomes.push(outcome);
        }

        let report = PipelineReport {
            run_id,
            outcomes,
            cancelled,
            not_run,
        };
        info!(
            %run_id,
            applied = report.count(OutcomeKind::Applied),
            failed = report.count(OutcomeKind::Failed),
            "pipeline run finished"
        );
        Ok(report)
    }

    async fn run_advisor(
        &self,
        document: &mut StoryDocument,
        spec: &AdvisorSpec,
        facts: &SupportingFacts,
    ) -> AdvisorOutcome {
        // Idempotence: a second run of an applied advisor is a no-op.
        if document.has_applied(&spec.id) {
            warn!(advisor = %spec.id, "already applied, skipping");
            return AdvisorOutcome {
                advisor_id: spec.id.clone(),
                kind: OutcomeKind::Skipped,
                attempts: 0,
                detail: Some("advisor already applied to this document".to_string()),
            };
        }

        let started = Instant::now();
        let mut state = AdvisorState::Pending;
        let mut attempt: u32 = 0;

        loop {
            advance(&spec.id, &mut state, AdvisorState::Running { attempt });

            match self.attempt(document, spec, facts).await {
                AttemptOutcome::Applied { result, view } => {
                    advance(&spec.id, &mut state, AdvisorState::Applied);
                    let duration = started.elapsed().as_millis() as u64;
                    document.commit_iteration(result.with_duration_ms(duration), view);
                    return AdvisorOutcome {
                        advisor_id: spec.id.clone(),
                        kind: OutcomeKind::Applied,
                        attempts: attempt + 1,
                        detail: None,
                    };
                }
                AttemptOutcome::NullSuccess { result, detail } => {
                    advance(&spec.id, &mut state, AdvisorState::Rejected);
                    let duration = started.elapsed().as_millis() as u64;
                    let view = document.view().clone();
                    document.commit_iteration(result.with_duration_ms(duration), view);
                    return AdvisorOutcome {
                        advisor_id: spec.id.clone(),
                        kind: OutcomeKind::Rejected,
                        attempts: attempt + 1,
                        detail: Some(detail),
                    };
                }
                AttemptOutcome::Fatal(reason) => {
                    advance(&spec.id, &mut state, AdvisorState::Failed);
                    document.record_failure(FailedIteration::new(
                        spec.id.as_str(),
                        reason.clone(),
                        attempt + 1,
                    ));
                    return AdvisorOutcome {
                        advisor_id: spec.id.clone(),
                        kind: OutcomeKind::Failed,
                        attempts: attempt + 1,
                        detail: Some(reason.to_string()),
                    };
                }
                AttemptOutcome::Retryable(reason) => {
                    if attempt >= self.settings.retry_bound {
                        advance(&spec.id, &mut state, AdvisorState::Failed);
                        document.record_failure(FailedIteration::new(
                            spec.id.as_str(),
                            reason.clone(),
                            attempt + 1,
                        ));
                        return AdvisorOutcome {
                            advisor_id: spec.id.clone(),
                            kind: OutcomeKind::Failed,
                            attempts: attempt + 1,
                            detail: Some(reason.to_string()),
                        };
                    }
                    warn!(
                        advisor = %spec.id,
                        attempt = attempt + 1,
                        %reason,
                        "attempt failed, retrying from the same input"
                    );
                    advance(
                        &spec.id,
                        &mut state,
                        AdvisorState::RetryScheduled {
                            attempt: attempt + 1,
                        },
                    );
                    attempt += 1;
                }
            }
        }
    }

    /// One full attempt against the document's current snapshot. Retries
    /// re-enter here with the document unchanged, so they never compound on
    /// a previously failed output.
    async fn attempt(
        &self,
        document: &StoryDocument,
        spec: &AdvisorSpec,
        facts: &SupportingFacts,
    ) -> AttemptOutcome {
        let input_content = document.current_content().to_string();

        let context = ContextBuilder::for_advisor(document, spec, facts);
        let runner = AdvisorRunner::new(self.oracle.as_ref());
        let batch = match runner.run(spec, &context, &self.rules).await {
            Ok(batch) => batch,
            Err(e) => {
                return AttemptOutcome::Retryable(FailureReason::OracleTransport {
                    detail: e.to_string(),
                });
            }
        };

        if batch.is_empty() {
            debug!(advisor = %spec.id, "advisor abstained");
            return AttemptOutcome::NullSuccess {
                result: IterationResult::new(
                    spec.id.as_str(),
                    input_content.clone(),
                    input_content,
                ),
                detail: "abstained (scope gate)".to_string(),
            };
        }

        let ctx = ValidationContext {
            advisor_id: &spec.id,
            scope: &spec.scope,
            view: document.view(),
            rules: &self.rules,
        };
        let valid = match validate_batch(&batch.patches, &ctx) {
            Ok(valid) => valid,
            Err(rejections) => {
                warn!(
                    advisor = %spec.id,
                    rejections = rejections.len(),
                    "batch discarded by validation"
                );
                let detail = format!("batch discarded: {} rejection(s)", rejections.len());
                return AttemptOutcome::NullSuccess {
                    result: IterationResult::new(
                        spec.id.as_str(),
                        input_content.clone(),
                        input_content,
                    )
                    .with_rejections(rejections),
                    detail,
                };
            }
        };

        let (mut candidate_view, mut changes) = match apply_batch(document.view(), &valid) {
            Ok(applied) => applied,
            Err(conflict) => {
                warn!(advisor = %spec.id, %conflict, "batch discarded by application conflict");
                let detail = format!("batch discarded: {}", conflict);
                return AttemptOutcome::NullSuccess {
                    result: IterationResult::new(
                        spec.id.as_str(),
                        input_content.clone(),
                        input_content,
                    )
                    .with_rejections(vec![conflict]),
                    detail,
                };
            }
        };
        let mut candidate_content = candidate_view.render();

        let judge = Judge::new(self.oracle.as_ref(), self.settings.judge_floor);
        let judge_result = match judge.score(&candidate_content, facts).await {
            Ok(result) => result,
            Err(e) => {
                return AttemptOutcome::Retryable(FailureReason::OracleTransport {
                    detail: e.to_string(),
                });
            }
        };

        let mut rewrite_applied = false;
        match judge_result.recommendation {
            Recommendation::Reject => {
                return AttemptOutcome::Fatal(FailureReason::JudgeReject {
                    overall: judge_result.overall_score,
                    floor: self.settings.judge_floor,
                });
            }
            Recommendation::Rewrite => {
                let violations = judge_result.all_violations();
                let rewriter = Rewriter::new(self.oracle.as_ref());
                match rewriter.rewrite(&candidate_view, &violations, facts).await {
                    Ok(outcome) => {
                        let locations: Vec<String> =
                            violations.iter().map(|v| v.location.clone()).collect();
                        changes.push(
                            ChangeRecord::new(
                                ChangeCategory::Rewrite,
                                format!("repaired {} judge violation(s)", violations.len()),
                            )
                            .with_location(locations.join(", ")),
                        );
                        candidate_view = outcome.view;
                        candidate_content = outcome.content;
                        rewrite_applied = true;
                    }
                    Err(RewriteError::Oracle(e)) => {
                        return AttemptOutcome::Retryable(FailureReason::OracleTransport {
                            detail: e.to_string(),
                        });
                    }
                    Err(RewriteError::Unacceptable(detail)) => {
                        return AttemptOutcome::Retryable(FailureReason::RewriteFailure { detail });
                    }
                }
            }
            Recommendation::Approve => {}
        }

        let evaluator = Evaluator::new(self.oracle.as_ref());
        let evaluation = match evaluator
            .verify(&input_content, &candidate_content, &spec.id, &spec.purpose)
            .await
        {
            Ok(result) => result,
            Err(e) => {
                return AttemptOutcome::Retryable(FailureReason::OracleTransport {
                    detail: e.to_string(),
                });
            }
        };
        if !evaluation.passed {
            return AttemptOutcome::Retryable(FailureReason::EvaluationFailed {
                detail: evaluation.failure_detail(),
            });
        }
        debug!(advisor = %spec.id, score = evaluation.score, "evaluation passed");

        AttemptOutcome::Applied {
            result: IterationResult::new(spec.id.as_str(), input_content, candidate_content)
                .with_changes(changes)
                .with_judge_result(judge_result)
                .with_rewrite_applied(rewrite_applied),
            view: candidate_view,
        }
    }
}

fn advance(advisor_id: &str, state: &mut AdvisorState, next: AdvisorState) {
    debug_assert!(
        state.can_transition_to(&next),
        "illegal state transition {:?} -> {:?}",
        state,
        next
    );
    trace!(advisor = %advisor_id, from = ?state, to = ?next, "state transition");
    *state = next;
}

#[cfg(test)]
mod tests {
    use super::*;

    // =========================================
    // State machine tests
    // =========================================

    #[test]
    fn pending_only_starts_attempt_zero() {
        let pending = AdvisorState::Pending;
        assert!(pending.can_transition_to(&AdvisorState::Running { attempt: 0 }));
        assert!(!pending.can_transition_to(&AdvisorState::Running { attempt: 1 }));
        assert!(!pending.can_transition_to(&AdvisorState::Applied));
    }

    #[test]
    fn running_reaches_every_terminal_state() {
        let running = AdvisorState::Running { attempt: 0 };
        assert!(running.can_transition_to(&AdvisorState::Applied));
        assert!(running.can_transition_to(&AdvisorState::Rejected));
        assert!(running.can_transition_to(&AdvisorState::Failed));
    }

    #[test]
    fn retry_carries_the_incremented_attempt() {
        let running = AdvisorState::Running { attempt: 1 };
        assert!(running.can_transition_to(&AdvisorState::RetryScheduled { attempt: 2 }));
        assert!(!running.can_transition_to(&AdvisorState::RetryScheduled { attempt: 1 }));
        assert!(!running.can_transition_to(&AdvisorState::RetryScheduled { attempt: 3 }));

        let scheduled = AdvisorState::RetryScheduled { attempt: 2 };
        assert!(scheduled.can_transition_to(&AdvisorState::Running { attempt: 2 }));
        assert!(!scheduled.can_transition_to(&AdvisorState::Running { attempt: 3 }));
    }

    #[test]
    fn terminal_states_are_terminal() {
        assert!(AdvisorState::Applied.is_terminal());
        assert!(AdvisorState::Rejected.is_terminal());
        assert!(AdvisorState::Failed.is_terminal());
        assert!(!AdvisorState::Pending.is_terminal());
        assert!(!AdvisorState::Running { attempt: 0 }.is_terminal());
        assert!(!AdvisorState::RetryScheduled { attempt: 1 }.is_terminal());

        assert!(!AdvisorState::Applied.can_transition_to(&AdvisorState::Running { attempt: 0 }));
        assert!(!AdvisorState::Failed.can_transition_to(&AdvisorState::Running { attempt: 0 }));
    }

    // =========================================
    // Settings / report tests
    // =========================================

    #[test]
    fn default_settings_match_constants() {
        let settings = PipelineSettings::default();
        assert_eq!(settings.retry_bound, DEFAULT_RETRY_BOUND);
        assert_eq!(settings.judge_floor, DEFAULT_JUDGE_FLOOR);
    }

    #[test]
    fn cancellation_flag_is_shared() {
        let flag = CancellationFlag::new();
        let handle = flag.clone();
        assert!(!flag.is_cancelled());
        handle.cancel();
        assert!(flag.is_cancelled());
    }

    fn sample_report() -> PipelineReport {
        PipelineReport {
            run_id: Uuid::new_v4(),
            outcomes: vec![
                AdvisorOutcome {
                    advisor_id: "a".into(),
                    kind: OutcomeKind::Applied,
                    attempts: 1,
                    detail: None,
                },
                AdvisorOutcome {
                    advisor_id: "b".into(),
                    kind: OutcomeKind::Rejected,
                    attempts: 1,
                    detail: Some("abstained (scope gate)".into()),
                },
                AdvisorOutcome {
                    advisor_id: "c".into(),
                    kind: OutcomeKind::Failed,
                    attempts: 3,
                    detail: Some("oracle transport failed: timeout".into()),
                },
            ],
            cancelled: false,
            not_run: Vec::new(),
        }
    }

    #[test]
    fn report_counts_by_kind() {
        let report = sample_report();
        assert_eq!(report.count(OutcomeKind::Applied), 1);
        assert_eq!(report.count(OutcomeKind::Rejected), 1);
        assert_eq!(report.count(OutcomeKind::Failed), 1);
        assert_eq!(report.failed_advisors(), vec!["c"]);
        assert!(report.has_failures());
    }

    #[test]
    fn report_display_lists_every_outcome() {
        let display = format!("{}", sample_report());
        assert!(display.contains("1 applied, 1 rejected, 1 failed"));
        assert!(display.contains("✓ a: applied (1 attempt(s))"));
        assert!(display.contains("⚠ b: rejected"));
        assert!(display.contains("✗ c: failed (3 attempt(s)) - oracle transport failed"));
    }

    #[test]
    fn report_serializes_and_round_trips() {
        let report = sample_report();
        let json = serde_json::to_string(&report).unwrap();
        let back: PipelineReport = serde_json::from_str(&json).unwrap();
        assert_eq!(back, report);
    }
}
