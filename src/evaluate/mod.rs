//! The iteration gate.
//!
//! After judging (and any rewrite), the evaluator is a binary gate on the
//! whole iteration: did this advisor actually improve the document without
//! breaking anything? Four checks feed the score:
//!
//! 1. enhancement — the output differs from the input in a way attributable
//!    to the advisor's purpose
//! 2. coherence — no contradiction was introduced
//! 3. relevance — the changes map to the advisor's declared purpose
//! 4. non-destructive — no prior testable element silently disappeared
//!
//! `passed` is derived locally: true exactly when no blocking issue is
//! present. Warnings may pass.

use crate::errors::OracleError;
use crate::oracle::{Oracle, OracleRequest};
use crate::patch::extract_json;
use serde::{Deserialize, Serialize};
use std::fmt;

/// How bad one evaluation issue is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IssueSeverity {
    /// Fails the gate.
    Blocking,
    /// Worth recording, does not fail the gate.
    Warning,
    /// Observation only.
    Info,
}

impl IssueSeverity {
    pub fn is_blocking(&self) -> bool {
        matches!(self, Self::Blocking)
    }
}

impl fmt::Display for IssueSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Blocking => "blocking",
            Self::Warning => "warning",
            Self::Info => "info",
        };
        write!(f, "{}", s)
    }
}

/// One issue the evaluator found with an iteration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationIssue {
    pub severity: IssueSeverity,
    /// Which check raised it, e.g. `coherence` or `non-destructive`.
    pub category: String,
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suggestion: Option<String>,
}

impl EvaluationIssue {
    pub fn new(
        severity: IssueSeverity,
        category: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            severity,
            category: category.into(),
            description: description.into(),
            suggestion: None,
        }
    }

    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestion = Some(suggestion.into());
        self
    }
}

/// Pass/fail verdict for one iteration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationResult {
    pub passed: bool,
    /// Overall quality of the iteration, clamped to `[0, 1]`.
    pub score: f64,
    pub reasoning: String,
    #[serde(default)]
    pub issues: Vec<EvaluationIssue>,
}

impl EvaluationResult {
    /// Derive the verdict from the raw pieces. `passed` is true only when
    /// no blocking issue is present; the score is clamped.
    pub fn derive(score: f64, reasoning: impl Into<String>, issues: Vec<EvaluationIssue>) -> Self {
        let passed = !issues.iter().any(|i| i.severity.is_blocking());
        Self {
            passed,
            score: score.clamp(0.0, 1.0),
            reasoning: reasoning.into(),
            issues,
        }
    }

    pub fn blocking_issues(&self) -> Vec<&EvaluationIssue> {
        self.issues
            .iter()
            .filter(|i| i.severity.is_blocking())
            .collect()
    }

    /// Short description of why the gate failed, for failure records.
    pub fn failure_detail(&self) -> String {
        let blocking = self.blocking_issues();
        if blocking.is_empty() {
            return self.reasoning.clone();
        }
        blocking
            .iter()
            .map(|i| format!("{}: {}", i.category, i.description))
            .collect::<Vec<_>>()
            .join("; ")
    }
}

/// Verifies iterations through the oracle.
pub struct Evaluator<'a> {
    oracle: &'a dyn Oracle,
}

impl<'a> Evaluator<'a> {
    pub fn new(oracle: &'a dyn Oracle) -> Self {
        Self { oracle }
    }

    /// Gate one iteration: `before` is the advisor's input snapshot,
    /// `after` the candidate that would be committed.
    pub async fn verify(
        &self,
        before: &str,
        after: &str,
        advisor_id: &str,
        advisor_purpose: &str,
    ) -> Result<EvaluationResult, OracleError> {
        let request = OracleRequest::new(
            EVALUATOR_SYSTEM,
            build_evaluation_prompt(before, after, advisor_id, advisor_purpose),
        );
        let output = self.oracle.complete(request).await?;
        parse_evaluation_response(&output)
    }
}

const EVALUATOR_SYSTEM: &str = "You verify that a document revision is a genuine, \
non-destructive improvement. You are the last gate before the revision is kept; \
be strict about anything that silently disappeared.";

/// Build the evaluation prompt.
pub fn build_evaluation_prompt(
    before: &str,
    after: &str,
    advisor_id: &str,
    advisor_purpose: &str,
) -> String {
    format!(
        r#"## ADVISOR
{advisor_id}: {advisor_purpose}

## BEFORE
{before}

## AFTER
{after}

## CHECKS
- enhancement: the AFTER differs from the BEFORE in a way attributable to the advisor's purpose
- coherence: no contradiction was introduced relative to the BEFORE
- relevance: the changes map to the advisor's declared purpose
- non-destructive: no previously testable element silently disappeared

## OUTPUT
Respond with ONLY a JSON object (no markdown, no prose):

{{
  "score": 0.0-1.0,
  "reasoning": "<short>",
  "issues": [
    {{
      "severity": "blocking|warning|info",
      "category": "enhancement|coherence|relevance|non-destructive",
      "description": "<what is wrong>",
      "suggestion": "<optional fix>"
    }}
  ]
}}

Use "blocking" only for problems that make this revision unacceptable."#,
        advisor_id = advisor_id,
        advisor_purpose = advisor_purpose,
        before = before,
        after = after,
    )
}

/// Decode an evaluation response; `passed` is always derived locally.
pub fn parse_evaluation_response(response: &str) -> Result<EvaluationResult, OracleError> {
    let json = extract_json(response)
        .ok_or_else(|| OracleError::Malformed("no JSON found in evaluation output".to_string()))?;
    let value: serde_json::Value = serde_json::from_str(&json)
        .map_err(|e| OracleError::Malformed(format!("invalid JSON in evaluation output: {}", e)))?;

    let score = value
        .get("score")
        .and_then(|s| s.as_f64())
        .ok_or_else(|| OracleError::Malformed("evaluation output has no numeric score".into()))?;

    let reasoning = value
        .get("reasoning")
        .and_then(|r| r.as_str())
        .unwrap_or("")
        .to_string();

    let issues: Vec<EvaluationIssue> = match value.get("issues") {
        Some(raw) => serde_json::from_value(raw.clone()).map_err(|e| {
            OracleError::Malformed(format!("evaluation output has malformed issues: {}", e))
        })?,
        None => Vec::new(),
    };

    Ok(EvaluationResult::derive(score, reasoning, issues))
}
