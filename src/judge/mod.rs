//! Document scoring.
//!
//! The judge scores a candidate document along four fixed dimensions and
//! flags violations the rewriter can act on. The oracle only contributes
//! the per-dimension scores, reasoning and violations; the aggregate score
//! and the recommendation are derived locally so they stay deterministic
//! no matter what the oracle says.
//!
//! ## Types
//!
//! - [`DimensionScore`]: one dimension's 1-5 score, reasoning and violations
//! - [`Violation`]: a judge finding with a location the rewriter can target
//! - [`Recommendation`]: approve / rewrite / reject
//! - [`JudgeResult`]: the complete scoring output for one document version
//!
//! ## Example
//!
//! ```
//! use burnish::judge::{DimensionScore, JudgeResult, Recommendation, Violation};
//!
//! let dimensions = vec![
//!     DimensionScore::new("structure", 4, "sections are well separated"),
//!     DimensionScore::new("correctness", 5, "claims match the facts"),
//!     DimensionScore::new("testability", 3, "one vague criterion")
//!         .add_violation(Violation::new("criterion lacks a measurable outcome", "acceptance_criteria")),
//!     DimensionScore::new("completeness", 4, "covers the main flows"),
//! ];
//!
//! let result = JudgeResult::derive(dimensions, 2, None);
//! assert_eq!(result.overall_score, 3);
//! assert_eq!(result.recommendation, Recommendation::Rewrite);
//! ```

use crate::context::SupportingFacts;
use crate::errors::OracleError;
use crate::oracle::{Oracle, OracleRequest};
use crate::patch::extract_json;
use serde::{Deserialize, Serialize};
use std::fmt;

/// The fixed scoring dimensions for a story document.
pub const DIMENSIONS: [&str; 4] = ["structure", "correctness", "testability", "completeness"];

/// Lowest and highest dimension scores.
pub const MIN_SCORE: u8 = 1;
pub const MAX_SCORE: u8 = 5;

/// One judge finding, located so the rewriter can repair it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Violation {
    pub description: String,
    /// Section path or other address usable by the rewriter.
    pub location: String,
}

impl Violation {
    pub fn new(description: impl Into<String>, location: impl Into<String>) -> Self {
        Self {
            description: description.into(),
            location: location.into(),
        }
    }
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (at {})", self.description, self.location)
    }
}

/// One dimension's score, reasoning and violations.
///
/// Dimensions are independent: a failing dimension never suppresses what
/// another dimension reports.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DimensionScore {
    pub dimension: String,
    /// Integer score between 1 and 5.
    pub score: u8,
    pub reasoning: String,
    #[serde(default)]
    pub violations: Vec<Violation>,
}

impl DimensionScore {
    pub fn new(dimension: impl Into<String>, score: u8, reasoning: impl Into<String>) -> Self {
        Self {
            dimension: dimension.into(),
            score: score.clamp(MIN_SCORE, MAX_SCORE),
            reasoning: reasoning.into(),
            violations: Vec::new(),
        }
    }

    pub fn add_violation(mut self, violation: Violation) -> Self {
        self.violations.push(violation);
        self
    }

    pub fn has_violations(&self) -> bool {
        !self.violations.is_empty()
    }
}

/// What the pipeline should do with the scored document.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Recommendation {
    /// Good as it stands.
    #[default]
    Approve,
    /// Acceptable overall but flagged violations need targeted repair.
    Rewrite,
    /// Below the floor; retrying without new information is futile.
    Reject,
}

impl Recommendation {
    pub fn is_approve(&self) -> bool {
        matches!(self, Self::Approve)
    }

    pub fn is_rewrite(&self) -> bool {
        matches!(self, Self::Rewrite)
    }

    pub fn is_reject(&self) -> bool {
        matches!(self, Self::Reject)
    }
}

impl fmt::Display for Recommendation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Approve => "approve",
            Self::Rewrite => "rewrite",
            Self::Reject => "reject",
        };
        write!(f, "{}", s)
    }
}

/// Complete scoring output for one document version.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JudgeResult {
    pub dimensions: Vec<DimensionScore>,
    /// Minimum of the dimension scores. A document is only as sound as its
    /// weakest dimension.
    pub overall_score: u8,
    pub recommendation: Recommendation,
    /// Judge-proposed relationship or consistency updates, forwarded
    /// unchanged.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub relationship_updates: Option<serde_json::Value>,
}

impl JudgeResult {
    /// Derive the aggregate and recommendation from dimension scores.
    ///
    /// `reject` below `floor`; `rewrite` when any dimension reports a
    /// violation and the overall score is acceptable; `approve` otherwise.
    pub fn derive(
        dimensions: Vec<DimensionScore>,
        floor: u8,
        relationship_updates: Option<serde_json::Value>,
    ) -> Self {
        let overall_score = dimensions
            .iter()
            .map(|d| d.score)
            .min()
            .unwrap_or(MIN_SCORE);
        let has_violations = dimensions.iter().any(|d| d.has_violations());
        let recommendation = if overall_score < floor {
            Recommendation::Reject
        } else if has_violations {
            Recommendation::Rewrite
        } else {
            Recommendation::Approve
        };
        Self {
            dimensions,
            overall_score,
            recommendation,
            relationship_updates,
        }
    }

    /// All violations across every dimension.
    pub fn all_violations(&self) -> Vec<Violation> {
        self.dimensions
            .iter()
            .flat_map(|d| d.violations.iter().cloned())
            .collect()
    }

    pub fn has_violations(&self) -> bool {
        self.dimensions.iter().any(|d| d.has_violations())
    }

    /// Violations reported at the given location.
    pub fn violations_at(&self, location: &str) -> Vec<&Violation> {
        self.dimensions
            .iter()
            .flat_map(|d| d.violations.iter())
            .filter(|v| v.location == location)
            .collect()
    }
}

impl fmt::Display for JudgeResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "judge: {} (overall {}/{})",
            self.recommendation, self.overall_score, MAX_SCORE
        )?;
        for dim in &self.dimensions {
            writeln!(f, "  {}: {}/{}", dim.dimension, dim.score, MAX_SCORE)?;
            for violation in &dim.violations {
                writeln!(f, "    - {}", violation)?;
            }
        }
        Ok(())
    }
}

/// Scores documents through the oracle.
pub struct Judge<'a> {
    oracle: &'a dyn Oracle,
    floor: u8,
}

impl<'a> Judge<'a> {
    pub fn new(oracle: &'a dyn Oracle, floor: u8) -> Self {
        Self { oracle, floor }
    }

    /// Score a candidate document against the supporting facts.
    pub async fn score(
        &self,
        content: &str,
        facts: &SupportingFacts,
    ) -> Result<JudgeResult, OracleError> {
        let request = OracleRequest::new(JUDGE_SYSTEM, build_judge_prompt(content, facts));
        let output = self.oracle.complete(request).await?;
        parse_judge_response(&output, self.floor)
    }
}

const JUDGE_SYSTEM: &str = "You are a strict reviewer of story documents. \
You score along fixed dimensions and cite a location for every violation. \
You never let one dimension's failure hide another dimension's findings.";

/// Build the judging prompt.
pub fn build_judge_prompt(content: &str, facts: &SupportingFacts) -> String {
    format!(
        r#"## DOCUMENT
{content}

## SUPPORTING FACTS
{facts}

## DIMENSIONS
Score each dimension from 1 (worst) to 5 (best):
- structure: content sits in the right sections, concerns are separated
- correctness: every claim is backed by the supporting facts
- testability: acceptance criteria are independently verifiable
- completeness: nothing a reader needs is missing

## OUTPUT
Respond with ONLY a JSON object (no markdown, no prose):

{{
  "dimensions": [
    {{
      "dimension": "structure",
      "score": 1-5,
      "reasoning": "<short>",
      "violations": [{{"description": "<what is wrong>", "location": "<section path>"}}]
    }}
  ]
}}

Include all four dimensions. Report every violation you see with a location;
an empty "violations" list means the dimension is clean."#,
        content = content,
        facts = facts.digest(),
    )
}

/// Decode a judge response and derive the deterministic parts.
///
/// All four dimensions must be present and every violation must carry a
/// usable location; anything else is a decoding failure.
pub fn parse_judge_response(response: &str, floor: u8) -> Result<JudgeResult, OracleError> {
    let json = extract_json(response)
        .ok_or_else(|| OracleError::Malformed("no JSON found in judge output".to_string()))?;
    let value: serde_json::Value = serde_json::from_str(&json)
        .map_err(|e| OracleError::Malformed(format!("invalid JSON in judge output: {}", e)))?;

    let raw_dimensions = value
        .get("dimensions")
        .and_then(|d| d.as_array())
        .ok_or_else(|| OracleError::Malformed("judge output has no 'dimensions' array".into()))?;

    let mut dimensions = Vec::with_capacity(DIMENSIONS.len());
    for name in DIMENSIONS {
        let entry = raw_dimensions
            .iter()
            .find(|d| d.get("dimension").and_then(|n| n.as_str()) == Some(name))
            .ok_or_else(|| {
                OracleError::Malformed(format!("judge output is missing dimension '{}'", name))
            })?;

        let score = entry
            .get("score")
            .and_then(|s| s.as_u64())
            .ok_or_else(|| {
                OracleError::Malformed(format!("dimension '{}' has no integer score", name))
            })?
            .clamp(MIN_SCORE as u64, MAX_SCORE as u64) as u8;

        let reasoning = entry
            .get("reasoning")
            .and_then(|r| r.as_str())
            .unwrap_or("")
            .to_string();

        let mut dimension = DimensionScore::new(name, score, reasoning);
        if let Some(raw_violations) = entry.get("violations").and_then(|v| v.as_array()) {
            for raw in raw_violations {
                let description = raw
                    .get("description")
                    .and_then(|d| d.as_str())
                    .unwrap_or("")
                    .trim()
                    .to_string();
                let location = raw
                    .get("location")
                    .and_then(|l| l.as_str())
                    .unwrap_or("")
                    .trim()
                    .to_string();
                if description.is_empty() || location.is_empty() {
                    return Err(OracleError::Malformed(format!(
                        "dimension '{}' reports a violation without description or location",
                        name
                    )));
                }
                dimension.violations.push(Violation {
                    description,
                    location,
                });
            }
        }
        dimensions.push(dimension);
    }

    let relationship_updates = value
        .get("relationshipUpdates")
        .or_else(|| value.get("relationship_updates"))
        .cloned();

    Ok(JudgeResult::derive(dimensions, floor, relationship_updates))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oracle::ReplayOracle;

    fn clean_dimensions() -> Vec<DimensionScore> {
        DIMENSIONS
            .iter()
            .map(|name| DimensionScore::new(*name, 4, "fine"))
            .collect()
    }

    fn judge_json(testability_score: u8, with_violation: bool) -> String {
        let violations = if with_violation {
            r#"[{"description": "criterion is vague", "location": "acceptance_criteria"}]"#
        } else {
            "[]"
        };
        format!(
            r#"{{"dimensions": [
                {{"dimension": "structure", "score": 4, "reasoning": "ok", "violations": []}},
                {{"dimension": "correctness", "score": 5, "reasoning": "ok", "violations": []}},
                {{"dimension": "testability", "score": {score}, "reasoning": "ok", "violations": {violations}}},
                {{"dimension": "completeness", "score": 4, "reasoning": "ok", "violations": []}}
            ]}}"#,
            score = testability_score,
            violations = violations,
        )
    }

    // =========================================
    // Derivation tests
    // =========================================

    #[test]
    fn overall_score_is_the_minimum_dimension() {
        let mut dims = clean_dimensions();
        dims[2].score = 2;
        let result = JudgeResult::derive(dims, 2, None);
        assert_eq!(result.overall_score, 2);
    }

    #[test]
    fn clean_dimensions_above_floor_approve() {
        let result = JudgeResult::derive(clean_dimensions(), 2, None);
        assert_eq!(result.recommendation, Recommendation::Approve);
    }

    #[test]
    fn violation_above_floor_recommends_rewrite() {
        let mut dims = clean_dimensions();
        dims[0] = dims[0]
            .clone()
            .add_violation(Violation::new("misplaced content", "notes.technical"));
        let result = JudgeResult::derive(dims, 2, None);
        assert_eq!(result.recommendation, Recommendation::Rewrite);
    }

    #[test]
    fn score_below_floor_rejects_even_without_violations() {
        let mut dims = clean_dimensions();
        dims[1].score = 1;
        let result = JudgeResult::derive(dims, 2, None);
        assert_eq!(result.recommendation, Recommendation::Reject);
        assert_eq!(result.overall_score, 1);
    }

    #[test]
    fn reject_wins_over_rewrite_when_both_apply() {
        let mut dims = clean_dimensions();
        dims[1].score = 1;
        dims[2] = dims[2]
            .clone()
            .add_violation(Violation::new("vague", "acceptance_criteria"));
        let result = JudgeResult::derive(dims, 2, None);
        assert_eq!(result.recommendation, Recommendation::Reject);
    }

    #[test]
    fn all_violations_spans_dimensions() {
        let mut dims = clean_dimensions();
        dims[0] = dims[0]
            .clone()
            .add_violation(Violation::new("a", "acceptance_criteria"));
        dims[3] = dims[3]
            .clone()
            .add_violation(Violation::new("b", "notes.technical"));
        let result = JudgeResult::derive(dims, 2, None);
        assert_eq!(result.all_violations().len(), 2);
        assert_eq!(result.violations_at("notes.technical").len(), 1);
    }

    #[test]
    fn dimension_score_is_clamped() {
        assert_eq!(DimensionScore::new("structure", 0, "").score, MIN_SCORE);
        assert_eq!(DimensionScore::new("structure", 9, "").score, MAX_SCORE);
    }

    // =========================================
    // Parsing tests
    // =========================================

    #[test]
    fn parse_derives_recommendation_locally() {
        let result = parse_judge_response(&judge_json(4, false), 2).unwrap();
        assert_eq!(result.recommendation, Recommendation::Approve);
        assert_eq!(result.overall_score, 4);
        assert_eq!(result.dimensions.len(), 4);
    }

    #[test]
    fn parse_reports_rewrite_for_violations() {
        let result = parse_judge_response(&judge_json(3, true), 2).unwrap();
        assert_eq!(result.recommendation, Recommendation::Rewrite);
        assert_eq!(result.all_violations().len(), 1);
        assert_eq!(result.all_violations()[0].location, "acceptance_criteria");
    }

    #[test]
    fn parse_rejects_below_floor() {
        let result = parse_judge_response(&judge_json(1, false), 2).unwrap();
        assert_eq!(result.recommendation, Recommendation::Reject);
    }

    #[test]
    fn parse_requires_all_four_dimensions() {
        let partial = r#"{"dimensions": [
            {"dimension": "structure", "score": 4, "reasoning": "ok"}
        ]}"#;
        let err = parse_judge_response(partial, 2).unwrap_err();
        assert!(matches!(err, OracleError::Malformed(_)));
        assert!(err.to_string().contains("missing dimension"));
    }

    #[test]
    fn parse_requires_located_violations() {
        let unlocated = judge_json(3, false).replace(
            "\"violations\": []",
            r#""violations": [{"description": "vague"}]"#,
        );
        let err = parse_judge_response(&unlocated, 2).unwrap_err();
        assert!(matches!(err, OracleError::Malformed(_)));
    }

    #[test]
    fn parse_clamps_out_of_range_scores() {
        let wild = judge_json(4, false).replace("\"score\": 5", "\"score\": 99");
        let result = parse_judge_response(&wild, 2).unwrap();
        assert!(result.dimensions.iter().all(|d| d.score <= MAX_SCORE));
    }

    #[test]
    fn parse_forwards_relationship_updates_opaquely() {
        let with_updates = judge_json(4, false)
            .trim_end_matches('}')
            .to_string()
            + r#", "relationshipUpdates": {"links": ["a->b"]}}"#;
        let result = parse_judge_response(&with_updates, 2).unwrap();
        assert_eq!(
            result.relationship_updates.unwrap()["links"][0],
            serde_json::json!("a->b")
        );
    }

    #[test]
    fn parse_accepts_fenced_output() {
        let fenced = format!("```json\n{}\n```", judge_json(4, false));
        assert!(parse_judge_response(&fenced, 2).is_ok());
    }

    // =========================================
    // Oracle round trip
    // =========================================

    #[tokio::test]
    async fn judge_scores_through_the_oracle() {
        let oracle = ReplayOracle::new();
        oracle.enqueue(judge_json(4, false));

        let judge = Judge::new(&oracle, 2);
        let result = judge
            .score("## Notes {#notes}\n- [N-1] x\n", &SupportingFacts::new())
            .await
            .unwrap();
        assert!(result.recommendation.is_approve());

        let transcript = oracle.transcript();
        assert!(transcript[0].prompt.contains("## DIMENSIONS"));
        assert!(transcript[0].prompt.contains("N-1"));
    }

    #[test]
    fn display_lists_dimensions_and_violations() {
        let mut dims = clean_dimensions();
        dims[0] = dims[0]
            .clone()
            .add_violation(Violation::new("misplaced", "notes.technical"));
        let result = JudgeResult::derive(dims, 2, None);
        let display = format!("{}", result);
        assert!(display.contains("judge: rewrite"));
        assert!(display.contains("structure: 4/5"));
        assert!(display.contains("misplaced (at notes.technical)"));
    }
}
