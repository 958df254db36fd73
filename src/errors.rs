//! Typed error hierarchy for the Burnish pipeline.
//!
//! Four groups cover the four failure domains:
//! - `DocumentError` — story document construction failures (fatal)
//! - `PatchRejection` — patch-level validation failures (non-fatal, recorded)
//! - `OracleError` — transport and decoding failures talking to the oracle
//! - `PipelineError` — configuration and construction errors that propagate
//!   to the caller
//!
//! `FailureReason` is the terminal reason recorded against an advisor that
//! exhausted its attempts.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors constructing a story document.
#[derive(Debug, Error)]
pub enum DocumentError {
    #[error("story content is empty or whitespace-only")]
    EmptyContent,
}

/// A patch that failed validation or conflicted during application.
///
/// Rejections are recorded against the iteration that produced them and
/// discard the whole batch; they never propagate past the orchestrator.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PatchRejection {
    #[error("target path '{path}' is outside the scope of advisor '{advisor}'")]
    ScopeViolation { advisor: String, path: String },

    #[error("malformed '{op}' patch: {detail}")]
    MalformedPatch { op: String, detail: String },

    #[error("selector '{id}' matched {count} element(s) at '{path}'")]
    UnresolvedMatch {
        path: String,
        id: String,
        count: usize,
    },

    #[error("identifier '{id}' does not carry the '{prefix}-' prefix required at '{path}'")]
    IdentifierViolation {
        path: String,
        id: String,
        prefix: String,
    },

    #[error("patch metadata names advisor '{claimed}' but the batch came from '{actual}'")]
    IdentityMismatch { claimed: String, actual: String },

    #[error("identifier '{id}' already exists at '{path}'")]
    DuplicateIdentifier { path: String, id: String },
}

/// Errors calling the external reasoning oracle.
///
/// All variants count toward the per-advisor retry bound.
#[derive(Debug, Clone, Error)]
pub enum OracleError {
    #[error("oracle transport failed: {0}")]
    Transport(String),

    #[error("oracle call timed out after {seconds}s")]
    Timeout { seconds: u64 },

    #[error("oracle returned output that could not be decoded: {0}")]
    Malformed(String),
}

/// Terminal failure reason recorded when an advisor exhausts its attempts.
#[derive(Debug, Clone, PartialEq, Error, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum FailureReason {
    #[error("oracle transport failed: {detail}")]
    OracleTransport { detail: String },

    #[error("rewrite output could not be accepted: {detail}")]
    RewriteFailure { detail: String },

    #[error("judge rejected the revision: overall score {overall} below floor {floor}")]
    JudgeReject { overall: u8, floor: u8 },

    #[error("evaluation gate failed: {detail}")]
    EvaluationFailed { detail: String },
}

/// Fatal errors that propagate to the caller.
///
/// Everything else is recovered locally and recorded in the document's
/// iteration history.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Document(#[from] DocumentError),

    #[error("unknown advisor '{0}' in pipeline ordering")]
    UnknownAdvisor(String),

    #[error("malformed scope table: {0}")]
    MalformedScopeTable(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}
