//! The reasoning oracle boundary.
//!
//! Everything the pipeline asks of the external reasoning service goes
//! through the [`Oracle`] trait: advisor invocation, judging, rewriting and
//! evaluating. The oracle returns free text; every caller decodes and
//! validates it before use. Oracle calls are the pipeline's only suspension
//! points.

mod claude;
mod replay;

pub use claude::ClaudeCliOracle;
pub use replay::ReplayOracle;

use crate::errors::OracleError;
use async_trait::async_trait;

/// One prompt for the reasoning service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OracleRequest {
    /// Role and output-contract instructions.
    pub system: String,
    /// The task, document excerpt and supporting context.
    pub prompt: String,
}

impl OracleRequest {
    pub fn new(system: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            system: system.into(),
            prompt: prompt.into(),
        }
    }

    /// The combined text sent over a single-channel transport.
    pub fn rendered(&self) -> String {
        if self.system.is_empty() {
            return self.prompt.clone();
        }
        format!("{}\n\n{}", self.system, self.prompt)
    }
}

/// An opaque text-completion service.
#[async_trait]
pub trait Oracle: Send + Sync {
    async fn complete(&self, request: OracleRequest) -> Result<String, OracleError>;
}
