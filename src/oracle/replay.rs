use crate::errors::OracleError;
use crate::oracle::{Oracle, OracleRequest};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::Mutex;

/// Deterministic oracle backed by a queue of canned completions.
///
/// Every request is recorded, so a whole pipeline run can be replayed and
/// inspected. Draining the queue is a transport error, which the pipeline
/// handles like any other oracle outage.
#[derive(Default)]
pub struct ReplayOracle {
    responses: Mutex<VecDeque<Result<String, OracleError>>>,
    transcript: Mutex<Vec<OracleRequest>>,
}

impl ReplayOracle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a canned completion.
    pub fn enqueue(&self, response: impl Into<String>) {
        self.responses_mut().push_back(Ok(response.into()));
    }

    /// Queue a failure for the next call.
    pub fn enqueue_error(&self, error: OracleError) {
        self.responses_mut().push_back(Err(error));
    }

    /// Requests served so far, in order.
    pub fn transcript(&self) -> Vec<OracleRequest> {
        match self.transcript.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn remaining(&self) -> usize {
        self.responses_mut().len()
    }

    fn responses_mut(&self) -> std::sync::MutexGuard<'_, VecDeque<Result<String, OracleError>>> {
        match self.responses.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

#[async_trait]
impl Oracle for ReplayOracle {
    async fn complete(&self, request: OracleRequest) -> Result<String, OracleError> {
        match self.transcript.lock() {
            Ok(mut guard) => guard.push(request),
            Err(poisoned) => poisoned.into_inner().push(request),
        }
        self.responses_mut()
            .pop_front()
            .unwrap_or_else(|| Err(OracleError::Transport("replay queue exhausted".to_string())))
    }
}
