//! Advisor definitions and lookup.
//!
//! An advisor is a single-purpose reviewer with a declared identity, a
//! purpose statement, and a fixed scope allow-list of document paths it may
//! edit. Advisors carry no state of their own; everything they need arrives
//! with the invocation.
//!
//! ## Example
//!
//! ```
//! use burnish::advisor::{AdvisorCatalog, AdvisorSpec};
//! use burnish::document::TargetPath;
//!
//! let spec = AdvisorSpec::new("criteria-auditor", "tighten acceptance criteria")
//!     .with_scope(vec![TargetPath::parse("acceptance_criteria").unwrap()]);
//!
//! let mut catalog = AdvisorCatalog::new();
//! catalog.insert(spec).unwrap();
//!
//! assert!(catalog.get("criteria-auditor").is_ok());
//! assert!(catalog.get("ghost").is_err());
//! ```

mod runner;

pub use runner::{AdvisorRunner, build_advisor_prompt, build_advisor_system};

use crate::document::TargetPath;
use crate::errors::PipelineError;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// One advisor's declared identity, purpose and scope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdvisorSpec {
    /// Stable identifier, e.g. `criteria-auditor`.
    pub id: String,
    /// What this advisor improves; also drives the evaluator's relevance
    /// check.
    pub purpose: String,
    /// Paths this advisor may edit. Everything else is out of bounds.
    pub scope: Vec<TargetPath>,
    /// Extra prompt guidance, free-form.
    #[serde(default)]
    pub guidance: String,
}

impl AdvisorSpec {
    pub fn new(id: impl Into<String>, purpose: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            purpose: purpose.into(),
            scope: Vec::new(),
            guidance: String::new(),
        }
    }

    pub fn with_scope(mut self, scope: Vec<TargetPath>) -> Self {
        self.scope = scope;
        self
    }

    pub fn with_guidance(mut self, guidance: impl Into<String>) -> Self {
        self.guidance = guidance.into();
        self
    }

    pub fn in_scope(&self, path: &TargetPath) -> bool {
        self.scope.contains(path)
    }
}

/// Ordered registry of advisors, keyed by identifier.
#[derive(Debug, Clone, Default)]
pub struct AdvisorCatalog {
    advisors: IndexMap<String, AdvisorSpec>,
}

impl AdvisorCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an advisor. Duplicate identifiers are a configuration error.
    pub fn insert(&mut self, spec: AdvisorSpec) -> Result<(), PipelineError> {
        if self.advisors.contains_key(&spec.id) {
            return Err(PipelineError::MalformedScopeTable(format!(
                "duplicate advisor id '{}'",
                spec.id
            )));
        }
        self.advisors.insert(spec.id.clone(), spec);
        Ok(())
    }

    /// Look up an advisor; unknown identifiers are fatal.
    pub fn get(&self, id: &str) -> Result<&AdvisorSpec, PipelineError> {
        self.advisors
            .get(id)
            .ok_or_else(|| PipelineError::UnknownAdvisor(id.to_string()))
    }

    /// Advisor identifiers in registration order.
    pub fn ids(&self) -> Vec<String> {
        self.advisors.keys().cloned().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &AdvisorSpec> {
        self.advisors.values()
    }

    pub fn len(&self) -> usize {
        self.advisors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.advisors.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn path(raw: &str) -> TargetPath {
        TargetPath::parse(raw).unwrap()
    }

    #[test]
    fn spec_builder_sets_scope_and_guidance() {
        let spec = AdvisorSpec::new("notes-curator", "keep notes current")
            .with_scope(vec![path("notes.technical")])
            .with_guidance("Prefer removing stale notes over rewording them.");

        assert!(spec.in_scope(&path("notes.technical")));
        assert!(!spec.in_scope(&path("acceptance_criteria")));
        assert!(spec.guidance.contains("stale"));
    }

    #[test]
    fn catalog_preserves_registration_order() {
        let mut catalog = AdvisorCatalog::new();
        catalog.insert(AdvisorSpec::new("b", "second")).unwrap();
        catalog.insert(AdvisorSpec::new("a", "first")).unwrap();
        assert_eq!(catalog.ids(), ["b", "a"]);
    }

    #[test]
    fn catalog_rejects_duplicate_ids() {
        let mut catalog = AdvisorCatalog::new();
        catalog.insert(AdvisorSpec::new("a", "one")).unwrap();
        let err = catalog.insert(AdvisorSpec::new("a", "two")).unwrap_err();
        assert!(matches!(err, PipelineError::MalformedScopeTable(_)));
        assert_eq!(catalog.len(), 1);
    }

    #[test]
    fn unknown_advisor_lookup_is_fatal() {
        let catalog = AdvisorCatalog::new();
        let err = catalog.get("ghost").unwrap_err();
        assert!(matches!(err, PipelineError::UnknownAdvisor(ref id) if id == "ghost"));
    }
}
