//! Configuration for a Burnish pipeline.
//!
//! Everything is read from a single `burnish.toml`:
//!
//! ```toml
//! [pipeline]
//! retry_bound = 2
//! judge_floor = 2
//! order = ["criteria-auditor", "notes-curator"]
//!
//! [oracle]
//! command = "claude"
//! timeout_secs = 300
//! skip_permissions = true
//!
//! [paths.acceptance_criteria]
//! prefix = "AC"
//!
//! [paths."notes.technical"]
//! prefix = "NOTE"
//!
//! [[advisors]]
//! id = "criteria-auditor"
//! purpose = "make every acceptance criterion independently testable"
//! scope = ["acceptance_criteria"]
//! guidance = "Prefer given/when/then phrasing."
//!
//! [[advisors]]
//! id = "notes-curator"
//! purpose = "keep technical notes accurate and current"
//! scope = ["notes.technical"]
//! ```
//!
//! Loading is lenient (serde defaults everywhere); [`BurnishConfig::validate`]
//! then turns the raw file into typed pipeline inputs and refuses malformed
//! scope tables and unknown advisor identifiers, which are fatal.

use crate::advisor::{AdvisorCatalog, AdvisorSpec};
use crate::document::TargetPath;
use crate::errors::PipelineError;
use crate::patch::{PathRule, PathRules};
use crate::pipeline::{DEFAULT_JUDGE_FLOOR, DEFAULT_RETRY_BOUND, PipelineSettings};
use anyhow::Context as _;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Raw contents of `burnish.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BurnishConfig {
    #[serde(default)]
    pub pipeline: PipelineSection,
    #[serde(default)]
    pub oracle: OracleSection,
    #[serde(default)]
    pub paths: IndexMap<String, PathSection>,
    #[serde(default)]
    pub advisors: Vec<AdvisorSection>,
}

/// `[pipeline]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineSection {
    #[serde(default = "default_retry_bound")]
    pub retry_bound: u32,
    #[serde(default = "default_judge_floor")]
    pub judge_floor: u8,
    /// Explicit advisor ordering; defaults to declaration order.
    #[serde(default)]
    pub order: Option<Vec<String>>,
}

fn default_retry_bound() -> u32 {
    DEFAULT_RETRY_BOUND
}

fn default_judge_floor() -> u8 {
    DEFAULT_JUDGE_FLOOR
}

impl Default for PipelineSection {
    fn default() -> Self {
        Self {
            retry_bound: default_retry_bound(),
            judge_floor: default_judge_floor(),
            order: None,
        }
    }
}

/// `[oracle]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OracleSection {
    #[serde(default = "default_oracle_command")]
    pub command: String,
    #[serde(default = "default_oracle_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_skip_permissions")]
    pub skip_permissions: bool,
}

fn default_oracle_command() -> String {
    "claude".to_string()
}

fn default_oracle_timeout_secs() -> u64 {
    300
}

fn default_skip_permissions() -> bool {
    true
}

impl Default for OracleSection {
    fn default() -> Self {
        Self {
            command: default_oracle_command(),
            timeout_secs: default_oracle_timeout_secs(),
            skip_permissions: default_skip_permissions(),
        }
    }
}

/// One `[paths.<path>]` entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathSection {
    /// Required identifier prefix for entries at this path.
    pub prefix: String,
}

/// One `[[advisors]]` entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdvisorSection {
    pub id: String,
    pub purpose: String,
    pub scope: Vec<String>,
    #[serde(default)]
    pub guidance: String,
}

/// Validated, typed pipeline inputs.
#[derive(Debug, Clone)]
pub struct ValidatedConfig {
    pub settings: PipelineSettings,
    pub oracle: OracleSettings,
    pub rules: PathRules,
    pub catalog: AdvisorCatalog,
    /// Final advisor ordering.
    pub order: Vec<String>,
}

/// Oracle adapter settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OracleSettings {
    pub command: String,
    pub timeout: Duration,
    pub skip_permissions: bool,
}

impl BurnishConfig {
    /// Load and parse a configuration file.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config at {}", path.display()))?;
        Self::from_toml_str(&raw)
            .with_context(|| format!("failed to parse config at {}", path.display()))
    }

    pub fn from_toml_str(raw: &str) -> anyhow::Result<Self> {
        Ok(toml::from_str(raw)?)
    }

    /// Validate the raw file into typed pipeline inputs.
    pub fn validate(&self) -> Result<ValidatedConfig, PipelineError> {
        let mut rules = PathRules::new();
        for (raw_path, section) in &self.paths {
            let path = TargetPath::parse(raw_path).map_err(|e| {
                PipelineError::MalformedScopeTable(format!("invalid path '{}': {}", raw_path, e))
            })?;
            if section.prefix.trim().is_empty() {
                return Err(PipelineError::MalformedScopeTable(format!(
                    "path '{}' has an empty identifier prefix",
                    raw_path
                )));
            }
            rules.insert(
                path,
                PathRule {
                    prefix: section.prefix.clone(),
                },
            );
        }

        let mut catalog = AdvisorCatalog::new();
        for advisor in &self.advisors {
            if advisor.scope.is_empty() {
                return Err(PipelineError::MalformedScopeTable(format!(
                    "advisor '{}' declares an empty scope",
                    advisor.id
                )));
            }
            let mut scope = Vec::with_capacity(advisor.scope.len());
            for raw_path in &advisor.scope {
                let path = TargetPath::parse(raw_path).map_err(|e| {
                    PipelineError::MalformedScopeTable(format!(
                        "advisor '{}' scope has invalid path '{}': {}",
                        advisor.id, raw_path, e
                    ))
                })?;
                if !rules.contains_key(&path) {
                    return Err(PipelineError::MalformedScopeTable(format!(
                        "advisor '{}' scope references undeclared path '{}'",
                        advisor.id, raw_path
                    )));
                }
                scope.push(path);
            }
            catalog.insert(
                AdvisorSpec::new(advisor.id.as_str(), advisor.purpose.as_str())
                    .with_scope(scope)
                    .with_guidance(advisor.guidance.as_str()),
            )?;
        }

        let order = match &self.pipeline.order {
            Some(order) => {
                for advisor_id in order {
                    catalog.get(advisor_id)?;
                }
                order.clone()
            }
            None => catalog.ids(),
        };

        Ok(ValidatedConfig {
            settings: PipelineSettings {
                retry_bound: self.pipeline.retry_bound,
                judge_floor: self.pipeline.judge_floor,
            },
            oracle: OracleSettings {
                command: self.oracle.command.clone(),
                timeout: Duration::from_secs(self.oracle.timeout_secs),
                skip_permissions: self.oracle.skip_permissions,
            },
            rules,
            catalog,
            order,
        })
    }
}
