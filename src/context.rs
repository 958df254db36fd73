//! Prompt-context assembly.
//!
//! Every oracle call receives an explicit, immutable [`Context`] value built
//! fresh from a document snapshot. There is no ambient context object;
//! advisors and the judge see exactly what the builder put in front of them,
//! and nothing here has side effects.

use crate::advisor::AdvisorSpec;
use crate::document::{StoryDocument, StructuredView};
use serde::{Deserialize, Serialize};

/// One known fact about the product or its environment.
///
/// Facts bound what advisors and the rewriter may claim; content without
/// backing in the facts is treated as invention.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fact {
    pub label: String,
    pub body: String,
}

/// Read-only store of supporting facts.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SupportingFacts {
    #[serde(default)]
    pub facts: Vec<Fact>,
}

impl SupportingFacts {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_fact(mut self, label: impl Into<String>, body: impl Into<String>) -> Self {
        self.facts.push(Fact {
            label: label.into(),
            body: body.into(),
        });
        self
    }

    pub fn is_empty(&self) -> bool {
        self.facts.is_empty()
    }

    /// Parse a facts file.
    ///
    /// ```toml
    /// [[facts]]
    /// label = "billing-service"
    /// body = "Invoices are issued by the billing service, never by hand."
    /// ```
    pub fn from_toml_str(input: &str) -> anyhow::Result<Self> {
        Ok(toml::from_str(input)?)
    }

    /// Render the digest included in prompts.
    pub fn digest(&self) -> String {
        if self.facts.is_empty() {
            return "(no supporting facts supplied)".to_string();
        }
        self.facts
            .iter()
            .map(|f| format!("- {}: {}", f.label, f.body))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Immutable prompt context for one oracle call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Context {
    /// The document text the callee may look at.
    pub excerpt: String,
    /// Rendered supporting facts.
    pub facts: String,
    /// Compact summary of earlier iterations, when any exist.
    pub prior_summary: Option<String>,
}

/// Pure functions turning a document snapshot into a [`Context`].
pub struct ContextBuilder;

impl ContextBuilder {
    /// Context for one advisor: only the sections inside its scope, so the
    /// prompt stays bounded regardless of document size.
    pub fn for_advisor(
        document: &StoryDocument,
        spec: &AdvisorSpec,
        facts: &SupportingFacts,
    ) -> Context {
        Context {
            excerpt: scoped_excerpt(document.view(), spec),
            facts: facts.digest(),
            prior_summary: prior_summary(document),
        }
    }

    /// Context for the judge: the full candidate text.
    pub fn for_judge(content: &str, facts: &SupportingFacts) -> Context {
        Context {
            excerpt: content.to_string(),
            facts: facts.digest(),
            prior_summary: None,
        }
    }
}

fn scoped_excerpt(view: &StructuredView, spec: &AdvisorSpec) -> String {
    let mut scoped = StructuredView::default();
    let mut missing = Vec::new();
    for path in &spec.scope {
        match view.section(path) {
            Some(section) => {
                scoped.sections.insert(path.clone(), section.clone());
            }
            None => missing.push(path),
        }
    }

    let mut excerpt = scoped.render();
    for path in missing {
        if !excerpt.is_empty() {
            excerpt.push('\n');
        }
        excerpt.push_str(&format!(
            "## {} {{#{}}}\n(section not present yet)\n",
            path.default_title(),
            path
        ));
    }
    if excerpt.is_empty() {
        excerpt.push_str("(no sections in scope)\n");
    }
    excerpt
}

fn prior_summary(document: &StoryDocument) -> Option<String> {
    let history = document.iteration_history();
    if history.is_empty() {
        return None;
    }
    let lines: Vec<String> = history
        .iter()
        .map(|result| {
            if result.is_noop() {
                format!("- {}: no changes", result.advisor_id)
            } else {
                format!(
                    "- {}: {} change(s){}",
                    result.advisor_id,
                    result.changes_applied.len(),
                    if result.rewrite_applied {
                        ", rewritten after judging"
                    } else {
                        ""
                    }
                )
            }
        })
        .collect();
    Some(lines.join("\n"))
}
