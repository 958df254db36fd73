//! Advisor invocation.
//!
//! The runner puts one advisor in front of the oracle: it assembles the
//! prompt from the advisor's spec and the prepared context, performs the
//! call, and decodes the returned patch batch. The prompt instructs the
//! advisor to gate itself on scope: when its topic does not apply to the
//! material in front of it, the correct answer is an empty batch, never
//! invented content.

use crate::advisor::AdvisorSpec;
use crate::context::Context;
use crate::errors::OracleError;
use crate::oracle::{Oracle, OracleRequest};
use crate::patch::{PatchBatch, PathRules, parse_patch_batch};
use tracing::debug;

/// Invokes a single advisor against a document snapshot.
pub struct AdvisorRunner<'a> {
    oracle: &'a dyn Oracle,
}

impl<'a> AdvisorRunner<'a> {
    pub fn new(oracle: &'a dyn Oracle) -> Self {
        Self { oracle }
    }

    /// Run one advisor and decode its batch.
    ///
    /// Returns the decoded batch, which may be empty (the advisor
    /// abstained). Transport and decoding failures surface as
    /// [`OracleError`] and count toward the caller's retry budget.
    pub async fn run(
        &self,
        spec: &AdvisorSpec,
        context: &Context,
        rules: &PathRules,
    ) -> Result<PatchBatch, OracleError> {
        let request = OracleRequest::new(
            build_advisor_system(spec),
            build_advisor_prompt(spec, context, rules),
        );
        let output = self.oracle.complete(request).await?;
        let batch = parse_patch_batch(&output)?;
        debug!(
            advisor = %spec.id,
            patches = batch.len(),
            "advisor batch decoded"
        );
        Ok(batch)
    }
}

/// System instructions for one advisor.
pub fn build_advisor_system(spec: &AdvisorSpec) -> String {
    format!(
        "You are a story-document advisor with a single purpose: {}.\n\
You propose small, scoped edits as patches and nothing else.",
        spec.purpose
    )
}

/// Task prompt for one advisor invocation.
pub fn build_advisor_prompt(spec: &AdvisorSpec, context: &Context, rules: &PathRules) -> String {
    let scope_lines: Vec<String> = spec
        .scope
        .iter()
        .map(|path| match rules.get(path) {
            Some(rule) => format!("- {} (entry ids: {}-*)", path, rule.prefix),
            None => format!("- {}", path),
        })
        .collect();

    let guidance_section = if spec.guidance.is_empty() {
        String::new()
    } else {
        format!("\n## GUIDANCE\n{}\n", spec.guidance)
    };

    let prior_section = match &context.prior_summary {
        Some(summary) => format!("\n## PRIOR ITERATIONS\n{}\n", summary),
        None => String::new(),
    };

    format!(
        r#"## SCOPE
You may only edit these sections:
{scope}
{guidance}
## DOCUMENT EXCERPT
{excerpt}

## SUPPORTING FACTS
{facts}
{prior}
## OUTPUT
Respond with ONLY a JSON object of this exact shape (no markdown, no prose):

{{
  "patches": [
    {{
      "op": "add|replace|remove",
      "path": "<one of your scoped sections>",
      "match": {{"id": "<existing entry id, replace/remove only>"}},
      "item": {{"id": "<entry id with the section's prefix>", "text": "<single line>"}},
      "metadata": {{"advisorId": "{advisor_id}", "reasoning": "<max 240 chars, optional>"}}
    }}
  ]
}}

Rules:
- "add" carries "item" and no "match"; "replace" carries both; "remove" carries "match" and no "item".
- Only claim things backed by the supporting facts.
- If your purpose does not apply to this material, respond with {{"patches": []}}."#,
        scope = scope_lines.join("\n"),
        guidance = guidance_section,
        excerpt = context.excerpt,
        facts = context.facts,
        prior = prior_section,
        advisor_id = spec.id,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::ContextBuilder;
    use crate::context::SupportingFacts;
    use crate::document::{StoryDocument, TargetPath};
    use crate::oracle::ReplayOracle;
    use crate::patch::PathRule;

    fn path(raw: &str) -> TargetPath {
        TargetPath::parse(raw).unwrap()
    }

    fn fixture() -> (StoryDocument, AdvisorSpec, PathRules) {
        let doc = StoryDocument::from_content(
            "## Acceptance Criteria {#acceptance_criteria}\n- [AC-1] First.\n",
        )
        .unwrap();
        let spec = AdvisorSpec::new("criteria-auditor", "tighten acceptance criteria")
            .with_scope(vec![path("acceptance_criteria")]);
        let mut rules = PathRules::new();
        rules.insert(
            path("acceptance_criteria"),
            PathRule {
                prefix: "AC".into(),
            },
        );
        (doc, spec, rules)
    }

    #[test]
    fn prompt_names_scope_with_prefixes() {
        let (doc, spec, rules) = fixture();
        let context = ContextBuilder::for_advisor(&doc, &spec, &SupportingFacts::new());
        let prompt = build_advisor_prompt(&spec, &context, &rules);

        assert!(prompt.contains("- acceptance_criteria (entry ids: AC-*)"));
        assert!(prompt.contains("\"advisorId\": \"criteria-auditor\""));
        assert!(prompt.contains("{\"patches\": []}"));
    }

    #[test]
    fn system_prompt_states_the_purpose() {
        let (_, spec, _) = fixture();
        let system = build_advisor_system(&spec);
        assert!(system.contains("tighten acceptance criteria"));
    }

    #[tokio::test]
    async fn run_decodes_a_batch_from_the_oracle() {
        let (doc, spec, rules) = fixture();
        let oracle = ReplayOracle::new();
        oracle.enqueue(
            r#"{"patches": [{"op": "add", "path": "acceptance_criteria",
                "item": {"id": "AC-2", "text": "Second."},
                "metadata": {"advisorId": "criteria-auditor"}}]}"#,
        );

        let context = ContextBuilder::for_advisor(&doc, &spec, &SupportingFacts::new());
        let runner = AdvisorRunner::new(&oracle);
        let batch = runner.run(&spec, &context, &rules).await.unwrap();
        assert_eq!(batch.len(), 1);

        let transcript = oracle.transcript();
        assert_eq!(transcript.len(), 1);
        assert!(transcript[0].prompt.contains("AC-1"));
    }

    #[tokio::test]
    async fn run_surfaces_undecodable_output() {
        let (doc, spec, rules) = fixture();
        let oracle = ReplayOracle::new();
        oracle.enqueue("I would rather write an essay.");

        let context = ContextBuilder::for_advisor(&doc, &spec, &SupportingFacts::new());
        let runner = AdvisorRunner::new(&oracle);
        let err = runner.run(&spec, &context, &rules).await.unwrap_err();
        assert!(matches!(err, OracleError::Malformed(_)));
    }
}
