//! Patch wire types and decoding.
//!
//! Advisors return batches of proposed edits over a fixed wire shape:
//!
//! ```json
//! {
//!   "patches": [
//!     {
//!       "op": "replace",
//!       "path": "acceptance_criteria",
//!       "match": {"id": "AC-2"},
//!       "item": {"id": "AC-2", "text": "Given X, when Y, then Z."},
//!       "metadata": {"advisorId": "criteria-auditor", "reasoning": "testable wording"}
//!     }
//!   ]
//! }
//! ```
//!
//! Required and forbidden fields per `op`:
//!
//! | op      | `match`   | `item`    |
//! |---------|-----------|-----------|
//! | add     | forbidden | required  |
//! | replace | required  | required  |
//! | remove  | required  | forbidden |
//!
//! The oracle is untrusted: decoding is liberal (JSON is dug out of code
//! fences and surrounding prose), but nothing downstream touches a patch
//! until [`validator::validate`] has turned it into a closed
//! [`validator::PatchAction`] variant.

pub mod applicator;
pub mod validator;

pub use applicator::apply_batch;
pub use validator::{
    PatchAction, PathRule, PathRules, ValidPatch, ValidationContext, validate, validate_batch,
};

use crate::document::SectionEntry;
use crate::errors::OracleError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Maximum length of `metadata.reasoning`, in characters.
pub const MAX_REASONING_CHARS: usize = 240;

/// The three patch operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PatchOp {
    Add,
    Replace,
    Remove,
}

impl fmt::Display for PatchOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Add => "add",
            Self::Replace => "replace",
            Self::Remove => "remove",
        };
        write!(f, "{}", s)
    }
}

/// Selector locating the element a `replace`/`remove` acts on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchSelector {
    pub id: String,
}

/// New content carried by `add`/`replace`.
///
/// Unknown fields are preserved and travel through application unchanged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatchItem {
    pub id: String,
    pub text: String,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl PatchItem {
    pub fn new(id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            text: text.into(),
            extra: serde_json::Map::new(),
        }
    }

    /// Convert into a section entry, normalizing the text onto one line.
    pub fn into_entry(self) -> SectionEntry {
        let mut entry = SectionEntry::new(self.id, self.text);
        entry.extra = self.extra;
        entry
    }
}

/// Provenance attached to every patch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PatchMetadata {
    pub advisor_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<String>,
}

impl PatchMetadata {
    pub fn new(advisor_id: impl Into<String>) -> Self {
        Self {
            advisor_id: advisor_id.into(),
            reasoning: None,
        }
    }

    pub fn with_reasoning(mut self, reasoning: impl Into<String>) -> Self {
        self.reasoning = Some(reasoning.into());
        self
    }
}

/// One proposed edit, as it arrives on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Patch {
    pub op: PatchOp,
    pub path: String,
    #[serde(
        default,
        rename = "match",
        skip_serializing_if = "Option::is_none"
    )]
    pub matcher: Option<MatchSelector>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub item: Option<PatchItem>,
    pub metadata: PatchMetadata,
}

/// A batch of patches from one advisor invocation.
///
/// An empty batch is valid and means the advisor abstained.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct PatchBatch {
    #[serde(default)]
    pub patches: Vec<Patch>,
}

impl PatchBatch {
    pub fn is_empty(&self) -> bool {
        self.patches.is_empty()
    }

    pub fn len(&self) -> usize {
        self.patches.len()
    }
}

/// Decode a patch batch out of raw oracle output.
///
/// Accepts the batch object directly or a bare patch array; anything else
/// is a decoding failure.
pub fn parse_patch_batch(response: &str) -> Result<PatchBatch, OracleError> {
    let json = extract_json(response)
        .ok_or_else(|| OracleError::Malformed("no JSON found in advisor output".to_string()))?;

    let value: serde_json::Value = serde_json::from_str(&json)
        .map_err(|e| OracleError::Malformed(format!("invalid JSON in advisor output: {}", e)))?;

    let batch = if value.is_array() {
        serde_json::json!({ "patches": value })
    } else {
        value
    };

    serde_json::from_value(batch)
        .map_err(|e| OracleError::Malformed(format!("advisor output is not a patch batch: {}", e)))
}

/// Dig a JSON object or array out of oracle chatter.
///
/// Tries a ```json fence first, then any fence, then the first balanced
/// object or array in the raw text.
pub fn extract_json(response: &str) -> Option<String> {
    if let Some(fenced) = fenced_block(response, "```json") {
        return Some(fenced);
    }
    if let Some(fenced) = fenced_block(response, "```") {
        let trimmed = fenced.trim_start_matches(|c: char| c.is_ascii_alphanumeric());
        let trimmed = trimmed.trim();
        if trimmed.starts_with('{') || trimmed.starts_with('[') {
            return Some(trimmed.to_string());
        }
    }
    balanced_json(response)
}

fn fenced_block(response: &str, fence: &str) -> Option<String> {
    let start = response.find(fence)? + fence.len();
    let rest = &response[start..];
    let end = rest.find("```")?;
    let block = rest[..end].trim();
    if block.is_empty() {
        return None;
    }
    Some(block.to_string())
}

fn balanced_json(response: &str) -> Option<String> {
    let start = response.find(['{', '['])?;
    let bytes = response.as_bytes();
    let (open, close) = match bytes[start] {
        b'{' => (b'{', b'}'),
        _ => (b'[', b']'),
    };
    let mut depth = 0usize;
    for (offset, &byte) in bytes[start..].iter().enumerate() {
        if byte == open {
            depth += 1;
        } else if byte == close {
            depth -= 1;
            if depth == 0 {
                return Some(response[start..start + offset + 1].to_string());
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_patch_json() -> &'static str {
        r#"{
            "patches": [
                {
                    "op": "add",
                    "path": "acceptance_criteria",
                    "item": {"id": "AC-3", "text": "Given a retry, the input is unchanged."},
                    "metadata": {"advisorId": "criteria-auditor", "reasoning": "cover retries"}
                }
            ]
        }"#
    }

    // =========================================
    // Wire shape tests
    // =========================================

    #[test]
    fn patch_deserializes_wire_fields() {
        let batch: PatchBatch = serde_json::from_str(sample_patch_json()).unwrap();
        assert_eq!(batch.len(), 1);

        let patch = &batch.patches[0];
        assert_eq!(patch.op, PatchOp::Add);
        assert_eq!(patch.path, "acceptance_criteria");
        assert!(patch.matcher.is_none());
        assert_eq!(patch.item.as_ref().unwrap().id, "AC-3");
        assert_eq!(patch.metadata.advisor_id, "criteria-auditor");
        assert_eq!(patch.metadata.reasoning.as_deref(), Some("cover retries"));
    }

    #[test]
    fn patch_serializes_match_and_camel_case_metadata() {
        let patch = Patch {
            op: PatchOp::Remove,
            path: "notes.technical".into(),
            matcher: Some(MatchSelector {
                id: "NOTE-1".into(),
            }),
            item: None,
            metadata: PatchMetadata::new("notes-pruner"),
        };
        let json = serde_json::to_string(&patch).unwrap();
        assert!(json.contains("\"op\":\"remove\""));
        assert!(json.contains("\"match\":{\"id\":\"NOTE-1\"}"));
        assert!(json.contains("\"advisorId\":\"notes-pruner\""));
        assert!(!json.contains("\"item\""));
        assert!(!json.contains("\"reasoning\""));
    }

    #[test]
    fn patch_item_preserves_unknown_fields() {
        let json = r#"{"id": "AC-1", "text": "x", "confidence": 0.9}"#;
        let item: PatchItem = serde_json::from_str(json).unwrap();
        assert_eq!(item.extra.get("confidence").unwrap().as_f64(), Some(0.9));

        let back = serde_json::to_string(&item).unwrap();
        assert!(back.contains("\"confidence\":0.9"));
    }

    #[test]
    fn empty_batch_is_valid_and_abstains() {
        let batch: PatchBatch = serde_json::from_str(r#"{"patches": []}"#).unwrap();
        assert!(batch.is_empty());

        let defaulted: PatchBatch = serde_json::from_str("{}").unwrap();
        assert!(defaulted.is_empty());
    }

    // =========================================
    // Oracle output decoding tests
    // =========================================

    #[test]
    fn parse_patch_batch_from_fenced_response() {
        let response = format!(
            "Here is my proposal:\n```json\n{}\n```\nDone.",
            sample_patch_json()
        );
        let batch = parse_patch_batch(&response).unwrap();
        assert_eq!(batch.len(), 1);
    }

    #[test]
    fn parse_patch_batch_from_raw_object_with_prose() {
        let response = format!("Sure! {} That is all.", sample_patch_json());
        let batch = parse_patch_batch(&response).unwrap();
        assert_eq!(batch.len(), 1);
    }

    #[test]
    fn parse_patch_batch_accepts_bare_array() {
        let response = r#"[{"op": "remove", "path": "notes", "match": {"id": "N-1"},
            "metadata": {"advisorId": "a"}}]"#;
        let batch = parse_patch_batch(response).unwrap();
        assert_eq!(batch.len(), 1);
        assert_eq!(batch.patches[0].op, PatchOp::Remove);
    }

    #[test]
    fn parse_patch_batch_rejects_prose_only() {
        let err = parse_patch_batch("I could not produce any edits today.").unwrap_err();
        assert!(matches!(err, OracleError::Malformed(_)));
    }

    #[test]
    fn parse_patch_batch_rejects_wrong_shape() {
        let err = parse_patch_batch(r#"{"patches": [{"op": "explode"}]}"#).unwrap_err();
        assert!(matches!(err, OracleError::Malformed(_)));
    }

    #[test]
    fn extract_json_prefers_json_fence() {
        let response = "intro {\"decoy\": true}\n```json\n{\"real\": 1}\n```";
        assert_eq!(extract_json(response).unwrap(), "{\"real\": 1}");
    }

    #[test]
    fn extract_json_handles_generic_fence() {
        let response = "```\n{\"a\": [1, 2]}\n```";
        assert_eq!(extract_json(response).unwrap(), "{\"a\": [1, 2]}");
    }

    #[test]
    fn extract_json_balances_nested_braces() {
        let response = "prefix {\"a\": {\"b\": 2}} suffix }";
        assert_eq!(extract_json(response).unwrap(), "{\"a\": {\"b\": 2}}");
    }

    #[test]
    fn extract_json_returns_none_without_json() {
        assert!(extract_json("nothing here").is_none());
    }
}
