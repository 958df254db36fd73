//! Section-addressable representation of a story document.
//!
//! A story document in canonical form is an optional free-text preamble
//! followed by sections. Each section carries a heading with a stable path
//! anchor and a list of identified entries:
//!
//! ```text
//! As a reviewer I want deterministic edits.
//!
//! ## Acceptance Criteria {#acceptance_criteria}
//! - [AC-1] Given a draft, applying no patches leaves it unchanged.
//! - [AC-2] Every applied edit is attributable to one advisor.
//!
//! ## Technical Notes {#notes.technical}
//! - [NOTE-1] Patches are applied strictly in advisor order.
//! ```
//!
//! [`StructuredView::parse`] reads this form back (best effort on arbitrary
//! input), and [`StructuredView::render`] produces it. Rendering a parsed
//! canonical document reproduces it exactly, which is what keeps the
//! structured view and the flat content in lockstep.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A dotted, segmented address of one document section.
///
/// Segments are limited to `[a-z0-9_]` and joined with `.`, e.g.
/// `acceptance_criteria` or `notes.technical`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TargetPath(String);

impl TargetPath {
    /// Parse a raw path, validating every segment.
    pub fn parse(raw: &str) -> Result<Self, String> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err("path is empty".to_string());
        }
        for segment in raw.split('.') {
            if segment.is_empty() {
                return Err(format!("path '{}' has an empty segment", raw));
            }
            if !segment
                .chars()
                .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
            {
                return Err(format!(
                    "path segment '{}' contains characters outside [a-z0-9_]",
                    segment
                ));
            }
        }
        Ok(Self(raw.to_string()))
    }

    /// The raw dotted form.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Human-readable fallback title, used when a patch creates a section
    /// that does not exist yet.
    ///
    /// # Examples
    ///
    /// ```
    /// use burnish::document::TargetPath;
    ///
    /// let path = TargetPath::parse("notes.technical").unwrap();
    /// assert_eq!(path.default_title(), "Notes Technical");
    /// ```
    pub fn default_title(&self) -> String {
        self.0
            .split(['.', '_'])
            .filter(|w| !w.is_empty())
            .map(|w| {
                let mut chars = w.chars();
                match chars.next() {
                    Some(first) => first.to_ascii_uppercase().to_string() + chars.as_str(),
                    None => String::new(),
                }
            })
            .collect::<Vec<_>>()
            .join(" ")
    }
}

impl TryFrom<String> for TargetPath {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<TargetPath> for String {
    fn from(path: TargetPath) -> String {
        path.0
    }
}

impl std::str::FromStr for TargetPath {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for TargetPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One identified element of a section.
///
/// Unknown fields arriving on the wire are preserved in `extra` and carried
/// through application unchanged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SectionEntry {
    /// Stable identifier, e.g. `AC-3`.
    pub id: String,
    /// Single-line entry text.
    pub text: String,
    /// Additional wire fields, forwarded as-is.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl SectionEntry {
    /// Create an entry, collapsing the text onto a single normalized line.
    pub fn new(id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            text: normalize_line(&text.into()),
            extra: serde_json::Map::new(),
        }
    }
}

fn normalize_line(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// An ordered collection of entries under one heading.
///
/// A single-valued note field is a collection holding one entry; the
/// add/replace/remove semantics are uniform across all paths.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Section {
    pub title: String,
    #[serde(default)]
    pub entries: Vec<SectionEntry>,
}

impl Section {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            entries: Vec::new(),
        }
    }

    /// Index of the entry with the given id, if present.
    pub fn position_of(&self, id: &str) -> Option<usize> {
        self.entries.iter().position(|e| e.id == id)
    }

    pub fn contains_id(&self, id: &str) -> bool {
        self.position_of(id).is_some()
    }
}

/// The parsed, section-addressable form of a story document.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct StructuredView {
    /// Free text preceding the first section heading.
    #[serde(default)]
    pub preamble: String,
    /// Sections in document order.
    #[serde(default)]
    pub sections: IndexMap<TargetPath, Section>,
}

impl StructuredView {
    /// Parse text into a structured view.
    ///
    /// Canonical documents round-trip exactly through [`render`]. Arbitrary
    /// input is handled best-effort: everything before the first recognized
    /// heading becomes the preamble, and stray lines inside a section are
    /// folded onto the previous entry.
    ///
    /// [`render`]: StructuredView::render
    pub fn parse(text: &str) -> Self {
        let mut view = StructuredView::default();
        let mut preamble_lines: Vec<&str> = Vec::new();
        let mut current: Option<TargetPath> = None;

        for line in text.lines() {
            if let Some((title, path)) = parse_heading(line) {
                view.sections
                    .entry(path.clone())
                    .or_insert_with(|| Section::new(title));
                current = Some(path);
                continue;
            }

            match &current {
                None => preamble_lines.push(line),
                Some(path) => {
                    let Some(section) = view.sections.get_mut(path) else {
                        continue;
                    };
                    if let Some(entry) = parse_entry(line) {
                        section.entries.push(entry);
                    } else if !line.trim().is_empty() {
                        match section.entries.last_mut() {
                            Some(last) => {
                                last.text = normalize_line(&format!("{} {}", last.text, line));
                            }
                            None => preamble_lines.push(line),
                        }
                    }
                }
            }
        }

        view.preamble = preamble_lines.join("\n").trim().to_string();
        view
    }

    /// Render the canonical text form.
    pub fn render(&self) -> String {
        let mut out = String::new();
        if !self.preamble.is_empty() {
            out.push_str(&self.preamble);
            out.push_str("\n\n");
        }
        for (path, section) in &self.sections {
            out.push_str("## ");
            out.push_str(&section.title);
            out.push_str(" {#");
            out.push_str(path.as_str());
            out.push_str("}\n");
            for entry in &section.entries {
                out.push_str("- [");
                out.push_str(&entry.id);
                out.push_str("] ");
                out.push_str(&entry.text);
                out.push('\n');
            }
            out.push('\n');
        }
        if out.is_empty() {
            return out;
        }
        let trimmed_len = out.trim_end().len();
        out.truncate(trimmed_len);
        out.push('\n');
        out
    }

    pub fn section(&self, path: &TargetPath) -> Option<&Section> {
        self.sections.get(path)
    }

    pub fn section_mut(&mut self, path: &TargetPath) -> Option<&mut Section> {
        self.sections.get_mut(path)
    }

    /// Section at `path`, created with a default title when absent.
    pub fn ensure_section(&mut self, path: &TargetPath) -> &mut Section {
        self.sections
            .entry(path.clone())
            .or_insert_with(|| Section::new(path.default_title()))
    }

    /// How many entries at `path` carry the given id.
    pub fn match_count(&self, path: &TargetPath, id: &str) -> usize {
        self.section(path)
            .map(|s| s.entries.iter().filter(|e| e.id == id).count())
            .unwrap_or(0)
    }

    /// Section paths in document order.
    pub fn section_paths(&self) -> Vec<&TargetPath> {
        self.sections.keys().collect()
    }

    /// All entry ids across every section, sorted for set comparison.
    pub fn sorted_entry_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .sections
            .values()
            .flat_map(|s| s.entries.iter().map(|e| e.id.clone()))
            .collect();
        ids.sort();
        ids
    }
}

fn parse_heading(line: &str) -> Option<(String, TargetPath)> {
    let rest = line.strip_prefix("## ")?;
    let anchor_start = rest.rfind(" {#")?;
    let title = rest[..anchor_start].trim();
    let path_str = rest[anchor_start + 3..].strip_suffix('}')?;
    let path = TargetPath::parse(path_str).ok()?;
    if title.is_empty() {
        return None;
    }
    Some((title.to_string(), path))
}

fn parse_entry(line: &str) -> Option<SectionEntry> {
    let rest = line.strip_prefix("- [")?;
    let close = rest.find(']')?;
    let id = &rest[..close];
    if id.is_empty() || id.contains(char::is_whitespace) {
        return None;
    }
    Some(SectionEntry::new(id, rest[close + 1..].trim_start()))
}
