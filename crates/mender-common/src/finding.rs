//! Scanner findings and Fixer edits.
//!
//! Both types deserialize leniently: collaborators answer with the field
//! names used in their prompts (`error_id`, `line_number`, `fixed_line`, ...)
//! and the aliases below accept either spelling.

use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FindingKind {
    /// Prevents the code from running correctly. Errors drive the Fixer.
    #[default]
    Error,
    /// Worth reporting, never fixed on its own.
    Warning,
}

impl fmt::Display for FindingKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Error => f.write_str("error"),
            Self::Warning => f.write_str("warning"),
        }
    }
}

/// A structured error or warning reported by the Scanner.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Finding {
    #[serde(alias = "error_id", alias = "warning_id", default)]
    pub id: String,
    #[serde(default)]
    pub kind: FindingKind,
    /// Collaborator-supplied category such as `NameError` or `UnusedImport`.
    #[serde(rename = "type", default)]
    pub category: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub severity: Option<String>,
    #[serde(alias = "line_number", default)]
    pub line: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub column: Option<u32>,
    #[serde(alias = "message")]
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suggestion: Option<String>,
}

impl Finding {
    pub fn new(kind: FindingKind, id: &str, category: &str, description: &str) -> Self {
        Self {
            id: id.to_string(),
            kind,
            category: category.to_string(),
            severity: None,
            line: None,
            column: None,
            description: description.to_string(),
            suggestion: None,
        }
    }

    pub fn error(id: &str, category: &str, description: &str) -> Self {
        Self::new(FindingKind::Error, id, category, description)
    }

    pub fn warning(id: &str, category: &str, description: &str) -> Self {
        Self::new(FindingKind::Warning, id, category, description)
    }

    pub fn with_line(mut self, line: u32) -> Self {
        self.line = Some(line);
        self
    }

    pub fn with_suggestion(mut self, suggestion: &str) -> Self {
        self.suggestion = Some(suggestion.to_string());
        self
    }

    /// Force the kind, used by the Scanner when it sorts the raw lists.
    pub fn into_kind(mut self, kind: FindingKind) -> Self {
        self.kind = kind;
        self
    }
}

/// A single change produced by the Fixer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Edit {
    #[serde(alias = "change_id", default)]
    pub id: String,
    /// correction, addition, removal or refactor.
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(alias = "line_number", default)]
    pub line: Option<u32>,
    #[serde(alias = "original_line", default)]
    pub original: String,
    #[serde(alias = "fixed_line", default)]
    pub replacement: String,
    #[serde(alias = "reason", default)]
    pub rationale: String,
}

impl Edit {
    pub fn new(id: &str, line: u32, original: &str, replacement: &str, rationale: &str) -> Self {
        Self {
            id: id.to_string(),
            kind: "correction".to_string(),
            line: Some(line),
            original: original.to_string(),
            replacement: replacement.to_string(),
            rationale: rationale.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_finding_accepts_collaborator_field_names() {
        let json = r#"{
            "error_id": "ERR-001",
            "type": "NameError",
            "severity": "high",
            "line_number": 3,
            "message": "name 'b' is not defined",
            "suggestion": "define b"
        }"#;
        let finding: Finding = serde_json::from_str(json).unwrap();
        assert_eq!(finding.id, "ERR-001");
        assert_eq!(finding.category, "NameError");
        assert_eq!(finding.line, Some(3));
        assert_eq!(finding.description, "name 'b' is not defined");
        assert_eq!(finding.kind, FindingKind::Error);
    }

    #[test]
    fn test_finding_requires_description() {
        let json = r#"{"error_id": "ERR-001", "type": "NameError"}"#;
        assert!(serde_json::from_str::<Finding>(json).is_err());
    }

    #[test]
    fn test_finding_serializes_category_as_type() {
        let finding = Finding::warning("W1", "UnusedImport", "os is unused").with_line(1);
        let value = serde_json::to_value(&finding).unwrap();
        assert_eq!(value["type"], "UnusedImport");
        assert_eq!(value["kind"], "warning");
        assert!(value.get("suggestion").is_none());
    }

    #[test]
    fn test_edit_accepts_collaborator_field_names() {
        let json = r#"{
            "change_id": "FIX-001",
            "type": "correction",
            "line_number": 1,
            "original_line": "def add(a): return a + b",
            "fixed_line": "def add(a, b): return a + b",
            "reason": "b was undefined"
        }"#;
        let edit: Edit = serde_json::from_str(json).unwrap();
        assert_eq!(edit.id, "FIX-001");
        assert_eq!(edit.replacement, "def add(a, b): return a + b");
        assert_eq!(edit.rationale, "b was undefined");
    }
}
