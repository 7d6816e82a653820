use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Verdict returned by the Validator.
///
/// Parsing is lenient about case and separators, and reads
/// `approved_with_warnings` as an approval.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationStatus {
    Approved,
    Rejected,
    NeedsRevision,
}

impl ValidationStatus {
    pub fn is_approved(&self) -> bool {
        matches!(self, Self::Approved)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Approved => "approved",
            Self::Rejected => "rejected",
            Self::NeedsRevision => "needs_revision",
        }
    }
}

impl fmt::Display for ValidationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Unknown validation status '{0}'. Valid values: approved, rejected, needs_revision")]
pub struct UnknownValidationStatus(pub String);

impl FromStr for ValidationStatus {
    type Err = UnknownValidationStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_lowercase().replace(['-', ' '], "_");
        match normalized.as_str() {
            "approved" | "approved_with_warnings" => Ok(Self::Approved),
            "rejected" => Ok(Self::Rejected),
            "needs_revision" => Ok(Self::NeedsRevision),
            _ => Err(UnknownValidationStatus(s.to_string())),
        }
    }
}

impl<'de> Deserialize<'de> for ValidationStatus {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationCheck {
    #[serde(alias = "check_name")]
    pub name: String,
    pub passed: bool,
    #[serde(default)]
    pub details: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub severity: Option<String>,
}

/// Last verdict of the Validator, replaced wholesale on every invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationResult {
    #[serde(alias = "validation_status")]
    pub status: ValidationStatus,
    /// Always within `[0, 1]`; see [`ValidationResult::clamped`].
    #[serde(alias = "confidence_score", default)]
    pub confidence: f64,
    #[serde(alias = "checks_performed", default)]
    pub checks: Vec<ValidationCheck>,
    #[serde(alias = "issues_found", default)]
    pub issues: Vec<String>,
    #[serde(default)]
    pub recommendations: Vec<String>,
    #[serde(alias = "final_verdict", default, skip_serializing_if = "Option::is_none")]
    pub verdict: Option<String>,
}

impl ValidationResult {
    pub fn new(status: ValidationStatus, confidence: f64) -> Self {
        Self {
            status,
            confidence,
            checks: Vec::new(),
            issues: Vec::new(),
            recommendations: Vec::new(),
            verdict: None,
        }
    }

    pub fn approved(confidence: f64) -> Self {
        Self::new(ValidationStatus::Approved, confidence)
    }

    pub fn needs_revision(confidence: f64) -> Self {
        Self::new(ValidationStatus::NeedsRevision, confidence)
    }

    pub fn rejected(confidence: f64) -> Self {
        Self::new(ValidationStatus::Rejected, confidence)
    }

    /// Pin the confidence into `[0, 1]`. NaN becomes 0.
    pub fn clamped(mut self) -> Self {
        self.confidence = if self.confidence.is_nan() {
            0.0
        } else {
            self.confidence.clamp(0.0, 1.0)
        };
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_serde_snake_case() {
        let json = serde_json::to_string(&ValidationStatus::NeedsRevision).unwrap();
        assert_eq!(json, "\"needs_revision\"");
        let parsed: ValidationStatus = serde_json::from_str("\"approved\"").unwrap();
        assert!(parsed.is_approved());
    }

    #[test]
    fn test_unknown_status_is_rejected() {
        assert!(serde_json::from_str::<ValidationStatus>("\"maybe\"").is_err());
        assert!("".parse::<ValidationStatus>().is_err());
    }

    #[test]
    fn test_status_parse_is_lenient() {
        for raw in ["APPROVED", "Approved", " approved ", "approved_with_warnings", "Approved With Warnings"] {
            assert_eq!(raw.parse::<ValidationStatus>().unwrap(), ValidationStatus::Approved, "{raw}");
        }
        assert_eq!("Needs-Revision".parse::<ValidationStatus>().unwrap(), ValidationStatus::NeedsRevision);
        assert_eq!("REJECTED".parse::<ValidationStatus>().unwrap(), ValidationStatus::Rejected);
        let parsed: ValidationStatus = serde_json::from_str("\"NEEDS_REVISION\"").unwrap();
        assert_eq!(parsed, ValidationStatus::NeedsRevision);
    }

    #[test]
    fn test_result_accepts_collaborator_field_names() {
        let json = r#"{
            "validation_status": "needs_revision",
            "confidence_score": 0.4,
            "checks_performed": [{"check_name": "syntax", "passed": true, "details": "ok"}],
            "issues_found": ["edge case"],
            "final_verdict": "almost"
        }"#;
        let result: ValidationResult = serde_json::from_str(json).unwrap();
        assert_eq!(result.status, ValidationStatus::NeedsRevision);
        assert_eq!(result.checks.len(), 1);
        assert_eq!(result.checks[0].name, "syntax");
        assert_eq!(result.verdict.as_deref(), Some("almost"));
    }

    #[test]
    fn test_clamped_confidence() {
        assert_eq!(ValidationResult::approved(1.7).clamped().confidence, 1.0);
        assert_eq!(ValidationResult::approved(-0.2).clamped().confidence, 0.0);
        assert_eq!(ValidationResult::approved(f64::NAN).clamped().confidence, 0.0);
        assert_eq!(ValidationResult::approved(0.8).clamped().confidence, 0.8);
    }
}
