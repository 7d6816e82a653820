use async_trait::async_trait;
use mender_common::{Finding, FindingKind, Stage};
use serde::Deserialize;
use std::sync::Arc;

use super::extract::parse_response;
use super::prompts::scanner_prompt;
use super::{Collaborator, ScanReport, StageAdapter, StageInput, StagePayload};
use crate::errors::StageError;

#[derive(Debug, Deserialize)]
struct ScanResponse {
    errors: Vec<Finding>,
    #[serde(default)]
    warnings: Vec<Finding>,
    #[serde(alias = "code_quality_score", default)]
    quality_score: Option<f64>,
    #[serde(alias = "analysis_summary", default)]
    summary: String,
}

/// Finds errors and warnings in the code under consideration.
pub struct Scanner {
    collaborator: Arc<dyn Collaborator>,
    temperature: f32,
}

impl Scanner {
    pub fn new(collaborator: Arc<dyn Collaborator>, temperature: f32) -> Self {
        Self {
            collaborator,
            temperature,
        }
    }
}

#[async_trait]
impl StageAdapter for Scanner {
    fn stage(&self) -> Stage {
        Stage::Scanner
    }

    async fn invoke(&self, input: &StageInput) -> Result<StagePayload, StageError> {
        let StageInput::Scan {
            code,
            language,
            context,
        } = input
        else {
            return Err(StageError::invalid_input(
                Stage::Scanner,
                format!("expected scan input, got {} input", input.stage()),
            ));
        };
        if code.trim().is_empty() {
            return Err(StageError::invalid_input(Stage::Scanner, "code is empty"));
        }

        let prompt = scanner_prompt(code, *language, context.as_deref());
        let raw = self
            .collaborator
            .complete(&prompt, self.temperature)
            .await
            .map_err(|e| StageError::from_collaborator(Stage::Scanner, e))?;
        let response: ScanResponse = parse_response(Stage::Scanner, &raw)?;

        Ok(StagePayload::Scan(ScanReport {
            errors: normalise(response.errors, FindingKind::Error, "ERR"),
            warnings: normalise(response.warnings, FindingKind::Warning, "WARN"),
            quality_score: response
                .quality_score
                .filter(|s| s.is_finite())
                .map(|s| s.clamp(0.0, 10.0)),
            summary: response.summary,
        }))
    }
}

/// Force the kind and give anonymous findings a stable id.
fn normalise(findings: Vec<Finding>, kind: FindingKind, prefix: &str) -> Vec<Finding> {
    findings
        .into_iter()
        .enumerate()
        .map(|(i, finding)| {
            let mut finding = finding.into_kind(kind);
            if finding.id.trim().is_empty() {
                finding.id = format!("{}-{:03}", prefix, i + 1);
            }
            finding
        })
        .collect()
}
