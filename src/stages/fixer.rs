use async_trait::async_trait;
use mender_common::{Edit, Stage};
use serde::Deserialize;
use std::sync::Arc;

use super::extract::parse_response;
use super::prompts::fixer_prompt;
use super::{Collaborator, FixReport, StageAdapter, StageInput, StagePayload};
use crate::errors::StageError;

#[derive(Debug, Deserialize)]
struct FixResponse {
    fixed_code: Option<String>,
    #[serde(default)]
    changes: Vec<Edit>,
    #[serde(default)]
    explanation: String,
    #[serde(alias = "confidence_score", default)]
    confidence: Option<f64>,
}

/// Rewrites the code to address the current error list.
pub struct Fixer {
    collaborator: Arc<dyn Collaborator>,
    temperature: f32,
}

impl Fixer {
    pub fn new(collaborator: Arc<dyn Collaborator>, temperature: f32) -> Self {
        Self {
            collaborator,
            temperature,
        }
    }
}

#[async_trait]
impl StageAdapter for Fixer {
    fn stage(&self) -> Stage {
        Stage::Fixer
    }

    async fn invoke(&self, input: &StageInput) -> Result<StagePayload, StageError> {
        let StageInput::Fix {
            code,
            language,
            context,
            errors,
        } = input
        else {
            return Err(StageError::invalid_input(
                Stage::Fixer,
                format!("expected fix input, got {} input", input.stage()),
            ));
        };
        if code.trim().is_empty() {
            return Err(StageError::invalid_input(Stage::Fixer, "code is empty"));
        }
        if errors.is_empty() {
            return Err(StageError::invalid_input(Stage::Fixer, "no errors to fix"));
        }

        let prompt = fixer_prompt(code, *language, context.as_deref(), errors);
        let raw = self
            .collaborator
            .complete(&prompt, self.temperature)
            .await
            .map_err(|e| StageError::from_collaborator(Stage::Fixer, e))?;
        let response: FixResponse = parse_response(Stage::Fixer, &raw)?;

        let fixed_code = response
            .fixed_code
            .filter(|c| !c.trim().is_empty())
            .ok_or_else(|| StageError::malformed(Stage::Fixer, "response has no fixed_code"))?;

        Ok(StagePayload::Fix(FixReport {
            fixed_code,
            changes: response.changes,
            explanation: response.explanation,
            confidence: response
                .confidence
                .filter(|c| c.is_finite())
                .map(|c| c.clamp(0.0, 1.0)),
        }))
    }
}
