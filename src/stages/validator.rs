use async_trait::async_trait;
use mender_common::{Stage, ValidationResult};
use std::sync::Arc;

use super::extract::parse_response;
use super::prompts::validator_prompt;
use super::{Collaborator, StageAdapter, StageInput, StagePayload};
use crate::errors::StageError;

/// Judges the rewritten code against the original and the reported errors.
pub struct Validator {
    collaborator: Arc<dyn Collaborator>,
    temperature: f32,
}

impl Validator {
    pub fn new(collaborator: Arc<dyn Collaborator>, temperature: f32) -> Self {
        Self {
            collaborator,
            temperature,
        }
    }
}

#[async_trait]
impl StageAdapter for Validator {
    fn stage(&self) -> Stage {
        Stage::Validator
    }

    async fn invoke(&self, input: &StageInput) -> Result<StagePayload, StageError> {
        let StageInput::Validate {
            original,
            current,
            language,
            errors,
            changes,
        } = input
        else {
            return Err(StageError::invalid_input(
                Stage::Validator,
                format!("expected validate input, got {} input", input.stage()),
            ));
        };
        if original.trim().is_empty() {
            return Err(StageError::invalid_input(Stage::Validator, "original code is empty"));
        }
        if current.trim().is_empty() {
            return Err(StageError::invalid_input(Stage::Validator, "no fixed code to validate"));
        }

        let prompt = validator_prompt(original, current, *language, errors, changes);
        let raw = self
            .collaborator
            .complete(&prompt, self.temperature)
            .await
            .map_err(|e| StageError::from_collaborator(Stage::Validator, e))?;
        let result: ValidationResult = parse_response(Stage::Validator, &raw)?;
        Ok(StagePayload::Validate(result.clamped()))
    }
}
