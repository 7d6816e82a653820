//! Request intake. Everything here runs before any stage is invoked.

use mender_common::Language;
use serde::{Deserialize, Serialize};

use crate::errors::WorkflowError;

pub const DEFAULT_MAX_CODE_LENGTH: usize = 50_000;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DebugRequest {
    pub code: String,
    #[serde(default)]
    pub language: Option<String>,
    #[serde(default)]
    pub context: Option<String>,
    #[serde(default)]
    pub max_iterations: Option<u32>,
}

impl DebugRequest {
    pub fn new(code: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            language: None,
            context: None,
            max_iterations: None,
        }
    }

    pub fn with_language(mut self, language: &str) -> Self {
        self.language = Some(language.to_string());
        self
    }

    pub fn with_context(mut self, context: &str) -> Self {
        self.context = Some(context.to_string());
        self
    }

    pub fn with_max_iterations(mut self, max_iterations: u32) -> Self {
        self.max_iterations = Some(max_iterations);
        self
    }
}

/// Limits applied to incoming requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestLimits {
    pub max_code_length: usize,
    pub default_max_iterations: u32,
    pub max_iterations_ceiling: u32,
}

impl Default for RequestLimits {
    fn default() -> Self {
        Self {
            max_code_length: DEFAULT_MAX_CODE_LENGTH,
            default_max_iterations: 3,
            max_iterations_ceiling: 10,
        }
    }
}

/// A request that passed validation.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidatedRequest {
    pub code: String,
    pub language: Language,
    pub context: Option<String>,
    pub max_iterations: u32,
}

impl RequestLimits {
    pub fn validate(&self, request: &DebugRequest) -> Result<ValidatedRequest, WorkflowError> {
        if request.code.trim().is_empty() {
            return Err(WorkflowError::InvalidInput("code must not be empty".to_string()));
        }
        let length = request.code.chars().count();
        if length > self.max_code_length {
            return Err(WorkflowError::InvalidInput(format!(
                "code is {} characters, limit is {}",
                length, self.max_code_length
            )));
        }

        let language = match request.language.as_deref() {
            None => Language::default(),
            Some(raw) => raw
                .parse::<Language>()
                .map_err(|e| WorkflowError::InvalidInput(e.to_string()))?,
        };

        let max_iterations = request
            .max_iterations
            .unwrap_or(self.default_max_iterations);
        if max_iterations > self.max_iterations_ceiling {
            return Err(WorkflowError::InvalidInput(format!(
                "max_iterations {} exceeds the ceiling of {}",
                max_iterations, self.max_iterations_ceiling
            )));
        }

        let context = request
            .context
            .as_ref()
            .map(|c| c.trim().to_string())
            .filter(|c| !c.is_empty());

        Ok(ValidatedRequest {
            code: request.code.clone(),
            language,
            context,
            max_iterations,
        })
    }
}
