//! Validators composing a pairwise strategy across a subject's history

use std::sync::Arc;

use super::{ValidationResult, ValidationStrategy, Validator};
use crate::entry::SchemaEntry;
use crate::error::ValidationError;

/// Validates the candidate against every existing schema, oldest first,
/// stopping at the first failure
pub struct AllValidator {
    strategy: Arc<dyn ValidationStrategy>,
}

impl AllValidator {
    pub fn new(strategy: Arc<dyn ValidationStrategy>) -> Self {
        Self { strategy }
    }
}

impl Validator for AllValidator {
    fn validate(&self, candidate: &str, history: &[SchemaEntry]) -> ValidationResult {
        for entry in history {
            self.strategy
                .validate(candidate, entry.schema())
                .map_err(|e| ValidationError::new(format!("against id {}: {}", entry.id(), e)))?;
        }
        Ok(())
    }
}

/// Validates the candidate against the newest schema only; an empty history passes
pub struct LatestValidator {
    strategy: Arc<dyn ValidationStrategy>,
}

impl LatestValidator {
    pub fn new(strategy: Arc<dyn ValidationStrategy>) -> Self {
        Self { strategy }
    }
}

impl Validator for LatestValidator {
    fn validate(&self, candidate: &str, history: &[SchemaEntry]) -> ValidationResult {
        match history.last() {
            Some(latest) => self
                .strategy
                .validate(candidate, latest.schema())
                .map_err(|e| ValidationError::new(format!("against latest id {}: {}", latest.id(), e))),
            None => Ok(()),
        }
    }
}

/// Rejects everything
#[derive(Debug, Default, Clone, Copy)]
pub struct Reject;

impl Validator for Reject {
    fn validate(&self, _candidate: &str, _history: &[SchemaEntry]) -> ValidationResult {
        Err(ValidationError::new(format!(
            "{} validator always rejects validation",
            super::REJECT_VALIDATOR
        )))
    }
}
