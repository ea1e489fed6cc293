//! Pairwise validation strategies derived from a base read check

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::{ReadCompatibility, ValidationResult, ValidationStrategy};
use crate::error::{RepoError, ValidationError};

/// The candidate can read data written with the existing schema
pub struct CanRead {
    base: Arc<dyn ReadCompatibility>,
}

impl CanRead {
    pub fn new(base: Arc<dyn ReadCompatibility>) -> Self {
        Self { base }
    }
}

impl ValidationStrategy for CanRead {
    fn validate(&self, candidate: &str, existing: &str) -> ValidationResult {
        self.base.can_read(candidate, existing)
    }
}

/// The existing schema can read data written with the candidate
pub struct CanBeRead {
    base: Arc<dyn ReadCompatibility>,
}

impl CanBeRead {
    pub fn new(base: Arc<dyn ReadCompatibility>) -> Self {
        Self { base }
    }
}

impl ValidationStrategy for CanBeRead {
    fn validate(&self, candidate: &str, existing: &str) -> ValidationResult {
        self.base.can_read(existing, candidate)
    }
}

/// Both directions must read. Candidate-reads-existing runs first and a
/// failure there short-circuits.
pub struct MutualRead {
    base: Arc<dyn ReadCompatibility>,
}

impl MutualRead {
    pub fn new(base: Arc<dyn ReadCompatibility>) -> Self {
        Self { base }
    }
}

impl ValidationStrategy for MutualRead {
    fn validate(&self, candidate: &str, existing: &str) -> ValidationResult {
        self.base.can_read(candidate, existing)?;
        self.base.can_read(existing, candidate)
    }
}

/// Base read check used when none is configured; it fails every comparison
#[derive(Debug, Default, Clone, Copy)]
pub struct AlwaysFail;

impl ReadCompatibility for AlwaysFail {
    fn can_read(&self, _reader: &str, _writer: &str) -> ValidationResult {
        Err(ValidationError::new(
            "no read-compatibility strategy is configured, every comparison fails; \
             set validation.can_read_strategy",
        ))
    }
}

/// Which pairwise strategy a validator applies
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StrategyKind {
    CanRead,
    CanBeRead,
    MutualRead,
}

impl StrategyKind {
    pub fn build(self, base: Arc<dyn ReadCompatibility>) -> Arc<dyn ValidationStrategy> {
        match self {
            StrategyKind::CanRead => Arc::new(CanRead::new(base)),
            StrategyKind::CanBeRead => Arc::new(CanBeRead::new(base)),
            StrategyKind::MutualRead => Arc::new(MutualRead::new(base)),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            StrategyKind::CanRead => "can-read",
            StrategyKind::CanBeRead => "can-be-read",
            StrategyKind::MutualRead => "mutual-read",
        }
    }
}

impl fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StrategyKind {
    type Err = RepoError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "can-read" => Ok(StrategyKind::CanRead),
            "can-be-read" => Ok(StrategyKind::CanBeRead),
            "mutual-read" => Ok(StrategyKind::MutualRead),
            other => Err(RepoError::InvalidConfig(format!(
                "unknown validation strategy '{}', expected can-read, can-be-read or mutual-read",
                other
            ))),
        }
    }
}
