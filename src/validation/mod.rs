//! Compatibility validation
//!
//! Validation is layered:
//!
//! - a base [`ReadCompatibility`] primitive answers "can schema X read data
//!   written with schema Y" (see [`avro::AvroCanRead`]);
//! - a [`ValidationStrategy`] compares a candidate against one existing
//!   schema, composed from the base primitive ([`CanRead`], [`CanBeRead`],
//!   [`MutualRead`]);
//! - a [`Validator`] applies a strategy across a subject's history
//!   ([`AllValidator`], [`LatestValidator`]);
//! - the [`ValidatorFactory`] maps the validator names a subject declares to
//!   instances, and [`ValidatingSubject`] runs them before every write.

pub mod avro;
pub mod factory;
pub mod strategy;
pub mod subject;
pub mod validator;

pub use avro::AvroCanRead;
pub use factory::{ValidatorFactory, ValidatorFactoryBuilder, ValidatorSpec, REJECT_VALIDATOR};
pub use strategy::{AlwaysFail, CanBeRead, CanRead, MutualRead, StrategyKind};
pub use subject::ValidatingSubject;
pub use validator::{AllValidator, LatestValidator, Reject};

use crate::entry::SchemaEntry;
use crate::error::ValidationError;

pub type ValidationResult = std::result::Result<(), ValidationError>;

/// The base "reader can read data written by writer" check.
///
/// What makes one schema readable by another is up to the implementation.
pub trait ReadCompatibility: Send + Sync {
    fn can_read(&self, reader: &str, writer: &str) -> ValidationResult;
}

/// Pairwise comparison of a candidate schema against one existing schema
pub trait ValidationStrategy: Send + Sync {
    fn validate(&self, candidate: &str, existing: &str) -> ValidationResult;
}

/// Checks a candidate schema against a subject's history, given oldest first
pub trait Validator: Send + Sync {
    fn validate(&self, candidate: &str, history: &[SchemaEntry]) -> ValidationResult;
}
