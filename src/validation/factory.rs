//! Named validator registry
//!
//! A [`ValidatorFactory`] is built once at startup and shared by reference;
//! there is no process-wide default instance.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use super::avro::AvroCanRead;
use super::strategy::{AlwaysFail, StrategyKind};
use super::validator::{AllValidator, LatestValidator, Reject};
use super::{ReadCompatibility, Validator};
use crate::config::ValidationConfig;
use crate::error::{RepoError, Result};
use crate::subject_config::{comma_split, SubjectConfig, RESERVED_PREFIX};

/// Name of the built-in validator that rejects every schema
pub const REJECT_VALIDATOR: &str = "schema-repo.validator.reject";

/// Maps validator names to instances and decides which apply to a subject
pub struct ValidatorFactory {
    validators: BTreeMap<String, Arc<dyn Validator>>,
    defaults: BTreeSet<String>,
    strict: bool,
}

impl ValidatorFactory {
    pub fn builder() -> ValidatorFactoryBuilder {
        ValidatorFactoryBuilder::new()
    }

    /// A factory holding only the built-in reject validator
    pub fn empty() -> Self {
        Self::builder().build()
    }

    /// Build the factory described by the `[validation]` config section
    pub fn from_config(config: &ValidationConfig) -> Result<Self> {
        let base: Arc<dyn ReadCompatibility> = match config.can_read_strategy.trim() {
            "avro" => Arc::new(AvroCanRead::new()),
            "always-fail" | "" => Arc::new(AlwaysFail),
            other => {
                return Err(RepoError::InvalidConfig(format!(
                    "unknown can-read strategy '{}', expected avro or always-fail",
                    other
                )))
            }
        };

        let mut builder = Self::builder().strict(config.strict_validator_names);
        for (name, spec) in &config.validators {
            let spec: ValidatorSpec = spec.parse()?;
            builder = builder.set_validator(name, spec.build(Arc::clone(&base)))?;
        }
        Ok(builder
            .set_default_validators(comma_split(&config.default_validators))
            .build())
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Validator>> {
        self.validators.get(name).cloned()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.validators.keys().map(String::as_str)
    }

    pub fn is_strict(&self) -> bool {
        self.strict
    }

    /// Resolve validator names to instances.
    ///
    /// Unknown names are skipped with a warning, or rejected with
    /// [`RepoError::UnknownValidator`] when the factory is strict.
    pub fn resolve<'a, I>(&self, names: I) -> Result<Vec<(String, Arc<dyn Validator>)>>
    where
        I: IntoIterator<Item = &'a String>,
    {
        let mut resolved = Vec::new();
        for name in names {
            match self.validators.get(name) {
                Some(v) => resolved.push((name.clone(), Arc::clone(v))),
                None if self.strict => return Err(RepoError::UnknownValidator(name.clone())),
                None => tracing::warn!(validator = %name, "skipping unknown validator"),
            }
        }
        Ok(resolved)
    }

    /// Default validators that are actually registered
    pub fn default_subject_validators(&self) -> BTreeSet<String> {
        self.defaults
            .iter()
            .filter(|name| self.validators.contains_key(*name))
            .cloned()
            .collect()
    }

    /// The validators that gate writes to a subject with `config`.
    ///
    /// A config that sets the validators key, even to nothing, decides alone;
    /// otherwise the factory defaults apply.
    pub fn validators_for(&self, config: &SubjectConfig) -> Result<Vec<(String, Arc<dyn Validator>)>> {
        if config.has_explicit_validators() {
            self.resolve(config.validators())
        } else {
            self.resolve(&self.default_subject_validators())
        }
    }
}

impl Default for ValidatorFactory {
    fn default() -> Self {
        Self::empty()
    }
}

impl fmt::Debug for ValidatorFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ValidatorFactory")
            .field("validators", &self.validators.keys().collect::<Vec<_>>())
            .field("defaults", &self.defaults)
            .field("strict", &self.strict)
            .finish()
    }
}

/// Builder for [`ValidatorFactory`]; starts out with [`REJECT_VALIDATOR`] registered
pub struct ValidatorFactoryBuilder {
    validators: BTreeMap<String, Arc<dyn Validator>>,
    defaults: BTreeSet<String>,
    strict: bool,
}

impl ValidatorFactoryBuilder {
    fn new() -> Self {
        let mut validators: BTreeMap<String, Arc<dyn Validator>> = BTreeMap::new();
        validators.insert(REJECT_VALIDATOR.to_string(), Arc::new(Reject));
        Self {
            validators,
            defaults: BTreeSet::new(),
            strict: false,
        }
    }

    /// Register `validator` under `name`; names with the reserved prefix are refused
    pub fn set_validator(mut self, name: &str, validator: Arc<dyn Validator>) -> Result<Self> {
        if name.starts_with(RESERVED_PREFIX) {
            return Err(RepoError::ReservedKey {
                prefix: RESERVED_PREFIX.to_string(),
                key: name.to_string(),
            });
        }
        self.validators.insert(name.to_string(), validator);
        Ok(self)
    }

    pub fn set_default_validator(mut self, name: impl Into<String>) -> Self {
        self.defaults.insert(name.into());
        self
    }

    pub fn set_default_validators<I, S>(self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        names
            .into_iter()
            .fold(self, |builder, name| builder.set_default_validator(name))
    }

    /// Fail on unknown validator names instead of skipping them
    pub fn strict(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }

    pub fn build(self) -> ValidatorFactory {
        ValidatorFactory {
            validators: self.validators,
            defaults: self.defaults,
            strict: self.strict,
        }
    }
}

/// How a configured validator is put together, written `<all|latest>:<strategy>`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidatorSpec {
    All(StrategyKind),
    Latest(StrategyKind),
}

impl ValidatorSpec {
    pub fn build(self, base: Arc<dyn ReadCompatibility>) -> Arc<dyn Validator> {
        match self {
            ValidatorSpec::All(kind) => Arc::new(AllValidator::new(kind.build(base))),
            ValidatorSpec::Latest(kind) => Arc::new(LatestValidator::new(kind.build(base))),
        }
    }
}

impl FromStr for ValidatorSpec {
    type Err = RepoError;

    fn from_str(s: &str) -> Result<Self> {
        let (scope, strategy) = s.split_once(':').ok_or_else(|| {
            RepoError::InvalidConfig(format!(
                "validator '{}' must look like <all|latest>:<strategy>",
                s
            ))
        })?;
        let kind: StrategyKind = strategy.parse()?;
        match scope.trim() {
            "all" => Ok(ValidatorSpec::All(kind)),
            "latest" => Ok(ValidatorSpec::Latest(kind)),
            other => Err(RepoError::InvalidConfig(format!(
                "unknown validator scope '{}', expected all or latest",
                other
            ))),
        }
    }
}

impl fmt::Display for ValidatorSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValidatorSpec::All(kind) => write!(f, "all:{}", kind),
            ValidatorSpec::Latest(kind) => write!(f, "latest:{}", kind),
        }
    }
}
