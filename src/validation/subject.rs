//! Validation wrapper around any [`Subject`]

use std::sync::Arc;

use super::{ValidatorFactory, Validator};
use crate::entry::SchemaEntry;
use crate::error::{RepoError, Result};
use crate::subject::Subject;
use crate::subject_config::SubjectConfig;

/// Validate-then-write rounds before a contended `register` gives up
pub const MAX_WRITE_ATTEMPTS: usize = 32;

/// Runs the subject's validators before every write.
///
/// Only `register` and `register_if_latest` are intercepted; reads go
/// straight to the wrapped subject.
pub struct ValidatingSubject {
    inner: Arc<dyn Subject>,
    factory: Arc<ValidatorFactory>,
}

impl ValidatingSubject {
    pub fn new(inner: Arc<dyn Subject>, factory: Arc<ValidatorFactory>) -> Self {
        Self { inner, factory }
    }

    pub fn wrap(inner: Arc<dyn Subject>, factory: Arc<ValidatorFactory>) -> Arc<dyn Subject> {
        Arc::new(Self::new(inner, factory))
    }

    fn validators(&self) -> Result<Vec<(String, Arc<dyn Validator>)>> {
        self.factory.validators_for(&self.inner.config()?)
    }

    /// Current entries, oldest first
    fn history(&self) -> Result<Vec<SchemaEntry>> {
        let mut entries = self.inner.all_entries()?;
        entries.reverse();
        Ok(entries)
    }

    fn check(
        &self,
        validators: &[(String, Arc<dyn Validator>)],
        schema: &str,
        history: &[SchemaEntry],
    ) -> Result<()> {
        for (name, validator) in validators {
            if let Err(e) = validator.validate(schema, history) {
                tracing::debug!(subject = %self.inner.name(), validator = %name, "schema rejected");
                return Err(e.into());
            }
        }
        Ok(())
    }
}

impl Subject for ValidatingSubject {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn register(&self, schema: &str) -> Result<SchemaEntry> {
        for attempt in 1..=MAX_WRITE_ATTEMPTS {
            let validators = self.validators()?;
            if validators.is_empty() {
                return self.inner.register(schema);
            }
            let history = self.history()?;
            self.check(&validators, schema, &history)?;
            // Write only if nothing landed since the history was read.
            if let Some(entry) = self.inner.register_if_latest(schema, history.last())? {
                return Ok(entry);
            }
            tracing::debug!(subject = %self.inner.name(), attempt, "latest moved during validation, retrying");
        }
        tracing::warn!(subject = %self.inner.name(), attempts = MAX_WRITE_ATTEMPTS, "validated write kept losing to other writers");
        Err(RepoError::WriteContention {
            subject: self.inner.name().to_string(),
            attempts: MAX_WRITE_ATTEMPTS,
        })
    }

    fn register_if_latest(
        &self,
        schema: &str,
        latest: Option<&SchemaEntry>,
    ) -> Result<Option<SchemaEntry>> {
        let validators = self.validators()?;
        if !validators.is_empty() {
            let history = self.history()?;
            if history.last() != latest {
                return Ok(None);
            }
            self.check(&validators, schema, &history)?;
        }
        self.inner.register_if_latest(schema, latest)
    }

    fn lookup_by_id(&self, id: &str) -> Result<Option<SchemaEntry>> {
        self.inner.lookup_by_id(id)
    }

    fn lookup_by_schema(&self, schema: &str) -> Result<Option<SchemaEntry>> {
        self.inner.lookup_by_schema(schema)
    }

    fn latest(&self) -> Result<Option<SchemaEntry>> {
        self.inner.latest()
    }

    fn all_entries(&self) -> Result<Vec<SchemaEntry>> {
        self.inner.all_entries()
    }

    fn config(&self) -> Result<SubjectConfig> {
        self.inner.config()
    }

    fn integral_keys(&self) -> bool {
        self.inner.integral_keys()
    }
}
