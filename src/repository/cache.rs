//! Read-through caching layer
//!
//! Id and schema lookups never change once answered, so they are kept
//! forever; `latest`, entry listings and configs always go to the inner
//! repository.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use super::{RepoStatus, Repository, SubjectCache};
use crate::entry::SchemaEntry;
use crate::error::{RepoError, Result};
use crate::subject::{Liveness, Subject};
use crate::subject_config::SubjectConfig;

/// Read-through cache in front of another repository
pub struct CachingRepository {
    inner: Arc<dyn Repository>,
    cache: SubjectCache,
    liveness: Liveness,
}

impl CachingRepository {
    pub fn new(inner: Arc<dyn Repository>) -> Self {
        Self {
            inner,
            cache: SubjectCache::new(),
            liveness: Liveness::new(),
        }
    }

    fn cached(&self, subject: Arc<dyn Subject>) -> Result<Arc<dyn Subject>> {
        match self.cache.get(subject.name())? {
            Some(hit) => Ok(hit),
            None => self.cache.add(Arc::new(CachingSubject::new(
                subject,
                self.liveness.clone(),
            ))),
        }
    }
}

impl Repository for CachingRepository {
    fn register(&self, name: &str, config: Option<&SubjectConfig>) -> Result<Arc<dyn Subject>> {
        self.liveness.check()?;
        if let Some(subject) = self.cache.get(name)? {
            return Ok(subject);
        }
        let subject = self.inner.register(name, config)?;
        self.cached(subject)
    }

    fn lookup(&self, name: &str) -> Result<Option<Arc<dyn Subject>>> {
        self.liveness.check()?;
        if let Some(subject) = self.cache.get(name)? {
            return Ok(Some(subject));
        }
        match self.inner.lookup(name)? {
            Some(subject) => self.cached(subject).map(Some),
            None => Ok(None),
        }
    }

    fn subjects(&self) -> Result<Vec<Arc<dyn Subject>>> {
        self.liveness.check()?;
        self.inner
            .subjects()?
            .into_iter()
            .map(|subject| self.cached(subject))
            .collect()
    }

    fn status(&self) -> RepoStatus {
        let mut status = self.inner.status();
        status.open = status.open && !self.liveness.is_closed();
        status
            .details
            .insert("cache.subjects".to_string(), self.cache.len().to_string());
        status
    }

    fn close(&self) -> Result<()> {
        self.liveness.close();
        self.inner.close()
    }
}

#[derive(Default)]
struct EntryCache {
    by_id: HashMap<String, SchemaEntry>,
    by_schema: HashMap<String, SchemaEntry>,
}

impl EntryCache {
    fn insert(&mut self, entry: &SchemaEntry) {
        self.by_id.insert(entry.id().to_string(), entry.clone());
        self.by_schema
            .insert(entry.schema().to_string(), entry.clone());
    }
}

/// Subject wrapper caching the immutable id and schema lookups.
///
/// `latest`, `all_entries` and `config` always reach the wrapped subject.
pub struct CachingSubject {
    inner: Arc<dyn Subject>,
    entries: RwLock<EntryCache>,
    liveness: Liveness,
}

impl CachingSubject {
    pub fn new(inner: Arc<dyn Subject>, liveness: Liveness) -> Self {
        Self {
            inner,
            entries: RwLock::new(EntryCache::default()),
            liveness,
        }
    }

    fn poisoned() -> RepoError {
        RepoError::unavailable("subject entry cache poisoned")
    }

    fn remember(&self, entry: &SchemaEntry) -> Result<()> {
        self.entries
            .write()
            .map_err(|_| Self::poisoned())?
            .insert(entry);
        Ok(())
    }

    fn remember_found(&self, found: Option<SchemaEntry>) -> Result<Option<SchemaEntry>> {
        if let Some(entry) = &found {
            self.remember(entry)?;
        }
        Ok(found)
    }

    fn cached_by<F>(&self, pick: F) -> Result<Option<SchemaEntry>>
    where
        F: FnOnce(&EntryCache) -> Option<&SchemaEntry>,
    {
        let entries = self.entries.read().map_err(|_| Self::poisoned())?;
        Ok(pick(&entries).cloned())
    }
}

impl Subject for CachingSubject {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn register(&self, schema: &str) -> Result<SchemaEntry> {
        self.liveness.check()?;
        let entry = self.inner.register(schema)?;
        self.remember(&entry)?;
        Ok(entry)
    }

    fn register_if_latest(
        &self,
        schema: &str,
        latest: Option<&SchemaEntry>,
    ) -> Result<Option<SchemaEntry>> {
        self.liveness.check()?;
        let registered = self.inner.register_if_latest(schema, latest)?;
        self.remember_found(registered)
    }

    fn lookup_by_id(&self, id: &str) -> Result<Option<SchemaEntry>> {
        self.liveness.check()?;
        if let Some(hit) = self.cached_by(|c| c.by_id.get(id))? {
            return Ok(Some(hit));
        }
        let found = self.inner.lookup_by_id(id)?;
        self.remember_found(found)
    }

    fn lookup_by_schema(&self, schema: &str) -> Result<Option<SchemaEntry>> {
        self.liveness.check()?;
        if let Some(hit) = self.cached_by(|c| c.by_schema.get(schema))? {
            return Ok(Some(hit));
        }
        let found = self.inner.lookup_by_schema(schema)?;
        self.remember_found(found)
    }

    fn latest(&self) -> Result<Option<SchemaEntry>> {
        self.liveness.check()?;
        self.inner.latest()
    }

    fn all_entries(&self) -> Result<Vec<SchemaEntry>> {
        self.liveness.check()?;
        self.inner.all_entries()
    }

    fn config(&self) -> Result<SubjectConfig> {
        self.liveness.check()?;
        self.inner.config()
    }

    fn integral_keys(&self) -> bool {
        self.inner.integral_keys()
    }
}
