//! Subjects: named, append-only collections of schema entries
//!
//! [`Subject`] is the interface every layer speaks (backends, the validating
//! decorator, the read-through cache). [`StoredSubject`] is the one state
//! machine behind all backends: it owns id assignment, idempotent
//! registration and the "latest" pointer, and asks a [`SubjectStore`] only for
//! raw storage primitives.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};

use serde::{Deserialize, Serialize};

use crate::checksum::Checksum;
use crate::entry::SchemaEntry;
use crate::error::{RepoError, Result};
use crate::lock::CriticalSection;
use crate::subject_config::SubjectConfig;

/// A named collection of schemas.
///
/// `lookup_by_id` and `lookup_by_schema` results are immutable once non-null
/// and can be cached forever; `latest`, `all_entries` and `config` are
/// mutable and must be fetched fresh.
pub trait Subject: Send + Sync {
    fn name(&self) -> &str;

    /// Register `schema`, or return the existing entry if the exact text is already registered.
    fn register(&self, schema: &str) -> Result<SchemaEntry>;

    /// Register `schema` only if the current latest entry equals `latest`
    /// (`None` meaning the subject is empty). Returns `Ok(None)` on mismatch.
    fn register_if_latest(
        &self,
        schema: &str,
        latest: Option<&SchemaEntry>,
    ) -> Result<Option<SchemaEntry>>;

    fn lookup_by_id(&self, id: &str) -> Result<Option<SchemaEntry>>;

    fn lookup_by_schema(&self, schema: &str) -> Result<Option<SchemaEntry>>;

    /// The most recently registered entry
    fn latest(&self) -> Result<Option<SchemaEntry>>;

    /// Every entry, newest first
    fn all_entries(&self) -> Result<Vec<SchemaEntry>>;

    fn config(&self) -> Result<SubjectConfig>;

    /// Whether ids of this subject always parse as non-negative integers
    fn integral_keys(&self) -> bool;
}

impl fmt::Debug for dyn Subject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subject").field("name", &self.name()).finish()
    }
}

/// Reject empty subject names and names containing whitespace
pub fn validate_subject_name(name: &str) -> Result<()> {
    if name.is_empty() || name.chars().any(char::is_whitespace) {
        return Err(RepoError::InvalidSubjectName(name.to_string()));
    }
    Ok(())
}

pub(crate) fn validate_schema(schema: &str) -> Result<()> {
    if schema.is_empty() {
        return Err(RepoError::EmptySchema);
    }
    Ok(())
}

/// Shared open/closed flag of a repository and everything it handed out
#[derive(Debug, Clone, Default)]
pub struct Liveness(Arc<AtomicBool>);

impl Liveness {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark closed; returns whether this call did the closing
    pub fn close(&self) -> bool {
        !self.0.swap(true, Ordering::SeqCst)
    }

    pub fn is_closed(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    pub fn check(&self) -> Result<()> {
        if self.is_closed() {
            return Err(RepoError::Closed);
        }
        Ok(())
    }
}

/// How a subject mints ids for new schemas
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IdScheme {
    /// Successive integers starting at 0, in registration order
    #[default]
    Integral,
    /// Leading 16 hex characters of the schema's SHA-256
    Fingerprint,
}

impl IdScheme {
    const FINGERPRINT_LEN: usize = 16;

    pub fn is_integral(&self) -> bool {
        matches!(self, IdScheme::Integral)
    }
}

/// Raw per-subject storage supplied by a backend.
///
/// Implementations need no locking of their own for writes: [`StoredSubject`]
/// calls [`SubjectStore::append`] only while holding the subject's critical
/// section. Reads may run concurrently with an append.
pub trait SubjectStore: Send + Sync {
    /// Registered ids, oldest first
    fn ids(&self) -> Result<Vec<String>>;

    fn read_schema(&self, id: &str) -> Result<Option<String>>;

    /// Durably store a new entry. The id must not show up in [`SubjectStore::ids`]
    /// before its schema text is readable.
    fn append(&self, entry: &SchemaEntry) -> Result<()>;

    fn config(&self) -> Result<SubjectConfig>;
}

#[derive(Debug, Default)]
struct Index {
    order: Vec<String>,
    by_id: HashMap<String, String>,
    by_schema: HashMap<String, String>,
}

impl Index {
    fn entry_for_id(&self, id: &str) -> Option<SchemaEntry> {
        self.by_id.get(id).map(|schema| SchemaEntry::new(id, schema.as_str()))
    }

    fn entry_for_schema(&self, schema: &str) -> Option<SchemaEntry> {
        self.by_schema.get(schema).map(|id| SchemaEntry::new(id.as_str(), schema))
    }
}

/// The subject state machine shared by every backend
pub struct StoredSubject<S> {
    name: String,
    store: S,
    lock: Arc<dyn CriticalSection>,
    id_scheme: IdScheme,
    liveness: Liveness,
    // Grow-only mirror of the store; entries are immutable so it never goes stale,
    // it can only lag behind.
    index: RwLock<Index>,
}

impl<S: SubjectStore> StoredSubject<S> {
    pub fn new(
        name: impl Into<String>,
        store: S,
        lock: Arc<dyn CriticalSection>,
        id_scheme: IdScheme,
        liveness: Liveness,
    ) -> Self {
        Self {
            name: name.into(),
            store,
            lock,
            id_scheme,
            liveness,
            index: RwLock::new(Index::default()),
        }
    }

    fn read_index<T>(&self, f: impl FnOnce(&Index) -> T) -> Result<T> {
        let index = self
            .index
            .read()
            .map_err(|_| RepoError::unavailable("subject index poisoned"))?;
        Ok(f(&index))
    }

    /// Pull ids the index has not seen yet; returns the store's current id list
    fn refresh(&self) -> Result<Vec<String>> {
        let ids = self.store.ids()?;
        let known = self.read_index(|i| i.order.len())?;
        if ids.len() <= known {
            return Ok(ids);
        }

        let mut fresh = Vec::with_capacity(ids.len() - known);
        for id in &ids[known..] {
            let schema = self.store.read_schema(id)?.ok_or_else(|| {
                RepoError::corrupt(&self.name, format!("id {} has no schema", id))
            })?;
            fresh.push((id.clone(), schema));
        }

        let mut index = self
            .index
            .write()
            .map_err(|_| RepoError::unavailable("subject index poisoned"))?;
        // Another reader may have extended the index meanwhile.
        let skip = index.order.len().saturating_sub(known);
        if let Some(diverged) = ids.iter().zip(index.order.iter()).position(|(a, b)| a != b) {
            return Err(RepoError::corrupt(
                &self.name,
                format!("id order changed at position {}", diverged),
            ));
        }
        for (id, schema) in fresh.into_iter().skip(skip) {
            index.order.push(id.clone());
            index.by_schema.insert(schema.clone(), id.clone());
            index.by_id.insert(id, schema);
        }
        Ok(ids)
    }

    fn next_id(&self, ids: &[String], schema: &str) -> Result<String> {
        match self.id_scheme {
            IdScheme::Integral => {
                let mut next = 0u64;
                for id in ids {
                    let n: u64 = id.parse().map_err(|_| {
                        RepoError::corrupt(&self.name, format!("non-integral id '{}'", id))
                    })?;
                    next = next.max(n + 1);
                }
                Ok(next.to_string())
            }
            IdScheme::Fingerprint => {
                let id = Checksum::of(schema)
                    .prefix(IdScheme::FINGERPRINT_LEN)
                    .to_string();
                if self.read_index(|i| i.by_id.contains_key(&id))? {
                    return Err(RepoError::IdCollision {
                        subject: self.name.clone(),
                        id,
                    });
                }
                Ok(id)
            }
        }
    }

    /// Lookup-or-create; must be called inside the critical section with a fresh id list
    fn insert_locked(&self, schema: &str, ids: &[String]) -> Result<SchemaEntry> {
        if let Some(existing) = self.read_index(|i| i.entry_for_schema(schema))? {
            tracing::debug!(subject = %self.name, id = existing.id(), "schema already registered");
            return Ok(existing);
        }
        let entry = SchemaEntry::new(self.next_id(ids, schema)?, schema);
        self.store.append(&entry)?;
        self.refresh()?;
        tracing::debug!(subject = %self.name, id = entry.id(), "registered schema");
        Ok(entry)
    }

    fn latest_of(&self, ids: &[String]) -> Result<Option<SchemaEntry>> {
        match ids.last() {
            Some(id) => self.read_index(|i| i.entry_for_id(id)),
            None => Ok(None),
        }
    }
}

impl<S: SubjectStore> Subject for StoredSubject<S> {
    fn name(&self) -> &str {
        &self.name
    }

    fn register(&self, schema: &str) -> Result<SchemaEntry> {
        validate_schema(schema)?;
        self.liveness.check()?;
        let _guard = self.lock.enter()?;
        let ids = self.refresh()?;
        self.insert_locked(schema, &ids)
    }

    fn register_if_latest(
        &self,
        schema: &str,
        latest: Option<&SchemaEntry>,
    ) -> Result<Option<SchemaEntry>> {
        validate_schema(schema)?;
        self.liveness.check()?;
        let _guard = self.lock.enter()?;
        let ids = self.refresh()?;
        let current = self.latest_of(&ids)?;
        if current.as_ref() != latest {
            tracing::debug!(subject = %self.name, "latest moved, conditional registration refused");
            return Ok(None);
        }
        self.insert_locked(schema, &ids).map(Some)
    }

    fn lookup_by_id(&self, id: &str) -> Result<Option<SchemaEntry>> {
        self.liveness.check()?;
        if let Some(entry) = self.read_index(|i| i.entry_for_id(id))? {
            return Ok(Some(entry));
        }
        self.refresh()?;
        self.read_index(|i| i.entry_for_id(id))
    }

    fn lookup_by_schema(&self, schema: &str) -> Result<Option<SchemaEntry>> {
        self.liveness.check()?;
        if let Some(entry) = self.read_index(|i| i.entry_for_schema(schema))? {
            return Ok(Some(entry));
        }
        self.refresh()?;
        self.read_index(|i| i.entry_for_schema(schema))
    }

    fn latest(&self) -> Result<Option<SchemaEntry>> {
        self.liveness.check()?;
        let ids = self.refresh()?;
        self.latest_of(&ids)
    }

    fn all_entries(&self) -> Result<Vec<SchemaEntry>> {
        self.liveness.check()?;
        let ids = self.refresh()?;
        self.read_index(|index| {
            ids.iter()
                .rev()
                .filter_map(|id| index.entry_for_id(id))
                .collect()
        })
    }

    fn config(&self) -> Result<SubjectConfig> {
        self.liveness.check()?;
        self.store.config()
    }

    fn integral_keys(&self) -> bool {
        self.id_scheme.is_integral()
    }
}
