//! In-memory backend; nothing survives the process

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, RwLock};

use super::{Backend, SubjectOptions};
use crate::entry::SchemaEntry;
use crate::error::{RepoError, Result};
use crate::subject::{validate_subject_name, Liveness, StoredSubject, Subject, SubjectStore};
use crate::subject_config::SubjectConfig;

struct MemoryStore {
    entries: RwLock<Vec<SchemaEntry>>,
    config: SubjectConfig,
}

impl MemoryStore {
    fn poisoned() -> RepoError {
        RepoError::unavailable("memory subject poisoned")
    }
}

impl SubjectStore for MemoryStore {
    fn ids(&self) -> Result<Vec<String>> {
        let entries = self.entries.read().map_err(|_| Self::poisoned())?;
        Ok(entries.iter().map(|e| e.id().to_string()).collect())
    }

    fn read_schema(&self, id: &str) -> Result<Option<String>> {
        let entries = self.entries.read().map_err(|_| Self::poisoned())?;
        Ok(entries
            .iter()
            .find(|e| e.id() == id)
            .map(|e| e.schema().to_string()))
    }

    fn append(&self, entry: &SchemaEntry) -> Result<()> {
        self.entries
            .write()
            .map_err(|_| Self::poisoned())?
            .push(entry.clone());
        Ok(())
    }

    fn config(&self) -> Result<SubjectConfig> {
        Ok(self.config.clone())
    }
}

/// Keeps every subject in process memory
#[derive(Default)]
pub struct MemoryBackend {
    subjects: RwLock<HashMap<String, Arc<dyn Subject>>>,
    options: SubjectOptions,
    liveness: Liveness,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_options(options: SubjectOptions) -> Self {
        Self {
            options,
            ..Self::default()
        }
    }

    fn poisoned() -> RepoError {
        RepoError::unavailable("memory backend poisoned")
    }
}

impl Backend for MemoryBackend {
    fn kind(&self) -> &'static str {
        "memory"
    }

    fn create_subject(&self, name: &str, config: &SubjectConfig) -> Result<()> {
        validate_subject_name(name)?;
        self.check_usable()?;
        let mut subjects = self.subjects.write().map_err(|_| Self::poisoned())?;
        if subjects.contains_key(name) {
            return Ok(());
        }
        let store = MemoryStore {
            entries: RwLock::new(Vec::new()),
            config: config.clone(),
        };
        let subject = StoredSubject::new(
            name,
            store,
            self.options.lock(),
            self.options.id_scheme,
            self.liveness.clone(),
        );
        subjects.insert(name.to_string(), Arc::new(subject));
        tracing::info!(subject = %name, "created subject in memory");
        Ok(())
    }

    fn subject_exists(&self, name: &str) -> Result<bool> {
        self.check_usable()?;
        Ok(self
            .subjects
            .read()
            .map_err(|_| Self::poisoned())?
            .contains_key(name))
    }

    fn subject_names(&self) -> Result<Option<Vec<String>>> {
        self.check_usable()?;
        Ok(None)
    }

    fn open_subject(&self, name: &str) -> Result<Arc<dyn Subject>> {
        self.check_usable()?;
        self.subjects
            .read()
            .map_err(|_| Self::poisoned())?
            .get(name)
            .cloned()
            .ok_or_else(|| RepoError::unavailable(format!("subject {} does not exist", name)))
    }

    fn check_usable(&self) -> Result<()> {
        self.liveness.check()
    }

    fn close(&self) -> Result<()> {
        if self.liveness.close() {
            tracing::info!("closed memory backend");
        }
        Ok(())
    }

    fn describe(&self) -> BTreeMap<String, String> {
        let mut details = BTreeMap::new();
        self.options.describe_into(&mut details);
        if let Ok(subjects) = self.subjects.read() {
            details.insert("subjects".to_string(), subjects.len().to_string());
        }
        details
    }
}
