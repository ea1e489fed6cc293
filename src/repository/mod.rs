//! Repositories: the entry point for subject creation and lookup
//!
//! [`BackendRepository`] mediates between callers and a [`crate::backend::Backend`],
//! handing out validated subjects. [`CachingRepository`] layers a read-through
//! cache over any repository.

mod backed;
mod cache;

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{RepoError, Result};
use crate::subject::Subject;
use crate::subject_config::SubjectConfig;

pub use backed::BackendRepository;
pub use cache::{CachingRepository, CachingSubject};

/// A collection of subjects
pub trait Repository: Send + Sync {
    /// Return the subject called `name`, creating it with `config` if it does
    /// not exist. The config of an existing subject is left as it is.
    fn register(&self, name: &str, config: Option<&SubjectConfig>) -> Result<Arc<dyn Subject>>;

    fn lookup(&self, name: &str) -> Result<Option<Arc<dyn Subject>>>;

    /// All subjects, sorted by name
    fn subjects(&self) -> Result<Vec<Arc<dyn Subject>>>;

    fn status(&self) -> RepoStatus;

    /// Release resources. Every later call on the repository or on a subject
    /// it handed out fails with [`RepoError::Closed`]. Closing twice is fine.
    fn close(&self) -> Result<()>;
}

impl std::fmt::Debug for dyn Repository {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("Repository").field(&self.status()).finish()
    }
}

/// Snapshot of a repository's state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RepoStatus {
    pub kind: String,
    pub open: bool,
    pub cached_subjects: usize,
    pub opened_at: DateTime<Utc>,
    #[serde(default)]
    pub details: BTreeMap<String, String>,
}

impl std::fmt::Display for RepoStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = if self.open { "OK" } else { "CLOSED" };
        write!(f, "{} {} since {}", state, self.kind, self.opened_at.to_rfc3339())?;
        for (key, value) in &self.details {
            write!(f, "\n  {}: {}", key, value)?;
        }
        Ok(())
    }
}

/// Name to subject map that only grows; the first insert of a name wins
#[derive(Default)]
pub struct SubjectCache {
    subjects: RwLock<HashMap<String, Arc<dyn Subject>>>,
}

impl SubjectCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn poisoned() -> RepoError {
        RepoError::unavailable("subject cache poisoned")
    }

    pub fn get(&self, name: &str) -> Result<Option<Arc<dyn Subject>>> {
        Ok(self
            .subjects
            .read()
            .map_err(|_| Self::poisoned())?
            .get(name)
            .cloned())
    }

    /// Insert `subject` unless its name is taken; returns whichever is cached
    pub fn add(&self, subject: Arc<dyn Subject>) -> Result<Arc<dyn Subject>> {
        let mut subjects = self.subjects.write().map_err(|_| Self::poisoned())?;
        Ok(Arc::clone(
            subjects
                .entry(subject.name().to_string())
                .or_insert(subject),
        ))
    }

    /// Cached subjects sorted by name
    pub fn values(&self) -> Result<Vec<Arc<dyn Subject>>> {
        let subjects = self.subjects.read().map_err(|_| Self::poisoned())?;
        let mut values: Vec<_> = subjects.values().cloned().collect();
        values.sort_by(|a, b| a.name().cmp(b.name()));
        Ok(values)
    }

    pub fn len(&self) -> usize {
        self.subjects.read().map(|s| s.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
