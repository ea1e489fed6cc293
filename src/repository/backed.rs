//! Repository over a storage backend

use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};

use super::{RepoStatus, Repository, SubjectCache};
use crate::backend::Backend;
use crate::error::{RepoError, Result};
use crate::subject::{validate_subject_name, Subject};
use crate::subject_config::SubjectConfig;
use crate::validation::{ValidatingSubject, ValidatorFactory};

/// Repository over a [`Backend`].
///
/// Subjects are created under a repository-wide mutex and cached forever;
/// every subject handed out is wrapped in a [`ValidatingSubject`].
pub struct BackendRepository<B> {
    backend: B,
    factory: Arc<ValidatorFactory>,
    cache: SubjectCache,
    creation: Mutex<()>,
    opened_at: DateTime<Utc>,
}

impl<B: Backend> BackendRepository<B> {
    pub fn new(backend: B, factory: Arc<ValidatorFactory>) -> Self {
        tracing::info!(kind = backend.kind(), factory = ?factory, "repository ready");
        Self {
            backend,
            factory,
            cache: SubjectCache::new(),
            creation: Mutex::new(()),
            opened_at: Utc::now(),
        }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn factory(&self) -> &Arc<ValidatorFactory> {
        &self.factory
    }

    /// Open, wrap and cache an existing subject; caller holds the creation mutex
    fn cache_subject(&self, name: &str) -> Result<Arc<dyn Subject>> {
        let raw = self.backend.open_subject(name)?;
        self.cache
            .add(ValidatingSubject::wrap(raw, Arc::clone(&self.factory)))
    }

    fn creation_guard(&self) -> Result<std::sync::MutexGuard<'_, ()>> {
        self.creation
            .lock()
            .map_err(|_| RepoError::unavailable("subject creation lock poisoned"))
    }
}

impl<B: Backend> Repository for BackendRepository<B> {
    fn register(&self, name: &str, config: Option<&SubjectConfig>) -> Result<Arc<dyn Subject>> {
        validate_subject_name(name)?;
        self.backend.check_usable()?;
        if let Some(subject) = self.cache.get(name)? {
            tracing::debug!(subject = %name, "subject already cached, config ignored");
            return Ok(subject);
        }

        let _guard = self.creation_guard()?;
        if let Some(subject) = self.cache.get(name)? {
            return Ok(subject);
        }
        let config = config.cloned().unwrap_or_default();
        self.backend.create_subject(name, &config)?;
        self.cache_subject(name)
    }

    fn lookup(&self, name: &str) -> Result<Option<Arc<dyn Subject>>> {
        self.backend.check_usable()?;
        if let Some(subject) = self.cache.get(name)? {
            return Ok(Some(subject));
        }
        if !self.backend.subject_exists(name)? {
            return Ok(None);
        }

        let _guard = self.creation_guard()?;
        match self.cache.get(name)? {
            Some(subject) => Ok(Some(subject)),
            None => self.cache_subject(name).map(Some),
        }
    }

    fn subjects(&self) -> Result<Vec<Arc<dyn Subject>>> {
        self.backend.check_usable()?;
        let names = match self.backend.subject_names()? {
            Some(names) => names,
            None => return self.cache.values(),
        };

        let _guard = self.creation_guard()?;
        let mut subjects = Vec::with_capacity(names.len());
        for name in names {
            let subject = match self.cache.get(&name)? {
                Some(subject) => subject,
                None => {
                    tracing::debug!(subject = %name, "discovered subject in backend");
                    self.cache_subject(&name)?
                }
            };
            subjects.push(subject);
        }
        subjects.sort_by(|a, b| a.name().cmp(b.name()));
        Ok(subjects)
    }

    fn status(&self) -> RepoStatus {
        RepoStatus {
            kind: self.backend.kind().to_string(),
            open: self.backend.check_usable().is_ok(),
            cached_subjects: self.cache.len(),
            opened_at: self.opened_at,
            details: self.backend.describe(),
        }
    }

    fn close(&self) -> Result<()> {
        self.backend.close()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{FileBackend, MemoryBackend, SubjectOptions};
    use crate::validation::REJECT_VALIDATOR;
    use tempfile::TempDir;

    fn memory() -> BackendRepository<MemoryBackend> {
        BackendRepository::new(MemoryBackend::new(), Arc::new(ValidatorFactory::empty()))
    }

    #[test]
    fn test_register_returns_cached_subject_and_ignores_new_config() {
        let repo = memory();
        let first = repo.register("sub", None).unwrap();
        first.register("a").unwrap();

        let rejecting = SubjectConfig::builder().add_validator(REJECT_VALIDATOR).build();
        let again = repo.register("sub", Some(&rejecting)).unwrap();
        assert!(Arc::ptr_eq(&first, &again));
        assert_eq!(again.config().unwrap(), SubjectConfig::empty());
        assert_eq!(again.register("b").unwrap().id(), "1");
    }

    #[test]
    fn test_lookup_and_subjects() {
        let repo = memory();
        assert!(repo.lookup("sub").unwrap().is_none());
        repo.register("b", None).unwrap();
        repo.register("a", None).unwrap();
        assert_eq!(repo.lookup("a").unwrap().unwrap().name(), "a");
        let names: Vec<_> = repo
            .subjects()
            .unwrap()
            .iter()
            .map(|s| s.name().to_string())
            .collect();
        assert_eq!(names, vec!["a", "b"]);
    }

    #[test]
    fn test_subjects_discovers_backend_state() {
        let dir = TempDir::new().unwrap();
        {
            let backend = FileBackend::open(dir.path(), SubjectOptions::default()).unwrap();
            backend.create_subject("made-elsewhere", &SubjectConfig::empty()).unwrap();
        }

        let backend = FileBackend::open(dir.path(), SubjectOptions::default()).unwrap();
        let repo = BackendRepository::new(backend, Arc::new(ValidatorFactory::empty()));
        assert_eq!(repo.status().cached_subjects, 0);
        let subjects = repo.subjects().unwrap();
        assert_eq!(subjects.len(), 1);
        assert_eq!(subjects[0].name(), "made-elsewhere");
        assert_eq!(repo.status().cached_subjects, 1);
    }

    #[test]
    fn test_validators_apply_to_handed_out_subjects() {
        let repo = memory();
        let config = SubjectConfig::builder().add_validator(REJECT_VALIDATOR).build();
        let subject = repo.register("locked", Some(&config)).unwrap();
        assert!(matches!(subject.register("a"), Err(RepoError::Validation(_))));
        assert!(subject.all_entries().unwrap().is_empty());
    }

    #[test]
    fn test_invalid_name() {
        let repo = memory();
        assert!(matches!(
            repo.register("", None),
            Err(RepoError::InvalidSubjectName(_))
        ));
    }

    #[test]
    fn test_close() {
        let repo = memory();
        let subject = repo.register("sub", None).unwrap();
        assert!(repo.status().open);
        repo.close().unwrap();
        repo.close().unwrap();
        assert!(!repo.status().open);
        assert!(matches!(repo.register("other", None), Err(RepoError::Closed)));
        assert!(matches!(repo.lookup("sub"), Err(RepoError::Closed)));
        assert!(matches!(repo.subjects(), Err(RepoError::Closed)));
        assert!(matches!(subject.lookup_by_id("0"), Err(RepoError::Closed)));
        assert!(matches!(subject.register("a"), Err(RepoError::Closed)));
    }
}
