//! Storage backends
//!
//! A [`Backend`] creates, finds and lists subjects and hands out the raw
//! [`Subject`]s that [`crate::repository`] wraps with validation. Which bytes
//! land where is up to each backend; the contract is the same for all of them.

pub mod file;
pub mod memory;

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use crate::error::Result;
use crate::lock::InProcessLock;
use crate::subject::{IdScheme, Subject};
use crate::subject_config::SubjectConfig;

pub use file::FileBackend;
pub use memory::MemoryBackend;

/// Durable home of subjects
pub trait Backend: Send + Sync {
    /// Short name shown in status output, e.g. `memory`
    fn kind(&self) -> &'static str;

    /// Create the subject's durable state. Safe to race: when the subject
    /// already exists this succeeds and leaves the stored config alone.
    fn create_subject(&self, name: &str, config: &SubjectConfig) -> Result<()>;

    fn subject_exists(&self, name: &str) -> Result<bool>;

    /// Names of all stored subjects, or `None` when the repository's own
    /// cache is authoritative for this backend
    fn subject_names(&self) -> Result<Option<Vec<String>>>;

    /// Raw (unvalidated) access to an existing subject
    fn open_subject(&self, name: &str) -> Result<Arc<dyn Subject>>;

    /// Fail fast when the backend is closed or gone
    fn check_usable(&self) -> Result<()>;

    /// Release backend resources; calling it again is a no-op
    fn close(&self) -> Result<()>;

    /// Key/value details for status output
    fn describe(&self) -> BTreeMap<String, String>;
}

/// Settings shared by every subject a backend hands out
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SubjectOptions {
    pub id_scheme: IdScheme,
    pub lock_timeout: Option<Duration>,
}

impl SubjectOptions {
    pub fn new(id_scheme: IdScheme, lock_timeout: Option<Duration>) -> Self {
        Self {
            id_scheme,
            lock_timeout,
        }
    }

    pub(crate) fn lock(&self) -> Arc<InProcessLock> {
        Arc::new(InProcessLock::with_timeout(self.lock_timeout))
    }

    pub(crate) fn describe_into(&self, details: &mut BTreeMap<String, String>) {
        let scheme = match self.id_scheme {
            IdScheme::Integral => "integral",
            IdScheme::Fingerprint => "fingerprint",
        };
        details.insert("id_scheme".to_string(), scheme.to_string());
        if let Some(timeout) = self.lock_timeout {
            details.insert(
                "lock_timeout_ms".to_string(),
                timeout.as_millis().to_string(),
            );
        }
    }
}
