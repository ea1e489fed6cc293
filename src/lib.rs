//! Schema Repository
//!
//! Assigns stable ids to schema documents grouped under named subjects,
//! validates new versions against configurable compatibility rules, and
//! serves lookups by id, by schema text and "latest".
//!
//! ## Features
//!
//! - **Idempotent Registration**: registering known schema text returns its original id
//! - **Linearizable Subjects**: one writer at a time per subject, ids never reused
//! - **Pluggable Validation**: named validators composed from a base read check (Avro built in)
//! - **Optimistic Concurrency**: `register_if_latest` writes only over an expected latest entry
//! - **Swappable Backends**: in-memory or directory-per-subject storage, with a read-through cache
//!
//! ## Architecture
//!
//! ```text
//! Repository (cache layer, optional)
//! └── BackendRepository ── creates and caches subjects
//!     ├── ValidatingSubject ── runs validators before writes
//!     │   └── StoredSubject ── id assignment, latest, idempotence
//!     │       └── SubjectStore (memory | file)
//!     └── Backend (memory | file)
//! ```

pub mod backend;
pub mod checksum;
pub mod config;
pub mod entry;
pub mod error;
pub mod lock;
pub mod render;
pub mod repository;
pub mod subject;
pub mod subject_config;
pub mod validation;

pub use backend::{Backend, FileBackend, MemoryBackend, SubjectOptions};
pub use checksum::Checksum;
pub use config::{BackendKind, RepoConfig};
pub use entry::SchemaEntry;
pub use error::{RepoError, Result, ValidationError};
pub use lock::{CriticalSection, InProcessLock};
pub use repository::{BackendRepository, CachingRepository, RepoStatus, Repository};
pub use subject::{validate_subject_name, IdScheme, Subject};
pub use subject_config::{SubjectConfig, VALIDATORS_KEY};
pub use validation::{ValidatingSubject, ValidatorFactory, REJECT_VALIDATOR};
