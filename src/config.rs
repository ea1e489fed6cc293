//! Configuration management for the schema repository
//!
//! Supports loading configuration from:
//! - Default values
//! - Config file (schema-repo.toml)
//! - Environment variables (SCHEMA_REPO__*)
//!
//! ## Example config file (schema-repo.toml):
//! ```toml
//! [backend]
//! kind = "file"
//! path = "./schema-repo-data"
//! id_scheme = "integral"
//! lock_timeout_ms = 5000
//!
//! [cache]
//! enabled = true
//!
//! [validation]
//! can_read_strategy = "avro"
//! default_validators = "backward"
//! strict_validator_names = false
//!
//! [validation.validators]
//! backward = "all:can-read"
//! forward = "latest:can-be-read"
//! ```

use config_crate::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use crate::backend::{FileBackend, MemoryBackend, SubjectOptions};
use crate::error::{RepoError, Result};
use crate::repository::{BackendRepository, CachingRepository, Repository};
use crate::subject::IdScheme;
use crate::validation::ValidatorFactory;

/// Main configuration for the schema repository
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RepoConfig {
    /// Storage settings
    #[serde(default)]
    pub backend: BackendConfig,

    /// Read-through cache settings
    #[serde(default)]
    pub cache: CacheConfig,

    /// Validator registry settings
    #[serde(default)]
    pub validation: ValidationConfig,
}

/// Which backend stores subjects
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    #[default]
    Memory,
    File,
}

/// Backend configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackendConfig {
    #[serde(default)]
    pub kind: BackendKind,

    /// Root directory of the file backend
    #[serde(default = "default_backend_path")]
    pub path: PathBuf,

    #[serde(default)]
    pub id_scheme: IdScheme,

    /// Give up waiting for a subject lock after this long; unset waits forever
    #[serde(default)]
    pub lock_timeout_ms: Option<u64>,
}

/// Cache configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
}

/// Validation configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationConfig {
    /// Validator name to `<all|latest>:<can-read|can-be-read|mutual-read>`
    #[serde(default)]
    pub validators: BTreeMap<String, String>,

    /// Comma separated validator names applied to subjects that do not name their own
    #[serde(default)]
    pub default_validators: String,

    /// Base read check behind every validator: `avro` or `always-fail`
    #[serde(default = "default_can_read_strategy")]
    pub can_read_strategy: String,

    /// Fail on unknown validator names instead of skipping them
    #[serde(default)]
    pub strict_validator_names: bool,
}

// Default value functions
fn default_backend_path() -> PathBuf {
    PathBuf::from("schema-repo-data")
}

fn default_true() -> bool {
    true
}

fn default_can_read_strategy() -> String {
    "always-fail".to_string()
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            kind: BackendKind::Memory,
            path: default_backend_path(),
            id_scheme: IdScheme::Integral,
            lock_timeout_ms: None,
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            validators: BTreeMap::new(),
            default_validators: String::new(),
            can_read_strategy: default_can_read_strategy(),
            strict_validator_names: false,
        }
    }
}

impl BackendConfig {
    pub fn subject_options(&self) -> SubjectOptions {
        SubjectOptions::new(self.id_scheme, self.lock_timeout_ms.map(Duration::from_millis))
    }
}

impl RepoConfig {
    /// Load configuration from default locations
    pub fn load() -> Result<Self> {
        Self::load_from(None)
    }

    /// Load configuration, adding a required file at `config_path`
    pub fn load_from(config_path: Option<&Path>) -> Result<Self> {
        let mut builder = Config::builder();

        // Load from default locations
        let config_locations = [
            "schema-repo.toml",
            ".schema-repo.toml",
            "config/schema-repo.toml",
        ];

        for location in config_locations {
            builder = builder.add_source(File::with_name(location).required(false));
        }

        // Load from XDG config directory
        if let Some(config_dir) = directories::ProjectDirs::from("org", "schema-repo", "schema-repo") {
            let xdg_config = config_dir.config_dir().join("schema-repo.toml");
            if xdg_config.exists() {
                builder = builder.add_source(File::from(xdg_config).required(false));
            }
        }

        // Load from specified path
        if let Some(path) = config_path {
            builder = builder.add_source(File::from(path).required(true));
        }

        // Load from environment variables (SCHEMA_REPO__BACKEND__KIND=file)
        builder = builder.add_source(
            Environment::with_prefix("SCHEMA_REPO")
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        );

        let config = builder.build()?;
        Ok(config.try_deserialize()?)
    }

    /// Parse a config from TOML text, without consulting any other source
    pub fn from_toml(text: &str) -> Result<Self> {
        toml::from_str(text).map_err(|e| RepoError::InvalidConfig(e.to_string()))
    }

    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| RepoError::InvalidConfig(e.to_string()))
    }

    /// Save configuration to a file
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        std::fs::write(path, self.to_toml()?)?;
        Ok(())
    }

    /// Get the file backend path (resolves relative paths)
    pub fn backend_path(&self) -> PathBuf {
        if self.backend.path.is_absolute() {
            self.backend.path.clone()
        } else {
            std::env::current_dir()
                .unwrap_or_default()
                .join(&self.backend.path)
        }
    }

    /// Build the validator factory, the backend and, if enabled, the cache layer
    pub fn open_repository(&self) -> Result<Arc<dyn Repository>> {
        let factory = Arc::new(ValidatorFactory::from_config(&self.validation)?);
        let options = self.backend.subject_options();

        let repository: Arc<dyn Repository> = match self.backend.kind {
            BackendKind::Memory => Arc::new(BackendRepository::new(
                MemoryBackend::with_options(options),
                factory,
            )),
            BackendKind::File => Arc::new(BackendRepository::new(
                FileBackend::open(self.backend_path(), options)?,
                factory,
            )),
        };

        if self.cache.enabled {
            Ok(Arc::new(CachingRepository::new(repository)))
        } else {
            Ok(repository)
        }
    }
}
