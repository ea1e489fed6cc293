//! Per-subject configuration
//!
//! A [`SubjectConfig`] is an immutable string map with one derived view: the
//! set of validator names parsed from [`VALIDATORS_KEY`]. Keys starting with
//! [`RESERVED_PREFIX`] belong to the repository and cannot be set by callers,
//! except for the validators key itself.

use std::collections::{BTreeMap, BTreeSet};

use crate::error::{RepoError, Result};

/// Prefix of keys owned by the repository
pub const RESERVED_PREFIX: &str = "schema-repo.";

/// Prefix of validator names and validator-related keys
pub const VALIDATOR_PREFIX: &str = "schema-repo.validator.";

/// Key listing the subject's validators, comma separated
pub const VALIDATORS_KEY: &str = "schema-repo.validator.validators";

/// Immutable subject configuration.
///
/// Equality covers both the map and the validator set. A config whose
/// validators were explicitly set to nothing carries [`VALIDATORS_KEY`] with
/// an empty value, so it is *not* equal to a config that never mentioned
/// validators: the former opts out of the repository's default validators,
/// the latter inherits them.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct SubjectConfig {
    conf: BTreeMap<String, String>,
    validators: BTreeSet<String>,
}

impl SubjectConfig {
    pub fn builder() -> SubjectConfigBuilder {
        SubjectConfigBuilder::default()
    }

    /// A config with no entries and no validator opinion
    pub fn empty() -> Self {
        Self::default()
    }

    /// Rebuild a config from a stored map, applying the same key rules as the builder
    pub fn from_map<I, K, V>(map: I) -> Result<Self>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let mut builder = Self::builder();
        for (k, v) in map {
            builder = builder.set(k.as_ref(), v.as_ref())?;
        }
        Ok(builder.build())
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.conf.get(key).map(String::as_str)
    }

    pub fn validators(&self) -> &BTreeSet<String> {
        &self.validators
    }

    /// Whether the validators key was set at all, even to an empty list
    pub fn has_explicit_validators(&self) -> bool {
        self.conf.contains_key(VALIDATORS_KEY)
    }

    pub fn as_map(&self) -> &BTreeMap<String, String> {
        &self.conf
    }
}

/// Builder for [`SubjectConfig`]
#[derive(Debug, Default)]
pub struct SubjectConfigBuilder {
    conf: BTreeMap<String, String>,
    validators: BTreeSet<String>,
}

impl SubjectConfigBuilder {
    /// Set a single key. Reserved keys other than [`VALIDATORS_KEY`] are rejected.
    pub fn set(self, key: &str, value: &str) -> Result<Self> {
        if key.starts_with(RESERVED_PREFIX) {
            if key == VALIDATORS_KEY {
                return Ok(self.set_validators_str(Some(value)));
            }
            return Err(RepoError::ReservedKey {
                prefix: RESERVED_PREFIX.to_string(),
                key: key.to_string(),
            });
        }
        let mut this = self;
        this.conf.insert(key.to_string(), value.to_string());
        Ok(this)
    }

    pub fn set_all<'a, I>(self, entries: I) -> Result<Self>
    where
        I: IntoIterator<Item = (&'a String, &'a String)>,
    {
        entries
            .into_iter()
            .try_fold(self, |builder, (k, v)| builder.set(k, v))
    }

    /// Replace the validator set. The key is recorded even for an empty list,
    /// which means "no validators" rather than "use the defaults".
    pub fn set_validators<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.validators = names.into_iter().map(Into::into).collect();
        self.conf
            .insert(VALIDATORS_KEY.to_string(), comma_join(&self.validators));
        self
    }

    /// Parse a comma separated validator list; `None` behaves like an empty list
    pub fn set_validators_str(self, names: Option<&str>) -> Self {
        self.set_validators(comma_split(names.unwrap_or("")))
    }

    pub fn add_validator(mut self, name: impl Into<String>) -> Self {
        self.validators.insert(name.into());
        self.conf
            .insert(VALIDATORS_KEY.to_string(), comma_join(&self.validators));
        self
    }

    pub fn build(self) -> SubjectConfig {
        SubjectConfig {
            conf: self.conf,
            validators: self.validators,
        }
    }
}

/// Split on commas, trimming whitespace and dropping empty segments
pub fn comma_split(s: &str) -> Vec<String> {
    s.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

pub fn comma_join<I, S>(items: I) -> String
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    items
        .into_iter()
        .map(|s| s.as_ref().to_string())
        .collect::<Vec<_>>()
        .join(",")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder() {
        let conf = SubjectConfig::empty();
        assert!(conf.validators().is_empty());

        let custom = SubjectConfig::builder()
            .set("k", "v")
            .unwrap()
            .set(VALIDATORS_KEY, "valid1, valid2 ,,")
            .unwrap()
            .add_validator("oneMore")
            .build();

        assert_eq!(custom.get("k"), Some("v"));
        let validators = custom.validators();
        assert_eq!(validators.len(), 3);
        assert!(validators.contains("valid1"));
        assert!(validators.contains("valid2"));
        assert!(validators.contains("oneMore"));
        assert_eq!(custom.get(VALIDATORS_KEY), Some("oneMore,valid1,valid2"));
    }

    #[test]
    fn test_explicit_empty_validators_differs_from_absent() {
        let empty = SubjectConfig::empty();
        let built = SubjectConfig::builder().build();
        assert_eq!(empty, built);

        let explicit = SubjectConfig::builder().set_validators_str(None).build();
        assert!(explicit.validators().is_empty());
        assert!(explicit.has_explicit_validators());
        assert!(!built.has_explicit_validators());
        assert_ne!(built, explicit);
        assert_ne!(explicit, empty);
    }

    #[test]
    fn test_roundtrip_through_map() {
        let custom = SubjectConfig::builder().set("key", "val").unwrap().build();
        let copy = SubjectConfig::from_map(custom.as_map()).unwrap();
        assert_eq!(custom, copy);

        let with_validator = SubjectConfig::builder()
            .set_all(custom.as_map())
            .unwrap()
            .add_validator("foo")
            .build();
        assert_ne!(custom, with_validator);
        assert_eq!(SubjectConfig::from_map(with_validator.as_map()).unwrap(), with_validator);
    }

    #[test]
    fn test_reserved_key_rejected() {
        let err = SubjectConfig::builder()
            .set("schema-repo.notValid", "")
            .unwrap_err();
        assert!(matches!(err, RepoError::ReservedKey { .. }));
    }

    #[test]
    fn test_comma_helpers() {
        assert_eq!(comma_split(" a, ,b ,"), vec!["a", "b"]);
        assert!(comma_split("").is_empty());
        assert_eq!(comma_join(["a", "b"]), "a,b");
        assert_eq!(comma_join(Vec::<String>::new()), "");
    }
}
