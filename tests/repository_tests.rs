//! Repository Contract Tests
//!
//! Every repository flavour (memory, file, and both behind the cache layer)
//! must honour the same registration and lookup contract.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{mpsc, Arc, Mutex};
use std::thread;

use schema_repo::backend::{Backend, FileBackend, MemoryBackend, SubjectOptions};
use schema_repo::config::BackendKind;
use schema_repo::lock::InProcessLock;
use schema_repo::render;
use schema_repo::subject::{Liveness, StoredSubject, Subject, SubjectStore};
use schema_repo::{
    BackendRepository, CachingRepository, RepoConfig, RepoError, Repository, SchemaEntry,
    SubjectConfig, ValidatorFactory, REJECT_VALIDATOR,
};
use tempfile::TempDir;

const SUB1_V1: &str = r#"{"type":"record","name":"sub1","fields":[{"name":"someId","type":"long"}]}"#;
const SUB1_V2: &str = r#"{"type":"record","name":"sub1","fields":[{"name":"someId","type":"long"},{"name":"note","type":["null","string"],"default":null}]}"#;
const SUB1_V3: &str = r#"{"type":"record","name":"sub1","fields":[{"name":"someId","type":"long"},{"name":"count","type":"int"}]}"#;

/// A repository plus whatever has to outlive it
struct Fixture {
    name: &'static str,
    repo: Arc<dyn Repository>,
    _dir: Option<TempDir>,
}

fn factory() -> Arc<ValidatorFactory> {
    Arc::new(ValidatorFactory::empty())
}

fn memory() -> Fixture {
    Fixture {
        name: "memory",
        repo: Arc::new(BackendRepository::new(MemoryBackend::new(), factory())),
        _dir: None,
    }
}

fn file() -> Fixture {
    let dir = TempDir::new().unwrap();
    let backend = FileBackend::open(dir.path(), SubjectOptions::default()).unwrap();
    Fixture {
        name: "file",
        repo: Arc::new(BackendRepository::new(backend, factory())),
        _dir: Some(dir),
    }
}

fn cached(inner: Fixture, name: &'static str) -> Fixture {
    Fixture {
        name,
        repo: Arc::new(CachingRepository::new(inner.repo)),
        _dir: inner._dir,
    }
}

fn all_fixtures() -> Vec<Fixture> {
    vec![
        memory(),
        file(),
        cached(memory(), "cached memory"),
        cached(file(), "cached file"),
    ]
}

fn ids(entries: &[SchemaEntry]) -> Vec<&str> {
    entries.iter().map(|e| e.id()).collect()
}

// =============================================================================
// Shared Contract
// =============================================================================

#[test]
fn test_register_is_idempotent() {
    for f in all_fixtures() {
        let subject = f.repo.register("sub", None).unwrap();
        let first = subject.register("schemaA").unwrap();
        let again = subject.register("schemaA").unwrap();
        assert_eq!(first, again, "{}", f.name);
        assert_eq!(subject.all_entries().unwrap().len(), 1, "{}", f.name);
    }
}

#[test]
fn test_latest_follows_registration() {
    for f in all_fixtures() {
        let subject = f.repo.register("sub", None).unwrap();
        assert_eq!(subject.latest().unwrap(), None, "{}", f.name);
        let a = subject.register("schemaA").unwrap();
        let b = subject.register("schemaB").unwrap();
        let latest = subject.latest().unwrap().unwrap();
        assert_eq!(latest.schema(), "schemaB", "{}", f.name);
        assert_ne!(latest, a, "{}", f.name);
        assert_eq!(latest, b, "{}", f.name);
        assert_eq!(ids(&subject.all_entries().unwrap()), vec!["1", "0"], "{}", f.name);
    }
}

#[test]
fn test_lookup_round_trip() {
    for f in all_fixtures() {
        let subject = f.repo.register("sub", None).unwrap();
        let registered: Vec<_> = ["a", "b", "line one\nline two"]
            .iter()
            .map(|s| subject.register(s).unwrap())
            .collect();
        for entry in &registered {
            let by_id = subject.lookup_by_id(entry.id()).unwrap().unwrap();
            assert_eq!(by_id.schema(), entry.schema(), "{}", f.name);
            let by_schema = subject.lookup_by_schema(entry.schema()).unwrap().unwrap();
            assert_eq!(by_schema.id(), entry.id(), "{}", f.name);
        }
        assert_eq!(subject.lookup_by_id("42").unwrap(), None, "{}", f.name);
        assert_eq!(subject.lookup_by_schema("nope").unwrap(), None, "{}", f.name);
    }
}

#[test]
fn test_validation_gate() {
    for f in all_fixtures() {
        let config = SubjectConfig::builder().add_validator(REJECT_VALIDATOR).build();
        let subject = f.repo.register("locked", Some(&config)).unwrap();
        for schema in ["a", "b", "a"] {
            assert!(
                matches!(subject.register(schema), Err(RepoError::Validation(_))),
                "{}",
                f.name
            );
        }
        assert!(subject.all_entries().unwrap().is_empty(), "{}", f.name);
        assert_eq!(subject.config().unwrap(), config, "{}", f.name);
    }
}

#[test]
fn test_optimistic_concurrency() {
    for f in all_fixtures() {
        let subject = f.repo.register("sub", None).unwrap();
        let e1 = subject.register("schemaA").unwrap();
        let c = subject.register_if_latest("schemaC", Some(&e1)).unwrap().unwrap();
        assert_eq!(subject.latest().unwrap(), Some(c.clone()), "{}", f.name);

        assert!(subject.register_if_latest("schemaD", Some(&e1)).unwrap().is_none(), "{}", f.name);
        assert_eq!(subject.latest().unwrap(), Some(c), "{}", f.name);
        assert_eq!(subject.lookup_by_schema("schemaD").unwrap(), None, "{}", f.name);
        assert!(subject.register_if_latest("schemaE", None).unwrap().is_none(), "{}", f.name);
    }
}

#[test]
fn test_first_config_wins() {
    for f in all_fixtures() {
        let first = SubjectConfig::builder().set("owner", "a").unwrap().build();
        let second = SubjectConfig::builder().set("owner", "b").unwrap().build();
        f.repo.register("sub", Some(&first)).unwrap();
        let subject = f.repo.register("sub", Some(&second)).unwrap();
        assert_eq!(subject.config().unwrap().get("owner"), Some("a"), "{}", f.name);
    }
}

#[test]
fn test_lookup_and_subjects() {
    for f in all_fixtures() {
        assert!(f.repo.lookup("missing").unwrap().is_none(), "{}", f.name);
        for name in ["zulu", "alpha", "mike"] {
            f.repo.register(name, None).unwrap();
        }
        let names: Vec<_> = f
            .repo
            .subjects()
            .unwrap()
            .iter()
            .map(|s| s.name().to_string())
            .collect();
        assert_eq!(names, vec!["alpha", "mike", "zulu"], "{}", f.name);
        assert_eq!(f.repo.lookup("mike").unwrap().unwrap().name(), "mike");
    }
}

#[test]
fn test_close() {
    for f in all_fixtures() {
        let subject = f.repo.register("sub", None).unwrap();
        subject.register("a").unwrap();
        f.repo.close().unwrap();
        f.repo.close().unwrap();

        assert!(!f.repo.status().open, "{}", f.name);
        assert!(matches!(f.repo.register("sub", None), Err(RepoError::Closed)), "{}", f.name);
        assert!(matches!(f.repo.lookup("sub"), Err(RepoError::Closed)), "{}", f.name);
        assert!(matches!(f.repo.subjects(), Err(RepoError::Closed)), "{}", f.name);
        assert!(matches!(subject.lookup_by_id("0"), Err(RepoError::Closed)), "{}", f.name);
        assert!(matches!(subject.latest(), Err(RepoError::Closed)), "{}", f.name);
        assert!(matches!(subject.register("b"), Err(RepoError::Closed)), "{}", f.name);
    }
}

#[test]
fn test_concurrent_registration() {
    for f in all_fixtures() {
        let handles: Vec<_> = (0..8)
            .map(|t| {
                let repo = Arc::clone(&f.repo);
                thread::spawn(move || {
                    let subject = repo.register("shared", None).unwrap();
                    (0..20)
                        .map(|i| subject.register(&format!("schema-{}", (t * 3 + i) % 30)).unwrap())
                        .collect::<Vec<_>>()
                })
            })
            .collect();

        let mut by_schema: HashMap<String, String> = HashMap::new();
        for handle in handles {
            for entry in handle.join().unwrap() {
                let (id, schema) = entry.into_parts();
                let seen = by_schema.entry(schema).or_insert_with(|| id.clone());
                assert_eq!(*seen, id, "{}", f.name);
            }
        }

        let entries = f.repo.lookup("shared").unwrap().unwrap().all_entries().unwrap();
        assert_eq!(entries.len(), by_schema.len(), "{}", f.name);
        let unique: HashSet<_> = entries.iter().map(|e| e.id()).collect();
        assert_eq!(unique.len(), entries.len(), "{}", f.name);
        let mut numeric: Vec<u64> = entries.iter().map(|e| e.id().parse().unwrap()).collect();
        numeric.sort_unstable();
        assert_eq!(numeric, (0..entries.len() as u64).collect::<Vec<_>>(), "{}", f.name);
    }
}

#[test]
fn test_concurrent_optimistic_writers_serialize() {
    for f in all_fixtures() {
        let subject = f.repo.register("race", None).unwrap();
        let base = subject.register("base").unwrap();
        let handles: Vec<_> = (0..6)
            .map(|t| {
                let subject = Arc::clone(&subject);
                let base = base.clone();
                thread::spawn(move || subject.register_if_latest(&format!("next-{}", t), Some(&base)).unwrap())
            })
            .collect();
        let winners = handles
            .into_iter()
            .filter_map(|h| h.join().unwrap())
            .count();
        assert_eq!(winners, 1, "{}", f.name);
        assert_eq!(subject.all_entries().unwrap().len(), 2, "{}", f.name);
    }
}

// =============================================================================
// Persistence
// =============================================================================

#[test]
fn test_file_repository_survives_reopen() {
    let dir = TempDir::new().unwrap();
    let multi_line = "{\n  \"type\": \"string\"\n}";
    let config = SubjectConfig::builder()
        .set("owner", "team-a")
        .unwrap()
        .set_validators_str(None)
        .build();

    let written = {
        let backend = FileBackend::open(dir.path(), SubjectOptions::default()).unwrap();
        let repo = BackendRepository::new(backend, factory());
        let subject = repo.register("sub1", Some(&config)).unwrap();
        let entries: Vec<_> = ["first", multi_line, "third"]
            .iter()
            .map(|s| subject.register(s).unwrap())
            .collect();
        repo.register("other", None).unwrap();
        repo.close().unwrap();
        entries
    };

    let backend = FileBackend::open(dir.path(), SubjectOptions::default()).unwrap();
    let repo = CachingRepository::new(Arc::new(BackendRepository::new(backend, factory())));
    let names: Vec<_> = repo
        .subjects()
        .unwrap()
        .iter()
        .map(|s| s.name().to_string())
        .collect();
    assert_eq!(names, vec!["other", "sub1"]);

    let subject = repo.lookup("sub1").unwrap().unwrap();
    assert_eq!(subject.config().unwrap(), config);
    assert_eq!(subject.latest().unwrap().as_ref(), written.last());
    for entry in &written {
        assert_eq!(subject.lookup_by_id(entry.id()).unwrap().as_ref(), Some(entry));
        assert_eq!(subject.lookup_by_schema(entry.schema()).unwrap().as_ref(), Some(entry));
    }
    let mut newest_first = written.clone();
    newest_first.reverse();
    assert_eq!(subject.all_entries().unwrap(), newest_first);
    assert_eq!(subject.register("fourth").unwrap().id(), "3");
}

#[test]
fn test_open_repository_from_config_persists() {
    let dir = TempDir::new().unwrap();
    let config = RepoConfig::from_toml(&format!(
        "[backend]\nkind = \"file\"\npath = {:?}\n",
        dir.path().join("data").display().to_string()
    ))
    .unwrap();
    assert_eq!(config.backend.kind, BackendKind::File);

    {
        let repo = config.open_repository().unwrap();
        repo.register("sub", None).unwrap().register("a").unwrap();
        repo.close().unwrap();
    }

    let repo = config.open_repository().unwrap();
    let subject = repo.lookup("sub").unwrap().unwrap();
    assert_eq!(subject.lookup_by_schema("a").unwrap().unwrap().id(), "0");
}

// =============================================================================
// Config Identity
// =============================================================================

#[test]
fn test_config_identity() {
    let absent = SubjectConfig::builder().build();
    let explicit_empty = SubjectConfig::builder().set_validators(Vec::<String>::new()).build();
    assert!(absent.validators().is_empty());
    assert!(explicit_empty.validators().is_empty());
    assert_ne!(absent, explicit_empty);

    // the difference decides whether defaults apply
    let factory = Arc::new(
        ValidatorFactory::builder()
            .set_default_validator(REJECT_VALIDATOR)
            .build(),
    );
    let repo = BackendRepository::new(MemoryBackend::new(), factory);
    let inheriting = repo.register("inherits", Some(&absent)).unwrap();
    let opted_out = repo.register("opted-out", Some(&explicit_empty)).unwrap();
    assert!(matches!(inheriting.register("a"), Err(RepoError::Validation(_))));
    assert_eq!(opted_out.register("a").unwrap().id(), "0");
}

// =============================================================================
// Lock Timeouts and Strict Validator Names
// =============================================================================

/// Memory storage whose append of the schema "slow" parks until released
struct GatedStore {
    entries: Mutex<Vec<SchemaEntry>>,
    inside: Mutex<mpsc::Sender<()>>,
    release: Mutex<mpsc::Receiver<()>>,
}

impl SubjectStore for GatedStore {
    fn ids(&self) -> schema_repo::Result<Vec<String>> {
        Ok(self.entries.lock().unwrap().iter().map(|e| e.id().to_string()).collect())
    }

    fn read_schema(&self, id: &str) -> schema_repo::Result<Option<String>> {
        Ok(self
            .entries
            .lock()
            .unwrap()
            .iter()
            .find(|e| e.id() == id)
            .map(|e| e.schema().to_string()))
    }

    fn append(&self, entry: &SchemaEntry) -> schema_repo::Result<()> {
        if entry.schema() == "slow" {
            self.inside.lock().unwrap().send(()).unwrap();
            self.release.lock().unwrap().recv().unwrap();
        }
        self.entries.lock().unwrap().push(entry.clone());
        Ok(())
    }

    fn config(&self) -> schema_repo::Result<SubjectConfig> {
        Ok(SubjectConfig::empty())
    }
}

/// Backend with a single gated subject, built from configured subject options
struct GatedBackend {
    options: SubjectOptions,
    gate: Mutex<Option<(mpsc::Sender<()>, mpsc::Receiver<()>)>>,
    subjects: Mutex<HashMap<String, Arc<dyn Subject>>>,
}

impl Backend for GatedBackend {
    fn kind(&self) -> &'static str {
        "gated"
    }

    fn create_subject(&self, name: &str, _: &SubjectConfig) -> schema_repo::Result<()> {
        let mut subjects = self.subjects.lock().unwrap();
        if subjects.contains_key(name) {
            return Ok(());
        }
        let (inside, release) = self.gate.lock().unwrap().take().unwrap();
        let store = GatedStore {
            entries: Mutex::new(Vec::new()),
            inside: Mutex::new(inside),
            release: Mutex::new(release),
        };
        let subject = StoredSubject::new(
            name,
            store,
            Arc::new(InProcessLock::with_timeout(self.options.lock_timeout)),
            self.options.id_scheme,
            Liveness::new(),
        );
        subjects.insert(name.to_string(), Arc::new(subject));
        Ok(())
    }

    fn subject_exists(&self, name: &str) -> schema_repo::Result<bool> {
        Ok(self.subjects.lock().unwrap().contains_key(name))
    }

    fn subject_names(&self) -> schema_repo::Result<Option<Vec<String>>> {
        Ok(None)
    }

    fn open_subject(&self, name: &str) -> schema_repo::Result<Arc<dyn Subject>> {
        Ok(Arc::clone(&self.subjects.lock().unwrap()[name]))
    }

    fn check_usable(&self) -> schema_repo::Result<()> {
        Ok(())
    }

    fn close(&self) -> schema_repo::Result<()> {
        Ok(())
    }

    fn describe(&self) -> BTreeMap<String, String> {
        BTreeMap::new()
    }
}

#[test]
fn test_configured_lock_timeout_surfaces_from_register() {
    let mut config = RepoConfig::default();
    config.backend.lock_timeout_ms = Some(50);

    let (inside_tx, inside_rx) = mpsc::channel();
    let (release_tx, release_rx) = mpsc::channel();
    let backend = GatedBackend {
        options: config.backend.subject_options(),
        gate: Mutex::new(Some((inside_tx, release_rx))),
        subjects: Mutex::new(HashMap::new()),
    };
    let repo = BackendRepository::new(backend, factory());
    let subject = repo.register("sub", None).unwrap();

    let slow = {
        let subject = Arc::clone(&subject);
        thread::spawn(move || subject.register("slow"))
    };
    inside_rx.recv().unwrap();

    let err = subject.register("fast").unwrap_err();
    assert!(matches!(err, RepoError::LockTimeout(_)));
    assert!(err.is_recoverable());

    release_tx.send(()).unwrap();
    assert_eq!(slow.join().unwrap().unwrap().id(), "0");
    assert_eq!(subject.register("fast").unwrap().id(), "1");
}

#[test]
fn test_strict_names_refuse_writes() {
    let subject_config = SubjectConfig::builder().add_validator("no-such-validator").build();

    let mut config = RepoConfig::default();
    let lenient = config.open_repository().unwrap();
    let sub = lenient.register("sub", Some(&subject_config)).unwrap();
    assert_eq!(sub.register("a").unwrap().id(), "0");

    config.validation.strict_validator_names = true;
    let strict = config.open_repository().unwrap();
    let sub = strict.register("sub", Some(&subject_config)).unwrap();
    let err = sub.register("a").unwrap_err();
    assert!(matches!(err, RepoError::UnknownValidator(ref name) if name == "no-such-validator"));
    assert!(matches!(
        sub.register_if_latest("a", None),
        Err(RepoError::UnknownValidator(_))
    ));
    assert!(sub.all_entries().unwrap().is_empty());
}

// =============================================================================
// Avro Compatibility
// =============================================================================

fn avro_config() -> RepoConfig {
    let mut config = RepoConfig::default();
    config.validation.can_read_strategy = "avro".to_string();
    config.validation.validators =
        BTreeMap::from([("compat".to_string(), "all:mutual-read".to_string())]);
    config.validation.default_validators = "compat".to_string();
    config
}

#[test]
fn test_avro_evolution_scenario() {
    let repo = avro_config().open_repository().unwrap();
    let sub1 = repo.register("sub1", None).unwrap();

    assert_eq!(sub1.register(SUB1_V1).unwrap().id(), "0");
    assert_eq!(sub1.register(SUB1_V2).unwrap().id(), "1");
    assert_eq!(sub1.latest().unwrap().unwrap().id(), "1");
    assert_eq!(sub1.lookup_by_schema(SUB1_V1).unwrap().unwrap().id(), "0");

    let err = sub1.register(SUB1_V3).unwrap_err();
    assert!(matches!(err, RepoError::Validation(_)));
    assert!(err.is_recoverable());
    assert_eq!(sub1.all_entries().unwrap().len(), 2);
    assert_eq!(sub1.lookup_by_schema(SUB1_V1).unwrap().unwrap().id(), "0");
}

#[test]
fn test_avro_rejects_unparseable_schema() {
    let repo = avro_config().open_repository().unwrap();
    let sub = repo.register("sub", None).unwrap();
    sub.register(SUB1_V1).unwrap();
    let err = sub.register("not a schema").unwrap_err();
    assert!(err.to_string().contains("Could not parse"));
}

// =============================================================================
// Rendering
// =============================================================================

#[test]
fn test_render_listing() {
    let f = memory();
    let subject = f.repo.register("sub", None).unwrap();
    subject.register("a").unwrap();
    subject.register("b").unwrap();

    let text = render::entries_to_text(&subject.all_entries().unwrap());
    assert_eq!(text, "1\tb\n0\ta\n");
    assert_eq!(render::entries_from_text(&text), subject.all_entries().unwrap());

    subject.register("c\nd").unwrap();
    let text = render::entries_to_text(&subject.all_entries().unwrap());
    assert!(text.starts_with(render::SCHEMA_WITH_NEWLINE_WARNING));
}
