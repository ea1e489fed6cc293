//! Directory-per-subject backend
//!
//! Layout under the root directory:
//!
//! ```text
//! .repo.lock              advisory lock of the owning process, holds its pid
//! <subject>/config.json   subject config as a flat JSON object
//! <subject>/schema_ids    one `id<TAB>sha256` line per schema, oldest first
//! <subject>/<id>.schema   schema text
//! ```
//!
//! A schema file is in place before its id line is appended, and a trailing
//! line without a newline is ignored, so readers never see an id whose
//! schema is not yet readable. The next append cuts such a line off before
//! writing its own.

use std::collections::{BTreeMap, HashMap};
use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};

use super::{Backend, SubjectOptions};
use crate::checksum::Checksum;
use crate::entry::SchemaEntry;
use crate::error::{RepoError, Result};
use crate::subject::{validate_subject_name, Liveness, StoredSubject, Subject, SubjectStore};
use crate::subject_config::SubjectConfig;

const LOCK_FILE: &str = ".repo.lock";
const CONFIG_FILE: &str = "config.json";
const IDS_FILE: &str = "schema_ids";
const SCHEMA_EXT: &str = "schema";

fn schema_path(dir: &Path, id: &str) -> PathBuf {
    dir.join(format!("{}.{}", id, SCHEMA_EXT))
}

/// Write `contents` next to `path` and rename it into place
fn write_atomic(path: &Path, contents: &[u8]) -> Result<()> {
    let tmp = path.with_extension("tmp");
    {
        let mut file = fs::File::create(&tmp)?;
        file.write_all(contents)?;
        file.sync_all()?;
    }
    fs::rename(&tmp, path)?;
    Ok(())
}

fn unique_suffix() -> String {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or_default();
    format!("{}-{}", std::process::id(), nanos)
}

/// Storage of one subject directory
struct FileStore {
    dir: PathBuf,
    checksums: Mutex<HashMap<String, Checksum>>,
}

impl FileStore {
    fn new(dir: PathBuf) -> Self {
        Self {
            dir,
            checksums: Mutex::new(HashMap::new()),
        }
    }

    fn display(&self) -> String {
        self.dir.display().to_string()
    }

    fn read_ids(&self) -> Result<Vec<(String, Checksum)>> {
        let path = self.dir.join(IDS_FILE);
        let content = match fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        // An unterminated last line is an append in progress.
        let complete = match content.rfind('\n') {
            Some(end) => &content[..end],
            None => "",
        };
        complete
            .lines()
            .filter(|line| !line.is_empty())
            .map(|line| {
                line.split_once('\t')
                    .filter(|(id, sum)| !id.is_empty() && !sum.is_empty())
                    .map(|(id, sum)| (id.to_string(), Checksum::from(sum)))
                    .ok_or_else(|| {
                        RepoError::corrupt(path.display().to_string(), format!("bad id line '{}'", line))
                    })
            })
            .collect()
    }

    /// Cut an unterminated last line left by an interrupted append; returns the new length.
    ///
    /// Must run under the subject's critical section.
    fn drop_torn_line(&self, ids: &mut fs::File) -> Result<u64> {
        let len = ids.metadata()?.len();
        if len == 0 {
            return Ok(0);
        }
        let mut last = [0u8; 1];
        ids.seek(SeekFrom::End(-1))?;
        ids.read_exact(&mut last)?;
        if last[0] == b'\n' {
            return Ok(len);
        }

        let mut content = Vec::with_capacity(len as usize);
        ids.seek(SeekFrom::Start(0))?;
        ids.read_to_end(&mut content)?;
        let complete = content
            .iter()
            .rposition(|b| *b == b'\n')
            .map_or(0, |i| i + 1);
        tracing::warn!(
            dir = %self.dir.display(),
            line = %String::from_utf8_lossy(&content[complete..]),
            "dropping unterminated id line"
        );
        ids.set_len(complete as u64)?;
        ids.sync_all()?;
        Ok(complete as u64)
    }

    fn checksums(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, Checksum>>> {
        self.checksums
            .lock()
            .map_err(|_| RepoError::unavailable("file subject poisoned"))
    }
}

impl SubjectStore for FileStore {
    fn ids(&self) -> Result<Vec<String>> {
        let lines = self.read_ids()?;
        let mut checksums = self.checksums()?;
        Ok(lines
            .into_iter()
            .map(|(id, sum)| {
                checksums.entry(id.clone()).or_insert(sum);
                id
            })
            .collect())
    }

    fn read_schema(&self, id: &str) -> Result<Option<String>> {
        let expected = self.checksums()?.get(id).cloned();
        let expected = match expected {
            Some(sum) => sum,
            None => match self.read_ids()?.into_iter().find(|(known, _)| known == id) {
                Some((_, sum)) => sum,
                None => return Ok(None),
            },
        };

        let path = schema_path(&self.dir, id);
        let schema = match fs::read_to_string(&path) {
            Ok(schema) => schema,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        if !expected.verify(&schema) {
            return Err(RepoError::corrupt(
                path.display().to_string(),
                format!("checksum mismatch, expected {}", expected),
            ));
        }
        Ok(Some(schema))
    }

    fn append(&self, entry: &SchemaEntry) -> Result<()> {
        write_atomic(&schema_path(&self.dir, entry.id()), entry.schema().as_bytes())?;

        let sum = Checksum::of(entry.schema());
        let mut ids = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(self.dir.join(IDS_FILE))?;
        let end = self.drop_torn_line(&mut ids)?;
        ids.seek(SeekFrom::Start(end))?;
        ids.write_all(format!("{}\t{}\n", entry.id(), sum).as_bytes())?;
        ids.sync_all()?;

        self.checksums()?.insert(entry.id().to_string(), sum);
        Ok(())
    }

    fn config(&self) -> Result<SubjectConfig> {
        let path = self.dir.join(CONFIG_FILE);
        let content = match fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(RepoError::corrupt(self.display(), "missing config.json"))
            }
            Err(e) => return Err(e.into()),
        };
        let map: BTreeMap<String, String> = serde_json::from_str(&content)?;
        SubjectConfig::from_map(map)
    }
}

/// Stores each subject in its own directory under a root.
///
/// The root is owned exclusively while the backend is open; a second
/// backend on the same root fails with [`RepoError::Unavailable`].
pub struct FileBackend {
    root: PathBuf,
    options: SubjectOptions,
    liveness: Liveness,
    opened: Mutex<HashMap<String, Arc<dyn Subject>>>,
    // Holds the advisory lock on `.repo.lock` until close.
    owner: Mutex<Option<fs::File>>,
}

impl FileBackend {
    /// Open (creating if needed) the repository rooted at `root`
    pub fn open(root: impl AsRef<Path>, options: SubjectOptions) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        if root.exists() && !root.is_dir() {
            return Err(RepoError::InvalidConfig(format!(
                "{} exists and is not a directory",
                root.display()
            )));
        }
        fs::create_dir_all(&root)?;
        let owner = acquire_root(&root)?;

        tracing::info!(root = %root.display(), "opened file backend");
        Ok(Self {
            root,
            options,
            liveness: Liveness::new(),
            opened: Mutex::new(HashMap::new()),
            owner: Mutex::new(Some(owner)),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn subject_dir(&self, name: &str) -> Result<PathBuf> {
        validate_subject_name(name)?;
        if name.starts_with('.') || name.contains('/') || name.contains('\\') {
            return Err(RepoError::InvalidSubjectName(name.to_string()));
        }
        Ok(self.root.join(name))
    }

    /// Clear the pid and drop the advisory lock. The file itself stays, since
    /// removing it would let a racing opener lock an unlinked inode.
    fn release(&self) {
        let owner = match self.owner.lock() {
            Ok(mut owner) => owner.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        if let Some(file) = owner {
            if let Err(e) = file.set_len(0) {
                tracing::warn!(root = %self.root.display(), error = %e, "failed to clear lock file");
            }
        }
    }
}

/// Open `.repo.lock` and take an exclusive advisory lock on it.
///
/// The lock lives as long as the returned handle, and the OS drops it when
/// the owning process dies, so a leftover file never blocks a later opener.
/// The pid written into the file is informational only.
fn acquire_root(root: &Path) -> Result<fs::File> {
    let path = root.join(LOCK_FILE);
    let mut file = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(false)
        .open(&path)?;

    if !try_lock_exclusive(&file)? {
        let owner = fs::read_to_string(&path).unwrap_or_default();
        return Err(RepoError::unavailable(format!(
            "{} is in use by process {}",
            root.display(),
            owner.trim()
        )));
    }

    let previous = fs::read_to_string(&path).unwrap_or_default();
    if !previous.trim().is_empty() {
        tracing::warn!(path = %path.display(), owner = %previous.trim(), "previous owner did not release the root");
    }
    file.set_len(0)?;
    file.seek(SeekFrom::Start(0))?;
    file.write_all(std::process::id().to_string().as_bytes())?;
    file.sync_all()?;
    Ok(file)
}

#[cfg(unix)]
fn try_lock_exclusive(file: &fs::File) -> Result<bool> {
    use std::os::unix::io::AsRawFd;

    // SAFETY:
    // - the fd belongs to `file`, which stays open for the whole call
    // - flock only changes lock state and reports failure through its return value
    let ret = unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_EX | libc::LOCK_NB) };
    if ret == 0 {
        return Ok(true);
    }
    let err = std::io::Error::last_os_error();
    if err.kind() == ErrorKind::WouldBlock {
        Ok(false)
    } else {
        Err(err.into())
    }
}

#[cfg(not(unix))]
fn try_lock_exclusive(file: &fs::File) -> Result<bool> {
    match file.try_lock() {
        Ok(()) => Ok(true),
        Err(fs::TryLockError::WouldBlock) => Ok(false),
        Err(fs::TryLockError::Error(e)) => Err(e.into()),
    }
}

impl Backend for FileBackend {
    fn kind(&self) -> &'static str {
        "file"
    }

    fn create_subject(&self, name: &str, config: &SubjectConfig) -> Result<()> {
        let dir = self.subject_dir(name)?;
        self.check_usable()?;
        if dir.is_dir() {
            return Ok(());
        }

        let staging = self.root.join(format!(".{}.{}", name, unique_suffix()));
        fs::create_dir(&staging)?;
        let built = (|| -> Result<()> {
            let json = serde_json::to_string_pretty(config.as_map())?;
            write_atomic(&staging.join(CONFIG_FILE), json.as_bytes())?;
            fs::File::create(staging.join(IDS_FILE))?.sync_all()?;
            Ok(())
        })();
        if let Err(e) = built {
            let _ = fs::remove_dir_all(&staging);
            return Err(e);
        }

        match fs::rename(&staging, &dir) {
            Ok(()) => {
                tracing::info!(subject = %name, dir = %dir.display(), "created subject");
                Ok(())
            }
            // Lost a creation race; the winner's directory stands.
            Err(_) if dir.is_dir() => {
                let _ = fs::remove_dir_all(&staging);
                Ok(())
            }
            Err(e) => {
                let _ = fs::remove_dir_all(&staging);
                Err(e.into())
            }
        }
    }

    fn subject_exists(&self, name: &str) -> Result<bool> {
        self.check_usable()?;
        match self.subject_dir(name) {
            Ok(dir) => Ok(dir.is_dir()),
            Err(RepoError::InvalidSubjectName(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    fn subject_names(&self) -> Result<Option<Vec<String>>> {
        self.check_usable()?;
        let mut names = Vec::new();
        for entry in fs::read_dir(&self.root)? {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            if let Some(name) = entry.file_name().to_str() {
                if !name.starts_with('.') {
                    names.push(name.to_string());
                }
            }
        }
        names.sort();
        Ok(Some(names))
    }

    fn open_subject(&self, name: &str) -> Result<Arc<dyn Subject>> {
        let dir = self.subject_dir(name)?;
        self.check_usable()?;
        let mut opened = self
            .opened
            .lock()
            .map_err(|_| RepoError::unavailable("file backend poisoned"))?;
        if let Some(subject) = opened.get(name) {
            return Ok(Arc::clone(subject));
        }
        if !dir.is_dir() {
            return Err(RepoError::unavailable(format!(
                "subject directory {} is missing",
                dir.display()
            )));
        }

        let subject: Arc<dyn Subject> = Arc::new(StoredSubject::new(
            name,
            FileStore::new(dir),
            self.options.lock(),
            self.options.id_scheme,
            self.liveness.clone(),
        ));
        opened.insert(name.to_string(), Arc::clone(&subject));
        Ok(subject)
    }

    fn check_usable(&self) -> Result<()> {
        self.liveness.check()?;
        if !self.root.is_dir() {
            return Err(RepoError::unavailable(format!(
                "{} is no longer a directory",
                self.root.display()
            )));
        }
        Ok(())
    }

    fn close(&self) -> Result<()> {
        if self.liveness.close() {
            self.release();
            tracing::info!(root = %self.root.display(), "closed file backend");
        }
        Ok(())
    }

    fn describe(&self) -> BTreeMap<String, String> {
        let mut details = BTreeMap::new();
        details.insert("path".to_string(), self.root.display().to_string());
        self.options.describe_into(&mut details);
        details
    }
}

impl Drop for FileBackend {
    fn drop(&mut self) {
        if self.liveness.close() {
            self.release();
        }
    }
}
