//! [`RegistryStore`] – file-backed registry with atomic replace.
//!
//! # Storage layout
//!
//! | file | purpose |
//! |---|---|
//! | `registry.json` | canonical snapshot, always syntactically complete |
//! | `registry.json.<pid>.<seq>.tmp` | staging file, renamed over the snapshot |
//! | `registry.lock` | advisory `flock` target for writers |
//!
//! Readers never take the lock: a rename is atomic, so a reader sees either
//! the old snapshot or the new one.  Writers go through
//! [`RegistryStore::lock`], which serializes read-modify-write sequences
//! across threads and (on Unix) across processes.
//!
//! # Example
//!
//! ```rust
//! use kfleet_registry::RegistryStore;
//!
//! let dir = tempfile::tempdir().unwrap();
//! let store = RegistryStore::new(dir.path(), 9555);
//!
//! let mut guard = store.lock().unwrap();
//! guard.next_port = 9600;
//! guard.commit().unwrap();
//! drop(guard);
//!
//! assert_eq!(store.load().unwrap().next_port, 9600);
//! ```

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::ops::{Deref, DerefMut};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};

use kfleet_types::{FleetError, Registry};
use tracing::{debug, info};

/// File name of the canonical snapshot inside the fleet directory.
pub const REGISTRY_FILE: &str = "registry.json";

const LOCK_FILE: &str = "registry.lock";

// Distinguishes staging files of concurrent saves within one process.
static SAVE_SEQ: AtomicU64 = AtomicU64::new(0);

// ─────────────────────────────────────────────────────────────────────────────
// RegistryStore
// ─────────────────────────────────────────────────────────────────────────────

/// Durable home of the fleet [`Registry`].
pub struct RegistryStore {
    dir: PathBuf,
    path: PathBuf,
    base_port: u16,
    // Serializes writers inside this process; the file lock covers the rest.
    local: Mutex<()>,
}

impl RegistryStore {
    /// A store rooted at `dir`.  Nothing touches the disk until the first
    /// load or lock.
    pub fn new(dir: impl AsRef<Path>, base_port: u16) -> Self {
        let dir = dir.as_ref().to_path_buf();
        Self {
            path: dir.join(REGISTRY_FILE),
            dir,
            base_port,
            local: Mutex::new(()),
        }
    }

    /// Path of `registry.json`.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The fleet directory.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Load the current registry, creating and persisting an empty one when
    /// none exists yet.
    ///
    /// # Errors
    ///
    /// [`FleetError::RegistryCorrupt`] when the file exists but does not
    /// parse; the file is left untouched so an operator can inspect it.
    pub fn load(&self) -> Result<Registry, FleetError> {
        match fs::read(&self.path) {
            Ok(raw) => serde_json::from_slice(&raw).map_err(|e| FleetError::RegistryCorrupt {
                path: self.path.clone(),
                reason: e.to_string(),
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                let registry = Registry::new(self.base_port);
                self.save(&registry)?;
                info!(path = %self.path.display(), next_port = self.base_port, "initialised empty registry");
                Ok(registry)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Persist a full snapshot through a temp file and an atomic rename.
    pub fn save(&self, registry: &Registry) -> Result<(), FleetError> {
        fs::create_dir_all(&self.dir)?;
        let raw = serde_json::to_vec_pretty(registry)
            .map_err(|e| FleetError::Io(std::io::Error::other(e)))?;

        let seq = SAVE_SEQ.fetch_add(1, Ordering::Relaxed);
        let tmp = self
            .dir
            .join(format!("{REGISTRY_FILE}.{}.{seq}.tmp", std::process::id()));
        {
            let mut file = OpenOptions::new().write(true).create_new(true).open(&tmp)?;
            file.write_all(&raw)?;
            file.sync_all()?;
        }
        if let Err(e) = fs::rename(&tmp, &self.path) {
            let _ = fs::remove_file(&tmp);
            return Err(e.into());
        }
        debug!(kernels = registry.kernels.len(), next_port = registry.next_port, "registry saved");
        Ok(())
    }

    /// Take the writer lock and load the registry under it.
    ///
    /// The lock is released when the returned guard drops.  Changes made
    /// through the guard are only persisted by [`RegistryGuard::commit`].
    pub fn lock(&self) -> Result<RegistryGuard<'_>, FleetError> {
        let local = self.local.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        fs::create_dir_all(&self.dir)?;
        let file = FileLock::acquire(&self.dir.join(LOCK_FILE))?;
        let registry = self.load()?;
        Ok(RegistryGuard {
            store: self,
            registry,
            _file: file,
            _local: local,
        })
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// RegistryGuard
// ─────────────────────────────────────────────────────────────────────────────

/// Exclusive, loaded view of the registry.  Derefs to [`Registry`].
pub struct RegistryGuard<'a> {
    store: &'a RegistryStore,
    registry: Registry,
    _file: FileLock,
    _local: MutexGuard<'a, ()>,
}

impl RegistryGuard<'_> {
    /// Persist the guarded registry.  The lock stays held.
    pub fn commit(&self) -> Result<(), FleetError> {
        self.store.save(&self.registry)
    }

    /// A detached copy of the guarded registry.
    pub fn snapshot(&self) -> Registry {
        self.registry.clone()
    }
}

impl Deref for RegistryGuard<'_> {
    type Target = Registry;

    fn deref(&self) -> &Registry {
        &self.registry
    }
}

impl DerefMut for RegistryGuard<'_> {
    fn deref_mut(&mut self) -> &mut Registry {
        &mut self.registry
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Advisory file lock
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(unix)]
struct FileLock(#[allow(dead_code)] nix::fcntl::Flock<File>);

#[cfg(unix)]
impl FileLock {
    fn acquire(path: &Path) -> Result<Self, FleetError> {
        use nix::fcntl::{Flock, FlockArg};

        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(path)?;
        let lock = Flock::lock(file, FlockArg::LockExclusive)
            .map_err(|(_, errno)| FleetError::Io(std::io::Error::from(errno)))?;
        Ok(Self(lock))
    }
}

#[cfg(not(unix))]
struct FileLock;

#[cfg(not(unix))]
impl FileLock {
    fn acquire(path: &Path) -> Result<Self, FleetError> {
        // No advisory locking here; the in-process mutex still applies.
        OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(path)?;
        Ok(Self)
    }
}
