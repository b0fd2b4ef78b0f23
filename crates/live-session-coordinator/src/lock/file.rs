//! File-backed exclusive session lock.
//!
//! Each session id maps to `<dir>/<encoded id>.lock`. Ownership is an
//! OS-level exclusive `flock` (`LockFileEx` on Windows) on that file, so
//! the kernel drops the hold when the owning process dies, however it dies.
//!
//! All candidate processes must see the same directory with consistent
//! lock semantics. This is not a network-transparent lock.

use std::{
    fs::{self, File, OpenOptions},
    io::{self, Seek, SeekFrom, Write},
    path::{Path, PathBuf},
    sync::{Arc, Mutex, PoisonError},
    time::{SystemTime, UNIX_EPOCH},
};

use async_trait::async_trait;
use fs2::FileExt;
use live_session_core::{LockError, LockProvider, SessionId, SessionLock};

/// Exclusive lock on one session's lock file.
pub struct FileSessionLock {
    session_id: SessionId,
    dir: PathBuf,
    path: PathBuf,
    handle: Mutex<Option<File>>,
}

impl FileSessionLock {
    /// Create a lock for `session_id` inside `dir`.
    ///
    /// Nothing touches the filesystem until the first `try_acquire`.
    #[must_use]
    pub fn new(session_id: impl Into<SessionId>, dir: impl Into<PathBuf>) -> Self {
        let session_id = session_id.into();
        let dir = dir.into();
        let path = dir.join(lock_file_name(&session_id));
        Self {
            session_id,
            dir,
            path,
            handle: Mutex::new(None),
        }
    }

    /// Path of the backing lock file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn acquire(&self) -> Result<File, LockError> {
        fs::create_dir_all(&self.dir)?;
        let file = self.open()?;
        self.claim(file)
    }

    fn open(&self) -> io::Result<File> {
        OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&self.path)
    }

    /// Lock an opened lock file and stamp it with holder metadata.
    fn claim(&self, mut file: File) -> Result<File, LockError> {
        if let Err(e) = FileExt::try_lock_exclusive(&file) {
            if e.raw_os_error() == fs2::lock_contended_error().raw_os_error() {
                return Err(LockError::Contended);
            }
            return Err(LockError::Io(e));
        }

        // A releasing holder unlinks the file; a lock taken on the unlinked
        // inode guards nothing.
        if !is_same_file(&file, &self.path)? {
            return Err(LockError::Replaced);
        }

        file.set_len(0)?;
        file.seek(SeekFrom::Start(0))?;
        writeln!(
            file,
            "LOCKED by PID={} session={} at={}",
            std::process::id(),
            self.session_id,
            SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_secs())
                .unwrap_or(0)
        )?;
        file.flush()?;

        Ok(file)
    }

    fn discard(&self, file: File) -> io::Result<()> {
        // Unlink while still holding the lock so no one can lock the old
        // inode after we let go. Windows refuses to delete open files.
        if cfg!(unix) {
            let removed = remove_if_exists(&self.path);
            FileExt::unlock(&file)?;
            drop(file);
            removed
        } else {
            FileExt::unlock(&file)?;
            drop(file);
            remove_if_exists(&self.path)
        }
    }
}

#[async_trait]
impl SessionLock for FileSessionLock {
    fn session_id(&self) -> &str {
        &self.session_id
    }

    async fn try_acquire(&self) -> bool {
        let mut handle = self.handle.lock().unwrap_or_else(PoisonError::into_inner);
        if handle.is_some() {
            return true;
        }

        match self.acquire() {
            Ok(file) => {
                *handle = Some(file);
                tracing::info!(
                    session_id = %self.session_id,
                    pid = std::process::id(),
                    path = %self.path.display(),
                    "Acquired session lock"
                );
                true
            }
            Err(LockError::Contended | LockError::Replaced) => {
                tracing::debug!(session_id = %self.session_id, "Session lock held by another instance");
                false
            }
            Err(e) => {
                tracing::error!(session_id = %self.session_id, "Failed to acquire session lock: {e}");
                false
            }
        }
    }

    async fn release(&self) {
        let taken = self
            .handle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let Some(file) = taken else {
            return;
        };

        match self.discard(file) {
            Ok(()) => tracing::info!(session_id = %self.session_id, "Released session lock"),
            Err(e) => {
                tracing::error!(session_id = %self.session_id, "Error releasing session lock: {e}");
            }
        }
    }

    fn is_held(&self) -> bool {
        self.handle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }
}

/// Hands out `FileSessionLock`s rooted in one directory.
#[derive(Debug, Clone)]
pub struct FileLockProvider {
    dir: PathBuf,
}

impl FileLockProvider {
    /// Create a provider for the given lock directory.
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Lock directory.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

impl LockProvider for FileLockProvider {
    fn lock_for(&self, session_id: &str) -> Arc<dyn SessionLock> {
        Arc::new(FileSessionLock::new(session_id, self.dir.clone()))
    }
}

/// File name for a session id. The id is percent-encoded so it cannot
/// escape the lock directory.
fn lock_file_name(session_id: &str) -> String {
    format!("{}.lock", urlencoding::encode(session_id))
}

fn remove_if_exists(path: &Path) -> io::Result<()> {
    match fs::remove_file(path) {
        Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e),
        _ => Ok(()),
    }
}

#[cfg(unix)]
fn is_same_file(file: &File, path: &Path) -> io::Result<bool> {
    use std::os::unix::fs::MetadataExt;

    let held = file.metadata()?;
    match fs::metadata(path) {
        Ok(current) => Ok(held.dev() == current.dev() && held.ino() == current.ino()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e),
    }
}

#[cfg(not(unix))]
fn is_same_file(_file: &File, path: &Path) -> io::Result<bool> {
    Ok(path.exists())
}
