//! Advisory file lock guarding the mirror against concurrent mutation.
//!
//! The in-process pass guard only covers one scheduler. A one-shot CLI
//! invocation racing a running daemon is kept apart by this `flock`.

use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};

use fs2::FileExt;

/// Default wait before giving up on a busy mirror.
pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(5 * 60);

const FIRST_RETRY: Duration = Duration::from_millis(10);
const LONGEST_RETRY: Duration = Duration::from_millis(500);

/// Path of the lock file for a mirror: a sibling named `<dir>.lock`.
///
/// Kept outside the mirror so that discarding the working copy never
/// deletes a lock somebody else is holding.
pub fn lock_path_for(local_path: &Path) -> PathBuf {
    let mut name = local_path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_else(|| "mirror".into());
    name.push(".lock");
    match local_path.parent() {
        Some(parent) => parent.join(name),
        None => PathBuf::from(name),
    }
}

/// Exclusive claim on one mirror, released when dropped.
#[derive(Debug)]
pub struct MirrorLock {
    file: File,
    path: PathBuf,
}

impl MirrorLock {
    /// Claim the mirror at `local_path`, retrying with a doubling pause
    /// until `timeout` has passed.
    ///
    /// Returns `ErrorKind::TimedOut` when the mirror stays busy.
    pub fn acquire(local_path: &Path, timeout: Duration) -> io::Result<Self> {
        let path = lock_path_for(local_path);
        let file = open_lock_file(&path)?;
        let deadline = Instant::now() + timeout;
        let mut pause = FIRST_RETRY;

        while !claim(&file)? {
            if pause == FIRST_RETRY {
                log::debug!("Mirror {} is busy, waiting", local_path.display());
            }
            let now = Instant::now();
            if now >= deadline {
                return Err(io::Error::new(
                    io::ErrorKind::TimedOut,
                    format!(
                        "mirror {} still busy after {:?}",
                        local_path.display(),
                        timeout
                    ),
                ));
            }
            thread::sleep(pause.min(deadline - now));
            pause = (pause * 2).min(LONGEST_RETRY);
        }

        Ok(Self { file, path })
    }

    /// Claim the mirror without waiting. `None` means it is busy.
    pub fn try_acquire(local_path: &Path) -> io::Result<Option<Self>> {
        let path = lock_path_for(local_path);
        let file = open_lock_file(&path)?;
        Ok(claim(&file)?.then_some(Self { file, path }))
    }

    /// The lock file backing this claim.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// One non-blocking attempt. `false` means another holder has it.
fn claim(file: &File) -> io::Result<bool> {
    match file.try_lock_exclusive() {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(false),
        Err(e) => Err(e),
    }
}

fn open_lock_file(path: &Path) -> io::Result<File> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(false)
        .open(path)
}

impl Drop for MirrorLock {
    fn drop(&mut self) {
        if let Err(e) = self.file.unlock() {
            log::warn!("Failed to release {}: {}", self.path.display(), e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Barrier};
    use tempfile::tempdir;

    #[test]
    fn lock_path_is_sibling_of_mirror() {
        assert_eq!(
            lock_path_for(Path::new("/srv/data/repo")),
            PathBuf::from("/srv/data/repo.lock")
        );
        assert_eq!(lock_path_for(Path::new("repo")), PathBuf::from("repo.lock"));
    }

    #[test]
    fn acquire_creates_lock_file_and_parents() {
        let dir = tempdir().unwrap();
        let mirror = dir.path().join("nested").join("repo");

        let lock = MirrorLock::acquire(&mirror, Duration::from_secs(1)).unwrap();
        assert_eq!(lock.path(), dir.path().join("nested").join("repo.lock"));
        assert!(lock.path().exists());
        assert!(!mirror.exists());
    }

    #[test]
    fn try_acquire_returns_none_while_busy() {
        let dir = tempdir().unwrap();
        let mirror = dir.path().join("repo");

        let held = MirrorLock::acquire(&mirror, Duration::from_secs(1)).unwrap();
        assert!(MirrorLock::try_acquire(&mirror).unwrap().is_none());

        drop(held);
        assert!(MirrorLock::try_acquire(&mirror).unwrap().is_some());
    }

    #[test]
    fn acquire_times_out_while_another_thread_holds_it() {
        let dir = tempdir().unwrap();
        let mirror = Arc::new(dir.path().join("repo"));
        let barrier = Arc::new(Barrier::new(2));

        let holder_mirror = Arc::clone(&mirror);
        let holder_barrier = Arc::clone(&barrier);
        let holder = thread::spawn(move || {
            let lock = MirrorLock::acquire(&holder_mirror, Duration::from_secs(1)).unwrap();
            holder_barrier.wait();
            thread::sleep(Duration::from_millis(500));
            drop(lock);
        });

        barrier.wait();
        let err = MirrorLock::acquire(&mirror, Duration::from_millis(100)).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::TimedOut);
        assert!(err.to_string().contains("still busy"));

        holder.join().unwrap();
    }

    #[test]
    fn acquire_succeeds_once_released() {
        let dir = tempdir().unwrap();
        let mirror = Arc::new(dir.path().join("repo"));
        let barrier = Arc::new(Barrier::new(2));

        let holder_mirror = Arc::clone(&mirror);
        let holder_barrier = Arc::clone(&barrier);
        let holder = thread::spawn(move || {
            let lock = MirrorLock::acquire(&holder_mirror, Duration::from_secs(1)).unwrap();
            holder_barrier.wait();
            thread::sleep(Duration::from_millis(50));
            drop(lock);
        });

        barrier.wait();
        assert!(MirrorLock::acquire(&mirror, Duration::from_secs(2)).is_ok());

        holder.join().unwrap();
    }
}
