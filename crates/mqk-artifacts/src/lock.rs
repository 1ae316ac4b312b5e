//! Advisory cross-process lock over registry writes.
//!
//! Every `record` holds an exclusive `flock` on `<root>/index.lock` from the
//! verdict write through the index swap, so writers in other processes (or
//! other `Registry` handles in this one) cannot interleave their
//! read-merge-write of `index.json`. Readers never take it.
//!
//! On targets without `flock` the lock file is still created but not
//! locked; those builds assume a single writer process per registry root.

use std::fs::{File, OpenOptions};
use std::path::Path;

use anyhow::{Context, Result};

pub const LOCK_FILE: &str = "index.lock";

/// Held for the lifetime of the value; closing the file releases the lock.
#[derive(Debug)]
pub(crate) struct IndexLock {
    _file: File,
}

impl IndexLock {
    /// Block until the exclusive lock is held.
    pub(crate) fn acquire(root: &Path) -> Result<Self> {
        let path = root.join(LOCK_FILE);
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(&path)
            .with_context(|| format!("open registry lock failed: {}", path.display()))?;
        lock_exclusive(&file)
            .with_context(|| format!("lock registry failed: {}", path.display()))?;
        Ok(Self { _file: file })
    }
}

#[cfg(unix)]
fn lock_exclusive(file: &File) -> std::io::Result<()> {
    use std::os::unix::io::AsRawFd;
    loop {
        // SAFETY: the descriptor is owned by `file` and outlives the call.
        let rc = unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_EX) };
        if rc == 0 {
            return Ok(());
        }
        let err = std::io::Error::last_os_error();
        if err.kind() != std::io::ErrorKind::Interrupted {
            return Err(err);
        }
    }
}

#[cfg(not(unix))]
fn lock_exclusive(_file: &File) -> std::io::Result<()> {
    Ok(())
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::sync::mpsc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn second_holder_waits_for_the_first() {
        let dir = tempfile::tempdir().unwrap();
        let first = IndexLock::acquire(dir.path()).unwrap();

        let root = dir.path().to_path_buf();
        let (tx, rx) = mpsc::channel();
        let waiter = thread::spawn(move || {
            let _second = IndexLock::acquire(&root).unwrap();
            tx.send(()).unwrap();
        });

        assert!(rx.recv_timeout(Duration::from_millis(200)).is_err(), "lock was not exclusive");
        drop(first);
        rx.recv_timeout(Duration::from_secs(5)).expect("lock never released");
        waiter.join().unwrap();
        assert!(dir.path().join(LOCK_FILE).exists());
    }
}
