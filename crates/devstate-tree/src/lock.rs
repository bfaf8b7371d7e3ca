//! Exclusive advisory lock on a sidecar file next to the data file.
//!
//! Every transaction holds this lock from load to commit, so separate
//! `DurableTree` values (in this process or another) opened on the same path
//! never interleave their read-modify-write cycles. The sidecar is left in
//! place after release; removing it would let a waiter lock an unlinked inode.

use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};

use crate::error::Result;

/// Held lock; released on drop.
#[derive(Debug)]
pub(crate) struct FileLock {
    file: File,
    path: PathBuf,
}

/// The sidecar path for a data file: `<path>.lock`.
pub(crate) fn lock_path(data_path: &Path) -> PathBuf {
    let mut name = data_path.as_os_str().to_owned();
    name.push(".lock");
    PathBuf::from(name)
}

impl FileLock {
    /// Block until the exclusive lock for `data_path` is held.
    pub(crate) fn acquire(data_path: &Path, create_dirs: bool) -> Result<Self> {
        let path = lock_path(data_path);
        if create_dirs {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                fs::create_dir_all(parent)?;
            }
        }

        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&path)?;
        lock_exclusive(&file)?;
        Ok(Self { file, path })
    }

    pub(crate) fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for FileLock {
    fn drop(&mut self) {
        unlock(&self.file);
    }
}

#[cfg(unix)]
fn lock_exclusive(file: &File) -> io::Result<()> {
    use std::os::unix::io::AsRawFd;

    let fd = file.as_raw_fd();
    loop {
        let ret = unsafe { libc::flock(fd, libc::LOCK_EX) };
        if ret == 0 {
            return Ok(());
        }
        let err = io::Error::last_os_error();
        if err.kind() != io::ErrorKind::Interrupted {
            return Err(err);
        }
    }
}

#[cfg(unix)]
fn unlock(file: &File) {
    use std::os::unix::io::AsRawFd;

    // Closing the descriptor releases the lock as well.
    unsafe {
        libc::flock(file.as_raw_fd(), libc::LOCK_UN);
    }
}

// TODO: use LockFileEx on Windows; until then only the in-process mutex applies.
#[cfg(not(unix))]
fn lock_exclusive(_file: &File) -> io::Result<()> {
    Ok(())
}

#[cfg(not(unix))]
fn unlock(_file: &File) {}
