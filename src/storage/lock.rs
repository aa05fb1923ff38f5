//! # Writer Lock
//!
//! The `flintlock` file serializes writers with a POSIX `fcntl(F_SETLK)`
//! advisory write lock. fcntl locks are per-process: closing any
//! descriptor on the file drops the lock, so the descriptor is owned by
//! [`WriteLock`] and held for the writer's entire lifetime.
//!
//! Failure to acquire is classified into the [`LockReason`] taxonomy so
//! callers can distinguish a busy database from a filesystem that cannot
//! lock at all.

use std::ffi::CString;
use std::os::unix::ffi::OsStrExt;
use std::path::{Path, PathBuf};

use eyre::Result;

use crate::config::LOCK_FILE_NAME;
use crate::error::{DbError, LockReason};

#[derive(Debug)]
pub struct WriteLock {
    path: PathBuf,
    fd: i32,
}

impl WriteLock {
    /// Acquires the exclusive writer lock, creating the lock file if
    /// needed. Non-blocking: a held lock fails immediately with the
    /// `InUse` reason.
    pub fn acquire(db_dir: &Path) -> Result<Self> {
        let path = db_dir.join(LOCK_FILE_NAME);
        let c_path = CString::new(path.as_os_str().as_bytes())
            .map_err(|_| DbError::InvalidArgument("lock path contains a NUL byte".into()))?;

        let fd = unsafe { libc::open(c_path.as_ptr(), libc::O_WRONLY | libc::O_CREAT, 0o666) };
        if fd == -1 {
            let errno = std::io::Error::last_os_error();
            let reason = match errno.raw_os_error() {
                Some(libc::EMFILE) | Some(libc::ENFILE) => LockReason::FdLimit,
                _ => LockReason::Unknown,
            };
            return Err(DbError::Lock {
                path: path.display().to_string(),
                reason,
            })
            .map_err(|e| eyre::Report::new(e).wrap_err(errno));
        }

        let flock = libc::flock {
            l_type: libc::F_WRLCK as i16,
            l_whence: libc::SEEK_SET as i16,
            l_start: 0,
            l_len: 0,
            l_pid: 0,
        };

        if unsafe { libc::fcntl(fd, libc::F_SETLK, &flock) } == -1 {
            let errno = std::io::Error::last_os_error();
            unsafe { libc::close(fd) };
            let reason = match errno.raw_os_error() {
                Some(libc::EACCES) | Some(libc::EAGAIN) => LockReason::InUse,
                Some(libc::ENOLCK) | Some(libc::EINVAL) => LockReason::Unsupported,
                Some(libc::EMFILE) | Some(libc::ENFILE) => LockReason::FdLimit,
                _ => LockReason::Unknown,
            };
            return Err(DbError::Lock {
                path: path.display().to_string(),
                reason,
            })
            .map_err(|e: DbError| eyre::Report::new(e).wrap_err(errno));
        }

        Ok(WriteLock { path, fd })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for WriteLock {
    fn drop(&mut self) {
        // Closing the descriptor releases the fcntl lock.
        unsafe { libc::close(self.fd) };
    }
}
