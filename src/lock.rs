//! Per-namespace run lock
//!
//! `start` and `stop` hold an exclusive `flock(2)` on `<lock_dir>/<ns>.lock`
//! so two runs cannot interleave their existence checks. The kernel drops the
//! lock when the process exits, so a crashed run never leaves it stuck.
//!
//! An unprivileged caller elevating through sudo usually cannot create the
//! configured directory, so a per-user runtime directory serves as fallback.

use crate::error::{Error, Result};
use nix::errno::Errno;
use nix::fcntl::{Flock, FlockArg};
use std::env;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

/// Exclusive lock held until dropped
pub struct RunLock {
    _file: Flock<File>,
}

impl RunLock {
    /// Take the lock without blocking
    ///
    /// Fails with [`Error::LockHeld`] when another process holds it.
    pub fn acquire(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| Error::Lock {
                path: path.to_path_buf(),
                message: format!("cannot create {}: {}", parent.display(), e),
            })?;
        }

        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(path)
            .map_err(|e| Error::Lock {
                path: path.to_path_buf(),
                message: e.to_string(),
            })?;

        let lock = match Flock::lock(file, FlockArg::LockExclusiveNonblock) {
            Ok(lock) => lock,
            Err((_, Errno::EWOULDBLOCK)) => return Err(Error::LockHeld(path.to_path_buf())),
            Err((_, errno)) => {
                return Err(Error::Lock {
                    path: path.to_path_buf(),
                    message: errno.to_string(),
                });
            }
        };

        // Record the holder for operators inspecting the file
        lock.set_len(0)?;
        let mut handle: &File = &lock;
        writeln!(handle, "{}", std::process::id())?;

        tracing::debug!(path = %path.display(), "acquired run lock");
        Ok(Self { _file: lock })
    }

    /// Take the lock at the first candidate path that can be created
    ///
    /// A lock held by someone else is reported at once; only failures to
    /// create or open the file move on to the next candidate.
    pub fn acquire_first(candidates: &[PathBuf]) -> Result<Self> {
        let mut last = None;

        for path in candidates {
            match Self::acquire(path) {
                Err(e @ Error::Lock { .. }) => {
                    tracing::debug!("cannot lock {}: {}", path.display(), e);
                    last = Some(e);
                }
                other => return other,
            }
        }

        Err(last.unwrap_or_else(|| Error::Lock {
            path: PathBuf::new(),
            message: "no lock path candidates".into(),
        }))
    }
}

/// Per-user directory for lock files when the configured one is unusable
///
/// `$XDG_RUNTIME_DIR/vpnns`, or `vpnns-<euid>` under the temp directory.
pub fn user_lock_dir() -> PathBuf {
    match env::var_os("XDG_RUNTIME_DIR") {
        Some(dir) if !dir.is_empty() => PathBuf::from(dir).join("vpnns"),
        _ => env::temp_dir().join(format!("vpnns-{}", nix::unistd::geteuid())),
    }
}
