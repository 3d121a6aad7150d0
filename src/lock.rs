// src/lock.rs

use chrono::Utc;
use nix::errno::Errno;
use nix::fcntl::{FlockArg, flock};
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::os::fd::AsRawFd;
use std::os::unix::fs::{MetadataExt, OpenOptionsExt, PermissionsExt};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, warn};

const MAX_ATTEMPTS: usize = 3;

/// Root and the store's non-root administrators share one marker.
const MARKER_MODE: u32 = 0o666;

#[derive(Debug, Error)]
pub enum LockError {
    #[error("Maintenance already in progress ({holder})")]
    Busy { holder: String },

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

/// Exclusive lock over the maintenance marker file. A holder that can write
/// the marker stamps it with its pid and start time and removes it on
/// release; one that can only read it (a marker left behind by another
/// user) still takes the flock but leaves the file alone.
#[derive(Debug)]
pub struct MaintenanceLock {
    path: PathBuf,
    writable: bool,
    _file: File,
}

impl MaintenanceLock {
    pub fn try_acquire(path: &Path) -> Result<Self, LockError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        for _ in 0..MAX_ATTEMPTS {
            let (mut file, writable) = Self::open_marker(path)?;

            match flock(file.as_raw_fd(), FlockArg::LockExclusiveNonblock) {
                Ok(()) => {}
                Err(Errno::EAGAIN) => {
                    let holder = fs::read_to_string(path).unwrap_or_default();
                    return Err(LockError::Busy {
                        holder: holder.trim().to_string(),
                    });
                }
                Err(e) => return Err(io::Error::from(e).into()),
            }

            // A previous holder may have unlinked the marker between open and flock.
            if !Self::still_names(path, &file)? {
                debug!("Lock marker {} was replaced, retrying", path.display());
                continue;
            }

            if writable {
                file.set_len(0)?;
                writeln!(file, "pid {} {}", std::process::id(), Utc::now().to_rfc3339())?;
            }

            debug!("Acquired maintenance lock {}", path.display());
            return Ok(MaintenanceLock {
                path: path.to_path_buf(),
                writable,
                _file: file,
            });
        }

        Err(LockError::Busy {
            holder: "contended".to_string(),
        })
    }

    /// Opens the marker read-write, creating it world-writable, or read-only
    /// when another user's marker denies writing.
    fn open_marker(path: &Path) -> io::Result<(File, bool)> {
        let opened = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .mode(MARKER_MODE)
            .open(path);

        match opened {
            Ok(file) => {
                // The umask strips the group and other bits on creation.
                let metadata = file.metadata()?;
                if metadata.permissions().mode() & 0o777 != MARKER_MODE
                    && metadata.uid() == nix::unistd::Uid::effective().as_raw()
                {
                    file.set_permissions(fs::Permissions::from_mode(MARKER_MODE))?;
                }
                Ok((file, true))
            }
            Err(e) if e.kind() == io::ErrorKind::PermissionDenied => {
                debug!("Lock marker {} is read-only for us", path.display());
                Ok((File::open(path)?, false))
            }
            Err(e) => Err(e),
        }
    }

    fn still_names(path: &Path, file: &File) -> io::Result<bool> {
        let locked = file.metadata()?;
        match fs::metadata(path) {
            Ok(current) => Ok(current.ino() == locked.ino() && current.dev() == locked.dev()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for MaintenanceLock {
    fn drop(&mut self) {
        if !self.writable {
            return;
        }
        // Unlink before the descriptor closes so the lock still covers removal.
        match fs::remove_file(&self.path) {
            Ok(()) => {}
            // Sticky lock directories only let the creator unlink.
            Err(e) if e.kind() == io::ErrorKind::PermissionDenied => {
                debug!("Leaving lock marker {} in place: {}", self.path.display(), e);
            }
            Err(e) => warn!("Failed to remove lock marker {}: {}", self.path.display(), e),
        }
    }
}
