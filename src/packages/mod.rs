pub mod apt;
pub mod busy;

pub use apt::Apt;
pub use busy::PackageSystemProbe;

use regex::Regex;
use std::fmt;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::exec::ExecError;

lazy_static::lazy_static! {
    static ref NOT_FOUND_REGEX: Regex = Regex::new(
        r"(?m)^E: (?:Unable to locate package (\S+)|Package '([^']+)' has no installation candidate)"
    ).unwrap();
    static ref LOCK_REGEX: Regex = Regex::new(
        r"(?m)^E: (?:Could not get lock|Unable to acquire the dpkg frontend lock|Unable to lock)"
    ).unwrap();
}

/// apt-get exits with this code for every operational error.
const APT_ERROR_EXIT: i32 = 100;
const PKEXEC_DISMISSED_EXIT: i32 = 126;
const PKEXEC_DENIED_EXIT: i32 = 127;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PackageState {
    Installed,
    Absent,
}

impl PackageState {
    pub fn from_installed(installed: bool) -> Self {
        if installed {
            PackageState::Installed
        } else {
            PackageState::Absent
        }
    }

    pub fn is_installed(self) -> bool {
        self == PackageState::Installed
    }
}

/// Why a package operation did not take effect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureCause {
    NotFound { package: String },
    LockConflict,
    AuthorizationDenied,
    AuthorizationDismissed,
    MissingScript { path: PathBuf },
    VerificationMismatch,
    Generic,
}

impl fmt::Display for FailureCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureCause::NotFound { package } => {
                write!(f, "Package {} was not found in the configured repositories.", package)
            }
            FailureCause::LockConflict => write!(
                f,
                "Another installation or update is in progress. Try again when it finishes."
            ),
            FailureCause::AuthorizationDenied => {
                write!(f, "Administrator authorization was denied.")
            }
            FailureCause::AuthorizationDismissed => {
                write!(f, "The authorization prompt was dismissed.")
            }
            FailureCause::MissingScript { path } => {
                write!(f, "Install script {} is missing.", path.display())
            }
            FailureCause::VerificationMismatch => write!(
                f,
                "The package manager reported success but the package state did not change."
            ),
            FailureCause::Generic => write!(f, "The package operation failed."),
        }
    }
}

impl FailureCause {
    /// Maps an exit code and apt's `E:` diagnostics onto a cause.
    pub fn classify(code: Option<i32>, stderr: &str, elevated: bool) -> Self {
        match code {
            Some(PKEXEC_DISMISSED_EXIT) if elevated => FailureCause::AuthorizationDismissed,
            Some(PKEXEC_DENIED_EXIT) if elevated => FailureCause::AuthorizationDenied,
            Some(APT_ERROR_EXIT) => {
                if let Some(caps) = NOT_FOUND_REGEX.captures(stderr) {
                    let package = caps
                        .get(1)
                        .or_else(|| caps.get(2))
                        .map(|m| m.as_str().to_string())
                        .unwrap_or_default();
                    FailureCause::NotFound { package }
                } else if LOCK_REGEX.is_match(stderr) {
                    FailureCause::LockConflict
                } else {
                    FailureCause::Generic
                }
            }
            _ => FailureCause::Generic,
        }
    }
}

#[derive(Debug, Error)]
pub enum PackageError {
    #[error("{cause}")]
    Failed { cause: FailureCause, detail: String },

    #[error(transparent)]
    Exec(#[from] ExecError),
}

impl PackageError {
    pub fn cause(&self) -> FailureCause {
        match self {
            PackageError::Failed { cause, .. } => cause.clone(),
            PackageError::Exec(_) => FailureCause::Generic,
        }
    }

    pub(crate) fn from_exec(err: ExecError, elevated: bool) -> Self {
        match err {
            ExecError::Failed { code, stderr, .. } => PackageError::Failed {
                cause: FailureCause::classify(code, &stderr, elevated),
                detail: stderr,
            },
            other => PackageError::Exec(other),
        }
    }
}

/// The system package manager as seen by the store and the agent.
pub trait PackageManager: Send + Sync {
    fn query(&self, id: &str) -> Result<PackageState, PackageError>;

    fn refresh_index(&self) -> Result<(), PackageError>;

    fn install(&self, ids: &[String]) -> Result<(), PackageError>;

    fn remove(&self, id: &str) -> Result<(), PackageError>;

    /// Runs a custom install script with elevated privileges.
    fn run_script(&self, script: &Path) -> Result<(), PackageError>;
}

#[cfg(test)]
pub(crate) mod fake {
    use super::*;
    use std::collections::BTreeSet;
    use std::sync::Mutex;

    /// In-memory package manager recording every mutating call.
    #[derive(Default)]
    pub struct FakePackageManager {
        pub installed: Mutex<BTreeSet<String>>,
        pub calls: Mutex<Vec<String>>,
        pub fail_refresh: bool,
        pub fail_install: Option<FailureCause>,
        /// Report success without changing state.
        pub lie_on_success: bool,
    }

    impl FakePackageManager {
        pub fn with_installed(ids: &[&str]) -> Self {
            FakePackageManager {
                installed: Mutex::new(ids.iter().map(|s| s.to_string()).collect()),
                ..Default::default()
            }
        }

        pub fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }

        pub fn mutating_calls(&self) -> Vec<String> {
            self.calls()
                .into_iter()
                .filter(|c| !c.starts_with("query"))
                .collect()
        }

        fn record(&self, call: String) {
            self.calls.lock().unwrap().push(call);
        }
    }

    impl PackageManager for FakePackageManager {
        fn query(&self, id: &str) -> Result<PackageState, PackageError> {
            self.record(format!("query {}", id));
            Ok(PackageState::from_installed(
                self.installed.lock().unwrap().contains(id),
            ))
        }

        fn refresh_index(&self) -> Result<(), PackageError> {
            self.record("update".to_string());
            if self.fail_refresh {
                return Err(PackageError::Failed {
                    cause: FailureCause::Generic,
                    detail: "network unreachable".to_string(),
                });
            }
            Ok(())
        }

        fn install(&self, ids: &[String]) -> Result<(), PackageError> {
            self.record(format!("install {}", ids.join(" ")));
            if let Some(cause) = &self.fail_install {
                return Err(PackageError::Failed {
                    cause: cause.clone(),
                    detail: String::new(),
                });
            }
            if !self.lie_on_success {
                self.installed.lock().unwrap().extend(ids.iter().cloned());
            }
            Ok(())
        }

        fn remove(&self, id: &str) -> Result<(), PackageError> {
            self.record(format!("remove {}", id));
            if !self.lie_on_success {
                self.installed.lock().unwrap().remove(id);
            }
            Ok(())
        }

        fn run_script(&self, script: &Path) -> Result<(), PackageError> {
            self.record(format!("script {}", script.display()));
            if !script.exists() {
                return Err(PackageError::Failed {
                    cause: FailureCause::MissingScript {
                        path: script.to_path_buf(),
                    },
                    detail: String::new(),
                });
            }
            Ok(())
        }
    }
}
