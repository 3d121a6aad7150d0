use std::fs;
use std::path::Path;
use tracing::{debug, info, instrument, warn};

#[cfg(unix)]
use std::os::unix::fs::PermissionsExt;

use super::{FailureCause, PackageError, PackageManager, PackageState};
use crate::config::Config;
use crate::exec::{Elevation, Invocation};

const INSTALLED_STATUS: &str = "install ok installed";

const DPKG_OPTIONS: &[&str] = &[
    "-o",
    "Dpkg::Options::=--force-confdef",
    "-o",
    "Dpkg::Options::=--force-confold",
];

/// `apt-get` for mutations, `dpkg-query` for state.
pub struct Apt {
    apt_get: String,
    dpkg_query: String,
    elevation: Elevation,
}

impl Apt {
    pub fn new(apt_get: &str, dpkg_query: &str, elevation: Elevation) -> Self {
        Apt {
            apt_get: apt_get.to_string(),
            dpkg_query: dpkg_query.to_string(),
            elevation,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Apt::new(
            &config.tools.apt_get,
            &config.tools.dpkg_query,
            Elevation::detect(&config.tools.pkexec),
        )
    }

    fn elevated(&self) -> bool {
        matches!(self.elevation, Elevation::Pkexec(_))
    }

    fn apt_invocation(&self, operation: &str) -> Invocation {
        Invocation::new(self.apt_get.as_str())
            .arg(operation)
            .arg("-y")
            .args(DPKG_OPTIONS.iter().copied())
            .env("DEBIAN_FRONTEND", "noninteractive")
    }

    fn run_elevated(&self, invocation: Invocation) -> Result<(), PackageError> {
        self.elevation
            .wrap(invocation)
            .run()
            .map(|_| ())
            .map_err(|e| PackageError::from_exec(e, self.elevated()))
    }
}

impl PackageManager for Apt {
    fn query(&self, id: &str) -> Result<PackageState, PackageError> {
        let output = Invocation::new(self.dpkg_query.as_str())
            .args(["-W", "-f=${Status}", id])
            .output()?;

        let installed = output.success() && output.stdout.trim().ends_with(INSTALLED_STATUS);
        debug!("Package {} installed={}", id, installed);
        Ok(PackageState::from_installed(installed))
    }

    #[instrument(skip(self))]
    fn refresh_index(&self) -> Result<(), PackageError> {
        info!("Refreshing package index");
        self.run_elevated(
            Invocation::new(self.apt_get.as_str())
                .arg("update")
                .env("DEBIAN_FRONTEND", "noninteractive"),
        )
    }

    #[instrument(skip(self))]
    fn install(&self, ids: &[String]) -> Result<(), PackageError> {
        info!("Installing {}", ids.join(", "));
        self.run_elevated(self.apt_invocation("install").args(ids.iter().cloned()))
    }

    #[instrument(skip(self))]
    fn remove(&self, id: &str) -> Result<(), PackageError> {
        info!("Removing {}", id);
        self.run_elevated(self.apt_invocation("remove").arg(id))
    }

    #[instrument(skip(self))]
    fn run_script(&self, script: &Path) -> Result<(), PackageError> {
        if !script.is_file() {
            return Err(PackageError::Failed {
                cause: FailureCause::MissingScript {
                    path: script.to_path_buf(),
                },
                detail: format!("{} does not exist", script.display()),
            });
        }

        #[cfg(unix)]
        if let Err(e) = fs::metadata(script).and_then(|meta| {
            let mut perms = meta.permissions();
            perms.set_mode(0o755);
            fs::set_permissions(script, perms)
        }) {
            warn!("Could not mark {} executable: {}", script.display(), e);
        }

        info!("Running install script {}", script.display());
        self.run_elevated(Invocation::new("/bin/bash").arg(script.display().to_string()))
    }
}
