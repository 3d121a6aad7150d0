// src/reconcile.rs

use rayon::prelude::*;
use tracing::{error, info, instrument, warn};

use crate::packages::{FailureCause, PackageManager, PackageState};

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Outcome {
    pub missing: Vec<String>,
    pub installed_now: Vec<String>,
    pub failed: bool,
    pub cause: Option<FailureCause>,
}

impl Outcome {
    pub fn is_ok(&self) -> bool {
        !self.failed
    }
}

fn query_all<P>(packages: &P, required: &[String]) -> Vec<PackageState>
where
    P: PackageManager + ?Sized,
{
    let query = |id: &String| match packages.query(id) {
        Ok(state) => state,
        Err(e) => {
            warn!("Query for {} failed, treating as absent: {}", id, e);
            PackageState::Absent
        }
    };

    let workers = num_cpus::get().clamp(1, required.len().max(1));
    match rayon::ThreadPoolBuilder::new().num_threads(workers).build() {
        Ok(pool) => pool.install(|| required.par_iter().map(query).collect()),
        Err(e) => {
            warn!("Falling back to sequential queries: {}", e);
            required.iter().map(query).collect()
        }
    }
}

/// Installs whatever part of `required` is missing in a single batch.
/// The batch succeeds or fails as a whole.
#[instrument(skip(packages))]
pub fn reconcile<P>(packages: &P, required: &[String]) -> Outcome
where
    P: PackageManager + ?Sized,
{
    let states = query_all(packages, required);

    let missing: Vec<String> = required
        .iter()
        .zip(states)
        .filter(|(_, state)| !state.is_installed())
        .map(|(id, _)| id.clone())
        .collect();

    if missing.is_empty() {
        info!("All {} required packages present", required.len());
        return Outcome::default();
    }

    info!("Missing required packages: {}", missing.join(", "));

    if let Err(e) = packages.refresh_index() {
        warn!("Package index refresh failed, installing anyway: {}", e);
    }

    match packages.install(&missing) {
        Ok(()) => {
            info!("Installed {}", missing.join(", "));
            Outcome {
                installed_now: missing.clone(),
                missing,
                failed: false,
                cause: None,
            }
        }
        Err(e) => {
            error!("Installing required packages failed: {}", e);
            Outcome {
                missing,
                installed_now: Vec::new(),
                failed: true,
                cause: Some(e.cause()),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packages::fake::FakePackageManager;

    fn ids(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn nothing_missing_issues_no_install() {
        let pm = FakePackageManager::with_installed(&["pkgA", "pkgB", "extra"]);

        let outcome = reconcile(&pm, &ids(&["pkgA", "pkgB"]));

        assert!(outcome.is_ok());
        assert!(outcome.missing.is_empty());
        assert!(pm.mutating_calls().is_empty());
    }

    #[test]
    fn installs_exactly_the_missing_packages() {
        let pm = FakePackageManager::with_installed(&["pkgA"]);

        let outcome = reconcile(&pm, &ids(&["pkgA", "pkgB"]));

        assert!(outcome.is_ok());
        assert_eq!(outcome.installed_now, ids(&["pkgB"]));
        assert_eq!(pm.mutating_calls(), vec!["update", "install pkgB"]);
        assert_eq!(pm.query("pkgA").unwrap(), PackageState::Installed);
        assert_eq!(pm.query("pkgB").unwrap(), PackageState::Installed);
    }

    #[test]
    fn missing_order_follows_the_required_set() {
        let pm = FakePackageManager::with_installed(&["b"]);

        let outcome = reconcile(&pm, &ids(&["d", "a", "b", "c"]));

        assert_eq!(outcome.missing, ids(&["d", "a", "c"]));
    }

    #[test]
    fn refresh_failure_does_not_block_install() {
        let pm = FakePackageManager {
            fail_refresh: true,
            ..Default::default()
        };

        let outcome = reconcile(&pm, &ids(&["vlc"]));

        assert!(outcome.is_ok());
        assert_eq!(pm.mutating_calls(), vec!["update", "install vlc"]);
    }

    #[test]
    fn batch_failure_fails_the_whole_set() {
        let pm = FakePackageManager {
            fail_install: Some(FailureCause::LockConflict),
            ..FakePackageManager::with_installed(&["git"])
        };

        let outcome = reconcile(&pm, &ids(&["git", "zenity", "vlc"]));

        assert!(outcome.failed);
        assert_eq!(outcome.missing, ids(&["zenity", "vlc"]));
        assert!(outcome.installed_now.is_empty());
        assert_eq!(outcome.cause, Some(FailureCause::LockConflict));
    }
}
