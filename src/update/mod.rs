pub mod sync;
pub mod vcs;

pub use sync::{SyncManifest, SyncReport};
pub use vcs::{GitCli, Vcs, VcsError};

use std::path::PathBuf;
use tracing::{error, info, instrument, warn};

use crate::config::Config;

/// Steps of one self-update pass, recorded in the order they were visited.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    CheckRepo,
    Clone,
    Fetch,
    CheckDrift,
    NoDrift,
    Drifted,
    SyncFiles,
    Restart,
    Done,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Drift {
    FreshClone,
    CommitMismatch { local: String, remote: String },
    FileMismatch(Vec<PathBuf>),
}

#[derive(Debug, Default)]
pub struct UpdateReport {
    pub phases: Vec<Phase>,
    pub drift: Option<Drift>,
    pub sync: SyncReport,
    pub aborted: Option<String>,
}

#[derive(Debug)]
pub enum UpdateOutcome {
    Done(UpdateReport),
    /// The running executable was replaced; the process must be relaunched.
    RestartRequested(UpdateReport),
}

impl UpdateOutcome {
    pub fn report(&self) -> &UpdateReport {
        match self {
            UpdateOutcome::Done(report) | UpdateOutcome::RestartRequested(report) => report,
        }
    }

    pub fn restart_requested(&self) -> bool {
        matches!(self, UpdateOutcome::RestartRequested(_))
    }
}

/// Keeps the working copy on the remote branch tip and the deployed files
/// identical to it. No step failure escapes a pass.
pub struct SelfUpdater<V: Vcs> {
    vcs: V,
    manifest: SyncManifest,
    running: Option<PathBuf>,
}

impl SelfUpdater<GitCli> {
    pub fn from_config(config: &Config) -> Self {
        SelfUpdater::new(
            GitCli::from_config(config),
            SyncManifest::new(config.repo_dir(), config.sync.clone()),
            std::env::current_exe().ok(),
        )
    }
}

impl<V: Vcs> SelfUpdater<V> {
    pub fn new(vcs: V, manifest: SyncManifest, running: Option<PathBuf>) -> Self {
        SelfUpdater {
            vcs,
            manifest,
            running,
        }
    }

    #[instrument(skip(self))]
    pub fn run(&self) -> UpdateOutcome {
        let mut report = UpdateReport::default();
        let mut phase = Phase::CheckRepo;

        loop {
            report.phases.push(phase);

            phase = match phase {
                Phase::CheckRepo => {
                    if self.vcs.working_copy_exists() {
                        Phase::Fetch
                    } else {
                        Phase::Clone
                    }
                }

                Phase::Clone => match self.vcs.clone_branch() {
                    Ok(()) => {
                        report.drift = Some(Drift::FreshClone);
                        Phase::CheckDrift
                    }
                    Err(e) => {
                        error!("Clone failed, skipping update: {}", e);
                        report.aborted = Some(e.to_string());
                        Phase::Done
                    }
                },

                Phase::Fetch => match self.vcs.fetch_and_checkout() {
                    Ok(()) => Phase::CheckDrift,
                    Err(e) => {
                        warn!("Fetch failed, assuming no drift: {}", e);
                        Phase::NoDrift
                    }
                },

                // A fresh clone has never been deployed; always sync it.
                Phase::CheckDrift if report.drift == Some(Drift::FreshClone) => Phase::Drifted,

                Phase::CheckDrift => match (self.vcs.local_head(), self.vcs.remote_head()) {
                    (Ok(local), Ok(remote)) if local == remote => Phase::NoDrift,
                    (Ok(local), Ok(remote)) => {
                        info!("Working copy at {} but remote at {}", local, remote);
                        report.drift = Some(Drift::CommitMismatch { local, remote });
                        Phase::Drifted
                    }
                    (Err(e), _) | (_, Err(e)) => {
                        warn!("Could not compare revisions, assuming no drift: {}", e);
                        Phase::NoDrift
                    }
                },

                Phase::NoDrift => {
                    let mismatched = self.manifest.mismatched();
                    if mismatched.is_empty() {
                        Phase::Done
                    } else {
                        warn!("{} deployed file(s) differ from the working copy", mismatched.len());
                        report.drift = Some(Drift::FileMismatch(mismatched));
                        Phase::Drifted
                    }
                }

                Phase::Drifted => {
                    if let Err(e) = self.vcs.reset_hard_to_remote() {
                        warn!("Reset failed, syncing from the working copy as is: {}", e);
                    }
                    Phase::SyncFiles
                }

                Phase::SyncFiles => {
                    report.sync = self.manifest.apply(self.running.as_deref());
                    info!(
                        "Sync complete: {} deployed, {} skipped, {} failed",
                        report.sync.synced.len(),
                        report.sync.skipped.len(),
                        report.sync.failed.len()
                    );
                    if report.sync.restart_required {
                        Phase::Restart
                    } else {
                        Phase::Done
                    }
                }

                Phase::Restart => {
                    info!("Running executable was updated, restart requested");
                    return UpdateOutcome::RestartRequested(report);
                }

                Phase::Done => return UpdateOutcome::Done(report),
            };
        }
    }
}
