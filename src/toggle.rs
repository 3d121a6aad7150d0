// src/toggle.rs

use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::mpsc::{self, Receiver, Sender};
use std::thread;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::catalog::{self, CatalogEntry};
use crate::config::Config;
use crate::lock::{LockError, MaintenanceLock};
use crate::notify::{DialogKind, Notifier, Urgency};
use crate::packages::{FailureCause, PackageManager, PackageSystemProbe};

const STORE_TITLE: &str = "GuadaMint Store";

/// What the control for one catalog entry shows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryState {
    Installed,
    NotInstalled,
    /// An operation is in flight; the control is disabled.
    Busy { previous: bool, target: bool },
}

impl EntryState {
    fn from_installed(installed: bool) -> Self {
        if installed {
            EntryState::Installed
        } else {
            EntryState::NotInstalled
        }
    }

    /// The on/off position the control displays.
    pub fn shown_installed(self) -> bool {
        match self {
            EntryState::Installed => true,
            EntryState::NotInstalled => false,
            EntryState::Busy { target, .. } => target,
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum Rejection {
    #[error("Unknown catalog entry {0}")]
    UnknownEntry(String),

    #[error("An operation for this entry is already running")]
    AlreadyBusy,

    #[error("Nothing to do: the entry is already in that state")]
    NoChange,

    #[error("The package system is busy ({holder})")]
    PackageSystemBusy { holder: String },

    #[error("A maintenance pass is running ({holder})")]
    MaintenanceRunning { holder: String },

    #[error("Cannot take the maintenance lock: {0}")]
    LockUnavailable(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToggleEvent {
    StateLoaded { id: String, installed: bool },
    Completed { id: String, installed: bool },
    Failed {
        id: String,
        reverted_to: bool,
        cause: FailureCause,
    },
}

/// Sent from worker threads; each worker sends exactly one.
#[derive(Debug)]
enum WorkerMessage {
    StateQueried {
        id: &'static str,
        installed: Option<bool>,
    },
    OperationFinished {
        id: &'static str,
        result: Result<(), FailureCause>,
    },
}

/// Install/remove toggles for the catalog. State lives on the thread that
/// owns the controller; package operations run on worker threads and their
/// results are applied by `process_pending` or `wait_for`.
pub struct ToggleController {
    packages: Arc<dyn PackageManager>,
    notifier: Arc<dyn Notifier>,
    probe: PackageSystemProbe,
    lock_path: PathBuf,
    scripts_dir: PathBuf,
    states: HashMap<&'static str, EntryState>,
    sender: Sender<WorkerMessage>,
    receiver: Receiver<WorkerMessage>,
}

impl ToggleController {
    pub fn new(
        packages: Arc<dyn PackageManager>,
        notifier: Arc<dyn Notifier>,
        probe: PackageSystemProbe,
        lock_path: PathBuf,
        scripts_dir: PathBuf,
    ) -> Self {
        let (sender, receiver) = mpsc::channel();
        let states = catalog::entries()
            .map(|entry| (entry.id, EntryState::NotInstalled))
            .collect();

        ToggleController {
            packages,
            notifier,
            probe,
            lock_path,
            scripts_dir,
            states,
            sender,
            receiver,
        }
    }

    pub fn from_config(
        config: &Config,
        packages: Arc<dyn PackageManager>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        ToggleController::new(
            packages,
            notifier,
            PackageSystemProbe::new(config.proc_root()),
            config.lock_marker(),
            config.scripts_dir(),
        )
    }

    pub fn state(&self, id: &str) -> Option<EntryState> {
        self.states.get(id).copied()
    }

    /// Queries every entry in the background.
    pub fn load_states(&self) {
        for entry in catalog::entries() {
            self.refresh(entry.id);
        }
    }

    pub fn refresh(&self, id: &str) {
        let Some(entry) = catalog::find(id) else {
            return;
        };

        let packages = Arc::clone(&self.packages);
        let sender = self.sender.clone();
        thread::spawn(move || {
            let queried = panic::catch_unwind(AssertUnwindSafe(|| packages.query(entry.id)));
            let installed = match queried {
                Ok(Ok(state)) => Some(state.is_installed()),
                Ok(Err(e)) => {
                    warn!("Query for {} failed: {}", entry.id, e);
                    None
                }
                Err(_) => {
                    error!("Query for {} panicked", entry.id);
                    None
                }
            };
            let _ = sender.send(WorkerMessage::StateQueried {
                id: entry.id,
                installed,
            });
        });
    }

    /// Starts moving `id` to `install`. Rejections leave the visible state
    /// untouched and never start a package operation.
    pub fn request(&mut self, id: &str, install: bool) -> Result<(), Rejection> {
        let entry = catalog::find(id).ok_or_else(|| Rejection::UnknownEntry(id.to_string()))?;

        let previous = match self.states.get(entry.id) {
            Some(EntryState::Busy { .. }) => return Err(Rejection::AlreadyBusy),
            Some(state) => state.shown_installed(),
            None => false,
        };
        if previous == install {
            return Err(Rejection::NoChange);
        }

        if let Some(holder) = self.probe.holder() {
            let rejection = Rejection::PackageSystemBusy { holder };
            self.report_conflict(&rejection);
            return Err(rejection);
        }

        let lock = match MaintenanceLock::try_acquire(&self.lock_path) {
            Ok(lock) => lock,
            Err(LockError::Busy { holder }) => {
                let rejection = Rejection::MaintenanceRunning { holder };
                self.report_conflict(&rejection);
                return Err(rejection);
            }
            Err(LockError::Io(e)) => {
                let rejection = Rejection::LockUnavailable(e.to_string());
                self.report_conflict(&rejection);
                return Err(rejection);
            }
        };

        info!(
            "{} {}",
            if install { "Installing" } else { "Removing" },
            entry.id
        );
        self.states.insert(
            entry.id,
            EntryState::Busy {
                previous,
                target: install,
            },
        );

        let packages = Arc::clone(&self.packages);
        let sender = self.sender.clone();
        let scripts_dir = self.scripts_dir.clone();
        thread::spawn(move || {
            // Must report even on panic: `wait_for` holds a sender and never sees a disconnect.
            let result = panic::catch_unwind(AssertUnwindSafe(|| {
                perform(packages.as_ref(), entry, install, &scripts_dir)
            }))
            .unwrap_or_else(|_| {
                error!("Operation on {} panicked", entry.id);
                Err(FailureCause::Generic)
            });
            drop(lock);
            let _ = sender.send(WorkerMessage::OperationFinished {
                id: entry.id,
                result,
            });
        });

        Ok(())
    }

    /// Applies every result that has arrived so far.
    pub fn process_pending(&mut self) -> Vec<ToggleEvent> {
        let mut events = Vec::new();
        while let Ok(message) = self.receiver.try_recv() {
            events.extend(self.apply(message));
        }
        events
    }

    /// Blocks until the operation running for `id` reports back.
    pub fn wait_for(&mut self, id: &str) -> Option<ToggleEvent> {
        if !matches!(self.states.get(id), Some(EntryState::Busy { .. })) {
            return None;
        }

        while let Ok(message) = self.receiver.recv() {
            let finished_here =
                matches!(&message, WorkerMessage::OperationFinished { id: done, .. } if *done == id);
            let event = self.apply(message);
            if finished_here {
                return event;
            }
        }
        None
    }

    /// Blocks until every entry has been queried once.
    pub fn wait_for_states(&mut self) -> Vec<ToggleEvent> {
        let mut events = Vec::new();
        let mut remaining = self.states.len();
        while remaining > 0 {
            let Ok(message) = self.receiver.recv() else {
                break;
            };
            if matches!(message, WorkerMessage::StateQueried { .. }) {
                remaining -= 1;
            }
            events.extend(self.apply(message));
        }
        events
    }

    fn apply(&mut self, message: WorkerMessage) -> Option<ToggleEvent> {
        match message {
            WorkerMessage::StateQueried { id, installed } => {
                let installed = installed?;
                if matches!(self.states.get(id), Some(EntryState::Busy { .. })) {
                    return None;
                }
                self.states.insert(id, EntryState::from_installed(installed));
                Some(ToggleEvent::StateLoaded {
                    id: id.to_string(),
                    installed,
                })
            }
            WorkerMessage::OperationFinished { id, result } => {
                let Some(EntryState::Busy { previous, target }) = self.states.get(id).copied()
                else {
                    warn!("Result for {} arrived while it was not busy", id);
                    return None;
                };
                let name = catalog::find(id).map_or(id, |entry| entry.name);

                match result {
                    Ok(()) => {
                        self.states.insert(id, EntryState::from_installed(target));
                        if let Err(e) = self.notifier.notify(
                            STORE_TITLE,
                            &format!("Operación completada: {}", name),
                            Urgency::Normal,
                        ) {
                            debug!("Notification skipped: {}", e);
                        }
                        Some(ToggleEvent::Completed {
                            id: id.to_string(),
                            installed: target,
                        })
                    }
                    Err(cause) => {
                        self.states.insert(id, EntryState::from_installed(previous));
                        warn!("Operation on {} failed: {}", id, cause);
                        if let Err(e) = self.notifier.dialog(
                            DialogKind::Error,
                            STORE_TITLE,
                            &format!("No se pudo modificar {}.\n{}", name, cause),
                        ) {
                            warn!("Could not show error dialog: {}", e);
                        }
                        Some(ToggleEvent::Failed {
                            id: id.to_string(),
                            reverted_to: previous,
                            cause,
                        })
                    }
                }
            }
        }
    }

    fn report_conflict(&self, rejection: &Rejection) {
        warn!("Toggle rejected: {}", rejection);
        let text = format!(
            "{}\n{}",
            rejection,
            FailureCause::LockConflict
        );
        if let Err(e) = self.notifier.dialog(DialogKind::Error, STORE_TITLE, &text) {
            warn!("Could not show conflict dialog: {}", e);
        }
    }
}

/// Runs one install/remove and confirms the package manager's answer
/// against a fresh query.
fn perform(
    packages: &dyn PackageManager,
    entry: &CatalogEntry,
    install: bool,
    scripts_dir: &Path,
) -> Result<(), FailureCause> {
    let outcome = match (install, entry.script_install) {
        (true, Some(script)) => packages.run_script(&scripts_dir.join(script)),
        (true, None) => packages.install(&[entry.id.to_string()]),
        (false, _) => packages.remove(entry.id),
    };
    outcome.map_err(|e| e.cause())?;

    match packages.query(entry.id) {
        Ok(state) if state.is_installed() == install => Ok(()),
        Ok(_) => Err(FailureCause::VerificationMismatch),
        Err(e) => {
            warn!("Verification query for {} failed: {}", entry.id, e);
            Err(FailureCause::VerificationMismatch)
        }
    }
}
