// src/agent.rs

use std::io;
use std::path::PathBuf;
use tracing::{debug, error, info, instrument, warn};

use crate::config::Config;
use crate::desktop::{Desktop, detect_desktop, rebrand};
use crate::lock::{LockError, MaintenanceLock};
use crate::notify::{DesktopNotifier, DialogKind, Notifier, TraySession, Urgency};
use crate::packages::{Apt, PackageManager};
use crate::privileges::require_root;
use crate::reconcile::reconcile;
use crate::supervisor::EXIT_RESTART;
use crate::update::{SelfUpdater, UpdateOutcome};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PassOutcome {
    Completed,
    /// Another maintenance pass or store operation held the lock.
    Skipped,
    RestartRequested,
}

impl PassOutcome {
    pub fn exit_code(self) -> i32 {
        match self {
            PassOutcome::RestartRequested => EXIT_RESTART,
            PassOutcome::Completed | PassOutcome::Skipped => 0,
        }
    }
}

/// Everything one unattended pass touches besides the self-update itself.
pub struct Maintenance<'a> {
    packages: &'a dyn PackageManager,
    notifier: &'a dyn Notifier,
    required: &'a [String],
    lock_path: PathBuf,
    session_root: PathBuf,
    home_root: PathBuf,
    menu_icon: &'a str,
}

impl<'a> Maintenance<'a> {
    pub fn from_config(
        config: &'a Config,
        packages: &'a dyn PackageManager,
        notifier: &'a dyn Notifier,
    ) -> Self {
        Maintenance {
            packages,
            notifier,
            required: &config.required.packages,
            lock_path: config.lock_marker(),
            session_root: config.session_root(),
            home_root: config.home_root(),
            menu_icon: &config.branding.menu_icon,
        }
    }

    /// Self-update, then required packages, then branding. A failing phase
    /// is logged and never stops the next one; only a restart ends the pass
    /// early, with the lock released on return.
    pub fn run(&self, tray: &mut TraySession, update: impl FnOnce() -> UpdateOutcome) -> PassOutcome {
        let lock = match MaintenanceLock::try_acquire(&self.lock_path) {
            Ok(lock) => lock,
            Err(LockError::Busy { holder }) => {
                info!("Maintenance already running ({}), skipping this pass", holder);
                return PassOutcome::Skipped;
            }
            Err(e) => {
                error!("Cannot take the maintenance lock: {}", e);
                return PassOutcome::Skipped;
            }
        };
        debug!("Holding {}", lock.path().display());

        tray.status("GuadaMint: buscando actualizaciones");
        let outcome = update();
        let report = outcome.report();
        debug!("Update phases: {:?}", report.phases);
        if let Some(reason) = &report.aborted {
            warn!("Self-update aborted: {}", reason);
        }
        if report.sync.has_failures() {
            warn!("{} deployed files could not be refreshed", report.sync.failed.len());
        }
        if outcome.restart_requested() {
            tray.message("GuadaMint se ha actualizado y se reiniciará");
            return PassOutcome::RestartRequested;
        }

        tray.status("GuadaMint: comprobando paquetes necesarios");
        let result = reconcile(self.packages, self.required);
        if !result.is_ok() {
            let cause = result
                .cause
                .map(|cause| cause.to_string())
                .unwrap_or_default();
            let body = format!(
                "No se pudieron instalar: {}.\n{}",
                result.missing.join(", "),
                cause
            );
            if let Err(e) = self.notifier.notify("GuadaMint", &body, Urgency::Critical) {
                warn!("Could not notify reconcile failure: {}", e);
            }
        } else if !result.installed_now.is_empty() {
            tray.message(&format!("Instalado: {}", result.installed_now.join(", ")));
        }

        tray.status("GuadaMint: personalizando el escritorio");
        let desktop = detect_desktop(&self.session_root);
        let report = rebrand(desktop, &self.home_root, self.menu_icon);
        if !report.failed.is_empty() {
            warn!("{} menu configs could not be rebranded", report.failed.len());
        }

        PassOutcome::Completed
    }
}

/// One full maintenance pass as root.
#[instrument(skip(config))]
pub fn run_agent(config: &Config) -> io::Result<PassOutcome> {
    require_root()?;

    let notifier = DesktopNotifier::from_config(config);
    let mut tray = notifier.open_tray(&config.branding.menu_icon);
    if !tray.is_active() {
        info!("Running without a tray icon");
    }
    let packages = Apt::from_config(config);
    let updater = SelfUpdater::from_config(config);

    let outcome = Maintenance::from_config(config, &packages, &notifier)
        .run(&mut tray, || updater.run());

    tray.close();
    info!("Maintenance pass finished: {:?}", outcome);
    Ok(outcome)
}

/// Only the self-update protocol, under the maintenance lock.
pub fn run_update(config: &Config) -> io::Result<PassOutcome> {
    require_root()?;

    let _lock = match MaintenanceLock::try_acquire(&config.lock_marker()) {
        Ok(lock) => lock,
        Err(LockError::Busy { holder }) => {
            info!("Maintenance already running ({}), skipping update", holder);
            return Ok(PassOutcome::Skipped);
        }
        Err(LockError::Io(e)) => return Err(e),
    };

    let outcome = SelfUpdater::from_config(config).run();
    if outcome.restart_requested() {
        Ok(PassOutcome::RestartRequested)
    } else {
        Ok(PassOutcome::Completed)
    }
}

/// Only the required-set reconciliation. A failed batch is an error.
pub fn run_reconcile(config: &Config) -> io::Result<()> {
    require_root()?;

    let _lock = match MaintenanceLock::try_acquire(&config.lock_marker()) {
        Ok(lock) => lock,
        Err(LockError::Busy { holder }) => {
            info!("Maintenance already running ({}), skipping reconcile", holder);
            return Ok(());
        }
        Err(LockError::Io(e)) => return Err(e),
    };

    let outcome = reconcile(&Apt::from_config(config), &config.required.packages);
    match outcome.cause {
        Some(cause) => Err(io::Error::other(cause.to_string())),
        None => Ok(()),
    }
}

pub fn run_rebrand(config: &Config) -> io::Result<()> {
    require_root()?;

    let desktop = detect_desktop(&config.session_root());
    let report = rebrand(desktop, &config.home_root(), &config.branding.menu_icon);
    info!(
        "Rebranded {} files, {} already up to date, {} failed",
        report.updated.len(),
        report.unchanged.len(),
        report.failed.len()
    );
    Ok(())
}

/// Logs the desktop environment and greets the graphical user.
pub fn announce_desktop(config: &Config, notifier: &dyn Notifier) -> Desktop {
    let desktop = detect_desktop(&config.session_root());
    info!("Detected desktop: {}", desktop);

    let text = format!(
        "Bienvenido a GuadaMint.\nSe ha detectado el escritorio: {}",
        desktop
    );
    if let Err(e) = notifier.dialog(DialogKind::Info, "Información del Sistema", &text) {
        warn!("Could not show welcome dialog: {}", e);
    }
    desktop
}

pub fn run_detect(config: &Config) -> io::Result<()> {
    announce_desktop(config, &DesktopNotifier::from_config(config));
    Ok(())
}
