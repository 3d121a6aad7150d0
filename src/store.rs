// src/store.rs

use std::fmt::Write as _;
use std::io;
use std::sync::Arc;
use tracing::{info, warn};

use crate::agent::{self, PassOutcome};
use crate::catalog;
use crate::config::Config;
use crate::notify::{DesktopNotifier, DialogKind, Notifier};
use crate::packages::Apt;
use crate::privileges::{is_administrator, is_root};
use crate::supervisor::EXIT_RESTART;
use crate::toggle::{EntryState, Rejection, ToggleController, ToggleEvent};

const RESTRICTED_TITLE: &str = "Acceso Restringido";
const RESTRICTED_TEXT: &str = "Esta aplicación es solo para administradores.\n\nContacte con su administrador/a TDE para instalar aplicaciones.";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreCommand {
    List,
    Install(String),
    Remove(String),
}

impl StoreCommand {
    pub fn parse(args: &[String]) -> Option<Self> {
        match args {
            [cmd] if cmd == "list" => Some(StoreCommand::List),
            [cmd, id] if cmd == "install" => Some(StoreCommand::Install(id.clone())),
            [cmd, id] if cmd == "remove" => Some(StoreCommand::Remove(id.clone())),
            _ => None,
        }
    }
}

/// Catalog grouped by category, one line per entry with its state.
pub fn render_catalog(controller: &ToggleController) -> String {
    let mut out = String::new();
    for category in catalog::categories() {
        let _ = writeln!(out, "== {} ==", category.name);
        for entry in category.entries {
            let mark = match controller.state(entry.id) {
                Some(EntryState::Installed) => "x",
                Some(EntryState::Busy { .. }) => "~",
                _ => " ",
            };
            let _ = writeln!(
                out,
                "[{}] {:<12} {} - {} ({})",
                mark, entry.id, entry.name, entry.description, entry.icon
            );
        }
    }
    out
}

/// Applies one toggle and reports its outcome. Returns the exit code.
pub fn toggle_entry(controller: &mut ToggleController, id: &str, install: bool) -> i32 {
    controller.load_states();
    controller.wait_for_states();

    match controller.request(id, install) {
        Ok(()) => {}
        Err(Rejection::NoChange) => {
            println!(
                "{} ya está {}",
                id,
                if install { "instalado" } else { "desinstalado" }
            );
            return 0;
        }
        Err(rejection) => {
            eprintln!("❌ {}", rejection);
            return 1;
        }
    }

    match controller.wait_for(id) {
        Some(ToggleEvent::Completed { .. }) => {
            println!("✅ Operación completada: {}", id);
            0
        }
        Some(ToggleEvent::Failed { cause, .. }) => {
            eprintln!("❌ {}", cause);
            1
        }
        _ => 1,
    }
}

pub fn run_store(config: &Config, command: &StoreCommand) -> io::Result<i32> {
    let notifier = Arc::new(DesktopNotifier::from_config(config));

    if !is_administrator() {
        eprintln!("{}: {}", RESTRICTED_TITLE, RESTRICTED_TEXT);
        if let Err(e) = notifier.dialog(DialogKind::Error, RESTRICTED_TITLE, RESTRICTED_TEXT) {
            warn!("Could not show restricted-access dialog: {}", e);
        }
        return Ok(0);
    }

    // Only root can rewrite the deployed files.
    if is_root() {
        match agent::run_update(config) {
            Ok(PassOutcome::RestartRequested) => {
                info!("Store updated itself, restart requested");
                return Ok(EXIT_RESTART);
            }
            Ok(_) => {}
            Err(e) => warn!("Store self-update skipped: {}", e),
        }
    }

    let mut controller = ToggleController::from_config(
        config,
        Arc::new(Apt::from_config(config)),
        notifier,
    );

    match command {
        StoreCommand::List => {
            controller.load_states();
            controller.wait_for_states();
            print!("{}", render_catalog(&controller));
            Ok(0)
        }
        StoreCommand::Install(id) => Ok(toggle_entry(&mut controller, id, true)),
        StoreCommand::Remove(id) => Ok(toggle_entry(&mut controller, id, false)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notify::fake::RecordingNotifier;
    use crate::packages::PackageSystemProbe;
    use crate::packages::fake::FakePackageManager;
    use tempfile::TempDir;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    fn controller(root: &TempDir, packages: FakePackageManager) -> ToggleController {
        ToggleController::new(
            Arc::new(packages),
            Arc::new(RecordingNotifier::default()),
            PackageSystemProbe::new(root.path().join("proc")),
            root.path().join("guadamint.lock"),
            root.path().join("scripts"),
        )
    }

    #[test]
    fn parses_store_commands() {
        assert_eq!(StoreCommand::parse(&args(&["list"])), Some(StoreCommand::List));
        assert_eq!(
            StoreCommand::parse(&args(&["install", "vlc"])),
            Some(StoreCommand::Install("vlc".to_string()))
        );
        assert_eq!(
            StoreCommand::parse(&args(&["remove", "vlc"])),
            Some(StoreCommand::Remove("vlc".to_string()))
        );
        assert_eq!(StoreCommand::parse(&args(&["install"])), None);
        assert_eq!(StoreCommand::parse(&args(&[])), None);
    }

    #[test]
    fn catalog_listing_marks_installed_entries() {
        let root = TempDir::new().unwrap();
        let mut controller = controller(&root, FakePackageManager::with_installed(&["vlc"]));
        controller.load_states();
        controller.wait_for_states();

        let listing = render_catalog(&controller);

        assert!(listing.starts_with("== Educación ==\n"));
        assert!(listing.contains("[x] vlc"));
        assert!(listing.contains("OBS Studio - Grabación y streaming (com.obsproject.Studio)"));
        assert!(listing.contains("[ ] blender"));
    }

    #[test]
    fn toggle_entry_reports_exit_codes() {
        let root = TempDir::new().unwrap();
        let mut controller = controller(&root, FakePackageManager::with_installed(&["vlc"]));

        assert_eq!(toggle_entry(&mut controller, "vlc", true), 0);
        assert_eq!(toggle_entry(&mut controller, "vlc", false), 0);
        assert_eq!(controller.state("vlc"), Some(EntryState::NotInstalled));
        assert_eq!(toggle_entry(&mut controller, "anydesk", true), 1);
        assert_eq!(toggle_entry(&mut controller, "photoshop", true), 1);
    }
}
