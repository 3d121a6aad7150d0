// src/desktop.rs

use serde_json::{Map, Value};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info, instrument, warn};
use walkdir::WalkDir;

const WHISKER_DIR: &str = ".config/xfce4/panel";
const CINNAMON_MENU_DIR: &str = ".cinnamon/configs/menu@cinnamon.org";

#[derive(Debug, Error)]
pub enum RebrandError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid applet config: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Applet config is not a JSON object")]
    NotAnObject,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Desktop {
    Cinnamon,
    Xfce,
    Unknown,
}

impl fmt::Display for Desktop {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Desktop::Cinnamon => write!(f, "CINNAMON"),
            Desktop::Xfce => write!(f, "XFCE"),
            Desktop::Unknown => write!(f, "Desconocido"),
        }
    }
}

pub fn detect_desktop(session_root: &Path) -> Desktop {
    if session_root.join("cinnamon-session").exists() {
        Desktop::Cinnamon
    } else if session_root.join("xfce4-session").exists() {
        Desktop::Xfce
    } else {
        Desktop::Unknown
    }
}

#[derive(Debug, Default)]
pub struct RebrandReport {
    pub updated: Vec<PathBuf>,
    pub unchanged: Vec<PathBuf>,
    pub failed: Vec<(PathBuf, String)>,
}

impl RebrandReport {
    fn record(&mut self, path: PathBuf, result: Result<bool, RebrandError>) {
        match result {
            Ok(true) => {
                info!("Rebranded {}", path.display());
                self.updated.push(path);
            }
            Ok(false) => self.unchanged.push(path),
            Err(e) => {
                warn!("Could not rebrand {}: {}", path.display(), e);
                self.failed.push((path, e.to_string()));
            }
        }
    }
}

fn home_dirs(home_root: &Path) -> Vec<PathBuf> {
    match fs::read_dir(home_root) {
        Ok(entries) => entries
            .flatten()
            .map(|entry| entry.path())
            .filter(|path| path.is_dir())
            .collect(),
        Err(e) => {
            warn!("Cannot list {}: {}", home_root.display(), e);
            Vec::new()
        }
    }
}

fn config_files(dir: &Path, matches: impl Fn(&str) -> bool) -> Vec<PathBuf> {
    WalkDir::new(dir)
        .max_depth(1)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|entry| entry.file_type().is_file())
        .filter(|entry| entry.file_name().to_str().is_some_and(&matches))
        .map(|entry| entry.into_path())
        .collect()
}

/// Sets `button-icon=` in a whisker menu rc file. Returns whether it changed.
fn rebrand_whisker(path: &Path, icon: &str) -> Result<bool, RebrandError> {
    let content = fs::read_to_string(path)?;
    let wanted = format!("button-icon={}", icon);

    let mut found = false;
    let mut lines: Vec<String> = content
        .lines()
        .map(|line| {
            if line.starts_with("button-icon=") {
                found = true;
                wanted.clone()
            } else {
                line.to_string()
            }
        })
        .collect();
    if !found {
        lines.push(wanted);
    }

    let mut updated = lines.join("\n");
    updated.push('\n');

    if updated == content {
        return Ok(false);
    }
    fs::write(path, updated)?;
    Ok(true)
}

fn set_setting(settings: &mut Map<String, Value>, key: &str, value: Value) -> bool {
    let slot = settings
        .entry(key.to_string())
        .or_insert_with(|| Value::Object(Map::new()));

    if !slot.is_object() {
        *slot = Value::Object(Map::new());
    }

    match slot.as_object_mut() {
        Some(setting) if setting.get("value") != Some(&value) => {
            setting.insert("value".to_string(), value);
            true
        }
        _ => false,
    }
}

/// Points the Cinnamon menu applet at a custom icon, keeping other settings.
fn rebrand_cinnamon(path: &Path, icon: &str) -> Result<bool, RebrandError> {
    let content = fs::read_to_string(path)?;
    let mut root: Value = serde_json::from_str(&content)?;
    let settings = root.as_object_mut().ok_or(RebrandError::NotAnObject)?;

    let icon_changed = set_setting(settings, "menu-icon", Value::String(icon.to_string()));
    let custom_changed = set_setting(settings, "menu-icon-custom", Value::Bool(true));

    if !icon_changed && !custom_changed {
        return Ok(false);
    }
    fs::write(path, serde_json::to_string_pretty(&root)?)?;
    Ok(true)
}

/// Replaces the desktop menu icon for every user under `home_root`.
#[instrument]
pub fn rebrand(desktop: Desktop, home_root: &Path, icon: &str) -> RebrandReport {
    let mut report = RebrandReport::default();

    for home in home_dirs(home_root) {
        match desktop {
            Desktop::Xfce => {
                let files = config_files(&home.join(WHISKER_DIR), |name| {
                    name.starts_with("whiskermenu") && name.ends_with(".rc")
                });
                for path in files {
                    let result = rebrand_whisker(&path, icon);
                    report.record(path, result);
                }
            }
            Desktop::Cinnamon => {
                let files = config_files(&home.join(CINNAMON_MENU_DIR), |name| {
                    name.ends_with(".json")
                });
                for path in files {
                    let result = rebrand_cinnamon(&path, icon);
                    report.record(path, result);
                }
            }
            Desktop::Unknown => {
                debug!("Unknown desktop, nothing to rebrand in {}", home.display());
            }
        }
    }

    report
}
