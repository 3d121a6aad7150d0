use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Upper bound for the pause between a restart request and the relaunch.
pub const MAX_RESTART_DELAY_SECS: u64 = 3;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    ParseError(#[from] toml::de::Error),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Repository {
    pub url: String,

    pub branch: String,

    pub dir: String,

    pub scripts_subdir: String,
}

impl Default for Repository {
    fn default() -> Self {
        Repository {
            url: "https://github.com/aosucas499/guadamint.git".to_string(),
            branch: "main".to_string(),
            dir: "/opt/guadamint".to_string(),
            scripts_subdir: "scripts".to_string(),
        }
    }
}

/// One working-copy file whose deployed copy must mirror it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncEntry {
    /// Relative to the working copy.
    pub source: String,

    pub destination: String,
}

impl SyncEntry {
    pub fn new(source: &str, destination: &str) -> Self {
        SyncEntry {
            source: source.to_string(),
            destination: destination.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Required {
    pub packages: Vec<String>,
}

impl Default for Required {
    fn default() -> Self {
        Required {
            packages: ["git", "zenity", "libnotify-bin", "vlc"]
                .iter()
                .map(|p| p.to_string())
                .collect(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Paths {
    pub root_log: String,

    /// Relative to the per-user state directory.
    pub user_log: String,

    pub lock_marker: String,

    pub proc_root: String,

    pub home_root: String,

    pub session_root: String,
}

impl Default for Paths {
    fn default() -> Self {
        Paths {
            root_log: "/var/log/guadamint/agent.log".to_string(),
            user_log: "guadamint/guadamint.log".to_string(),
            lock_marker: "/run/lock/guadamint.lock".to_string(),
            proc_root: "/proc".to_string(),
            home_root: "/home".to_string(),
            session_root: "/usr/bin".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Branding {
    pub menu_icon: String,
}

impl Default for Branding {
    fn default() -> Self {
        Branding {
            menu_icon: "/usr/share/icons/guadamintuz.svg".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Tools {
    pub apt_get: String,

    pub dpkg_query: String,

    pub git: String,

    pub pkexec: String,

    pub zenity: String,

    pub notify_send: String,

    pub sudo: String,
}

impl Default for Tools {
    fn default() -> Self {
        Tools {
            apt_get: "/usr/bin/apt-get".to_string(),
            dpkg_query: "dpkg-query".to_string(),
            git: "git".to_string(),
            pkexec: "pkexec".to_string(),
            zenity: "zenity".to_string(),
            notify_send: "notify-send".to_string(),
            sudo: "sudo".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Supervisor {
    pub restart_delay_secs: u64,

    pub max_restarts: u32,
}

impl Default for Supervisor {
    fn default() -> Self {
        Supervisor {
            restart_delay_secs: 2,
            max_restarts: 5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Logging {
    pub level: String,

    #[serde(default)]
    pub json_output: bool,
}

impl Default for Logging {
    fn default() -> Self {
        Logging {
            level: default_log_level(),
            json_output: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub repository: Repository,

    #[serde(default = "default_sync_manifest")]
    pub sync: Vec<SyncEntry>,

    #[serde(default)]
    pub required: Required,

    #[serde(default)]
    pub paths: Paths,

    #[serde(default)]
    pub branding: Branding,

    #[serde(default)]
    pub tools: Tools,

    #[serde(default)]
    pub supervisor: Supervisor,

    #[serde(default)]
    pub logging: Logging,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            repository: Repository::default(),
            sync: default_sync_manifest(),
            required: Required::default(),
            paths: Paths::default(),
            branding: Branding::default(),
            tools: Tools::default(),
            supervisor: Supervisor::default(),
            logging: Logging::default(),
        }
    }
}

impl Config {
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::config_path();

        let mut config = if config_path.exists() {
            let content = std::fs::read_to_string(&config_path)?;
            toml::from_str(&content)?
        } else {
            Config::default()
        };

        config.apply_env_overrides();

        Ok(config)
    }

    pub fn config_path() -> PathBuf {
        std::env::var_os("GUADAMINT_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("/etc/guadamint/config.toml"))
    }

    pub fn repo_dir(&self) -> PathBuf {
        PathBuf::from(&self.repository.dir)
    }

    pub fn scripts_dir(&self) -> PathBuf {
        self.repo_dir().join(&self.repository.scripts_subdir)
    }

    pub fn lock_marker(&self) -> PathBuf {
        PathBuf::from(&self.paths.lock_marker)
    }

    pub fn proc_root(&self) -> PathBuf {
        PathBuf::from(&self.paths.proc_root)
    }

    pub fn home_root(&self) -> PathBuf {
        PathBuf::from(&self.paths.home_root)
    }

    pub fn session_root(&self) -> PathBuf {
        PathBuf::from(&self.paths.session_root)
    }

    /// Log destination for the current privilege level.
    pub fn log_file(&self, privileged: bool) -> Option<PathBuf> {
        if privileged {
            return Some(PathBuf::from(&self.paths.root_log));
        }

        dirs::state_dir()
            .or_else(dirs::data_local_dir)
            .map(|dir| dir.join(&self.paths.user_log))
    }

    pub fn restart_delay(&self) -> Duration {
        Duration::from_secs(
            self.supervisor
                .restart_delay_secs
                .min(MAX_RESTART_DELAY_SECS),
        )
    }

    pub fn log_level(&self) -> &str {
        &self.logging.level
    }

    pub fn json_output(&self) -> bool {
        self.logging.json_output
    }

    fn apply_env_overrides(&mut self) {
        let overrides: [(&str, &mut String); 13] = [
            ("GUADAMINT_REPO_URL", &mut self.repository.url),
            ("GUADAMINT_REPO_BRANCH", &mut self.repository.branch),
            ("GUADAMINT_REPO_DIR", &mut self.repository.dir),
            ("GUADAMINT_LOCK_MARKER", &mut self.paths.lock_marker),
            ("GUADAMINT_LOG_FILE", &mut self.paths.root_log),
            ("GUADAMINT_PROC_ROOT", &mut self.paths.proc_root),
            ("GUADAMINT_HOME_ROOT", &mut self.paths.home_root),
            ("GUADAMINT_APT_GET", &mut self.tools.apt_get),
            ("GUADAMINT_DPKG_QUERY", &mut self.tools.dpkg_query),
            ("GUADAMINT_GIT", &mut self.tools.git),
            ("GUADAMINT_PKEXEC", &mut self.tools.pkexec),
            ("GUADAMINT_ZENITY", &mut self.tools.zenity),
            ("GUADAMINT_NOTIFY_SEND", &mut self.tools.notify_send),
        ];

        for (var, field) in overrides {
            if let Ok(val) = std::env::var(var) {
                *field = val;
            }
        }

        if let Ok(val) = std::env::var("RUST_LOG") {
            self.logging.level = val;
        }
    }
}

fn default_sync_manifest() -> Vec<SyncEntry> {
    vec![
        SyncEntry::new("dist/guadamint", "/usr/bin/guadamint"),
        SyncEntry::new("dist/guadamint-store", "/usr/bin/guadamint-store"),
        SyncEntry::new("assets/guadamintuz.svg", "/usr/share/icons/guadamintuz.svg"),
    ]
}

fn default_log_level() -> String {
    "info".to_string()
}
