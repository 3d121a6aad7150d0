pub mod tray;

pub use tray::TraySession;

use std::path::PathBuf;
use thiserror::Error;
use tracing::{debug, warn};

use crate::config::Config;
use crate::exec::{ExecError, Invocation};
use crate::privileges::{graphical_user, is_root};

const DIALOG_WIDTH: &str = "400";
const DIALOG_TIMEOUT_SECS: &str = "10";

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("{0} is not installed")]
    MissingTool(String),

    #[error("No graphical session available: {0}")]
    NoSession(String),

    #[error(transparent)]
    Exec(#[from] ExecError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DialogKind {
    Info,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Urgency {
    Normal,
    Critical,
}

impl Urgency {
    fn as_arg(self) -> &'static str {
        match self {
            Urgency::Normal => "normal",
            Urgency::Critical => "critical",
        }
    }
}

/// Puts a message in front of whoever sits at the desktop.
pub trait Notifier: Send + Sync {
    fn notify(&self, summary: &str, body: &str, urgency: Urgency) -> Result<(), NotifyError>;

    fn dialog(&self, kind: DialogKind, title: &str, text: &str) -> Result<(), NotifyError>;
}

/// Where desktop helpers must run to reach the user.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Target {
    /// Already inside the user's session.
    CurrentSession,
    /// Running as root: borrow the user's X credentials.
    User { name: String, xauthority: PathBuf },
    Unavailable(String),
}

/// `notify-send` for notifications, `zenity` for dialogs and the tray.
pub struct DesktopNotifier {
    zenity: String,
    notify_send: String,
    sudo: String,
    target: Target,
}

impl DesktopNotifier {
    pub fn from_config(config: &Config) -> Self {
        let target = if is_root() {
            Self::root_target(graphical_user(), config)
        } else {
            Target::CurrentSession
        };

        DesktopNotifier {
            zenity: config.tools.zenity.clone(),
            notify_send: config.tools.notify_send.clone(),
            sudo: config.tools.sudo.clone(),
            target,
        }
    }

    fn root_target(user: Option<String>, config: &Config) -> Target {
        let Some(name) = user else {
            return Target::Unavailable("no graphical user detected".to_string());
        };

        let xauthority = config.home_root().join(&name).join(".Xauthority");
        if !xauthority.exists() {
            return Target::Unavailable(format!("{} has no .Xauthority", name));
        }

        Target::User { name, xauthority }
    }

    fn require(tool: &str) -> Result<(), NotifyError> {
        which::which(tool)
            .map(|_| ())
            .map_err(|_| NotifyError::MissingTool(tool.to_string()))
    }

    /// Builds the command that runs `program` inside the user's session.
    fn in_session(&self, program: &str) -> Result<Invocation, NotifyError> {
        Self::require(program)?;

        match &self.target {
            Target::CurrentSession => Ok(Invocation::new(program)),
            Target::User { name, xauthority } => Ok(Invocation::new(self.sudo.as_str())
                .args(["-u", name.as_str(), "env", "DISPLAY=:0"])
                .arg(format!("XAUTHORITY={}", xauthority.display()))
                .arg(program)),
            Target::Unavailable(reason) => Err(NotifyError::NoSession(reason.clone())),
        }
    }

    /// Opens a tray icon session, or a disabled one when the desktop
    /// cannot be reached.
    pub fn open_tray(&self, icon: &str) -> TraySession {
        match self.in_session(&self.zenity) {
            Ok(invocation) => TraySession::open(
                invocation
                    .args(["--notification", "--listen"])
                    .arg(format!("--window-icon={}", icon)),
            ),
            Err(e) => {
                warn!("Tray unavailable: {}", e);
                TraySession::disabled()
            }
        }
    }
}

impl Notifier for DesktopNotifier {
    fn notify(&self, summary: &str, body: &str, urgency: Urgency) -> Result<(), NotifyError> {
        debug!("Notification: {} - {}", summary, body);
        self.in_session(&self.notify_send)?
            .args(["-u", urgency.as_arg(), "-i", "system-software-update", summary, body])
            .run()?;
        Ok(())
    }

    fn dialog(&self, kind: DialogKind, title: &str, text: &str) -> Result<(), NotifyError> {
        let kind_arg = match kind {
            DialogKind::Info => "--info",
            DialogKind::Error => "--error",
        };

        let output = self
            .in_session(&self.zenity)?
            .args([kind_arg, "--no-markup", "--title", title, "--text", text])
            .args(["--width", DIALOG_WIDTH, "--timeout", DIALOG_TIMEOUT_SECS])
            .output()?;

        // zenity exits 5 when the timeout closes the dialog.
        match output.code {
            Some(0) | Some(1) | Some(5) => Ok(()),
            code => Err(NotifyError::Exec(ExecError::Failed {
                program: self.zenity.clone(),
                code,
                stderr: output.stderr,
            })),
        }
    }
}
