use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use std::io::Write;
use std::process::{Child, ChildStdin};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use crate::exec::Invocation;

const EXIT_GRACE: Duration = Duration::from_millis(500);
const POLL_INTERVAL: Duration = Duration::from_millis(20);

/// A tray icon process owned by one agent run. Status lines go to the
/// child's stdin; the child is reaped on `close` or when dropped.
#[derive(Debug)]
pub struct TraySession {
    child: Option<Child>,
    stdin: Option<ChildStdin>,
}

impl TraySession {
    pub fn open(invocation: Invocation) -> Self {
        match invocation.spawn_with_stdin() {
            Ok(mut child) => {
                let stdin = child.stdin.take();
                debug!("Tray session started (pid {})", child.id());
                TraySession {
                    child: Some(child),
                    stdin,
                }
            }
            Err(e) => {
                warn!("Could not start tray session: {}", e);
                TraySession::disabled()
            }
        }
    }

    pub fn disabled() -> Self {
        TraySession {
            child: None,
            stdin: None,
        }
    }

    pub fn is_active(&self) -> bool {
        self.stdin.is_some()
    }

    /// Tooltip text of the tray icon.
    pub fn status(&mut self, text: &str) {
        self.send("tooltip", text);
    }

    /// Balloon message from the tray icon.
    pub fn message(&mut self, text: &str) {
        self.send("message", text);
    }

    fn send(&mut self, command: &str, text: &str) {
        let Some(stdin) = self.stdin.as_mut() else {
            return;
        };

        let line = format!("{}:{}\n", command, text.replace('\n', " "));
        if let Err(e) = stdin.write_all(line.as_bytes()).and_then(|_| stdin.flush()) {
            warn!("Tray session went away: {}", e);
            self.close();
        }
    }

    /// Closes stdin, then asks the child to terminate, then kills it. The
    /// child is usually `sudo`, which relays SIGTERM to the tray but cannot
    /// relay SIGKILL, so the polite signal comes first.
    pub fn close(&mut self) {
        self.stdin = None;

        let Some(mut child) = self.child.take() else {
            return;
        };
        if exited_within(&mut child, EXIT_GRACE) {
            return;
        }

        let pid = Pid::from_raw(child.id() as i32);
        match signal::kill(pid, Signal::SIGTERM) {
            Ok(()) => {
                if exited_within(&mut child, EXIT_GRACE) {
                    debug!("Tray session terminated");
                    return;
                }
            }
            Err(e) => debug!("Tray SIGTERM: {}", e),
        }

        if let Err(e) = child.kill() {
            debug!("Tray kill: {}", e);
        }
        let _ = child.wait();
    }
}

fn exited_within(child: &mut Child, grace: Duration) -> bool {
    let deadline = Instant::now() + grace;
    while Instant::now() < deadline {
        match child.try_wait() {
            Ok(Some(_)) => return true,
            Ok(None) => thread::sleep(POLL_INTERVAL),
            Err(_) => return false,
        }
    }
    false
}

impl Drop for TraySession {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exec::testing::write_executable;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn status_lines_reach_the_child() {
        let root = TempDir::new().unwrap();
        let tray = root.path().join("zenity");
        write_executable(
            &tray,
            r#"#!/usr/bin/env bash
cat > "$(dirname "$0")/tray.log"
"#,
        );

        let mut session = TraySession::open(
            Invocation::new(tray.display().to_string()).args(["--notification", "--listen"]),
        );
        assert!(session.is_active());

        session.status("Actualizando GuadaMint");
        session.message("Línea uno\nlínea dos");
        session.close();

        let log = fs::read_to_string(root.path().join("tray.log")).unwrap();
        assert_eq!(
            log,
            "tooltip:Actualizando GuadaMint\nmessage:Línea uno línea dos\n"
        );
        assert!(!session.is_active());
    }

    #[test]
    fn hung_child_is_killed_on_drop() {
        let root = TempDir::new().unwrap();
        let tray = root.path().join("zenity");
        write_executable(
            &tray,
            r#"#!/usr/bin/env bash
trap '' PIPE
echo $$ > "$(dirname "$0")/pid"
sleep 30
"#,
        );

        let session = TraySession::open(Invocation::new(tray.display().to_string()));
        let started = Instant::now();
        drop(session);

        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn lingering_child_gets_sigterm_before_kill() {
        let root = TempDir::new().unwrap();
        let tray = root.path().join("sudo");
        write_executable(
            &tray,
            r#"#!/usr/bin/env bash
sleep 30 &
pid=$!
trap 'echo relayed > "$(dirname "$0")/terminated"; kill "$pid"; exit 0' TERM
wait "$pid"
"#,
        );

        let mut session = TraySession::open(Invocation::new(tray.display().to_string()));
        assert!(session.is_active());
        session.close();

        let marker = fs::read_to_string(root.path().join("terminated")).unwrap();
        assert_eq!(marker, "relayed\n");
    }

    #[test]
    fn disabled_session_ignores_status() {
        let mut session =
            TraySession::open(Invocation::new("/nonexistent/guadamint-zenity"));

        assert!(!session.is_active());
        session.status("ignored");
        session.close();
    }
}
