// src/supervisor.rs

use std::path::Path;
use std::process::Command;
use std::thread;
use std::time::Duration;
use tracing::{error, info, warn};

/// Exit code a child uses to ask for a relaunch after replacing itself.
pub const EXIT_RESTART: i32 = 75;

/// Runs `program` until it exits with anything but [`EXIT_RESTART`] and
/// returns that code. The path is resolved on every launch so a rewritten
/// executable is the one that starts.
pub fn supervise(program: &Path, args: &[String], delay: Duration, max_restarts: u32) -> i32 {
    let mut restarts = 0;

    loop {
        info!("Launching {} {}", program.display(), args.join(" "));

        let status = match Command::new(program).args(args).status() {
            Ok(status) => status,
            Err(e) => {
                error!("Failed to start {}: {}", program.display(), e);
                return 1;
            }
        };

        match status.code() {
            Some(EXIT_RESTART) => {
                if restarts >= max_restarts {
                    error!("Giving up after {} restarts", restarts);
                    return 1;
                }
                restarts += 1;
                info!(
                    "Restart requested ({}/{}), relaunching in {:?}",
                    restarts, max_restarts, delay
                );
                thread::sleep(delay);
            }
            Some(code) => return code,
            None => {
                warn!("{} was terminated by a signal", program.display());
                return 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exec::testing::write_executable;
    use std::fs;
    use tempfile::TempDir;

    /// Exits 75 until it has run `restarts` times, then exits `final_code`.
    fn counting_child(root: &TempDir, restarts: u32, final_code: i32) -> std::path::PathBuf {
        let child = root.path().join("child");
        write_executable(
            &child,
            &format!(
                r#"#!/usr/bin/env bash
count_file="$(dirname "$0")/count"
count=$(cat "$count_file" 2>/dev/null || echo 0)
count=$((count + 1))
echo $count > "$count_file"
echo "$*" >> "$(dirname "$0")/args.log"
if [ $count -le {restarts} ]; then exit 75; fi
exit {final_code}
"#
            ),
        );
        child
    }

    fn runs(root: &TempDir) -> u32 {
        fs::read_to_string(root.path().join("count"))
            .unwrap()
            .trim()
            .parse()
            .unwrap()
    }

    #[test]
    fn relaunches_on_restart_code() {
        let root = TempDir::new().unwrap();
        let child = counting_child(&root, 2, 0);

        let code = supervise(&child, &["agent".to_string()], Duration::ZERO, 5);

        assert_eq!(code, 0);
        assert_eq!(runs(&root), 3);
        assert_eq!(
            fs::read_to_string(root.path().join("args.log")).unwrap(),
            "agent\nagent\nagent\n"
        );
    }

    #[test]
    fn other_exit_codes_pass_through() {
        let root = TempDir::new().unwrap();
        let child = counting_child(&root, 0, 3);

        assert_eq!(supervise(&child, &[], Duration::ZERO, 5), 3);
        assert_eq!(runs(&root), 1);
    }

    #[test]
    fn restart_loop_is_bounded() {
        let root = TempDir::new().unwrap();
        let child = counting_child(&root, 100, 0);

        assert_eq!(supervise(&child, &[], Duration::ZERO, 2), 1);
        assert_eq!(runs(&root), 3);
    }

    #[test]
    fn unstartable_program_fails() {
        assert_eq!(
            supervise(Path::new("/nonexistent/guadamint"), &[], Duration::ZERO, 1),
            1
        );
    }
}
