#[cfg(unix)]
mod cli {
    use std::fs;
    use std::os::unix::fs::PermissionsExt;
    use std::path::Path;
    use std::process::{Command, Output};

    use tempfile::TempDir;

    fn write_executable(path: &Path, contents: &str) {
        fs::write(path, contents).unwrap();
        let mut perms = fs::metadata(path).unwrap().permissions();
        perms.set_mode(0o755);
        fs::set_permissions(path, perms).unwrap();
    }

    /// The binary with every external tool and system path redirected
    /// into `root`.
    fn guadamint(root: &TempDir, args: &[&str]) -> Output {
        let dpkg_query = root.path().join("dpkg-query");
        write_executable(
            &dpkg_query,
            r#"#!/usr/bin/env bash
if [ "$3" = "vlc" ]; then echo -n "install ok installed"; exit 0; fi
exit 1
"#,
        );
        let failing = root.path().join("fail");
        write_executable(&failing, "#!/usr/bin/env bash\nexit 1\n");

        Command::new(env!("CARGO_BIN_EXE_guadamint"))
            .args(args)
            .env("GUADAMINT_CONFIG", root.path().join("absent.toml"))
            .env("GUADAMINT_LOG_FILE", root.path().join("agent.log"))
            .env("GUADAMINT_LOCK_MARKER", root.path().join("guadamint.lock"))
            .env("GUADAMINT_REPO_DIR", root.path().join("repo"))
            .env("GUADAMINT_HOME_ROOT", root.path().join("home"))
            .env("GUADAMINT_PROC_ROOT", root.path().join("proc"))
            .env("GUADAMINT_DPKG_QUERY", &dpkg_query)
            .env("GUADAMINT_GIT", &failing)
            .env("GUADAMINT_APT_GET", &failing)
            .env("GUADAMINT_PKEXEC", &failing)
            .env("GUADAMINT_ZENITY", &failing)
            .env("GUADAMINT_NOTIFY_SEND", &failing)
            .output()
            .expect("run guadamint")
    }

    fn is_root() -> bool {
        nix::unistd::Uid::effective().is_root()
    }

    #[test]
    fn help_lists_commands() {
        let root = TempDir::new().unwrap();
        let output = guadamint(&root, &["--help"]);

        assert!(output.status.success());
        let stdout = String::from_utf8_lossy(&output.stdout);
        assert!(stdout.contains("Usage: guadamint <command>"));
        assert!(stdout.contains("supervise <cmd...>"));
    }

    #[test]
    fn unknown_command_is_a_usage_error() {
        let root = TempDir::new().unwrap();
        let output = guadamint(&root, &["frobnicate"]);

        assert_eq!(output.status.code(), Some(2));
        assert!(String::from_utf8_lossy(&output.stderr).contains("Unknown command: frobnicate"));
    }

    #[test]
    fn store_without_subcommand_is_a_usage_error() {
        let root = TempDir::new().unwrap();
        let output = guadamint(&root, &["store", "install"]);

        assert_eq!(output.status.code(), Some(2));
    }

    #[test]
    fn store_list_shows_catalog_or_restricts_access() {
        let root = TempDir::new().unwrap();
        let output = guadamint(&root, &["store", "list"]);

        assert!(
            output.status.success(),
            "stderr:\n{}",
            String::from_utf8_lossy(&output.stderr)
        );
        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        assert!(
            stdout.contains("[x] vlc") || stderr.contains("Acceso Restringido"),
            "stdout:\n{}\nstderr:\n{}",
            stdout,
            stderr
        );
        if stdout.contains("[x] vlc") {
            assert!(stdout.contains("[ ] blender"));
        }
    }

    #[test]
    fn agent_requires_root() {
        if is_root() {
            return;
        }
        let root = TempDir::new().unwrap();
        let output = guadamint(&root, &["agent"]);

        assert_eq!(output.status.code(), Some(1));
        assert!(String::from_utf8_lossy(&output.stderr).contains("must be run with sudo/root"));
        assert!(!root.path().join("guadamint.lock").exists());
    }

    #[test]
    fn supervise_passes_through_a_failing_child() {
        if is_root() {
            return;
        }
        let root = TempDir::new().unwrap();
        let output = guadamint(&root, &["supervise", "agent"]);

        assert_eq!(output.status.code(), Some(1));
    }
}
