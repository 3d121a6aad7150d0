use std::fs;
use std::path::PathBuf;
use tracing::debug;

/// Process names that hold the dpkg/apt locks while they run.
const PACKAGE_TOOLS: &[&str] = &[
    "apt",
    "apt-get",
    "aptitude",
    "dpkg",
    "unattended-upgr",
    "synaptic",
    "packagekitd",
];

/// Detects another package-manager process before a mutation is started.
#[derive(Debug, Clone)]
pub struct PackageSystemProbe {
    proc_root: PathBuf,
}

impl PackageSystemProbe {
    pub fn new(proc_root: PathBuf) -> Self {
        PackageSystemProbe { proc_root }
    }

    /// Name of the first package-manager process found, if any.
    pub fn holder(&self) -> Option<String> {
        let entries = fs::read_dir(&self.proc_root).ok()?;

        for entry in entries.flatten() {
            let name = entry.file_name();
            let Some(pid) = name.to_str() else {
                continue;
            };
            if !pid.bytes().all(|b| b.is_ascii_digit()) {
                continue;
            }

            let Ok(comm) = fs::read_to_string(entry.path().join("comm")) else {
                continue;
            };
            let comm = comm.trim();
            if PACKAGE_TOOLS.contains(&comm) {
                debug!("Package system held by {} (pid {})", comm, pid);
                return Some(comm.to_string());
            }
        }

        None
    }
}
