// src/update/sync.rs

use sha2::{Digest, Sha256};
use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::{debug, info, warn};

#[cfg(unix)]
use std::os::unix::fs::PermissionsExt;

use crate::config::SyncEntry;

const DEPLOYED_MODE: u32 = 0o755;

pub fn file_digest(path: &Path) -> io::Result<String> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    io::copy(&mut file, &mut hasher)?;
    Ok(hex::encode(hasher.finalize()))
}

#[derive(Debug, Default)]
pub struct SyncReport {
    pub synced: Vec<PathBuf>,
    pub skipped: Vec<PathBuf>,
    pub failed: Vec<(PathBuf, String)>,
    pub restart_required: bool,
}

impl SyncReport {
    pub fn has_failures(&self) -> bool {
        !self.failed.is_empty()
    }
}

/// Working-copy files and the system paths that must mirror them.
#[derive(Debug, Clone)]
pub struct SyncManifest {
    root: PathBuf,
    entries: Vec<SyncEntry>,
}

impl SyncManifest {
    pub fn new(root: PathBuf, entries: Vec<SyncEntry>) -> Self {
        SyncManifest { root, entries }
    }

    pub fn source_path(&self, entry: &SyncEntry) -> PathBuf {
        self.root.join(&entry.source)
    }

    /// Whether the deployed copy differs from its source. Unreadable or
    /// missing destinations count as different.
    fn differs(&self, entry: &SyncEntry) -> io::Result<bool> {
        let source = file_digest(&self.source_path(entry))?;
        match file_digest(Path::new(&entry.destination)) {
            Ok(deployed) => Ok(deployed != source),
            Err(_) => Ok(true),
        }
    }

    /// Destinations whose content no longer matches the working copy.
    /// Entries without a source file are ignored here.
    pub fn mismatched(&self) -> Vec<PathBuf> {
        self.entries
            .iter()
            .filter(|entry| self.source_path(entry).is_file())
            .filter(|entry| match self.differs(entry) {
                Ok(differs) => differs,
                Err(e) => {
                    warn!("Could not compare {}: {}", entry.source, e);
                    true
                }
            })
            .map(|entry| PathBuf::from(&entry.destination))
            .collect()
    }

    /// Copies every changed entry into place. `running` is the executable of
    /// this process; rewriting it marks the report as needing a restart.
    pub fn apply(&self, running: Option<&Path>) -> SyncReport {
        let mut report = SyncReport::default();
        let running = running.map(canonical);

        for entry in &self.entries {
            let source = self.source_path(entry);
            let destination = PathBuf::from(&entry.destination);

            if !source.is_file() {
                warn!("Manifest source missing, skipping: {}", source.display());
                report.skipped.push(destination);
                continue;
            }

            match self.differs(entry) {
                Ok(false) => {
                    debug!("Up to date: {}", destination.display());
                    continue;
                }
                Ok(true) => {}
                Err(e) => {
                    report.failed.push((destination, e.to_string()));
                    continue;
                }
            }

            match deploy(&source, &destination) {
                Ok(()) => {
                    info!("Deployed {} -> {}", source.display(), destination.display());
                    if running.as_deref() == Some(canonical(&destination).as_path()) {
                        report.restart_required = true;
                    }
                    report.synced.push(destination);
                }
                Err(e) => {
                    warn!("Failed to deploy {}: {}", destination.display(), e);
                    report.failed.push((destination, e.to_string()));
                }
            }
        }

        report
    }
}

fn canonical(path: &Path) -> PathBuf {
    fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf())
}

/// Writes next to the destination and renames over it, so the deployed path
/// is never observed half-written and a running binary keeps its old inode.
fn deploy(source: &Path, destination: &Path) -> io::Result<()> {
    let parent = destination.parent().unwrap_or_else(|| Path::new("/"));
    fs::create_dir_all(parent)?;

    let mut staged = NamedTempFile::new_in(parent)?;
    io::copy(&mut File::open(source)?, staged.as_file_mut())?;
    staged.as_file().sync_all()?;

    #[cfg(unix)]
    fs::set_permissions(staged.path(), fs::Permissions::from_mode(DEPLOYED_MODE))?;

    staged.persist(destination).map_err(|e| e.error)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    struct Layout {
        root: TempDir,
        repo: PathBuf,
        system: PathBuf,
    }

    fn layout() -> Layout {
        let root = TempDir::new().unwrap();
        let repo = root.path().join("repo");
        let system = root.path().join("usr/bin");
        fs::create_dir_all(repo.join("dist")).unwrap();
        Layout { root, repo, system }
    }

    fn entry(layout: &Layout, name: &str) -> SyncEntry {
        SyncEntry::new(
            &format!("dist/{}", name),
            layout.system.join(name).to_str().unwrap(),
        )
    }

    #[test]
    fn digest_is_sha256_hex() {
        let root = TempDir::new().unwrap();
        let path = root.path().join("f");
        fs::write(&path, b"abc").unwrap();

        assert_eq!(
            file_digest(&path).unwrap(),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn apply_copies_changed_files_executable() {
        let l = layout();
        fs::write(l.repo.join("dist/guadamint"), "v2").unwrap();
        let manifest = SyncManifest::new(l.repo.clone(), vec![entry(&l, "guadamint")]);

        assert_eq!(manifest.mismatched(), vec![l.system.join("guadamint")]);
        let report = manifest.apply(None);

        assert_eq!(report.synced, vec![l.system.join("guadamint")]);
        assert_eq!(fs::read_to_string(l.system.join("guadamint")).unwrap(), "v2");
        let mode = fs::metadata(l.system.join("guadamint"))
            .unwrap()
            .permissions()
            .mode()
            & 0o777;
        assert_eq!(mode, 0o755);
        assert!(manifest.mismatched().is_empty());
        assert!(!report.restart_required);
    }

    #[test]
    fn missing_source_is_skipped_and_others_still_sync() {
        let l = layout();
        fs::write(l.repo.join("dist/guadamint-store"), "store").unwrap();
        let manifest = SyncManifest::new(
            l.repo.clone(),
            vec![entry(&l, "guadamint"), entry(&l, "guadamint-store")],
        );

        let report = manifest.apply(None);

        assert_eq!(report.skipped, vec![l.system.join("guadamint")]);
        assert_eq!(report.synced, vec![l.system.join("guadamint-store")]);
        assert!(!report.has_failures());
    }

    #[test]
    fn undeployable_entry_is_recorded_and_later_entries_still_sync() {
        let l = layout();
        fs::write(l.repo.join("dist/guadamint"), "agent").unwrap();
        fs::write(l.repo.join("dist/guadamint-store"), "store").unwrap();
        fs::create_dir_all(l.system.join("guadamint")).unwrap();
        let manifest = SyncManifest::new(
            l.repo.clone(),
            vec![entry(&l, "guadamint"), entry(&l, "guadamint-store")],
        );

        let report = manifest.apply(None);

        assert!(report.has_failures());
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].0, l.system.join("guadamint"));
        assert!(l.system.join("guadamint").is_dir());
        assert_eq!(report.synced, vec![l.system.join("guadamint-store")]);
        assert_eq!(
            fs::read_to_string(l.system.join("guadamint-store")).unwrap(),
            "store"
        );
    }

    #[test]
    fn unchanged_files_are_not_rewritten() {
        let l = layout();
        fs::write(l.repo.join("dist/guadamint"), "same").unwrap();
        fs::create_dir_all(&l.system).unwrap();
        fs::write(l.system.join("guadamint"), "same").unwrap();
        let manifest = SyncManifest::new(l.repo.clone(), vec![entry(&l, "guadamint")]);

        let report = manifest.apply(None);

        assert!(report.synced.is_empty());
        assert!(manifest.mismatched().is_empty());
    }

    #[test]
    fn rewriting_the_running_executable_requires_restart() {
        let l = layout();
        fs::write(l.repo.join("dist/guadamint"), "new build").unwrap();
        fs::create_dir_all(&l.system).unwrap();
        let running = l.system.join("guadamint");
        fs::write(&running, "old build").unwrap();
        let manifest = SyncManifest::new(l.repo.clone(), vec![entry(&l, "guadamint")]);

        let report = manifest.apply(Some(&running));

        assert!(report.restart_required);
        assert!(l.root.path().exists());
    }
}
