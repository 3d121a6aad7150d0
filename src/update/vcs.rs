use std::fs;
use std::path::PathBuf;
use thiserror::Error;
use tracing::{debug, info, instrument};

use crate::config::Config;
use crate::exec::{ExecError, Invocation};

#[derive(Debug, Error)]
pub enum VcsError {
    #[error(transparent)]
    Exec(#[from] ExecError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Unexpected revision from git: {0:?}")]
    BadRevision(String),
}

/// Operations the self-update needs from the working copy.
pub trait Vcs {
    fn working_copy_exists(&self) -> bool;

    fn clone_branch(&self) -> Result<(), VcsError>;

    /// Fetches the target branch and checks it out locally.
    fn fetch_and_checkout(&self) -> Result<(), VcsError>;

    fn local_head(&self) -> Result<String, VcsError>;

    fn remote_head(&self) -> Result<String, VcsError>;

    /// Discards local changes and moves the working copy to the remote tip.
    fn reset_hard_to_remote(&self) -> Result<(), VcsError>;
}

/// The `git` command-line client.
pub struct GitCli {
    git: String,
    url: String,
    branch: String,
    dir: PathBuf,
}

impl GitCli {
    pub fn new(git: &str, url: &str, branch: &str, dir: PathBuf) -> Self {
        GitCli {
            git: git.to_string(),
            url: url.to_string(),
            branch: branch.to_string(),
            dir,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        GitCli::new(
            &config.tools.git,
            &config.repository.url,
            &config.repository.branch,
            config.repo_dir(),
        )
    }

    fn git(&self) -> Invocation {
        Invocation::new(self.git.as_str())
            .arg("-C")
            .arg(self.dir.display().to_string())
    }

    fn remote_ref(&self) -> String {
        format!("origin/{}", self.branch)
    }

    fn rev_parse(&self, rev: &str) -> Result<String, VcsError> {
        let output = self.git().args(["rev-parse", rev]).run()?;
        let hash = output.stdout.trim().to_string();

        if hash.is_empty() || !hash.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(VcsError::BadRevision(hash));
        }

        Ok(hash)
    }
}

impl Vcs for GitCli {
    fn working_copy_exists(&self) -> bool {
        self.dir.join(".git").exists()
    }

    #[instrument(skip(self))]
    fn clone_branch(&self) -> Result<(), VcsError> {
        if let Some(parent) = self.dir.parent() {
            fs::create_dir_all(parent)?;
        }

        info!("Cloning {} ({}) into {}", self.url, self.branch, self.dir.display());
        Invocation::new(self.git.as_str())
            .args(["clone", "-b", self.branch.as_str(), self.url.as_str()])
            .arg(self.dir.display().to_string())
            .run()?;
        Ok(())
    }

    #[instrument(skip(self))]
    fn fetch_and_checkout(&self) -> Result<(), VcsError> {
        debug!("Fetching origin/{}", self.branch);
        self.git()
            .args(["fetch", "origin", self.branch.as_str()])
            .run()?;
        self.git().args(["checkout", self.branch.as_str()]).run()?;
        Ok(())
    }

    fn local_head(&self) -> Result<String, VcsError> {
        self.rev_parse("HEAD")
    }

    fn remote_head(&self) -> Result<String, VcsError> {
        self.rev_parse(&self.remote_ref())
    }

    #[instrument(skip(self))]
    fn reset_hard_to_remote(&self) -> Result<(), VcsError> {
        info!("Resetting working copy to {}", self.remote_ref());
        self.git()
            .args(["reset", "--hard", self.remote_ref().as_str()])
            .run()?;
        Ok(())
    }
}
