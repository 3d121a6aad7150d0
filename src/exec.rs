// src/exec.rs

use std::io;
use std::process::{Child, Command, Stdio};
use thiserror::Error;
use tracing::debug;

use crate::privileges::is_root;

#[derive(Debug, Error)]
pub enum ExecError {
    #[error("Failed to start {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },

    #[error("{program} exited with {}: {}", display_code(.code), .stderr.trim())]
    Failed {
        program: String,
        code: Option<i32>,
        stderr: String,
    },
}

fn display_code(code: &Option<i32>) -> String {
    code.map_or_else(|| "signal".to_string(), |c| c.to_string())
}

#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }
}

/// A fully described external command, built before it is run so it can be
/// wrapped for elevation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub program: String,
    pub args: Vec<String>,
    pub envs: Vec<(String, String)>,
}

impl Invocation {
    pub fn new(program: impl Into<String>) -> Self {
        Invocation {
            program: program.into(),
            args: Vec::new(),
            envs: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn env(mut self, key: &str, value: &str) -> Self {
        self.envs.push((key.to_string(), value.to_string()));
        self
    }

    fn command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args);
        for (key, value) in &self.envs {
            cmd.env(key, value);
        }
        cmd
    }

    /// Runs to completion; only a failure to start is an error.
    pub fn output(&self) -> Result<CommandOutput, ExecError> {
        debug!("Running {} {}", self.program, self.args.join(" "));

        let output = self.command().output().map_err(|source| ExecError::Spawn {
            program: self.program.clone(),
            source,
        })?;

        Ok(CommandOutput {
            code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }

    /// Starts a long-lived child fed through its stdin; output is discarded.
    pub fn spawn_with_stdin(&self) -> Result<Child, ExecError> {
        debug!("Spawning {} {}", self.program, self.args.join(" "));

        self.command()
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|source| ExecError::Spawn {
                program: self.program.clone(),
                source,
            })
    }

    /// Like [`output`](Self::output) but a non-zero exit is an error too.
    pub fn run(&self) -> Result<CommandOutput, ExecError> {
        let output = self.output()?;
        if output.success() {
            Ok(output)
        } else {
            Err(ExecError::Failed {
                program: self.program.clone(),
                code: output.code,
                stderr: output.stderr,
            })
        }
    }
}

/// How privileged operations are launched. Nothing is cached between calls:
/// every wrapped invocation asks for authorization again.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Elevation {
    Direct,
    Pkexec(String),
}

impl Elevation {
    pub fn detect(pkexec: &str) -> Self {
        if is_root() {
            Elevation::Direct
        } else {
            Elevation::Pkexec(pkexec.to_string())
        }
    }

    pub fn wrap(&self, invocation: Invocation) -> Invocation {
        match self {
            Elevation::Direct => invocation,
            Elevation::Pkexec(pkexec) => {
                // pkexec scrubs the environment, so variables travel through env(1).
                let mut wrapped = Invocation::new(pkexec.as_str()).arg("env");
                for (key, value) in &invocation.envs {
                    wrapped = wrapped.arg(format!("{}={}", key, value));
                }
                wrapped.arg(invocation.program).args(invocation.args)
            }
        }
    }
}
