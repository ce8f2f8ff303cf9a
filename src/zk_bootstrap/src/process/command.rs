//! Runs external programs with an explicit search path.
//!
//! Child processes never inherit an ambient PATH: the runner carries the
//! search path it was built with (by default the `PATH=` line of
//! `/etc/environment`) and resolves programs against it with `which`.
//!
//! A command counts as failed when it exits non-zero *or* writes anything to
//! stderr. The ZooKeeper and AWS command-line tools report most problems on
//! stderr while still exiting 0.

use crate::util::logging::is_verbose;
use itertools::Itertools;
use std::{
    ffi::{OsStr, OsString},
    io,
    path::{Path, PathBuf},
    process::Stdio,
};
use thiserror::Error;
use tokio::process::Command;
use tracing::{debug, error, info, warn};

/// System environment file holding the login PATH
const ENVIRONMENT_FILE: &str = "/etc/environment";

#[derive(Debug, Error)]
pub enum CommandError {
    #[error("`{program}` not found in search path: {source}")]
    NotFound {
        program: String,
        #[source]
        source: which::Error,
    },

    #[error("failed to spawn `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: io::Error,
    },

    #[error("`{command}` failed ({status})\nstdout: {stdout}\nstderr: {stderr}")]
    Failed {
        command: String,
        status: String,
        stdout: String,
        stderr: String,
    },

    #[error("`{command}` reported an error\nstdout: {stdout}\nstderr: {stderr}")]
    Stderr {
        command: String,
        stdout: String,
        stderr: String,
    },
}

impl CommandError {
    /// Captured stderr, if the command got far enough to produce any
    pub fn stderr(&self) -> Option<&str> {
        match self {
            CommandError::Failed { stderr, .. } | CommandError::Stderr { stderr, .. } => {
                Some(stderr)
            }
            _ => None,
        }
    }

    /// Captured stdout, if the command got far enough to produce any
    pub fn stdout(&self) -> Option<&str> {
        match self {
            CommandError::Failed { stdout, .. } | CommandError::Stderr { stdout, .. } => {
                Some(stdout)
            }
            _ => None,
        }
    }
}

/// Runs commands with a fixed search path
#[derive(Debug, Clone)]
pub struct CommandRunner {
    search_path: OsString,
}

impl CommandRunner {
    pub fn new(search_path: impl Into<OsString>) -> Self {
        Self {
            search_path: search_path.into(),
        }
    }

    pub fn search_path(&self) -> &OsStr {
        &self.search_path
    }

    /// Resolve `program` (bare name or path) against the search path
    pub fn resolve(&self, program: &str) -> Result<PathBuf, CommandError> {
        let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("/"));
        which::which_in(program, Some(&self.search_path), cwd).map_err(|source| {
            CommandError::NotFound {
                program: program.to_string(),
                source,
            }
        })
    }

    /// Run `program` with `args` and return its trimmed stdout
    pub async fn run<I, S>(&self, program: &str, args: I) -> Result<String, CommandError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        let path = self.resolve(program)?;
        let args: Vec<OsString> = args.into_iter().map(|a| a.as_ref().to_owned()).collect();
        let command_line = std::iter::once(path.as_os_str())
            .chain(args.iter().map(OsString::as_os_str))
            .map(|part| part.to_string_lossy())
            .join(" ");

        if is_verbose() {
            info!("Running: {}", command_line);
        } else {
            debug!("Running: {}", command_line);
        }

        let output = Command::new(&path)
            .args(&args)
            .env("PATH", &self.search_path)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|source| CommandError::Spawn {
                command: command_line.clone(),
                source,
            })?;

        let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();

        if !output.status.success() {
            error!("{} failed ({}): {}", command_line, output.status, stderr);
            return Err(CommandError::Failed {
                command: command_line,
                status: output.status.to_string(),
                stdout,
                stderr,
            });
        }

        if !stderr.is_empty() {
            error!("{} reported: {}", command_line, stderr);
            return Err(CommandError::Stderr {
                command: command_line,
                stdout,
                stderr,
            });
        }

        Ok(stdout)
    }
}

/// Extract the `PATH=` value from an environment file such as `/etc/environment`
pub fn search_path_from_environment(file: &Path) -> Option<String> {
    let content = std::fs::read_to_string(file).ok()?;
    content.lines().find_map(|line| {
        let (key, value) = line.split_once('=')?;
        (key.trim() == "PATH").then(|| value.trim().trim_matches('"').to_string())
    })
}

/// Search path for child commands: `/etc/environment` first, then the process PATH
pub fn default_search_path() -> OsString {
    match search_path_from_environment(Path::new(ENVIRONMENT_FILE)) {
        Some(path) => path.into(),
        None => {
            warn!(
                "No PATH entry in {}, falling back to the process PATH",
                ENVIRONMENT_FILE
            );
            std::env::var_os("PATH").unwrap_or_default()
        }
    }
}
