// Copyright 2025 Chisomo Makombo Sakala
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Where the working directory lives: on this machine, or on a host reached
//! through a remote shell.
//!
//! `host:path` strings are parsed once, here, by [`parse_location`]. Everything
//! downstream receives an [`ExecutionContext`].
use crate::command::CommandLine;
use crate::command::shell_word;
use crate::error::ResourceError;
use std::fs;
use std::path::Path;
use std::path::PathBuf;
use std::process::Command;
use std::process::Output;

pub const DEFAULT_REMOTE_SHELL: &str = "ssh";
pub const DEFAULT_REMOTE_COPY: &str = "rsync";

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ExecutionContext {
  #[default]
  Local,
  Remote(RemoteHost),
}

/// A host reachable through `shell` (ssh-like) and `copier` (rsync-like).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteHost {
  pub host: String,
  pub shell: PathBuf,
  pub copier: PathBuf,
}

impl RemoteHost {
  pub fn new(host: impl Into<String>) -> Self {
    Self {
      host: host.into(),
      shell: PathBuf::from(DEFAULT_REMOTE_SHELL),
      copier: PathBuf::from(DEFAULT_REMOTE_COPY),
    }
  }

  /// `host:path`, as the copy program expects its destination.
  pub fn target(&self, path: &Path) -> String {
    format!("{}:{}", self.host, path.display())
  }

  /// The command that runs `script` on the host.
  pub fn shell_command(&self, script: &str) -> CommandLine {
    CommandLine::new(&self.shell).arg(&self.host).arg(script)
  }

  /// Runs `script` on the host, blocking until it returns.
  pub fn run(&self, script: &str) -> Result<Output, ResourceError> {
    tracing::debug!(host = %self.host, %script, "Running remote command");
    Command::new(&self.shell)
      .arg(&self.host)
      .arg(script)
      .output()
      .map_err(|source| ResourceError::RemoteSpawn {
        program: self.shell.clone(),
        source,
      })
  }

  fn command_failed(&self, script: &str, output: &Output) -> ResourceError {
    ResourceError::RemoteCommand {
      host: self.host.clone(),
      command: script.to_string(),
      code: output.status.code(),
      stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
    }
  }
}

impl ExecutionContext {
  pub fn is_remote(&self) -> bool {
    matches!(self, ExecutionContext::Remote(_))
  }

  pub fn host(&self) -> Option<&str> {
    match self {
      ExecutionContext::Local => None,
      ExecutionContext::Remote(remote) => Some(&remote.host),
    }
  }

  /// Replaces the remote shell and copy programs; a no-op for local contexts.
  pub fn with_remote_tools(self, shell: impl Into<PathBuf>, copier: impl Into<PathBuf>) -> Self {
    match self {
      ExecutionContext::Local => ExecutionContext::Local,
      ExecutionContext::Remote(remote) => ExecutionContext::Remote(RemoteHost {
        shell: shell.into(),
        copier: copier.into(),
        ..remote
      }),
    }
  }

  pub fn exists(&self, path: &Path) -> Result<bool, ResourceError> {
    match self {
      ExecutionContext::Local => path.try_exists().map_err(|source| ResourceError::Exists {
        path: path.to_path_buf(),
        source,
      }),
      ExecutionContext::Remote(remote) => {
        let script = format!("test -e {}", shell_word(&path.to_string_lossy()));
        let output = remote.run(&script)?;
        // `test` exits 1 for a missing path; anything else came from the shell.
        match output.status.code() {
          Some(0) => Ok(true),
          Some(1) => Ok(false),
          _ => Err(remote.command_failed(&script, &output)),
        }
      }
    }
  }

  /// Creates `path` and its parents. Existing directories are not an error.
  pub fn create_dir_all(&self, path: &Path) -> Result<(), ResourceError> {
    match self {
      ExecutionContext::Local => fs::create_dir_all(path).map_err(|source| ResourceError::CreateDir {
        path: path.to_path_buf(),
        source,
      }),
      ExecutionContext::Remote(remote) => {
        let script = format!("mkdir -p {}", shell_word(&path.to_string_lossy()));
        let output = remote.run(&script)?;
        if output.status.success() {
          Ok(())
        } else {
          Err(remote.command_failed(&script, &output))
        }
      }
    }
  }

  /// Wraps `command` so it runs inside `dir`.
  ///
  /// Local commands are returned unchanged; the caller sets the child's
  /// working directory instead.
  pub fn in_directory(&self, dir: &Path, command: &CommandLine) -> CommandLine {
    self.in_directory_with_stdout(dir, command, None)
  }

  /// [`ExecutionContext::in_directory`], with a remote command's stdout
  /// redirected into `stdout` on the host, relative to `dir`. Local
  /// commands ignore `stdout`; the caller opens the file itself.
  pub fn in_directory_with_stdout(
    &self,
    dir: &Path,
    command: &CommandLine,
    stdout: Option<&Path>,
  ) -> CommandLine {
    match self {
      ExecutionContext::Local => command.clone(),
      ExecutionContext::Remote(remote) => {
        let mut script = format!(
          "cd {} && {}",
          shell_word(&dir.to_string_lossy()),
          command.to_shell()
        );
        if let Some(file) = stdout {
          script.push_str(" > ");
          script.push_str(&shell_word(&file.to_string_lossy()));
        }
        remote.shell_command(&script)
      }
    }
  }
}

/// Splits a `host:path` location into its context and path.
///
/// Anything without a colon, or whose part before the colon is empty or
/// contains a path separator, is a local path.
pub fn parse_location(location: &str) -> (ExecutionContext, PathBuf) {
  match location.split_once(':') {
    Some((host, path)) if !host.is_empty() && !host.contains('/') => (
      ExecutionContext::Remote(RemoteHost::new(host)),
      PathBuf::from(path),
    ),
    _ => (ExecutionContext::Local, PathBuf::from(location)),
  }
}
