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
use std::path::PathBuf;
use thiserror::Error;

/// Top-level error enum for the lmpsim library.
///
/// Every failure is surfaced unchanged; nothing in the library retries.
/// A simulation program that runs and exits non-zero is *not* an error,
/// see [`crate::simulator::Outcome`].
#[derive(Error, Debug)]
pub enum SimulatorError {
  #[error("Required file not found")]
  NotFound(#[from] NotFoundError),

  #[error("File transfer failed")]
  Transfer(#[from] TransferError),

  #[error("Working directory error")]
  Resource(#[from] ResourceError),

  #[error("Operation invoked out of order")]
  State(#[from] StateError),

  #[error("Failed to launch simulation")]
  Launch(#[from] LaunchError),

  #[error("Job submission failed")]
  Submission(#[from] SubmissionError),

  #[error("Configuration error")]
  Config(#[from] ConfigError),
}

pub type Result<T, E = SimulatorError> = std::result::Result<T, E>;

/// Missing inputs (src/stager.rs, src/jobscript.rs).
#[derive(Error, Debug)]
pub enum NotFoundError {
  #[error("Source file not found: {0}")]
  Source(PathBuf),

  #[error("Input script not found: {0}")]
  InputScript(PathBuf),

  #[error("Job script not found: {0}")]
  JobScript(PathBuf),
}

/// Errors moving bytes into the working directory (src/stager.rs).
#[derive(Error, Debug)]
pub enum TransferError {
  #[error("Failed to copy {from} to {to}")]
  Copy {
    from: PathBuf,
    to: PathBuf,
    #[source]
    source: fs_extra::error::Error,
  },

  #[error("Failed to move staged file into place at {to}")]
  Rename {
    to: PathBuf,
    #[source]
    source: std::io::Error,
  },

  #[error("Failed to write {path}")]
  Write {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },

  #[error("Failed to read {path}")]
  Read {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },

  #[error("Failed to run remote copy program {program}")]
  RemoteSpawn {
    program: PathBuf,
    #[source]
    source: std::io::Error,
  },

  #[error("Remote copy of {from} to {to} failed (exit code {code:?}): {stderr}")]
  Remote {
    from: PathBuf,
    to: String,
    code: Option<i32>,
    stderr: String,
  },
}

/// Errors creating or checking directories (src/resolver.rs, src/context.rs).
#[derive(Error, Debug)]
pub enum ResourceError {
  #[error("Failed to check whether {path} exists")]
  Exists {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },

  #[error("Failed to create directory {path}")]
  CreateDir {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },

  #[error("Failed to run remote shell {program}")]
  RemoteSpawn {
    program: PathBuf,
    #[source]
    source: std::io::Error,
  },

  #[error("Remote command `{command}` on {host} failed (exit code {code:?}): {stderr}")]
  RemoteCommand {
    host: String,
    command: String,
    code: Option<i32>,
    stderr: String,
  },
}

/// Lifecycle violations (src/simulator.rs, src/jobscript.rs).
#[derive(Error, Debug)]
pub enum StateError {
  #[error("Working directory has not been resolved")]
  DirectoryNotResolved,

  #[error("No input script registered")]
  NoInputScript,

  #[error("Job script {0} has already been submitted")]
  JobScriptSubmitted(String),
}

/// Errors starting or waiting on the simulation process (src/simulator.rs).
#[derive(Error, Debug)]
pub enum LaunchError {
  #[error("Program not found on the execution host: {program}")]
  ProgramNotFound { program: PathBuf },

  #[error("Failed to spawn {program}")]
  Spawn {
    program: PathBuf,
    #[source]
    source: std::io::Error,
  },

  #[error("Failed to open stdout file {path}")]
  OpenStdout {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },

  #[error("Failed to take stderr pipe")]
  PipeStderr,

  #[error("Failed to wait for simulation process")]
  Wait(#[source] std::io::Error),

  #[error("Failed to read {target} stderr")]
  ReadStderr {
    target: &'static str,
    #[source]
    source: std::io::Error,
  },

  #[error("Stderr forwarding task failed")]
  StderrTask(#[source] tokio::task::JoinError),
}

/// Errors handing a job script to the scheduler (src/simulator.rs).
#[derive(Error, Debug)]
pub enum SubmissionError {
  #[error("Failed to run submit program {program}")]
  Spawn {
    program: PathBuf,
    #[source]
    source: std::io::Error,
  },

  #[error("Scheduler rejected the job script (exit code {code:?}): {stderr}")]
  Rejected { code: Option<i32>, stderr: String },
}

/// Errors related to configuration resolution (src/config.rs).
#[derive(Error, Debug)]
pub enum ConfigError {
  #[error("Failed to load configuration")]
  Extract(#[from] Box<figment::Error>),

  #[error("Config file not found: {0}")]
  ConfigFileNotFound(PathBuf),

  #[error("Failed to parse --{option} JSON")]
  ParseArgMap {
    option: &'static str,
    #[source]
    source: serde_json::Error,
  },

  #[error("Device {device} requires --num-nodes")]
  MissingNumNodes { device: String },

  #[error("Process, node and GPU counts must be at least 1 (got {field} = 0)")]
  ZeroCount { field: &'static str },

  #[error("{num_nodes} nodes x {procs_per_node} processes per node does not fit in a process count")]
  ProcessCountOverflow { num_nodes: u32, procs_per_node: u32 },
}
