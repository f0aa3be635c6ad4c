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
use crate::args::ArgMap;
use crate::command::CommandLine;
use crate::context::ExecutionContext;
use crate::context::parse_location;
use crate::device::Device;
use crate::device::HOSTFILE;
use crate::error::LaunchError;
use crate::error::NotFoundError;
use crate::error::Result;
use crate::error::SimulatorError;
use crate::error::StateError;
use crate::error::SubmissionError;
use crate::jobscript::JobScript;
use crate::jobscript::parse_job_id;
use crate::resolver;
use crate::resolver::WorkingDirectory;
use crate::stager::FileStager;
use crate::stager::StagedFile;
use std::io::ErrorKind;
use std::path::Path;
use std::path::PathBuf;
use std::process::Stdio;
use tokio::io::AsyncBufReadExt;
use tokio::io::AsyncRead;
use tokio::io::BufReader;
use tokio::process::Command;
use tracing::Instrument;

/// Lifecycle of a [`Simulator`]. States only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum SimulatorState {
  Created,
  DirectoryResolved,
  FilesStaged,
  ScriptSet,
  Ready,
  Executed,
  Submitted,
}

/// Where the simulation program's stdout goes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum StdoutTarget {
  #[default]
  Discard,
  Inherit,
  /// A file, relative to the working directory. Remote runs redirect into
  /// it on the host.
  File(PathBuf),
}

/// What `run` did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
  /// The program ran to completion. A non-zero code is the program's own
  /// failure, not ours; `None` means it was killed by a signal.
  Executed { exit_code: Option<i32> },
  /// The scheduler accepted the job script.
  Submitted {
    job_id: Option<u64>,
    jobscript: String,
  },
}

/// Stages a simulation's working directory and launches it on a [`Device`].
///
/// ```no_run
/// # async fn demo() -> lmpsim::error::Result<()> {
/// use lmpsim::args::ArgMap;
/// use lmpsim::device::Device;
/// use lmpsim::simulator::Simulator;
///
/// let mut sim = Simulator::create("simulation", false)?;
/// sim.copy_to_wd(["init_config.data"])?;
/// sim.set_input_script("script.in", true, ArgMap::new().with("temp", "300"))?;
/// sim.run(&Device::cpu(4)).await?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct Simulator {
  base_path: PathBuf,
  overwrite: bool,
  state: SimulatorState,
  stager: FileStager,
  directory: Option<WorkingDirectory>,
  staged: Vec<StagedFile>,
  input_script: Option<StagedFile>,
  variables: ArgMap,
  jobscript: Option<JobScript>,
  appends: Vec<String>,
  stdout: StdoutTarget,
}

impl Default for Simulator {
  /// A simulator for the current directory, used in place (`overwrite`).
  fn default() -> Self {
    Self::new(".", true)
  }
}

impl Simulator {
  /// Creates a simulator for `location` (`path` or `host:path`) without
  /// touching the filesystem.
  pub fn new(location: &str, overwrite: bool) -> Self {
    let (context, base_path) = parse_location(location);
    Self {
      base_path,
      overwrite,
      state: SimulatorState::Created,
      stager: FileStager::new(context),
      directory: None,
      staged: Vec::new(),
      input_script: None,
      variables: ArgMap::new(),
      jobscript: None,
      appends: Vec::new(),
      stdout: StdoutTarget::default(),
    }
  }

  /// [`Simulator::new`] followed by [`Simulator::resolve_directory`].
  pub fn create(location: &str, overwrite: bool) -> Result<Self> {
    let mut sim = Self::new(location, overwrite);
    sim.resolve_directory()?;
    Ok(sim)
  }

  /// Swaps the remote shell and copy programs used for `host:path` locations.
  pub fn with_remote_tools(mut self, shell: impl Into<PathBuf>, copier: impl Into<PathBuf>) -> Self {
    let context = self.stager.context().clone().with_remote_tools(shell, copier);
    self.stager = FileStager::new(context);
    self
  }

  pub fn state(&self) -> SimulatorState {
    self.state
  }

  pub fn working_directory(&self) -> Option<&WorkingDirectory> {
    self.directory.as_ref()
  }

  pub fn staged_files(&self) -> &[StagedFile] {
    &self.staged
  }

  pub fn input_script(&self) -> Option<&StagedFile> {
    self.input_script.as_ref()
  }

  /// The job script of the last Slurm run, if any.
  pub fn jobscript(&self) -> Option<&JobScript> {
    self.jobscript.as_ref()
  }

  pub fn set_stdout(&mut self, target: StdoutTarget) {
    self.stdout = target;
  }

  fn advance(&mut self, to: SimulatorState) {
    if to > self.state {
      self.state = to;
    }
  }

  fn wd(&self) -> Result<&WorkingDirectory, StateError> {
    self.directory.as_ref().ok_or(StateError::DirectoryNotResolved)
  }

  /// Resolves and creates the working directory. Later calls return the
  /// directory resolved the first time.
  pub fn resolve_directory(&mut self) -> Result<&WorkingDirectory> {
    if self.directory.is_none() {
      let wd = resolver::create(&self.base_path, self.overwrite, self.stager.context().clone())?;
      self.directory = Some(wd);
      self.advance(SimulatorState::DirectoryResolved);
    }
    Ok(self.wd()?)
  }

  /// Copies each file into the working directory under its own name.
  pub fn copy_to_wd<I, P>(&mut self, files: I) -> Result<()>
  where
    I: IntoIterator<Item = P>,
    P: AsRef<Path>,
  {
    for file in files {
      self.copy_as(file.as_ref(), None)?;
    }
    Ok(())
  }

  /// Copies `source` into the working directory as `dest_name`.
  pub fn copy_as(&mut self, source: &Path, dest_name: Option<&str>) -> Result<&StagedFile> {
    let wd = self.wd()?;
    let staged = self.stager.stage(source, wd.path(), dest_name, true)?;
    self.staged.push(staged);
    self.advance(SimulatorState::FilesStaged);
    Ok(&self.staged[self.staged.len() - 1])
  }

  /// Creates a directory under the working directory.
  pub fn create_subdir(&mut self, name: impl AsRef<Path>) -> Result<PathBuf> {
    let wd = self.wd()?;
    let path = self.stager.create_subdir(wd.path(), name)?;
    self.advance(SimulatorState::FilesStaged);
    Ok(path)
  }

  /// Registers the input script and the variables passed to it on the
  /// command line. Without `copy` the script is referenced where it is.
  pub fn set_input_script(
    &mut self,
    file: impl AsRef<Path>,
    copy: bool,
    variables: ArgMap,
  ) -> Result<&StagedFile> {
    let file = file.as_ref();
    let wd = self.wd()?;
    let staged = self
      .stager
      .stage(file, wd.path(), None, copy)
      .map_err(|err| match err {
        SimulatorError::NotFound(NotFoundError::Source(path)) => NotFoundError::InputScript(path).into(),
        other => other,
      })?;

    self.variables = variables;
    self.advance(SimulatorState::ScriptSet);
    Ok(self.input_script.insert(staged))
  }

  /// Queues lines to add after the command of every generated job script.
  pub fn append_to_jobscript(&mut self, text: impl Into<String>) {
    self.appends.push(text.into());
  }

  /// Builds the command for `device` and writes what it needs into the
  /// working directory: the host file and, for Slurm devices, the job script.
  pub fn prepare(&mut self, device: &Device) -> Result<CommandLine> {
    let Some(script) = &self.input_script else {
      return Err(StateError::NoInputScript.into());
    };
    let wd = self.wd()?;
    let command = device.build_command(&script.dest_name.to_string_lossy(), &self.variables);

    if let Some(contents) = device.hostfile_contents() {
      self.stager.write(wd.path(), HOSTFILE, &contents)?;
    }

    if device.is_slurm() {
      let jobscript = match device.build_jobscript(&command) {
        Some(mut jobscript) if device.generates_jobscript() => {
          for text in &self.appends {
            jobscript.append(text)?;
          }
          self
            .stager
            .write(wd.path(), jobscript.name(), &jobscript.render())?;
          jobscript
        }
        _ => self.existing_jobscript(wd, device.jobscript_name())?,
      };
      self.jobscript = Some(jobscript);
    }

    self.advance(SimulatorState::Ready);
    Ok(command)
  }

  fn existing_jobscript(&self, wd: &WorkingDirectory, name: &str) -> Result<JobScript> {
    let path = wd.join(name);
    match &wd.context {
      ExecutionContext::Local => JobScript::load(&path),
      ExecutionContext::Remote(_) => {
        if wd.context.exists(&path)? {
          Ok(JobScript::existing(name, Vec::new()))
        } else {
          Err(NotFoundError::JobScript(path).into())
        }
      }
    }
  }

  /// Runs the simulation on `device`.
  ///
  /// Direct devices block until the program exits. Slurm devices block only
  /// until the scheduler accepts the job. Can be called again after a run;
  /// the working directory is reused.
  pub async fn run(&mut self, device: &Device) -> Result<Outcome> {
    if self.state < SimulatorState::ScriptSet {
      return Err(StateError::NoInputScript.into());
    }

    let span = tracing::info_span!(
      "run",
      device = %device,
      directory = %self.wd()?.location()
    );

    async {
      let command = self.prepare(device)?;
      if device.is_slurm() {
        self.submit(device).await
      } else {
        self.execute(&command).await
      }
    }
    .instrument(span)
    .await
  }

  async fn execute(&mut self, command: &CommandLine) -> Result<Outcome> {
    let wd = self.wd()?;
    let remote_stdout = match &self.stdout {
      StdoutTarget::File(path) if wd.context.is_remote() => Some(path.as_path()),
      _ => None,
    };
    let invocation = wd
      .context
      .in_directory_with_stdout(wd.path(), command, remote_stdout);

    let mut cmd = Command::new(&invocation.program);
    cmd
      .args(&invocation.args)
      .stdin(Stdio::null())
      .stdout(self.stdout_stdio(wd)?)
      .stderr(Stdio::piped())
      .kill_on_drop(true);
    if !wd.context.is_remote() {
      cmd.current_dir(wd.path());
    }

    tracing::info!(command = %command.to_shell(), "Starting simulation");
    tracing::debug!(cmd = ?cmd, "Spawning simulation");
    let mut child = cmd.spawn().map_err(|source| spawn_error(&invocation.program, source))?;
    tracing::info!(pid = ?child.id(), "Simulation started");

    let stderr = child.stderr.take().ok_or(LaunchError::PipeStderr)?;
    let stderr_task = tokio::spawn(
      read_and_log_stderr(stderr, "simulation")
        .instrument(tracing::info_span!("stderr_handler", target = "simulation")),
    );

    let status = child.wait().await.map_err(LaunchError::Wait)?;
    stderr_task.await.map_err(LaunchError::StderrTask)??;

    if status.success() {
      tracing::info!("Simulation finished");
    } else {
      tracing::error!(code = ?status.code(), "Simulation process failed");
    }

    self.advance(SimulatorState::Executed);
    Ok(Outcome::Executed {
      exit_code: status.code(),
    })
  }

  async fn submit(&mut self, device: &Device) -> Result<Outcome> {
    let wd = self.wd()?;
    let Some(jobscript) = self.jobscript.as_ref() else {
      return Err(StateError::NoInputScript.into());
    };
    let submission = CommandLine::new(device.submit_program()).arg(jobscript.name());
    let invocation = wd.context.in_directory(wd.path(), &submission);

    let mut cmd = Command::new(&invocation.program);
    cmd
      .args(&invocation.args)
      .stdin(Stdio::null())
      .stdout(Stdio::piped())
      .stderr(Stdio::piped());
    if !wd.context.is_remote() {
      cmd.current_dir(wd.path());
    }

    tracing::debug!(cmd = ?cmd, "Submitting job script");
    let output = cmd.output().await.map_err(|source| SubmissionError::Spawn {
      program: invocation.program.clone(),
      source,
    })?;

    if !output.status.success() {
      return Err(
        SubmissionError::Rejected {
          code: output.status.code(),
          stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        }
        .into(),
      );
    }

    let job_id = parse_job_id(&String::from_utf8_lossy(&output.stdout));
    match job_id {
      Some(id) => tracing::info!(job_id = id, "Job submitted"),
      None => tracing::warn!("Job submitted, but no job id found in scheduler reply"),
    }

    let name = jobscript.name().to_string();
    if let Some(jobscript) = self.jobscript.as_mut() {
      jobscript.mark_submitted();
    }
    self.advance(SimulatorState::Submitted);
    Ok(Outcome::Submitted {
      job_id,
      jobscript: name,
    })
  }

  fn stdout_stdio(&self, wd: &WorkingDirectory) -> Result<Stdio, LaunchError> {
    match &self.stdout {
      StdoutTarget::Discard => Ok(Stdio::null()),
      StdoutTarget::Inherit => Ok(Stdio::inherit()),
      // Redirected by the remote shell.
      StdoutTarget::File(_) if wd.context.is_remote() => Ok(Stdio::null()),
      StdoutTarget::File(path) => {
        let path = wd.join(path);
        std::fs::File::create(&path)
          .map(Stdio::from)
          .map_err(|source| LaunchError::OpenStdout { path, source })
      }
    }
  }
}

fn spawn_error(program: &Path, source: std::io::Error) -> LaunchError {
  if source.kind() == ErrorKind::NotFound {
    LaunchError::ProgramNotFound {
      program: program.to_path_buf(),
    }
  } else {
    LaunchError::Spawn {
      program: program.to_path_buf(),
      source,
    }
  }
}

/// Reads lines from a process's stderr and logs them.
async fn read_and_log_stderr<R: AsyncRead + Unpin>(
  stream: R,
  target: &'static str,
) -> Result<(), LaunchError> {
  let mut reader = BufReader::new(stream).lines();

  while let Some(line) = reader
    .next_line()
    .await
    .map_err(|source| LaunchError::ReadStderr { target, source })?
  {
    tracing::warn!(target, "{}", line);
  }
  Ok(())
}
