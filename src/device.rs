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
use crate::args::merge;
use crate::command::CommandLine;
use crate::jobscript::DEFAULT_JOBSCRIPT;
use crate::jobscript::JobScript;
use clap::ValueEnum;
use serde::Deserialize;
use serde::Serialize;
use std::fmt;
use std::path::Path;
use std::path::PathBuf;

pub const DEFAULT_EXECUTABLE: &str = "lmp";
pub const DEFAULT_MPI_LAUNCHER: &str = "mpirun";
pub const DEFAULT_SUBMIT_PROGRAM: &str = "sbatch";
pub const HOSTFILE: &str = "hostfile";

/// Launcher flags the device always sets itself.
const RESERVED_MPI_ARGS: [&str; 2] = ["-n", "-np"];
/// Program flags the device always sets itself.
const RESERVED_PROGRAM_ARGS: [&str; 2] = ["-in", "-i"];

/// Acceleration package used on GPU devices.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum GpuMode {
  #[default]
  Kokkos,
  Gpu,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceKind {
  /// Runs directly, through the launcher only when more than one process
  /// (or any launcher option) is asked for.
  Local { num_procs: u32 },
  Cpu { num_procs: u32 },
  Gpu { gpus_per_node: u32, mode: GpuMode },
  SlurmCpu { num_nodes: u32, procs_per_node: u32 },
  SlurmGpu { gpus_per_node: u32, mode: GpuMode },
}

/// How the simulation program gets invoked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Device {
  kind: DeviceKind,
  executable: PathBuf,
  mpi_launcher: PathBuf,
  submit_program: PathBuf,
  mpi_args: ArgMap,
  program_args: ArgMap,
  scheduler_args: ArgMap,
  activate_virtual: bool,
  jobscript: String,
  generate_jobscript: bool,
}

impl Device {
  pub fn new(kind: DeviceKind) -> Self {
    Self {
      kind,
      executable: PathBuf::from(DEFAULT_EXECUTABLE),
      mpi_launcher: PathBuf::from(DEFAULT_MPI_LAUNCHER),
      submit_program: PathBuf::from(DEFAULT_SUBMIT_PROGRAM),
      mpi_args: ArgMap::new(),
      program_args: ArgMap::new(),
      scheduler_args: ArgMap::new(),
      activate_virtual: false,
      jobscript: DEFAULT_JOBSCRIPT.to_string(),
      generate_jobscript: true,
    }
  }

  pub fn local(num_procs: u32) -> Self {
    Self::new(DeviceKind::Local { num_procs })
  }

  pub fn cpu(num_procs: u32) -> Self {
    Self::new(DeviceKind::Cpu { num_procs })
  }

  pub fn gpu(gpus_per_node: u32, mode: GpuMode) -> Self {
    Self::new(DeviceKind::Gpu {
      gpus_per_node,
      mode,
    })
  }

  pub fn slurm_cpu(num_nodes: u32, procs_per_node: u32) -> Self {
    Self::new(DeviceKind::SlurmCpu {
      num_nodes,
      procs_per_node,
    })
  }

  pub fn slurm_gpu(gpus_per_node: u32, mode: GpuMode) -> Self {
    Self::new(DeviceKind::SlurmGpu {
      gpus_per_node,
      mode,
    })
  }

  pub fn with_executable(mut self, executable: impl Into<PathBuf>) -> Self {
    self.executable = executable.into();
    self
  }

  pub fn with_mpi_launcher(mut self, launcher: impl Into<PathBuf>) -> Self {
    self.mpi_launcher = launcher.into();
    self
  }

  pub fn with_submit_program(mut self, program: impl Into<PathBuf>) -> Self {
    self.submit_program = program.into();
    self
  }

  pub fn with_mpi_args(mut self, args: ArgMap) -> Self {
    self.mpi_args = args;
    self
  }

  pub fn with_program_args(mut self, args: ArgMap) -> Self {
    self.program_args = args;
    self
  }

  pub fn with_scheduler_args(mut self, args: ArgMap) -> Self {
    self.scheduler_args = args;
    self
  }

  /// Oversubscribe the host: write a host file granting every process a
  /// slot and pass it to the launcher.
  pub fn with_virtual(mut self, activate: bool) -> Self {
    self.activate_virtual = activate;
    self
  }

  pub fn with_jobscript(mut self, name: impl Into<String>) -> Self {
    self.jobscript = name.into();
    self
  }

  /// With `false`, an existing job script of the configured name is
  /// submitted as is.
  pub fn with_generate_jobscript(mut self, generate: bool) -> Self {
    self.generate_jobscript = generate;
    self
  }

  pub fn kind(&self) -> &DeviceKind {
    &self.kind
  }

  pub fn executable(&self) -> &Path {
    &self.executable
  }

  pub fn submit_program(&self) -> &Path {
    &self.submit_program
  }

  pub fn jobscript_name(&self) -> &str {
    &self.jobscript
  }

  pub fn generates_jobscript(&self) -> bool {
    self.generate_jobscript
  }

  pub fn activates_virtual(&self) -> bool {
    self.activate_virtual
  }

  pub fn is_slurm(&self) -> bool {
    matches!(
      self.kind,
      DeviceKind::SlurmCpu { .. } | DeviceKind::SlurmGpu { .. }
    )
  }

  /// Total MPI ranks. Node counts whose product overflows saturate at
  /// `u32::MAX`; [`crate::config::Config`] rejects them up front.
  pub fn num_procs(&self) -> u32 {
    match self.kind {
      DeviceKind::Local { num_procs } | DeviceKind::Cpu { num_procs } => num_procs,
      DeviceKind::Gpu { gpus_per_node, .. } | DeviceKind::SlurmGpu { gpus_per_node, .. } => {
        gpus_per_node
      }
      DeviceKind::SlurmCpu {
        num_nodes,
        procs_per_node,
      } => num_nodes.saturating_mul(procs_per_node),
    }
  }

  /// Acceleration flags the device contributes before user arguments.
  pub fn default_program_args(&self) -> ArgMap {
    match self.kind {
      DeviceKind::Local { .. } | DeviceKind::Cpu { .. } | DeviceKind::SlurmCpu { .. } => {
        ArgMap::new()
      }
      DeviceKind::Gpu {
        gpus_per_node,
        mode: GpuMode::Kokkos,
      }
      | DeviceKind::SlurmGpu {
        gpus_per_node,
        mode: GpuMode::Kokkos,
      } => ArgMap::new()
        .with("-pk", "kokkos newton on neigh full")
        .with("-k", format!("on g {}", gpus_per_node))
        .with("-sf", "kk"),
      DeviceKind::Gpu {
        gpus_per_node,
        mode: GpuMode::Gpu,
      } => ArgMap::new()
        .with("-pk", "gpu newton on neigh full")
        .with("-k", format!("on g {}", gpus_per_node))
        .with("-sf", "gpu"),
      DeviceKind::SlurmGpu {
        mode: GpuMode::Gpu, ..
      } => ArgMap::new()
        .with("-pk", "gpu newton on neigh full")
        .with("-sf", "gpu"),
    }
  }

  /// Scheduler directives the device contributes before user arguments.
  pub fn default_scheduler_args(&self) -> ArgMap {
    match self.kind {
      DeviceKind::Local { .. } | DeviceKind::Cpu { .. } | DeviceKind::Gpu { .. } => ArgMap::new(),
      DeviceKind::SlurmCpu { num_nodes, .. } => ArgMap::new()
        .with("job-name", "CPU-job")
        .with("partition", "normal")
        .with("ntasks", self.num_procs())
        .with("nodes", num_nodes)
        .with("output", "slurm.out"),
      DeviceKind::SlurmGpu { gpus_per_node, .. } => ArgMap::new()
        .with("job-name", "GPU-job")
        .with("partition", "normal")
        .with("ntasks", gpus_per_node)
        .with("cpus-per-task", "2")
        .with("gres", format!("gpu:{}", gpus_per_node))
        .with("output", "slurm.out"),
    }
  }

  /// Effective program arguments: defaults overridden by the user's.
  ///
  /// Keys the device sets itself (`-in`) are dropped; the device wins.
  pub fn program_args(&self) -> ArgMap {
    let mut args = merge(&self.default_program_args(), &self.program_args);
    for key in RESERVED_PROGRAM_ARGS {
      args.remove(key);
    }
    args
  }

  /// Effective launcher arguments: the user's, minus `-n`/`-np` and, with
  /// oversubscription, `-hostfile`.
  pub fn mpi_args(&self) -> ArgMap {
    let mut args = self.mpi_args.clone();
    for key in self.reserved_mpi_args() {
      args.remove(key);
    }
    args
  }

  fn reserved_mpi_args(&self) -> impl Iterator<Item = &'static str> {
    let hostfile = self.activate_virtual.then_some("-hostfile");
    RESERVED_MPI_ARGS.into_iter().chain(hostfile)
  }

  fn warn_reserved(&self) {
    let program = RESERVED_PROGRAM_ARGS
      .into_iter()
      .filter(|key| self.program_args.contains_key(key));
    let launcher = self
      .reserved_mpi_args()
      .filter(|key| self.mpi_args.contains_key(key));
    for key in program.chain(launcher) {
      tracing::warn!(device = %self, key, "Ignoring argument the device sets itself");
    }
  }

  /// Effective scheduler arguments: defaults overridden by the user's.
  pub fn scheduler_args(&self) -> ArgMap {
    merge(&self.default_scheduler_args(), &self.scheduler_args)
  }

  /// Whether the command goes through the MPI launcher.
  pub fn uses_launcher(&self) -> bool {
    match self.kind {
      DeviceKind::Local { num_procs } | DeviceKind::Cpu { num_procs } => {
        num_procs != 1 || !self.mpi_args().is_empty() || self.activate_virtual
      }
      DeviceKind::Gpu { .. } | DeviceKind::SlurmCpu { .. } | DeviceKind::SlurmGpu { .. } => true,
    }
  }

  /// Contents of the host file, when oversubscription is active.
  pub fn hostfile_contents(&self) -> Option<String> {
    self
      .activate_virtual
      .then(|| format!("localhost slots={}\n", self.num_procs()))
  }

  /// Builds the invocation, relative to the working directory:
  ///
  /// `[launcher -n N [-hostfile hostfile] mpi_args...] executable -in script program_args... -var ...`
  pub fn build_command(&self, script: &str, variables: &ArgMap) -> CommandLine {
    self.warn_reserved();
    let program = CommandLine::new(&self.executable)
      .args(["-in", script])
      .args(self.program_args().flatten())
      .args(variables.to_variable_args());

    if !self.uses_launcher() {
      return program;
    }

    let mut command = CommandLine::new(&self.mpi_launcher)
      .arg("-n")
      .arg(self.num_procs().to_string());
    if self.activate_virtual {
      command = command.args(["-hostfile", HOSTFILE]);
    }
    command
      .args(self.mpi_args().flatten())
      .args(program.argv())
  }

  /// The batch script for Slurm devices; `None` for devices that run directly.
  pub fn build_jobscript(&self, command: &CommandLine) -> Option<JobScript> {
    match self.kind {
      DeviceKind::SlurmCpu { .. } | DeviceKind::SlurmGpu { .. } => Some(JobScript::build(
        self.jobscript.clone(),
        &self.scheduler_args(),
        command,
      )),
      DeviceKind::Local { .. } | DeviceKind::Cpu { .. } | DeviceKind::Gpu { .. } => None,
    }
  }
}

impl fmt::Display for Device {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let label = match self.kind {
      DeviceKind::Local { .. } => "Local",
      DeviceKind::Cpu { .. } => "CPU",
      DeviceKind::Gpu { .. } => "GPU",
      DeviceKind::SlurmCpu { .. } => "CPU (slurm)",
      DeviceKind::SlurmGpu { .. } => "GPU (slurm)",
    };
    f.write_str(label)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::args::ArgValue;

  #[test]
  fn test_cpu_command() {
    let device = Device::cpu(4).with_executable("lmp");
    let cmd = device.build_command("script.in", &ArgMap::new());
    assert_eq!(cmd.argv(), ["mpirun", "-n", "4", "lmp", "-in", "script.in"]);
  }

  #[test]
  fn test_single_process_local_skips_launcher() {
    let device = Device::local(1).with_executable("/opt/lammps/lmp_serial");
    let vars = ArgMap::new().with("temp", "300");
    let cmd = device.build_command("in.lj", &vars);
    assert_eq!(
      cmd.argv(),
      ["/opt/lammps/lmp_serial", "-in", "in.lj", "-var", "temp", "300"]
    );
  }

  #[test]
  fn test_single_process_with_mpi_args_uses_launcher() {
    let device = Device::local(1).with_mpi_args(ArgMap::new().with("--bind-to", "core"));
    let cmd = device.build_command("in.lj", &ArgMap::new());
    assert_eq!(
      cmd.argv(),
      ["mpirun", "-n", "1", "--bind-to", "core", "lmp", "-in", "in.lj"]
    );
  }

  #[test]
  fn test_gpu_defaults_merge_under_user_args() {
    let device = Device::gpu(2, GpuMode::Kokkos)
      .with_program_args(ArgMap::new().with("-sf", "gpu").with("-log", "none"));
    let cmd = device.build_command("in.lj", &ArgMap::new());
    assert_eq!(
      cmd.argv(),
      [
        "mpirun", "-n", "2", "lmp", "-in", "in.lj", "-pk", "kokkos", "newton", "on", "neigh",
        "full", "-k", "on", "g", "2", "-sf", "gpu", "-log", "none"
      ]
    );
  }

  #[test]
  fn test_gpu_package_mode_defaults() {
    let gpu = Device::gpu(1, GpuMode::Gpu).default_program_args();
    let keys: Vec<&str> = gpu.keys().collect();
    assert_eq!(keys, ["-pk", "-k", "-sf"]);

    let slurm = Device::slurm_gpu(1, GpuMode::Gpu).default_program_args();
    let keys: Vec<&str> = slurm.keys().collect();
    assert_eq!(keys, ["-pk", "-sf"]);
  }

  #[test]
  fn test_reserved_keys_are_dropped() {
    let device = Device::cpu(4)
      .with_mpi_args(ArgMap::new().with("-n", "64").with("--oversubscribe", ArgValue::Flag))
      .with_program_args(ArgMap::new().with("-in", "other.in"));
    let cmd = device.build_command("script.in", &ArgMap::new());
    assert_eq!(
      cmd.argv(),
      ["mpirun", "-n", "4", "--oversubscribe", "lmp", "-in", "script.in"]
    );
  }

  #[test]
  fn test_virtual_adds_hostfile_before_user_mpi_args() {
    let device = Device::cpu(8)
      .with_virtual(true)
      .with_mpi_args(ArgMap::new().with("--oversubscribe", ArgValue::Flag));
    let cmd = device.build_command("script.in", &ArgMap::new());
    assert_eq!(
      cmd.argv(),
      [
        "mpirun",
        "-n",
        "8",
        "-hostfile",
        "hostfile",
        "--oversubscribe",
        "lmp",
        "-in",
        "script.in"
      ]
    );
    assert_eq!(device.hostfile_contents().as_deref(), Some("localhost slots=8\n"));
    assert_eq!(Device::cpu(8).hostfile_contents(), None);
  }

  #[test]
  fn test_slurm_cpu_scheduler_defaults() {
    let device = Device::slurm_cpu(2, 16)
      .with_scheduler_args(ArgMap::new().with("ntasks", "8").with("array", "110-150:10"));
    let args = device.scheduler_args();
    let keys: Vec<&str> = args.keys().collect();
    assert_eq!(keys, ["job-name", "partition", "ntasks", "nodes", "output", "array"]);
    assert_eq!(args.get("ntasks"), Some(&ArgValue::from("8")));
    assert_eq!(args.get("nodes"), Some(&ArgValue::from("2")));
    assert_eq!(device.num_procs(), 32);
  }

  #[test]
  fn test_slurm_gpu_jobscript() {
    let device = Device::slurm_gpu(1, GpuMode::Kokkos).with_jobscript("gpu.sh");
    let vars = ArgMap::new().with("temp", "${SLURM_ARRAY_TASK_ID}");
    let cmd = device.build_command("script.in", &vars);
    let script = device.build_jobscript(&cmd).unwrap();

    assert_eq!(script.name(), "gpu.sh");
    assert_eq!(
      script.lines(),
      [
        "#!/bin/bash",
        "#SBATCH --job-name=GPU-job",
        "#SBATCH --partition=normal",
        "#SBATCH --ntasks=1",
        "#SBATCH --cpus-per-task=2",
        "#SBATCH --gres=gpu:1",
        "#SBATCH --output=slurm.out",
        "",
        "mpirun -n 1 lmp -in script.in -pk kokkos newton on neigh full -k on g 1 -sf kk -var temp ${SLURM_ARRAY_TASK_ID}",
      ]
    );
  }

  #[test]
  fn test_direct_devices_have_no_jobscript() {
    let cmd = CommandLine::new("lmp");
    assert!(Device::cpu(4).build_jobscript(&cmd).is_none());
    assert!(Device::local(1).build_jobscript(&cmd).is_none());
    assert!(Device::gpu(1, GpuMode::Kokkos).build_jobscript(&cmd).is_none());
  }

  #[test]
  fn test_display_labels() {
    assert_eq!(Device::cpu(1).to_string(), "CPU");
    assert_eq!(Device::slurm_gpu(1, GpuMode::Gpu).to_string(), "GPU (slurm)");
  }
}
