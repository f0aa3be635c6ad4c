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
use crate::config::DeviceChoice;
use crate::device::GpuMode;
use clap::Args;
use clap::Parser;
use clap::Subcommand;
use serde::Serialize;
use serde::Serializer;
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(version, about = "Stage and launch LAMMPS simulations, directly or through Slurm")]
pub struct Cli {
  #[command(subcommand)]
  pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
  /// Stage the working directory and run (or submit) the simulation.
  Run(RunArgs),

  /// Print the command line and job script without touching the filesystem.
  Plan(RunArgs),
}

/// Options shared by `run` and `plan`.
///
/// Every option is optional here; unset options fall back to the config
/// file, then `LMPSIM_*` environment variables, then built-in defaults.
/// Serializes to exactly the options given, keyed by setting name, so it can
/// sit on top of the other configuration layers.
#[derive(Debug, Default, Args, Serialize)]
pub struct RunArgs {
  /// Configuration file (TOML, or JSON with a `.json` extension).
  #[arg(long, env = "LMPSIM_CONFIG")]
  #[serde(skip)]
  pub config: Option<PathBuf>,

  /// Working directory, `path` or `host:path`.
  #[arg(long, short = 'd')]
  #[serde(skip_serializing_if = "Option::is_none")]
  pub directory: Option<String>,

  /// Reuse the directory even if it exists instead of picking a suffixed one.
  #[arg(long)]
  #[serde(skip_serializing_if = "is_false")]
  pub overwrite: bool,

  /// LAMMPS input script.
  #[arg(long, short = 'i')]
  #[serde(skip_serializing_if = "Option::is_none")]
  pub input: Option<PathBuf>,

  /// Reference the input script where it is instead of copying it.
  #[arg(long)]
  #[serde(rename = "copy", serialize_with = "negated", skip_serializing_if = "is_false")]
  pub no_copy: bool,

  /// Extra files to copy into the working directory.
  #[arg(long = "copy", value_name = "FILE")]
  #[serde(skip_serializing_if = "Vec::is_empty")]
  pub files: Vec<PathBuf>,

  /// Directories to create inside the working directory.
  #[arg(long = "subdir", value_name = "NAME")]
  #[serde(skip_serializing_if = "Vec::is_empty")]
  pub subdirs: Vec<String>,

  /// JSON object of input-script variables.
  /// Example: '{"temp": 300, "seed": [1, 2]}'
  #[arg(long)]
  #[serde(skip_serializing_if = "Option::is_none")]
  pub vars: Option<String>,

  #[arg(long, value_enum)]
  #[serde(skip_serializing_if = "Option::is_none")]
  pub device: Option<DeviceChoice>,

  #[arg(long)]
  #[serde(skip_serializing_if = "Option::is_none")]
  pub num_procs: Option<u32>,

  #[arg(long)]
  #[serde(skip_serializing_if = "Option::is_none")]
  pub num_nodes: Option<u32>,

  #[arg(long)]
  #[serde(skip_serializing_if = "Option::is_none")]
  pub procs_per_node: Option<u32>,

  #[arg(long)]
  #[serde(skip_serializing_if = "Option::is_none")]
  pub gpus_per_node: Option<u32>,

  /// Acceleration package for GPU devices.
  #[arg(long, value_enum)]
  #[serde(skip_serializing_if = "Option::is_none")]
  pub mode: Option<GpuMode>,

  /// LAMMPS executable.
  #[arg(long)]
  #[serde(skip_serializing_if = "Option::is_none")]
  pub lmp_exec: Option<PathBuf>,

  /// MPI launcher.
  #[arg(long)]
  #[serde(skip_serializing_if = "Option::is_none")]
  pub mpi_exec: Option<PathBuf>,

  /// Program used to submit job scripts.
  #[arg(long)]
  #[serde(skip_serializing_if = "Option::is_none")]
  pub submit_exec: Option<PathBuf>,

  /// JSON object of extra MPI launcher options.
  /// Example: '{"--bind-to": "core"}'
  #[arg(long)]
  #[serde(skip_serializing_if = "Option::is_none")]
  pub mpi_args: Option<String>,

  /// JSON object of extra LAMMPS options, merged over the device defaults.
  #[arg(long)]
  #[serde(skip_serializing_if = "Option::is_none")]
  pub lmp_args: Option<String>,

  /// JSON object of Slurm directives, merged over the device defaults.
  /// Example: '{"partition": "gpu", "time": "01:00:00"}'
  #[arg(long)]
  #[serde(skip_serializing_if = "Option::is_none")]
  pub slurm_args: Option<String>,

  /// Allow more ranks than cores through a generated host file.
  #[arg(long)]
  #[serde(skip_serializing_if = "is_false")]
  pub activate_virtual: bool,

  /// Job script name inside the working directory.
  #[arg(long)]
  #[serde(skip_serializing_if = "Option::is_none")]
  pub jobscript: Option<String>,

  /// Submit the existing job script instead of generating one.
  #[arg(long)]
  #[serde(rename = "generate_jobscript", serialize_with = "negated", skip_serializing_if = "is_false")]
  pub no_generate_jobscript: bool,

  /// Lines to add after the command in generated job scripts.
  #[arg(long, value_name = "TEXT")]
  #[serde(skip_serializing_if = "Vec::is_empty")]
  pub append: Vec<String>,

  /// Write the program's stdout to this file in the working directory.
  #[arg(long, value_name = "FILE")]
  #[serde(skip_serializing_if = "Option::is_none")]
  pub stdout: Option<PathBuf>,
}

fn is_false(flag: &bool) -> bool {
  !*flag
}

/// `--no-x` flags are stored as the positive setting `x`.
fn negated<S: Serializer>(flag: &bool, serializer: S) -> Result<S::Ok, S::Error> {
  serializer.serialize_bool(!*flag)
}
