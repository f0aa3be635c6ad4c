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
use crate::cli::RunArgs;
use crate::context::DEFAULT_REMOTE_COPY;
use crate::context::DEFAULT_REMOTE_SHELL;
use crate::device::DEFAULT_EXECUTABLE;
use crate::device::DEFAULT_MPI_LAUNCHER;
use crate::device::DEFAULT_SUBMIT_PROGRAM;
use crate::device::Device;
use crate::device::DeviceKind;
use crate::device::GpuMode;
use crate::error::ConfigError;
use crate::jobscript::DEFAULT_JOBSCRIPT;
use crate::simulator::StdoutTarget;
use clap::ValueEnum;
use figment::Figment;
use figment::providers::Env;
use figment::providers::Format;
use figment::providers::Json;
use figment::providers::Serialized;
use figment::providers::Toml;
use serde::Deserialize;
use serde::Serialize;
use std::path::Path;
use std::path::PathBuf;

/// Prefix of environment variables read as configuration.
pub const ENV_PREFIX: &str = "LMPSIM_";

/// Environment keys never read as settings: JSON maps and lists (which the
/// environment provider would mangle) and the front end's own variables.
const ENV_IGNORED: [&str; 9] = [
  "vars",
  "mpi_args",
  "lmp_args",
  "slurm_args",
  "files",
  "subdirs",
  "append",
  "config",
  "log_file",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum DeviceChoice {
  #[default]
  Local,
  Cpu,
  Gpu,
  SlurmCpu,
  SlurmGpu,
}

/// Raw settings as layered by figment, before validation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
  pub directory: String,
  pub overwrite: bool,
  pub input: Option<PathBuf>,
  pub copy: bool,
  pub files: Vec<PathBuf>,
  pub subdirs: Vec<String>,
  pub vars: Option<String>,
  pub device: DeviceChoice,
  pub num_procs: Option<u32>,
  pub num_nodes: Option<u32>,
  pub procs_per_node: Option<u32>,
  pub gpus_per_node: Option<u32>,
  pub mode: GpuMode,
  pub lmp_exec: PathBuf,
  pub mpi_exec: PathBuf,
  pub submit_exec: PathBuf,
  pub mpi_args: Option<String>,
  pub lmp_args: Option<String>,
  pub slurm_args: Option<String>,
  pub activate_virtual: bool,
  pub jobscript: String,
  pub generate_jobscript: bool,
  pub append: Vec<String>,
  pub stdout: Option<PathBuf>,
  pub remote_shell: PathBuf,
  pub remote_copy: PathBuf,
}

impl Default for Settings {
  fn default() -> Self {
    Self {
      directory: "simulation".to_string(),
      overwrite: false,
      input: None,
      copy: true,
      files: Vec::new(),
      subdirs: Vec::new(),
      vars: None,
      device: DeviceChoice::default(),
      num_procs: None,
      num_nodes: None,
      procs_per_node: None,
      gpus_per_node: None,
      mode: GpuMode::default(),
      lmp_exec: PathBuf::from(DEFAULT_EXECUTABLE),
      mpi_exec: PathBuf::from(DEFAULT_MPI_LAUNCHER),
      submit_exec: PathBuf::from(DEFAULT_SUBMIT_PROGRAM),
      mpi_args: None,
      lmp_args: None,
      slurm_args: None,
      activate_virtual: false,
      jobscript: DEFAULT_JOBSCRIPT.to_string(),
      generate_jobscript: true,
      append: Vec::new(),
      stdout: None,
      remote_shell: PathBuf::from(DEFAULT_REMOTE_SHELL),
      remote_copy: PathBuf::from(DEFAULT_REMOTE_COPY),
    }
  }
}

impl Settings {
  /// Layers defaults, the config file, `LMPSIM_*` variables and the
  /// options given on the command line, in increasing precedence.
  pub fn figment(args: &RunArgs) -> Result<Figment, ConfigError> {
    let mut figment = Figment::from(Serialized::defaults(Settings::default()));

    if let Some(path) = &args.config {
      figment = figment.merge(config_file(path)?);
    }

    Ok(
      figment
        .merge(Env::prefixed(ENV_PREFIX).ignore(&ENV_IGNORED))
        .merge(Serialized::defaults(args)),
    )
  }

  pub fn load(args: &RunArgs) -> Result<Self, ConfigError> {
    let settings: Settings = Self::figment(args)?.extract().map_err(Box::new)?;
    tracing::debug!(?settings, "Loaded settings");
    Ok(settings)
  }
}

fn config_file(path: &Path) -> Result<Figment, ConfigError> {
  if !path.is_file() {
    return Err(ConfigError::ConfigFileNotFound(path.to_path_buf()));
  }
  let figment = match path.extension().and_then(|ext| ext.to_str()) {
    Some("json") => Figment::from(Json::file(path)),
    _ => Figment::from(Toml::file(path)),
  };
  Ok(figment)
}

/// Fully validated configuration for one simulation.
#[derive(Debug, Clone)]
pub struct Config {
  /// `path` or `host:path`.
  pub location: String,
  pub overwrite: bool,
  pub input: Option<PathBuf>,
  pub copy: bool,
  pub files: Vec<PathBuf>,
  pub subdirs: Vec<String>,
  pub variables: ArgMap,
  pub device: Device,
  pub append: Vec<String>,
  pub stdout: StdoutTarget,
  pub remote_shell: PathBuf,
  pub remote_copy: PathBuf,
}

impl TryFrom<RunArgs> for Config {
  type Error = ConfigError;

  fn try_from(args: RunArgs) -> Result<Self, Self::Error> {
    Config::try_from(Settings::load(&args)?)
  }
}

impl TryFrom<Settings> for Config {
  type Error = ConfigError;

  fn try_from(settings: Settings) -> Result<Self, Self::Error> {
    let device = build_device(&settings)?;
    let Settings {
      directory,
      overwrite,
      input,
      copy,
      files,
      subdirs,
      vars,
      append,
      stdout,
      remote_shell,
      remote_copy,
      ..
    } = settings;

    Ok(Config {
      location: directory,
      overwrite,
      input,
      copy,
      files,
      subdirs,
      variables: parse_arg_map("vars", vars.as_deref())?,
      device,
      append,
      // The CLI shows the program's output unless told to keep it in a file.
      stdout: stdout.map_or(StdoutTarget::Inherit, StdoutTarget::File),
      remote_shell,
      remote_copy,
    })
  }
}

fn parse_arg_map(option: &'static str, text: Option<&str>) -> Result<ArgMap, ConfigError> {
  match text {
    Some(text) => text
      .parse()
      .map_err(|source| ConfigError::ParseArgMap { option, source }),
    None => Ok(ArgMap::new()),
  }
}

fn count(field: &'static str, value: Option<u32>, default: u32) -> Result<u32, ConfigError> {
  match value.unwrap_or(default) {
    0 => Err(ConfigError::ZeroCount { field }),
    n => Ok(n),
  }
}

fn build_device(settings: &Settings) -> Result<Device, ConfigError> {
  let kind = match settings.device {
    DeviceChoice::Local => DeviceKind::Local {
      num_procs: count("num_procs", settings.num_procs, 1)?,
    },
    DeviceChoice::Cpu => DeviceKind::Cpu {
      num_procs: count("num_procs", settings.num_procs, 4)?,
    },
    DeviceChoice::Gpu => DeviceKind::Gpu {
      gpus_per_node: count("gpus_per_node", settings.gpus_per_node, 1)?,
      mode: settings.mode,
    },
    DeviceChoice::SlurmCpu => {
      let num_nodes = settings.num_nodes.ok_or_else(|| ConfigError::MissingNumNodes {
        device: "slurm-cpu".to_string(),
      })?;
      let num_nodes = count("num_nodes", Some(num_nodes), 1)?;
      let procs_per_node = count("procs_per_node", settings.procs_per_node, 16)?;
      if num_nodes.checked_mul(procs_per_node).is_none() {
        return Err(ConfigError::ProcessCountOverflow {
          num_nodes,
          procs_per_node,
        });
      }
      DeviceKind::SlurmCpu {
        num_nodes,
        procs_per_node,
      }
    }
    DeviceChoice::SlurmGpu => DeviceKind::SlurmGpu {
      gpus_per_node: count("gpus_per_node", settings.gpus_per_node, 1)?,
      mode: settings.mode,
    },
  };

  Ok(
    Device::new(kind)
      .with_executable(&settings.lmp_exec)
      .with_mpi_launcher(&settings.mpi_exec)
      .with_submit_program(&settings.submit_exec)
      .with_mpi_args(parse_arg_map("mpi-args", settings.mpi_args.as_deref())?)
      .with_program_args(parse_arg_map("lmp-args", settings.lmp_args.as_deref())?)
      .with_scheduler_args(parse_arg_map("slurm-args", settings.slurm_args.as_deref())?)
      .with_virtual(settings.activate_virtual)
      .with_jobscript(settings.jobscript.clone())
      .with_generate_jobscript(settings.generate_jobscript),
  )
}
