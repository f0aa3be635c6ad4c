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
use crate::config::Config;
use crate::context::parse_location;
use crate::error::Result;
use crate::error::StateError;
use crate::simulator::Outcome;
use crate::simulator::Simulator;
use crate::stager::reference_name;
use serde::Deserialize;
use serde::Serialize;
use std::path::Path;
use std::path::PathBuf;

/// What a run would do, as printed by `lmpsim plan`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Plan {
  pub directory: String,
  pub device: String,
  pub command: Vec<String>,
  #[serde(default)]
  #[serde(skip_serializing_if = "Option::is_none")]
  pub jobscript: Option<Vec<String>>,
}

/// Stages the working directory from `config` and runs or submits.
pub async fn run_simulation(config: &Config) -> Result<Outcome> {
  let mut sim = Simulator::new(&config.location, config.overwrite)
    .with_remote_tools(&config.remote_shell, &config.remote_copy);
  sim.resolve_directory()?;

  sim.copy_to_wd(&config.files)?;
  for name in &config.subdirs {
    sim.create_subdir(name)?;
  }
  if let Some(input) = &config.input {
    sim.set_input_script(input, config.copy, config.variables.clone())?;
  }
  for text in &config.append {
    sim.append_to_jobscript(text.as_str());
  }
  sim.set_stdout(config.stdout.clone());

  sim.run(&config.device).await
}

/// Builds the command line and job script without touching the filesystem.
///
/// The directory is reported as requested; suffix resolution only happens
/// on a real run.
pub fn plan_simulation(config: &Config) -> Result<Plan> {
  let input = config.input.as_deref().ok_or(StateError::NoInputScript)?;
  let script = script_name(config, input);
  let command = config.device.build_command(&script, &config.variables);

  let jobscript = match config.device.build_jobscript(&command) {
    Some(mut jobscript) if config.device.generates_jobscript() => {
      for text in &config.append {
        jobscript.append(text)?;
      }
      Some(jobscript.lines().to_vec())
    }
    _ => None,
  };

  Ok(Plan {
    directory: config.location.clone(),
    device: config.device.to_string(),
    command: command.argv(),
    jobscript,
  })
}

/// The name the program is given for its input script, as staging would
/// record it.
fn script_name(config: &Config, input: &Path) -> String {
  let (context, dir) = parse_location(&config.location);
  let name = match input.file_name() {
    Some(name) if config.copy => PathBuf::from(name),
    _ if context.is_remote() => input.to_path_buf(),
    _ => reference_name(input, &dir),
  };
  name.to_string_lossy().into_owned()
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cli::RunArgs;
  use crate::config::DeviceChoice;
  use crate::error::SimulatorError;

  fn config(args: RunArgs) -> Config {
    Config::try_from(args).unwrap()
  }

  #[test]
  fn test_plan_cpu_command() {
    let plan = plan_simulation(&config(RunArgs {
      device: Some(DeviceChoice::Cpu),
      input: Some(PathBuf::from("inputs/script.in")),
      ..Default::default()
    }))
    .unwrap();

    assert_eq!(plan.command, ["mpirun", "-n", "4", "lmp", "-in", "script.in"]);
    assert_eq!(plan.device, "CPU");
    assert_eq!(plan.jobscript, None);
  }

  #[test]
  fn test_plan_without_copy_names_script_from_working_directory() {
    let plan = plan_simulation(&config(RunArgs {
      directory: Some("simulation".to_string()),
      input: Some(PathBuf::from("../shared/in.lj")),
      no_copy: true,
      ..Default::default()
    }))
    .unwrap();
    assert_eq!(plan.command, ["lmp", "-in", "../../shared/in.lj"]);

    // Remote paths are taken as written on the far side.
    let plan = plan_simulation(&config(RunArgs {
      directory: Some("remote-host:/scratch/sim".to_string()),
      input: Some(PathBuf::from("../shared/in.lj")),
      no_copy: true,
      ..Default::default()
    }))
    .unwrap();
    assert_eq!(plan.command, ["lmp", "-in", "../shared/in.lj"]);
  }

  #[test]
  fn test_plan_slurm_jobscript_with_append() {
    let plan = plan_simulation(&config(RunArgs {
      device: Some(DeviceChoice::SlurmCpu),
      num_nodes: Some(2),
      procs_per_node: Some(8),
      input: Some(PathBuf::from("script.in")),
      append: vec!["echo done".to_string()],
      ..Default::default()
    }))
    .unwrap();

    let jobscript = plan.jobscript.unwrap();
    assert_eq!(jobscript[0], "#!/bin/bash");
    assert!(jobscript.contains(&"#SBATCH --ntasks=16".to_string()));
    assert_eq!(jobscript[jobscript.len() - 1], "echo done");
    assert_eq!(jobscript[jobscript.len() - 2], "mpirun -n 16 lmp -in script.in");
  }

  #[test]
  fn test_plan_without_input_is_state_error() {
    let err = plan_simulation(&config(RunArgs::default())).unwrap_err();
    assert!(matches!(err, SimulatorError::State(StateError::NoInputScript)));
  }
}
