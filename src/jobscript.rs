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

//! Slurm batch scripts: rendering, appending and reloading.
//!
//! A generated script has the fixed layout
//!
//! ```text
//! #!/bin/bash
//! #SBATCH --job-name=CPU-job
//! #SBATCH --exclusive
//! ...
//!
//! mpirun -n 32 lmp -in script.in
//! <appended lines>
//! ```
use crate::args::ArgMap;
use crate::args::ArgValue;
use crate::command::CommandLine;
use crate::error::NotFoundError;
use crate::error::SimulatorError;
use crate::error::StateError;
use crate::error::TransferError;
use std::fs;
use std::io::ErrorKind;
use std::path::Path;

pub const SHEBANG: &str = "#!/bin/bash";
pub const DIRECTIVE_PREFIX: &str = "#SBATCH";
pub const DEFAULT_JOBSCRIPT: &str = "job.sh";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobScript {
  name: String,
  body: Vec<String>,
  generated: bool,
  submitted: bool,
}

impl JobScript {
  /// Renders a script from merged scheduler arguments and the command to run.
  pub fn build(name: impl Into<String>, scheduler_args: &ArgMap, command: &CommandLine) -> Self {
    let mut body = Vec::with_capacity(scheduler_args.len() + 3);
    body.push(SHEBANG.to_string());
    body.extend(
      scheduler_args
        .iter()
        .map(|(key, value)| directive(key, value)),
    );
    body.push(String::new());
    body.push(command.to_shell());

    Self {
      name: name.into(),
      body,
      generated: true,
      submitted: false,
    }
  }

  /// Loads a script written earlier so it can be submitted as is.
  pub fn load(path: &Path) -> Result<Self, SimulatorError> {
    let text = fs::read_to_string(path).map_err(|source| -> SimulatorError {
      if source.kind() == ErrorKind::NotFound {
        NotFoundError::JobScript(path.to_path_buf()).into()
      } else {
        TransferError::Read {
          path: path.to_path_buf(),
          source,
        }
        .into()
      }
    })?;

    Ok(Self::existing(
      path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default(),
      text.lines().map(str::to_string).collect(),
    ))
  }

  /// A script that already exists at the execution host; its body may be
  /// unknown (empty) when it lives on a remote machine.
  pub fn existing(name: impl Into<String>, body: Vec<String>) -> Self {
    Self {
      name: name.into(),
      body,
      generated: false,
      submitted: false,
    }
  }

  /// Adds `text` after everything already in the script, one body line per
  /// line of `text`.
  pub fn append(&mut self, text: &str) -> Result<(), StateError> {
    if self.submitted {
      return Err(StateError::JobScriptSubmitted(self.name.clone()));
    }
    self.body.extend(text.lines().map(str::to_string));
    Ok(())
  }

  pub fn name(&self) -> &str {
    &self.name
  }

  pub fn lines(&self) -> &[String] {
    &self.body
  }

  pub fn is_generated(&self) -> bool {
    self.generated
  }

  pub fn is_submitted(&self) -> bool {
    self.submitted
  }

  pub(crate) fn mark_submitted(&mut self) {
    self.submitted = true;
  }

  /// The script text, newline terminated.
  pub fn render(&self) -> String {
    let mut text = self.body.join("\n");
    text.push('\n');
    text
  }
}

/// One scheduler directive line. Bare keys get a `--` prefix and an `=`;
/// single-dash short options are written `-J value`. List values are comma
/// joined.
pub fn directive(key: &str, value: &ArgValue) -> String {
  let value = match value {
    ArgValue::Flag => None,
    ArgValue::Value(v) => Some(v.clone()),
    ArgValue::List(items) => Some(items.join(",")),
  };
  let short = key.starts_with('-') && !key.starts_with("--");
  let key = if key.starts_with('-') {
    key.to_string()
  } else {
    format!("--{}", key)
  };
  match value {
    None => format!("{} {}", DIRECTIVE_PREFIX, key),
    Some(v) if short => format!("{} {} {}", DIRECTIVE_PREFIX, key, v),
    Some(v) => format!("{} {}={}", DIRECTIVE_PREFIX, key, v),
  }
}

/// Pulls the job id out of the submit program's reply.
///
/// Understands `Submitted batch job 123` and the `--parsable` form
/// `123` / `123;cluster`.
pub fn parse_job_id(stdout: &str) -> Option<u64> {
  let trimmed = stdout.trim();
  if let Some(rest) = trimmed.strip_prefix("Submitted batch job ") {
    return rest.split_whitespace().next()?.parse().ok();
  }
  trimmed.split(';').next()?.trim().parse().ok()
}

#[cfg(test)]
mod tests {
  use super::*;
  use tempfile::tempdir;

  fn sample_args() -> ArgMap {
    ArgMap::new()
      .with("job-name", "CPU-job")
      .with("ntasks", "4")
      .with("exclusive", ArgValue::Flag)
      .with("array", "110-150:10")
  }

  fn sample_command() -> CommandLine {
    CommandLine::new("mpirun")
      .args(["-n", "4", "lmp", "-in", "script.in"])
      .args(["-var", "temp", "${SLURM_ARRAY_TASK_ID}"])
  }

  #[test]
  fn test_build_layout() {
    let script = JobScript::build("job.sh", &sample_args(), &sample_command());
    assert_eq!(
      script.lines(),
      [
        "#!/bin/bash",
        "#SBATCH --job-name=CPU-job",
        "#SBATCH --ntasks=4",
        "#SBATCH --exclusive",
        "#SBATCH --array=110-150:10",
        "",
        "mpirun -n 4 lmp -in script.in -var temp ${SLURM_ARRAY_TASK_ID}",
      ]
    );
    assert!(script.is_generated());
    assert!(script.render().ends_with("${SLURM_ARRAY_TASK_ID}\n"));
  }

  #[test]
  fn test_append_keeps_directives_and_follows_command() {
    let mut script = JobScript::build("job.sh", &sample_args(), &sample_command());
    let before = script.lines().to_vec();

    script.append("echo done\nrm -f core.*").unwrap();

    assert_eq!(&script.lines()[..before.len()], before.as_slice());
    assert_eq!(&script.lines()[before.len()..], ["echo done", "rm -f core.*"]);
  }

  #[test]
  fn test_append_after_submit_fails() {
    let mut script = JobScript::build("job.sh", &ArgMap::new(), &sample_command());
    script.mark_submitted();
    let err = script.append("echo late").unwrap_err();
    assert!(matches!(err, StateError::JobScriptSubmitted(name) if name == "job.sh"));
  }

  #[test]
  fn test_directive_forms() {
    assert_eq!(directive("gres", &ArgValue::from("gpu:1")), "#SBATCH --gres=gpu:1");
    assert_eq!(directive("-J", &ArgValue::from("x")), "#SBATCH -J x");
    assert_eq!(directive("--mem", &ArgValue::from("4G")), "#SBATCH --mem=4G");
    assert_eq!(directive("exclusive", &ArgValue::Flag), "#SBATCH --exclusive");
    assert_eq!(
      directive("nodelist", &ArgValue::from(vec!["n1", "n2"])),
      "#SBATCH --nodelist=n1,n2"
    );
  }

  #[test]
  fn test_load_round_trips_rendered_text() {
    let temp = tempdir().unwrap();
    let script = JobScript::build("job.sh", &sample_args(), &sample_command());
    let path = temp.path().join("job.sh");
    fs::write(&path, script.render()).unwrap();

    let loaded = JobScript::load(&path).unwrap();
    assert_eq!(loaded.name(), "job.sh");
    assert_eq!(loaded.lines(), script.lines());
    assert!(!loaded.is_generated());
  }

  #[test]
  fn test_load_missing_is_not_found() {
    let temp = tempdir().unwrap();
    let err = JobScript::load(&temp.path().join("job.sh")).unwrap_err();
    assert!(matches!(err, SimulatorError::NotFound(NotFoundError::JobScript(_))));
  }

  #[test]
  fn test_parse_job_id() {
    assert_eq!(parse_job_id("Submitted batch job 4242\n"), Some(4242));
    assert_eq!(parse_job_id("77;cluster\n"), Some(77));
    assert_eq!(parse_job_id("88"), Some(88));
    assert_eq!(parse_job_id("sbatch: queued"), None);
  }
}
