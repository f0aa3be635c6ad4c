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
use serde::Deserialize;
use serde::Serialize;
use std::borrow::Cow;
use std::path::PathBuf;

/// A program and its arguments, ready to spawn or to write into a script.
///
/// Built fresh by [`crate::device::Device::build_command`] on every run; never
/// stored between runs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandLine {
  /// The command to execute (e.g., "mpirun" or "/path/to/lmp").
  pub program: PathBuf,

  #[serde(default)]
  #[serde(skip_serializing_if = "Vec::is_empty")]
  pub args: Vec<String>,
}

impl CommandLine {
  pub fn new(program: impl Into<PathBuf>) -> Self {
    Self {
      program: program.into(),
      args: Vec::new(),
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

  /// Program followed by its arguments.
  pub fn argv(&self) -> Vec<String> {
    std::iter::once(self.program.to_string_lossy().into_owned())
      .chain(self.args.iter().cloned())
      .collect()
  }

  /// Single line for a shell, as written into job scripts and remote commands.
  pub fn to_shell(&self) -> String {
    self
      .argv()
      .iter()
      .map(|word| shell_word(word))
      .collect::<Vec<_>>()
      .join(" ")
  }
}

/// Quotes `word` for a POSIX shell.
///
/// Parameter expansions stay live (`${SLURM_ARRAY_TASK_ID}` is emitted bare,
/// or inside double quotes), so scheduler placeholders resolve when the job
/// runs rather than here.
pub fn shell_word(word: &str) -> Cow<'_, str> {
  let bare = |c: char| c.is_ascii_alphanumeric() || "_-+=:,./@%~${}".contains(c);
  if !word.is_empty() && word.chars().all(bare) {
    return Cow::Borrowed(word);
  }

  let mut quoted = String::with_capacity(word.len() + 2);
  quoted.push('"');
  for c in word.chars() {
    if matches!(c, '"' | '\\' | '`') {
      quoted.push('\\');
    }
    quoted.push(c);
  }
  quoted.push('"');
  Cow::Owned(quoted)
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_argv_starts_with_program() {
    let cmd = CommandLine::new("mpirun").args(["-n", "4"]).arg("lmp");
    assert_eq!(cmd.argv(), ["mpirun", "-n", "4", "lmp"]);
  }

  #[test]
  fn test_shell_quoting() {
    assert_eq!(shell_word("script.in"), "script.in");
    assert_eq!(shell_word("${SLURM_ARRAY_TASK_ID}"), "${SLURM_ARRAY_TASK_ID}");
    assert_eq!(shell_word("two words"), "\"two words\"");
    assert_eq!(shell_word("say \"hi\""), "\"say \\\"hi\\\"\"");
    assert_eq!(shell_word(""), "\"\"");
  }

  #[test]
  fn test_to_shell_joins_words() {
    let cmd = CommandLine::new("lmp")
      .args(["-in", "in.lj", "-var", "name", "a b"]);
    assert_eq!(cmd.to_shell(), "lmp -in in.lj -var name \"a b\"");
  }
}
