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
use crate::context::ExecutionContext;
use crate::error::ResourceError;
use std::ffi::OsString;
use std::path::Path;
use std::path::PathBuf;

/// A resolved, created working directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkingDirectory {
  pub base_path: PathBuf,
  pub resolved_path: PathBuf,
  pub context: ExecutionContext,
  pub overwrite: bool,
}

impl WorkingDirectory {
  pub fn path(&self) -> &Path {
    &self.resolved_path
  }

  pub fn host(&self) -> Option<&str> {
    self.context.host()
  }

  pub fn join(&self, name: impl AsRef<Path>) -> PathBuf {
    self.resolved_path.join(name)
  }

  /// `host:path` for remote directories, the plain path otherwise.
  pub fn location(&self) -> String {
    match self.host() {
      Some(host) => format!("{}:{}", host, self.resolved_path.display()),
      None => self.resolved_path.display().to_string(),
    }
  }
}

/// Picks the path the working directory will live at.
///
/// With `overwrite` the base path is returned as is. Otherwise the first of
/// `base`, `base0`, `base1`, ... that does not exist is returned.
pub fn resolve(
  base: &Path,
  overwrite: bool,
  context: &ExecutionContext,
) -> Result<PathBuf, ResourceError> {
  // "sim/" and "sim" name the same directory; suffixes go on the last component.
  let base: PathBuf = base.components().collect();

  if overwrite || !context.exists(&base)? {
    return Ok(base);
  }

  let mut suffix: u64 = 0;
  loop {
    let candidate = with_suffix(&base, suffix);
    if !context.exists(&candidate)? {
      tracing::debug!(
        base = %base.display(),
        resolved = %candidate.display(),
        "Working directory exists, using suffixed name"
      );
      return Ok(candidate);
    }
    suffix += 1;
  }
}

fn with_suffix(base: &Path, suffix: u64) -> PathBuf {
  let mut name = OsString::from(base.as_os_str());
  name.push(suffix.to_string());
  PathBuf::from(name)
}

/// Resolves `base` and creates the directory.
pub fn create(
  base: &Path,
  overwrite: bool,
  context: ExecutionContext,
) -> Result<WorkingDirectory, ResourceError> {
  let resolved_path = resolve(base, overwrite, &context)?;
  context.create_dir_all(&resolved_path)?;

  let wd = WorkingDirectory {
    base_path: base.to_path_buf(),
    resolved_path,
    context,
    overwrite,
  };
  tracing::info!(directory = %wd.location(), "Working directory ready");
  Ok(wd)
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::fs;
  use tempfile::tempdir;

  #[test]
  fn test_resolve_skips_existing_suffixes() {
    let temp = tempdir().unwrap();
    let base = temp.path().join("sim");
    fs::create_dir(&base).unwrap();
    fs::create_dir(temp.path().join("sim0")).unwrap();

    let resolved = resolve(&base, false, &ExecutionContext::Local).unwrap();
    assert_eq!(resolved, temp.path().join("sim1"));
  }

  #[test]
  fn test_resolve_free_base_is_unchanged() {
    let temp = tempdir().unwrap();
    let base = temp.path().join("fresh");
    assert_eq!(resolve(&base, false, &ExecutionContext::Local).unwrap(), base);
  }

  #[test]
  fn test_resolve_overwrite_returns_base() {
    let temp = tempdir().unwrap();
    let base = temp.path().join("sim");
    fs::create_dir(&base).unwrap();
    assert_eq!(resolve(&base, true, &ExecutionContext::Local).unwrap(), base);
  }

  #[test]
  fn test_resolve_trailing_separator() {
    let temp = tempdir().unwrap();
    fs::create_dir(temp.path().join("sim")).unwrap();
    let base = PathBuf::from(format!("{}/sim/", temp.path().display()));
    let resolved = resolve(&base, false, &ExecutionContext::Local).unwrap();
    assert_eq!(resolved, temp.path().join("sim0"));
  }

  #[test]
  fn test_repeated_creation_never_collides() {
    let temp = tempdir().unwrap();
    let base = temp.path().join("run");
    let mut seen = Vec::new();

    for _ in 0..5 {
      let before = resolve(&base, false, &ExecutionContext::Local).unwrap();
      assert!(!before.exists());
      // Same tree, same answer.
      assert_eq!(resolve(&base, false, &ExecutionContext::Local).unwrap(), before);

      let wd = create(&base, false, ExecutionContext::Local).unwrap();
      assert_eq!(wd.resolved_path, before);
      assert!(wd.path().is_dir());
      assert!(!seen.contains(&wd.resolved_path));
      seen.push(wd.resolved_path);
    }

    let names: Vec<String> = seen
      .iter()
      .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
      .collect();
    assert_eq!(names, ["run", "run0", "run1", "run2", "run3"]);
  }

  #[test]
  fn test_create_overwrite_keeps_contents() {
    let temp = tempdir().unwrap();
    let base = temp.path().join("sim");
    fs::create_dir(&base).unwrap();
    fs::write(base.join("keep.txt"), "data").unwrap();

    let wd = create(&base, true, ExecutionContext::Local).unwrap();
    assert_eq!(wd.path(), base);
    assert!(wd.join("keep.txt").exists());
    assert_eq!(wd.location(), base.display().to_string());
  }
}
