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
use crate::context::RemoteHost;
use crate::error::NotFoundError;
use crate::error::ResourceError;
use crate::error::SimulatorError;
use crate::error::TransferError;
use fs_extra::file::CopyOptions;
use rand::RngCore;
use std::fs;
use std::path::Component;
use std::path::Path;
use std::path::PathBuf;
use std::process::Command;

/// A file made available in the working directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagedFile {
  pub source_path: PathBuf,
  /// Name inside the working directory, or for `copy = false` the path
  /// that reaches the source from the working directory.
  pub dest_name: PathBuf,
  pub copy: bool,
}

/// Moves files into a working directory through an [`ExecutionContext`].
#[derive(Debug, Clone, Default)]
pub struct FileStager {
  context: ExecutionContext,
}

impl FileStager {
  pub fn new(context: ExecutionContext) -> Self {
    Self { context }
  }

  pub fn context(&self) -> &ExecutionContext {
    &self.context
  }

  /// Makes `source` available in `dest_dir`.
  ///
  /// With `copy` the file lands as `dest_name` (default: the source's file
  /// name) and only appears once complete. Without `copy` nothing is written;
  /// `source` must be reachable from `dest_dir`, either relative to it or
  /// from the current directory.
  pub fn stage(
    &self,
    source: &Path,
    dest_dir: &Path,
    dest_name: Option<&str>,
    copy: bool,
  ) -> Result<StagedFile, SimulatorError> {
    if !copy {
      return self.reference(source, dest_dir);
    }

    if !source.is_file() {
      return Err(NotFoundError::Source(source.to_path_buf()).into());
    }

    let dest_name = match dest_name {
      Some(name) => PathBuf::from(name),
      None => PathBuf::from(
        source
          .file_name()
          .ok_or_else(|| NotFoundError::Source(source.to_path_buf()))?,
      ),
    };

    match &self.context {
      ExecutionContext::Local => copy_local(source, &dest_dir.join(&dest_name))?,
      ExecutionContext::Remote(remote) => copy_remote(remote, source, &dest_dir.join(&dest_name))?,
    }

    tracing::debug!(
      source = %source.display(),
      dest = %dest_name.display(),
      "Staged file"
    );

    Ok(StagedFile {
      source_path: source.to_path_buf(),
      dest_name,
      copy: true,
    })
  }

  fn reference(&self, source: &Path, dest_dir: &Path) -> Result<StagedFile, SimulatorError> {
    let from_wd = if source.is_absolute() {
      source.to_path_buf()
    } else {
      dest_dir.join(source)
    };

    let dest_name = if self.context.exists(&from_wd)? {
      source.to_path_buf()
    } else if !self.context.is_remote() && source.exists() {
      relative_from(dest_dir, source)
    } else {
      return Err(NotFoundError::Source(source.to_path_buf()).into());
    };

    Ok(StagedFile {
      source_path: source.to_path_buf(),
      dest_name,
      copy: false,
    })
  }

  /// Creates `dest_dir/name`; an existing directory is left as is.
  pub fn create_subdir(&self, dest_dir: &Path, name: impl AsRef<Path>) -> Result<PathBuf, ResourceError> {
    let path = dest_dir.join(name);
    self.context.create_dir_all(&path)?;
    Ok(path)
  }

  /// Writes generated text into `dest_dir/name` with the same
  /// all-or-nothing appearance as a staged copy.
  pub fn write(&self, dest_dir: &Path, name: &str, contents: &str) -> Result<PathBuf, TransferError> {
    let dest = dest_dir.join(name);
    match &self.context {
      ExecutionContext::Local => {
        let temp = temp_sibling(&dest);
        fs::write(&temp, contents).map_err(|source| TransferError::Write {
          path: temp.clone(),
          source,
        })?;
        rename_into_place(&temp, &dest)?;
      }
      ExecutionContext::Remote(remote) => {
        let scratch = temp_sibling(&std::env::temp_dir().join(name));
        fs::write(&scratch, contents).map_err(|source| TransferError::Write {
          path: scratch.clone(),
          source,
        })?;
        let copied = copy_remote(remote, &scratch, &dest);
        let _ = fs::remove_file(&scratch);
        copied?;
      }
    }
    Ok(dest)
  }
}

/// The name a file left in place is given from `dir`: unchanged when it
/// already resolves from `dir`, otherwise the path from `dir` to where it is
/// seen from the current directory.
pub fn reference_name(source: &Path, dir: &Path) -> PathBuf {
  if source.is_absolute() || dir.join(source).exists() {
    source.to_path_buf()
  } else {
    relative_from(dir, source)
  }
}

/// Path from `dir` to `target`, falling back to `target` made absolute.
/// Neither needs to exist.
pub fn relative_from(dir: &Path, target: &Path) -> PathBuf {
  let target = absolute(target);
  pathdiff::diff_paths(&target, absolute(dir)).unwrap_or(target)
}

/// Canonical path, or for paths that don't exist yet, the canonical form of
/// the nearest existing ancestor with the rest appended.
fn absolute(path: &Path) -> PathBuf {
  if let Ok(canonical) = fs::canonicalize(path) {
    return canonical;
  }

  let joined = match std::env::current_dir() {
    Ok(cwd) => cwd.join(path),
    Err(_) => path.to_path_buf(),
  };
  let mut lexical = PathBuf::new();
  for component in joined.components() {
    match component {
      Component::CurDir => {}
      Component::ParentDir => {
        lexical.pop();
      }
      other => lexical.push(other),
    }
  }

  for ancestor in lexical.ancestors() {
    if let Ok(canonical) = fs::canonicalize(ancestor) {
      return match lexical.strip_prefix(ancestor) {
        Ok(rest) => canonical.join(rest),
        Err(_) => canonical,
      };
    }
  }
  lexical
}

fn temp_sibling(dest: &Path) -> PathBuf {
  let name = dest
    .file_name()
    .map(|n| n.to_string_lossy().into_owned())
    .unwrap_or_default();
  let tag = rand::rng().next_u32();
  dest.with_file_name(format!(".{}.{:08x}.part", name, tag))
}

fn rename_into_place(temp: &Path, dest: &Path) -> Result<(), TransferError> {
  fs::rename(temp, dest).map_err(|source| {
    let _ = fs::remove_file(temp);
    TransferError::Rename {
      to: dest.to_path_buf(),
      source,
    }
  })
}

fn copy_local(source: &Path, dest: &Path) -> Result<(), TransferError> {
  let temp = temp_sibling(dest);
  let mut options = CopyOptions::new();
  options.overwrite = true;

  fs_extra::file::copy(source, &temp, &options).map_err(|err| {
    let _ = fs::remove_file(&temp);
    TransferError::Copy {
      from: source.to_path_buf(),
      to: dest.to_path_buf(),
      source: err,
    }
  })?;
  rename_into_place(&temp, dest)
}

/// rsync writes into a temporary name on the far side and renames on completion.
fn copy_remote(remote: &RemoteHost, source: &Path, dest: &Path) -> Result<(), TransferError> {
  let target = remote.target(dest);
  tracing::debug!(source = %source.display(), %target, "Copying to remote host");

  let output = Command::new(&remote.copier)
    .arg("-a")
    .arg(source)
    .arg(&target)
    .output()
    .map_err(|source| TransferError::RemoteSpawn {
      program: remote.copier.clone(),
      source,
    })?;

  if !output.status.success() {
    return Err(TransferError::Remote {
      from: source.to_path_buf(),
      to: target,
      code: output.status.code(),
      stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
    });
  }
  Ok(())
}

#[cfg(test)]
mod tests {
  use super::*;
  use tempfile::tempdir;

  fn entries(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = fs::read_dir(dir)
      .unwrap()
      .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
      .collect();
    names.sort();
    names
  }

  #[test]
  fn test_copy_produces_identical_file() {
    let temp = tempdir().unwrap();
    let source = temp.path().join("in.lj");
    fs::write(&source, "units lj\nrun 100\n").unwrap();
    let wd = temp.path().join("wd");
    fs::create_dir(&wd).unwrap();

    let staged = FileStager::default().stage(&source, &wd, None, true).unwrap();

    assert_eq!(staged.dest_name, PathBuf::from("in.lj"));
    assert!(staged.copy);
    assert_eq!(
      fs::read(wd.join("in.lj")).unwrap(),
      fs::read(&source).unwrap()
    );
    // No temporary files left behind.
    assert_eq!(entries(&wd), ["in.lj"]);
  }

  #[test]
  fn test_copy_with_rename_overwrites() {
    let temp = tempdir().unwrap();
    let source = temp.path().join("data.txt");
    fs::write(&source, "new").unwrap();
    let wd = temp.path().join("wd");
    fs::create_dir(&wd).unwrap();
    fs::write(wd.join("init.data"), "old").unwrap();

    let staged = FileStager::default()
      .stage(&source, &wd, Some("init.data"), true)
      .unwrap();

    assert_eq!(staged.dest_name, PathBuf::from("init.data"));
    assert_eq!(fs::read_to_string(wd.join("init.data")).unwrap(), "new");
  }

  #[test]
  fn test_missing_source_is_not_found() {
    let temp = tempdir().unwrap();
    let err = FileStager::default()
      .stage(&temp.path().join("nope.in"), temp.path(), None, true)
      .unwrap_err();
    assert!(matches!(err, SimulatorError::NotFound(NotFoundError::Source(_))));
  }

  #[test]
  fn test_reference_never_writes() {
    let temp = tempdir().unwrap();
    let wd = temp.path().join("wd");
    fs::create_dir(&wd).unwrap();
    fs::write(wd.join("already.in"), "run 0").unwrap();
    let outside = temp.path().join("shared.in");
    fs::write(&outside, "run 0").unwrap();

    let stager = FileStager::default();
    let inside = stager.stage(Path::new("already.in"), &wd, None, false).unwrap();
    assert_eq!(inside.dest_name, PathBuf::from("already.in"));
    assert!(!inside.copy);

    let shared = stager.stage(&outside, &wd, None, false).unwrap();
    assert_eq!(
      fs::canonicalize(wd.join(&shared.dest_name)).unwrap(),
      fs::canonicalize(&outside).unwrap()
    );

    assert_eq!(entries(&wd), ["already.in"]);
  }

  #[test]
  fn test_relative_from_directory_not_yet_created() {
    let temp = tempdir().unwrap();
    fs::create_dir(temp.path().join("shared")).unwrap();
    fs::write(temp.path().join("shared").join("in.lj"), "run 0").unwrap();

    let dir = temp.path().join("work").join("simulation");
    assert_eq!(
      relative_from(&dir, &temp.path().join("shared").join("in.lj")),
      PathBuf::from("../../shared/in.lj")
    );
    assert_eq!(
      relative_from(&dir, &temp.path().join("work").join("simulation").join("..").join("x.in")),
      PathBuf::from("../x.in")
    );
  }

  #[test]
  fn test_reference_name_matches_staging() {
    let temp = tempdir().unwrap();
    let wd = temp.path().join("wd");
    fs::create_dir(&wd).unwrap();
    fs::write(wd.join("local.in"), "run 0").unwrap();
    let outside = temp.path().join("shared.in");
    fs::write(&outside, "run 0").unwrap();

    let stager = FileStager::default();
    for source in [Path::new("local.in"), outside.as_path()] {
      let staged = stager.stage(source, &wd, None, false).unwrap();
      assert_eq!(reference_name(source, &wd), staged.dest_name);
    }
  }

  #[test]
  fn test_reference_missing_everywhere_fails() {
    let temp = tempdir().unwrap();
    let err = FileStager::default()
      .stage(Path::new("ghost-input-file.in"), temp.path(), None, false)
      .unwrap_err();
    assert!(matches!(err, SimulatorError::NotFound(_)));
  }

  #[test]
  fn test_create_subdir_is_idempotent() {
    let temp = tempdir().unwrap();
    let stager = FileStager::default();
    let first = stager.create_subdir(temp.path(), "dump").unwrap();
    let second = stager.create_subdir(temp.path(), "dump").unwrap();
    assert_eq!(first, second);
    assert!(first.is_dir());
  }

  #[test]
  fn test_write_generated_text() {
    let temp = tempdir().unwrap();
    let path = FileStager::default()
      .write(temp.path(), "hostfile", "localhost slots=4\n")
      .unwrap();
    assert_eq!(fs::read_to_string(path).unwrap(), "localhost slots=4\n");
    assert_eq!(entries(temp.path()), ["hostfile"]);
  }

  /// A stager whose "remote host" is this machine, reached through
  /// stand-ins for ssh and rsync.
  #[cfg(unix)]
  fn remote_stager(dir: &Path, rsync_body: &str) -> FileStager {
    use std::os::unix::fs::PermissionsExt;
    let tool = |name: &str, body: &str| {
      let path = dir.join(name);
      fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
      fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
      path
    };
    let ssh = tool("fake-ssh", "shift\neval \"$1\"");
    let rsync = tool("fake-rsync", rsync_body);
    FileStager::new(ExecutionContext::Remote(RemoteHost::new("fakehost")).with_remote_tools(ssh, rsync))
  }

  #[cfg(unix)]
  #[test]
  fn test_remote_copy_and_write_land_on_host() {
    let temp = tempdir().unwrap();
    let stager = remote_stager(temp.path(), "cp \"$2\" \"${3#*:}\"");
    let source = temp.path().join("in.lj");
    fs::write(&source, "units lj\nrun 100\n").unwrap();
    let wd = temp.path().join("wd");
    fs::create_dir(&wd).unwrap();

    let staged = stager.stage(&source, &wd, Some("in.renamed"), true).unwrap();
    assert_eq!(staged.dest_name, PathBuf::from("in.renamed"));
    assert_eq!(fs::read_to_string(wd.join("in.renamed")).unwrap(), "units lj\nrun 100\n");

    let written = stager.write(&wd, "job.sh", "#!/bin/bash\nsrun lmp\n").unwrap();
    assert_eq!(written, wd.join("job.sh"));
    assert_eq!(fs::read_to_string(wd.join("job.sh")).unwrap(), "#!/bin/bash\nsrun lmp\n");
    assert_eq!(entries(&wd), ["in.renamed", "job.sh"]);
  }

  #[cfg(unix)]
  #[test]
  fn test_remote_copy_failure_keeps_stderr() {
    let temp = tempdir().unwrap();
    let stager = remote_stager(temp.path(), "echo 'rsync: connection unexpectedly closed' >&2\nexit 12");
    let source = temp.path().join("in.lj");
    fs::write(&source, "run 0\n").unwrap();

    let err = stager.stage(&source, temp.path(), None, true).unwrap_err();
    let SimulatorError::Transfer(TransferError::Remote { code, stderr, to, .. }) = err else {
      panic!("expected a remote transfer error, got {:?}", err);
    };
    assert_eq!(code, Some(12));
    assert_eq!(stderr, "rsync: connection unexpectedly closed");
    assert!(to.starts_with("fakehost:"));
  }

  #[cfg(unix)]
  #[test]
  fn test_remote_reference_is_checked_on_host() {
    let temp = tempdir().unwrap();
    let stager = remote_stager(temp.path(), "exit 1");
    let wd = temp.path().join("wd");
    fs::create_dir(&wd).unwrap();
    fs::write(wd.join("already.in"), "run 0").unwrap();

    let staged = stager.stage(Path::new("already.in"), &wd, None, false).unwrap();
    assert_eq!(staged.dest_name, PathBuf::from("already.in"));
    assert!(!staged.copy);

    // Found from the current directory, but not from the remote directory.
    assert!(Path::new("Cargo.toml").exists());
    let err = stager.stage(Path::new("Cargo.toml"), &wd, None, false);
    assert!(matches!(err, Err(SimulatorError::NotFound(NotFoundError::Source(_)))));
  }
}
