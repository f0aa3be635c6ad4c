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

//! # lmpsim
//!
//! `lmpsim` stages and launches LAMMPS simulations. It prepares a working
//! directory (locally or on a `host:path` reached over ssh/rsync), builds the
//! MPI or Slurm invocation for a chosen device, and then either runs the
//! program to completion or submits a job script to the scheduler.
//!
//! This crate contains the library behind the `lmpsim` CLI; the
//! [`simulator::Simulator`] can be driven directly from Rust as well.
//!
//! ## Core Modules
//!
//! * [`simulator`]: The `Simulator` lifecycle: resolve the directory, stage
//!   files, set the input script, then `run` on a device.
//! * [`device`]: Device kinds (local, CPU, GPU, Slurm CPU, Slurm GPU) and how
//!   each builds its command line and job script.
//! * [`resolver`]: Picks a non-colliding working directory (`sim`, `sim0`, ...).
//! * [`stager`]: Copies or references files inside the working directory.
//! * [`args`]: Ordered option maps and their merge rule.
//! * [`jobscript`]: Slurm batch scripts.
//! * [`context`]: Local versus remote execution and `host:path` parsing.
//! * [`command`]: The `CommandLine` struct and shell quoting.
//! * [`config`]: Layered settings (defaults, file, environment, CLI) resolved
//!   into a `Config`.
//! * [`launch`]: The `run` and `plan` drivers used by the CLI.
//! * [`cli`]: Defines the `clap`-based command-line interface.
//! * [`error`]: Defines the custom error types for the library.
//! * [`logging`]: Provides the `setup_tracing` utility.

pub mod args;
pub mod cli;
pub mod command;
pub mod config;
pub mod context;
pub mod device;
pub mod error;
pub mod jobscript;
pub mod launch;
pub mod logging;
pub mod resolver;
pub mod simulator;
pub mod stager;
