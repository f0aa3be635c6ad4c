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
use Commands::Plan;
use Commands::Run;
use anyhow::Context;
use anyhow::Result;
use clap::Parser;
use lmpsim::cli::Cli;
use lmpsim::cli::Commands;
use lmpsim::config::Config;
use lmpsim::launch::plan_simulation;
use lmpsim::launch::run_simulation;
use lmpsim::logging::setup_tracing;
use lmpsim::simulator::Outcome;
use std::process::ExitCode;
use tracing::Instrument;

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<ExitCode> {
  let _guard = setup_tracing()?;

  let Cli { command } = Cli::parse();
  let main_span = tracing::info_span!("lmpsim");

  dispatch(command).instrument(main_span).await
}

async fn dispatch(command: Commands) -> Result<ExitCode> {
  match command {
    Run(run_args) => {
      let config = Config::try_from(run_args).context("Invalid configuration")?;

      match run_simulation(&config).await? {
        Outcome::Executed { exit_code } => Ok(exit_status(exit_code)),
        Outcome::Submitted { job_id, jobscript } => {
          match job_id {
            Some(id) => println!("{}", id),
            None => tracing::info!(%jobscript, "Submitted"),
          }
          Ok(ExitCode::SUCCESS)
        }
      }
    }
    Plan(run_args) => {
      let config = Config::try_from(run_args).context("Invalid configuration")?;
      let plan = plan_simulation(&config)?;
      println!("{}", serde_json::to_string_pretty(&plan)?);
      Ok(ExitCode::SUCCESS)
    }
  }
}

/// Hands the simulation's own exit code back to the shell.
fn exit_status(code: Option<i32>) -> ExitCode {
  match code {
    Some(0) => ExitCode::SUCCESS,
    Some(code) => ExitCode::from(u8::try_from(code).unwrap_or(1)),
    None => ExitCode::FAILURE,
  }
}
