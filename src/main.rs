// Copyright 2025 dentsusoken
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

use clap::{Parser, Subcommand};
use replica_lock::commands::force_release::ForceReleaseCommand;
use replica_lock::commands::hold::{HoldCommand, HoldOptions};
use replica_lock::commands::replicas::ReplicasCommand;
use replica_lock::config::ReplicaLockConfig;
use replica_lock::error::{Result, format_error_with_color, get_exit_code};
use replica_lock::logging;
use std::io::IsTerminal;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "replica-lock")]
#[command(author, version, about = "Replica-confirmed reentrant lock on a replicated store", long_about = None)]
struct Cli {
    /// Increase verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Configuration file (defaults to ./replica-lock.toml when present)
    #[arg(long, value_name = "PATH", global = true)]
    config: Option<PathBuf>,

    /// Store URL (redis://, rediss:// or memory://)
    #[arg(long, value_name = "URL", global = true)]
    url: Option<String>,

    /// Raw lock name
    #[arg(long, value_name = "NAME", global = true)]
    name: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Acquire the lock, hold it, then release it
    Hold {
        /// Give up after waiting this long (blocks indefinitely when omitted)
        #[arg(long)]
        wait: Option<i64>,

        /// Bound on each replica acknowledgement wait
        #[arg(long)]
        timeout: Option<i64>,

        /// Lease time of the lock
        #[arg(long)]
        lease: Option<i64>,

        /// Time unit of the numeric flags: "s" or "ms"
        #[arg(long)]
        unit: Option<String>,

        /// Release after this long (holds until interrupted when omitted)
        #[arg(long)]
        duration: Option<i64>,

        /// Renew the lease while holding
        #[arg(long)]
        renew: bool,
    },

    /// Delete the lock regardless of its holder
    #[command(visible_alias = "unlock")]
    ForceRelease,

    /// Show how many replicas must confirm each acquisition
    Replicas,
}

fn main() {
    let cli = Cli::parse();

    logging::setup_logger(cli.verbose);

    let result: Result<()> = (|| {
        let config = ReplicaLockConfig::load(cli.config.as_deref())?
            .with_overrides(cli.url.clone(), cli.name.clone());

        match cli.command {
            Commands::Hold {
                wait,
                timeout,
                lease,
                unit,
                duration,
                renew,
            } => {
                let options = HoldOptions {
                    wait,
                    timeout,
                    lease,
                    unit,
                    duration,
                    renew,
                };
                let command = HoldCommand::new(&config)?;
                command.execute(&options)
            }
            Commands::ForceRelease => {
                let command = ForceReleaseCommand::new(&config)?;
                command.execute()
            }
            Commands::Replicas => {
                let command = ReplicasCommand::new(&config)?;
                command.execute()
            }
        }
    })();

    if let Err(e) = result {
        eprintln!(
            "{}",
            format_error_with_color(&e, std::io::stderr().is_terminal())
        );
        std::process::exit(get_exit_code(&e));
    }
}
