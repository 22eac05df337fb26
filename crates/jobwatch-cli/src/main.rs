mod bootstrap_helpers;
mod cli_args;
mod render;
mod watch_command;

use std::process::ExitCode;

use anyhow::Result;
use clap::Parser;

use crate::bootstrap_helpers::init_tracing;
use crate::cli_args::{Cli, CliCommand};
use crate::watch_command::run_watch;

async fn run_cli(cli: Cli) -> Result<ExitCode> {
    match &cli.command {
        CliCommand::Watch(args) => run_watch(&cli, args).await,
    }
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    init_tracing();
    let cli = Cli::parse();
    run_cli(cli).await
}
