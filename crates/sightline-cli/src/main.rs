//! sightline CLI entry point.

mod args;
mod backend;
mod paths;
mod runner;
mod store;
mod vars;

use clap::Parser;
use tracing::error;

use crate::args::{Cli, Commands};
use crate::store::FileVariableStore;

fn main() {
    // Logs go to stderr so stdout stays machine-readable.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match dispatch(cli) {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            error!("{:#}", e);
            std::process::exit(runner::EXIT_FAILED);
        }
    }
}

/// Run one command and return its exit code.
fn dispatch(cli: Cli) -> anyhow::Result<i32> {
    match cli.command {
        Commands::Run(args) => runner::run(args),
        Commands::Check(args) => runner::check(args),
        Commands::Vars(command) => {
            let mut store = FileVariableStore::open_default()?;
            vars::run(command, &mut store, &mut std::io::stdout().lock())
        }
        Commands::Examples => {
            println!("{}", args::EXAMPLES_TEXT);
            Ok(runner::EXIT_OK)
        }
    }
}
