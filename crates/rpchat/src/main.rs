mod error;

use std::path::PathBuf;
use std::process::ExitCode;

use bcp_core::{Config, Server};
use clap::Parser;
use error::StartupError;
use tracing::{error, info};

/// A Basic Chat Protocol server: accepts TCP clients, has them register a
/// username, and relays SEND frames between them.
#[derive(Parser)]
#[command(name = "rpchat", version, about)]
struct Cli {
    /// Port to listen on.
    #[arg(short = 'p', long = "port", default_value_t = 9001)]
    port: u16,

    /// Append logs to this file instead of stdout (created with mode 0744
    /// if it doesn't exist).
    #[arg(short = 'l', long = "log", value_name = "PATH")]
    log: Option<PathBuf>,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Err(err) = run(cli) {
        error!(%err, "startup failed");
        eprintln!("rpchat: {err}");
        return ExitCode::FAILURE;
    }
    ExitCode::SUCCESS
}

fn run(cli: Cli) -> Result<(), StartupError> {
    match &cli.log {
        Some(path) => {
            let file = bcp_support::open_log_file(path)
                .map_err(|source| StartupError::LogFile { path: path.clone(), source })?;
            bcp_support::init_logging(Some(file));
        }
        None => bcp_support::init_logging(None),
    }

    info!(port = cli.port, log = ?cli.log, "rpchat starting");
    let config = Config { port: cli.port, ..Config::default() };
    Server::run(config)?;
    info!("rpchat exited cleanly");
    Ok(())
}
