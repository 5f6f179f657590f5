//! # Tavola Engine
//!
//! Runs the coordination engine over the shop database until Ctrl-C.
//!
//! ```text
//! tavola-engine [--config <path>]
//! ```

use std::path::PathBuf;
use std::process::ExitCode;

use tracing::error;

const USAGE: &str = "usage: tavola-engine [--config <path>]";

#[tokio::main]
async fn main() -> ExitCode {
    tavola_engine::init_tracing();

    let config_path = match parse_args(std::env::args().skip(1)) {
        Ok(Some(path)) => path,
        Ok(None) => {
            println!("{}", USAGE);
            return ExitCode::SUCCESS;
        }
        Err(message) => {
            eprintln!("{}\n{}", message, USAGE);
            return ExitCode::from(2);
        }
    };

    match tavola_engine::run(config_path).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, code = ?e.code(), "Engine stopped with an error");
            ExitCode::FAILURE
        }
    }
}

/// `Ok(None)` means help was asked for.
fn parse_args(mut args: impl Iterator<Item = String>) -> Result<Option<Option<PathBuf>>, String> {
    let mut config = None;
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "-h" | "--help" => return Ok(None),
            "-c" | "--config" => match args.next() {
                Some(path) => config = Some(PathBuf::from(path)),
                None => return Err("--config needs a path".to_string()),
            },
            other => return Err(format!("unknown argument: {}", other)),
        }
    }
    Ok(Some(config))
}
