//! Entry point for the command-line interface.
#![forbid(unsafe_code)]

use nestscout_cli::CliError;

fn main() {
    match nestscout_cli::run() {
        Ok(()) => {}
        Err(CliError::ArgumentParsing(err)) => err.exit(),
        Err(err) => {
            eprintln!("nestscout: {err}");
            std::process::exit(1);
        }
    }
}
