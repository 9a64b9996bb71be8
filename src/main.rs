//! tcpdaemon - a pre-forking style TCP daemon
//!
//! Listens on a TCP port, hands each admitted connection to its own worker
//! and refuses clients beyond the worker ceiling.

use clap::Parser;
use tcpdaemon::common::{config::MAX_LOG_LEVEL, fatal, logging, Options};
use tcpdaemon::{cli, commands::Cli};

#[tokio::main]
async fn main() {
    let args = Cli::parse();

    let options = match Options::load(&args) {
        Ok(options) => options,
        Err(e) => {
            eprintln!("Error: {e}");
            std::process::exit(1);
        }
    };

    if let Err(e) = logging::init(&options) {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }

    if options.log_level == MAX_LOG_LEVEL {
        options.log_status();
    }

    match cli::dispatch(&options).await {
        Ok(()) => logging::finish(),
        Err(e) if e.is_fatal() => fatal::report(&e, options.dump_core),
        Err(e) => {
            tracing::error!("{}", e);
            logging::finish();
            eprintln!("Error: {e}");
            std::process::exit(1);
        }
    }
}
