//! CLI command definitions
//!
//! Defines the clap command line for the daemon. Flags mirror the options in
//! [`crate::common::config::Options`]; anything left unset falls back to the
//! configuration file and then to the built-in defaults.

use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug, Default, Clone)]
#[command(name = "tcpdaemon", about = "Template TCP daemon")]
#[command(version, long_about = None)]
pub struct Cli {
    /// Stay in the foreground and log to stderr (defaults to background)
    #[arg(short = 'F', long)]
    pub foreground: bool,

    /// Log level 1-9 (default 1)
    #[arg(short = 'd', long = "log-level", value_name = "N")]
    pub log_level: Option<u8>,

    /// TCP port to listen on (1-65535, default 3000)
    #[arg(short = 'p', long, value_name = "N")]
    pub port: Option<u16>,

    /// Log file (ignored with -F)
    #[arg(short = 'l', long = "log-file", value_name = "PATH")]
    pub log_file: Option<PathBuf>,

    /// Configuration file (TOML)
    #[arg(short = 'c', long = "config", value_name = "PATH")]
    pub config_file: Option<PathBuf>,

    /// Lock file holding the running instance's pid
    #[arg(short = 'L', long = "lock-file", value_name = "PATH")]
    pub lock_file: Option<PathBuf>,

    /// Maximum number of concurrent workers (1-200, default 3)
    #[arg(short = 'm', long = "max-workers", value_name = "N")]
    pub max_workers: Option<usize>,

    /// Resolve the host name of incoming clients
    #[arg(short = 'w', long = "dns-lookups")]
    pub dns_lookups: bool,

    /// Dump core on a fatal error rather than exit with an error
    #[arg(short = 'k', long = "dump-core")]
    pub dump_core: bool,

    /// Terminate the running copy of the daemon
    #[arg(short = 't', long)]
    pub terminate: bool,

    /// Check configuration and exit. Also sets -F and -d 9
    #[arg(short = 'o', long = "check-config")]
    pub check_config: bool,

    /// Set on the re-executed background process
    #[arg(long, hide = true)]
    pub detached: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_short_flags() {
        let cli = Cli::try_parse_from(["tcpdaemon", "-F", "-p", "4000", "-m", "2", "-w"]).unwrap();
        assert!(cli.foreground);
        assert_eq!(cli.port, Some(4000));
        assert_eq!(cli.max_workers, Some(2));
        assert!(cli.dns_lookups);
        assert!(!cli.detached);
    }

    #[test]
    fn test_rejects_out_of_range_port() {
        assert!(Cli::try_parse_from(["tcpdaemon", "-p", "70000"]).is_err());
    }
}
