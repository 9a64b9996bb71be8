//! Configuration handling
//!
//! Options are resolved in three layers: built-in defaults, then the TOML
//! configuration file, then the command line. The result is a read-only
//! snapshot for the rest of the process lifetime.

use serde::Deserialize;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use tracing::level_filters::LevelFilter;

use super::paths;
use super::{Error, Result};
use crate::commands::Cli;

/// Lowest accepted log level
pub const MIN_LOG_LEVEL: u8 = 1;
/// Highest accepted log level, also forced by check-config mode
pub const MAX_LOG_LEVEL: u8 = 9;
/// Upper bound for the configurable worker ceiling
pub const ABSOLUTE_MAX_WORKERS: usize = 200;

/// Resolved daemon options
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Options {
    /// Log level 1-9
    pub log_level: u8,
    /// TCP port to listen on
    pub port: u16,
    /// Reverse-resolve client addresses in workers
    pub dns_lookups: bool,
    /// Don't detach from the terminal
    pub foreground: bool,
    /// Log file for background mode
    pub log_file: PathBuf,
    /// Configuration file that was read, if any
    pub config_file: Option<PathBuf>,
    /// Maximum number of concurrent workers
    pub max_workers: usize,
    /// Singleton lock file
    pub lock_file: PathBuf,
    /// Abort with a core dump on fatal errors
    pub dump_core: bool,
    /// Terminate the running instance instead of serving
    pub terminate: bool,
    /// Validate the configuration and exit
    pub check_config: bool,
    /// This process is the re-executed background successor
    pub detached: bool,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            log_level: MIN_LOG_LEVEL,
            port: 3000,
            dns_lookups: false,
            foreground: false,
            log_file: paths::log_path(),
            config_file: None,
            max_workers: 3,
            lock_file: paths::lock_path(),
            dump_core: false,
            terminate: false,
            check_config: false,
            detached: false,
        }
    }
}

/// Options settable from the configuration file
///
/// `config_file` and `check_config` may not be set from inside a
/// configuration file, so they have no key here.
#[derive(Debug, Deserialize, Default)]
pub struct FileOptions {
    #[serde(default)]
    pub log_level: Option<u8>,
    #[serde(default)]
    pub port: Option<u32>,
    #[serde(default)]
    pub dns_lookups: Option<bool>,
    #[serde(default)]
    pub foreground: Option<bool>,
    #[serde(default)]
    pub log_file: Option<PathBuf>,
    #[serde(default)]
    pub max_workers: Option<usize>,
    #[serde(default)]
    pub lock_file: Option<PathBuf>,
    #[serde(default)]
    pub dump_core: Option<bool>,
    #[serde(default)]
    pub terminate: Option<bool>,
}

impl FileOptions {
    /// Parse configuration file contents
    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| Error::ConfigParse(e.to_string()))
    }

    /// Read and parse a configuration file
    pub fn read(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| Error::FileRead {
            path: path.display().to_string(),
            error: e.to_string(),
        })?;
        Self::parse(&content)
    }
}

impl Options {
    /// Load options from the command line, the configuration file and defaults
    ///
    /// An explicitly named configuration file must exist; the default one is
    /// only read when present.
    pub fn load(cli: &Cli) -> Result<Self> {
        let mut options = Self::default();

        let config_file = match &cli.config_file {
            Some(path) => Some(path.clone()),
            None => paths::config_path().filter(|p| p.exists()),
        };

        if let Some(path) = config_file {
            let file = FileOptions::read(&path)?;
            options.apply_file(file)?;
            options.config_file = Some(path);
        }

        options.apply_cli(cli);
        options.validate()?;
        Ok(options)
    }

    /// Overlay values from a configuration file
    pub fn apply_file(&mut self, file: FileOptions) -> Result<()> {
        if let Some(level) = file.log_level {
            self.log_level = level;
        }
        if let Some(port) = file.port {
            self.port = u16::try_from(port)
                .ok()
                .filter(|p| *p != 0)
                .ok_or_else(|| Error::Config(format!("port {} not in 1-65535", port)))?;
        }
        if let Some(dns) = file.dns_lookups {
            self.dns_lookups = dns;
        }
        if let Some(foreground) = file.foreground {
            self.foreground = foreground;
        }
        if let Some(log_file) = file.log_file {
            self.log_file = log_file;
        }
        if let Some(max) = file.max_workers {
            self.max_workers = max;
        }
        if let Some(lock_file) = file.lock_file {
            self.lock_file = lock_file;
        }
        if let Some(dump_core) = file.dump_core {
            self.dump_core = dump_core;
        }
        if let Some(terminate) = file.terminate {
            self.terminate = terminate;
        }
        Ok(())
    }

    /// Overlay values given on the command line
    pub fn apply_cli(&mut self, cli: &Cli) {
        if let Some(level) = cli.log_level {
            self.log_level = level;
        }
        if let Some(port) = cli.port {
            self.port = port;
        }
        if let Some(max) = cli.max_workers {
            self.max_workers = max;
        }
        if let Some(lock_file) = &cli.lock_file {
            self.lock_file = lock_file.clone();
        }
        self.dns_lookups |= cli.dns_lookups;
        self.foreground |= cli.foreground;
        self.dump_core |= cli.dump_core;
        self.terminate |= cli.terminate;
        self.detached = cli.detached;

        if let Some(log_file) = &cli.log_file {
            if self.foreground {
                eprintln!("Warning: log file not compatible with -F, ignored");
            } else {
                self.log_file = log_file.clone();
            }
        }

        // check-config reports everything, so it pins the level and stays attached
        if cli.check_config {
            if self.log_level != MAX_LOG_LEVEL {
                eprintln!(
                    "-o given. log level set to {} and log file ignored",
                    MAX_LOG_LEVEL
                );
            }
            self.check_config = true;
            self.foreground = true;
            self.log_level = MAX_LOG_LEVEL;
        }
    }

    /// Check every option against its permitted range
    pub fn validate(&self) -> Result<()> {
        if !(MIN_LOG_LEVEL..=MAX_LOG_LEVEL).contains(&self.log_level) {
            return Err(Error::Config(format!(
                "log level {} not in {}-{}",
                self.log_level, MIN_LOG_LEVEL, MAX_LOG_LEVEL
            )));
        }
        if self.port == 0 {
            return Err(Error::Config("port 0 not in 1-65535".to_string()));
        }
        if !(1..=ABSOLUTE_MAX_WORKERS).contains(&self.max_workers) {
            return Err(Error::Config(format!(
                "max workers {} not in 1-{}",
                self.max_workers, ABSOLUTE_MAX_WORKERS
            )));
        }
        if self.lock_file.as_os_str().is_empty() {
            return Err(Error::Config("lock file path is empty".to_string()));
        }
        if self.log_file.as_os_str().is_empty() {
            return Err(Error::Config("log file path is empty".to_string()));
        }
        Ok(())
    }

    /// Map the numeric log level onto a tracing filter
    pub fn level_filter(&self) -> LevelFilter {
        match self.log_level {
            0 | 1 => LevelFilter::INFO,
            MAX_LOG_LEVEL.. => LevelFilter::TRACE,
            _ => LevelFilter::DEBUG,
        }
    }

    /// Log every resolved option (only visible at the highest level)
    pub fn log_status(&self) {
        tracing::trace!(log_level = self.log_level, "option");
        tracing::trace!(foreground = self.foreground, "option");
        tracing::trace!(log_file = %self.log_file.display(), "option");
        match &self.config_file {
            Some(path) => tracing::trace!(config_file = %path.display(), "option"),
            None => tracing::trace!(config_file = "not set", "option"),
        }
        tracing::trace!(max_workers = self.max_workers, "option");
        tracing::trace!(port = self.port, "option");
        tracing::trace!(lock_file = %self.lock_file.display(), "option");
        tracing::trace!(dns_lookups = self.dns_lookups, "option");
        tracing::trace!(dump_core = self.dump_core, "option");
        tracing::trace!(terminate = self.terminate, "option");
        tracing::trace!(check_config = self.check_config, "option");
    }

    /// Render these options as the command line of the detached successor
    ///
    /// Paths are made absolute because the successor runs from `/`.
    pub fn detached_args(&self) -> Result<Vec<OsString>> {
        let mut args: Vec<OsString> = vec![
            "--detached".into(),
            "--log-level".into(),
            self.log_level.to_string().into(),
            "--port".into(),
            self.port.to_string().into(),
            "--max-workers".into(),
            self.max_workers.to_string().into(),
            "--lock-file".into(),
            paths::absolute(&self.lock_file)?.into_os_string(),
            "--log-file".into(),
            paths::absolute(&self.log_file)?.into_os_string(),
        ];
        if self.dns_lookups {
            args.push("--dns-lookups".into());
        }
        if self.dump_core {
            args.push("--dump-core".into());
        }
        if let Some(config) = &self.config_file {
            args.push("--config".into());
            args.push(paths::absolute(config)?.into_os_string());
        }
        Ok(args)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    fn cli(args: &[&str]) -> Cli {
        let mut full = vec!["tcpdaemon"];
        full.extend_from_slice(args);
        Cli::try_parse_from(full).unwrap()
    }

    #[test]
    fn test_defaults_are_valid() {
        let options = Options::default();
        assert_eq!(options.port, 3000);
        assert_eq!(options.max_workers, 3);
        assert_eq!(options.log_level, 1);
        assert!(options.validate().is_ok());
    }

    #[test]
    fn test_file_then_cli_precedence() {
        let file = FileOptions::parse(
            r#"
            port = 4000
            max_workers = 10
            dns_lookups = true
            "#,
        )
        .unwrap();

        let mut options = Options::default();
        options.apply_file(file).unwrap();
        options.apply_cli(&cli(&["-p", "5000"]));

        assert_eq!(options.port, 5000);
        assert_eq!(options.max_workers, 10);
        assert!(options.dns_lookups);
    }

    #[test]
    fn test_unknown_file_keys_are_ignored() {
        let file = FileOptions::parse("colour = \"blue\"\nport = 1234\n").unwrap();
        assert_eq!(file.port, Some(1234));
    }

    #[test]
    fn test_file_port_out_of_range() {
        let file = FileOptions::parse("port = 70000").unwrap();
        let mut options = Options::default();
        assert!(matches!(options.apply_file(file), Err(Error::Config(_))));
    }

    #[test]
    fn test_check_config_forces_foreground_and_max_level() {
        let mut options = Options::default();
        options.apply_cli(&cli(&["-o", "-d", "2"]));
        assert!(options.check_config);
        assert!(options.foreground);
        assert_eq!(options.log_level, MAX_LOG_LEVEL);
        assert_eq!(options.level_filter(), LevelFilter::TRACE);
    }

    #[test]
    fn test_validate_rejects_bad_ranges() {
        let options = Options {
            max_workers: 0,
            ..Options::default()
        };
        assert!(options.validate().is_err());

        let options = Options {
            max_workers: ABSOLUTE_MAX_WORKERS + 1,
            ..Options::default()
        };
        assert!(options.validate().is_err());

        let options = Options {
            log_level: 10,
            ..Options::default()
        };
        assert!(options.validate().is_err());
    }

    #[test]
    fn test_level_filter_mapping() {
        let at = |log_level| Options {
            log_level,
            ..Options::default()
        };
        assert_eq!(at(1).level_filter(), LevelFilter::INFO);
        assert_eq!(at(2).level_filter(), LevelFilter::DEBUG);
        assert_eq!(at(8).level_filter(), LevelFilter::DEBUG);
        assert_eq!(at(9).level_filter(), LevelFilter::TRACE);
    }

    #[test]
    fn test_load_reads_named_config_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("daemon.toml");
        std::fs::write(&path, "max_workers = 7\n").unwrap();

        let options = Options::load(&cli(&["-c", path.to_str().unwrap()])).unwrap();
        assert_eq!(options.max_workers, 7);
        assert_eq!(options.config_file.as_deref(), Some(path.as_path()));
    }

    #[test]
    fn test_load_missing_named_config_fails() {
        let err = Options::load(&cli(&["-c", "/nonexistent/tcpdaemon.toml"])).unwrap_err();
        assert!(matches!(err, Error::FileRead { .. }));
    }

    #[test]
    fn test_detached_args_round_trip() {
        let options = Options {
            port: 4100,
            max_workers: 5,
            dns_lookups: true,
            lock_file: PathBuf::from("run/test.pid"),
            ..Options::default()
        };
        let args = options.detached_args().unwrap();

        let mut argv: Vec<OsString> = vec!["tcpdaemon".into()];
        argv.extend(args);
        let parsed = Cli::try_parse_from(argv).unwrap();

        assert!(parsed.detached);
        assert_eq!(parsed.port, Some(4100));
        assert_eq!(parsed.max_workers, Some(5));
        assert!(parsed.dns_lookups);
        assert!(parsed.lock_file.unwrap().is_absolute());
    }
}
