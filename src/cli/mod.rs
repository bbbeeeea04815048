//! Command-line interface of the store daemon.

use clap::Parser;
use std::path::PathBuf;

/// In-memory time-series store for cluster monitoring telemetry.
#[derive(Parser, Debug)]
#[command(name = "gridstore")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Configuration file
    #[arg(long, env = "GRIDSTORE_CONFIG", default_value = "./config.json")]
    pub config: PathBuf,

    /// Enable development extras (permissive CORS on the API)
    #[arg(long)]
    pub dev: bool,

    /// Logging level: debug, info, warn, error
    #[arg(long, env = "GRIDSTORE_LOGLEVEL", default_value = "warn")]
    pub loglevel: String,

    /// Add date and time to log messages
    #[arg(long)]
    pub logdate: bool,
}

impl Cli {
    /// Parse command-line arguments.
    pub fn parse_args() -> Self {
        Cli::parse()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cli = Cli::parse_from(["gridstore"]);
        assert_eq!(cli.config, PathBuf::from("./config.json"));
        assert_eq!(cli.loglevel, "warn");
        assert!(!cli.dev);
        assert!(!cli.logdate);
    }

    #[test]
    fn test_flags() {
        let cli = Cli::parse_from([
            "gridstore",
            "--config",
            "/etc/gridstore.json",
            "--dev",
            "--loglevel",
            "debug",
            "--logdate",
        ]);
        assert_eq!(cli.config, PathBuf::from("/etc/gridstore.json"));
        assert_eq!(cli.loglevel, "debug");
        assert!(cli.dev && cli.logdate);
    }
}
