//! CLI argument definitions for gatepost-evaluator.
//!
//! Uses `clap` v4 derive macros to parse command-line arguments.

use std::path::PathBuf;

use clap::Parser;

/// Gatepost policy evaluator daemon.
///
/// Polls the capture host's verdict registry, decomposes each pending
/// packet, dispatches it to the loaded inspection modules, and writes
/// accept/drop verdicts back.
#[derive(Parser, Debug)]
#[command(name = "gatepost-evaluator")]
#[command(version, about, long_about = None)]
pub struct EvaluatorCli {
    /// Path to gatepost.toml configuration file.
    #[arg(short, long, default_value = "/etc/gatepost/gatepost.toml")]
    pub config: PathBuf,

    /// Override log level (trace, debug, info, warn, error).
    ///
    /// Takes precedence over the config file and environment variables.
    #[arg(long)]
    pub log_level: Option<String>,

    /// Override log format (json, pretty).
    ///
    /// Takes precedence over the config file and environment variables.
    #[arg(long)]
    pub log_format: Option<String>,

    /// Override the module directory.
    #[arg(long)]
    pub module_dir: Option<String>,

    /// Validate configuration file and exit without starting the daemon.
    #[arg(long)]
    pub validate: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let cli = EvaluatorCli::parse_from(["gatepost-evaluator"]);
        assert_eq!(cli.config, PathBuf::from("/etc/gatepost/gatepost.toml"));
        assert!(cli.module_dir.is_none());
        assert!(!cli.validate);
    }

    #[test]
    fn module_dir_override() {
        let cli = EvaluatorCli::parse_from([
            "gatepost-evaluator",
            "--module-dir",
            "/opt/inspect",
        ]);
        assert_eq!(cli.module_dir.as_deref(), Some("/opt/inspect"));
    }
}
