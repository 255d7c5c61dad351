//! CLI argument definitions for gatepost-host.
//!
//! Uses `clap` v4 derive macros to parse command-line arguments.

use std::path::PathBuf;

use clap::Parser;

/// Gatepost capture host daemon.
///
/// Binds the kernel packet queue, registers every intercepted packet in
/// the verdict registry, and serves the registry to the evaluator
/// process over a local RPC socket.
#[derive(Parser, Debug)]
#[command(name = "gatepost-host")]
#[command(version, about, long_about = None)]
pub struct HostCli {
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

    /// Override the netfilter queue number.
    #[arg(long)]
    pub queue_num: Option<u16>,

    /// Validate configuration file and exit without starting the daemon.
    #[arg(long)]
    pub validate: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let cli = HostCli::parse_from(["gatepost-host"]);
        assert_eq!(cli.config, PathBuf::from("/etc/gatepost/gatepost.toml"));
        assert!(cli.log_level.is_none());
        assert!(!cli.validate);
    }

    #[test]
    fn overrides() {
        let cli = HostCli::parse_from([
            "gatepost-host",
            "--config",
            "/tmp/g.toml",
            "--log-level",
            "debug",
            "--queue-num",
            "5",
            "--validate",
        ]);
        assert_eq!(cli.config, PathBuf::from("/tmp/g.toml"));
        assert_eq!(cli.log_level.as_deref(), Some("debug"));
        assert_eq!(cli.queue_num, Some(5));
        assert!(cli.validate);
    }
}
