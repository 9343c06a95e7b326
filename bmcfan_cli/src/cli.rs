//! CLI argument definitions and the limits static used in error reports.

use clap::{ArgAction, Parser, Subcommand};
use std::path::PathBuf;
use std::sync::OnceLock;

/// Effective limits used for the current run (for JSON details).
pub static LAST_LIMITS: OnceLock<CliLimits> = OnceLock::new();

#[derive(Copy, Clone, Debug)]
pub struct CliLimits {
    pub max_consecutive_failures: u32,
    pub command_timeout_ms: u64,
}

#[derive(Parser, Debug)]
#[command(name = "bmcfan", version, about = "Closed-loop fan control for Dell iDRAC servers")]
pub struct Cli {
    /// Path to config TOML
    #[arg(long, value_name = "FILE", default_value = "/etc/bmcfan/bmcfan.toml")]
    pub config: PathBuf,

    /// Log and report as JSON lines instead of pretty text
    #[arg(long, action = ArgAction::SetTrue)]
    pub json: bool,

    /// Console log level (error|warn|info|debug|trace); RUST_LOG wins if set
    #[arg(long = "log-level", value_name = "LEVEL")]
    pub log_level: Option<String>,

    /// Command to execute
    #[command(subcommand)]
    pub cmd: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Take manual fan control and regulate until interrupted
    Run {
        /// Drive a simulated BMC instead of ipmitool
        #[arg(long, action = ArgAction::SetTrue)]
        sim: bool,
        /// Measure the fan curve before regulating
        #[arg(long, action = ArgAction::SetTrue)]
        scan: bool,
        /// Run a single tick, then hand control back and exit
        #[arg(long, action = ArgAction::SetTrue, conflicts_with = "ticks")]
        once: bool,
        /// Stop after this many ticks
        #[arg(long, value_name = "N")]
        ticks: Option<u64>,
    },
    /// Inspect the stored fan curve
    Curve {
        #[command(subcommand)]
        action: CurveCommand,
    },
    /// Read the temperature and fan RPM once
    SelfCheck {
        /// Use the simulated BMC
        #[arg(long, action = ArgAction::SetTrue)]
        sim: bool,
    },
    /// Send a test notification through the configured transport
    NotifyTest,
}

#[derive(Subcommand, Debug)]
pub enum CurveCommand {
    /// Print the fan curve as `speed_percent,rpm` rows
    Show {
        /// Curve file to read instead of `curve.path` from the config
        #[arg(long, value_name = "FILE")]
        path: Option<PathBuf>,
    },
}

impl Commands {
    /// Commands that can run without a config file.
    pub fn needs_config(&self) -> bool {
        !matches!(
            self,
            Commands::Curve {
                action: CurveCommand::Show { path: Some(_) }
            }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn once_conflicts_with_ticks() {
        let r = Cli::try_parse_from(["bmcfan", "run", "--once", "--ticks", "3"]);
        assert!(r.is_err());
    }

    #[test]
    fn curve_show_with_path_skips_config() {
        let cli = Cli::try_parse_from(["bmcfan", "curve", "show", "--path", "c.csv"]).unwrap();
        assert!(!cli.cmd.needs_config());
        let cli = Cli::try_parse_from(["bmcfan", "curve", "show"]).unwrap();
        assert!(cli.cmd.needs_config());
    }
}
