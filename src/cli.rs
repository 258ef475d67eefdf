use std::{
    fmt::{Display, Formatter, Result as FmtResult},
    path::PathBuf,
};

use clap::{Parser, Subcommand};
use log::LevelFilter;

use zroot_api::constants::DEFAULT_CONFIG_PATH;

use crate::ZROOT_VERSION;

#[derive(Parser, Debug)]
#[clap(version = ZROOT_VERSION)]
pub struct Cli {
    /// Logging verbosity [OFF, ERROR, WARN, INFO, DEBUG, TRACE]
    #[arg(global = true, short, long, default_value_t = LevelFilter::Debug)]
    pub verbosity: LevelFilter,

    /// Provisioning configuration, YAML or legacy INI
    #[arg(global = true, short, long, default_value = DEFAULT_CONFIG_PATH)]
    pub config: PathBuf,

    /// Answer "yes" to every confirmation prompt
    #[arg(global = true, short, long)]
    pub yes: bool,

    /// Write tracing spans as JSON lines to this file
    #[arg(global = true, long)]
    pub trace_file: Option<PathBuf>,

    /// Path to save an eventual fatal error
    #[arg(global = true, short, long)]
    pub error: Option<PathBuf>,

    #[clap(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Commands {
    /// Create and mount every partition, pool, dataset and mount point
    Provision {
        /// Destroy whatever already exists first
        #[clap(long)]
        wipe_first: bool,
    },

    /// Unmount everything and export the pool
    Teardown {
        /// Also destroy the datasets, the pool and the partitions
        #[clap(long)]
        destroy: bool,
    },

    /// Print the ordered provisioning plan
    Plan,

    /// Print the current state of every planned resource
    Status,

    /// Validate the configuration and the plan built from it
    Validate,

    /// Tear everything down and erase the whole disk
    #[clap(name = "wipe-disk")]
    WipeDisk,

    /// Write the host configuration files into the staged system
    #[clap(name = "configure-os")]
    ConfigureOs,
}

impl Commands {
    pub fn name(&self) -> &'static str {
        match self {
            Commands::Provision { .. } => "provision",
            Commands::Teardown { .. } => "teardown",
            Commands::Plan => "plan",
            Commands::Status => "status",
            Commands::Validate => "validate",
            Commands::WipeDisk => "wipe-disk",
            Commands::ConfigureOs => "configure-os",
        }
    }

    /// Whether the command may destroy data and must be confirmed.
    pub fn is_destructive(&self) -> bool {
        matches!(
            self,
            Commands::Provision { wipe_first: true }
                | Commands::Teardown { destroy: true }
                | Commands::WipeDisk
        )
    }

    /// Whether the command touches the system and needs root.
    pub fn requires_root(&self) -> bool {
        !matches!(self, Commands::Plan | Commands::Validate)
    }
}

impl Display for Commands {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        write!(f, "{}", self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use clap::CommandFactory;

    #[test]
    fn test_cli() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse() {
        let cli = Cli::parse_from(["zroot", "provision", "--wipe-first", "--yes"]);
        assert_eq!(cli.command, Commands::Provision { wipe_first: true });
        assert!(cli.yes);
        assert_eq!(cli.config, PathBuf::from(DEFAULT_CONFIG_PATH));
        assert_eq!(cli.verbosity, LevelFilter::Debug);

        let cli = Cli::parse_from([
            "zroot",
            "--config",
            "/root/zor.ini",
            "-v",
            "trace",
            "teardown",
        ]);
        assert_eq!(cli.command, Commands::Teardown { destroy: false });
        assert_eq!(cli.config, PathBuf::from("/root/zor.ini"));
        assert_eq!(cli.verbosity, LevelFilter::Trace);
        assert!(!cli.yes);

        let cli = Cli::parse_from(["zroot", "wipe-disk", "--trace-file", "/tmp/trace.jsonl"]);
        assert_eq!(cli.command.to_string(), "wipe-disk");
        assert_eq!(cli.trace_file, Some(PathBuf::from("/tmp/trace.jsonl")));
    }

    #[test]
    fn test_command_traits() {
        assert!(Commands::Provision { wipe_first: true }.is_destructive());
        assert!(!Commands::Provision { wipe_first: false }.is_destructive());
        assert!(Commands::Teardown { destroy: true }.is_destructive());
        assert!(!Commands::Teardown { destroy: false }.is_destructive());
        assert!(Commands::WipeDisk.is_destructive());
        assert!(!Commands::ConfigureOs.is_destructive());

        assert!(!Commands::Plan.requires_root());
        assert!(!Commands::Validate.requires_root());
        assert!(Commands::Status.requires_root());
    }
}
