//! CLI argument parsing with clap.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::config::DEFAULT_CONFIG_PATH;

#[derive(Parser)]
#[command(name = "awsrangeroute")]
#[command(author, version, about = "Keep a policy routing table in sync with AWS IP ranges")]
#[command(propagate_version = true)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Config file path
    #[arg(
        short,
        long,
        default_value = DEFAULT_CONFIG_PATH,
        env = "AWSRANGEROUTE_CONFIG",
        global = true
    )]
    pub config: PathBuf,

    /// Quiet mode (errors only)
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Verbose mode (debug output)
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run as a daemon: update on start, on a timer and on SIGUSR1
    Run,

    /// Fetch the feed and reconcile the routing table once
    Update {
        /// Fetch and compute, print the route changes, apply nothing
        #[arg(long)]
        dry_run: bool,
    },

    /// Reconcile the routing table from the cached feed (no download)
    Reconcile,

    /// Print the route set the table should hold
    Routes,

    /// List regions and the services published in each
    Regions {
        /// Group by service instead
        #[arg(long)]
        by_service: bool,
    },

    /// Manage region:service selections
    Select {
        #[command(subcommand)]
        action: SelectAction,
    },

    /// Manage custom ranges routed alongside the feed
    Custom {
        #[command(subcommand)]
        action: CustomAction,
    },

    /// Write a commented default configuration file
    InitConfig {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },

    /// Show version
    Version,
}

#[derive(Subcommand)]
pub enum SelectAction {
    /// Add selectors such as `us-east-1:*`, `*:EC2` or `eu-west-1:S3`
    Add {
        #[arg(required = true)]
        selectors: Vec<String>,
    },
    /// Remove selectors
    Del {
        #[arg(required = true)]
        selectors: Vec<String>,
    },
    /// List current selections with their match counts
    List,
    /// Remove every selection
    Clear,
}

#[derive(Subcommand)]
pub enum CustomAction {
    /// Add IPs or CIDRs
    Add {
        #[arg(required = true)]
        networks: Vec<String>,
    },
    /// Remove IPs or CIDRs
    Del {
        #[arg(required = true)]
        networks: Vec<String>,
    },
    /// List custom ranges
    List,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_parses_help() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_cli_version_command() {
        let cli = Cli::try_parse_from(["awsrangeroute", "version"]).unwrap();
        assert!(matches!(cli.command, Commands::Version));
    }

    #[test]
    fn test_cli_update_dry_run() {
        let cli = Cli::try_parse_from(["awsrangeroute", "update", "--dry-run"]).unwrap();
        assert!(matches!(cli.command, Commands::Update { dry_run: true }));

        let cli = Cli::try_parse_from(["awsrangeroute", "update"]).unwrap();
        assert!(matches!(cli.command, Commands::Update { dry_run: false }));
    }

    #[test]
    fn test_cli_select_add_many() {
        let cli =
            Cli::try_parse_from(["awsrangeroute", "select", "add", "us-east-1:*", "*:EC2"]).unwrap();
        match cli.command {
            Commands::Select {
                action: SelectAction::Add { selectors },
            } => assert_eq!(selectors, vec!["us-east-1:*", "*:EC2"]),
            _ => panic!("expected select add"),
        }
    }

    #[test]
    fn test_cli_select_add_requires_value() {
        assert!(Cli::try_parse_from(["awsrangeroute", "select", "add"]).is_err());
    }

    #[test]
    fn test_cli_custom_del() {
        let cli = Cli::try_parse_from(["awsrangeroute", "custom", "del", "10.0.0.0/8"]).unwrap();
        assert!(matches!(
            cli.command,
            Commands::Custom {
                action: CustomAction::Del { .. }
            }
        ));
    }

    #[test]
    fn test_cli_global_flags() {
        let cli = Cli::try_parse_from([
            "awsrangeroute",
            "routes",
            "--config",
            "/tmp/test.yaml",
            "-v",
        ])
        .unwrap();
        assert_eq!(cli.config, PathBuf::from("/tmp/test.yaml"));
        assert!(cli.verbose);
        assert!(!cli.quiet);
    }

    #[test]
    fn test_cli_regions_by_service() {
        let cli = Cli::try_parse_from(["awsrangeroute", "regions", "--by-service"]).unwrap();
        assert!(matches!(cli.command, Commands::Regions { by_service: true }));
    }

    #[test]
    fn test_cli_init_config() {
        let cli = Cli::try_parse_from(["awsrangeroute", "init-config", "--force"]).unwrap();
        assert!(matches!(cli.command, Commands::InitConfig { force: true }));
    }
}
