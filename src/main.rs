//! awsrangeroute - keep a policy routing table in sync with AWS IP ranges.

use anyhow::Result;
use clap::Parser;
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

use awsrangeroute::cli::{Cli, Commands};
use awsrangeroute::commands;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging based on verbosity; stdout is kept for command output
    let log_level = if cli.verbose {
        Level::DEBUG
    } else if cli.quiet {
        Level::ERROR
    } else {
        Level::INFO
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .with_thread_ids(false)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    match cli.command {
        Commands::Run => commands::run::run(&cli.config).await,
        Commands::Update { dry_run } => commands::update::run(dry_run, &cli.config).await,
        Commands::Reconcile => commands::reconcile::run(&cli.config).await,
        Commands::Routes => commands::routes::run(&cli.config).await,
        Commands::Regions { by_service } => commands::regions::run(by_service, &cli.config).await,
        Commands::Select { action } => commands::select::run(action, &cli.config).await,
        Commands::Custom { action } => commands::custom::run(action, &cli.config).await,
        Commands::InitConfig { force } => commands::init_config::run(force, &cli.config).await,
        Commands::Version => {
            println!("awsrangeroute {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}
