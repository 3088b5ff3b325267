use clap::{Parser, Subcommand};
use logbatch::batch::RunOutcome;
use logbatch::config::resolve_config_path;
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "logbatch")]
#[command(about = "Scheduled batch ingestion of access logs from a partitioned stream", long_about = None)]
struct Cli {
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the scheduler and web server until interrupted
    Run,
    /// Execute one run now; exits non-zero if it failed
    Once,
    /// Serve only the stream protocol
    Broker,
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    Init {
        #[arg(long)]
        stdout: bool,
    },
    Validate,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing subscriber
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "logbatch=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    let config_path = resolve_config_path(cli.config.as_deref());

    match cli.command {
        Some(Commands::Run) | None => {
            // Default behavior is to run
            logbatch::cli::run::run(config_path).await?;
        }
        Some(Commands::Once) => {
            let outcome = logbatch::cli::run::once(config_path).await?;
            println!("{}", outcome);
            if outcome == RunOutcome::Failed {
                std::process::exit(1);
            }
        }
        Some(Commands::Broker) => {
            logbatch::cli::run::broker(config_path).await?;
        }
        Some(Commands::Config { action }) => match action {
            ConfigAction::Init { stdout } => {
                logbatch::cli::config::init(stdout)?;
            }
            ConfigAction::Validate => {
                logbatch::cli::config::validate(config_path)?;
            }
        },
    }

    Ok(())
}
