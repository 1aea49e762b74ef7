use clap::Parser;
use snafu::prelude::*;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use corvus::cmd::{ValidateArgs, handle_validate};

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("Validate error: {source}"))]
    Validate { source: corvus::cmd::validate::Error },
}

#[derive(Parser, Debug)]
#[command(name = "corvus")]
#[command(version = "0.1.0")]
#[command(
    about = "Execution core for a declarative workflow engine",
    long_about = None
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Parser, Debug)]
enum Commands {
    /// Validate workflow document(s) without executing
    Validate(ValidateArgs),
}

/// Initialize structured logging.
fn init_tracing(verbose: bool) {
    let filter_layer = if verbose {
        tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("debug"))
    } else {
        tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"))
    };

    tracing_subscriber::registry()
        .with(filter_layer)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

#[tokio::main]
async fn main() -> Result<(), Error> {
    let cli = Cli::parse();

    // Load configuration from file, env vars, and defaults; failures fall
    // back to defaults rather than blocking validation.
    let global_config = corvus::config::EngineConfig::load().unwrap_or_default();

    match cli.command {
        Commands::Validate(args) => {
            init_tracing(args.verbose);
            handle_validate(args, global_config.validate)
                .await
                .context(ValidateSnafu)
        }
    }
}
