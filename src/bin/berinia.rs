//! BerinIA command-line entry point.
//!
//! # Usage
//!
//! ```bash
//! berinia init [--no-scheduler]
//! berinia interact
//! berinia webhook [--host 0.0.0.0] [--port 8001]
//! ```
//!
//! # Environment Variables
//!
//! - `OPENAI_API_KEY` — LLM key (required)
//! - `QDRANT_URL` — vector store endpoint (optional; offline mode otherwise)
//! - `TWILIO_AUTH_TOKEN` — SMS signature secret (required by `webhook`)
//! - `BERINIA_WEBHOOK_HOST` / `BERINIA_WEBHOOK_PORT` — listen address
//! - `BERINIA_DATA_DIR` — data root (default: current directory)
//! - `RUST_LOG` — tracing filter for the HTTP layer

use berinia::cli::{self, CliCommand};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "warn,berinia=info".into()),
        )
        .init();

    tracing::info!("berinia v{}", berinia::VERSION);

    let args: Vec<String> = std::env::args().skip(1).collect();
    match cli::parse_command(&args) {
        Some(CliCommand::Init { no_scheduler }) => cli::run_init(no_scheduler).await,
        Some(CliCommand::Interact) => cli::run_interact().await,
        Some(CliCommand::Webhook { host, port }) => cli::run_webhook(host, port).await,
        Some(CliCommand::Version) => {
            println!("berinia {}", berinia::VERSION);
            Ok(())
        }
        Some(CliCommand::Help) | None => {
            cli::print_help();
            Ok(())
        }
    }
}
