//! # TDS - Data Store Server
//!
//! The main binary for the TDS provenance and project-asset store.
//!
//! This application provides:
//! - HTTP REST API server (axum-based)
//! - CLI interface for provenance, project and index operations
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                  apps/tds (THE BINARY)                   │
//! │                                                          │
//! │   ┌─────────────┐    ┌─────────────┐    ┌────────────┐   │
//! │   │    CLI      │    │  HTTP API   │    │   Config   │   │
//! │   │   (clap)    │    │   (axum)    │    │   (toml)   │   │
//! │   └──────┬──────┘    └──────┬──────┘    └─────┬──────┘   │
//! │          └──────────────────┼─────────────────┘          │
//! │                             ▼                            │
//! │                     ┌───────────────┐                    │
//! │                     │   tds-core    │                    │
//! │                     │  (Datastore)  │                    │
//! │                     └───────────────┘                    │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//!
//! ```bash
//! # Start the HTTP server
//! tds server --host 0.0.0.0 --port 8080
//!
//! # CLI operations
//! tds status
//! tds relate --left 1 --left-type datasets --right 2 --right-type models -r derives
//! tds derived --id 2 --type models
//! ```

use clap::Parser;
use tds::cli;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

// =============================================================================
// APPLICATION ENTRY POINT
// =============================================================================

#[tokio::main]
async fn main() {
    // TDS_LOG_FORMAT=json switches to machine-parseable output.
    let log_format = std::env::var("TDS_LOG_FORMAT").unwrap_or_else(|_| "text".to_string());

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "tds=info,tds_core=info,tower_http=debug".into());

    match log_format.as_str() {
        "json" => {
            tracing_subscriber::registry()
                .with(filter)
                .with(tracing_subscriber::fmt::layer().json())
                .init();
        }
        _ => {
            tracing_subscriber::registry()
                .with(filter)
                .with(tracing_subscriber::fmt::layer())
                .init();
        }
    }

    let cli = cli::Cli::parse();

    if !cli.quiet && !cli.json_mode {
        print_banner();
    }

    if let Err(e) = cli::execute(cli).await {
        tracing::error!("Error: {}", e);
        std::process::exit(1);
    }
}

/// Print the startup banner.
fn print_banner() {
    println!(
        r#"
  ████████╗██████╗ ███████╗
  ╚══██╔══╝██╔══██╗██╔════╝
     ██║   ██║  ██║███████╗
     ██║   ██║  ██║╚════██║
     ██║   ██████╔╝███████║
     ╚═╝   ╚═════╝ ╚══════╝

  Data Store v{}

  Provenance • Projects • Assets
"#,
        env!("CARGO_PKG_VERSION")
    );
}
