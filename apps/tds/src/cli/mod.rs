//! # TDS CLI Module
//!
//! ## Available Commands
//!
//! - `server` - Start the HTTP server
//! - `status` - Show store status
//! - `init` - Create the data directory and store files
//! - `relate` / `show` / `unrelate` - Provenance relations
//! - `derived` - Derived-from search over the graph mirror
//! - `replay` - Replay queued mirror writes
//! - `prune` - Delete orphan graph nodes
//! - `assets` - Resolve a project's assets
//! - `index` - Bulk-load JSON documents into the search index

mod commands;

use crate::config::{ConfigOverrides, TdsConfig};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tds_core::{RelationType, ResourceType, StorageBackend, TdsError};

pub use commands::*;

// =============================================================================
// CLI STRUCTURE
// =============================================================================

/// TDS - provenance and project-asset data store
///
/// The relational store is the record; the graph store mirrors provenance
/// edges for traversal.
#[derive(Parser, Debug)]
#[command(name = "tds")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Suppress banner output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// TOML configuration file
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Directory holding the store files
    #[arg(short = 'D', long, global = true)]
    pub data_dir: Option<PathBuf>,

    /// Storage backend: "memory" or "redb"
    #[arg(short = 'B', long, global = true)]
    pub backend: Option<StorageBackend>,

    /// Run without the graph mirror
    #[arg(long, global = true)]
    pub no_graph: bool,

    /// Output in JSON format (for programmatic access)
    #[arg(long, global = true)]
    pub json_mode: bool,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start HTTP server
    Server {
        /// Host to bind to
        #[arg(short = 'H', long)]
        host: Option<String>,

        /// Port to bind to
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Show store status
    Status,

    /// Create the data directory and empty stores
    Init {
        /// Remove existing store files first
        #[arg(short, long)]
        force: bool,
    },

    /// Record a provenance relation
    Relate {
        #[arg(long)]
        left: u64,

        #[arg(long)]
        left_type: ResourceType,

        #[arg(long)]
        right: u64,

        #[arg(long)]
        right_type: ResourceType,

        /// copies, derives, glued, parents or derivedfrom
        #[arg(short, long)]
        relation: RelationType,

        #[arg(short, long, default_value = "0")]
        user: u64,
    },

    /// Show a provenance relation
    Show {
        id: u64,
    },

    /// Delete a provenance relation
    Unrelate {
        id: u64,
    },

    /// List resources reachable over derived-from edges
    Derived {
        #[arg(long)]
        id: u64,

        #[arg(short = 't', long = "type")]
        resource_type: ResourceType,
    },

    /// Replay queued graph mirror writes
    Replay,

    /// Delete graph nodes without edges
    Prune,

    /// Resolve the assets of a project
    Assets {
        project: u64,

        /// Comma-separated resource types (default: every asset type)
        #[arg(short = 't', long, value_delimiter = ',')]
        types: Vec<ResourceType>,
    },

    /// Load search documents from a JSON file
    Index {
        /// Resource type of every document in the file
        #[arg(short = 't', long = "type")]
        resource_type: ResourceType,

        /// JSON array of objects, each with a string "id"
        #[arg(short, long)]
        file: PathBuf,
    },
}

// =============================================================================
// COMMAND EXECUTION
// =============================================================================

impl Cli {
    /// Configuration file merged with command-line overrides.
    pub fn resolve_config(&self) -> Result<TdsConfig, TdsError> {
        let mut config = TdsConfig::load(self.config.as_deref())?;
        let (host, port) = match &self.command {
            Some(Commands::Server { host, port }) => (host.clone(), *port),
            _ => (None, None),
        };
        config.apply(&ConfigOverrides {
            data_dir: self.data_dir.clone(),
            backend: self.backend,
            no_graph: self.no_graph,
            host,
            port,
        });
        config.store.validate()?;
        if self.verbose {
            tracing::info!(config = ?config, "effective configuration");
        }
        Ok(config)
    }
}

/// Execute the CLI with parsed arguments.
pub async fn execute(cli: Cli) -> Result<(), TdsError> {
    let config = cli.resolve_config()?;
    let json_mode = cli.json_mode;

    match cli.command {
        Some(Commands::Server { .. }) => cmd_server(&config).await,
        Some(Commands::Status) | None => cmd_status(&config, json_mode),
        Some(Commands::Init { force }) => cmd_init(&config, force),
        Some(Commands::Relate {
            left,
            left_type,
            right,
            right_type,
            relation,
            user,
        }) => cmd_relate(
            &config,
            json_mode,
            &RelationInput {
                left,
                left_type,
                right,
                right_type,
                relation,
                user,
            },
        ),
        Some(Commands::Show { id }) => cmd_show(&config, json_mode, id),
        Some(Commands::Unrelate { id }) => cmd_unrelate(&config, json_mode, id),
        Some(Commands::Derived { id, resource_type }) => {
            cmd_derived(&config, json_mode, id, resource_type)
        }
        Some(Commands::Replay) => cmd_replay(&config, json_mode),
        Some(Commands::Prune) => cmd_prune(&config, json_mode),
        Some(Commands::Assets { project, types }) => {
            cmd_assets(&config, json_mode, project, &types)
        }
        Some(Commands::Index {
            resource_type,
            file,
        }) => cmd_index(&config, json_mode, resource_type, &file),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_relate() {
        let cli = Cli::try_parse_from([
            "tds",
            "--backend",
            "memory",
            "relate",
            "--left",
            "1",
            "--left-type",
            "dataset",
            "--right",
            "2",
            "--right-type",
            "models",
            "-r",
            "derives",
        ])
        .expect("parse");
        assert_eq!(cli.backend, Some(StorageBackend::Memory));
        assert!(matches!(
            cli.command,
            Some(Commands::Relate {
                left_type: ResourceType::Datasets,
                relation: RelationType::Derives,
                user: 0,
                ..
            })
        ));
    }

    #[test]
    fn rejects_unknown_resource_type() {
        assert!(Cli::try_parse_from(["tds", "derived", "--id", "1", "-t", "widgets"]).is_err());
    }

    #[test]
    fn assets_types_are_comma_separated() {
        let cli = Cli::try_parse_from(["tds", "assets", "3", "-t", "datasets,publications"])
            .expect("parse");
        let Some(Commands::Assets { project, types }) = cli.command else {
            unreachable!("parsed as assets");
        };
        assert_eq!(project, 3);
        assert_eq!(types, vec![ResourceType::Datasets, ResourceType::Publications]);
    }

    #[test]
    fn server_flags_override_config() {
        let cli = Cli::try_parse_from([
            "tds",
            "--backend",
            "memory",
            "--no-graph",
            "server",
            "--port",
            "9999",
        ])
        .expect("parse");
        let config = cli.resolve_config().expect("config");
        assert_eq!(config.server.port, 9999);
        assert!(!config.store.graph_mirror);
    }
}
