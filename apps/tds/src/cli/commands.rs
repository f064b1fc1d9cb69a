//! # CLI Command Implementations

use crate::api;
use crate::config::TdsConfig;
use serde::Serialize;
use std::path::{Path, PathBuf};
use tds_core::{
    Datastore, RelationDraft, RelationId, RelationType, ResourceType, StorageBackend, TdsError,
    UserId,
    storage::{GRAPH_FILE, INDEX_FILE, RELATIONAL_FILE},
};

// =============================================================================
// FILE SIZE LIMITS
// =============================================================================

/// Maximum document file size for `index` (100 MB).
const MAX_INDEX_FILE_SIZE: u64 = 100 * 1024 * 1024;

fn validate_file_size(path: &Path, max_size: u64) -> Result<(), TdsError> {
    let metadata = std::fs::metadata(path)
        .map_err(|e| TdsError::InvalidConfig(format!("cannot read {}: {e}", path.display())))?;

    if metadata.len() > max_size {
        return Err(TdsError::InvalidConfig(format!(
            "file size {} bytes exceeds maximum allowed {} bytes",
            metadata.len(),
            max_size
        )));
    }
    Ok(())
}

/// Canonicalize an input path and require a regular file.
fn validate_file_path(path: &Path) -> Result<PathBuf, TdsError> {
    let canonical = path.canonicalize().map_err(|e| {
        TdsError::InvalidConfig(format!("invalid file path '{}': {e}", path.display()))
    })?;

    if !canonical.is_file() {
        return Err(TdsError::InvalidConfig(format!(
            "path '{}' is not a regular file",
            path.display()
        )));
    }
    Ok(canonical)
}

// =============================================================================
// HELPERS
// =============================================================================

fn open_store(config: &TdsConfig) -> Result<Datastore, TdsError> {
    Datastore::open(config.store.clone())
}

fn print_json<T: Serialize>(value: &T) {
    println!(
        "{}",
        serde_json::to_string_pretty(value).unwrap_or_default()
    );
}

/// Arguments of `relate`.
#[derive(Debug, Clone, Copy)]
pub struct RelationInput {
    pub left: u64,
    pub left_type: ResourceType,
    pub right: u64,
    pub right_type: ResourceType,
    pub relation: RelationType,
    pub user: u64,
}

impl From<&RelationInput> for RelationDraft {
    fn from(input: &RelationInput) -> Self {
        RelationDraft {
            left: input.left,
            left_type: Some(input.left_type),
            right: input.right,
            right_type: Some(input.right_type),
            relation_type: input.relation,
            user_id: UserId(input.user),
        }
    }
}

// =============================================================================
// SERVER COMMAND
// =============================================================================

pub async fn cmd_server(config: &TdsConfig) -> Result<(), TdsError> {
    let store = open_store(config)?;

    println!("TDS Data Store Starting...");
    println!();
    println!("Configuration:");
    println!("  Address:      {}", config.server.addr());
    println!("  Backend:      {}", config.store.backend);
    println!("  Data dir:     {}", config.store.data_dir.display());
    println!("  Graph mirror: {}", config.store.graph_mirror);
    println!("  Outbox:       {}", config.store.mirror_outbox);
    println!();
    println!("Endpoints:");
    println!("  POST /provenance               - Record a relation");
    println!("  POST /provenance/derived-from  - Derived-from search");
    println!("  GET  /projects/{{id}}/assets     - Resolve project assets");
    println!("  GET  /status                   - Store status");
    println!("  GET  /health                   - Health check");
    println!();
    println!("Press Ctrl+C to stop");
    println!();

    api::run_server(&config.server.addr(), store).await
}

// =============================================================================
// STATUS & INIT
// =============================================================================

pub fn cmd_status(config: &TdsConfig, json_mode: bool) -> Result<(), TdsError> {
    let stats = open_store(config)?.stats()?;

    if json_mode {
        print_json(&serde_json::json!({
            "data_dir": config.store.data_dir.to_string_lossy(),
            "stats": stats,
        }));
        return Ok(());
    }

    println!("TDS Store Status");
    println!("================");
    println!("Backend:   {}", stats.backend);
    println!("Data dir:  {}", config.store.data_dir.display());
    println!();
    println!("Relations:        {}", stats.relations);
    println!("Projects:         {}", stats.projects);
    match (stats.graph, &stats.graph_error) {
        (Some(graph), _) => {
            println!("Graph nodes:      {}", graph.nodes);
            println!("Graph edges:      {}", graph.edges);
        }
        (None, Some(error)) => println!("Graph mirror:     unavailable ({error})"),
        (None, None) => println!("Graph mirror:     disabled"),
    }
    println!("Pending mirror:   {}", stats.pending_mirror_ops);

    Ok(())
}

pub fn cmd_init(config: &TdsConfig, force: bool) -> Result<(), TdsError> {
    if config.store.backend == StorageBackend::Memory {
        println!("Memory backend keeps no files; nothing to initialize.");
        return Ok(());
    }

    let dir = &config.store.data_dir;
    let existing: Vec<PathBuf> = [RELATIONAL_FILE, GRAPH_FILE, INDEX_FILE]
        .into_iter()
        .map(|name| dir.join(name))
        .filter(|path| path.exists())
        .collect();

    if !existing.is_empty() {
        if !force {
            return Err(TdsError::Conflict(format!(
                "store files already exist in {}. Use --force to overwrite.",
                dir.display()
            )));
        }
        for path in &existing {
            std::fs::remove_file(path).map_err(|e| {
                TdsError::InvalidConfig(format!("cannot remove {}: {e}", path.display()))
            })?;
            tracing::info!(path = %path.display(), "store file removed");
        }
    }

    open_store(config)?;
    println!("Initialized new redb stores in {}", dir.display());
    Ok(())
}

// =============================================================================
// PROVENANCE COMMANDS
// =============================================================================

pub fn cmd_relate(config: &TdsConfig, json_mode: bool, input: &RelationInput) -> Result<(), TdsError> {
    let store = open_store(config)?;
    let id = store.provenance().create(&RelationDraft::from(input))?;

    if json_mode {
        print_json(&serde_json::json!({ "id": id }));
    } else {
        println!(
            "Created relation {}: {}/{} -[{}]-> {}/{}",
            id, input.left_type, input.left, input.relation, input.right_type, input.right
        );
    }
    Ok(())
}

pub fn cmd_show(config: &TdsConfig, json_mode: bool, id: u64) -> Result<(), TdsError> {
    let store = open_store(config)?;
    let row = store
        .provenance()
        .retrieve(RelationId(id))?
        .ok_or_else(|| TdsError::not_found("relation", id))?;

    if json_mode {
        print_json(&row);
    } else {
        println!("Relation {}", row.id);
        println!("  Left:     {}/{}", row.left_type, row.left);
        println!("  Right:    {}/{}", row.right_type, row.right);
        println!("  Relation: {}", row.relation_type);
        println!("  User:     {}", row.user_id.0);
        println!("  Created:  {}", row.created_at.to_rfc3339());
    }
    Ok(())
}

pub fn cmd_unrelate(config: &TdsConfig, json_mode: bool, id: u64) -> Result<(), TdsError> {
    let store = open_store(config)?;
    if !store.provenance().delete(RelationId(id))? {
        return Err(TdsError::not_found("relation", id));
    }

    if json_mode {
        print_json(&serde_json::json!({ "id": id, "deleted": true }));
    } else {
        println!("Deleted relation {}", id);
    }
    Ok(())
}

pub fn cmd_derived(
    config: &TdsConfig,
    json_mode: bool,
    id: u64,
    resource_type: ResourceType,
) -> Result<(), TdsError> {
    let store = open_store(config)?;
    let nodes = store.provenance().search_derived_from(id, resource_type)?;

    if json_mode {
        print_json(&nodes);
        return Ok(());
    }

    if nodes.is_empty() {
        println!("Nothing reachable from {}/{}", resource_type, id);
    } else {
        println!("Reachable from {}/{}:", resource_type, id);
        for node in &nodes {
            println!("  {}/{}", node.label, node.id);
        }
    }
    Ok(())
}

pub fn cmd_replay(config: &TdsConfig, json_mode: bool) -> Result<(), TdsError> {
    let store = open_store(config)?;
    let report = store.provenance().replay_outbox()?;

    if json_mode {
        print_json(&report);
    } else {
        println!(
            "Replayed {}, skipped {}, remaining {}",
            report.replayed, report.skipped, report.remaining
        );
    }
    Ok(())
}

pub fn cmd_prune(config: &TdsConfig, json_mode: bool) -> Result<(), TdsError> {
    let store = open_store(config)?;
    let removed = store.provenance().prune_orphan_nodes()?;

    if json_mode {
        print_json(&serde_json::json!({ "removed": removed }));
    } else {
        println!("Removed {} orphan graph nodes", removed);
    }
    Ok(())
}

// =============================================================================
// ASSET COMMANDS
// =============================================================================

pub fn cmd_assets(
    config: &TdsConfig,
    json_mode: bool,
    project: u64,
    types: &[ResourceType],
) -> Result<(), TdsError> {
    let store = open_store(config)?;
    let resolved = store
        .aggregator()
        .resolve_assets(tds_core::ProjectId(project), types)?;

    if json_mode {
        print_json(&resolved);
        return Ok(());
    }

    println!("Project {} assets", project);
    for (resource_type, views) in &resolved {
        println!("  {} ({})", resource_type, views.len());
        for view in views {
            println!("    {}", view.resource_id());
        }
    }
    Ok(())
}

/// Load a JSON array of documents into the collection of `resource_type`.
pub fn cmd_index(
    config: &TdsConfig,
    json_mode: bool,
    resource_type: ResourceType,
    file: &Path,
) -> Result<(), TdsError> {
    let path = validate_file_path(file)?;
    validate_file_size(&path, MAX_INDEX_FILE_SIZE)?;

    let text = std::fs::read_to_string(&path)
        .map_err(|e| TdsError::InvalidConfig(format!("cannot read {}: {e}", path.display())))?;
    let entries: Vec<serde_json::Value> = serde_json::from_str(&text)
        .map_err(|e| TdsError::SerializationError(format!("{}: {e}", path.display())))?;

    let store = open_store(config)?;
    let (mut created, mut replaced) = (0usize, 0usize);
    for (position, entry) in entries.into_iter().enumerate() {
        let serde_json::Value::Object(document) = entry else {
            return Err(TdsError::InvalidAsset(format!(
                "entry {position} is not a JSON object"
            )));
        };
        let id = match document.get("id") {
            Some(serde_json::Value::String(id)) => id.clone(),
            _ => {
                return Err(TdsError::InvalidAsset(format!(
                    "entry {position} has no string \"id\""
                )));
            }
        };
        if store
            .aggregator()
            .index_document(resource_type, &id, document)?
        {
            created += 1;
        } else {
            replaced += 1;
        }
    }

    tracing::info!(%resource_type, created, replaced, "documents indexed");
    if json_mode {
        print_json(&serde_json::json!({ "created": created, "replaced": replaced }));
    } else {
        println!(
            "Indexed {} {} documents ({} new, {} replaced)",
            created + replaced,
            resource_type.label(),
            created,
            replaced
        );
    }
    Ok(())
}
