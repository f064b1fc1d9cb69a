//! # Response Shaping
//!
//! Turns raw search hits and relational rows into the typed views returned
//! by asset resolution. One shaper per search-indexed resource type; a
//! document that does not fit its view is a [`TdsError::MalformedDocument`].

use crate::search::Hit;
use crate::{Publication, TdsError};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Fields requested for model listings.
pub const MODEL_LIST_FIELDS: &[&str] = &["id", "name", "description", "framework", "timestamp"];

/// Signature shared by every search-hit shaper.
pub type Shaper = fn(&str, Hit) -> Result<AssetView, TdsError>;

// =============================================================================
// VIEWS
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatasetView {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub file_names: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_source_date: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
}

/// Restricted model projection used in listings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelSummary {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub framework: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfigurationView {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub model_id: String,
    #[serde(default)]
    pub configuration: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulationView {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub engine: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workflow_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowView {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArtifactView {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub file_names: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PublicationView {
    pub id: u64,
    pub xdd_uri: String,
    pub title: String,
}

impl From<Publication> for PublicationView {
    fn from(row: Publication) -> Self {
        Self {
            id: row.id.0,
            xdd_uri: row.xdd_uri,
            title: row.title,
        }
    }
}

/// One resolved asset, serialized as its bare view.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum AssetView {
    Dataset(DatasetView),
    Model(ModelSummary),
    Configuration(ConfigurationView),
    Simulation(SimulationView),
    Workflow(WorkflowView),
    Artifact(ArtifactView),
    Publication(PublicationView),
}

impl AssetView {
    /// The resource id, rendered the way asset references store it.
    #[must_use]
    pub fn resource_id(&self) -> String {
        match self {
            AssetView::Dataset(v) => v.id.clone(),
            AssetView::Model(v) => v.id.clone(),
            AssetView::Configuration(v) => v.id.clone(),
            AssetView::Simulation(v) => v.id.clone(),
            AssetView::Workflow(v) => v.id.clone(),
            AssetView::Artifact(v) => v.id.clone(),
            AssetView::Publication(v) => v.id.to_string(),
        }
    }
}

// =============================================================================
// SHAPERS
// =============================================================================

fn shape<T: DeserializeOwned>(
    collection: &str,
    hit: Hit,
    wrap: fn(T) -> AssetView,
) -> Result<AssetView, TdsError> {
    let Hit { id, mut source } = hit;
    source.insert("id".to_string(), Value::String(id.clone()));
    serde_json::from_value::<T>(Value::Object(source))
        .map(wrap)
        .map_err(|e| TdsError::MalformedDocument {
            collection: collection.to_string(),
            id,
            reason: e.to_string(),
        })
}

pub fn shape_dataset(collection: &str, hit: Hit) -> Result<AssetView, TdsError> {
    shape(collection, hit, AssetView::Dataset)
}

pub fn shape_model(collection: &str, hit: Hit) -> Result<AssetView, TdsError> {
    shape(collection, hit, AssetView::Model)
}

pub fn shape_configuration(collection: &str, hit: Hit) -> Result<AssetView, TdsError> {
    shape(collection, hit, AssetView::Configuration)
}

pub fn shape_simulation(collection: &str, hit: Hit) -> Result<AssetView, TdsError> {
    shape(collection, hit, AssetView::Simulation)
}

pub fn shape_workflow(collection: &str, hit: Hit) -> Result<AssetView, TdsError> {
    shape(collection, hit, AssetView::Workflow)
}

pub fn shape_artifact(collection: &str, hit: Hit) -> Result<AssetView, TdsError> {
    shape(collection, hit, AssetView::Artifact)
}
