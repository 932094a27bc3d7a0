//! Directory persistence for [`HnswIndex`].
//!
//! An index is saved as four JSON artifacts: a header with the structural
//! parameters, the vector table, the per-layer adjacency lists, and the
//! per-node chunk metadata. Artifacts are staged in a temporary sibling
//! directory and renamed into place, so a failed save never leaves partial
//! state at the target location.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::Utc;
use rand::SeedableRng;
use rand::rngs::StdRng;
use serde::{Deserialize, Serialize};
use serde::de::DeserializeOwned;
use tracing::{debug, info};

use super::{HnswIndex, IndexConfig, Metric, Node};
use crate::{RepoQueryError, Result};

const FORMAT_VERSION: u32 = 1;

const HEADER_FILE: &str = "header.json";
const VECTORS_FILE: &str = "vectors.json";
const GRAPH_FILE: &str = "graph.json";
const METADATA_FILE: &str = "metadata.json";

#[derive(Debug, Serialize, Deserialize)]
struct Header {
    format_version: u32,
    dimension: usize,
    metric: Metric,
    max_connections: usize,
    ef_construction: usize,
    ef_search: usize,
    level_mult: f64,
    seed: u64,
    entry_point: Option<u32>,
    node_count: usize,
    created_at: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct NodeRecord {
    content: String,
    source_path: String,
    sequence_index: usize,
    level: usize,
}

impl HnswIndex {
    /// Serialize the full index to a directory, replacing any previous index
    /// at that path atomically.
    #[inline]
    pub fn save(&self, path: &Path) -> Result<()> {
        let staging = staging_dir(path)?;
        if staging.exists() {
            fs::remove_dir_all(&staging)?;
        }
        fs::create_dir_all(&staging)?;

        let result = self.write_artifacts(&staging).and_then(|()| {
            if path.exists() {
                fs::remove_dir_all(path)?;
            }
            fs::rename(&staging, path)?;
            Ok(())
        });

        if result.is_err() && staging.exists() {
            let _ = fs::remove_dir_all(&staging);
        }
        result?;

        info!("Saved index of {} nodes to {}", self.len(), path.display());
        Ok(())
    }

    fn write_artifacts(&self, dir: &Path) -> Result<()> {
        let header = Header {
            format_version: FORMAT_VERSION,
            dimension: self.dimension.unwrap_or(0),
            metric: self.config.metric,
            max_connections: self.config.max_connections,
            ef_construction: self.config.ef_construction,
            ef_search: self.config.ef_search,
            level_mult: self.config.level_mult(),
            seed: self.config.seed,
            entry_point: self.entry_point,
            node_count: self.nodes.len(),
            created_at: Utc::now().to_rfc3339(),
        };

        let vectors: Vec<&Vec<f32>> = self.nodes.iter().map(|n| &n.vector).collect();
        let graph: Vec<&Vec<Vec<u32>>> = self.nodes.iter().map(|n| &n.neighbors).collect();
        let metadata: Vec<NodeRecord> = self
            .nodes
            .iter()
            .map(|n| NodeRecord {
                content: n.content.clone(),
                source_path: n.metadata.source_path.clone(),
                sequence_index: n.metadata.sequence_index,
                level: n.level,
            })
            .collect();

        write_json(&dir.join(HEADER_FILE), &header)?;
        write_json(&dir.join(VECTORS_FILE), &vectors)?;
        write_json(&dir.join(GRAPH_FILE), &graph)?;
        write_json(&dir.join(METADATA_FILE), &metadata)?;
        Ok(())
    }

    /// Load a persisted index. Query results of the loaded index are
    /// equivalent to those of the index that was saved.
    #[inline]
    pub fn load(path: &Path) -> Result<Self> {
        if !path.is_dir() {
            return Err(RepoQueryError::Config(format!(
                "Index directory not found: {}",
                path.display()
            )));
        }

        let header: Header = read_json(&path.join(HEADER_FILE))?;
        if header.format_version != FORMAT_VERSION {
            return Err(RepoQueryError::IndexCorruption(format!(
                "unsupported index format version {}",
                header.format_version
            )));
        }

        let vectors: Vec<Vec<f32>> = read_json(&path.join(VECTORS_FILE))?;
        let graph: Vec<Vec<Vec<u32>>> = read_json(&path.join(GRAPH_FILE))?;
        let metadata: Vec<NodeRecord> = read_json(&path.join(METADATA_FILE))?;

        validate_artifacts(&header, &vectors, &graph, &metadata)?;

        let nodes: Vec<Node> = vectors
            .into_iter()
            .zip(graph)
            .zip(metadata)
            .map(|((vector, neighbors), record)| Node {
                vector,
                content: record.content,
                metadata: super::ChunkMetadata {
                    source_path: record.source_path,
                    sequence_index: record.sequence_index,
                },
                level: record.level,
                neighbors,
            })
            .collect();

        let config = IndexConfig {
            max_connections: header.max_connections,
            ef_construction: header.ef_construction,
            ef_search: header.ef_search,
            seed: header.seed,
            metric: header.metric,
        };

        debug!(
            "Loaded index of {} nodes (dimension {}) from {}",
            nodes.len(),
            header.dimension,
            path.display()
        );

        Ok(Self {
            config,
            dimension: (!nodes.is_empty()).then_some(header.dimension),
            nodes,
            entry_point: header.entry_point,
            rng: StdRng::seed_from_u64(header.seed),
        })
    }
}

fn validate_artifacts(
    header: &Header,
    vectors: &[Vec<f32>],
    graph: &[Vec<Vec<u32>>],
    metadata: &[NodeRecord],
) -> Result<()> {
    let count = header.node_count;
    if vectors.len() != count || graph.len() != count || metadata.len() != count {
        return Err(RepoQueryError::IndexCorruption(format!(
            "artifact lengths disagree with header node count {} (vectors {}, graph {}, metadata {})",
            count,
            vectors.len(),
            graph.len(),
            metadata.len()
        )));
    }

    if count > 0 && header.dimension == 0 {
        return Err(RepoQueryError::IndexCorruption(
            "header records a zero vector dimension for a non-empty index".to_string(),
        ));
    }

    for vector in vectors {
        if vector.len() != header.dimension {
            return Err(RepoQueryError::DimensionMismatch {
                expected: header.dimension,
                found: vector.len(),
            });
        }
    }

    for (id, (layers, record)) in graph.iter().zip(metadata).enumerate() {
        if layers.len() != record.level + 1 {
            return Err(RepoQueryError::IndexCorruption(format!(
                "node {} has {} adjacency layers but level {}",
                id,
                layers.len(),
                record.level
            )));
        }
        for layer in layers {
            for &neighbor in layer {
                if neighbor as usize >= count {
                    return Err(RepoQueryError::IndexCorruption(format!(
                        "node {} references missing node {}",
                        id, neighbor
                    )));
                }
            }
        }
    }

    match header.entry_point {
        Some(entry) if entry as usize >= count => {
            return Err(RepoQueryError::IndexCorruption(format!(
                "entry point {} references a missing node",
                entry
            )));
        }
        None if count > 0 => {
            return Err(RepoQueryError::IndexCorruption(
                "non-empty index has no entry point".to_string(),
            ));
        }
        _ => {}
    }

    Ok(())
}

fn staging_dir(path: &Path) -> Result<PathBuf> {
    let name = path.file_name().ok_or_else(|| {
        RepoQueryError::Config(format!(
            "Invalid index output path: {}",
            path.display()
        ))
    })?;
    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    fs::create_dir_all(parent)?;
    Ok(parent.join(format!(".{}.staging", name.to_string_lossy())))
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let json = serde_json::to_string(value)
        .map_err(|e| RepoQueryError::Index(format!("failed to serialize {}: {e}", path.display())))?;
    fs::write(path, json)?;
    Ok(())
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let raw = fs::read_to_string(path).map_err(|e| {
        RepoQueryError::IndexCorruption(format!("missing or unreadable {}: {e}", path.display()))
    })?;
    serde_json::from_str(&raw)
        .map_err(|e| RepoQueryError::IndexCorruption(format!("malformed {}: {e}", path.display())))
}
