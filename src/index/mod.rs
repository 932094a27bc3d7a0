
pub mod persist;

use std::cmp::{Ordering, Reverse};
use std::collections::{BinaryHeap, HashSet};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{RepoQueryError, Result};

/// Distance metric used for similarity search. Fixed per index instance and
/// recorded in the persisted header; it must match how the vectors were
/// produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Metric {
    Cosine,
    Euclidean,
}

/// Build and search parameters for the proximity graph.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct IndexConfig {
    /// Maximum number of neighbors per node per layer (`M`).
    pub max_connections: usize,
    /// Beam width while collecting candidate neighbors during insert.
    pub ef_construction: usize,
    /// Beam width for the layer-0 search phase of a query.
    pub ef_search: usize,
    /// Seed for the layer-assignment RNG. Searches are deterministic for a
    /// fixed seed and insert order.
    pub seed: u64,
    pub metric: Metric,
}

impl Default for IndexConfig {
    #[inline]
    fn default() -> Self {
        Self {
            max_connections: 16,
            ef_construction: 100,
            ef_search: 64,
            seed: 0,
            metric: Metric::Cosine,
        }
    }
}

impl IndexConfig {
    /// Scale factor for the exponential layer distribution, `1 / ln(M)`.
    #[inline]
    pub fn level_mult(&self) -> f64 {
        1.0 / (self.max_connections.max(2) as f64).ln()
    }
}

/// Per-entry provenance stored alongside each vector.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkMetadata {
    pub source_path: String,
    pub sequence_index: usize,
}

/// One result of a k-NN query, ordered by ascending distance.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchHit {
    pub id: u32,
    pub distance: f32,
    pub content: String,
    pub metadata: ChunkMetadata,
}

#[derive(Debug, Clone)]
pub(crate) struct Node {
    pub(crate) vector: Vec<f32>,
    pub(crate) content: String,
    pub(crate) metadata: ChunkMetadata,
    pub(crate) level: usize,
    /// `neighbors[l]` holds this node's edges at layer `l`, for `l <= level`.
    pub(crate) neighbors: Vec<Vec<u32>>,
}

/// Hierarchical navigable proximity graph over chunk vectors.
///
/// Inserts mutate shared graph state and require a single writer; once built
/// (or loaded) the index is read-only and queries need no locking.
#[derive(Debug)]
pub struct HnswIndex {
    config: IndexConfig,
    dimension: Option<usize>,
    nodes: Vec<Node>,
    entry_point: Option<u32>,
    rng: StdRng,
}

/// A node id paired with its distance to some fixed base vector. Ordering is
/// by distance, then by id, so equal distances resolve in insertion order.
#[derive(Debug, Clone, Copy)]
struct Candidate {
    distance: f32,
    id: u32,
}

impl PartialEq for Candidate {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Candidate {}

impl PartialOrd for Candidate {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Candidate {
    fn cmp(&self, other: &Self) -> Ordering {
        self.distance
            .total_cmp(&other.distance)
            .then_with(|| self.id.cmp(&other.id))
    }
}

impl HnswIndex {
    #[inline]
    pub fn new(config: IndexConfig) -> Self {
        let rng = StdRng::seed_from_u64(config.seed);
        Self {
            config,
            dimension: None,
            nodes: Vec::new(),
            entry_point: None,
            rng,
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Dimensionality established by the first insert (or by loading), if any.
    #[inline]
    pub fn dimension(&self) -> Option<usize> {
        self.dimension
    }

    #[inline]
    pub fn config(&self) -> &IndexConfig {
        &self.config
    }

    /// Insert a vector with its chunk content and metadata, returning the
    /// assigned node id. The first insert fixes the index dimensionality;
    /// later inserts with a different dimensionality fail.
    #[inline]
    pub fn insert(
        &mut self,
        vector: Vec<f32>,
        content: String,
        metadata: ChunkMetadata,
    ) -> Result<u32> {
        match self.dimension {
            Some(expected) if expected != vector.len() => {
                return Err(RepoQueryError::DimensionMismatch {
                    expected,
                    found: vector.len(),
                });
            }
            None => {
                if vector.is_empty() {
                    return Err(RepoQueryError::Index(
                        "cannot insert a zero-length vector".to_string(),
                    ));
                }
                self.dimension = Some(vector.len());
            }
            Some(_) => {}
        }

        let id = u32::try_from(self.nodes.len())
            .map_err(|_| RepoQueryError::Index("index is full".to_string()))?;
        let level = self.random_level();

        self.nodes.push(Node {
            vector,
            content,
            metadata,
            level,
            neighbors: vec![Vec::new(); level + 1],
        });

        let Some(entry) = self.entry_point else {
            self.entry_point = Some(id);
            debug!("Inserted first node {} at level {}", id, level);
            return Ok(id);
        };

        let max_level = self.node(entry).level;
        let query = self.node(id).vector.clone();

        // Greedy descent with beam width 1 down to just above the new
        // node's top layer.
        let mut ep = entry;
        for layer in ((level + 1)..=max_level).rev() {
            ep = self.closest_at_layer(&query, ep, layer);
        }

        // From the new node's top layer down to layer 0, collect candidates
        // with a wide beam and wire up pruned bidirectional edges.
        for layer in (0..=level.min(max_level)).rev() {
            let candidates = self.search_layer(&query, &[ep], self.config.ef_construction, layer);
            ep = candidates.first().map_or(ep, |c| c.id);

            let selected = self.select_neighbors(candidates, self.config.max_connections);
            self.nodes[id as usize].neighbors[layer] =
                selected.iter().map(|c| c.id).collect();

            for candidate in selected {
                let list = &mut self.nodes[candidate.id as usize].neighbors[layer];
                list.push(id);
                if list.len() > self.config.max_connections {
                    self.prune_neighbors(candidate.id, layer);
                }
            }
        }

        if level > max_level {
            self.entry_point = Some(id);
            debug!("Node {} becomes the entry point at level {}", id, level);
        }

        Ok(id)
    }

    /// Approximate k-nearest-neighbor search. Returns up to `k` hits ordered
    /// by ascending distance, ties broken by insertion order. An empty index
    /// yields an empty result, not an error.
    #[inline]
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<SearchHit>> {
        if k == 0 {
            return Err(RepoQueryError::Index(
                "search requires k greater than zero".to_string(),
            ));
        }
        let Some(entry) = self.entry_point else {
            return Ok(Vec::new());
        };
        if let Some(expected) = self.dimension
            && expected != query.len()
        {
            return Err(RepoQueryError::DimensionMismatch {
                expected,
                found: query.len(),
            });
        }

        let mut ep = entry;
        for layer in (1..=self.node(entry).level).rev() {
            ep = self.closest_at_layer(query, ep, layer);
        }

        let ef = self.config.ef_search.max(k);
        let found = self.search_layer(query, &[ep], ef, 0);

        Ok(found
            .into_iter()
            .take(k)
            .map(|c| {
                let node = self.node(c.id);
                SearchHit {
                    id: c.id,
                    distance: c.distance,
                    content: node.content.clone(),
                    metadata: node.metadata.clone(),
                }
            })
            .collect())
    }

    fn node(&self, id: u32) -> &Node {
        &self.nodes[id as usize]
    }

    /// Draw a top layer from an exponential distribution scaled by
    /// `1 / ln(M)`; higher layers are exponentially sparser.
    fn random_level(&mut self) -> usize {
        let uniform: f64 = self.rng.random::<f64>();
        let uniform = uniform.max(f64::MIN_POSITIVE);
        (-uniform.ln() * self.config.level_mult()).floor() as usize
    }

    fn distance(&self, a: &[f32], b: &[f32]) -> f32 {
        match self.config.metric {
            Metric::Euclidean => {
                let mut sum = 0.0f32;
                for (x, y) in a.iter().zip(b) {
                    let diff = x - y;
                    sum += diff * diff;
                }
                sum.sqrt()
            }
            Metric::Cosine => {
                let mut dot = 0.0f32;
                let mut norm_a = 0.0f32;
                let mut norm_b = 0.0f32;
                for (x, y) in a.iter().zip(b) {
                    dot += x * y;
                    norm_a += x * x;
                    norm_b += y * y;
                }
                if norm_a == 0.0 || norm_b == 0.0 {
                    // Zero-norm vectors carry no direction; treat them as
                    // maximally distant instead of producing NaN.
                    return 2.0;
                }
                1.0 - dot / (norm_a.sqrt() * norm_b.sqrt())
            }
        }
    }

    fn dist_to(&self, query: &[f32], id: u32) -> f32 {
        self.distance(query, &self.node(id).vector)
    }

    /// Greedy walk at one layer: repeatedly move to the closest neighbor
    /// until no neighbor improves on the current node.
    fn closest_at_layer(&self, query: &[f32], mut current: u32, layer: usize) -> u32 {
        let mut best = self.dist_to(query, current);
        loop {
            let mut improved = false;
            for &neighbor in &self.node(current).neighbors[layer] {
                let d = self.dist_to(query, neighbor);
                if d < best {
                    best = d;
                    current = neighbor;
                    improved = true;
                }
            }
            if !improved {
                return current;
            }
        }
    }

    /// Beam search at one layer: expand the closest unvisited candidate until
    /// no candidate can improve the `ef` best results found so far. Returns
    /// candidates sorted by ascending distance.
    fn search_layer(&self, query: &[f32], entries: &[u32], ef: usize, layer: usize) -> Vec<Candidate> {
        let ef = ef.max(1);
        let mut visited: HashSet<u32> = entries.iter().copied().collect();
        // Min-heap of nodes still to expand, max-heap of the best results.
        let mut to_visit: BinaryHeap<Reverse<Candidate>> = BinaryHeap::new();
        let mut results: BinaryHeap<Candidate> = BinaryHeap::new();

        for &entry in entries {
            let candidate = Candidate {
                distance: self.dist_to(query, entry),
                id: entry,
            };
            to_visit.push(Reverse(candidate));
            results.push(candidate);
        }

        while let Some(Reverse(current)) = to_visit.pop() {
            if let Some(worst) = results.peek()
                && results.len() >= ef
                && current.distance > worst.distance
            {
                break;
            }

            for &neighbor in &self.node(current.id).neighbors[layer] {
                if !visited.insert(neighbor) {
                    continue;
                }
                let d = self.dist_to(query, neighbor);
                let within_beam = results.len() < ef
                    || results.peek().is_some_and(|worst| d < worst.distance);
                if within_beam {
                    let candidate = Candidate {
                        distance: d,
                        id: neighbor,
                    };
                    to_visit.push(Reverse(candidate));
                    results.push(candidate);
                    if results.len() > ef {
                        results.pop();
                    }
                }
            }
        }

        results.into_sorted_vec()
    }

    /// Choose up to `limit` neighbors from distance-sorted candidates,
    /// preferring diversity: a candidate is kept only if it is closer to the
    /// base vector than to every already-kept neighbor. Pruned candidates
    /// back-fill remaining slots so nodes stay well-connected.
    fn select_neighbors(&self, candidates: Vec<Candidate>, limit: usize) -> Vec<Candidate> {
        let mut selected: Vec<Candidate> = Vec::with_capacity(limit);
        let mut pruned: Vec<Candidate> = Vec::new();

        for candidate in candidates {
            if selected.len() >= limit {
                break;
            }
            let candidate_vec = &self.node(candidate.id).vector;
            let diverse = selected.iter().all(|kept| {
                self.distance(candidate_vec, &self.node(kept.id).vector) > candidate.distance
            });
            if diverse {
                selected.push(candidate);
            } else {
                pruned.push(candidate);
            }
        }

        for candidate in pruned {
            if selected.len() >= limit {
                break;
            }
            selected.push(candidate);
        }

        selected
    }

    /// Re-prune a node whose neighbor list grew past the maximum degree,
    /// evicting the least diverse or farthest edge.
    fn prune_neighbors(&mut self, id: u32, layer: usize) {
        let base = self.node(id).vector.clone();
        let mut candidates: Vec<Candidate> = self.node(id).neighbors[layer]
            .iter()
            .map(|&neighbor| Candidate {
                distance: self.dist_to(&base, neighbor),
                id: neighbor,
            })
            .collect();
        candidates.sort_unstable();

        let selected = self.select_neighbors(candidates, self.config.max_connections);
        self.nodes[id as usize].neighbors[layer] = selected.iter().map(|c| c.id).collect();
    }
}
