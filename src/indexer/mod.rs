
use std::path::Path;
use std::time::{Duration, Instant};

use tracing::{debug, info};

use crate::chunker::{Chunk, TextSplitter};
use crate::config::Config;
use crate::embeddings::Embedder;
use crate::index::{ChunkMetadata, HnswIndex};
use crate::scanner::DocumentSource;
use crate::{RepoQueryError, Result};

/// Outcome of a completed indexing run.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct IndexingStats {
    pub documents: usize,
    pub chunks: usize,
    pub embeddings: usize,
    pub duration: Duration,
}

/// Drives a full index build: scan, chunk, embed, insert, persist.
///
/// The build is all-or-nothing. Any stage failure aborts the run before the
/// save step, so a half-built index is never written to the output location.
pub struct IndexBuilder<'a, E> {
    config: &'a Config,
    embedder: E,
}

impl<'a, E: Embedder> IndexBuilder<'a, E> {
    #[inline]
    pub fn new(config: &'a Config, embedder: E) -> Self {
        Self { config, embedder }
    }

    /// Build an index over every document the source yields and persist it
    /// to `output`. `progress` receives human-readable stage descriptions.
    #[inline]
    pub fn build(
        &self,
        source: &dyn DocumentSource,
        output: &Path,
        mut progress: impl FnMut(&str),
    ) -> Result<IndexingStats> {
        let started = Instant::now();

        progress("Scanning repository");
        let documents = source.list_documents()?;
        info!("Scanned {} documents", documents.len());

        progress("Chunking documents");
        let splitter = TextSplitter::new(&self.config.chunking);
        let chunks: Vec<Chunk> = documents
            .iter()
            .flat_map(|doc| splitter.split_document(doc))
            .collect();
        info!("Produced {} chunks", chunks.len());

        let mut index = HnswIndex::new(self.config.index.clone());
        let mut embeddings = 0usize;

        let batch_size = self.config.openai.batch_size.max(1);
        let batch_count = chunks.len().div_ceil(batch_size);
        for (batch_number, batch) in chunks.chunks(batch_size).enumerate() {
            progress(&format!(
                "Embedding batch {}/{}",
                batch_number + 1,
                batch_count
            ));

            let texts: Vec<String> = batch.iter().map(|c| c.content.clone()).collect();
            let vectors = self.embedder.embed(&texts)?;
            if vectors.len() != batch.len() {
                return Err(RepoQueryError::Network(format!(
                    "embedding count mismatch: sent {} chunks, received {} vectors",
                    batch.len(),
                    vectors.len()
                )));
            }

            if batch_number == 0
                && let Some(vector) = vectors.first()
            {
                let expected = self.config.openai.embedding_dimension;
                if vector.len() != expected {
                    return Err(RepoQueryError::DimensionMismatch {
                        expected,
                        found: vector.len(),
                    });
                }
            }

            embeddings += vectors.len();
            for (chunk, vector) in batch.iter().zip(vectors) {
                index.insert(
                    vector,
                    chunk.content.clone(),
                    ChunkMetadata {
                        source_path: chunk.source_path.clone(),
                        sequence_index: chunk.sequence_index,
                    },
                )?;
            }
            debug!(
                "Embedded and inserted batch {}/{}",
                batch_number + 1,
                batch_count
            );
        }

        progress("Writing index");
        index.save(output)?;

        let stats = IndexingStats {
            documents: documents.len(),
            chunks: chunks.len(),
            embeddings,
            duration: started.elapsed(),
        };
        info!(
            "Indexing finished: {} documents, {} chunks, {} embeddings in {:?}",
            stats.documents, stats.chunks, stats.embeddings, stats.duration
        );
        Ok(stats)
    }
}
