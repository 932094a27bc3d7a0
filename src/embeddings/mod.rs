pub mod openai;

pub use openai::EmbeddingClient;

use crate::Result;

/// Maps a batch of texts to fixed-dimension vectors.
///
/// Implementations return exactly one vector per input text, in input order,
/// with a constant dimensionality for a given configuration.
pub trait Embedder {
    fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;
}
