mod cache;
mod embedder;
mod fallback;
mod matcher;
mod remote;
mod similarity;

use anyhow::Result;
use futures::future::BoxFuture;

pub use cache::EmbeddingCache;
pub use embedder::{Embedder, EmbedderStats, EmbeddingSource, VectorSpace};
pub use fallback::HashEmbeddingModel;
pub use matcher::SemanticMatcher;
pub use remote::HttpEmbeddingProvider;
pub use similarity::{cosine_similarity, l2_normalize};

/// In-process embedding model. Infallible and synchronous.
pub trait EmbeddingModel: Send + Sync {
    fn model_name(&self) -> &'static str;
    fn embed(&self, text: &str) -> Vec<f32>;
}

/// Remote embedding service reached over the network.
pub trait EmbeddingProvider: Send + Sync {
    fn name(&self) -> &str;
    /// Length every returned vector must have; others are treated as failures.
    fn dimensions(&self) -> usize;
    fn embed<'a>(&'a self, text: &'a str) -> BoxFuture<'a, Result<Vec<f32>>>;
}
