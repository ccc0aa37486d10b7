use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use switchboard_core::normalize_key;
use tracing::{debug, warn};

use crate::cache::EmbeddingCache;
use crate::fallback::HashEmbeddingModel;
use crate::similarity::l2_normalize;
use crate::{EmbeddingModel, EmbeddingProvider};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EmbeddingSource {
    Cache,
    Provider,
    Fallback,
}

/// Which model produced a vector. Vectors from different spaces are never compared.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VectorSpace {
    Provider,
    Local,
}

#[derive(Debug, Clone, Serialize)]
pub struct EmbedderStats {
    pub provider: Option<String>,
    pub dims: usize,
    pub cache_entries: u64,
    pub provider_calls: u64,
    pub fallback_calls: u64,
}

/// Provider-backed embedding with a bounded cache and a synchronous local fallback.
///
/// Provider failures and timeouts never surface: the hashed fallback answers instead.
/// Fallback vectors are only cached when no provider is configured, so a recovered
/// provider is used again on the next call.
pub struct Embedder {
    provider: Option<Arc<dyn EmbeddingProvider>>,
    fallback: HashEmbeddingModel,
    cache: EmbeddingCache,
    timeout: Duration,
    provider_calls: AtomicU64,
    fallback_calls: AtomicU64,
}

impl Embedder {
    pub fn new(
        provider: Option<Arc<dyn EmbeddingProvider>>,
        dims: usize,
        cache_capacity: u64,
        timeout: Duration,
    ) -> Self {
        Self {
            provider,
            fallback: HashEmbeddingModel::new(dims),
            cache: EmbeddingCache::new(cache_capacity),
            timeout,
            provider_calls: AtomicU64::new(0),
            fallback_calls: AtomicU64::new(0),
        }
    }

    pub fn offline(dims: usize, cache_capacity: u64) -> Self {
        Self::new(None, dims, cache_capacity, Duration::from_secs(5))
    }

    pub fn has_provider(&self) -> bool {
        self.provider.is_some()
    }

    pub async fn embed(&self, text: &str) -> Arc<Vec<f32>> {
        self.embed_with_source(text).await.0
    }

    pub async fn embed_with_source(&self, text: &str) -> (Arc<Vec<f32>>, EmbeddingSource) {
        let key = normalize_key(text);
        if let Some(hit) = self.cache.get(&key) {
            return (hit, EmbeddingSource::Cache);
        }

        let Some(provider) = self.provider.as_ref() else {
            let embedding = self.fallback_embedding(&key);
            self.cache.insert(key, embedding.clone());
            return (embedding, EmbeddingSource::Fallback);
        };

        self.provider_calls.fetch_add(1, Ordering::Relaxed);
        let expected_dims = provider.dimensions();
        match tokio::time::timeout(self.timeout, provider.embed(&key)).await {
            Ok(Ok(mut vector))
                if vector.len() == expected_dims && vector.iter().all(|v| v.is_finite()) =>
            {
                l2_normalize(&mut vector);
                let embedding = Arc::new(vector);
                self.cache.insert(key, embedding.clone());
                debug!(provider = provider.name(), "embedding fetched from provider");
                (embedding, EmbeddingSource::Provider)
            }
            Ok(Ok(_)) => {
                warn!(
                    provider = provider.name(),
                    expected_dims,
                    "provider returned an unusable vector, using fallback"
                );
                (self.fallback_embedding(&key), EmbeddingSource::Fallback)
            }
            Ok(Err(err)) => {
                warn!(
                    provider = provider.name(),
                    error = %err,
                    "embedding provider failed, using fallback"
                );
                (self.fallback_embedding(&key), EmbeddingSource::Fallback)
            }
            Err(_) => {
                warn!(
                    provider = provider.name(),
                    timeout_ms = self.timeout.as_millis() as u64,
                    "embedding provider timed out, using fallback"
                );
                (self.fallback_embedding(&key), EmbeddingSource::Fallback)
            }
        }
    }

    /// Space of a vector returned by [`Embedder::embed_with_source`]. With a provider
    /// configured only provider vectors are cached.
    pub fn space(&self, source: EmbeddingSource) -> VectorSpace {
        match source {
            EmbeddingSource::Provider => VectorSpace::Provider,
            EmbeddingSource::Cache if self.has_provider() => VectorSpace::Provider,
            EmbeddingSource::Cache | EmbeddingSource::Fallback => VectorSpace::Local,
        }
    }

    /// Local model only: no provider call, no cache, no counters.
    pub fn embed_local(&self, text: &str) -> Arc<Vec<f32>> {
        Arc::new(self.fallback.embed(&normalize_key(text)))
    }

    pub fn cache_len(&self) -> u64 {
        self.cache.len()
    }

    pub fn stats(&self) -> EmbedderStats {
        EmbedderStats {
            provider: self.provider.as_ref().map(|p| p.name().to_string()),
            dims: self.fallback.dims(),
            cache_entries: self.cache.len(),
            provider_calls: self.provider_calls.load(Ordering::Relaxed),
            fallback_calls: self.fallback_calls.load(Ordering::Relaxed),
        }
    }

    fn fallback_embedding(&self, key: &str) -> Arc<Vec<f32>> {
        self.fallback_calls.fetch_add(1, Ordering::Relaxed);
        Arc::new(self.fallback.embed(key))
    }
}
