use switchboard_core::tokenize;

use crate::similarity::l2_normalize;
use crate::EmbeddingModel;

/// Deterministic offline embedding: position-weighted counts of hashed tokens.
#[derive(Debug, Clone)]
pub struct HashEmbeddingModel {
    dims: usize,
}

impl HashEmbeddingModel {
    pub fn new(dims: usize) -> Self {
        Self { dims: dims.max(1) }
    }

    pub fn dims(&self) -> usize {
        self.dims
    }
}

impl EmbeddingModel for HashEmbeddingModel {
    fn model_name(&self) -> &'static str {
        "hash-fallback"
    }

    fn embed(&self, text: &str) -> Vec<f32> {
        let mut vec = vec![0.0_f32; self.dims];

        for (position, token) in tokenize(text).iter().enumerate() {
            let hash = fnv1a(token.as_bytes());
            let index = (hash % self.dims as u64) as usize;
            vec[index] += position_weight(position);
        }

        l2_normalize(&mut vec);
        vec
    }
}

fn position_weight(position: usize) -> f32 {
    1.0 / (1.0 + 0.1 * position as f32)
}

fn fnv1a(bytes: &[u8]) -> u64 {
    let mut hash: u64 = 0xcbf29ce484222325;
    for byte in bytes {
        hash ^= *byte as u64;
        hash = hash.wrapping_mul(0x100000001b3);
    }
    hash
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::similarity::cosine_similarity;

    #[test]
    fn deterministic_and_unit_length() {
        let model = HashEmbeddingModel::new(256);
        let a = model.embed("check stock levels");
        let b = model.embed("check stock levels");
        assert_eq!(a, b);
        assert_eq!(a.len(), 256);
        let norm = a.iter().map(|v| v * v).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
    }

    #[test]
    fn empty_text_is_zero_vector() {
        let model = HashEmbeddingModel::new(64);
        assert!(model.embed("").iter().all(|v| *v == 0.0));
    }

    #[test]
    fn earlier_tokens_weigh_more() {
        assert!(position_weight(0) > position_weight(1));
        assert!(position_weight(1) > position_weight(10));
    }

    #[test]
    fn shared_tokens_raise_similarity() {
        let model = HashEmbeddingModel::new(512);
        let base = model.embed("track order status");
        let close = model.embed("track my order status please");
        let far = model.embed("forecast revenue growth");
        assert!(cosine_similarity(&base, &close) > cosine_similarity(&base, &far));
    }
}
