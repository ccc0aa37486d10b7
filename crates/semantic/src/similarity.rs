/// Cosine similarity; 0 for mismatched lengths, empty input, or a zero-magnitude side.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.is_empty() || b.is_empty() || a.len() != b.len() {
        return 0.0;
    }

    let mut dot = 0.0;
    let mut a_norm = 0.0;
    let mut b_norm = 0.0;

    for (lhs, rhs) in a.iter().zip(b.iter()) {
        dot += lhs * rhs;
        a_norm += lhs * lhs;
        b_norm += rhs * rhs;
    }

    if a_norm == 0.0 || b_norm == 0.0 {
        return 0.0;
    }

    let similarity = dot / (a_norm.sqrt() * b_norm.sqrt());
    if similarity.is_finite() {
        similarity
    } else {
        0.0
    }
}

pub fn l2_normalize(values: &mut [f32]) {
    let norm = values.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > 0.0 && norm.is_finite() {
        for value in values.iter_mut() {
            *value /= norm;
        }
    }
}
