//! Vector math over half-precision embeddings.
//!
//! Embeddings are stored as `f16` to halve their footprint; all arithmetic is
//! done in `f32`.
use half::f16;

/// Cosine similarity of two vectors.
///
/// Returns `0.0` when the lengths differ or either vector has zero norm, so a
/// malformed vector never ranks above a well-formed one.
pub fn cosine_similarity(a: &[f16], b: &[f16]) -> f32 {
    if a.len() != b.len() {
        return 0.0;
    }

    let dot_product: f32 = a
        .iter()
        .zip(b.iter())
        .map(|(x, y)| f32::from(*x) * f32::from(*y))
        .sum();

    let norm_a = l2_norm(a);
    let norm_b = l2_norm(b);

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    dot_product / (norm_a * norm_b)
}

pub fn l2_norm(v: &[f16]) -> f32 {
    v.iter().map(|x| f32::from(*x).powi(2)).sum::<f32>().sqrt()
}

/// Converts an `f32` vector to `f16`, scaling it to unit length first when
/// `normalize` is set. Zero vectors are left as they are.
pub fn to_f16(values: &[f32], normalize: bool) -> Vec<f16> {
    let norm = if normalize {
        values.iter().map(|x| x * x).sum::<f32>().sqrt()
    } else {
        0.0
    };

    if norm > 0.0 {
        values.iter().map(|x| f16::from_f32(x / norm)).collect()
    } else {
        values.iter().copied().map(f16::from_f32).collect()
    }
}

/// Scales an `f16` vector to unit length in place.
pub fn normalize(v: &mut [f16]) {
    let norm = l2_norm(v);
    if norm > 0.0 {
        for value in v.iter_mut() {
            *value = f16::from_f32(f32::from(*value) / norm);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn v(values: &[f32]) -> Vec<f16> {
        values.iter().copied().map(f16::from_f32).collect()
    }

    #[test]
    fn test_cosine_similarity() {
        assert!((cosine_similarity(&v(&[1.0, 0.0]), &v(&[1.0, 0.0])) - 1.0).abs() < 1e-3);
        assert!(cosine_similarity(&v(&[1.0, 0.0]), &v(&[0.0, 1.0])).abs() < 1e-3);
        assert!((cosine_similarity(&v(&[1.0, 0.0]), &v(&[-1.0, 0.0])) + 1.0).abs() < 1e-3);
        let sim = cosine_similarity(&v(&[0.8, 0.6]), &v(&[1.0, 0.0]));
        assert!((sim - 0.8).abs() < 1e-3);
    }

    #[test]
    fn test_cosine_degenerate_inputs() {
        assert_eq!(cosine_similarity(&v(&[1.0, 0.0]), &v(&[1.0])), 0.0);
        assert_eq!(cosine_similarity(&v(&[0.0, 0.0]), &v(&[1.0, 0.0])), 0.0);
        assert_eq!(cosine_similarity(&[], &[]), 0.0);
    }

    #[test]
    fn test_to_f16_normalizes() {
        let out = to_f16(&[3.0, 4.0], true);
        assert!((l2_norm(&out) - 1.0).abs() < 1e-3);
        assert!((f32::from(out[0]) - 0.6).abs() < 1e-3);

        let raw = to_f16(&[3.0, 4.0], false);
        assert_eq!(f32::from(raw[1]), 4.0);

        let zero = to_f16(&[0.0, 0.0], true);
        assert_eq!(l2_norm(&zero), 0.0);
    }

    #[test]
    fn test_normalize_in_place() {
        let mut values = v(&[0.0, 2.0, 0.0]);
        normalize(&mut values);
        assert_eq!(f32::from(values[1]), 1.0);
    }
}
