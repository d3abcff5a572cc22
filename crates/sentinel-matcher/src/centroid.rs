//! Centroid and similarity math for drift baselines
//!
//! A baseline is the arithmetic mean of the embeddings of a representative
//! query set. Cosine similarity against the centroid is what drift detection
//! scores; the mean is deliberately left unnormalized because cosine divides
//! by both norms anyway.

/// L2 norm of a vector
pub fn l2_norm(v: &[f32]) -> f32 {
    v.iter().map(|x| x * x).sum::<f32>().sqrt()
}

/// Arithmetic mean of a set of equal-dimension vectors.
///
/// Returns `None` for an empty input or mixed dimensions.
pub fn mean_centroid(vectors: &[Vec<f32>]) -> Option<Vec<f32>> {
    let first = vectors.first()?;
    let dim = first.len();

    let mut acc = vec![0.0f32; dim];
    for v in vectors {
        if v.len() != dim {
            return None;
        }
        for (slot, x) in acc.iter_mut().zip(v.iter()) {
            *slot += x;
        }
    }

    let n = vectors.len() as f32;
    for x in &mut acc {
        *x /= n;
    }

    Some(acc)
}

/// Cosine similarity between two equal-length vectors.
///
/// Returns `None` on dimension mismatch - callers must treat that as a
/// distinct outcome (stale baseline), never as zero drift.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> Option<f32> {
    if a.len() != b.len() {
        return None;
    }

    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm = l2_norm(a) * l2_norm(b);
    if norm == 0.0 {
        Some(0.0)
    } else {
        Some(dot / norm)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_l2_norm() {
        let v = vec![3.0, 4.0];
        assert!((l2_norm(&v) - 5.0).abs() < 1e-6);
    }

    #[test]
    fn test_mean_centroid_single() {
        let c = mean_centroid(&[vec![1.0, 0.0]]).unwrap();
        assert_eq!(c, vec![1.0, 0.0]);
    }

    #[test]
    fn test_mean_centroid_average() {
        let c = mean_centroid(&[vec![1.0, 0.0], vec![0.0, 1.0]]).unwrap();
        assert!((c[0] - 0.5).abs() < 1e-6);
        assert!((c[1] - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_mean_centroid_empty() {
        assert!(mean_centroid(&[]).is_none());
    }

    #[test]
    fn test_mean_centroid_mixed_dims() {
        assert!(mean_centroid(&[vec![1.0], vec![1.0, 2.0]]).is_none());
    }

    #[test]
    fn test_cosine_identical() {
        let v = vec![0.3, 0.5, 0.1];
        let sim = cosine_similarity(&v, &v).unwrap();
        assert!((sim - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_orthogonal() {
        let sim = cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).unwrap();
        assert!(sim.abs() < 1e-6);
    }

    #[test]
    fn test_cosine_dimension_mismatch() {
        assert!(cosine_similarity(&[1.0, 0.0], &[1.0]).is_none());
    }

    #[test]
    fn test_cosine_zero_vector() {
        let sim = cosine_similarity(&[0.0, 0.0], &[1.0, 1.0]).unwrap();
        assert_eq!(sim, 0.0);
    }

    #[test]
    fn test_member_close_to_centroid_of_itself() {
        let q = vec![0.2, 0.4, 0.9];
        let centroid = mean_centroid(&[q.clone()]).unwrap();
        let sim = cosine_similarity(&q, &centroid).unwrap();
        assert!(sim >= 1.0 - 1e-5);
    }
}
