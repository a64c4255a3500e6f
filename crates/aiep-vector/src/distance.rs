//! Cosine distance over `f32` vectors, accumulated in `f64`.

use crate::codec::decode_blob;

/// Cosine distance `1 - cos(a, b)`, in `[0, 2]`.
///
/// Returns `None` when the lengths differ, either side is empty, or either
/// side has zero magnitude.
pub fn cosine_distance(a: &[f32], b: &[f32]) -> Option<f64> {
    if a.len() != b.len() || a.is_empty() {
        return None;
    }

    let mut dot = 0.0f64;
    let mut mag_a = 0.0f64;
    let mut mag_b = 0.0f64;
    for (x, y) in a.iter().zip(b.iter()) {
        let (x, y) = (f64::from(*x), f64::from(*y));
        dot += x * y;
        mag_a += x * x;
        mag_b += y * y;
    }

    if mag_a == 0.0 || mag_b == 0.0 {
        return None;
    }

    let similarity = (dot / (mag_a.sqrt() * mag_b.sqrt())).clamp(-1.0, 1.0);
    Some(1.0 - similarity)
}

/// [`cosine_distance`] over two encoded blobs. Undecodable blobs yield `None`.
pub fn blob_cosine_distance(a: &[u8], b: &[u8]) -> Option<f64> {
    if a.len() != b.len() || a.is_empty() {
        return None;
    }
    let a = decode_blob(a).ok()?;
    let b = decode_blob(b).ok()?;
    cosine_distance(&a, &b)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::encode_blob;

    #[test]
    fn test_identical_vectors() {
        let v = vec![1.0, 2.0, 3.0];
        assert!(cosine_distance(&v, &v).unwrap().abs() < 1e-12);
    }

    #[test]
    fn test_orthogonal_vectors() {
        let d = cosine_distance(&[1.0, 0.0], &[0.0, 1.0]).unwrap();
        assert!((d - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_opposite_vectors() {
        let d = cosine_distance(&[1.0, 0.0], &[-1.0, 0.0]).unwrap();
        assert!((d - 2.0).abs() < 1e-12);
    }

    #[test]
    fn test_scale_invariant() {
        let d1 = cosine_distance(&[1.0, 2.0], &[3.0, 1.0]).unwrap();
        let d2 = cosine_distance(&[10.0, 20.0], &[0.3, 0.1]).unwrap();
        assert!((d1 - d2).abs() < 1e-9);
    }

    #[test]
    fn test_undefined_cases() {
        assert_eq!(cosine_distance(&[1.0], &[1.0, 2.0]), None);
        assert_eq!(cosine_distance(&[], &[]), None);
        assert_eq!(cosine_distance(&[0.0, 0.0], &[1.0, 0.0]), None);
    }

    #[test]
    fn test_blob_distance_matches_slice_distance() {
        let a = [0.3f32, -0.2, 0.9];
        let b = [0.1f32, 0.4, 0.5];
        let expected = cosine_distance(&a, &b).unwrap();
        let actual = blob_cosine_distance(&encode_blob(&a), &encode_blob(&b)).unwrap();
        assert_eq!(actual, expected);
    }

    #[test]
    fn test_blob_distance_rejects_ragged_input() {
        assert_eq!(blob_cosine_distance(&[0u8; 6], &[0u8; 6]), None);
        assert_eq!(blob_cosine_distance(&[], &[]), None);
    }
}
