//! Appearance embeddings and the cosine metric shared by tracking and identity resolution.

use ndarray::Array1;
use serde::{Deserialize, Serialize};

/// Fixed-size appearance feature vector produced by the detector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "Vec<f32>", into = "Vec<f32>")]
pub struct Embedding(Array1<f32>);

impl Embedding {
    pub fn new(values: Vec<f32>) -> Self {
        Self(Array1::from_vec(values))
    }

    #[inline]
    pub fn dim(&self) -> usize {
        self.0.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_slice(&self) -> &[f32] {
        self.0.as_slice().unwrap_or_default()
    }

    pub fn norm(&self) -> f32 {
        self.0.dot(&self.0).sqrt()
    }

    pub fn is_finite(&self) -> bool {
        self.0.iter().all(|v| v.is_finite())
    }

    /// Unit-length copy, or `None` for a zero vector.
    pub fn normalized(&self) -> Option<Embedding> {
        let norm = self.norm();
        (norm > f32::EPSILON && norm.is_finite()).then(|| Embedding(&self.0 / norm))
    }

    /// Cosine distance `1 - cos(a, b)` in `[0, 2]`.
    ///
    /// `None` when dimensions differ or either vector has zero length.
    pub fn cosine_distance(&self, other: &Embedding) -> Option<f32> {
        if self.dim() != other.dim() || self.is_empty() {
            return None;
        }
        let denom = self.norm() * other.norm();
        if denom <= f32::EPSILON || !denom.is_finite() {
            return None;
        }
        let cos = self.0.dot(&other.0) / denom;
        Some((1.0 - cos).clamp(0.0, 2.0))
    }
}

impl From<Vec<f32>> for Embedding {
    fn from(values: Vec<f32>) -> Self {
        Self::new(values)
    }
}

impl From<Embedding> for Vec<f32> {
    fn from(embedding: Embedding) -> Self {
        embedding.0.to_vec()
    }
}

/// Running mean of unit-normalised embeddings.
///
/// Each sample carries equal weight; vectors of a different dimension than
/// the first accepted sample are ignored.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Centroid {
    mean: Option<Array1<f32>>,
    count: u32,
}

impl Centroid {
    /// Fold a sample in. Returns whether the centroid changed.
    pub fn push(&mut self, sample: &Embedding) -> bool {
        let Some(unit) = sample.normalized() else {
            return false;
        };
        match &mut self.mean {
            None => {
                self.mean = Some(unit.0);
                self.count = 1;
            }
            Some(mean) if mean.len() == unit.dim() => {
                self.count += 1;
                let n = self.count as f32;
                mean.zip_mut_with(&unit.0, |m, u| *m += (u - *m) / n);
            }
            Some(_) => return false,
        }
        true
    }

    pub fn count(&self) -> u32 {
        self.count
    }

    pub fn embedding(&self) -> Option<Embedding> {
        self.mean.clone().map(Embedding)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cosine_distance_extremes() {
        let a = Embedding::new(vec![1.0, 0.0]);
        let b = Embedding::new(vec![0.0, 1.0]);
        let c = Embedding::new(vec![-2.0, 0.0]);
        assert!(a.cosine_distance(&a).unwrap() < 1e-6);
        assert!((a.cosine_distance(&b).unwrap() - 1.0).abs() < 1e-6);
        assert!((a.cosine_distance(&c).unwrap() - 2.0).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_distance_rejects_bad_inputs() {
        let a = Embedding::new(vec![1.0, 0.0]);
        assert!(a.cosine_distance(&Embedding::new(vec![1.0, 0.0, 0.0])).is_none());
        assert!(a.cosine_distance(&Embedding::new(vec![0.0, 0.0])).is_none());
    }

    #[test]
    fn test_centroid_is_mean_of_unit_vectors() {
        let mut centroid = Centroid::default();
        assert!(centroid.push(&Embedding::new(vec![2.0, 0.0])));
        assert!(centroid.push(&Embedding::new(vec![0.0, 5.0])));
        assert!(!centroid.push(&Embedding::new(vec![0.0, 0.0])));
        assert!(!centroid.push(&Embedding::new(vec![1.0, 1.0, 1.0])));

        let mean = centroid.embedding().unwrap();
        assert_eq!(centroid.count(), 2);
        assert!((mean.as_slice()[0] - 0.5).abs() < 1e-6);
        assert!((mean.as_slice()[1] - 0.5).abs() < 1e-6);
    }
}
