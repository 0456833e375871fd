use serde::{Deserialize, Serialize};

/// A dense vector of `f32` features or embedding values
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(transparent)]
pub struct Vector {
    data: Vec<f32>,
}

impl Vector {
    #[inline]
    #[must_use]
    pub fn new(data: Vec<f32>) -> Self {
        Self { data }
    }

    #[inline]
    #[must_use]
    pub fn dim(&self) -> usize {
        self.data.len()
    }

    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    #[inline]
    #[must_use]
    pub fn as_slice(&self) -> &[f32] {
        &self.data
    }

    /// True when every component is finite.
    pub fn is_finite(&self) -> bool {
        self.data.iter().all(|x| x.is_finite())
    }

    /// Cosine similarity in [-1, 1]; `None` on dimension mismatch or a zero vector
    #[inline]
    pub fn cosine_similarity(&self, other: &Vector) -> Option<f32> {
        if self.dim() != other.dim() || self.is_empty() {
            return None;
        }

        let dot = dot_product(&self.data, &other.data);
        let norm_a = norm(&self.data);
        let norm_b = norm(&other.data);

        if norm_a <= f32::EPSILON || norm_b <= f32::EPSILON {
            return None;
        }

        Some((dot / (norm_a * norm_b)).clamp(-1.0, 1.0))
    }

    /// Euclidean distance; `None` on dimension mismatch
    #[inline]
    pub fn l2_distance(&self, other: &Vector) -> Option<f32> {
        if self.dim() != other.dim() {
            return None;
        }
        Some(l2_distance(&self.data, &other.data))
    }

    #[inline]
    pub fn norm(&self) -> f32 {
        norm(&self.data)
    }
}

impl From<Vec<f32>> for Vector {
    fn from(data: Vec<f32>) -> Self {
        Vector::new(data)
    }
}

// Two accumulators keep the adds pipelined on scalar targets.
#[inline]
pub fn dot_product(a: &[f32], b: &[f32]) -> f32 {
    let mut sum1 = 0.0f32;
    let mut sum2 = 0.0f32;
    let chunks = a.len() / 2;

    for i in 0..chunks {
        sum1 += a[2 * i] * b[2 * i];
        sum2 += a[2 * i + 1] * b[2 * i + 1];
    }
    if a.len() % 2 == 1 {
        let last = a.len() - 1;
        sum1 += a[last] * b[last];
    }

    sum1 + sum2
}

#[inline]
pub fn l2_distance(a: &[f32], b: &[f32]) -> f32 {
    let mut sum1 = 0.0f32;
    let mut sum2 = 0.0f32;
    let chunks = a.len() / 2;

    for i in 0..chunks {
        let d1 = a[2 * i] - b[2 * i];
        let d2 = a[2 * i + 1] - b[2 * i + 1];
        sum1 += d1 * d1;
        sum2 += d2 * d2;
    }
    if a.len() % 2 == 1 {
        let last = a.len() - 1;
        let d = a[last] - b[last];
        sum1 += d * d;
    }

    (sum1 + sum2).sqrt()
}

#[inline]
pub fn norm(v: &[f32]) -> f32 {
    dot_product(v, v).sqrt()
}
