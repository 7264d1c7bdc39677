//! Distance metrics for vector similarity computation.
//!
//! All metrics produce a native distance where **lower is better**:
//! Cosine and InnerProduct share the negative-inner-product distance
//! (Cosine under the contract that inputs are pre-normalized), L2 uses
//! squared Euclidean distance. [`DistanceMetric::score`] converts a native
//! distance into the value reported to callers.

use serde::{Deserialize, Serialize};

/// Distance metric used for vector similarity. Fixed at collection creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DistanceMetric {
    /// Cosine similarity; inputs are expected to be pre-normalized.
    Cosine,
    /// Squared Euclidean distance.
    L2,
    /// Inner (dot) product.
    InnerProduct,
}

impl DistanceMetric {
    /// Native distance between two vectors. Lower is better for every metric.
    #[inline]
    pub fn distance(self, a: &[f32], b: &[f32]) -> f32 {
        match self {
            DistanceMetric::Cosine | DistanceMetric::InnerProduct => -dot_product(a, b),
            DistanceMetric::L2 => euclidean_sq(a, b),
        }
    }

    /// Converts a native distance into the caller-visible score.
    ///
    /// Cosine/InnerProduct report the (larger-is-better) inner product; L2
    /// reports the raw squared distance. Either way, result lists sorted by
    /// ascending native distance come out "best first".
    #[inline]
    pub fn score(self, distance: f32) -> f32 {
        match self {
            DistanceMetric::Cosine | DistanceMetric::InnerProduct => -distance,
            DistanceMetric::L2 => distance,
        }
    }

    /// One-byte tag used by the on-disk index format.
    pub(crate) fn tag(self) -> u8 {
        match self {
            DistanceMetric::Cosine => 0,
            DistanceMetric::L2 => 1,
            DistanceMetric::InnerProduct => 2,
        }
    }

    /// Inverse of [`tag`](Self::tag); `None` for unknown tags.
    pub(crate) fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            0 => Some(DistanceMetric::Cosine),
            1 => Some(DistanceMetric::L2),
            2 => Some(DistanceMetric::InnerProduct),
            _ => None,
        }
    }
}

/// Dot product of two equal-length f32 slices.
///
/// Four independent accumulators so the compiler can keep the loop in
/// vector registers.
#[inline]
pub fn dot_product(a: &[f32], b: &[f32]) -> f32 {
    debug_assert_eq!(a.len(), b.len());
    let chunks = a.len() & !3;
    let (mut s0, mut s1, mut s2, mut s3) = (0.0f32, 0.0f32, 0.0f32, 0.0f32);
    let mut i = 0;
    while i < chunks {
        s0 += a[i] * b[i];
        s1 += a[i + 1] * b[i + 1];
        s2 += a[i + 2] * b[i + 2];
        s3 += a[i + 3] * b[i + 3];
        i += 4;
    }
    let mut sum = (s0 + s1) + (s2 + s3);
    for j in chunks..a.len() {
        sum += a[j] * b[j];
    }
    sum
}

/// Squared Euclidean distance between two equal-length f32 slices.
#[inline]
pub fn euclidean_sq(a: &[f32], b: &[f32]) -> f32 {
    debug_assert_eq!(a.len(), b.len());
    let chunks = a.len() & !3;
    let (mut s0, mut s1, mut s2, mut s3) = (0.0f32, 0.0f32, 0.0f32, 0.0f32);
    let mut i = 0;
    while i < chunks {
        let d0 = a[i] - b[i];
        let d1 = a[i + 1] - b[i + 1];
        let d2 = a[i + 2] - b[i + 2];
        let d3 = a[i + 3] - b[i + 3];
        s0 += d0 * d0;
        s1 += d1 * d1;
        s2 += d2 * d2;
        s3 += d3 * d3;
        i += 4;
    }
    let mut sum = (s0 + s1) + (s2 + s3);
    for j in chunks..a.len() {
        let d = a[j] - b[j];
        sum += d * d;
    }
    sum
}
