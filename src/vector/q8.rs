//! Per-vector symmetric int8 codes for centroid residuals.

use super::Metric;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct QuantizedVec {
    pub scale: f32,
    pub data: Vec<i8>,
}

impl QuantizedVec {
    pub fn new(scale: f32, data: Vec<i8>) -> Self {
        Self { scale, data }
    }

    pub fn dims(&self) -> usize {
        self.data.len()
    }

    /// Writes `scale * code` into `out`.
    pub fn dequantize_into(&self, out: &mut [f32]) {
        debug_assert_eq!(out.len(), self.data.len());
        for (dst, &q) in out.iter_mut().zip(self.data.iter()) {
            *dst = q as f32 * self.scale;
        }
    }
}

pub fn quantize_per_vector(vec: &[f32]) -> QuantizedVec {
    let max_abs = vec.iter().fold(0.0f32, |acc, x| acc.max(x.abs()));
    let scale = if max_abs <= f32::EPSILON {
        1.0
    } else {
        max_abs / 127.0
    };
    let data = vec
        .iter()
        .map(|&x| (x / scale).round().clamp(-127.0, 127.0) as i8)
        .collect();
    QuantizedVec::new(scale, data)
}

/// Code for `vector - centroid`.
pub fn encode_residual(vector: &[f32], centroid: &[f32]) -> QuantizedVec {
    debug_assert_eq!(vector.len(), centroid.len());
    let residual: Vec<f32> = vector
        .iter()
        .zip(centroid.iter())
        .map(|(v, c)| v - c)
        .collect();
    quantize_per_vector(&residual)
}

/// Rebuilds `centroid + residual` into `out`.
pub fn reconstruct_into(code: &QuantizedVec, centroid: &[f32], out: &mut [f32]) {
    code.dequantize_into(out);
    for (dst, &c) in out.iter_mut().zip(centroid.iter()) {
        *dst += c;
    }
}

/// Approximate distance from `query` to the vector behind `code`, using
/// `scratch` (length `D`) as the reconstruction buffer.
pub fn approx_distance(
    metric: Metric,
    query: &[f32],
    centroid: &[f32],
    code: &QuantizedVec,
    scratch: &mut [f32],
) -> f32 {
    reconstruct_into(code, centroid, scratch);
    metric.distance(query, scratch)
}
