//! Model parameter views and gradient math.
//!
//! Strategies never see a model architecture, only an ordered collection of
//! flat parameter groups. The "gradient" of a client is the element-wise
//! difference between its locally trained parameters and the global
//! parameters it started from, not a training-step gradient.

use serde::{Deserialize, Serialize};

use crate::{Result, SelectionError};

/// Read-only parameter state of a model, as ordered flat groups.
///
/// One group per model parameter tensor, flattened. Strategies read this;
/// they never mutate model weights.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelParams {
    groups: Vec<Vec<f32>>,
}

impl ModelParams {
    /// Create from ordered parameter groups.
    pub fn new(groups: Vec<Vec<f32>>) -> Self {
        Self { groups }
    }

    /// Create from a single flat parameter vector.
    pub fn from_flat(params: Vec<f32>) -> Self {
        Self {
            groups: vec![params],
        }
    }

    /// The ordered parameter groups.
    pub fn groups(&self) -> &[Vec<f32>] {
        &self.groups
    }

    /// Total number of parameters across all groups.
    pub fn num_parameters(&self) -> usize {
        self.groups.iter().map(Vec::len).sum()
    }

    /// Whether two models share group count and per-group lengths.
    pub fn same_shape(&self, other: &Self) -> bool {
        self.groups.len() == other.groups.len()
            && self
                .groups
                .iter()
                .zip(&other.groups)
                .all(|(a, b)| a.len() == b.len())
    }
}

/// Per-group gradient: `local - global`, element-wise.
///
/// Round-scoped: recomputed from scratch wherever it is needed, never cached
/// across rounds.
pub fn gradient(local: &ModelParams, global: &ModelParams) -> Result<Vec<Vec<f32>>> {
    if !local.same_shape(global) {
        return Err(SelectionError::ShapeMismatch);
    }
    Ok(local
        .groups
        .iter()
        .zip(&global.groups)
        .map(|(l, g)| l.iter().zip(g).map(|(lv, gv)| lv - gv).collect())
        .collect())
}

/// Dot product of two equally sized slices, accumulated in f64.
pub fn dot(a: &[f32], b: &[f32]) -> f64 {
    a.iter()
        .zip(b)
        .map(|(&x, &y)| f64::from(x) * f64::from(y))
        .sum()
}

/// Euclidean norm, accumulated in f64.
pub fn l2_norm(v: &[f32]) -> f64 {
    v.iter().map(|&x| f64::from(x) * f64::from(x)).sum::<f64>().sqrt()
}

/// Sum of squared element-wise differences, accumulated in f64.
pub fn squared_distance(a: &[f32], b: &[f32]) -> f64 {
    a.iter()
        .zip(b)
        .map(|(&x, &y)| {
            let d = f64::from(x) - f64::from(y);
            d * d
        })
        .sum()
}
