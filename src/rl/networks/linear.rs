//! Dense layer
//!
//! Row-major `out x in` weights plus an `out` bias. The flat parameter view
//! (weights first, then bias) is what the optimizer and the finite-difference
//! estimator index into.

use rand::{Rng, RngCore};
use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Linear {
    pub rows: usize,
    pub cols: usize,
    pub weights: Vec<f64>,
    pub bias: Vec<f64>,
}

impl Linear {
    pub fn zeros(rows: usize, cols: usize) -> Self {
        Self {
            rows,
            cols,
            weights: vec![0.0; rows * cols],
            bias: vec![0.0; rows],
        }
    }

    /// Uniform init in [-scale, scale] with zero bias
    pub fn uniform<R: RngCore + ?Sized>(rows: usize, cols: usize, scale: f64, rng: &mut R) -> Self {
        let weights = (0..rows * cols)
            .map(|_| if scale > 0.0 { rng.gen_range(-scale..=scale) } else { 0.0 })
            .collect();
        Self {
            rows,
            cols,
            weights,
            bias: vec![0.0; rows],
        }
    }

    /// Glorot-style uniform init
    pub fn xavier<R: RngCore + ?Sized>(rows: usize, cols: usize, rng: &mut R) -> Self {
        let scale = (6.0 / (rows + cols) as f64).sqrt();
        Self::uniform(rows, cols, scale, rng)
    }

    pub fn with_bias(mut self, value: f64) -> Self {
        self.bias.iter_mut().for_each(|b| *b = value);
        self
    }

    /// y = W x + b
    pub fn forward(&self, input: &[f64]) -> Vec<f64> {
        debug_assert_eq!(input.len(), self.cols);
        self.weights
            .chunks_exact(self.cols.max(1))
            .zip(&self.bias)
            .map(|(row, b)| row.iter().zip(input).map(|(w, x)| w * x).sum::<f64>() + b)
            .collect()
    }

    /// Number of scalars in the flat view
    pub fn param_count(&self) -> usize {
        self.weights.len() + self.bias.len()
    }

    pub fn get(&self, index: usize) -> f64 {
        if index < self.weights.len() {
            self.weights[index]
        } else {
            self.bias[index - self.weights.len()]
        }
    }

    pub fn set(&mut self, index: usize, value: f64) {
        let n = self.weights.len();
        if index < n {
            self.weights[index] = value;
        } else {
            self.bias[index - n] = value;
        }
    }

    /// Apply `f(flat_index, &mut scalar)` to every parameter
    pub fn for_each_mut(&mut self, mut f: impl FnMut(usize, &mut f64)) {
        let n = self.weights.len();
        for (i, w) in self.weights.iter_mut().enumerate() {
            f(i, w);
        }
        for (i, b) in self.bias.iter_mut().enumerate() {
            f(n + i, b);
        }
    }

    pub fn is_finite(&self) -> bool {
        self.weights.iter().chain(&self.bias).all(|v| v.is_finite())
    }

    /// Check the stored shape against the expected one
    pub fn check_shape(&self, what: &str, rows: usize, cols: usize) -> Result<()> {
        if self.rows != rows || self.cols != cols {
            return Err(EngineError::ShapeMismatch {
                what: format!("{what} dims"),
                expected: rows * cols,
                actual: self.rows * self.cols,
            });
        }
        if self.weights.len() != rows * cols {
            return Err(EngineError::ShapeMismatch {
                what: format!("{what} weights"),
                expected: rows * cols,
                actual: self.weights.len(),
            });
        }
        if self.bias.len() != rows {
            return Err(EngineError::ShapeMismatch {
                what: format!("{what} bias"),
                expected: rows,
                actual: self.bias.len(),
            });
        }
        Ok(())
    }
}
