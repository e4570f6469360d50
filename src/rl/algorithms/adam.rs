//! Adam optimizer
//!
//! Per-group first/second moments with one shared timestep. Gradients are
//! L2-clipped per group before the step.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::warn;

use super::gradients::Gradients;
use crate::rl::networks::{ParamGroup, RecurrentPolicyValueModel};

pub const BETA1: f64 = 0.9;
pub const BETA2: f64 = 0.999;
pub const ADAM_EPSILON: f64 = 1e-8;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct Moments {
    m: Vec<f64>,
    v: Vec<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Adam {
    learning_rate: f64,
    max_grad_norm: f64,
    timestep: u64,
    moments: BTreeMap<ParamGroup, Moments>,
}

impl Adam {
    pub fn new(learning_rate: f64, max_grad_norm: f64) -> Self {
        Self {
            learning_rate,
            max_grad_norm,
            timestep: 0,
            moments: BTreeMap::new(),
        }
    }

    pub fn timestep(&self) -> u64 {
        self.timestep
    }

    pub fn learning_rate(&self) -> f64 {
        self.learning_rate
    }

    /// Clip each group, then apply one bias-corrected step to every group
    /// present in `grads`. Returns the global gradient norm before clipping.
    pub fn step(&mut self, model: &mut RecurrentPolicyValueModel, grads: &mut Gradients) -> f64 {
        self.timestep += 1;
        let t = self.timestep as i32;
        let bias1 = 1.0 - BETA1.powi(t);
        let bias2 = 1.0 - BETA2.powi(t);

        let mut total_sq = 0.0;
        for (group, grad) in grads.iter_mut() {
            let norm = clip_l2(grad, self.max_grad_norm);
            total_sq += norm * norm;

            let layer = model.group_mut(group);
            if layer.param_count() != grad.len() {
                warn!(
                    %group,
                    expected = layer.param_count(),
                    actual = grad.len(),
                    "gradient shape mismatch, skipping group"
                );
                continue;
            }
            let moments = self.moments.entry(group).or_insert_with(|| Moments {
                m: vec![0.0; grad.len()],
                v: vec![0.0; grad.len()],
            });
            if moments.m.len() != grad.len() {
                *moments = Moments {
                    m: vec![0.0; grad.len()],
                    v: vec![0.0; grad.len()],
                };
            }

            let lr = self.learning_rate;
            layer.for_each_mut(|i, param| {
                let g = grad[i];
                let m = &mut moments.m[i];
                let v = &mut moments.v[i];
                *m = BETA1 * *m + (1.0 - BETA1) * g;
                *v = BETA2 * *v + (1.0 - BETA2) * g * g;
                let m_hat = *m / bias1;
                let v_hat = *v / bias2;
                *param -= lr * m_hat / (v_hat.sqrt() + ADAM_EPSILON);
            });
        }
        total_sq.sqrt()
    }
}

/// Scale `grad` down to `max_norm` in L2; returns the norm before clipping.
/// Non-finite entries are zeroed first.
pub fn clip_l2(grad: &mut [f64], max_norm: f64) -> f64 {
    for g in grad.iter_mut() {
        if !g.is_finite() {
            *g = 0.0;
        }
    }
    let norm = grad.iter().map(|g| g * g).sum::<f64>().sqrt();
    if norm > max_norm && norm > 0.0 {
        let scale = max_norm / norm;
        grad.iter_mut().for_each(|g| *g *= scale);
    }
    norm
}
