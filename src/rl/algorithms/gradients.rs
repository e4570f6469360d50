//! Finite-Difference Gradients
//!
//! Central differences over selected parameter groups, evaluated on a
//! fixed-size rayon pool. Each worker perturbs a private copy of the one
//! group under study; the shared model is never written.

use std::collections::BTreeMap;
use std::sync::Arc;

use rayon::prelude::*;
use rayon::{ThreadPool, ThreadPoolBuilder};
use tracing::debug;

use crate::error::Result;
use crate::rl::config::GradientConfig;
use crate::rl::networks::{ParamGroup, ParamSource, PerturbedParams, RecurrentPolicyValueModel};

/// Gradient vectors keyed by parameter group, in the group's flat layout
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Gradients {
    groups: BTreeMap<ParamGroup, Vec<f64>>,
}

impl Gradients {
    pub fn insert(&mut self, group: ParamGroup, grad: Vec<f64>) {
        self.groups.insert(group, grad);
    }

    pub fn get(&self, group: ParamGroup) -> Option<&[f64]> {
        self.groups.get(&group).map(Vec::as_slice)
    }

    pub fn iter(&self) -> impl Iterator<Item = (ParamGroup, &Vec<f64>)> {
        self.groups.iter().map(|(g, v)| (*g, v))
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (ParamGroup, &mut Vec<f64>)> {
        self.groups.iter_mut().map(|(g, v)| (*g, v))
    }

    pub fn len(&self) -> usize {
        self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    /// L2 norm across every group
    pub fn global_norm(&self) -> f64 {
        self.groups
            .values()
            .flat_map(|g| g.iter())
            .map(|v| v * v)
            .sum::<f64>()
            .sqrt()
    }
}

/// Every `ceil(1 / rate)`-th index starting at `offset mod stride`
pub fn stride_indices(len: usize, rate: f64, offset: usize) -> Vec<usize> {
    if !(rate < 1.0) {
        return (0..len).collect();
    }
    let stride = ((1.0 / rate.max(f64::EPSILON)).ceil() as usize).max(1);
    (offset % stride..len).step_by(stride).collect()
}

pub struct GradientEstimator {
    config: GradientConfig,
    pool: Arc<ThreadPool>,
}

impl GradientEstimator {
    pub fn new(config: GradientConfig) -> Result<Self> {
        config.validate()?;
        let pool = ThreadPoolBuilder::new()
            .num_threads(config.workers)
            .thread_name(|i| format!("ppo-worker-{i}"))
            .build()?;
        Ok(Self {
            config,
            pool: Arc::new(pool),
        })
    }

    pub fn config(&self) -> &GradientConfig {
        &self.config
    }

    /// Shared worker pool, also used for parallel rollouts
    pub fn pool(&self) -> Arc<ThreadPool> {
        Arc::clone(&self.pool)
    }

    /// Actor heads and critic always; the LSTM only when enabled
    pub fn selected_groups(&self) -> Vec<ParamGroup> {
        ParamGroup::ALL
            .iter()
            .copied()
            .filter(|g| *g != ParamGroup::Lstm || self.config.include_lstm)
            .collect()
    }

    pub fn sample_rate(&self, group: ParamGroup, len: usize) -> f64 {
        if group == ParamGroup::Lstm {
            self.config.lstm_sample_rate
        } else if len > self.config.large_group_threshold {
            self.config.large_group_sample_rate
        } else {
            1.0
        }
    }

    /// Estimate `d loss / d theta` for every selected group.
    ///
    /// `loss` receives the perturbed parameters and the group being
    /// perturbed, so it can reuse anything the other groups determine.
    /// Unsampled scalars get a zero gradient. `offset` rotates which scalars
    /// a strided group samples; callers pass the optimizer timestep.
    pub fn estimate<F>(&self, model: &RecurrentPolicyValueModel, loss: F, offset: u64) -> Gradients
    where
        F: Fn(&dyn ParamSource, ParamGroup) -> f64 + Sync,
    {
        let eps = self.config.epsilon;
        let mut grads = Gradients::default();

        for group in self.selected_groups() {
            let base = model.group(group);
            let n = base.param_count();
            let indices = stride_indices(n, self.sample_rate(group, n), offset as usize);

            let partials: Vec<(usize, f64)> = self.pool.install(|| {
                indices
                    .par_iter()
                    .map_init(
                        || base.clone(),
                        |local, &i| {
                            let original = local.get(i);
                            local.set(i, original + eps);
                            let plus = loss(&PerturbedParams::new(model, group, &*local), group);
                            local.set(i, original - eps);
                            let minus = loss(&PerturbedParams::new(model, group, &*local), group);
                            local.set(i, original);
                            (i, (plus - minus) / (2.0 * eps))
                        },
                    )
                    .collect()
            });

            let mut grad = vec![0.0; n];
            for (i, g) in partials {
                grad[i] = if g.is_finite() { g } else { 0.0 };
            }
            debug!(%group, sampled = indices.len(), total = n, "finite-difference gradient");
            grads.insert(group, grad);
        }
        grads
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rl::config::ModelConfig;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn model() -> RecurrentPolicyValueModel {
        let config = ModelConfig {
            feature_size: 3,
            hidden_size: 4,
            sequence_length: 2,
        };
        RecurrentPolicyValueModel::new(&config, &mut StdRng::seed_from_u64(3)).unwrap()
    }

    fn estimator(include_lstm: bool) -> GradientEstimator {
        GradientEstimator::new(GradientConfig {
            include_lstm,
            workers: 2,
            ..GradientConfig::default()
        })
        .unwrap()
    }

    #[test]
    fn test_stride_indices() {
        assert_eq!(stride_indices(10, 0.25, 1), vec![1, 5, 9]);
        assert_eq!(stride_indices(10, 0.25, 5), vec![1, 5, 9]);
        assert_eq!(stride_indices(4, 1.0, 3), vec![0, 1, 2, 3]);
        assert_eq!(stride_indices(10, 0.5, 0), vec![0, 2, 4, 6, 8]);
    }

    #[test]
    fn test_quadratic_loss_gradient() {
        let model = model();
        let est = estimator(false);
        let loss = |p: &dyn ParamSource, _: ParamGroup| {
            let critic = p.group(ParamGroup::Critic);
            critic
                .weights
                .iter()
                .chain(&critic.bias)
                .map(|w| (w - 1.0).powi(2))
                .sum::<f64>()
        };
        let grads = est.estimate(&model, loss, 0);

        let critic = model.group(ParamGroup::Critic);
        let g = grads.get(ParamGroup::Critic).unwrap();
        for i in 0..critic.param_count() {
            assert!((g[i] - 2.0 * (critic.get(i) - 1.0)).abs() < 1e-6);
        }
        let head = grads.get(ParamGroup::ActorTpMean).unwrap();
        assert!(head.iter().all(|v| *v == 0.0));
        assert!(grads.get(ParamGroup::Lstm).is_none());
        assert_eq!(grads.len(), 8);
    }

    #[test]
    fn test_lstm_group_is_strided() {
        let model = model();
        let est = estimator(true);
        let loss =
            |p: &dyn ParamSource, _: ParamGroup| p.group(ParamGroup::Lstm).weights.iter().sum::<f64>();
        let grads = est.estimate(&model, loss, 0);

        let g = grads.get(ParamGroup::Lstm).unwrap();
        let n_weights = model.group(ParamGroup::Lstm).weights.len();
        // rate 0.1 -> stride 10 from offset 0
        for (i, v) in g.iter().enumerate().take(n_weights) {
            let expected = if i % 10 == 0 { 1.0 } else { 0.0 };
            assert!((v - expected).abs() < 1e-6);
        }
    }

    #[test]
    fn test_model_is_untouched() {
        let model = model();
        let copy = model.clone();
        let est = estimator(true);
        est.estimate(&model, |p, _| p.group(ParamGroup::Critic).bias[0], 7);
        assert_eq!(model, copy);
    }
}
