//! Diversity-maximizing selection via stochastic greedy facility location.
//!
//! Choosing the `n` clients whose gradients jointly cover the population's
//! gradient diversity is NP-hard; the facility-location objective — minimize
//! the sum, over all clients, of the distance to the nearest selected
//! representative — is submodular, so greedy selection carries the usual
//! `1 - 1/e` approximation. The stochastic variant evaluates each greedy
//! step on a random candidate pool instead of the whole remaining ground
//! set.

use rand::RngCore;

use crate::model::{gradient, squared_distance, ModelParams};
use crate::selector::{ClientSelector, SelectionContext, SelectionSignal};
use crate::{Result, SelectionError};

/// Greedy submodular-coverage selection over gradient dissimilarity.
///
/// Each round builds the full pairwise dissimilarity matrix (sum of squared
/// per-group differences between client gradients) and greedily picks the
/// candidate with the best marginal coverage gain. The matrix is round-scoped
/// and rebuilt from scratch on every `select` call.
#[derive(Debug, Clone)]
pub struct DiversityGreedySelector {
    subset_ratio: f64,
    baseline: Option<ModelParams>,
}

impl DiversityGreedySelector {
    /// Create a selector.
    ///
    /// `subset_ratio` controls the stochastic candidate pool: each greedy
    /// step draws `max(n, subset_ratio * total)` candidates. It is a
    /// required hyperparameter; `None` fails at construction, as does a
    /// ratio outside `(0, 1]`. A ratio of `1.0` makes the greedy fully
    /// deterministic.
    pub fn new(subset_ratio: Option<f64>) -> Result<Self> {
        let ratio =
            subset_ratio.ok_or(SelectionError::MissingHyperparameter("subset_ratio"))?;
        if !(ratio > 0.0 && ratio <= 1.0) {
            return Err(SelectionError::InvalidHyperparameter {
                name: "subset_ratio",
                reason: "must lie in (0, 1]",
            });
        }
        Ok(Self {
            subset_ratio: ratio,
            baseline: None,
        })
    }

    /// Pairwise gradient dissimilarity: symmetric, zero diagonal.
    fn dissimilarity_matrix(grads: &[Vec<Vec<f32>>]) -> Vec<Vec<f64>> {
        let n = grads.len();
        let mut matrix = vec![vec![0.0f64; n]; n];
        for i in 0..n {
            for j in (i + 1)..n {
                let d: f64 = grads[i]
                    .iter()
                    .zip(&grads[j])
                    .map(|(gi, gj)| squared_distance(gi, gj))
                    .sum();
                matrix[i][j] = d;
                matrix[j][i] = d;
            }
        }
        matrix
    }

    /// One full stochastic-greedy pass, returning selected row indices.
    ///
    /// Ties break toward the candidate seen first in pool order; when the
    /// pool is the whole remaining ground set (kept sorted) that is the
    /// lowest index, which keeps repeated runs reproducible.
    fn stochastic_greedy(
        &self,
        dissim: &[Vec<f64>],
        total: usize,
        n: usize,
        rng: &mut dyn RngCore,
    ) -> Vec<usize> {
        let mut ground: Vec<usize> = (0..total).collect();
        let mut selected = Vec::with_capacity(n);
        // Per-client distance to the nearest selected facility so far.
        let mut client_min: Vec<f64> = Vec::new();
        // The pool never starves the budget even for tiny ratios.
        let pool_size = n.max((self.subset_ratio * total as f64) as usize);

        for step in 0..n {
            let pool: Vec<usize> = if pool_size < ground.len() {
                rand::seq::index::sample(&mut *rng, ground.len(), pool_size)
                    .into_vec()
                    .into_iter()
                    .map(|i| ground[i])
                    .collect()
            } else {
                ground.clone()
            };

            let mut best: Option<(usize, f64)> = None;
            for &j in &pool {
                let coverage: f64 = if step == 0 {
                    (0..total).map(|i| dissim[i][j]).sum()
                } else {
                    (0..total).map(|i| client_min[i].min(dissim[i][j])).sum()
                };
                match best {
                    Some((_, current)) if coverage >= current => {}
                    _ => best = Some((j, coverage)),
                }
            }
            let Some((chosen, _)) = best else { break };

            if step == 0 {
                client_min = (0..total).map(|i| dissim[i][chosen]).collect();
            } else {
                for i in 0..total {
                    client_min[i] = client_min[i].min(dissim[i][chosen]);
                }
            }
            selected.push(chosen);
            ground.retain(|&v| v != chosen);
        }
        selected
    }
}

impl ClientSelector for DiversityGreedySelector {
    fn init(&mut self, global: &ModelParams) -> Result<()> {
        self.baseline = Some(global.clone());
        Ok(())
    }

    fn select(
        &mut self,
        ctx: &SelectionContext,
        client_ids: &[usize],
        signal: SelectionSignal<'_>,
        rng: &mut dyn RngCore,
    ) -> Result<Vec<usize>> {
        let n = ctx.effective_budget(client_ids.len());
        if n == 0 || client_ids.is_empty() {
            return Ok(Vec::new());
        }
        let SelectionSignal::LocalModels(locals) = signal else {
            return Err(SelectionError::MissingSignal("local models"));
        };
        if locals.len() != client_ids.len() {
            return Err(SelectionError::ShapeMismatch);
        }
        let baseline = self.baseline.as_ref().ok_or(SelectionError::NotInitialized)?;

        let grads: Vec<Vec<Vec<f32>>> = locals
            .iter()
            .map(|local| gradient(local, baseline))
            .collect::<Result<_>>()?;
        let dissim = Self::dissimilarity_matrix(&grads);
        let picked = self.stochastic_greedy(&dissim, client_ids.len(), n, rng);
        tracing::debug!(
            round = ctx.round,
            selected = picked.len(),
            "diversity greedy selection complete"
        );
        Ok(picked.into_iter().map(|p| client_ids[p]).collect())
    }
}
