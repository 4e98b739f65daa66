//! Bandit selection over gradient-projection rewards.
//!
//! Every client is an arm. After a round, each selected client receives a
//! reward measuring how well its local gradient aligned with the direction
//! the global model actually moved, scaled by whether the round helped
//! (accuracy up, or loss down at equal accuracy). Selection takes the top
//! clients by upper-confidence-bound score.

use rand::RngCore;

use crate::model::{dot, gradient, l2_norm, ModelParams};
use crate::random::sample_clients;
use crate::selector::{ClientSelector, SelectionContext, SelectionSignal};
use crate::{Result, SelectionError};

/// Exploration weight of the UCB bonus term.
pub const UCB_ALPHA: f64 = 0.1;

/// Loss seed for the pre-training round, matching an untrained model.
const INITIAL_LOSS: f64 = 1e6;

/// UCB bandit over per-client gradient projections.
///
/// All per-client state lives in arrays indexed by client id in
/// `[0, total)`. Reward histories are append-only and never reset mid-run;
/// the projection estimate of a client is the arithmetic mean of its full
/// history, seeded with a single zero reward.
#[derive(Debug, Clone)]
pub struct BanditProjectionSelector {
    total: usize,
    rewards: Vec<Vec<f64>>,
    proj: Vec<f64>,
    selected_count: Vec<u64>,
    update_count: u64,
    accuracy_history: Vec<f64>,
    loss_history: Vec<f64>,
    baseline: Option<ModelParams>,
}

impl BanditProjectionSelector {
    /// Create a bandit over a population of `total` clients.
    pub fn new(total: usize) -> Self {
        Self {
            total,
            rewards: vec![vec![0.0]; total],
            proj: vec![0.0; total],
            selected_count: vec![0; total],
            update_count: 0,
            accuracy_history: vec![0.0],
            loss_history: vec![INITIAL_LOSS],
            baseline: None,
        }
    }

    /// Read-only snapshot of how often each client has been selected.
    pub fn selection_counts(&self) -> &[u64] {
        &self.selected_count
    }

    /// Read-only snapshot of the per-client projection estimates.
    pub fn projection_estimates(&self) -> &[f64] {
        &self.proj
    }

    /// Number of selection rounds observed so far.
    pub fn update_count(&self) -> u64 {
        self.update_count
    }

    /// Feedback hook: fold a completed round into the reward state.
    ///
    /// `selected` are the ids chosen this round, `local_models` their
    /// trained models in the same order, `global_after` the aggregated
    /// global model, and `accuracy`/`loss` the global metrics observed after
    /// the round. The baseline handed to [`ClientSelector::init`] before the
    /// round is the "previous" global model for all gradients.
    pub fn post_update(
        &mut self,
        selected: &[usize],
        local_models: &[ModelParams],
        global_after: &ModelParams,
        accuracy: f64,
        loss: f64,
    ) -> Result<()> {
        if selected.len() != local_models.len() {
            return Err(SelectionError::ShapeMismatch);
        }
        if let Some(&bad) = selected.iter().find(|&&c| c >= self.total) {
            return Err(SelectionError::UnknownClient(bad));
        }
        let baseline = self.baseline.as_ref().ok_or(SelectionError::NotInitialized)?;

        self.accuracy_history.push(accuracy);
        self.loss_history.push(loss);
        let improved = self.improvement_signal();

        let global_grad = gradient(global_after, baseline)?;
        let norms: Vec<f64> = global_grad.iter().map(|g| l2_norm(g)).collect();

        let mut projections = Vec::with_capacity(selected.len());
        for local in local_models {
            let local_grad = gradient(local, baseline)?;
            let mut acc = 0.0;
            for ((l, g), &norm) in local_grad.iter().zip(&global_grad).zip(&norms) {
                // A zero-norm global group carries no direction; it
                // contributes nothing instead of poisoning the mean.
                if norm > 0.0 {
                    acc += dot(l, g) / norm;
                }
            }
            let groups = global_grad.len();
            projections.push(if groups == 0 { 0.0 } else { acc / groups as f64 });
        }

        let weights = softmax(&projections);
        for (&client, &w) in selected.iter().zip(&weights) {
            self.rewards[client].push(w * improved);
        }
        for client in 0..self.total {
            let history = &self.rewards[client];
            self.proj[client] = history.iter().sum::<f64>() / history.len() as f64;
        }
        tracing::debug!(improved, selected = selected.len(), "bandit rewards updated");
        Ok(())
    }

    /// Compare the two most recent (accuracy, loss) observations.
    fn improvement_signal(&self) -> f64 {
        let n = self.accuracy_history.len();
        let (acc_prev, acc_cur) = (self.accuracy_history[n - 2], self.accuracy_history[n - 1]);
        let (loss_prev, loss_cur) = (self.loss_history[n - 2], self.loss_history[n - 1]);
        if acc_cur > acc_prev {
            1.0
        } else if acc_cur < acc_prev {
            -1.0
        } else if loss_cur < loss_prev {
            0.5
        } else if loss_cur > loss_prev {
            -0.5
        } else {
            0.0
        }
    }

    /// UCB score for one client at the current round count.
    ///
    /// A never-selected client gets an unbounded bonus so every arm is
    /// explored before the confidence formula applies; this is the explicit
    /// policy for the otherwise-undefined division by a zero count.
    fn ucb_score(&self, client: usize) -> f64 {
        let count = self.selected_count[client];
        if count == 0 {
            return f64::INFINITY;
        }
        let t = self.update_count as f64;
        self.proj[client] + UCB_ALPHA * (2.0 * t.ln() / count as f64).sqrt()
    }
}

/// Numerically stable softmax.
fn softmax(xs: &[f64]) -> Vec<f64> {
    if xs.is_empty() {
        return Vec::new();
    }
    let max = xs.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
    let exps: Vec<f64> = xs.iter().map(|&x| (x - max).exp()).collect();
    let sum: f64 = exps.iter().sum();
    exps.into_iter().map(|e| e / sum).collect()
}

impl ClientSelector for BanditProjectionSelector {
    fn init(&mut self, global: &ModelParams) -> Result<()> {
        self.baseline = Some(global.clone());
        Ok(())
    }

    fn select(
        &mut self,
        ctx: &SelectionContext,
        client_ids: &[usize],
        _signal: SelectionSignal<'_>,
        rng: &mut dyn RngCore,
    ) -> Result<Vec<usize>> {
        let n = ctx.effective_budget(client_ids.len());
        if let Some(&bad) = client_ids.iter().find(|&&c| c >= self.total) {
            return Err(SelectionError::UnknownClient(bad));
        }
        let picked: Vec<usize> = if self.update_count == 0 {
            // Cold start: no reward signal yet.
            sample_clients(rng, client_ids, n)
        } else {
            let mut scored = Vec::with_capacity(client_ids.len());
            for &client in client_ids {
                scored.push((client, self.ucb_score(client)));
            }
            // Descending score; equal scores (including tied infinities)
            // break toward the lowest id for reproducibility.
            scored.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));
            scored.into_iter().take(n).map(|(client, _)| client).collect()
        };

        for &client in &picked {
            self.selected_count[client] += 1;
        }
        self.update_count += 1;
        tracing::debug!(
            round = ctx.round,
            update_count = self.update_count,
            selected = picked.len(),
            "bandit selection complete"
        );
        Ok(picked)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn flat(v: Vec<f32>) -> ModelParams {
        ModelParams::from_flat(v)
    }

    #[test]
    fn softmax_sums_to_one_and_preserves_order() {
        let w = softmax(&[2.0, 0.1, -1.0]);
        assert!((w.iter().sum::<f64>() - 1.0).abs() < 1e-12);
        assert!(w[0] > w[1] && w[1] > w[2]);
        assert!(softmax(&[]).is_empty());
    }

    #[test]
    fn cold_start_is_roughly_uniform() {
        let ids: Vec<usize> = (0..10).collect();
        let ctx = SelectionContext::new(10, 2, 0);
        let mut hits = [0u32; 10];
        for seed in 0..400u64 {
            let mut bandit = BanditProjectionSelector::new(10);
            bandit.init(&flat(vec![0.0])).unwrap();
            let mut rng = StdRng::seed_from_u64(seed);
            for &c in &bandit
                .select(&ctx, &ids, SelectionSignal::None, &mut rng)
                .unwrap()
            {
                hits[c] += 1;
            }
        }
        // 800 draws over 10 clients: expect ~80 each; allow a wide band.
        for &h in &hits {
            assert!((40..=140).contains(&h), "marginal frequency {h} out of band");
        }
    }

    #[test]
    fn update_counter_increments_once_per_call() {
        let mut bandit = BanditProjectionSelector::new(4);
        bandit.init(&flat(vec![0.0])).unwrap();
        let mut rng = StdRng::seed_from_u64(0);
        let ids = [0, 1, 2, 3];
        for round in 0..3 {
            let ctx = SelectionContext::new(4, 2, round);
            bandit
                .select(&ctx, &ids, SelectionSignal::None, &mut rng)
                .unwrap();
        }
        assert_eq!(bandit.update_count(), 3);
    }

    #[test]
    fn zero_count_clients_get_unbounded_bonus() {
        let mut bandit = BanditProjectionSelector::new(3);
        bandit.update_count = 5;
        bandit.selected_count = vec![0, 2, 1];
        bandit.proj = vec![-10.0, 3.0, 3.0];
        assert!(bandit.ucb_score(0).is_infinite());
        assert!(bandit.ucb_score(1).is_finite());
        // Equal estimates: the less-sampled arm scores higher.
        assert!(bandit.ucb_score(2) > bandit.ucb_score(1));
    }

    #[test]
    fn reward_bookkeeping_matches_exact_running_mean() {
        let mut bandit = BanditProjectionSelector::new(2);
        let global_before = flat(vec![0.0, 0.0]);
        let global_after = flat(vec![1.0, 0.0]);
        bandit.init(&global_before).unwrap();

        // Projections onto the global move [1, 0] (norm 1): p0 = 2.0,
        // p1 = 0.5. Accuracy rises, so improved = +1.
        let locals = vec![flat(vec![2.0, 0.0]), flat(vec![0.5, 3.0])];
        bandit
            .post_update(&[0, 1], &locals, &global_after, 0.6, 1.0)
            .unwrap();

        let e0 = (2.0f64).exp();
        let e1 = (0.5f64).exp();
        let w0 = e0 / (e0 + e1);
        let w1 = e1 / (e0 + e1);
        assert!(w0 > w1, "higher projection must earn the larger reward");

        let est = bandit.projection_estimates();
        assert!((est[0] - (0.0 + w0) / 2.0).abs() < 1e-12);
        assert!((est[1] - (0.0 + w1) / 2.0).abs() < 1e-12);

        // Two more synthetic rounds for client 0 only.
        bandit.init(&global_before).unwrap();
        bandit
            .post_update(&[0], &[flat(vec![1.0, 0.0])], &global_after, 0.7, 0.9)
            .unwrap();
        bandit.init(&global_before).unwrap();
        bandit
            .post_update(&[0], &[flat(vec![1.0, 0.0])], &global_after, 0.7, 0.8)
            .unwrap();
        // Rewards: seed 0, then w0, then softmax of a singleton (= 1.0)
        // scaled by +1, then by +0.5 (equal accuracy, lower loss).
        let expected = (0.0 + w0 + 1.0 + 0.5) / 4.0;
        assert!((bandit.projection_estimates()[0] - expected).abs() < 1e-12);
    }

    #[test]
    fn worse_accuracy_flips_reward_sign() {
        let mut bandit = BanditProjectionSelector::new(1);
        bandit.init(&flat(vec![0.0])).unwrap();
        bandit
            .post_update(&[0], &[flat(vec![1.0])], &flat(vec![1.0]), 0.5, 1.0)
            .unwrap();
        // Accuracy drops: improved = -1, so the new reward is -1.0.
        bandit.init(&flat(vec![0.0])).unwrap();
        bandit
            .post_update(&[0], &[flat(vec![1.0])], &flat(vec![1.0]), 0.4, 1.0)
            .unwrap();
        let est = bandit.projection_estimates()[0];
        assert!((est - (0.0 + 1.0 - 1.0) / 3.0).abs() < 1e-12);
    }

    #[test]
    fn consistently_rewarded_client_dominates_selection_counts() {
        let total = 4;
        let ids: Vec<usize> = (0..total).collect();
        let mut bandit = BanditProjectionSelector::new(total);
        let mut rng = StdRng::seed_from_u64(11);
        let global_before = flat(vec![0.0, 0.0]);
        let global_after = flat(vec![1.0, 0.0]);

        for round in 0..16u64 {
            bandit.init(&global_before).unwrap();
            let ctx = SelectionContext::new(total, 2, round);
            let picked = bandit
                .select(&ctx, &ids, SelectionSignal::None, &mut rng)
                .unwrap();
            // Client 0's gradient aligns strongly with the global move;
            // everyone else barely moves. Accuracy always improves.
            let locals: Vec<ModelParams> = picked
                .iter()
                .map(|&c| {
                    if c == 0 {
                        flat(vec![2.0, 0.0])
                    } else {
                        flat(vec![0.1, 0.0])
                    }
                })
                .collect();
            bandit
                .post_update(&picked, &locals, &global_after, round as f64 + 1.0, 1.0)
                .unwrap();
        }

        let counts = bandit.selection_counts();
        for other in 1..total {
            assert!(
                counts[0] > counts[other],
                "client 0 should dominate: counts = {counts:?}"
            );
        }
    }

    #[test]
    fn select_respects_budget_and_membership() {
        let mut bandit = BanditProjectionSelector::new(20);
        bandit.init(&flat(vec![0.0])).unwrap();
        let ids: Vec<usize> = (0..20).step_by(2).collect();
        let mut rng = StdRng::seed_from_u64(5);
        for round in 0..4u64 {
            let ctx = SelectionContext::new(20, 25, round);
            let picked = bandit
                .select(&ctx, &ids, SelectionSignal::None, &mut rng)
                .unwrap();
            assert_eq!(picked.len(), ids.len());
            let mut sorted = picked.clone();
            sorted.sort_unstable();
            sorted.dedup();
            assert_eq!(sorted.len(), picked.len());
            for &p in &picked {
                assert!(ids.contains(&p));
            }
        }
    }

    #[test]
    fn post_update_rejects_unknown_clients_and_shape_drift() {
        let mut bandit = BanditProjectionSelector::new(2);
        bandit.init(&flat(vec![0.0])).unwrap();
        assert!(matches!(
            bandit.post_update(&[5], &[flat(vec![0.0])], &flat(vec![0.0]), 0.1, 1.0),
            Err(SelectionError::UnknownClient(5))
        ));
        assert!(matches!(
            bandit.post_update(&[0, 1], &[flat(vec![0.0])], &flat(vec![0.0]), 0.1, 1.0),
            Err(SelectionError::ShapeMismatch)
        ));
    }
}
