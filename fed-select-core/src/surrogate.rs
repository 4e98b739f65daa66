//! Orchestration of an external loss surrogate.
//!
//! The surrogate (typically a Gaussian-Process regressor over per-client
//! loss correlations) is an opaque collaborator: this layer feeds it
//! per-client loss deltas, drives its warmup/retraining schedule, and during
//! the steady phase delegates selection to its own client ranking. The
//! regression internals are deliberately out of scope.

use rand::RngCore;
use serde::{Deserialize, Serialize};

use crate::model::ModelParams;
use crate::random::sample_clients;
use crate::selector::{ClientSelector, SelectionContext, SelectionSignal};
use crate::{Result, SelectionError};

/// Failures surfaced by the external surrogate.
#[derive(Debug, thiserror::Error)]
pub enum SurrogateError {
    /// The posterior covariance is singular and cannot be conditioned on
    #[error("singular posterior covariance")]
    SingularCovariance,

    /// Surrogate training failed; no correct selection is possible without
    /// a trained surrogate, so this aborts the run
    #[error("surrogate training failed: {0}")]
    Training(String),

    /// Surrogate prediction failed; downgraded to a skipped diagnostic
    #[error("surrogate prediction failed: {0}")]
    Prediction(String),

    /// The inputs handed to the surrogate were malformed
    #[error("invalid surrogate input: {0}")]
    InvalidInput(&'static str),
}

/// Training knobs forwarded verbatim to the surrogate.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TrainOptions {
    /// Learning rate for the surrogate's own parameters
    pub lr: f64,
    /// Learning rate for the likelihood/noise parameters
    pub likelihood_lr: f64,
    /// Maximum optimization epochs
    pub max_epochs: usize,
    /// Whether the surrogate should schedule its learning rate
    pub schedule_lr: bool,
    /// Whether the surrogate should update its prior mean
    pub update_mean: bool,
    /// Verbose optimization output
    pub verbose: bool,
}

impl TrainOptions {
    /// Per-round warmup training budget.
    pub fn warmup(update_mean: bool, verbose: bool) -> Self {
        Self {
            lr: 1e-2,
            likelihood_lr: 0.01,
            max_epochs: 150,
            schedule_lr: false,
            update_mean,
            verbose,
        }
    }

    /// Long training budget for the final warmup round.
    pub fn final_warmup(update_mean: bool, verbose: bool) -> Self {
        Self {
            max_epochs: 1000,
            ..Self::warmup(update_mean, verbose)
        }
    }

    /// Steady-phase retraining budget.
    pub fn steady(max_epochs: usize, update_mean: bool, verbose: bool) -> Self {
        Self {
            max_epochs,
            ..Self::warmup(update_mean, verbose)
        }
    }
}

/// A surrogate's posterior prediction over held-out clients.
#[derive(Debug, Clone, PartialEq)]
pub struct LossPrediction {
    /// Relative prediction error against the observed deltas
    pub relative_loss: f64,
    /// Posterior mean per predicted client
    pub mean: Vec<f64>,
    /// Posterior covariance over the predicted clients
    pub covariance: Vec<Vec<f64>>,
}

/// The opaque contract with the external regression surrogate.
///
/// Implementations own all regression state; this layer never inspects it.
pub trait LossSurrogate {
    /// Feed observed per-client loss deltas for one round.
    fn update_training_data(
        &mut self,
        clients: &[usize],
        loss_deltas: &[f64],
        round: u64,
    ) -> core::result::Result<(), SurrogateError>;

    /// Fit the surrogate to its accumulated training data.
    fn train(&mut self, options: &TrainOptions) -> core::result::Result<(), SurrogateError>;

    /// Rank and return `n` client ids expected to most reduce global loss.
    fn select_clients(
        &mut self,
        n: usize,
        epsilon_greedy: f64,
        weights: &[f64],
        dynamic_c: bool,
        dynamic_th: Option<f64>,
    ) -> core::result::Result<Vec<usize>, SurrogateError>;

    /// Predict held-out clients' loss deltas from observed ones.
    fn predict_loss(
        &self,
        observed: &[(usize, f64)],
        predict_idx: &[usize],
    ) -> core::result::Result<LossPrediction, SurrogateError>;

    /// Reset the temporal confidence discount.
    fn reset_discount(&mut self);

    /// Decay confidence in the given clients' stale observations.
    fn update_discount(&mut self, selected: &[usize], discount: f64);
}

/// Validated configuration for [`SurrogateModelSelector`].
///
/// Built through [`SurrogateConfigBuilder`]; every schedule-defining field
/// is required and construction fails loudly when one is unset.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SurrogateConfig {
    /// Last warmup round (selection is uniform random through this round)
    pub warmup: u64,
    /// First round at which the surrogate receives training data
    pub begin_round: u64,
    /// Steady-phase retraining period, in rounds
    pub retrain_interval: u64,
    /// Training epochs for steady-phase retraining
    pub train_epochs: usize,
    /// Temporal confidence decay applied between retraining rounds
    pub discount: f64,
    /// Exploration parameter forwarded to the surrogate's ranking
    pub epsilon_greedy: f64,
    /// Dynamic candidate-count control forwarded to the surrogate
    pub dynamic_c: bool,
    /// Dynamic threshold control forwarded to the surrogate
    pub dynamic_th: Option<f64>,
    /// Whether the surrogate updates its prior mean during training
    pub update_mean: bool,
    /// Verbose surrogate training
    pub verbose: bool,
}

impl SurrogateConfig {
    /// Start building a configuration.
    pub fn builder() -> SurrogateConfigBuilder {
        SurrogateConfigBuilder::default()
    }
}

/// Builder for [`SurrogateConfig`].
#[derive(Debug, Clone, Default)]
pub struct SurrogateConfigBuilder {
    warmup: Option<u64>,
    begin_round: Option<u64>,
    retrain_interval: Option<u64>,
    train_epochs: Option<usize>,
    discount: Option<f64>,
    epsilon_greedy: Option<f64>,
    dynamic_c: bool,
    dynamic_th: Option<f64>,
    update_mean: bool,
    verbose: bool,
}

impl SurrogateConfigBuilder {
    /// Last warmup round.
    pub fn warmup(mut self, rounds: u64) -> Self {
        self.warmup = Some(rounds);
        self
    }

    /// First round at which the surrogate receives training data.
    pub fn begin_round(mut self, round: u64) -> Self {
        self.begin_round = Some(round);
        self
    }

    /// Steady-phase retraining period.
    pub fn retrain_interval(mut self, rounds: u64) -> Self {
        self.retrain_interval = Some(rounds);
        self
    }

    /// Training epochs for steady-phase retraining.
    pub fn train_epochs(mut self, epochs: usize) -> Self {
        self.train_epochs = Some(epochs);
        self
    }

    /// Temporal confidence decay, in `(0, 1]`.
    pub fn discount(mut self, discount: f64) -> Self {
        self.discount = Some(discount);
        self
    }

    /// Exploration parameter, in `[0, 1]`.
    pub fn epsilon_greedy(mut self, epsilon: f64) -> Self {
        self.epsilon_greedy = Some(epsilon);
        self
    }

    /// Enable dynamic candidate-count control.
    pub fn dynamic_c(mut self, enabled: bool) -> Self {
        self.dynamic_c = enabled;
        self
    }

    /// Set the dynamic threshold control.
    pub fn dynamic_th(mut self, threshold: f64) -> Self {
        self.dynamic_th = Some(threshold);
        self
    }

    /// Let the surrogate update its prior mean during training.
    pub fn update_mean(mut self, enabled: bool) -> Self {
        self.update_mean = enabled;
        self
    }

    /// Verbose surrogate training.
    pub fn verbose(mut self, enabled: bool) -> Self {
        self.verbose = enabled;
        self
    }

    /// Validate and build; fails on any unset required field.
    pub fn build(self) -> Result<SurrogateConfig> {
        let warmup = self
            .warmup
            .ok_or(SelectionError::MissingHyperparameter("warmup"))?;
        let begin_round = self
            .begin_round
            .ok_or(SelectionError::MissingHyperparameter("begin_round"))?;
        let retrain_interval = self
            .retrain_interval
            .ok_or(SelectionError::MissingHyperparameter("retrain_interval"))?;
        let train_epochs = self
            .train_epochs
            .ok_or(SelectionError::MissingHyperparameter("train_epochs"))?;
        let discount = self
            .discount
            .ok_or(SelectionError::MissingHyperparameter("discount"))?;
        let epsilon_greedy = self
            .epsilon_greedy
            .ok_or(SelectionError::MissingHyperparameter("epsilon_greedy"))?;

        if retrain_interval == 0 {
            return Err(SelectionError::InvalidHyperparameter {
                name: "retrain_interval",
                reason: "must be at least 1",
            });
        }
        if !(discount > 0.0 && discount <= 1.0) {
            return Err(SelectionError::InvalidHyperparameter {
                name: "discount",
                reason: "must lie in (0, 1]",
            });
        }
        if !(0.0..=1.0).contains(&epsilon_greedy) {
            return Err(SelectionError::InvalidHyperparameter {
                name: "epsilon_greedy",
                reason: "must lie in [0, 1]",
            });
        }

        Ok(SurrogateConfig {
            warmup,
            begin_round,
            retrain_interval,
            train_epochs,
            discount,
            epsilon_greedy,
            dynamic_c: self.dynamic_c,
            dynamic_th: self.dynamic_th,
            update_mean: self.update_mean,
            verbose: self.verbose,
        })
    }
}

/// Model-based selection through an external loss surrogate.
///
/// Phases: through `warmup` rounds selection is uniform random while the
/// surrogate accumulates loss observations; past warmup, selection is
/// delegated to the surrogate's own ranking, with periodic probe-round
/// retraining and a temporal discount in between. The surrogate is created
/// once and mutated in place, never recreated mid-run.
pub struct SurrogateModelSelector<S: LossSurrogate> {
    cfg: SurrogateConfig,
    surrogate: S,
    total: usize,
    /// Per-round per-client global-model losses, seeded with the
    /// pre-training evaluation.
    loss_history: Vec<Vec<f64>>,
    /// Chosen client ids per round, append-only.
    chosen: Vec<Vec<usize>>,
    baseline: Option<ModelParams>,
}

impl<S: LossSurrogate> SurrogateModelSelector<S> {
    /// Create a selector over `total` clients.
    ///
    /// `initial_losses` is the per-client loss of the untrained global
    /// model, one entry per client; it anchors the first loss delta.
    pub fn new(
        total: usize,
        cfg: SurrogateConfig,
        surrogate: S,
        initial_losses: Vec<f64>,
    ) -> Result<Self> {
        if initial_losses.len() != total {
            return Err(SelectionError::ShapeMismatch);
        }
        Ok(Self {
            cfg,
            surrogate,
            total,
            loss_history: vec![initial_losses],
            chosen: Vec::new(),
            baseline: None,
        })
    }

    /// The active configuration.
    pub fn config(&self) -> &SurrogateConfig {
        &self.cfg
    }

    /// Read-only access to the surrogate.
    pub fn surrogate(&self) -> &S {
        &self.surrogate
    }

    /// Chosen clients per round so far.
    pub fn chosen_history(&self) -> &[Vec<usize>] {
        &self.chosen
    }

    /// Record one round's per-client losses of the aggregated global model.
    pub fn record_losses(&mut self, losses: Vec<f64>) -> Result<()> {
        if losses.len() != self.total {
            return Err(SelectionError::ShapeMismatch);
        }
        self.loss_history.push(losses);
        Ok(())
    }

    /// Whether `round` is a steady-phase probe round: the caller must run a
    /// uniform-random training round and hand its observed losses to
    /// [`Self::train_surrogate`].
    pub fn is_probe_round(&self, round: u64) -> bool {
        round >= self.cfg.begin_round
            && round > self.cfg.warmup
            && round % self.cfg.retrain_interval == 0
    }

    /// Difference between the two most recent loss observations.
    fn last_loss_delta(&self) -> Option<Vec<f64>> {
        let n = self.loss_history.len();
        if n < 2 {
            return None;
        }
        let (prev, cur) = (&self.loss_history[n - 2], &self.loss_history[n - 1]);
        Some(cur.iter().zip(prev).map(|(c, p)| c - p).collect())
    }

    /// Drive the surrogate's training schedule for `round`.
    ///
    /// During warmup the last observed loss delta is fed to the surrogate,
    /// with per-round training (or a single long fit on the final warmup
    /// round when the prior mean is being updated). On steady probe rounds
    /// the caller supplies the probe round's observed losses; the discount
    /// is reset, the probe delta is fed, and the surrogate is retrained. On
    /// every other steady round the temporal discount is applied to the
    /// last selection. Training errors propagate: without a trained
    /// surrogate no correct selection is possible.
    pub fn train_surrogate(&mut self, round: u64, probe_losses: Option<&[f64]>) -> Result<()> {
        if round < self.cfg.begin_round {
            return Ok(());
        }
        let all: Vec<usize> = (0..self.total).collect();

        if round <= self.cfg.warmup {
            let delta = self
                .last_loss_delta()
                .ok_or(SelectionError::MissingSignal("per-client losses"))?;
            self.surrogate.update_training_data(&all, &delta, round)?;
            if !self.cfg.update_mean {
                tracing::info!(round, "training surrogate (warmup)");
                self.surrogate
                    .train(&TrainOptions::warmup(false, self.cfg.verbose))?;
            } else if round == self.cfg.warmup {
                tracing::info!(round, "training surrogate (final warmup)");
                self.surrogate
                    .train(&TrainOptions::final_warmup(true, self.cfg.verbose))?;
            }
        } else if round % self.cfg.retrain_interval == 0 {
            let probe = probe_losses.ok_or(SelectionError::MissingSignal("probe losses"))?;
            if probe.len() != self.total {
                return Err(SelectionError::ShapeMismatch);
            }
            self.surrogate.reset_discount();
            let last = self
                .loss_history
                .last()
                .ok_or(SelectionError::MissingSignal("per-client losses"))?;
            let delta: Vec<f64> = probe.iter().zip(last).map(|(p, l)| p - l).collect();
            self.surrogate.update_training_data(&all, &delta, round)?;
            tracing::info!(round, "retraining surrogate after probe round");
            self.surrogate.train(&TrainOptions::steady(
                self.cfg.train_epochs,
                self.cfg.update_mean,
                self.cfg.verbose,
            ))?;
        } else if let Some(last_chosen) = self.chosen.last() {
            self.surrogate.update_discount(last_chosen, self.cfg.discount);
        }
        Ok(())
    }

    /// Cross-validate the surrogate on a random holdout of `holdout`
    /// clients, returning its relative prediction error.
    ///
    /// Only meaningful past warmup. Prediction failures — a singular
    /// posterior covariance in particular — are logged and reported as a
    /// skipped diagnostic (`Ok(None)`), never as a round-fatal error.
    pub fn validate_predictions(
        &self,
        round: u64,
        holdout: usize,
        rng: &mut dyn RngCore,
    ) -> Result<Option<f64>> {
        if round <= self.cfg.warmup {
            return Ok(None);
        }
        let delta = self
            .last_loss_delta()
            .ok_or(SelectionError::MissingSignal("per-client losses"))?;
        let all: Vec<usize> = (0..self.total).collect();
        let test_idx = sample_clients(rng, &all, holdout);
        let observed: Vec<(usize, f64)> = test_idx.iter().map(|&i| (i, delta[i])).collect();
        let predict_idx: Vec<usize> =
            (0..self.total).filter(|i| !test_idx.contains(i)).collect();

        match self.surrogate.predict_loss(&observed, &predict_idx) {
            Ok(prediction) => {
                tracing::debug!(
                    round,
                    relative_loss = prediction.relative_loss,
                    "surrogate validation"
                );
                Ok(Some(prediction.relative_loss))
            }
            Err(SurrogateError::SingularCovariance) => {
                tracing::warn!(
                    round,
                    "singular posterior covariance, skipping surrogate validation"
                );
                Ok(None)
            }
            Err(err) => {
                tracing::warn!(round, error = %err, "surrogate validation failed, skipping");
                Ok(None)
            }
        }
    }
}

impl<S: LossSurrogate> ClientSelector for SurrogateModelSelector<S> {
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

        let picked = if ctx.round > self.cfg.warmup {
            let SelectionSignal::LossWeights(weights) = signal else {
                return Err(SelectionError::MissingSignal("loss weights"));
            };
            if weights.len() != self.total {
                return Err(SelectionError::ShapeMismatch);
            }
            // The surrogate's ranking is authoritative; its ids are used
            // unmodified.
            let ids = self.surrogate.select_clients(
                n,
                self.cfg.epsilon_greedy,
                weights,
                self.cfg.dynamic_c,
                self.cfg.dynamic_th,
            )?;
            tracing::debug!(round = ctx.round, selected = ids.len(), "surrogate ranking");
            ids
        } else {
            sample_clients(rng, client_ids, n)
        };

        self.chosen.push(picked.clone());
        Ok(picked)
    }
}
