//! The common selection interface shared by all strategies.
//!
//! The training loop calls [`ClientSelector::init`] once per round to hand
//! off the previous global model, then [`ClientSelector::select`] to obtain
//! the round's client subset. Strategy-specific feedback hooks (the bandit's
//! post-update, the surrogate's training/validation hooks) live on the
//! concrete types.

use rand::RngCore;
use serde::{Deserialize, Serialize};

use crate::model::ModelParams;
use crate::Result;

/// Per-round selection state owned by the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelectionContext {
    /// Size of the client population
    pub total: usize,
    /// Per-round selection budget
    pub budget: usize,
    /// Round index, starting at 0
    pub round: u64,
}

impl SelectionContext {
    /// Create a new context.
    pub fn new(total: usize, budget: usize, round: u64) -> Self {
        Self {
            total,
            budget,
            round,
        }
    }

    /// Budget clamped to the number of available clients.
    pub fn effective_budget(&self, available: usize) -> usize {
        self.budget.min(available)
    }
}

/// The per-round signal a strategy consumes, threaded explicitly.
///
/// Strategies must never reach for ambient training-loop state; whatever a
/// policy needs for the round arrives through this enum.
#[derive(Debug, Clone, Copy)]
pub enum SelectionSignal<'a> {
    /// No per-round signal (random baseline, bandit)
    None,
    /// Locally trained models, one per entry of `client_ids` in the same
    /// order (diversity strategy)
    LocalModels(&'a [ModelParams]),
    /// Per-client loss-change weights over the full population (surrogate
    /// strategy, steady phase)
    LossWeights(&'a [f64]),
}

/// A client selection strategy.
///
/// Implementations keep only strategy-internal bookkeeping as state; they
/// never mutate `client_ids` or any supplied model. Instances are not
/// thread-safe and must be driven strictly sequentially:
/// `init` → `select` → (external local training) → feedback hook.
pub trait ClientSelector {
    /// Store the global model that serves as the gradient baseline for this
    /// round. Never selects, never fails on valid shapes, and is idempotent:
    /// calling it twice with the same state changes nothing.
    fn init(&mut self, global: &ModelParams) -> Result<()>;

    /// Choose the round's clients.
    ///
    /// Returns exactly `min(ctx.budget, client_ids.len())` distinct ids, all
    /// drawn from `client_ids`. An empty population or a zero budget yields
    /// an empty selection rather than an error. Strategies that sub-sample
    /// draw from `rng`, so a seeded RNG makes runs reproducible.
    fn select(
        &mut self,
        ctx: &SelectionContext,
        client_ids: &[usize],
        signal: SelectionSignal<'_>,
        rng: &mut dyn RngCore,
    ) -> Result<Vec<usize>>;
}
