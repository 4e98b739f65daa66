//! Uniform random selection.
//!
//! Both the baseline strategy and the shared sampling utility used by the
//! bandit's cold start and the surrogate's warmup phase.

use rand::RngCore;

use crate::model::ModelParams;
use crate::selector::{ClientSelector, SelectionContext, SelectionSignal};
use crate::Result;

/// Draw `n` distinct ids uniformly without replacement from `client_ids`.
///
/// `n` is clamped to the population size; the result preserves sampling
/// order, not input order.
pub fn sample_clients(rng: &mut dyn RngCore, client_ids: &[usize], n: usize) -> Vec<usize> {
    let n = n.min(client_ids.len());
    if n == 0 {
        return Vec::new();
    }
    rand::seq::index::sample(rng, client_ids.len(), n)
        .into_vec()
        .into_iter()
        .map(|i| client_ids[i])
        .collect()
}

/// Uniform random selection, the baseline every non-trivial strategy is
/// measured against.
#[derive(Debug, Clone, Copy, Default)]
pub struct RandomSelector;

impl ClientSelector for RandomSelector {
    fn init(&mut self, _global: &ModelParams) -> Result<()> {
        Ok(())
    }

    fn select(
        &mut self,
        ctx: &SelectionContext,
        client_ids: &[usize],
        _signal: SelectionSignal<'_>,
        rng: &mut dyn RngCore,
    ) -> Result<Vec<usize>> {
        Ok(sample_clients(
            rng,
            client_ids,
            ctx.effective_budget(client_ids.len()),
        ))
    }
}
