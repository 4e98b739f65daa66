//! # fed-select
//!
//! **Budgeted client selection for federated learning rounds.**
//!
//! On every round a federated training loop must pick `n` clients out of a
//! population of `T >> n`. The selection policy materially affects both
//! convergence speed and fairness of the trained global model, so this crate
//! ships non-trivial policies rather than plain random sampling:
//!
//! - diversity-maximizing greedy coverage over gradient dissimilarity
//! - a UCB bandit over per-client gradient-projection rewards
//! - orchestration of an external Gaussian-Process-style loss surrogate
//!
//! ## Quick Start
//!
//! ```rust
//! use fed_select::prelude::*;
//! use rand::{rngs::StdRng, SeedableRng};
//!
//! # fn main() -> fed_select::Result<()> {
//! let config = FedSelectConfig::builder()
//!     .total_clients(100)
//!     .clients_per_round(10)
//!     .strategy(StrategyKind::Random)
//!     .build()?;
//!
//! let mut selector = build_selector(&config)?;
//! let mut rng = StdRng::seed_from_u64(42);
//!
//! // Each round: hand off the global baseline, then select.
//! let global = ModelParams::from_flat(vec![0.0; 8]);
//! let population: Vec<usize> = (0..100).collect();
//! selector.init(&global)?;
//! let picked = selector.select(&config.context(0), &population, SelectionSignal::None, &mut rng)?;
//! assert_eq!(picked.len(), 10);
//! # Ok(())
//! # }
//! ```
//!
//! ## Crate Structure
//!
//! - [`fed_select_core`]: strategies, the `ClientSelector` trait, and the
//!   `LossSurrogate` collaborator contract
//! - this crate: configuration, construction, and re-exports

// Re-export the core crate
pub use fed_select_core as core;

// Re-export commonly used items at the top level
pub use fed_select_core::{
    bandit::BanditProjectionSelector,
    diversity::DiversityGreedySelector,
    model::ModelParams,
    random::RandomSelector,
    selector::{ClientSelector, SelectionContext, SelectionSignal},
    surrogate::{
        LossPrediction, LossSurrogate, SurrogateConfig, SurrogateConfigBuilder, SurrogateError,
        SurrogateModelSelector, TrainOptions,
    },
    Result, SelectionError,
};

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::{
        build_selector, BanditProjectionSelector, ClientSelector, DiversityGreedySelector,
        FedSelectConfig, FedSelectConfigBuilder, LossSurrogate, ModelParams, RandomSelector,
        SelectionContext, SelectionSignal, StrategyKind, SurrogateConfig, SurrogateModelSelector,
    };
}

/// Which selection policy to run.
///
/// The surrogate strategy is constructed directly via
/// [`SurrogateModelSelector::new`] since it is generic over its external
/// collaborator.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
pub enum StrategyKind {
    /// Uniform random baseline
    Random,
    /// Submodular gradient-diversity greedy
    Diversity {
        /// Stochastic candidate-pool ratio in `(0, 1]`
        subset_ratio: f64,
    },
    /// UCB bandit over gradient projections
    Bandit,
}

impl Default for StrategyKind {
    fn default() -> Self {
        Self::Random
    }
}

/// Configuration for a selection run.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct FedSelectConfig {
    /// Total client population size
    pub total_clients: usize,
    /// Per-round selection budget
    pub clients_per_round: usize,
    /// Total number of communication rounds
    pub num_rounds: u64,
    /// Selection policy
    pub strategy: StrategyKind,
}

impl Default for FedSelectConfig {
    fn default() -> Self {
        Self {
            total_clients: 100,
            clients_per_round: 10,
            num_rounds: 200,
            strategy: StrategyKind::default(),
        }
    }
}

impl FedSelectConfig {
    /// Create a new builder.
    pub fn builder() -> FedSelectConfigBuilder {
        FedSelectConfigBuilder::default()
    }

    /// The selection context for one round.
    pub fn context(&self, round: u64) -> SelectionContext {
        SelectionContext::new(self.total_clients, self.clients_per_round, round)
    }
}

/// Builder for [`FedSelectConfig`]
#[derive(Debug, Default)]
pub struct FedSelectConfigBuilder {
    config: FedSelectConfig,
}

impl FedSelectConfigBuilder {
    /// Set the population size
    pub fn total_clients(mut self, total: usize) -> Self {
        self.config.total_clients = total;
        self
    }

    /// Set the per-round budget
    pub fn clients_per_round(mut self, n: usize) -> Self {
        self.config.clients_per_round = n;
        self
    }

    /// Set the number of rounds
    pub fn num_rounds(mut self, rounds: u64) -> Self {
        self.config.num_rounds = rounds;
        self
    }

    /// Set the selection policy
    pub fn strategy(mut self, strategy: StrategyKind) -> Self {
        self.config.strategy = strategy;
        self
    }

    /// Validate and build the configuration
    pub fn build(self) -> Result<FedSelectConfig> {
        if self.config.total_clients == 0 {
            return Err(SelectionError::InvalidHyperparameter {
                name: "total_clients",
                reason: "population must not be empty",
            });
        }
        Ok(self.config)
    }
}

/// Construct the configured selector.
///
/// Configuration errors (a missing or out-of-range hyperparameter) are fatal
/// here, before any round runs.
pub fn build_selector(config: &FedSelectConfig) -> Result<Box<dyn ClientSelector>> {
    match config.strategy {
        StrategyKind::Random => Ok(Box::new(RandomSelector)),
        StrategyKind::Diversity { subset_ratio } => Ok(Box::new(DiversityGreedySelector::new(
            Some(subset_ratio),
        )?)),
        StrategyKind::Bandit => Ok(Box::new(BanditProjectionSelector::new(
            config.total_clients,
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_builder() {
        let config = FedSelectConfig::builder()
            .total_clients(50)
            .clients_per_round(5)
            .num_rounds(30)
            .strategy(StrategyKind::Bandit)
            .build()
            .unwrap();

        assert_eq!(config.total_clients, 50);
        assert_eq!(config.num_rounds, 30);
        assert_eq!(config.context(3).budget, 5);
        assert_eq!(config.context(3).round, 3);
    }

    #[test]
    fn test_empty_population_rejected() {
        assert!(FedSelectConfig::builder().total_clients(0).build().is_err());
    }

    #[test]
    fn test_build_selector_propagates_config_errors() {
        let config = FedSelectConfig {
            strategy: StrategyKind::Diversity { subset_ratio: 2.0 },
            ..FedSelectConfig::default()
        };
        assert!(build_selector(&config).is_err());

        let config = FedSelectConfig {
            strategy: StrategyKind::Diversity { subset_ratio: 0.3 },
            ..FedSelectConfig::default()
        };
        assert!(build_selector(&config).is_ok());
    }
}
