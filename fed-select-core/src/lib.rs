//! # fed-select-core
//!
//! Client selection strategies for federated learning.
//!
//! On every communication round a federated training loop must pick a small
//! subset of clients out of a much larger population, under a fixed per-round
//! budget. This crate provides the selection policies:
//!
//! - [`diversity::DiversityGreedySelector`]: stochastic greedy maximization of
//!   a facility-location objective over pairwise gradient dissimilarity
//! - [`bandit::BanditProjectionSelector`]: a UCB multi-armed bandit whose
//!   reward is the alignment of a client's gradient with the global update
//! - [`surrogate::SurrogateModelSelector`]: orchestration of an external loss
//!   surrogate (e.g. a Gaussian-Process regressor) over a warmup/retraining
//!   schedule
//! - [`random::RandomSelector`]: the uniform baseline
//!
//! All strategies implement [`selector::ClientSelector`]. The training loop
//! itself (local training, aggregation, dataset partitioning) is out of scope:
//! strategies only consume the signals the loop produces — model parameters,
//! per-client losses, global accuracy — and return client ids.
//!
//! The layer is strictly round-synchronous: no background work, no async, and
//! selector instances are not thread-safe. Callers own the RNG, so runs are
//! reproducible when seeded.

pub mod bandit;
pub mod diversity;
pub mod model;
pub mod random;
pub mod selector;
pub mod surrogate;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::bandit::BanditProjectionSelector;
    pub use crate::diversity::DiversityGreedySelector;
    pub use crate::model::ModelParams;
    pub use crate::random::RandomSelector;
    pub use crate::selector::{ClientSelector, SelectionContext, SelectionSignal};
    pub use crate::surrogate::{
        LossSurrogate, SurrogateConfig, SurrogateConfigBuilder, SurrogateModelSelector,
    };
    pub use crate::{Result, SelectionError};
}

/// Result type for selection operations
pub type Result<T> = core::result::Result<T, SelectionError>;

/// Error type for the selection layer.
///
/// Configuration errors are fatal at construction; budget/population
/// mismatches are clamped rather than surfaced here. See the per-strategy
/// docs for which errors abort a round.
#[derive(Debug, thiserror::Error)]
pub enum SelectionError {
    /// A required hyperparameter was not set
    #[error("missing required hyperparameter: {0}")]
    MissingHyperparameter(&'static str),

    /// A hyperparameter value is outside its valid range
    #[error("invalid hyperparameter {name}: {reason}")]
    InvalidHyperparameter {
        /// Name of the offending field
        name: &'static str,
        /// Why the value was rejected
        reason: &'static str,
    },

    /// Local and global parameter groups do not share a shape
    #[error("parameter group shape mismatch")]
    ShapeMismatch,

    /// `select` was called before `init` supplied a global baseline
    #[error("selector not initialized: call init() with the global model first")]
    NotInitialized,

    /// The strategy was invoked without the per-round signal it needs
    #[error("missing per-round signal: {0}")]
    MissingSignal(&'static str),

    /// A client id is outside the population this selector was built for
    #[error("unknown client id: {0}")]
    UnknownClient(usize),

    /// The external regression surrogate failed
    #[error("surrogate failure: {0}")]
    Surrogate(#[from] surrogate::SurrogateError),
}
