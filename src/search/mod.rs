//! Search spaces, the TPE sampler, Pareto ranking and hyperparameter search.

mod hyperparam;
pub mod pareto;
mod space;
mod tpe;

pub use hyperparam::{HyperparameterSearch, SearchOutcome};
pub use pareto::Direction;
pub use space::{Domain, SearchSpace};
pub use tpe::{TpeConfig, TpeSampler};
