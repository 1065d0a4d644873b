//! A generic adaptive Metropolis-Hastings MCMC engine.
//!
//! The crate drives a pluggable set of proposal operators under a weighted
//! schedule against transactional model state: every iteration stores the
//! state, lets one operator mutate it, evaluates a compound prior and
//! likelihood, and either commits or rolls the mutation back. Coercible
//! operators have their step sizes tuned online toward a target acceptance
//! rate, and an optional self-check phase cross-validates incremental scores
//! against full recomputations to catch state-restoration bugs.
//!
//! ```
//! use hastings::{
//!     Bounds, CachedDensity, ChainOptions, CompoundLikelihood, MarkovChain,
//!     MetropolisAcceptor, ModelState, Operator, OperatorSchedule, RandomWalkOperator,
//! };
//!
//! let mut state = ModelState::new();
//! let x = state.add_scalar("x", 0.0, Bounds::unbounded());
//!
//! let likelihood = CompoundLikelihood::single(CachedDensity::new(
//!     "std-normal",
//!     x,
//!     |values: &[f64]| -0.5 * values[0] * values[0],
//! ));
//! let schedule = OperatorSchedule::new(vec![
//!     Box::new(RandomWalkOperator::new("walk-x", x, 0.5, 1.0)) as Box<dyn Operator>,
//! ])
//! .unwrap();
//!
//! let mut chain = MarkovChain::seeded(
//!     state,
//!     None,
//!     likelihood,
//!     schedule,
//!     Box::new(MetropolisAcceptor::new()),
//!     ChainOptions::default(),
//!     42,
//! )
//! .unwrap();
//!
//! let outcome = chain.run(1000).unwrap();
//! assert!(outcome.best_score >= outcome.current_score);
//! ```

pub(crate) mod acceptor;
pub(crate) mod chain;
pub(crate) mod likelihood;
pub(crate) mod listener;
pub(crate) mod operator;
pub(crate) mod operators;
pub(crate) mod schedule;
pub(crate) mod state;

pub use acceptor::{Acceptor, Decision, MetropolisAcceptor};
pub use chain::{ChainError, ChainOptions, MarkovChain, RunOutcome, StopHandle};
pub use likelihood::{CachedDensity, CompoundLikelihood, LikelihoodComponent};
pub use listener::{ChainListener, ScoreTrace};
pub use operator::{CoercibleOperator, CoercionMode, Operator, OperatorTally, Proposal};
pub use operators::{RandomWalkOperator, ScaleOperator};
pub use schedule::{OperatorSchedule, OptimizationSchedule, ScheduleError};
pub use state::{Bounds, ModelState, ParameterId};
