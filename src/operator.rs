use rand::RngCore;

use crate::state::ModelState;

/// Outcome of a proposal.
///
/// `Failed` means no legal move exists in the current state; the driver
/// treats it as an automatic reject without scoring the proposal.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Proposal {
    /// The log Hastings ratio of the move, 0.0 for symmetric proposals.
    Hastings(f64),
    Failed,
}

/// Whether an operator's tunable parameter is adapted during the run.
///
/// `Default` follows the chain-level switch; `On` and `Off` override it per
/// operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CoercionMode {
    #[default]
    Default,
    On,
    Off,
}

/// A proposal operator bound to one or more parameters.
///
/// `propose` mutates the state through its transactional API; the driver
/// wraps the call in store/accept-or-restore, so the operator itself never
/// manages the transaction. Operators that mutate shared state outside the
/// container must invert that mutation in `rejected`.
pub trait Operator: Send {
    fn name(&self) -> &str;

    /// Relative selection probability under the schedule. Fixed at
    /// construction; must be finite and non-negative.
    fn weight(&self) -> f64;

    fn propose(&mut self, state: &mut ModelState, rng: &mut dyn RngCore) -> Proposal;

    /// Gibbs operators draw exactly from the conditional distribution and
    /// bypass the acceptance rule.
    fn is_gibbs(&self) -> bool {
        false
    }

    /// Called after the move is accepted, with the score deviation.
    fn accepted(&mut self, _deviation: f64) {}

    /// Called after the move is rejected, before the state rollback.
    fn rejected(&mut self) {}

    /// The coercible view of this operator, if it has a tunable parameter.
    fn as_coercible(&mut self) -> Option<&mut dyn CoercibleOperator> {
        None
    }
}

/// The tunable subset of the operator protocol.
///
/// The parameter must be scaled so that increasing it makes the proposal
/// bolder, i.e. lowers the acceptance probability; the chain's coercion step
/// relies on that monotonicity.
pub trait CoercibleOperator {
    fn coercible_parameter(&self) -> f64;

    fn set_coercible_parameter(&mut self, value: f64);

    fn target_acceptance_probability(&self) -> f64 {
        0.234
    }

    fn coercion_mode(&self) -> CoercionMode {
        CoercionMode::Default
    }
}

/// Per-operator bookkeeping, owned by the schedule and updated by the
/// driver every iteration.
#[derive(Debug, Clone, Copy, Default)]
pub struct OperatorTally {
    /// Number of times the operator fired, including failures.
    pub operations: u64,
    pub accepted: u64,
    pub rejected: u64,
    /// Proposals with no legal move. Not counted as rejections.
    pub failed: u64,
    pub total_deviation: f64,
}

impl OperatorTally {
    pub fn acceptance_rate(&self) -> f64 {
        let decided = self.accepted + self.rejected;
        if decided == 0 {
            return 0.0;
        }
        self.accepted as f64 / decided as f64
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}
