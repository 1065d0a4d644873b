use rand::{Rng, RngCore};
use thiserror::Error;

use crate::operator::{Operator, OperatorTally};

#[derive(Error, Debug)]
pub enum ScheduleError {
    #[error("schedule has no operators")]
    Empty,
    #[error("operator {name} has invalid weight {weight}")]
    InvalidWeight { name: String, weight: f64 },
    #[error("total operator weight is zero")]
    ZeroTotalWeight,
}

/// Transform applied to an operator's invocation count before it enters the
/// coercion step size 1/(i+1). Slower-growing transforms keep adaptation
/// aggressive for longer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OptimizationSchedule {
    #[default]
    Linear,
    Log,
    Sqrt,
}

impl OptimizationSchedule {
    pub fn transform(&self, count: u64) -> f64 {
        let count = count as f64;
        match self {
            OptimizationSchedule::Linear => count,
            OptimizationSchedule::Log => count.max(1.0).ln(),
            OptimizationSchedule::Sqrt => count.sqrt(),
        }
    }
}

/// A weighted collection of operators.
///
/// Selection probability of operator i is weight_i / total weight, drawn by
/// binary search over a cumulative weight table. The operator list is fixed
/// once the schedule is built; only the tallies mutate during a run.
pub struct OperatorSchedule {
    operators: Vec<Box<dyn Operator>>,
    cumulative_weights: Vec<f64>,
    total_weight: f64,
    tallies: Vec<OperatorTally>,
    optimization: OptimizationSchedule,
}

impl OperatorSchedule {
    pub fn new(operators: Vec<Box<dyn Operator>>) -> Result<Self, ScheduleError> {
        if operators.is_empty() {
            return Err(ScheduleError::Empty);
        }

        let mut cumulative_weights = Vec::with_capacity(operators.len());
        let mut total_weight = 0.0;
        for op in &operators {
            let weight = op.weight();
            if !weight.is_finite() || weight < 0.0 {
                return Err(ScheduleError::InvalidWeight {
                    name: op.name().to_string(),
                    weight,
                });
            }
            total_weight += weight;
            cumulative_weights.push(total_weight);
        }
        if total_weight <= 0.0 {
            return Err(ScheduleError::ZeroTotalWeight);
        }

        let tallies = vec![OperatorTally::default(); operators.len()];
        Ok(Self {
            operators,
            cumulative_weights,
            total_weight,
            tallies,
            optimization: OptimizationSchedule::default(),
        })
    }

    pub fn with_optimization(mut self, optimization: OptimizationSchedule) -> Self {
        self.optimization = optimization;
        self
    }

    pub fn next_operator_index(&self, rng: &mut dyn RngCore) -> usize {
        let draw = rng.random::<f64>() * self.total_weight;
        self.cumulative_weights
            .partition_point(|&cumulative| cumulative <= draw)
            .min(self.operators.len() - 1)
    }

    pub fn len(&self) -> usize {
        self.operators.len()
    }

    pub fn is_empty(&self) -> bool {
        self.operators.is_empty()
    }

    pub fn operator(&self, index: usize) -> &dyn Operator {
        self.operators[index].as_ref()
    }

    pub fn operator_mut(&mut self, index: usize) -> &mut dyn Operator {
        self.operators[index].as_mut()
    }

    pub fn tally(&self, index: usize) -> &OperatorTally {
        &self.tallies[index]
    }

    pub fn tally_mut(&mut self, index: usize) -> &mut OperatorTally {
        &mut self.tallies[index]
    }

    pub fn optimization(&self) -> OptimizationSchedule {
        self.optimization
    }

    /// Minimum over operators of min(accepted, rejected). The full-evaluation
    /// self-check stays on until every operator has both accepted and
    /// rejected at least a configured number of moves.
    pub fn min_accept_reject_count(&self) -> u64 {
        self.tallies
            .iter()
            .map(|tally| tally.accepted.min(tally.rejected))
            .min()
            .unwrap_or(0)
    }

    pub fn reset_tallies(&mut self) {
        for tally in &mut self.tallies {
            tally.reset();
        }
    }
}
