//! Generic parameter operators: a bounded random walk and a scale move.
//!
//! Model-specific operators (tree rearrangements and the like) live with
//! their models; these two cover plain bounded real parameters and give the
//! coercion machinery something to tune.

use rand::{Rng, RngCore};
use rand_distr::{Distribution, StandardNormal};

use crate::operator::{CoercibleOperator, CoercionMode, Operator, Proposal};
use crate::state::{Bounds, ModelState, ParameterId};

const MAX_REFLECTIONS: u32 = 100;

/// Reflect a proposed value back into its bounds.
fn reflect(mut value: f64, bounds: Bounds) -> Option<f64> {
    for _ in 0..MAX_REFLECTIONS {
        if bounds.contains(value) {
            return Some(value);
        }
        if value < bounds.lower {
            value = 2.0 * bounds.lower - value;
        } else {
            value = 2.0 * bounds.upper - value;
        }
    }
    None
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WalkDistribution {
    Uniform,
    Gaussian,
}

/// Adds a symmetric perturbation to one entry of a parameter, reflecting at
/// the bounds. The Hastings ratio is zero.
pub struct RandomWalkOperator {
    parameter: ParameterId,
    window_size: f64,
    weight: f64,
    distribution: WalkDistribution,
    target_acceptance: f64,
    mode: CoercionMode,
    name: String,
}

impl RandomWalkOperator {
    pub fn new(name: impl Into<String>, parameter: ParameterId, window_size: f64, weight: f64) -> Self {
        assert!(window_size > 0.0, "window size must be positive");
        Self {
            parameter,
            window_size,
            weight,
            distribution: WalkDistribution::Uniform,
            target_acceptance: 0.234,
            mode: CoercionMode::Default,
            name: name.into(),
        }
    }

    pub fn gaussian(mut self) -> Self {
        self.distribution = WalkDistribution::Gaussian;
        self
    }

    pub fn with_target_acceptance(mut self, target: f64) -> Self {
        assert!(target > 0.0 && target < 1.0);
        self.target_acceptance = target;
        self
    }

    pub fn with_mode(mut self, mode: CoercionMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn window_size(&self) -> f64 {
        self.window_size
    }
}

impl Operator for RandomWalkOperator {
    fn name(&self) -> &str {
        &self.name
    }

    fn weight(&self) -> f64 {
        self.weight
    }

    fn propose(&mut self, state: &mut ModelState, rng: &mut dyn RngCore) -> Proposal {
        let dim = state.dim(self.parameter);
        let index = if dim == 1 { 0 } else { rng.random_range(0..dim) };

        let delta = match self.distribution {
            WalkDistribution::Uniform => (rng.random::<f64>() - 0.5) * self.window_size,
            WalkDistribution::Gaussian => {
                let z: f64 = StandardNormal.sample(rng);
                z * self.window_size
            }
        };

        let current = state.value(self.parameter, index);
        let Some(proposed) = reflect(current + delta, state.bounds(self.parameter)) else {
            return Proposal::Failed;
        };
        state.set_value(self.parameter, index, proposed);
        Proposal::Hastings(0.0)
    }

    fn as_coercible(&mut self) -> Option<&mut dyn CoercibleOperator> {
        Some(self)
    }
}

impl CoercibleOperator for RandomWalkOperator {
    fn coercible_parameter(&self) -> f64 {
        self.window_size.ln()
    }

    fn set_coercible_parameter(&mut self, value: f64) {
        self.window_size = value.exp();
    }

    fn target_acceptance_probability(&self) -> f64 {
        self.target_acceptance
    }

    fn coercion_mode(&self) -> CoercionMode {
        self.mode
    }
}

/// Multiplies one entry of a parameter by a factor drawn from
/// [scale, 1/scale]. Fails when the scaled value leaves the bounds or the
/// current value is zero. The log Hastings ratio is -ln(factor).
pub struct ScaleOperator {
    parameter: ParameterId,
    scale_factor: f64,
    weight: f64,
    target_acceptance: f64,
    mode: CoercionMode,
    name: String,
}

impl ScaleOperator {
    pub fn new(name: impl Into<String>, parameter: ParameterId, scale_factor: f64, weight: f64) -> Self {
        assert!(
            scale_factor > 0.0 && scale_factor < 1.0,
            "scale factor must be in (0, 1)"
        );
        Self {
            parameter,
            scale_factor,
            weight,
            target_acceptance: 0.234,
            mode: CoercionMode::Default,
            name: name.into(),
        }
    }

    pub fn with_target_acceptance(mut self, target: f64) -> Self {
        assert!(target > 0.0 && target < 1.0);
        self.target_acceptance = target;
        self
    }

    pub fn with_mode(mut self, mode: CoercionMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn scale_factor(&self) -> f64 {
        self.scale_factor
    }
}

impl Operator for ScaleOperator {
    fn name(&self) -> &str {
        &self.name
    }

    fn weight(&self) -> f64 {
        self.weight
    }

    fn propose(&mut self, state: &mut ModelState, rng: &mut dyn RngCore) -> Proposal {
        let dim = state.dim(self.parameter);
        let index = if dim == 1 { 0 } else { rng.random_range(0..dim) };

        let current = state.value(self.parameter, index);
        if current == 0.0 {
            return Proposal::Failed;
        }

        let factor =
            self.scale_factor + rng.random::<f64>() * (1.0 / self.scale_factor - self.scale_factor);
        let proposed = current * factor;
        if !state.bounds(self.parameter).contains(proposed) {
            return Proposal::Failed;
        }

        state.set_value(self.parameter, index, proposed);
        Proposal::Hastings(-factor.ln())
    }

    fn as_coercible(&mut self) -> Option<&mut dyn CoercibleOperator> {
        Some(self)
    }
}

impl CoercibleOperator for ScaleOperator {
    fn coercible_parameter(&self) -> f64 {
        (1.0 / self.scale_factor - 1.0).ln()
    }

    fn set_coercible_parameter(&mut self, value: f64) {
        self.scale_factor = 1.0 / (1.0 + value.exp());
    }

    fn target_acceptance_probability(&self) -> f64 {
        self.target_acceptance
    }

    fn coercion_mode(&self) -> CoercionMode {
        self.mode
    }
}
