use rand::{Rng, RngCore};

/// Outcome of the acceptance rule. The log-ratio is consumed by the
/// coercion step, so it is reported even for rejected moves.
#[derive(Debug, Clone, Copy)]
pub struct Decision {
    pub accepted: bool,
    pub log_ratio: f64,
}

impl Decision {
    pub fn reject(log_ratio: f64) -> Self {
        Self {
            accepted: false,
            log_ratio,
        }
    }
}

/// Decides accept/reject from the old score, the new score and the log
/// Hastings ratio.
pub trait Acceptor: Send {
    fn accept(
        &mut self,
        old_score: f64,
        new_score: f64,
        log_hastings: f64,
        rng: &mut dyn RngCore,
    ) -> Decision;
}

/// The standard Metropolis-Hastings rule, with an annealing temperature.
///
/// Accepts iff ln U < temperature * (new - old) + Hastings. Temperature 1.0
/// is plain Metropolis-Hastings; temperatures above 1.0 sharpen the
/// posterior, below 1.0 flatten it.
#[derive(Debug, Clone, Copy)]
pub struct MetropolisAcceptor {
    pub temperature: f64,
}

impl MetropolisAcceptor {
    pub fn new() -> Self {
        Self { temperature: 1.0 }
    }

    pub fn with_temperature(temperature: f64) -> Self {
        assert!(temperature > 0.0, "temperature must be positive");
        Self { temperature }
    }
}

impl Default for MetropolisAcceptor {
    fn default() -> Self {
        Self::new()
    }
}

impl Acceptor for MetropolisAcceptor {
    fn accept(
        &mut self,
        old_score: f64,
        new_score: f64,
        log_hastings: f64,
        rng: &mut dyn RngCore,
    ) -> Decision {
        if new_score == f64::NEG_INFINITY {
            return Decision::reject(f64::NEG_INFINITY);
        }

        let log_ratio = self.temperature * (new_score - old_score) + log_hastings;
        let accepted = log_ratio >= 0.0 || rng.random::<f64>().ln() < log_ratio;
        Decision {
            accepted,
            log_ratio,
        }
    }
}
