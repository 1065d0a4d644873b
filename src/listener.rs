use std::sync::{Arc, Mutex};

use crate::state::ModelState;

/// Observer hooks invoked synchronously in the iteration loop; a slow
/// listener slows the chain.
pub trait ChainListener: Send {
    /// Called at the top of every iteration with the current state.
    fn current_state(&mut self, _iteration: u64, _state: &ModelState, _score: f64) {}

    /// Called whenever the best score seen so far improves.
    fn best_state(&mut self, _iteration: u64, _state: &ModelState, _score: f64) {}

    /// Called once, from the chain's `finish` call, after the last run.
    fn finished(&mut self, _iteration: u64) {}
}

/// Records (iteration, score) every `every` iterations.
///
/// Clones share the same sample buffer, so a caller can hand one clone to
/// the chain and read the samples from another after the run.
#[derive(Clone)]
pub struct ScoreTrace {
    every: u64,
    samples: Arc<Mutex<Vec<(u64, f64)>>>,
}

impl ScoreTrace {
    pub fn new(every: u64) -> Self {
        assert!(every > 0);
        Self {
            every,
            samples: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn samples(&self) -> Vec<(u64, f64)> {
        self.samples.lock().expect("Poisoned lock").clone()
    }
}

impl ChainListener for ScoreTrace {
    fn current_state(&mut self, iteration: u64, _state: &ModelState, score: f64) {
        if iteration % self.every == 0 {
            self.samples.lock().expect("Poisoned lock").push((iteration, score));
        }
    }
}
