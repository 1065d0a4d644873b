use anyhow::{Context, Result};
use itertools::Itertools;
use rayon::prelude::*;

use crate::state::{ModelState, ParameterId};

/// A scalar log-density over the model state.
///
/// Components own whatever cache they keep; `make_dirty` must force a full
/// recomputation on the next call. During a parallel compound evaluation each
/// component is borrowed exclusively while the state is shared read-only, so
/// a component may update its own cache but must never touch shared scratch
/// state.
pub trait LikelihoodComponent: Send {
    fn name(&self) -> &str;

    fn log_likelihood(&mut self, state: &ModelState) -> f64;

    fn make_dirty(&mut self) {}
}

/// A density over one parameter's values, cached on the state version.
///
/// The cache is conservative: any write to the state invalidates it, even a
/// write to an unrelated parameter. That keeps the dirty tracking exact
/// across transaction rollbacks without a dependency graph.
pub struct CachedDensity<F> {
    name: String,
    parameter: ParameterId,
    density: F,
    cache: Option<(u64, f64)>,
}

impl<F> CachedDensity<F>
where
    F: Fn(&[f64]) -> f64 + Send,
{
    pub fn new(name: impl Into<String>, parameter: ParameterId, density: F) -> Self {
        Self {
            name: name.into(),
            parameter,
            density,
            cache: None,
        }
    }
}

impl<F> LikelihoodComponent for CachedDensity<F>
where
    F: Fn(&[f64]) -> f64 + Send,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn log_likelihood(&mut self, state: &ModelState) -> f64 {
        let version = state.version();
        if let Some((cached_version, value)) = self.cache {
            if cached_version == version {
                return value;
            }
        }
        let value = (self.density)(state.values(self.parameter));
        self.cache = Some((version, value));
        value
    }

    fn make_dirty(&mut self) {
        self.cache = None;
    }
}

/// Sum of independent log-likelihood components.
///
/// Serial evaluation walks the components in order and short-circuits to
/// negative infinity as soon as one component returns it, so callers should
/// put cheap components first. With a thread pool the components are
/// evaluated concurrently and the per-component values are combined in index
/// order, so the sum matches a serial evaluation bit for bit.
///
/// A NaN from any component maps the compound value to negative infinity; it
/// is never propagated as an error.
pub struct CompoundLikelihood {
    components: Vec<Box<dyn LikelihoodComponent>>,
    last_values: Vec<f64>,
    pool: Option<rayon::ThreadPool>,
}

impl CompoundLikelihood {
    pub fn new(components: Vec<Box<dyn LikelihoodComponent>>) -> Self {
        let last_values = vec![f64::NAN; components.len()];
        Self {
            components,
            last_values,
            pool: None,
        }
    }

    /// Evaluate components on a dedicated pool of `threads` workers.
    pub fn with_threads(
        components: Vec<Box<dyn LikelihoodComponent>>,
        threads: usize,
    ) -> Result<Self> {
        let mut compound = Self::new(components);
        if threads > 1 {
            let pool = rayon::ThreadPoolBuilder::new()
                .num_threads(threads)
                .build()
                .context("Failed to build likelihood thread pool")?;
            compound.pool = Some(pool);
        }
        Ok(compound)
    }

    pub fn single(component: impl LikelihoodComponent + 'static) -> Self {
        Self::new(vec![Box::new(component)])
    }

    pub fn len(&self) -> usize {
        self.components.len()
    }

    pub fn is_empty(&self) -> bool {
        self.components.is_empty()
    }

    pub fn log_likelihood(&mut self, state: &ModelState) -> f64 {
        match &self.pool {
            Some(pool) => {
                let components = &mut self.components;
                let last_values = &mut self.last_values;
                pool.install(|| {
                    components
                        .par_iter_mut()
                        .zip(last_values.par_iter_mut())
                        .for_each(|(component, slot)| {
                            *slot = component.log_likelihood(state);
                        });
                });
                // combine in index order so the sum is deterministic
                let mut total = 0.0;
                for &value in self.last_values.iter() {
                    if value.is_nan() || value == f64::NEG_INFINITY {
                        return f64::NEG_INFINITY;
                    }
                    total += value;
                }
                total
            }
            None => {
                let mut total = 0.0;
                for (component, slot) in self.components.iter_mut().zip(&mut self.last_values) {
                    let value = component.log_likelihood(state);
                    *slot = value;
                    if value.is_nan() || value == f64::NEG_INFINITY {
                        return f64::NEG_INFINITY;
                    }
                    total += value;
                }
                total
            }
        }
    }

    pub fn make_dirty(&mut self) {
        for component in &mut self.components {
            component.make_dirty();
        }
    }

    /// Most recent per-component values, for error messages. Components that
    /// were skipped by short-circuiting report their last known value.
    pub fn diagnosis(&self) -> String {
        self.components
            .iter()
            .zip(&self.last_values)
            .map(|(component, value)| format!("{} = {}", component.name(), value))
            .join(", ")
    }
}
