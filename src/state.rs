/// Allowed range for a parameter's values.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bounds {
    pub lower: f64,
    pub upper: f64,
}

impl Bounds {
    pub fn new(lower: f64, upper: f64) -> Self {
        assert!(lower <= upper, "lower bound must not exceed upper bound");
        Self { lower, upper }
    }

    pub fn unbounded() -> Self {
        Self {
            lower: f64::NEG_INFINITY,
            upper: f64::INFINITY,
        }
    }

    pub fn positive() -> Self {
        Self {
            lower: 0.0,
            upper: f64::INFINITY,
        }
    }

    pub fn contains(&self, value: f64) -> bool {
        value >= self.lower && value <= self.upper
    }
}

impl Default for Bounds {
    fn default() -> Self {
        Self::unbounded()
    }
}

/// Handle to a parameter registered in a [`ModelState`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ParameterId(usize);

#[derive(Debug, Clone)]
struct Parameter {
    name: String,
    values: Vec<f64>,
    bounds: Bounds,
}

#[derive(Debug, Clone, Copy)]
struct JournalEntry {
    parameter: usize,
    index: usize,
    old_value: f64,
}

/// The mutable parameter state of a model, with transactional writes.
///
/// Every iteration of the chain wraps operator mutations in a transaction:
/// `store_state` begins it, `accept_state` commits, `restore_state` rolls
/// back. Rollback replays a write journal in reverse, so it is exact for
/// floating point values and costs O(writes since store), not O(model).
///
/// A version counter is bumped on every write, including rollback writes,
/// which lets evaluators cache values keyed on the version without ever
/// observing a stale state.
#[derive(Debug, Clone, Default)]
pub struct ModelState {
    parameters: Vec<Parameter>,
    journal: Vec<JournalEntry>,
    version: u64,
}

impl ModelState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a parameter. The initial values must lie within the bounds.
    pub fn add_parameter(
        &mut self,
        name: impl Into<String>,
        values: Vec<f64>,
        bounds: Bounds,
    ) -> ParameterId {
        let name = name.into();
        assert!(!values.is_empty(), "parameter {name} has no values");
        assert!(
            values.iter().all(|&v| bounds.contains(v)),
            "initial values of parameter {name} violate its bounds"
        );
        self.parameters.push(Parameter {
            name,
            values,
            bounds,
        });
        ParameterId(self.parameters.len() - 1)
    }

    pub fn add_scalar(
        &mut self,
        name: impl Into<String>,
        value: f64,
        bounds: Bounds,
    ) -> ParameterId {
        self.add_parameter(name, vec![value], bounds)
    }

    pub fn parameter_name(&self, id: ParameterId) -> &str {
        &self.parameters[id.0].name
    }

    pub fn bounds(&self, id: ParameterId) -> Bounds {
        self.parameters[id.0].bounds
    }

    pub fn dim(&self, id: ParameterId) -> usize {
        self.parameters[id.0].values.len()
    }

    pub fn value(&self, id: ParameterId, index: usize) -> f64 {
        self.parameters[id.0].values[index]
    }

    pub fn values(&self, id: ParameterId) -> &[f64] {
        &self.parameters[id.0].values
    }

    /// Write one entry of a parameter, journaling the previous value so the
    /// enclosing transaction can roll it back.
    pub fn set_value(&mut self, id: ParameterId, index: usize, value: f64) {
        let old_value = self.parameters[id.0].values[index];
        self.journal.push(JournalEntry {
            parameter: id.0,
            index,
            old_value,
        });
        self.parameters[id.0].values[index] = value;
        self.version += 1;
    }

    /// Monotone counter bumped by every write, including rollback writes.
    pub fn version(&self) -> u64 {
        self.version
    }

    /// Begin a transaction. A journal left over from a previous iteration is
    /// discarded, which makes those writes permanent.
    pub fn store_state(&mut self) {
        self.journal.clear();
    }

    /// Roll back every write since the last `store_state`, in reverse order.
    pub fn restore_state(&mut self) {
        while let Some(entry) = self.journal.pop() {
            self.parameters[entry.parameter].values[entry.index] = entry.old_value;
            self.version += 1;
        }
    }

    /// Commit the writes since the last `store_state`.
    pub fn accept_state(&mut self) {
        debug_assert!(
            self.journal.iter().all(|entry| {
                let param = &self.parameters[entry.parameter];
                param.bounds.contains(param.values[entry.index])
            }),
            "committed parameter value violates its bounds"
        );
        self.journal.clear();
    }
}
