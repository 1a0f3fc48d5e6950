//! Run context: the `$`-rooted value tree the Expression Engine resolves
//! paths against: `{input, steps: {<name>: {output, error?}}, vars, secret}`.

use serde_json::{Map, Value};
use std::collections::HashMap;

use flow_domain::StepId;

/// Per-run (or per-iteration, for loop/foreach bodies) mutable context fed
/// to the Expression Engine and to step input assembly.
#[derive(Debug, Clone, Default)]
pub struct RunContext {
    pub input: Value,
    /// Keyed by step *name*, resolved at `$.steps.<step_name|slug>`.
    pub steps: HashMap<String, StepContextEntry>,
    pub vars: Value,
    pub secret: Value,
    /// Root-level keys folded directly into `as_value()`'s top object, the
    /// same way the `filter` builtin exposes `$item` — used for a
    /// foreach/while iteration's `$item`/`$index`/`$iteration`, which the
    /// spec names at the context root rather than under `$.vars`.
    pub extra: Value,
}

#[derive(Debug, Clone, Default)]
pub struct StepContextEntry {
    pub output: Value,
    pub error: Option<Value>,
}

impl RunContext {
    pub fn new(input: Value) -> Self {
        Self {
            input,
            steps: HashMap::new(),
            vars: Value::Object(Map::new()),
            secret: Value::Null,
            extra: Value::Object(Map::new()),
        }
    }

    pub fn record_output(&mut self, step_name: &str, output: Value) {
        self.steps
            .entry(step_name.to_string())
            .or_default()
            .output = output;
    }

    pub fn record_error(&mut self, step_name: &str, error: Value) {
        self.steps
            .entry(step_name.to_string())
            .or_default()
            .error = Some(error);
    }

    /// Renders the `$`-rooted tree this context represents, for the
    /// Expression Engine to walk.
    pub fn as_value(&self) -> Value {
        let mut steps = Map::new();
        for (name, entry) in &self.steps {
            let mut m = Map::new();
            m.insert("output".to_string(), entry.output.clone());
            if let Some(err) = &entry.error {
                m.insert("error".to_string(), err.clone());
            }
            steps.insert(name.clone(), Value::Object(m));
        }
        let mut root = Map::new();
        if let Value::Object(extra) = &self.extra {
            for (k, v) in extra {
                root.insert(k.clone(), v.clone());
            }
        }
        root.insert("input".to_string(), self.input.clone());
        root.insert("steps".to_string(), Value::Object(steps));
        root.insert("vars".to_string(), self.vars.clone());
        root.insert("secret".to_string(), self.secret.clone());
        Value::Object(root)
    }

    /// A child context for a foreach/while iteration: same root, with the
    /// iteration-local `$item`/`$index`/`$iteration` folded directly into
    /// the context root (so a body expression reads them as `$item`,
    /// `$index`, `$iteration` per §4.6), not nested under `$.vars`.
    pub fn with_iteration_root(&self, extra: Value) -> Self {
        let mut clone = self.clone();
        clone.extra = crate::injection::merge_json(&clone.extra, &extra);
        clone
    }
}

/// Resolves a step's resolved *output name* key: `$.steps.X` is indexed by
/// "step name|slug"; this workspace keys by `Step::name`.
pub fn step_context_key(step_id: StepId, name_lookup: &HashMap<StepId, String>) -> Option<String> {
    name_lookup.get(&step_id).cloned()
}
