//! Label expression matching.
//!
//! Scope expressions are CEL boolean expressions evaluated against a
//! resource's label map. Each label is bound as a top-level variable when its
//! key is a valid identifier, and the whole map is also bound as `labels` so
//! keys such as `team-name` stay reachable (`labels["team-name"]`).
//!
//! Compiled programs are memoized by expression text for the life of the
//! process. A compile failure is memoized too, as a permanent non-match.

use cel_interpreter::{Context, Program, Value};
use dashmap::DashMap;
use std::collections::BTreeMap;
use std::sync::{Arc, OnceLock};

/// Resource labels as supplied by the state catalog.
pub type Labels = BTreeMap<String, serde_json::Value>;

static GLOBAL_MATCHER: OnceLock<LabelMatcher> = OnceLock::new();

#[derive(Default)]
pub struct LabelMatcher {
    compiled: DashMap<String, Option<Arc<Program>>>,
}

impl LabelMatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Process-wide matcher shared by every engine instance.
    pub fn global() -> &'static LabelMatcher {
        GLOBAL_MATCHER.get_or_init(LabelMatcher::new)
    }

    pub fn matches(&self, expression: &str, labels: &Labels) -> bool {
        let expression = expression.trim();
        if expression.is_empty() {
            return true;
        }
        match self.program(expression) {
            Some(program) => evaluate(&program, labels, expression),
            None => false,
        }
    }

    /// Number of memoized expressions, failed compilations included.
    pub fn cached_len(&self) -> usize {
        self.compiled.len()
    }

    fn program(&self, expression: &str) -> Option<Arc<Program>> {
        if let Some(entry) = self.compiled.get(expression) {
            return entry.value().clone();
        }
        let compiled = match Program::compile(expression) {
            Ok(program) => Some(Arc::new(program)),
            Err(err) => {
                tracing::warn!(expression, error = %err, "label expression failed to compile");
                None
            }
        };
        self.compiled
            .entry(expression.to_string())
            .or_insert(compiled)
            .value()
            .clone()
    }
}

fn evaluate(program: &Program, labels: &Labels, expression: &str) -> bool {
    let mut context = Context::default();
    for (key, value) in labels {
        if is_identifier(key) && context.add_variable(key.as_str(), value).is_err() {
            return false;
        }
    }
    if context.add_variable("labels", labels).is_err() {
        return false;
    }
    match program.execute(&context) {
        Ok(Value::Bool(matched)) => matched,
        Ok(other) => {
            tracing::debug!(expression, result = ?other, "label expression is not boolean");
            false
        }
        Err(err) => {
            tracing::debug!(expression, error = %err, "label expression evaluation failed");
            false
        }
    }
}

fn is_identifier(key: &str) -> bool {
    let mut chars = key.chars();
    chars
        .next()
        .is_some_and(|first| first.is_ascii_alphabetic() || first == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}
