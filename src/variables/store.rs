//! In-memory variable store and the parser built on top of it.

use std::collections::{HashMap, HashSet};

use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::expression;
use super::{
    value_to_display, ExecuteResult, ExpressionType, ParseResult, VariablesParser, OPTIONS_PREFIX,
    UNKNOWN_VARIABLE_MARKER,
};

static VARIABLE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\$\(([^:$)]+):([^)$]+)\)").expect("variable pattern is valid")
});

/// Variable values keyed by full id (`connection:name`).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VariableStore {
    values: HashMap<String, Value>,
}

impl VariableStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: &str) -> Option<&Value> {
        self.values.get(id)
    }

    /// Set one value. Returns true if the stored value changed.
    pub fn set(&mut self, id: impl Into<String>, value: Value) -> bool {
        let id = id.into();
        if self.values.get(&id) == Some(&value) {
            return false;
        }
        self.values.insert(id, value);
        true
    }

    /// Set many values, returning the ids whose value actually changed.
    pub fn set_many(&mut self, values: impl IntoIterator<Item = (String, Value)>) -> HashSet<String> {
        values
            .into_iter()
            .filter_map(|(id, value)| self.set(id.clone(), value).then_some(id))
            .collect()
    }

    pub fn remove(&mut self, id: &str) -> Option<Value> {
        self.values.remove(id)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Borrow a parser reading from this store.
    pub fn parser(&self) -> StoreParser<'_> {
        StoreParser::new(self)
    }
}

/// Parser over a [`VariableStore`], with optional local `options:` bindings.
///
/// Local bindings are not reported in `variable_ids`: they are fixed for the
/// lifetime of the parser, so they can never be the reason a cached result changes.
#[derive(Debug, Clone)]
pub struct StoreParser<'a> {
    store: &'a VariableStore,
    locals: HashMap<String, Value>,
}

impl<'a> StoreParser<'a> {
    pub fn new(store: &'a VariableStore) -> Self {
        Self { store, locals: HashMap::new() }
    }

    fn lookup(&self, id: &str, used: &mut HashSet<String>) -> Option<Value> {
        if let Some(value) = self.locals.get(id) {
            return Some(value.clone());
        }
        used.insert(id.to_string());
        self.store.get(id).cloned()
    }
}

impl VariablesParser for StoreParser<'_> {
    fn execute_expression(&self, source: &str, required: Option<ExpressionType>) -> ExecuteResult {
        let mut used = HashSet::new();

        let parsed = match expression::parse(source) {
            Ok(parsed) => parsed,
            Err(e) => return ExecuteResult::err(e.to_string(), used),
        };

        let value = expression::evaluate(&parsed, &mut |id| self.lookup(id, &mut used));
        match value {
            Ok(value) => match required {
                Some(ty) if !ty.matches(&value) => {
                    ExecuteResult::err(format!("Expected {}, got {}", ty.as_str(), value), used)
                }
                _ => ExecuteResult::ok(value, used),
            },
            Err(e) => ExecuteResult::err(e.to_string(), used),
        }
    }

    fn parse_variables(&self, text: &str) -> ParseResult {
        let mut used = HashSet::new();
        let replaced = VARIABLE_RE.replace_all(text, |caps: &Captures<'_>| {
            let id = format!("{}:{}", &caps[1], &caps[2]);
            match self.lookup(&id, &mut used) {
                Some(value) => value_to_display(&value),
                None => UNKNOWN_VARIABLE_MARKER.to_string(),
            }
        });

        ParseResult { text: replaced.into_owned(), variable_ids: used }
    }

    fn create_child_parser(&self, overrides: HashMap<String, Value>) -> Box<dyn VariablesParser + '_> {
        let mut locals = self.locals.clone();
        for (key, value) in overrides {
            locals.insert(format!("{}:{}", OPTIONS_PREFIX, key), value);
        }
        Box::new(StoreParser { store: self.store, locals })
    }
}
