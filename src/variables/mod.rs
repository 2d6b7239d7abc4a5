//! Variable parser contract consumed by the conversion engine.
//!
//! The conversion engine never talks to variable storage directly. It only needs
//! three things from a parser:
//! - `execute_expression()` - evaluate an expression, optionally requiring a result type
//! - `parse_variables()` - interpolate `$(connection:name)` references into text
//! - `create_child_parser()` - scope `$(options:x)` bindings for composite expansion
//!
//! Both execution and parsing report which variable ids were consulted, even when
//! execution fails, so that cache entries can be invalidated precisely.
//!
//! [`VariableStore`] + [`StoreParser`] are an in-memory implementation used by the
//! CLI and the test suites.

pub mod expression;
pub mod store;

pub use store::{StoreParser, VariableStore};

use std::collections::{HashMap, HashSet};

use serde_json::Value;

/// Prefix of the local bindings a child parser adds for composite options.
pub const OPTIONS_PREFIX: &str = "options";

/// Marker rendered in place of variables that could not be resolved.
pub const UNKNOWN_VARIABLE_MARKER: &str = "$NA";

/// Result type an expression is required to produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExpressionType {
    Number,
    String,
    Boolean,
}

impl ExpressionType {
    /// Check whether a value satisfies this type (no coercion).
    pub fn matches(&self, value: &Value) -> bool {
        match self {
            ExpressionType::Number => value.is_number(),
            ExpressionType::String => value.is_string(),
            ExpressionType::Boolean => value.is_boolean(),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ExpressionType::Number => "number",
            ExpressionType::String => "string",
            ExpressionType::Boolean => "boolean",
        }
    }
}

/// Outcome of an expression execution.
///
/// `variable_ids` is populated even when `value` is an error.
#[derive(Debug, Clone)]
pub struct ExecuteResult {
    pub value: Result<Value, String>,
    pub variable_ids: HashSet<String>,
}

impl ExecuteResult {
    pub fn ok(value: Value, variable_ids: HashSet<String>) -> Self {
        Self { value: Ok(value), variable_ids }
    }

    pub fn err(error: impl Into<String>, variable_ids: HashSet<String>) -> Self {
        Self { value: Err(error.into()), variable_ids }
    }

    pub fn is_ok(&self) -> bool {
        self.value.is_ok()
    }
}

/// Outcome of variable interpolation into a string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseResult {
    pub text: String,
    pub variable_ids: HashSet<String>,
}

/// Parser contract: expression execution and variable interpolation.
pub trait VariablesParser {
    /// Execute an expression. When `required` is set, a result of any other type
    /// is reported as an error.
    fn execute_expression(&self, source: &str, required: Option<ExpressionType>) -> ExecuteResult;

    /// Replace every `$(connection:name)` reference in `text` with its value.
    fn parse_variables(&self, text: &str) -> ParseResult;

    /// Create a parser that additionally resolves `$(options:<id>)` from `overrides`.
    ///
    /// Keys of `overrides` are the bare option ids.
    fn create_child_parser(&self, overrides: HashMap<String, Value>) -> Box<dyn VariablesParser + '_>;
}

/// Render a value the way it appears when interpolated into text.
pub fn value_to_display(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        other => other.to_string(),
    }
}
