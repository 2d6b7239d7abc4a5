//! Per-element property resolution.
//!
//! One [`ExpressionResolver`] is created per element conversion. It resolves each
//! property from (in order of precedence) a feedback override for that property,
//! or the element's own declared value. Literals are coerced directly, expressions
//! are executed through the parser with the required result type.
//!
//! Resolution never fails: execution errors and type mismatches fall back to the
//! caller-supplied default. Every variable consulted, successful or not, is
//! accumulated into `used_variables`.

use std::collections::{HashMap, HashSet};

use serde::de::DeserializeOwned;
use serde_json::Value;

use super::draw::{HorizontalAlignment, VerticalAlignment};
use super::element::{ExpressionOrValue, RawProperty};
use crate::variables::{value_to_display, ExpressionType, VariablesParser};

/// Property overrides for one element: property name -> override.
pub type PropertyOverrides = HashMap<String, RawProperty>;

/// Overrides for a whole button: element id -> property overrides.
pub type ElementOverrides = HashMap<String, PropertyOverrides>;

/// Scale applied to coordinates and opacity stored on the 0-100 scale.
pub const PERCENT_SCALE: f64 = 0.01;

enum Source<'p, T> {
    Literal(&'p T),
    Raw(&'p Value),
    Expression(&'p str),
}

/// Resolves element properties and tracks consulted variables.
pub struct ExpressionResolver<'a> {
    parser: &'a dyn VariablesParser,
    overrides: Option<&'a PropertyOverrides>,
    used_variables: HashSet<String>,
}

impl<'a> ExpressionResolver<'a> {
    pub fn new(parser: &'a dyn VariablesParser, overrides: Option<&'a PropertyOverrides>) -> Self {
        Self { parser, overrides, used_variables: HashSet::new() }
    }

    fn source<'p, T>(
        overrides: Option<&'p PropertyOverrides>,
        name: &str,
        prop: &'p ExpressionOrValue<T>,
    ) -> Source<'p, T> {
        if let Some(over) = overrides.and_then(|o| o.get(name)) {
            return match over {
                ExpressionOrValue::Value(v) => Source::Raw(v),
                ExpressionOrValue::Expression(s) => Source::Expression(s),
            };
        }
        match prop {
            ExpressionOrValue::Value(v) => Source::Literal(v),
            ExpressionOrValue::Expression(s) => Source::Expression(s),
        }
    }

    fn execute(&mut self, source: &str, required: Option<ExpressionType>) -> Option<Value> {
        let result = self.parser.execute_expression(source, required);
        self.used_variables.extend(result.variable_ids);
        result.value.ok()
    }

    fn interpolate(&mut self, text: &str) -> String {
        let result = self.parser.parse_variables(text);
        self.used_variables.extend(result.variable_ids);
        result.text
    }

    /// Resolve a number, multiplied by `scale` (1.0 for unscaled properties).
    pub fn get_number(&mut self, name: &str, prop: &ExpressionOrValue<f64>, default: f64, scale: f64) -> f64 {
        let value = match Self::source(self.overrides, name, prop) {
            Source::Literal(v) => Some(*v),
            Source::Raw(v) => raw_number(v),
            Source::Expression(s) => self.execute(s, Some(ExpressionType::Number)).and_then(|v| v.as_f64()),
        };
        match value {
            Some(v) if v.is_finite() => v * scale,
            _ => default,
        }
    }

    /// Resolve a packed RGB(A) color.
    pub fn get_color(&mut self, name: &str, prop: &ExpressionOrValue<u32>, default: u32) -> u32 {
        let value = match Self::source(self.overrides, name, prop) {
            Source::Literal(v) => return *v,
            Source::Raw(v) => raw_number(v),
            Source::Expression(s) => self.execute(s, Some(ExpressionType::Number)).and_then(|v| v.as_f64()),
        };
        match value {
            Some(v) if v.is_finite() && v >= 0.0 && v <= u32::MAX as f64 => v as u32,
            _ => default,
        }
    }

    pub fn get_boolean(&mut self, name: &str, prop: &ExpressionOrValue<bool>, default: bool) -> bool {
        match Self::source(self.overrides, name, prop) {
            Source::Literal(v) => *v,
            Source::Raw(Value::Bool(b)) => *b,
            Source::Raw(_) => default,
            Source::Expression(s) => self
                .execute(s, Some(ExpressionType::Boolean))
                .and_then(|v| v.as_bool())
                .unwrap_or(default),
        }
    }

    /// Resolve a plain string (no variable interpolation on literals).
    pub fn get_string(&mut self, name: &str, prop: &ExpressionOrValue<String>, default: &str) -> String {
        match Self::source(self.overrides, name, prop) {
            Source::Literal(v) => v.clone(),
            Source::Raw(Value::String(s)) => s.clone(),
            Source::Raw(_) => default.to_string(),
            Source::Expression(s) => match self.execute(s, Some(ExpressionType::String)) {
                Some(Value::String(s)) => s,
                _ => default.to_string(),
            },
        }
    }

    /// Resolve display text: literals have `$(connection:name)` references interpolated.
    pub fn get_parsed_string(&mut self, name: &str, prop: &ExpressionOrValue<String>, default: &str) -> String {
        match Self::source(self.overrides, name, prop) {
            Source::Literal(v) => self.interpolate(v),
            Source::Raw(Value::String(s)) => self.interpolate(s),
            Source::Raw(other) => value_to_display(other),
            Source::Expression(s) => match self.execute(s, Some(ExpressionType::String)) {
                Some(Value::String(s)) => s,
                _ => default.to_string(),
            },
        }
    }

    /// Resolve a string-valued enum by its serialized name.
    pub fn get_enum<E: DeserializeOwned>(&mut self, name: &str, prop: &ExpressionOrValue<String>, default: E) -> E {
        let raw = match Self::source(self.overrides, name, prop) {
            Source::Literal(v) => Value::String(v.clone()),
            Source::Raw(v) => v.clone(),
            Source::Expression(s) => match self.execute(s, Some(ExpressionType::String)) {
                Some(v) => v,
                None => return default,
            },
        };
        serde_json::from_value(raw).unwrap_or(default)
    }

    /// Resolve an untyped value (composite options, image sources).
    pub fn get_raw(&mut self, name: &str, prop: &RawProperty) -> Option<Value> {
        match Self::source(self.overrides, name, prop) {
            Source::Literal(v) | Source::Raw(v) => Some(v.clone()),
            Source::Expression(s) => self.execute(s, None),
        }
    }

    pub fn get_horizontal_alignment(
        &mut self,
        name: &str,
        prop: &ExpressionOrValue<String>,
        default: HorizontalAlignment,
    ) -> HorizontalAlignment {
        match self.alignment_source(name, prop) {
            AlignmentSource::Literal(v) => serde_json::from_value(v).unwrap_or(default),
            AlignmentSource::Computed(s) => match first_letter(&s) {
                Some('l' | 's') => HorizontalAlignment::Left,
                Some('r' | 'e') => HorizontalAlignment::Right,
                _ => HorizontalAlignment::Center,
            },
            AlignmentSource::Failed => default,
        }
    }

    pub fn get_vertical_alignment(
        &mut self,
        name: &str,
        prop: &ExpressionOrValue<String>,
        default: VerticalAlignment,
    ) -> VerticalAlignment {
        match self.alignment_source(name, prop) {
            AlignmentSource::Literal(v) => serde_json::from_value(v).unwrap_or(default),
            AlignmentSource::Computed(s) => match first_letter(&s) {
                Some('t' | 's') => VerticalAlignment::Top,
                Some('b' | 'e') => VerticalAlignment::Bottom,
                _ => VerticalAlignment::Center,
            },
            AlignmentSource::Failed => default,
        }
    }

    fn alignment_source(&mut self, name: &str, prop: &ExpressionOrValue<String>) -> AlignmentSource {
        match Self::source(self.overrides, name, prop) {
            Source::Literal(v) => AlignmentSource::Literal(Value::String(v.clone())),
            Source::Raw(v) => AlignmentSource::Literal(v.clone()),
            Source::Expression(s) => match self.execute(s, Some(ExpressionType::String)) {
                Some(Value::String(s)) => AlignmentSource::Computed(s),
                _ => AlignmentSource::Failed,
            },
        }
    }

    /// Variables consulted so far.
    pub fn used_variables(&self) -> &HashSet<String> {
        &self.used_variables
    }

    pub fn into_used_variables(self) -> HashSet<String> {
        self.used_variables
    }
}

enum AlignmentSource {
    Literal(Value),
    Computed(String),
    Failed,
}

fn first_letter(s: &str) -> Option<char> {
    s.trim().to_lowercase().chars().next()
}

fn raw_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}
