//! Accumulates feedback output into a button style and element overrides.

use serde_json::Value;

use super::model::{FeedbackStyleOverride, StyleMap};
use crate::graphics::resolver::ElementOverrides;

/// Collects style contributions in feedback order. Later contributions win.
#[derive(Debug, Clone, Default)]
pub struct FeedbackStyleBuilder {
    style: StyleMap,
    overrides: ElementOverrides,
}

impl FeedbackStyleBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge a boolean feedback's partial style.
    pub fn apply_simple_style(&mut self, style: Option<&StyleMap>) {
        if let Some(style) = style {
            for (key, value) in style {
                self.style.insert(key.clone(), value.clone());
            }
        }
    }

    /// Record per-element property overrides.
    pub fn apply_overrides(&mut self, overrides: &[FeedbackStyleOverride]) {
        for o in overrides {
            self.overrides
                .entry(o.element_id.clone())
                .or_default()
                .insert(o.element_property.clone(), o.value.clone());
        }
    }

    /// Merge an advanced feedback's value. Non-object values are ignored.
    pub fn apply_complex_style(&mut self, value: &Value) {
        if let Value::Object(map) = value {
            self.apply_simple_style(Some(map));
        }
    }

    pub fn style(&self) -> &StyleMap {
        &self.style
    }

    pub fn overrides(&self) -> &ElementOverrides {
        &self.overrides
    }

    pub fn into_parts(self) -> (StyleMap, ElementOverrides) {
        (self.style, self.overrides)
    }
}
