//! Declarative layer elements: the stored, expression-bound description of a button.
//!
//! Every property is an [`ExpressionOrValue`]: either a literal of the property's type
//! or an expression string evaluated at conversion time. Serialized form is
//! `{"isExpression": bool, "value": ...}`, matching the stored button definitions.
//!
//! Coordinates (`x`, `y`, `width`, `height`, line endpoints) and `opacity` are stored
//! on a 0-100 scale; conversion scales them by 0.01 for the draw model.

use indexmap::IndexMap;
use serde::de::{DeserializeOwned, Error as _};
use serde::ser::SerializeStruct;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;

/// Literal value or expression source.
#[derive(Debug, Clone, PartialEq)]
pub enum ExpressionOrValue<T> {
    Value(T),
    Expression(String),
}

impl<T> ExpressionOrValue<T> {
    pub fn value(value: T) -> Self {
        ExpressionOrValue::Value(value)
    }

    pub fn expression(source: impl Into<String>) -> Self {
        ExpressionOrValue::Expression(source.into())
    }

    pub fn is_expression(&self) -> bool {
        matches!(self, ExpressionOrValue::Expression(_))
    }
}

impl<T: Default> Default for ExpressionOrValue<T> {
    fn default() -> Self {
        ExpressionOrValue::Value(T::default())
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawExpressionOrValue {
    #[serde(default)]
    is_expression: bool,
    #[serde(default)]
    value: Value,
}

impl<'de, T: DeserializeOwned> Deserialize<'de> for ExpressionOrValue<T> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = RawExpressionOrValue::deserialize(deserializer)?;
        if raw.is_expression {
            match raw.value {
                Value::String(source) => Ok(ExpressionOrValue::Expression(source)),
                other => Err(D::Error::custom(format!("expression must be a string, got {}", other))),
            }
        } else {
            serde_json::from_value(raw.value)
                .map(ExpressionOrValue::Value)
                .map_err(D::Error::custom)
        }
    }
}

impl<T: Serialize> Serialize for ExpressionOrValue<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut state = serializer.serialize_struct("ExpressionOrValue", 2)?;
        match self {
            ExpressionOrValue::Value(v) => {
                state.serialize_field("isExpression", &false)?;
                state.serialize_field("value", v)?;
            }
            ExpressionOrValue::Expression(source) => {
                state.serialize_field("isExpression", &true)?;
                state.serialize_field("value", source)?;
            }
        }
        state.end()
    }
}

/// Untyped property, as used by feedback overrides and composite options.
pub type RawProperty = ExpressionOrValue<Value>;

fn enabled_default() -> ExpressionOrValue<bool> {
    ExpressionOrValue::Value(true)
}

fn full_scale() -> ExpressionOrValue<f64> {
    ExpressionOrValue::Value(100.0)
}

fn zero() -> ExpressionOrValue<f64> {
    ExpressionOrValue::Value(0.0)
}

fn center() -> ExpressionOrValue<String> {
    ExpressionOrValue::Value("center".to_string())
}

/// Properties shared by every element except the canvas.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ElementBase {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default = "enabled_default")]
    pub enabled: ExpressionOrValue<bool>,
    #[serde(default = "full_scale")]
    pub opacity: ExpressionOrValue<f64>,
}

impl ElementBase {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: String::new(),
            enabled: enabled_default(),
            opacity: full_scale(),
        }
    }
}

/// Bounding box on the 0-100 scale.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ElementBounds {
    #[serde(default = "zero")]
    pub x: ExpressionOrValue<f64>,
    #[serde(default = "zero")]
    pub y: ExpressionOrValue<f64>,
    #[serde(default = "full_scale")]
    pub width: ExpressionOrValue<f64>,
    #[serde(default = "full_scale")]
    pub height: ExpressionOrValue<f64>,
}

impl Default for ElementBounds {
    fn default() -> Self {
        Self { x: zero(), y: zero(), width: full_scale(), height: full_scale() }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CanvasElement {
    pub id: String,
    #[serde(default)]
    pub decoration: ExpressionOrValue<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BoxElement {
    #[serde(flatten)]
    pub base: ElementBase,
    #[serde(flatten)]
    pub bounds: ElementBounds,
    #[serde(default)]
    pub color: ExpressionOrValue<u32>,
    #[serde(default)]
    pub border_width: ExpressionOrValue<f64>,
    #[serde(default)]
    pub border_color: ExpressionOrValue<u32>,
    #[serde(default)]
    pub border_position: ExpressionOrValue<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TextElement {
    #[serde(flatten)]
    pub base: ElementBase,
    #[serde(flatten)]
    pub bounds: ElementBounds,
    #[serde(default)]
    pub text: ExpressionOrValue<String>,
    #[serde(default)]
    pub font_size: ExpressionOrValue<f64>,
    #[serde(default)]
    pub color: ExpressionOrValue<u32>,
    #[serde(default = "center")]
    pub halign: ExpressionOrValue<String>,
    #[serde(default = "center")]
    pub valign: ExpressionOrValue<String>,
    #[serde(default)]
    pub outline_color: ExpressionOrValue<u32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageElement {
    #[serde(flatten)]
    pub base: ElementBase,
    #[serde(flatten)]
    pub bounds: ElementBounds,
    /// Data url, or (from an expression) one or more pixel buffers to rasterize.
    #[serde(default)]
    pub base64_image: ExpressionOrValue<Value>,
    #[serde(default = "center")]
    pub halign: ExpressionOrValue<String>,
    #[serde(default = "center")]
    pub valign: ExpressionOrValue<String>,
    #[serde(default)]
    pub fill_mode: ExpressionOrValue<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LineElement {
    #[serde(flatten)]
    pub base: ElementBase,
    #[serde(default = "zero")]
    pub from_x: ExpressionOrValue<f64>,
    #[serde(default = "zero")]
    pub from_y: ExpressionOrValue<f64>,
    #[serde(default = "full_scale")]
    pub to_x: ExpressionOrValue<f64>,
    #[serde(default = "full_scale")]
    pub to_y: ExpressionOrValue<f64>,
    #[serde(default)]
    pub border_width: ExpressionOrValue<f64>,
    #[serde(default)]
    pub border_color: ExpressionOrValue<u32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CircleElement {
    #[serde(flatten)]
    pub base: ElementBase,
    #[serde(flatten)]
    pub bounds: ElementBounds,
    #[serde(default)]
    pub color: ExpressionOrValue<u32>,
    #[serde(default = "zero")]
    pub start_angle: ExpressionOrValue<f64>,
    #[serde(default = "full_circle")]
    pub end_angle: ExpressionOrValue<f64>,
    #[serde(default)]
    pub draw_slice: ExpressionOrValue<bool>,
    #[serde(default)]
    pub border_color: ExpressionOrValue<u32>,
    #[serde(default)]
    pub border_width: ExpressionOrValue<f64>,
    #[serde(default)]
    pub border_only_arc: ExpressionOrValue<bool>,
}

fn full_circle() -> ExpressionOrValue<f64> {
    ExpressionOrValue::Value(360.0)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupElement {
    #[serde(flatten)]
    pub base: ElementBase,
    #[serde(flatten)]
    pub bounds: ElementBounds,
    #[serde(default)]
    pub children: Vec<SomeButtonGraphicsElement>,
}

/// Instance of a connection-provided composite element.
///
/// Option overrides are stored as `opt:<fieldId>` keys next to the fixed properties.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompositeElement {
    #[serde(flatten)]
    pub base: ElementBase,
    #[serde(flatten)]
    pub bounds: ElementBounds,
    pub connection_id: String,
    pub element_id: String,
    #[serde(flatten)]
    pub options: IndexMap<String, RawProperty>,
}

/// Prefix of composite option override keys.
pub const COMPOSITE_OPTION_PREFIX: &str = "opt:";

impl CompositeElement {
    /// Override for a composite option field, if set on this instance.
    pub fn option(&self, field_id: &str) -> Option<&RawProperty> {
        self.options.get(&format!("{}{}", COMPOSITE_OPTION_PREFIX, field_id))
    }

    pub fn set_option(&mut self, field_id: &str, value: RawProperty) {
        self.options.insert(format!("{}{}", COMPOSITE_OPTION_PREFIX, field_id), value);
    }
}

/// Any element of a layered button definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum SomeButtonGraphicsElement {
    Canvas(CanvasElement),
    Box(BoxElement),
    Text(TextElement),
    Image(ImageElement),
    Line(LineElement),
    Circle(CircleElement),
    Group(GroupElement),
    Composite(CompositeElement),
}

impl SomeButtonGraphicsElement {
    pub fn id(&self) -> &str {
        match self {
            SomeButtonGraphicsElement::Canvas(e) => &e.id,
            SomeButtonGraphicsElement::Box(e) => &e.base.id,
            SomeButtonGraphicsElement::Text(e) => &e.base.id,
            SomeButtonGraphicsElement::Image(e) => &e.base.id,
            SomeButtonGraphicsElement::Line(e) => &e.base.id,
            SomeButtonGraphicsElement::Circle(e) => &e.base.id,
            SomeButtonGraphicsElement::Group(e) => &e.base.id,
            SomeButtonGraphicsElement::Composite(e) => &e.base.id,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            SomeButtonGraphicsElement::Canvas(_) => "canvas",
            SomeButtonGraphicsElement::Box(_) => "box",
            SomeButtonGraphicsElement::Text(_) => "text",
            SomeButtonGraphicsElement::Image(_) => "image",
            SomeButtonGraphicsElement::Line(_) => "line",
            SomeButtonGraphicsElement::Circle(_) => "circle",
            SomeButtonGraphicsElement::Group(_) => "group",
            SomeButtonGraphicsElement::Composite(_) => "composite",
        }
    }

    /// Child elements sharing this element's id prefix (groups only).
    pub fn children(&self) -> Option<&Vec<SomeButtonGraphicsElement>> {
        match self {
            SomeButtonGraphicsElement::Group(g) => Some(&g.children),
            _ => None,
        }
    }

    pub fn children_mut(&mut self) -> Option<&mut Vec<SomeButtonGraphicsElement>> {
        match self {
            SomeButtonGraphicsElement::Group(g) => Some(&mut g.children),
            _ => None,
        }
    }
}

/// Find an element by id anywhere in a layer tree.
pub fn find_element<'a>(
    elements: &'a [SomeButtonGraphicsElement],
    id: &str,
) -> Option<&'a SomeButtonGraphicsElement> {
    elements.iter().find_map(|element| {
        if element.id() == id {
            Some(element)
        } else {
            element.children().and_then(|children| find_element(children, id))
        }
    })
}

/// Mutable variant of [`find_element`].
pub fn find_element_mut<'a>(
    elements: &'a mut [SomeButtonGraphicsElement],
    id: &str,
) -> Option<&'a mut SomeButtonGraphicsElement> {
    for element in elements.iter_mut() {
        if element.id() == id {
            return Some(element);
        }
        if let Some(found) = element.children_mut().and_then(|c| find_element_mut(c, id)) {
            return Some(found);
        }
    }
    None
}

/// Find the list holding `id` and its index in that list.
pub fn find_parent_list_mut<'a>(
    elements: &'a mut Vec<SomeButtonGraphicsElement>,
    id: &str,
) -> Option<(&'a mut Vec<SomeButtonGraphicsElement>, usize)> {
    if let Some(index) = elements.iter().position(|e| e.id() == id) {
        return Some((elements, index));
    }
    for element in elements.iter_mut() {
        if let Some(found) = element.children_mut().and_then(|c| find_parent_list_mut(c, id)) {
            return Some(found);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_expression_or_value_serde() {
        let literal: ExpressionOrValue<f64> = serde_json::from_value(json!({"isExpression": false, "value": 12.5})).unwrap();
        assert_eq!(literal, ExpressionOrValue::Value(12.5));

        let expr: ExpressionOrValue<f64> =
            serde_json::from_value(json!({"isExpression": true, "value": "$(a:b) + 1"})).unwrap();
        assert_eq!(expr, ExpressionOrValue::expression("$(a:b) + 1"));

        let bad = serde_json::from_value::<ExpressionOrValue<f64>>(json!({"isExpression": true, "value": 3}));
        assert!(bad.is_err());

        assert_eq!(
            serde_json::to_value(&expr).unwrap(),
            json!({"isExpression": true, "value": "$(a:b) + 1"})
        );
    }

    #[test]
    fn test_element_tagged_parse() {
        let element: SomeButtonGraphicsElement = serde_json::from_value(json!({
            "type": "composite",
            "id": "comp1",
            "connectionId": "conn",
            "elementId": "meter",
            "x": {"isExpression": false, "value": 10},
            "opt:label": {"isExpression": false, "value": "abc"}
        }))
        .unwrap();

        let SomeButtonGraphicsElement::Composite(comp) = &element else {
            panic!("expected composite");
        };
        assert_eq!(comp.element_id, "meter");
        assert_eq!(comp.bounds.x, ExpressionOrValue::Value(10.0));
        assert_eq!(comp.bounds.width, ExpressionOrValue::Value(100.0));
        assert_eq!(comp.option("label"), Some(&ExpressionOrValue::Value(json!("abc"))));
        assert_eq!(comp.base.enabled, ExpressionOrValue::Value(true));
    }

    #[test]
    fn test_find_nested_element() {
        let mut elements: Vec<SomeButtonGraphicsElement> = serde_json::from_value(json!([
            {"type": "box", "id": "a"},
            {"type": "group", "id": "g", "children": [{"type": "text", "id": "t"}]}
        ]))
        .unwrap();

        assert_eq!(find_element(&elements, "t").map(|e| e.type_name()), Some("text"));
        let (list, index) = find_parent_list_mut(&mut elements, "t").unwrap();
        assert_eq!(index, 0);
        assert_eq!(list.len(), 1);
        assert!(find_element_mut(&mut elements, "missing").is_none());
    }
}
