//! Resolved draw elements: concrete-typed output of a conversion pass.
//!
//! Hashing notes:
//! - Each element carries `content_hash`, computed over its *resolved* fields,
//!   never over the expressions that produced them.
//! - Floats hash via `to_bits`, strings and enums by value, with the element type
//!   name first so two kinds with equal fields never collide.
//! - Groups hash their own fields, then `'['`, each child hash in order, then `']'`.
//!   Reordering or reparenting children therefore changes the group signature.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use enum_dispatch::enum_dispatch;
use serde::{Deserialize, Serialize};

/// Accessors shared by every draw element.
#[enum_dispatch]
pub trait DrawElementInfo {
    /// Full element id (including any composite prefix).
    fn id(&self) -> &str;

    /// Hash of resolved content.
    fn content_hash(&self) -> u64;

    /// Whether the element resolved as enabled.
    fn enabled(&self) -> bool;
}

/// Horizontal alignment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum HorizontalAlignment {
    Left,
    #[default]
    Center,
    Right,
}

/// Vertical alignment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum VerticalAlignment {
    Top,
    #[default]
    Center,
    Bottom,
}

/// Canvas decoration style.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Decoration {
    #[default]
    FollowDefault,
    TopBar,
    Border,
    None,
}

/// Where a box border is drawn relative to its bounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum BorderPosition {
    #[default]
    Inside,
    Center,
    Outside,
}

/// How an image fills its bounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum FillMode {
    #[default]
    FitOrShrink,
    Fit,
    Fill,
    Crop,
}

/// Resolved bounds on the 0.0-1.0 scale.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct DrawBounds {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl Hash for DrawBounds {
    fn hash<H: Hasher>(&self, state: &mut H) {
        for v in [self.x, self.y, self.width, self.height] {
            v.to_bits().hash(state);
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DrawCanvas {
    pub id: String,
    pub decoration: Decoration,
    pub content_hash: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DrawBox {
    pub id: String,
    pub enabled: bool,
    pub opacity: f64,
    pub bounds: DrawBounds,
    pub color: u32,
    pub border_width: f64,
    pub border_color: u32,
    pub border_position: BorderPosition,
    pub content_hash: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DrawText {
    pub id: String,
    pub enabled: bool,
    pub opacity: f64,
    pub bounds: DrawBounds,
    pub text: String,
    pub font_size: f64,
    pub color: u32,
    pub halign: HorizontalAlignment,
    pub valign: VerticalAlignment,
    pub outline_color: u32,
    pub content_hash: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DrawImage {
    pub id: String,
    pub enabled: bool,
    pub opacity: f64,
    pub bounds: DrawBounds,
    /// Data url; filled in after the pass when rasterized from pixel buffers.
    pub base64_image: Option<String>,
    pub halign: HorizontalAlignment,
    pub valign: VerticalAlignment,
    pub fill_mode: FillMode,
    pub content_hash: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DrawLine {
    pub id: String,
    pub enabled: bool,
    pub opacity: f64,
    pub from_x: f64,
    pub from_y: f64,
    pub to_x: f64,
    pub to_y: f64,
    pub border_width: f64,
    pub border_color: u32,
    pub content_hash: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DrawCircle {
    pub id: String,
    pub enabled: bool,
    pub opacity: f64,
    pub bounds: DrawBounds,
    pub color: u32,
    pub start_angle: f64,
    pub end_angle: f64,
    pub draw_slice: bool,
    pub border_color: u32,
    pub border_width: f64,
    pub border_only_arc: bool,
    pub content_hash: u64,
}

/// Group (also the output form of composite elements).
///
/// `own_hash` covers the group's own fields; `content_hash` adds the children.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DrawGroup {
    pub id: String,
    pub enabled: bool,
    pub opacity: f64,
    pub bounds: DrawBounds,
    pub children: Vec<DrawElement>,
    pub own_hash: u64,
    pub content_hash: u64,
}

impl DrawGroup {
    /// Attach resolved children and compute the structural signature.
    pub fn with_children(mut self, children: Vec<DrawElement>) -> Self {
        let mut hasher = DefaultHasher::new();
        self.own_hash.hash(&mut hasher);
        '['.hash(&mut hasher);
        for child in &children {
            child.content_hash().hash(&mut hasher);
        }
        ']'.hash(&mut hasher);
        self.content_hash = hasher.finish();
        self.children = children;
        self
    }
}

/// Any resolved element.
#[enum_dispatch(DrawElementInfo)]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum DrawElement {
    Canvas(DrawCanvas),
    Box(DrawBox),
    Text(DrawText),
    Image(DrawImage),
    Line(DrawLine),
    Circle(DrawCircle),
    Group(DrawGroup),
}

macro_rules! impl_info {
    ($($ty:ty),*) => {
        $(impl DrawElementInfo for $ty {
            fn id(&self) -> &str {
                &self.id
            }
            fn content_hash(&self) -> u64 {
                self.content_hash
            }
            fn enabled(&self) -> bool {
                self.enabled
            }
        })*
    };
}

impl_info!(DrawBox, DrawText, DrawImage, DrawLine, DrawCircle, DrawGroup);

impl DrawElementInfo for DrawCanvas {
    fn id(&self) -> &str {
        &self.id
    }
    fn content_hash(&self) -> u64 {
        self.content_hash
    }
    fn enabled(&self) -> bool {
        true
    }
}

/// Start a content hasher for an element of the given type.
pub(crate) fn content_hasher(type_name: &str) -> DefaultHasher {
    let mut hasher = DefaultHasher::new();
    type_name.hash(&mut hasher);
    hasher
}

pub(crate) fn hash_f64(hasher: &mut DefaultHasher, values: &[f64]) {
    for v in values {
        v.to_bits().hash(hasher);
    }
}

/// Find a draw element by id anywhere in a resolved tree.
pub fn find_draw_element_mut<'a>(elements: &'a mut [DrawElement], id: &str) -> Option<&'a mut DrawElement> {
    for element in elements.iter_mut() {
        if element.id() == id {
            return Some(element);
        }
        if let DrawElement::Group(group) = element {
            if let Some(found) = find_draw_element_mut(&mut group.children, id) {
                return Some(found);
            }
        }
    }
    None
}
