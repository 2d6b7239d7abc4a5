//! Pixel buffers produced by image expressions, and the renderer seam that turns
//! them into a data url.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Raw RGBA pixel buffer, optionally placed within the image bounds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PixelBuffer {
    pub width: u32,
    pub height: u32,
    /// Base64 encoded pixel data.
    pub buffer: String,
    #[serde(default)]
    pub x: Option<f64>,
    #[serde(default)]
    pub y: Option<f64>,
}

impl PixelBuffer {
    /// Interpret an expression result as one or more pixel buffers.
    ///
    /// Accepts a single buffer object or an array of them. Returns `None` for
    /// anything else (strings are data urls, not buffers).
    pub fn from_value(value: &Value) -> Option<Vec<PixelBuffer>> {
        match value {
            Value::Object(_) => serde_json::from_value(value.clone()).ok().map(|b| vec![b]),
            Value::Array(items) if !items.is_empty() => {
                items.iter().map(|v| serde_json::from_value(v.clone()).ok()).collect()
            }
            _ => None,
        }
    }
}

/// Rasterizes pixel buffers into an image data url.
///
/// Called off the conversion pass, possibly from several threads at once.
pub trait PixelBufferRenderer: Send + Sync {
    fn draw_pixel_buffers(&self, buffers: &[PixelBuffer]) -> Option<String>;
}

/// Renderer that produces nothing; images resolved from buffers stay empty.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullRenderer;

impl PixelBufferRenderer for NullRenderer {
    fn draw_pixel_buffers(&self, _buffers: &[PixelBuffer]) -> Option<String> {
        None
    }
}
