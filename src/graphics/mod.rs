//! Layered button graphics: declarative elements, their resolved draw form,
//! and the cached conversion between the two.

pub mod composite;
pub mod convert;
pub mod draw;
pub mod element;
pub mod pixels;
pub mod resolver;

pub use composite::{CompositeDefinitions, CompositeElementDefinition, CompositeElementStore};
pub use convert::{ConversionContext, ConvertResult};
pub use draw::{DrawElement, DrawElementInfo};
pub use element::{ExpressionOrValue, RawProperty, SomeButtonGraphicsElement};
pub use pixels::{NullRenderer, PixelBuffer, PixelBufferRenderer};
pub use resolver::{ElementOverrides, ExpressionResolver, PropertyOverrides};
