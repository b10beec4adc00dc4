//! Layer compositing and projection for PaintFE.
//!
//! A [`stack::Image`] owns a layer stack, the selection and a tiled
//! [`projection::Projection`] that flattens the stack one dirty rectangle at
//! a time. Edits reach drawables through [`ops::apply`].

#![allow(clippy::too_many_arguments)]

pub mod logger;

pub mod buffer;
pub mod cli;
pub mod error;
pub mod history;
pub mod item;
pub mod ops;
pub mod projection;
pub mod settings;
pub mod stack;

pub use buffer::{BaseType, Colormap, Encoding, PixelBuffer, PixelStore, Rect, Storage, TiledBuffer};
pub use error::{CompositeError, Result};
pub use history::{Command, History, UndoSink};
pub use item::{Channel, Drawable, ItemId, Layer};
pub use ops::apply::{apply_buffer, fade_last, replace_buffer, ApplyOptions};
pub use ops::blend::BlendMode;
pub use ops::combine::CombinationMode;
pub use projection::{ConstructStrategy, Projection};
pub use settings::{Engine, ProjectionSettings};
pub use stack::{Image, LayerStack};
