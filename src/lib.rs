//! A layer compositing and non-destructive adjustment engine.
//!
//! A [`Document`] is a tree of [`Layer`]s (pixels, adjustments and groups), each with a blend
//! mode, opacity and optional [`Mask`].  Every change goes through a [`Context`], which records it
//! as an invertible [`EditCommand`] so that it can be undone, and which renders the document with
//! a tiled, cached [`Compositor`].

pub mod blend;
pub mod buffer;
pub mod cache;
pub mod color;
pub mod config;
pub mod context;
pub mod document;
pub mod effects;
pub mod error;
pub mod events;
pub mod history;
pub mod io;
pub mod layer;
pub mod mask;
pub mod persist;
pub mod render;
pub mod stroke;
pub mod types;
pub mod utils;

pub use blend::BlendMode;
pub use buffer::{Pixel, PixelBuffer, PixelFormat, ResampleFilter};
pub use color::WorkingSpace;
pub use config::EngineConfig;
pub use context::Context;
pub use document::{Document, Location};
pub use effects::{AdjustmentKind, AdjustmentOp};
pub use error::{Error, Result};
pub use events::{LayerEvent, LayerListener};
pub use history::{EditCommand, EditKind, HistoryState};
pub use io::ExportFormat;
pub use layer::{Layer, LayerId, LayerKind, Property, PropertyKind};
pub use mask::Mask;
pub use render::{RenderHandle, RenderOutput, RenderWarning};
pub use stroke::{Brush, BrushMode};
pub use utils::Rect;
