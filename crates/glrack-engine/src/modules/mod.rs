//! The five rack modules. Each is split into an audio half implementing
//! `rack::Module` and a render/UI half that owns the GPU side.

pub mod canvas;
pub mod effects;
pub mod glab;
pub mod glaze;
pub mod glcv;
pub mod glib;

pub use canvas::{CanvasModule, CanvasView};
pub use glab::{Glab, GlabModule};
pub use glaze::{GlazeModule, GlazeView};
pub use glcv::{GlcvModule, GlcvView};
pub use glib::{Glib, GlibModule};
