//! Engine for GLSL shader modules: a shared shader registry, a compiler and
//! evaluator generic over the GPU API, and the rack modules built on them.
//!
//! Nothing here talks to a window system or a concrete GL binding; the host
//! supplies a `gpu::GpuBackend` and drives the audio and render threads.

pub mod logging;

pub mod assets;
pub mod compile;
pub mod config;
pub mod dsp;
pub mod error;
pub mod evaluator;
pub mod events;
pub mod frame;
pub mod gpu;
pub mod library;
pub mod menu;
pub mod modules;
pub mod rack;

pub use error::EngineError;
pub use library::{ModuleId, ShaderLibrary, ShaderPair, Subscription};

#[cfg(test)]
mod tests;
