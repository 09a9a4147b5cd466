use std::{fmt, path::PathBuf};

use crate::gpu::ShaderStage;
use crate::library::ModuleId;

#[derive(Debug)]
pub enum EngineError {
    /// The `assets/` folder could not be found or was invalid.
    AssetsNotFound { start_dir: PathBuf },
    /// I/O error reading or writing a file.
    Io { path: PathBuf, source: std::io::Error },
    /// JSON parse or serialize error for a file.
    Json { path: PathBuf, source: serde_json::Error },

    /// Config is syntactically valid but semantically invalid.
    InvalidConfig { path: PathBuf, msg: String },

    /// A `.vert` file has no `.frag` sibling.
    MissingFragment { vert: PathBuf, frag: PathBuf },
    /// A shader file exists but holds no source text.
    EmptySource { path: PathBuf },

    /// Shaders can only be added under a registered publisher.
    UnregisteredPublisher { publisher: ModuleId },

    /// A shader stage failed to compile. `log` is the bounded driver diagnostic.
    Compile { stage: ShaderStage, log: String },
    /// The program failed to link.
    Link { log: String },
    /// The GPU refused to allocate an object.
    Gpu(String),

    /// GPU work was requested before the render context was claimed.
    NotInitialized { tag: &'static str },
}

impl EngineError {
    /// Compiler or linker diagnostic, if this error carries one.
    pub fn diagnostic(&self) -> Option<&str> {
        match self {
            EngineError::Compile { log, .. } | EngineError::Link { log } => Some(log),
            _ => None,
        }
    }
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EngineError::AssetsNotFound { start_dir } => {
                write!(f, "Could not locate assets/ starting from {}", start_dir.display())
            }
            EngineError::Io { path, source } => {
                write!(f, "I/O error for {}: {}", path.display(), source)
            }
            EngineError::Json { path, source } => {
                write!(f, "JSON error for {}: {}", path.display(), source)
            }
            EngineError::InvalidConfig { path, msg } => {
                write!(f, "Invalid config {}: {}", path.display(), msg)
            }
            EngineError::MissingFragment { vert, frag } => {
                write!(
                    f,
                    "No fragment shader {} next to {}",
                    frag.display(),
                    vert.display()
                )
            }
            EngineError::EmptySource { path } => {
                write!(f, "Shader file {} is empty", path.display())
            }
            EngineError::UnregisteredPublisher { publisher } => {
                write!(f, "Publisher {publisher} is not registered")
            }
            EngineError::Compile { stage, log } => {
                write!(f, "{stage} shader compile error:\n{log}")
            }
            EngineError::Link { log } => write!(f, "Program link error:\n{log}"),
            EngineError::Gpu(msg) => write!(f, "GPU error: {msg}"),
            EngineError::NotInitialized { tag } => {
                write!(f, "{tag}: render context not initialized yet")
            }
        }
    }
}

impl std::error::Error for EngineError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            EngineError::Io { source, .. } => Some(source),
            EngineError::Json { source, .. } => Some(source),
            _ => None,
        }
    }
}
