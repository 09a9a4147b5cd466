use std::path::{Path, PathBuf};

use crate::error::EngineError;
use crate::library::ShaderPair;

pub const VERTEX_EXT: &str = "vert";
pub const FRAGMENT_EXT: &str = "frag";

/// A validated root directory containing runtime assets (rack config, shader pairs, lab files).
#[derive(Debug, Clone)]
pub struct AssetsRoot {
    path: PathBuf,
}

impl AssetsRoot {
    /// Locate the `assets/` directory.
    ///
    /// Resolution order:
    /// 1) `GLRACK_ASSETS` env var (if set)
    /// 2) Search upward from `start_dir` for a folder named `assets`
    pub fn discover(start_dir: &Path) -> Result<Self, EngineError> {
        if let Ok(p) = std::env::var("GLRACK_ASSETS") {
            let pb = PathBuf::from(p);
            if pb.exists() {
                return Ok(Self { path: pb });
            }
        }

        let mut cur = start_dir.to_path_buf();
        loop {
            let cand = cur.join("assets");
            if cand.is_dir() {
                return Ok(Self { path: cand });
            }
            if !cur.pop() {
                break;
            }
        }

        Err(EngineError::AssetsNotFound {
            start_dir: start_dir.to_path_buf(),
        })
    }

    /// Use `path` as the assets root without searching.
    pub fn at(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn join(&self, rel: impl AsRef<Path>) -> PathBuf {
        self.path.join(rel)
    }

    /// Choose OS-specific JSON config if present, otherwise fall back to `<stem>.json`.
    ///
    /// Example: `rack.macos.json` overrides `rack.json` on macOS.
    pub fn pick_platform_json(&self, stem: &str) -> PathBuf {
        pick_platform_json(&self.path, stem)
    }

    /// Resolve a config-provided path against this root.
    pub fn resolve(&self, s: &str) -> PathBuf {
        resolve_assets_path(&self.path, s)
    }
}

/// Choose OS-specific JSON config if present, otherwise fall back to `<stem>.json`.
pub fn pick_platform_json(assets: &Path, stem: &str) -> PathBuf {
    let os = if cfg!(target_os = "windows") {
        "windows"
    } else if cfg!(target_os = "macos") {
        "macos"
    } else if cfg!(target_os = "linux") {
        "linux"
    } else {
        "other"
    };

    let platform = assets.join(format!("{stem}.{os}.json"));
    if platform.exists() {
        platform
    } else {
        assets.join(format!("{stem}.json"))
    }
}

/// Resolve a JSON-provided path relative to the assets directory unless it is already absolute.
pub fn resolve_assets_path(assets_dir: &Path, s: &str) -> PathBuf {
    let p = PathBuf::from(s);
    if p.is_absolute() {
        p
    } else {
        assets_dir.join(p)
    }
}

/// Read a UTF-8 file into a String (Result-based).
pub fn read_to_string_result(path: &Path) -> Result<String, EngineError> {
    std::fs::read_to_string(path).map_err(|e| EngineError::Io {
        path: path.to_path_buf(),
        source: e,
    })
}

/// Deserialize JSON from a file (Result-based).
pub fn load_json_result<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T, EngineError> {
    let s = read_to_string_result(path)?;
    serde_json::from_str(&s).map_err(|e| EngineError::Json {
        path: path.to_path_buf(),
        source: e,
    })
}

fn read_shader_file(path: &Path) -> Result<String, EngineError> {
    let src = read_to_string_result(path)?;
    if src.trim().is_empty() {
        return Err(EngineError::EmptySource {
            path: path.to_path_buf(),
        });
    }
    Ok(src)
}

/// Load `<stem>.vert` and its `<stem>.frag` sibling as a named pair.
///
/// The pair is named after the file stem. Both files must exist and hold text.
pub fn load_shader_pair(vert_path: &Path) -> Result<ShaderPair, EngineError> {
    let frag_path = vert_path.with_extension(FRAGMENT_EXT);
    if !frag_path.exists() {
        return Err(EngineError::MissingFragment {
            vert: vert_path.to_path_buf(),
            frag: frag_path,
        });
    }

    let vertex_source = read_shader_file(vert_path)?;
    let fragment_source = read_shader_file(&frag_path)?;
    let name = vert_path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "shader".to_string());

    Ok(ShaderPair::new(name, vertex_source, fragment_source))
}

/// All `.vert` files directly inside `dir`, sorted by path.
pub fn scan_shader_dir(dir: &Path) -> Result<Vec<PathBuf>, EngineError> {
    let rd = std::fs::read_dir(dir).map_err(|e| EngineError::Io {
        path: dir.to_path_buf(),
        source: e,
    })?;

    let mut out: Vec<PathBuf> = rd
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| p.is_file() && p.extension().and_then(|s| s.to_str()) == Some(VERTEX_EXT))
        .collect();
    out.sort();
    Ok(out)
}

/// Write a UTF-8 file, creating parent directories as needed.
pub fn write_string_result(path: &Path, contents: &str) -> Result<(), EngineError> {
    let io_err = |e| EngineError::Io {
        path: path.to_path_buf(),
        source: e,
    };
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent).map_err(io_err)?;
        }
    }
    std::fs::write(path, contents).map_err(io_err)
}
