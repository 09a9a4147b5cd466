use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::assets::{read_to_string_result, write_string_result, AssetsRoot};
use crate::error::EngineError;

/// How strictly to interpret/validate config files.
///
/// - `Lenient` is forward-compatible: unknown fields are ignored and missing optional
///   keys fall back to defaults.
/// - `Strict` is fail-fast: unknown top-level fields and out-of-range values
///   become errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigMode {
    Lenient,
    Strict,
}

#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct CanvasSize {
    pub width: u32,
    pub height: u32,
}

impl Default for CanvasSize {
    fn default() -> Self {
        Self { width: 975, height: 800 }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct LabFiles {
    pub vert: String,
    pub frag: String,
}

/// Shader names the consumer modules subscribe to at startup.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct StartupSubscriptions {
    #[serde(default)]
    pub canvas: Option<String>,
    #[serde(default)]
    pub glaze: Option<String>,
    #[serde(default)]
    pub glcv: Option<String>,
}

/// Typed view of `assets/rack.json`.
///
/// Versioning: `version` defaults to 1 when omitted.
/// Unknown fields are ignored by default (serde default behavior), keeping configs forward-compatible.
#[derive(Debug, Clone, Deserialize)]
pub struct RackJson {
    #[serde(default = "default_version")]
    pub version: u32,
    #[serde(default = "default_sample_rate")]
    pub sample_rate: f32,
    #[serde(default = "default_block_size")]
    pub block_size: usize,
    #[serde(default)]
    pub canvas: CanvasSize,
    #[serde(default = "default_library_dirs")]
    pub library_dirs: Vec<String>,
    #[serde(default)]
    pub lab: Option<LabFiles>,
    #[serde(default)]
    pub subscriptions: StartupSubscriptions,
    #[serde(default)]
    pub session: Option<String>,
    #[serde(default)]
    pub log_file: Option<String>,
}

/// Strict version of `RackJson` that fails on unknown fields.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
struct RackJsonStrict {
    #[serde(default = "default_version")]
    version: u32,
    #[serde(default = "default_sample_rate")]
    sample_rate: f32,
    #[serde(default = "default_block_size")]
    block_size: usize,
    #[serde(default)]
    canvas: CanvasSize,
    #[serde(default = "default_library_dirs")]
    library_dirs: Vec<String>,
    #[serde(default)]
    lab: Option<LabFiles>,
    #[serde(default)]
    subscriptions: StartupSubscriptions,
    #[serde(default)]
    session: Option<String>,
    #[serde(default)]
    log_file: Option<String>,
}

impl From<RackJsonStrict> for RackJson {
    fn from(s: RackJsonStrict) -> Self {
        Self {
            version: s.version,
            sample_rate: s.sample_rate,
            block_size: s.block_size,
            canvas: s.canvas,
            library_dirs: s.library_dirs,
            lab: s.lab,
            subscriptions: s.subscriptions,
            session: s.session,
            log_file: s.log_file,
        }
    }
}

impl Default for RackJson {
    fn default() -> Self {
        Self {
            version: default_version(),
            sample_rate: default_sample_rate(),
            block_size: default_block_size(),
            canvas: CanvasSize::default(),
            library_dirs: default_library_dirs(),
            lab: None,
            subscriptions: StartupSubscriptions::default(),
            session: None,
            log_file: None,
        }
    }
}

fn default_version() -> u32 {
    1
}
fn default_sample_rate() -> f32 {
    48_000.0
}
fn default_block_size() -> usize {
    256
}
fn default_library_dirs() -> Vec<String> {
    vec!["shaders".to_string()]
}

pub const MAX_BLOCK_SIZE: usize = 4096;

/// `rack.json` with every path resolved against the assets directory.
#[derive(Debug, Clone)]
pub struct RackConfig {
    pub path: PathBuf,
    pub sample_rate: f32,
    pub block_size: usize,
    pub canvas: CanvasSize,
    pub library_dirs: Vec<PathBuf>,
    pub lab_vert: Option<PathBuf>,
    pub lab_frag: Option<PathBuf>,
    pub subscriptions: StartupSubscriptions,
    pub session_path: PathBuf,
    pub log_file: Option<PathBuf>,
}

/// Load `assets/rack(.<os>).json`. A missing file yields the defaults.
pub fn load_rack_config(assets: &AssetsRoot, mode: ConfigMode) -> Result<RackConfig, EngineError> {
    let path = assets.pick_platform_json("rack");

    let rj: RackJson = if path.exists() {
        let data = read_to_string_result(&path)?;
        let parsed = match mode {
            ConfigMode::Lenient => serde_json::from_str::<RackJson>(&data),
            ConfigMode::Strict => serde_json::from_str::<RackJsonStrict>(&data).map(RackJson::from),
        };
        parsed.map_err(|e| EngineError::Json {
            path: path.clone(),
            source: e,
        })?
    } else {
        RackJson::default()
    };

    if mode == ConfigMode::Strict {
        if rj.version != 1 {
            return Err(EngineError::InvalidConfig {
                path,
                msg: format!("unsupported rack.json version {} (expected 1)", rj.version),
            });
        }
        if !(rj.sample_rate.is_finite() && rj.sample_rate > 0.0) {
            return Err(EngineError::InvalidConfig {
                path,
                msg: format!("sample_rate must be positive, got {}", rj.sample_rate),
            });
        }
        if rj.block_size == 0 || rj.block_size > MAX_BLOCK_SIZE {
            return Err(EngineError::InvalidConfig {
                path,
                msg: format!("block_size must be in 1..={MAX_BLOCK_SIZE}, got {}", rj.block_size),
            });
        }
    }

    // Lenient mode repairs what it can.
    let sample_rate = if rj.sample_rate.is_finite() && rj.sample_rate > 0.0 {
        rj.sample_rate
    } else {
        default_sample_rate()
    };
    let block_size = rj.block_size.clamp(1, MAX_BLOCK_SIZE);

    Ok(RackConfig {
        sample_rate,
        block_size,
        canvas: CanvasSize {
            width: rj.canvas.width.max(1),
            height: rj.canvas.height.max(1),
        },
        library_dirs: rj.library_dirs.iter().map(|s| assets.resolve(s)).collect(),
        lab_vert: rj.lab.as_ref().map(|l| assets.resolve(&l.vert)),
        lab_frag: rj.lab.as_ref().map(|l| assets.resolve(&l.frag)),
        subscriptions: rj.subscriptions,
        session_path: assets.resolve(rj.session.as_deref().unwrap_or("session.json")),
        log_file: rj.log_file.as_deref().map(|s| assets.resolve(s)),
        path,
    })
}

/// A JSON file loaded from disk (path + raw text + parsed `serde_json::Value`).
///
/// Kept untyped so the host can run friendly validation over the raw document.
#[derive(Debug, Clone)]
pub struct LoadedJson {
    pub path: PathBuf,
    pub src: String,
    pub value: Value,
}

/// Load any JSON file as `LoadedJson`.
pub fn load_json_file(path: &Path) -> Result<LoadedJson, EngineError> {
    let src = read_to_string_result(path)?;
    let value: Value = serde_json::from_str(&src).map_err(|e| EngineError::Json {
        path: path.to_path_buf(),
        source: e,
    })?;
    Ok(LoadedJson {
        path: path.to_path_buf(),
        src,
        value,
    })
}

/// Persisted editor state of the authoring unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GlabState {
    #[serde(rename = "vertexShader")]
    pub vertex_shader: String,
    #[serde(rename = "fragmentShader")]
    pub fragment_shader: String,
}

/// Persisted effect selection of the stereo processor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GlazeState {
    #[serde(rename = "currentMode")]
    pub current_mode: i64,
}

/// On-disk session: per-module state documents keyed by module name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionFile {
    #[serde(default = "default_version")]
    pub version: u32,
    #[serde(default)]
    pub modules: BTreeMap<String, Value>,
}

impl Default for SessionFile {
    fn default() -> Self {
        Self {
            version: default_version(),
            modules: BTreeMap::new(),
        }
    }
}

impl SessionFile {
    pub fn insert<T: Serialize>(&mut self, module: &str, state: &T) -> Result<(), serde_json::Error> {
        self.modules.insert(module.to_string(), serde_json::to_value(state)?);
        Ok(())
    }

    /// `None` when the module has no stored state.
    pub fn get<T: serde::de::DeserializeOwned>(&self, module: &str) -> Option<Result<T, serde_json::Error>> {
        self.modules
            .get(module)
            .map(|v| serde_json::from_value::<T>(v.clone()))
    }
}

pub fn save_session(path: &Path, session: &SessionFile) -> Result<(), EngineError> {
    let text = serde_json::to_string_pretty(session).map_err(|e| EngineError::Json {
        path: path.to_path_buf(),
        source: e,
    })?;
    write_string_result(path, &text)
}

/// Load a session file; `Ok(None)` when there is none yet.
pub fn load_session(path: &Path) -> Result<Option<SessionFile>, EngineError> {
    if !path.exists() {
        return Ok(None);
    }
    let src = read_to_string_result(path)?;
    serde_json::from_str(&src)
        .map(Some)
        .map_err(|e| EngineError::Json {
            path: path.to_path_buf(),
            source: e,
        })
}
