use std::path::PathBuf;

use crossbeam_channel::Sender;

use crate::library::ModuleId;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigKind {
    Rack,
    Session,
}

#[derive(Debug, Clone)]
pub enum EngineEvent {
    /// A configuration file was successfully loaded.
    ConfigLoaded { kind: ConfigKind, path: PathBuf },

    /// A configuration file failed to load or validate.
    ConfigError { kind: ConfigKind, path: PathBuf, error: String },

    /// A shader stage or program compiled cleanly.
    ShaderCompileOk { module: &'static str, name: String },

    /// Shader compile or link failed; `log` is the bounded diagnostic.
    ShaderCompileErr { module: &'static str, name: String, log: String },

    /// An evaluator swapped in a freshly linked program.
    ProgramReady { module: &'static str, publisher: ModuleId, index: i32 },

    /// A shader pair was appended to a publisher's list.
    Published { publisher: ModuleId, index: usize, name: String },

    /// A subscription was stored (valid or not).
    Subscribed { subscriber: ModuleId, publisher: ModuleId, index: i32, valid: bool },

    /// An evaluator found its stored subscription unusable.
    SubscriptionInvalid { subscriber: ModuleId, publisher: ModuleId, index: i32 },
}

/// Optional event sender handed to the registry, evaluators and modules.
///
/// Sending never blocks and a disconnected receiver is ignored.
#[derive(Debug, Clone, Default)]
pub struct EventTx(Option<Sender<EngineEvent>>);

impl EventTx {
    pub fn new(tx: Sender<EngineEvent>) -> Self {
        Self(Some(tx))
    }

    pub fn none() -> Self {
        Self(None)
    }

    pub fn emit(&self, ev: EngineEvent) {
        if let Some(tx) = &self.0 {
            let _ = tx.send(ev);
        }
    }
}
