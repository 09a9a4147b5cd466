//! Glib: a library module that publishes shader pairs loaded from disk.
//!
//! Each `<stem>.vert` with a `<stem>.frag` sibling becomes one entry, appended
//! in load order. Entries are validated on the render thread and the verdict
//! is written back to the registry so subscribers never build a broken pair.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering};
use std::sync::Arc;

use crate::assets::{load_shader_pair, scan_shader_dir};
use crate::compile::trial_compile;
use crate::dsp::{logic, SchmittTrigger};
use crate::error::EngineError;
use crate::events::{EngineEvent, EventTx};
use crate::gpu::{GpuBackend, ShaderStage};
use crate::library::{ModuleId, ShaderLibrary};
use crate::rack::{Module, PortLayout, Ports, ProcessArgs};
use crate::{logi, logw};

const TAG: &str = "GLIB";

/// Entries beyond this are not mirrored to the audio half.
pub const MAX_ENTRIES: usize = 256;

const LOADED: u8 = 1;
const VERTEX_OK: u8 = 2;
const FRAGMENT_OK: u8 = 4;

#[derive(Debug)]
pub struct GlibShared {
    current: AtomicUsize,
    count: AtomicUsize,
    flags: [AtomicU8; MAX_ENTRIES],
}

impl Default for GlibShared {
    fn default() -> Self {
        Self {
            current: AtomicUsize::new(0),
            count: AtomicUsize::new(0),
            flags: std::array::from_fn(|_| AtomicU8::new(0)),
        }
    }
}

impl GlibShared {
    fn flags_of(&self, index: usize) -> u8 {
        self.flags
            .get(index)
            .map(|f| f.load(Ordering::Acquire))
            .unwrap_or(0)
    }
}

#[derive(Debug, Clone)]
pub struct GlibEntry {
    /// Position in this publisher's registry list.
    pub index: usize,
    pub name: String,
    /// `None` for entries appended by another module (a Glab re-publish).
    pub path: Option<PathBuf>,
    pub vertex_valid: Option<bool>,
    pub fragment_valid: Option<bool>,
}

pub struct Glib {
    id: ModuleId,
    library: Arc<ShaderLibrary>,
    shared: Arc<GlibShared>,
    events: EventTx,
    entries: Vec<GlibEntry>,
    pending: Vec<usize>,
}

impl Glib {
    pub fn new(id: ModuleId, library: Arc<ShaderLibrary>) -> Self {
        Self {
            id,
            library,
            shared: Arc::new(GlibShared::default()),
            events: EventTx::none(),
            entries: Vec::new(),
            pending: Vec::new(),
        }
    }

    pub fn with_events(mut self, events: EventTx) -> Self {
        self.events = events;
        self
    }

    pub fn module(&self) -> GlibModule {
        GlibModule::new(self.id, self.shared.clone())
    }

    pub fn id(&self) -> ModuleId {
        self.id
    }

    /// Register as a publisher. Call when the module enters the patch.
    pub fn on_add(&self) {
        self.library.register_publisher(self.id);
    }

    /// Unregister. Subscribers keep their (now dead) subscriptions.
    pub fn on_remove(&self) {
        self.library.remove_publisher(self.id);
    }

    pub fn entries(&self) -> &[GlibEntry] {
        &self.entries
    }

    pub fn current_index(&self) -> usize {
        self.shared.current.load(Ordering::Acquire)
    }

    pub fn current(&self) -> Option<&GlibEntry> {
        let index = self.current_index();
        self.entries.iter().find(|e| e.index == index)
    }

    /// Load one pair and publish it. The current entry moves to it.
    pub fn load_pair(&mut self, vert_path: &Path) -> Result<usize, EngineError> {
        let pair = load_shader_pair(vert_path)?;
        let name = pair.name.clone();
        let index = self.library.add_shader(self.id, pair)?;

        self.track(index, name.clone(), Some(canonical(vert_path)));
        self.shared.current.store(index, Ordering::Release);

        logi!(TAG, "loaded '{name}' as #{index} from {}", vert_path.display());
        Ok(index)
    }

    /// Load every pair in `dir`. Broken pairs are skipped one by one.
    pub fn load_dir(&mut self, dir: &Path) -> usize {
        let verts = match scan_shader_dir(dir) {
            Ok(v) => v,
            Err(e) => {
                logw!(TAG, "{e}");
                return 0;
            }
        };
        let mut loaded = 0;
        for vert in verts {
            match self.load_pair(&vert) {
                Ok(_) => loaded += 1,
                Err(e) => logw!(TAG, "skipping {}: {e}", vert.display()),
            }
        }
        loaded
    }

    fn track(&mut self, index: usize, name: String, path: Option<PathBuf>) {
        match self.shared.flags.get(index) {
            Some(f) => f.store(LOADED, Ordering::Release),
            None => logw!(TAG, "entry #{index} '{name}' is past {MAX_ENTRIES}; its status is not shown"),
        }
        // Kept sorted by index; foreign entries can be picked up late.
        let at = self.entries.partition_point(|e| e.index < index);
        self.entries.insert(
            at,
            GlibEntry {
                index,
                name,
                path,
                vertex_valid: None,
                fragment_valid: None,
            },
        );
        self.pending.push(index);
        let count = self.shared.count.load(Ordering::Acquire).max(index + 1);
        self.shared.count.store(count, Ordering::Release);
    }

    /// Registry index of the newest entry loaded from `path`, if any.
    pub fn find_by_path(&self, path: &Path) -> Option<usize> {
        let path = canonical(path);
        self.entries
            .iter()
            .rev()
            .find(|e| e.path.as_deref() == Some(path.as_path()))
            .map(|e| e.index)
    }

    /// Trial-compile both stages of every entry added since the last call,
    /// including entries other modules appended to this publisher.
    pub fn validate_pending<B: GpuBackend>(&mut self, gpu: &mut B) -> usize {
        let Some(list) = self.library.shaders_for_publisher(self.id) else {
            return 0;
        };
        // Not a watermark: a file load can land after a foreign append.
        for index in 0..list.len() {
            if self.entries.binary_search_by_key(&index, |e| e.index).is_err() {
                logi!(TAG, "picked up '{}' as #{index}", list[index].name);
                self.track(index, list[index].name.clone(), None);
            }
        }

        let pending = std::mem::take(&mut self.pending);
        for &index in &pending {
            let Some(pair) = list.get(index) else {
                continue;
            };
            let vertex = trial_compile(gpu, &pair.vertex_source, ShaderStage::Vertex);
            let fragment = trial_compile(gpu, &pair.fragment_source, ShaderStage::Fragment);

            let log = [&vertex, &fragment]
                .iter()
                .filter_map(|r| r.as_ref().err().map(|e| e.to_string()))
                .collect::<Vec<_>>()
                .join("\n");
            let ok = vertex.is_ok() && fragment.is_ok();
            self.library.set_validity(self.id, index, ok, log.clone());

            if let Some(entry) = self.entries.iter_mut().find(|e| e.index == index) {
                entry.vertex_valid = Some(vertex.is_ok());
                entry.fragment_valid = Some(fragment.is_ok());
            }
            if let Some(f) = self.shared.flags.get(index) {
                let mut bits = LOADED;
                if vertex.is_ok() {
                    bits |= VERTEX_OK;
                }
                if fragment.is_ok() {
                    bits |= FRAGMENT_OK;
                }
                f.store(bits, Ordering::Release);
            }

            if ok {
                self.events.emit(EngineEvent::ShaderCompileOk {
                    module: TAG,
                    name: pair.name.clone(),
                });
            } else {
                logw!(TAG, "'{}' failed validation:\n{log}", pair.name);
                self.events.emit(EngineEvent::ShaderCompileErr {
                    module: TAG,
                    name: pair.name.clone(),
                    log,
                });
            }
        }
        pending.len()
    }
}

// Watcher events carry absolute paths; config dirs may be relative or symlinked.
fn canonical(path: &Path) -> PathBuf {
    path.canonicalize().unwrap_or_else(|_| path.to_path_buf())
}

/// Audio half of Glib: steps through entries and reports their validity.
pub struct GlibModule {
    id: ModuleId,
    shared: Arc<GlibShared>,
    prev_button: SchmittTrigger,
    next_button: SchmittTrigger,
    prev_trigger: SchmittTrigger,
    next_trigger: SchmittTrigger,
}

impl GlibModule {
    pub const PREV_PARAM: usize = 0;
    pub const NEXT_PARAM: usize = 1;

    pub const PREV_INPUT: usize = 0;
    pub const NEXT_INPUT: usize = 1;

    pub const VERTEX_VALID_OUTPUT: usize = 0;
    pub const FRAGMENT_VALID_OUTPUT: usize = 1;

    pub const LOADED_LIGHT: usize = 0;
    pub const VERTEX_LIGHT: usize = 1;
    pub const FRAGMENT_LIGHT: usize = 2;

    fn new(id: ModuleId, shared: Arc<GlibShared>) -> Self {
        Self {
            id,
            shared,
            prev_button: SchmittTrigger::default(),
            next_button: SchmittTrigger::default(),
            prev_trigger: SchmittTrigger::default(),
            next_trigger: SchmittTrigger::default(),
        }
    }
}

impl Module for GlibModule {
    fn name(&self) -> &'static str {
        "glib"
    }

    fn id(&self) -> ModuleId {
        self.id
    }

    fn layout(&self) -> PortLayout {
        PortLayout {
            params: &[0.0, 0.0],
            inputs: 2,
            outputs: 2,
            lights: 3,
        }
    }

    fn process(&mut self, _args: &ProcessArgs, ports: &mut Ports) {
        let prev = self.prev_button.process(ports.param(Self::PREV_PARAM))
            | self.prev_trigger.process(ports.voltage(Self::PREV_INPUT));
        let next = self.next_button.process(ports.param(Self::NEXT_PARAM))
            | self.next_trigger.process(ports.voltage(Self::NEXT_INPUT));

        let count = self.shared.count.load(Ordering::Acquire);
        let mut current = self.shared.current.load(Ordering::Acquire);
        if prev && current > 0 {
            current -= 1;
        }
        if next && current + 1 < count {
            current += 1;
        }
        self.shared.current.store(current, Ordering::Release);

        let bits = if current < count { self.shared.flags_of(current) } else { 0 };
        let vertex_ok = bits & VERTEX_OK != 0;
        let fragment_ok = bits & FRAGMENT_OK != 0;

        ports.set_output(Self::VERTEX_VALID_OUTPUT, logic(vertex_ok));
        ports.set_output(Self::FRAGMENT_VALID_OUTPUT, logic(fragment_ok));
        ports.set_light(Self::LOADED_LIGHT, if bits & LOADED != 0 { 1.0 } else { 0.0 });
        ports.set_light(Self::VERTEX_LIGHT, if vertex_ok { 1.0 } else { 0.0 });
        ports.set_light(Self::FRAGMENT_LIGHT, if fragment_ok { 1.0 } else { 0.0 });
    }

    fn on_reset(&mut self) {
        self.shared.current.store(0, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::fake::FakeGpu;
    use crate::library::ShaderPair;

    const VERT: &str = "attribute vec3 vs_Pos;\nvoid main() {\n    gl_Position = vec4(vs_Pos, 1.0);\n}\n";
    const FRAG: &str = "void main() {\n    gl_FragColor = vec4(1.0);\n}\n";
    const BAD_FRAG: &str = "void main() {\n    gl_FragColor = vec4(1.0)\n}\n";

    fn write(dir: &Path, name: &str, text: &str) -> PathBuf {
        let p = dir.join(name);
        std::fs::write(&p, text).unwrap();
        p
    }

    fn glib() -> (Arc<ShaderLibrary>, Glib) {
        let lib = Arc::new(ShaderLibrary::new());
        let g = Glib::new(77, lib.clone());
        g.on_add();
        (lib, g)
    }

    #[test]
    fn load_dir_skips_broken_pairs() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "a.vert", VERT);
        write(dir.path(), "a.frag", FRAG);
        write(dir.path(), "b.vert", VERT); // no fragment sibling
        write(dir.path(), "c.vert", VERT);
        write(dir.path(), "c.frag", "   \n"); // empty
        write(dir.path(), "d.vert", VERT);
        write(dir.path(), "d.frag", BAD_FRAG);
        write(dir.path(), "notes.txt", "ignored");

        let (lib, mut g) = glib();
        assert_eq!(g.load_dir(dir.path()), 2);
        let names: Vec<_> = lib.shaders_for_publisher(77).unwrap().into_iter().map(|p| p.name).collect();
        assert_eq!(names, ["a", "d"]);
        assert_eq!(g.current_index(), 1);
        assert_eq!(g.find_by_path(&dir.path().join("a.vert")), Some(0));
    }

    #[test]
    fn validation_updates_registry_and_outputs() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "a.vert", VERT);
        write(dir.path(), "a.frag", FRAG);
        write(dir.path(), "d.vert", VERT);
        write(dir.path(), "d.frag", BAD_FRAG);

        let (lib, mut g) = glib();
        g.load_dir(dir.path());
        let mut gpu = FakeGpu::new();
        assert_eq!(g.validate_pending(&mut gpu), 2);
        assert_eq!(g.validate_pending(&mut gpu), 0);
        assert_eq!(gpu.live_shaders(), 0);

        let list = lib.shaders_for_publisher(77).unwrap();
        assert!(list[0].is_valid);
        assert!(!list[1].is_valid);
        assert!(!list[1].error_log.is_empty());

        let mut m = g.module();
        let mut ports = Ports::new(m.layout());
        let args = ProcessArgs::new(48_000.0, 0);
        m.process(&args, &mut ports);
        // Current entry is the broken one.
        assert_eq!(ports.outputs, vec![10.0, 0.0]);

        ports.params[GlibModule::PREV_PARAM] = 1.0;
        m.process(&args, &mut ports);
        assert_eq!(g.current_index(), 0);
        assert_eq!(ports.outputs, vec![10.0, 10.0]);
        assert_eq!(g.current().unwrap().name, "a");

        // Already at the first entry.
        ports.params[GlibModule::PREV_PARAM] = 0.0;
        m.process(&args, &mut ports);
        ports.params[GlibModule::PREV_PARAM] = 1.0;
        m.process(&args, &mut ports);
        assert_eq!(g.current_index(), 0);
    }

    #[test]
    fn foreign_appends_are_picked_up() {
        let (lib, mut g) = glib();
        lib.add_shader(77, ShaderPair::new("from_lab", VERT, FRAG)).unwrap();
        let mut gpu = FakeGpu::new();
        assert_eq!(g.validate_pending(&mut gpu), 1);
        assert_eq!(g.entries()[0].name, "from_lab");
        assert!(g.entries()[0].path.is_none());
        assert_eq!(g.entries()[0].fragment_valid, Some(true));
    }

    #[test]
    fn foreign_append_between_file_loads_is_tracked() {
        let dir = tempfile::tempdir().unwrap();
        let a = write(dir.path(), "a.vert", VERT);
        write(dir.path(), "a.frag", FRAG);
        let b = write(dir.path(), "b.vert", VERT);
        write(dir.path(), "b.frag", BAD_FRAG);

        let (lib, mut g) = glib();
        let mut gpu = FakeGpu::new();
        g.load_pair(&a).unwrap();
        assert_eq!(g.validate_pending(&mut gpu), 1);

        // A Glab re-publish lands, then a hot reload before the next frame.
        lib.add_shader(77, ShaderPair::new("from_lab", VERT, FRAG)).unwrap();
        assert_eq!(g.load_pair(&b).unwrap(), 2);
        assert_eq!(g.validate_pending(&mut gpu), 2);
        assert_eq!(g.validate_pending(&mut gpu), 0);

        let tracked: Vec<_> = g.entries().iter().map(|e| (e.index, e.name.as_str())).collect();
        assert_eq!(tracked, [(0, "a"), (1, "from_lab"), (2, "b")]);
        assert!(g.entries()[1].path.is_none());
        assert_eq!(g.entries()[1].vertex_valid, Some(true));
        assert_eq!(g.entries()[2].fragment_valid, Some(false));
        assert!(!lib.shaders_for_publisher(77).unwrap()[2].is_valid);

        // The audio half sees the picked-up entry as loaded and valid.
        let mut m = g.module();
        let mut ports = Ports::new(m.layout());
        let args = ProcessArgs::new(48_000.0, 0);
        ports.params[GlibModule::PREV_PARAM] = 1.0;
        m.process(&args, &mut ports);
        assert_eq!(g.current_index(), 1);
        assert_eq!(ports.outputs, vec![10.0, 10.0]);
        assert_eq!(ports.lights, vec![1.0, 1.0, 1.0]);
    }

    #[test]
    fn paths_match_however_the_dir_was_spelled() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("sub")).unwrap();
        write(dir.path(), "a.vert", VERT);
        write(dir.path(), "a.frag", FRAG);

        let (_lib, mut g) = glib();
        let roundabout = dir.path().join("sub").join("..").join("a.vert");
        assert_eq!(g.load_pair(&roundabout).unwrap(), 0);

        let direct = dir.path().canonicalize().unwrap().join("a.vert");
        assert_eq!(g.find_by_path(&direct), Some(0));
        assert_eq!(g.entries()[0].path.as_deref(), Some(direct.as_path()));
    }
}
