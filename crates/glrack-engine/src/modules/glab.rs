//! Glab: the shader authoring unit.
//!
//! Holds editable vertex and fragment source, trial-compiles each stage on
//! request and publishes valid pairs into the shared library. The audio half
//! only exposes buttons, triggers, validity outputs and lights.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::compile::trial_compile;
use crate::config::GlabState;
use crate::dsp::{logic, SchmittTrigger};
use crate::events::{EngineEvent, EventTx};
use crate::gpu::{GpuBackend, ShaderStage};
use crate::library::{ModuleId, ShaderLibrary, ShaderPair, Subscription};
use crate::menu::ShaderSubscriber;
use crate::rack::{Module, PortLayout, Ports, ProcessArgs};
use crate::{loge, logi, logw};

const TAG: &str = "GLAB";

pub const DEFAULT_VERTEX_SOURCE: &str = "#version 120

attribute vec3 vs_Pos;

void main() {
    gl_Position = vec4(vs_Pos, 1.0);
}
";

pub const DEFAULT_FRAGMENT_SOURCE: &str = "#version 120
uniform float audioL;
uniform float audioR;
uniform float cv1;
uniform float cv2;
uniform float cv3;
uniform float cv4;

void main() {
    vec2 uv = gl_FragCoord.xy / vec2(800, 600);
    float color = sin(uv.x * 10.0 + cv1 * 6.28) * cos(uv.y * 10.0 + cv2 * 6.28);
    color = color * 0.5 + 0.5;
    color = mix(color, (audioL + audioR) * 0.5, cv3);
    gl_FragColor = vec4(color, color * cv4, 1.0 - color, 1.0);
}
";

pub const STATUS_READY: &str = "Ready to publish shaders";
pub const STATUS_NOT_VALID: &str = "Cannot publish: Shaders must be valid first!";
pub const STATUS_NO_LIST: &str = "Failed to get shader list after publishing";

/// Flags shared between the audio half and the editor.
#[derive(Debug, Default)]
pub struct GlabShared {
    vertex_valid: AtomicBool,
    fragment_valid: AtomicBool,
    dirty: AtomicBool,
    compile_vertex: AtomicBool,
    compile_fragment: AtomicBool,
    publish: AtomicBool,
}

impl GlabShared {
    fn request_compile(&self, stage: ShaderStage) {
        match stage {
            ShaderStage::Vertex => self.compile_vertex.store(true, Ordering::Release),
            ShaderStage::Fragment => self.compile_fragment.store(true, Ordering::Release),
        }
    }

    fn take_compile(&self, stage: ShaderStage) -> bool {
        match stage {
            ShaderStage::Vertex => self.compile_vertex.swap(false, Ordering::AcqRel),
            ShaderStage::Fragment => self.compile_fragment.swap(false, Ordering::AcqRel),
        }
    }

    fn valid(&self, stage: ShaderStage) -> &AtomicBool {
        match stage {
            ShaderStage::Vertex => &self.vertex_valid,
            ShaderStage::Fragment => &self.fragment_valid,
        }
    }
}

/// Editor side of Glab. Lives on the UI/render thread.
pub struct Glab {
    id: ModuleId,
    library: Arc<ShaderLibrary>,
    shared: Arc<GlabShared>,
    events: EventTx,
    vertex_source: String,
    fragment_source: String,
    vertex_log: String,
    fragment_log: String,
    subscription: Option<Subscription>,
    status: String,
}

impl Glab {
    /// Starts with the default sources and both stages queued for a trial compile.
    pub fn new(id: ModuleId, library: Arc<ShaderLibrary>) -> Self {
        let shared = Arc::new(GlabShared::default());
        shared.request_compile(ShaderStage::Vertex);
        shared.request_compile(ShaderStage::Fragment);
        Self {
            id,
            library,
            shared,
            events: EventTx::none(),
            vertex_source: DEFAULT_VERTEX_SOURCE.to_string(),
            fragment_source: DEFAULT_FRAGMENT_SOURCE.to_string(),
            vertex_log: String::new(),
            fragment_log: String::new(),
            subscription: None,
            status: STATUS_READY.to_string(),
        }
    }

    pub fn with_events(mut self, events: EventTx) -> Self {
        self.events = events;
        self
    }

    /// The audio half, sharing this editor's flags.
    pub fn module(&self) -> GlabModule {
        GlabModule::new(self.id, self.shared.clone())
    }

    pub fn id(&self) -> ModuleId {
        self.id
    }

    pub fn vertex_source(&self) -> &str {
        &self.vertex_source
    }

    pub fn fragment_source(&self) -> &str {
        &self.fragment_source
    }

    pub fn status(&self) -> &str {
        &self.status
    }

    /// Last diagnostic for a stage; empty when it compiled.
    pub fn stage_log(&self, stage: ShaderStage) -> &str {
        match stage {
            ShaderStage::Vertex => &self.vertex_log,
            ShaderStage::Fragment => &self.fragment_log,
        }
    }

    pub fn is_valid(&self, stage: ShaderStage) -> bool {
        self.shared.valid(stage).load(Ordering::Acquire)
    }

    pub fn is_dirty(&self) -> bool {
        self.shared.dirty.load(Ordering::Acquire)
    }

    pub fn subscription(&self) -> Option<Subscription> {
        self.subscription
    }

    pub fn edit_vertex(&mut self, text: impl Into<String>) {
        self.vertex_source = text.into();
        self.shared.dirty.store(true, Ordering::Release);
        self.shared.request_compile(ShaderStage::Vertex);
    }

    pub fn edit_fragment(&mut self, text: impl Into<String>) {
        self.fragment_source = text.into();
        self.shared.dirty.store(true, Ordering::Release);
        self.shared.request_compile(ShaderStage::Fragment);
    }

    /// Queue a publish for the next `tick`, as the panel button does.
    pub fn request_publish(&self) {
        self.shared.publish.store(true, Ordering::Release);
    }

    /// Render-thread work: pending trial compiles, then a pending publish.
    pub fn tick<B: GpuBackend>(&mut self, gpu: &mut B) {
        self.run_pending_compiles(gpu);
        if self.shared.publish.swap(false, Ordering::AcqRel) {
            self.publish();
        }
    }

    /// Trial-compile every stage that asked for it. Each request is consumed once.
    pub fn run_pending_compiles<B: GpuBackend>(&mut self, gpu: &mut B) -> usize {
        let mut ran = 0;
        for stage in [ShaderStage::Vertex, ShaderStage::Fragment] {
            if self.shared.take_compile(stage) {
                self.compile_one(gpu, stage);
                ran += 1;
            }
        }
        ran
    }

    fn compile_one<B: GpuBackend>(&mut self, gpu: &mut B, stage: ShaderStage) {
        let source = match stage {
            ShaderStage::Vertex => &self.vertex_source,
            ShaderStage::Fragment => &self.fragment_source,
        };
        let result = trial_compile(gpu, source, stage);

        let log = match &result {
            Ok(()) => String::new(),
            Err(e) => e.diagnostic().unwrap_or_default().to_string(),
        };
        self.shared.valid(stage).store(result.is_ok(), Ordering::Release);

        match result {
            Ok(()) => {
                logi!(TAG, "{stage} shader compiled");
                self.status = format!("{stage} shader compiled");
                self.events.emit(EngineEvent::ShaderCompileOk {
                    module: TAG,
                    name: stage.to_string(),
                });
            }
            Err(e) => {
                logw!(TAG, "{e}");
                self.status = e.to_string();
                self.events.emit(EngineEvent::ShaderCompileErr {
                    module: TAG,
                    name: stage.to_string(),
                    log: log.clone(),
                });
            }
        }

        match stage {
            ShaderStage::Vertex => self.vertex_log = log,
            ShaderStage::Fragment => self.fragment_log = log,
        }
    }

    /// Append the current sources to the library and follow the new entry.
    ///
    /// Re-publishing while following a live entry keeps that entry's name and
    /// publisher; the old entry stays where it was.
    pub fn publish(&mut self) -> Option<Subscription> {
        if !(self.is_valid(ShaderStage::Vertex) && self.is_valid(ShaderStage::Fragment)) {
            logw!(TAG, "{STATUS_NOT_VALID}");
            self.status = STATUS_NOT_VALID.to_string();
            return None;
        }

        // Only the index is checked here; a followed entry that failed
        // validation is still updated in place of a fresh one.
        let update = self.subscription.filter(|s| s.is_valid).and_then(|s| {
            let list = self.library.shaders_for_publisher(s.publisher_id)?;
            let pair = list.get(usize::try_from(s.shader_index).ok()?)?;
            Some((s.publisher_id, pair.name.clone()))
        });

        let (publisher, name) = match update {
            Some(target) => target,
            None => {
                self.library.register_publisher(self.id);
                let count = self
                    .library
                    .shaders_for_publisher(self.id)
                    .map(|l| l.len())
                    .unwrap_or(0);
                (self.id, format!("glab_{}_{}", count + 1, clock_hhmmss()))
            }
        };

        let pair = ShaderPair::new(name.clone(), self.vertex_source.clone(), self.fragment_source.clone());
        if let Err(e) = self.library.add_shader(publisher, pair) {
            loge!(TAG, "publish failed: {e}");
            self.status = format!("Error publishing shader: {e}");
            return None;
        }

        let Some(list) = self.library.shaders_for_publisher(publisher) else {
            loge!(TAG, "{STATUS_NO_LIST}");
            self.status = STATUS_NO_LIST.to_string();
            return None;
        };
        let index = list.len() as i32 - 1;

        let sub = self.library.subscribe(self.id, publisher, index);
        self.subscription = Some(sub);
        self.shared.dirty.store(false, Ordering::Release);
        self.status = format!("Successfully published shader as '{name}'");
        logi!(TAG, "{}", self.status);
        Some(sub)
    }

    pub fn to_state(&self) -> GlabState {
        GlabState {
            vertex_shader: self.vertex_source.clone(),
            fragment_shader: self.fragment_source.clone(),
        }
    }

    /// Restore saved text verbatim; both stages compile on the next tick.
    pub fn restore(&mut self, state: GlabState) {
        self.vertex_source = state.vertex_shader;
        self.fragment_source = state.fragment_shader;
        self.shared.request_compile(ShaderStage::Vertex);
        self.shared.request_compile(ShaderStage::Fragment);
    }

    pub fn reset(&mut self) {
        self.shared.vertex_valid.store(false, Ordering::Release);
        self.shared.fragment_valid.store(false, Ordering::Release);
        self.shared.dirty.store(false, Ordering::Release);
        self.subscription = None;
        self.status.clear();
    }
}

impl ShaderSubscriber for Glab {
    fn subscriber_id(&self) -> ModuleId {
        self.id
    }

    /// Load the picked pair into the editor.
    fn on_shader_subscribe(&mut self, publisher: ModuleId, index: i32) {
        match self.library.shader_for_module(self.id) {
            Some(pair) => {
                self.vertex_source = pair.vertex_source;
                self.fragment_source = pair.fragment_source;
                self.shared.dirty.store(false, Ordering::Release);
                self.subscription = self.library.subscription(self.id);
                self.shared.request_compile(ShaderStage::Vertex);
                self.shared.request_compile(ShaderStage::Fragment);
                self.status = format!("Subscribed to shader {index} from Glib {publisher}");
                logi!(TAG, "{}", self.status);
            }
            None => {
                self.status = format!("Failed to load shader {index} from Glib {publisher}");
                logw!(TAG, "{}", self.status);
            }
        }
    }
}

fn clock_hhmmss() -> String {
    let now = time::OffsetDateTime::now_local().unwrap_or_else(|_| time::OffsetDateTime::now_utc());
    format!("{:02}{:02}{:02}", now.hour(), now.minute(), now.second())
}

/// Audio half of Glab.
pub struct GlabModule {
    id: ModuleId,
    shared: Arc<GlabShared>,
    vertex_button: SchmittTrigger,
    fragment_button: SchmittTrigger,
    vertex_trigger: SchmittTrigger,
    fragment_trigger: SchmittTrigger,
    publish_button: SchmittTrigger,
}

impl GlabModule {
    pub const COMPILE_VERTEX_PARAM: usize = 0;
    pub const COMPILE_FRAGMENT_PARAM: usize = 1;
    pub const PUBLISH_PARAM: usize = 2;

    pub const COMPILE_VERTEX_INPUT: usize = 0;
    pub const COMPILE_FRAGMENT_INPUT: usize = 1;

    pub const VERTEX_VALID_OUTPUT: usize = 0;
    pub const FRAGMENT_VALID_OUTPUT: usize = 1;

    pub const VERTEX_LIGHT: usize = 0;
    pub const FRAGMENT_LIGHT: usize = 1;
    /// Red, green and blue occupy three consecutive lights.
    pub const PUBLISH_LIGHT: usize = 2;

    fn new(id: ModuleId, shared: Arc<GlabShared>) -> Self {
        Self {
            id,
            shared,
            vertex_button: SchmittTrigger::default(),
            fragment_button: SchmittTrigger::default(),
            vertex_trigger: SchmittTrigger::default(),
            fragment_trigger: SchmittTrigger::default(),
            publish_button: SchmittTrigger::default(),
        }
    }
}

impl Module for GlabModule {
    fn name(&self) -> &'static str {
        "glab"
    }

    fn id(&self) -> ModuleId {
        self.id
    }

    fn layout(&self) -> PortLayout {
        PortLayout {
            params: &[0.0, 0.0, 0.0],
            inputs: 2,
            outputs: 2,
            lights: 5,
        }
    }

    fn process(&mut self, _args: &ProcessArgs, ports: &mut Ports) {
        let vertex_edge = self.vertex_button.process(ports.param(Self::COMPILE_VERTEX_PARAM));
        let vertex_trig = self.vertex_trigger.process(ports.voltage(Self::COMPILE_VERTEX_INPUT));
        if vertex_edge || vertex_trig {
            self.shared.request_compile(ShaderStage::Vertex);
        }
        let fragment_edge = self.fragment_button.process(ports.param(Self::COMPILE_FRAGMENT_PARAM));
        let fragment_trig = self.fragment_trigger.process(ports.voltage(Self::COMPILE_FRAGMENT_INPUT));
        if fragment_edge || fragment_trig {
            self.shared.request_compile(ShaderStage::Fragment);
        }
        if self.publish_button.process(ports.param(Self::PUBLISH_PARAM)) {
            self.shared.publish.store(true, Ordering::Release);
        }

        let vertex_valid = self.shared.vertex_valid.load(Ordering::Acquire);
        let fragment_valid = self.shared.fragment_valid.load(Ordering::Acquire);
        let dirty = self.shared.dirty.load(Ordering::Acquire);

        ports.set_output(Self::VERTEX_VALID_OUTPUT, logic(vertex_valid));
        ports.set_output(Self::FRAGMENT_VALID_OUTPUT, logic(fragment_valid));
        ports.set_light(Self::VERTEX_LIGHT, if vertex_valid { 1.0 } else { 0.0 });
        ports.set_light(Self::FRAGMENT_LIGHT, if fragment_valid { 1.0 } else { 0.0 });

        let both = vertex_valid && fragment_valid;
        let (r, g, b) = match (both, dirty) {
            (false, _) => (1.0, 0.0, 0.0),
            (true, true) => (0.0, 0.0, 1.0),
            (true, false) => (0.0, 1.0, 0.0),
        };
        ports.set_light(Self::PUBLISH_LIGHT, r);
        ports.set_light(Self::PUBLISH_LIGHT + 1, g);
        ports.set_light(Self::PUBLISH_LIGHT + 2, b);
    }

    fn on_reset(&mut self) {
        self.vertex_button.reset();
        self.fragment_button.reset();
        self.vertex_trigger.reset();
        self.fragment_trigger.reset();
        self.publish_button.reset();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::fake::FakeGpu;

    const BAD_FRAG: &str = "void main() {\n    gl_FragColor = vec4(1.0)\n}\n";

    fn glab() -> (Arc<ShaderLibrary>, Glab) {
        let lib = Arc::new(ShaderLibrary::new());
        let g = Glab::new(1, lib.clone());
        (lib, g)
    }

    #[test]
    fn defaults_compile_on_first_tick() {
        let (_lib, mut g) = glab();
        let mut gpu = FakeGpu::new();
        assert_eq!(g.status(), STATUS_READY);
        assert_eq!(g.run_pending_compiles(&mut gpu), 2);
        assert!(g.is_valid(ShaderStage::Vertex));
        assert!(g.is_valid(ShaderStage::Fragment));
        assert_eq!(g.run_pending_compiles(&mut gpu), 0);
        assert_eq!(gpu.live_shaders(), 0);
    }

    #[test]
    fn edit_requests_only_that_stage() {
        let (_lib, mut g) = glab();
        let mut gpu = FakeGpu::new();
        g.run_pending_compiles(&mut gpu);

        g.edit_fragment(BAD_FRAG);
        assert!(g.is_dirty());
        assert_eq!(g.run_pending_compiles(&mut gpu), 1);
        assert_eq!(gpu.compiles_of(ShaderStage::Vertex), 1);
        assert_eq!(gpu.compiles_of(ShaderStage::Fragment), 2);
        assert!(!g.is_valid(ShaderStage::Fragment));
        assert!(!g.stage_log(ShaderStage::Fragment).is_empty());
    }

    #[test]
    fn publish_requires_valid_stages() {
        let (lib, mut g) = glab();
        assert!(g.publish().is_none());
        assert_eq!(g.status(), STATUS_NOT_VALID);
        assert!(lib.publisher_ids().is_empty());
    }

    #[test]
    fn publish_names_and_follows_new_entry() {
        let (lib, mut g) = glab();
        let mut gpu = FakeGpu::new();
        g.run_pending_compiles(&mut gpu);
        g.edit_vertex(DEFAULT_VERTEX_SOURCE);
        g.run_pending_compiles(&mut gpu);

        let sub = g.publish().unwrap();
        assert_eq!(sub, Subscription { publisher_id: 1, shader_index: 0, is_valid: true });
        assert!(!g.is_dirty());
        let list = lib.shaders_for_publisher(1).unwrap();
        assert!(list[0].name.starts_with("glab_1_"));
        assert_eq!(list[0].name.len(), "glab_1_".len() + 6);
        assert!(g.status().starts_with("Successfully published shader as 'glab_1_"));
    }

    #[test]
    fn republish_appends_under_same_name() {
        let (lib, mut g) = glab();
        let mut gpu = FakeGpu::new();
        g.run_pending_compiles(&mut gpu);
        g.publish().unwrap();

        g.edit_fragment(DEFAULT_FRAGMENT_SOURCE.replace("0.5", "0.25"));
        g.run_pending_compiles(&mut gpu);
        let sub = g.publish().unwrap();

        let list = lib.shaders_for_publisher(1).unwrap();
        assert_eq!(list.len(), 2);
        assert_eq!(list[0].name, list[1].name);
        assert_eq!(list[0].fragment_source, DEFAULT_FRAGMENT_SOURCE);
        assert_eq!(sub.shader_index, 1);
    }

    #[test]
    fn republish_over_an_entry_that_failed_validation() {
        let (lib, mut g) = glab();
        let mut gpu = FakeGpu::new();
        lib.register_publisher(50);
        lib.add_shader(50, ShaderPair::new("rings", DEFAULT_VERTEX_SOURCE, DEFAULT_FRAGMENT_SOURCE))
            .unwrap();
        crate::menu::select_shader(lib.as_ref(), &mut g, 50, 0);
        g.run_pending_compiles(&mut gpu);

        // The library's own check later rejects the entry.
        assert!(lib.set_validity(50, 0, false, "driver says no".into()));
        let sub = g.publish().unwrap();

        let list = lib.shaders_for_publisher(50).unwrap();
        assert_eq!(list.len(), 2);
        assert_eq!(list[1].name, "rings");
        assert_eq!(sub, Subscription { publisher_id: 50, shader_index: 1, is_valid: true });
        assert!(lib.shaders_for_publisher(1).is_none());
    }

    #[test]
    fn subscribe_pulls_source_into_editor() {
        let (lib, mut g) = glab();
        lib.register_publisher(50);
        lib.add_shader(50, ShaderPair::new("rings", "void main() {}", "void main() {}")).unwrap();
        g.edit_vertex("scratch");

        crate::menu::select_shader(lib.as_ref(), &mut g, 50, 0);
        assert_eq!(g.vertex_source(), "void main() {}");
        assert!(!g.is_dirty());
        assert_eq!(g.subscription().unwrap().publisher_id, 50);
        assert_eq!(g.status(), "Subscribed to shader 0 from Glib 50");

        crate::menu::select_shader(lib.as_ref(), &mut g, 50, 9);
        assert_eq!(g.status(), "Failed to load shader 9 from Glib 50");
        assert_eq!(g.vertex_source(), "void main() {}");
    }

    #[test]
    fn audio_half_reflects_validity_and_queues_requests() {
        let (_lib, mut g) = glab();
        let mut gpu = FakeGpu::new();
        let mut m = g.module();
        let mut ports = Ports::new(m.layout());
        let args = ProcessArgs::new(48_000.0, 0);

        m.process(&args, &mut ports);
        assert_eq!(ports.outputs, vec![0.0, 0.0]);
        assert_eq!(&ports.lights[2..], &[1.0, 0.0, 0.0]);

        g.run_pending_compiles(&mut gpu);
        m.process(&args, &mut ports);
        assert_eq!(ports.outputs, vec![10.0, 10.0]);
        assert_eq!(&ports.lights[2..], &[0.0, 1.0, 0.0]);

        ports.params[GlabModule::PUBLISH_PARAM] = 1.0;
        m.process(&args, &mut ports);
        g.tick(&mut gpu);
        assert!(g.subscription().is_some());
    }
}
