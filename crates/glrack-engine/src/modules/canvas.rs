//! Canvas: a full-screen visualizer driven by two audio signals.
//!
//! The audio half passes its inputs through and keeps two smoothed 256-sample
//! histories; once per block it hands them to the render thread together with
//! the trigger and time-warp values.

use std::sync::Arc;

use crate::dsp::GATE_THRESHOLD;
use crate::evaluator::{EvalShape, Evaluator, EvaluatorConfig, ShaderLink, TickOutcome};
use crate::events::EventTx;
use crate::frame::FrameSlot;
use crate::gpu::{GpuBackend, UniformValue};
use crate::library::{ModuleId, ShaderLibrary};
use crate::logi;
use crate::menu::ShaderSubscriber;
use crate::rack::{Module, PortLayout, Ports, ProcessArgs};

const TAG: &str = "CANVAS";

pub const HISTORY_LEN: usize = 256;
/// `[buf1; 256, buf2; 256, trig1, trig2, warp1, warp2]`
pub const FRAME_LEN: usize = 2 * HISTORY_LEN + 4;

const SMOOTHING: f32 = 0.3;
/// Inputs are divided by this before they enter the history buffers.
const INPUT_SCALE: f32 = 5.0;

const UNIFORMS: &[&str] = &[
    "u_Time",
    "u_Resolution",
    "u_AudioData1",
    "u_AudioData2",
    "u_Trigger1",
    "u_Trigger2",
    "u_TimeWarp1",
    "u_TimeWarp2",
    "u_Proj",
    "u_Model",
];

const IDENTITY: [f32; 16] = [
    1.0, 0.0, 0.0, 0.0, //
    0.0, 1.0, 0.0, 0.0, //
    0.0, 0.0, 1.0, 0.0, //
    0.0, 0.0, 0.0, 1.0,
];

#[derive(Default)]
pub struct CanvasShared {
    link: Arc<ShaderLink>,
    frame: FrameSlot<FRAME_LEN>,
}

/// Render half of Canvas.
pub struct CanvasView<B: GpuBackend> {
    id: ModuleId,
    shared: Arc<CanvasShared>,
    evaluator: Evaluator<B>,
    frame: Box<[f32; FRAME_LEN]>,
}

impl<B: GpuBackend> CanvasView<B> {
    pub fn new(id: ModuleId, library: Arc<ShaderLibrary>) -> Self {
        let shared = Arc::new(CanvasShared::default());
        let evaluator = Evaluator::new(
            EvaluatorConfig {
                tag: TAG,
                subscriber: id,
                shape: EvalShape::Visual,
                uniforms: UNIFORMS,
            },
            library,
            shared.link.clone(),
        );
        Self {
            id,
            shared,
            evaluator,
            frame: Box::new([0.0; FRAME_LEN]),
        }
    }

    pub fn with_events(mut self, events: EventTx) -> Self {
        self.evaluator = self.evaluator.with_events(events);
        self
    }

    pub fn module(&self) -> CanvasModule {
        CanvasModule::new(self.id, self.shared.clone())
    }

    pub fn id(&self) -> ModuleId {
        self.id
    }

    pub fn link(&self) -> &Arc<ShaderLink> {
        self.evaluator.link()
    }

    /// Offscreen target holding the last drawn frame.
    pub fn target(&self) -> Option<(&B::Target, i32, i32)> {
        self.evaluator.target()
    }

    /// Latest audio frame seen by the render thread.
    pub fn frame(&self) -> &[f32; FRAME_LEN] {
        &self.frame
    }

    pub fn tick(&mut self, gpu: &mut B, surface: (i32, i32)) -> TickOutcome {
        // A torn read keeps the previous frame.
        self.shared.frame.read(&mut self.frame);

        let (w, h) = (surface.0.max(1), surface.1.max(1));
        let mut proj = IDENTITY;
        proj[0] = h as f32 / w as f32;

        let f = &self.frame;
        let values = [
            UniformValue::Float(self.evaluator.elapsed_secs()),
            UniformValue::Vec2(w as f32, h as f32),
            UniformValue::Floats(&f[..HISTORY_LEN]),
            UniformValue::Floats(&f[HISTORY_LEN..2 * HISTORY_LEN]),
            UniformValue::Float(f[2 * HISTORY_LEN]),
            UniformValue::Float(f[2 * HISTORY_LEN + 1]),
            UniformValue::Float(f[2 * HISTORY_LEN + 2]),
            UniformValue::Float(f[2 * HISTORY_LEN + 3]),
            UniformValue::Mat4(&proj),
            UniformValue::Mat4(&IDENTITY),
        ];
        self.evaluator.tick(gpu, (w, h), &values)
    }

    pub fn release(&mut self, gpu: &mut B) {
        self.evaluator.release(gpu);
    }
}

impl<B: GpuBackend> ShaderSubscriber for CanvasView<B> {
    fn subscriber_id(&self) -> ModuleId {
        self.id
    }

    fn on_shader_subscribe(&mut self, publisher: ModuleId, index: i32) {
        logi!(TAG, "module {} follows shader {index} of Glib {publisher}", self.id);
        self.shared.link.notify(publisher, index);
    }
}

/// Audio half of Canvas.
pub struct CanvasModule {
    id: ModuleId,
    shared: Arc<CanvasShared>,
    history1: Box<[f32; HISTORY_LEN]>,
    history2: Box<[f32; HISTORY_LEN]>,
    trig1: f32,
    trig2: f32,
    warp1: f32,
    warp2: f32,
}

impl CanvasModule {
    pub const TIME_WARP_1_PARAM: usize = 0;
    pub const TIME_WARP_2_PARAM: usize = 1;

    pub const AUDIO_1_INPUT: usize = 0;
    pub const TRIGGER_1_INPUT: usize = 1;
    pub const AUDIO_2_INPUT: usize = 2;
    pub const TRIGGER_2_INPUT: usize = 3;

    pub const AUDIO_1_OUTPUT: usize = 0;
    pub const AUDIO_2_OUTPUT: usize = 1;

    fn new(id: ModuleId, shared: Arc<CanvasShared>) -> Self {
        Self {
            id,
            shared,
            history1: Box::new([0.0; HISTORY_LEN]),
            history2: Box::new([0.0; HISTORY_LEN]),
            trig1: 0.0,
            trig2: 0.0,
            warp1: 0.0,
            warp2: 0.0,
        }
    }

    pub fn history(&self) -> (&[f32; HISTORY_LEN], &[f32; HISTORY_LEN]) {
        (&self.history1, &self.history2)
    }
}

/// Shift one step towards the tail, blending each slot with its newer neighbour.
fn push_smoothed(buf: &mut [f32; HISTORY_LEN], sample: f32) {
    for i in (1..HISTORY_LEN).rev() {
        buf[i] = buf[i - 1] * (1.0 - SMOOTHING) + buf[i] * SMOOTHING;
    }
    buf[0] = sample;
}

impl Module for CanvasModule {
    fn name(&self) -> &'static str {
        "canvas"
    }

    fn id(&self) -> ModuleId {
        self.id
    }

    fn layout(&self) -> PortLayout {
        PortLayout {
            params: &[0.0, 0.0],
            inputs: 4,
            outputs: 2,
            lights: 0,
        }
    }

    fn process(&mut self, _args: &ProcessArgs, ports: &mut Ports) {
        // Unpatched trigger inputs hold their last state.
        let t1 = ports.input(Self::TRIGGER_1_INPUT);
        if t1.connected {
            self.trig1 = if t1.voltage > GATE_THRESHOLD { 1.0 } else { 0.0 };
        }
        let t2 = ports.input(Self::TRIGGER_2_INPUT);
        if t2.connected {
            self.trig2 = if t2.voltage > GATE_THRESHOLD { 1.0 } else { 0.0 };
        }

        self.warp1 = ports.param(Self::TIME_WARP_1_PARAM).clamp(-10.0, 10.0);
        self.warp2 = ports.param(Self::TIME_WARP_2_PARAM).clamp(-10.0, 10.0);

        let a1 = ports.voltage(Self::AUDIO_1_INPUT);
        let a2 = ports.voltage(Self::AUDIO_2_INPUT);
        ports.set_output(Self::AUDIO_1_OUTPUT, a1);
        ports.set_output(Self::AUDIO_2_OUTPUT, a2);

        push_smoothed(&mut self.history1, a1 / INPUT_SCALE);
        push_smoothed(&mut self.history2, a2 / INPUT_SCALE);
    }

    fn end_block(&mut self) {
        let mut frame = [0.0f32; FRAME_LEN];
        frame[..HISTORY_LEN].copy_from_slice(&self.history1[..]);
        frame[HISTORY_LEN..2 * HISTORY_LEN].copy_from_slice(&self.history2[..]);
        frame[2 * HISTORY_LEN..].copy_from_slice(&[self.trig1, self.trig2, self.warp1, self.warp2]);
        self.shared.frame.write(&frame);
    }

    fn on_reset(&mut self) {
        self.history1.fill(0.0);
        self.history2.fill(0.0);
        self.trig1 = 0.0;
        self.trig2 = 0.0;
        self.warp1 = 0.0;
        self.warp2 = 0.0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::fake::FakeGpu;
    use crate::library::ShaderPair;
    use crate::menu::select_shader;
    use crate::rack::Input;

    const VERT: &str = "attribute vec3 vs_Pos;\nattribute vec2 vs_TexCoord;\nuniform mat4 u_Proj;\nvoid main() {\n    gl_Position = u_Proj * vec4(vs_Pos, 1.0);\n}\n";
    const FRAG: &str = "uniform float u_Time;\nuniform float u_AudioData1[256];\nvoid main() {\n    gl_FragColor = vec4(u_AudioData1[0], u_Time, 0.0, 1.0);\n}\n";

    #[test]
    fn history_is_smoothed_with_newest_first() {
        let lib = Arc::new(ShaderLibrary::new());
        let view = CanvasView::<FakeGpu>::new(1, lib);
        let mut m = view.module();
        let mut ports = Ports::new(m.layout());
        let args = ProcessArgs::new(48_000.0, 0);

        ports.inputs[CanvasModule::AUDIO_1_INPUT] = Input::patched(5.0);
        m.process(&args, &mut ports);
        assert_eq!(ports.outputs[CanvasModule::AUDIO_1_OUTPUT], 5.0);

        ports.inputs[CanvasModule::AUDIO_1_INPUT] = Input::patched(0.0);
        m.process(&args, &mut ports);
        m.process(&args, &mut ports);

        let (h1, h2) = m.history();
        assert_eq!(h1[0], 0.0);
        assert!((h1[1] - 0.21).abs() < 1e-6);
        assert!((h1[2] - 0.49).abs() < 1e-6);
        assert!(h2.iter().all(|v| *v == 0.0));
    }

    #[test]
    fn triggers_hold_when_unpatched() {
        let lib = Arc::new(ShaderLibrary::new());
        let view = CanvasView::<FakeGpu>::new(1, lib);
        let mut m = view.module();
        let mut ports = Ports::new(m.layout());
        let args = ProcessArgs::new(48_000.0, 0);

        ports.inputs[CanvasModule::TRIGGER_1_INPUT] = Input::patched(1.5);
        ports.params[CanvasModule::TIME_WARP_2_PARAM] = -3.0;
        m.process(&args, &mut ports);
        ports.inputs[CanvasModule::TRIGGER_1_INPUT] = Input::default();
        m.process(&args, &mut ports);
        m.end_block();

        let mut frame = [0.0f32; FRAME_LEN];
        assert!(view.shared.frame.read(&mut frame));
        assert_eq!(&frame[2 * HISTORY_LEN..], &[1.0, 0.0, 0.0, -3.0]);
    }

    #[test]
    fn subscribed_canvas_draws_with_audio_uniforms() {
        let lib = Arc::new(ShaderLibrary::new());
        lib.register_publisher(9);
        lib.add_shader(9, ShaderPair::new("scope", VERT, FRAG)).unwrap();

        let mut view = CanvasView::<FakeGpu>::new(1, lib.clone());
        let mut gpu = FakeGpu::new();
        assert_eq!(view.tick(&mut gpu, (975, 800)), TickOutcome::Claimed);

        select_shader(&lib, &mut view, 9, 0);
        assert_eq!(view.tick(&mut gpu, (975, 800)), TickOutcome::Drawn);
        assert!(view.link().is_ready());
        assert_eq!(gpu.last_uniforms, ["u_Time", "u_AudioData1", "u_Proj"]);
        assert_eq!(view.target().map(|(_, w, h)| (w, h)), Some((975, 800)));
    }
}
