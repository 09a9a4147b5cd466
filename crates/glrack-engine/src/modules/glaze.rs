//! Glaze: stereo effect processor.
//!
//! With a live shader the audio half hands each input sample to the render
//! thread and plays back whatever the 2x1 readback produced last. Until then
//! (or when the shader is unusable) the built-in effect of the selected mode
//! runs instead.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use crate::config::GlazeState;
use crate::dsp::{clamp_signal, SchmittTrigger};
use crate::evaluator::{EvalShape, Evaluator, EvaluatorConfig, ShaderLink, TickOutcome};
use crate::events::EventTx;
use crate::frame::FrameSlot;
use crate::gpu::{GpuBackend, UniformValue};
use crate::library::{ModuleId, ShaderLibrary};
use crate::menu::ShaderSubscriber;
use crate::modules::effects::{Mode, StereoEffects, StereoIn};
use crate::rack::{Module, PortLayout, Ports, ProcessArgs};
use crate::{logi, logw};

const TAG: &str = "GLAZE";

/// `[inL, inR, u1, u2, u3, mode]`
const INPUT_FRAME: usize = 6;
/// `[outL, outR]`
const OUTPUT_FRAME: usize = 2;

const UNIFORMS: &[&str] = &["audioInL", "audioInR", "u1", "u2", "u3", "mode"];

#[derive(Default)]
pub struct GlazeShared {
    link: Arc<ShaderLink>,
    mode: AtomicU8,
    input: FrameSlot<INPUT_FRAME>,
    output: FrameSlot<OUTPUT_FRAME>,
}

impl GlazeShared {
    fn mode(&self) -> Mode {
        Mode::from_index(i64::from(self.mode.load(Ordering::Acquire))).unwrap_or(Mode::Reverb)
    }

    fn set_mode(&self, mode: Mode) {
        self.mode.store(mode.index() as u8, Ordering::Release);
    }
}

/// Render half of Glaze.
pub struct GlazeView<B: GpuBackend> {
    id: ModuleId,
    shared: Arc<GlazeShared>,
    evaluator: Evaluator<B>,
    input: [f32; INPUT_FRAME],
}

impl<B: GpuBackend> GlazeView<B> {
    pub fn new(id: ModuleId, library: Arc<ShaderLibrary>) -> Self {
        let shared = Arc::new(GlazeShared::default());
        let evaluator = Evaluator::new(
            EvaluatorConfig {
                tag: TAG,
                subscriber: id,
                shape: EvalShape::Readback { width: 2, height: 1 },
                uniforms: UNIFORMS,
            },
            library,
            shared.link.clone(),
        );
        Self {
            id,
            shared,
            evaluator,
            input: [0.0; INPUT_FRAME],
        }
    }

    pub fn with_events(mut self, events: EventTx) -> Self {
        self.evaluator = self.evaluator.with_events(events);
        self
    }

    pub fn module(&self) -> GlazeModule {
        GlazeModule::new(self.id, self.shared.clone())
    }

    pub fn id(&self) -> ModuleId {
        self.id
    }

    pub fn link(&self) -> &Arc<ShaderLink> {
        self.evaluator.link()
    }

    pub fn mode(&self) -> Mode {
        self.shared.mode()
    }

    pub fn tick(&mut self, gpu: &mut B) -> TickOutcome {
        self.shared.input.read(&mut self.input);
        let [in_l, in_r, u1, u2, u3, mode] = self.input;
        let values = [
            UniformValue::Float(in_l),
            UniformValue::Float(in_r),
            UniformValue::Float(u1),
            UniformValue::Float(u2),
            UniformValue::Float(u3),
            UniformValue::Int(mode as i32),
        ];

        let outcome = self.evaluator.tick(gpu, (2, 1), &values);
        if let TickOutcome::Pixels(px) = &outcome {
            let red = |i: usize| px.get(i).map(|p| clamp_signal(p[0])).unwrap_or(0.0);
            self.shared.output.write(&[red(0), red(1)]);
        }
        outcome
    }

    pub fn release(&mut self, gpu: &mut B) {
        self.evaluator.release(gpu);
    }

    pub fn to_state(&self) -> GlazeState {
        GlazeState {
            current_mode: self.mode().index() as i64,
        }
    }

    pub fn restore(&mut self, state: &GlazeState) {
        match Mode::from_index(state.current_mode) {
            Some(mode) => self.shared.set_mode(mode),
            None => logw!(TAG, "ignoring stored mode {}", state.current_mode),
        }
    }
}

impl<B: GpuBackend> ShaderSubscriber for GlazeView<B> {
    fn subscriber_id(&self) -> ModuleId {
        self.id
    }

    fn on_shader_subscribe(&mut self, publisher: ModuleId, index: i32) {
        logi!(TAG, "module {} follows shader {index} of Glib {publisher}", self.id);
        self.shared.link.notify(publisher, index);
    }
}

/// Audio half of Glaze.
pub struct GlazeModule {
    id: ModuleId,
    shared: Arc<GlazeShared>,
    mode_button: SchmittTrigger,
    effects: StereoEffects,
    wet: [f32; OUTPUT_FRAME],
}

impl GlazeModule {
    pub const MODE_PARAM: usize = 0;
    /// Percent, 0 to 100.
    pub const MIX_PARAM: usize = 1;

    pub const LEFT_INPUT: usize = 0;
    pub const RIGHT_INPUT: usize = 1;
    pub const MIX_INPUT: usize = 2;
    pub const U1_INPUT: usize = 3;
    pub const U2_INPUT: usize = 4;
    pub const U3_INPUT: usize = 5;

    pub const LEFT_OUTPUT: usize = 0;
    pub const RIGHT_OUTPUT: usize = 1;

    /// One light per mode, in `Mode::ALL` order.
    pub const MODE_LIGHT: usize = 0;

    fn new(id: ModuleId, shared: Arc<GlazeShared>) -> Self {
        Self {
            id,
            shared,
            mode_button: SchmittTrigger::default(),
            effects: StereoEffects::new(),
            wet: [0.0; OUTPUT_FRAME],
        }
    }

    fn control(ports: &Ports, input: usize) -> f32 {
        (ports.voltage(input) / 10.0).clamp(0.0, 1.0)
    }
}

impl Module for GlazeModule {
    fn name(&self) -> &'static str {
        "glaze"
    }

    fn id(&self) -> ModuleId {
        self.id
    }

    fn layout(&self) -> PortLayout {
        PortLayout {
            params: &[0.0, 0.0],
            inputs: 6,
            outputs: 2,
            lights: Mode::ALL.len(),
        }
    }

    fn process(&mut self, args: &ProcessArgs, ports: &mut Ports) {
        let mut mode = self.shared.mode();
        if self.mode_button.process(ports.param(Self::MODE_PARAM)) {
            mode = mode.next();
            self.shared.set_mode(mode);
        }
        for m in Mode::ALL {
            ports.set_light(Self::MODE_LIGHT + m.index(), if m == mode { 1.0 } else { 0.0 });
        }

        let left = ports.input(Self::LEFT_INPUT);
        let right = ports.input(Self::RIGHT_INPUT);
        if !left.connected && !right.connected {
            ports.set_output(Self::LEFT_OUTPUT, 0.0);
            ports.set_output(Self::RIGHT_OUTPUT, 0.0);
            return;
        }

        let in_l = if left.connected { left.voltage } else { 0.0 };
        // Right is normalled to left.
        let in_r = if right.connected { right.voltage } else { in_l };
        let in_l = in_l.clamp(-10.0, 10.0) / 10.0;
        let in_r = in_r.clamp(-10.0, 10.0) / 10.0;

        let mix = if ports.input(Self::MIX_INPUT).connected {
            Self::control(ports, Self::MIX_INPUT)
        } else {
            (ports.param(Self::MIX_PARAM) / 100.0).clamp(0.0, 1.0)
        };
        let u = [
            Self::control(ports, Self::U1_INPUT),
            Self::control(ports, Self::U2_INPUT),
            Self::control(ports, Self::U3_INPUT),
        ];

        let (wet_l, wet_r) = if self.shared.link.is_ready() {
            self.shared
                .input
                .write(&[in_l, in_r, u[0], u[1], u[2], mode.index() as f32]);
            self.shared.output.read(&mut self.wet);
            (self.wet[0], self.wet[1])
        } else {
            let x = StereoIn {
                left: in_l,
                right: in_r,
                left_connected: left.connected,
                right_connected: right.connected,
                u,
            };
            self.effects.process(mode, &x, args.sample_rate, args.frame)
        };

        let out_l = in_l * (1.0 - mix) + wet_l * mix;
        let out_r = in_r * (1.0 - mix) + wet_r * mix;
        ports.set_output(Self::LEFT_OUTPUT, (out_l * 10.0).clamp(-10.0, 10.0));
        ports.set_output(Self::RIGHT_OUTPUT, (out_r * 10.0).clamp(-10.0, 10.0));
    }

    fn on_reset(&mut self) {
        self.shared.set_mode(Mode::Reverb);
        self.effects.reset();
        self.wet = [0.0; OUTPUT_FRAME];
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::fake::FakeGpu;
    use crate::library::ShaderPair;
    use crate::menu::select_shader;
    use crate::rack::Input;

    const VERT: &str = "attribute vec3 vs_Pos;\nvoid main() {\n    gl_Position = vec4(vs_Pos, 1.0);\n}\n";
    const FRAG: &str = "uniform float audioInL;\nuniform float audioInR;\nuniform int mode;\nvoid main() {\n    gl_FragColor = vec4(audioInL);\n}\n";

    fn setup() -> (Arc<ShaderLibrary>, GlazeView<FakeGpu>, GlazeModule, Ports) {
        let lib = Arc::new(ShaderLibrary::new());
        let view = GlazeView::new(5, lib.clone());
        let m = view.module();
        let ports = Ports::new(m.layout());
        (lib, view, m, ports)
    }

    #[test]
    fn silent_without_inputs() {
        let (_lib, _view, mut m, mut ports) = setup();
        ports.outputs = vec![3.0, 3.0];
        m.process(&ProcessArgs::new(48_000.0, 0), &mut ports);
        assert_eq!(ports.outputs, vec![0.0, 0.0]);
    }

    #[test]
    fn dry_signal_is_normalled_and_clamped() {
        let (_lib, _view, mut m, mut ports) = setup();
        ports.inputs[GlazeModule::LEFT_INPUT] = Input::patched(14.0);
        m.process(&ProcessArgs::new(48_000.0, 0), &mut ports);
        assert_eq!(ports.outputs, vec![10.0, 10.0]);

        ports.inputs[GlazeModule::LEFT_INPUT] = Input::patched(-4.0);
        m.process(&ProcessArgs::new(48_000.0, 1), &mut ports);
        assert!((ports.outputs[0] + 4.0).abs() < 1e-5);
        assert!((ports.outputs[1] + 4.0).abs() < 1e-5);
    }

    #[test]
    fn mode_button_cycles_and_lights_follow() {
        let (_lib, view, mut m, mut ports) = setup();
        let args = ProcessArgs::new(48_000.0, 0);
        for _ in 0..3 {
            ports.params[GlazeModule::MODE_PARAM] = 1.0;
            m.process(&args, &mut ports);
            ports.params[GlazeModule::MODE_PARAM] = 0.0;
            m.process(&args, &mut ports);
        }
        assert_eq!(view.mode(), Mode::Glide);
        let lit: Vec<usize> = (0..8).filter(|i| ports.lights[*i] == 1.0).collect();
        assert_eq!(lit, vec![Mode::Glide.index()]);

        m.on_reset();
        assert_eq!(view.mode(), Mode::Reverb);
    }

    #[test]
    fn mode_state_round_trips_and_rejects_garbage() {
        let (_lib, mut view, _m, _ports) = setup();
        view.restore(&GlazeState { current_mode: 6 });
        assert_eq!(view.mode(), Mode::Warp);
        assert_eq!(view.to_state(), GlazeState { current_mode: 6 });

        view.restore(&GlazeState { current_mode: 42 });
        assert_eq!(view.mode(), Mode::Warp);
    }

    #[test]
    fn live_shader_replaces_builtin_effect() {
        let (lib, mut view, mut m, mut ports) = setup();
        lib.register_publisher(1);
        lib.add_shader(1, ShaderPair::new("gain", VERT, FRAG)).unwrap();

        let mut gpu = FakeGpu::new();
        gpu.pixels = vec![[0.5, 0.0, 0.0, 1.0], [-3.0, 0.0, 0.0, 1.0]];
        view.tick(&mut gpu);
        select_shader(&lib, &mut view, 1, 0);

        ports.inputs[GlazeModule::LEFT_INPUT] = Input::patched(2.0);
        ports.inputs[GlazeModule::MIX_INPUT] = Input::patched(10.0);
        let args = ProcessArgs::new(48_000.0, 0);
        m.process(&args, &mut ports);
        assert!(!view.link().is_ready());

        assert!(matches!(view.tick(&mut gpu), TickOutcome::Pixels(_)));
        assert_eq!(gpu.last_uniforms, ["audioInL", "audioInR", "mode"]);
        m.process(&args, &mut ports);
        assert_eq!(ports.outputs, vec![5.0, -10.0]);
    }
}
