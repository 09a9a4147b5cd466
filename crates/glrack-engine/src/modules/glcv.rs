//! Glcv: clocked four-channel CV generator.

use std::f32::consts::TAU;
use std::sync::Arc;

use crate::dsp::{pixel_to_voltage, GATE_THRESHOLD};
use crate::evaluator::{EvalShape, Evaluator, EvaluatorConfig, ShaderLink, TickOutcome};
use crate::events::EventTx;
use crate::frame::FrameSlot;
use crate::gpu::{GpuBackend, UniformValue};
use crate::library::{ModuleId, ShaderLibrary};
use crate::logi;
use crate::menu::ShaderSubscriber;
use crate::rack::{Module, PortLayout, Ports, ProcessArgs};

const TAG: &str = "GLCV";

/// `[time, chaos, scale, time_warp, clock_high]`
const INPUT_FRAME: usize = 5;
const CHANNELS: usize = 4;

const UNIFORMS: &[&str] = &["u_Time", "u_Chaos", "u_Scale", "u_TimeWarp", "u_Clock"];

/// Result of the time/space transfer function.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Transfer {
    pub time: f32,
    pub time_warp: f32,
}

/// In time mode chaos bends the phases (`chaos / scale`); in space mode it
/// slows or speeds the clock (`chaos * scale`).
pub fn transfer(clock_time: f32, space: bool, chaos: f32, scale: f32) -> Transfer {
    let time_warp = if space || scale == 0.0 { 0.0 } else { chaos / scale };
    let time_scale = if space { chaos * scale } else { 1.0 };
    Transfer {
        time: clock_time * time_scale,
        time_warp,
    }
}

/// Sine bank used while no shader is subscribed.
pub fn fallback_voltages(t: Transfer, chaos: f32, scale: f32) -> [f32; CHANNELS] {
    let phases = [0.0, t.time_warp, chaos, t.time_warp + chaos];
    let mut out = [0.0; CHANNELS];
    for (k, (o, phi)) in out.iter_mut().zip(phases).enumerate() {
        let harmonic = (1u32 << k) as f32;
        *o = 5.0 * scale * (TAU * harmonic * t.time + phi).sin();
    }
    out
}

#[derive(Default)]
pub struct GlcvShared {
    link: Arc<ShaderLink>,
    input: FrameSlot<INPUT_FRAME>,
    output: FrameSlot<CHANNELS>,
}

/// Render half of Glcv.
pub struct GlcvView<B: GpuBackend> {
    id: ModuleId,
    shared: Arc<GlcvShared>,
    evaluator: Evaluator<B>,
    input: [f32; INPUT_FRAME],
}

impl<B: GpuBackend> GlcvView<B> {
    pub fn new(id: ModuleId, library: Arc<ShaderLibrary>) -> Self {
        let shared = Arc::new(GlcvShared::default());
        let evaluator = Evaluator::new(
            EvaluatorConfig {
                tag: TAG,
                subscriber: id,
                shape: EvalShape::Readback { width: 1, height: 1 },
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

    pub fn module(&self) -> GlcvModule {
        GlcvModule::new(self.id, self.shared.clone())
    }

    pub fn id(&self) -> ModuleId {
        self.id
    }

    pub fn link(&self) -> &Arc<ShaderLink> {
        self.evaluator.link()
    }

    pub fn tick(&mut self, gpu: &mut B) -> TickOutcome {
        self.shared.input.read(&mut self.input);
        let values = self.input.map(UniformValue::Float);

        let outcome = self.evaluator.tick(gpu, (1, 1), &values);
        if let TickOutcome::Pixels(px) = &outcome {
            if let Some(rgba) = px.first() {
                self.shared.output.write(&(*rgba).map(pixel_to_voltage));
            }
        }
        outcome
    }

    pub fn release(&mut self, gpu: &mut B) {
        self.evaluator.release(gpu);
    }
}

impl<B: GpuBackend> ShaderSubscriber for GlcvView<B> {
    fn subscriber_id(&self) -> ModuleId {
        self.id
    }

    fn on_shader_subscribe(&mut self, publisher: ModuleId, index: i32) {
        logi!(TAG, "module {} follows shader {index} of Glib {publisher}", self.id);
        self.shared.link.notify(publisher, index);
    }
}

/// Audio half of Glcv.
pub struct GlcvModule {
    id: ModuleId,
    shared: Arc<GlcvShared>,
    clock_time: f32,
    clock_high: bool,
    voltages: [f32; CHANNELS],
}

impl GlcvModule {
    pub const CHAOS_PARAM: usize = 0;
    pub const SCALE_PARAM: usize = 1;

    pub const CLOCK_INPUT: usize = 0;
    pub const RESET_INPUT: usize = 1;
    pub const TIME_SPACE_INPUT: usize = 2;

    fn new(id: ModuleId, shared: Arc<GlcvShared>) -> Self {
        Self {
            id,
            shared,
            clock_time: 0.0,
            clock_high: false,
            voltages: [0.0; CHANNELS],
        }
    }

    pub fn clock_time(&self) -> f32 {
        self.clock_time
    }
}

impl Module for GlcvModule {
    fn name(&self) -> &'static str {
        "glcv"
    }

    fn id(&self) -> ModuleId {
        self.id
    }

    fn layout(&self) -> PortLayout {
        PortLayout {
            params: &[0.0, 0.5],
            inputs: 3,
            outputs: CHANNELS,
            lights: 0,
        }
    }

    fn process(&mut self, _args: &ProcessArgs, ports: &mut Ports) {
        let high = ports.voltage(Self::CLOCK_INPUT) >= GATE_THRESHOLD;
        let rising = high && !self.clock_high;
        self.clock_high = high;

        if ports.voltage(Self::RESET_INPUT) >= GATE_THRESHOLD {
            self.clock_time = 0.0;
        }
        if rising {
            self.clock_time += 1.0;
        }

        let space = ports.voltage(Self::TIME_SPACE_INPUT) > GATE_THRESHOLD;
        let chaos = ports.param(Self::CHAOS_PARAM).clamp(0.0, 1.0);
        let scale = ports.param(Self::SCALE_PARAM).clamp(0.0, 1.0);
        let t = transfer(self.clock_time, space, chaos, scale);

        let link = &self.shared.link;
        if link.is_subscribed() {
            self.shared
                .input
                .write(&[t.time, chaos, scale, t.time_warp, if high { 1.0 } else { 0.0 }]);
            // Nothing reaches the outputs until a program draws.
            if link.is_ready() {
                self.shared.output.read(&mut self.voltages);
            } else {
                self.voltages = [0.0; CHANNELS];
            }
        } else {
            self.voltages = fallback_voltages(t, chaos, scale);
        }

        for (i, v) in self.voltages.iter().enumerate() {
            ports.set_output(i, *v);
        }
    }

    fn on_reset(&mut self) {
        self.clock_time = 0.0;
        self.clock_high = false;
        self.voltages = [0.0; CHANNELS];
    }
}
