//! Minimal module host interface: ports, per-sample processing, lifecycle hooks.
//!
//! The audio half of every module implements `Module` and is driven by the
//! host's engine thread one sample at a time. It must never touch the GPU or
//! the shader registry.

use rand::Rng;

use crate::library::ModuleId;

#[derive(Debug, Clone, Copy)]
pub struct ProcessArgs {
    pub sample_rate: f32,
    pub sample_time: f32,
    /// Samples processed since the engine started.
    pub frame: u64,
}

impl ProcessArgs {
    pub fn new(sample_rate: f32, frame: u64) -> Self {
        Self {
            sample_rate,
            sample_time: 1.0 / sample_rate,
            frame,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Input {
    pub voltage: f32,
    pub connected: bool,
}

impl Input {
    pub fn patched(voltage: f32) -> Self {
        Self { voltage, connected: true }
    }
}

/// Shape of a module's panel.
#[derive(Debug, Clone, Copy)]
pub struct PortLayout {
    /// Default value of each param, in param index order.
    pub params: &'static [f32],
    pub inputs: usize,
    pub outputs: usize,
    pub lights: usize,
}

#[derive(Debug, Clone)]
pub struct Ports {
    pub params: Vec<f32>,
    pub inputs: Vec<Input>,
    pub outputs: Vec<f32>,
    pub lights: Vec<f32>,
}

impl Ports {
    pub fn new(layout: PortLayout) -> Self {
        Self {
            params: layout.params.to_vec(),
            inputs: vec![Input::default(); layout.inputs],
            outputs: vec![0.0; layout.outputs],
            lights: vec![0.0; layout.lights],
        }
    }

    pub fn param(&self, i: usize) -> f32 {
        self.params.get(i).copied().unwrap_or(0.0)
    }

    pub fn input(&self, i: usize) -> Input {
        self.inputs.get(i).copied().unwrap_or_default()
    }

    /// Voltage of an input, 0 V when unpatched.
    pub fn voltage(&self, i: usize) -> f32 {
        let inp = self.input(i);
        if inp.connected {
            inp.voltage
        } else {
            0.0
        }
    }

    pub fn set_output(&mut self, i: usize, v: f32) {
        if let Some(o) = self.outputs.get_mut(i) {
            *o = v;
        }
    }

    pub fn set_light(&mut self, i: usize, brightness: f32) {
        if let Some(l) = self.lights.get_mut(i) {
            *l = brightness.clamp(0.0, 1.0);
        }
    }
}

pub trait Module: Send {
    fn name(&self) -> &'static str;
    fn id(&self) -> ModuleId;
    fn layout(&self) -> PortLayout;
    fn process(&mut self, args: &ProcessArgs, ports: &mut Ports);

    /// Called after each block so modules can publish a frame for the render thread.
    fn end_block(&mut self) {}
    fn on_reset(&mut self) {}
    fn on_sample_rate_change(&mut self, _sample_rate: f32) {}
}

/// Fresh random module id, unique within a patch in practice.
pub fn new_module_id() -> ModuleId {
    rand::thread_rng().gen_range(1..(1i64 << 53))
}
