//! Engine thread: runs the audio halves of every module in fixed-size blocks.
//!
//! Cables copy an output voltage to an input after each sample, so a signal
//! crosses one cable per sample. The render thread talks to this thread only
//! through `AudioCommand`s; modules talk to their render halves through their
//! own shared atomics.

use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crossbeam_channel::{unbounded, Receiver, Sender, TryRecvError};

use glrack_engine::library::ModuleId;
use glrack_engine::rack::{new_module_id, Input, Module, PortLayout, Ports, ProcessArgs};
use glrack_engine::{logi, logw};

const TAG: &str = "AUDIO";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cable {
    pub from: (usize, usize),
    pub to: (usize, usize),
}

/// Output and light values of one module, for display.
#[derive(Debug, Clone)]
pub struct Meter {
    pub name: &'static str,
    pub id: ModuleId,
    pub outputs: Vec<f32>,
    pub lights: Vec<f32>,
}

pub enum AudioCommand {
    SetParam { slot: usize, param: usize, value: f32 },
    /// Hold a momentary button down for one block.
    Press { slot: usize, param: usize },
    Reset,
    Snapshot(Sender<Vec<Meter>>),
}

struct Slot {
    module: Box<dyn Module>,
    ports: Ports,
    /// Params to release after the current block.
    held: Vec<usize>,
}

pub struct Rack {
    slots: Vec<Slot>,
    cables: Vec<Cable>,
    sample_rate: f32,
    block_size: usize,
    frame: u64,
}

impl Rack {
    pub fn new(sample_rate: f32, block_size: usize) -> Self {
        Self {
            slots: Vec::new(),
            cables: Vec::new(),
            sample_rate,
            block_size: block_size.max(1),
            frame: 0,
        }
    }

    /// Add a module and return its slot.
    pub fn add(&mut self, module: Box<dyn Module>) -> usize {
        let mut module = module;
        module.on_sample_rate_change(self.sample_rate);
        let ports = Ports::new(module.layout());
        self.slots.push(Slot {
            module,
            ports,
            held: Vec::new(),
        });
        self.slots.len() - 1
    }

    /// Connect `from = (slot, output)` to `to = (slot, input)`. Bad ports are refused.
    pub fn connect(&mut self, from: (usize, usize), to: (usize, usize)) -> bool {
        let ok_from = self.slots.get(from.0).is_some_and(|s| from.1 < s.ports.outputs.len());
        let ok_to = self.slots.get(to.0).is_some_and(|s| to.1 < s.ports.inputs.len());
        if !(ok_from && ok_to) {
            logw!(TAG, "refusing cable {from:?} -> {to:?}");
            return false;
        }
        // One cable per input.
        self.cables.retain(|c| c.to != to);
        self.cables.push(Cable { from, to });
        self.slots[to.0].ports.inputs[to.1] = Input::patched(0.0);
        true
    }

    pub fn apply(&mut self, cmd: AudioCommand) {
        match cmd {
            AudioCommand::SetParam { slot, param, value } => {
                if let Some(p) = self.slots.get_mut(slot).and_then(|s| s.ports.params.get_mut(param)) {
                    *p = value;
                }
            }
            AudioCommand::Press { slot, param } => {
                if let Some(s) = self.slots.get_mut(slot) {
                    if let Some(p) = s.ports.params.get_mut(param) {
                        *p = 1.0;
                        s.held.push(param);
                    }
                }
            }
            AudioCommand::Reset => {
                for s in &mut self.slots {
                    s.module.on_reset();
                }
            }
            AudioCommand::Snapshot(reply) => {
                let _ = reply.send(self.meters());
            }
        }
    }

    pub fn meters(&self) -> Vec<Meter> {
        self.slots
            .iter()
            .map(|s| Meter {
                name: s.module.name(),
                id: s.module.id(),
                outputs: s.ports.outputs.clone(),
                lights: s.ports.lights.clone(),
            })
            .collect()
    }

    pub fn run_block(&mut self) {
        for _ in 0..self.block_size {
            let args = ProcessArgs::new(self.sample_rate, self.frame);
            for s in &mut self.slots {
                s.module.process(&args, &mut s.ports);
            }
            for c in &self.cables {
                let v = self.slots[c.from.0].ports.outputs[c.from.1];
                self.slots[c.to.0].ports.inputs[c.to.1] = Input::patched(v);
            }
            self.frame += 1;
        }

        for s in &mut self.slots {
            s.module.end_block();
            for param in s.held.drain(..) {
                if let Some(p) = s.ports.params.get_mut(param) {
                    *p = 0.0;
                }
            }
        }
    }

    pub fn block_duration(&self) -> Duration {
        Duration::from_secs_f64(self.block_size as f64 / self.sample_rate as f64)
    }
}

/// Running engine thread. Dropping it stops the thread.
pub struct AudioThread {
    tx: Sender<AudioCommand>,
    handle: Option<JoinHandle<()>>,
}

impl AudioThread {
    pub fn spawn(mut rack: Rack) -> anyhow::Result<Self> {
        let (tx, rx) = unbounded::<AudioCommand>();
        let handle = std::thread::Builder::new()
            .name("audio".into())
            .spawn(move || run(&mut rack, rx))?;
        Ok(Self {
            tx,
            handle: Some(handle),
        })
    }

    pub fn send(&self, cmd: AudioCommand) {
        let _ = self.tx.send(cmd);
    }

    /// Blocking snapshot of every module's outputs.
    pub fn snapshot(&self) -> Vec<Meter> {
        let (reply, rx) = crossbeam_channel::bounded(1);
        self.send(AudioCommand::Snapshot(reply));
        rx.recv_timeout(Duration::from_millis(500)).unwrap_or_default()
    }
}

impl Drop for AudioThread {
    fn drop(&mut self) {
        // Replacing the sender disconnects the command channel.
        let (tx, _) = unbounded();
        self.tx = tx;
        if let Some(h) = self.handle.take() {
            let _ = h.join();
        }
    }
}

fn run(rack: &mut Rack, rx: Receiver<AudioCommand>) {
    let block = rack.block_duration();
    logi!(
        TAG,
        "engine running: {} Hz, {} samples per block ({:.2} ms)",
        rack.sample_rate,
        rack.block_size,
        block.as_secs_f64() * 1000.0
    );

    let mut deadline = Instant::now();
    loop {
        loop {
            match rx.try_recv() {
                Ok(cmd) => rack.apply(cmd),
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    logi!(TAG, "engine stopped after {} frames", rack.frame);
                    return;
                }
            }
        }

        rack.run_block();

        deadline += block;
        let now = Instant::now();
        if deadline > now {
            std::thread::sleep(deadline - now);
        } else if now - deadline > block * 8 {
            // Too far behind to catch up; resync instead of bursting.
            deadline = now;
        }
    }
}

/// Gate source for clock inputs: a square wave at `bpm` quarter notes.
pub struct Clock {
    id: ModuleId,
    sample_rate: f32,
    phase: f32,
}

impl Clock {
    pub const BPM_PARAM: usize = 0;
    pub const GATE_OUTPUT: usize = 0;

    pub fn new() -> Self {
        Self {
            id: new_module_id(),
            sample_rate: 48_000.0,
            phase: 0.0,
        }
    }
}

impl Default for Clock {
    fn default() -> Self {
        Self::new()
    }
}

impl Module for Clock {
    fn name(&self) -> &'static str {
        "clock"
    }

    fn id(&self) -> ModuleId {
        self.id
    }

    fn layout(&self) -> PortLayout {
        PortLayout {
            params: &[120.0],
            inputs: 0,
            outputs: 1,
            lights: 0,
        }
    }

    fn process(&mut self, _args: &ProcessArgs, ports: &mut Ports) {
        let hz = ports.param(Self::BPM_PARAM).max(0.0) / 60.0;
        self.phase = (self.phase + hz / self.sample_rate).fract();
        ports.set_output(Self::GATE_OUTPUT, if self.phase < 0.5 { 10.0 } else { 0.0 });
    }

    fn on_reset(&mut self) {
        self.phase = 0.0;
    }

    fn on_sample_rate_change(&mut self, sample_rate: f32) {
        self.sample_rate = sample_rate;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Emits the frame counter, echoes input 0 plus param 0 to output 1.
    struct Probe;

    impl Module for Probe {
        fn name(&self) -> &'static str {
            "probe"
        }
        fn id(&self) -> ModuleId {
            7
        }
        fn layout(&self) -> PortLayout {
            PortLayout {
                params: &[0.0],
                inputs: 1,
                outputs: 2,
                lights: 0,
            }
        }
        fn process(&mut self, args: &ProcessArgs, ports: &mut Ports) {
            ports.set_output(0, args.frame as f32);
            ports.set_output(1, ports.voltage(0) + ports.param(0));
        }
    }

    #[test]
    fn cables_carry_one_sample_late() {
        let mut rack = Rack::new(1000.0, 4);
        let a = rack.add(Box::new(Probe));
        let b = rack.add(Box::new(Probe));
        assert!(rack.connect((a, 0), (b, 0)));
        assert!(!rack.connect((a, 5), (b, 0)));

        rack.run_block();
        let m = rack.meters();
        assert_eq!(m[a].outputs[0], 3.0);
        assert_eq!(m[b].outputs[1], 2.0);
    }

    #[test]
    fn press_lasts_one_block() {
        let mut rack = Rack::new(1000.0, 2);
        let a = rack.add(Box::new(Probe));
        rack.apply(AudioCommand::Press { slot: a, param: 0 });
        rack.run_block();
        assert_eq!(rack.meters()[a].outputs[1], 1.0);
        rack.run_block();
        assert_eq!(rack.meters()[a].outputs[1], 0.0);
    }

    #[test]
    fn clock_is_a_square_wave() {
        let mut clock = Clock::new();
        clock.on_sample_rate_change(8.0);
        let mut ports = Ports::new(clock.layout());
        ports.params[Clock::BPM_PARAM] = 60.0;
        let args = ProcessArgs::new(8.0, 0);
        let mut highs = 0;
        for _ in 0..8 {
            clock.process(&args, &mut ports);
            if ports.outputs[0] > 1.0 {
                highs += 1;
            }
        }
        assert_eq!(highs, 4);
    }

    #[test]
    fn thread_stops_on_drop() {
        let mut rack = Rack::new(48_000.0, 64);
        rack.add(Box::new(Probe));
        let t = AudioThread::spawn(rack).unwrap();
        let meters = t.snapshot();
        assert_eq!(meters.len(), 1);
        assert_eq!(meters[0].name, "probe");
        drop(t);
    }
}
