//! Built-in stereo effects of Glaze, used whenever no shader is live.
//!
//! All signals are in the shader-native `[-1, 1]` range. Each effect takes the
//! three user controls `u1..u3` in `[0, 1]` and maps them to its own ranges.

use std::f32::consts::{FRAC_PI_2, PI, TAU};

use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};

/// Length of the reverb, delay and grain buffers, in samples.
pub const BUFFER_LEN: usize = 4096;
pub const MAX_GRAINS: usize = 32;
const SPECTRAL_LEN: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Reverb,
    Delay,
    Fuzz,
    Glide,
    Grain,
    Fold,
    Warp,
    Spectral,
}

impl Mode {
    pub const ALL: [Mode; 8] = [
        Mode::Reverb,
        Mode::Delay,
        Mode::Fuzz,
        Mode::Glide,
        Mode::Grain,
        Mode::Fold,
        Mode::Warp,
        Mode::Spectral,
    ];

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn from_index(i: i64) -> Option<Mode> {
        usize::try_from(i).ok().and_then(|i| Self::ALL.get(i).copied())
    }

    pub fn next(self) -> Mode {
        Self::ALL[(self.index() + 1) % Self::ALL.len()]
    }

    /// Panel abbreviation.
    pub fn label(self) -> &'static str {
        match self {
            Mode::Reverb => "REV",
            Mode::Delay => "DLY",
            Mode::Fuzz => "FZZ",
            Mode::Glide => "GLD",
            Mode::Grain => "GRN",
            Mode::Fold => "FLD",
            Mode::Warp => "WRP",
            Mode::Spectral => "SPC",
        }
    }
}

/// Ring buffer where `tap(0)` is the newest sample.
#[derive(Debug, Clone)]
struct History {
    buf: Vec<f32>,
    head: usize,
}

impl History {
    fn new(len: usize) -> Self {
        Self {
            buf: vec![0.0; len],
            head: 0,
        }
    }

    fn tap(&self, ago: usize) -> f32 {
        let len = self.buf.len();
        self.buf[(self.head + len - ago % len) % len]
    }

    fn push(&mut self, v: f32) {
        self.head = (self.head + 1) % self.buf.len();
        self.buf[self.head] = v;
    }

    fn clear(&mut self) {
        self.buf.fill(0.0);
        self.head = 0;
    }
}

/// Four decaying taps spread over the first half of the buffer.
#[derive(Debug, Clone)]
struct Reverb {
    line: History,
}

impl Reverb {
    fn process(&mut self, input: f32, decay: f32, diffusion: f32) -> f32 {
        let mut wet = 0.6 * input;
        for i in 0..4 {
            let ago = (i + 1) * (BUFFER_LEN / 8);
            // Stored samples are undecayed; a tap `k` steps back has lost decay^k.
            wet += self.line.tap(ago) * decay.powi(ago as i32) * (0.5 / (i as f32 + 1.0));
        }
        let out = wet * diffusion;
        self.line.push(out);
        out
    }
}

#[derive(Debug, Clone)]
struct Delay {
    line: History,
}

impl Delay {
    fn process(&mut self, input: f32, time: f32, feedback: f32, modulation: f32, frame: u64) -> f32 {
        let max = BUFFER_LEN - 1;
        let base = (1 + (time * BUFFER_LEN as f32 * 0.99) as usize).min(max);
        let wobble = (frame as f32 * 0.001).sin() * modulation;
        let offset = (wobble * base as f32 * 0.1) as isize;
        let actual = (base as isize + offset).clamp(1, max as isize) as usize;

        let out = input + self.line.tap(actual) * feedback;
        self.line.push(out);
        out
    }
}

fn fuzz(input: f32, drive: f32, shape: f32, tone: f32, last: &mut f32) -> f32 {
    let driven = input * (1.0 + drive * 19.0);
    let hard = driven.clamp(-1.0, 1.0);
    let shaped = if shape < 0.5 {
        driven.tanh() * (1.0 - shape * 2.0) + hard * (shape * 2.0)
    } else {
        let foldback = driven / (1.0 + driven.abs());
        hard * (2.0 - shape * 2.0) + foldback * (shape * 2.0 - 1.0)
    };
    // One-pole lowpass.
    let filtered = shaped * tone + *last * (1.0 - tone);
    *last = filtered;
    filtered
}

/// Ring modulation by an LFO whose rate glides towards `target`.
#[derive(Debug, Clone, Copy)]
struct Glide {
    phase: f32,
    freq: f32,
}

impl Default for Glide {
    fn default() -> Self {
        Self { phase: 0.0, freq: 1.0 }
    }
}

impl Glide {
    fn process(&mut self, input: f32, target: f32, speed: f32, waveform: f32, sample_time: f32) -> f32 {
        self.freq += (target - self.freq) * speed;
        self.phase += self.freq * sample_time * TAU;
        if self.phase > TAU {
            self.phase -= TAU;
        }

        let tri = 2.0 * (self.phase / PI - 1.0).abs() - 1.0;
        let lfo = if waveform < 0.5 {
            self.phase.sin() * (1.0 - waveform * 2.0) + tri * (waveform * 2.0)
        } else {
            let square = if self.phase < PI { 1.0 } else { -1.0 };
            tri * (2.0 - waveform * 2.0) + square * (waveform * 2.0 - 1.0)
        };
        input * lfo
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct Grain {
    active: bool,
    position: usize,
    length: usize,
    pan: f32,
    pitch: f32,
    phase: f32,
}

#[derive(Debug, Clone)]
struct Granulator {
    buf: Vec<f32>,
    write: usize,
    trigger_phase: f32,
    grains: [Grain; MAX_GRAINS],
}

impl Granulator {
    fn new() -> Self {
        Self {
            buf: vec![0.0; BUFFER_LEN],
            write: 0,
            trigger_phase: 0.0,
            grains: [Grain::default(); MAX_GRAINS],
        }
    }

    fn clear(&mut self) {
        self.buf.fill(0.0);
        self.write = 0;
        self.trigger_phase = 0.0;
        self.grains = [Grain::default(); MAX_GRAINS];
    }

    fn active(&self) -> usize {
        self.grains.iter().filter(|g| g.active).count()
    }

    fn process(
        &mut self,
        input: f32,
        density: f32,
        size: f32,
        pitch: f32,
        sample_rate: f32,
        rng: &mut SmallRng,
    ) -> (f32, f32) {
        self.buf[self.write] = input;
        self.write = (self.write + 1) % self.buf.len();

        self.trigger_phase += (0.5 + density * density * 49.5) / sample_rate;
        if self.trigger_phase >= 1.0 {
            self.trigger_phase -= 1.0;
            let max_grains = 4 + (density * 12.0) as usize;
            if self.active() < max_grains {
                if let Some(g) = self.grains.iter_mut().find(|g| !g.active) {
                    let size = size * rng.gen_range(0.9f32..1.1);
                    let pitch = pitch * rng.gen_range(0.95f32..1.05);
                    *g = Grain {
                        active: true,
                        position: self.write,
                        // 5 ms to 100 ms.
                        length: (((0.005 + size * 0.095) * sample_rate) as usize).max(1),
                        pan: rng.gen_range(0.1f32..0.9),
                        pitch: 0.5 + pitch * 1.5,
                        phase: 0.0,
                    };
                }
            }
        }

        let (mut left, mut right, mut total_env) = (0.0f32, 0.0f32, 0.0f32);
        let len = self.buf.len();
        for g in self.grains.iter_mut().filter(|g| g.active) {
            // Hann window.
            let env = 0.5 * (1.0 - (TAU * g.phase / g.length as f32).cos());
            total_env += env;

            let read = (g.position + (g.phase * g.pitch) as usize) % len;
            let s = self.buf[read] * env;
            left += s * (g.pan * FRAC_PI_2).cos();
            right += s * (g.pan * FRAC_PI_2).sin();

            g.phase += 1.0;
            if g.phase >= g.length as f32 {
                g.active = false;
            }
        }

        if total_env > 1.0 {
            let norm = 0.7 / total_env;
            left *= norm;
            right *= norm;
        }
        (left, right)
    }
}

fn fold(input: f32, folds: f32, symmetry: f32, bias: f32) -> f32 {
    let biased = input + (bias * 2.0 - 1.0);
    let phase = biased * (1.0 + folds * 7.0) * PI;
    let tri = 2.0 * (((phase / PI + 0.5).rem_euclid(2.0) - 1.0).abs() - 0.5);
    let folded = if symmetry < 0.5 {
        phase.sin() * (1.0 - symmetry * 2.0) + tri * (symmetry * 2.0)
    } else {
        let p = phase / PI;
        let p = p - (p + 0.5).floor();
        let parabolic = 4.0 * (p * p - 0.25);
        tri * (2.0 - symmetry * 2.0) + parabolic * (symmetry * 2.0 - 1.0)
    };
    (folded * 0.7).tanh()
}

/// Crossfade between the current and previous sample, with the fade position
/// following a warped one-second ramp.
#[derive(Debug, Clone, Copy, Default)]
struct Warp {
    phase: f32,
    last: f32,
}

impl Warp {
    fn process(&mut self, input: f32, amount: f32, shape: f32, skew: f32, sample_time: f32) -> f32 {
        self.phase += sample_time;
        if self.phase >= 1.0 {
            self.phase -= 1.0;
        }
        let p = self.phase;
        let warped = if shape < 0.5 {
            p + (p * TAU).sin() * amount * 0.1
        } else {
            let base = 1.0 + (shape * 2.0 - 1.0) * 9.0;
            let exp = if base > 1.0 { (base.powf(p) - 1.0) / (base - 1.0) } else { p };
            p + (exp - p) * amount
        };
        let skewed = warped + (skew * 2.0 - 1.0) * 0.25;
        let skewed = skewed - skewed.floor();

        let scaled = skewed * BUFFER_LEN as f32;
        let frac = scaled - scaled.floor();

        let out = input * (1.0 - frac) + self.last * frac;
        self.last = input;
        out.tanh()
    }
}

/// Short windowed resonator over the last sixteen samples.
#[derive(Debug, Clone, Copy, Default)]
struct Spectral {
    buf: [f32; SPECTRAL_LEN],
    pos: usize,
}

impl Spectral {
    fn process(&mut self, input: f32, spread: f32, shift: f32, smear: f32) -> f32 {
        const N: usize = SPECTRAL_LEN;
        self.buf[self.pos] = (input * 1.5).tanh();

        let mut out = 0.0f32;
        let mut total = 0.0f32;
        for i in 0..N {
            let x = i as f32 / N as f32;
            let read = (self.pos + i) % N;
            let offset = spread * 2.0 * (TAU * x).sin();
            let at = (read + (offset * N as f32) as usize) % N;

            // Blackman window.
            let win = 0.42 - 0.5 * (TAU * x).cos() + 0.08 * (2.0 * TAU * x).cos();

            let phase = shift * 2.0 * TAU * x;
            let modulator = phase.sin() * (1.0 + smear * (phase * 0.5).sin());
            let mut s = self.buf[at] * modulator * win * (1.0 + smear * 2.0);
            if i > 0 {
                let fb = smear * 0.8;
                s = s * (1.0 - fb) + self.buf[(at + N - 1) % N] * win * fb;
            }
            out += s;
            total += win;
        }
        if total > 0.0 {
            out /= total;
            out *= 1.0 + 0.2 * (out * PI).sin();
        }
        self.pos = (self.pos + 1) % N;
        (out * 1.5).tanh()
    }
}

/// Per-channel effect state. Every mode keeps its own state so switching
/// modes never feeds one effect's buffer into another.
#[derive(Debug, Clone)]
struct Channel {
    reverb: Reverb,
    delay: Delay,
    fuzz_last: f32,
    glide: Glide,
    grain: Granulator,
    warp: Warp,
    spectral: Spectral,
}

impl Channel {
    fn new() -> Self {
        Self {
            reverb: Reverb {
                line: History::new(BUFFER_LEN),
            },
            delay: Delay {
                line: History::new(BUFFER_LEN),
            },
            fuzz_last: 0.0,
            glide: Glide::default(),
            grain: Granulator::new(),
            warp: Warp::default(),
            spectral: Spectral::default(),
        }
    }

    // Runs on the audio thread, so buffers are cleared in place.
    fn reset(&mut self) {
        self.reverb.line.clear();
        self.delay.line.clear();
        self.fuzz_last = 0.0;
        self.glide = Glide::default();
        self.grain.clear();
        self.warp = Warp::default();
        self.spectral = Spectral::default();
    }
}

/// One stereo sample going through an effect.
#[derive(Debug, Clone, Copy, Default)]
pub struct StereoIn {
    pub left: f32,
    pub right: f32,
    pub left_connected: bool,
    pub right_connected: bool,
    pub u: [f32; 3],
}

pub struct StereoEffects {
    left: Channel,
    right: Channel,
    rng: SmallRng,
}

impl StereoEffects {
    pub fn new() -> Self {
        Self::with_rng(SmallRng::from_entropy())
    }

    pub fn with_rng(rng: SmallRng) -> Self {
        Self {
            left: Channel::new(),
            right: Channel::new(),
            rng,
        }
    }

    pub fn reset(&mut self) {
        self.left.reset();
        self.right.reset();
    }

    /// Wet signal of `mode`. A channel whose input is unpatched passes its dry
    /// value through, except in grain mode where left spills into right.
    pub fn process(&mut self, mode: Mode, x: &StereoIn, sample_rate: f32, frame: u64) -> (f32, f32) {
        let [u1, u2, u3] = x.u;
        let sample_time = 1.0 / sample_rate;
        let (l, r) = (x.left_connected, x.right_connected);
        let mut out = (x.left, x.right);

        match mode {
            Mode::Reverb => {
                let decay = 0.5 + u1 * 0.499;
                let diffusion = 0.2 + u2 * 0.7;
                if l {
                    out.0 = self.left.reverb.process(x.left, decay, diffusion);
                }
                if r {
                    out.1 = self.right.reverb.process(x.right, decay, diffusion);
                }
            }
            Mode::Delay => {
                let feedback = u2 * 0.99;
                if l {
                    out.0 = self.left.delay.process(x.left, u1, feedback, u3, frame);
                }
                if r {
                    out.1 = self.right.delay.process(x.right, u1 * 1.01, feedback, u3, frame);
                }
            }
            Mode::Fuzz => {
                let tone = 0.1 + u3 * 0.89;
                if l {
                    out.0 = fuzz(x.left, u1, u2, tone, &mut self.left.fuzz_last);
                }
                if r {
                    out.1 = fuzz(x.right, u1, u2, tone, &mut self.right.fuzz_last);
                }
            }
            Mode::Glide => {
                let target = 0.25 + u1 * 4.0;
                let speed = 0.001 + u2 * 0.099;
                if l {
                    out.0 = self.left.glide.process(x.left, target, speed, u3, sample_time);
                }
                if r {
                    out.1 = self.right.glide.process(x.right, target * 1.003, speed, u3, sample_time);
                }
            }
            Mode::Grain => {
                if l {
                    let (gl, gr) = self.left.grain.process(x.left, u1, u2, u3, sample_rate, &mut self.rng);
                    out.0 = gl;
                    if !r {
                        out.1 = gr;
                    }
                }
                if r {
                    let (_, gr) = self.right.grain.process(x.right, u1, u2, u3, sample_rate, &mut self.rng);
                    out.1 = gr;
                }
            }
            Mode::Fold => {
                if l {
                    out.0 = fold(x.left, u1, u2, u3);
                }
                if r {
                    out.1 = fold(x.right, u1, u2, u3);
                }
            }
            Mode::Warp => {
                if l {
                    out.0 = self.left.warp.process(x.left, u1, u2, u3, sample_time);
                }
                if r {
                    out.1 = self.right.warp.process(x.right, u1, u2, u3 * 1.02, sample_time);
                }
            }
            Mode::Spectral => {
                let spread = u1 * 0.8;
                let shift = u2 * 4.0 - 2.0;
                let smear = u3 * 0.9;
                if l {
                    out.0 = self.left.spectral.process(x.left, spread, shift, smear);
                }
                if r {
                    out.1 = self.right.spectral.process(x.right, spread, shift * 1.1, smear);
                }
            }
        }
        out
    }
}

impl Default for StereoEffects {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn effects() -> StereoEffects {
        StereoEffects::with_rng(SmallRng::seed_from_u64(7))
    }

    fn stereo(v: f32, u: [f32; 3]) -> StereoIn {
        StereoIn {
            left: v,
            right: v,
            left_connected: true,
            right_connected: true,
            u,
        }
    }

    #[test]
    fn modes_cycle_and_round_trip_through_index() {
        let mut m = Mode::Reverb;
        for expected in Mode::ALL.iter().skip(1).chain(std::iter::once(&Mode::Reverb)) {
            m = m.next();
            assert_eq!(m, *expected);
        }
        assert_eq!(Mode::from_index(2), Some(Mode::Fuzz));
        assert_eq!(Mode::from_index(8), None);
        assert_eq!(Mode::from_index(-1), None);
        assert_eq!(Mode::Spectral.label(), "SPC");
    }

    #[test]
    fn history_taps_count_back_from_newest() {
        let mut h = History::new(4);
        for v in [1.0, 2.0, 3.0] {
            h.push(v);
        }
        assert_eq!(h.tap(0), 3.0);
        assert_eq!(h.tap(2), 1.0);
        assert_eq!(h.tap(3), 0.0);
        h.clear();
        assert_eq!(h.tap(0), 0.0);
    }

    #[test]
    fn delay_echoes_after_its_length() {
        let mut d = Delay {
            line: History::new(BUFFER_LEN),
        };
        // time 0 gives the shortest delay: two samples.
        let outs: Vec<f32> = [1.0, 0.0, 0.0, 0.0, 0.0]
            .iter()
            .enumerate()
            .map(|(n, x)| d.process(*x, 0.0, 0.5, 0.0, n as u64))
            .collect();
        assert_eq!(outs, [1.0, 0.0, 0.5, 0.0, 0.25]);
    }

    #[test]
    fn reverb_first_sample_is_scaled_input() {
        let mut r = Reverb {
            line: History::new(BUFFER_LEN),
        };
        let out = r.process(1.0, 0.9, 0.5);
        assert!((out - 0.3).abs() < 1e-6);
    }

    #[test]
    fn reset_silences_the_delay_tail() {
        let mut fx = effects();
        let u = [0.0, 0.5, 0.0];
        fx.process(Mode::Delay, &stereo(1.0, u), 48_000.0, 0);
        fx.process(Mode::Delay, &stereo(0.0, u), 48_000.0, 1);
        fx.reset();
        for n in 2..6 {
            assert_eq!(fx.process(Mode::Delay, &stereo(0.0, u), 48_000.0, n), (0.0, 0.0));
        }

        // Without a reset the echo arrives two samples later.
        let mut fx = effects();
        fx.process(Mode::Delay, &stereo(1.0, u), 48_000.0, 0);
        fx.process(Mode::Delay, &stereo(0.0, u), 48_000.0, 1);
        assert_ne!(fx.process(Mode::Delay, &stereo(0.0, u), 48_000.0, 2), (0.0, 0.0));
    }

    #[test]
    fn fuzz_with_full_tone_is_a_clipper() {
        let mut last = 0.0;
        let y = fuzz(1.0, 1.0, 0.5, 1.0, &mut last);
        assert!((y - 1.0).abs() < 1e-6);
        assert_eq!(last, y);
    }

    #[test]
    fn unpatched_right_passes_dry_except_in_grain_mode() {
        let mut fx = effects();
        let mut x = stereo(0.5, [0.5, 0.5, 0.5]);
        x.right_connected = false;
        for mode in Mode::ALL {
            let (_, r) = fx.process(mode, &x, 48_000.0, 0);
            if mode != Mode::Grain {
                assert_eq!(r, 0.5, "{}", mode.label());
            }
        }
    }

    #[test]
    fn every_mode_stays_bounded_on_full_scale_noise() {
        let mut fx = effects();
        let mut rng = SmallRng::seed_from_u64(1);
        for mode in Mode::ALL {
            for n in 0..2_000u64 {
                let v = rng.gen_range(-1.0f32..1.0);
                let u = [rng.gen(), rng.gen(), rng.gen()];
                let (l, r) = fx.process(mode, &stereo(v, u), 48_000.0, n);
                assert!(l.is_finite() && r.is_finite(), "{}", mode.label());
                assert!(l.abs() < 200.0 && r.abs() < 200.0, "{}", mode.label());
            }
        }
    }

    #[test]
    fn grains_spawn_and_expire() {
        let mut g = Granulator::new();
        let mut rng = SmallRng::seed_from_u64(3);
        for _ in 0..1_000 {
            g.process(0.3, 1.0, 0.0, 0.5, 48_000.0, &mut rng);
        }
        assert!(g.active() > 0);
        for _ in 0..48_000 {
            g.process(0.0, 0.0, 0.0, 0.5, 48_000.0, &mut rng);
        }
        // At density 0 a grain fires every two seconds and lives a few ms.
        assert!(g.active() <= 1);
    }
}
