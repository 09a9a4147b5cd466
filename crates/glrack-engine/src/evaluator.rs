//! GPU-side evaluator shared by every shader consumer.
//!
//! An evaluator owns at most one linked program plus the quad and offscreen
//! target it draws into. It rebuilds the program on the render thread whenever
//! its `ShaderLink` is flagged dirty, and otherwise draws once per tick. The
//! two shapes differ only in target size and whether pixels are read back.

use std::sync::atomic::{AtomicBool, AtomicI32, AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use crate::compile::build_program;
use crate::error::EngineError;
use crate::events::{EngineEvent, EventTx};
use crate::gpu::{DrawPass, GpuBackend, UniformValue, POSITION_ATTRIB, TEXCOORD_ATTRIB};
use crate::library::{ModuleId, ShaderLibrary, Subscription};
use crate::{loge, logi, logw};

/// Lock-free flags shared between a module's audio half, its menu callback and
/// its evaluator.
#[derive(Debug)]
pub struct ShaderLink {
    dirty: AtomicBool,
    subscribed: AtomicBool,
    ready: AtomicBool,
    publisher: AtomicI64,
    index: AtomicI32,
}

impl Default for ShaderLink {
    fn default() -> Self {
        Self::new()
    }
}

impl ShaderLink {
    /// Starts dirty so the first rebuild looks for a subscription.
    pub fn new() -> Self {
        Self {
            dirty: AtomicBool::new(true),
            subscribed: AtomicBool::new(false),
            ready: AtomicBool::new(false),
            publisher: AtomicI64::new(-1),
            index: AtomicI32::new(-1),
        }
    }

    /// Subscribe callback: remember what was picked and request a rebuild.
    pub fn notify(&self, publisher: ModuleId, index: i32) {
        self.publisher.store(publisher, Ordering::Relaxed);
        self.index.store(index, Ordering::Relaxed);
        self.subscribed.store(true, Ordering::Release);
        self.dirty.store(true, Ordering::Release);
    }

    pub fn mark_dirty(&self) {
        self.dirty.store(true, Ordering::Release);
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty.load(Ordering::Acquire)
    }

    /// Clear the dirty flag, returning whether it was set.
    pub fn take_dirty(&self) -> bool {
        self.dirty.swap(false, Ordering::AcqRel)
    }

    /// The subscription the module believes it holds.
    pub fn expected(&self) -> (ModuleId, i32) {
        (
            self.publisher.load(Ordering::Relaxed),
            self.index.load(Ordering::Relaxed),
        )
    }

    fn adopt(&self, sub: &Subscription) {
        self.publisher.store(sub.publisher_id, Ordering::Relaxed);
        self.index.store(sub.shader_index, Ordering::Relaxed);
    }

    /// A subscription was picked, whether or not it resolved.
    pub fn is_subscribed(&self) -> bool {
        self.subscribed.load(Ordering::Acquire)
    }

    /// A linked program is live and drawing.
    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }

    fn set_ready(&self, v: bool) {
        self.ready.store(v, Ordering::Release);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvalShape {
    /// Draws at the size of the surface it is shown on.
    Visual,
    /// Draws into a fixed tiny target and reads the pixels back.
    Readback { width: i32, height: i32 },
}

#[derive(Debug, Clone)]
pub struct EvaluatorConfig {
    pub tag: &'static str,
    pub subscriber: ModuleId,
    pub shape: EvalShape,
    /// Uniform names, in the order values are passed to `tick`.
    pub uniforms: &'static [&'static str],
}

#[derive(Debug, Clone, PartialEq)]
pub enum TickOutcome {
    /// First tick: the context was claimed, nothing drawn.
    Claimed,
    NoProgram,
    Drawn,
    Pixels(Vec<[f32; 4]>),
}

struct LiveProgram<B: GpuBackend> {
    program: B::Program,
    locations: Vec<Option<B::Location>>,
    position: Option<u32>,
    texcoord: Option<u32>,
}

pub struct Evaluator<B: GpuBackend> {
    config: EvaluatorConfig,
    library: Arc<ShaderLibrary>,
    link: Arc<ShaderLink>,
    events: EventTx,
    initialized: bool,
    live: Option<LiveProgram<B>>,
    quad: Option<B::Geometry>,
    target: Option<B::Target>,
    target_size: (i32, i32),
    started: Instant,
}

impl<B: GpuBackend> Evaluator<B> {
    pub fn new(config: EvaluatorConfig, library: Arc<ShaderLibrary>, link: Arc<ShaderLink>) -> Self {
        Self {
            config,
            library,
            link,
            events: EventTx::none(),
            initialized: false,
            live: None,
            quad: None,
            target: None,
            target_size: (0, 0),
            started: Instant::now(),
        }
    }

    pub fn with_events(mut self, events: EventTx) -> Self {
        self.events = events;
        self
    }

    pub fn link(&self) -> &Arc<ShaderLink> {
        &self.link
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    pub fn has_program(&self) -> bool {
        self.live.is_some()
    }

    /// Seconds since the evaluator was created.
    pub fn elapsed_secs(&self) -> f32 {
        self.started.elapsed().as_secs_f32()
    }

    /// The offscreen target and its size, once something has been drawn.
    pub fn target(&self) -> Option<(&B::Target, i32, i32)> {
        self.target
            .as_ref()
            .map(|t| (t, self.target_size.0, self.target_size.1))
    }

    /// One render tick.
    ///
    /// `values` line up with `EvaluatorConfig::uniforms`; uniforms the program
    /// does not declare are skipped.
    pub fn tick(&mut self, gpu: &mut B, surface: (i32, i32), values: &[UniformValue<'_>]) -> TickOutcome {
        if !self.initialized {
            self.initialized = true;
            logi!(self.config.tag, "render context claimed");
            return TickOutcome::Claimed;
        }

        if self.link.take_dirty() {
            if let Err(e) = self.rebuild(gpu) {
                loge!(self.config.tag, "{e}");
            }
        }

        if self.live.is_none() {
            return TickOutcome::NoProgram;
        }

        let (w, h) = match self.config.shape {
            EvalShape::Visual => (surface.0.max(1), surface.1.max(1)),
            EvalShape::Readback { width, height } => (width, height),
        };
        if let Err(e) = self.ensure_target(gpu, w, h) {
            loge!(self.config.tag, "{e}");
            return TickOutcome::NoProgram;
        }

        let (Some(live), Some(quad), Some(target)) = (&self.live, &self.quad, &self.target) else {
            return TickOutcome::NoProgram;
        };

        let uniforms: Vec<(&B::Location, UniformValue<'_>)> = live
            .locations
            .iter()
            .zip(values)
            .filter_map(|(loc, v)| loc.as_ref().map(|l| (l, *v)))
            .collect();

        gpu.draw(&DrawPass {
            program: &live.program,
            geometry: quad,
            target,
            width: w,
            height: h,
            position_attrib: live.position,
            texcoord_attrib: live.texcoord,
            uniforms: &uniforms,
            blend: self.config.shape == EvalShape::Visual,
        });

        match self.config.shape {
            EvalShape::Visual => TickOutcome::Drawn,
            EvalShape::Readback { .. } => TickOutcome::Pixels(gpu.read_pixels(target, w, h)),
        }
    }

    /// Re-synthesize the program from the current subscription.
    ///
    /// Returns whether a new program was swapped in. A failed build keeps the
    /// previous program; nothing is retried until the link is flagged again.
    pub fn rebuild(&mut self, gpu: &mut B) -> Result<bool, EngineError> {
        let tag = self.config.tag;
        if !self.initialized {
            return Err(EngineError::NotInitialized { tag });
        }
        let subscriber = self.config.subscriber;

        let Some(sub) = self.library.subscription(subscriber) else {
            logw!(tag, "no shader subscription for module {subscriber}");
            return Ok(false);
        };

        let expected = self.link.expected();
        if expected != (sub.publisher_id, sub.shader_index) {
            logw!(
                tag,
                "subscription mismatch: module expected {}:{} but registry holds {}:{}; using registry",
                expected.0,
                expected.1,
                sub.publisher_id,
                sub.shader_index
            );
            self.link.adopt(&sub);
        }

        if !sub.is_valid {
            logw!(
                tag,
                "invalid subscription {}:{} for module {subscriber}",
                sub.publisher_id,
                sub.shader_index
            );
            self.events.emit(EngineEvent::SubscriptionInvalid {
                subscriber,
                publisher: sub.publisher_id,
                index: sub.shader_index,
            });
            return Ok(false);
        }

        let Some(pair) = self.library.shader_for_module(subscriber) else {
            logw!(tag, "no valid shader pair for module {subscriber}");
            return Ok(false);
        };

        let program = match build_program(gpu, &pair.vertex_source, &pair.fragment_source) {
            Ok(p) => p,
            Err(e) => {
                logw!(tag, "shader '{}' failed: {e}", pair.name);
                self.events.emit(EngineEvent::ShaderCompileErr {
                    module: tag,
                    name: pair.name.clone(),
                    log: e.diagnostic().unwrap_or_default().to_string(),
                });
                return Ok(false);
            }
        };

        if self.quad.is_none() {
            match gpu.create_quad() {
                Ok(q) => self.quad = Some(q),
                Err(e) => {
                    gpu.delete_program(program);
                    return Err(e);
                }
            }
        }

        if let Some(old) = self.live.take() {
            gpu.delete_program(old.program);
        }

        let locations = self
            .config
            .uniforms
            .iter()
            .map(|name| gpu.uniform_location(&program, name))
            .collect();
        let position = gpu.attrib_location(&program, POSITION_ATTRIB);
        let texcoord = gpu.attrib_location(&program, TEXCOORD_ATTRIB);

        self.live = Some(LiveProgram {
            program,
            locations,
            position,
            texcoord,
        });
        self.link.set_ready(true);

        logi!(
            tag,
            "program ready: '{}' from publisher {} #{}",
            pair.name,
            sub.publisher_id,
            sub.shader_index
        );
        self.events.emit(EngineEvent::ProgramReady {
            module: tag,
            publisher: sub.publisher_id,
            index: sub.shader_index,
        });
        Ok(true)
    }

    fn ensure_target(&mut self, gpu: &mut B, w: i32, h: i32) -> Result<(), EngineError> {
        match &mut self.target {
            Some(t) => {
                if self.target_size != (w, h) {
                    gpu.resize_target(t, w, h);
                    self.target_size = (w, h);
                }
            }
            None => {
                self.target = Some(gpu.create_target(w, h)?);
                self.target_size = (w, h);
            }
        }
        Ok(())
    }

    /// Free every GPU object. The next tick claims the context again and rebuilds.
    pub fn release(&mut self, gpu: &mut B) {
        if let Some(live) = self.live.take() {
            gpu.delete_program(live.program);
        }
        if let Some(q) = self.quad.take() {
            gpu.delete_quad(q);
        }
        if let Some(t) = self.target.take() {
            gpu.delete_target(t);
        }
        self.target_size = (0, 0);
        self.link.set_ready(false);
        self.link.mark_dirty();
        self.initialized = false;
    }
}
