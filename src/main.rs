use std::collections::BTreeSet;
use std::ffi::CString;
use std::num::NonZeroU32;
use std::path::{Path, PathBuf};
use std::rc::Rc;
use std::sync::Arc;

use anyhow::Context as _;
use crossbeam_channel::Receiver;

use glutin::config::ConfigTemplateBuilder;
use glutin::context::{ContextApi, ContextAttributesBuilder, GlProfile, NotCurrentContext};
use glutin::display::GetGlDisplay;
use glutin::prelude::*;
use glutin::surface::{SurfaceAttributesBuilder, SwapInterval, WindowSurface};
use glutin_winit::DisplayBuilder;

use raw_window_handle::HasRawWindowHandle;

use winit::dpi::PhysicalSize;
use winit::event::{Event, WindowEvent};
use winit::event_loop::{ControlFlow, EventLoop};
use winit::keyboard::{KeyCode, PhysicalKey};

use glrack_engine::assets::{load_shader_pair, read_to_string_result, AssetsRoot};
use glrack_engine::config::{
    load_json_file, load_rack_config, load_session, save_session, ConfigMode, GlabState, GlazeState, RackConfig,
    SessionFile,
};
use glrack_engine::events::{ConfigKind, EngineEvent, EventTx};
use glrack_engine::library::{ModuleId, ShaderLibrary};
use glrack_engine::menu::{build_menu, select_shader, ShaderMenu, ShaderSubscriber};
use glrack_engine::modules::{CanvasModule, CanvasView, Glab, GlabModule, GlazeModule, GlazeView, GlcvModule, GlcvView, Glib, GlibModule};
use glrack_engine::rack::new_module_id;
use glrack_engine::{logging, loge, logi, logw};

mod audio;
mod gl_backend;
mod hotreload;
mod presenter;
mod validate;

use audio::{AudioCommand, AudioThread, Clock, Rack};
use gl_backend::GlowBackend;
use hotreload::{HotEvent, HotReload};
use presenter::WindowPresenter;
use validate::{emit_issues, emit_summary, validate_rack_json, validate_subscription_names, IssueLevel};

const HELP: &[&str] = &[
    "Tab        cycle menu owner (canvas, glaze, glcv, glab)",
    "Up/Down    move the menu cursor",
    "Enter      subscribe the menu owner to the shader under the cursor",
    "M          print the menu",
    "P          publish the lab shaders",
    "[ / ]      previous / next shader in the first library",
    "G          next Glaze effect",
    "V          print output voltages",
    "S          save the session",
    "R          reset every module",
    "H          this help",
    "Esc        quit",
];

struct Args {
    log_file: Option<PathBuf>,
    strict: bool,
}

impl Args {
    /// `--log-file <path>` (append) or env GLRACK_LOG_FILE; `--strict` for fail-fast config.
    fn parse() -> Self {
        let mut log_file: Option<PathBuf> = None;
        let mut strict = false;
        let mut it = std::env::args().skip(1);
        while let Some(a) = it.next() {
            match a.as_str() {
                "--log-file" => log_file = it.next().map(PathBuf::from),
                "--strict" => strict = true,
                _ => {}
            }
        }
        if log_file.is_none() {
            if let Ok(p) = std::env::var("GLRACK_LOG_FILE") {
                if !p.trim().is_empty() {
                    log_file = Some(PathBuf::from(p));
                }
            }
        }
        Self { log_file, strict }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Focus {
    Canvas,
    Glaze,
    Glcv,
    Glab,
}

impl Focus {
    fn next(self) -> Self {
        match self {
            Focus::Canvas => Focus::Glaze,
            Focus::Glaze => Focus::Glcv,
            Focus::Glcv => Focus::Glab,
            Focus::Glab => Focus::Canvas,
        }
    }

    fn label(self) -> &'static str {
        match self {
            Focus::Canvas => "canvas",
            Focus::Glaze => "glaze",
            Focus::Glcv => "glcv",
            Focus::Glab => "glab",
        }
    }
}

/// Engine slots of the modules the keyboard drives.
struct Slots {
    glibs: Vec<usize>,
    glab: usize,
    glaze: usize,
}

struct LibraryDir {
    dir: PathBuf,
    glib: Glib,
}

struct App {
    gpu: GlowBackend,
    presenter: Option<WindowPresenter>,
    library: Arc<ShaderLibrary>,
    events_rx: Receiver<EngineEvent>,
    libraries: Vec<LibraryDir>,
    glab: Glab,
    canvas: CanvasView<GlowBackend>,
    glaze: GlazeView<GlowBackend>,
    glcv: GlcvView<GlowBackend>,
    audio: AudioThread,
    slots: Slots,
    hot: Option<HotReload>,
    lab_files: Option<(PathBuf, PathBuf)>,
    canvas_size: (i32, i32),
    session_path: PathBuf,
    focus: Focus,
    cursor: usize,
}

/// Modules before the engine thread and GL context exist.
struct Patch {
    library: Arc<ShaderLibrary>,
    events_rx: Receiver<EngineEvent>,
    libraries: Vec<LibraryDir>,
    glab: Glab,
    canvas: CanvasView<GlowBackend>,
    glaze: GlazeView<GlowBackend>,
    glcv: GlcvView<GlowBackend>,
}

fn main() {
    let args = Args::parse();
    let run_id = logging::init(args.log_file.clone());
    logi!("INIT", "run_id={run_id}");

    if let Err(e) = run(args) {
        loge!("INIT", "glrack init error: {e:#}");
        std::process::exit(1);
    }
}

fn run(args: Args) -> anyhow::Result<()> {
    let assets = AssetsRoot::discover(Path::new(env!("CARGO_MANIFEST_DIR")))?;
    logi!("INIT", "assets base: {}", assets.path().display());

    let (ev_tx, events_rx) = crossbeam_channel::unbounded();
    let events = EventTx::new(ev_tx);

    let mode = if args.strict { ConfigMode::Strict } else { ConfigMode::Lenient };
    let cfg = match load_rack_config(&assets, mode) {
        Ok(cfg) => cfg,
        Err(e) => {
            events.emit(EngineEvent::ConfigError {
                kind: ConfigKind::Rack,
                path: assets.pick_platform_json("rack"),
                error: e.to_string(),
            });
            return Err(e.into());
        }
    };
    events.emit(EngineEvent::ConfigLoaded {
        kind: ConfigKind::Rack,
        path: cfg.path.clone(),
    });
    if args.log_file.is_none() && cfg.log_file.is_some() {
        logging::init(cfg.log_file.clone());
    }

    if cfg.path.exists() {
        let raw = load_json_file(&cfg.path)?;
        let issues = validate_rack_json(&raw.value, assets.path());
        emit_issues("VALIDATE", &issues);
        emit_summary("VALIDATE", "rack.json", &issues);
        if args.strict && issues.iter().any(|i| i.level == IssueLevel::Error) {
            anyhow::bail!("{} has errors (strict mode)", cfg.path.display());
        }
    } else {
        logi!("INIT", "no rack.json at {}; using defaults", cfg.path.display());
    }

    let patch = build_patch(&cfg, events, events_rx);
    let (rack, slots) = build_rack(&cfg, &patch);
    let audio = AudioThread::spawn(rack).context("spawning the engine thread")?;

    let lab_files = match (&cfg.lab_vert, &cfg.lab_frag) {
        (Some(v), Some(f)) => Some((canonical(v), canonical(f))),
        _ => None,
    };
    let watched_labs: Vec<PathBuf> = lab_files
        .iter()
        .flat_map(|(v, f)| [v.clone(), f.clone()])
        .collect();
    let hot = match HotReload::new(&cfg.library_dirs, &watched_labs) {
        Ok(h) => {
            logi!("HOT", "watching {} library dir(s) and {} lab file(s)", cfg.library_dirs.len(), watched_labs.len());
            Some(h)
        }
        Err(e) => {
            logw!("HOT", "hot reload disabled: {e:#}");
            None
        }
    };

    // --- Window + GL context ------------------------------------------------------
    let event_loop = EventLoop::new().map_err(|e| anyhow::anyhow!("EventLoop::new failed: {e}"))?;
    let win_size = PhysicalSize::new(cfg.canvas.width, cfg.canvas.height);
    let window_builder = winit::window::WindowBuilder::new()
        .with_title("glrack")
        .with_inner_size(win_size);

    let template = ConfigTemplateBuilder::new().with_alpha_size(8).with_depth_size(0);
    let display_builder = DisplayBuilder::new().with_window_builder(Some(window_builder));

    let (window, gl_config) = display_builder
        .build(&event_loop, template, |configs| {
            configs
                .reduce(|a, b| if a.num_samples() > b.num_samples() { a } else { b })
                .expect("glutin offers at least one config")
        })
        .map_err(|e| anyhow::anyhow!("failed to build display: {e}"))?;
    let window = window.context("no window created")?;

    let raw_window_handle = window.raw_window_handle();
    let gl_display = gl_config.display();

    // Compatibility profile so `#version 120` shaders and attribute/varying keep working.
    let context_attributes = ContextAttributesBuilder::new()
        .with_profile(GlProfile::Compatibility)
        .with_context_api(ContextApi::OpenGl(None))
        .build(Some(raw_window_handle));

    let not_current_gl_context: NotCurrentContext = unsafe {
        gl_display
            .create_context(&gl_config, &context_attributes)
            .context("create_context failed")?
    };

    let size = window.inner_size();
    let attrs = SurfaceAttributesBuilder::<WindowSurface>::new().build(
        window.raw_window_handle(),
        NonZeroU32::new(size.width).unwrap_or(NonZeroU32::MIN),
        NonZeroU32::new(size.height).unwrap_or(NonZeroU32::MIN),
    );

    let gl_surface = unsafe {
        gl_display
            .create_window_surface(&gl_config, &attrs)
            .context("create_window_surface failed")?
    };

    let gl_context = not_current_gl_context
        .make_current(&gl_surface)
        .context("make_current failed")?;

    gl_surface
        .set_swap_interval(&gl_context, SwapInterval::Wait(NonZeroU32::MIN))
        .ok();

    let gl = unsafe {
        glow::Context::from_loader_function(|s| match CString::new(s) {
            Ok(name) => gl_display.get_proc_address(&name) as *const _,
            Err(_) => std::ptr::null(),
        })
    };

    let mut gpu = GlowBackend::new(Rc::new(gl));
    let presenter = WindowPresenter::new(&mut gpu).context("building the preview program")?;

    let mut app = App {
        gpu,
        presenter: Some(presenter),
        library: patch.library,
        events_rx: patch.events_rx,
        libraries: patch.libraries,
        glab: patch.glab,
        canvas: patch.canvas,
        glaze: patch.glaze,
        glcv: patch.glcv,
        audio,
        slots,
        hot,
        lab_files,
        canvas_size: (cfg.canvas.width as i32, cfg.canvas.height as i32),
        session_path: cfg.session_path.clone(),
        focus: Focus::Canvas,
        cursor: 0,
    };

    for line in HELP {
        logi!("KEYS", "{line}");
    }
    let mut title = String::new();

    event_loop
        .run(move |event, target| {
            target.set_control_flow(ControlFlow::Poll);

            match event {
                Event::WindowEvent { event, .. } => match event {
                    WindowEvent::CloseRequested => target.exit(),

                    WindowEvent::KeyboardInput { event, .. } => {
                        if event.state.is_pressed() && !event.repeat {
                            if let PhysicalKey::Code(code) = event.physical_key {
                                if app.on_key(code) {
                                    target.exit();
                                }
                            }
                        }
                    }

                    WindowEvent::Resized(new_size) => {
                        gl_surface.resize(
                            &gl_context,
                            NonZeroU32::new(new_size.width).unwrap_or(NonZeroU32::MIN),
                            NonZeroU32::new(new_size.height).unwrap_or(NonZeroU32::MIN),
                        );
                    }

                    WindowEvent::RedrawRequested => {
                        let size = window.inner_size();
                        app.render(size.width as i32, size.height as i32, || {
                            if let Err(e) = gl_surface.swap_buffers(&gl_context) {
                                logw!("RENDER", "swap_buffers failed: {e}");
                            }
                        });

                        let next_title = app.title();
                        if next_title != title {
                            window.set_title(&next_title);
                            title = next_title;
                        }
                    }

                    _ => {}
                },

                Event::AboutToWait => {
                    window.request_redraw();
                }

                Event::LoopExiting => app.shutdown(),

                _ => {}
            }
        })
        .map_err(|e| anyhow::anyhow!("event loop failed: {e}"))?;

    Ok(())
}

fn canonical(p: &Path) -> PathBuf {
    p.canonicalize().unwrap_or_else(|_| p.to_path_buf())
}

fn build_patch(cfg: &RackConfig, events: EventTx, events_rx: Receiver<EngineEvent>) -> Patch {
    let library = Arc::new(ShaderLibrary::with_events(events.clone()));

    let mut libraries = Vec::new();
    for dir in &cfg.library_dirs {
        let mut glib = Glib::new(new_module_id(), library.clone()).with_events(events.clone());
        glib.on_add();
        let n = glib.load_dir(dir);
        logi!("INIT", "Glib {} loaded {n} shader pair(s) from {}", glib.id(), dir.display());
        libraries.push(LibraryDir {
            dir: canonical(dir),
            glib,
        });
    }

    let mut glab = Glab::new(new_module_id(), library.clone()).with_events(events.clone());
    let mut glaze = GlazeView::<GlowBackend>::new(new_module_id(), library.clone()).with_events(events.clone());
    let mut canvas = CanvasView::<GlowBackend>::new(new_module_id(), library.clone()).with_events(events.clone());
    let mut glcv = GlcvView::<GlowBackend>::new(new_module_id(), library.clone()).with_events(events.clone());

    restore_session(&cfg.session_path, &events, &mut glab, &mut glaze);

    // Lab files on disk win over the session's lab text.
    if let (Some(v), Some(f)) = (&cfg.lab_vert, &cfg.lab_frag) {
        match (read_to_string_result(v), read_to_string_result(f)) {
            (Ok(vs), Ok(fs)) => {
                glab.edit_vertex(vs);
                glab.edit_fragment(fs);
                logi!("INIT", "lab sources from {} and {}", v.display(), f.display());
            }
            (Err(e), _) | (_, Err(e)) => logw!("INIT", "lab files not loaded: {e}"),
        }
    }

    let subs = &cfg.subscriptions;
    let wanted: Vec<(&str, &str)> = [
        ("canvas", subs.canvas.as_deref()),
        ("glaze", subs.glaze.as_deref()),
        ("glcv", subs.glcv.as_deref()),
    ]
    .into_iter()
    .filter_map(|(m, n)| n.map(|n| (m, n)))
    .collect();

    let available: BTreeSet<String> = library
        .publisher_ids()
        .into_iter()
        .filter_map(|p| library.shaders_for_publisher(p))
        .flatten()
        .map(|pair| pair.name)
        .collect();
    let issues = validate_subscription_names(wanted.iter().copied(), &available);
    emit_issues("VALIDATE", &issues);

    for (module, name) in wanted {
        let Some((publisher, index)) = find_shader(&library, name) else {
            continue;
        };
        let subscriber: &mut dyn ShaderSubscriber = match module {
            "canvas" => &mut canvas,
            "glaze" => &mut glaze,
            _ => &mut glcv,
        };
        select_shader(&library, subscriber, publisher, index);
        logi!("INIT", "{module} follows '{name}'");
    }

    Patch {
        library,
        events_rx,
        libraries,
        glab,
        canvas,
        glaze,
        glcv,
    }
}

fn build_rack(cfg: &RackConfig, patch: &Patch) -> (Rack, Slots) {
    let mut rack = Rack::new(cfg.sample_rate, cfg.block_size);

    let clock = rack.add(Box::new(Clock::new()));
    let glibs = patch
        .libraries
        .iter()
        .map(|l| rack.add(Box::new(l.glib.module())))
        .collect();
    let glab = rack.add(Box::new(patch.glab.module()));
    let canvas = rack.add(Box::new(patch.canvas.module()));
    let glaze = rack.add(Box::new(patch.glaze.module()));
    let glcv = rack.add(Box::new(patch.glcv.module()));

    let gate = (clock, Clock::GATE_OUTPUT);
    rack.connect(gate, (glcv, GlcvModule::CLOCK_INPUT));
    rack.connect(gate, (canvas, CanvasModule::TRIGGER_1_INPUT));
    rack.connect((glcv, 0), (canvas, CanvasModule::AUDIO_1_INPUT));
    rack.connect((glcv, 1), (glaze, GlazeModule::LEFT_INPUT));
    rack.connect((glcv, 2), (glaze, GlazeModule::RIGHT_INPUT));
    rack.connect((glaze, GlazeModule::LEFT_OUTPUT), (canvas, CanvasModule::AUDIO_2_INPUT));
    rack.apply(AudioCommand::SetParam {
        slot: glaze,
        param: GlazeModule::MIX_PARAM,
        value: 50.0,
    });

    (rack, Slots { glibs, glab, glaze })
}

fn restore_session(path: &Path, events: &EventTx, glab: &mut Glab, glaze: &mut GlazeView<GlowBackend>) {
    let session = match load_session(path) {
        Ok(Some(s)) => s,
        Ok(None) => return,
        Err(e) => {
            logw!("SESSION", "{e}");
            events.emit(EngineEvent::ConfigError {
                kind: ConfigKind::Session,
                path: path.to_path_buf(),
                error: e.to_string(),
            });
            return;
        }
    };

    match session.get::<GlabState>("glab") {
        Some(Ok(st)) => glab.restore(st),
        Some(Err(e)) => logw!("SESSION", "glab state ignored: {e}"),
        None => {}
    }
    match session.get::<GlazeState>("glaze") {
        Some(Ok(st)) => glaze.restore(&st),
        Some(Err(e)) => logw!("SESSION", "glaze state ignored: {e}"),
        None => {}
    }
    events.emit(EngineEvent::ConfigLoaded {
        kind: ConfigKind::Session,
        path: path.to_path_buf(),
    });
}

/// First shader called `name`, in publisher order.
fn find_shader(library: &ShaderLibrary, name: &str) -> Option<(ModuleId, i32)> {
    library.publisher_ids().into_iter().find_map(|p| {
        library
            .shaders_for_publisher(p)?
            .iter()
            .position(|pair| pair.name == name)
            .map(|i| (p, i as i32))
    })
}

impl App {
    fn subscriber(&mut self) -> &mut dyn ShaderSubscriber {
        match self.focus {
            Focus::Canvas => &mut self.canvas,
            Focus::Glaze => &mut self.glaze,
            Focus::Glcv => &mut self.glcv,
            Focus::Glab => &mut self.glab,
        }
    }

    /// Returns true when the app should quit.
    fn on_key(&mut self, code: KeyCode) -> bool {
        match code {
            KeyCode::Escape => return true,
            KeyCode::Tab => {
                self.focus = self.focus.next();
                self.cursor = 0;
                self.print_menu();
            }
            KeyCode::ArrowUp => {
                self.cursor = self.cursor.saturating_sub(1);
                self.print_menu();
            }
            KeyCode::ArrowDown => {
                let id = self.subscriber().subscriber_id();
                let n = build_menu(&self.library, id).choices().len();
                self.cursor = (self.cursor + 1).min(n.saturating_sub(1));
                self.print_menu();
            }
            KeyCode::Enter | KeyCode::NumpadEnter => self.select_under_cursor(),
            KeyCode::KeyM => self.print_menu(),
            KeyCode::KeyP => self.audio.send(AudioCommand::Press {
                slot: self.slots.glab,
                param: GlabModule::PUBLISH_PARAM,
            }),
            KeyCode::BracketLeft | KeyCode::BracketRight => {
                let param = if code == KeyCode::BracketLeft {
                    GlibModule::PREV_PARAM
                } else {
                    GlibModule::NEXT_PARAM
                };
                match self.slots.glibs.first() {
                    Some(&slot) => self.audio.send(AudioCommand::Press { slot, param }),
                    None => logw!("KEYS", "no library loaded"),
                }
            }
            KeyCode::KeyG => self.audio.send(AudioCommand::Press {
                slot: self.slots.glaze,
                param: GlazeModule::MODE_PARAM,
            }),
            KeyCode::KeyV => {
                for m in self.audio.snapshot() {
                    let volts: Vec<String> = m.outputs.iter().map(|v| format!("{v:+.2}")).collect();
                    let lit = m.lights.iter().filter(|l| **l > 0.5).count();
                    logi!("METER", "{} {}: [{}] lights {lit}/{}", m.name, m.id, volts.join(", "), m.lights.len());
                }
            }
            KeyCode::KeyS => self.save_session(),
            KeyCode::KeyR => {
                self.audio.send(AudioCommand::Reset);
                logi!("KEYS", "modules reset");
            }
            KeyCode::KeyH => {
                for line in HELP {
                    logi!("KEYS", "{line}");
                }
            }
            _ => {}
        }
        false
    }

    fn print_menu(&mut self) {
        let id = self.subscriber().subscriber_id();
        let menu = build_menu(&self.library, id);
        logi!("MENU", "-- {} --", self.focus.label());
        match &menu {
            ShaderMenu::Empty => {
                for line in menu.lines() {
                    logi!("MENU", "{line}");
                }
            }
            ShaderMenu::Publishers(groups) => {
                let mut row = 0;
                for g in groups {
                    logi!("MENU", "{}", g.label);
                    for e in &g.entries {
                        let cursor = if row == self.cursor { ">" } else { " " };
                        let check = if e.checked { "✔" } else { " " };
                        logi!("MENU", "{cursor} {check} {}", e.name);
                        row += 1;
                    }
                }
            }
        }
    }

    fn select_under_cursor(&mut self) {
        let library = self.library.clone();
        let id = self.subscriber().subscriber_id();
        let choices = build_menu(&library, id).choices();
        let Some((publisher, index, name)) = choices.get(self.cursor).cloned() else {
            logw!("MENU", "nothing to select");
            return;
        };
        let sub = select_shader(&library, self.subscriber(), publisher, index);
        if sub.is_valid {
            logi!("MENU", "{} now follows '{name}'", self.focus.label());
        } else {
            logw!("MENU", "{} follows '{name}', which is not usable", self.focus.label());
        }
    }

    fn handle_hot_events(&mut self) {
        let pending = match &self.hot {
            Some(hot) => hot.drain(),
            None => return,
        };
        for ev in pending {
            match ev {
                HotEvent::LabChanged(path) => self.reload_lab_file(&path),
                HotEvent::PairChanged(vert) => self.reload_pair(&vert),
            }
        }
    }

    fn reload_lab_file(&mut self, path: &Path) {
        let Some((vert, frag)) = &self.lab_files else {
            return;
        };
        let text = match read_to_string_result(path) {
            Ok(t) => t,
            Err(e) => {
                logw!("HOT", "{e}");
                return;
            }
        };
        let path = canonical(path);
        if &path == vert {
            self.glab.edit_vertex(text);
        } else if &path == frag {
            self.glab.edit_fragment(text);
        } else {
            return;
        }
        logi!("HOT", "lab edit from {}", path.display());
    }

    fn reload_pair(&mut self, vert: &Path) {
        if !vert.is_file() {
            return;
        }
        let parent = vert.parent().map(canonical);
        let Some(lib) = self.libraries.iter_mut().find(|l| Some(&l.dir) == parent.as_ref()) else {
            return;
        };

        let fresh = match load_shader_pair(vert) {
            Ok(p) => p,
            Err(e) => {
                logw!("HOT", "{e}");
                return;
            }
        };
        // Editors often write twice per save.
        if let Some(i) = lib.glib.find_by_path(vert) {
            let unchanged = self
                .library
                .shaders_for_publisher(lib.glib.id())
                .and_then(|list| list.get(i).cloned())
                .is_some_and(|p| p.vertex_source == fresh.vertex_source && p.fragment_source == fresh.fragment_source);
            if unchanged {
                return;
            }
        }

        match lib.glib.load_pair(vert) {
            Ok(index) => logi!("HOT", "'{}' reloaded as #{index}", fresh.name),
            Err(e) => logw!("HOT", "{e}"),
        }
    }

    fn drain_events(&self) {
        for ev in self.events_rx.try_iter() {
            log_event(&ev);
        }
    }

    fn render(&mut self, win_w: i32, win_h: i32, swap: impl FnOnce()) {
        self.handle_hot_events();

        for lib in &mut self.libraries {
            lib.glib.validate_pending(&mut self.gpu);
        }
        self.glab.tick(&mut self.gpu);
        self.canvas.tick(&mut self.gpu, self.canvas_size);
        self.glaze.tick(&mut self.gpu);
        self.glcv.tick(&mut self.gpu);

        if let Some(presenter) = &self.presenter {
            let tex = self.canvas.target().map(|(t, w, h)| (t.tex, w, h));
            presenter.present(self.gpu.gl(), tex, win_w, win_h, swap);
        }

        self.drain_events();
    }

    fn title(&self) -> String {
        format!(
            "glrack – menu: {} | glaze: {} | lab: {}",
            self.focus.label(),
            self.glaze.mode().label(),
            self.glab.status()
        )
    }

    fn save_session(&self) {
        let mut session = SessionFile::default();
        let stored = session
            .insert("glab", &self.glab.to_state())
            .and_then(|_| session.insert("glaze", &self.glaze.to_state()));
        if let Err(e) = stored {
            loge!("SESSION", "could not serialize session: {e}");
            return;
        }
        match save_session(&self.session_path, &session) {
            Ok(()) => logi!("SESSION", "saved {}", self.session_path.display()),
            Err(e) => loge!("SESSION", "{e}"),
        }
    }

    fn shutdown(&mut self) {
        self.save_session();
        self.canvas.release(&mut self.gpu);
        self.glaze.release(&mut self.gpu);
        self.glcv.release(&mut self.gpu);
        if let Some(p) = self.presenter.take() {
            p.destroy(&mut self.gpu);
        }
        self.drain_events();
        logi!("EXIT", "bye");
    }
}

fn log_event(ev: &EngineEvent) {
    match ev {
        EngineEvent::ConfigLoaded { kind, path } => logi!("EVENT", "{kind:?} config loaded: {}", path.display()),
        EngineEvent::ConfigError { kind, path, error } => {
            loge!("EVENT", "{kind:?} config error in {}: {error}", path.display())
        }
        EngineEvent::ShaderCompileOk { module, name } => logi!("EVENT", "{module}: '{name}' compiled"),
        EngineEvent::ShaderCompileErr { module, name, log } => {
            logw!("EVENT", "{module}: '{name}' failed: {}", log.lines().next().unwrap_or(""))
        }
        EngineEvent::ProgramReady { module, publisher, index } => {
            logi!("EVENT", "{module}: program ready ({publisher}[{index}])")
        }
        EngineEvent::Published { publisher, index, name } => logi!("EVENT", "published '{name}' as {publisher}[{index}]"),
        EngineEvent::Subscribed { subscriber, publisher, index, valid } => {
            logi!("EVENT", "{subscriber} subscribed to {publisher}[{index}] (valid={valid})")
        }
        EngineEvent::SubscriptionInvalid { subscriber, publisher, index } => {
            logw!("EVENT", "{subscriber}: subscription {publisher}[{index}] is not usable")
        }
    }
}
