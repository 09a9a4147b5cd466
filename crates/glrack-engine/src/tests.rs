//! Cross-module scenarios: publishers, subscribers and evaluators sharing one
//! library the way the host wires them.

use std::sync::Arc;

use crate::config::GlabState;
use crate::evaluator::TickOutcome;
use crate::gpu::fake::FakeGpu;
use crate::gpu::ShaderStage;
use crate::library::{ShaderLibrary, ShaderPair};
use crate::menu::{build_menu, select_shader, ShaderMenu};
use crate::modules::glab::{DEFAULT_FRAGMENT_SOURCE, DEFAULT_VERTEX_SOURCE};
use crate::modules::{CanvasView, Glab, GlcvView};
use crate::rack::{Module, Ports, ProcessArgs};

const VERT_A: &str = "attribute vec3 vs_Pos;\nvoid main() {\n    gl_Position = vec4(vs_Pos, 1.0);\n}\n";
const FRAG_A: &str = "uniform float u_Time;\nvoid main() {\n    gl_FragColor = vec4(u_Time);\n}\n";
const MISSING_SEMICOLON: &str = "void main() {\n    gl_FragColor = vec4(1.0)\n}\n";

#[test]
fn publish_subscribe_rebuild_then_edits_stay_local() {
    let lib = Arc::new(ShaderLibrary::new());
    let mut gpu = FakeGpu::new();

    let mut lab = Glab::new(10, lib.clone());
    lab.tick(&mut gpu);
    let published = lab.publish().expect("defaults are valid");
    assert_eq!((published.publisher_id, published.shader_index), (10, 0));

    let mut canvas = CanvasView::<FakeGpu>::new(20, lib.clone());
    canvas.tick(&mut gpu, (64, 64));
    select_shader(&lib, &mut canvas, 10, 0);
    assert_eq!(canvas.tick(&mut gpu, (64, 64)), TickOutcome::Drawn);
    assert!(canvas.link().is_ready());

    // A broken edit in the lab never reaches the canvas.
    lab.edit_fragment(MISSING_SEMICOLON);
    lab.tick(&mut gpu);
    assert!(!lab.is_valid(ShaderStage::Fragment));
    assert!(!lab.stage_log(ShaderStage::Fragment).is_empty());
    assert!(lab.publish().is_none());

    let compiles = gpu.compile_calls.len();
    assert_eq!(canvas.tick(&mut gpu, (64, 64)), TickOutcome::Drawn);
    assert_eq!(gpu.compile_calls.len(), compiles);
    let live = lib.shader_for_module(20).expect("still subscribed");
    assert_eq!(live.vertex_source, DEFAULT_VERTEX_SOURCE);
    assert_eq!(live.fragment_source, DEFAULT_FRAGMENT_SOURCE);
}

#[test]
fn named_shader_resolves_through_the_menu() {
    let lib = Arc::new(ShaderLibrary::new());
    let mut canvas = CanvasView::<FakeGpu>::new(20, lib.clone());
    assert_eq!(build_menu(&lib, 20), ShaderMenu::Empty);

    lib.register_publisher(1);
    lib.add_shader(1, ShaderPair::new("A", VERT_A, FRAG_A)).unwrap();
    lib.add_shader(1, ShaderPair::new("B", VERT_A, MISSING_SEMICOLON)).unwrap();

    let menu = build_menu(&lib, 20);
    let (publisher, index, _) = menu
        .choices()
        .into_iter()
        .find(|(_, _, name)| name == "A")
        .expect("A is listed");
    let sub = select_shader(&lib, &mut canvas, publisher, index);
    assert!(sub.is_valid);
    assert_eq!(lib.shader_for_module(20).map(|p| p.name), Some("A".to_string()));

    let lines = build_menu(&lib, 20).lines();
    assert_eq!(lines[0], "Glib 1 (2 shaders)");
    assert!(lines[1].contains('✔') && lines[1].ends_with('A'));

    let mut gpu = FakeGpu::new();
    canvas.tick(&mut gpu, (32, 32));
    assert_eq!(canvas.tick(&mut gpu, (32, 32)), TickOutcome::Drawn);
    assert_eq!(gpu.live_shaders(), 0);
}

#[test]
fn subscription_to_unknown_publisher_is_stored_invalid_and_silent() {
    let lib = Arc::new(ShaderLibrary::new());
    let mut cv = GlcvView::<FakeGpu>::new(30, lib.clone());
    let mut audio = cv.module();
    let mut ports = Ports::new(audio.layout());

    let sub = select_shader(&lib, &mut cv, 999, 0);
    assert!(!sub.is_valid);
    assert_eq!(lib.subscription(30), Some(sub));
    assert!(lib.shader_for_module(30).is_none());

    let mut gpu = FakeGpu::new();
    assert_eq!(cv.tick(&mut gpu), TickOutcome::Claimed);
    assert_eq!(cv.tick(&mut gpu), TickOutcome::NoProgram);
    assert_eq!(gpu.live_programs(), 0);

    for frame in 0..64 {
        audio.process(&ProcessArgs::new(48_000.0, frame), &mut ports);
    }
    assert_eq!(ports.outputs, vec![0.0; 4]);
}

#[test]
fn restored_lab_text_is_identical_and_compiles_once_per_stage() {
    let lib = Arc::new(ShaderLibrary::new());
    let mut gpu = FakeGpu::new();

    let mut lab = Glab::new(10, lib.clone());
    lab.edit_vertex("// custom\n".to_string() + VERT_A);
    lab.edit_fragment(FRAG_A);
    let saved = serde_json::to_string(&lab.to_state()).unwrap();

    let mut restored = Glab::new(11, lib);
    restored.tick(&mut gpu);
    let before_v = gpu.compiles_of(ShaderStage::Vertex);
    let before_f = gpu.compiles_of(ShaderStage::Fragment);

    let state: GlabState = serde_json::from_str(&saved).unwrap();
    restored.restore(state);
    assert_eq!(restored.vertex_source(), lab.vertex_source());
    assert_eq!(restored.fragment_source(), FRAG_A);

    restored.tick(&mut gpu);
    restored.tick(&mut gpu);
    assert_eq!(gpu.compiles_of(ShaderStage::Vertex), before_v + 1);
    assert_eq!(gpu.compiles_of(ShaderStage::Fragment), before_f + 1);
    assert!(restored.is_valid(ShaderStage::Vertex));
    assert!(restored.is_valid(ShaderStage::Fragment));
    assert_eq!(serde_json::to_string(&restored.to_state()).unwrap(), saved);
}
