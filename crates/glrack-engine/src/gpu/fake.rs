//! Counting stand-in for a GPU, used by unit tests.
//!
//! Compilation follows a toy rule that is close enough to a GLSL front end for
//! the tests: the source needs a `void main`, and a line with an assignment or
//! declaration must end in `;`, `{`, `}` or `,`. Linking fails when either stage
//! mentions `missing_symbol`.

use std::collections::HashMap;

use super::{DrawPass, GpuBackend, ShaderStage};
use crate::error::EngineError;

#[derive(Debug)]
struct FakeShader {
    stage: ShaderStage,
    source: String,
    log: String,
}

#[derive(Debug)]
struct FakeProgram {
    source: String,
    log: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct FakeTarget {
    pub id: u32,
    pub width: i32,
    pub height: i32,
}

#[derive(Debug, Default)]
pub(crate) struct FakeGpu {
    next_id: u32,
    shaders: HashMap<u32, FakeShader>,
    programs: HashMap<u32, FakeProgram>,
    quads: usize,
    targets: usize,
    pub compile_calls: Vec<ShaderStage>,
    pub draws: usize,
    /// Names of the uniforms bound by the last draw.
    pub last_uniforms: Vec<String>,
    /// What `read_pixels` hands back; padded with zeros to the target size.
    pub pixels: Vec<[f32; 4]>,
}

impl FakeGpu {
    pub fn new() -> Self {
        Self::default()
    }

    fn id(&mut self) -> u32 {
        self.next_id += 1;
        self.next_id
    }

    pub fn live_shaders(&self) -> usize {
        self.shaders.len()
    }

    pub fn live_programs(&self) -> usize {
        self.programs.len()
    }

    pub fn live_quads(&self) -> usize {
        self.quads
    }

    pub fn live_targets(&self) -> usize {
        self.targets
    }

    pub fn compiles_of(&self, stage: ShaderStage) -> usize {
        self.compile_calls.iter().filter(|s| **s == stage).count()
    }
}

fn check_source(source: &str) -> Result<(), String> {
    if !source.contains("void main") {
        return Err("0:1: error: no main() function found".to_string());
    }
    for (n, line) in source.lines().enumerate() {
        let t = line.split("//").next().unwrap_or_default().trim();
        if t.is_empty() || t.starts_with('#') {
            continue;
        }
        let statement = t.contains('=')
            || t.starts_with("uniform ")
            || t.starts_with("attribute ")
            || t.starts_with("varying ");
        let terminated = t.ends_with(';') || t.ends_with('{') || t.ends_with('}') || t.ends_with(',');
        if statement && !terminated {
            return Err(format!("0:{}: error: syntax error, expected ';'", n + 1));
        }
    }
    Ok(())
}

impl GpuBackend for FakeGpu {
    type Shader = u32;
    type Program = u32;
    type Location = String;
    type Geometry = u32;
    type Target = FakeTarget;

    fn create_shader(&mut self, stage: ShaderStage) -> Result<u32, EngineError> {
        let id = self.id();
        self.shaders.insert(
            id,
            FakeShader {
                stage,
                source: String::new(),
                log: String::new(),
            },
        );
        Ok(id)
    }

    fn compile_shader(&mut self, shader: &u32, source: &str) -> bool {
        let Some(s) = self.shaders.get_mut(shader) else {
            return false;
        };
        self.compile_calls.push(s.stage);
        s.source = source.to_string();
        match check_source(source) {
            Ok(()) => true,
            Err(log) => {
                s.log = log;
                false
            }
        }
    }

    fn shader_info_log(&mut self, shader: &u32) -> String {
        self.shaders.get(shader).map(|s| s.log.clone()).unwrap_or_default()
    }

    fn delete_shader(&mut self, shader: u32) {
        self.shaders.remove(&shader);
    }

    fn create_program(&mut self) -> Result<u32, EngineError> {
        let id = self.id();
        self.programs.insert(
            id,
            FakeProgram {
                source: String::new(),
                log: String::new(),
            },
        );
        Ok(id)
    }

    fn link_program(&mut self, program: &u32, vs: &u32, fs: &u32) -> bool {
        let joined = [vs, fs]
            .iter()
            .filter_map(|id| self.shaders.get(id).map(|s| s.source.clone()))
            .collect::<Vec<_>>()
            .join("\n");
        let Some(p) = self.programs.get_mut(program) else {
            return false;
        };
        p.source = joined;
        if p.source.contains("missing_symbol") {
            p.log = "error: undefined reference to 'missing_symbol'".to_string();
            return false;
        }
        true
    }

    fn detach_shader(&mut self, _program: &u32, _shader: &u32) {}

    fn program_info_log(&mut self, program: &u32) -> String {
        self.programs.get(program).map(|p| p.log.clone()).unwrap_or_default()
    }

    fn delete_program(&mut self, program: u32) {
        self.programs.remove(&program);
    }

    fn uniform_location(&mut self, program: &u32, name: &str) -> Option<String> {
        let p = self.programs.get(program)?;
        p.source
            .lines()
            .any(|l| l.trim_start().starts_with("uniform") && l.contains(name))
            .then(|| name.to_string())
    }

    fn attrib_location(&mut self, program: &u32, name: &str) -> Option<u32> {
        let p = self.programs.get(program)?;
        p.source
            .lines()
            .filter(|l| l.trim_start().starts_with("attribute"))
            .position(|l| l.contains(name))
            .map(|i| i as u32)
    }

    fn create_quad(&mut self) -> Result<u32, EngineError> {
        self.quads += 1;
        Ok(self.id())
    }

    fn delete_quad(&mut self, _geometry: u32) {
        self.quads -= 1;
    }

    fn create_target(&mut self, width: i32, height: i32) -> Result<FakeTarget, EngineError> {
        self.targets += 1;
        Ok(FakeTarget {
            id: self.id(),
            width,
            height,
        })
    }

    fn resize_target(&mut self, target: &mut FakeTarget, width: i32, height: i32) {
        target.width = width;
        target.height = height;
    }

    fn delete_target(&mut self, _target: FakeTarget) {
        self.targets -= 1;
    }

    fn draw(&mut self, pass: &DrawPass<'_, Self>) {
        self.draws += 1;
        self.last_uniforms = pass.uniforms.iter().map(|(loc, _)| (*loc).clone()).collect();
    }

    fn read_pixels(&mut self, _target: &FakeTarget, width: i32, height: i32) -> Vec<[f32; 4]> {
        let n = (width.max(0) * height.max(0)) as usize;
        let mut out = self.pixels.clone();
        out.resize(n, [0.0; 4]);
        out
    }
}
