//! The seam between the engine and a concrete graphics API.
//!
//! Everything that touches GPU objects goes through `GpuBackend`, so the
//! compiler and evaluators can be driven by the host's OpenGL context or by a
//! counting fake in tests. Implementations are only ever used from the render
//! thread.

use std::fmt;

use crate::error::EngineError;

#[cfg(test)]
pub(crate) mod fake;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ShaderStage {
    Vertex,
    Fragment,
}

impl fmt::Display for ShaderStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ShaderStage::Vertex => f.write_str("Vertex"),
            ShaderStage::Fragment => f.write_str("Fragment"),
        }
    }
}

/// Full-viewport quad: xyz position followed by uv, two triangles.
pub const QUAD_VERTICES: [f32; 20] = [
    -1.0, 1.0, 0.0, 0.0, 1.0, //
    1.0, 1.0, 0.0, 1.0, 1.0, //
    -1.0, -1.0, 0.0, 0.0, 0.0, //
    1.0, -1.0, 0.0, 1.0, 0.0,
];
pub const QUAD_INDICES: [u32; 6] = [0, 1, 2, 1, 3, 2];
/// Floats per quad vertex.
pub const QUAD_STRIDE: usize = 5;

/// Attribute names every evaluator looks up after linking.
pub const POSITION_ATTRIB: &str = "vs_Pos";
pub const TEXCOORD_ATTRIB: &str = "vs_TexCoord";

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum UniformValue<'a> {
    Float(f32),
    Int(i32),
    Vec2(f32, f32),
    /// `uniform float name[N]`
    Floats(&'a [f32]),
    /// Column-major 4x4 matrix.
    Mat4(&'a [f32; 16]),
}

/// One draw of the quad into an offscreen target.
pub struct DrawPass<'a, B: GpuBackend + ?Sized> {
    pub program: &'a B::Program,
    pub geometry: &'a B::Geometry,
    pub target: &'a B::Target,
    pub width: i32,
    pub height: i32,
    pub position_attrib: Option<u32>,
    pub texcoord_attrib: Option<u32>,
    /// Only uniforms whose location resolved are passed in.
    pub uniforms: &'a [(&'a B::Location, UniformValue<'a>)],
    /// Alpha blending for visual shaders; readback passes draw opaque.
    pub blend: bool,
}

pub trait GpuBackend {
    type Shader;
    type Program;
    type Location;
    type Geometry;
    type Target;

    fn create_shader(&mut self, stage: ShaderStage) -> Result<Self::Shader, EngineError>;
    /// Upload `source` and compile. Returns the compile status.
    fn compile_shader(&mut self, shader: &Self::Shader, source: &str) -> bool;
    fn shader_info_log(&mut self, shader: &Self::Shader) -> String;
    fn delete_shader(&mut self, shader: Self::Shader);

    fn create_program(&mut self) -> Result<Self::Program, EngineError>;
    /// Attach both stages and link. Returns the link status.
    fn link_program(&mut self, program: &Self::Program, vs: &Self::Shader, fs: &Self::Shader) -> bool;
    fn detach_shader(&mut self, program: &Self::Program, shader: &Self::Shader);
    fn program_info_log(&mut self, program: &Self::Program) -> String;
    fn delete_program(&mut self, program: Self::Program);

    fn uniform_location(&mut self, program: &Self::Program, name: &str) -> Option<Self::Location>;
    fn attrib_location(&mut self, program: &Self::Program, name: &str) -> Option<u32>;

    /// Upload `QUAD_VERTICES` and `QUAD_INDICES`.
    fn create_quad(&mut self) -> Result<Self::Geometry, EngineError>;
    fn delete_quad(&mut self, geometry: Self::Geometry);

    /// Offscreen RGBA float color target.
    fn create_target(&mut self, width: i32, height: i32) -> Result<Self::Target, EngineError>;
    fn resize_target(&mut self, target: &mut Self::Target, width: i32, height: i32);
    fn delete_target(&mut self, target: Self::Target);

    fn draw(&mut self, pass: &DrawPass<'_, Self>);
    /// Row-major RGBA floats of the whole target.
    fn read_pixels(&mut self, target: &Self::Target, width: i32, height: i32) -> Vec<[f32; 4]>;
}
