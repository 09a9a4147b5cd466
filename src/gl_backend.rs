//! `GpuBackend` over a current glow context.
//!
//! Every call here assumes the context is current on this thread; the render
//! loop owns the backend and is the only caller.

use std::rc::Rc;

use glow::HasContext;

use glrack_engine::gpu::{DrawPass, GpuBackend, ShaderStage, UniformValue, QUAD_INDICES, QUAD_STRIDE, QUAD_VERTICES};
use glrack_engine::EngineError;

const F32_SIZE: i32 = std::mem::size_of::<f32>() as i32;

/// VAO + vertex/index buffers of the shared quad.
#[derive(Debug)]
pub struct GlQuad {
    vao: glow::NativeVertexArray,
    vbo: glow::NativeBuffer,
    ebo: glow::NativeBuffer,
}

impl GlQuad {
    /// Bind the quad and point the given attributes at it.
    pub unsafe fn bind(&self, gl: &glow::Context, position: Option<u32>, texcoord: Option<u32>) {
        let stride = QUAD_STRIDE as i32 * F32_SIZE;
        gl.bind_vertex_array(Some(self.vao));
        gl.bind_buffer(glow::ARRAY_BUFFER, Some(self.vbo));
        gl.bind_buffer(glow::ELEMENT_ARRAY_BUFFER, Some(self.ebo));
        if let Some(pos) = position {
            gl.enable_vertex_attrib_array(pos);
            gl.vertex_attrib_pointer_f32(pos, 3, glow::FLOAT, false, stride, 0);
        }
        if let Some(uv) = texcoord {
            gl.enable_vertex_attrib_array(uv);
            gl.vertex_attrib_pointer_f32(uv, 2, glow::FLOAT, false, stride, 3 * F32_SIZE);
        }
    }

    /// Draw both triangles and unbind. Call after `bind`.
    pub unsafe fn draw(&self, gl: &glow::Context) {
        gl.draw_elements(glow::TRIANGLES, QUAD_INDICES.len() as i32, glow::UNSIGNED_INT, 0);
        gl.bind_vertex_array(None);
        gl.bind_buffer(glow::ARRAY_BUFFER, None);
    }
}

/// Offscreen float color target.
#[derive(Debug)]
pub struct GlTarget {
    pub fbo: glow::NativeFramebuffer,
    pub tex: glow::NativeTexture,
}

pub struct GlowBackend {
    gl: Rc<glow::Context>,
}

impl GlowBackend {
    pub fn new(gl: Rc<glow::Context>) -> Self {
        Self { gl }
    }

    pub fn gl(&self) -> &glow::Context {
        &self.gl
    }
}

unsafe fn alloc_float_texture(gl: &glow::Context, tex: glow::NativeTexture, w: i32, h: i32) {
    gl.bind_texture(glow::TEXTURE_2D, Some(tex));
    gl.tex_image_2d(
        glow::TEXTURE_2D,
        0,
        glow::RGBA32F as i32,
        w,
        h,
        0,
        glow::RGBA,
        glow::FLOAT,
        glow::PixelUnpackData::Slice(None),
    );
    gl.bind_texture(glow::TEXTURE_2D, None);
}

impl GpuBackend for GlowBackend {
    type Shader = glow::NativeShader;
    type Program = glow::NativeProgram;
    type Location = glow::NativeUniformLocation;
    type Geometry = GlQuad;
    type Target = GlTarget;

    fn create_shader(&mut self, stage: ShaderStage) -> Result<Self::Shader, EngineError> {
        let kind = match stage {
            ShaderStage::Vertex => glow::VERTEX_SHADER,
            ShaderStage::Fragment => glow::FRAGMENT_SHADER,
        };
        unsafe { self.gl.create_shader(kind) }.map_err(|e| EngineError::Gpu(format!("create_shader: {e}")))
    }

    fn compile_shader(&mut self, shader: &Self::Shader, source: &str) -> bool {
        unsafe {
            self.gl.shader_source(*shader, source);
            self.gl.compile_shader(*shader);
            self.gl.get_shader_compile_status(*shader)
        }
    }

    fn shader_info_log(&mut self, shader: &Self::Shader) -> String {
        unsafe { self.gl.get_shader_info_log(*shader) }
    }

    fn delete_shader(&mut self, shader: Self::Shader) {
        unsafe { self.gl.delete_shader(shader) }
    }

    fn create_program(&mut self) -> Result<Self::Program, EngineError> {
        unsafe { self.gl.create_program() }.map_err(|e| EngineError::Gpu(format!("create_program: {e}")))
    }

    fn link_program(&mut self, program: &Self::Program, vs: &Self::Shader, fs: &Self::Shader) -> bool {
        unsafe {
            self.gl.attach_shader(*program, *vs);
            self.gl.attach_shader(*program, *fs);
            self.gl.link_program(*program);
            self.gl.get_program_link_status(*program)
        }
    }

    fn detach_shader(&mut self, program: &Self::Program, shader: &Self::Shader) {
        unsafe { self.gl.detach_shader(*program, *shader) }
    }

    fn program_info_log(&mut self, program: &Self::Program) -> String {
        unsafe { self.gl.get_program_info_log(*program) }
    }

    fn delete_program(&mut self, program: Self::Program) {
        unsafe { self.gl.delete_program(program) }
    }

    fn uniform_location(&mut self, program: &Self::Program, name: &str) -> Option<Self::Location> {
        unsafe { self.gl.get_uniform_location(*program, name) }
    }

    fn attrib_location(&mut self, program: &Self::Program, name: &str) -> Option<u32> {
        unsafe { self.gl.get_attrib_location(*program, name) }
    }

    fn create_quad(&mut self) -> Result<Self::Geometry, EngineError> {
        let gl = &self.gl;
        unsafe {
            let vao = gl
                .create_vertex_array()
                .map_err(|e| EngineError::Gpu(format!("create_vertex_array: {e}")))?;
            let vbo = gl
                .create_buffer()
                .map_err(|e| EngineError::Gpu(format!("create_buffer: {e}")))?;
            let ebo = gl
                .create_buffer()
                .map_err(|e| EngineError::Gpu(format!("create_buffer: {e}")))?;

            gl.bind_vertex_array(Some(vao));
            gl.bind_buffer(glow::ARRAY_BUFFER, Some(vbo));
            gl.buffer_data_u8_slice(glow::ARRAY_BUFFER, bytemuck::cast_slice(&QUAD_VERTICES[..]), glow::STATIC_DRAW);
            gl.bind_buffer(glow::ELEMENT_ARRAY_BUFFER, Some(ebo));
            gl.buffer_data_u8_slice(
                glow::ELEMENT_ARRAY_BUFFER,
                bytemuck::cast_slice(&QUAD_INDICES[..]),
                glow::STATIC_DRAW,
            );
            gl.bind_vertex_array(None);
            gl.bind_buffer(glow::ARRAY_BUFFER, None);
            gl.bind_buffer(glow::ELEMENT_ARRAY_BUFFER, None);

            Ok(GlQuad { vao, vbo, ebo })
        }
    }

    fn delete_quad(&mut self, geometry: Self::Geometry) {
        unsafe {
            self.gl.delete_vertex_array(geometry.vao);
            self.gl.delete_buffer(geometry.vbo);
            self.gl.delete_buffer(geometry.ebo);
        }
    }

    fn create_target(&mut self, width: i32, height: i32) -> Result<Self::Target, EngineError> {
        let gl = &self.gl;
        unsafe {
            let tex = gl
                .create_texture()
                .map_err(|e| EngineError::Gpu(format!("create_texture: {e}")))?;
            gl.bind_texture(glow::TEXTURE_2D, Some(tex));
            gl.tex_parameter_i32(glow::TEXTURE_2D, glow::TEXTURE_MIN_FILTER, glow::NEAREST as i32);
            gl.tex_parameter_i32(glow::TEXTURE_2D, glow::TEXTURE_MAG_FILTER, glow::LINEAR as i32);
            gl.tex_parameter_i32(glow::TEXTURE_2D, glow::TEXTURE_WRAP_S, glow::CLAMP_TO_EDGE as i32);
            gl.tex_parameter_i32(glow::TEXTURE_2D, glow::TEXTURE_WRAP_T, glow::CLAMP_TO_EDGE as i32);
            gl.bind_texture(glow::TEXTURE_2D, None);
            alloc_float_texture(gl, tex, width, height);

            let fbo = match gl.create_framebuffer() {
                Ok(f) => f,
                Err(e) => {
                    gl.delete_texture(tex);
                    return Err(EngineError::Gpu(format!("create_framebuffer: {e}")));
                }
            };
            gl.bind_framebuffer(glow::FRAMEBUFFER, Some(fbo));
            gl.framebuffer_texture_2d(glow::FRAMEBUFFER, glow::COLOR_ATTACHMENT0, glow::TEXTURE_2D, Some(tex), 0);
            let status = gl.check_framebuffer_status(glow::FRAMEBUFFER);
            gl.bind_framebuffer(glow::FRAMEBUFFER, None);

            if status != glow::FRAMEBUFFER_COMPLETE {
                gl.delete_framebuffer(fbo);
                gl.delete_texture(tex);
                return Err(EngineError::Gpu(format!("framebuffer incomplete: 0x{status:x}")));
            }
            Ok(GlTarget { fbo, tex })
        }
    }

    fn resize_target(&mut self, target: &mut Self::Target, width: i32, height: i32) {
        unsafe { alloc_float_texture(&self.gl, target.tex, width, height) }
    }

    fn delete_target(&mut self, target: Self::Target) {
        unsafe {
            self.gl.delete_framebuffer(target.fbo);
            self.gl.delete_texture(target.tex);
        }
    }

    fn draw(&mut self, pass: &DrawPass<'_, Self>) {
        let gl = &self.gl;
        unsafe {
            gl.bind_framebuffer(glow::FRAMEBUFFER, Some(pass.target.fbo));
            gl.viewport(0, 0, pass.width, pass.height);
            gl.clear_color(0.0, 0.0, 0.0, 0.0);
            gl.clear(glow::COLOR_BUFFER_BIT);

            if pass.blend {
                gl.enable(glow::BLEND);
                gl.blend_func(glow::SRC_ALPHA, glow::ONE_MINUS_SRC_ALPHA);
            } else {
                gl.disable(glow::BLEND);
            }

            gl.use_program(Some(*pass.program));
            for (loc, value) in pass.uniforms {
                let loc = Some(*loc);
                match *value {
                    UniformValue::Float(v) => gl.uniform_1_f32(loc, v),
                    UniformValue::Int(v) => gl.uniform_1_i32(loc, v),
                    UniformValue::Vec2(x, y) => gl.uniform_2_f32(loc, x, y),
                    UniformValue::Floats(values) => gl.uniform_1_f32_slice(loc, values),
                    UniformValue::Mat4(m) => gl.uniform_matrix_4_f32_slice(loc, false, m),
                }
            }

            pass.geometry.bind(gl, pass.position_attrib, pass.texcoord_attrib);
            pass.geometry.draw(gl);

            gl.use_program(None);
            gl.disable(glow::BLEND);
            gl.bind_framebuffer(glow::FRAMEBUFFER, None);
        }
    }

    fn read_pixels(&mut self, target: &Self::Target, width: i32, height: i32) -> Vec<[f32; 4]> {
        let mut pixels = vec![[0.0f32; 4]; (width.max(0) * height.max(0)) as usize];
        unsafe {
            self.gl.bind_framebuffer(glow::FRAMEBUFFER, Some(target.fbo));
            self.gl.read_pixels(
                0,
                0,
                width,
                height,
                glow::RGBA,
                glow::FLOAT,
                glow::PixelPackData::Slice(Some(bytemuck::cast_slice_mut(pixels.as_mut_slice()))),
            );
            self.gl.bind_framebuffer(glow::FRAMEBUFFER, None);
        }
        pixels
    }
}
