use glow::HasContext;

use glrack_engine::compile::build_program;
use glrack_engine::gpu::{GpuBackend, POSITION_ATTRIB, TEXCOORD_ATTRIB};
use glrack_engine::EngineError;

use crate::gl_backend::{GlQuad, GlowBackend};

/// Presentation-only preview renderer.
///
/// The canvas always renders into its own offscreen float target. The window
/// simply *presents* that texture, letterboxed to keep the canvas aspect.
const PRESENT_VERT: &str = "#version 120
attribute vec3 vs_Pos;
attribute vec2 vs_TexCoord;
varying vec2 v_uv;
uniform vec2 u_scale;
void main() {
    v_uv = vs_TexCoord;
    gl_Position = vec4(vs_Pos.xy * u_scale, 0.0, 1.0);
}
";

const PRESENT_FRAG: &str = "#version 120
uniform sampler2D u_tex;
varying vec2 v_uv;
void main() {
    gl_FragColor = vec4(texture2D(u_tex, v_uv).rgb, 1.0);
}
";

pub struct WindowPresenter {
    program: glow::NativeProgram,
    quad: GlQuad,
    position: Option<u32>,
    texcoord: Option<u32>,
    u_tex: Option<glow::NativeUniformLocation>,
    u_scale: Option<glow::NativeUniformLocation>,
}

impl WindowPresenter {
    pub fn new(gpu: &mut GlowBackend) -> Result<Self, EngineError> {
        let program = build_program(gpu, PRESENT_VERT, PRESENT_FRAG)?;
        let quad = match gpu.create_quad() {
            Ok(q) => q,
            Err(e) => {
                gpu.delete_program(program);
                return Err(e);
            }
        };
        Ok(Self {
            position: gpu.attrib_location(&program, POSITION_ATTRIB),
            texcoord: gpu.attrib_location(&program, TEXCOORD_ATTRIB),
            u_tex: gpu.uniform_location(&program, "u_tex"),
            u_scale: gpu.uniform_location(&program, "u_scale"),
            program,
            quad,
        })
    }

    /// Present `tex` (or a blank frame when there is none) and swap.
    ///
    /// `swap_fn` is injected so this module doesn't need to know glutin surface types.
    pub fn present(
        &self,
        gl: &glow::Context,
        tex: Option<(glow::NativeTexture, i32, i32)>,
        win_w: i32,
        win_h: i32,
        swap_fn: impl FnOnce(),
    ) {
        unsafe {
            gl.bind_framebuffer(glow::FRAMEBUFFER, None);
            gl.viewport(0, 0, win_w, win_h);
            gl.clear_color(0.02, 0.02, 0.02, 1.0);
            gl.clear(glow::COLOR_BUFFER_BIT);

            if let Some((tex, src_w, src_h)) = tex {
                let (sx, sy) = letterbox(src_w, src_h, win_w, win_h);

                gl.use_program(Some(self.program));
                gl.uniform_1_i32(self.u_tex.as_ref(), 0);
                gl.uniform_2_f32(self.u_scale.as_ref(), sx, sy);
                gl.active_texture(glow::TEXTURE0);
                gl.bind_texture(glow::TEXTURE_2D, Some(tex));

                self.quad.bind(gl, self.position, self.texcoord);
                self.quad.draw(gl);

                gl.bind_texture(glow::TEXTURE_2D, None);
                gl.use_program(None);
            }
        }

        swap_fn();
    }

    pub fn destroy(self, gpu: &mut GlowBackend) {
        gpu.delete_program(self.program);
        gpu.delete_quad(self.quad);
    }
}

/// Clip-space scale that fits a `src` image inside a `win` viewport.
fn letterbox(src_w: i32, src_h: i32, win_w: i32, win_h: i32) -> (f32, f32) {
    if src_w <= 0 || src_h <= 0 || win_w <= 0 || win_h <= 0 {
        return (1.0, 1.0);
    }
    let src_aspect = src_w as f32 / src_h as f32;
    let win_aspect = win_w as f32 / win_h as f32;
    if src_aspect > win_aspect {
        (1.0, win_aspect / src_aspect)
    } else {
        (src_aspect / win_aspect, 1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::letterbox;

    #[test]
    fn letterbox_keeps_aspect() {
        assert_eq!(letterbox(100, 100, 200, 100), (0.5, 1.0));
        assert_eq!(letterbox(200, 100, 100, 100), (1.0, 0.5));
        assert_eq!(letterbox(0, 100, 100, 100), (1.0, 1.0));
    }
}
