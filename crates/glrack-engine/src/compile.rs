//! Shader compiler and linker.
//!
//! Every consumer (trial compiles in the authoring unit, library validation,
//! evaluator rebuilds) goes through these functions. Stage objects never
//! outlive the call that created them.

use crate::error::EngineError;
use crate::gpu::{GpuBackend, ShaderStage};

/// Diagnostics are cut to this many bytes.
pub const INFO_LOG_LIMIT: usize = 512;

/// Trim a driver log to `INFO_LOG_LIMIT` bytes on a char boundary.
/// Empty logs are replaced with `fallback` so a failure is never silent.
pub fn bounded_log(raw: &str, fallback: &str) -> String {
    let log = raw.trim_matches(|c: char| c == '\0' || c.is_whitespace());
    if log.is_empty() {
        return fallback.to_string();
    }
    if log.len() <= INFO_LOG_LIMIT {
        return log.to_string();
    }
    let mut end = INFO_LOG_LIMIT;
    while !log.is_char_boundary(end) {
        end -= 1;
    }
    log[..end].to_string()
}

pub fn compile_stage<B: GpuBackend>(
    gpu: &mut B,
    source: &str,
    stage: ShaderStage,
) -> Result<B::Shader, EngineError> {
    let shader = gpu.create_shader(stage)?;
    if gpu.compile_shader(&shader, source) {
        return Ok(shader);
    }
    let log = bounded_log(&gpu.shader_info_log(&shader), "compile failed without a diagnostic");
    gpu.delete_shader(shader);
    Err(EngineError::Compile { stage, log })
}

/// Link two compiled stages. Both stage objects are consumed whatever happens.
pub fn link_program<B: GpuBackend>(
    gpu: &mut B,
    vs: B::Shader,
    fs: B::Shader,
) -> Result<B::Program, EngineError> {
    let program = match gpu.create_program() {
        Ok(p) => p,
        Err(e) => {
            gpu.delete_shader(vs);
            gpu.delete_shader(fs);
            return Err(e);
        }
    };

    let linked = gpu.link_program(&program, &vs, &fs);
    gpu.detach_shader(&program, &vs);
    gpu.detach_shader(&program, &fs);
    gpu.delete_shader(vs);
    gpu.delete_shader(fs);

    if linked {
        Ok(program)
    } else {
        let log = bounded_log(&gpu.program_info_log(&program), "link failed without a diagnostic");
        gpu.delete_program(program);
        Err(EngineError::Link { log })
    }
}

pub fn build_program<B: GpuBackend>(
    gpu: &mut B,
    vertex_source: &str,
    fragment_source: &str,
) -> Result<B::Program, EngineError> {
    let vs = compile_stage(gpu, vertex_source, ShaderStage::Vertex)?;
    let fs = match compile_stage(gpu, fragment_source, ShaderStage::Fragment) {
        Ok(fs) => fs,
        Err(e) => {
            gpu.delete_shader(vs);
            return Err(e);
        }
    };
    link_program(gpu, vs, fs)
}

/// Compile one stage in isolation and throw the object away.
pub fn trial_compile<B: GpuBackend>(gpu: &mut B, source: &str, stage: ShaderStage) -> Result<(), EngineError> {
    let shader = compile_stage(gpu, source, stage)?;
    gpu.delete_shader(shader);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::fake::FakeGpu;

    const VERT: &str = "attribute vec3 vs_Pos;\nvoid main() {\n    gl_Position = vec4(vs_Pos, 1.0);\n}\n";
    const FRAG: &str = "void main() {\n    gl_FragColor = vec4(1.0);\n}\n";
    const FRAG_NO_SEMI: &str = "void main() {\n    gl_FragColor = vec4(1.0)\n}\n";

    #[test]
    fn build_program_leaves_no_stage_objects() {
        let mut gpu = FakeGpu::new();
        let program = build_program(&mut gpu, VERT, FRAG).unwrap();
        assert_eq!(gpu.live_shaders(), 0);
        assert_eq!(gpu.live_programs(), 1);
        gpu.delete_program(program);
        assert_eq!(gpu.live_programs(), 0);
    }

    #[test]
    fn fragment_failure_reports_log_and_cleans_up() {
        let mut gpu = FakeGpu::new();
        let err = build_program(&mut gpu, VERT, FRAG_NO_SEMI).unwrap_err();
        match &err {
            EngineError::Compile { stage, log } => {
                assert_eq!(*stage, ShaderStage::Fragment);
                assert!(!log.is_empty());
            }
            other => panic!("unexpected error {other:?}"),
        }
        assert_eq!(gpu.live_shaders(), 0);
        assert_eq!(gpu.live_programs(), 0);
    }

    #[test]
    fn link_failure_deletes_program_and_stages() {
        let mut gpu = FakeGpu::new();
        let frag = "uniform float missing_symbol;\nvoid main() {\n    gl_FragColor = vec4(missing_symbol);\n}\n";
        let err = build_program(&mut gpu, VERT, frag).unwrap_err();
        assert!(matches!(err, EngineError::Link { .. }));
        assert!(err.diagnostic().unwrap().contains("missing_symbol"));
        assert_eq!(gpu.live_shaders(), 0);
        assert_eq!(gpu.live_programs(), 0);
    }

    #[test]
    fn trial_compile_is_transient() {
        let mut gpu = FakeGpu::new();
        trial_compile(&mut gpu, FRAG, ShaderStage::Fragment).unwrap();
        assert!(trial_compile(&mut gpu, FRAG_NO_SEMI, ShaderStage::Fragment).is_err());
        assert_eq!(gpu.live_shaders(), 0);
        assert_eq!(gpu.compiles_of(ShaderStage::Fragment), 2);
    }

    #[test]
    fn bounded_log_respects_limit_and_char_boundaries() {
        assert_eq!(bounded_log("", "fallback"), "fallback");
        assert_eq!(bounded_log("  \0", "fallback"), "fallback");
        assert_eq!(bounded_log("0:2: error\n", "x"), "0:2: error");

        let long = "é".repeat(400); // 800 bytes
        let cut = bounded_log(&long, "x");
        assert!(cut.len() <= INFO_LOG_LIMIT);
        assert!(cut.len() >= INFO_LOG_LIMIT - 1);
        assert!(cut.chars().all(|c| c == 'é'));
    }
}
