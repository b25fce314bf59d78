use shaderlib::{Stage, StageSources};
use wgpu::naga;
use wgpu::naga::front::glsl;
use wgpu::naga::valid::{Capabilities, ValidationFlags, Validator};

/// GLSL version every stage is compiled as. Sources carry no `#version`
/// line of their own; the library fragments in front of them would push it
/// off the first line.
pub const VERSION_HEADER: &str = "#version 450";

#[derive(Debug, thiserror::Error)]
pub enum CompileError {
    #[error("{stage} stage failed to parse:\n{message}")]
    Parse { stage: Stage, message: String },
    #[error("{stage} stage failed validation:\n{message}")]
    Validation { stage: Stage, message: String },
    #[error("{0} stages are not supported by the naga backend")]
    UnsupportedStage(Stage),
}

/// Per-thread compiler state. The glsl frontend and validator keep scratch
/// allocations between runs, so each worker owns its own pair.
pub struct NagaContext {
    frontend: glsl::Frontend,
    validator: Validator,
    active: bool,
    compiled: u64,
}

impl NagaContext {
    pub fn new() -> Self {
        Self {
            frontend: glsl::Frontend::default(),
            validator: Validator::new(ValidationFlags::all(), Capabilities::all()),
            active: false,
            compiled: 0,
        }
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub(crate) fn set_active(&mut self, active: bool) {
        self.active = active;
    }

    /// Stages compiled successfully with this context.
    pub fn compiled(&self) -> u64 {
        self.compiled
    }

    /// Parses and validates every stage of `sources`, stopping at the first
    /// stage that fails.
    pub fn compile_program(
        &mut self,
        header: &str,
        sources: &StageSources,
    ) -> Result<Vec<naga::Module>, CompileError> {
        let mut modules = Vec::new();
        for (stage, source) in sources.iter() {
            modules.push(self.compile_stage(header, stage, source, sources)?);
        }
        Ok(modules)
    }

    fn compile_stage(
        &mut self,
        header: &str,
        stage: Stage,
        source: &str,
        sources: &StageSources,
    ) -> Result<naga::Module, CompileError> {
        let naga_stage = naga_stage(stage).ok_or(CompileError::UnsupportedStage(stage))?;
        let mut options = glsl::Options::from(naga_stage);
        for (name, value) in sources.defines() {
            options.defines.insert(name.clone(), value.clone());
        }

        let wrapped = wrap_stage_source(header, source);
        let module = self
            .frontend
            .parse(&options, &wrapped)
            .map_err(|err| CompileError::Parse {
                stage,
                message: err.to_string(),
            })?;
        self.validator
            .validate(&module)
            .map_err(|err| CompileError::Validation {
                stage,
                message: err.to_string(),
            })?;
        self.compiled += 1;
        Ok(module)
    }
}

impl Default for NagaContext {
    fn default() -> Self {
        Self::new()
    }
}

fn naga_stage(stage: Stage) -> Option<naga::ShaderStage> {
    match stage {
        Stage::Vertex => Some(naga::ShaderStage::Vertex),
        Stage::Fragment => Some(naga::ShaderStage::Fragment),
        Stage::Compute => Some(naga::ShaderStage::Compute),
        Stage::Geometry => None,
    }
}

/// Produces a self-contained GLSL stage from resolved program text.
///
/// Any `#version` directive is stripped so that [`VERSION_HEADER`] can be
/// placed on the first line, and `#line 1` keeps diagnostics pointing at the
/// resolved source rather than the header.
pub fn wrap_stage_source(header: &str, source: &str) -> String {
    let mut wrapped = String::with_capacity(header.len() + source.len() + 16);
    wrapped.push_str(header);
    wrapped.push_str("\n#line 1\n");
    for line in source.lines() {
        if line.trim_start().starts_with("#version") {
            continue;
        }
        wrapped.push_str(line);
        wrapped.push('\n');
    }
    wrapped
}

#[cfg(test)]
mod tests {
    use super::*;

    const FRAGMENT: &str = r"layout(location = 0) in vec2 v_uv;
layout(location = 0) out vec4 outColor;

void main() {
    outColor = vec4(v_uv, 0.0, 1.0);
}
";

    #[test]
    fn wrap_moves_version_to_first_line() {
        let wrapped = wrap_stage_source(VERSION_HEADER, "float f;\n#version 330\nvoid main() {}\n");
        let lines: Vec<_> = wrapped.lines().collect();
        assert_eq!(lines, vec!["#version 450", "#line 1", "float f;", "void main() {}"]);
    }

    #[test]
    fn compiles_fullscreen_program() {
        let mut context = NagaContext::new();
        let modules = context
            .compile_program(VERSION_HEADER, &StageSources::fullscreen(FRAGMENT))
            .unwrap();
        assert_eq!(modules.len(), 2);
        assert_eq!(context.compiled(), 2);
    }

    #[test]
    fn defines_reach_the_preprocessor() {
        let fragment = r"layout(location = 0) out vec4 outColor;
void main() {
    outColor = vec4(TINT, 1.0);
}
";
        let sources = StageSources::new()
            .with_stage(Stage::Fragment, fragment)
            .with_define("TINT", "vec3(1.0, 0.5, 0.0)");
        let mut context = NagaContext::new();
        assert!(context.compile_program(VERSION_HEADER, &sources).is_ok());
    }

    #[test]
    fn reports_parse_errors_per_stage() {
        let sources = StageSources::fullscreen("void main() { undefined_call(); }\n");
        let err = NagaContext::new()
            .compile_program(VERSION_HEADER, &sources)
            .unwrap_err();
        assert!(matches!(err, CompileError::Parse { stage: Stage::Fragment, .. }));
    }

    #[test]
    fn geometry_stage_is_rejected() {
        let sources = StageSources::new().with_stage(Stage::Geometry, "void main() {}\n");
        let err = NagaContext::new()
            .compile_program(VERSION_HEADER, &sources)
            .unwrap_err();
        assert!(matches!(err, CompileError::UnsupportedStage(Stage::Geometry)));
    }
}
