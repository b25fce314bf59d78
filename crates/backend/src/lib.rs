//! [`scheduler::Backend`] that compiles GLSL programs with naga.
//!
//! Compiling here means parsing and validating every stage into a naga
//! module. No device is involved, so worker contexts are cheap and never
//! need the main context.

mod compile;

use scheduler::{Backend, ContextError, MainContext, Program, ProgramStatus};
use shaderlib::StageSources;

pub use compile::{wrap_stage_source, CompileError, NagaContext, VERSION_HEADER};

#[derive(Debug, Clone)]
pub struct NagaBackend {
    header: String,
}

impl NagaBackend {
    pub fn new() -> Self {
        Self {
            header: VERSION_HEADER.to_owned(),
        }
    }

    /// Uses `header` instead of [`VERSION_HEADER`] as the first line of every stage.
    pub fn with_header(header: impl Into<String>) -> Self {
        Self {
            header: header.into(),
        }
    }

    pub fn header(&self) -> &str {
        &self.header
    }

    /// Context for compiles on the caller thread.
    pub fn main_context(&self) -> MainContext<NagaContext> {
        MainContext::new(NagaContext::new())
    }
}

impl Default for NagaBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl Backend for NagaBackend {
    type Source = StageSources;
    type Context = NagaContext;

    fn create_context(&self) -> Result<NagaContext, ContextError> {
        Ok(NagaContext::new())
    }

    fn activate(&self, context: &mut NagaContext) {
        context.set_active(true);
    }

    fn deactivate(&self, context: &mut NagaContext) {
        context.set_active(false);
    }

    fn destroy_context(&self, context: NagaContext) {
        tracing::trace!(compiled = context.compiled(), "dropping naga context");
    }

    fn compile(&self, context: &mut NagaContext, program: &Program<StageSources>) -> ProgramStatus {
        if !context.is_active() {
            tracing::warn!(program = %program.name(), "compiling on an inactive context");
        }
        program.clear_info_log();
        match context.compile_program(&self.header, program.source()) {
            Ok(modules) => {
                tracing::debug!(program = %program.name(), stages = modules.len(), "program validated");
                ProgramStatus::Compiled
            }
            Err(err) => {
                tracing::warn!(program = %program.name(), "{err}");
                program.set_info_log(err.to_string());
                ProgramStatus::Failed
            }
        }
    }
}
