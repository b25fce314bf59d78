//! Background compilation of shader programs.
//!
//! Programs submitted from an interactive draw session are queued on a job
//! owned by that (window, scene) pair and compiled by a dedicated worker
//! thread on its own context. Everything else compiles on the caller thread
//! using the main context. [`CompileScheduler::withdraw`] guarantees that no
//! worker touches a program after it returns, which is what makes it safe to
//! free a program while compilation is still running elsewhere.

mod backend;
mod compiler;
mod host;
mod job;
mod program;
mod queue;
#[cfg(test)]
mod testing;

pub use backend::{Backend, ContextError, MainContext};
pub use compiler::CompileScheduler;
pub use host::{DrawSession, JobHost, JobOwner, Progress, TracingHost};
pub use program::{Program, ProgramHandle, ProgramId, ProgramStatus};
pub use shaderset::CompilerSettings;

#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    #[error("compile scheduler has been shut down")]
    ShutDown,
    #[error("failed to create worker context: {0}")]
    Context(#[from] ContextError),
    #[error("failed to spawn compile worker: {0}")]
    Spawn(#[from] std::io::Error),
}
