use std::sync::Arc;

use parking_lot::{Mutex, MutexGuard};

use crate::program::{Program, ProgramStatus};

#[derive(Debug, thiserror::Error)]
#[error("{message}")]
pub struct ContextError {
    message: String,
}

impl ContextError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Graphics backend the scheduler compiles against.
///
/// `compile` is only called with a context that is active on the calling
/// thread, and never concurrently for the same context.
pub trait Backend: Send + Sync + 'static {
    type Source: Send + Sync + 'static;
    type Context: Send + 'static;

    fn create_context(&self) -> Result<Self::Context, ContextError>;

    fn activate(&self, context: &mut Self::Context);

    fn deactivate(&self, context: &mut Self::Context);

    fn destroy_context(&self, context: Self::Context);

    /// Compiles one program and returns its terminal status.
    fn compile(&self, context: &mut Self::Context, program: &Program<Self::Source>)
        -> ProgramStatus;

    /// Pushes pending driver work after a compile.
    fn flush(&self, _context: &mut Self::Context) {}

    /// When true, workers compile on the main context instead of a context of
    /// their own.
    fn requires_main_context(&self) -> bool {
        false
    }
}

pub(crate) type ContextCell<C> = Arc<Mutex<Option<C>>>;

/// The render thread's context, shared with the scheduler for synchronous
/// compiles and for backends that cannot use a second context.
pub struct MainContext<C> {
    cell: ContextCell<C>,
}

impl<C> MainContext<C> {
    pub fn new(context: C) -> Self {
        Self {
            cell: Arc::new(Mutex::new(Some(context))),
        }
    }

    /// Locks the context; background compiles on a shared context wait until
    /// the guard is dropped.
    ///
    /// The lock is not reentrant: a non-deferred
    /// [`CompileScheduler::submit`](crate::CompileScheduler::submit) from the
    /// thread holding the guard deadlocks. Drop the guard first.
    pub fn lock(&self) -> MutexGuard<'_, Option<C>> {
        self.cell.lock()
    }

    pub(crate) fn cell(&self) -> &ContextCell<C> {
        &self.cell
    }
}

impl<C> Clone for MainContext<C> {
    fn clone(&self) -> Self {
        Self {
            cell: Arc::clone(&self.cell),
        }
    }
}

/// Activates the context in `cell`, compiles, and deactivates again.
///
/// The result is published only if `program` is still `Queued`; a reset
/// during the compile wins.
pub(crate) fn compile_with<B: Backend>(
    backend: &B,
    cell: &ContextCell<B::Context>,
    program: &Program<B::Source>,
) -> Option<ProgramStatus> {
    let mut guard = cell.lock();
    let context = guard.as_mut()?;
    backend.activate(context);
    let status = backend.compile(context, program);
    program.transition(ProgramStatus::Queued, status);
    backend.flush(context);
    backend.deactivate(context);
    Some(status)
}
