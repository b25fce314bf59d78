use std::fmt;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

/// Compile state of a [`Program`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ProgramStatus {
    Created = 0,
    Queued = 1,
    Compiled = 2,
    Failed = 3,
}

impl ProgramStatus {
    fn from_u8(raw: u8) -> Self {
        match raw {
            1 => ProgramStatus::Queued,
            2 => ProgramStatus::Compiled,
            3 => ProgramStatus::Failed,
            _ => ProgramStatus::Created,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, ProgramStatus::Compiled | ProgramStatus::Failed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ProgramStatus::Created => "created",
            ProgramStatus::Queued => "queued",
            ProgramStatus::Compiled => "compiled",
            ProgramStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for ProgramStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ProgramId(u64);

impl ProgramId {
    fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        ProgramId(NEXT.fetch_add(1, Ordering::Relaxed))
    }

    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ProgramId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A compilable shading unit shared between the render code and the scheduler.
///
/// The status is readable from any thread; the backend records failure
/// details in the info log.
pub struct Program<S> {
    id: ProgramId,
    name: String,
    source: S,
    status: AtomicU8,
    log: Mutex<Option<String>>,
}

pub type ProgramHandle<S> = Arc<Program<S>>;

impl<S> Program<S> {
    pub fn new(name: impl Into<String>, source: S) -> ProgramHandle<S> {
        Arc::new(Self {
            id: ProgramId::next(),
            name: name.into(),
            source,
            status: AtomicU8::new(ProgramStatus::Created as u8),
            log: Mutex::new(None),
        })
    }

    pub fn id(&self) -> ProgramId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    pub fn status(&self) -> ProgramStatus {
        ProgramStatus::from_u8(self.status.load(Ordering::Acquire))
    }

    pub fn set_status(&self, status: ProgramStatus) {
        self.status.store(status as u8, Ordering::Release);
    }

    /// Moves `from` to `to` only if the status is still `from`.
    pub fn transition(&self, from: ProgramStatus, to: ProgramStatus) -> bool {
        self.status
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Invalidates the compiled result so the next submission recompiles.
    pub fn reset(&self) {
        self.set_status(ProgramStatus::Created);
        self.log.lock().take();
    }

    pub fn info_log(&self) -> Option<String> {
        self.log.lock().clone()
    }

    pub fn set_info_log(&self, log: impl Into<String>) {
        *self.log.lock() = Some(log.into());
    }

    pub fn clear_info_log(&self) {
        self.log.lock().take();
    }
}

impl<S> fmt::Debug for Program<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Program")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("status", &self.status())
            .finish_non_exhaustive()
    }
}
