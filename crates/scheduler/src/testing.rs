use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use crossbeam_channel::{unbounded, Receiver, Sender};
use parking_lot::Mutex;

use crate::backend::{Backend, ContextError, MainContext};
use crate::program::{Program, ProgramId, ProgramStatus};

#[derive(Debug, Clone, Copy)]
pub(crate) struct TestSource {
    pub(crate) ok: bool,
    pub(crate) gated: bool,
}

impl TestSource {
    pub(crate) fn ok() -> Self {
        Self {
            ok: true,
            gated: false,
        }
    }

    pub(crate) fn broken() -> Self {
        Self {
            ok: false,
            gated: false,
        }
    }

    pub(crate) fn gated() -> Self {
        Self {
            ok: true,
            gated: true,
        }
    }
}

pub(crate) struct TestContext {
    active: bool,
}

/// Main context built outside the backend's creation counter.
pub(crate) fn main_context() -> MainContext<TestContext> {
    MainContext::new(TestContext { active: false })
}

/// Backend that records every compile and flags compiles of withdrawn
/// programs or compiles on an inactive context.
///
/// Gated programs announce themselves on `entered` and block until a token
/// arrives on `release`.
pub(crate) struct TestBackend {
    compiles: Mutex<HashMap<ProgramId, usize>>,
    withdrawn: Mutex<HashSet<ProgramId>>,
    violations: AtomicUsize,
    created: AtomicUsize,
    destroyed: AtomicUsize,
    entered: Sender<ProgramId>,
    release: Receiver<()>,
    pub(crate) main_only: bool,
    pub(crate) delay: Duration,
}

pub(crate) struct Gate {
    pub(crate) entered: Receiver<ProgramId>,
    pub(crate) release: Sender<()>,
}

impl Gate {
    pub(crate) fn wait_entered(&self) -> ProgramId {
        self.entered
            .recv_timeout(Duration::from_secs(5))
            .expect("gated compile never started")
    }

    pub(crate) fn open(&self, count: usize) {
        for _ in 0..count {
            self.release.send(()).expect("backend dropped");
        }
    }
}

impl TestBackend {
    pub(crate) fn gated() -> (Self, Gate) {
        let (entered_tx, entered_rx) = unbounded();
        let (release_tx, release_rx) = unbounded();
        let backend = Self {
            compiles: Mutex::new(HashMap::new()),
            withdrawn: Mutex::new(HashSet::new()),
            violations: AtomicUsize::new(0),
            created: AtomicUsize::new(0),
            destroyed: AtomicUsize::new(0),
            entered: entered_tx,
            release: release_rx,
            main_only: false,
            delay: Duration::ZERO,
        };
        let gate = Gate {
            entered: entered_rx,
            release: release_tx,
        };
        (backend, gate)
    }

    pub(crate) fn compile_count(&self, id: ProgramId) -> usize {
        self.compiles.lock().get(&id).copied().unwrap_or(0)
    }

    pub(crate) fn mark_withdrawn(&self, id: ProgramId) {
        self.withdrawn.lock().insert(id);
    }

    pub(crate) fn violations(&self) -> usize {
        self.violations.load(Ordering::SeqCst)
    }

    pub(crate) fn contexts_created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }

    pub(crate) fn contexts_destroyed(&self) -> usize {
        self.destroyed.load(Ordering::SeqCst)
    }
}

impl Default for TestBackend {
    fn default() -> Self {
        Self::gated().0
    }
}

impl Backend for TestBackend {
    type Source = TestSource;
    type Context = TestContext;

    fn create_context(&self) -> Result<TestContext, ContextError> {
        self.created.fetch_add(1, Ordering::SeqCst);
        Ok(TestContext { active: false })
    }

    fn activate(&self, context: &mut TestContext) {
        context.active = true;
    }

    fn deactivate(&self, context: &mut TestContext) {
        context.active = false;
    }

    fn destroy_context(&self, _context: TestContext) {
        self.destroyed.fetch_add(1, Ordering::SeqCst);
    }

    fn compile(&self, context: &mut TestContext, program: &Program<TestSource>) -> ProgramStatus {
        if !context.active || self.withdrawn.lock().contains(&program.id()) {
            self.violations.fetch_add(1, Ordering::SeqCst);
        }
        *self.compiles.lock().entry(program.id()).or_default() += 1;

        let source = program.source();
        if source.gated {
            let _ = self.entered.send(program.id());
            let _ = self.release.recv_timeout(Duration::from_secs(5));
        }
        if !self.delay.is_zero() {
            std::thread::sleep(self.delay);
        }
        if source.ok {
            ProgramStatus::Compiled
        } else {
            program.set_info_log("broken test program");
            ProgramStatus::Failed
        }
    }

    fn requires_main_context(&self) -> bool {
        self.main_only
    }
}
