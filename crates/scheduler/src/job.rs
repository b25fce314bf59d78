use std::sync::Arc;
use std::time::Instant;

use parking_lot::{Condvar, Mutex};
use shaderset::CompilerSettings;

use crate::backend::{Backend, ContextCell, MainContext};
use crate::host::{JobHost, JobOwner, Progress};
use crate::program::{ProgramHandle, ProgramId, ProgramStatus};
use crate::queue::CompileQueue;

struct JobState<S> {
    queue: CompileQueue<S>,
    compiling: Option<ProgramHandle<S>>,
    /// The in-flight program was submitted again while compiling.
    reservice: bool,
    /// The in-flight program was withdrawn while compiling and not
    /// submitted again since.
    withdrawn: bool,
    completed: u64,
    owns_context: bool,
    /// The worker left its drain loop; new work needs a new job.
    finished: bool,
    /// The worker thread is done with every compile, including concludes.
    retired: bool,
    stop: bool,
}

/// One background compile job: a queue drained by a single worker thread
/// against a single context.
///
/// `state` is the short-held list lock. `compilation` is held for the
/// duration of exactly one backend compile and is always taken while holding
/// the list lock, never the other way round.
pub(crate) struct CompileJob<B: Backend> {
    owner: JobOwner,
    backend: Arc<B>,
    host: Arc<dyn JobHost>,
    settings: CompilerSettings,
    state: Mutex<JobState<B::Source>>,
    wake: Condvar,
    compilation: Mutex<()>,
    context: ContextCell<B::Context>,
    main_context: MainContext<B::Context>,
}

impl<B: Backend> CompileJob<B> {
    pub(crate) fn new(
        owner: JobOwner,
        backend: Arc<B>,
        host: Arc<dyn JobHost>,
        settings: CompilerSettings,
        context: ContextCell<B::Context>,
        owns_context: bool,
        main_context: MainContext<B::Context>,
    ) -> Self {
        Self {
            owner,
            backend,
            host,
            settings,
            state: Mutex::new(JobState {
                queue: CompileQueue::default(),
                compiling: None,
                reservice: false,
                withdrawn: false,
                completed: 0,
                owns_context,
                finished: false,
                retired: false,
                stop: false,
            }),
            wake: Condvar::new(),
            compilation: Mutex::new(()),
            context,
            main_context,
        }
    }

    pub(crate) fn owner(&self) -> &JobOwner {
        &self.owner
    }

    /// Adds a request; returns false when the worker already stopped taking work.
    pub(crate) fn enqueue(&self, program: &ProgramHandle<B::Source>) -> bool {
        let mut state = self.state.lock();
        if state.finished || state.stop {
            return false;
        }
        let in_flight = state
            .compiling
            .as_ref()
            .is_some_and(|compiling| compiling.id() == program.id());
        if in_flight {
            // A request made after a withdrawal supersedes it.
            state.reservice = true;
            state.withdrawn = false;
        } else {
            state.queue.push(Arc::clone(program));
        }
        true
    }

    /// Removes `id` from this job. If it is being compiled, blocks until that
    /// compile returns. Afterwards this job never compiles `id` again unless it
    /// is resubmitted.
    pub(crate) fn withdraw(&self, id: ProgramId) -> bool {
        let mut state = self.state.lock();
        let removed = state.queue.remove(id);
        if let Some(program) = &removed {
            program.transition(ProgramStatus::Queued, ProgramStatus::Created);
        }

        let in_flight = state
            .compiling
            .as_ref()
            .is_some_and(|compiling| compiling.id() == id);
        if in_flight {
            state.withdrawn = true;
            tracing::debug!(owner = %self.owner, program = %id, "waiting for in-flight compile before withdrawal");
            drop(self.compilation.lock());
        }
        removed.is_some() || in_flight
    }

    /// Releases the owned context to a superseding job.
    ///
    /// Only called once this job stopped taking work, so its pending list is
    /// already empty. Clearing `owns_context` and handing out the cell happen
    /// in the same critical section, so exactly one job ends up destroying
    /// the context.
    pub(crate) fn hand_over_context(&self) -> Option<ContextCell<B::Context>> {
        let mut state = self.state.lock();
        if std::mem::take(&mut state.owns_context) {
            Some(Arc::clone(&self.context))
        } else {
            None
        }
    }

    /// Host-level termination: pending requests are dropped, the in-flight
    /// compile and any concludes still run to completion.
    pub(crate) fn request_stop(&self) {
        let mut state = self.state.lock();
        state.stop = true;
        for program in state.queue.take_all() {
            program.transition(ProgramStatus::Queued, ProgramStatus::Created);
        }
        self.wake.notify_all();
    }

    pub(crate) fn progress(&self) -> Progress {
        let state = self.state.lock();
        Progress {
            completed: state.completed,
            queued: state.queue.pending_len(),
        }
    }

    pub(crate) fn is_retired(&self) -> bool {
        self.state.lock().retired
    }

    /// Worker entry point.
    pub(crate) fn run(&self) {
        self.wait_start_delay();
        self.host.started(&self.owner);

        {
            let mut guard = self.context.lock();
            match guard.as_mut() {
                Some(context) => {
                    self.backend.activate(context);
                    self.drain(context);
                    self.backend.deactivate(context);
                }
                None => {
                    tracing::warn!(owner = %self.owner, "compile job has no context; returning queued programs");
                    self.abandon();
                }
            }
        }

        self.conclude();
        self.release_context();

        let progress = {
            let mut state = self.state.lock();
            state.retired = true;
            Progress {
                completed: state.completed,
                queued: state.queue.pending_len(),
            }
        };
        self.host.finished(&self.owner, progress);
    }

    /// Returns queued programs to `Created` without compiling them.
    pub(crate) fn abandon(&self) {
        let mut state = self.state.lock();
        state.finished = true;
        for program in state.queue.take_all() {
            program.transition(ProgramStatus::Queued, ProgramStatus::Created);
        }
    }

    fn wait_start_delay(&self) {
        let delay = self.settings.start_delay;
        if delay.is_zero() {
            return;
        }
        let deadline = Instant::now() + delay;
        let mut state = self.state.lock();
        while !state.stop {
            if self.wake.wait_until(&mut state, deadline).timed_out() {
                break;
            }
        }
    }

    fn drain(&self, context: &mut B::Context) {
        let mut last_update: Option<Instant> = None;
        loop {
            let mut state = self.state.lock();
            if state.stop {
                state.finished = true;
                break;
            }
            let Some(program) = state.queue.pop() else {
                state.finished = true;
                break;
            };
            state.compiling = Some(Arc::clone(&program));
            state.reservice = false;
            state.withdrawn = false;
            let compiling = self.compilation.lock();
            drop(state);

            tracing::debug!(owner = %self.owner, program = %program.name(), "compiling shader program");
            let status = self.backend.compile(context, &program);
            self.store_status(&program, status);
            self.backend.flush(context);
            drop(compiling);

            let mut state = self.state.lock();
            state.completed += 1;
            if state.reservice && !state.withdrawn {
                program.set_status(ProgramStatus::Queued);
                state.queue.conclude(Arc::clone(&program));
            }
            state.compiling = None;
            let progress = Progress {
                completed: state.completed,
                queued: state.queue.pending_len(),
            };
            drop(state);

            if status == ProgramStatus::Failed {
                tracing::warn!(owner = %self.owner, program = %program.name(), "shader program failed to compile");
            }
            self.report(progress, &mut last_update);
        }
    }

    /// Compiles programs that were requested again while in flight. The
    /// backend cannot abandon a half-prepared program, so these run on the
    /// main context before the job goes away.
    fn conclude(&self) {
        if self.state.lock().queue.is_empty() {
            return;
        }

        let mut guard = self.main_context.cell().lock();
        let Some(context) = guard.as_mut() else {
            tracing::warn!(owner = %self.owner, "main context unavailable; dropping concluding programs");
            for program in self.state.lock().queue.take_conclude() {
                program.transition(ProgramStatus::Queued, ProgramStatus::Created);
            }
            return;
        };
        self.backend.activate(context);
        loop {
            let mut state = self.state.lock();
            let Some(program) = state.queue.pop_conclude() else {
                break;
            };
            state.compiling = Some(Arc::clone(&program));
            state.reservice = false;
            state.withdrawn = false;
            let compiling = self.compilation.lock();
            drop(state);

            tracing::debug!(owner = %self.owner, program = %program.name(), "concluding shader program");
            let status = self.backend.compile(context, &program);
            self.store_status(&program, status);
            self.backend.flush(context);
            drop(compiling);

            let mut state = self.state.lock();
            state.completed += 1;
            state.compiling = None;
        }
        self.backend.deactivate(context);
    }

    pub(crate) fn release_context(&self) {
        let owned = std::mem::take(&mut self.state.lock().owns_context);
        if !owned {
            return;
        }
        if let Some(context) = self.context.lock().take() {
            tracing::debug!(owner = %self.owner, "destroying worker context");
            self.backend.destroy_context(context);
        }
    }

    /// Publishes a compile result unless the program was reset while the
    /// compile ran; a reset program keeps `Created` so it gets recompiled.
    fn store_status(&self, program: &ProgramHandle<B::Source>, status: ProgramStatus) {
        if !program.transition(ProgramStatus::Queued, status) {
            tracing::debug!(
                owner = %self.owner,
                program = %program.name(),
                "program reset while compiling; discarding result"
            );
        }
    }

    fn report(&self, progress: Progress, last_update: &mut Option<Instant>) {
        let now = Instant::now();
        let due = last_update
            .map_or(true, |at| now.duration_since(at) >= self.settings.update_interval);
        if due || progress.queued == 0 {
            self.host.update(&self.owner, progress);
            *last_update = Some(now);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::program::Program;
    use crate::testing::{TestBackend, TestSource};
    use crate::TracingHost;

    fn job(backend: Arc<TestBackend>, owns: bool) -> CompileJob<TestBackend> {
        let context = Arc::new(Mutex::new(Some(backend.create_context().unwrap())));
        let main = MainContext::new(backend.create_context().unwrap());
        CompileJob::new(
            JobOwner::new("main", "Scene"),
            backend,
            Arc::new(TracingHost),
            CompilerSettings {
                start_delay: std::time::Duration::ZERO,
                ..CompilerSettings::default()
            },
            context,
            owns,
            main,
        )
    }

    #[test]
    fn hand_over_transfers_context_ownership_once() {
        let backend = Arc::new(TestBackend::default());
        let old = job(Arc::clone(&backend), true);

        assert!(old.hand_over_context().is_some());
        assert!(old.hand_over_context().is_none());

        old.run();
        assert_eq!(backend.contexts_destroyed(), 0);
    }

    #[test]
    fn owned_context_is_destroyed_after_drain() {
        let backend = Arc::new(TestBackend::default());
        let job = job(Arc::clone(&backend), true);
        let program = Program::new("p", TestSource::ok());
        program.set_status(ProgramStatus::Queued);
        assert!(job.enqueue(&program));
        job.run();

        assert_eq!(program.status(), ProgramStatus::Compiled);
        assert_eq!(backend.contexts_destroyed(), 1);
        assert!(job.is_retired());
        assert!(!job.enqueue(&program));
    }

    #[test]
    fn borrowed_context_is_left_alone() {
        let backend = Arc::new(TestBackend::default());
        let job = job(Arc::clone(&backend), false);
        job.run();
        assert_eq!(backend.contexts_destroyed(), 0);
    }

    #[test]
    fn stop_returns_pending_programs() {
        let backend = Arc::new(TestBackend::default());
        let job = job(Arc::clone(&backend), true);
        let program = Program::new("p", TestSource::ok());
        program.set_status(ProgramStatus::Queued);
        job.enqueue(&program);
        job.request_stop();
        job.run();

        assert_eq!(program.status(), ProgramStatus::Created);
        assert_eq!(backend.compile_count(program.id()), 0);
    }
}
