use std::collections::HashMap;
use std::sync::Arc;
use std::thread::JoinHandle;

use parking_lot::Mutex;
use shaderset::CompilerSettings;

use crate::backend::{compile_with, Backend, ContextCell, MainContext};
use crate::host::{DrawSession, JobHost, JobOwner, Progress, TracingHost};
use crate::job::CompileJob;
use crate::program::{Program, ProgramHandle, ProgramStatus};
use crate::SchedulerError;

struct Registry<B: Backend> {
    /// Job currently accepting work for each owner.
    current: HashMap<JobOwner, Arc<CompileJob<B>>>,
    /// Every job that may still compile something.
    live: Vec<Arc<CompileJob<B>>>,
    handles: Vec<JoinHandle<()>>,
    shut_down: bool,
}

impl<B: Backend> Registry<B> {
    fn prune(&mut self) {
        self.live.retain(|job| !job.is_retired());
        self.handles.retain(|handle| !handle.is_finished());
    }
}

/// Schedules program compilation on background workers, one per
/// (window, scene) owner, or on the caller thread when deferral is not
/// possible.
pub struct CompileScheduler<B: Backend> {
    backend: Arc<B>,
    main_context: MainContext<B::Context>,
    settings: CompilerSettings,
    host: Arc<dyn JobHost>,
    registry: Mutex<Registry<B>>,
}

impl<B: Backend> CompileScheduler<B> {
    pub fn new(backend: B, main_context: MainContext<B::Context>, settings: CompilerSettings) -> Self {
        Self {
            backend: Arc::new(backend),
            main_context,
            settings,
            host: Arc::new(TracingHost),
            registry: Mutex::new(Registry {
                current: HashMap::new(),
                live: Vec::new(),
                handles: Vec::new(),
                shut_down: false,
            }),
        }
    }

    /// Reports progress to `host` instead of the log.
    pub fn with_host(mut self, host: Arc<dyn JobHost>) -> Self {
        self.host = host;
        self
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn main_context(&self) -> &MainContext<B::Context> {
        &self.main_context
    }

    pub fn settings(&self) -> &CompilerSettings {
        &self.settings
    }

    /// Requests compilation of `program`.
    ///
    /// Deferred requests from an interactive session go to the owner's
    /// background job; everything else compiles on the calling thread with the
    /// main context. A non-deferred request for a program that is already
    /// queued compiles it right away instead of queueing a duplicate.
    pub fn submit(
        &self,
        program: &ProgramHandle<B::Source>,
        session: &DrawSession,
        deferred: bool,
    ) -> Result<(), SchedulerError> {
        let owner = if deferred && self.settings.deferred {
            session.background_owner()
        } else {
            None
        };

        if owner.is_some() && program.status() == ProgramStatus::Queued {
            tracing::trace!(program = %program.name(), "program already queued");
            return Ok(());
        }

        if program.transition(ProgramStatus::Created, ProgramStatus::Queued) {
            match owner {
                Some(owner) => {
                    if let Err(err) = self.enqueue(owner, program) {
                        program.transition(ProgramStatus::Queued, ProgramStatus::Created);
                        return Err(err);
                    }
                }
                None => self.compile_now(program),
            }
        }

        if owner.is_none() && program.status() == ProgramStatus::Queued {
            tracing::debug!(program = %program.name(), "forcing compilation of queued program");
            self.compile_now(program);
        }
        Ok(())
    }

    /// Removes `program` from every background job.
    ///
    /// If a worker is compiling it right now this blocks until that compile
    /// returns. Once this returns no worker will pass `program` to the backend
    /// again unless it is resubmitted, so its resources may be released.
    pub fn withdraw(&self, program: &Program<B::Source>) {
        let jobs: Vec<_> = self.registry.lock().live.iter().cloned().collect();
        for job in jobs {
            if job.withdraw(program.id()) {
                tracing::trace!(owner = %job.owner(), program = %program.name(), "withdrew program");
            }
        }
    }

    pub fn progress(&self, owner: &JobOwner) -> Option<Progress> {
        self.registry
            .lock()
            .current
            .get(owner)
            .map(|job| job.progress())
    }

    /// True when no job has work left.
    pub fn is_idle(&self) -> bool {
        self.registry.lock().live.iter().all(|job| job.is_retired())
    }

    /// Blocks until every worker started so far has exited.
    pub fn wait(&self) {
        loop {
            let handles = std::mem::take(&mut self.registry.lock().handles);
            if handles.is_empty() {
                break;
            }
            for handle in handles {
                if handle.join().is_err() {
                    tracing::error!("shader compile worker panicked");
                }
            }
        }
        self.registry.lock().prune();
    }

    /// Stops all jobs: pending requests are dropped back to `Created`, work
    /// already started runs to completion. Later deferred submissions fail.
    pub fn shutdown(&self) {
        let jobs: Vec<_> = {
            let mut registry = self.registry.lock();
            registry.shut_down = true;
            registry.live.clone()
        };
        for job in &jobs {
            job.request_stop();
        }
        self.wait();
    }

    fn compile_now(&self, program: &ProgramHandle<B::Source>) {
        // Make sure no worker is about to compile the same program.
        self.withdraw(program);
        program.set_status(ProgramStatus::Queued);
        match compile_with(self.backend.as_ref(), self.main_context.cell(), program) {
            Some(status) => {
                tracing::debug!(program = %program.name(), %status, "compiled program on caller thread");
            }
            None => {
                tracing::warn!(program = %program.name(), "main context unavailable; program left uncompiled");
                program.transition(ProgramStatus::Queued, ProgramStatus::Created);
            }
        }
    }

    fn enqueue(
        &self,
        owner: &JobOwner,
        program: &ProgramHandle<B::Source>,
    ) -> Result<(), SchedulerError> {
        let mut registry = self.registry.lock();
        if registry.shut_down {
            return Err(SchedulerError::ShutDown);
        }
        registry.prune();

        let previous = registry.current.get(owner).cloned();
        if let Some(job) = &previous {
            if job.enqueue(program) {
                return Ok(());
            }
        }

        let job = Arc::new(self.start_job(owner, previous.as_deref())?);
        job.enqueue(program);

        let runner = Arc::clone(&job);
        let spawned = std::thread::Builder::new()
            .name(format!("shader-compile {owner}"))
            .spawn(move || runner.run());
        let handle = match spawned {
            Ok(handle) => handle,
            Err(err) => {
                job.abandon();
                job.release_context();
                return Err(SchedulerError::Spawn(err));
            }
        };

        tracing::debug!(%owner, "started shader compilation job");
        registry.current.insert(owner.clone(), Arc::clone(&job));
        registry.live.push(job);
        registry.handles.push(handle);
        Ok(())
    }

    /// Builds the job superseding `previous`, reusing its context when it
    /// still owns one so that only one worker context exists per owner.
    /// `previous` no longer takes work, so it has nothing pending to carry over.
    fn start_job(
        &self,
        owner: &JobOwner,
        previous: Option<&CompileJob<B>>,
    ) -> Result<CompileJob<B>, SchedulerError> {
        let inherited = previous.and_then(|previous| previous.hand_over_context());

        let (context, owns_context): (ContextCell<B::Context>, bool) =
            if self.backend.requires_main_context() {
                (Arc::clone(self.main_context.cell()), false)
            } else if let Some(cell) = inherited {
                tracing::trace!(%owner, "reusing worker context of previous job");
                (cell, true)
            } else {
                let context = self.backend.create_context()?;
                (Arc::new(Mutex::new(Some(context))), true)
            };

        Ok(CompileJob::new(
            owner.clone(),
            Arc::clone(&self.backend),
            Arc::clone(&self.host),
            self.settings.clone(),
            context,
            owns_context,
            self.main_context.clone(),
        ))
    }
}

impl<B: Backend> Drop for CompileScheduler<B> {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::time::Duration;

    use super::*;
    use crate::testing::{main_context, Gate, TestBackend, TestSource};

    fn owner() -> JobOwner {
        JobOwner::new("main", "Scene")
    }

    fn session() -> DrawSession {
        DrawSession::interactive(owner())
    }

    fn immediate() -> CompilerSettings {
        CompilerSettings {
            deferred: true,
            start_delay: Duration::ZERO,
            update_interval: Duration::ZERO,
        }
    }

    fn scheduler(backend: TestBackend) -> CompileScheduler<TestBackend> {
        CompileScheduler::new(backend, main_context(), immediate())
    }

    fn gated_scheduler() -> (CompileScheduler<TestBackend>, Gate) {
        let (backend, gate) = TestBackend::gated();
        (scheduler(backend), gate)
    }

    /// Submits a gated program and waits until the worker is stuck on it.
    fn occupy_worker(scheduler: &CompileScheduler<TestBackend>, gate: &Gate) -> ProgramHandle<TestSource> {
        let blocker = Program::new("blocker", TestSource::gated());
        scheduler.submit(&blocker, &session(), true).unwrap();
        assert_eq!(gate.wait_entered(), blocker.id());
        blocker
    }

    #[derive(Default)]
    struct RecordingHost {
        updates: Mutex<Vec<Progress>>,
        finished: Mutex<Vec<Progress>>,
    }

    impl JobHost for RecordingHost {
        fn update(&self, _owner: &JobOwner, progress: Progress) {
            self.updates.lock().push(progress);
        }

        fn finished(&self, _owner: &JobOwner, progress: Progress) {
            self.finished.lock().push(progress);
        }
    }

    #[test]
    fn compiles_synchronously_without_interactive_session() {
        let scheduler = scheduler(TestBackend::default());
        let program = Program::new("sync", TestSource::ok());
        scheduler
            .submit(&program, &DrawSession::default(), true)
            .unwrap();

        assert_eq!(program.status(), ProgramStatus::Compiled);
        assert_eq!(scheduler.backend().compile_count(program.id()), 1);
        assert!(scheduler.progress(&owner()).is_none());
        assert_eq!(scheduler.backend().contexts_created(), 0);
    }

    #[test]
    fn image_render_never_defers() {
        let scheduler = scheduler(TestBackend::default());
        let program = Program::new("final_frame", TestSource::ok());
        let session = DrawSession {
            owner: Some(owner()),
            image_render: true,
        };
        scheduler.submit(&program, &session, true).unwrap();

        assert_eq!(program.status(), ProgramStatus::Compiled);
        assert!(scheduler.progress(&owner()).is_none());
    }

    #[test]
    fn disabled_deferral_compiles_on_caller_thread() {
        let settings = CompilerSettings {
            deferred: false,
            ..immediate()
        };
        let scheduler = CompileScheduler::new(TestBackend::default(), main_context(), settings);
        let program = Program::new("p", TestSource::ok());
        scheduler.submit(&program, &session(), true).unwrap();
        assert_eq!(program.status(), ProgramStatus::Compiled);
    }

    #[test]
    fn deferred_submissions_compile_in_background() {
        let scheduler = scheduler(TestBackend::default());
        let programs: Vec<_> = (0..8)
            .map(|index| Program::new(format!("p{index}"), TestSource::ok()))
            .collect();
        for program in &programs {
            scheduler.submit(program, &session(), true).unwrap();
        }
        scheduler.wait();

        for program in &programs {
            assert_eq!(program.status(), ProgramStatus::Compiled);
            assert_eq!(scheduler.backend().compile_count(program.id()), 1);
        }
        assert!(scheduler.is_idle());
        assert_eq!(scheduler.backend().violations(), 0);
        assert_eq!(
            scheduler.backend().contexts_created(),
            scheduler.backend().contexts_destroyed()
        );
    }

    #[test]
    fn duplicate_submissions_queue_once() {
        let (scheduler, gate) = gated_scheduler();
        occupy_worker(&scheduler, &gate);

        let program = Program::new("twice", TestSource::ok());
        scheduler.submit(&program, &session(), true).unwrap();
        scheduler.submit(&program, &session(), true).unwrap();
        assert_eq!(program.status(), ProgramStatus::Queued);
        assert_eq!(scheduler.progress(&owner()).unwrap().queued, 1);

        gate.open(1);
        scheduler.wait();
        assert_eq!(scheduler.backend().compile_count(program.id()), 1);
        assert_eq!(program.status(), ProgramStatus::Compiled);
    }

    #[test]
    fn withdrawn_pending_program_is_never_compiled() {
        let (scheduler, gate) = gated_scheduler();
        occupy_worker(&scheduler, &gate);

        let program = Program::new("doomed", TestSource::ok());
        scheduler.submit(&program, &session(), true).unwrap();
        scheduler.withdraw(&program);
        scheduler.backend().mark_withdrawn(program.id());
        assert_eq!(program.status(), ProgramStatus::Created);

        gate.open(1);
        scheduler.wait();
        assert_eq!(scheduler.backend().compile_count(program.id()), 0);
        assert_eq!(scheduler.backend().violations(), 0);
    }

    #[test]
    fn withdraw_waits_for_in_flight_compile() {
        let (scheduler, gate) = gated_scheduler();
        let program = occupy_worker(&scheduler, &gate);
        let (done_tx, done_rx) = crossbeam_channel::bounded(1);

        std::thread::scope(|scope| {
            scope.spawn(|| {
                scheduler.withdraw(&program);
                scheduler.backend().mark_withdrawn(program.id());
                done_tx.send(program.status()).unwrap();
            });
            assert!(done_rx.recv_timeout(Duration::from_millis(100)).is_err());
            gate.open(1);
            let status = done_rx.recv_timeout(Duration::from_secs(5)).unwrap();
            assert_eq!(status, ProgramStatus::Compiled);
        });

        scheduler.wait();
        assert_eq!(scheduler.backend().compile_count(program.id()), 1);
        assert_eq!(scheduler.backend().violations(), 0);
    }

    #[test]
    fn resubmission_during_compile_is_concluded() {
        let (scheduler, gate) = gated_scheduler();
        let program = occupy_worker(&scheduler, &gate);

        program.reset();
        scheduler.submit(&program, &session(), true).unwrap();
        assert_eq!(program.status(), ProgramStatus::Queued);

        gate.open(2);
        scheduler.wait();
        assert_eq!(scheduler.backend().compile_count(program.id()), 2);
        assert_eq!(program.status(), ProgramStatus::Compiled);
        assert_eq!(scheduler.backend().violations(), 0);
    }

    #[test]
    fn withdrawal_cancels_pending_conclude() {
        let (scheduler, gate) = gated_scheduler();
        let program = occupy_worker(&scheduler, &gate);
        program.reset();
        scheduler.submit(&program, &session(), true).unwrap();

        std::thread::scope(|scope| {
            scope.spawn(|| scheduler.withdraw(&program));
            std::thread::sleep(Duration::from_millis(50));
            gate.open(1);
        });
        scheduler.backend().mark_withdrawn(program.id());

        scheduler.wait();
        assert_eq!(scheduler.backend().compile_count(program.id()), 1);
        assert_eq!(scheduler.backend().violations(), 0);
    }

    #[test]
    fn resubmission_after_in_flight_withdrawal_is_compiled() {
        let (scheduler, gate) = gated_scheduler();
        let program = occupy_worker(&scheduler, &gate);

        std::thread::scope(|scope| {
            scope.spawn(|| {
                scheduler.withdraw(&program);
                program.reset();
                scheduler.submit(&program, &session(), true).unwrap();
            });
            std::thread::sleep(Duration::from_millis(50));
            gate.open(2);
        });
        scheduler.wait();

        assert_eq!(program.status(), ProgramStatus::Compiled);
        assert_eq!(scheduler.backend().compile_count(program.id()), 2);
        assert_eq!(scheduler.backend().violations(), 0);
    }

    #[test]
    fn reset_during_compile_discards_stale_result() {
        let (scheduler, gate) = gated_scheduler();
        let program = occupy_worker(&scheduler, &gate);

        program.reset();
        gate.open(1);
        scheduler.wait();
        assert_eq!(program.status(), ProgramStatus::Created);
        assert_eq!(scheduler.backend().compile_count(program.id()), 1);

        gate.open(1);
        scheduler.submit(&program, &session(), true).unwrap();
        scheduler.wait();
        assert_eq!(program.status(), ProgramStatus::Compiled);
        assert_eq!(scheduler.backend().compile_count(program.id()), 2);
    }

    #[test]
    fn synchronous_submit_waits_for_main_context_guard() {
        let scheduler = scheduler(TestBackend::default());
        let program = Program::new("sync", TestSource::ok());
        let (done_tx, done_rx) = crossbeam_channel::bounded(1);
        let guard = scheduler.main_context().lock();

        std::thread::scope(|scope| {
            scope.spawn(|| {
                scheduler
                    .submit(&program, &DrawSession::default(), false)
                    .unwrap();
                done_tx.send(()).unwrap();
            });
            assert!(done_rx.recv_timeout(Duration::from_millis(100)).is_err());
            drop(guard);
            done_rx.recv_timeout(Duration::from_secs(5)).unwrap();
        });
        assert_eq!(program.status(), ProgramStatus::Compiled);
    }

    #[test]
    fn failed_compile_does_not_stop_the_queue() {
        let scheduler = scheduler(TestBackend::default());
        let broken = Program::new("broken", TestSource::broken());
        let good = Program::new("good", TestSource::ok());
        scheduler.submit(&broken, &session(), true).unwrap();
        scheduler.submit(&good, &session(), true).unwrap();
        scheduler.wait();

        assert_eq!(broken.status(), ProgramStatus::Failed);
        assert_eq!(broken.info_log().as_deref(), Some("broken test program"));
        assert_eq!(good.status(), ProgramStatus::Compiled);
    }

    #[test]
    fn immediate_request_forces_queued_program() {
        let (scheduler, gate) = gated_scheduler();
        occupy_worker(&scheduler, &gate);

        let program = Program::new("urgent", TestSource::ok());
        scheduler.submit(&program, &session(), true).unwrap();
        assert_eq!(program.status(), ProgramStatus::Queued);

        scheduler.submit(&program, &session(), false).unwrap();
        assert_eq!(program.status(), ProgramStatus::Compiled);

        gate.open(1);
        scheduler.wait();
        assert_eq!(scheduler.backend().compile_count(program.id()), 1);
    }

    #[test]
    fn concurrent_withdrawals_do_not_deadlock() {
        let (mut backend, _gate) = TestBackend::gated();
        backend.delay = Duration::from_millis(1);
        let scheduler = scheduler(backend);
        let programs: Vec<_> = (0..32)
            .map(|index| Program::new(format!("p{index}"), TestSource::ok()))
            .collect();
        for program in &programs {
            scheduler.submit(program, &session(), true).unwrap();
        }

        std::thread::scope(|scope| {
            for chunk in programs.chunks(8) {
                let scheduler = &scheduler;
                scope.spawn(move || {
                    for program in chunk {
                        scheduler.withdraw(program);
                        scheduler.backend().mark_withdrawn(program.id());
                    }
                });
            }
        });
        scheduler.wait();

        assert_eq!(scheduler.backend().violations(), 0);
        let ids: HashSet<_> = programs.iter().map(|p| p.id()).collect();
        assert_eq!(ids.len(), programs.len());
        for program in &programs {
            assert!(matches!(
                program.status(),
                ProgramStatus::Created | ProgramStatus::Compiled
            ));
            assert!(scheduler.backend().compile_count(program.id()) <= 1);
        }
    }

    #[test]
    fn main_context_backend_never_creates_contexts() {
        let (mut backend, _gate) = TestBackend::gated();
        backend.main_only = true;
        let scheduler = scheduler(backend);
        let programs: Vec<_> = (0..4)
            .map(|index| Program::new(format!("p{index}"), TestSource::ok()))
            .collect();
        for program in &programs {
            scheduler.submit(program, &session(), true).unwrap();
        }
        scheduler.wait();

        assert!(programs
            .iter()
            .all(|program| program.status() == ProgramStatus::Compiled));
        assert_eq!(scheduler.backend().contexts_created(), 0);
        assert_eq!(scheduler.backend().contexts_destroyed(), 0);
    }

    #[test]
    fn progress_reaches_host() {
        let (scheduler, gate) = gated_scheduler();
        let host = Arc::new(RecordingHost::default());
        let scheduler = scheduler.with_host(host.clone());
        occupy_worker(&scheduler, &gate);

        for index in 0..2 {
            let program = Program::new(format!("p{index}"), TestSource::ok());
            scheduler.submit(&program, &session(), true).unwrap();
        }
        gate.open(1);
        scheduler.wait();

        let progress = scheduler.progress(&owner()).unwrap();
        assert_eq!(progress, Progress { completed: 3, queued: 0 });
        let last = *host.updates.lock().last().unwrap();
        assert_eq!(last.fraction(), 1.0);
        assert_eq!(host.finished.lock().as_slice(), &[progress]);
    }

    #[test]
    fn shutdown_returns_pending_work_and_rejects_new_work() {
        let settings = CompilerSettings {
            start_delay: Duration::from_secs(30),
            ..immediate()
        };
        let scheduler = CompileScheduler::new(TestBackend::default(), main_context(), settings);
        let program = Program::new("late", TestSource::ok());
        scheduler.submit(&program, &session(), true).unwrap();
        assert_eq!(program.status(), ProgramStatus::Queued);

        scheduler.shutdown();
        assert_eq!(program.status(), ProgramStatus::Created);
        assert_eq!(scheduler.backend().compile_count(program.id()), 0);
        assert_eq!(scheduler.backend().contexts_destroyed(), 1);

        let err = scheduler.submit(&program, &session(), true).unwrap_err();
        assert!(matches!(err, SchedulerError::ShutDown));
        assert_eq!(program.status(), ProgramStatus::Created);
    }
}
