use std::fmt;

/// Key of one background compile job: the window and scene that asked for it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct JobOwner {
    pub window: String,
    pub scene: String,
}

impl JobOwner {
    pub fn new(window: impl Into<String>, scene: impl Into<String>) -> Self {
        Self {
            window: window.into(),
            scene: scene.into(),
        }
    }
}

impl fmt::Display for JobOwner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.window, self.scene)
    }
}

/// Where a submission comes from.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DrawSession {
    /// Interactive owner; `None` when there is no interactive session and
    /// everything compiles on the caller thread.
    pub owner: Option<JobOwner>,
    /// Final-frame rendering never waits on background compiles.
    pub image_render: bool,
}

impl DrawSession {
    pub fn interactive(owner: JobOwner) -> Self {
        Self {
            owner: Some(owner),
            image_render: false,
        }
    }

    pub fn image_render() -> Self {
        Self {
            owner: None,
            image_render: true,
        }
    }

    pub(crate) fn background_owner(&self) -> Option<&JobOwner> {
        if self.image_render {
            None
        } else {
            self.owner.as_ref()
        }
    }
}

/// Snapshot of a job's progress.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Progress {
    /// Programs compiled by the job so far. Never decreases.
    pub completed: u64,
    /// Programs still waiting in the job's queue.
    pub queued: usize,
}

impl Progress {
    pub fn fraction(&self) -> f32 {
        let total = self.completed + self.queued as u64;
        if total == 0 {
            1.0
        } else {
            self.completed as f32 / total as f32
        }
    }
}

/// Host job system the scheduler reports to.
pub trait JobHost: Send + Sync + 'static {
    fn started(&self, _owner: &JobOwner) {}

    fn update(&self, owner: &JobOwner, progress: Progress);

    fn finished(&self, _owner: &JobOwner, _progress: Progress) {}
}

/// Host that only logs.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingHost;

impl JobHost for TracingHost {
    fn started(&self, owner: &JobOwner) {
        tracing::debug!(%owner, "shader compilation job started");
    }

    fn update(&self, owner: &JobOwner, progress: Progress) {
        tracing::debug!(
            %owner,
            completed = progress.completed,
            queued = progress.queued,
            fraction = progress.fraction(),
            "shader compilation progress"
        );
    }

    fn finished(&self, owner: &JobOwner, progress: Progress) {
        tracing::debug!(%owner, completed = progress.completed, "shader compilation job finished");
    }
}
