use crossbeam_channel::{Receiver, Sender};
use scheduler::{JobHost, JobOwner, Progress};

#[derive(Debug, Clone, PartialEq)]
pub enum HostEvent {
    Started(JobOwner),
    Update(JobOwner, Progress),
    Finished(JobOwner, Progress),
    /// Every worker has exited.
    Idle,
}

/// Forwards job notifications from compile workers to the main thread.
#[derive(Debug, Clone)]
pub struct ChannelHost {
    sender: Sender<HostEvent>,
}

impl ChannelHost {
    pub fn new() -> (Self, Receiver<HostEvent>) {
        let (sender, receiver) = crossbeam_channel::unbounded();
        (Self { sender }, receiver)
    }

    pub fn sender(&self) -> Sender<HostEvent> {
        self.sender.clone()
    }

    fn send(&self, event: HostEvent) {
        if self.sender.send(event).is_err() {
            tracing::trace!("host event dropped; receiver gone");
        }
    }
}

impl JobHost for ChannelHost {
    fn started(&self, owner: &JobOwner) {
        self.send(HostEvent::Started(owner.clone()));
    }

    fn update(&self, owner: &JobOwner, progress: Progress) {
        self.send(HostEvent::Update(owner.clone(), progress));
    }

    fn finished(&self, owner: &JobOwner, progress: Progress) {
        self.send(HostEvent::Finished(owner.clone(), progress));
    }
}
