use std::collections::VecDeque;

use crate::program::{ProgramHandle, ProgramId};

/// Pending compile requests of one job plus the programs that must be
/// compiled once more before the job is torn down.
///
/// Not synchronised on its own; jobs keep it behind their list lock.
pub(crate) struct CompileQueue<S> {
    pending: VecDeque<ProgramHandle<S>>,
    conclude: Vec<ProgramHandle<S>>,
}

impl<S> Default for CompileQueue<S> {
    fn default() -> Self {
        Self {
            pending: VecDeque::new(),
            conclude: Vec::new(),
        }
    }
}

impl<S> CompileQueue<S> {
    /// Appends a request unless the program is already pending or concluding.
    pub(crate) fn push(&mut self, program: ProgramHandle<S>) -> bool {
        if self.contains(program.id()) {
            return false;
        }
        self.pending.push_back(program);
        true
    }

    /// Takes the most recently queued request.
    ///
    /// Draining from the tail keeps a withdrawal sweep over the oldest entries
    /// from contending with the worker.
    pub(crate) fn pop(&mut self) -> Option<ProgramHandle<S>> {
        self.pending.pop_back()
    }

    pub(crate) fn remove(&mut self, id: ProgramId) -> Option<ProgramHandle<S>> {
        if let Some(index) = self.pending.iter().position(|p| p.id() == id) {
            return self.pending.remove(index);
        }
        let index = self.conclude.iter().position(|p| p.id() == id)?;
        Some(self.conclude.swap_remove(index))
    }

    pub(crate) fn contains(&self, id: ProgramId) -> bool {
        self.pending.iter().any(|p| p.id() == id) || self.conclude.iter().any(|p| p.id() == id)
    }

    /// Empties the pending list, oldest first.
    pub(crate) fn take_all(&mut self) -> Vec<ProgramHandle<S>> {
        self.pending.drain(..).collect()
    }

    pub(crate) fn conclude(&mut self, program: ProgramHandle<S>) {
        if !self.contains(program.id()) {
            self.conclude.push(program);
        }
    }

    pub(crate) fn pop_conclude(&mut self) -> Option<ProgramHandle<S>> {
        self.conclude.pop()
    }

    pub(crate) fn take_conclude(&mut self) -> Vec<ProgramHandle<S>> {
        std::mem::take(&mut self.conclude)
    }

    pub(crate) fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.pending.is_empty() && self.conclude.is_empty()
    }
}
