use std::collections::VecDeque;

use parking_lot::Mutex;
use tracing::{debug, warn};

use super::actor::ActorKey;
use super::engine::Outcome;
use crate::error::EngineError;

/// Unit of work run on behalf of one actor: a transition or a message delivery.
pub(crate) type Job = Box<dyn FnOnce() -> Result<Outcome, EngineError> + Send>;

/// Which queue a job waits in while its actor is busy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Lane {
    Message,
    Transition,
}

#[derive(Default)]
struct MailboxState {
    busy: bool,
    messages: VecDeque<Job>,
    transitions: VecDeque<Job>,
}

impl MailboxState {
    fn depth(&self) -> usize {
        self.messages.len() + self.transitions.len()
    }
}

/// Serializes everything that runs on behalf of a single actor.
///
/// The first thread to submit work to an idle actor claims it and runs that
/// work inline. Work submitted while the actor is claimed (from any thread,
/// including re-entrant calls from the running action) is queued and drained
/// by the claiming thread before it lets go. No thread ever blocks waiting
/// for another actor.
///
/// Queued messages are delivered before queued transitions. A sender always
/// finishes `send` before it commits its next status, so any transition
/// gated on that status runs after the message has been handled.
#[derive(Default)]
pub(crate) struct Mailbox {
    state: Mutex<MailboxState>,
}

impl Mailbox {
    pub(crate) fn submit(&self, actor: &ActorKey, lane: Lane, job: Job) -> Result<Outcome, EngineError> {
        {
            let mut state = self.state.lock();
            if state.busy {
                match lane {
                    Lane::Message => state.messages.push_back(job),
                    Lane::Transition => state.transitions.push_back(job),
                }
                debug!(%actor, ?lane, depth = state.depth(), "Actor busy, work queued");
                return Ok(Outcome::Queued);
            }
            state.busy = true;
        }

        let _guard = ReleaseOnPanic(self);
        let mut result = job();
        while let Some(next) = self.next_or_release() {
            if let Err(err) = next() {
                match result {
                    Ok(_) => result = Err(err),
                    Err(_) => warn!(%actor, error = %err, "Queued work failed after an earlier failure"),
                }
            }
        }
        result
    }

    /// Drop queued transitions; returns how many were discarded. Queued
    /// messages are kept: they belong to other actors' progress.
    pub(crate) fn discard_transitions(&self) -> usize {
        let mut state = self.state.lock();
        let dropped = state.transitions.len();
        state.transitions.clear();
        dropped
    }

    #[cfg(test)]
    pub(crate) fn is_busy(&self) -> bool {
        self.state.lock().busy
    }

    fn next_or_release(&self) -> Option<Job> {
        let mut state = self.state.lock();
        let next = state
            .messages
            .pop_front()
            .or_else(|| state.transitions.pop_front());
        if next.is_none() {
            state.busy = false;
        }
        next
    }
}

struct ReleaseOnPanic<'a>(&'a Mailbox);

impl Drop for ReleaseOnPanic<'_> {
    fn drop(&mut self) {
        if std::thread::panicking() {
            let mut state = self.0.state.lock();
            state.messages.clear();
            state.transitions.clear();
            state.busy = false;
        }
    }
}
