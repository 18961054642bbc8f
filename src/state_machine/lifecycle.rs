use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use super::actor::ActorKey;
use crate::error::EngineError;

#[derive(Debug, Clone)]
enum Release {
    Completed,
    Aborted { actor: ActorKey, error: Arc<EngineError> },
}

impl Release {
    fn to_result(&self) -> Result<(), EngineError> {
        match self {
            Release::Completed => Ok(()),
            Release::Aborted { actor, error } => Err(EngineError::Aborted {
                actor: actor.clone(),
                source: error.clone(),
            }),
        }
    }
}

/// One-shot signal released when the root actor reaches its terminal
/// status, or when a participant aborts the run. Only the first release
/// counts; every waiter observes the same result.
#[derive(Default)]
pub(crate) struct Completion {
    released: Mutex<Option<Release>>,
    cond: Condvar,
}

impl Completion {
    pub(crate) fn complete(&self) -> bool {
        self.release(Release::Completed)
    }

    pub(crate) fn abort(&self, actor: ActorKey, error: EngineError) -> bool {
        self.release(Release::Aborted {
            actor,
            error: Arc::new(error),
        })
    }

    fn release(&self, outcome: Release) -> bool {
        let mut released = self.released.lock();
        if released.is_some() {
            return false;
        }
        *released = Some(outcome);
        self.cond.notify_all();
        true
    }

    pub(crate) fn is_released(&self) -> bool {
        self.released.lock().is_some()
    }

    pub(crate) fn wait(&self) -> Result<(), EngineError> {
        let mut released = self.released.lock();
        loop {
            if let Some(outcome) = released.as_ref() {
                return outcome.to_result();
            }
            self.cond.wait(&mut released);
        }
    }

    /// Returns `None` if nothing was released before `timeout` elapsed.
    pub(crate) fn wait_timeout(&self, timeout: Duration) -> Option<Result<(), EngineError>> {
        let deadline = Instant::now() + timeout;
        let mut released = self.released.lock();
        loop {
            if let Some(outcome) = released.as_ref() {
                return Some(outcome.to_result());
            }
            if self.cond.wait_until(&mut released, deadline).timed_out() {
                return released.as_ref().map(Release::to_result);
            }
        }
    }
}
