use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::actor::{ActorKey, Status};
use super::mailbox::Mailbox;
use crate::error::EngineError;

/// One committed transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionRecord {
    pub from: Status,
    pub to: Status,
    pub at: DateTime<Utc>,
}

/// Point-in-time view of a registered actor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActorSnapshot {
    pub key: ActorKey,
    pub status: Status,
    pub terminal: Status,
    pub complete: bool,
}

#[derive(Debug)]
struct StatusCell {
    current: Status,
    reached: HashSet<Status>,
    history: Vec<TransitionRecord>,
}

/// Per-actor record: status bookkeeping plus the mailbox that serializes
/// the actor's work. The two sit behind separate locks.
pub(crate) struct ActorRecord {
    pub(crate) key: ActorKey,
    pub(crate) initial: Status,
    pub(crate) terminal: Status,
    status: Mutex<StatusCell>,
    pub(crate) mailbox: Mailbox,
}

impl ActorRecord {
    fn new(key: ActorKey, initial: Status, terminal: Status) -> Self {
        let mut reached = HashSet::new();
        reached.insert(initial.clone());
        Self {
            key,
            status: Mutex::new(StatusCell {
                current: initial.clone(),
                reached,
                history: Vec::new(),
            }),
            initial,
            terminal,
            mailbox: Mailbox::default(),
        }
    }

    pub(crate) fn current(&self) -> Status {
        self.status.lock().current.clone()
    }

    /// True if the actor is, or at some point was, in `status`.
    pub(crate) fn has_reached(&self, status: &Status) -> bool {
        self.status.lock().reached.contains(status)
    }

    /// Commit `to`, returning the record of the change. Fails if the actor
    /// moved away from `from` in the meantime.
    pub(crate) fn commit(&self, from: &Status, to: &Status) -> Option<TransitionRecord> {
        let mut cell = self.status.lock();
        if &cell.current != from {
            return None;
        }
        let record = TransitionRecord {
            from: from.clone(),
            to: to.clone(),
            at: Utc::now(),
        };
        cell.current = to.clone();
        cell.reached.insert(to.clone());
        cell.history.push(record.clone());
        Some(record)
    }

    pub(crate) fn history(&self) -> Vec<TransitionRecord> {
        self.status.lock().history.clone()
    }

    pub(crate) fn snapshot(&self) -> ActorSnapshot {
        let status = self.current();
        ActorSnapshot {
            key: self.key.clone(),
            complete: status == self.terminal,
            status,
            terminal: self.terminal.clone(),
        }
    }
}

/// Registered actors and their authoritative status.
#[derive(Default)]
pub(crate) struct StatusRegistry {
    actors: RwLock<HashMap<ActorKey, Arc<ActorRecord>>>,
}

impl StatusRegistry {
    pub(crate) fn register(&self, key: &ActorKey, initial: Status, terminal: Status) -> Result<(), EngineError> {
        let mut actors = self.actors.write();
        if actors.contains_key(key) {
            return Err(EngineError::DuplicateActor(key.clone()));
        }
        debug!(actor = %key, %initial, %terminal, "Registering actor");
        actors.insert(key.clone(), Arc::new(ActorRecord::new(key.clone(), initial, terminal)));
        Ok(())
    }

    pub(crate) fn get(&self, key: &ActorKey) -> Result<Arc<ActorRecord>, EngineError> {
        self.actors
            .read()
            .get(key)
            .cloned()
            .ok_or_else(|| EngineError::UnknownActor(key.clone()))
    }

    pub(crate) fn snapshot(&self) -> Vec<ActorSnapshot> {
        let mut snapshots: Vec<_> = self.actors.read().values().map(|r| r.snapshot()).collect();
        snapshots.sort_by(|a, b| a.key.cmp(&b.key));
        snapshots
    }
}
