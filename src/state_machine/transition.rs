use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::debug;

use super::actor::{ActorKey, Status};
use crate::error::{BoxError, EngineError};

/// Side-effecting operation run when an actor moves between two statuses.
///
/// Actions may call back into the engine (update statuses, send messages)
/// before returning; the engine never holds a table lock while one runs.
pub type Action = Arc<dyn Fn() -> Result<(), BoxError> + Send + Sync>;

/// Per-actor table of `(from, to) -> action`.
#[derive(Default)]
pub(crate) struct TransitionTable {
    actions: RwLock<HashMap<ActorKey, HashMap<(Status, Status), Action>>>,
}

impl TransitionTable {
    pub(crate) fn add(&self, actor: &ActorKey, from: Status, to: Status, action: Action) -> Result<(), EngineError> {
        let mut actions = self.actions.write();
        let table = actions.entry(actor.clone()).or_default();
        let pair = (from, to);
        if table.contains_key(&pair) {
            let (from, to) = pair;
            return Err(EngineError::DuplicateTransition {
                actor: actor.clone(),
                from,
                to,
            });
        }
        debug!(%actor, from = %pair.0, to = %pair.1, "Registering transition action");
        table.insert(pair, action);
        Ok(())
    }

    pub(crate) fn get(&self, actor: &ActorKey, from: &Status, to: &Status) -> Option<Action> {
        self.actions
            .read()
            .get(actor)
            .and_then(|table| table.get(&(from.clone(), to.clone())))
            .cloned()
    }
}
