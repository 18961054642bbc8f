use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, warn};

use super::actor::ActorKey;
use crate::error::BoxError;

/// A typed message exchanged between actors.
///
/// Clients define an enum and return a stable discriminator per variant;
/// handlers are registered per `(actor, kind)` and receive the whole value,
/// so they can pattern-match without runtime type checks.
pub trait Message: Send + 'static {
    fn kind(&self) -> &'static str;
}

/// Receives a message and the key of the actor that sent it.
pub type Handler<M> = Arc<dyn Fn(&ActorKey, M) -> Result<(), BoxError> + Send + Sync>;

/// Per-actor, per-kind handler table.
pub(crate) struct MessageBus<M> {
    handlers: RwLock<HashMap<ActorKey, HashMap<&'static str, Handler<M>>>>,
}

impl<M> Default for MessageBus<M> {
    fn default() -> Self {
        Self {
            handlers: RwLock::new(HashMap::new()),
        }
    }
}

impl<M: Message> MessageBus<M> {
    /// Register `handler`; a later registration for the same pair replaces
    /// the earlier one. Returns true if something was replaced.
    pub(crate) fn register(&self, actor: &ActorKey, kind: &'static str, handler: Handler<M>) -> bool {
        let replaced = self
            .handlers
            .write()
            .entry(actor.clone())
            .or_default()
            .insert(kind, handler)
            .is_some();
        if replaced {
            warn!(%actor, kind, "Handler already registered, replacing");
        } else {
            debug!(%actor, kind, "Registering message handler");
        }
        replaced
    }

    pub(crate) fn handler(&self, actor: &ActorKey, kind: &str) -> Option<Handler<M>> {
        self.handlers.read().get(actor).and_then(|h| h.get(kind)).cloned()
    }
}
