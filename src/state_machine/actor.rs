use std::borrow::Cow;
use std::fmt;
use std::sync::{Arc, Weak};

use serde::{Deserialize, Serialize};

use crate::error::{BoxError, EngineError};

/// A named stage in an actor's lifecycle.
///
/// Statuses are plain strings so each client can define its own pipeline;
/// constants can be declared with [`Status::from_static`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Status(Cow<'static, str>);

impl Status {
    pub const fn from_static(name: &'static str) -> Self {
        Self(Cow::Borrowed(name))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Status {
    fn from(name: &str) -> Self {
        Self(Cow::Owned(name.to_string()))
    }
}

impl From<String> for Status {
    fn from(name: String) -> Self {
        Self(Cow::Owned(name))
    }
}

impl From<&Status> for Status {
    fn from(status: &Status) -> Self {
        status.clone()
    }
}

/// Identity of a participant: its type plus a key unique within the engine.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ActorKey {
    pub kind: String,
    pub id: String,
}

impl ActorKey {
    pub fn new(kind: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            id: id.into(),
        }
    }
}

impl fmt::Display for ActorKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind, self.id)
    }
}

/// Anything the engine can address.
///
/// The engine owns the authoritative status, so actors only need to expose
/// their key. Business state stays on the concrete actor type.
pub trait HasKey {
    fn key(&self) -> &ActorKey;
}

impl HasKey for ActorKey {
    fn key(&self) -> &ActorKey {
        self
    }
}

impl<T: HasKey + ?Sized> HasKey for Arc<T> {
    fn key(&self) -> &ActorKey {
        (**self).key()
    }
}

/// Build an action or handler that calls back into an actor through a weak
/// reference, so the engine's tables never keep the actor alive.
///
/// Once the actor is dropped the callback fails with [`EngineError::ActorDropped`].
pub fn bind<T, F>(target: &Arc<T>, f: F) -> impl Fn() -> Result<(), BoxError> + Send + Sync + 'static
where
    T: HasKey + Send + Sync + 'static,
    F: Fn(&T) -> Result<(), BoxError> + Send + Sync + 'static,
{
    let key = target.key().clone();
    let weak: Weak<T> = Arc::downgrade(target);
    move || match weak.upgrade() {
        Some(actor) => f(&actor),
        None => Err(EngineError::ActorDropped(key.clone()).into()),
    }
}
