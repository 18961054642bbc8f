use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

use crate::state_machine::{ActorKey, Status};

/// Error type returned by transition actions and message handlers.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Actor already registered: {0}")]
    DuplicateActor(ActorKey),

    #[error("Actor not registered: {0}")]
    UnknownActor(ActorKey),

    #[error("Transition {from} -> {to} already registered for {actor}")]
    DuplicateTransition {
        actor: ActorKey,
        from: Status,
        to: Status,
    },

    #[error("No transition {from} -> {to} registered for {actor}")]
    UnknownTransition {
        actor: ActorKey,
        from: Status,
        to: Status,
    },

    #[error("Transition {from} -> {to} failed for {actor}: {source}")]
    ActionFailed {
        actor: ActorKey,
        from: Status,
        to: Status,
        #[source]
        source: BoxError,
    },

    #[error("No handler for message `{kind}` on {actor}")]
    NoHandlerRegistered { actor: ActorKey, kind: &'static str },

    #[error("Handler for message `{kind}` on {actor} failed: {source}")]
    HandlerFailed {
        actor: ActorKey,
        kind: &'static str,
        #[source]
        source: BoxError,
    },

    #[error("Actor {0} has been dropped")]
    ActorDropped(ActorKey),

    #[error("Run already started with root {0}")]
    AlreadyRunning(ActorKey),

    #[error("No run has been started")]
    NotRunning,

    #[error("{actor} stalled in status {status} after {waited:?}")]
    Stalled {
        actor: ActorKey,
        status: Status,
        waited: Duration,
    },

    #[error("{actor} panicked: {message}")]
    Panicked { actor: ActorKey, message: String },

    #[error("Run aborted by {actor}: {source}")]
    Aborted {
        actor: ActorKey,
        #[source]
        source: Arc<EngineError>,
    },
}

impl EngineError {
    /// The actor whose own transition or handler produced this error.
    pub fn failed_actor(&self) -> Option<&ActorKey> {
        match self {
            EngineError::UnknownTransition { actor, .. }
            | EngineError::ActionFailed { actor, .. }
            | EngineError::HandlerFailed { actor, .. }
            | EngineError::Panicked { actor, .. } => Some(actor),
            _ => None,
        }
    }

    /// Walk the `source()` chain looking for an error of type `E`.
    pub fn find_cause<E: std::error::Error + 'static>(&self) -> Option<&E> {
        let mut current: Option<&(dyn std::error::Error + 'static)> = Some(self);
        while let Some(err) = current {
            if let Some(found) = err.downcast_ref::<E>() {
                return Some(found);
            }
            current = err.source();
        }
        None
    }
}

/// Failures raised by the word-count pipeline built on the engine.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Failed to read source {path}: {source}")]
    SourceReadFailure {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Counts missing from {} of {expected} sources: {}", .missing.len(), .missing.join(", "))]
    IncompleteCounts { expected: usize, missing: Vec<String> },

    #[error("Failed to write output: {0}")]
    Output(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
