use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::actor::{ActorKey, HasKey, Status};
use super::bus::{Handler, Message, MessageBus};
use super::dependency::{Condition, DependencyGate};
use super::lifecycle::Completion;
use super::mailbox::Lane;
use super::registry::{ActorRecord, ActorSnapshot, StatusRegistry, TransitionRecord};
use super::transition::{Action, TransitionTable};
use crate::error::{BoxError, EngineError};

/// What happened to a request that did not fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// The transition action ran and the new status is visible.
    Committed,
    /// The transition is waiting on dependencies and will commit once they hold.
    Deferred,
    /// The target actor was busy; the work will run before it goes idle.
    Queued,
    /// The message handler ran.
    Delivered,
}

/// A committed status change, as seen by observers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusChange {
    pub actor: ActorKey,
    pub from: Status,
    pub to: Status,
    pub at: DateTime<Utc>,
}

type Observer = Arc<dyn Fn(&StatusChange) + Send + Sync>;

struct Root {
    key: ActorKey,
    terminal: Status,
}

struct Inner<M> {
    run_id: Uuid,
    registry: StatusRegistry,
    transitions: TransitionTable,
    gate: DependencyGate,
    bus: MessageBus<M>,
    observers: RwLock<Vec<Observer>>,
    root: Mutex<Option<Root>>,
    completion: Completion,
}

/// Coordination engine shared by every actor of one run.
///
/// Cloning is cheap and yields a handle to the same engine, so actions and
/// worker threads can hold their own copy. Work on behalf of a single actor
/// is serialized; different actors progress in parallel.
pub struct Engine<M> {
    inner: Arc<Inner<M>>,
}

impl<M> Clone for Engine<M> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<M: Message> Default for Engine<M> {
    fn default() -> Self {
        Self::new()
    }
}

impl<M: Message> Engine<M> {
    pub fn new() -> Self {
        let run_id = Uuid::new_v4();
        debug!(%run_id, "Creating engine");
        Self {
            inner: Arc::new(Inner {
                run_id,
                registry: StatusRegistry::default(),
                transitions: TransitionTable::default(),
                gate: DependencyGate::default(),
                bus: MessageBus::default(),
                observers: RwLock::new(Vec::new()),
                root: Mutex::new(None),
                completion: Completion::default(),
            }),
        }
    }

    pub fn run_id(&self) -> Uuid {
        self.inner.run_id
    }

    // ---------------------------------------------------------------- actors

    pub fn register(
        &self,
        actor: &impl HasKey,
        initial: impl Into<Status>,
        terminal: impl Into<Status>,
    ) -> Result<(), EngineError> {
        self.inner.registry.register(actor.key(), initial.into(), terminal.into())
    }

    pub fn status(&self, actor: &impl HasKey) -> Result<Status, EngineError> {
        Ok(self.inner.registry.get(actor.key())?.current())
    }

    /// Every committed transition of `actor`, oldest first.
    pub fn history(&self, actor: &impl HasKey) -> Result<Vec<TransitionRecord>, EngineError> {
        Ok(self.inner.registry.get(actor.key())?.history())
    }

    pub fn snapshot(&self) -> Vec<ActorSnapshot> {
        self.inner.registry.snapshot()
    }

    // ----------------------------------------------------------- transitions

    pub fn add_transition_action<F>(
        &self,
        actor: &impl HasKey,
        from: impl Into<Status>,
        to: impl Into<Status>,
        action: F,
    ) -> Result<(), EngineError>
    where
        F: Fn() -> Result<(), BoxError> + Send + Sync + 'static,
    {
        let key = actor.key();
        self.inner.registry.get(key)?;
        self.inner
            .transitions
            .add(key, from.into(), to.into(), Arc::new(action))
    }

    /// Register several actions at once. Stops at the first duplicate; pairs
    /// registered before it stay registered.
    pub fn add_transition_actions<I>(&self, actor: &impl HasKey, actions: I) -> Result<(), EngineError>
    where
        I: IntoIterator<Item = (Status, Status, Action)>,
    {
        let key = actor.key();
        self.inner.registry.get(key)?;
        for (from, to, action) in actions {
            self.inner.transitions.add(key, from, to, action)?;
        }
        Ok(())
    }

    /// Request that `actor` move to `to`.
    ///
    /// If the actor is idle the transition runs on the calling thread and the
    /// call returns once it has committed (or been deferred). If the actor is
    /// busy, including when the caller is the actor's own running action,
    /// the request is queued and `Outcome::Queued` is returned; it runs before
    /// the actor goes idle and its error, if any, surfaces from the call that
    /// is draining the actor.
    ///
    /// A queued request therefore never reports its own failure to the code
    /// that issued it; that code sees `Ok(Outcome::Queued)` and learns of the
    /// failure only through the draining call's `Err` or the run's outcome.
    pub fn update_status(&self, actor: &impl HasKey, to: impl Into<Status>) -> Result<Outcome, EngineError> {
        let key = actor.key().clone();
        let record = self.inner.registry.get(&key)?;
        let to = to.into();
        let engine = self.clone();
        let target = record.clone();
        record
            .mailbox
            .submit(&key, Lane::Transition, Box::new(move || engine.transition(&target, to)))
    }

    // Runs with the actor claimed: nothing else touches its status meanwhile.
    fn transition(&self, record: &ActorRecord, to: Status) -> Result<Outcome, EngineError> {
        let actor = &record.key;
        let from = record.current();
        let Some(action) = self.inner.transitions.get(actor, &from, &to) else {
            warn!(%actor, %from, %to, "No transition registered");
            return Err(EngineError::UnknownTransition {
                actor: actor.clone(),
                from,
                to,
            });
        };

        if let Some(outstanding) = self.inner.gate.defer_if_blocked(actor, &to) {
            info!(%actor, %from, %to, outstanding, "Transition deferred until dependencies are met");
            return Ok(Outcome::Deferred);
        }

        debug!(%actor, %from, %to, "Running transition action");
        if let Err(source) = action() {
            let dropped = record.mailbox.discard_transitions();
            error!(%actor, %from, %to, error = %source, dropped, "Transition action failed");
            return Err(EngineError::ActionFailed {
                actor: actor.clone(),
                from,
                to,
                source,
            });
        }

        let Some(committed) = record.commit(&from, &to) else {
            // Only the claiming thread commits for this actor.
            return Err(EngineError::UnknownTransition {
                actor: actor.clone(),
                from,
                to,
            });
        };
        info!(%actor, %from, %to, "Status committed");
        self.after_commit(actor, committed)
    }

    fn after_commit(&self, actor: &ActorKey, committed: TransitionRecord) -> Result<Outcome, EngineError> {
        let change = StatusChange {
            actor: actor.clone(),
            from: committed.from,
            to: committed.to,
            at: committed.at,
        };
        let observers = self.inner.observers.read().clone();
        for observer in observers {
            observer(&change);
        }

        let reached_end = self
            .inner
            .root
            .lock()
            .as_ref()
            .is_some_and(|root| &root.key == actor && root.terminal == change.to);
        if reached_end && self.inner.completion.complete() {
            info!(run_id = %self.inner.run_id, %actor, status = %change.to, "Run complete");
        }

        let mut result = Ok(Outcome::Committed);
        for (dependent, dest) in self.inner.gate.on_status(actor, &change.to) {
            debug!(actor = %dependent, to = %dest, trigger = %actor, "Firing deferred transition");
            if let Err(err) = self.update_status(&dependent, dest) {
                if result.is_ok() {
                    result = Err(err);
                } else {
                    warn!(actor = %dependent, error = %err, "Deferred transition failed after an earlier failure");
                }
            }
        }
        result
    }

    // ---------------------------------------------------------- dependencies

    /// Gate `actor`'s transition into `to` on `source` having reached
    /// `required`. A condition on a status the source already passed
    /// through is satisfied immediately.
    pub fn add_dependency(
        &self,
        actor: &impl HasKey,
        to: impl Into<Status>,
        source: &impl HasKey,
        required: impl Into<Status>,
    ) -> Result<(), EngineError> {
        let dependent = actor.key();
        self.inner.registry.get(dependent)?;
        let source_record = self.inner.registry.get(source.key())?;
        let to = to.into();
        let required = required.into();

        self.inner.gate.add(
            dependent,
            &to,
            Condition {
                source: source.key().clone(),
                required: required.clone(),
            },
            || source_record.has_reached(&required),
        );
        Ok(())
    }

    pub fn outstanding_dependencies(&self, actor: &impl HasKey, to: impl Into<Status>) -> Vec<Condition> {
        self.inner.gate.outstanding(actor.key(), &to.into())
    }

    pub fn is_deferred(&self, actor: &impl HasKey, to: impl Into<Status>) -> bool {
        self.inner.gate.is_pending(actor.key(), &to.into())
    }

    // -------------------------------------------------------------- messages

    pub fn register_handler<F>(&self, actor: &impl HasKey, kind: &'static str, handler: F) -> Result<(), EngineError>
    where
        F: Fn(&ActorKey, M) -> Result<(), BoxError> + Send + Sync + 'static,
    {
        let key = actor.key();
        self.inner.registry.get(key)?;
        let handler: Handler<M> = Arc::new(handler);
        self.inner.bus.register(key, kind, handler);
        Ok(())
    }

    /// Deliver `message` from `from` to `to`.
    ///
    /// The handler runs on the calling thread when `to` is idle. Otherwise
    /// the delivery is queued and handled before any queued transition of
    /// `to`. A failed handler drops `to`'s queued transitions, as a failed
    /// action does; when the delivery was queued the sender has already seen
    /// `Outcome::Queued` and the error surfaces from the call draining `to`.
    pub fn send(&self, from: &impl HasKey, to: &impl HasKey, message: M) -> Result<Outcome, EngineError> {
        let target = to.key().clone();
        let record = self.inner.registry.get(&target)?;
        let kind = message.kind();
        let Some(handler) = self.inner.bus.handler(&target, kind) else {
            warn!(actor = %target, kind, sender = %from.key(), "No handler registered, message dropped");
            return Err(EngineError::NoHandlerRegistered { actor: target, kind });
        };

        let sender = from.key().clone();
        let receiver = record.clone();
        record.mailbox.submit(
            &target,
            Lane::Message,
            Box::new(move || -> Result<Outcome, EngineError> {
                let actor = &receiver.key;
                debug!(%actor, kind, %sender, "Delivering message");
                if let Err(source) = handler(&sender, message) {
                    let dropped = receiver.mailbox.discard_transitions();
                    error!(%actor, kind, %sender, error = %source, dropped, "Message handler failed");
                    return Err(EngineError::HandlerFailed {
                        actor: actor.clone(),
                        kind,
                        source,
                    });
                }
                Ok(Outcome::Delivered)
            }),
        )
    }

    // ------------------------------------------------------------- lifecycle

    /// Call `observer` after every committed status change.
    pub fn observe<F>(&self, observer: F)
    where
        F: Fn(&StatusChange) + Send + Sync + 'static,
    {
        self.inner.observers.write().push(Arc::new(observer));
    }

    /// Start the run: `root`'s terminal status marks completion, and its
    /// first transition into `first` is requested on the calling thread.
    pub fn run(&self, root: &impl HasKey, first: impl Into<Status>) -> Result<Outcome, EngineError> {
        let record = self.inner.registry.get(root.key())?;
        {
            let mut slot = self.inner.root.lock();
            if let Some(existing) = slot.as_ref() {
                return Err(EngineError::AlreadyRunning(existing.key.clone()));
            }
            *slot = Some(Root {
                key: record.key.clone(),
                terminal: record.terminal.clone(),
            });
        }
        info!(
            run_id = %self.inner.run_id, root = %record.key, initial = %record.initial,
            terminal = %record.terminal, "Starting run"
        );
        if record.current() == record.terminal {
            self.inner.completion.complete();
            return Ok(Outcome::Committed);
        }
        self.update_status(root, first)
    }

    /// Block until the root reaches its terminal status or the run is aborted.
    pub fn wait(&self) -> Result<(), EngineError> {
        if self.inner.root.lock().is_none() {
            return Err(EngineError::NotRunning);
        }
        self.inner.completion.wait()
    }

    /// Like [`Engine::wait`], but give up after `timeout` and report where
    /// the root is stuck.
    pub fn wait_timeout(&self, timeout: Duration) -> Result<(), EngineError> {
        let root = match self.inner.root.lock().as_ref() {
            Some(root) => root.key.clone(),
            None => return Err(EngineError::NotRunning),
        };
        match self.inner.completion.wait_timeout(timeout) {
            Some(result) => result,
            None => {
                let status = self.status(&root)?;
                warn!(actor = %root, %status, ?timeout, "Run stalled");
                Err(EngineError::Stalled {
                    actor: root,
                    status,
                    waited: timeout,
                })
            }
        }
    }

    /// Fail the run on behalf of `actor`. Waiters are released with
    /// `EngineError::Aborted`. Returns false if the run had already finished.
    pub fn abort(&self, actor: &impl HasKey, error: EngineError) -> bool {
        error!(run_id = %self.inner.run_id, actor = %actor.key(), %error, "Aborting run");
        self.inner.completion.abort(actor.key().clone(), error)
    }

    pub fn is_finished(&self) -> bool {
        self.inner.completion.is_released()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;

    #[derive(Debug)]
    enum TestMessage {
        Note(String),
        Fail,
    }

    impl Message for TestMessage {
        fn kind(&self) -> &'static str {
            match self {
                TestMessage::Note(_) => "note",
                TestMessage::Fail => "fail",
            }
        }
    }

    type TestEngine = Engine<TestMessage>;

    fn key(kind: &str, id: &str) -> ActorKey {
        ActorKey::new(kind, id)
    }

    fn counting(counter: &Arc<AtomicUsize>) -> impl Fn() -> Result<(), BoxError> + Send + Sync + 'static {
        let counter = counter.clone();
        move || {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn noop() -> Result<(), BoxError> {
        Ok(())
    }

    /// Register an actor with a linear chain of no-op transitions.
    fn chain(engine: &TestEngine, actor: &ActorKey, statuses: &[&str]) {
        let terminal = statuses[statuses.len() - 1];
        engine.register(actor, statuses[0], terminal).unwrap();
        for pair in statuses.windows(2) {
            engine.add_transition_action(actor, pair[0], pair[1], noop).unwrap();
        }
    }

    #[test]
    fn unknown_actor_is_rejected() {
        let engine = TestEngine::new();
        let ghost = key("Ghost", "1");
        assert!(matches!(engine.update_status(&ghost, "Go"), Err(EngineError::UnknownActor(_))));
        assert!(matches!(
            engine.add_transition_action(&ghost, "A", "B", noop),
            Err(EngineError::UnknownActor(_))
        ));
    }

    #[test]
    fn duplicate_actor_is_rejected() {
        let engine = TestEngine::new();
        let a = key("Worker", "a");
        engine.register(&a, "Init", "Done").unwrap();
        assert!(matches!(engine.register(&a, "Init", "Done"), Err(EngineError::DuplicateActor(_))));
    }

    #[test]
    fn unregistered_transition_leaves_status_alone() {
        let engine = TestEngine::new();
        let a = key("Worker", "a");
        chain(&engine, &a, &["Init", "Read"]);

        let err = engine.update_status(&a, "Map").unwrap_err();
        assert_eq!(err.to_string(), "No transition Init -> Map registered for Worker:a");
        assert_eq!(engine.status(&a).unwrap(), Status::from("Init"));
    }

    #[test]
    fn action_runs_exactly_once_per_commit() {
        let engine = TestEngine::new();
        let a = key("Worker", "a");
        let runs = Arc::new(AtomicUsize::new(0));
        engine.register(&a, "Init", "Read").unwrap();
        engine.add_transition_action(&a, "Init", "Read", counting(&runs)).unwrap();

        assert_eq!(engine.update_status(&a, "Read").unwrap(), Outcome::Committed);
        assert_eq!(engine.status(&a).unwrap(), Status::from("Read"));

        // Asking again from the new status has no registered pair.
        assert!(matches!(
            engine.update_status(&a, "Read"),
            Err(EngineError::UnknownTransition { .. })
        ));
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn failed_action_does_not_commit_and_drops_queued_requests() {
        let engine = TestEngine::new();
        let a = key("Worker", "a");
        let later = Arc::new(AtomicUsize::new(0));
        engine.register(&a, "Init", "Map").unwrap();

        let inner = engine.clone();
        let target = a.clone();
        engine
            .add_transition_action(&a, "Init", "Read", move || {
                inner.update_status(&target, "Map")?;
                Err("disk on fire".into())
            })
            .unwrap();
        engine.add_transition_action(&a, "Read", "Map", counting(&later)).unwrap();

        let err = engine.update_status(&a, "Read").unwrap_err();
        match &err {
            EngineError::ActionFailed { from, to, source, .. } => {
                assert_eq!(from.as_str(), "Init");
                assert_eq!(to.as_str(), "Read");
                assert_eq!(source.to_string(), "disk on fire");
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(engine.status(&a).unwrap(), Status::from("Init"));
        assert!(engine.history(&a).unwrap().is_empty());
        assert_eq!(later.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn reentrant_requests_run_after_the_outer_commit() {
        let engine = TestEngine::new();
        let a = key("Worker", "a");
        engine.register(&a, "Init", "Reduce").unwrap();

        let seen = Arc::new(Mutex::new(Vec::new()));
        for (from, to, next) in [("Init", "Read", Some("Map")), ("Read", "Map", Some("Reduce")), ("Map", "Reduce", None)] {
            let inner = engine.clone();
            let target = a.clone();
            let seen = seen.clone();
            engine
                .add_transition_action(&a, from, to, move || {
                    // The actor is still in `from` while its action runs.
                    seen.lock().push(inner.status(&target)?);
                    if let Some(next) = next {
                        assert_eq!(inner.update_status(&target, next)?, Outcome::Queued);
                    }
                    Ok(())
                })
                .unwrap();
        }

        assert_eq!(engine.update_status(&a, "Read").unwrap(), Outcome::Committed);
        assert_eq!(engine.status(&a).unwrap(), Status::from("Reduce"));
        let expected: Vec<Status> = vec!["Init".into(), "Read".into(), "Map".into()];
        assert_eq!(*seen.lock(), expected);
        let path: Vec<String> = engine
            .history(&a)
            .unwrap()
            .into_iter()
            .map(|r| format!("{}->{}", r.from, r.to))
            .collect();
        assert_eq!(path, vec!["Init->Read", "Read->Map", "Map->Reduce"]);
    }

    #[test]
    fn dependency_registered_before_source_defers_then_fires() {
        let engine = TestEngine::new();
        let director = key("Director", "Main");
        let worker = key("Worker", "a");
        let combines = Arc::new(AtomicUsize::new(0));
        engine.register(&director, "MapReduce", "Combine").unwrap();
        engine
            .add_transition_action(&director, "MapReduce", "Combine", counting(&combines))
            .unwrap();
        chain(&engine, &worker, &["Init", "Reduce"]);
        engine.add_dependency(&director, "Combine", &worker, "Reduce").unwrap();

        assert_eq!(engine.update_status(&director, "Combine").unwrap(), Outcome::Deferred);
        assert_eq!(engine.status(&director).unwrap(), Status::from("MapReduce"));
        assert!(engine.is_deferred(&director, "Combine"));
        assert_eq!(combines.load(Ordering::SeqCst), 0);

        engine.update_status(&worker, "Reduce").unwrap();
        assert_eq!(engine.status(&director).unwrap(), Status::from("Combine"));
        assert_eq!(combines.load(Ordering::SeqCst), 1);
        assert!(engine.outstanding_dependencies(&director, "Combine").is_empty());
    }

    #[test]
    fn dependency_on_status_already_reached_is_satisfied_immediately() {
        let engine = TestEngine::new();
        let director = key("Director", "Main");
        let worker = key("Worker", "a");
        chain(&engine, &director, &["MapReduce", "Combine"]);
        chain(&engine, &worker, &["Init", "Reduce"]);

        engine.update_status(&worker, "Reduce").unwrap();
        engine.add_dependency(&director, "Combine", &worker, "Reduce").unwrap();

        assert_eq!(engine.update_status(&director, "Combine").unwrap(), Outcome::Committed);
    }

    #[test]
    fn dependency_on_status_passed_through_counts_as_met() {
        let engine = TestEngine::new();
        let director = key("Director", "Main");
        let worker = key("Worker", "a");
        chain(&engine, &director, &["MapReduce", "Combine"]);
        chain(&engine, &worker, &["Init", "Read", "Reduce"]);

        engine.update_status(&worker, "Read").unwrap();
        engine.update_status(&worker, "Reduce").unwrap();
        engine.add_dependency(&director, "Combine", &worker, "Read").unwrap();

        assert_eq!(engine.update_status(&director, "Combine").unwrap(), Outcome::Committed);
    }

    #[test]
    fn gate_waits_for_every_condition() {
        let engine = TestEngine::new();
        let director = key("Director", "Main");
        let combines = Arc::new(AtomicUsize::new(0));
        engine.register(&director, "MapReduce", "Combine").unwrap();
        engine
            .add_transition_action(&director, "MapReduce", "Combine", counting(&combines))
            .unwrap();

        let workers: Vec<ActorKey> = ["a", "b", "c"].iter().map(|id| key("Worker", id)).collect();
        for worker in &workers {
            chain(&engine, worker, &["Init", "Reduce"]);
            engine.add_dependency(&director, "Combine", worker, "Reduce").unwrap();
        }
        assert_eq!(engine.update_status(&director, "Combine").unwrap(), Outcome::Deferred);

        engine.update_status(&workers[0], "Reduce").unwrap();
        engine.update_status(&workers[1], "Reduce").unwrap();
        assert_eq!(engine.status(&director).unwrap(), Status::from("MapReduce"));
        let outstanding = engine.outstanding_dependencies(&director, "Combine");
        assert_eq!(outstanding.len(), 1);
        assert_eq!(outstanding[0].source, workers[2]);

        engine.update_status(&workers[2], "Reduce").unwrap();
        assert_eq!(engine.status(&director).unwrap(), Status::from("Combine"));
        assert_eq!(combines.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn dependency_added_after_deferral_joins_the_gate() {
        let engine = TestEngine::new();
        let director = key("Director", "Main");
        let a = key("Worker", "a");
        let b = key("Worker", "b");
        chain(&engine, &director, &["MapReduce", "Combine"]);
        chain(&engine, &a, &["Init", "Reduce"]);
        chain(&engine, &b, &["Init", "Reduce"]);

        engine.add_dependency(&director, "Combine", &a, "Reduce").unwrap();
        assert_eq!(engine.update_status(&director, "Combine").unwrap(), Outcome::Deferred);
        engine.add_dependency(&director, "Combine", &b, "Reduce").unwrap();

        engine.update_status(&a, "Reduce").unwrap();
        assert_eq!(engine.status(&director).unwrap(), Status::from("MapReduce"));
        engine.update_status(&b, "Reduce").unwrap();
        assert_eq!(engine.status(&director).unwrap(), Status::from("Combine"));
    }

    #[test]
    fn deferred_transition_failure_surfaces_to_the_trigger() {
        let engine = TestEngine::new();
        let director = key("Director", "Main");
        let worker = key("Worker", "a");
        engine.register(&director, "MapReduce", "Combine").unwrap();
        engine
            .add_transition_action(&director, "MapReduce", "Combine", || Err("no counts".into()))
            .unwrap();
        chain(&engine, &worker, &["Init", "Reduce"]);
        engine.add_dependency(&director, "Combine", &worker, "Reduce").unwrap();
        engine.update_status(&director, "Combine").unwrap();

        let err = engine.update_status(&worker, "Reduce").unwrap_err();
        assert!(matches!(err, EngineError::ActionFailed { ref actor, .. } if *actor == director));
        // The worker's own commit stands.
        assert_eq!(engine.status(&worker).unwrap(), Status::from("Reduce"));
        assert_eq!(engine.status(&director).unwrap(), Status::from("MapReduce"));
    }

    #[test]
    fn messages_reach_the_registered_handler() {
        let engine = TestEngine::new();
        let a = key("Worker", "a");
        let b = key("Worker", "b");
        engine.register(&a, "Init", "Done").unwrap();
        engine.register(&b, "Init", "Done").unwrap();

        let inbox = Arc::new(Mutex::new(Vec::new()));
        let sink = inbox.clone();
        engine
            .register_handler(&b, "note", move |from: &ActorKey, message: TestMessage| {
                if let TestMessage::Note(text) = message {
                    sink.lock().push((from.clone(), text));
                }
                Ok(())
            })
            .unwrap();

        let outcome = engine.send(&a, &b, TestMessage::Note("hi".into())).unwrap();
        assert_eq!(outcome, Outcome::Delivered);
        assert_eq!(*inbox.lock(), vec![(a.clone(), "hi".to_string())]);

        let err = engine.send(&a, &b, TestMessage::Fail).unwrap_err();
        assert!(matches!(err, EngineError::NoHandlerRegistered { kind: "fail", .. }));
        let err = engine.send(&a, &key("Ghost", "x"), TestMessage::Fail).unwrap_err();
        assert!(matches!(err, EngineError::UnknownActor(_)));
    }

    #[test]
    fn handler_failure_is_reported() {
        let engine = TestEngine::new();
        let a = key("Worker", "a");
        engine.register(&a, "Init", "Done").unwrap();
        engine
            .register_handler(&a, "fail", |_: &ActorKey, _: TestMessage| Err("rejected".into()))
            .unwrap();

        let err = engine.send(&a, &a, TestMessage::Fail).unwrap_err();
        assert!(matches!(err, EngineError::HandlerFailed { kind: "fail", .. }));
    }

    #[test]
    fn failed_queued_delivery_drops_the_gated_transition() {
        let engine = TestEngine::new();
        let director = key("Director", "Main");
        let worker = key("Worker", "a");
        engine.register(&director, "Init", "Combine").unwrap();
        chain(&engine, &worker, &["Init", "Reduce"]);
        engine.add_dependency(&director, "Combine", &worker, "Reduce").unwrap();
        engine
            .register_handler(&director, "fail", |_: &ActorKey, _: TestMessage| Err("handler broke".into()))
            .unwrap();

        let inner = engine.clone();
        let (me, from) = (director.clone(), worker.clone());
        engine
            .add_transition_action(&director, "Init", "Work", move || {
                assert_eq!(inner.send(&from, &me, TestMessage::Fail)?, Outcome::Queued);
                assert_eq!(inner.update_status(&me, "Combine")?, Outcome::Queued);
                assert_eq!(inner.update_status(&from, "Reduce")?, Outcome::Committed);
                Ok(())
            })
            .unwrap();
        let combines = Arc::new(AtomicUsize::new(0));
        engine
            .add_transition_action(&director, "Work", "Combine", counting(&combines))
            .unwrap();

        let err = engine.update_status(&director, "Work").unwrap_err();
        assert!(matches!(err, EngineError::HandlerFailed { kind: "fail", .. }));
        assert_eq!(engine.status(&director).unwrap(), Status::from("Work"));
        assert_eq!(engine.status(&worker).unwrap(), Status::from("Reduce"));
        assert_eq!(combines.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn message_to_busy_actor_is_delivered_before_its_queued_transition() {
        let engine = TestEngine::new();
        let a = key("Worker", "a");
        engine.register(&a, "Init", "Done").unwrap();

        let order = Arc::new(Mutex::new(Vec::new()));
        let handled = order.clone();
        engine
            .register_handler(&a, "note", move |_: &ActorKey, _: TestMessage| {
                handled.lock().push("message");
                Ok(())
            })
            .unwrap();

        let inner = engine.clone();
        let target = a.clone();
        engine
            .add_transition_action(&a, "Init", "Work", move || {
                inner.update_status(&target, "Done")?;
                assert_eq!(inner.send(&target, &target, TestMessage::Note("x".into()))?, Outcome::Queued);
                Ok(())
            })
            .unwrap();
        let finished = order.clone();
        engine
            .add_transition_action(&a, "Work", "Done", move || {
                finished.lock().push("transition");
                Ok(())
            })
            .unwrap();

        engine.update_status(&a, "Work").unwrap();
        assert_eq!(*order.lock(), vec!["message", "transition"]);
        assert_eq!(engine.status(&a).unwrap(), Status::from("Done"));
    }

    #[test]
    fn observers_see_every_commit() {
        let engine = TestEngine::new();
        let a = key("Worker", "a");
        chain(&engine, &a, &["Init", "Read", "Map"]);

        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        engine.observe(move |change| sink.lock().push(change.to.to_string()));

        engine.update_status(&a, "Read").unwrap();
        engine.update_status(&a, "Map").unwrap();
        assert_eq!(*seen.lock(), vec!["Read", "Map"]);
    }

    #[test]
    fn wait_requires_a_started_run() {
        let engine = TestEngine::new();
        assert!(matches!(engine.wait(), Err(EngineError::NotRunning)));
        assert!(matches!(
            engine.wait_timeout(Duration::from_millis(1)),
            Err(EngineError::NotRunning)
        ));
    }

    #[test]
    fn run_completes_when_root_reaches_terminal() {
        let engine = TestEngine::new();
        let root = key("Director", "Main");
        chain(&engine, &root, &["Init", "Work", "Done"]);

        let inner = engine.clone();
        let target = root.clone();
        engine.observe(move |change| {
            if change.to.as_str() == "Work" {
                inner.update_status(&target, "Done").unwrap();
            }
        });

        engine.run(&root, "Work").unwrap();
        engine.wait().unwrap();
        assert!(engine.is_finished());
        assert!(matches!(engine.run(&root, "Work"), Err(EngineError::AlreadyRunning(_))));
    }

    #[test]
    fn stalled_run_reports_root_status() {
        let engine = TestEngine::new();
        let root = key("Director", "Main");
        let worker = key("Worker", "a");
        chain(&engine, &root, &["Init", "Combine", "Done"]);
        chain(&engine, &worker, &["Init", "Reduce"]);
        engine.add_dependency(&root, "Combine", &worker, "Reduce").unwrap();

        assert_eq!(engine.run(&root, "Combine").unwrap(), Outcome::Deferred);
        let err = engine.wait_timeout(Duration::from_millis(20)).unwrap_err();
        assert!(matches!(
            err,
            EngineError::Stalled { ref actor, ref status, .. } if *actor == root && status.as_str() == "Init"
        ));
    }

    #[test]
    fn abort_releases_waiters_with_the_cause() {
        let engine = TestEngine::new();
        let root = key("Director", "Main");
        let worker = key("Worker", "a");
        chain(&engine, &root, &["Init", "Combine"]);
        chain(&engine, &worker, &["Init", "Reduce"]);
        engine.add_dependency(&root, "Combine", &worker, "Reduce").unwrap();
        engine.run(&root, "Combine").unwrap();

        let aborter = engine.clone();
        let failing = worker.clone();
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(10));
            aborter.abort(&failing, EngineError::ActorDropped(failing.clone()));
        });

        let err = engine.wait().unwrap_err();
        handle.join().unwrap();
        assert!(matches!(err, EngineError::Aborted { ref actor, .. } if *actor == worker));
        assert!(std::error::Error::source(&err).is_some());
        assert_eq!(engine.status(&root).unwrap(), Status::from("Init"));
    }

    #[test]
    fn concurrent_requests_commit_once() {
        let engine = TestEngine::new();
        let a = key("Worker", "a");
        let runs = Arc::new(AtomicUsize::new(0));
        engine.register(&a, "Init", "Read").unwrap();
        engine.add_transition_action(&a, "Init", "Read", counting(&runs)).unwrap();

        thread::scope(|scope| {
            for _ in 0..8 {
                scope.spawn(|| {
                    let _ = engine.update_status(&a, "Read");
                });
            }
        });

        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert_eq!(engine.status(&a).unwrap(), Status::from("Read"));
        assert_eq!(engine.history(&a).unwrap().len(), 1);
    }

    #[test]
    fn fan_in_across_threads_fires_deferred_transition_once() {
        let engine = TestEngine::new();
        let director = key("Director", "Main");
        let combines = Arc::new(AtomicUsize::new(0));
        engine.register(&director, "MapReduce", "Done").unwrap();
        engine
            .add_transition_action(&director, "MapReduce", "Combine", counting(&combines))
            .unwrap();
        let inner = engine.clone();
        let target = director.clone();
        engine
            .add_transition_action(&director, "Combine", "Done", move || {
                assert_eq!(inner.status(&target)?, Status::from("Combine"));
                Ok(())
            })
            .unwrap();
        let finisher = engine.clone();
        let root = director.clone();
        engine.observe(move |change| {
            if change.actor == root && change.to.as_str() == "Combine" {
                let _ = finisher.update_status(&root, "Done");
            }
        });

        let workers: Vec<ActorKey> = (0..16).map(|i| key("Worker", &i.to_string())).collect();
        for worker in &workers {
            chain(&engine, worker, &["Init", "Read", "Map", "Reduce"]);
            engine.add_dependency(&director, "Combine", worker, "Reduce").unwrap();
        }

        let outcome = engine.run(&director, "Combine").unwrap();
        assert_eq!(outcome, Outcome::Deferred);

        thread::scope(|scope| {
            for worker in &workers {
                let engine = engine.clone();
                scope.spawn(move || {
                    for status in ["Read", "Map", "Reduce"] {
                        engine.update_status(worker, status).unwrap();
                    }
                });
            }
        });

        engine.wait_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(combines.load(Ordering::SeqCst), 1);
        assert_eq!(engine.status(&director).unwrap(), Status::from("Done"));
        assert!(engine.snapshot().iter().all(|s| s.complete));
    }
}
