//! Status-transition coordination engine.
//!
//! Actors register under an [`ActorKey`] with an initial and a terminal
//! [`Status`]. Moving an actor between two statuses runs the action
//! registered for that pair, and the new status becomes visible only after
//! the action succeeds. A transition may be gated on other actors having
//! reached given statuses; such a request is deferred and committed later,
//! exactly once, by whichever status change satisfies the last condition.
//! Actors can also exchange typed messages through per-kind handlers.

mod actor;
mod bus;
mod dependency;
mod engine;
mod lifecycle;
mod mailbox;
mod registry;
mod transition;

pub use actor::{ActorKey, HasKey, Status, bind};
pub use bus::{Handler, Message};
pub use dependency::Condition;
pub use engine::{Engine, Outcome, StatusChange};
pub use registry::{ActorSnapshot, TransitionRecord};
pub use transition::Action;
