//! Cross-actor dependency gates.
//!
//! A gate belongs to a `(dependent actor, destination status)` pair and
//! counts the conditions that still have to hold before a transition into
//! that status may commit. Conditions are conjunctive. Each registered
//! condition is satisfied at most once: either immediately, when its source
//! actor has already reached the required status, or later, when the engine
//! reports that status change.
//!
//! A transition requested while its gate is closed is remembered as pending
//! and handed back to the engine exactly once, when the last outstanding
//! condition is satisfied.

use std::collections::HashMap;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::actor::{ActorKey, Status};

/// A condition on another actor: `source` must reach `required`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Condition {
    pub source: ActorKey,
    pub required: Status,
}

/// `(actor, destination)` identifying one gate.
pub(crate) type GateKey = (ActorKey, Status);

#[derive(Debug, Default)]
struct Gate {
    outstanding: usize,
    pending: bool,
}

#[derive(Default)]
struct Tables {
    gates: HashMap<GateKey, Gate>,
    // (source, required) -> gates waiting on it, one entry per registered condition
    watchers: HashMap<(ActorKey, Status), Vec<GateKey>>,
}

#[derive(Default)]
pub(crate) struct DependencyGate {
    tables: Mutex<Tables>,
}

impl DependencyGate {
    /// Register `condition` on the gate for `(dependent, to)`.
    ///
    /// `already_met` is evaluated while the gate lock is held, so a status
    /// change racing with registration is either seen here or delivered
    /// through [`DependencyGate::on_status`], never lost. Returns true when
    /// the condition was satisfied on the spot.
    pub(crate) fn add(
        &self,
        dependent: &ActorKey,
        to: &Status,
        condition: Condition,
        already_met: impl FnOnce() -> bool,
    ) -> bool {
        let mut tables = self.tables.lock();
        let gate_key = (dependent.clone(), to.clone());
        // Make sure the gate exists even when the condition is already met.
        let gate = tables.gates.entry(gate_key.clone()).or_default();

        if already_met() {
            debug!(
                actor = %dependent, %to, source = %condition.source, required = %condition.required,
                "Dependency already satisfied at registration"
            );
            return true;
        }

        gate.outstanding += 1;
        let outstanding = gate.outstanding;
        let pending = gate.pending;
        tables
            .watchers
            .entry((condition.source.clone(), condition.required.clone()))
            .or_default()
            .push(gate_key);
        debug!(
            actor = %dependent, %to, source = %condition.source, required = %condition.required,
            outstanding, pending, "Dependency registered"
        );
        false
    }

    /// If the gate for `(actor, to)` still has outstanding conditions, mark the
    /// transition pending and return the outstanding count.
    pub(crate) fn defer_if_blocked(&self, actor: &ActorKey, to: &Status) -> Option<usize> {
        let mut tables = self.tables.lock();
        let gate = tables.gates.get_mut(&(actor.clone(), to.clone()))?;
        if gate.outstanding == 0 {
            return None;
        }
        gate.pending = true;
        Some(gate.outstanding)
    }

    /// Record that `source` reached `status`. Returns the pending transitions
    /// whose gates just opened; each is returned once and its pending mark is
    /// cleared.
    pub(crate) fn on_status(&self, source: &ActorKey, status: &Status) -> Vec<GateKey> {
        let mut tables = self.tables.lock();
        let Some(waiting) = tables.watchers.remove(&(source.clone(), status.clone())) else {
            return Vec::new();
        };

        let mut ready = Vec::new();
        for gate_key in waiting {
            let Some(gate) = tables.gates.get_mut(&gate_key) else {
                continue;
            };
            gate.outstanding = gate.outstanding.saturating_sub(1);
            debug!(
                actor = %gate_key.0, to = %gate_key.1, %source, %status,
                outstanding = gate.outstanding, "Dependency satisfied"
            );
            if gate.outstanding == 0 && gate.pending {
                gate.pending = false;
                ready.push(gate_key);
            }
        }
        ready
    }

    /// Conditions still blocking the gate for `(actor, to)`.
    pub(crate) fn outstanding(&self, actor: &ActorKey, to: &Status) -> Vec<Condition> {
        let tables = self.tables.lock();
        let gate_key = (actor.clone(), to.clone());
        let wanted = &gate_key;
        let mut conditions: Vec<Condition> = tables
            .watchers
            .iter()
            .flat_map(move |((source, required), gates)| {
                gates.iter().filter(move |g| *g == wanted).map(move |_| Condition {
                    source: source.clone(),
                    required: required.clone(),
                })
            })
            .collect();
        conditions.sort_by(|a, b| a.source.cmp(&b.source).then_with(|| a.required.cmp(&b.required)));
        conditions
    }

    pub(crate) fn is_pending(&self, actor: &ActorKey, to: &Status) -> bool {
        self.tables
            .lock()
            .gates
            .get(&(actor.clone(), to.clone()))
            .is_some_and(|g| g.pending)
    }
}
