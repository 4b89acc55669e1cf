//! # Observable Cells
//!
//! A small typed-cell facility used to share motor state and parameters
//! between the stepping engine, its drivers, and external front ends.
//!
//! Each [`Cell`] holds a single value plus an optional validator and a set of
//! subscriptions. Every write carries an [`Agent`] tag naming who made the
//! change, so a UI layer can subscribe to application-made changes without
//! echoing its own edits back to itself.
//!
//! Listeners run synchronously on the writer's thread and must not block.

use parking_lot::Mutex;
use std::fmt::Display;
use std::sync::Arc;
use thiserror::Error;

/// Identity of the party making a change to a cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Agent {
    /// No attribution (initialisation, internal bookkeeping).
    None,
    /// The stepping engine itself.
    App,
    /// An external front end acting for the user.
    User,
}

/// A set of agents a subscription is interested in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AgentSet(u8);

impl AgentSet {
    pub const NONE: AgentSet = AgentSet(0b001);
    pub const APP: AgentSet = AgentSet(0b010);
    pub const USER: AgentSet = AgentSet(0b100);
    /// Every agent, including unattributed writes.
    pub const ALL: AgentSet = AgentSet(0b111);

    pub const fn union(self, other: AgentSet) -> AgentSet {
        AgentSet(self.0 | other.0)
    }

    pub fn contains(self, agent: Agent) -> bool {
        let bit = match agent {
            Agent::None => Self::NONE.0,
            Agent::App => Self::APP.0,
            Agent::User => Self::USER.0,
        };
        self.0 & bit != 0
    }
}

/// Error returned when a write is rejected.
#[derive(Debug, Error)]
pub enum CellError {
    #[error("{cell}: rejected value: {reason}")]
    Invalid { cell: String, reason: String },
}

type Validator<T> = Box<dyn Fn(&T) -> Result<(), String> + Send + Sync>;
type Listener<T> = Box<dyn Fn(&T, &T, Agent) + Send + Sync>;

struct Subscription<T> {
    agents: AgentSet,
    notify: Listener<T>,
}

/// A named observable value.
///
/// Reads clone the current value; writes validate, store, and dispatch change
/// notifications filtered by the writing agent. Writes that do not change the
/// value are not dispatched.
pub struct Cell<T> {
    name: String,
    value: Mutex<T>,
    validator: Option<Validator<T>>,
    subs: Mutex<Vec<Arc<Subscription<T>>>>,
}

impl<T: Clone + PartialEq + Send + 'static> Cell<T> {
    pub fn new(name: impl Into<String>, value: T) -> Self {
        Cell {
            name: name.into(),
            value: Mutex::new(value),
            validator: None,
            subs: Mutex::new(Vec::new()),
        }
    }

    /// Creates a cell whose writes are checked by `validator` before storing.
    pub fn with_validator(
        name: impl Into<String>,
        value: T,
        validator: impl Fn(&T) -> Result<(), String> + Send + Sync + 'static,
    ) -> Self {
        Cell {
            name: name.into(),
            value: Mutex::new(value),
            validator: Some(Box::new(validator)),
            subs: Mutex::new(Vec::new()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn get(&self) -> T {
        self.value.lock().clone()
    }

    /// Validates and stores `value`, dispatching notifications to matching
    /// subscriptions. Returns whether the stored value actually changed.
    pub fn set(&self, value: T, agent: Agent) -> Result<bool, CellError> {
        if let Some(validator) = &self.validator {
            validator(&value).map_err(|reason| CellError::Invalid {
                cell: self.name.clone(),
                reason,
            })?;
        }
        let old = {
            let mut slot = self.value.lock();
            if *slot == value {
                return Ok(false);
            }
            std::mem::replace(&mut *slot, value.clone())
        };
        // Dispatch outside the value lock so listeners can read the cell.
        let subs: Vec<_> = self.subs.lock().iter().cloned().collect();
        for sub in subs {
            if sub.agents.contains(agent) {
                (sub.notify)(&old, &value, agent);
            }
        }
        Ok(true)
    }

    /// Registers `notify` to run (synchronously, on the writer's thread) after
    /// every value change made by an agent in `agents`.
    pub fn subscribe(&self, agents: AgentSet, notify: impl Fn(&T, &T, Agent) + Send + Sync + 'static) {
        self.subs.lock().push(Arc::new(Subscription {
            agents,
            notify: Box::new(notify),
        }));
    }
}

impl<T: Clone + PartialEq + PartialOrd + Display + Send + Sync + 'static> Cell<T> {
    /// Creates a cell that rejects values outside `[min, max]`.
    pub fn bounded(name: impl Into<String>, value: T, min: T, max: T) -> Self {
        Self::with_validator(name, value, move |v| {
            if *v < min || *v > max {
                Err(format!("{v} outside {min}..={max}"))
            } else {
                Ok(())
            }
        })
    }
}

impl<T: std::fmt::Debug> std::fmt::Debug for Cell<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cell")
            .field("name", &self.name)
            .field("value", &*self.value.lock())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn set_stores_and_reports_change() {
        let cell = Cell::new("pos", 0i64);
        assert!(cell.set(5, Agent::App).unwrap());
        assert_eq!(cell.get(), 5);
        // Writing the same value again is not a change.
        assert!(!cell.set(5, Agent::App).unwrap());
    }

    #[test]
    fn validator_rejects_without_side_effect() {
        let cell = Cell::bounded("max_waves", 3u32, 2, 9);
        let err = cell.set(1, Agent::User).unwrap_err();
        assert!(matches!(err, CellError::Invalid { .. }));
        assert_eq!(cell.get(), 3);
    }

    #[test]
    fn listeners_filter_by_agent() {
        let cell = Arc::new(Cell::new("dir", 1i8));
        let app_seen = Arc::new(AtomicUsize::new(0));
        let any_seen = Arc::new(AtomicUsize::new(0));

        let counter = app_seen.clone();
        cell.subscribe(AgentSet::APP, move |_, _, agent| {
            assert_eq!(agent, Agent::App);
            counter.fetch_add(1, Ordering::SeqCst);
        });
        let counter = any_seen.clone();
        cell.subscribe(AgentSet::ALL, move |old, new, _| {
            assert_ne!(old, new);
            counter.fetch_add(1, Ordering::SeqCst);
        });

        cell.set(-1, Agent::User).unwrap();
        cell.set(1, Agent::App).unwrap();
        assert_eq!(app_seen.load(Ordering::SeqCst), 1);
        assert_eq!(any_seen.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn listener_can_read_cell_during_dispatch() {
        let cell = Arc::new(Cell::new("mode", "off".to_string()));
        let inner = cell.clone();
        cell.subscribe(AgentSet::ALL, move |_, new, _| {
            assert_eq!(&inner.get(), new);
        });
        cell.set("stepping".to_string(), Agent::App).unwrap();
    }
}
