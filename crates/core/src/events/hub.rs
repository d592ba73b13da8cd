//! Enumeration-keyed publish/subscribe hub
//!
//! Each hub owns a fixed dispatch table with one listener set per event kind.
//! The table is built once at construction and never resized; only the sets
//! behind it change.
//!
//! ## Emission
//!
//! `emit` snapshots the listener set for a kind, releases the lock and then
//! invokes every listener synchronously on the calling thread. Listeners may
//! therefore add or remove listeners (including themselves) while being
//! invoked; such changes apply from the next emission on.
//!
//! Each invocation is isolated with `catch_unwind`: a panicking listener is
//! logged and counted in the returned [`EmitReport`], and the remaining
//! listeners still run.

use std::collections::HashMap;
use std::fmt;
use std::hash::Hash;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{trace, warn};

use crate::{CoreError, Result};

/// A closed, statically known set of event identifiers
pub trait EventKind: Copy + Eq + Hash + fmt::Debug + Send + Sync + 'static {
    /// Every variant of the set
    const ALL: &'static [Self];
}

type Callback<K, P> = dyn Fn(&EventHub<K, P>, Option<&P>) + Send + Sync;

/// Shared event callback
///
/// Identity is the identity of the shared callback: clones of a `Listener`
/// are the same listener, two listeners built from identical closures are not.
pub struct Listener<K: EventKind, P> {
    callback: Arc<Callback<K, P>>,
}

impl<K: EventKind, P> Listener<K, P> {
    pub fn new<F>(callback: F) -> Self
    where
        F: Fn(&EventHub<K, P>, Option<&P>) + Send + Sync + 'static,
    {
        Self {
            callback: Arc::new(callback),
        }
    }

    fn call(&self, hub: &EventHub<K, P>, payload: Option<&P>) {
        (self.callback)(hub, payload)
    }
}

impl<K: EventKind, P> Clone for Listener<K, P> {
    fn clone(&self) -> Self {
        Self {
            callback: Arc::clone(&self.callback),
        }
    }
}

impl<K: EventKind, P> PartialEq for Listener<K, P> {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.callback, &other.callback)
    }
}

impl<K: EventKind, P> Eq for Listener<K, P> {}

impl<K: EventKind, P> fmt::Debug for Listener<K, P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Listener")
            .field("id", &Arc::as_ptr(&self.callback).cast::<()>())
            .finish()
    }
}

/// Outcome of one emission
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EmitReport {
    /// Listeners that returned normally
    pub delivered: usize,
    /// Listeners that panicked
    pub failed: usize,
}

impl EmitReport {
    pub fn is_clean(&self) -> bool {
        self.failed == 0
    }
}

/// Type-safe publish/subscribe registry keyed by `K`
///
/// `P` is the payload type handed to listeners. Registration and emission may
/// happen from different threads.
pub struct EventHub<K: EventKind, P> {
    listeners: HashMap<K, Mutex<Vec<Listener<K, P>>>>,
}

impl<K: EventKind, P> EventHub<K, P> {
    /// Create a hub with one empty listener set per variant of `K`
    pub fn new() -> Result<Self> {
        Self::with_kinds(K::ALL.iter().copied())
    }

    /// Create a hub for an explicit set of kinds
    ///
    /// Fails if `kinds` is empty.
    pub fn with_kinds(kinds: impl IntoIterator<Item = K>) -> Result<Self> {
        let listeners: HashMap<_, _> = kinds
            .into_iter()
            .map(|kind| (kind, Mutex::new(Vec::new())))
            .collect();

        if listeners.is_empty() {
            return Err(CoreError::InvalidArgument(
                "an event hub needs at least one event kind".to_string(),
            ));
        }

        Ok(Self { listeners })
    }

    /// Kinds this hub dispatches
    pub fn kinds(&self) -> impl Iterator<Item = K> + '_ {
        self.listeners.keys().copied()
    }

    /// Register `listener` for `kind`
    ///
    /// Returns `Ok(false)` if that listener instance is already registered.
    pub fn add_listener(&self, kind: K, listener: &Listener<K, P>) -> Result<bool> {
        let mut set = self.lock_set(kind)?;
        if set.contains(listener) {
            return Ok(false);
        }
        set.push(listener.clone());
        trace!(?kind, count = set.len(), "listener added");
        Ok(true)
    }

    /// Unregister `listener` from `kind`; `true` if it was registered
    pub fn remove_listener(&self, kind: K, listener: &Listener<K, P>) -> bool {
        let Ok(mut set) = self.lock_set(kind) else {
            return false;
        };
        match set.iter().position(|l| l == listener) {
            Some(idx) => {
                set.swap_remove(idx);
                trace!(?kind, count = set.len(), "listener removed");
                true
            }
            None => false,
        }
    }

    /// Number of listeners currently registered for `kind`
    pub fn listener_count(&self, kind: K) -> usize {
        self.lock_set(kind).map(|set| set.len()).unwrap_or(0)
    }

    /// Emit `kind` without a payload
    pub fn emit(&self, kind: K) -> Result<EmitReport> {
        self.dispatch(kind, None)
    }

    /// Emit `kind` with `payload`
    pub fn emit_with(&self, kind: K, payload: &P) -> Result<EmitReport> {
        self.dispatch(kind, Some(payload))
    }

    fn dispatch(&self, kind: K, payload: Option<&P>) -> Result<EmitReport> {
        let snapshot = self.lock_set(kind)?.clone();
        let mut report = EmitReport::default();

        for listener in &snapshot {
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| listener.call(self, payload)));
            match outcome {
                Ok(()) => report.delivered += 1,
                Err(cause) => {
                    report.failed += 1;
                    warn!(?kind, reason = panic_message(&*cause), "listener panicked during emit");
                }
            }
        }

        Ok(report)
    }

    fn lock_set(&self, kind: K) -> Result<MutexGuard<'_, Vec<Listener<K, P>>>> {
        let set = self.listeners.get(&kind).ok_or_else(|| {
            CoreError::InvalidArgument(format!("event kind {:?} is not handled by this hub", kind))
        })?;
        // A poisoned set only means a panic happened while it was locked;
        // the Vec itself is still consistent.
        Ok(set.lock().unwrap_or_else(|poisoned| poisoned.into_inner()))
    }
}

impl<K: EventKind, P> fmt::Debug for EventHub<K, P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut map = f.debug_map();
        for kind in self.listeners.keys() {
            map.entry(kind, &self.listener_count(*kind));
        }
        map.finish()
    }
}

fn panic_message(cause: &(dyn std::any::Any + Send)) -> &str {
    if let Some(s) = cause.downcast_ref::<&'static str>() {
        s
    } else if let Some(s) = cause.downcast_ref::<String>() {
        s.as_str()
    } else {
        "non-string panic payload"
    }
}
