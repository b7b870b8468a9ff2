//! Signal Registry (spec §3, §4.1).
//!
//! Named booleans with direction and optional active-low polarity, FIFO
//! subscriber notification, and a deferred-write queue so a subscriber
//! callback can toggle further signals without ever recursing back into
//! the dispatch loop it is currently running inside.

use std::collections::{BTreeMap, VecDeque};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Error;

/// Who owns writes to a signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    /// Asserted by the AMHS peer; written only by the transport layer.
    InputFromPeer,
    /// Asserted by this equipment; written only by the state machine.
    OutputToPeer,
    /// Reflects internal load-port state; written by the load port
    /// coordinator.
    Internal,
}

/// Opaque handle into the registry. Cheap to copy, stable for the life of
/// the registry that issued it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SignalHandle(u32);

/// Capability proving the holder is the authorized writer for a signal.
/// Obtained via [`SignalRegistry::claim_writer`]; the only way to call
/// [`SignalRegistry::write`].
#[derive(Debug, Clone, Copy)]
pub struct WriteToken {
    handle: SignalHandle,
}

impl WriteToken {
    pub fn handle(&self) -> SignalHandle {
        self.handle
    }
}

/// Identifies a subscription so it can later be removed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SubscriptionId(u64);

/// A single named boolean signal.
#[derive(Debug, Clone)]
struct SignalRecord {
    name: String,
    direction: Direction,
    active_low: bool,
    level: bool,
    last_change: DateTime<Utc>,
}

/// Consistent, read-only view of one signal for diagnostics/JSON output.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignalSnapshot {
    pub direction: Direction,
    pub active_low: bool,
    pub level: bool,
    pub last_change: DateTime<Utc>,
}

/// Delivered to subscribers on a real (edge-triggered) level change.
#[derive(Debug, Clone)]
pub struct SignalChangeEvent {
    pub handle: SignalHandle,
    pub name: String,
    pub level: bool,
    pub at: DateTime<Utc>,
}

impl SignalChangeEvent {
    pub fn rising(&self) -> bool {
        self.level
    }

    pub fn falling(&self) -> bool {
        !self.level
    }
}

/// Handed to a subscriber callback in place of direct registry access. Any
/// write made here is queued, never applied synchronously, which is what
/// keeps dispatch depth bounded to one level (spec §4.1, §9).
pub struct DeferredWrites<'a> {
    queue: &'a mut VecDeque<(SignalHandle, bool)>,
}

impl<'a> DeferredWrites<'a> {
    pub fn push(&mut self, token: &WriteToken, level: bool) {
        self.queue.push_back((token.handle, level));
    }
}

type Callback = Box<dyn FnMut(&SignalChangeEvent, &mut DeferredWrites) + Send>;

struct Subscription {
    id: SubscriptionId,
    callback: Callback,
}

/// FIFO-ordered per-signal subscriber lists. Owned by [`SignalRegistry`];
/// kept in its own type to match the spec's "Callback Dispatcher" as a
/// distinct component from the registry's storage.
#[derive(Default)]
struct Dispatcher {
    subs_by_signal: BTreeMap<String, Vec<Subscription>>,
    next_id: u64,
}

impl Dispatcher {
    fn subscribe(&mut self, signal: &str, callback: Callback) -> SubscriptionId {
        let id = SubscriptionId(self.next_id);
        self.next_id += 1;
        self.subs_by_signal
            .entry(signal.to_string())
            .or_default()
            .push(Subscription { id, callback });
        id
    }

    fn unsubscribe(&mut self, id: SubscriptionId) {
        for subs in self.subs_by_signal.values_mut() {
            subs.retain(|s| s.id != id);
        }
    }

    /// Remove a signal's subscriber list so it can be iterated without
    /// holding a borrow of `self` — the trick that lets callbacks take a
    /// fresh `&mut SignalRegistry`-free deferred-write handle without
    /// ever aliasing the dispatcher's own storage.
    fn take(&mut self, signal: &str) -> Vec<Subscription> {
        self.subs_by_signal.remove(signal).unwrap_or_default()
    }

    fn restore(&mut self, signal: &str, subs: Vec<Subscription>) {
        if !subs.is_empty() {
            self.subs_by_signal.insert(signal.to_string(), subs);
        }
    }
}

/// Named boolean signals with observer notification (spec §4.1).
pub struct SignalRegistry {
    signals: Vec<SignalRecord>,
    names: BTreeMap<String, SignalHandle>,
    dispatcher: Dispatcher,
    /// True while subscriber callbacks for the current write are running.
    dispatching: bool,
    /// Writes requested by a callback while `dispatching` was true. Drained
    /// (as fresh top-level writes, one at a time) once the outermost write
    /// call returns control to `write`/`apply`.
    deferred: VecDeque<(SignalHandle, bool)>,
}

impl Default for SignalRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl SignalRegistry {
    pub fn new() -> Self {
        Self {
            signals: Vec::new(),
            names: BTreeMap::new(),
            dispatcher: Dispatcher::default(),
            dispatching: false,
            deferred: VecDeque::new(),
        }
    }

    /// Register a new signal. Fails with [`Error::DuplicateSignal`] if the
    /// name is already taken.
    pub fn register(
        &mut self,
        name: impl Into<String>,
        direction: Direction,
        active_low: bool,
    ) -> Result<SignalHandle, Error> {
        let name = name.into();
        if self.names.contains_key(&name) {
            return Err(Error::DuplicateSignal(name));
        }
        let handle = SignalHandle(self.signals.len() as u32);
        self.signals.push(SignalRecord {
            name: name.clone(),
            direction,
            active_low,
            level: false,
            last_change: Utc::now(),
        });
        self.names.insert(name, handle);
        Ok(handle)
    }

    /// Look up a previously registered signal's handle.
    pub fn handle_of(&self, name: &str) -> Option<SignalHandle> {
        self.names.get(name).copied()
    }

    /// Obtain the capability to write `handle`, asserting that the caller's
    /// expected direction matches how the signal was registered. This is
    /// the enforcement mechanism spec §4.1 calls a "writer-token issued at
    /// registration": the state machine claims `OutputToPeer`/`Internal`
    /// signals, the transport layer claims `InputFromPeer` ones.
    pub fn claim_writer(
        &self,
        handle: SignalHandle,
        expected: Direction,
    ) -> Result<WriteToken, Error> {
        let rec = self.record(handle);
        if rec.direction != expected {
            return Err(Error::WrongDirection(rec.name.clone()));
        }
        Ok(WriteToken { handle })
    }

    /// Total: reading a signal never fails.
    pub fn read(&self, handle: SignalHandle) -> bool {
        self.record(handle).level
    }

    pub fn name_of(&self, handle: SignalHandle) -> &str {
        &self.record(handle).name
    }

    /// Write a new level. A write that doesn't change the level is a no-op
    /// and never notifies subscribers (spec §4.1 guarantee, Invariant 5).
    ///
    /// If called from within a subscriber callback (dispatch depth already
    /// 1), the write is queued instead of applied immediately and is
    /// processed, in write order, once the current top-level write
    /// finishes notifying its subscribers.
    pub fn write(&mut self, token: &WriteToken, level: bool) -> Result<(), Error> {
        if self.dispatching {
            self.deferred.push_back((token.handle, level));
            return Ok(());
        }
        self.apply(token.handle, level)?;
        self.drain_deferred()
    }

    fn apply(&mut self, handle: SignalHandle, level: bool) -> Result<(), Error> {
        if self.dispatching {
            // Structural guard: apply() must only ever run at dispatch
            // depth 0. Reaching here with `dispatching` already true means
            // a caller bypassed `write`'s queuing and tried to recurse.
            return Err(Error::ReentrantDispatch);
        }
        let idx = handle.0 as usize;
        if self.signals[idx].level == level {
            return Ok(());
        }
        self.signals[idx].level = level;
        self.signals[idx].last_change = Utc::now();

        let name = self.signals[idx].name.clone();
        let event = SignalChangeEvent {
            handle,
            name: name.clone(),
            level,
            at: self.signals[idx].last_change,
        };

        let mut subs = self.dispatcher.take(&name);
        self.dispatching = true;
        for sub in subs.iter_mut() {
            let mut deferred = DeferredWrites {
                queue: &mut self.deferred,
            };
            (sub.callback)(&event, &mut deferred);
        }
        self.dispatching = false;
        self.dispatcher.restore(&name, subs);
        Ok(())
    }

    fn drain_deferred(&mut self) -> Result<(), Error> {
        while let Some((handle, level)) = self.deferred.pop_front() {
            self.apply(handle, level)?;
        }
        Ok(())
    }

    pub fn subscribe<F>(&mut self, signal: &str, callback: F) -> SubscriptionId
    where
        F: FnMut(&SignalChangeEvent, &mut DeferredWrites) + Send + 'static,
    {
        self.dispatcher.subscribe(signal, Box::new(callback))
    }

    /// Idempotent: removing an id twice (or one that never existed) is a
    /// no-op.
    pub fn unsubscribe(&mut self, id: SubscriptionId) {
        self.dispatcher.unsubscribe(id);
    }

    /// Consistent read of every signal, for diagnostics.
    pub fn snapshot(&self) -> BTreeMap<String, SignalSnapshot> {
        self.signals
            .iter()
            .map(|rec| {
                (
                    rec.name.clone(),
                    SignalSnapshot {
                        direction: rec.direction,
                        active_low: rec.active_low,
                        level: rec.level,
                        last_change: rec.last_change,
                    },
                )
            })
            .collect()
    }

    fn record(&self, handle: SignalHandle) -> &SignalRecord {
        &self.signals[handle.0 as usize]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duplicate_registration_fails() {
        let mut reg = SignalRegistry::new();
        reg.register("VALID", Direction::InputFromPeer, false).unwrap();
        let err = reg
            .register("VALID", Direction::InputFromPeer, false)
            .unwrap_err();
        assert!(matches!(err, Error::DuplicateSignal(name) if name == "VALID"));
    }

    #[test]
    fn wrong_direction_is_rejected() {
        let mut reg = SignalRegistry::new();
        let h = reg.register("L_REQ", Direction::OutputToPeer, false).unwrap();
        let err = reg.claim_writer(h, Direction::InputFromPeer).unwrap_err();
        assert!(matches!(err, Error::WrongDirection(name) if name == "L_REQ"));
    }

    #[test]
    fn unchanged_write_does_not_notify() {
        let mut reg = SignalRegistry::new();
        let h = reg.register("ES", Direction::InputFromPeer, false).unwrap();
        let token = reg.claim_writer(h, Direction::InputFromPeer).unwrap();

        let count = std::sync::Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let count_clone = count.clone();
        reg.subscribe("ES", move |_ev, _w| {
            count_clone.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        });

        // Initial level is false; writing false again must not notify.
        reg.write(&token, false).unwrap();
        assert_eq!(count.load(std::sync::atomic::Ordering::SeqCst), 0);

        reg.write(&token, true).unwrap();
        assert_eq!(count.load(std::sync::atomic::Ordering::SeqCst), 1);

        // Writing the same (now current) level again is still a no-op.
        reg.write(&token, true).unwrap();
        assert_eq!(count.load(std::sync::atomic::Ordering::SeqCst), 1);
    }

    #[test]
    fn deferred_write_runs_after_callback_returns() {
        let mut reg = SignalRegistry::new();
        let cs1 = reg.register("CS_1", Direction::InputFromPeer, false).unwrap();
        let cs1_token = reg.claim_writer(cs1, Direction::InputFromPeer).unwrap();

        let ho_avbl = reg.register("HO_AVBL", Direction::OutputToPeer, false).unwrap();
        let ho_avbl_token = reg.claim_writer(ho_avbl, Direction::OutputToPeer).unwrap();

        let order = std::sync::Arc::new(std::sync::Mutex::new(Vec::new()));
        let order_clone = order.clone();
        reg.subscribe("CS_1", move |_ev, deferred| {
            order_clone.lock().unwrap().push("cs1-callback-start");
            deferred.push(&ho_avbl_token, true);
            order_clone.lock().unwrap().push("cs1-callback-end");
        });

        let order_clone2 = order.clone();
        reg.subscribe("HO_AVBL", move |_ev, _w| {
            order_clone2.lock().unwrap().push("ho-avbl-callback");
        });

        reg.write(&cs1_token, true).unwrap();

        let seq = order.lock().unwrap().clone();
        assert_eq!(
            seq,
            vec!["cs1-callback-start", "cs1-callback-end", "ho-avbl-callback"]
        );
        assert_eq!(reg.read(ho_avbl), true);
    }
}
