// Copyright 2026 catmirror Project Authors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Lazy value slots.
//!
//! A mirror object owns a [`Slots`] table. Each entry is declared once as a [`Slot`] with a
//! compute function, a binding, a flight mode and an affinity. The first read computes and
//! memoizes the value; the memo is trusted exactly as long as the cell that was current on the
//! bound gate when the computation started is untripped.

use std::{
    any::Any,
    fmt::Debug,
    marker::PhantomData,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};

use arc_swap::ArcSwapOption;
use catmirror_common::{
    error::{Error, Result},
    metrics::Metrics,
    mutator::Mutator,
};
use parking_lot::Mutex;

use crate::cell::{Cell, Gate};

/// Result of a slot computation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Computed<T> {
    /// Memoize the value until the governing cell is tripped.
    Cached(T),
    /// Return the value without memoizing it, so the next read computes again.
    ///
    /// Used for lookups of data that may not be available yet.
    Transient(T),
}

impl<T> Computed<T> {
    /// Unwrap the computed value.
    pub fn into_inner(self) -> T {
        match self {
            Computed::Cached(value) | Computed::Transient(value) => value,
        }
    }

    /// Returns `true` if the value is memoized.
    pub fn is_cached(&self) -> bool {
        matches!(self, Computed::Cached(_))
    }
}

/// How concurrent computations of one unset slot are handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flight {
    /// Concurrent readers may all compute; the last writer's memo wins.
    ///
    /// Only for cheap, side-effect-free computations.
    Duplicate,
    /// Computations of the slot are serialized, later readers reuse the first result.
    Single,
}

/// Which contexts may compute a slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Affinity {
    /// Computable from any thread.
    Any,
    /// Computation re-enters the backend and needs the mutator.
    ///
    /// Once memoized, the value can be read from any thread.
    Mutator,
}

/// The context a slot is read from.
pub enum Access<'a, M: ?Sized> {
    /// An arbitrary reader thread.
    Reader,
    /// The mutator, carrying its context.
    Mutator(&'a M),
}

impl<M: ?Sized> Clone for Access<'_, M> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<M: ?Sized> Copy for Access<'_, M> {}

impl<M: ?Sized> Debug for Access<'_, M> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Reader => write!(f, "Reader"),
            Self::Mutator(_) => write!(f, "Mutator"),
        }
    }
}

impl<'a, M: ?Sized> Access<'a, M> {
    /// The mutator context, if reading on the mutator.
    pub fn mutator(&self) -> Option<&'a M> {
        match self {
            Self::Reader => None,
            Self::Mutator(m) => Some(m),
        }
    }

    /// Returns `true` if reading on the mutator.
    pub fn is_mutator(&self) -> bool {
        matches!(self, Self::Mutator(_))
    }
}

/// Conceptual state of a mirror object, derived from its slot table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MirrorState {
    /// No slot has been computed yet.
    Unpopulated,
    /// Every memoized slot is valid.
    Populated,
    /// At least one memoized slot was invalidated and not yet recomputed.
    Stale,
    /// Removed from its identity cache. Terminal.
    Evicted,
}

/// What a slot's memo is governed by.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Binding {
    /// Never invalidated, e.g. data fixed at construction.
    Fixed,
    /// The gate at the given index of the slot table.
    Gate(usize),
}

/// An object that owns a slot table.
pub trait SlotHost: Send + Sync + 'static {
    /// The mutator context passed to computations that re-enter the backend.
    type Mutator: ?Sized;

    /// The slot table.
    fn slots(&self) -> &Slots;
}

/// Compute function of a slot.
pub type ComputeFn<H, T> = fn(&H, Access<'_, <H as SlotHost>::Mutator>) -> Result<Computed<T>>;

/// Declaration of one lazy value slot of host type `H` with value type `T`.
pub struct Slot<H: SlotHost, T> {
    index: usize,
    name: &'static str,
    binding: Binding,
    flight: Flight,
    affinity: Affinity,
    compute: ComputeFn<H, T>,
    _marker: PhantomData<fn() -> T>,
}

impl<H: SlotHost, T> Debug for Slot<H, T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Slot")
            .field("index", &self.index)
            .field("name", &self.name)
            .field("binding", &self.binding)
            .field("flight", &self.flight)
            .field("affinity", &self.affinity)
            .finish()
    }
}

impl<H, T> Slot<H, T>
where
    H: SlotHost,
    T: Send + Sync + 'static,
{
    /// Declare a slot bound to the first gate of its table, computable anywhere, with duplicate
    /// flight.
    pub const fn new(index: usize, name: &'static str, compute: ComputeFn<H, T>) -> Self {
        Self {
            index,
            name,
            binding: Binding::Gate(0),
            flight: Flight::Duplicate,
            affinity: Affinity::Any,
            compute,
            _marker: PhantomData,
        }
    }

    /// Bind the slot to the gate at `gate`.
    pub const fn with_gate(mut self, gate: usize) -> Self {
        self.binding = Binding::Gate(gate);
        self
    }

    /// Never invalidate the slot.
    pub const fn fixed(mut self) -> Self {
        self.binding = Binding::Fixed;
        self
    }

    /// Set the flight mode.
    pub const fn with_flight(mut self, flight: Flight) -> Self {
        self.flight = flight;
        self
    }

    /// Set the affinity.
    pub const fn with_affinity(mut self, affinity: Affinity) -> Self {
        self.affinity = affinity;
        self
    }

    /// Slot name, used in errors and logs.
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Slot index in its table.
    pub fn index(&self) -> usize {
        self.index
    }

    /// Read the slot, computing it if unset or invalidated.
    ///
    /// Computation errors propagate and are not memoized. Reading an unset
    /// [`Affinity::Mutator`] slot with [`Access::Reader`] fails with
    /// [`ErrorKind::WrongContext`](catmirror_common::error::ErrorKind::WrongContext).
    pub fn get(&self, host: &H, access: Access<'_, H::Mutator>) -> Result<Arc<T>> {
        let slots = host.slots();
        let entry = slots.entry(self.index);

        if let Some(value) = self.memoized(slots, entry) {
            return Ok(value);
        }

        if self.affinity == Affinity::Mutator && !access.is_mutator() {
            return Err(Error::wrong_context(self.name));
        }

        match self.flight {
            Flight::Duplicate => self.compute(host, access),
            Flight::Single => {
                let _flight = entry.flight.lock();
                if let Some(value) = self.memoized(slots, entry) {
                    return Ok(value);
                }
                self.compute(host, access)
            }
        }
    }

    /// Get the memoized value if it is still valid, without computing.
    pub fn peek(&self, host: &H) -> Option<Arc<T>> {
        let slots = host.slots();
        let memo = slots.entry(self.index).memo.load_full()?;
        memo.is_valid().then(|| self.downcast(memo.value.clone()))
    }

    fn memoized(&self, slots: &Slots, entry: &Entry) -> Option<Arc<T>> {
        let guard = entry.memo.load();
        let memo = guard.as_ref()?;
        if !memo.is_valid() {
            return None;
        }
        slots.metrics.slot_hit.increase(1);
        tracing::trace!("[slot]: hit {}", self.name);
        Some(self.downcast(memo.value.clone()))
    }

    fn compute(&self, host: &H, access: Access<'_, H::Mutator>) -> Result<Arc<T>> {
        let slots = host.slots();
        // Load the cell before computing, so a concurrent trip invalidates the result.
        let cell = match self.binding {
            Binding::Fixed => None,
            Binding::Gate(gate) => Some(slots.gate(gate).current()),
        };

        tracing::trace!("[slot]: compute {}", self.name);
        match (self.compute)(host, access)? {
            Computed::Cached(value) => {
                slots.metrics.slot_compute.increase(1);
                let value = Arc::new(value);
                slots.entry(self.index).memo.store(Some(Arc::new(Memo {
                    value: value.clone(),
                    cell,
                })));
                Ok(value)
            }
            Computed::Transient(value) => {
                slots.metrics.slot_transient.increase(1);
                Ok(Arc::new(value))
            }
        }
    }

    fn downcast(&self, value: Arc<dyn Any + Send + Sync>) -> Arc<T> {
        match value.downcast::<T>() {
            Ok(value) => value,
            Err(_) => panic!("slot {} (index {}) holds a value of another type", self.name, self.index),
        }
    }
}

struct Memo {
    value: Arc<dyn Any + Send + Sync>,
    cell: Option<Cell>,
}

impl Memo {
    fn is_valid(&self) -> bool {
        self.cell.as_ref().is_none_or(|cell| !cell.is_tripped())
    }
}

#[derive(Default)]
struct Entry {
    memo: ArcSwapOption<Memo>,
    flight: Mutex<()>,
}

/// The slot table of one mirror object.
pub struct Slots {
    entries: Box<[Entry]>,
    gates: Vec<Gate>,
    evicted: AtomicBool,
    metrics: Arc<Metrics>,
}

impl Debug for Slots {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Slots")
            .field("len", &self.entries.len())
            .field("gates", &self.gates)
            .field("state", &self.state())
            .finish()
    }
}

impl Slots {
    /// Create a table of `len` unset slots governed by `gates`.
    ///
    /// Gates may be shared with other tables.
    pub fn new(len: usize, gates: Vec<Gate>, metrics: Arc<Metrics>) -> Self {
        Self {
            entries: (0..len).map(|_| Entry::default()).collect(),
            gates,
            evicted: AtomicBool::new(false),
            metrics,
        }
    }

    /// Number of slots.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if the table has no slot.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The gate at `index`.
    ///
    /// # Panics
    ///
    /// Panics if the table has no gate at `index`. Slot declarations must match their table.
    pub fn gate(&self, index: usize) -> &Gate {
        &self.gates[index]
    }

    /// All gates governing the table.
    pub fn gates(&self) -> &[Gate] {
        &self.gates
    }

    fn entry(&self, index: usize) -> &Entry {
        &self.entries[index]
    }

    /// Mark the owning mirror as evicted from its identity cache.
    pub fn mark_evicted(&self, mutator: &Mutator) {
        if !self.evicted.swap(true, Ordering::AcqRel) {
            tracing::trace!("[slot]: mutator {} marked table evicted", mutator.id());
        }
    }

    /// Conceptual state of the owning mirror.
    pub fn state(&self) -> MirrorState {
        if self.evicted.load(Ordering::Acquire) {
            return MirrorState::Evicted;
        }
        let mut populated = false;
        for entry in self.entries.iter() {
            if let Some(memo) = entry.memo.load().as_ref() {
                if !memo.is_valid() {
                    return MirrorState::Stale;
                }
                populated = true;
            }
        }
        if populated {
            MirrorState::Populated
        } else {
            MirrorState::Unpopulated
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{
        sync::{atomic::AtomicUsize, Barrier},
        time::Duration,
    };

    use catmirror_common::error::ErrorKind;

    use super::*;

    struct Host {
        slots: Slots,
        calls: AtomicUsize,
        fail: AtomicBool,
    }

    impl SlotHost for Host {
        type Mutator = Mutator;

        fn slots(&self) -> &Slots {
            &self.slots
        }
    }

    impl Host {
        fn new(gate: Gate) -> Self {
            Self {
                slots: Slots::new(6, vec![gate], Arc::new(Metrics::noop())),
                calls: AtomicUsize::new(0),
                fail: AtomicBool::new(false),
            }
        }
    }

    fn count(host: &Host, _: Access<'_, Mutator>) -> Result<Computed<usize>> {
        if host.fail.load(Ordering::SeqCst) {
            return Err(Error::not_found("count"));
        }
        Ok(Computed::Cached(host.calls.fetch_add(1, Ordering::SeqCst)))
    }

    fn maybe(host: &Host, _: Access<'_, Mutator>) -> Result<Computed<Option<usize>>> {
        let n = host.calls.fetch_add(1, Ordering::SeqCst);
        Ok(if n == 0 { Computed::Transient(None) } else { Computed::Cached(Some(n)) })
    }

    fn slow(host: &Host, _: Access<'_, Mutator>) -> Result<Computed<usize>> {
        std::thread::sleep(Duration::from_millis(10));
        Ok(Computed::Cached(host.calls.fetch_add(1, Ordering::SeqCst)))
    }

    fn doubled(host: &Host, access: Access<'_, Mutator>) -> Result<Computed<usize>> {
        let base = COUNT.get(host, access)?;
        Ok(Computed::Cached(*base * 2))
    }

    const COUNT: Slot<Host, usize> = Slot::new(0, "count", count);
    const FIXED: Slot<Host, usize> = Slot::new(1, "fixed", count).fixed();
    const MAYBE: Slot<Host, Option<usize>> = Slot::new(2, "maybe", maybe);
    const SLOW: Slot<Host, usize> = Slot::new(3, "slow", slow).with_flight(Flight::Single);
    const NATIVE: Slot<Host, usize> = Slot::new(4, "native", count).with_affinity(Affinity::Mutator);
    const DOUBLED: Slot<Host, usize> = Slot::new(5, "doubled", doubled);

    #[test]
    fn test_memoize_until_trip() {
        let mutator = Mutator::new();
        let gate = Gate::new();
        let host = Host::new(gate.clone());

        assert_eq!(host.slots.state(), MirrorState::Unpopulated);

        let a = COUNT.get(&host, Access::Reader).unwrap();
        let b = COUNT.get(&host, Access::Reader).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(host.calls.load(Ordering::SeqCst), 1);
        assert_eq!(host.slots.state(), MirrorState::Populated);

        gate.trip(&mutator);
        assert_eq!(host.slots.state(), MirrorState::Stale);
        assert_eq!(COUNT.peek(&host), None);

        let c = COUNT.get(&host, Access::Reader).unwrap();
        assert_eq!(*c, 1);
        assert_eq!(host.calls.load(Ordering::SeqCst), 2);
        assert_eq!(host.slots.state(), MirrorState::Populated);

        host.slots.mark_evicted(&mutator);
        assert_eq!(host.slots.state(), MirrorState::Evicted);
    }

    #[test]
    fn test_fixed_slot_survives_trip() {
        let mutator = Mutator::new();
        let gate = Gate::new();
        let host = Host::new(gate.clone());

        let a = FIXED.get(&host, Access::Reader).unwrap();
        gate.trip(&mutator);
        let b = FIXED.get(&host, Access::Reader).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(host.slots.state(), MirrorState::Populated);
    }

    #[test]
    fn test_error_not_memoized() {
        let host = Host::new(Gate::new());

        host.fail.store(true, Ordering::SeqCst);
        let err = COUNT.get(&host, Access::Reader).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
        assert_eq!(host.slots.state(), MirrorState::Unpopulated);

        host.fail.store(false, Ordering::SeqCst);
        assert_eq!(*COUNT.get(&host, Access::Reader).unwrap(), 0);
    }

    #[test]
    fn test_transient_retried() {
        let host = Host::new(Gate::new());

        assert_eq!(*MAYBE.get(&host, Access::Reader).unwrap(), None);
        assert_eq!(MAYBE.peek(&host), None);
        assert_eq!(*MAYBE.get(&host, Access::Reader).unwrap(), Some(1));
        assert_eq!(*MAYBE.get(&host, Access::Reader).unwrap(), Some(1));
        assert_eq!(host.calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_mutator_affinity() {
        let mutator = Mutator::new();
        let host = Host::new(Gate::new());

        let err = NATIVE.get(&host, Access::Reader).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::WrongContext);

        let value = NATIVE.get(&host, Access::Mutator(&mutator)).unwrap();
        // Once memoized, readers are served.
        assert_eq!(NATIVE.get(&host, Access::Reader).unwrap(), value);
    }

    #[test]
    fn test_delegating_slot() {
        let mutator = Mutator::new();
        let gate = Gate::new();
        let host = Host::new(gate.clone());

        assert_eq!(*DOUBLED.get(&host, Access::Reader).unwrap(), 0);
        gate.trip(&mutator);
        assert_eq!(*DOUBLED.get(&host, Access::Reader).unwrap(), 2);
        assert_eq!(host.calls.load(Ordering::SeqCst), 2);
    }

    #[test_log::test]
    fn test_single_flight() {
        const THREADS: usize = 8;

        let host = Arc::new(Host::new(Gate::new()));
        let barrier = Arc::new(Barrier::new(THREADS));

        let handles = (0..THREADS)
            .map(|_| {
                let host = host.clone();
                let barrier = barrier.clone();
                std::thread::spawn(move || {
                    barrier.wait();
                    SLOW.get(&host, Access::Reader).unwrap()
                })
            })
            .collect::<Vec<_>>();

        let values = handles.into_iter().map(|h| h.join().unwrap()).collect::<Vec<_>>();
        assert_eq!(host.calls.load(Ordering::SeqCst), 1);
        assert!(values.iter().all(|v| Arc::ptr_eq(v, &values[0])));
    }

    #[test]
    fn test_trip_observed_by_readers() {
        const THREADS: usize = 4;

        let mutator = Mutator::new();
        let gate = Gate::new();
        let host = Arc::new(Host::new(gate.clone()));
        let barrier = Arc::new(Barrier::new(THREADS + 1));

        let before = *COUNT.get(&host, Access::Reader).unwrap();

        let handles = (0..THREADS)
            .map(|_| {
                let host = host.clone();
                let barrier = barrier.clone();
                std::thread::spawn(move || {
                    barrier.wait();
                    barrier.wait();
                    *COUNT.get(&host, Access::Reader).unwrap()
                })
            })
            .collect::<Vec<_>>();

        barrier.wait();
        gate.trip(&mutator);
        barrier.wait();

        for handle in handles {
            assert_ne!(handle.join().unwrap(), before);
        }
    }
}
