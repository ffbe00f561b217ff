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

//! Indirection cells.
//!
//! A [`Cell`] is a one-way token: once tripped it stays tripped. Values memoized under a cell are
//! trusted only while the cell is untripped, so tripping one cell invalidates every value guarded
//! by it at once, without touching the values.
//!
//! A [`Gate`] is the swappable holder of the current cell. Tripping a gate installs a fresh cell
//! for future computations and trips the old one. Gates are cheap to clone and clones share the
//! same current cell, which is how many mirror objects share one invalidation point.

use std::{
    fmt::Debug,
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc,
    },
};

use arc_swap::{ArcSwap, ArcSwapOption};
use catmirror_common::{error::Result, mutator::Mutator};
use hashbrown::HashSet;

use crate::slot::Computed;

static CELL_ID: AtomicU64 = AtomicU64::new(1);
static GATE_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Debug)]
struct CellInner {
    id: u64,
    tripped: AtomicBool,
}

impl CellInner {
    fn new() -> Self {
        Self {
            id: CELL_ID.fetch_add(1, Ordering::Relaxed),
            tripped: AtomicBool::new(false),
        }
    }
}

/// One-way invalidation token.
#[derive(Debug, Clone)]
pub struct Cell {
    inner: Arc<CellInner>,
}

impl Default for Cell {
    fn default() -> Self {
        Self::new()
    }
}

impl Cell {
    /// Create an untripped cell.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(CellInner::new()),
        }
    }

    /// Unique id of the cell.
    pub fn id(&self) -> u64 {
        self.inner.id
    }

    /// Returns `true` once the cell has been tripped.
    ///
    /// A trip that completed before this call is always observed.
    pub fn is_tripped(&self) -> bool {
        self.inner.tripped.load(Ordering::Acquire)
    }

    /// Trip the cell. Returns `true` if this call performed the trip.
    fn trip(&self) -> bool {
        !self.inner.tripped.swap(true, Ordering::AcqRel)
    }

    /// Guard `value` with this cell.
    pub fn guard<T>(&self, value: T) -> Guarded<T> {
        Guarded {
            value,
            cell: self.clone(),
        }
    }

    /// Returns `true` if both handles refer to the same cell.
    pub fn ptr_eq(&self, other: &Cell) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

/// A value that is valid only while the cell it was guarded with is untripped.
#[derive(Debug)]
pub struct Guarded<T> {
    value: T,
    cell: Cell,
}

impl<T> Guarded<T> {
    /// Get the value if its cell is still untripped.
    pub fn get(&self) -> Option<&T> {
        (!self.cell.is_tripped()).then_some(&self.value)
    }

    /// Returns `true` if the value can still be trusted.
    pub fn is_valid(&self) -> bool {
        !self.cell.is_tripped()
    }

    /// The governing cell.
    pub fn cell(&self) -> &Cell {
        &self.cell
    }
}

/// Swappable holder of the current [`Cell`] of one invalidation point.
#[derive(Clone)]
pub struct Gate {
    id: u64,
    current: Arc<ArcSwap<CellInner>>,
}

impl Debug for Gate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Gate")
            .field("id", &self.id)
            .field("cell", &self.current.load().id)
            .finish()
    }
}

impl Default for Gate {
    fn default() -> Self {
        Self::new()
    }
}

impl Gate {
    /// Create a gate with a fresh cell.
    pub fn new() -> Self {
        Self {
            id: GATE_ID.fetch_add(1, Ordering::Relaxed),
            current: Arc::new(ArcSwap::from_pointee(CellInner::new())),
        }
    }

    /// Unique id of the gate. Clones share the id.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// The cell new computations must be guarded with.
    ///
    /// Load it *before* computing: a trip that races with the computation then invalidates the
    /// computed value instead of being lost.
    pub fn current(&self) -> Cell {
        Cell {
            inner: self.current.load_full(),
        }
    }

    /// Trip the current cell and install a fresh one.
    pub fn trip(&self, mutator: &Mutator) {
        let mut batch = TripBatch::default();
        batch.add(self);
        batch.commit(mutator);
    }

    /// Install a fresh cell and return the detached old one, still untripped.
    fn detach(&self) -> Cell {
        let old = self.current.swap(Arc::new(CellInner::new()));
        Cell { inner: old }
    }

    /// Bind a computation to this gate.
    ///
    /// The returned [`Bound`] memoizes the result of `f` until the gate is tripped.
    pub fn bind<T, F>(&self, f: F) -> Bound<T>
    where
        T: Send + Sync + 'static,
        F: Fn() -> Result<Computed<T>> + Send + Sync + 'static,
    {
        Bound {
            gate: self.clone(),
            memo: ArcSwapOption::empty(),
            compute: Box::new(f),
        }
    }
}

/// A batch of gate trips delivered together.
///
/// Gates are detached as they are added, so computations started in the meantime already use the
/// fresh cells. The old cells are tripped together on [`TripBatch::commit`].
#[derive(Debug, Default)]
pub struct TripBatch {
    gates: HashSet<u64>,
    cells: Vec<Cell>,
}

impl TripBatch {
    /// Add a gate to the batch. Adding the same gate twice is a no-op.
    pub fn add(&mut self, gate: &Gate) {
        if self.gates.insert(gate.id) {
            self.cells.push(gate.detach());
        }
    }

    /// Number of gates in the batch.
    pub fn len(&self) -> usize {
        self.cells.len()
    }

    /// Returns `true` if no gate has been added.
    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    /// Trip all cells of the batch. Returns the number of cells tripped.
    pub fn commit(self, mutator: &Mutator) -> usize {
        let tripped = self.cells.iter().filter(|cell| cell.trip()).count();
        tracing::debug!(
            "[cell]: mutator {} tripped {tripped} cell(s) of {} gate(s)",
            mutator.id(),
            self.gates.len()
        );
        tripped
    }
}

struct BoundMemo<T> {
    value: Arc<T>,
    cell: Cell,
}

/// A standalone computation memoized under a [`Gate`].
pub struct Bound<T> {
    gate: Gate,
    memo: ArcSwapOption<BoundMemo<T>>,
    compute: Box<dyn Fn() -> Result<Computed<T>> + Send + Sync>,
}

impl<T> Debug for Bound<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Bound").field("gate", &self.gate).finish()
    }
}

impl<T> Bound<T>
where
    T: Send + Sync + 'static,
{
    /// Get the memoized value, computing it if unset or invalidated.
    ///
    /// Errors and [`Computed::Transient`] results are not memoized.
    pub fn get(&self) -> Result<Arc<T>> {
        if let Some(memo) = self.memo.load().as_ref() {
            if !memo.cell.is_tripped() {
                return Ok(memo.value.clone());
            }
        }
        let cell = self.gate.current();
        match (self.compute)()? {
            Computed::Cached(value) => {
                let value = Arc::new(value);
                self.memo.store(Some(Arc::new(BoundMemo {
                    value: value.clone(),
                    cell,
                })));
                Ok(value)
            }
            Computed::Transient(value) => Ok(Arc::new(value)),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{atomic::AtomicUsize, Barrier};

    use super::*;

    #[test]
    fn test_guarded_invalid_after_trip() {
        let mutator = Mutator::new();
        let gate = Gate::new();

        let guarded = gate.current().guard(42);
        assert_eq!(guarded.get(), Some(&42));

        gate.trip(&mutator);
        assert_eq!(guarded.get(), None);
        assert!(guarded.cell().is_tripped());

        // The gate hands out a fresh cell after the trip.
        let fresh = gate.current();
        assert!(!fresh.is_tripped());
        assert!(!fresh.ptr_eq(guarded.cell()));
    }

    #[test]
    fn test_gate_clones_share_cell() {
        let mutator = Mutator::new();
        let gate = Gate::new();
        let shared = gate.clone();

        let a = gate.current().guard("a");
        let b = shared.current().guard("b");
        assert!(a.cell().ptr_eq(b.cell()));

        shared.trip(&mutator);
        assert!(!a.is_valid());
        assert!(!b.is_valid());
    }

    #[test]
    fn test_batch_trips_on_commit_only() {
        let mutator = Mutator::new();
        let g1 = Gate::new();
        let g2 = Gate::new();

        let v1 = g1.current().guard(1);
        let v2 = g2.current().guard(2);

        let mut batch = TripBatch::default();
        batch.add(&g1);
        batch.add(&g2);
        batch.add(&g1);
        assert_eq!(batch.len(), 2);

        // Detached but not yet tripped.
        assert!(v1.is_valid());
        assert!(v2.is_valid());
        assert!(!g1.current().ptr_eq(v1.cell()));

        assert_eq!(batch.commit(&mutator), 2);
        assert!(!v1.is_valid());
        assert!(!v2.is_valid());
    }

    #[test]
    fn test_bound_memoizes_until_trip() {
        let mutator = Mutator::new();
        let gate = Gate::new();
        let calls = Arc::new(AtomicUsize::new(0));

        let bound = {
            let calls = calls.clone();
            gate.bind(move || Ok(Computed::Cached(calls.fetch_add(1, Ordering::SeqCst))))
        };

        let first = bound.get().unwrap();
        let second = bound.get().unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        gate.trip(&mutator);
        assert_eq!(*bound.get().unwrap(), 1);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_bound_transient_not_memoized() {
        let gate = Gate::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let bound = {
            let calls = calls.clone();
            gate.bind(move || {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                Ok(if n < 2 { Computed::Transient(None) } else { Computed::Cached(Some(n)) })
            })
        };

        assert_eq!(*bound.get().unwrap(), None);
        assert_eq!(*bound.get().unwrap(), None);
        assert_eq!(*bound.get().unwrap(), Some(2));
        assert_eq!(*bound.get().unwrap(), Some(2));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_trip_visible_to_other_threads() {
        let mutator = Mutator::new();
        let gate = Gate::new();
        let guarded = Arc::new(gate.current().guard(()));
        let barrier = Arc::new(Barrier::new(5));

        let handles = (0..4)
            .map(|_| {
                let guarded = guarded.clone();
                let barrier = barrier.clone();
                std::thread::spawn(move || {
                    assert!(guarded.is_valid());
                    barrier.wait();
                    barrier.wait();
                    assert!(!guarded.is_valid());
                })
            })
            .collect::<Vec<_>>();

        barrier.wait();
        gate.trip(&mutator);
        barrier.wait();

        handles.into_iter().for_each(|handle| handle.join().unwrap());
    }
}
