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

//! Properties of the mirror engine, independent of any catalog.

use std::{
    sync::{
        atomic::{AtomicU64, AtomicUsize, Ordering},
        Arc, Barrier,
    },
    thread,
    time::Duration,
};

use catmirror::{
    Access, Address, Computed, DualState, Gate, IdentityCache, Lifespan, LifespanKind, Metrics, Mutator, Oid,
    ReleaseCause, Result, Retention, Slot, SlotHost, Slots,
};

#[derive(Debug)]
struct Node {
    oid: Oid,
}

#[test_log::test]
fn test_concurrent_lookup_constructs_once() {
    const READERS: usize = 2;

    let cache: Arc<IdentityCache<Oid, Node>> = Arc::new(IdentityCache::builder().build());
    let constructs = Arc::new(AtomicUsize::new(0));
    let barrier = Arc::new(Barrier::new(READERS));

    let handles = (0..READERS)
        .map(|_| {
            let cache = cache.clone();
            let constructs = constructs.clone();
            let barrier = barrier.clone();
            thread::spawn(move || {
                barrier.wait();
                cache
                    .lookup_or_create(&Oid(42), |oid| {
                        constructs.fetch_add(1, Ordering::SeqCst);
                        thread::sleep(Duration::from_millis(10));
                        Ok(Node { oid: *oid })
                    })
                    .unwrap()
            })
        })
        .collect::<Vec<_>>();
    let nodes = handles.into_iter().map(|h| h.join().unwrap()).collect::<Vec<_>>();

    assert_eq!(constructs.load(Ordering::SeqCst), 1);
    assert!(Arc::ptr_eq(&nodes[0], &nodes[1]));
    assert_eq!(nodes[0].oid, Oid(42));
}

#[test_log::test]
fn test_guard_released_once_unreachable_first() {
    let mutator = Mutator::new();
    let lifespan = Lifespan::new(Address(0x10), LifespanKind::MemoryContext);
    let releases = Arc::new(AtomicUsize::new(0));

    let guard = {
        let releases = releases.clone();
        DualState::builder(Address(0x100))
            .on_release(move |address, cause| {
                assert_eq!(address, Address(0x100));
                assert_eq!(cause, ReleaseCause::Unreachable);
                releases.fetch_add(1, Ordering::SeqCst);
            })
            .register(&lifespan)
            .unwrap()
    };
    assert_eq!(lifespan.len(), 1);

    drop(guard);
    assert_eq!(releases.load(Ordering::SeqCst), 1);
    assert!(lifespan.is_empty());

    assert_eq!(lifespan.end(&mutator), 0);
    assert_eq!(lifespan.end(&mutator), 0);
    assert_eq!(releases.load(Ordering::SeqCst), 1);
}

#[test_log::test]
fn test_guard_released_once_teardown_first() {
    let mutator = Mutator::new();
    let lifespan = Lifespan::new(Address(0x10), LifespanKind::ResourceOwner);
    let causes = Arc::new(parking_lot::Mutex::new(vec![]));

    let guard = {
        let causes = causes.clone();
        DualState::builder(Address(0x100))
            .on_release(move |_, cause| causes.lock().push(cause))
            .register(&lifespan)
            .unwrap()
    };

    assert_eq!(lifespan.end(&mutator), 1);
    assert!(guard.is_released());
    assert!(guard.pin().is_err());
    drop(guard);

    assert_eq!(*causes.lock(), vec![ReleaseCause::LifespanEnded]);
}

struct Counter {
    slots: Slots,
    source: AtomicU64,
    computes: AtomicUsize,
}

impl SlotHost for Counter {
    type Mutator = Mutator;

    fn slots(&self) -> &Slots {
        &self.slots
    }
}

const VALUE: Slot<Counter, u64> = Slot::new(0, "counter.value", value);

fn value(counter: &Counter, _: Access<'_, Mutator>) -> Result<Computed<u64>> {
    counter.computes.fetch_add(1, Ordering::SeqCst);
    Ok(Computed::Cached(counter.source.load(Ordering::SeqCst)))
}

impl Counter {
    fn new() -> Self {
        Self {
            slots: Slots::new(1, vec![Gate::new()], Arc::new(Metrics::noop())),
            source: AtomicU64::new(1),
            computes: AtomicUsize::new(0),
        }
    }
}

#[test_log::test]
fn test_memoized_between_trips() {
    let mutator = Mutator::new();
    let counter = Counter::new();

    let v1 = VALUE.get(&counter, Access::Reader).unwrap();
    let v2 = VALUE.get(&counter, Access::Reader).unwrap();
    assert!(Arc::ptr_eq(&v1, &v2));
    assert_eq!(counter.computes.load(Ordering::SeqCst), 1);

    counter.source.store(2, Ordering::SeqCst);
    assert_eq!(*VALUE.get(&counter, Access::Mutator(&mutator)).unwrap(), 1);

    counter.slots.gate(0).trip(&mutator);
    assert_eq!(*VALUE.get(&counter, Access::Reader).unwrap(), 2);
    assert_eq!(counter.computes.load(Ordering::SeqCst), 2);
}

#[test_log::test]
fn test_trip_visible_to_readers() {
    const READERS: usize = 4;
    const ROUNDS: u64 = 16;

    let mutator = Mutator::new();
    let counter = Counter::new();
    let barrier = Barrier::new(READERS + 1);

    thread::scope(|s| {
        for _ in 0..READERS {
            s.spawn(|| {
                for round in 1..=ROUNDS {
                    // Wait for the mutator to publish round `round`.
                    barrier.wait();
                    assert_eq!(*VALUE.get(&counter, Access::Reader).unwrap(), round);
                    barrier.wait();
                }
            });
        }

        for round in 1..=ROUNDS {
            counter.source.store(round, Ordering::SeqCst);
            counter.slots.gate(0).trip(&mutator);
            barrier.wait();
            barrier.wait();
        }
    });

    assert!(counter.computes.load(Ordering::SeqCst) >= ROUNDS as usize);
}
