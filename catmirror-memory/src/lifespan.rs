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

//! Lifespans: bounding native scopes whose teardown forces the release of every guard registered
//! to them.

use std::{
    fmt::Debug,
    sync::{Arc, Weak},
};

use catmirror_common::{
    error::{Error, ErrorKind, Result},
    key::Address,
    mutator::Mutator,
};
use hashbrown::HashMap;
use parking_lot::Mutex;

use crate::guard::{DualState, GuardInner};

/// Kind of native scope a lifespan mirrors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LifespanKind {
    /// A memory context. Resetting it frees its memory and deletes its children.
    MemoryContext,
    /// A resource owner.
    ResourceOwner,
}

#[derive(Default)]
struct LifespanState {
    ended: bool,
    guards: HashMap<u64, Arc<GuardInner>>,
    children: Vec<Lifespan>,
}

struct LifespanInner {
    address: Address,
    kind: LifespanKind,
    state: Mutex<LifespanState>,
}

/// A bounding native scope.
#[derive(Clone)]
pub struct Lifespan {
    inner: Arc<LifespanInner>,
}

impl Debug for Lifespan {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("Lifespan")
            .field("address", &self.inner.address)
            .field("kind", &self.inner.kind)
            .field("ended", &state.ended)
            .field("guards", &state.guards.len())
            .field("children", &state.children.len())
            .finish()
    }
}

pub(crate) struct WeakLifespan(Weak<LifespanInner>);

impl WeakLifespan {
    pub(crate) fn upgrade(&self) -> Option<Lifespan> {
        self.0.upgrade().map(|inner| Lifespan { inner })
    }
}

impl Lifespan {
    /// Create a root lifespan mirroring the native scope at `address`.
    pub fn new(address: Address, kind: LifespanKind) -> Self {
        Self {
            inner: Arc::new(LifespanInner {
                address,
                kind,
                state: Mutex::new(LifespanState::default()),
            }),
        }
    }

    /// Create a child scope, ended before this one is reset or ended.
    pub fn child(&self, address: Address, kind: LifespanKind) -> Result<Lifespan> {
        let mut state = self.inner.state.lock();
        if state.ended {
            return Err(self.ended_error());
        }
        let child = Lifespan::new(address, kind);
        state.children.retain(|c| !c.is_ended());
        state.children.push(child.clone());
        Ok(child)
    }

    /// Native address of the scope.
    pub fn address(&self) -> Address {
        self.inner.address
    }

    /// Kind of the scope.
    pub fn kind(&self) -> LifespanKind {
        self.inner.kind
    }

    /// Returns `true` once the lifespan has ended.
    pub fn is_ended(&self) -> bool {
        self.inner.state.lock().ended
    }

    /// Number of registered guards.
    pub fn len(&self) -> usize {
        self.inner.state.lock().guards.len()
    }

    /// Returns `true` if no guard is registered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns `true` if both handles refer to the same lifespan.
    pub fn ptr_eq(&self, other: &Lifespan) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    pub(crate) fn downgrade(&self) -> WeakLifespan {
        WeakLifespan(Arc::downgrade(&self.inner))
    }

    fn ended_error(&self) -> Error {
        Error::new(ErrorKind::LifespanEnded, "lifespan has ended")
            .with_context("address", self.inner.address)
            .with_context("kind", format!("{:?}", self.inner.kind))
    }

    /// Register `guard`, so that tearing down this lifespan releases it.
    pub fn register(&self, guard: &DualState) -> Result<()> {
        if guard.is_released() {
            return Err(Error::released("guard", guard.id()));
        }
        let inner = guard.inner();
        {
            let mut state = self.inner.state.lock();
            if state.ended {
                return Err(self.ended_error());
            }
            if state.guards.insert(inner.id(), inner.clone()).is_none() {
                inner.metrics.guard_registered.increase(1);
            }
        }
        inner.link(self.downgrade());
        tracing::trace!("[lifespan]: {} registered guard {}", self.inner.address, inner.id());
        Ok(())
    }

    /// Deregister `guard` without releasing it. Returns `true` if it was registered.
    pub fn deregister(&self, guard: &DualState) -> bool {
        let inner = guard.inner();
        let removed = self.forget(inner.id());
        if removed {
            inner.unlink();
        }
        removed
    }

    pub(crate) fn forget(&self, id: u64) -> bool {
        let guard = self.inner.state.lock().guards.remove(&id);
        match guard {
            Some(guard) => {
                guard.metrics.guard_registered.decrease(1);
                true
            }
            None => false,
        }
    }

    /// Release every registered guard and end every child. The lifespan stays usable.
    ///
    /// Returns the number of guards released by this call, children included.
    pub fn reset(&self, mutator: &Mutator) -> usize {
        self.teardown(mutator, false)
    }

    /// Release every registered guard, end every child and close the lifespan.
    ///
    /// Ending an ended lifespan is a no-op.
    pub fn end(&self, mutator: &Mutator) -> usize {
        self.teardown(mutator, true)
    }

    fn teardown(&self, mutator: &Mutator, close: bool) -> usize {
        let (guards, children) = {
            let mut state = self.inner.state.lock();
            if state.ended {
                return 0;
            }
            state.ended = close;
            (std::mem::take(&mut state.guards), std::mem::take(&mut state.children))
        };

        // Guards are released outside the state lock, a release may wait for pins.
        let mut released = children.iter().map(|child| child.end(mutator)).sum::<usize>();
        for guard in guards.values() {
            guard.metrics.guard_registered.decrease(1);
            if guard.release_by_lifespan() {
                released += 1;
            }
        }

        tracing::debug!(
            "[lifespan]: mutator {} {} {} ({:?}), {} child(ren), released {released} guard(s)",
            mutator.id(),
            if close { "ended" } else { "reset" },
            self.inner.address,
            self.inner.kind,
            children.len(),
        );
        released
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    fn counted(handle: usize, count: &Arc<AtomicUsize>) -> crate::guard::DualStateBuilder {
        let count = count.clone();
        DualState::builder(Address(handle)).on_release(move |_, _| {
            count.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[test]
    fn test_reset_keeps_lifespan_usable() {
        let mutator = Mutator::new();
        let count = Arc::new(AtomicUsize::new(0));
        let lifespan = Lifespan::new(Address(0x100), LifespanKind::MemoryContext);

        let a = counted(1, &count).register(&lifespan).unwrap();
        let b = counted(2, &count).register(&lifespan).unwrap();
        assert_eq!(lifespan.reset(&mutator), 2);
        assert!(a.is_released() && b.is_released());
        assert!(!lifespan.is_ended());

        let c = counted(3, &count).register(&lifespan).unwrap();
        assert_eq!(lifespan.len(), 1);
        assert_eq!(lifespan.end(&mutator), 1);
        assert!(c.is_released());
        assert!(lifespan.is_ended());
        assert_eq!(count.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_children_ended_first() {
        let mutator = Mutator::new();
        let count = Arc::new(AtomicUsize::new(0));
        let root = Lifespan::new(Address(0x100), LifespanKind::MemoryContext);
        let child = root.child(Address(0x200), LifespanKind::MemoryContext).unwrap();
        let grandchild = child.child(Address(0x300), LifespanKind::ResourceOwner).unwrap();

        let _a = counted(1, &count).register(&child).unwrap();
        let _b = counted(2, &count).register(&grandchild).unwrap();

        assert_eq!(root.reset(&mutator), 2);
        assert!(child.is_ended());
        assert!(grandchild.is_ended());
        assert!(!root.is_ended());
        assert_eq!(count.load(Ordering::SeqCst), 2);

        assert!(child.child(Address(0x400), LifespanKind::MemoryContext).is_err());
    }

    #[test]
    fn test_deregister() {
        let mutator = Mutator::new();
        let count = Arc::new(AtomicUsize::new(0));
        let lifespan = Lifespan::new(Address(0x100), LifespanKind::ResourceOwner);

        let guard = counted(1, &count).register(&lifespan).unwrap();
        assert!(lifespan.deregister(&guard));
        assert!(!lifespan.deregister(&guard));
        assert_eq!(lifespan.end(&mutator), 0);
        assert!(!guard.is_released());

        drop(guard);
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }
}
