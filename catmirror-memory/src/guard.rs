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

//! Dual-state resource guard.
//!
//! A [`DualState`] owns one natively allocated resource and releases it exactly once, on
//! whichever comes first:
//!
//! - the managed owner is dropped (the resource became unreachable), or
//! - the [`Lifespan`] the guard is registered to is reset or ended.
//!
//! The release action receives the [`ReleaseCause`]. On [`ReleaseCause::LifespanEnded`] the native
//! memory is already gone and the action must only do bookkeeping.
//!
//! Owners dropped off the mutator can defer the release to a [`ReleaseQueue`] that the mutator
//! drains later.

use std::{
    fmt::Debug,
    marker::PhantomData,
    sync::{
        atomic::{AtomicU64, AtomicU8, Ordering},
        Arc,
    },
    thread::ThreadId,
};

use bitflags::bitflags;
use catmirror_common::{
    error::{Error, Result},
    key::Address,
    metrics::Metrics,
    mutator::Mutator,
    strict_assert,
};
use parking_lot::{Condvar, Mutex};

use crate::lifespan::{Lifespan, WeakLifespan};

static GUARD_ID: AtomicU64 = AtomicU64::new(1);

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    struct GuardFlags: u8 {
        /// The owner was dropped and the release is queued for the mutator.
        const PENDING = 0b0001;
        /// A lifespan teardown is in progress; no new pins are accepted.
        const CLOSING = 0b0010;
        /// A release action is running.
        const RELEASING = 0b1000;
        /// Terminal.
        const RELEASED = 0b0100;
    }
}

/// Why a guard released its resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReleaseCause {
    /// The managed owner was dropped while the native side was intact.
    Unreachable,
    /// The governing lifespan was torn down. Native memory must not be touched.
    LifespanEnded,
}

/// The release action of a guard.
pub type ReleaseFn = Box<dyn FnOnce(Address, ReleaseCause) + Send + 'static>;

#[derive(Debug, Default)]
struct PinState {
    holders: Vec<ThreadId>,
    /// Teardown was requested by a thread that held a pin itself.
    deferred: bool,
}

pub(crate) struct GuardInner {
    id: u64,
    what: &'static str,
    handle: Address,
    flags: AtomicU8,
    pins: Mutex<PinState>,
    unpinned: Condvar,
    action: Mutex<Option<ReleaseFn>>,
    lifespan: Mutex<Option<WeakLifespan>>,
    pub(crate) metrics: Arc<Metrics>,
}

impl GuardInner {
    pub(crate) fn id(&self) -> u64 {
        self.id
    }

    fn flags(&self) -> GuardFlags {
        GuardFlags::from_bits_truncate(self.flags.load(Ordering::Acquire))
    }

    fn set(&self, flags: GuardFlags) -> GuardFlags {
        GuardFlags::from_bits_truncate(self.flags.fetch_or(flags.bits(), Ordering::AcqRel))
    }

    pub(crate) fn link(&self, lifespan: WeakLifespan) {
        *self.lifespan.lock() = Some(lifespan);
    }

    pub(crate) fn unlink(&self) {
        self.lifespan.lock().take();
    }

    /// Claim the release. Exactly one caller ever succeeds.
    fn claim(&self) -> bool {
        !self
            .set(GuardFlags::RELEASING)
            .intersects(GuardFlags::RELEASING | GuardFlags::RELEASED)
    }

    /// Attempt the terminal transition. Only the winner runs the release action.
    fn release(&self, cause: ReleaseCause) -> bool {
        if !self.claim() {
            return false;
        }
        self.run(cause);
        true
    }

    /// Run the action of a claimed release, then wake a teardown waiting for it.
    fn run(&self, cause: ReleaseCause) {
        match cause {
            ReleaseCause::Unreachable => self.metrics.guard_release_unreachable.increase(1),
            ReleaseCause::LifespanEnded => self.metrics.guard_release_lifespan.increase(1),
        }
        tracing::debug!("[guard]: release {} {} ({cause:?})", self.what, self.handle);

        let action = self.action.lock().take();
        if let Some(action) = action {
            action(self.handle, cause);
        }

        if cause == ReleaseCause::Unreachable {
            let lifespan = self.lifespan.lock().take();
            if let Some(lifespan) = lifespan.and_then(|l| l.upgrade()) {
                lifespan.forget(self.id);
            }
        }

        let _pins = self.pins.lock();
        self.set(GuardFlags::RELEASED);
        self.unpinned.notify_all();
    }

    /// Mark released without running the action.
    fn discard(&self) {
        self.set(GuardFlags::RELEASING | GuardFlags::RELEASED);
        let action = self.action.lock().take();
        drop(action);
    }

    /// Release on lifespan teardown.
    ///
    /// Waits for pins held by other threads, and for an unreachable release whose action is
    /// still running. If the calling thread holds a pin itself, the release is deferred to its
    /// final unpin. Returns `true` if this call released the guard.
    pub(crate) fn release_by_lifespan(&self) -> bool {
        let me = std::thread::current().id();
        let mut pins = self.pins.lock();
        self.set(GuardFlags::CLOSING);
        loop {
            let flags = self.flags();
            if flags.contains(GuardFlags::RELEASED) {
                return false;
            }
            if flags.contains(GuardFlags::RELEASING) {
                tracing::trace!(
                    "[guard]: teardown of {} {} waits for a running release",
                    self.what,
                    self.handle
                );
                self.unpinned.wait(&mut pins);
                continue;
            }
            if pins.holders.contains(&me) {
                pins.deferred = true;
                tracing::warn!(
                    "[guard]: {} {} is pinned by the tearing down thread, defer release to unpin",
                    self.what,
                    self.handle
                );
                return false;
            }
            if pins.holders.is_empty() && self.claim() {
                break;
            }
            if !pins.holders.is_empty() {
                tracing::trace!(
                    "[guard]: teardown of {} {} waits for {} pin(s)",
                    self.what,
                    self.handle,
                    pins.holders.len()
                );
                self.unpinned.wait(&mut pins);
            }
        }
        drop(pins);
        self.run(ReleaseCause::LifespanEnded);
        true
    }

    fn unpin(&self) {
        let me = std::thread::current().id();
        let mut pins = self.pins.lock();
        let pos = pins.holders.iter().position(|holder| *holder == me);
        strict_assert!(pos.is_some());
        if let Some(pos) = pos {
            pins.holders.swap_remove(pos);
        }
        if !pins.holders.is_empty() {
            return;
        }
        if std::mem::take(&mut pins.deferred) {
            drop(pins);
            self.release(ReleaseCause::LifespanEnded);
        } else {
            self.unpinned.notify_all();
        }
    }
}

/// Queue of guards whose owners were dropped off the mutator.
///
/// A queue may be bound to the one mutator allowed to drain it.
#[derive(Clone, Default)]
pub struct ReleaseQueue {
    guards: Arc<Mutex<Vec<Arc<GuardInner>>>>,
    /// Id of the bound mutator, 0 if unbound.
    owner: Arc<AtomicU64>,
}

impl Debug for ReleaseQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReleaseQueue").field("len", &self.len()).finish()
    }
}

impl ReleaseQueue {
    /// Create an empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind the queue to `mutator`. Fails if another mutator is bound.
    pub fn bind(&self, mutator: &Mutator) -> bool {
        let id = mutator.id();
        match self.owner.compare_exchange(0, id, Ordering::AcqRel, Ordering::Acquire) {
            Ok(_) => true,
            Err(owner) => owner == id,
        }
    }

    /// Unbind `mutator`. Returns `true` if it was bound.
    pub fn unbind(&self, mutator: &Mutator) -> bool {
        self.owner
            .compare_exchange(mutator.id(), 0, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Id of the bound mutator.
    pub fn owner(&self) -> Option<u64> {
        match self.owner.load(Ordering::Acquire) {
            0 => None,
            id => Some(id),
        }
    }

    fn push(&self, guard: Arc<GuardInner>) {
        self.guards.lock().push(guard);
    }

    /// Number of queued guards.
    pub fn len(&self) -> usize {
        self.guards.lock().len()
    }

    /// Returns `true` if nothing is queued.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Release every queued guard not already released by a lifespan teardown.
    ///
    /// Returns the number of guards released by this call.
    pub fn drain(&self, mutator: &Mutator) -> usize {
        strict_assert!(self.owner().is_none_or(|owner| owner == mutator.id()));
        let guards = std::mem::take(&mut *self.guards.lock());
        let released = guards
            .iter()
            .filter(|guard| guard.release(ReleaseCause::Unreachable))
            .count();
        if !guards.is_empty() {
            tracing::debug!(
                "[guard]: mutator {} drained {} queued guard(s), released {released}",
                mutator.id(),
                guards.len()
            );
        }
        released
    }
}

/// Builder of [`DualState`].
pub struct DualStateBuilder {
    handle: Address,
    what: &'static str,
    action: Option<ReleaseFn>,
    queue: Option<ReleaseQueue>,
    metrics: Option<Arc<Metrics>>,
}

impl Debug for DualStateBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DualStateBuilder")
            .field("handle", &self.handle)
            .field("what", &self.what)
            .finish()
    }
}

impl DualStateBuilder {
    /// Name of the guarded resource kind, used in errors and logs.
    pub fn with_name(mut self, what: &'static str) -> Self {
        self.what = what;
        self
    }

    /// Set the release action.
    pub fn on_release<F>(mut self, action: F) -> Self
    where
        F: FnOnce(Address, ReleaseCause) + Send + 'static,
    {
        self.action = Some(Box::new(action));
        self
    }

    /// Defer unreachable releases to `queue`.
    pub fn deferred_to(mut self, queue: ReleaseQueue) -> Self {
        self.queue = Some(queue);
        self
    }

    /// Set the metrics. Noop metrics are used if unset.
    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Build a guard not registered to any lifespan.
    pub fn build(self) -> DualState {
        let inner = GuardInner {
            id: GUARD_ID.fetch_add(1, Ordering::Relaxed),
            what: self.what,
            handle: self.handle,
            flags: AtomicU8::new(GuardFlags::empty().bits()),
            pins: Mutex::new(PinState::default()),
            unpinned: Condvar::new(),
            action: Mutex::new(self.action),
            lifespan: Mutex::new(None),
            metrics: self.metrics.unwrap_or_else(|| Arc::new(Metrics::noop())),
        };
        DualState {
            inner: Arc::new(inner),
            queue: self.queue,
        }
    }

    /// Build a guard and register it to `lifespan`.
    ///
    /// If the lifespan has already ended, the guard is discarded without running its action.
    pub fn register(self, lifespan: &Lifespan) -> Result<DualState> {
        let guard = self.build();
        if let Err(e) = lifespan.register(&guard) {
            guard.inner.discard();
            return Err(e);
        }
        Ok(guard)
    }
}

/// Managed owner of a natively allocated resource.
///
/// Dropping the owner releases the resource with [`ReleaseCause::Unreachable`], immediately or
/// through the release queue, unless a lifespan teardown released it first.
pub struct DualState {
    inner: Arc<GuardInner>,
    queue: Option<ReleaseQueue>,
}

impl Debug for DualState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DualState")
            .field("id", &self.inner.id)
            .field("what", &self.inner.what)
            .field("handle", &self.inner.handle)
            .field("flags", &self.inner.flags())
            .finish()
    }
}

impl DualState {
    /// Create a builder guarding `handle`.
    pub fn builder(handle: Address) -> DualStateBuilder {
        DualStateBuilder {
            handle,
            what: "resource",
            action: None,
            queue: None,
            metrics: None,
        }
    }

    pub(crate) fn inner(&self) -> &Arc<GuardInner> {
        &self.inner
    }

    /// Unique id of the guard.
    pub fn id(&self) -> u64 {
        self.inner.id
    }

    /// Returns `true` once the resource has been released, or its release has started.
    pub fn is_released(&self) -> bool {
        self.inner
            .flags()
            .intersects(GuardFlags::RELEASED | GuardFlags::RELEASING | GuardFlags::CLOSING)
    }

    /// The native handle.
    ///
    /// Fails with [`ErrorKind::Released`](catmirror_common::error::ErrorKind::Released) after
    /// release. The handle is not protected from a concurrent teardown; use [`DualState::pin`]
    /// when reading through it off the mutator.
    pub fn handle(&self) -> Result<Address> {
        if self.is_released() {
            return Err(Error::released(self.inner.what, self.inner.handle));
        }
        Ok(self.inner.handle)
    }

    /// Pin the resource. A lifespan teardown waits until every pin is dropped.
    ///
    /// Fails with [`ErrorKind::Released`](catmirror_common::error::ErrorKind::Released) after
    /// release or once a teardown has started.
    pub fn pin(&self) -> Result<Pin<'_>> {
        let mut pins = self.inner.pins.lock();
        if self.is_released() {
            return Err(Error::released(self.inner.what, self.inner.handle));
        }
        pins.holders.push(std::thread::current().id());
        Ok(Pin {
            inner: &self.inner,
            _marker: PhantomData,
        })
    }
}

impl Drop for DualState {
    fn drop(&mut self) {
        match self.queue.as_ref() {
            Some(queue) => {
                let prev = self.inner.set(GuardFlags::PENDING);
                if !prev.intersects(GuardFlags::RELEASING | GuardFlags::RELEASED) {
                    tracing::trace!(
                        "[guard]: queue release of {} {}",
                        self.inner.what,
                        self.inner.handle
                    );
                    queue.push(self.inner.clone());
                }
            }
            None => {
                self.inner.release(ReleaseCause::Unreachable);
            }
        }
    }
}

/// A pin on a [`DualState`]. Unpins on drop.
///
/// Pins are bound to the thread that took them.
pub struct Pin<'a> {
    inner: &'a GuardInner,
    _marker: PhantomData<*const ()>,
}

impl Debug for Pin<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pin").field("handle", &self.inner.handle).finish()
    }
}

impl Pin<'_> {
    /// The pinned native handle, valid until the pin is dropped.
    pub fn handle(&self) -> Address {
        self.inner.handle
    }
}

impl Drop for Pin<'_> {
    fn drop(&mut self) {
        self.inner.unpin();
    }
}
