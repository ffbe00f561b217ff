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

use catmirror_common::{error::Result, key::Address, mutator::Mutator};
use catmirror_memory::{Access, IdentityCacheBuilder, Lifespan, LocalIdentityCache, Retention};

use crate::{
    catalog::Catalog,
    dispatch::{Cascade, Dispatched, Signal},
};

/// The mutator's view of a catalog.
///
/// A session owns the [`Mutator`] token, so it never leaves the thread that created it. Values
/// of mirror objects that need the backend are computed through
/// [`Session::access`]; invalidation signals are delivered through [`Session::dispatch`].
#[derive(Debug)]
pub struct Session {
    mutator: Mutator,
    catalog: Catalog,
    lifespans: LocalIdentityCache<Address, Lifespan>,
}

impl Session {
    /// Designate the current thread as the mutator of `catalog`.
    ///
    /// A catalog has at most one session at a time. Fails with
    /// [`ErrorKind::WrongContext`](catmirror_common::error::ErrorKind::WrongContext) while another
    /// session of the catalog is alive, on any thread.
    pub fn new(catalog: Catalog) -> Result<Self> {
        let mutator = Mutator::new();
        catalog.bind_mutator(&mutator)?;
        let lifespans = IdentityCacheBuilder::new()
            .with_name("lifespan")
            .with_retention(Retention::Strong)
            .with_metrics(catalog.metrics().clone())
            .build_local();
        Ok(Self {
            mutator,
            catalog,
            lifespans,
        })
    }

    /// The mutator token.
    pub fn mutator(&self) -> &Mutator {
        &self.mutator
    }

    /// The catalog.
    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    /// Access for reading mirror values on the mutator.
    pub fn access(&self) -> Access<'_, Session> {
        Access::Mutator(self)
    }

    /// The lifespan mirroring the backend's current native scope.
    pub fn current_lifespan(&self) -> Result<Lifespan> {
        let (address, kind) = self.catalog.backend().current_lifespan(&self.mutator);
        self.lifespans
            .lookup_or_create(&address, |address| Ok(Lifespan::new(*address, kind)))
            .map(|lifespan| lifespan.as_ref().clone())
    }

    /// The lifespan mirroring the native scope at `address`, if mirrored.
    pub fn lifespan(&self, address: Address) -> Option<Lifespan> {
        self.lifespans.get(&address).map(|lifespan| lifespan.as_ref().clone())
    }

    pub(crate) fn forget_lifespan(&self, address: Address) -> Option<Lifespan> {
        self.lifespans
            .evict(&self.mutator, &address)
            .map(|lifespan| lifespan.as_ref().clone())
    }

    /// Deliver one invalidation signal.
    pub fn dispatch(&self, signal: Signal) -> Dispatched {
        self.dispatch_all([signal])
    }

    /// Deliver a burst of invalidation signals.
    ///
    /// Every cell trip of the burst is applied before anything else happens, so no
    /// recomputation can observe a partially invalidated dependency graph.
    pub fn dispatch_all(&self, signals: impl IntoIterator<Item = Signal>) -> Dispatched {
        let mut cascade = Cascade::default();
        for signal in signals {
            self.catalog.metrics().dispatch_signal.increase(1);
            tracing::debug!("[session]: mutator {} dispatch {signal:?}", self.mutator.id());
            cascade.collect(self, signal);
        }
        cascade.commit(self)
    }

    /// Release native resources whose mirrors were dropped since the last call.
    pub fn drain_releases(&self) -> usize {
        self.catalog.release_queue().drain(&self.mutator)
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.catalog.unbind_mutator(&self.mutator);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use catmirror_common::error::ErrorKind;

    use super::*;
    use crate::test_utils::FakeBackend;

    #[test_log::test]
    fn test_one_session_per_catalog() {
        let catalog = Catalog::builder(Arc::new(FakeBackend::new())).build().unwrap();
        let session = Session::new(catalog.clone()).unwrap();
        assert!(catalog.is_mutator(session.mutator()));

        let other = catalog.clone();
        let err = std::thread::spawn(move || Session::new(other).map(|_| ()).unwrap_err())
            .join()
            .unwrap();
        assert_eq!(err.kind(), ErrorKind::WrongContext);
        assert_eq!(
            Session::new(catalog.clone()).unwrap_err().kind(),
            ErrorKind::WrongContext
        );

        drop(session);
        let session = Session::new(catalog.clone()).unwrap();
        assert!(catalog.is_mutator(session.mutator()));
    }
}
