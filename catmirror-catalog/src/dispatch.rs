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

//! Invalidation dispatch.
//!
//! The backend reports coarse signals: a catalog row changed or disappeared, a native scope was
//! reset or deleted. Each signal of a burst is resolved against the live mirrors into a
//! [`Cascade`], following the per-kind dependencies, and the cascade is committed in order:
//!
//! 1. trip every collected gate,
//! 2. evict deleted mirrors from their identity caches,
//! 3. tear down the signalled lifespans,
//! 4. release native resources whose mirrors were dropped.

use std::sync::Arc;

use catmirror_common::{
    key::{Address, CatalogKey, Oid},
    strict_assert,
};
use catmirror_memory::{Gate, IdentityCache, TripBatch};
use itertools::Itertools;

use crate::{
    catalog::Catalog,
    class::CatalogClass,
    session::Session,
};

/// What happened to a catalog row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Change {
    /// Updated in place. Mirrors stay and recompute on next read.
    Updated,
    /// Deleted. Mirrors are evicted.
    Deleted,
}

/// What happened to a native scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifespanEvent {
    /// Reset: its memory was freed, the scope stays usable.
    Reset,
    /// Deleted.
    Deleted,
}

/// An invalidation signal delivered by the backend on the mutator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    /// A catalog row changed. [`Oid::INVALID`] as object means every row of the class.
    Catalog {
        /// Oid of the catalog class.
        class: Oid,
        /// Oid of the row.
        object: Oid,
        /// What happened.
        change: Change,
    },
    /// A native scope was reset or deleted.
    Lifespan {
        /// Address of the scope.
        address: Address,
        /// What happened.
        event: LifespanEvent,
    },
    /// Every cached value may be stale.
    All,
}

impl Signal {
    /// Row `object` of `class` was updated.
    pub fn updated(class: Oid, object: Oid) -> Self {
        Self::Catalog {
            class,
            object,
            change: Change::Updated,
        }
    }

    /// Row `object` of `class` was deleted.
    pub fn deleted(class: Oid, object: Oid) -> Self {
        Self::Catalog {
            class,
            object,
            change: Change::Deleted,
        }
    }
}

/// Outcome of a dispatched burst.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Dispatched {
    /// Cells tripped.
    pub tripped: usize,
    /// Identity entries evicted.
    pub evicted: usize,
    /// Native resources released.
    pub released: usize,
}

/// The effects of a burst of signals, collected before any is applied.
#[derive(Debug, Default)]
pub(crate) struct Cascade {
    trips: TripBatch,
    evictions: Vec<CatalogKey>,
    teardowns: Vec<(Address, LifespanEvent)>,
}

fn targets<V>(cache: &IdentityCache<CatalogKey, V>, key: CatalogKey) -> Vec<Arc<V>>
where
    V: Send + Sync + 'static,
{
    if key.object.is_valid() {
        cache.get(&key).into_iter().collect()
    } else {
        cache.live().into_iter().map(|(_, value)| value).collect()
    }
}

impl Cascade {
    pub(crate) fn trip(&mut self, gate: &Gate) {
        self.trips.add(gate);
    }

    pub(crate) fn evict(&mut self, key: CatalogKey) {
        if !self.evictions.contains(&key) {
            self.evictions.push(key);
        }
    }

    pub(crate) fn collect(&mut self, session: &Session, signal: Signal) {
        let catalog = session.catalog();
        match signal {
            Signal::Catalog { class, object, change } => match CatalogClass::from_oid(class) {
                Some(class) => self.collect_catalog(catalog, class, object, change),
                None => tracing::trace!("[dispatch]: ignore signal of unmirrored class {class}"),
            },
            Signal::Lifespan { address, event } => self.teardowns.push((address, event)),
            Signal::All => {
                for class in CatalogClass::ALL {
                    self.collect_catalog(catalog, class, Oid::INVALID, Change::Updated);
                }
            }
        }
    }

    fn collect_catalog(&mut self, catalog: &Catalog, class: CatalogClass, object: Oid, change: Change) {
        let key = CatalogKey::new(class.oid(), object);
        match class {
            CatalogClass::Namespace => targets(catalog.namespaces(), key)
                .iter()
                .for_each(|ns| ns.invalidate(catalog, self, change)),
            CatalogClass::Relation => targets(catalog.relations(), key)
                .iter()
                .for_each(|rel| rel.invalidate(catalog, self, change)),
            // Attribute rows belong to their relation: any change of them is an update of the
            // relation, keyed by its oid.
            CatalogClass::Attribute => targets(catalog.relations(), CatalogKey::new(CatalogClass::Relation.oid(), object))
                .iter()
                .for_each(|rel| rel.invalidate(catalog, self, Change::Updated)),
            // Every type modifier of a type shares its row.
            CatalogClass::Type => {
                let types = if object.is_valid() {
                    catalog.types_of(object)
                } else {
                    catalog.types().live().into_iter().map(|(_, ty)| ty).collect()
                };
                types.iter().for_each(|ty| ty.invalidate(catalog, self, change));
            }
            CatalogClass::Routine => targets(catalog.routines(), key)
                .iter()
                .for_each(|routine| routine.invalidate(catalog, self, change)),
            CatalogClass::Language => targets(catalog.languages(), key)
                .iter()
                .for_each(|lang| lang.invalidate(catalog, self, change)),
        }
    }

    pub(crate) fn commit(self, session: &Session) -> Dispatched {
        let mutator = session.mutator();
        let catalog = session.catalog();
        strict_assert!(catalog.is_mutator(mutator));
        let mut dispatched = Dispatched::default();

        dispatched.tripped = self.trips.commit(mutator);

        dispatched.evicted = self
            .evictions
            .iter()
            .filter(|key| {
                CatalogClass::from_oid(key.class).is_some_and(|class| catalog.evict(mutator, class, key))
            })
            .count();

        if !self.teardowns.is_empty() {
            for (address, event) in self.teardowns.iter().copied() {
                let released = match event {
                    LifespanEvent::Reset => session.lifespan(address).map(|l| l.reset(mutator)),
                    LifespanEvent::Deleted => session.forget_lifespan(address).map(|l| l.end(mutator)),
                };
                dispatched.released += released.unwrap_or_default();
            }

            // Record types memoizing a descriptor released by the teardown must look it up again,
            // and the released addresses may be reused by the backend.
            let mut stale = TripBatch::default();
            catalog
                .types()
                .live()
                .iter()
                .filter(|(_, ty)| ty.holds_released_descriptor())
                .for_each(|(_, ty)| stale.add(ty.gate()));
            dispatched.tripped += stale.commit(mutator);

            let released = catalog
                .descriptors()
                .live()
                .into_iter()
                .filter(|(_, descriptor)| descriptor.is_released())
                .map(|(address, _)| address)
                .collect_vec();
            for address in released {
                if catalog.descriptors().evict(mutator, &address).is_some() {
                    dispatched.evicted += 1;
                }
            }
        }

        dispatched.released += session.drain_releases();
        catalog.metrics().cell_trip.increase(dispatched.tripped as u64);

        tracing::debug!(
            "[dispatch]: mutator {} committed cascade: {} tripped, {} evicted, {} released",
            mutator.id(),
            dispatched.tripped,
            dispatched.evicted,
            dispatched.released
        );
        dispatched
    }
}

#[cfg(test)]
mod tests {
    use catmirror_common::error::ErrorKind;
    use catmirror_memory::{Access, LifespanKind, MirrorState};

    use super::*;
    use crate::{
        backend::EncodingInfo,
        class::{ATTRIBUTE, LANGUAGE, RECORD_TYPE, RELATION, ROUTINE, TYPE},
        object::Mirror,
        test_utils::FakeBackend,
    };

    const PG_CATALOG: Oid = Oid(11);
    const INT4: Oid = Oid(23);
    const TEXT: Oid = Oid(25);
    const TABLE: Oid = Oid(100);
    const TABLE_TYPE: Oid = Oid(200);
    const PLPGSQL: Oid = Oid(13);
    const FUNC: Oid = Oid(500);

    fn fixture() -> (Arc<FakeBackend>, Session) {
        let backend = Arc::new(FakeBackend::new());
        backend.put_namespace(PG_CATALOG, "pg_catalog", Oid(10));
        backend.put_scalar_type(INT4, "int4", 4, true);
        backend.put_scalar_type(TEXT, "text", -1, false);
        backend.put_relation(TABLE, "t", PG_CATALOG, TABLE_TYPE, 3);
        backend.put_attribute(TABLE, 1, "col1", INT4, -1);
        backend.put_attribute(TABLE, 2, "col2", TEXT, -1);
        backend.put_attribute(TABLE, 3, "col3", INT4, -1);
        backend.put_composite_type(TABLE_TYPE, "t", TABLE);
        backend.put_record_type();
        backend.put_language(PLPGSQL, "plpgsql", true);
        backend.put_routine(FUNC, "f", PG_CATALOG, PLPGSQL, &[INT4], Some("begin end"));

        let catalog = Catalog::builder(backend.clone()).build().unwrap();
        (backend, Session::new(catalog).unwrap())
    }

    #[test_log::test]
    fn test_update_recomputes_on_next_read() {
        let (backend, session) = fixture();
        let attribute = session.catalog().attribute(TABLE, 3).unwrap();

        assert_eq!(attribute.name(session.access()).unwrap().as_str(), "col3");
        let searches = backend.searches();
        assert_eq!(attribute.name(session.access()).unwrap().as_str(), "col3");
        assert_eq!(backend.searches(), searches);

        backend.put_attribute(TABLE, 3, "renamed", INT4, -1);
        assert_eq!(attribute.name(session.access()).unwrap().as_str(), "col3");

        let dispatched = session.dispatch(Signal::updated(ATTRIBUTE, TABLE));
        assert!(dispatched.tripped >= 1);
        assert_eq!(dispatched.evicted, 0);
        assert_eq!(attribute.state(), MirrorState::Stale);

        assert_eq!(attribute.name(session.access()).unwrap().as_str(), "renamed");
        assert!(backend.searches() > searches);
        assert!(Arc::ptr_eq(&attribute, &session.catalog().attribute(TABLE, 3).unwrap()));
    }

    #[test_log::test]
    fn test_language_cascades_to_routines() {
        let (_backend, session) = fixture();
        let catalog = session.catalog();
        let routine = catalog.routine(FUNC).unwrap();
        let language = routine.language(session.access()).unwrap();
        assert_eq!(language.name(session.access()).unwrap().as_str(), "plpgsql");
        assert_eq!(language.routines(), vec![FUNC]);
        assert_eq!(routine.state(), MirrorState::Populated);

        session.dispatch(Signal::updated(LANGUAGE, PLPGSQL));
        assert_eq!(language.state(), MirrorState::Stale);
        assert_eq!(routine.state(), MirrorState::Stale);
        assert!(language.routines().is_empty());

        // Recomputing the routine registers it again.
        assert!(Arc::ptr_eq(&routine.language(session.access()).unwrap(), &language));
        assert_eq!(language.routines(), vec![FUNC]);
    }

    #[test_log::test]
    fn test_relation_cascades_to_composite_type() {
        let (backend, session) = fixture();
        let catalog = session.catalog();
        let ty = catalog.ty(TABLE_TYPE).unwrap();
        assert!(ty.is_composite(session.access()).unwrap());

        let descriptor = ty.descriptor(session.access()).unwrap().unwrap();
        assert_eq!(descriptor.relation(), Some(TABLE));
        assert!(!descriptor.is_native());
        assert_eq!(
            descriptor.columns().iter().map(|c| c.type_oid).collect_vec(),
            vec![INT4, TEXT, INT4]
        );

        backend.put_attribute(TABLE, 2, "col2", INT4, -1);
        session.dispatch(Signal::updated(RELATION, TABLE));
        assert_eq!(ty.state(), MirrorState::Stale);

        let descriptor = ty.descriptor(session.access()).unwrap().unwrap();
        assert_eq!(
            descriptor.columns().iter().map(|c| c.type_oid).collect_vec(),
            vec![INT4, INT4, INT4]
        );
    }

    #[test_log::test]
    fn test_relation_deletion_trips_type_resolving_it() {
        let (backend, session) = fixture();
        let catalog = session.catalog();
        let ty = catalog.ty(TABLE_TYPE).unwrap();
        let relation = ty.relation(session.access()).unwrap().unwrap();
        assert_eq!(relation.oid(), TABLE);
        assert_eq!(ty.state(), MirrorState::Populated);

        backend.remove(relation.key());
        session.dispatch(Signal::deleted(RELATION, TABLE));
        assert_eq!(relation.state(), MirrorState::Evicted);
        assert_eq!(ty.state(), MirrorState::Stale);

        // The type resolves the fresh mirror of the relation.
        let fresh = ty.relation(session.access()).unwrap().unwrap();
        assert!(!Arc::ptr_eq(&fresh, &relation));
    }

    #[test_log::test]
    fn test_type_signal_reaches_every_typmod() {
        let (_backend, session) = fixture();
        let catalog = session.catalog();
        let int4 = catalog.ty(INT4).unwrap();
        let int4_mods = [4, 8].map(|typmod| catalog.type_with_typmod(INT4, typmod).unwrap());
        let text = catalog.ty(TEXT).unwrap();
        assert_eq!(catalog.types_of(INT4).len(), 3);
        assert_eq!(catalog.types_of(TEXT).len(), 1);
        assert!(catalog.types_of(Oid(9999)).is_empty());

        int4.name(session.access()).unwrap();
        int4_mods.iter().for_each(|ty| assert_eq!(ty.name(session.access()).unwrap().as_str(), "int4"));
        text.name(session.access()).unwrap();

        session.dispatch(Signal::updated(TYPE, INT4));
        assert_eq!(int4.state(), MirrorState::Stale);
        assert!(int4_mods.iter().all(|ty| ty.state() == MirrorState::Stale));
        assert_eq!(text.state(), MirrorState::Populated);

        let dispatched = session.dispatch(Signal::deleted(TYPE, INT4));
        assert_eq!(dispatched.evicted, 3);
        assert!(catalog.types_of(INT4).is_empty());
        assert_eq!(catalog.types_of(TEXT).len(), 1);
    }

    #[test_log::test]
    fn test_deletion_evicts_relation_and_attributes() {
        let (backend, session) = fixture();
        let catalog = session.catalog();
        let relation = catalog.relation(TABLE).unwrap();
        let attribute = catalog.attribute(TABLE, 1).unwrap();
        assert_eq!(relation.name(session.access()).unwrap().as_str(), "t");

        backend.remove(relation.key());
        let dispatched = session.dispatch(Signal::deleted(RELATION, TABLE));
        assert_eq!(dispatched.evicted, 2);
        assert_eq!(relation.state(), MirrorState::Evicted);
        assert_eq!(attribute.state(), MirrorState::Evicted);

        let fresh = catalog.relation(TABLE).unwrap();
        assert!(!Arc::ptr_eq(&fresh, &relation));
        assert_eq!(fresh.name(session.access()).unwrap_err().kind(), ErrorKind::NotFound);
    }

    #[test_log::test]
    fn test_whole_class_and_all() {
        let (_backend, session) = fixture();
        let catalog = session.catalog();
        let routine = catalog.routine(FUNC).unwrap();
        let int4 = catalog.ty(INT4).unwrap();
        let int4_mod = catalog.type_with_typmod(INT4, 8).unwrap();
        routine.name(session.access()).unwrap();
        int4.name(session.access()).unwrap();
        int4_mod.name(session.access()).unwrap();

        session.dispatch(Signal::updated(ROUTINE, Oid::INVALID));
        assert_eq!(routine.state(), MirrorState::Stale);
        assert_eq!(int4.state(), MirrorState::Populated);

        // Every type modifier shares the row of the type.
        session.dispatch(Signal::updated(TYPE, INT4));
        assert_eq!(int4.state(), MirrorState::Stale);
        assert_eq!(int4_mod.state(), MirrorState::Stale);

        routine.name(session.access()).unwrap();
        int4.name(session.access()).unwrap();
        session.dispatch(Signal::All);
        assert_eq!(routine.state(), MirrorState::Stale);
        assert_eq!(int4.state(), MirrorState::Stale);

        assert_eq!(session.dispatch(Signal::updated(Oid(9999), FUNC)), Dispatched::default());
    }

    #[test_log::test]
    fn test_record_descriptor_lifecycle() {
        let (backend, session) = fixture();
        let catalog = session.catalog();
        let record = catalog.record_type(7).unwrap();
        assert!(record.is_interned_record());

        // Not interned yet, and not memoized as such.
        assert!(record.descriptor(session.access()).unwrap().is_none());
        let address = backend.intern_record(7, &[INT4, TEXT]);

        let descriptor = record.descriptor(session.access()).unwrap().unwrap();
        assert!(descriptor.is_native());
        assert_eq!(descriptor.typmod(), 7);
        assert_eq!(descriptor.type_oid(), RECORD_TYPE);
        assert_eq!(descriptor.natts(), 2);
        assert_eq!(backend.references(address), 1);
        assert!(Arc::ptr_eq(&descriptor, &record.descriptor(session.access()).unwrap().unwrap()));
        assert_eq!(descriptor.pin().unwrap().unwrap().handle(), address);

        let dispatched = session.dispatch(Signal::Lifespan {
            address: FakeBackend::TOP_LIFESPAN,
            event: LifespanEvent::Reset,
        });
        assert_eq!(dispatched.released, 1);
        assert!(descriptor.is_released());
        assert_eq!(descriptor.pin().unwrap_err().kind(), ErrorKind::Released);
        // The backend freed it with its scope.
        assert!(backend.released().is_empty());
        assert_eq!(record.state(), MirrorState::Stale);
        assert!(catalog.descriptors().get(&address).is_none());

        let fresh = record.descriptor(session.access()).unwrap().unwrap();
        assert!(!Arc::ptr_eq(&fresh, &descriptor));
        assert!(!fresh.is_released());
        assert_eq!(backend.references(address), 2);
    }

    #[test_log::test]
    fn test_dropped_descriptor_released_on_drain() {
        let (backend, session) = fixture();
        let address = backend.intern_record(8, &[INT4]);
        let record = session.catalog().record_type(8).unwrap();
        let descriptor = record.descriptor(session.access()).unwrap().unwrap();
        let lifespan = session.lifespan(FakeBackend::TOP_LIFESPAN).unwrap();
        assert_eq!(lifespan.len(), 1);

        drop(descriptor);
        drop(record);
        assert!(backend.released().is_empty());

        assert_eq!(session.drain_releases(), 1);
        assert_eq!(backend.released(), vec![address]);
        assert_eq!(backend.references(address), 0);
        assert!(lifespan.is_empty());
    }

    #[test_log::test]
    fn test_deleted_lifespan_is_forgotten() {
        let (backend, session) = fixture();
        let scope = Address(0x20);
        backend.set_lifespan(scope, LifespanKind::ResourceOwner);
        backend.intern_record(9, &[INT4]);
        let record = session.catalog().record_type(9).unwrap();
        let descriptor = record.descriptor(session.access()).unwrap().unwrap();
        let lifespan = session.lifespan(scope).unwrap();
        assert_eq!(lifespan.kind(), LifespanKind::ResourceOwner);

        let dispatched = session.dispatch(Signal::Lifespan {
            address: scope,
            event: LifespanEvent::Deleted,
        });
        assert_eq!(dispatched.released, 1);
        assert!(descriptor.is_released());
        assert!(lifespan.is_ended());
        assert!(session.lifespan(scope).is_none());
    }

    #[test_log::test]
    fn test_reader_access() {
        let (backend, session) = fixture();
        backend.put_encoding(EncodingInfo {
            id: 6,
            name: "UTF8".to_string(),
            max_char_len: 4,
            server_safe: true,
        });
        let catalog = session.catalog();
        let encoding = catalog.encoding(6).unwrap();
        let relation = catalog.relation(TABLE).unwrap();

        std::thread::scope(|s| {
            s.spawn(|| {
                assert_eq!(encoding.name(Access::Reader).unwrap(), "UTF8");
                assert_eq!(encoding.max_char_len(Access::Reader).unwrap(), 4);
                // Locating the row needs the mutator.
                assert_eq!(
                    relation.name(Access::Reader).unwrap_err().kind(),
                    ErrorKind::WrongContext
                );
            });
        });

        relation.name(session.access()).unwrap();
        std::thread::scope(|s| {
            s.spawn(|| assert_eq!(relation.name(Access::Reader).unwrap().as_str(), "t"));
        });

        assert_eq!(catalog.encoding(99).unwrap().name(Access::Reader).unwrap_err().kind(), ErrorKind::NotFound);
    }
}
