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

//! Catalog scenarios: recomputation after a trip, cascades and cross-thread visibility.

use std::{sync::Arc, thread};

use catmirror::{
    catalog::{
        class::{ATTRIBUTE, LANGUAGE, RELATION},
        test_utils::FakeBackend,
    },
    Access, Catalog, CatalogKey, ErrorKind, Mirror, MirrorState, Oid, Session, Signal,
};
use itertools::Itertools;

const PUBLIC: Oid = Oid(2200);
const INT4: Oid = Oid(23);
const TABLE: Oid = Oid(100);
const TABLE_TYPE: Oid = Oid(200);
const PLPGSQL: Oid = Oid(13);

fn session() -> (Arc<FakeBackend>, Session) {
    let backend = Arc::new(FakeBackend::new());
    backend.put_namespace(PUBLIC, "public", Oid(10));
    backend.put_scalar_type(INT4, "int4", 4, true);
    backend.put_relation(TABLE, "t", PUBLIC, TABLE_TYPE, 3);
    for attnum in 1..=3 {
        backend.put_attribute(TABLE, attnum, &format!("col{attnum}"), INT4, -1);
    }
    backend.put_composite_type(TABLE_TYPE, "t", TABLE);
    backend.put_language(PLPGSQL, "plpgsql", true);
    for oid in 500..505 {
        backend.put_routine(Oid(oid), &format!("f{oid}"), PUBLIC, PLPGSQL, &[], Some("begin end"));
    }

    let catalog = Catalog::builder(backend.clone()).with_name("scenario").build().unwrap();
    (backend, Session::new(catalog).unwrap())
}

#[test_log::test]
fn test_attribute_recomputed_after_relation_trip() {
    let (backend, session) = session();
    let attribute = session.catalog().attribute(TABLE, 3).unwrap();
    assert_eq!(*attribute.key(), CatalogKey::with_sub(ATTRIBUTE, TABLE, 3));

    assert_eq!(attribute.name(session.access()).unwrap().as_str(), "col3");
    let searches = backend.searches();

    attribute.relation().gate().trip(session.mutator());
    backend.put_attribute(TABLE, 3, "c3", INT4, -1);

    assert_eq!(attribute.name(session.access()).unwrap().as_str(), "c3");
    assert_eq!(backend.searches(), searches + 1);
    assert_eq!(attribute.name(session.access()).unwrap().as_str(), "c3");
    assert_eq!(backend.searches(), searches + 1);
}

#[test_log::test]
fn test_cascade_trips_dependents_before_returning() {
    let (_backend, session) = session();
    let catalog = session.catalog();

    let routines = (500..505).map(|oid| catalog.routine(Oid(oid)).unwrap()).collect_vec();
    for routine in &routines {
        routine.language(session.access()).unwrap();
    }
    let ty = catalog.ty(TABLE_TYPE).unwrap();
    assert_eq!(ty.descriptor(session.access()).unwrap().unwrap().natts(), 3);

    let routine_cells = routines.iter().map(|r| r.gate().current()).collect_vec();
    let type_cell = ty.gate().current();

    session.dispatch_all([Signal::updated(LANGUAGE, PLPGSQL), Signal::updated(RELATION, TABLE)]);

    assert!(routine_cells.iter().all(|cell| cell.is_tripped()));
    assert!(type_cell.is_tripped());
    assert!(routines.iter().all(|r| r.state() == MirrorState::Stale));
    assert_eq!(ty.state(), MirrorState::Stale);
}

#[test_log::test]
fn test_invalidation_visible_to_readers() {
    let (backend, session) = session();
    let relation = session.catalog().relation(TABLE).unwrap();
    assert_eq!(relation.name(session.access()).unwrap().as_str(), "t");

    thread::scope(|s| {
        s.spawn(|| assert_eq!(relation.name(Access::Reader).unwrap().as_str(), "t"));
    });

    backend.put_relation(TABLE, "renamed", PUBLIC, TABLE_TYPE, 3);
    session.dispatch(Signal::updated(RELATION, TABLE));

    // A reader never observes the stale name: recomputing needs the mutator.
    thread::scope(|s| {
        s.spawn(|| {
            assert_eq!(
                relation.name(Access::Reader).unwrap_err().kind(),
                ErrorKind::WrongContext
            )
        });
    });

    assert_eq!(relation.name(session.access()).unwrap().as_str(), "renamed");
    thread::scope(|s| {
        s.spawn(|| assert_eq!(relation.name(Access::Reader).unwrap().as_str(), "renamed"));
    });
}
