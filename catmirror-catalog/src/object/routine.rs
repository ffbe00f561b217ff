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

use std::sync::Arc;

use catmirror_common::{
    error::Result,
    key::{Address, CatalogKey, Oid},
};
use catmirror_memory::{Access, Affinity, Computed, Gate, Slot, SlotHost, Slots};

use super::{copied, language::Language, namespace::Namespace, read_row, search, ty::Type, Base, Mirror};
use crate::{
    catalog::Catalog,
    dispatch::{Cascade, Change},
    session::Session,
};

const TUPLE: Slot<Routine, Address> = Slot::new(0, "routine.tuple", search::<Routine>).with_affinity(Affinity::Mutator);
const NAME: Slot<Routine, String> = Slot::new(1, "routine.name", name);
const NAMESPACE: Slot<Routine, Arc<Namespace>> = Slot::new(2, "routine.namespace", namespace);
const LANGUAGE: Slot<Routine, Arc<Language>> = Slot::new(3, "routine.language", language);
const RETURN_TYPE: Slot<Routine, Arc<Type>> = Slot::new(4, "routine.return_type", return_type);
const RETURNS_SET: Slot<Routine, bool> = Slot::new(5, "routine.returns_set", returns_set);
const ARG_TYPES: Slot<Routine, Vec<Oid>> = Slot::new(6, "routine.arg_types", arg_types);
const SOURCE: Slot<Routine, Option<String>> = Slot::new(7, "routine.source", source);
const SLOTS: usize = 8;

fn name(routine: &Routine, access: Access<'_, Session>) -> Result<Computed<String>> {
    read_row(routine, &TUPLE, access, |row| row.get_name("proname"))
}

fn namespace(routine: &Routine, access: Access<'_, Session>) -> Result<Computed<Arc<Namespace>>> {
    let oid = read_row(routine, &TUPLE, access, |row| row.get_oid("pronamespace"))?.into_inner();
    routine.catalog()?.namespace(oid).map(Computed::Cached)
}

fn language(routine: &Routine, access: Access<'_, Session>) -> Result<Computed<Arc<Language>>> {
    let oid = read_row(routine, &TUPLE, access, |row| row.get_oid("prolang"))?.into_inner();
    let language = routine.catalog()?.language(oid)?;
    language.track_routine(routine.oid());
    Ok(Computed::Cached(language))
}

fn return_type(routine: &Routine, access: Access<'_, Session>) -> Result<Computed<Arc<Type>>> {
    let oid = read_row(routine, &TUPLE, access, |row| row.get_oid("prorettype"))?.into_inner();
    routine.catalog()?.ty(oid).map(Computed::Cached)
}

fn returns_set(routine: &Routine, access: Access<'_, Session>) -> Result<Computed<bool>> {
    read_row(routine, &TUPLE, access, |row| row.get_bool("proretset"))
}

fn arg_types(routine: &Routine, access: Access<'_, Session>) -> Result<Computed<Vec<Oid>>> {
    read_row(routine, &TUPLE, access, |row| row.get_oid_list("proargtypes"))
}

fn source(routine: &Routine, access: Access<'_, Session>) -> Result<Computed<Option<String>>> {
    read_row(routine, &TUPLE, access, |row| row.get_text("prosrc"))
}

/// Mirror of a routine.
#[derive(Debug)]
pub struct Routine {
    base: Base,
}

impl SlotHost for Routine {
    type Mutator = Session;

    fn slots(&self) -> &Slots {
        self.base.slots()
    }
}

impl Mirror for Routine {
    fn key(&self) -> &CatalogKey {
        self.base.key()
    }

    fn catalog(&self) -> Result<Catalog> {
        self.base.catalog()
    }
}

impl Routine {
    pub(crate) fn new(catalog: &Catalog, key: CatalogKey) -> Self {
        Self {
            base: Base::new(catalog, key, SLOTS, vec![Gate::new()]),
        }
    }

    /// Oid of the routine.
    pub fn oid(&self) -> Oid {
        self.base.key().object
    }

    /// The gate of the routine.
    pub fn gate(&self) -> &Gate {
        self.base.slots().gate(0)
    }

    /// Name of the routine.
    pub fn name(&self, access: Access<'_, Session>) -> Result<Arc<String>> {
        NAME.get(self, access)
    }

    /// Namespace of the routine.
    pub fn namespace(&self, access: Access<'_, Session>) -> Result<Arc<Namespace>> {
        NAMESPACE.get(self, access).map(|ns| ns.as_ref().clone())
    }

    /// Language the routine is written in.
    ///
    /// The first read registers the routine with the language.
    pub fn language(&self, access: Access<'_, Session>) -> Result<Arc<Language>> {
        LANGUAGE.get(self, access).map(|lang| lang.as_ref().clone())
    }

    /// Return type.
    pub fn return_type(&self, access: Access<'_, Session>) -> Result<Arc<Type>> {
        RETURN_TYPE.get(self, access).map(|ty| ty.as_ref().clone())
    }

    /// Whether the routine returns a set.
    pub fn returns_set(&self, access: Access<'_, Session>) -> Result<bool> {
        copied(RETURNS_SET.get(self, access))
    }

    /// Oids of the argument types.
    pub fn arg_types(&self, access: Access<'_, Session>) -> Result<Arc<Vec<Oid>>> {
        ARG_TYPES.get(self, access)
    }

    /// Source text, if any.
    pub fn source(&self, access: Access<'_, Session>) -> Result<Arc<Option<String>>> {
        SOURCE.get(self, access)
    }

    pub(crate) fn invalidate(&self, _: &Catalog, cascade: &mut Cascade, change: Change) {
        cascade.trip(self.gate());
        if change == Change::Deleted {
            cascade.evict(*self.key());
        }
    }
}
