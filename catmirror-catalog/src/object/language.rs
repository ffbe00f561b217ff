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

use super::{copied, read_row, search, Base, Mirror};
use crate::{
    catalog::Catalog,
    class::ROUTINE,
    dependents::Dependents,
    dispatch::{Cascade, Change},
    session::Session,
};

const TUPLE: Slot<Language, Address> =
    Slot::new(0, "language.tuple", search::<Language>).with_affinity(Affinity::Mutator);
const NAME: Slot<Language, String> = Slot::new(1, "language.name", name);
const TRUSTED: Slot<Language, bool> = Slot::new(2, "language.trusted", trusted);
const PROCEDURAL: Slot<Language, bool> = Slot::new(3, "language.procedural", procedural);
const SLOTS: usize = 4;

fn name(lang: &Language, access: Access<'_, Session>) -> Result<Computed<String>> {
    read_row(lang, &TUPLE, access, |row| row.get_name("lanname"))
}

fn trusted(lang: &Language, access: Access<'_, Session>) -> Result<Computed<bool>> {
    read_row(lang, &TUPLE, access, |row| row.get_bool("lanpltrusted"))
}

fn procedural(lang: &Language, access: Access<'_, Session>) -> Result<Computed<bool>> {
    read_row(lang, &TUPLE, access, |row| row.get_bool("lanispl"))
}

/// Mirror of a procedural language.
///
/// Tracks the routines discovered to be written in it, so that invalidating the language
/// invalidates them too.
#[derive(Debug)]
pub struct Language {
    base: Base,
    routines: Dependents<Oid>,
}

impl SlotHost for Language {
    type Mutator = Session;

    fn slots(&self) -> &Slots {
        self.base.slots()
    }
}

impl Mirror for Language {
    fn key(&self) -> &CatalogKey {
        self.base.key()
    }

    fn catalog(&self) -> Result<Catalog> {
        self.base.catalog()
    }
}

impl Language {
    pub(crate) fn new(catalog: &Catalog, key: CatalogKey) -> Self {
        Self {
            base: Base::new(catalog, key, SLOTS, vec![Gate::new()]),
            routines: Dependents::default(),
        }
    }

    /// Oid of the language.
    pub fn oid(&self) -> Oid {
        self.base.key().object
    }

    /// Name of the language.
    pub fn name(&self, access: Access<'_, Session>) -> Result<Arc<String>> {
        NAME.get(self, access)
    }

    /// Whether the language is trusted.
    pub fn trusted(&self, access: Access<'_, Session>) -> Result<bool> {
        copied(TRUSTED.get(self, access))
    }

    /// Whether the language is a procedural language handled by a call handler.
    pub fn procedural(&self, access: Access<'_, Session>) -> Result<bool> {
        copied(PROCEDURAL.get(self, access))
    }

    /// Oids of the routines currently tracked as written in the language.
    pub fn routines(&self) -> Vec<Oid> {
        self.routines.snapshot()
    }

    pub(crate) fn track_routine(&self, oid: Oid) {
        if self.routines.insert(oid) {
            tracing::trace!("[language]: {} tracks routine {oid}", self.oid());
        }
    }

    /// Trip the language and every tracked routine, and stop tracking them.
    pub(crate) fn invalidate(&self, catalog: &Catalog, cascade: &mut Cascade, change: Change) {
        cascade.trip(self.base.slots().gate(0));
        for oid in self.routines.take() {
            if let Some(routine) = catalog.routines().get(&CatalogKey::new(ROUTINE, oid)) {
                routine.invalidate(catalog, cascade, Change::Updated);
            }
        }
        if change == Change::Deleted {
            cascade.evict(*self.key());
        }
    }
}
