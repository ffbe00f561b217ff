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

use super::{read_row, search, Base, Mirror};
use crate::{
    catalog::Catalog,
    dispatch::{Cascade, Change},
    session::Session,
};

const TUPLE: Slot<Namespace, Address> =
    Slot::new(0, "namespace.tuple", search::<Namespace>).with_affinity(Affinity::Mutator);
const NAME: Slot<Namespace, String> = Slot::new(1, "namespace.name", name);
const OWNER: Slot<Namespace, Oid> = Slot::new(2, "namespace.owner", owner);
const SLOTS: usize = 3;

fn name(ns: &Namespace, access: Access<'_, Session>) -> Result<Computed<String>> {
    read_row(ns, &TUPLE, access, |row| row.get_name("nspname"))
}

fn owner(ns: &Namespace, access: Access<'_, Session>) -> Result<Computed<Oid>> {
    read_row(ns, &TUPLE, access, |row| row.get_oid("nspowner"))
}

/// Mirror of a namespace.
#[derive(Debug)]
pub struct Namespace {
    base: Base,
}

impl SlotHost for Namespace {
    type Mutator = Session;

    fn slots(&self) -> &Slots {
        self.base.slots()
    }
}

impl Mirror for Namespace {
    fn key(&self) -> &CatalogKey {
        self.base.key()
    }

    fn catalog(&self) -> Result<Catalog> {
        self.base.catalog()
    }
}

impl Namespace {
    pub(crate) fn new(catalog: &Catalog, key: CatalogKey) -> Self {
        Self {
            base: Base::new(catalog, key, SLOTS, vec![Gate::new()]),
        }
    }

    /// Oid of the namespace.
    pub fn oid(&self) -> Oid {
        self.base.key().object
    }

    /// Name of the namespace.
    pub fn name(&self, access: Access<'_, Session>) -> Result<Arc<String>> {
        NAME.get(self, access)
    }

    /// Owner of the namespace.
    pub fn owner(&self, access: Access<'_, Session>) -> Result<Oid> {
        super::copied(OWNER.get(self, access))
    }

    pub(crate) fn invalidate(&self, _: &Catalog, cascade: &mut Cascade, change: Change) {
        cascade.trip(self.base.slots().gate(0));
        if change == Change::Deleted {
            cascade.evict(*self.key());
        }
    }
}
