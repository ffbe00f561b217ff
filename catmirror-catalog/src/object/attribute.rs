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
use catmirror_memory::{Access, Affinity, Computed, Slot, SlotHost, Slots};

use super::{copied, read_row, relation::Relation, search, ty::Type, Base, Mirror};
use crate::{catalog::Catalog, session::Session};

const TUPLE: Slot<Attribute, Address> =
    Slot::new(0, "attribute.tuple", search::<Attribute>).with_affinity(Affinity::Mutator);
const NAME: Slot<Attribute, String> = Slot::new(1, "attribute.name", name);
const TYPE_OID: Slot<Attribute, Oid> = Slot::new(2, "attribute.type_oid", type_oid);
const TYPMOD: Slot<Attribute, i32> = Slot::new(3, "attribute.typmod", typmod);
const NOT_NULL: Slot<Attribute, bool> = Slot::new(4, "attribute.not_null", not_null);
const TYPE: Slot<Attribute, Arc<Type>> = Slot::new(5, "attribute.type", ty);
const SLOTS: usize = 6;

fn name(att: &Attribute, access: Access<'_, Session>) -> Result<Computed<String>> {
    read_row(att, &TUPLE, access, |row| row.get_name("attname"))
}

fn type_oid(att: &Attribute, access: Access<'_, Session>) -> Result<Computed<Oid>> {
    read_row(att, &TUPLE, access, |row| row.get_oid("atttypid"))
}

fn typmod(att: &Attribute, access: Access<'_, Session>) -> Result<Computed<i32>> {
    read_row(att, &TUPLE, access, |row| row.get_i32("atttypmod"))
}

fn not_null(att: &Attribute, access: Access<'_, Session>) -> Result<Computed<bool>> {
    read_row(att, &TUPLE, access, |row| row.get_bool("attnotnull"))
}

fn ty(att: &Attribute, access: Access<'_, Session>) -> Result<Computed<Arc<Type>>> {
    let oid = *TYPE_OID.get(att, access)?;
    let typmod = *TYPMOD.get(att, access)?;
    att.catalog()?
        .type_with_typmod(oid, typmod)
        .map(Computed::Cached)
}

/// Mirror of one attribute of a relation.
///
/// Bound to the gate of its relation.
#[derive(Debug)]
pub struct Attribute {
    base: Base,
    relation: Arc<Relation>,
}

impl SlotHost for Attribute {
    type Mutator = Session;

    fn slots(&self) -> &Slots {
        self.base.slots()
    }
}

impl Mirror for Attribute {
    fn key(&self) -> &CatalogKey {
        self.base.key()
    }

    fn catalog(&self) -> Result<Catalog> {
        self.base.catalog()
    }
}

impl Attribute {
    pub(crate) fn new(catalog: &Catalog, key: CatalogKey, relation: Arc<Relation>) -> Self {
        let gate = relation.gate().clone();
        Self {
            base: Base::new(catalog, key, SLOTS, vec![gate]),
            relation,
        }
    }

    /// The owning relation.
    pub fn relation(&self) -> &Arc<Relation> {
        &self.relation
    }

    /// Attribute number, starting at 1.
    pub fn attnum(&self) -> i16 {
        // Constructed from an i16.
        self.base.key().sub as i16
    }

    /// Name of the attribute.
    pub fn name(&self, access: Access<'_, Session>) -> Result<Arc<String>> {
        NAME.get(self, access)
    }

    /// Oid of the attribute's type.
    pub fn type_oid(&self, access: Access<'_, Session>) -> Result<Oid> {
        copied(TYPE_OID.get(self, access))
    }

    /// Type modifier of the attribute.
    pub fn typmod(&self, access: Access<'_, Session>) -> Result<i32> {
        copied(TYPMOD.get(self, access))
    }

    /// Whether the attribute has a not-null constraint.
    pub fn not_null(&self, access: Access<'_, Session>) -> Result<bool> {
        copied(NOT_NULL.get(self, access))
    }

    /// Type of the attribute.
    pub fn ty(&self, access: Access<'_, Session>) -> Result<Arc<Type>> {
        TYPE.get(self, access).map(|ty| ty.as_ref().clone())
    }
}
