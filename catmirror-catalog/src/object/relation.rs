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
use catmirror_memory::{Access, Affinity, Computed, Flight, Gate, Slot, SlotHost, Slots};

use super::{
    copied,
    descriptor::{Column, Descriptor},
    namespace::Namespace,
    read_row, search,
    ty::Type,
    Base, Mirror,
};
use crate::{
    catalog::Catalog,
    class::ATTRIBUTE,
    dependents::Dependents,
    dispatch::{Cascade, Change},
    session::Session,
};

const TUPLE: Slot<Relation, Address> =
    Slot::new(0, "relation.tuple", search::<Relation>).with_affinity(Affinity::Mutator);
const NAME: Slot<Relation, String> = Slot::new(1, "relation.name", name);
const NAMESPACE: Slot<Relation, Arc<Namespace>> = Slot::new(2, "relation.namespace", namespace);
const KIND: Slot<Relation, u8> = Slot::new(3, "relation.kind", kind);
const NATTS: Slot<Relation, i16> = Slot::new(4, "relation.natts", natts);
// Only the oid: the composite type memoizes this relation in turn.
const ROW_TYPE: Slot<Relation, Oid> = Slot::new(5, "relation.row_type", row_type);
const DESCRIPTOR: Slot<Relation, Descriptor> = Slot::new(6, "relation.descriptor", descriptor)
    .with_flight(Flight::Single)
    .with_affinity(Affinity::Mutator);
const SLOTS: usize = 7;

fn name(rel: &Relation, access: Access<'_, Session>) -> Result<Computed<String>> {
    read_row(rel, &TUPLE, access, |row| row.get_name("relname"))
}

fn namespace(rel: &Relation, access: Access<'_, Session>) -> Result<Computed<Arc<Namespace>>> {
    let oid = read_row(rel, &TUPLE, access, |row| row.get_oid("relnamespace"))?.into_inner();
    rel.catalog()?.namespace(oid).map(Computed::Cached)
}

fn kind(rel: &Relation, access: Access<'_, Session>) -> Result<Computed<u8>> {
    read_row(rel, &TUPLE, access, |row| row.get_char("relkind"))
}

fn natts(rel: &Relation, access: Access<'_, Session>) -> Result<Computed<i16>> {
    read_row(rel, &TUPLE, access, |row| row.get_i16("relnatts"))
}

fn row_type(rel: &Relation, access: Access<'_, Session>) -> Result<Computed<Oid>> {
    read_row(rel, &TUPLE, access, |row| row.get_oid("reltype"))
}

fn descriptor(rel: &Relation, access: Access<'_, Session>) -> Result<Computed<Descriptor>> {
    let natts = *NATTS.get(rel, access)?;
    let row_type = *ROW_TYPE.get(rel, access)?;
    let catalog = rel.catalog()?;
    let columns = (1..=natts)
        .map(|attnum| {
            let attribute = catalog.attribute(rel.oid(), attnum)?;
            Ok(Column {
                attnum,
                name: Some(attribute.name(access)?.as_ref().clone()),
                type_oid: attribute.type_oid(access)?,
                typmod: attribute.typmod(access)?,
            })
        })
        .collect::<Result<Vec<_>>>()?;
    Ok(Computed::Cached(Descriptor::from_relation(rel.oid(), row_type, columns)))
}

/// Mirror of a relation.
///
/// The relation's gate is shared with its attributes and governs its descriptor, so one trip
/// invalidates all of them.
#[derive(Debug)]
pub struct Relation {
    base: Base,
    /// Composite types that resolved this relation.
    types: Dependents<Oid>,
    /// Attribute numbers with a constructed attribute mirror.
    attributes: Dependents<i16>,
}

impl SlotHost for Relation {
    type Mutator = Session;

    fn slots(&self) -> &Slots {
        self.base.slots()
    }
}

impl Mirror for Relation {
    fn key(&self) -> &CatalogKey {
        self.base.key()
    }

    fn catalog(&self) -> Result<Catalog> {
        self.base.catalog()
    }
}

impl Relation {
    pub(crate) fn new(catalog: &Catalog, key: CatalogKey) -> Self {
        Self {
            base: Base::new(catalog, key, SLOTS, vec![Gate::new()]),
            types: Dependents::default(),
            attributes: Dependents::default(),
        }
    }

    /// Oid of the relation.
    pub fn oid(&self) -> Oid {
        self.base.key().object
    }

    /// The gate shared by the relation, its attributes and its descriptor.
    pub fn gate(&self) -> &Gate {
        self.base.slots().gate(0)
    }

    /// Name of the relation.
    pub fn name(&self, access: Access<'_, Session>) -> Result<Arc<String>> {
        NAME.get(self, access)
    }

    /// Namespace of the relation.
    pub fn namespace(&self, access: Access<'_, Session>) -> Result<Arc<Namespace>> {
        NAMESPACE.get(self, access).map(|ns| ns.as_ref().clone())
    }

    /// Relation kind, e.g. `b'r'` for ordinary tables.
    pub fn kind(&self, access: Access<'_, Session>) -> Result<u8> {
        copied(KIND.get(self, access))
    }

    /// Number of user attributes.
    pub fn natts(&self, access: Access<'_, Session>) -> Result<i16> {
        copied(NATTS.get(self, access))
    }

    /// The composite type of the relation's rows, if any.
    pub fn row_type(&self, access: Access<'_, Session>) -> Result<Option<Arc<Type>>> {
        let oid = copied(ROW_TYPE.get(self, access))?;
        if !oid.is_valid() {
            return Ok(None);
        }
        self.catalog()?.ty(oid).map(Some)
    }

    /// Tuple descriptor derived from the relation's attributes.
    pub fn descriptor(&self, access: Access<'_, Session>) -> Result<Arc<Descriptor>> {
        DESCRIPTOR.get(self, access)
    }

    pub(crate) fn track_attribute(&self, attnum: i16) {
        self.attributes.insert(attnum);
    }

    pub(crate) fn track_type(&self, oid: Oid) {
        if self.types.insert(oid) {
            tracing::trace!("[relation]: {} tracks dependent type {oid}", self.oid());
        }
    }

    /// Trip the shared gate and every tracked composite type. Deletion also evicts the
    /// attributes.
    pub(crate) fn invalidate(&self, catalog: &Catalog, cascade: &mut Cascade, change: Change) {
        cascade.trip(self.gate());
        for oid in self.types.take() {
            for ty in catalog.types_of(oid) {
                ty.invalidate(catalog, cascade, Change::Updated);
            }
        }
        if change == Change::Deleted {
            cascade.evict(*self.key());
            for attnum in self.attributes.take() {
                cascade.evict(CatalogKey::with_sub(ATTRIBUTE, self.oid(), attnum.into()));
            }
        }
        tracing::trace!("[relation]: {} invalidated ({change:?})", self.oid());
    }
}
