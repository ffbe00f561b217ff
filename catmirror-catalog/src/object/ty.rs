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
    error::{Error, Result},
    key::{Address, CatalogKey, Oid},
};
use catmirror_memory::{Access, Affinity, Computed, Flight, Gate, Slot, SlotHost, Slots};

use super::{copied, descriptor::Descriptor, namespace::Namespace, read_row, relation::Relation, search, Base, Mirror};
use crate::{
    catalog::Catalog,
    class::{NO_TYPMOD, RECORD_TYPE, TYPE, TYPTYPE_COMPOSITE},
    dispatch::{Cascade, Change},
    session::Session,
};

const TUPLE: Slot<Type, Address> = Slot::new(0, "type.tuple", search::<Type>).with_affinity(Affinity::Mutator);
const NAME: Slot<Type, String> = Slot::new(1, "type.name", name);
const NAMESPACE: Slot<Type, Arc<Namespace>> = Slot::new(2, "type.namespace", namespace);
const LENGTH: Slot<Type, i16> = Slot::new(3, "type.length", length);
const BY_VALUE: Slot<Type, bool> = Slot::new(4, "type.by_value", by_value);
const TYPTYPE: Slot<Type, u8> = Slot::new(5, "type.typtype", typtype);
const RELATION: Slot<Type, Option<Arc<Relation>>> = Slot::new(6, "type.relation", relation);
const ELEMENT: Slot<Type, Option<Arc<Type>>> = Slot::new(7, "type.element", element);
const DESCRIPTOR: Slot<Type, Option<Arc<Descriptor>>> = Slot::new(8, "type.descriptor", descriptor)
    .with_flight(Flight::Single)
    .with_affinity(Affinity::Mutator);
const SLOTS: usize = 9;

fn name(ty: &Type, access: Access<'_, Session>) -> Result<Computed<String>> {
    read_row(ty, &TUPLE, access, |row| row.get_name("typname"))
}

fn namespace(ty: &Type, access: Access<'_, Session>) -> Result<Computed<Arc<Namespace>>> {
    let oid = read_row(ty, &TUPLE, access, |row| row.get_oid("typnamespace"))?.into_inner();
    ty.catalog()?.namespace(oid).map(Computed::Cached)
}

fn length(ty: &Type, access: Access<'_, Session>) -> Result<Computed<i16>> {
    read_row(ty, &TUPLE, access, |row| row.get_i16("typlen"))
}

fn by_value(ty: &Type, access: Access<'_, Session>) -> Result<Computed<bool>> {
    read_row(ty, &TUPLE, access, |row| row.get_bool("typbyval"))
}

fn typtype(ty: &Type, access: Access<'_, Session>) -> Result<Computed<u8>> {
    read_row(ty, &TUPLE, access, |row| row.get_char("typtype"))
}

fn relation(ty: &Type, access: Access<'_, Session>) -> Result<Computed<Option<Arc<Relation>>>> {
    let oid = read_row(ty, &TUPLE, access, |row| row.get_oid("typrelid"))?.into_inner();
    if !oid.is_valid() {
        return Ok(Computed::Cached(None));
    }
    let relation = ty.catalog()?.relation(oid)?;
    relation.track_type(ty.oid());
    Ok(Computed::Cached(Some(relation)))
}

fn element(ty: &Type, access: Access<'_, Session>) -> Result<Computed<Option<Arc<Type>>>> {
    let oid = read_row(ty, &TUPLE, access, |row| row.get_oid("typelem"))?.into_inner();
    if !oid.is_valid() {
        return Ok(Computed::Cached(None));
    }
    ty.catalog()?.ty(oid).map(|elem| Computed::Cached(Some(elem)))
}

fn descriptor(ty: &Type, access: Access<'_, Session>) -> Result<Computed<Option<Arc<Descriptor>>>> {
    if ty.is_interned_record() {
        let session = access.mutator().ok_or_else(|| Error::wrong_context(DESCRIPTOR.name()))?;
        let catalog = ty.catalog()?;
        return match catalog
            .backend()
            .lookup_record_descriptor(session.mutator(), ty.typmod())?
        {
            // Not interned yet, look again on the next read.
            None => Ok(Computed::Transient(None)),
            Some(address) => catalog
                .native_descriptor(session, address)
                .map(|descriptor| Computed::Cached(Some(descriptor))),
        };
    }

    match RELATION.get(ty, access)?.as_ref() {
        Some(relation) => relation
            .descriptor(access)
            .map(|descriptor| Computed::Cached(Some(descriptor))),
        None => Ok(Computed::Cached(None)),
    }
}

/// Mirror of a type, keyed by oid and type modifier.
#[derive(Debug)]
pub struct Type {
    base: Base,
}

impl SlotHost for Type {
    type Mutator = Session;

    fn slots(&self) -> &Slots {
        self.base.slots()
    }
}

impl Mirror for Type {
    fn key(&self) -> &CatalogKey {
        self.base.key()
    }

    /// Every type modifier shares the row of the unmodified type.
    fn row_key(&self) -> CatalogKey {
        CatalogKey::with_sub(TYPE, self.oid(), NO_TYPMOD)
    }

    fn catalog(&self) -> Result<Catalog> {
        self.base.catalog()
    }
}

impl Type {
    pub(crate) fn new(catalog: &Catalog, key: CatalogKey) -> Self {
        Self {
            base: Base::new(catalog, key, SLOTS, vec![Gate::new()]),
        }
    }

    /// Oid of the type.
    pub fn oid(&self) -> Oid {
        self.base.key().object
    }

    /// Type modifier, [`NO_TYPMOD`] if none.
    pub fn typmod(&self) -> i32 {
        self.base.key().sub
    }

    /// Returns `true` for a record type interned under a type modifier.
    pub fn is_interned_record(&self) -> bool {
        self.oid() == RECORD_TYPE && self.typmod() >= 0
    }

    /// The gate of the type.
    pub fn gate(&self) -> &Gate {
        self.base.slots().gate(0)
    }

    /// Name of the type.
    pub fn name(&self, access: Access<'_, Session>) -> Result<Arc<String>> {
        NAME.get(self, access)
    }

    /// Namespace of the type.
    pub fn namespace(&self, access: Access<'_, Session>) -> Result<Arc<Namespace>> {
        NAMESPACE.get(self, access).map(|ns| ns.as_ref().clone())
    }

    /// Storage length, negative for variable length types.
    pub fn length(&self, access: Access<'_, Session>) -> Result<i16> {
        copied(LENGTH.get(self, access))
    }

    /// Whether values are passed by value.
    pub fn by_value(&self, access: Access<'_, Session>) -> Result<bool> {
        copied(BY_VALUE.get(self, access))
    }

    /// Returns `true` for composite types.
    pub fn is_composite(&self, access: Access<'_, Session>) -> Result<bool> {
        Ok(*TYPTYPE.get(self, access)? == TYPTYPE_COMPOSITE)
    }

    /// The relation of a composite type.
    pub fn relation(&self, access: Access<'_, Session>) -> Result<Option<Arc<Relation>>> {
        RELATION.get(self, access).map(|rel| rel.as_ref().clone())
    }

    /// Element type of an array type.
    pub fn element(&self, access: Access<'_, Session>) -> Result<Option<Arc<Type>>> {
        ELEMENT.get(self, access).map(|elem| elem.as_ref().clone())
    }

    /// Tuple descriptor of a composite or interned record type.
    ///
    /// `None` for scalar types, and for record types not interned yet. The latter is not
    /// memoized, so a later read sees the record type once interned.
    pub fn descriptor(&self, access: Access<'_, Session>) -> Result<Option<Arc<Descriptor>>> {
        DESCRIPTOR.get(self, access).map(|descriptor| descriptor.as_ref().clone())
    }

    /// Returns `true` if the memoized descriptor is native and has been released.
    pub(crate) fn holds_released_descriptor(&self) -> bool {
        matches!(DESCRIPTOR.peek(self).as_deref(), Some(Some(descriptor)) if descriptor.is_released())
    }

    pub(crate) fn invalidate(&self, _: &Catalog, cascade: &mut Cascade, change: Change) {
        cascade.trip(self.gate());
        if change == Change::Deleted {
            cascade.evict(*self.key());
        }
    }
}
