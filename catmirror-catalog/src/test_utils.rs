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

//! In-process stand-ins for the backend, for tests.

use std::{
    collections::BTreeMap,
    sync::atomic::{AtomicUsize, Ordering},
};

use bytes::Bytes;
use catmirror_common::{
    error::{Error, ErrorKind, Result},
    key::{Address, CatalogKey, Oid},
    mutator::Mutator,
};
use catmirror_memory::LifespanKind;
use hashbrown::HashMap;
use parking_lot::{Mutex, RwLock};

use crate::{
    backend::{Backend, EncodingInfo},
    class::{
        descriptor_layout, CatalogClass, ATTRIBUTE, LANGUAGE, NAMESPACE, NO_TYPMOD, RECORD_TYPE, RELATION, ROUTINE,
        TYPE,
    },
    layout::{Repr, RowLayout},
    window::NativeWindow,
};

const ALIGN: usize = 16;

/// A heap of immutable byte regions addressed like native memory.
#[derive(Debug)]
pub struct FakeMemory {
    regions: RwLock<BTreeMap<usize, Bytes>>,
    next: AtomicUsize,
}

impl Default for FakeMemory {
    fn default() -> Self {
        Self {
            regions: RwLock::new(BTreeMap::new()),
            next: AtomicUsize::new(0x1000),
        }
    }
}

impl FakeMemory {
    /// Copy `bytes` into a new region and return its address.
    pub fn alloc(&self, bytes: impl Into<Bytes>) -> Address {
        let bytes = bytes.into();
        let size = bytes.len().max(1).next_multiple_of(ALIGN);
        let address = self.next.fetch_add(size, Ordering::Relaxed);
        self.regions.write().insert(address, bytes);
        Address(address)
    }

    /// Allocate a NUL-terminated string.
    pub fn alloc_cstring(&self, s: &str) -> Address {
        let mut bytes = s.as_bytes().to_vec();
        bytes.push(0);
        self.alloc(bytes)
    }

    /// Allocate a counted oid list.
    pub fn alloc_oid_list(&self, oids: &[Oid]) -> Address {
        let mut bytes = (oids.len() as i32).to_ne_bytes().to_vec();
        oids.iter().for_each(|oid| bytes.extend(oid.0.to_ne_bytes()));
        self.alloc(bytes)
    }

    /// Start writing a row of `layout`.
    pub fn row<'a>(&'a self, layout: &'a RowLayout) -> RowWriter<'a> {
        RowWriter {
            memory: self,
            layout,
            bytes: vec![0; layout.size()],
        }
    }

    /// Number of allocated regions.
    pub fn regions(&self) -> usize {
        self.regions.read().len()
    }

    fn region(&self, address: Address) -> Result<(usize, Bytes)> {
        self.regions
            .read()
            .range(..=address.0)
            .next_back()
            .map(|(start, bytes)| (address.0 - start, bytes.clone()))
            .ok_or_else(|| Error::new(ErrorKind::Native, "unmapped address").with_context("address", address))
    }
}

impl NativeWindow for FakeMemory {
    fn map_fixed(&self, address: Address, len: usize) -> Result<Bytes> {
        let (offset, bytes) = self.region(address)?;
        if offset + len > bytes.len() {
            return Err(Error::out_of_range(address.0, 0, len));
        }
        Ok(bytes.slice(offset..offset + len))
    }

    fn map_cstring(&self, address: Address) -> Result<String> {
        let (offset, bytes) = self.region(address)?;
        let tail = bytes.get(offset..).unwrap_or_default();
        let len = tail
            .iter()
            .position(|b| *b == 0)
            .ok_or_else(|| Error::new(ErrorKind::Native, "unterminated string").with_context("address", address))?;
        String::from_utf8(tail[..len].to_vec())
            .map_err(|e| Error::new(ErrorKind::Native, "string is not valid utf-8").with_source(e))
    }
}

/// Writes the columns of one row. Unwritten columns are zero.
#[derive(Debug)]
pub struct RowWriter<'a> {
    memory: &'a FakeMemory,
    layout: &'a RowLayout,
    bytes: Vec<u8>,
}

impl RowWriter<'_> {
    fn put(mut self, column: &str, repr: Repr, value: &[u8]) -> Self {
        match self.layout.field(column) {
            Ok(loc) if loc.repr == repr => {
                let len = value.len().min(repr.size());
                self.bytes[loc.offset..loc.offset + len].copy_from_slice(&value[..len]);
            }
            _ => panic!("column {column} of class {} is not {repr:?}", self.layout.class()),
        }
        self
    }

    /// Write a [`Repr::Bool`] column.
    pub fn bool(self, column: &str, value: bool) -> Self {
        self.put(column, Repr::Bool, &[value as u8])
    }

    /// Write a [`Repr::Char`] column.
    pub fn char(self, column: &str, value: u8) -> Self {
        self.put(column, Repr::Char, &[value])
    }

    /// Write a [`Repr::I16`] column.
    pub fn i16(self, column: &str, value: i16) -> Self {
        self.put(column, Repr::I16, &value.to_ne_bytes())
    }

    /// Write a [`Repr::I32`] column.
    pub fn i32(self, column: &str, value: i32) -> Self {
        self.put(column, Repr::I32, &value.to_ne_bytes())
    }

    /// Write a [`Repr::Oid`] column.
    pub fn oid(self, column: &str, value: Oid) -> Self {
        self.put(column, Repr::Oid, &value.0.to_ne_bytes())
    }

    /// Write a [`Repr::Name`] column, truncated to leave a terminating NUL.
    pub fn name(self, column: &str, value: &str) -> Self {
        let bytes = value.as_bytes();
        let len = bytes.len().min(Repr::NAME_LEN - 1);
        self.put(column, Repr::Name, &bytes[..len])
    }

    /// Write a [`Repr::Text`] column. `None` writes a null pointer.
    pub fn text(self, column: &str, value: Option<&str>) -> Self {
        let ptr = value.map(|s| self.memory.alloc_cstring(s)).unwrap_or(Address::NULL);
        self.put(column, Repr::Text, &ptr.0.to_ne_bytes())
    }

    /// Write a [`Repr::OidList`] column.
    pub fn oid_list(self, column: &str, value: &[Oid]) -> Self {
        let ptr = self.memory.alloc_oid_list(value);
        self.put(column, Repr::OidList, &ptr.0.to_ne_bytes())
    }

    /// Allocate the row and return its address.
    pub fn finish(self) -> Address {
        self.memory.alloc(self.bytes)
    }
}

/// A catalog backend serving rows from a [`FakeMemory`].
///
/// Rows are replaced by writing them again, which models an in-place update: the old row stays
/// mapped, the search returns the new one.
#[derive(Debug)]
pub struct FakeBackend {
    memory: FakeMemory,
    layouts: HashMap<Oid, RowLayout>,
    descriptor_layout: RowLayout,
    rows: Mutex<HashMap<CatalogKey, Address>>,
    encodings: Mutex<HashMap<i32, EncodingInfo>>,
    records: Mutex<HashMap<i32, Address>>,
    references: Mutex<HashMap<Address, usize>>,
    released: Mutex<Vec<Address>>,
    lifespan: Mutex<(Address, LifespanKind)>,
    searches: AtomicUsize,
}

impl Default for FakeBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeBackend {
    /// The address of the top-level native scope.
    pub const TOP_LIFESPAN: Address = Address(0x10);

    /// An empty backend whose current native scope is [`FakeBackend::TOP_LIFESPAN`].
    pub fn new() -> Self {
        Self {
            memory: FakeMemory::default(),
            layouts: CatalogClass::ALL
                .into_iter()
                .map(|class| (class.oid(), class.layout()))
                .collect(),
            descriptor_layout: descriptor_layout(),
            rows: Mutex::default(),
            encodings: Mutex::default(),
            records: Mutex::default(),
            references: Mutex::default(),
            released: Mutex::default(),
            lifespan: Mutex::new((Self::TOP_LIFESPAN, LifespanKind::MemoryContext)),
            searches: AtomicUsize::new(0),
        }
    }

    /// The backing memory.
    pub fn memory(&self) -> &FakeMemory {
        &self.memory
    }

    /// Number of row searches served.
    pub fn searches(&self) -> usize {
        self.searches.load(Ordering::Relaxed)
    }

    fn layout_of(&self, class: Oid) -> &RowLayout {
        match self.layouts.get(&class) {
            Some(layout) => layout,
            None => panic!("no layout for class {class}"),
        }
    }

    fn put(&self, key: CatalogKey, address: Address) -> Address {
        self.rows.lock().insert(key, address);
        address
    }

    /// Write the namespace row `oid`.
    pub fn put_namespace(&self, oid: Oid, name: &str, owner: Oid) -> Address {
        let address = self
            .memory
            .row(self.layout_of(NAMESPACE))
            .name("nspname", name)
            .oid("nspowner", owner)
            .finish();
        self.put(CatalogKey::new(NAMESPACE, oid), address)
    }

    /// Write the relation row `oid`.
    pub fn put_relation(&self, oid: Oid, name: &str, namespace: Oid, row_type: Oid, natts: i16) -> Address {
        let address = self
            .memory
            .row(self.layout_of(RELATION))
            .name("relname", name)
            .oid("relnamespace", namespace)
            .oid("reltype", row_type)
            .char("relkind", b'r')
            .i16("relnatts", natts)
            .finish();
        self.put(CatalogKey::new(RELATION, oid), address)
    }

    /// Write attribute `attnum` of relation `relid`.
    pub fn put_attribute(&self, relid: Oid, attnum: i16, name: &str, type_oid: Oid, typmod: i32) -> Address {
        let address = self
            .memory
            .row(self.layout_of(ATTRIBUTE))
            .oid("attrelid", relid)
            .name("attname", name)
            .oid("atttypid", type_oid)
            .i16("attnum", attnum)
            .i32("atttypmod", typmod)
            .bool("attnotnull", false)
            .finish();
        self.put(CatalogKey::with_sub(ATTRIBUTE, relid, attnum.into()), address)
    }

    /// Write the scalar type row `oid`.
    pub fn put_scalar_type(&self, oid: Oid, name: &str, length: i16, by_value: bool) -> Address {
        let address = self
            .memory
            .row(self.layout_of(TYPE))
            .name("typname", name)
            .i16("typlen", length)
            .bool("typbyval", by_value)
            .char("typtype", b'b')
            .finish();
        self.put(CatalogKey::with_sub(TYPE, oid, NO_TYPMOD), address)
    }

    /// Write the composite type row `oid`, the row type of relation `relid`.
    pub fn put_composite_type(&self, oid: Oid, name: &str, relid: Oid) -> Address {
        let address = self
            .memory
            .row(self.layout_of(TYPE))
            .name("typname", name)
            .i16("typlen", -1)
            .bool("typbyval", false)
            .char("typtype", b'c')
            .oid("typrelid", relid)
            .finish();
        self.put(CatalogKey::with_sub(TYPE, oid, NO_TYPMOD), address)
    }

    /// Write the `record` pseudo-type row.
    pub fn put_record_type(&self) -> Address {
        let address = self
            .memory
            .row(self.layout_of(TYPE))
            .name("typname", "record")
            .i16("typlen", -1)
            .char("typtype", b'p')
            .finish();
        self.put(CatalogKey::with_sub(TYPE, RECORD_TYPE, NO_TYPMOD), address)
    }

    /// Write the routine row `oid`.
    pub fn put_routine(
        &self,
        oid: Oid,
        name: &str,
        namespace: Oid,
        language: Oid,
        args: &[Oid],
        source: Option<&str>,
    ) -> Address {
        let address = self
            .memory
            .row(self.layout_of(ROUTINE))
            .name("proname", name)
            .oid("pronamespace", namespace)
            .oid("prolang", language)
            .oid("prorettype", Oid(2278))
            .bool("proretset", false)
            .oid_list("proargtypes", args)
            .text("prosrc", source)
            .finish();
        self.put(CatalogKey::new(ROUTINE, oid), address)
    }

    /// Write the language row `oid`.
    pub fn put_language(&self, oid: Oid, name: &str, trusted: bool) -> Address {
        let address = self
            .memory
            .row(self.layout_of(LANGUAGE))
            .name("lanname", name)
            .bool("lanpltrusted", trusted)
            .bool("lanispl", true)
            .finish();
        self.put(CatalogKey::new(LANGUAGE, oid), address)
    }

    /// Delete the row of `key`.
    pub fn remove(&self, key: &CatalogKey) -> Option<Address> {
        self.rows.lock().remove(key)
    }

    /// Register an encoding.
    pub fn put_encoding(&self, info: EncodingInfo) {
        self.encodings.lock().insert(info.id, info);
    }

    /// Intern a record type under `typmod` with the given column types.
    pub fn intern_record(&self, typmod: i32, types: &[Oid]) -> Address {
        let address = self
            .memory
            .row(&self.descriptor_layout)
            .i32("natts", types.len() as i32)
            .oid("tdtypeid", RECORD_TYPE)
            .i32("tdtypmod", typmod)
            .oid_list("atttypes", types)
            .finish();
        self.records.lock().insert(typmod, address);
        address
    }

    /// Outstanding references on the descriptor at `address`.
    pub fn references(&self, address: Address) -> usize {
        self.references.lock().get(&address).copied().unwrap_or_default()
    }

    /// Addresses passed to [`Backend::release_descriptor`], in order.
    pub fn released(&self) -> Vec<Address> {
        self.released.lock().clone()
    }

    /// Switch the current native scope.
    pub fn set_lifespan(&self, address: Address, kind: LifespanKind) {
        *self.lifespan.lock() = (address, kind);
    }
}

impl Backend for FakeBackend {
    fn window(&self) -> &dyn NativeWindow {
        &self.memory
    }

    fn layout(&self, class: Oid) -> Result<&RowLayout> {
        self.layouts.get(&class).ok_or_else(|| Error::not_found(class))
    }

    fn descriptor_layout(&self) -> &RowLayout {
        &self.descriptor_layout
    }

    fn search(&self, _: &Mutator, key: &CatalogKey) -> Result<Option<Address>> {
        self.searches.fetch_add(1, Ordering::Relaxed);
        Ok(self.rows.lock().get(key).copied())
    }

    fn encoding(&self, id: i32) -> Result<Option<EncodingInfo>> {
        Ok(self.encodings.lock().get(&id).cloned())
    }

    fn lookup_record_descriptor(&self, _: &Mutator, typmod: i32) -> Result<Option<Address>> {
        let address = self.records.lock().get(&typmod).copied();
        if let Some(address) = address {
            *self.references.lock().entry(address).or_default() += 1;
        }
        Ok(address)
    }

    fn release_descriptor(&self, address: Address) {
        if let Some(count) = self.references.lock().get_mut(&address) {
            *count = count.saturating_sub(1);
        }
        self.released.lock().push(address);
    }

    fn current_lifespan(&self, _: &Mutator) -> (Address, LifespanKind) {
        *self.lifespan.lock()
    }
}
