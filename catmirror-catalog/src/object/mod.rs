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

//! Mirror objects, one module per catalog kind.
//!
//! Every catalog row mirror has a `TUPLE` slot holding the address of its row, found through
//! [`Backend::search`](crate::backend::Backend::search) on the mutator. Its column slots delegate
//! to `TUPLE` and share its gate, so one trip invalidates the row and every value read from it.

use std::{
    fmt::Debug,
    sync::{Arc, Weak},
};

use catmirror_common::{
    error::{Error, Result},
    key::{Address, CatalogKey},
};
use catmirror_memory::{Access, Computed, Gate, MirrorState, Slot, SlotHost, Slots};

use crate::{
    catalog::{Catalog, CatalogInner},
    row::Row,
    session::Session,
};

pub mod attribute;
pub mod descriptor;
pub mod encoding;
pub mod language;
pub mod namespace;
pub mod relation;
pub mod routine;
pub mod ty;

/// A mirror of one catalog row.
pub trait Mirror: SlotHost<Mutator = Session> {
    /// Identity key of the mirror.
    fn key(&self) -> &CatalogKey;

    /// Key of the row in the backend. Defaults to the identity key.
    fn row_key(&self) -> CatalogKey {
        *self.key()
    }

    /// The owning catalog.
    fn catalog(&self) -> Result<Catalog>;

    /// Conceptual state of the mirror.
    fn state(&self) -> MirrorState {
        self.slots().state()
    }
}

/// State shared by every catalog row mirror.
pub(crate) struct Base {
    key: CatalogKey,
    catalog: Weak<CatalogInner>,
    slots: Slots,
}

impl Debug for Base {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Base")
            .field("key", &self.key)
            .field("slots", &self.slots)
            .finish()
    }
}

impl Base {
    pub(crate) fn new(catalog: &Catalog, key: CatalogKey, slots: usize, gates: Vec<Gate>) -> Self {
        Self {
            key,
            catalog: catalog.downgrade(),
            slots: Slots::new(slots, gates, catalog.metrics().clone()),
        }
    }

    pub(crate) fn key(&self) -> &CatalogKey {
        &self.key
    }

    pub(crate) fn catalog(&self) -> Result<Catalog> {
        Catalog::upgrade(&self.catalog)
    }

    pub(crate) fn slots(&self) -> &Slots {
        &self.slots
    }
}

/// Compute function of every `TUPLE` slot.
pub(crate) fn search<H: Mirror>(host: &H, access: Access<'_, Session>) -> Result<Computed<Address>> {
    let session = access.mutator().ok_or_else(|| Error::wrong_context("tuple"))?;
    let key = host.row_key();
    match session.catalog().backend().search(session.mutator(), &key)? {
        Some(address) => Ok(Computed::Cached(address)),
        None => Err(Error::not_found(key)),
    }
}

/// Read columns of the row held by `tuple`.
pub(crate) fn read_row<H, T, F>(host: &H, tuple: &Slot<H, Address>, access: Access<'_, Session>, f: F) -> Result<Computed<T>>
where
    H: Mirror,
    F: FnOnce(Row<'_>) -> Result<T>,
{
    let address = *tuple.get(host, access)?;
    let catalog = host.catalog()?;
    let backend = catalog.backend();
    let layout = backend.layout(host.key().class)?;
    f(Row::new(backend.window(), layout, address)).map(Computed::Cached)
}

/// Copy a memoized value out of its `Arc`.
pub(crate) fn copied<T: Copy>(value: Result<Arc<T>>) -> Result<T> {
    value.map(|value| *value)
}
