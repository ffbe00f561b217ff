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

use catmirror_common::{
    error::Result,
    key::{Address, Oid},
    strict_assert_eq,
};
use catmirror_memory::{DualState, Pin, ReleaseCause};
use itertools::Itertools;

use crate::{catalog::Catalog, class::NO_TYPMOD, row::Row, session::Session};

/// One column of a tuple descriptor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Column {
    /// Attribute number, starting at 1.
    pub attnum: i16,
    /// Column name. Native record descriptors carry none.
    pub name: Option<String>,
    /// Oid of the column type.
    pub type_oid: Oid,
    /// Type modifier of the column.
    pub typmod: i32,
}

/// A tuple descriptor: the column list of a relation or record type.
///
/// Descriptors derived from a relation are plain values memoized by the relation. Native
/// descriptors mirror a reference-counted backend allocation, released through a [`DualState`]
/// registered to the lifespan current at construction.
#[derive(Debug)]
pub struct Descriptor {
    type_oid: Oid,
    typmod: i32,
    relation: Option<Oid>,
    columns: Vec<Column>,
    native: Option<DualState>,
}

impl Descriptor {
    pub(crate) fn from_relation(relation: Oid, type_oid: Oid, columns: Vec<Column>) -> Self {
        Self {
            type_oid,
            typmod: NO_TYPMOD,
            relation: Some(relation),
            columns,
            native: None,
        }
    }

    /// Adopt the caller's reference on the native descriptor at `address`.
    pub(crate) fn native(catalog: &Catalog, session: &Session, address: Address) -> Result<Self> {
        let lifespan = session.current_lifespan()?;
        let backend = catalog.backend().clone();
        let guard = DualState::builder(address)
            .with_name("descriptor")
            .with_metrics(catalog.metrics().clone())
            .on_release(move |address, cause| {
                // After a lifespan teardown the descriptor memory is already gone.
                if cause == ReleaseCause::Unreachable {
                    backend.release_descriptor(address);
                }
            })
            .deferred_to(catalog.release_queue().clone())
            .register(&lifespan)?;

        let (type_oid, typmod, types) = {
            let pin = guard.pin()?;
            let backend = catalog.backend();
            let row = Row::new(backend.window(), backend.descriptor_layout(), pin.handle());
            let natts = row.get_i32("natts")?;
            let types = row.get_oid_list("atttypes")?;
            strict_assert_eq!(usize::try_from(natts).ok(), Some(types.len()));
            (row.get_oid("tdtypeid")?, row.get_i32("tdtypmod")?, types)
        };

        let columns = types
            .into_iter()
            .enumerate()
            .map(|(i, type_oid)| Column {
                attnum: i as i16 + 1,
                name: None,
                type_oid,
                typmod: NO_TYPMOD,
            })
            .collect_vec();

        tracing::debug!(
            "[descriptor]: mirrored native descriptor {address} of type {type_oid} typmod {typmod} in lifespan {}",
            lifespan.address()
        );

        Ok(Self {
            type_oid,
            typmod,
            relation: None,
            columns,
            native: Some(guard),
        })
    }

    /// Oid of the row type.
    pub fn type_oid(&self) -> Oid {
        self.type_oid
    }

    /// Type modifier of the row type.
    pub fn typmod(&self) -> i32 {
        self.typmod
    }

    /// The relation the descriptor was derived from.
    pub fn relation(&self) -> Option<Oid> {
        self.relation
    }

    /// The columns.
    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    /// Number of columns.
    pub fn natts(&self) -> usize {
        self.columns.len()
    }

    /// Returns `true` for a native descriptor.
    pub fn is_native(&self) -> bool {
        self.native.is_some()
    }

    /// Returns `true` if the native descriptor has been released.
    pub fn is_released(&self) -> bool {
        self.native.as_ref().is_some_and(|guard| guard.is_released())
    }

    /// Pin the native descriptor to read through its address.
    ///
    /// `Ok(None)` for descriptors derived from a relation. Fails once released.
    pub fn pin(&self) -> Result<Option<Pin<'_>>> {
        self.native.as_ref().map(|guard| guard.pin()).transpose()
    }
}
