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

//! Well-known catalog classes and their standard row layouts.

use catmirror_common::key::Oid;

use crate::layout::{Repr, RowLayout};

/// Catalog classes mirrored by the catalog.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CatalogClass {
    /// `pg_namespace`.
    Namespace,
    /// `pg_class`.
    Relation,
    /// `pg_attribute`.
    Attribute,
    /// `pg_type`.
    Type,
    /// `pg_proc`.
    Routine,
    /// `pg_language`.
    Language,
}

impl CatalogClass {
    /// Every mirrored class.
    pub const ALL: [CatalogClass; 6] = [
        CatalogClass::Namespace,
        CatalogClass::Relation,
        CatalogClass::Attribute,
        CatalogClass::Type,
        CatalogClass::Routine,
        CatalogClass::Language,
    ];

    /// Oid of the class.
    pub const fn oid(&self) -> Oid {
        match self {
            CatalogClass::Namespace => NAMESPACE,
            CatalogClass::Relation => RELATION,
            CatalogClass::Attribute => ATTRIBUTE,
            CatalogClass::Type => TYPE,
            CatalogClass::Routine => ROUTINE,
            CatalogClass::Language => LANGUAGE,
        }
    }

    /// The class of `oid`, if mirrored.
    pub fn from_oid(oid: Oid) -> Option<Self> {
        Self::ALL.into_iter().find(|class| class.oid() == oid)
    }

    /// The standard row layout of the class.
    pub fn layout(&self) -> RowLayout {
        let layout = RowLayout::new(self.oid());
        match self {
            CatalogClass::Namespace => layout
                .with_field("nspname", Repr::Name)
                .with_field("nspowner", Repr::Oid),
            CatalogClass::Relation => layout
                .with_field("relname", Repr::Name)
                .with_field("relnamespace", Repr::Oid)
                .with_field("reltype", Repr::Oid)
                .with_field("relkind", Repr::Char)
                .with_field("relnatts", Repr::I16),
            CatalogClass::Attribute => layout
                .with_field("attrelid", Repr::Oid)
                .with_field("attname", Repr::Name)
                .with_field("atttypid", Repr::Oid)
                .with_field("attnum", Repr::I16)
                .with_field("atttypmod", Repr::I32)
                .with_field("attnotnull", Repr::Bool),
            CatalogClass::Type => layout
                .with_field("typname", Repr::Name)
                .with_field("typnamespace", Repr::Oid)
                .with_field("typlen", Repr::I16)
                .with_field("typbyval", Repr::Bool)
                .with_field("typtype", Repr::Char)
                .with_field("typrelid", Repr::Oid)
                .with_field("typelem", Repr::Oid),
            CatalogClass::Routine => layout
                .with_field("proname", Repr::Name)
                .with_field("pronamespace", Repr::Oid)
                .with_field("prolang", Repr::Oid)
                .with_field("prorettype", Repr::Oid)
                .with_field("proretset", Repr::Bool)
                .with_field("proargtypes", Repr::OidList)
                .with_field("prosrc", Repr::Text),
            CatalogClass::Language => layout
                .with_field("lanname", Repr::Name)
                .with_field("lanpltrusted", Repr::Bool)
                .with_field("lanispl", Repr::Bool),
        }
    }
}

/// `pg_namespace`.
pub const NAMESPACE: Oid = Oid(2615);
/// `pg_class`.
pub const RELATION: Oid = Oid(1259);
/// `pg_attribute`.
pub const ATTRIBUTE: Oid = Oid(1249);
/// `pg_type`.
pub const TYPE: Oid = Oid(1247);
/// `pg_proc`.
pub const ROUTINE: Oid = Oid(1255);
/// `pg_language`.
pub const LANGUAGE: Oid = Oid(2612);

/// The `record` pseudo-type. Interned record types are keyed by their type modifier.
pub const RECORD_TYPE: Oid = Oid(2249);

/// Type modifier of types that have none.
pub const NO_TYPMOD: i32 = -1;

/// `typtype` of composite types.
pub const TYPTYPE_COMPOSITE: u8 = b'c';

/// Layout of native tuple descriptors.
pub fn descriptor_layout() -> RowLayout {
    RowLayout::new(Oid::INVALID)
        .with_field("natts", Repr::I32)
        .with_field("tdtypeid", Repr::Oid)
        .with_field("tdtypmod", Repr::I32)
        .with_field("atttypes", Repr::OidList)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_class_oid_roundtrip() {
        for class in CatalogClass::ALL {
            assert_eq!(CatalogClass::from_oid(class.oid()), Some(class));
            assert_eq!(class.layout().class(), class.oid());
        }
        assert_eq!(CatalogClass::from_oid(RECORD_TYPE), None);
    }
}
