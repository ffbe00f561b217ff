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

use std::{
    fmt::{Debug, Display},
    hash::Hash,
};

use serde::{Deserialize, Serialize};

/// Key trait for the identity cache.
pub trait Key: Send + Sync + 'static + Hash + Eq + Clone + Debug {}
impl<T: Send + Sync + 'static + Hash + Eq + Clone + Debug> Key for T {}

/// Object identifier of an external catalog entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct Oid(pub u32);

impl Oid {
    /// The invalid object identifier.
    pub const INVALID: Oid = Oid(0);

    /// Returns `true` if the oid is not [`Oid::INVALID`].
    pub fn is_valid(&self) -> bool {
        self.0 != 0
    }
}

impl Display for Oid {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u32> for Oid {
    fn from(v: u32) -> Self {
        Self(v)
    }
}

/// Identity of one catalog entity: the catalog class it lives in, its oid, and a sub-identifier.
///
/// The sub-identifier distinguishes entities sharing an oid, e.g. the attributes of one relation
/// (attribute number) or the interned record types (type modifier). It is `0` when unused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CatalogKey {
    /// Oid of the catalog class.
    pub class: Oid,
    /// Oid of the object.
    pub object: Oid,
    /// Sub-identifier.
    pub sub: i32,
}

impl CatalogKey {
    /// Create a key without sub-identifier.
    pub const fn new(class: Oid, object: Oid) -> Self {
        Self { class, object, sub: 0 }
    }

    /// Create a key with sub-identifier.
    pub const fn with_sub(class: Oid, object: Oid, sub: i32) -> Self {
        Self { class, object, sub }
    }
}

impl Display for CatalogKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({},{},{})", self.class, self.object, self.sub)
    }
}

/// Raw address of a natively-owned resource.
///
/// Non-catalog resources (memory contexts, resource owners, native descriptors) are identified by
/// their address. The backend guarantees an address is not reused for a different logical entity
/// before the invalidation of the previous one has been delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Address(pub usize);

impl Address {
    /// The null address.
    pub const NULL: Address = Address(0);

    /// Returns `true` for the null address.
    pub fn is_null(&self) -> bool {
        self.0 == 0
    }

    /// Address `offset` bytes past this one.
    pub fn offset(&self, offset: usize) -> Address {
        Address(self.0 + offset)
    }
}

impl Display for Address {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_display() {
        let key = CatalogKey::with_sub(Oid(1249), Oid(100), 3);
        assert_eq!(key.to_string(), "(1249,100,3)");
        assert_eq!(Address(0x1000).offset(0x10).to_string(), "0x1010");
        assert!(!Oid::INVALID.is_valid());
    }
}
