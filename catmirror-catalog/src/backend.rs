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

//! The backend collaborator.

use catmirror_common::{
    error::Result,
    key::{Address, CatalogKey, Oid},
    mutator::Mutator,
};
use catmirror_memory::LifespanKind;
use serde::{Deserialize, Serialize};

use crate::{layout::RowLayout, window::NativeWindow};

/// Static description of a character encoding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncodingInfo {
    /// Encoding id.
    pub id: i32,
    /// Canonical name.
    pub name: String,
    /// Maximum bytes per character.
    pub max_char_len: u8,
    /// Whether the encoding may be used as a server encoding.
    pub server_safe: bool,
}

/// The natively-owned database backend mirrored by the catalog.
///
/// Methods taking a [`Mutator`] re-enter the backend and may only run on the mutator. The others
/// read static or natively-owned memory and are safe from any thread.
pub trait Backend: Send + Sync + 'static {
    /// The window over native memory.
    fn window(&self) -> &dyn NativeWindow;

    /// Row layout of catalog `class`.
    fn layout(&self, class: Oid) -> Result<&RowLayout>;

    /// Layout of native tuple descriptors.
    fn descriptor_layout(&self) -> &RowLayout;

    /// Look up the row of `key`. `Ok(None)` if the entity does not exist.
    fn search(&self, mutator: &Mutator, key: &CatalogKey) -> Result<Option<Address>>;

    /// Look up the static description of encoding `id`.
    fn encoding(&self, id: i32) -> Result<Option<EncodingInfo>>;

    /// Look up the interned record descriptor of `typmod`, taking a reference to it.
    ///
    /// `Ok(None)` if no record type has been interned under `typmod` yet.
    fn lookup_record_descriptor(&self, mutator: &Mutator, typmod: i32) -> Result<Option<Address>>;

    /// Drop a reference taken by [`Backend::lookup_record_descriptor`].
    ///
    /// Only ever invoked on the mutator.
    fn release_descriptor(&self, address: Address);

    /// The innermost live native scope.
    fn current_lifespan(&self, mutator: &Mutator) -> (Address, LifespanKind);
}
