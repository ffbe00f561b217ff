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

use std::sync::{Arc, Weak};

use catmirror_common::error::{Error, Result};
use catmirror_memory::{Access, Computed, Slot, SlotHost, Slots};

use crate::{
    backend::EncodingInfo,
    catalog::{Catalog, CatalogInner},
    session::Session,
};

const INFO: Slot<Encoding, EncodingInfo> = Slot::new(0, "encoding.info", info).fixed();
const SLOTS: usize = 1;

fn info(encoding: &Encoding, _: Access<'_, Session>) -> Result<Computed<EncodingInfo>> {
    let catalog = Catalog::upgrade(&encoding.catalog)?;
    match catalog.backend().encoding(encoding.id)? {
        Some(info) => Ok(Computed::Cached(info)),
        None => Err(Error::not_found(format!("encoding {}", encoding.id))),
    }
}

/// Mirror of a character encoding.
///
/// Encodings never change, so the mirror is never invalidated and may be computed from any
/// thread.
#[derive(Debug)]
pub struct Encoding {
    id: i32,
    catalog: Weak<CatalogInner>,
    slots: Slots,
}

impl SlotHost for Encoding {
    type Mutator = Session;

    fn slots(&self) -> &Slots {
        &self.slots
    }
}

impl Encoding {
    pub(crate) fn new(catalog: &Catalog, id: i32) -> Self {
        Self {
            id,
            catalog: catalog.downgrade(),
            slots: Slots::new(SLOTS, vec![], catalog.metrics().clone()),
        }
    }

    /// Encoding id.
    pub fn id(&self) -> i32 {
        self.id
    }

    /// Static description of the encoding.
    pub fn info(&self, access: Access<'_, Session>) -> Result<Arc<EncodingInfo>> {
        INFO.get(self, access)
    }

    /// Canonical name.
    pub fn name(&self, access: Access<'_, Session>) -> Result<String> {
        self.info(access).map(|info| info.name.clone())
    }

    /// Maximum bytes per character.
    pub fn max_char_len(&self, access: Access<'_, Session>) -> Result<u8> {
        self.info(access).map(|info| info.max_char_len)
    }
}
