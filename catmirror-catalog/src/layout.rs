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

//! Row layouts: where each column of a catalog row lives.

use catmirror_common::{
    error::{Error, ErrorKind, Result},
    key::Oid,
};
use hashbrown::HashMap;

/// Representation of a column in native memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Repr {
    /// One byte, zero is `false`.
    Bool,
    /// One byte character.
    Char,
    /// Native-endian `i16`.
    I16,
    /// Native-endian `i32`.
    I32,
    /// Native-endian `u32` object identifier.
    Oid,
    /// Fixed-size, NUL-padded name of [`Repr::NAME_LEN`] bytes.
    Name,
    /// Pointer to a NUL-terminated string. Null means absent.
    Text,
    /// Pointer to an `i32` count followed by that many oids. Null means empty.
    OidList,
}

impl Repr {
    /// Size of a fixed-size name.
    pub const NAME_LEN: usize = 64;

    /// Size of the column in the row.
    pub const fn size(&self) -> usize {
        match self {
            Repr::Bool | Repr::Char => 1,
            Repr::I16 => 2,
            Repr::I32 | Repr::Oid => 4,
            Repr::Name => Self::NAME_LEN,
            Repr::Text | Repr::OidList => size_of::<usize>(),
        }
    }

    /// Alignment of the column in the row.
    pub const fn align(&self) -> usize {
        match self {
            Repr::Name => 1,
            _ => self.size(),
        }
    }
}

/// Location of a column in a row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldLoc {
    /// Offset from the start of the row.
    pub offset: usize,
    /// Representation.
    pub repr: Repr,
}

/// Column layout of the rows of one catalog class.
#[derive(Debug, Clone)]
pub struct RowLayout {
    class: Oid,
    fields: HashMap<&'static str, FieldLoc>,
    size: usize,
}

impl RowLayout {
    /// Create an empty layout for `class`.
    pub fn new(class: Oid) -> Self {
        Self {
            class,
            fields: HashMap::new(),
            size: 0,
        }
    }

    /// Append a column, naturally aligned after the previous one.
    pub fn with_field(mut self, name: &'static str, repr: Repr) -> Self {
        let offset = self.size.next_multiple_of(repr.align());
        self.fields.insert(name, FieldLoc { offset, repr });
        self.size = offset + repr.size();
        self
    }

    /// Catalog class of the layout.
    pub fn class(&self) -> Oid {
        self.class
    }

    /// Size of a row.
    pub fn size(&self) -> usize {
        self.size
    }

    /// Location of column `name`.
    pub fn field(&self, name: &str) -> Result<FieldLoc> {
        self.fields.get(name).copied().ok_or_else(|| {
            Error::new(ErrorKind::Native, "column not in row layout")
                .with_context("class", self.class)
                .with_context("column", name)
        })
    }
}
