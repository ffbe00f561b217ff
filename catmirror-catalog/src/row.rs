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

//! Typed reads of catalog rows through a native window.

use catmirror_common::{
    error::{Error, ErrorKind, Result},
    key::{Address, Oid},
};

use crate::{
    layout::{FieldLoc, Repr, RowLayout},
    window::NativeWindow,
};

/// One catalog row in native memory.
#[derive(Clone, Copy)]
pub struct Row<'a> {
    window: &'a dyn NativeWindow,
    layout: &'a RowLayout,
    address: Address,
}

impl std::fmt::Debug for Row<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Row")
            .field("class", &self.layout.class())
            .field("address", &self.address)
            .finish()
    }
}

impl<'a> Row<'a> {
    /// View the row at `address` with `layout`.
    pub fn new(window: &'a dyn NativeWindow, layout: &'a RowLayout, address: Address) -> Self {
        Self {
            window,
            layout,
            address,
        }
    }

    /// Address of the row.
    pub fn address(&self) -> Address {
        self.address
    }

    fn field(&self, column: &str, repr: Repr) -> Result<FieldLoc> {
        let loc = self.layout.field(column)?;
        if loc.repr != repr {
            return Err(Error::new(ErrorKind::Native, "column read with a mismatched representation")
                .with_context("column", column)
                .with_context("stored", format!("{:?}", loc.repr))
                .with_context("requested", format!("{repr:?}")));
        }
        Ok(loc)
    }

    /// Read a [`Repr::Bool`] column.
    pub fn get_bool(&self, column: &str) -> Result<bool> {
        let loc = self.field(column, Repr::Bool)?;
        self.window.read_bool(self.address, loc.offset)
    }

    /// Read a [`Repr::Char`] column.
    pub fn get_char(&self, column: &str) -> Result<u8> {
        let loc = self.field(column, Repr::Char)?;
        self.window.read_u8(self.address, loc.offset)
    }

    /// Read a [`Repr::I16`] column.
    pub fn get_i16(&self, column: &str) -> Result<i16> {
        let loc = self.field(column, Repr::I16)?;
        self.window.read_i16(self.address, loc.offset)
    }

    /// Read a [`Repr::I32`] column.
    pub fn get_i32(&self, column: &str) -> Result<i32> {
        let loc = self.field(column, Repr::I32)?;
        self.window.read_i32(self.address, loc.offset)
    }

    /// Read a [`Repr::Oid`] column.
    pub fn get_oid(&self, column: &str) -> Result<Oid> {
        let loc = self.field(column, Repr::Oid)?;
        self.window.read_u32(self.address, loc.offset).map(Oid)
    }

    /// Read a [`Repr::Name`] column.
    pub fn get_name(&self, column: &str) -> Result<String> {
        let loc = self.field(column, Repr::Name)?;
        let bytes = self.window.map_fixed(self.address.offset(loc.offset), Repr::NAME_LEN)?;
        let len = bytes.iter().position(|b| *b == 0).unwrap_or(bytes.len());
        String::from_utf8(bytes[..len].to_vec()).map_err(|e| {
            Error::new(ErrorKind::Native, "name is not valid utf-8")
                .with_context("column", column)
                .with_source(e)
        })
    }

    /// Read a [`Repr::Text`] column. A null pointer reads as `None`.
    pub fn get_text(&self, column: &str) -> Result<Option<String>> {
        let loc = self.field(column, Repr::Text)?;
        let ptr = self.window.read_address(self.address, loc.offset)?;
        if ptr.is_null() {
            return Ok(None);
        }
        self.window.map_cstring(ptr).map(Some)
    }

    /// Read a [`Repr::OidList`] column. A null pointer reads as empty.
    pub fn get_oid_list(&self, column: &str) -> Result<Vec<Oid>> {
        let loc = self.field(column, Repr::OidList)?;
        let ptr = self.window.read_address(self.address, loc.offset)?;
        if ptr.is_null() {
            return Ok(vec![]);
        }
        let count = self.window.read_i32(ptr, 0)?;
        let count = usize::try_from(count).map_err(|_| {
            Error::new(ErrorKind::Native, "negative oid list length")
                .with_context("column", column)
                .with_context("count", count)
        })?;
        (0..count)
            .map(|i| self.window.read_u32(ptr, 4 + i * 4).map(Oid))
            .collect()
    }
}
