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

//! Native windows: byte-accurate read views over natively-owned memory.

use bytes::Bytes;
use catmirror_common::{
    error::{Error, Result},
    key::Address,
};

/// Read view over natively-owned memory, supplied by the backend.
///
/// Multi-byte values are read in native byte order.
pub trait NativeWindow: Send + Sync + 'static {
    /// Copy `len` bytes starting at `address`.
    fn map_fixed(&self, address: Address, len: usize) -> Result<Bytes>;

    /// Read the NUL-terminated string starting at `address`.
    fn map_cstring(&self, address: Address) -> Result<String>;

    /// Read a `u8` at `address + offset`.
    fn read_u8(&self, address: Address, offset: usize) -> Result<u8> {
        read_array::<_, 1>(self, address, offset).map(u8::from_ne_bytes)
    }

    /// Read a `bool` stored as one byte at `address + offset`.
    fn read_bool(&self, address: Address, offset: usize) -> Result<bool> {
        self.read_u8(address, offset).map(|v| v != 0)
    }

    /// Read an `i16` at `address + offset`.
    fn read_i16(&self, address: Address, offset: usize) -> Result<i16> {
        read_array::<_, 2>(self, address, offset).map(i16::from_ne_bytes)
    }

    /// Read an `i32` at `address + offset`.
    fn read_i32(&self, address: Address, offset: usize) -> Result<i32> {
        read_array::<_, 4>(self, address, offset).map(i32::from_ne_bytes)
    }

    /// Read a `u32` at `address + offset`.
    fn read_u32(&self, address: Address, offset: usize) -> Result<u32> {
        read_array::<_, 4>(self, address, offset).map(u32::from_ne_bytes)
    }

    /// Read an `i64` at `address + offset`.
    fn read_i64(&self, address: Address, offset: usize) -> Result<i64> {
        read_array::<_, 8>(self, address, offset).map(i64::from_ne_bytes)
    }

    /// Read a pointer at `address + offset`.
    fn read_address(&self, address: Address, offset: usize) -> Result<Address> {
        read_array::<_, { size_of::<usize>() }>(self, address, offset)
            .map(usize::from_ne_bytes)
            .map(Address)
    }
}

fn read_array<W, const N: usize>(window: &W, address: Address, offset: usize) -> Result<[u8; N]>
where
    W: NativeWindow + ?Sized,
{
    let bytes = window.map_fixed(address.offset(offset), N)?;
    bytes[..]
        .try_into()
        .map_err(|_| Error::out_of_range(address.0, offset, N))
}
