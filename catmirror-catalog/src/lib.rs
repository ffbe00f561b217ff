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

//! Catalog mirror objects of catmirror.
//!
//! A [`Catalog`] hands out identity-unique mirrors of backend catalog rows: namespaces,
//! relations and their attributes, types, routines and procedural languages, plus encodings and
//! native tuple descriptors. Mirror values are computed lazily through a [`NativeWindow`] and
//! memoized until a [`Signal`] delivered through [`Session::dispatch`] invalidates them.

pub mod backend;
pub mod catalog;
pub mod class;
pub mod dependents;
pub mod dispatch;
pub mod layout;
pub mod object;
pub mod row;
pub mod session;
pub mod window;

#[cfg(any(test, feature = "test_utils"))]
pub mod test_utils;

mod prelude;
pub use prelude::*;
