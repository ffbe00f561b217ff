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

//! catmirror - a catalog mirror cache for Rust.
//!
//! catmirror keeps managed-side mirrors of a native backend's catalog rows: at most one live
//! mirror per catalog identity, lazily computed values memoized until invalidated, O(1) bulk
//! invalidation through indirection cells, and exactly-once release of natively-owned resources
//! whether the managed side drops them first or the native scope ends first.
//!
//! The crates of the workspace are re-exported as modules:
//!
//! - [`common`]: keys, errors, metrics and the mutator token.
//! - [`memory`]: the mirror engine, independent of any catalog.
//! - [`catalog`]: catalog mirror objects and the invalidation dispatcher.
//!
//! Commonly used items are re-exported at the crate root.

pub use catmirror_catalog as catalog;
pub use catmirror_common as common;
pub use catmirror_memory as memory;

mod prelude;
pub use prelude::*;
