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

//! The mirror engine of catmirror.
//!
//! - [`cell`]: indirection cells and the gates that hand them out, for O(1) bulk invalidation.
//! - [`slot`]: per-object lazy value slots memoized under a gate.
//! - [`identity`]: identity caches guaranteeing at most one live mirror per key.
//! - [`guard`] and [`lifespan`]: exactly-once release of natively-owned resources.

pub mod cell;
pub mod guard;
pub mod identity;
pub mod lifespan;
pub mod slot;

mod prelude;
pub use prelude::*;
