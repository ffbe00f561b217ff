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

//! Shared components for catmirror.

/// Assertion helpers.
pub mod assert;
/// The error type shared by all catmirror crates.
pub mod error;
/// Identity cache leave events.
pub mod event;
/// Identity keys for mirrored objects.
pub mod key;
/// Metrics for the mirror cache.
pub mod metrics;
/// The single mutator execution context.
pub mod mutator;
