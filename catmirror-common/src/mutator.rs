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
    marker::PhantomData,
    sync::atomic::{AtomicU64, Ordering},
    thread::ThreadId,
};

static MUTATOR_ID: AtomicU64 = AtomicU64::new(1);

/// Token of the single mutator context.
///
/// Only the mutator may call into the backend, construct native-backed resources, trip indirection
/// cells, evict identity cache entries and deliver lifespan teardown. Every such API takes a
/// `&Mutator`.
///
/// [`Mutator`] is neither [`Send`] nor [`Sync`], so a `&Mutator` can never leave the thread that
/// created the token. Holding one proves the caller runs on the mutator thread.
#[derive(Debug)]
pub struct Mutator {
    id: u64,
    thread: ThreadId,
    _marker: PhantomData<*const ()>,
}

impl Default for Mutator {
    fn default() -> Self {
        Self::new()
    }
}

impl Mutator {
    /// Designate the current thread as a mutator context.
    pub fn new() -> Self {
        let id = MUTATOR_ID.fetch_add(1, Ordering::Relaxed);
        let thread = std::thread::current().id();
        tracing::debug!("[mutator]: mutator {id} bound to thread {thread:?}");
        Self {
            id,
            thread,
            _marker: PhantomData,
        }
    }

    /// Unique id of the mutator context.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// The thread the mutator context is bound to.
    pub fn thread(&self) -> ThreadId {
        self.thread
    }
}
