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

use std::hash::Hash;

use hashbrown::HashSet;
use itertools::Itertools;
use parking_lot::Mutex;

/// Back-references from one mirror to the mirrors discovered to depend on it.
///
/// Dependents are tracked by key so that the tracking mirror never keeps them alive.
#[derive(Debug)]
pub struct Dependents<K> {
    keys: Mutex<HashSet<K>>,
}

impl<K> Default for Dependents<K> {
    fn default() -> Self {
        Self {
            keys: Mutex::new(HashSet::new()),
        }
    }
}

impl<K> Dependents<K>
where
    K: Hash + Eq + Clone,
{
    /// Track `key`. Returns `true` if it was not tracked yet.
    pub fn insert(&self, key: K) -> bool {
        self.keys.lock().insert(key)
    }

    /// Returns `true` if `key` is tracked.
    pub fn contains(&self, key: &K) -> bool {
        self.keys.lock().contains(key)
    }

    /// Stop tracking every dependent and return them.
    pub fn take(&self) -> Vec<K> {
        self.keys.lock().drain().collect_vec()
    }

    /// Snapshot of the tracked dependents.
    pub fn snapshot(&self) -> Vec<K> {
        self.keys.lock().iter().cloned().collect_vec()
    }

    /// Number of tracked dependents.
    pub fn len(&self) -> usize {
        self.keys.lock().len()
    }

    /// Returns `true` if nothing is tracked.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
