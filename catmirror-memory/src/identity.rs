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

//! Identity caches.
//!
//! An identity cache maps a stable key to at most one live mirror object. Two flavors share the
//! same retention semantics:
//!
//! - [`IdentityCache`] is concurrent-safe. Its table is sharded, and a miss registers an inflight
//!   construction so that concurrent callers of the same key wait for it instead of constructing
//!   again. No shard lock is held while a constructor runs, so constructors may look up other
//!   keys.
//! - [`LocalIdentityCache`] is thread-confined. It is neither `Send` nor `Sync` and uses no
//!   locking at all.

use std::{
    cell::RefCell,
    collections::VecDeque,
    fmt::Debug,
    hash::BuildHasher,
    marker::PhantomData,
    sync::{Arc, Weak},
    thread::ThreadId,
};

use catmirror_common::{
    error::{Error, ErrorKind, Result},
    event::{Event, EventListener},
    key::Key,
    metrics::Metrics,
    mutator::Mutator,
};
use hashbrown::{DefaultHashBuilder, HashMap, HashSet};
use itertools::Itertools;
use parking_lot::{Condvar, Mutex};
use serde::{Deserialize, Serialize};

/// How an identity cache keeps its mirrors alive.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Retention {
    /// Kept alive as long as the cache is alive.
    Strong,
    /// Kept only while referenced elsewhere.
    #[default]
    Weak,
    /// Kept alive by a bounded FIFO of strong references, weak once pushed out of it or after
    /// [`IdentityCache::relieve_pressure`].
    Soft {
        /// Number of mirrors kept alive.
        capacity: usize,
    },
}

enum Held<V> {
    Strong(Arc<V>),
    Weak(Weak<V>),
}

impl<V> Held<V> {
    fn new(value: &Arc<V>, retention: Retention) -> Self {
        match retention {
            Retention::Strong => Self::Strong(value.clone()),
            Retention::Weak | Retention::Soft { .. } => Self::Weak(Arc::downgrade(value)),
        }
    }

    fn upgrade(&self) -> Option<Arc<V>> {
        match self {
            Self::Strong(value) => Some(value.clone()),
            Self::Weak(value) => value.upgrade(),
        }
    }

    fn is_live(&self) -> bool {
        match self {
            Self::Strong(_) => true,
            Self::Weak(value) => value.strong_count() > 0,
        }
    }
}

/// Tables below this size are never swept on insert.
const SWEEP_MIN: usize = 64;

/// Incremental removal of reclaimed entries, amortized over inserts.
///
/// A sweep runs once the table reaches the threshold, which then doubles the surviving size, so
/// the table stays within twice the live population.
#[derive(Debug)]
struct Sweep {
    at: usize,
}

impl Default for Sweep {
    fn default() -> Self {
        Self { at: SWEEP_MIN }
    }
}

impl Sweep {
    /// Remove reclaimed entries of `table` if due. Returns their keys.
    fn run<K: Key, V>(&mut self, table: &mut HashMap<K, Held<V>>) -> Vec<K> {
        if table.len() < self.at {
            return vec![];
        }
        let dead = table
            .iter()
            .filter(|(_, held)| !held.is_live())
            .map(|(key, _)| key.clone())
            .collect_vec();
        dead.iter().for_each(|key| {
            table.remove(key);
        });
        self.at = (table.len() * 2).max(SWEEP_MIN);
        dead
    }
}

/// Bounded FIFO of strong references backing soft retention.
struct SoftRefs<V> {
    capacity: usize,
    queue: VecDeque<Arc<V>>,
}

impl<V> SoftRefs<V> {
    fn new(retention: Retention) -> Self {
        let capacity = match retention {
            Retention::Soft { capacity } => capacity,
            Retention::Strong | Retention::Weak => 0,
        };
        Self {
            capacity,
            queue: VecDeque::with_capacity(capacity),
        }
    }

    /// Returns the reference pushed out, dropped by the caller outside any lock.
    fn push(&mut self, value: Arc<V>) -> Option<Arc<V>> {
        if self.capacity == 0 {
            return None;
        }
        self.queue.push_back(value);
        if self.queue.len() > self.capacity {
            self.queue.pop_front()
        } else {
            None
        }
    }

    fn remove(&mut self, value: &Arc<V>) -> Option<Arc<V>> {
        let pos = self.queue.iter().position(|v| Arc::ptr_eq(v, value))?;
        self.queue.remove(pos)
    }

    fn take(&mut self) -> VecDeque<Arc<V>> {
        std::mem::take(&mut self.queue)
    }
}

type Listener<K> = Arc<dyn EventListener<Key = K>>;

enum InflightState<V> {
    Constructing,
    Done(Result<Arc<V>>),
}

struct Inflight<V> {
    owner: ThreadId,
    state: Mutex<InflightState<V>>,
    done: Condvar,
}

impl<V> Inflight<V> {
    fn new() -> Self {
        Self {
            owner: std::thread::current().id(),
            state: Mutex::new(InflightState::Constructing),
            done: Condvar::new(),
        }
    }

    fn wait(&self) -> Result<Arc<V>> {
        let mut state = self.state.lock();
        loop {
            if let InflightState::Done(res) = &*state {
                return res.clone();
            }
            self.done.wait(&mut state);
        }
    }

    fn finish(&self, res: Result<Arc<V>>) {
        *self.state.lock() = InflightState::Done(res);
        self.done.notify_all();
    }
}

struct Shard<K, V> {
    table: HashMap<K, Held<V>>,
    inflights: HashMap<K, Arc<Inflight<V>>>,
    sweep: Sweep,
}

impl<K, V> Default for Shard<K, V> {
    fn default() -> Self {
        Self {
            table: HashMap::new(),
            inflights: HashMap::new(),
            sweep: Sweep::default(),
        }
    }
}

/// Builder of identity caches.
pub struct IdentityCacheBuilder<K, V> {
    name: &'static str,
    shards: usize,
    retention: Retention,
    listener: Option<Listener<K>>,
    metrics: Option<Arc<Metrics>>,
    _marker: PhantomData<fn() -> V>,
}

impl<K, V> Debug for IdentityCacheBuilder<K, V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdentityCacheBuilder")
            .field("name", &self.name)
            .field("shards", &self.shards)
            .field("retention", &self.retention)
            .finish()
    }
}

impl<K, V> Default for IdentityCacheBuilder<K, V>
where
    K: Key,
    V: Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V> IdentityCacheBuilder<K, V>
where
    K: Key,
    V: Send + Sync + 'static,
{
    /// Create an identity cache builder with weak retention and 8 shards.
    pub fn new() -> Self {
        Self {
            name: "identity",
            shards: 8,
            retention: Retention::Weak,
            listener: None,
            metrics: None,
            _marker: PhantomData,
        }
    }

    /// Set the name of the cache, used in logs.
    pub fn with_name(mut self, name: &'static str) -> Self {
        self.name = name;
        self
    }

    /// Set the shard count of the concurrent flavor. Ignored by the local flavor.
    pub fn with_shards(mut self, shards: usize) -> Self {
        self.shards = shards.max(1);
        self
    }

    /// Set the retention policy.
    pub fn with_retention(mut self, retention: Retention) -> Self {
        self.retention = retention;
        self
    }

    /// Set the listener told about entries leaving the cache.
    pub fn with_event_listener(mut self, listener: Arc<dyn EventListener<Key = K>>) -> Self {
        self.listener = Some(listener);
        self
    }

    /// Set the metrics. Noop metrics are used if unset.
    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Build the concurrent-safe flavor.
    pub fn build(self) -> IdentityCache<K, V> {
        IdentityCache {
            name: self.name,
            retention: self.retention,
            shards: (0..self.shards).map(|_| Mutex::new(Shard::default())).collect(),
            soft: Mutex::new(SoftRefs::new(self.retention)),
            hash_builder: DefaultHashBuilder::default(),
            listener: self.listener,
            metrics: self.metrics.unwrap_or_else(|| Arc::new(Metrics::noop())),
        }
    }

    /// Build the thread-confined flavor.
    pub fn build_local(self) -> LocalIdentityCache<K, V> {
        LocalIdentityCache {
            name: self.name,
            retention: self.retention,
            table: RefCell::new(HashMap::new()),
            sweep: RefCell::new(Sweep::default()),
            constructing: RefCell::new(HashSet::new()),
            soft: RefCell::new(SoftRefs::new(self.retention)),
            listener: self.listener,
            metrics: self.metrics.unwrap_or_else(|| Arc::new(Metrics::noop())),
            _marker: PhantomData,
        }
    }
}

/// Concurrent-safe identity cache.
pub struct IdentityCache<K, V> {
    name: &'static str,
    retention: Retention,
    shards: Box<[Mutex<Shard<K, V>>]>,
    soft: Mutex<SoftRefs<V>>,
    hash_builder: DefaultHashBuilder,
    listener: Option<Listener<K>>,
    metrics: Arc<Metrics>,
}

impl<K, V> Debug for IdentityCache<K, V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdentityCache")
            .field("name", &self.name)
            .field("retention", &self.retention)
            .field("shards", &self.shards.len())
            .finish()
    }
}

/// Completes an inflight construction with an error if the constructor unwinds.
struct InflightGuard<'a, K: Key, V: Send + Sync + 'static> {
    cache: &'a IdentityCache<K, V>,
    key: Option<K>,
    inflight: Arc<Inflight<V>>,
}

impl<K: Key, V: Send + Sync + 'static> InflightGuard<'_, K, V> {
    fn complete(mut self, res: Result<Arc<V>>) {
        if let Some(key) = self.key.take() {
            self.cache.complete(key, &self.inflight, res);
        }
    }
}

impl<K: Key, V: Send + Sync + 'static> Drop for InflightGuard<'_, K, V> {
    fn drop(&mut self) {
        if let Some(key) = self.key.take() {
            let err = Error::new(ErrorKind::External, "mirror constructor panicked").with_context("key", format!("{key:?}"));
            self.cache.complete(key, &self.inflight, Err(err));
        }
    }
}

impl<K, V> IdentityCache<K, V>
where
    K: Key,
    V: Send + Sync + 'static,
{
    /// Create an identity cache builder.
    pub fn builder() -> IdentityCacheBuilder<K, V> {
        IdentityCacheBuilder::new()
    }

    /// Name of the cache.
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Retention policy of the cache.
    pub fn retention(&self) -> Retention {
        self.retention
    }

    fn shard(&self, key: &K) -> &Mutex<Shard<K, V>> {
        let hash = self.hash_builder.hash_one(key);
        &self.shards[hash as usize % self.shards.len()]
    }

    /// Get the live mirror of `key`, constructing it with `ctor` on a miss.
    ///
    /// `ctor` runs at most once per miss, even if other threads ask for the same key meanwhile;
    /// they wait for it and receive the same instance, or a clone of its error. A failed
    /// construction caches nothing. A constructor that asks for its own key fails with
    /// [`ErrorKind::Reentrant`].
    pub fn lookup_or_create<F>(&self, key: &K, ctor: F) -> Result<Arc<V>>
    where
        F: FnOnce(&K) -> Result<V>,
    {
        let shard = self.shard(key);

        let (inflight, owned, reclaimed) = {
            let mut shard = shard.lock();
            let mut reclaimed = false;
            if let Some(held) = shard.table.get(key) {
                if let Some(value) = held.upgrade() {
                    self.metrics.identity_hit.increase(1);
                    tracing::trace!("[identity]: {} hit key {key:?}", self.name);
                    return Ok(value);
                }
                shard.table.remove(key);
                reclaimed = true;
            }
            self.metrics.identity_miss.increase(1);
            match shard.inflights.get(key) {
                Some(inflight) => {
                    if inflight.owner == std::thread::current().id() {
                        return Err(Error::new(ErrorKind::Reentrant, "mirror constructor re-entered its own key")
                            .with_context("cache", self.name)
                            .with_context("key", format!("{key:?}")));
                    }
                    (inflight.clone(), false, reclaimed)
                }
                None => {
                    let inflight = Arc::new(Inflight::new());
                    shard.inflights.insert(key.clone(), inflight.clone());
                    (inflight, true, reclaimed)
                }
            }
        };

        if reclaimed {
            self.reclaimed(key);
        }

        if !owned {
            tracing::trace!("[identity]: {} wait for inflight key {key:?}", self.name);
            return inflight.wait();
        }

        let guard = InflightGuard {
            cache: self,
            key: Some(key.clone()),
            inflight,
        };

        tracing::trace!("[identity]: {} construct key {key:?}", self.name);
        let res = ctor(key).map(Arc::new);
        if res.is_ok() {
            self.metrics.identity_construct.increase(1);
        }
        guard.complete(res.clone());
        res
    }

    fn complete(&self, key: K, inflight: &Arc<Inflight<V>>, res: Result<Arc<V>>) {
        let swept = {
            let mut shard = self.shard(&key).lock();
            shard.inflights.remove(&key);
            match &res {
                Ok(value) => {
                    shard.table.insert(key, Held::new(value, self.retention));
                    let shard = &mut *shard;
                    shard.sweep.run(&mut shard.table)
                }
                Err(_) => vec![],
            }
        };
        if let Ok(value) = &res {
            let out = self.soft.lock().push(value.clone());
            drop(out);
        }
        inflight.finish(res);
        swept.iter().for_each(|key| self.reclaimed(key));
    }

    fn reclaimed(&self, key: &K) {
        self.metrics.identity_reclaim.increase(1);
        tracing::trace!("[identity]: {} reclaimed key {key:?}", self.name);
        if let Some(listener) = self.listener.as_ref() {
            listener.on_leave(Event::Reclaim, key);
        }
    }

    /// Get the live mirror of `key` without constructing.
    pub fn get(&self, key: &K) -> Option<Arc<V>> {
        let res = self.shard(key).lock().table.get(key).and_then(|held| held.upgrade());
        match res {
            Some(_) => self.metrics.identity_hit.increase(1),
            None => self.metrics.identity_miss.increase(1),
        }
        res
    }

    /// Remove the entry of `key`. Returns the mirror if it was still live.
    ///
    /// A later lookup constructs a new instance.
    pub fn evict(&self, mutator: &Mutator, key: &K) -> Option<Arc<V>> {
        let held = self.shard(key).lock().table.remove(key)?;
        let value = held.upgrade();
        if let Some(value) = value.as_ref() {
            let out = self.soft.lock().remove(value);
            drop(out);
        }
        self.metrics.identity_evict.increase(1);
        tracing::debug!("[identity]: {} mutator {} evicted key {key:?}", self.name, mutator.id());
        if let Some(listener) = self.listener.as_ref() {
            listener.on_leave(Event::Evict, key);
        }
        value
    }

    /// Remove every entry.
    pub fn clear(&self, mutator: &Mutator) {
        let entries = self
            .shards
            .iter()
            .flat_map(|shard| shard.lock().table.drain().collect_vec())
            .collect_vec();
        let soft = self.soft.lock().take();
        drop(soft);
        // Mirrors are dropped outside the shard locks.
        let keys = entries.into_iter().map(|(key, _)| key).collect_vec();

        tracing::debug!(
            "[identity]: {} mutator {} cleared {} entries",
            self.name,
            mutator.id(),
            keys.len()
        );
        if let Some(listener) = self.listener.as_ref() {
            keys.iter().for_each(|key| listener.on_leave(Event::Clear, key));
        }
    }

    /// Snapshot of the live entries.
    pub fn live(&self) -> Vec<(K, Arc<V>)> {
        self.shards
            .iter()
            .flat_map(|shard| {
                shard
                    .lock()
                    .table
                    .iter()
                    .filter_map(|(key, held)| held.upgrade().map(|value| (key.clone(), value)))
                    .collect_vec()
            })
            .collect()
    }

    /// Remove entries whose mirror has been reclaimed. Returns the number removed.
    pub fn purge(&self) -> usize {
        let keys = self
            .shards
            .iter()
            .flat_map(|shard| {
                let mut shard = shard.lock();
                let dead = shard
                    .table
                    .iter()
                    .filter(|(_, held)| !held.is_live())
                    .map(|(key, _)| key.clone())
                    .collect_vec();
                dead.iter().for_each(|key| {
                    shard.table.remove(key);
                });
                dead
            })
            .collect_vec();
        keys.iter().for_each(|key| self.reclaimed(key));
        keys.len()
    }

    /// Demote every softly retained mirror to weak.
    pub fn relieve_pressure(&self) -> usize {
        let soft = self.soft.lock().take();
        tracing::debug!("[identity]: {} relieved {} soft references", self.name, soft.len());
        soft.len()
    }

    /// Number of entries, including reclaimed ones not swept or purged yet.
    pub fn len(&self) -> usize {
        self.shards.iter().map(|shard| shard.lock().table.len()).sum()
    }

    /// Returns `true` if the cache has no entry.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Thread-confined identity cache.
pub struct LocalIdentityCache<K, V> {
    name: &'static str,
    retention: Retention,
    table: RefCell<HashMap<K, Held<V>>>,
    sweep: RefCell<Sweep>,
    constructing: RefCell<HashSet<K>>,
    soft: RefCell<SoftRefs<V>>,
    listener: Option<Listener<K>>,
    metrics: Arc<Metrics>,
    _marker: PhantomData<*const ()>,
}

impl<K, V> Debug for LocalIdentityCache<K, V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalIdentityCache")
            .field("name", &self.name)
            .field("retention", &self.retention)
            .finish()
    }
}

struct Constructing<'a, K: Key> {
    set: &'a RefCell<HashSet<K>>,
    key: &'a K,
}

impl<K: Key> Drop for Constructing<'_, K> {
    fn drop(&mut self) {
        self.set.borrow_mut().remove(self.key);
    }
}

impl<K, V> LocalIdentityCache<K, V>
where
    K: Key,
    V: Send + Sync + 'static,
{
    /// Get the live mirror of `key`, constructing it with `ctor` on a miss.
    ///
    /// A constructor that asks for its own key fails with [`ErrorKind::Reentrant`].
    pub fn lookup_or_create<F>(&self, key: &K, ctor: F) -> Result<Arc<V>>
    where
        F: FnOnce(&K) -> Result<V>,
    {
        if let Some(value) = self.get(key) {
            return Ok(value);
        }

        if !self.constructing.borrow_mut().insert(key.clone()) {
            return Err(Error::new(ErrorKind::Reentrant, "mirror constructor re-entered its own key")
                .with_context("cache", self.name)
                .with_context("key", format!("{key:?}")));
        }
        let constructing = Constructing {
            set: &self.constructing,
            key,
        };

        tracing::trace!("[identity]: {} construct key {key:?}", self.name);
        let value = Arc::new(ctor(key)?);
        drop(constructing);

        self.metrics.identity_construct.increase(1);
        let swept = {
            let mut table = self.table.borrow_mut();
            table.insert(key.clone(), Held::new(&value, self.retention));
            self.sweep.borrow_mut().run(&mut table)
        };
        let out = self.soft.borrow_mut().push(value.clone());
        drop(out);
        swept.iter().for_each(|key| self.reclaimed(key));
        Ok(value)
    }

    /// Get the live mirror of `key` without constructing.
    pub fn get(&self, key: &K) -> Option<Arc<V>> {
        let upgraded = self.table.borrow().get(key).map(|held| held.upgrade());
        match upgraded {
            Some(Some(value)) => {
                self.metrics.identity_hit.increase(1);
                Some(value)
            }
            Some(None) => {
                self.table.borrow_mut().remove(key);
                self.reclaimed(key);
                self.metrics.identity_miss.increase(1);
                None
            }
            None => {
                self.metrics.identity_miss.increase(1);
                None
            }
        }
    }

    fn reclaimed(&self, key: &K) {
        self.metrics.identity_reclaim.increase(1);
        if let Some(listener) = self.listener.as_ref() {
            listener.on_leave(Event::Reclaim, key);
        }
    }

    /// Remove the entry of `key`. Returns the mirror if it was still live.
    pub fn evict(&self, mutator: &Mutator, key: &K) -> Option<Arc<V>> {
        let held = self.table.borrow_mut().remove(key)?;
        let value = held.upgrade();
        if let Some(value) = value.as_ref() {
            let out = self.soft.borrow_mut().remove(value);
            drop(out);
        }
        self.metrics.identity_evict.increase(1);
        tracing::debug!("[identity]: {} mutator {} evicted key {key:?}", self.name, mutator.id());
        if let Some(listener) = self.listener.as_ref() {
            listener.on_leave(Event::Evict, key);
        }
        value
    }

    /// Remove every entry.
    pub fn clear(&self, mutator: &Mutator) {
        let entries = self.table.borrow_mut().drain().collect_vec();
        let keys = entries.into_iter().map(|(key, _)| key).collect_vec();
        let soft = self.soft.borrow_mut().take();
        drop(soft);
        tracing::debug!(
            "[identity]: {} mutator {} cleared {} entries",
            self.name,
            mutator.id(),
            keys.len()
        );
        if let Some(listener) = self.listener.as_ref() {
            keys.iter().for_each(|key| listener.on_leave(Event::Clear, key));
        }
    }

    /// Snapshot of the live entries.
    pub fn live(&self) -> Vec<(K, Arc<V>)> {
        self.table
            .borrow()
            .iter()
            .filter_map(|(key, held)| held.upgrade().map(|value| (key.clone(), value)))
            .collect()
    }

    /// Remove entries whose mirror has been reclaimed. Returns the number removed.
    pub fn purge(&self) -> usize {
        let dead = {
            let mut table = self.table.borrow_mut();
            let dead = table
                .iter()
                .filter(|(_, held)| !held.is_live())
                .map(|(key, _)| key.clone())
                .collect_vec();
            dead.iter().for_each(|key| {
                table.remove(key);
            });
            dead
        };
        dead.iter().for_each(|key| self.reclaimed(key));
        dead.len()
    }

    /// Demote every softly retained mirror to weak.
    pub fn relieve_pressure(&self) -> usize {
        self.soft.borrow_mut().take().len()
    }

    /// Number of entries, including reclaimed ones not swept or purged yet.
    pub fn len(&self) -> usize {
        self.table.borrow().len()
    }

    /// Returns `true` if the cache has no entry.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use std::{
        sync::{
            atomic::{AtomicUsize, Ordering},
            Barrier,
        },
        time::Duration,
    };

    use catmirror_common::key::{CatalogKey, Oid};

    use super::*;

    fn is_send_sync_static<T: Send + Sync + 'static>() {}

    #[test]
    fn test_send_sync_static() {
        is_send_sync_static::<IdentityCache<CatalogKey, String>>();
    }

    #[derive(Default)]
    struct Recorder {
        events: Mutex<Vec<(Event, u64)>>,
    }

    impl EventListener for Recorder {
        type Key = u64;

        fn on_leave(&self, reason: Event, key: &u64) {
            self.events.lock().push((reason, *key));
        }
    }

    fn cache(retention: Retention) -> IdentityCache<u64, String> {
        IdentityCache::builder().with_retention(retention).with_shards(4).build()
    }

    #[test]
    fn test_identity_single_instance() {
        let cache = cache(Retention::Weak);
        let a = cache.lookup_or_create(&1, |k| Ok(format!("v{k}"))).unwrap();
        let b = cache.lookup_or_create(&1, |_| panic!("must hit")).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(cache.get(&1).as_deref().map(String::as_str), Some("v1"));
    }

    #[test]
    fn test_weak_reclaimed() {
        let recorder = Arc::new(Recorder::default());
        let cache: IdentityCache<u64, String> = IdentityCache::builder()
            .with_event_listener(recorder.clone())
            .build();

        let a = cache.lookup_or_create(&1, |_| Ok("a".to_string())).unwrap();
        drop(a);
        assert!(cache.get(&1).is_none());
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.purge(), 1);
        assert!(cache.is_empty());
        assert_eq!(recorder.events.lock().as_slice(), &[(Event::Reclaim, 1)]);

        // A new instance is constructed after reclaim.
        let b = cache.lookup_or_create(&1, |_| Ok("b".to_string())).unwrap();
        assert_eq!(b.as_str(), "b");
    }

    #[test]
    fn test_reclaimed_swept_on_insert() {
        let recorder = Arc::new(Recorder::default());
        let cache: IdentityCache<u64, String> = IdentityCache::builder()
            .with_shards(1)
            .with_event_listener(recorder.clone())
            .build();

        let kept = (0..8u64)
            .map(|k| cache.lookup_or_create(&k, |k| Ok(k.to_string())).unwrap())
            .collect_vec();
        for k in 8..10_000u64 {
            drop(cache.lookup_or_create(&k, |k| Ok(k.to_string())).unwrap());
        }

        assert!(cache.len() <= 2 * SWEEP_MIN, "len {}", cache.len());
        assert_eq!(cache.live().len(), kept.len());
        assert_eq!(recorder.events.lock().len() + cache.len(), 10_000);
        assert!(recorder.events.lock().iter().all(|(e, _)| *e == Event::Reclaim));
    }

    #[test]
    fn test_local_reclaimed_swept_on_insert() {
        let cache: LocalIdentityCache<u64, String> = IdentityCacheBuilder::new().build_local();
        let kept = cache.lookup_or_create(&0, |_| Ok("kept".to_string())).unwrap();
        for k in 1..1_000u64 {
            drop(cache.lookup_or_create(&k, |k| Ok(k.to_string())).unwrap());
        }
        assert!(cache.len() <= 2 * SWEEP_MIN, "len {}", cache.len());
        assert!(Arc::ptr_eq(&cache.get(&0).unwrap(), &kept));
    }

    #[test]
    fn test_strong_retained() {
        let cache = cache(Retention::Strong);
        drop(cache.lookup_or_create(&7, |_| Ok("x".to_string())).unwrap());
        assert_eq!(cache.get(&7).as_deref().map(String::as_str), Some("x"));
        assert_eq!(cache.purge(), 0);
    }

    #[test]
    fn test_soft_retention() {
        let cache = cache(Retention::Soft { capacity: 2 });
        for k in 0..3 {
            drop(cache.lookup_or_create(&k, |k| Ok(k.to_string())).unwrap());
        }
        // The oldest one was pushed out of the soft references.
        assert!(cache.get(&0).is_none());
        assert!(cache.get(&1).is_some());
        assert!(cache.get(&2).is_some());

        assert_eq!(cache.relieve_pressure(), 2);
        assert!(cache.get(&1).is_none());
        assert!(cache.get(&2).is_none());
    }

    #[test]
    fn test_failed_ctor_not_cached() {
        let cache = cache(Retention::Strong);
        let err = cache
            .lookup_or_create(&1, |k| Err(Error::not_found(k)))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
        assert!(cache.is_empty());

        let v = cache.lookup_or_create(&1, |_| Ok("ok".to_string())).unwrap();
        assert_eq!(v.as_str(), "ok");
    }

    #[test]
    fn test_reentrant_ctor() {
        let cache = cache(Retention::Weak);
        let err = cache
            .lookup_or_create(&1, |k| cache.lookup_or_create(k, |_| Ok("inner".to_string())).map(|v| (*v).clone()))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Reentrant);

        // Other keys may be looked up from inside a constructor.
        let v = cache
            .lookup_or_create(&2, |_| {
                let inner = cache.lookup_or_create(&3, |_| Ok("three".to_string()))?;
                Ok(format!("two+{inner}"))
            })
            .unwrap();
        assert_eq!(v.as_str(), "two+three");
    }

    #[test]
    fn test_evict_and_clear() {
        let mutator = Mutator::new();
        let recorder = Arc::new(Recorder::default());
        let cache: IdentityCache<u64, String> = IdentityCache::builder()
            .with_retention(Retention::Strong)
            .with_event_listener(recorder.clone())
            .build();

        let a = cache.lookup_or_create(&1, |_| Ok("a".to_string())).unwrap();
        cache.lookup_or_create(&2, |_| Ok("b".to_string())).unwrap();
        cache.lookup_or_create(&3, |_| Ok("c".to_string())).unwrap();

        let evicted = cache.evict(&mutator, &1).unwrap();
        assert!(Arc::ptr_eq(&a, &evicted));
        assert!(cache.evict(&mutator, &1).is_none());

        let b = cache.lookup_or_create(&1, |_| Ok("a2".to_string())).unwrap();
        assert!(!Arc::ptr_eq(&a, &b));

        assert_eq!(cache.live().len(), 3);
        cache.clear(&mutator);
        assert!(cache.is_empty());

        let events = recorder.events.lock();
        assert_eq!(events[0], (Event::Evict, 1));
        assert_eq!(events.iter().filter(|(e, _)| *e == Event::Clear).count(), 3);
    }

    #[test_log::test]
    fn test_concurrent_single_construction() {
        const THREADS: usize = 8;

        let cache: Arc<IdentityCache<CatalogKey, String>> = Arc::new(cache_of());
        let calls = Arc::new(AtomicUsize::new(0));
        let barrier = Arc::new(Barrier::new(THREADS));
        let key = CatalogKey::new(Oid(1259), Oid(42));

        let handles = (0..THREADS)
            .map(|_| {
                let cache = cache.clone();
                let calls = calls.clone();
                let barrier = barrier.clone();
                std::thread::spawn(move || {
                    barrier.wait();
                    cache
                        .lookup_or_create(&key, |key| {
                            calls.fetch_add(1, Ordering::SeqCst);
                            std::thread::sleep(Duration::from_millis(10));
                            Ok(key.to_string())
                        })
                        .unwrap()
                })
            })
            .collect_vec();

        let values = handles.into_iter().map(|h| h.join().unwrap()).collect_vec();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(values.iter().all(|v| Arc::ptr_eq(v, &values[0])));
    }

    fn cache_of() -> IdentityCache<CatalogKey, String> {
        IdentityCache::builder().with_name("test").build()
    }

    #[test]
    fn test_concurrent_failure_shared() {
        const THREADS: usize = 4;

        let cache = Arc::new(cache(Retention::Weak));
        let barrier = Arc::new(Barrier::new(THREADS));
        let calls = Arc::new(AtomicUsize::new(0));

        let handles = (0..THREADS)
            .map(|_| {
                let cache = cache.clone();
                let barrier = barrier.clone();
                let calls = calls.clone();
                std::thread::spawn(move || {
                    barrier.wait();
                    cache.lookup_or_create(&9, |k| {
                        calls.fetch_add(1, Ordering::SeqCst);
                        std::thread::sleep(Duration::from_millis(20));
                        Err(Error::not_found(k))
                    })
                })
            })
            .collect_vec();

        for handle in handles {
            assert_eq!(handle.join().unwrap().unwrap_err().kind(), ErrorKind::NotFound);
        }
        assert!(cache.is_empty());
        // Callers that arrive after a failure retry.
        assert!(calls.load(Ordering::SeqCst) >= 1);
    }

    #[test]
    fn test_panicking_ctor_releases_waiters() {
        let cache = Arc::new(cache(Retention::Weak));
        let res = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let _ = cache.lookup_or_create(&5, |_| -> Result<String> { panic!("boom") });
        }));
        assert!(res.is_err());
        let v = cache.lookup_or_create(&5, |_| Ok("ok".to_string())).unwrap();
        assert_eq!(v.as_str(), "ok");
    }

    #[test]
    fn test_local_cache() {
        let mutator = Mutator::new();
        let cache: LocalIdentityCache<u64, String> = IdentityCacheBuilder::new()
            .with_retention(Retention::Strong)
            .build_local();

        let a = cache.lookup_or_create(&1, |_| Ok("a".to_string())).unwrap();
        let b = cache.lookup_or_create(&1, |_| panic!("must hit")).unwrap();
        assert!(Arc::ptr_eq(&a, &b));

        let err = cache
            .lookup_or_create(&2, |k| cache.lookup_or_create(k, |_| Ok("x".to_string())).map(|v| (*v).clone()))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Reentrant);
        // The reentrancy marker is cleared after the failed construction.
        assert!(cache.lookup_or_create(&2, |_| Ok("two".to_string())).is_ok());

        assert!(cache.evict(&mutator, &1).is_some());
        assert_eq!(cache.len(), 1);
        cache.clear(&mutator);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_local_weak() {
        let cache: LocalIdentityCache<u64, String> = IdentityCacheBuilder::new().build_local();
        let a = cache.lookup_or_create(&1, |_| Ok("a".to_string())).unwrap();
        assert_eq!(cache.live().len(), 1);
        drop(a);
        assert!(cache.live().is_empty());
        assert_eq!(cache.purge(), 1);
    }

    #[test]
    fn test_retention_serde() {
        let r: Retention = serde_json::from_str(r#"{"soft":{"capacity":16}}"#).unwrap();
        assert_eq!(r, Retention::Soft { capacity: 16 });
        let r: Retention = serde_json::from_str(r#""weak""#).unwrap();
        assert_eq!(r, Retention::Weak);
    }
}
