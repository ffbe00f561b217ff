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
    fmt::Debug,
    sync::{Arc, Weak},
};

use catmirror_common::{
    error::{Error, ErrorKind, Result},
    key::{Address, CatalogKey, Oid},
    metrics::Metrics,
    mutator::Mutator,
    strict_assert,
};
use catmirror_memory::{IdentityCache, ReleaseQueue, Retention, SlotHost};
use hashbrown::{HashMap, HashSet};
use itertools::Itertools;
use mixtrics::{metrics::BoxedRegistry, registry::noop::NoopMetricsRegistry};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::{
    backend::Backend,
    class::{CatalogClass, ATTRIBUTE, LANGUAGE, NAMESPACE, NO_TYPMOD, RECORD_TYPE, RELATION, ROUTINE, TYPE},
    object::{
        attribute::Attribute, descriptor::Descriptor, encoding::Encoding, language::Language, namespace::Namespace,
        relation::Relation, routine::Routine, ty::Type,
    },
    session::Session,
};

/// Configuration of a catalog.
///
/// Loadable from any serde format. Missing fields take their default.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CatalogConfig {
    /// Name of the catalog, used as metrics label.
    pub name: String,
    /// Shard count of every identity cache.
    pub shards: usize,
    /// Retention of namespaces.
    pub namespaces: Retention,
    /// Retention of relations.
    pub relations: Retention,
    /// Retention of attributes.
    pub attributes: Retention,
    /// Retention of types.
    pub types: Retention,
    /// Retention of routines.
    pub routines: Retention,
    /// Retention of procedural languages.
    pub languages: Retention,
    /// Retention of native tuple descriptors.
    pub descriptors: Retention,
    /// Retention of character encodings.
    pub encodings: Retention,
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            name: "catmirror".to_string(),
            shards: 8,
            namespaces: Retention::Weak,
            relations: Retention::Weak,
            attributes: Retention::Weak,
            types: Retention::Weak,
            routines: Retention::Weak,
            languages: Retention::Strong,
            descriptors: Retention::Weak,
            encodings: Retention::Soft { capacity: 16 },
        }
    }
}

/// Invalid catalog configuration.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    /// Identity caches need at least one shard.
    #[error("shard count must be positive")]
    ZeroShards,
    /// Soft retention without capacity retains nothing.
    #[error("soft retention of {kind} needs a positive capacity")]
    ZeroSoftCapacity {
        /// The misconfigured kind.
        kind: &'static str,
    },
}

impl From<ConfigError> for Error {
    fn from(e: ConfigError) -> Self {
        Error::new(ErrorKind::Config, e.to_string()).with_source(e)
    }
}

impl CatalogConfig {
    /// Check the configuration.
    pub fn validate(&self) -> std::result::Result<(), ConfigError> {
        if self.shards == 0 {
            return Err(ConfigError::ZeroShards);
        }
        [
            ("namespaces", self.namespaces),
            ("relations", self.relations),
            ("attributes", self.attributes),
            ("types", self.types),
            ("routines", self.routines),
            ("languages", self.languages),
            ("descriptors", self.descriptors),
            ("encodings", self.encodings),
        ]
        .into_iter()
        .try_for_each(|(kind, retention)| match retention {
            Retention::Soft { capacity: 0 } => Err(ConfigError::ZeroSoftCapacity { kind }),
            _ => Ok(()),
        })
    }
}

/// Builder of [`Catalog`].
pub struct CatalogBuilder {
    backend: Arc<dyn Backend>,
    config: CatalogConfig,
    registry: BoxedRegistry,
}

impl Debug for CatalogBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CatalogBuilder").field("config", &self.config).finish()
    }
}

impl CatalogBuilder {
    /// Create a catalog builder over `backend` with the default configuration.
    pub fn new(backend: Arc<dyn Backend>) -> Self {
        Self {
            backend,
            config: CatalogConfig::default(),
            registry: Box::new(NoopMetricsRegistry),
        }
    }

    /// Replace the whole configuration.
    pub fn with_config(mut self, config: CatalogConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the name of the catalog.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.config.name = name.into();
        self
    }

    /// Set the shard count of every identity cache.
    pub fn with_shards(mut self, shards: usize) -> Self {
        self.config.shards = shards;
        self
    }

    /// Set the metrics registry.
    pub fn with_metrics_registry(mut self, registry: BoxedRegistry) -> Self {
        self.registry = registry;
        self
    }

    /// Validate the configuration and build the catalog.
    pub fn build(self) -> Result<Catalog> {
        self.config.validate()?;
        let config = self.config;
        let metrics = Arc::new(Metrics::new(config.name.clone(), &self.registry));

        macro_rules! cache {
            ($name:literal, $retention:expr) => {
                IdentityCache::builder()
                    .with_name($name)
                    .with_shards(config.shards)
                    .with_retention($retention)
                    .with_metrics(metrics.clone())
                    .build()
            };
        }

        let inner = CatalogInner {
            backend: self.backend,
            namespaces: cache!("namespace", config.namespaces),
            relations: cache!("relation", config.relations),
            attributes: cache!("attribute", config.attributes),
            types: cache!("type", config.types),
            routines: cache!("routine", config.routines),
            languages: cache!("language", config.languages),
            descriptors: cache!("descriptor", config.descriptors),
            encodings: cache!("encoding", config.encodings),
            typmods: Mutex::new(HashMap::new()),
            releases: ReleaseQueue::new(),
            metrics,
            config,
        };
        tracing::debug!("[catalog]: built catalog {}", inner.config.name);
        Ok(Catalog { inner: Arc::new(inner) })
    }
}

pub(crate) struct CatalogInner {
    config: CatalogConfig,
    backend: Arc<dyn Backend>,
    namespaces: IdentityCache<CatalogKey, Namespace>,
    relations: IdentityCache<CatalogKey, Relation>,
    attributes: IdentityCache<CatalogKey, Attribute>,
    types: IdentityCache<CatalogKey, Type>,
    routines: IdentityCache<CatalogKey, Routine>,
    languages: IdentityCache<CatalogKey, Language>,
    descriptors: IdentityCache<Address, Descriptor>,
    encodings: IdentityCache<i32, Encoding>,
    /// Type modifiers constructed per type oid, besides the unmodified type.
    typmods: Mutex<HashMap<Oid, HashSet<i32>>>,
    releases: ReleaseQueue,
    metrics: Arc<Metrics>,
}

/// The catalog mirror.
///
/// Lookups construct mirrors lazily and are safe from any thread; nothing is read from the
/// backend until a mirror's values are first read on the mutator. Cheap to clone.
#[derive(Clone)]
pub struct Catalog {
    inner: Arc<CatalogInner>,
}

impl Debug for Catalog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Catalog").field("name", &self.inner.config.name).finish()
    }
}

fn check(oid: Oid, class: Oid) -> Result<()> {
    if oid.is_valid() {
        Ok(())
    } else {
        Err(Error::not_found(CatalogKey::new(class, oid)))
    }
}

impl Catalog {
    /// Create a catalog builder over `backend`.
    pub fn builder(backend: Arc<dyn Backend>) -> CatalogBuilder {
        CatalogBuilder::new(backend)
    }

    pub(crate) fn downgrade(&self) -> Weak<CatalogInner> {
        Arc::downgrade(&self.inner)
    }

    pub(crate) fn upgrade(weak: &Weak<CatalogInner>) -> Result<Catalog> {
        weak.upgrade()
            .map(|inner| Catalog { inner })
            .ok_or_else(|| Error::new(ErrorKind::Closed, "catalog has been dropped"))
    }

    /// The configuration.
    pub fn config(&self) -> &CatalogConfig {
        &self.inner.config
    }

    /// The backend.
    pub fn backend(&self) -> &Arc<dyn Backend> {
        &self.inner.backend
    }

    /// The metrics.
    pub fn metrics(&self) -> &Arc<Metrics> {
        &self.inner.metrics
    }

    pub(crate) fn release_queue(&self) -> &ReleaseQueue {
        &self.inner.releases
    }

    /// Designate `mutator` as the only mutator of the catalog.
    ///
    /// Fails with [`ErrorKind::WrongContext`] while another mutator is bound.
    pub(crate) fn bind_mutator(&self, mutator: &Mutator) -> Result<()> {
        if self.inner.releases.bind(mutator) {
            tracing::debug!("[catalog]: {} bound to mutator {}", self.inner.config.name, mutator.id());
            return Ok(());
        }
        Err(Error::new(ErrorKind::WrongContext, "catalog is bound to another mutator")
            .with_context("catalog", &self.inner.config.name)
            .with_context("mutator", mutator.id())
            .with_context("thread", format!("{:?}", mutator.thread())))
    }

    pub(crate) fn unbind_mutator(&self, mutator: &Mutator) {
        if self.inner.releases.unbind(mutator) {
            tracing::debug!("[catalog]: {} unbound from mutator {}", self.inner.config.name, mutator.id());
        }
    }

    /// Returns `true` if `mutator` is the bound mutator of the catalog.
    pub(crate) fn is_mutator(&self, mutator: &Mutator) -> bool {
        self.inner.releases.owner() == Some(mutator.id())
    }

    /// The namespace `oid`.
    pub fn namespace(&self, oid: Oid) -> Result<Arc<Namespace>> {
        check(oid, NAMESPACE)?;
        self.inner
            .namespaces
            .lookup_or_create(&CatalogKey::new(NAMESPACE, oid), |key| Ok(Namespace::new(self, *key)))
    }

    /// The relation `oid`.
    pub fn relation(&self, oid: Oid) -> Result<Arc<Relation>> {
        check(oid, RELATION)?;
        self.inner
            .relations
            .lookup_or_create(&CatalogKey::new(RELATION, oid), |key| Ok(Relation::new(self, *key)))
    }

    /// Attribute `attnum` of relation `relid`.
    pub fn attribute(&self, relid: Oid, attnum: i16) -> Result<Arc<Attribute>> {
        let relation = self.relation(relid)?;
        let key = CatalogKey::with_sub(ATTRIBUTE, relid, attnum.into());
        self.inner.attributes.lookup_or_create(&key, |key| {
            relation.track_attribute(attnum);
            Ok(Attribute::new(self, *key, relation.clone()))
        })
    }

    /// The type `oid` without type modifier.
    pub fn ty(&self, oid: Oid) -> Result<Arc<Type>> {
        self.type_with_typmod(oid, NO_TYPMOD)
    }

    /// The type `oid` with type modifier `typmod`.
    pub fn type_with_typmod(&self, oid: Oid, typmod: i32) -> Result<Arc<Type>> {
        check(oid, TYPE)?;
        self.inner
            .types
            .lookup_or_create(&CatalogKey::with_sub(TYPE, oid, typmod), |key| {
                // Indexed before the mirror is published, so dispatch never misses it.
                if typmod != NO_TYPMOD {
                    self.inner.typmods.lock().entry(oid).or_default().insert(typmod);
                }
                Ok(Type::new(self, *key))
            })
    }

    /// Live mirrors of type `oid`, under every type modifier.
    pub(crate) fn types_of(&self, oid: Oid) -> Vec<Arc<Type>> {
        let typmods = self
            .inner
            .typmods
            .lock()
            .get(&oid)
            .map(|typmods| typmods.iter().copied().collect_vec())
            .unwrap_or_default();
        std::iter::once(NO_TYPMOD)
            .chain(typmods)
            .filter_map(|typmod| self.inner.types.get(&CatalogKey::with_sub(TYPE, oid, typmod)))
            .collect()
    }

    /// The record type interned under `typmod`.
    pub fn record_type(&self, typmod: i32) -> Result<Arc<Type>> {
        self.type_with_typmod(RECORD_TYPE, typmod)
    }

    /// The routine `oid`.
    pub fn routine(&self, oid: Oid) -> Result<Arc<Routine>> {
        check(oid, ROUTINE)?;
        self.inner
            .routines
            .lookup_or_create(&CatalogKey::new(ROUTINE, oid), |key| Ok(Routine::new(self, *key)))
    }

    /// The procedural language `oid`.
    pub fn language(&self, oid: Oid) -> Result<Arc<Language>> {
        check(oid, LANGUAGE)?;
        self.inner
            .languages
            .lookup_or_create(&CatalogKey::new(LANGUAGE, oid), |key| Ok(Language::new(self, *key)))
    }

    /// The character encoding `id`.
    pub fn encoding(&self, id: i32) -> Result<Arc<Encoding>> {
        self.inner
            .encodings
            .lookup_or_create(&id, |id| Ok(Encoding::new(self, *id)))
    }

    /// The mirror of the native tuple descriptor at `address`, on which the caller holds a
    /// reference.
    ///
    /// A new mirror adopts the reference and drops it when released. If a mirror already exists,
    /// the caller's reference is dropped right away.
    pub(crate) fn native_descriptor(&self, session: &Session, address: Address) -> Result<Arc<Descriptor>> {
        let mut adopted = false;
        let descriptor = self.inner.descriptors.lookup_or_create(&address, |address| {
            adopted = true;
            Descriptor::native(self, session, *address)
        })?;
        if !adopted {
            self.inner.backend.release_descriptor(address);
        }
        Ok(descriptor)
    }

    pub(crate) fn namespaces(&self) -> &IdentityCache<CatalogKey, Namespace> {
        &self.inner.namespaces
    }

    pub(crate) fn relations(&self) -> &IdentityCache<CatalogKey, Relation> {
        &self.inner.relations
    }

    pub(crate) fn attributes(&self) -> &IdentityCache<CatalogKey, Attribute> {
        &self.inner.attributes
    }

    pub(crate) fn types(&self) -> &IdentityCache<CatalogKey, Type> {
        &self.inner.types
    }

    pub(crate) fn routines(&self) -> &IdentityCache<CatalogKey, Routine> {
        &self.inner.routines
    }

    pub(crate) fn languages(&self) -> &IdentityCache<CatalogKey, Language> {
        &self.inner.languages
    }

    pub(crate) fn descriptors(&self) -> &IdentityCache<Address, Descriptor> {
        &self.inner.descriptors
    }

    /// Evict the mirror of `key` from the cache of `class` and mark it evicted.
    ///
    /// Returns `true` if an entry was removed.
    pub(crate) fn evict(&self, mutator: &Mutator, class: CatalogClass, key: &CatalogKey) -> bool {
        fn evicted<V: SlotHost>(mutator: &Mutator, value: Option<Arc<V>>) -> bool {
            value.inspect(|value| value.slots().mark_evicted(mutator)).is_some()
        }

        strict_assert!(self.is_mutator(mutator));

        match class {
            CatalogClass::Namespace => evicted(mutator, self.inner.namespaces.evict(mutator, key)),
            CatalogClass::Relation => evicted(mutator, self.inner.relations.evict(mutator, key)),
            CatalogClass::Attribute => evicted(mutator, self.inner.attributes.evict(mutator, key)),
            CatalogClass::Type => {
                if key.sub != NO_TYPMOD {
                    let mut typmods = self.inner.typmods.lock();
                    if let Some(set) = typmods.get_mut(&key.object) {
                        set.remove(&key.sub);
                        if set.is_empty() {
                            typmods.remove(&key.object);
                        }
                    }
                }
                evicted(mutator, self.inner.types.evict(mutator, key))
            }
            CatalogClass::Routine => evicted(mutator, self.inner.routines.evict(mutator, key)),
            CatalogClass::Language => evicted(mutator, self.inner.languages.evict(mutator, key)),
        }
    }

    /// Remove identity entries of reclaimed mirrors. Returns the number removed.
    pub fn purge(&self) -> usize {
        let inner = &self.inner;
        inner.namespaces.purge()
            + inner.relations.purge()
            + inner.attributes.purge()
            + inner.types.purge()
            + inner.routines.purge()
            + inner.languages.purge()
            + inner.descriptors.purge()
            + inner.encodings.purge()
    }

    /// Demote softly retained mirrors to weak, e.g. under memory pressure.
    pub fn relieve_pressure(&self) -> usize {
        let inner = &self.inner;
        inner.namespaces.relieve_pressure()
            + inner.relations.relieve_pressure()
            + inner.attributes.relieve_pressure()
            + inner.types.relieve_pressure()
            + inner.routines.relieve_pressure()
            + inner.languages.relieve_pressure()
            + inner.descriptors.relieve_pressure()
            + inner.encodings.relieve_pressure()
    }
}
