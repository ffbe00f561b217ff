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

pub use crate::{
    catalog::{
        Attribute, Backend, Catalog, CatalogBuilder, CatalogClass, CatalogConfig, Change, Column, ConfigError,
        Descriptor, Dispatched, Encoding, EncodingInfo, Language, LifespanEvent, Mirror, Namespace, NativeWindow,
        Relation, Routine, RowLayout, Session, Signal, Type,
    },
    common::{
        error::{Error, ErrorKind, Result},
        event::{Event, EventListener},
        key::{Address, CatalogKey, Oid},
        metrics::Metrics,
        mutator::Mutator,
    },
    memory::{
        Access, Affinity, Cell, Computed, DualState, Flight, Gate, IdentityCache, IdentityCacheBuilder, Lifespan,
        LifespanKind, MirrorState, ReleaseCause, ReleaseQueue, Retention, Slot, SlotHost, Slots, TripBatch,
    },
};
