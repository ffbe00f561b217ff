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

use std::{borrow::Cow, fmt::Debug};

use mixtrics::{
    metrics::{BoxedCounter, BoxedGauge, BoxedRegistry},
    registry::noop::NoopMetricsRegistry,
};

/// Metrics of one mirror cache instance.
///
/// All metrics are labeled with the instance name.
pub struct Metrics {
    /* identity cache */
    /// Lookups served by a live entry.
    pub identity_hit: BoxedCounter,
    /// Lookups that found no live entry.
    pub identity_miss: BoxedCounter,
    /// Successful constructions.
    pub identity_construct: BoxedCounter,
    /// Explicit evictions.
    pub identity_evict: BoxedCounter,
    /// Weak entries found reclaimed.
    pub identity_reclaim: BoxedCounter,

    /* lazy value slots */
    /// Slot reads served by a valid memo.
    pub slot_hit: BoxedCounter,
    /// Slot computations whose result was memoized.
    pub slot_compute: BoxedCounter,
    /// Slot computations that declined to memoize.
    pub slot_transient: BoxedCounter,

    /* indirection cells */
    /// Tripped cells.
    pub cell_trip: BoxedCounter,

    /* dual-state guards */
    /// Releases caused by managed-side unreachability.
    pub guard_release_unreachable: BoxedCounter,
    /// Releases caused by lifespan teardown.
    pub guard_release_lifespan: BoxedCounter,
    /// Guards currently registered to a live lifespan.
    pub guard_registered: BoxedGauge,

    /* dispatcher */
    /// Delivered invalidation signals.
    pub dispatch_signal: BoxedCounter,
}

impl Debug for Metrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Metrics").finish()
    }
}

impl Metrics {
    /// Create a new metric with the given name.
    pub fn new(name: impl Into<Cow<'static, str>>, registry: &BoxedRegistry) -> Self {
        let name = name.into();

        let catmirror_identity_op_total = registry.register_counter_vec(
            "catmirror_identity_op_total".into(),
            "catmirror identity cache operations".into(),
            &["name", "op"],
        );
        let identity_hit = catmirror_identity_op_total.counter(&[name.clone(), "hit".into()]);
        let identity_miss = catmirror_identity_op_total.counter(&[name.clone(), "miss".into()]);
        let identity_construct = catmirror_identity_op_total.counter(&[name.clone(), "construct".into()]);
        let identity_evict = catmirror_identity_op_total.counter(&[name.clone(), "evict".into()]);
        let identity_reclaim = catmirror_identity_op_total.counter(&[name.clone(), "reclaim".into()]);

        let catmirror_slot_op_total = registry.register_counter_vec(
            "catmirror_slot_op_total".into(),
            "catmirror lazy value slot operations".into(),
            &["name", "op"],
        );
        let slot_hit = catmirror_slot_op_total.counter(&[name.clone(), "hit".into()]);
        let slot_compute = catmirror_slot_op_total.counter(&[name.clone(), "compute".into()]);
        let slot_transient = catmirror_slot_op_total.counter(&[name.clone(), "transient".into()]);

        let catmirror_cell_trip_total = registry.register_counter_vec(
            "catmirror_cell_trip_total".into(),
            "catmirror tripped indirection cells".into(),
            &["name"],
        );
        let cell_trip = catmirror_cell_trip_total.counter(&[name.clone()]);

        let catmirror_guard_release_total = registry.register_counter_vec(
            "catmirror_guard_release_total".into(),
            "catmirror dual-state guard releases".into(),
            &["name", "cause"],
        );
        let guard_release_unreachable = catmirror_guard_release_total.counter(&[name.clone(), "unreachable".into()]);
        let guard_release_lifespan = catmirror_guard_release_total.counter(&[name.clone(), "lifespan".into()]);

        let catmirror_guard_registered = registry.register_gauge_vec(
            "catmirror_guard_registered".into(),
            "catmirror guards registered to live lifespans".into(),
            &["name"],
        );
        let guard_registered = catmirror_guard_registered.gauge(&[name.clone()]);

        let catmirror_dispatch_signal_total = registry.register_counter_vec(
            "catmirror_dispatch_signal_total".into(),
            "catmirror delivered invalidation signals".into(),
            &["name"],
        );
        let dispatch_signal = catmirror_dispatch_signal_total.counter(&[name.clone()]);

        Self {
            identity_hit,
            identity_miss,
            identity_construct,
            identity_evict,
            identity_reclaim,
            slot_hit,
            slot_compute,
            slot_transient,
            cell_trip,
            guard_release_unreachable,
            guard_release_lifespan,
            guard_registered,
            dispatch_signal,
        }
    }

    /// Build noop metrics.
    ///
    /// Normally only used in tests or as the default.
    pub fn noop() -> Self {
        Self::new("noop", &(Box::new(NoopMetricsRegistry) as BoxedRegistry))
    }
}
