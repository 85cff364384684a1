// Copyright 2026 Floe Authors
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

//! Metric collection contract and an in-memory implementation.
//!
//! The runtime reports through the three-method [`MetricCollector`]
//! interface; any sink implementing it can be plugged into a node. The
//! bundled [`MemoryCollector`] aggregates into a registry that can be
//! snapshotted for tests, logs or a scrape endpoint.

mod registry;
mod snapshot;

pub use registry::{MemoryCollector, MetricsRegistry};
pub use snapshot::{HistogramSummary, MetricsSnapshot};

/// Sink for runtime metrics.
///
/// Implementations must be cheap and non-blocking; they are called from hot
/// paths.
pub trait MetricCollector: Send + Sync {
    /// Sets a gauge to an absolute value.
    fn gauge(&self, name: &str, value: i64);

    /// Adds to a monotonic counter.
    fn counter(&self, name: &str, value: u64);

    /// Records one observation into a histogram.
    fn histogram(&self, name: &str, value: f64);
}
