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

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use crate::snapshot::{HistogramSummary, MetricsSnapshot};
use crate::MetricCollector;

#[derive(Default)]
struct HistogramState {
    count: u64,
    sum: f64,
    min: f64,
    max: f64,
}

impl HistogramState {
    fn observe(&mut self, value: f64) {
        if self.count == 0 {
            self.min = value;
            self.max = value;
        } else {
            self.min = self.min.min(value);
            self.max = self.max.max(value);
        }
        self.count += 1;
        self.sum += value;
    }
}

/// In-memory metric store keyed by logical metric name.
pub struct MetricsRegistry {
    started_at: Instant,
    gauges: Mutex<HashMap<String, i64>>,
    counters: Mutex<HashMap<String, u64>>,
    histograms: Mutex<HashMap<String, HistogramState>>,
}

impl Default for MetricsRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsRegistry {
    pub fn new() -> Self {
        MetricsRegistry {
            started_at: Instant::now(),
            gauges: Mutex::new(HashMap::new()),
            counters: Mutex::new(HashMap::new()),
            histograms: Mutex::new(HashMap::new()),
        }
    }

    pub fn set_gauge(&self, name: &str, value: i64) {
        self.gauges
            .lock()
            .expect("metrics lock poisoned")
            .insert(name.to_string(), value);
    }

    pub fn add_counter(&self, name: &str, value: u64) {
        if value == 0 {
            return;
        }
        *self
            .counters
            .lock()
            .expect("metrics lock poisoned")
            .entry(name.to_string())
            .or_insert(0) += value;
    }

    pub fn observe(&self, name: &str, value: f64) {
        self.histograms
            .lock()
            .expect("metrics lock poisoned")
            .entry(name.to_string())
            .or_default()
            .observe(value);
    }

    pub fn uptime_ms(&self) -> u64 {
        self.started_at.elapsed().as_millis() as u64
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let gauges = self.gauges.lock().expect("metrics lock poisoned").clone();
        let counters = self.counters.lock().expect("metrics lock poisoned").clone();
        let histograms = self
            .histograms
            .lock()
            .expect("metrics lock poisoned")
            .iter()
            .map(|(name, h)| {
                (
                    name.clone(),
                    HistogramSummary {
                        count: h.count,
                        sum: h.sum,
                        min: h.min,
                        max: h.max,
                    },
                )
            })
            .collect();

        MetricsSnapshot {
            uptime_ms: self.uptime_ms(),
            gauges,
            counters,
            histograms,
        }
    }
}

/// [`MetricCollector`] backed by a shared [`MetricsRegistry`].
#[derive(Clone, Default)]
pub struct MemoryCollector {
    registry: Arc<MetricsRegistry>,
}

impl MemoryCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_registry(registry: Arc<MetricsRegistry>) -> Self {
        MemoryCollector { registry }
    }

    pub fn registry(&self) -> &MetricsRegistry {
        &self.registry
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        self.registry.snapshot()
    }
}

impl MetricCollector for MemoryCollector {
    fn gauge(&self, name: &str, value: i64) {
        self.registry.set_gauge(name, value);
    }

    fn counter(&self, name: &str, value: u64) {
        self.registry.add_counter(name, value);
    }

    fn histogram(&self, name: &str, value: f64) {
        self.registry.observe(name, value);
    }
}
