// Copyright 2024 Quill Data Authors
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

//! Per-operator counters driving EXPLAIN ANALYZE.
//!
//! One struct per subject, plain atomics rather than a registry-backed
//! `prometheus` metric, since there is no HTTP/RPC surface to scrape from
//! here. The shape mirrors a `prometheus` `IntCounter` snapshot so a
//! scrape endpoint can be bolted on later without touching call sites.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

#[derive(Debug, Default)]
pub struct Sensors {
    pub records_in: AtomicU64,
    pub bytes_in: AtomicU64,
    pub calls: AtomicU64,
    pub records_out: AtomicU64,
    pub bytes_out: AtomicU64,
    pub elapsed_nanos: AtomicU64,
}

/// A snapshot suitable for rendering in EXPLAIN ANALYZE output.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SensorSnapshot {
    pub records_in: u64,
    pub bytes_in: u64,
    pub calls: u64,
    pub records_out: u64,
    pub bytes_out: u64,
    pub elapsed_nanos: u64,
}

impl Sensors {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_input(&self, records: u64, bytes: u64) {
        self.records_in.fetch_add(records, Ordering::Relaxed);
        self.bytes_in.fetch_add(bytes, Ordering::Relaxed);
        self.calls.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_output(&self, records: u64, bytes: u64) {
        self.records_out.fetch_add(records, Ordering::Relaxed);
        self.bytes_out.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn record_elapsed(&self, since: Instant) {
        self.elapsed_nanos
            .fetch_add(since.elapsed().as_nanos() as u64, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> SensorSnapshot {
        SensorSnapshot {
            records_in: self.records_in.load(Ordering::Relaxed),
            bytes_in: self.bytes_in.load(Ordering::Relaxed),
            calls: self.calls.load(Ordering::Relaxed),
            records_out: self.records_out.load(Ordering::Relaxed),
            bytes_out: self.bytes_out.load(Ordering::Relaxed),
            elapsed_nanos: self.elapsed_nanos.load(Ordering::Relaxed),
        }
    }
}
