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

//! Statistics aggregation for EXPLAIN ANALYZE: "per-query statistics
//! are a process-wide map keyed by query id with bounded size; old
//! entries are evicted FIFO." Per-call counters (`Sensors`, `Statistics`)
//! already live on `ExecutionContext`; this
//! registry is the optional, still-bounded place an embedding
//! application retains a handful of just-finished queries' `Statistics`
//! for later inspection, without reviving a process-wide mutable
//! singleton the engine itself depends on.

use std::collections::VecDeque;
use std::sync::Arc;

use hashbrown::HashMap;
use parking_lot::Mutex;
use quillsql_common::config::QueryId;
use quillsql_common::Statistics;

struct Inner {
    entries: HashMap<QueryId, Arc<Mutex<Statistics>>>,
    order: VecDeque<QueryId>,
    capacity: usize,
}

/// A bounded, FIFO-evicting map of `QueryId -> Statistics`. Call
/// [`StatisticsRegistry::record`] once a query's `ExecutionContext` is
/// done being written to, typically right after the engine reaches the
/// exit node's EOS.
pub struct StatisticsRegistry {
    inner: Mutex<Inner>,
}

impl StatisticsRegistry {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(Inner { entries: HashMap::new(), order: VecDeque::new(), capacity: capacity.max(1) }),
        }
    }

    pub fn record(&self, qid: QueryId, statistics: Arc<Mutex<Statistics>>) {
        let mut inner = self.inner.lock();
        if !inner.entries.contains_key(&qid) {
            inner.order.push_back(qid.clone());
        }
        inner.entries.insert(qid, statistics);
        while inner.entries.len() > inner.capacity {
            if let Some(oldest) = inner.order.pop_front() {
                inner.entries.remove(&oldest);
            } else {
                break;
            }
        }
    }

    pub fn get(&self, qid: &QueryId) -> Option<Arc<Mutex<Statistics>>> {
        self.inner.lock().entries.get(qid).cloned()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn evicts_the_oldest_query_once_capacity_is_exceeded() {
        let registry = StatisticsRegistry::new(2);
        registry.record(QueryId("q1".into()), Arc::new(Mutex::new(Statistics::new())));
        registry.record(QueryId("q2".into()), Arc::new(Mutex::new(Statistics::new())));
        registry.record(QueryId("q3".into()), Arc::new(Mutex::new(Statistics::new())));
        assert_eq!(registry.len(), 2);
        assert!(registry.get(&QueryId("q1".into())).is_none());
        assert!(registry.get(&QueryId("q3".into())).is_some());
    }

    #[test]
    fn re_recording_an_existing_query_does_not_change_eviction_order() {
        let registry = StatisticsRegistry::new(2);
        registry.record(QueryId("q1".into()), Arc::new(Mutex::new(Statistics::new())));
        registry.record(QueryId("q2".into()), Arc::new(Mutex::new(Statistics::new())));
        registry.record(QueryId("q1".into()), Arc::new(Mutex::new(Statistics::new())));
        registry.record(QueryId("q3".into()), Arc::new(Mutex::new(Statistics::new())));
        assert!(registry.get(&QueryId("q1".into())).is_none());
        assert!(registry.get(&QueryId("q2".into())).is_some());
        assert!(registry.get(&QueryId("q3".into())).is_some());
    }
}
