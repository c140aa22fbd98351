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

//! The cache/KV store contract: operators request cached blobs by
//! key against a `KeyValueStore`. Concrete backends (file, object store,
//! Redis and friends) are external collaborators — this crate carries
//! the trait, an in-process `K=2` LRU-K implementation, a no-op
//! implementation for tests, and a circuit breaker any backend can wrap
//! itself in.

use std::collections::BinaryHeap;
use std::time::Instant;

use hashbrown::HashMap;
use parking_lot::Mutex;

/// `get`/`set`/`contains`/`delete`/`touch` over opaque byte blobs keyed
/// by string.
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Option<Vec<u8>>;
    fn set(&self, key: &str, value: Vec<u8>);
    fn contains(&self, keys: &[String]) -> Vec<bool>;
    fn delete(&self, key: &str);
    fn touch(&self, key: &str);
}

/// Always misses on read, drops every write. Used where a cache is
/// wired in for interface symmetry but caching is disabled.
pub struct NullStore;

impl KeyValueStore for NullStore {
    fn get(&self, _key: &str) -> Option<Vec<u8>> {
        None
    }

    fn set(&self, _key: &str, _value: Vec<u8>) {}

    fn contains(&self, keys: &[String]) -> Vec<bool> {
        vec![false; keys.len()]
    }

    fn delete(&self, _key: &str) {}

    fn touch(&self, _key: &str) {}
}

#[derive(Clone)]
struct Entry {
    value: Vec<u8>,
    accesses: [Instant; 2],
}

/// Orders entries by their second-to-last access time, oldest first, so
/// the binary heap's peek is always the eviction candidate — the "K=2"
/// distinction from plain LRU is precisely that an entry touched only
/// once still sorts by its single access time, but a second touch moves
/// it to the back of the heap by that touch's time rather than its
/// first, giving recently-reaccessed entries real priority over a
/// scan that brushes past every key exactly once.
#[derive(Clone, Copy, PartialEq, Eq)]
struct HeapKey {
    second_to_last_access: Instant,
}

impl Ord for HeapKey {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        other.second_to_last_access.cmp(&self.second_to_last_access)
    }
}

impl PartialOrd for HeapKey {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

struct LruKInner {
    entries: HashMap<String, Entry>,
    heap: BinaryHeap<(HeapKey, String)>,
    capacity: usize,
}

impl LruKInner {
    fn record_access(&mut self, key: &str, now: Instant) {
        let entry = self.entries.get_mut(key).expect("record_access called for a missing key");
        entry.accesses = [entry.accesses[1], now];
        self.heap.push((HeapKey { second_to_last_access: entry.accesses[0] }, key.to_owned()));
    }

    fn evict_one(&mut self) {
        while let Some((heap_key, key)) = self.heap.pop() {
            let Some(entry) = self.entries.get(&key) else { continue };
            if entry.accesses[0] != heap_key.second_to_last_access {
                continue;
            }
            self.entries.remove(&key);
            return;
        }
    }
}

/// In-process cache keyed by access recency with `K=2` history per entry:
/// a min-heap of second-to-last-access time plus a hash map of live
/// entries.
pub struct LruKStore {
    inner: Mutex<LruKInner>,
}

impl LruKStore {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(LruKInner { entries: HashMap::new(), heap: BinaryHeap::new(), capacity: capacity.max(1) }),
        }
    }
}

impl KeyValueStore for LruKStore {
    fn get(&self, key: &str) -> Option<Vec<u8>> {
        let mut inner = self.inner.lock();
        let value = inner.entries.get(key).map(|e| e.value.clone())?;
        inner.record_access(key, Instant::now());
        Some(value)
    }

    fn set(&self, key: &str, value: Vec<u8>) {
        let mut inner = self.inner.lock();
        let now = Instant::now();
        if !inner.entries.contains_key(key) && inner.entries.len() >= inner.capacity {
            inner.evict_one();
        }
        inner.entries.insert(key.to_owned(), Entry { value, accesses: [now, now] });
        inner.heap.push((HeapKey { second_to_last_access: now }, key.to_owned()));
    }

    fn contains(&self, keys: &[String]) -> Vec<bool> {
        let inner = self.inner.lock();
        keys.iter().map(|k| inner.entries.contains_key(k)).collect()
    }

    fn delete(&self, key: &str) {
        self.inner.lock().entries.remove(key);
    }

    fn touch(&self, key: &str) {
        let mut inner = self.inner.lock();
        if inner.entries.contains_key(key) {
            inner.record_access(key, Instant::now());
        }
    }
}

/// Wraps any `KeyValueStore` with a circuit breaker: after
/// `max_consecutive_failures` failed calls in a row, subsequent calls
/// short-circuit (`None` for reads, a no-op for writes) without touching
/// the inner store, until one call succeeds again. Failures are counted
/// per instance, not globally, and the breaker resets on any subsequent
/// success.
pub struct CircuitBreakingStore<S> {
    inner: S,
    max_consecutive_failures: u32,
    consecutive_failures: std::sync::atomic::AtomicU32,
}

impl<S: KeyValueStore> CircuitBreakingStore<S> {
    pub fn new(inner: S, max_consecutive_failures: u32) -> Self {
        Self { inner, max_consecutive_failures, consecutive_failures: std::sync::atomic::AtomicU32::new(0) }
    }

    fn tripped(&self) -> bool {
        self.consecutive_failures.load(std::sync::atomic::Ordering::Relaxed) >= self.max_consecutive_failures
    }

    fn record<T>(&self, outcome: Option<T>) -> Option<T> {
        use std::sync::atomic::Ordering;
        if outcome.is_some() {
            self.consecutive_failures.store(0, Ordering::Relaxed);
        } else {
            self.consecutive_failures.fetch_add(1, Ordering::Relaxed);
        }
        outcome
    }
}

impl<S: KeyValueStore> KeyValueStore for CircuitBreakingStore<S> {
    fn get(&self, key: &str) -> Option<Vec<u8>> {
        if self.tripped() {
            return None;
        }
        self.record(self.inner.get(key))
    }

    fn set(&self, key: &str, value: Vec<u8>) {
        if self.tripped() {
            return;
        }
        self.inner.set(key, value);
    }

    fn contains(&self, keys: &[String]) -> Vec<bool> {
        if self.tripped() {
            return vec![false; keys.len()];
        }
        self.inner.contains(keys)
    }

    fn delete(&self, key: &str) {
        if self.tripped() {
            return;
        }
        self.inner.delete(key);
    }

    fn touch(&self, key: &str) {
        if self.tripped() {
            return;
        }
        self.inner.touch(key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lru_k_evicts_the_entry_with_the_oldest_second_to_last_access() {
        let store = LruKStore::new(2);
        store.set("a", vec![1]);
        std::thread::sleep(std::time::Duration::from_millis(2));
        store.set("b", vec![2]);
        std::thread::sleep(std::time::Duration::from_millis(2));
        // Touch "a" twice so its second-to-last access is now newer than "b"'s.
        store.get("a");
        std::thread::sleep(std::time::Duration::from_millis(2));
        store.get("a");
        store.set("c", vec![3]);
        assert!(store.get("a").is_some());
        assert!(store.get("b").is_none());
        assert!(store.get("c").is_some());
    }

    #[test]
    fn circuit_breaker_short_circuits_after_consecutive_failures() {
        let store = CircuitBreakingStore::new(NullStore, 3);
        for _ in 0..3 {
            assert!(store.get("missing").is_none());
        }
        assert!(store.tripped());
        store.set("k", vec![9]);
        assert!(store.get("k").is_none());
    }

    #[test]
    fn circuit_breaker_resets_on_success() {
        let store = CircuitBreakingStore::new(LruKStore::new(4), 2);
        assert!(store.get("missing").is_none());
        store.set("present", vec![1]);
        assert!(store.get("present").is_some());
        assert_eq!(store.consecutive_failures.load(std::sync::atomic::Ordering::Relaxed), 0);
    }
}
