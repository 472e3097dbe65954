// Copyright 2025 Google LLC
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     https://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! The shared object pool for mixed workloads.
//!
//! Workers that need an existing object take one at random, use it, and
//! put it back; deleted objects are never returned. Versioned workloads
//! store several versions per key and take a uniformly random one.

use rand::Rng;
use rand::rngs::StdRng;
use std::collections::HashMap;
use std::sync::Mutex;

/// One pooled object.
#[derive(Clone, Debug, PartialEq)]
pub struct PoolObject {
    pub key: String,
    pub size: i64,
    pub version_id: Option<String>,
}

#[derive(Debug)]
struct Inner {
    keys: Vec<String>,
    versions: HashMap<String, Vec<PoolObject>>,
    count: usize,
    rng: StdRng,
}

/// A mutex-guarded map of available objects, keyed by object name.
#[derive(Debug)]
pub struct ObjectPool {
    inner: Mutex<Inner>,
}

impl ObjectPool {
    pub fn new(seed: u64) -> Self {
        Self {
            inner: Mutex::new(Inner {
                keys: Vec::new(),
                versions: HashMap::new(),
                count: 0,
                rng: rand::SeedableRng::seed_from_u64(seed),
            }),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().expect("object pool lock is poisoned")
    }

    /// Adds an object, or another version of an existing key.
    pub fn insert(&self, obj: PoolObject) {
        let mut inner = self.lock();
        let slot = inner.versions.entry(obj.key.clone()).or_default();
        let fresh_key = slot.is_empty();
        slot.push(obj.clone());
        if fresh_key {
            inner.keys.push(obj.key);
        }
        inner.count += 1;
    }

    /// Returns a previously taken object to the pool.
    pub fn put_back(&self, obj: PoolObject) {
        self.insert(obj);
    }

    /// Takes a random object out of the pool.
    ///
    /// The key is chosen uniformly among available keys, then a version
    /// uniformly among that key's versions.
    pub fn take(&self) -> Option<PoolObject> {
        let mut guard = self.lock();
        let Inner {
            keys,
            versions,
            count,
            rng,
        } = &mut *guard;
        if keys.is_empty() {
            return None;
        }
        let ki = rng.random_range(0..keys.len());
        let key = keys[ki].clone();
        let slot = versions
            .get_mut(&key)
            .expect("pool key without a version list");
        let vi = rng.random_range(0..slot.len());
        let obj = slot.swap_remove(vi);
        if slot.is_empty() {
            versions.remove(&key);
            keys.swap_remove(ki);
        }
        *count -= 1;
        Some(obj)
    }

    /// Like [take][Self::take], but an empty pool is a fatal invariant
    /// breach: a pre-balanced operation distribution must never drain it.
    pub fn take_expect(&self) -> PoolObject {
        self.take()
            .expect("shared object pool underflow: operation weights must keep puts ahead of deletes")
    }

    /// Takes up to `n` random objects.
    pub fn take_batch(&self, n: usize) -> Vec<PoolObject> {
        (0..n).map_while(|_| self.take()).collect()
    }

    /// The number of available objects, counting every version.
    pub fn len(&self) -> usize {
        self.lock().count
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn obj(key: &str, version: Option<&str>) -> PoolObject {
        PoolObject {
            key: key.to_string(),
            size: 1024,
            version_id: version.map(String::from),
        }
    }

    #[test]
    fn take_and_put_back_balance() {
        let pool = ObjectPool::new(1);
        for i in 0..10 {
            pool.insert(obj(&format!("k{i}"), None));
        }
        assert_eq!(pool.len(), 10);
        let taken = pool.take().unwrap();
        assert_eq!(pool.len(), 9);
        pool.put_back(taken);
        assert_eq!(pool.len(), 10);
    }

    #[test]
    fn deleted_objects_drain_the_pool() {
        let pool = ObjectPool::new(2);
        for i in 0..5 {
            pool.insert(obj(&format!("k{i}"), None));
        }
        let batch = pool.take_batch(3);
        assert_eq!(batch.len(), 3);
        assert_eq!(pool.len(), 2);
        // Asking for more than remains yields what there is.
        let rest = pool.take_batch(10);
        assert_eq!(rest.len(), 2);
        assert!(pool.take().is_none());
    }

    #[test]
    fn versions_share_a_key() {
        let pool = ObjectPool::new(3);
        pool.insert(obj("k", Some("v1")));
        pool.insert(obj("k", Some("v2")));
        pool.insert(obj("k", Some("v3")));
        assert_eq!(pool.len(), 3);
        let mut seen = Vec::new();
        while let Some(o) = pool.take() {
            assert_eq!(o.key, "k");
            seen.push(o.version_id.unwrap());
        }
        seen.sort();
        assert_eq!(seen, vec!["v1", "v2", "v3"]);
    }

    #[test]
    #[should_panic(expected = "shared object pool underflow")]
    fn underflow_panics() {
        let pool = ObjectPool::new(4);
        let _ = pool.take_expect();
    }
}
