// Copyright (c) 2022 Octavian Oncescu
// Copyright (c) 2022-2023 The Purplecoin Core developers
// Licensed under the Apache License, Version 2.0 see LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0 or the MIT license, see
// LICENSE-MIT or http://opensource.org/licenses/MIT

use crate::chain::backend::{
    DBInterface, DBInterfaceErr, DBPrefixIterator, IteratorDirection,
};
use parking_lot::RwLock;
use streaming_iterator::StreamingIterator;
use std::collections::HashMap;
use triomphe::Arc;
use xxhash_rust::xxh3::xxh3_64;

type Store = RwLock<HashMap<Vec<u8>, Vec<u8>>>;

/// In-memory key-value backend used on regtest and in tests. Sharded by key
/// hash so concurrent writers on different keys rarely contend.
#[derive(Debug, Clone)]
pub struct MemoryBackend {
    shards: Arc<Vec<Store>>,
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBackend {
    #[must_use]
    pub fn new() -> Self {
        let mut shards = Vec::new();

        for _ in 0..num_cpus::get() {
            shards.push(RwLock::new(HashMap::new()));
        }

        Self {
            shards: Arc::new(shards),
        }
    }

    fn shard_for(&self, k: &[u8]) -> &Store {
        let hashed_key = xxh3_64(k);
        &self.shards[(hashed_key % self.shards.len() as u64) as usize]
    }
}

impl DBInterface for MemoryBackend {
    fn get<K: AsRef<[u8]>, V: bincode::Decode>(
        &self,
        key: K,
    ) -> Result<Option<V>, DBInterfaceErr> {
        let guard = self.shard_for(key.as_ref()).read();
        match guard.get(key.as_ref()) {
            Some(bytes) => Ok(Some(crate::codec::decode(bytes)?)),
            None => Ok(None),
        }
    }

    fn put<K: AsRef<[u8]>, V: bincode::Encode>(&self, key: K, v: V) -> Result<(), DBInterfaceErr> {
        let bytes = crate::codec::encode_to_vec(&v)?;
        let mut guard = self.shard_for(key.as_ref()).write();
        guard.insert(key.as_ref().to_vec(), bytes);
        Ok(())
    }

    fn delete<K: AsRef<[u8]>>(&self, key: K) -> Result<(), DBInterfaceErr> {
        let mut guard = self.shard_for(key.as_ref()).write();
        guard.remove(key.as_ref());
        Ok(())
    }

    fn exists<K: AsRef<[u8]>>(&self, key: K) -> Result<bool, DBInterfaceErr> {
        let guard = self.shard_for(key.as_ref()).read();
        Ok(guard.contains_key(key.as_ref()))
    }

    fn prefix_iterator<'a, V: bincode::Decode + 'a>(
        &self,
        prefix: Vec<u8>,
        direction: IteratorDirection,
    ) -> Box<dyn StreamingIterator<Item = (Vec<u8>, V)> + 'a> {
        let mut data: Vec<(Vec<u8>, V)> = Vec::new();

        for shard in self.shards.iter() {
            let guard = shard.read();
            for (k, v) in guard.iter() {
                if k.starts_with(&prefix) {
                    data.push((k.clone(), crate::codec::decode(v).expect("db corruption")));
                }
            }
        }

        // Shards are unordered, iteration must be deterministic
        data.sort_by(|a, b| a.0.cmp(&b.0));

        Box::new(DBPrefixIterator::new(data, direction))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn put_get_delete() {
        let db = MemoryBackend::new();
        db.put(b"key", 42u32).unwrap();
        assert_eq!(db.get::<_, u32>(b"key").unwrap(), Some(42));
        assert!(db.exists(b"key").unwrap());

        db.delete(b"key").unwrap();
        assert_eq!(db.get::<_, u32>(b"key").unwrap(), None);
        assert!(!db.exists(b"key").unwrap());
    }

    #[test]
    fn overwrite_replaces_value() {
        let db = MemoryBackend::new();
        db.put(b"key", 1u32).unwrap();
        db.put(b"key", 2u32).unwrap();
        assert_eq!(db.get::<_, u32>(b"key").unwrap(), Some(2));
    }

    #[test]
    fn prefix_iteration_is_sorted() {
        let db = MemoryBackend::new();
        db.put(b"pre_c", 3u32).unwrap();
        db.put(b"pre_a", 1u32).unwrap();
        db.put(b"pre_b", 2u32).unwrap();
        db.put(b"other", 9u32).unwrap();

        let mut iter = db.prefix_iterator::<u32>(b"pre_".to_vec(), IteratorDirection::Forward);
        let mut seen = vec![];
        while let Some((_, v)) = iter.next() {
            seen.push(*v);
        }
        assert_eq!(seen, vec![1, 2, 3]);
    }

    #[test]
    fn clones_share_state() {
        let db = MemoryBackend::new();
        let db2 = db.clone();
        db.put(b"key", 7u32).unwrap();
        assert_eq!(db2.get::<_, u32>(b"key").unwrap(), Some(7));
    }
}
