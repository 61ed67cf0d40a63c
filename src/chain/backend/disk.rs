// Copyright (c) 2022 Octavian Oncescu
// Copyright (c) 2022-2023 The Purplecoin Core developers
// Licensed under the Apache License, Version 2.0 see LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0 or the MIT license, see
// LICENSE-MIT or http://opensource.org/licenses/MIT

use crate::chain::backend::{
    DBInterface, DBInterfaceErr, DBPrefixIterator, IteratorDirection,
};
use rocksdb::{Direction, IteratorMode, LogLevel, MultiThreaded, Options, TransactionDB,
    TransactionDBOptions};
use std::path::PathBuf;
use std::str::FromStr;
use streaming_iterator::StreamingIterator;
use triomphe::Arc;

pub type DB = TransactionDB<MultiThreaded>;

/// Rocksdb-backed key-value store holding the user registry and the
/// deterministic node list indices
#[derive(Clone)]
pub struct DiskBackend {
    db: Arc<DB>,
}

impl DiskBackend {
    #[must_use]
    pub fn new(db: Arc<DB>) -> Self {
        Self { db }
    }
}

impl DBInterface for DiskBackend {
    fn get<K: AsRef<[u8]>, V: bincode::Decode>(
        &self,
        key: K,
    ) -> Result<Option<V>, DBInterfaceErr> {
        let result = self.db.get(key)?;
        match result {
            Some(bytes) => Ok(Some(crate::codec::decode(&bytes)?)),
            None => Ok(None),
        }
    }

    fn put<K: AsRef<[u8]>, V: bincode::Encode>(&self, key: K, v: V) -> Result<(), DBInterfaceErr> {
        let bytes = crate::codec::encode_to_vec(&v)?;
        Ok(self.db.put(key, bytes)?)
    }

    fn delete<K: AsRef<[u8]>>(&self, key: K) -> Result<(), DBInterfaceErr> {
        Ok(self.db.delete(key)?)
    }

    fn exists<K: AsRef<[u8]>>(&self, key: K) -> Result<bool, DBInterfaceErr> {
        Ok(self.db.get(key)?.is_some())
    }

    fn prefix_iterator<'a, V: bincode::Decode + 'a>(
        &self,
        prefix: Vec<u8>,
        direction: IteratorDirection,
    ) -> Box<dyn StreamingIterator<Item = (Vec<u8>, V)> + 'a> {
        let data = self
            .db
            .iterator(IteratorMode::From(prefix.as_slice(), Direction::Forward))
            .map(|r| {
                let (k, v) = r.expect("db error");
                (k.as_ref().to_vec(), v)
            })
            .take_while(|(k, _)| k.starts_with(&prefix))
            .map(|(k, v)| (k, crate::codec::decode(v.as_ref()).expect("db corruption")))
            .collect::<Vec<(Vec<u8>, V)>>();

        Box::new(DBPrefixIterator::new(data, direction))
    }
}

#[must_use]
pub fn create_rocksdb_backend() -> Arc<DB> {
    #[cfg(not(test))]
    let mut path = PathBuf::from_str(&crate::settings::SETTINGS.node.data_dir).unwrap();

    #[cfg(test)]
    let mut path = {
        use rand::Rng;
        let mut path = std::env::temp_dir();
        path.push(hex::encode(rand::thread_rng().gen::<[u8; 32]>()));
        path.push("PurplecoinEvo");
        path
    };

    path.push(&crate::settings::SETTINGS.network.network_name);
    path.push("evodb");

    let mut db_opts = Options::default();
    db_opts.create_if_missing(true);
    db_opts.set_log_level(LogLevel::Warn);
    db_opts.set_keep_log_file_num(1);
    let db = DB::open(&db_opts, &TransactionDBOptions::default(), path).unwrap();
    Arc::new(db)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disk_put_get_roundtrip() {
        let db = DiskBackend::new(create_rocksdb_backend());
        db.put(b"key", 42u32).unwrap();
        assert_eq!(db.get::<_, u32>(b"key").unwrap(), Some(42));
        assert!(db.exists(b"key").unwrap());
        assert!(!db.exists(b"missing").unwrap());
    }

    #[test]
    fn disk_prefix_iteration() {
        let db = DiskBackend::new(create_rocksdb_backend());
        db.put(b"pre_b", 2u32).unwrap();
        db.put(b"pre_a", 1u32).unwrap();
        db.put(b"zzz", 9u32).unwrap();

        let mut iter = db.prefix_iterator::<u32>(b"pre_".to_vec(), IteratorDirection::Forward);
        let mut seen = vec![];
        while let Some((_, v)) = iter.next() {
            seen.push(*v);
        }
        assert_eq!(seen, vec![1, 2]);
    }
}
