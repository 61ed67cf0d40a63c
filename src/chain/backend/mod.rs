// Copyright (c) 2022 Octavian Oncescu
// Copyright (c) 2022-2023 The Purplecoin Core developers
// Licensed under the Apache License, Version 2.0 see LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0 or the MIT license, see
// LICENSE-MIT or http://opensource.org/licenses/MIT

use bincode::error::DecodeError as BincodeDecodeErr;
use bincode::error::EncodeError as BincodeEncodeErr;
use bincode::{Decode, Encode};
use rocksdb::Error as RocksDBErr;
use streaming_iterator::StreamingIterator;

/// Interface to the underlying key-value database. Every call is atomic;
/// failures are node-local and must never turn into consensus verdicts.
pub trait DBInterface {
    fn get<K: AsRef<[u8]>, V: Decode>(&self, key: K) -> Result<Option<V>, DBInterfaceErr>;
    fn put<K: AsRef<[u8]>, V: Encode>(&self, key: K, v: V) -> Result<(), DBInterfaceErr>;
    fn delete<K: AsRef<[u8]>>(&self, k: K) -> Result<(), DBInterfaceErr>;

    fn exists<K: AsRef<[u8]>>(&self, key: K) -> Result<bool, DBInterfaceErr>;

    fn prefix_iterator<'a, V: bincode::Decode + 'a>(
        &self,
        prefix: Vec<u8>,
        direction: IteratorDirection,
    ) -> Box<dyn StreamingIterator<Item = (Vec<u8>, V)> + 'a>;
}

pub enum IteratorDirection {
    Forward,
    Backward,
}

#[derive(Debug)]
pub enum DBInterfaceErr {
    /// Rocksdb error
    RocksDB(RocksDBErr),

    /// Bincode encode error
    BincodeEncode(BincodeEncodeErr),

    /// Bincode decode error. Stored bytes that fail to decode mean the
    /// database is corrupted
    BincodeDecode(BincodeDecodeErr),

    /// Generic error
    Error(&'static str),
}

impl From<RocksDBErr> for DBInterfaceErr {
    fn from(other: RocksDBErr) -> Self {
        Self::RocksDB(other)
    }
}

impl From<BincodeEncodeErr> for DBInterfaceErr {
    fn from(other: BincodeEncodeErr) -> Self {
        Self::BincodeEncode(other)
    }
}

impl From<BincodeDecodeErr> for DBInterfaceErr {
    fn from(other: BincodeDecodeErr) -> Self {
        Self::BincodeDecode(other)
    }
}

pub struct DBPrefixIterator<V: bincode::Decode> {
    direction: IteratorDirection,
    data: Vec<(Vec<u8>, V)>,
    cursor: Option<usize>,
    done: bool,
}

impl<V: bincode::Decode> DBPrefixIterator<V> {
    #[must_use]
    pub fn new(data: Vec<(Vec<u8>, V)>, direction: IteratorDirection) -> Self {
        Self {
            direction,
            data,
            cursor: None,
            done: false,
        }
    }
}

impl<V: bincode::Decode> StreamingIterator for DBPrefixIterator<V> {
    type Item = (Vec<u8>, V);

    fn advance(&mut self) {
        if self.done {
            return;
        }

        if self.data.is_empty() {
            self.done = true;
            return;
        }

        match self.cursor {
            None => {
                self.cursor = Some(match self.direction {
                    IteratorDirection::Forward => 0,
                    IteratorDirection::Backward => self.data.len() - 1,
                });
            }
            Some(cur) => match self.direction {
                IteratorDirection::Forward => {
                    if cur + 1 >= self.data.len() {
                        self.done = true;
                        return;
                    }
                    self.cursor = Some(cur + 1);
                }
                IteratorDirection::Backward => {
                    if cur == 0 {
                        self.done = true;
                        return;
                    }
                    self.cursor = Some(cur - 1);
                }
            },
        }
    }

    fn get(&self) -> Option<&Self::Item> {
        if self.done {
            return None;
        }

        self.data.get(self.cursor?)
    }
}

pub mod disk;
pub mod memory;

pub use disk::*;
pub use memory::*;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prefix_iterator_forward() {
        let data = vec![
            (vec![1], 10u32),
            (vec![2], 20),
            (vec![3], 30),
        ];
        let mut iter = DBPrefixIterator::new(data, IteratorDirection::Forward);
        let mut seen = vec![];
        while let Some((_, v)) = iter.next() {
            seen.push(*v);
        }
        assert_eq!(seen, vec![10, 20, 30]);
    }

    #[test]
    fn prefix_iterator_backward() {
        let data = vec![
            (vec![1], 10u32),
            (vec![2], 20),
            (vec![3], 30),
        ];
        let mut iter = DBPrefixIterator::new(data, IteratorDirection::Backward);
        let mut seen = vec![];
        while let Some((_, v)) = iter.next() {
            seen.push(*v);
        }
        assert_eq!(seen, vec![30, 20, 10]);
    }

    #[test]
    fn prefix_iterator_empty() {
        let mut iter: DBPrefixIterator<u32> =
            DBPrefixIterator::new(vec![], IteratorDirection::Forward);
        assert!(iter.next().is_none());
    }
}
