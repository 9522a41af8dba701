use super::{ArcLog, FeedKey, Log, Storage};
use crate::error::Error;
use anyhow::Result;
use fnv::FnvHashMap;
use futures::{future::BoxFuture, prelude::*};
use parking_lot::Mutex;
use std::{convert::TryFrom, sync::Arc};

/// A MemLog is a pure in memory log. Mostly useful for testing.
#[derive(Clone)]
pub struct MemLog(Arc<Inner>);

struct Inner {
    key: FeedKey,
    writable: bool,
    entries: Mutex<Vec<Arc<[u8]>>>,
}

impl MemLog {
    /// a log owned by the local writer
    pub fn new(key: FeedKey) -> Self {
        Self::create(key, true)
    }

    /// a read only replica of someone else's log
    pub fn replica(key: FeedKey) -> Self {
        Self::create(key, false)
    }

    fn create(key: FeedKey, writable: bool) -> Self {
        Self(Arc::new(Inner {
            key,
            writable,
            entries: Mutex::new(Vec::new()),
        }))
    }

    /// copy all entries we don't have yet from another copy of the same log
    ///
    /// returns the number of copied entries
    pub fn replicate_from(&self, other: &MemLog) -> Result<usize> {
        anyhow::ensure!(self.0.key == other.0.key, "replicating a different log");
        if Arc::ptr_eq(&self.0, &other.0) {
            return Ok(0);
        }
        let source = other.0.entries.lock().clone();
        let mut target = self.0.entries.lock();
        let have = target.len();
        target.extend(source.into_iter().skip(have));
        Ok(target.len() - have)
    }

    pub fn is_writable(&self) -> bool {
        self.0.writable
    }

    fn get0(&self, seq: u64) -> Option<Arc<[u8]>> {
        let entries = self.0.entries.lock();
        usize::try_from(seq)
            .ok()
            .and_then(|seq| entries.get(seq).cloned())
    }

    fn append0(&self, data: Vec<u8>) -> Result<u64> {
        if !self.0.writable {
            return Err(Error::ReadOnly(self.0.key).into());
        }
        let mut entries = self.0.entries.lock();
        entries.push(data.into());
        Ok(entries.len() as u64 - 1)
    }
}

impl Log for MemLog {
    fn key(&self) -> FeedKey {
        self.0.key
    }

    fn len(&self) -> u64 {
        self.0.entries.lock().len() as u64
    }

    fn get(&self, seq: u64) -> BoxFuture<'_, Result<Arc<[u8]>>> {
        let result = self.get0(seq).ok_or_else(|| {
            anyhow::Error::from(Error::NotThere {
                feed: self.0.key,
                seq,
            })
        });
        future::ready(result).boxed()
    }

    fn append(&self, data: Vec<u8>) -> BoxFuture<'_, Result<u64>> {
        future::ready(self.append0(data)).boxed()
    }
}

/// All logs known to one participant, kept in memory
#[derive(Clone, Default)]
pub struct MemStorage(Arc<Mutex<FnvHashMap<FeedKey, MemLog>>>);

impl MemStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// create the writable log of the local writer
    ///
    /// Fails if the log is already known as a replica of someone else's log.
    pub fn create(&self, key: FeedKey) -> Result<MemLog> {
        let log = self
            .0
            .lock()
            .entry(key)
            .or_insert_with(|| MemLog::new(key))
            .clone();
        if !log.is_writable() {
            return Err(Error::ReadOnly(key).into());
        }
        Ok(log)
    }

    pub fn log(&self, key: &FeedKey) -> Option<MemLog> {
        self.0.lock().get(key).cloned()
    }

    pub fn keys(&self) -> Vec<FeedKey> {
        self.0.lock().keys().cloned().collect()
    }

    /// pull every log `other` knows about, opening replicas as needed
    pub fn replicate_from(&self, other: &MemStorage) -> Result<usize> {
        let mut copied = 0;
        for key in other.keys() {
            if let Some(source) = other.log(&key) {
                let target = self
                    .0
                    .lock()
                    .entry(key)
                    .or_insert_with(|| MemLog::replica(key))
                    .clone();
                copied += target.replicate_from(&source)?;
            }
        }
        Ok(copied)
    }
}

impl Storage for MemStorage {
    fn open(&self, key: FeedKey) -> Result<ArcLog> {
        let log = self
            .0
            .lock()
            .entry(key)
            .or_insert_with(|| MemLog::replica(key))
            .clone();
        Ok(Arc::new(log))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::executor::block_on;

    fn key(x: u8) -> FeedKey {
        FeedKey::new([x; 32])
    }

    #[test]
    fn append_and_get() -> anyhow::Result<()> {
        let log = MemLog::new(key(1));
        assert_eq!(block_on(log.append(b"a".to_vec()))?, 0);
        assert_eq!(block_on(log.append(b"b".to_vec()))?, 1);
        assert_eq!(log.len(), 2);
        assert_eq!(&block_on(log.get(1))?[..], b"b");
        assert!(block_on(log.get(2)).is_err());
        Ok(())
    }

    #[test]
    fn replicas_are_read_only() -> anyhow::Result<()> {
        let log = MemLog::new(key(1));
        block_on(log.append(b"a".to_vec()))?;
        let replica = MemLog::replica(key(1));
        assert!(block_on(replica.append(b"b".to_vec())).is_err());
        assert_eq!(replica.replicate_from(&log)?, 1);
        assert_eq!(replica.replicate_from(&log)?, 0);
        assert_eq!(&block_on(replica.get(0))?[..], b"a");
        assert!(replica.replicate_from(&MemLog::new(key(2))).is_err());
        Ok(())
    }

    #[test]
    fn storage_replication() -> anyhow::Result<()> {
        let a = MemStorage::new();
        let b = MemStorage::new();
        let log = a.create(key(1))?;
        block_on(log.append(b"x".to_vec()))?;
        assert_eq!(b.replicate_from(&a)?, 1);
        let replica = b.open(key(1))?;
        assert_eq!(replica.len(), 1);
        Ok(())
    }

    #[test]
    fn create_after_open() -> anyhow::Result<()> {
        let storage = MemStorage::new();
        let log = storage.create(key(1))?;
        assert!(log.is_writable());
        // creating again hands out the same log
        block_on(storage.create(key(1))?.append(b"a".to_vec()))?;
        assert_eq!(log.len(), 1);
        storage.open(key(2))?;
        assert!(storage.create(key(2)).is_err());
        Ok(())
    }
}
