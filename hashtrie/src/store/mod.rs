//! interface to the append-only logs the store is built on
//!
//! Every writer owns exactly one log. The store only ever reads whole entries by sequence
//! number and appends to the log of the local writer. Durability and replication are up to
//! the implementation.
use anyhow::Result;
use derive_more::From;
use futures::future::BoxFuture;
use std::{convert::TryInto, fmt, sync::Arc};
mod mem_store;

pub use mem_store::{MemLog, MemStorage};

/// Globally stable identity of a writer, usually the public key of its log
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, From)]
pub struct FeedKey([u8; 32]);

impl FeedKey {
    pub fn new(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        let bytes: [u8; 32] = bytes.try_into()?;
        Ok(Self(bytes))
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl AsRef<[u8]> for FeedKey {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Display for FeedKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(&self.0[..4]))
    }
}

impl fmt::Debug for FeedKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FeedKey({})", hex::encode(self.0))
    }
}

/// A single append-only log
///
/// `len` may grow at any time due to replication, but never shrinks.
pub trait Log: Send + Sync {
    /// identity of the writer owning this log
    fn key(&self) -> FeedKey;

    /// current number of entries
    fn len(&self) -> u64;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// fetch entry `seq`
    fn get(&self, seq: u64) -> BoxFuture<'_, Result<Arc<[u8]>>>;

    /// append an entry, returning its sequence number
    fn append(&self, data: Vec<u8>) -> BoxFuture<'_, Result<u64>>;
}

/// A log, we use dyn to avoid having just another type parameter
pub type ArcLog = Arc<dyn Log + 'static>;

/// Opens logs of writers that are discovered while reading
pub trait Storage: Send + Sync {
    /// open the log for `key`, creating an empty replica if there is none yet
    fn open(&self, key: FeedKey) -> Result<ArcLog>;
}

pub type ArcStorage = Arc<dyn Storage + 'static>;
