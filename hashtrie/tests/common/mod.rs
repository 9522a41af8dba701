#![allow(dead_code)]
//! helper methods for the tests
use futures::Future;
use hashtrie::{
    store::{FeedKey, MemStorage},
    Config, Db, Node,
};
use quickcheck::TestResult;
use sha2::{Digest, Sha256};
use std::sync::Arc;

/// feed key derived from a name, so tests can refer to writers by name
pub fn feed_key(name: &str) -> FeedKey {
    let digest = Sha256::digest(name.as_bytes());
    let mut bytes = [0u8; 32];
    bytes.copy_from_slice(&digest);
    FeedKey::new(bytes)
}

pub fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// A participant with its own copy of all logs it knows about
pub struct Peer {
    pub key: FeedKey,
    pub storage: MemStorage,
    pub db: Db,
}

impl Peer {
    pub fn new(name: &str, config: Config) -> anyhow::Result<Self> {
        let key = feed_key(name);
        let storage = MemStorage::new();
        let log = storage.create(key)?;
        let db = Db::new(Arc::new(log), Arc::new(storage.clone()), config)?;
        Ok(Self { key, storage, db })
    }

    /// copy all entries `other` knows about, and make its writer known
    pub fn pull(&self, other: &Peer) -> anyhow::Result<()> {
        self.storage.replicate_from(&other.storage)?;
        self.db.add_writer(other.key)?;
        Ok(())
    }
}

pub fn value(node: &Node) -> Option<&str> {
    node.value().and_then(|value| std::str::from_utf8(value).ok())
}

/// the values of a get or an iteration group, sorted
pub fn values(nodes: &[Arc<Node>]) -> Vec<String> {
    let mut values = nodes
        .iter()
        .filter_map(|node| value(node).map(|value| value.to_owned()))
        .collect::<Vec<_>>();
    values.sort();
    values
}

/// the key of every group
pub fn keys(groups: &[Vec<Arc<Node>>]) -> Vec<String> {
    groups.iter().map(|group| group[0].key.clone()).collect()
}

pub async fn test<F: Future<Output = anyhow::Result<bool>>>(f: impl Fn() -> F) -> TestResult {
    match f().await {
        Ok(success) => TestResult::from_bool(success),
        Err(cause) => TestResult::error(cause.to_string()),
    }
}
