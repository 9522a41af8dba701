//! per writer state: the log, a cache of decoded nodes and the feed directory
//!
//! Pointers and clocks in a stored entry refer to writers by an index that is local to the
//! log the entry is stored in. The mapping from local index to writer key is the *feed
//! directory*. It is stored in full in the entry that introduced the latest index, and every
//! other entry refers to that entry via `feed_seq`.
use crate::{
    error::Error,
    node::{Entry, FeedEntry, Node},
    store::{ArcLog, FeedKey},
};
use anyhow::Result;
use fnv::FnvHashMap;
use libipld::{
    cbor::DagCborCodec,
    codec::{Codec, Encode},
};
use parking_lot::Mutex;
use std::{fmt, num::NonZeroUsize, sync::Arc};
use weight_cache::{Weighable, WeightCache};

#[derive(Debug, Clone)]
struct CachedNode(Arc<Node>);

impl Weighable for CachedNode {
    fn measure(value: &Self) -> usize {
        let node = &value.0;
        std::mem::size_of::<Node>()
            + node.key.len()
            + node.value.as_ref().map(|v| v.len()).unwrap_or_default()
            + node.path.len()
            + node.clock.len() * 8
            + node.trie.count() * std::mem::size_of::<crate::trie::Pointer>()
    }
}

type CacheOrBypass = Option<Arc<Mutex<WeightCache<u64, CachedNode>>>>;

/// Cache of decoded nodes of a single writer, keyed by seq
#[derive(Debug, Clone)]
pub(crate) struct NodeCache(CacheOrBypass);

impl NodeCache {
    /// Passing a capacity of 0 disables the cache.
    pub fn new(capacity: usize) -> Self {
        Self(
            NonZeroUsize::new(capacity)
                .map(|capacity| Arc::new(Mutex::new(WeightCache::new(capacity)))),
        )
    }

    pub fn get(&self, seq: u64) -> Option<Arc<Node>> {
        self.0
            .as_ref()
            .and_then(|x| x.lock().get(&seq).map(|cached| cached.0.clone()))
    }

    pub fn put(&self, seq: u64, node: Arc<Node>) {
        if let Some(Err(e)) = self.0.as_ref().map(|x| x.lock().put(seq, CachedNode(node))) {
            tracing::warn!("Adding node {} to cache failed: {}", seq, e);
        }
    }
}

/// The directory the local writer stores with its entries
#[derive(Debug, Default)]
pub(crate) struct FeedTable {
    feeds: Vec<FeedKey>,
    index: FnvHashMap<FeedKey, u64>,
    /// seq of the entry holding the current directory
    seq: Option<u64>,
    /// true once the directory has been read back from the log
    loaded: bool,
    /// true if indices were added since the directory was last stored
    changed: bool,
}

impl FeedTable {
    pub fn is_loaded(&self) -> bool {
        self.loaded
    }

    /// initialize from the directory stored at `seq`, or from scratch for an empty log
    pub fn load(&mut self, own: FeedKey, stored: Option<(u64, Vec<FeedKey>)>) {
        self.feeds.clear();
        self.index.clear();
        self.changed = false;
        self.seq = None;
        if let Some((seq, feeds)) = stored {
            for key in feeds {
                self.local(key);
            }
            self.seq = Some(seq);
            self.changed = false;
        }
        // our own log is always index 0
        self.local(own);
        self.loaded = true;
    }

    /// local index for `key`, adding it if needed
    pub fn local(&mut self, key: FeedKey) -> u64 {
        if let Some(index) = self.index.get(&key) {
            return *index;
        }
        let index = self.feeds.len() as u64;
        self.feeds.push(key);
        self.index.insert(key, index);
        self.changed = true;
        index
    }

    #[cfg(test)]
    pub fn feeds(&self) -> &[FeedKey] {
        &self.feeds
    }

    /// feed directory and `feed_seq` for an entry to be written at `seq`
    pub fn directory(&self, seq: u64) -> (Vec<FeedEntry>, u64) {
        match self.seq {
            Some(stored) if !self.changed => (Vec::new(), stored),
            _ => {
                let feeds = self
                    .feeds
                    .iter()
                    .enumerate()
                    .map(|(i, key)| FeedEntry {
                        key: key.as_ref().to_vec().into(),
                        owner: i == 0,
                        writer: true,
                    })
                    .collect();
                (feeds, seq)
            }
        }
    }

    /// record that the entry at `seq` was stored
    pub fn stored(&mut self, seq: u64) {
        if self.changed || self.seq.is_none() {
            self.seq = Some(seq);
            self.changed = false;
        }
    }
}

/// A writer as seen by a single store
pub struct Writer {
    id: usize,
    key: FeedKey,
    log: ArcLog,
    cache: NodeCache,
    /// resolved feed directories, by the seq of the entry storing them
    directories: Mutex<FnvHashMap<u64, Arc<[usize]>>>,
    table: Mutex<FeedTable>,
}

impl fmt::Debug for Writer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Writer")
            .field("id", &self.id)
            .field("key", &self.key)
            .field("len", &self.log.len())
            .finish()
    }
}

impl Writer {
    pub(crate) fn new(id: usize, log: ArcLog, cache_capacity: usize) -> Self {
        Self {
            id,
            key: log.key(),
            log,
            cache: NodeCache::new(cache_capacity),
            directories: Default::default(),
            table: Default::default(),
        }
    }

    /// writer id within this store
    pub fn id(&self) -> usize {
        self.id
    }

    pub fn key(&self) -> FeedKey {
        self.key
    }

    pub fn len(&self) -> u64 {
        self.log.len()
    }

    pub fn is_empty(&self) -> bool {
        self.log.is_empty()
    }

    pub(crate) fn log(&self) -> &ArcLog {
        &self.log
    }

    pub(crate) fn cache(&self) -> &NodeCache {
        &self.cache
    }

    pub(crate) fn table(&self) -> &Mutex<FeedTable> {
        &self.table
    }

    pub(crate) fn directory(&self, seq: u64) -> Option<Arc<[usize]>> {
        self.directories.lock().get(&seq).cloned()
    }

    pub(crate) fn put_directory(&self, seq: u64, ids: Arc<[usize]>) {
        self.directories.lock().insert(seq, ids);
    }

    /// decode the raw entry at `seq`
    pub(crate) fn decode(&self, seq: u64, bytes: &[u8]) -> Result<Entry> {
        DagCborCodec
            .decode::<Entry>(bytes)
            .map_err(|e| self.decode_error(seq, e).into())
    }

    pub(crate) fn decode_error(&self, seq: u64, reason: impl fmt::Display) -> Error {
        Error::Decode {
            feed: self.key,
            seq,
            reason: reason.to_string(),
        }
    }

    /// load the raw entry at `seq` and decode it
    pub(crate) async fn entry(&self, seq: u64) -> Result<Entry> {
        let bytes = self.log.get(seq).await?;
        self.decode(seq, &bytes)
    }
}

/// encode an entry into a caller owned buffer
pub(crate) fn encode_entry(entry: &Entry, out: &mut Vec<u8>) -> Result<()> {
    entry.encode(DagCborCodec, out)
}

/// the writer keys of a stored directory
pub(crate) fn directory_keys(feeds: &[FeedEntry]) -> Result<Vec<FeedKey>> {
    feeds.iter().map(|entry| FeedKey::from_slice(&entry.key)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trie::Trie;

    fn key(x: u8) -> FeedKey {
        FeedKey::new([x; 32])
    }

    #[test]
    fn directory_only_when_changed() {
        let mut table = FeedTable::default();
        table.load(key(0), None);
        let (feeds, seq) = table.directory(0);
        assert_eq!(feeds.len(), 1);
        assert!(feeds[0].owner);
        assert_eq!(seq, 0);
        table.stored(0);
        assert_eq!(table.directory(1), (vec![], 0));
        assert_eq!(table.local(key(0)), 0);
        assert_eq!(table.local(key(7)), 1);
        let (feeds, seq) = table.directory(1);
        assert_eq!(feeds.len(), 2);
        assert_eq!(seq, 1);
        table.stored(1);
        assert_eq!(table.directory(2), (vec![], 1));
    }

    #[test]
    fn reload() -> Result<()> {
        let mut table = FeedTable::default();
        table.load(key(0), None);
        table.local(key(3));
        let (feeds, _) = table.directory(0);
        let mut reloaded = FeedTable::default();
        reloaded.load(key(0), Some((0, directory_keys(&feeds)?)));
        assert_eq!(reloaded.feeds(), &[key(0), key(3)]);
        assert_eq!(reloaded.directory(5), (vec![], 0));
        Ok(())
    }

    #[test]
    fn cache_can_be_disabled() {
        let node = Arc::new(Node {
            key: "a".into(),
            value: None,
            trie: Trie::new(),
            clock: Default::default(),
            feed: 0,
            seq: 0,
            path: vec![],
        });
        let cache = NodeCache::new(0);
        cache.put(0, node.clone());
        assert!(cache.get(0).is_none());
        let cache = NodeCache::new(1 << 20);
        cache.put(0, node);
        assert!(cache.get(0).is_some());
    }
}
