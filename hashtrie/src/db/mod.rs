//! The store: a set of writers, read through snapshots of their heads
use crate::{
    error::Error,
    node::{Clock, Entry, FeedEntry, Node},
    path::{normalize_key, Digit, PathMode},
    store::{ArcLog, ArcStorage, FeedKey},
    trie::{Pointer, Trie},
    writer::{self, Writer},
};
use anyhow::Result;
use fnv::FnvHashMap;
use futures::future::join_all;
use libipld::{
    cbor::DagCborCodec,
    codec::{Codec, Encode},
    DagCbor,
};
use parking_lot::RwLock;
use std::{
    convert::TryFrom,
    fmt,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};

mod diff;
mod get;
mod heads;
mod history;
mod iter;
#[cfg(feature = "metrics")]
mod prom;
mod put;

pub use diff::{Diff, DiffEntry};
pub use history::History;
pub use iter::Iter;
#[cfg(feature = "metrics")]
pub(crate) use prom::register;
pub use put::BatchOp;

pub(crate) use heads::retain_undominated;

/// Configuration of a store
#[derive(Debug, Clone)]
pub struct Config {
    /// how keys are turned into paths.
    ///
    /// All writers of a store must agree on this, and it must never change for an existing store.
    pub path_mode: PathMode,
    /// capacity in bytes of the cache of decoded nodes, per writer. 0 disables caching.
    pub node_cache_capacity: usize,
    /// maximum size of a key in bytes
    pub max_key_size: usize,
    /// maximum size of a value in bytes
    pub max_value_size: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            path_mode: PathMode::Hash,
            node_cache_capacity: 16 << 20,
            max_key_size: 4096,
            max_value_size: 16 << 20,
        }
    }
}

impl Config {
    /// config with a tiny cache, so that nodes get evicted and reloaded often
    pub fn debug() -> Self {
        Self {
            node_cache_capacity: 4096,
            ..Default::default()
        }
    }

    /// config for a store in lexint mode, where iteration order is key order
    pub fn lexint() -> Self {
        Self {
            path_mode: PathMode::Lexint,
            ..Default::default()
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        anyhow::ensure!(self.max_key_size > 0 && self.max_key_size <= 1 << 20);
        anyhow::ensure!(self.max_value_size > 0 && self.max_value_size <= 1 << 30);
        Ok(())
    }
}

/// Options for point lookups
#[derive(Debug, Clone, Default)]
pub struct GetOptions {
    /// find nodes whose key starts with the given string instead of the key itself
    pub prefix: bool,
}

/// Options for iteration
#[derive(Debug, Clone)]
pub struct IterOptions {
    /// descend into all levels below the prefix. If false, only immediate children are visited.
    pub recursive: bool,
    /// exclude the prefix key itself
    pub gt: bool,
}

impl Default for IterOptions {
    fn default() -> Self {
        Self {
            recursive: true,
            gt: false,
        }
    }
}

#[derive(Debug, Default)]
struct Writers {
    list: Vec<Arc<Writer>>,
    by_key: FnvHashMap<FeedKey, usize>,
}

pub struct DbInner {
    config: Config,
    storage: ArcStorage,
    writers: RwLock<Writers>,
    write_lock: futures::lock::Mutex<()>,
}

/// A multi writer key value store.
///
/// The local writer always has id 0. Other writers get ids in the order in which this store
/// learns about them, so ids are not comparable between stores.
#[derive(Clone)]
pub struct Db(Arc<DbInner>);

impl std::ops::Deref for Db {
    type Target = DbInner;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl fmt::Debug for Db {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Db")
            .field("config", &self.config)
            .field("writers", &self.writers())
            .finish()
    }
}

/// state shared by all workers of a single traversal
#[derive(Debug, Default)]
pub(crate) struct Request {
    failed: AtomicBool,
}

impl Request {
    pub fn failed(&self) -> bool {
        self.failed.load(Ordering::SeqCst)
    }

    pub fn fail(&self) {
        self.failed.store(true, Ordering::SeqCst);
    }

    /// results of joined workers, or the first error
    pub fn join<T>(&self, results: Vec<Result<Vec<T>>>) -> Result<Vec<T>> {
        let mut out = Vec::new();
        for result in results {
            match result {
                Ok(items) => out.extend(items),
                Err(cause) => {
                    self.fail();
                    return Err(cause);
                }
            }
        }
        Ok(out)
    }
}

impl Db {
    /// open a store with the given log for the local writer
    ///
    /// `storage` is used to open the logs of other writers once they are discovered.
    pub fn new(local: ArcLog, storage: ArcStorage, config: Config) -> Result<Self> {
        config.validate()?;
        let writer = Arc::new(Writer::new(0, local, config.node_cache_capacity));
        let mut writers = Writers::default();
        writers.by_key.insert(writer.key(), 0);
        writers.list.push(writer);
        Ok(Self(Arc::new(DbInner {
            config,
            storage,
            writers: RwLock::new(writers),
            write_lock: Default::default(),
        })))
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// the writer this store appends to
    pub fn local(&self) -> Arc<Writer> {
        self.writers.read().list[0].clone()
    }

    pub fn local_key(&self) -> FeedKey {
        self.local().key()
    }

    /// all writers known so far, by id
    pub fn writers(&self) -> Vec<Arc<Writer>> {
        self.writers.read().list.clone()
    }

    pub fn writer_count(&self) -> usize {
        self.writers.read().list.len()
    }

    pub fn writer_id(&self, key: &FeedKey) -> Option<usize> {
        self.writers.read().by_key.get(key).copied()
    }

    pub(crate) fn writer(&self, id: usize) -> Result<Arc<Writer>> {
        self.writers
            .read()
            .list
            .get(id)
            .cloned()
            .ok_or_else(|| Error::Invalid("unknown writer id").into())
    }

    fn writer_keys(&self) -> Vec<FeedKey> {
        self.writers.read().list.iter().map(|w| w.key()).collect()
    }

    /// make a writer known to this store, returning its id
    ///
    /// Writers are also discovered automatically when a feed directory refers to them.
    pub fn add_writer(&self, key: FeedKey) -> Result<usize> {
        if let Some(id) = self.writer_id(&key) {
            return Ok(id);
        }
        let log = self.storage.open(key).map_err(|e| {
            Error::MissingDependency(format!("log {} could not be opened: {}", key, e))
        })?;
        let mut writers = self.writers.write();
        if let Some(id) = writers.by_key.get(&key) {
            return Ok(*id);
        }
        let id = writers.list.len();
        writers
            .list
            .push(Arc::new(Writer::new(id, log, self.config.node_cache_capacity)));
        writers.by_key.insert(key, id);
        tracing::debug!("added writer {} with id {}", key, id);
        Ok(id)
    }

    pub(crate) fn path(&self, key: &str, terminate: bool) -> Vec<Digit> {
        self.config.path_mode.path(key, terminate)
    }

    /// load the node written by writer `feed` at `seq`
    pub async fn node(&self, feed: usize, seq: u64) -> Result<Arc<Node>> {
        self.load(Pointer::new(feed, seq)).await
    }

    pub(crate) async fn load(&self, pointer: Pointer) -> Result<Arc<Node>> {
        let writer = self.writer(pointer.feed)?;
        if let Some(node) = writer.cache().get(pointer.seq) {
            return Ok(node);
        }
        #[cfg(feature = "metrics")]
        let _timer = prom::NODE_LOAD_HIST.start_timer();
        let bytes = writer.log().get(pointer.seq).await?;
        #[cfg(feature = "metrics")]
        prom::NODE_LOAD_SIZE_HIST.observe(bytes.len() as f64);
        let entry = writer.decode(pointer.seq, &bytes)?;
        let ids = self.directory(&writer, pointer.seq, &entry).await?;
        let node = Arc::new(self.decode_node(&writer, pointer.seq, entry, &ids)?);
        tracing::trace!("loaded {}:{} {:?}", writer.key(), pointer.seq, node.key);
        writer.cache().put(pointer.seq, node.clone());
        Ok(node)
    }

    /// fetch all pointers concurrently, dropping nodes dominated by a sibling
    pub(crate) async fn load_siblings(
        &self,
        request: &Request,
        pointers: &[Pointer],
    ) -> Result<Vec<Arc<Node>>> {
        let mut nodes = self.load_all(request, pointers).await?;
        retain_undominated(&mut nodes);
        Ok(nodes)
    }

    /// fetch all pointers concurrently
    ///
    /// Once the request has failed, nothing is fetched anymore.
    pub(crate) async fn load_all(
        &self,
        request: &Request,
        pointers: &[Pointer],
    ) -> Result<Vec<Arc<Node>>> {
        if request.failed() {
            return Ok(Vec::new());
        }
        let results = join_all(pointers.iter().map(|pointer| self.load(*pointer))).await;
        let mut nodes = Vec::with_capacity(results.len());
        for result in results {
            match result {
                Ok(node) => nodes.push(node),
                Err(cause) => {
                    request.fail();
                    return Err(cause);
                }
            }
        }
        Ok(nodes)
    }

    /// writer ids for the local indices of an entry
    async fn directory(&self, writer: &Writer, seq: u64, entry: &Entry) -> Result<Arc<[usize]>> {
        if !entry.feeds.is_empty() {
            return match writer.directory(seq) {
                Some(ids) => Ok(ids),
                None => self.resolve(writer, seq, &entry.feeds),
            };
        }
        let stored_at = entry.feed_seq;
        if let Some(ids) = writer.directory(stored_at) {
            return Ok(ids);
        }
        if stored_at >= seq {
            return Err(writer
                .decode_error(seq, "no feed directory before this entry")
                .into());
        }
        let stored = writer.entry(stored_at).await?;
        if stored.feeds.is_empty() {
            return Err(writer
                .decode_error(stored_at, "entry holds no feed directory")
                .into());
        }
        self.resolve(writer, stored_at, &stored.feeds)
    }

    fn resolve(&self, writer: &Writer, seq: u64, feeds: &[FeedEntry]) -> Result<Arc<[usize]>> {
        let keys = writer::directory_keys(feeds).map_err(|e| writer.decode_error(seq, e))?;
        let ids = keys
            .into_iter()
            .map(|key| self.add_writer(key))
            .collect::<Result<Vec<_>>>()?;
        let ids: Arc<[usize]> = ids.into();
        writer.put_directory(seq, ids.clone());
        Ok(ids)
    }

    fn decode_node(&self, writer: &Writer, seq: u64, entry: Entry, ids: &[usize]) -> Result<Node> {
        let feed = writer.key();
        let global = |index: u64| -> Result<usize> {
            usize::try_from(index)
                .ok()
                .and_then(|i| ids.get(i).copied())
                .ok_or_else(|| Error::UnknownWriter { feed, seq, index }.into())
        };
        let mut clock = Clock::new();
        for (index, value) in entry.clock.iter().enumerate() {
            clock.raise(global(index as u64)?, *value);
        }
        clock.set(writer.id(), seq);
        let trie = Trie::decode(&entry.trie, global).map_err(|e| writer.decode_error(seq, e))?;
        let key = entry.key.unwrap_or_default();
        let path = self.path(&key, true);
        Ok(Node {
            key,
            value: entry.value,
            trie,
            clock,
            feed: writer.id(),
            seq,
            path,
        })
    }

    /// a snapshot of the current heads
    pub async fn snapshot(&self) -> Result<Snapshot> {
        let heads = self.heads().await?;
        Ok(Snapshot::new(self.clone(), heads))
    }

    /// the version of the current heads, to be checked out later
    pub async fn version(&self) -> Result<Version> {
        Ok(self.snapshot().await?.version())
    }

    /// a snapshot of the store as it was at `version`
    pub async fn checkout(&self, version: &Version) -> Result<Snapshot> {
        let mut pointers = Vec::with_capacity(version.0.len());
        for (key, seq) in version.0.iter() {
            pointers.push(Pointer::new(self.add_writer(*key)?, *seq));
        }
        let results = join_all(pointers.into_iter().map(|pointer| self.load(pointer))).await;
        let mut heads = results.into_iter().collect::<Result<Vec<_>>>()?;
        retain_undominated(&mut heads);
        Ok(Snapshot::new(self.clone(), heads))
    }

    pub async fn get(&self, key: &str) -> Result<Vec<Arc<Node>>> {
        self.snapshot().await?.get(key).await
    }

    pub async fn get_with(&self, key: &str, options: GetOptions) -> Result<Vec<Arc<Node>>> {
        self.snapshot().await?.get_with(key, options).await
    }

    /// iterate over the current heads
    pub async fn iter(&self, prefix: &str, options: IterOptions) -> Result<Iter> {
        Ok(self.snapshot().await?.iter(prefix, options))
    }

    pub async fn list(&self, prefix: &str, options: IterOptions) -> Result<Vec<Vec<Arc<Node>>>> {
        self.snapshot().await?.list(prefix, options).await
    }

    /// all nodes of all writers, in causal order
    pub fn history(&self) -> History {
        History::new(self.clone(), Clock::new())
    }

    /// all nodes not covered by `clock`, in causal order
    pub fn history_from(&self, clock: Clock) -> History {
        History::new(self.clone(), clock)
    }
}

/// A fixed set of heads to read from.
///
/// Since nodes are immutable, reads from a snapshot are not affected by later writes.
#[derive(Debug, Clone)]
pub struct Snapshot {
    db: Db,
    heads: Arc<[Arc<Node>]>,
}

impl Snapshot {
    fn new(db: Db, heads: Vec<Arc<Node>>) -> Self {
        Self {
            db,
            heads: heads.into(),
        }
    }

    pub fn db(&self) -> &Db {
        &self.db
    }

    pub fn heads(&self) -> &[Arc<Node>] {
        &self.heads
    }

    pub fn version(&self) -> Version {
        let keys = self.db.writer_keys();
        Version(
            self.heads
                .iter()
                .filter_map(|head| keys.get(head.feed).map(|key| (*key, head.seq)))
                .collect(),
        )
    }

    /// the clock covering everything visible in this snapshot
    pub fn clock(&self) -> Clock {
        let mut clock = Clock::new();
        for head in self.heads.iter() {
            clock.merge(&head.clock);
            clock.raise(head.feed, head.seq + 1);
        }
        clock
    }

    /// the nodes for `key`. More than one node means concurrent writes.
    ///
    /// Returns an empty vec if the key does not exist or was deleted.
    pub async fn get(&self, key: &str) -> Result<Vec<Arc<Node>>> {
        self.get_with(key, GetOptions::default()).await
    }

    pub async fn get_with(&self, key: &str, options: GetOptions) -> Result<Vec<Arc<Node>>> {
        let key = normalize_key(key);
        let nodes = if options.prefix {
            self.db.get_under(&self.heads, key).await?
        } else {
            self.db.get_key(&self.heads, key).await?
        };
        Ok(if nodes.iter().all(|node| node.is_deleted()) {
            Vec::new()
        } else {
            nodes
        })
    }

    /// get, then map every node and combine the results with `reduce`
    pub async fn get_reduced<T>(
        &self,
        key: &str,
        options: GetOptions,
        map: impl Fn(&Arc<Node>) -> T,
        reduce: impl Fn(T, T) -> T,
    ) -> Result<Option<T>> {
        let nodes = self.get_with(key, options).await?;
        Ok(nodes.iter().map(map).fold(None, |acc, value| match acc {
            Some(acc) => Some(reduce(acc, value)),
            None => Some(value),
        }))
    }

    /// nodes whose path starts with `path`, tombstones included
    pub(crate) async fn get_path(&self, path: &[Digit]) -> Result<Vec<Arc<Node>>> {
        self.db.get_path(&self.heads, path).await
    }

    /// iterate over `prefix` and the keys below it
    pub fn iter(&self, prefix: &str, options: IterOptions) -> Iter {
        Iter::new(self.clone(), prefix, options)
    }

    pub async fn list(&self, prefix: &str, options: IterOptions) -> Result<Vec<Vec<Arc<Node>>>> {
        let mut iter = self.iter(prefix, options);
        let mut result = Vec::new();
        while let Some(group) = iter.next().await? {
            result.push(group);
        }
        Ok(result)
    }

    /// differences between this snapshot (left) and `other` (right)
    pub fn diff(&self, other: &Snapshot, prefix: &str, options: IterOptions) -> Diff {
        Diff::new(
            self.iter(prefix, options.clone()),
            other.iter(prefix, options),
        )
    }
}

#[derive(Debug, Clone, DagCbor)]
struct VersionEntry {
    key: Box<[u8]>,
    seq: u64,
}

/// The heads of a snapshot, identified by writer key and seq
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Version(Vec<(FeedKey, u64)>);

impl Version {
    pub fn heads(&self) -> &[(FeedKey, u64)] {
        &self.0
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let entries = self
            .0
            .iter()
            .map(|(key, seq)| VersionEntry {
                key: key.as_ref().to_vec().into(),
                seq: *seq,
            })
            .collect::<Vec<_>>();
        let mut out = Vec::new();
        entries.encode(DagCborCodec, &mut out)?;
        Ok(out)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let entries: Vec<VersionEntry> = DagCborCodec.decode(bytes)?;
        let heads = entries
            .into_iter()
            .map(|entry| Ok((FeedKey::from_slice(&entry.key)?, entry.seq)))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self(heads))
    }
}
