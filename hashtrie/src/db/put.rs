//! writing nodes
//!
//! A new node gets a trie that records, for every position of its path, the nodes that
//! branch off there. The trie is assembled by walking every head down the new path, the same
//! way a get would, and collecting what the heads know about the branches along the way.
use super::{Db, Request};
use crate::{
    error::Error,
    node::{Clock, Entry, Node},
    path::{normalize_key, Digit, TERMINATE},
    trie::{Pointer, Trie},
    writer::{self, Writer},
};
use anyhow::Result;
use futures::{
    future::{join_all, BoxFuture},
    prelude::*,
};
use std::sync::Arc;

/// A single operation of a batch
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchOp {
    Put { key: String, value: Vec<u8> },
    Del { key: String },
}

impl BatchOp {
    pub fn put(key: impl Into<String>, value: impl Into<Vec<u8>>) -> Self {
        Self::Put {
            key: key.into(),
            value: value.into(),
        }
    }

    pub fn del(key: impl Into<String>) -> Self {
        Self::Del { key: key.into() }
    }
}

struct PutRequest<'a> {
    key: &'a str,
    path: Vec<Digit>,
    request: Request,
}

/// a pointer to be recorded in the new trie
type Record = (usize, Digit, Pointer);

impl Db {
    /// set `key` to `value`
    pub async fn put(&self, key: &str, value: impl Into<Vec<u8>>) -> Result<Arc<Node>> {
        let value: Vec<u8> = value.into();
        let _guard = self.write_lock.lock().await;
        self.put_locked(key, Some(value.into())).await
    }

    /// delete `key` by writing a tombstone
    pub async fn del(&self, key: &str) -> Result<Arc<Node>> {
        let _guard = self.write_lock.lock().await;
        self.put_locked(key, None).await
    }

    /// apply several operations in order, without other writes of this store in between
    pub async fn batch(&self, ops: impl IntoIterator<Item = BatchOp>) -> Result<Vec<Arc<Node>>> {
        let _guard = self.write_lock.lock().await;
        let mut nodes = Vec::new();
        for op in ops {
            let node = match op {
                BatchOp::Put { key, value } => self.put_locked(&key, Some(value.into())).await?,
                BatchOp::Del { key } => self.put_locked(&key, None).await?,
            };
            nodes.push(node);
        }
        Ok(nodes)
    }

    async fn put_locked(&self, key: &str, value: Option<Box<[u8]>>) -> Result<Arc<Node>> {
        let key = normalize_key(key);
        if key.len() > self.config.max_key_size {
            return Err(Error::Invalid("key too large").into());
        }
        if value.as_ref().map(|v| v.len()).unwrap_or_default() > self.config.max_value_size {
            return Err(Error::Invalid("value too large").into());
        }
        let heads = self.heads().await?;
        let request = PutRequest {
            key,
            path: self.path(key, true),
            request: Request::default(),
        };
        let workers = heads
            .iter()
            .map(|head| self.put_worker(&request, 0, head.clone()));
        let results = join_all(workers).await;
        let records = request.request.join(results)?;
        let mut trie = Trie::new();
        for (position, digit, pointer) in records {
            trie.insert(position, digit, pointer);
        }
        let mut clock = Clock::new();
        for head in heads.iter() {
            clock.merge(&head.clock);
            clock.raise(head.feed, head.seq + 1);
        }
        self.append(key, value, trie, clock).await
    }

    fn put_worker<'a>(
        &'a self,
        request: &'a PutRequest<'a>,
        mut i: usize,
        node: Arc<Node>,
    ) -> BoxFuture<'a, Result<Vec<Record>>> {
        async move {
            let path = &request.path;
            let mut records = Vec::new();
            while i < path.len() {
                let val = path[i];
                if let Some(bucket) = node.trie.bucket(i) {
                    for (digit, pointers) in bucket.slots() {
                        if digit != val {
                            records.extend(pointers.iter().map(|p| (i, digit, *p)));
                        } else if digit == TERMINATE {
                            // keys colliding with ours, except for older versions of ours
                            let nodes = self.load_all(&request.request, pointers).await?;
                            records.extend(
                                nodes
                                    .iter()
                                    .filter(|other| other.key != request.key)
                                    .map(|other| (i, digit, other.pointer())),
                            );
                        }
                    }
                }
                let own = node.digit(i);
                if own == Some(val) {
                    i += 1;
                    continue;
                }
                if let Some(own) = own {
                    records.push((i, own, node.pointer()));
                }
                let next = node.trie.get(i, val);
                if next.is_empty() {
                    return Ok(records);
                }
                let nodes = self.load_siblings(&request.request, next).await?;
                let workers = nodes
                    .into_iter()
                    .map(|node| self.put_worker(request, i + 1, node));
                let results = join_all(workers).await;
                records.extend(request.request.join(results)?);
                return Ok(records);
            }
            if node.key != request.key {
                records.push((path.len() - 1, TERMINATE, node.pointer()));
            }
            Ok(records)
        }
        .boxed()
    }

    /// read back the feed directory of the local log, once
    async fn load_table(&self, writer: &Writer) -> Result<()> {
        if writer.table().lock().is_loaded() {
            return Ok(());
        }
        let stored = if writer.is_empty() {
            None
        } else {
            let last = writer.len() - 1;
            let entry = writer.entry(last).await?;
            let (stored_at, feeds) = if entry.feeds.is_empty() {
                (entry.feed_seq, writer.entry(entry.feed_seq).await?.feeds)
            } else {
                (last, entry.feeds)
            };
            let keys =
                writer::directory_keys(&feeds).map_err(|e| writer.decode_error(stored_at, e))?;
            for key in keys.iter() {
                self.add_writer(*key)?;
            }
            tracing::debug!("loaded feed directory of {} entries", keys.len());
            Some((stored_at, keys))
        };
        writer.table().lock().load(writer.key(), stored);
        Ok(())
    }

    /// encode a node and append it to the local log
    async fn append(
        &self,
        key: &str,
        value: Option<Box<[u8]>>,
        trie: Trie,
        mut clock: Clock,
    ) -> Result<Arc<Node>> {
        let writer = self.local();
        self.load_table(&writer).await?;
        let seq = writer.len();
        clock.set(writer.id(), seq);
        let keys = self.writer_keys();
        let entry = {
            let mut table = writer.table().lock();
            let mut local = |id: usize| -> Result<u64> {
                keys.get(id)
                    .map(|key| table.local(*key))
                    .ok_or_else(|| Error::Invalid("pointer to unknown writer").into())
            };
            let mut encoded_trie = Vec::new();
            trie.encode(&mut encoded_trie, &mut local)?;
            let mut local_clock = Vec::new();
            for (id, value) in clock.iter() {
                if value == 0 && id != writer.id() {
                    continue;
                }
                let index = local(id)? as usize;
                if local_clock.len() <= index {
                    local_clock.resize(index + 1, 0);
                }
                local_clock[index] = value;
            }
            let (feeds, feed_seq) = table.directory(seq);
            Entry {
                key: Some(key.to_owned()),
                value: value.clone(),
                clock: local_clock,
                trie: encoded_trie.into(),
                feeds,
                feed_seq,
            }
        };
        let mut buffer = Vec::new();
        writer::encode_entry(&entry, &mut buffer)?;
        #[cfg(feature = "metrics")]
        let _timer = super::prom::NODE_APPEND_HIST.start_timer();
        #[cfg(feature = "metrics")]
        super::prom::NODE_APPEND_SIZE_HIST.observe(buffer.len() as f64);
        let stored = writer.log().append(buffer).await?;
        if stored != seq {
            return Err(Error::Invalid("local log was appended to concurrently").into());
        }
        writer.table().lock().stored(seq);
        let node = Arc::new(Node {
            key: key.to_owned(),
            value,
            path: self.path(key, true),
            trie,
            clock,
            feed: writer.id(),
            seq,
        });
        writer.cache().put(seq, node.clone());
        tracing::debug!(
            "{} {} at {}:{} with {} pointers",
            if node.is_deleted() { "deleted" } else { "put" },
            node.key,
            writer.key(),
            seq,
            node.trie.count()
        );
        Ok(node)
    }
}
