//! Nodes, clocks and the wire format of log entries
use crate::{
    path::Digit,
    trie::{Pointer, Trie},
};
use libipld::DagCbor;
use smallvec::SmallVec;
use std::fmt;

/// A vector clock, indexed by writer id.
///
/// `clock.get(w)` is the number of entries of writer `w` the author of a node had seen.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Clock(SmallVec<[u64; 4]>);

impl Clock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, feed: usize) -> u64 {
        self.0.get(feed).copied().unwrap_or_default()
    }

    pub fn set(&mut self, feed: usize, value: u64) {
        if feed >= self.0.len() {
            self.0.resize(feed + 1, 0);
        }
        self.0[feed] = value;
    }

    /// raise entry `feed` to at least `value`
    pub fn raise(&mut self, feed: usize, value: u64) {
        if self.get(feed) < value {
            self.set(feed, value);
        }
    }

    /// elementwise maximum
    pub fn merge(&mut self, other: &Clock) {
        for (feed, value) in other.iter() {
            self.raise(feed, value);
        }
    }

    /// true if the entry `seq` of writer `feed` is covered by this clock
    pub fn covers(&self, feed: usize, seq: u64) -> bool {
        self.get(feed) > seq
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.iter().all(|x| *x == 0)
    }

    /// (writer id, count) for all entries, including zeros
    pub fn iter(&self) -> impl Iterator<Item = (usize, u64)> + '_ {
        self.0.iter().copied().enumerate()
    }

    pub fn sum(&self) -> u64 {
        self.0.iter().sum()
    }
}

impl fmt::Debug for Clock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.0.iter()).finish()
    }
}

impl std::iter::FromIterator<u64> for Clock {
    fn from_iter<I: IntoIterator<Item = u64>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// A single put or delete, as seen by this store.
///
/// `feed`, `seq` and `path` are not stored but derived when the entry is decoded. Writer
/// ids in `feed`, `clock` and `trie` are ids of the store that decoded the node.
#[derive(Debug, Clone)]
pub struct Node {
    pub key: String,
    /// `None` for a deletion
    pub value: Option<Box<[u8]>>,
    pub trie: Trie,
    pub clock: Clock,
    pub feed: usize,
    pub seq: u64,
    pub path: Vec<Digit>,
}

impl Node {
    pub fn pointer(&self) -> Pointer {
        Pointer::new(self.feed, self.seq)
    }

    pub fn value(&self) -> Option<&[u8]> {
        self.value.as_deref()
    }

    pub fn is_deleted(&self) -> bool {
        self.value.is_none()
    }

    /// path digit at position `i`
    pub fn digit(&self, i: usize) -> Option<Digit> {
        self.path.get(i).copied()
    }

    /// true if the author of `self` had seen `other`
    pub fn dominates(&self, other: &Node) -> bool {
        self.pointer() != other.pointer() && self.clock.covers(other.feed, other.seq)
    }
}

/// entry of the writer directory stored in a log
#[derive(Debug, Clone, PartialEq, Eq, DagCbor)]
pub(crate) struct FeedEntry {
    pub key: Box<[u8]>,
    pub owner: bool,
    pub writer: bool,
}

/// A log entry as it is stored
#[derive(Debug, Clone, PartialEq, Eq, DagCbor)]
pub(crate) struct Entry {
    pub key: Option<String>,
    /// absent for deletions
    pub value: Option<Box<[u8]>>,
    /// clock in local writer indices
    pub clock: Vec<u64>,
    /// encoded trie
    pub trie: Box<[u8]>,
    /// the complete writer directory, only when it changed with this entry
    pub feeds: Vec<FeedEntry>,
    /// seq of the entry holding the directory that is valid for this entry
    pub feed_seq: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use libipld::{cbor::DagCborCodec, codec::Codec};

    #[test]
    fn clock_merge() {
        let mut a: Clock = vec![1, 0, 3].into_iter().collect();
        let b: Clock = vec![0, 2].into_iter().collect();
        a.merge(&b);
        assert_eq!(a, vec![1, 2, 3].into_iter().collect());
        assert_eq!(a.get(7), 0);
        assert!(a.covers(2, 2));
        assert!(!a.covers(2, 3));
        assert_eq!(a.sum(), 6);
    }

    fn node(feed: usize, seq: u64, clock: Vec<u64>) -> Node {
        Node {
            key: "a".into(),
            value: Some(b"x".to_vec().into()),
            trie: Trie::new(),
            clock: clock.into_iter().collect(),
            feed,
            seq,
            path: Vec::new(),
        }
    }

    #[test]
    fn domination() {
        let a0 = node(0, 0, vec![0]);
        let a1 = node(0, 1, vec![1]);
        let b0 = node(1, 0, vec![0, 0]);
        let b1 = node(1, 1, vec![2, 1]);
        assert!(a1.dominates(&a0));
        assert!(!a0.dominates(&a1));
        assert!(!a1.dominates(&a1));
        assert!(!a1.dominates(&b0));
        assert!(!b0.dominates(&a1));
        assert!(b1.dominates(&a1));
        assert!(b1.dominates(&b0));
    }

    #[test]
    fn entry_cbor() -> anyhow::Result<()> {
        let entry = Entry {
            key: Some("a/b".into()),
            value: None,
            clock: vec![3, 0, 1],
            trie: vec![0, 1, 2].into(),
            feeds: vec![FeedEntry {
                key: vec![7u8; 32].into(),
                owner: true,
                writer: true,
            }],
            feed_seq: 4,
        };
        let bytes = DagCborCodec.encode(&entry)?;
        let decoded: Entry = DagCborCodec.decode(&bytes)?;
        assert_eq!(decoded, entry);
        Ok(())
    }
}
