//! ordered traversal of a subtree
//!
//! The traversal is a depth first search with an explicit stack. A subtree that all heads
//! agree on is expanded from a single node, using its trie. A subtree that heads disagree on
//! is resolved with a get for its path, and split further until they agree.
//!
//! Subtrees are visited in path order, digits ranked as given by [ORDER](crate::path::ORDER).
use super::{retain_undominated, IterOptions, Request, Snapshot};
use crate::{
    node::Node,
    path::{normalize_key, rank, Digit, ORDER, SEPARATE, TERMINATE},
    trie::Pointer,
};
use anyhow::Result;
use futures::prelude::*;
use std::{
    borrow::Borrow,
    collections::{BTreeMap, VecDeque},
    sync::Arc,
};

#[derive(Debug)]
enum Frame {
    /// a subtree represented by a single node, to be expanded from position `i`
    Node { pointer: Pointer, i: usize },
    /// a subtree that might be known differently by different heads
    Prefix(Vec<Digit>),
    /// nodes with the same path, to be yielded grouped by key
    Emit(Vec<Arc<Node>>),
}

/// Iterator over all keys at or below a prefix.
///
/// Every item is the group of nodes for one key. A group has more than one node if the key
/// was written concurrently. Keys for which all nodes are deletions are skipped.
pub struct Iter {
    snapshot: Snapshot,
    prefix: Vec<Digit>,
    options: IterOptions,
    stack: Vec<Frame>,
    pending: VecDeque<Vec<Arc<Node>>>,
    request: Request,
}

impl Iter {
    pub(crate) fn new(snapshot: Snapshot, prefix: &str, options: IterOptions) -> Self {
        let prefix = snapshot.db().path(normalize_key(prefix), false);
        Self {
            stack: vec![Frame::Prefix(prefix.clone())],
            snapshot,
            prefix,
            options,
            pending: VecDeque::new(),
            request: Request::default(),
        }
    }

    pub async fn next(&mut self) -> Result<Option<Vec<Arc<Node>>>> {
        loop {
            if let Some(group) = self.pending.pop_front() {
                return Ok(Some(group));
            }
            let frame = match self.stack.pop() {
                Some(frame) => frame,
                None => return Ok(None),
            };
            match frame {
                Frame::Node { pointer, i } => {
                    let node = self.snapshot.db().load(pointer).await?;
                    self.split(i, vec![node]);
                }
                Frame::Prefix(path) => {
                    let nodes = self.snapshot.get_path(&path).await?;
                    if !nodes.is_empty() {
                        self.split(path.len(), nodes);
                    }
                }
                Frame::Emit(nodes) => self.emit(nodes).await?,
            }
        }
    }

    pub fn into_stream(self) -> impl Stream<Item = Result<Vec<Arc<Node>>>> + Send + 'static {
        stream::unfold(self, |mut iter| async move {
            iter.next().await.transpose().map(|result| (result, iter))
        })
    }

    /// true if a path continuing with `digit` at `position` can contain wanted keys
    fn allowed(&self, position: usize, digit: Digit) -> bool {
        let boundary = self.prefix.len();
        if position < boundary {
            return self.prefix[position] == digit;
        }
        if digit == TERMINATE {
            return !(position == boundary && self.options.gt);
        }
        if position == boundary && boundary > 0 {
            return digit == SEPARATE;
        }
        digit != SEPARATE || self.options.recursive
    }

    /// push frames for the subtree below `path[..start]`, given the nodes all heads know for it
    ///
    /// Positions where all nodes agree are expanded using their tries. Below the first position
    /// where they disagree, every branch becomes a subtree of its own.
    fn split(&mut self, start: usize, nodes: Vec<Arc<Node>>) {
        let path = nodes[0].path.clone();
        let mut common = start;
        while common < path.len()
            && nodes
                .iter()
                .all(|node| node.digit(common) == Some(path[common]))
        {
            common += 1;
        }
        let mut before = Vec::new();
        let mut after = Vec::new();
        let mut middle = Vec::new();
        let mut inside = true;
        for k in start..common {
            let own = path[k];
            let mut above = Vec::new();
            for digit in ORDER.iter().copied() {
                if digit == own || !self.allowed(k, digit) {
                    continue;
                }
                let pointers = union(nodes.iter().flat_map(|node| node.trie.get(k, digit)));
                if pointers.is_empty() {
                    continue;
                }
                let frame = branch(&path[..k], digit, &pointers);
                if rank(digit) < rank(own) {
                    before.push(frame);
                } else {
                    above.push(frame);
                }
            }
            after.push(above);
            if !self.allowed(k, own) {
                inside = false;
                break;
            }
        }
        if inside {
            if common == path.len() {
                middle.push(Frame::Emit(nodes));
            } else {
                for digit in ORDER.iter().copied() {
                    if !self.allowed(common, digit) {
                        continue;
                    }
                    let pointers = union(
                        nodes
                            .iter()
                            .filter(|node| node.digit(common) == Some(digit))
                            .map(|node| node.pointer())
                            .chain(
                                nodes
                                    .iter()
                                    .flat_map(|node| node.trie.get(common, digit).iter().copied()),
                            ),
                    );
                    if !pointers.is_empty() {
                        middle.push(branch(&path[..common], digit, &pointers));
                    }
                }
            }
        }
        // the stack is popped from the end
        for frames in after {
            self.stack.extend(frames.into_iter().rev());
        }
        self.stack.extend(middle.into_iter().rev());
        self.stack.extend(before.into_iter().rev());
    }

    /// queue the groups for nodes sharing a path, including the keys colliding with them
    async fn emit(&mut self, nodes: Vec<Arc<Node>>) -> Result<()> {
        let mut all = nodes.clone();
        for node in nodes.iter() {
            if let Some(last) = node.path.len().checked_sub(1) {
                let collisions = node.trie.get(last, TERMINATE);
                if !collisions.is_empty() {
                    let db = self.snapshot.db();
                    all.extend(db.load_all(&self.request, collisions).await?);
                }
            }
        }
        let mut groups = BTreeMap::<String, Vec<Arc<Node>>>::new();
        for node in all {
            groups.entry(node.key.clone()).or_default().push(node);
        }
        for (_, mut group) in groups {
            retain_undominated(&mut group);
            if group.iter().all(|node| node.is_deleted()) {
                continue;
            }
            self.pending.push_back(group);
        }
        Ok(())
    }
}

/// distinct pointers, in order of appearance
fn union<P: Borrow<Pointer>>(pointers: impl IntoIterator<Item = P>) -> Vec<Pointer> {
    let mut result: Vec<Pointer> = Vec::new();
    for pointer in pointers {
        let pointer = *pointer.borrow();
        if !result.contains(&pointer) {
            result.push(pointer);
        }
    }
    result
}

/// frame for the subtree `base` followed by `digit`
fn branch(base: &[Digit], digit: Digit, pointers: &[Pointer]) -> Frame {
    if let [pointer] = pointers {
        Frame::Node {
            pointer: *pointer,
            i: base.len() + 1,
        }
    } else {
        let mut path = base.to_vec();
        path.push(digit);
        Frame::Prefix(path)
    }
}
