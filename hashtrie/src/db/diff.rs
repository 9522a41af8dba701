use super::Iter;
use crate::{node::Node, path::compare};
use anyhow::Result;
use futures::prelude::*;
use std::{cmp::Ordering, sync::Arc};

/// A difference between two snapshots, for a single key
#[derive(Debug, Clone)]
pub enum DiffEntry {
    /// the key only exists on the left
    Left(Vec<Arc<Node>>),
    /// the key only exists on the right
    Right(Vec<Arc<Node>>),
    /// the key exists on both sides, but with different nodes
    Changed {
        left: Vec<Arc<Node>>,
        right: Vec<Arc<Node>>,
    },
}

impl DiffEntry {
    pub fn key(&self) -> &str {
        match self {
            Self::Left(nodes) | Self::Right(nodes) => &nodes[0].key,
            Self::Changed { left, .. } => &left[0].key,
        }
    }

    pub fn left(&self) -> &[Arc<Node>] {
        match self {
            Self::Left(nodes) | Self::Changed { left: nodes, .. } => nodes.as_slice(),
            Self::Right(_) => &[],
        }
    }

    pub fn right(&self) -> &[Arc<Node>] {
        match self {
            Self::Right(nodes) | Self::Changed { right: nodes, .. } => nodes.as_slice(),
            Self::Left(_) => &[],
        }
    }
}

/// Merges two iterators over the same prefix, pulling from each only as needed
pub struct Diff {
    left: Iter,
    right: Iter,
    left_next: Option<Vec<Arc<Node>>>,
    right_next: Option<Vec<Arc<Node>>>,
    left_done: bool,
    right_done: bool,
}

fn same_nodes(a: &[Arc<Node>], b: &[Arc<Node>]) -> bool {
    a.len() == b.len() && a.iter().all(|x| b.iter().any(|y| x.pointer() == y.pointer()))
}

fn order(a: &Node, b: &Node) -> Ordering {
    compare(&a.path, &b.path).then_with(|| a.key.cmp(&b.key))
}

impl Diff {
    pub(crate) fn new(left: Iter, right: Iter) -> Self {
        Self {
            left,
            right,
            left_next: None,
            right_next: None,
            left_done: false,
            right_done: false,
        }
    }

    pub async fn next(&mut self) -> Result<Option<DiffEntry>> {
        loop {
            if self.left_next.is_none() && !self.left_done {
                self.left_next = self.left.next().await?;
                self.left_done = self.left_next.is_none();
            }
            if self.right_next.is_none() && !self.right_done {
                self.right_next = self.right.next().await?;
                self.right_done = self.right_next.is_none();
            }
            let (left, right) = match (self.left_next.take(), self.right_next.take()) {
                (None, None) => return Ok(None),
                (Some(left), None) => return Ok(Some(DiffEntry::Left(left))),
                (None, Some(right)) => return Ok(Some(DiffEntry::Right(right))),
                (Some(left), Some(right)) => (left, right),
            };
            match order(&left[0], &right[0]) {
                Ordering::Less => {
                    self.right_next = Some(right);
                    return Ok(Some(DiffEntry::Left(left)));
                }
                Ordering::Greater => {
                    self.left_next = Some(left);
                    return Ok(Some(DiffEntry::Right(right)));
                }
                Ordering::Equal if same_nodes(&left, &right) => continue,
                Ordering::Equal => return Ok(Some(DiffEntry::Changed { left, right })),
            }
        }
    }

    pub fn into_stream(self) -> impl Stream<Item = Result<DiffEntry>> + Send + 'static {
        stream::unfold(self, |mut diff| async move {
            diff.next().await.transpose().map(|result| (result, diff))
        })
    }
}
