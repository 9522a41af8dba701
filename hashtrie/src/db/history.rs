//! all nodes of all writers, in an order consistent with causality
use super::Db;
use crate::{
    error::Error,
    node::{Clock, Node},
    trie::Pointer,
};
use anyhow::Result;
use futures::{future::join_all, prelude::*};
use std::sync::Arc;

/// Causally ordered traversal of all logs.
///
/// Keeps one frontier per writer. A node at a frontier is ready once every entry its clock
/// reports has been yielded or lies below the starting clock. Of the ready nodes, the one
/// with the smallest clock sum comes first, ties broken by writer id.
pub struct History {
    db: Db,
    /// next seq to yield, per writer id
    frontier: Vec<u64>,
    start: Clock,
}

impl History {
    pub(crate) fn new(db: Db, start: Clock) -> Self {
        Self {
            db,
            frontier: Vec::new(),
            start,
        }
    }

    /// the clock of everything yielded so far, including the starting clock
    pub fn clock(&self) -> Clock {
        self.frontier.iter().copied().collect()
    }

    pub async fn next(&mut self) -> Result<Option<Arc<Node>>> {
        loop {
            let writers = self.db.writers();
            while self.frontier.len() < writers.len() {
                let id = self.frontier.len();
                self.frontier.push(self.start.get(id));
            }
            let candidates = writers
                .iter()
                .filter(|writer| self.frontier[writer.id()] < writer.len())
                .map(|writer| {
                    self.db
                        .load(Pointer::new(writer.id(), self.frontier[writer.id()]))
                })
                .collect::<Vec<_>>();
            if candidates.is_empty() {
                return Ok(None);
            }
            let candidates = join_all(candidates)
                .await
                .into_iter()
                .collect::<Result<Vec<_>>>()?;
            if self.db.writer_count() != writers.len() {
                // decoding found new writers, which might have to come first
                continue;
            }
            let frontier = &self.frontier;
            let ready = |node: &Arc<Node>| {
                node.clock.iter().all(|(id, count)| {
                    id == node.feed || count <= frontier.get(id).copied().unwrap_or_default()
                })
            };
            let next = candidates
                .into_iter()
                .filter(ready)
                .min_by_key(|node| (node.clock.sum(), node.feed));
            return match next {
                Some(node) => {
                    self.frontier[node.feed] += 1;
                    Ok(Some(node))
                }
                None => Err(Error::MissingDependency(format!(
                    "no entry is ready at frontier {:?}",
                    self.frontier
                ))
                .into()),
            };
        }
    }

    pub fn into_stream(self) -> impl Stream<Item = Result<Arc<Node>>> + Send + 'static {
        stream::unfold(self, |mut history| async move {
            history
                .next()
                .await
                .transpose()
                .map(|result| (result, history))
        })
    }
}
