use super::Db;
use crate::{node::Node, trie::Pointer};
use anyhow::Result;
use futures::future::join_all;
use std::sync::Arc;

/// sort by pointer, drop duplicates and nodes dominated by another node of the set
pub(crate) fn retain_undominated(nodes: &mut Vec<Arc<Node>>) {
    nodes.sort_by_key(|node| node.pointer());
    nodes.dedup_by_key(|node| node.pointer());
    let dominated = nodes
        .iter()
        .map(|node| nodes.iter().any(|other| other.dominates(node)))
        .collect::<Vec<_>>();
    let mut dominated = dominated.into_iter();
    nodes.retain(|_| !dominated.next().unwrap_or_default());
}

impl Db {
    /// the latest entries of all writers that no other latest entry has seen
    ///
    /// Decoding a head can make new writers known, in which case the heads are computed again.
    pub async fn heads(&self) -> Result<Vec<Arc<Node>>> {
        loop {
            let writers = self.writers();
            let latest = writers
                .iter()
                .filter(|writer| !writer.is_empty())
                .map(|writer| self.load(Pointer::new(writer.id(), writer.len() - 1)));
            let mut heads = join_all(latest)
                .await
                .into_iter()
                .collect::<Result<Vec<_>>>()?;
            if self.writer_count() != writers.len() {
                tracing::debug!("writers discovered while computing heads");
                continue;
            }
            retain_undominated(&mut heads);
            return Ok(heads);
        }
    }
}
