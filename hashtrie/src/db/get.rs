//! point lookups
//!
//! Every head starts a worker that walks down the path of the target. A worker does not
//! need to fetch anything as long as the digits of its current node agree with the target.
//! Where they differ, the node's trie tells which nodes continue along the target path.
use super::{retain_undominated, Db, Request};
use crate::{
    node::Node,
    path::{Digit, SEPARATE, TERMINATE},
};
use anyhow::Result;
use futures::{
    future::{join_all, BoxFuture},
    prelude::*,
};
use std::sync::Arc;

#[derive(Debug, Clone, Copy)]
enum Target<'a> {
    /// exactly this key
    Key(&'a str),
    /// any key starting with this string
    Under(&'a str),
    /// any node whose path starts with the request path
    Path,
}

struct GetRequest<'a> {
    path: Vec<Digit>,
    target: Target<'a>,
    request: Request,
}

impl<'a> GetRequest<'a> {
    fn matches(&self, node: &Node) -> bool {
        match self.target {
            Target::Key(key) => node.key == key,
            Target::Under(prefix) => node.key.starts_with(prefix),
            Target::Path => true,
        }
    }
}

impl Db {
    /// all nodes for exactly `key`, tombstones included
    pub(crate) async fn get_key(&self, heads: &[Arc<Node>], key: &str) -> Result<Vec<Arc<Node>>> {
        let path = self.path(key, true);
        self.get0(heads, path, Target::Key(key)).await
    }

    /// nodes whose key starts with `prefix`, tombstones included
    pub(crate) async fn get_under(
        &self,
        heads: &[Arc<Node>],
        prefix: &str,
    ) -> Result<Vec<Arc<Node>>> {
        let mut path = self.path(prefix, false);
        if prefix.ends_with('/') && !path.is_empty() {
            // only keys continuing with another component can match
            path.push(SEPARATE);
        }
        self.get0(heads, path, Target::Under(prefix)).await
    }

    /// nodes whose path starts with `path`, at most one per subtree a head knows about
    pub(crate) async fn get_path(
        &self,
        heads: &[Arc<Node>],
        path: &[Digit],
    ) -> Result<Vec<Arc<Node>>> {
        self.get0(heads, path.to_vec(), Target::Path).await
    }

    async fn get0(
        &self,
        heads: &[Arc<Node>],
        path: Vec<Digit>,
        target: Target<'_>,
    ) -> Result<Vec<Arc<Node>>> {
        let request = GetRequest {
            path,
            target,
            request: Request::default(),
        };
        let workers = heads
            .iter()
            .map(|head| self.get_worker(&request, 0, head.clone()));
        let results = join_all(workers).await;
        let mut nodes = request.request.join(results)?;
        retain_undominated(&mut nodes);
        tracing::trace!("get {:?} found {} nodes", request.target, nodes.len());
        Ok(nodes)
    }

    fn get_worker<'a>(
        &'a self,
        request: &'a GetRequest<'a>,
        mut i: usize,
        mut node: Arc<Node>,
    ) -> BoxFuture<'a, Result<Vec<Arc<Node>>>> {
        async move {
            let path = &request.path;
            while i < path.len() {
                let digit = path[i];
                if node.digit(i) == Some(digit) {
                    i += 1;
                    continue;
                }
                let pointers = node.trie.get(i, digit);
                let mut next = self.load_siblings(&request.request, pointers).await?;
                match next.len() {
                    0 => return Ok(Vec::new()),
                    1 => {
                        node = next.remove(0);
                        i += 1;
                    }
                    _ => {
                        let workers = next
                            .into_iter()
                            .map(|node| self.get_worker(request, i + 1, node));
                        let results = join_all(workers).await;
                        return request.request.join(results);
                    }
                }
            }
            let mut found = Vec::new();
            if request.matches(&node) {
                found.push(node.clone());
            }
            if let Target::Key(key) = request.target {
                // keys with the same path as ours
                let collisions = node.trie.get(path.len() - 1, TERMINATE);
                if !collisions.is_empty() {
                    let nodes = self.load_all(&request.request, collisions).await?;
                    found.extend(nodes.into_iter().filter(|node| node.key == key));
                }
            }
            Ok(found)
        }
        .boxed()
    }
}
