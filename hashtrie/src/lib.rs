//! # Hash tries over append-only logs
//!
//! A key value store for many writers that never coordinate. Every writer appends to its own
//! log, and every entry in a log is a *node*: a single put or delete of a key.
//!
//! ## Paths
//!
//! Keys are slash-delimited strings. Each key is turned into a *path* of base-4 digits, by
//! hashing each component of the key with SipHash-2-4 (or, in lexint mode, by using the raw
//! bytes of each component). Two control digits mark the boundary between components and
//! the end of a key.
//!
//! ## Tries
//!
//! Every node carries a sparse trie: for each position of its path, pointers to the nodes
//! branching off at that position, as far as its author knew them. Starting from any node,
//! every other key its author knew about can be found by following these pointers. Most of
//! the time, a lookup does not have to fetch anything as long as the path of the current
//! node agrees with the path of the key.
//!
//! ## Causality
//!
//! Every node has a vector clock that tells how many entries of every writer its author had
//! seen. The latest entries of all writers that no other latest entry has seen are the
//! *heads*. Reads start from the heads. Writes merge the knowledge of all heads into the new
//! node. Concurrent writes to the same key are not resolved, but returned as a set of nodes.
//!
//! ## Storage
//!
//! The logs themselves are behind the [Log](store::Log) trait. Replication and durability
//! are up to the implementation. [MemLog](store::MemLog) is an in-memory implementation
//! mostly useful for tests.
// The `DagCbor` derive of libipld 0.14 generates code that relies on never type fallback.
#![allow(dependency_on_unit_never_type_fallback)]
pub mod db;
pub mod error;
pub mod node;
pub mod path;
pub mod store;
pub mod trie;
pub mod writer;

pub use db::{
    BatchOp, Config, Db, Diff, DiffEntry, GetOptions, History, Iter, IterOptions, Snapshot,
    Version,
};
pub use error::Error;
pub use node::{Clock, Node};
pub use path::PathMode;
pub use trie::Pointer;

/// register the prometheus metrics of this crate
#[cfg(feature = "metrics")]
pub fn register_metrics(registry: &prometheus::Registry) -> anyhow::Result<()> {
    db::register(registry)
}

#[cfg(test)]
extern crate quickcheck;
#[cfg(test)]
#[macro_use(quickcheck)]
extern crate quickcheck_macros;
