use futures::prelude::*;
use hashtrie::{
    path::{compare, components},
    Config, IterOptions, PathMode,
};
use quickcheck::TestResult;
use std::collections::BTreeSet;

mod common;
use common::{init_logging, keys, test, values, Peer};

fn key(x: u8, y: u8) -> String {
    format!("{}/{}", x % 4, y)
}

fn lexint_sorted(keys: impl IntoIterator<Item = String>) -> Vec<String> {
    let mut keys = keys.into_iter().collect::<Vec<_>>();
    keys.sort_by(|a, b| components(a).cmp(&components(b)));
    keys.dedup();
    keys
}

#[quickcheck_async::tokio]
async fn lexint_order_is_key_order(xs: Vec<(u8, u8)>) -> TestResult {
    test(|| async {
        let peer = Peer::new("a", Config::lexint())?;
        for (x, y) in xs.iter() {
            peer.db.put(&key(*x, *y), "").await?;
        }
        let expected = lexint_sorted(xs.iter().map(|(x, y)| key(*x, *y)));
        let listed = keys(&peer.db.list("", IterOptions::default()).await?);
        Ok(listed == expected)
    })
    .await
}

#[quickcheck_async::tokio]
async fn hash_order_is_path_order(xs: Vec<(u8, u8)>) -> TestResult {
    test(|| async {
        let peer = Peer::new("a", Config::debug())?;
        for (x, y) in xs.iter() {
            peer.db.put(&key(*x, *y), "").await?;
        }
        let mut expected = xs
            .iter()
            .map(|(x, y)| key(*x, *y))
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect::<Vec<_>>();
        expected.sort_by(|a, b| {
            compare(
                &PathMode::Hash.path(a, true),
                &PathMode::Hash.path(b, true),
            )
        });
        let listed = keys(&peer.db.list("", IterOptions::default()).await?);
        Ok(listed == expected)
    })
    .await
}

#[quickcheck_async::tokio]
async fn merged_writers_iterate_in_order(xs: Vec<(u8, u8)>, ys: Vec<(u8, u8)>) -> TestResult {
    test(|| async {
        let a = Peer::new("a", Config::lexint())?;
        let b = Peer::new("b", Config::lexint())?;
        for (x, y) in xs.iter() {
            a.db.put(&key(*x, *y), "a").await?;
        }
        for (x, y) in ys.iter() {
            b.db.put(&key(*x, *y), "b").await?;
        }
        a.pull(&b)?;
        let expected = lexint_sorted(xs.iter().chain(ys.iter()).map(|(x, y)| key(*x, *y)));
        let listed = a.db.list("", IterOptions::default()).await?;
        if keys(&listed) != expected {
            return Ok(false);
        }
        // a key written by both shows up as a single group with both values
        for group in listed.iter() {
            let k = &group[0].key;
            let mut want = Vec::new();
            if xs.iter().any(|(x, y)| &key(*x, *y) == k) {
                want.push("a");
            }
            if ys.iter().any(|(x, y)| &key(*x, *y) == k) {
                want.push("b");
            }
            if values(group) != want {
                return Ok(false);
            }
        }
        Ok(true)
    })
    .await
}

async fn tree() -> anyhow::Result<Peer> {
    let peer = Peer::new("a", Config::lexint())?;
    for key in ["a", "a/b", "a/c", "a/b/d", "ab", "b"].iter() {
        peer.db.put(key, *key).await?;
    }
    Ok(peer)
}

#[tokio::test]
async fn prefix_and_options() -> anyhow::Result<()> {
    init_logging();
    let peer = tree().await?;
    let db = &peer.db;
    let list = |prefix: &'static str, recursive: bool, gt: bool| async move {
        let options = IterOptions { recursive, gt };
        db.list(prefix, options).await.map(|groups| keys(&groups))
    };
    assert_eq!(list("a", true, false).await?, vec!["a", "a/b", "a/b/d", "a/c"]);
    assert_eq!(list("a", false, false).await?, vec!["a", "a/b", "a/c"]);
    assert_eq!(list("a", true, true).await?, vec!["a/b", "a/b/d", "a/c"]);
    assert_eq!(list("a", false, true).await?, vec!["a/b", "a/c"]);
    assert_eq!(list("/a/b", true, false).await?, vec!["a/b", "a/b/d"]);
    assert_eq!(list("", false, false).await?, vec!["a", "ab", "b"]);
    assert_eq!(list("", true, false).await?.len(), 6);
    assert!(list("c", true, false).await?.is_empty());
    assert!(list("a/b/d/e", true, false).await?.is_empty());
    Ok(())
}

#[tokio::test]
async fn deleted_keys_are_skipped() -> anyhow::Result<()> {
    let peer = tree().await?;
    let db = &peer.db;
    db.del("a/b").await?;
    db.del("ab").await?;
    let listed = keys(&db.list("", IterOptions::default()).await?);
    assert_eq!(listed, vec!["a", "a/b/d", "a/c", "b"]);
    Ok(())
}

#[tokio::test]
async fn stream() -> anyhow::Result<()> {
    let peer = tree().await?;
    let snapshot = peer.db.snapshot().await?;
    // writes after the snapshot are not visible to it
    peer.db.put("a/e", "a/e").await?;
    let groups = snapshot
        .iter("a", IterOptions::default())
        .into_stream()
        .try_collect::<Vec<_>>()
        .await?;
    assert_eq!(keys(&groups), vec!["a", "a/b", "a/b/d", "a/c"]);
    assert_eq!(values(&groups[1]), vec!["a/b"]);
    let first = peer
        .db
        .snapshot()
        .await?
        .iter("a", IterOptions::default())
        .into_stream()
        .map_ok(|group| group[0].key.clone())
        .take(2)
        .try_collect::<Vec<_>>()
        .await?;
    assert_eq!(first, vec!["a", "a/b"]);
    Ok(())
}
