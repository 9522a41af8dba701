use crate::store::FeedKey;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Invalid: {}", .0)]
    Invalid(&'static str),

    #[error("Entry {}:{} could not be decoded: {}", .feed, .seq, .reason)]
    Decode {
        feed: FeedKey,
        seq: u64,
        reason: String,
    },

    #[error("Truncated trie encoding")]
    TruncatedTrie,

    #[error("Varint overflow")]
    VarintOverflow,

    #[error("Bucket too large to encode: {} pointers", .0)]
    TrieOverflow(usize),

    #[error("Missing dependency: {}", .0)]
    MissingDependency(String),

    #[error("Unknown writer index {} in entry {}:{}", .index, .feed, .seq)]
    UnknownWriter { feed: FeedKey, seq: u64, index: u64 },

    #[error("Log {} is read only", .0)]
    ReadOnly(FeedKey),

    #[error("Not there: {}:{}", .feed, .seq)]
    NotThere { feed: FeedKey, seq: u64 },
}
