//! The sparse trie every node carries
//!
//! For every position of its path, a node can store a bucket. A bucket has one slot per
//! digit, and each slot is a list of pointers to other nodes whose path agrees with ours up
//! to the position and continues with the slot's digit. It is a finger table built at write
//! time from what the author could see; an empty slot means nothing is known along that
//! branch.
//!
//! # Encoding
//!
//! The trie is encoded as a sequence of records, one per non-empty bucket, using unsigned
//! LEB128 varints:
//!
//! - the increase of the position since the previous record
//! - a bitfield, read from the least significant bit: for every digit, one set bit per
//!   pointer in the slot, followed by a clear bit
//! - for every pointer, in digit order, the local writer index and the sequence number
//!
//! Writer indices are local to the log the entry is stored in, so the caller supplies the
//! translation in both directions.
use crate::{
    error::Error,
    path::{Digit, DIGITS},
};
use anyhow::Result;
use smallvec::SmallVec;
use std::{collections::BTreeMap, convert::TryFrom};

/// Reference to a node, by writer id and position in that writer's log
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Pointer {
    pub feed: usize,
    pub seq: u64,
}

impl Pointer {
    pub fn new(feed: usize, seq: u64) -> Self {
        Self { feed, seq }
    }
}

/// pointers for a single digit
pub type Slot = SmallVec<[Pointer; 2]>;

/// the slots for all digits at one position
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Bucket([Slot; DIGITS]);

impl Bucket {
    pub fn get(&self, digit: Digit) -> &[Pointer] {
        self.0
            .get(digit as usize)
            .map(|slot| slot.as_slice())
            .unwrap_or_default()
    }

    /// add a pointer, unless it is already there. Returns true if it was added.
    pub fn insert(&mut self, digit: Digit, pointer: Pointer) -> bool {
        let slot = &mut self.0[digit as usize];
        if slot.contains(&pointer) {
            false
        } else {
            slot.push(pointer);
            true
        }
    }

    pub fn is_empty(&self) -> bool {
        self.0.iter().all(|slot| slot.is_empty())
    }

    /// non-empty slots in digit order
    pub fn slots(&self) -> impl Iterator<Item = (Digit, &[Pointer])> + '_ {
        self.0
            .iter()
            .enumerate()
            .filter(|(_, slot)| !slot.is_empty())
            .map(|(digit, slot)| (digit as Digit, slot.as_slice()))
    }

    fn count(&self) -> usize {
        self.0.iter().map(|slot| slot.len()).sum()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Trie(BTreeMap<usize, Bucket>);

impl Trie {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bucket(&self, position: usize) -> Option<&Bucket> {
        self.0.get(&position)
    }

    /// pointers at `position` for `digit`, empty if there are none
    pub fn get(&self, position: usize, digit: Digit) -> &[Pointer] {
        self.0
            .get(&position)
            .map(|bucket| bucket.get(digit))
            .unwrap_or_default()
    }

    pub fn insert(&mut self, position: usize, digit: Digit, pointer: Pointer) -> bool {
        self.0.entry(position).or_default().insert(digit, pointer)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// non-empty buckets in position order
    pub fn buckets(&self) -> impl Iterator<Item = (usize, &Bucket)> + '_ {
        self.0.iter().map(|(position, bucket)| (*position, bucket))
    }

    /// all pointers, in encoding order
    pub fn pointers(&self) -> impl Iterator<Item = &Pointer> + '_ {
        self.0
            .values()
            .flat_map(|bucket| bucket.0.iter().flat_map(|slot| slot.iter()))
    }

    /// total number of pointers
    pub fn count(&self) -> usize {
        self.0.values().map(Bucket::count).sum()
    }

    /// append the encoded trie to `out`, translating writer ids with `local`
    pub fn encode(
        &self,
        out: &mut Vec<u8>,
        mut local: impl FnMut(usize) -> Result<u64>,
    ) -> Result<()> {
        let mut previous = 0;
        for (position, bucket) in self.buckets() {
            if bucket.is_empty() {
                continue;
            }
            let count = bucket.count();
            // one bit per pointer plus one terminating bit per digit
            if count + DIGITS > 64 {
                return Err(Error::TrieOverflow(count).into());
            }
            let mut bits = 0u64;
            let mut bit = 0;
            for slot in bucket.0.iter() {
                for _ in slot.iter() {
                    bits |= 1u64 << bit;
                    bit += 1;
                }
                bit += 1;
            }
            write_varint((position - previous) as u64, out);
            write_varint(bits, out);
            for pointer in bucket.0.iter().flat_map(|slot| slot.iter()) {
                write_varint(local(pointer.feed)?, out);
                write_varint(pointer.seq, out);
            }
            previous = position;
        }
        Ok(())
    }

    /// decode a trie, translating local writer indices with `global`
    pub fn decode(
        mut data: &[u8],
        mut global: impl FnMut(u64) -> Result<usize>,
    ) -> Result<Self> {
        let mut trie = Trie::new();
        let mut position = 0usize;
        while !data.is_empty() {
            position = position
                .checked_add(usize::try_from(read_varint(&mut data)?)?)
                .ok_or(Error::VarintOverflow)?;
            let mut bits = read_varint(&mut data)?;
            let mut counts = [0usize; DIGITS];
            for count in counts.iter_mut() {
                while bits & 1 == 1 {
                    *count += 1;
                    bits >>= 1;
                }
                bits >>= 1;
            }
            if bits != 0 {
                return Err(Error::Invalid("trie bitfield has bits beyond the last digit").into());
            }
            let bucket = trie.0.entry(position).or_default();
            for (digit, count) in counts.iter().enumerate() {
                for _ in 0..*count {
                    let feed = global(read_varint(&mut data)?)?;
                    let seq = read_varint(&mut data)?;
                    bucket.insert(digit as Digit, Pointer::new(feed, seq));
                }
            }
        }
        Ok(trie)
    }
}

pub(crate) fn write_varint(mut value: u64, out: &mut Vec<u8>) {
    while value >= 0x80 {
        out.push((value as u8) | 0x80);
        value >>= 7;
    }
    out.push(value as u8);
}

pub(crate) fn read_varint(data: &mut &[u8]) -> Result<u64> {
    let mut result = 0u64;
    let mut shift = 0u32;
    loop {
        let (byte, rest) = data.split_first().ok_or(Error::TruncatedTrie)?;
        *data = rest;
        let low = u64::from(byte & 0x7f);
        if shift > 63 || (shift == 63 && low > 1) {
            return Err(Error::VarintOverflow.into());
        }
        result |= low << shift;
        if byte & 0x80 == 0 {
            return Ok(result);
        }
        shift += 7;
    }
}
