//! # Tree Nodes and Block Layout
//!
//! Every block starts with a 12-byte header; the cell area follows. The
//! node kinds share one header:
//!
//! ```text
//! Offset  Size  Description
//! 0       4     Revision that wrote this block
//! 4       1     Level: 0 = leaf, n > 0 = interior, 0xFF = overflow
//! 5       1     Reserved
//! 6       2     Cell count (chunk length for overflow blocks)
//! 8       2     Bytes used by the cell area
//! 10      2     Reserved
//! ```
//!
//! ## Cell Formats
//!
//! ```text
//! leaf cell      key_len u8 | key | kind u8 | payload
//!                kind 0: pack_uint(len) | value bytes       (inline)
//!                kind 1: pack_uint(total_len) | first_block u32 LE
//! interior cell  key_len u8 | key | child u32 LE
//! overflow body  next_block u32 LE | chunk bytes
//! ```
//!
//! Values larger than a quarter block move to an overflow chain so a
//! leaf always fits at least two cells, which keeps splits one-level.
//!
//! ## Interior Key Convention
//!
//! An interior node's first separator is always the empty key, standing
//! for "everything below the second separator". Child i covers keys in
//! `[key_i, key_{i+1})`. Descent picks the last separator `<=` the
//! search key.
//!
//! Nodes are edited as owned structures and re-serialized; the
//! copy-on-write flush path never mutates a committed block in place.

use eyre::{bail, ensure, Result};
use zerocopy::little_endian::{U16, U32};
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

use crate::config::BLOCK_HEADER_SIZE;
use crate::encoding::pack::{pack_uint, unpack_uint};

pub const LEVEL_LEAF: u8 = 0;
pub const LEVEL_OVERFLOW: u8 = 0xff;

/// Sentinel for "no block" in overflow chains.
pub const NIL_BLOCK: u32 = u32::MAX;

#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
#[repr(C)]
pub struct BlockHeader {
    pub revision: U32,
    pub level: u8,
    reserved: u8,
    pub count: U16,
    pub used: U16,
    reserved2: [u8; 2],
}

const _: () = assert!(std::mem::size_of::<BlockHeader>() == BLOCK_HEADER_SIZE);

impl BlockHeader {
    pub fn read(block: &[u8]) -> Result<&BlockHeader> {
        ensure!(block.len() >= BLOCK_HEADER_SIZE, "block shorter than header");
        BlockHeader::ref_from_bytes(&block[..BLOCK_HEADER_SIZE])
            .map_err(|e| eyre::eyre!("failed to parse block header: {:?}", e))
    }
}

/// Inline threshold: values above this go to an overflow chain.
pub fn max_inline_value(block_size: usize) -> usize {
    block_size / 4
}

/// Usable bytes per overflow block.
pub fn overflow_capacity(block_size: usize) -> usize {
    block_size - BLOCK_HEADER_SIZE - 4
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    Inline(Vec<u8>),
    Overflow { total_len: u64, first_block: u32 },
    Child(u32),
}

#[derive(Debug, Clone)]
pub struct Node {
    pub level: u8,
    pub entries: Vec<(Vec<u8>, Payload)>,
}

impl Node {
    pub fn empty_leaf() -> Node {
        Node {
            level: LEVEL_LEAF,
            entries: Vec::new(),
        }
    }

    pub fn is_leaf(&self) -> bool {
        self.level == LEVEL_LEAF
    }

    fn cell_size(key: &[u8], payload: &Payload) -> usize {
        let base = 1 + key.len();
        match payload {
            Payload::Inline(v) => {
                let mut len_buf = Vec::with_capacity(10);
                pack_uint(&mut len_buf, v.len() as u64);
                base + 1 + len_buf.len() + v.len()
            }
            Payload::Overflow { total_len, .. } => {
                let mut len_buf = Vec::with_capacity(10);
                pack_uint(&mut len_buf, *total_len);
                base + 1 + len_buf.len() + 4
            }
            Payload::Child(_) => base + 4,
        }
    }

    /// Serialized size including the block header.
    pub fn serialized_size(&self) -> usize {
        BLOCK_HEADER_SIZE
            + self
                .entries
                .iter()
                .map(|(k, p)| Node::cell_size(k, p))
                .sum::<usize>()
    }

    pub fn fits(&self, block_size: usize) -> bool {
        self.serialized_size() <= block_size
    }

    /// Writes the node into `block`, stamping `revision`.
    pub fn serialize_into(&self, block: &mut [u8], revision: u32) -> Result<()> {
        let size = self.serialized_size();
        ensure!(size <= block.len(), "node does not fit its block");
        ensure!(self.entries.len() <= u16::MAX as usize, "too many cells");

        block.fill(0);
        let header = BlockHeader {
            revision: U32::new(revision),
            level: self.level,
            reserved: 0,
            count: U16::new(self.entries.len() as u16),
            used: U16::new((size - BLOCK_HEADER_SIZE) as u16),
            reserved2: [0; 2],
        };
        block[..BLOCK_HEADER_SIZE].copy_from_slice(header.as_bytes());

        let mut at = BLOCK_HEADER_SIZE;
        for (key, payload) in &self.entries {
            block[at] = key.len() as u8;
            at += 1;
            block[at..at + key.len()].copy_from_slice(key);
            at += key.len();
            match payload {
                Payload::Inline(v) => {
                    block[at] = 0;
                    at += 1;
                    let mut len_buf = Vec::with_capacity(10);
                    pack_uint(&mut len_buf, v.len() as u64);
                    block[at..at + len_buf.len()].copy_from_slice(&len_buf);
                    at += len_buf.len();
                    block[at..at + v.len()].copy_from_slice(v);
                    at += v.len();
                }
                Payload::Overflow {
                    total_len,
                    first_block,
                } => {
                    block[at] = 1;
                    at += 1;
                    let mut len_buf = Vec::with_capacity(10);
                    pack_uint(&mut len_buf, *total_len);
                    block[at..at + len_buf.len()].copy_from_slice(&len_buf);
                    at += len_buf.len();
                    block[at..at + 4].copy_from_slice(&first_block.to_le_bytes());
                    at += 4;
                }
                Payload::Child(child) => {
                    block[at..at + 4].copy_from_slice(&child.to_le_bytes());
                    at += 4;
                }
            }
        }
        debug_assert_eq!(at, size);
        Ok(())
    }

    pub fn parse(block: &[u8]) -> Result<Node> {
        let header = BlockHeader::read(block)?;
        let level = header.level;
        ensure!(level != LEVEL_OVERFLOW, "tree descent reached an overflow block");
        let count = header.count.get() as usize;

        let mut entries = Vec::with_capacity(count);
        let mut at = BLOCK_HEADER_SIZE;
        for _ in 0..count {
            ensure!(at < block.len(), "cell area truncated");
            let key_len = block[at] as usize;
            at += 1;
            ensure!(at + key_len <= block.len(), "cell key truncated");
            let key = block[at..at + key_len].to_vec();
            at += key_len;

            let payload = if level == LEVEL_LEAF {
                ensure!(at < block.len(), "cell kind truncated");
                let kind = block[at];
                at += 1;
                let (len, used) = unpack_uint(&block[at..])?;
                at += used;
                match kind {
                    0 => {
                        let len = len as usize;
                        ensure!(at + len <= block.len(), "inline value truncated");
                        let value = block[at..at + len].to_vec();
                        at += len;
                        Payload::Inline(value)
                    }
                    1 => {
                        ensure!(at + 4 <= block.len(), "overflow pointer truncated");
                        let first_block =
                            u32::from_le_bytes(block[at..at + 4].try_into().unwrap()); // INVARIANT: bounds checked above
                        at += 4;
                        Payload::Overflow {
                            total_len: len,
                            first_block,
                        }
                    }
                    other => bail!("unknown leaf cell kind {}", other),
                }
            } else {
                ensure!(at + 4 <= block.len(), "child pointer truncated");
                let child = u32::from_le_bytes(block[at..at + 4].try_into().unwrap()); // INVARIANT: bounds checked above
                at += 4;
                Payload::Child(child)
            };
            entries.push((key, payload));
        }

        Ok(Node { level, entries })
    }

    /// Index of the entry with exactly `key`, or the insertion point.
    pub fn find(&self, key: &[u8]) -> std::result::Result<usize, usize> {
        self.entries.binary_search_by(|(k, _)| k.as_slice().cmp(key))
    }

    /// Child index covering `key` in an interior node.
    pub fn find_child(&self, key: &[u8]) -> usize {
        debug_assert!(!self.is_leaf());
        debug_assert!(!self.entries.is_empty());
        // Last separator <= key; separator 0 is the empty key.
        self.entries.partition_point(|(k, _)| k.as_slice() <= key) - 1
    }

    pub fn child_at(&self, idx: usize) -> Result<u32> {
        match self.entries.get(idx) {
            Some((_, Payload::Child(c))) => Ok(*c),
            _ => bail!("interior node entry {} has no child pointer", idx),
        }
    }

    /// Splits into two nodes of roughly equal byte weight. Returns the
    /// right node and its separator key; `self` keeps the left half.
    pub fn split(&mut self) -> (Vec<u8>, Node) {
        debug_assert!(self.entries.len() >= 2);
        let total: usize = self
            .entries
            .iter()
            .map(|(k, p)| Node::cell_size(k, p))
            .sum();
        let mut acc = 0;
        let mut split_at = self.entries.len() - 1;
        for (i, (k, p)) in self.entries.iter().enumerate() {
            acc += Node::cell_size(k, p);
            if acc * 2 >= total && i + 1 < self.entries.len() {
                split_at = i + 1;
                break;
            }
        }
        let mut right_entries = self.entries.split_off(split_at);
        let separator = right_entries[0].0.clone();
        if self.level != LEVEL_LEAF {
            // The promoted separator moves up; the right node's first
            // child covers everything below the next separator.
            right_entries[0].0 = Vec::new();
        }
        (
            separator,
            Node {
                level: self.level,
                entries: right_entries,
            },
        )
    }
}

/// Reads an overflow block's next pointer and chunk.
pub fn parse_overflow(block: &[u8]) -> Result<(u32, &[u8])> {
    let header = BlockHeader::read(block)?;
    ensure!(
        header.level == LEVEL_OVERFLOW,
        "expected overflow block, found level {}",
        header.level
    );
    let chunk_len = header.used.get() as usize;
    let start = BLOCK_HEADER_SIZE + 4;
    ensure!(start + chunk_len <= block.len(), "overflow chunk truncated");
    let next = u32::from_le_bytes(
        block[BLOCK_HEADER_SIZE..BLOCK_HEADER_SIZE + 4].try_into().unwrap(), // INVARIANT: header bounds checked
    );
    Ok((next, &block[start..start + chunk_len]))
}

/// Writes one overflow block in place.
pub fn write_overflow(block: &mut [u8], revision: u32, next: u32, chunk: &[u8]) -> Result<()> {
    ensure!(
        BLOCK_HEADER_SIZE + 4 + chunk.len() <= block.len(),
        "overflow chunk too large for block"
    );
    block.fill(0);
    let header = BlockHeader {
        revision: U32::new(revision),
        level: LEVEL_OVERFLOW,
        reserved: 0,
        count: U16::new(0),
        used: U16::new(chunk.len() as u16),
        reserved2: [0; 2],
    };
    block[..BLOCK_HEADER_SIZE].copy_from_slice(header.as_bytes());
    block[BLOCK_HEADER_SIZE..BLOCK_HEADER_SIZE + 4].copy_from_slice(&next.to_le_bytes());
    block[BLOCK_HEADER_SIZE + 4..BLOCK_HEADER_SIZE + 4 + chunk.len()].copy_from_slice(chunk);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BLOCK_SIZE;

    #[test]
    fn leaf_roundtrip_inline_values() {
        let mut node = Node::empty_leaf();
        node.entries.push((b"alpha".to_vec(), Payload::Inline(b"1".to_vec())));
        node.entries.push((b"beta".to_vec(), Payload::Inline(vec![0xab; 300])));
        node.entries.push((Vec::new(), Payload::Inline(Vec::new())));
        node.entries.sort_by(|a, b| a.0.cmp(&b.0));

        let mut block = vec![0u8; BLOCK_SIZE];
        node.serialize_into(&mut block, 9).unwrap();

        let header = BlockHeader::read(&block).unwrap();
        assert_eq!(header.revision.get(), 9);
        assert_eq!(header.level, LEVEL_LEAF);

        let parsed = Node::parse(&block).unwrap();
        assert_eq!(parsed.entries, node.entries);
    }

    #[test]
    fn interior_roundtrip() {
        let node = Node {
            level: 1,
            entries: vec![
                (Vec::new(), Payload::Child(3)),
                (b"m".to_vec(), Payload::Child(7)),
                (b"t".to_vec(), Payload::Child(12)),
            ],
        };
        let mut block = vec![0u8; BLOCK_SIZE];
        node.serialize_into(&mut block, 2).unwrap();
        let parsed = Node::parse(&block).unwrap();
        assert_eq!(parsed.level, 1);
        assert_eq!(parsed.entries, node.entries);
    }

    #[test]
    fn find_child_picks_covering_subtree() {
        let node = Node {
            level: 1,
            entries: vec![
                (Vec::new(), Payload::Child(3)),
                (b"m".to_vec(), Payload::Child(7)),
                (b"t".to_vec(), Payload::Child(12)),
            ],
        };
        assert_eq!(node.find_child(b"a"), 0);
        assert_eq!(node.find_child(b"m"), 1);
        assert_eq!(node.find_child(b"s"), 1);
        assert_eq!(node.find_child(b"t"), 2);
        assert_eq!(node.find_child(b"zz"), 2);
        assert_eq!(node.find_child(b""), 0);
    }

    #[test]
    fn split_balances_and_promotes_separator() {
        let mut node = Node::empty_leaf();
        for i in 0..20u8 {
            node.entries
                .push((vec![b'a' + i], Payload::Inline(vec![i; 100])));
        }
        let (separator, right) = node.split();
        assert!(!node.entries.is_empty());
        assert!(!right.entries.is_empty());
        assert_eq!(separator, right.entries[0].0);
        assert!(node.entries.last().unwrap().0 < separator);
    }

    #[test]
    fn interior_split_blanks_right_first_key() {
        let mut node = Node {
            level: 1,
            entries: (0..10u8)
                .map(|i| {
                    let key = if i == 0 { Vec::new() } else { vec![b'a' + i] };
                    (key, Payload::Child(i as u32))
                })
                .collect(),
        };
        let (separator, right) = node.split();
        assert!(!separator.is_empty());
        assert!(right.entries[0].0.is_empty());
    }

    #[test]
    fn overflow_block_roundtrip() {
        let mut block = vec![0u8; BLOCK_SIZE];
        let chunk = vec![0x5au8; 1000];
        write_overflow(&mut block, 4, 77, &chunk).unwrap();
        let (next, data) = parse_overflow(&block).unwrap();
        assert_eq!(next, 77);
        assert_eq!(data, &chunk[..]);
    }

    #[test]
    fn parse_rejects_overflow_in_descent() {
        let mut block = vec![0u8; BLOCK_SIZE];
        write_overflow(&mut block, 4, NIL_BLOCK, b"x").unwrap();
        assert!(Node::parse(&block).is_err());
    }
}
