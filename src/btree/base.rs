//! # Base Files (Superblocks)
//!
//! Each table keeps two alternating base files, `<name>.baseA` and
//! `<name>.baseB`. A base describes one committed revision of the tree:
//! which block is the root, how tall the tree is, how many entries it
//! holds, and a bitmap of every block the revision references.
//!
//! ## Alternation
//!
//! The slot for revision R is `R & 1` (even revisions in `baseA`), so a
//! commit always overwrites the base that is *not* live. A crash while
//! writing a base leaves the previous revision's base intact, and its
//! checksum distinguishes a torn write from a valid superblock.
//!
//! ## Layout
//!
//! ```text
//! Offset  Size  Description
//! 0       8     Magic "ChertBs1"
//! 8       4     Revision
//! 12      4     Root block number
//! 16      4     Tree levels (0 = root is a leaf)
//! 20      8     Entry count
//! 28      4     Block size
//! 32      4     Block count covered by the bitmap
//! 36      n     Used-block bitmap, (block_count + 7) / 8 bytes
//! 36+n    8     CRC-64/ECMA of everything above
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use crc::{Crc, CRC_64_ECMA_182};
use eyre::{ensure, Result, WrapErr};
use zerocopy::little_endian::{U32, U64};
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

const BASE_MAGIC: &[u8; 8] = b"ChertBs1";
const BASE_CRC: Crc<u64> = Crc::<u64>::new(&CRC_64_ECMA_182);

#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
#[repr(C)]
struct BaseHeader {
    magic: [u8; 8],
    revision: U32,
    root: U32,
    levels: U32,
    entry_count: U64,
    block_size: U32,
    block_count: U32,
}

/// Tracks which blocks one revision of a tree references.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Bitmap {
    bits: Vec<u8>,
    block_count: u32,
}

impl Bitmap {
    pub fn with_blocks(block_count: u32) -> Self {
        Bitmap {
            bits: vec![0u8; (block_count as usize + 7) / 8],
            block_count,
        }
    }

    pub fn block_count(&self) -> u32 {
        self.block_count
    }

    pub fn resize(&mut self, block_count: u32) {
        self.bits.resize((block_count as usize + 7) / 8, 0);
        self.block_count = self.block_count.max(block_count);
    }

    pub fn get(&self, block: u32) -> bool {
        if block >= self.block_count {
            return false;
        }
        self.bits[block as usize / 8] & (1 << (block % 8)) != 0
    }

    pub fn set(&mut self, block: u32) {
        if block >= self.block_count {
            self.resize(block + 1);
        }
        self.bits[block as usize / 8] |= 1 << (block % 8);
    }

    pub fn clear(&mut self, block: u32) {
        if block < self.block_count {
            self.bits[block as usize / 8] &= !(1 << (block % 8));
        }
    }

    /// First block below `block_count` clear in this bitmap and every
    /// one of `others`. The limit is passed in because the caller's
    /// block file may extend past what any bitmap has recorded yet.
    pub fn free_in_all(&self, others: &[&Bitmap], block_count: u32) -> Option<u32> {
        (0..block_count).find(|&b| !self.get(b) && others.iter().all(|other| !other.get(b)))
    }
}

/// One decoded base file.
#[derive(Debug, Clone)]
pub struct Base {
    pub revision: u32,
    pub root: u32,
    pub levels: u32,
    pub entry_count: u64,
    pub block_size: u32,
    pub bitmap: Bitmap,
}

impl Base {
    pub fn serialize(&self) -> Vec<u8> {
        let header = BaseHeader {
            magic: *BASE_MAGIC,
            revision: U32::new(self.revision),
            root: U32::new(self.root),
            levels: U32::new(self.levels),
            entry_count: U64::new(self.entry_count),
            block_size: U32::new(self.block_size),
            block_count: U32::new(self.bitmap.block_count),
        };
        let mut out = Vec::with_capacity(
            std::mem::size_of::<BaseHeader>() + self.bitmap.bits.len() + 8,
        );
        out.extend_from_slice(header.as_bytes());
        out.extend_from_slice(&self.bitmap.bits);
        let crc = BASE_CRC.checksum(&out);
        out.extend_from_slice(&crc.to_le_bytes());
        out
    }

    pub fn parse(bytes: &[u8]) -> Result<Self> {
        let header_size = std::mem::size_of::<BaseHeader>();
        ensure!(bytes.len() >= header_size + 8, "base file too short");

        let header = BaseHeader::ref_from_bytes(&bytes[..header_size])
            .map_err(|e| eyre::eyre!("failed to parse base header: {:?}", e))?;
        ensure!(&header.magic == BASE_MAGIC, "base file has wrong magic");

        let block_count = header.block_count.get();
        let bitmap_len = (block_count as usize + 7) / 8;
        ensure!(
            bytes.len() == header_size + bitmap_len + 8,
            "base file length {} does not match block count {}",
            bytes.len(),
            block_count
        );

        let body_len = header_size + bitmap_len;
        let expect = u64::from_le_bytes(
            bytes[body_len..body_len + 8].try_into().unwrap(), // INVARIANT: length validated above
        );
        let actual = BASE_CRC.checksum(&bytes[..body_len]);
        ensure!(expect == actual, "base file checksum mismatch");

        Ok(Base {
            revision: header.revision.get(),
            root: header.root.get(),
            levels: header.levels.get(),
            entry_count: header.entry_count.get(),
            block_size: header.block_size.get(),
            bitmap: Bitmap {
                bits: bytes[header_size..body_len].to_vec(),
                block_count,
            },
        })
    }

    /// Path of the base slot holding revision `revision` of `name`.
    pub fn slot_path(db_dir: &Path, name: &str, revision: u32) -> PathBuf {
        let suffix = if revision & 1 == 0 { "baseA" } else { "baseB" };
        db_dir.join(format!("{}.{}", name, suffix))
    }

    /// Writes this base into its revision's slot and syncs it.
    pub fn write_to_slot(&self, db_dir: &Path, name: &str) -> Result<()> {
        let path = Base::slot_path(db_dir, name, self.revision);
        let bytes = self.serialize();
        fs::write(&path, &bytes)
            .wrap_err_with(|| format!("failed to write base '{}'", path.display()))?;
        let file = fs::File::open(&path)
            .wrap_err_with(|| format!("failed to reopen base '{}'", path.display()))?;
        file.sync_all()
            .wrap_err_with(|| format!("failed to sync base '{}'", path.display()))?;
        Ok(())
    }

    /// Reads a base slot, returning `None` for a missing or torn file.
    pub fn read_slot(db_dir: &Path, name: &str, slot_even: bool) -> Option<Base> {
        let suffix = if slot_even { "baseA" } else { "baseB" };
        let path = db_dir.join(format!("{}.{}", name, suffix));
        let bytes = fs::read(path).ok()?;
        Base::parse(&bytes).ok()
    }
}
