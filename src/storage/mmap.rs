//! # Memory-Mapped Block Storage
//!
//! `BlockStorage` maps a table's `.DB` file into the address space and
//! hands out block-sized slices. The file is always a whole number of
//! blocks; `grow()` extends the file and remaps. Readers map the file
//! read-only; only the writer (serialized by the database lock) opens
//! read-write.
//!
//! ## Safety Considerations
//!
//! A memory-mapped region becomes invalid when the file is remapped.
//! Rather than runtime guards, the borrow checker enforces safety:
//!
//! ```text
//! block(&self, n) -> &[u8]          // immutable borrow
//! block_mut(&mut self, n) -> &mut [u8]
//! grow(&mut self, n)                // exclusive borrow, remaps
//! ```
//!
//! No block reference can be held across `grow()` at compile time.
//!
//! ## Durability
//!
//! Writes through `block_mut` land in the shared mapping; `sync()` runs
//! `msync` so the blocks are on disk before a superblock referencing
//! them is installed.

use std::fs::{File, OpenOptions};
use std::path::Path;

use eyre::{bail, ensure, Result, WrapErr};
use memmap2::{Mmap, MmapMut};

#[derive(Debug)]
enum Mapping {
    ReadOnly(Mmap),
    ReadWrite(MmapMut),
}

impl Mapping {
    fn as_slice(&self) -> &[u8] {
        match self {
            Mapping::ReadOnly(m) => m,
            Mapping::ReadWrite(m) => m,
        }
    }
}

#[derive(Debug)]
pub struct BlockStorage {
    file: File,
    mapping: Mapping,
    block_size: usize,
    block_count: u32,
}

impl BlockStorage {
    pub fn open<P: AsRef<Path>>(path: P, block_size: usize, readonly: bool) -> Result<Self> {
        let path = path.as_ref();
        ensure!(block_size > 0, "block size must be positive");

        let file = OpenOptions::new()
            .read(true)
            .write(!readonly)
            .open(path)
            .wrap_err_with(|| format!("failed to open block file '{}'", path.display()))?;

        let file_size = file
            .metadata()
            .wrap_err_with(|| format!("failed to stat '{}'", path.display()))?
            .len();

        ensure!(
            file_size > 0 && file_size % block_size as u64 == 0,
            "block file '{}' size {} is not a positive multiple of {}",
            path.display(),
            file_size,
            block_size
        );

        let block_count = (file_size / block_size as u64) as u32;
        let mapping = Self::map(&file, readonly, path)?;

        Ok(Self {
            file,
            mapping,
            block_size,
            block_count,
        })
    }

    pub fn create<P: AsRef<Path>>(
        path: P,
        block_size: usize,
        initial_block_count: u32,
    ) -> Result<Self> {
        let path = path.as_ref();
        ensure!(block_size > 0, "block size must be positive");
        ensure!(initial_block_count > 0, "initial block count must be at least 1");

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)
            .wrap_err_with(|| format!("failed to create block file '{}'", path.display()))?;

        let file_size = initial_block_count as u64 * block_size as u64;
        file.set_len(file_size)
            .wrap_err_with(|| format!("failed to size '{}' to {} bytes", path.display(), file_size))?;

        let mapping = Self::map(&file, false, path)?;

        Ok(Self {
            file,
            mapping,
            block_size,
            block_count: initial_block_count,
        })
    }

    fn map(file: &File, readonly: bool, path: &Path) -> Result<Mapping> {
        // SAFETY: mapping a file is unsound if an unrelated process
        // truncates or rewrites it concurrently. Safe here because:
        // 1. Only one writer exists (serialized by the database lock),
        //    and it only appends blocks or rewrites blocks that no
        //    committed base of the last two revisions references.
        // 2. Readers check every block's revision stamp against their
        //    open revision, so a recycled block is detected rather than
        //    misread.
        // 3. The mapping's lifetime is tied to self; block()/block_mut()
        //    bounds-check every access.
        unsafe {
            if readonly {
                Ok(Mapping::ReadOnly(Mmap::map(file).wrap_err_with(|| {
                    format!("failed to memory-map '{}'", path.display())
                })?))
            } else {
                Ok(Mapping::ReadWrite(MmapMut::map_mut(file).wrap_err_with(
                    || format!("failed to memory-map '{}'", path.display()),
                )?))
            }
        }
    }

    pub fn block(&self, block_no: u32) -> Result<&[u8]> {
        ensure!(
            block_no < self.block_count,
            "block {} out of bounds (block_count={})",
            block_no,
            self.block_count
        );
        let offset = block_no as usize * self.block_size;
        Ok(&self.mapping.as_slice()[offset..offset + self.block_size])
    }

    pub fn block_mut(&mut self, block_no: u32) -> Result<&mut [u8]> {
        ensure!(
            block_no < self.block_count,
            "block {} out of bounds (block_count={})",
            block_no,
            self.block_count
        );
        let offset = block_no as usize * self.block_size;
        match &mut self.mapping {
            Mapping::ReadWrite(m) => Ok(&mut m[offset..offset + self.block_size]),
            Mapping::ReadOnly(_) => bail!("block file is mapped read-only"),
        }
    }

    pub fn grow(&mut self, new_block_count: u32) -> Result<()> {
        ensure!(
            new_block_count > self.block_count,
            "grow target {} not larger than current {}",
            new_block_count,
            self.block_count
        );
        ensure!(
            matches!(self.mapping, Mapping::ReadWrite(_)),
            "cannot grow a read-only block file"
        );

        let file_size = new_block_count as u64 * self.block_size as u64;
        self.file
            .set_len(file_size)
            .wrap_err_with(|| format!("failed to grow block file to {} bytes", file_size))?;

        // SAFETY: as in map(); &mut self guarantees no outstanding block
        // references across the remap.
        self.mapping = Mapping::ReadWrite(unsafe {
            MmapMut::map_mut(&self.file).wrap_err("failed to remap grown block file")?
        });
        self.block_count = new_block_count;
        Ok(())
    }

    pub fn block_count(&self) -> u32 {
        self.block_count
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }

    pub fn sync(&self) -> Result<()> {
        match &self.mapping {
            Mapping::ReadWrite(m) => m.flush().wrap_err("msync of block file failed"),
            Mapping::ReadOnly(_) => Ok(()),
        }
    }
}
