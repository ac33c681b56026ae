use std::collections::HashMap;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use tracing::{error, warn};

use crate::error::{DbError, Result};
use crate::storage::block::{read_block_from_disk, Block, BlockIndex};

type BlockKey = (PathBuf, BlockIndex);

#[derive(Debug, Clone, Copy)]
pub struct BufferPoolConfig {
    pub capacity: usize,
    pub block_size: usize,
}

impl Default for BufferPoolConfig {
    fn default() -> Self {
        Self {
            capacity: 1024,
            block_size: 4096,
        }
    }
}

struct Inner {
    capacity: usize,
    block_size: usize,
    blocks: HashMap<BlockKey, Block>,
    tick: u64,
}

/// A process-wide cache of fixed-size disk blocks, shared by every
/// [`crate::record::RecordStore`] and [`crate::index::tree::IndexTree`] in
/// a running program. Constructed explicitly and passed by reference so
/// tests can use isolated pools instead of a hidden global.
pub struct BufferPool {
    inner: Mutex<Inner>,
}

impl BufferPool {
    pub fn open(config: BufferPoolConfig) -> Self {
        Self {
            inner: Mutex::new(Inner {
                capacity: config.capacity.max(1),
                block_size: config.block_size,
                blocks: HashMap::new(),
                tick: 0,
            }),
        }
    }

    pub fn block_size(&self) -> usize {
        self.inner.lock().block_size
    }

    /// Pins the block at `(path, index)`, loading it from disk on a miss
    /// and evicting the least-recently-used unpinned block if the pool is
    /// at capacity. Fails with [`DbError::AllPinned`] if every cached
    /// block is pinned and a slot is needed.
    pub fn get(&self, path: &Path, index: BlockIndex) -> Result<PinGuard<'_>> {
        let key_path = canonical_key(path)?;
        let key: BlockKey = (key_path.clone(), index);
        let mut inner = self.inner.lock();
        inner.tick += 1;
        let tick = inner.tick;

        if let Some(block) = inner.blocks.get_mut(&key) {
            block.pin();
            block.last_used = tick;
            return Ok(PinGuard { pool: self, key });
        }

        if inner.blocks.len() >= inner.capacity {
            let victim_key = inner
                .blocks
                .iter()
                .filter(|(_, b)| b.pin_count() == 0)
                .min_by_key(|(_, b)| b.last_used)
                .map(|(k, _)| k.clone());
            match victim_key {
                Some(vk) => {
                    if let Some(mut victim) = inner.blocks.remove(&vk) {
                        victim.flush()?;
                    }
                }
                None => {
                    warn!("buffer pool exhausted: every cached block is pinned");
                    return Err(DbError::AllPinned);
                }
            }
        }

        let block_size = inner.block_size;
        let bytes = read_block_from_disk(&key_path, index, block_size)?;
        let mut block = Block::from_bytes(key_path, index, block_size, bytes);
        block.pin();
        block.last_used = tick;
        inner.blocks.insert(key.clone(), block);
        Ok(PinGuard { pool: self, key })
    }

    pub fn flush_all(&self) -> Result<()> {
        let mut inner = self.inner.lock();
        for block in inner.blocks.values_mut() {
            block.flush()?;
        }
        Ok(())
    }

    /// Flushes and drops every cached block belonging to `path`.
    pub fn detach(&self, path: &Path) -> Result<()> {
        let key_path = canonical_key(path)?;
        let mut inner = self.inner.lock();
        let stale: Vec<BlockKey> = inner
            .blocks
            .keys()
            .filter(|(p, _)| *p == key_path)
            .cloned()
            .collect();
        for key in stale {
            if let Some(mut block) = inner.blocks.remove(&key) {
                block.flush()?;
            }
        }
        Ok(())
    }

    pub fn shutdown(&self) -> Result<()> {
        self.flush_all()?;
        self.inner.lock().blocks.clear();
        Ok(())
    }

    fn with_block<R>(&self, key: &BlockKey, f: impl FnOnce(&mut Block) -> Result<R>) -> Result<R> {
        let mut inner = self.inner.lock();
        let block = inner.blocks.get_mut(key).ok_or_else(|| {
            error!("pinned block {:?} missing from pool, structural bug", key);
            DbError::StructureBroken(format!("block {:?} not resident in pool", key))
        })?;
        f(block)
    }
}

/// A scoped pin on one block. Releases the pin when dropped, on every
/// exit path including an early return or a panic unwind.
pub struct PinGuard<'a> {
    pool: &'a BufferPool,
    key: BlockKey,
}

impl<'a> PinGuard<'a> {
    pub fn read(&self) -> Result<Vec<u8>> {
        self.pool.with_block(&self.key, |b| Ok(b.read().to_vec()))
    }

    pub fn write(&self, bytes: &[u8], trunc: bool) -> Result<()> {
        self.pool.with_block(&self.key, |b| b.write(bytes, trunc))
    }

    pub fn flush(&self) -> Result<()> {
        self.pool.with_block(&self.key, |b| b.flush())
    }

    pub fn index(&self) -> BlockIndex {
        self.key.1
    }

    /// Splices `bytes` into the block's data at `offset`, preserving
    /// everything outside that range. Used to patch a single record slot
    /// or a file header without restating the whole block.
    pub fn write_at(&self, offset: usize, bytes: &[u8]) -> Result<()> {
        let mut data = self.read()?;
        let end = offset + bytes.len();
        if end > data.len() {
            data.resize(end, 0);
        }
        data[offset..end].copy_from_slice(bytes);
        self.write(&data, false)
    }
}

impl Drop for PinGuard<'_> {
    fn drop(&mut self) {
        let mut inner = self.pool.inner.lock();
        if let Some(block) = inner.blocks.get_mut(&self.key) {
            if let Err(e) = block.unpin() {
                error!("scoped pin guard failed to unpin cleanly: {e}");
            }
        }
    }
}

fn canonical_key(path: &Path) -> Result<PathBuf> {
    let parent = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(parent)?;
    let abs_parent = parent.canonicalize()?;
    let file_name = path
        .file_name()
        .ok_or_else(|| DbError::FileMissing(path.display().to_string()))?;
    Ok(abs_parent.join(file_name))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn partial_last_block() {
        let dir = tempfile::tempdir().unwrap();
        let file_path = dir.path().join("hello.bin");
        fs::write(&file_path, b"Hello World").unwrap();

        let pool = BufferPool::open(BufferPoolConfig {
            capacity: 4,
            block_size: 5,
        });
        let block = pool.get(&file_path, 2).unwrap();
        assert_eq!(block.read().unwrap(), b"d");
        block.write(b"D", false).unwrap();
        block.flush().unwrap();
        drop(block);

        assert_eq!(fs::read(&file_path).unwrap(), b"Hello WorlD");
    }

    #[test]
    fn lru_eviction_picks_oldest_unpinned() {
        let dir = tempfile::tempdir().unwrap();
        let file_path = dir.path().join("hello.bin");
        fs::write(&file_path, b"Hello World").unwrap();

        let pool = BufferPool::open(BufferPoolConfig {
            capacity: 2,
            block_size: 5,
        });
        let b0 = pool.get(&file_path, 0).unwrap();
        let b1 = pool.get(&file_path, 1).unwrap();
        assert!(pool.get(&file_path, 2).is_err());

        drop(b0);
        drop(b1);

        let b2 = pool.get(&file_path, 2).unwrap();
        assert_eq!(b2.read().unwrap(), b"d");
        drop(b2);

        // block 1 should still be resident (it was younger than block 0)
        let inner = pool.inner.lock();
        assert_eq!(inner.blocks.len(), 2);
    }
}
