//! Disk-resident B+-tree, indexed by composite fixed-format keys and
//! backed entirely by a shared [`BufferPool`].

use std::cmp::Ordering;
use std::path::{Path, PathBuf};

use tracing::error;

use crate::error::{DbError, Result};
use crate::format::{ColumnFormat, Value};
use crate::index::node::{KeyCodec, Node};
use crate::storage::BufferPool;

const HEADER_SIZE: usize = 12;

pub struct IndexTree<'a> {
    pool: &'a BufferPool,
    path: PathBuf,
    codec: KeyCodec,
    n: usize,
    block_size: usize,
    total_blocks: u32,
    first_deleted_block: u32,
    root: u32,
}

impl<'a> IndexTree<'a> {
    /// Opens an existing index file or creates a fresh, empty one.
    pub fn open(pool: &'a BufferPool, path: impl Into<PathBuf>, key_formats: Vec<ColumnFormat>) -> Result<Self> {
        let path = path.into();
        let codec = KeyCodec::new(key_formats);
        let block_size = pool.block_size();
        let key_size = codec.key_size();
        let n = fanout(key_size, block_size);

        let existed = path.exists();
        let mut tree = Self {
            pool,
            path,
            codec,
            n,
            block_size,
            total_blocks: 1,
            first_deleted_block: 0,
            root: 0,
        };

        if existed {
            let guard = tree.pool.get(&tree.path, 0)?;
            let bytes = guard.read()?;
            if bytes.len() >= HEADER_SIZE {
                tree.total_blocks = u32::from_le_bytes(bytes[0..4].try_into().unwrap());
                tree.first_deleted_block = u32::from_le_bytes(bytes[4..8].try_into().unwrap());
                tree.root = u32::from_le_bytes(bytes[8..12].try_into().unwrap());
            }
        } else {
            tree.dump_header()?;
        }
        Ok(tree)
    }

    pub fn fanout(&self) -> usize {
        self.n
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Writes the tree header back to block 0. Must run before a clean
    /// shutdown or newly allocated blocks are leaked on disk.
    pub fn dump_header(&self) -> Result<()> {
        let guard = self.pool.get(&self.path, 0)?;
        let mut buf = Vec::with_capacity(HEADER_SIZE);
        buf.extend_from_slice(&self.total_blocks.to_le_bytes());
        buf.extend_from_slice(&self.first_deleted_block.to_le_bytes());
        buf.extend_from_slice(&self.root.to_le_bytes());
        guard.write_at(0, &buf)?;
        guard.flush()
    }

    /// Dumps the header and flushes every block of this file from the
    /// shared pool. The common path for ending a session with this tree.
    pub fn close(&self) -> Result<()> {
        self.dump_header()?;
        self.pool.detach(&self.path)
    }

    fn allocate_block(&mut self) -> Result<u32> {
        if self.first_deleted_block > 0 {
            let block_index = self.first_deleted_block;
            let guard = self.pool.get(&self.path, block_index)?;
            let bytes = guard.read()?;
            let next_deleted = if bytes.len() >= 4 {
                u32::from_le_bytes(bytes[0..4].try_into().unwrap())
            } else {
                0
            };
            self.first_deleted_block = next_deleted;
            Ok(block_index)
        } else {
            let block_index = self.total_blocks;
            self.total_blocks += 1;
            Ok(block_index)
        }
    }

    fn free_block(&mut self, block_index: u32) -> Result<()> {
        let guard = self.pool.get(&self.path, block_index)?;
        let mut buf = vec![0u8; self.block_size];
        buf[0..4].copy_from_slice(&self.first_deleted_block.to_le_bytes());
        guard.write(&buf, false)?;
        guard.flush()?;
        self.first_deleted_block = block_index;
        Ok(())
    }

    fn read_node(&self, block_index: u32) -> Result<Node> {
        let guard = self.pool.get(&self.path, block_index)?;
        Node::from_bytes(&self.codec, &guard.read()?)
    }

    fn write_node(&self, block_index: u32, node: &Node) -> Result<()> {
        let bytes = node.to_bytes(&self.codec, self.block_size)?;
        let guard = self.pool.get(&self.path, block_index)?;
        guard.write(&bytes, false)?;
        guard.flush()
    }

    fn descend(&self, key: &[Value]) -> Result<(Node, u32, Vec<u32>)> {
        let mut block_index = self.root;
        let mut path = Vec::new();
        loop {
            let node = self.read_node(block_index)?;
            if node.is_leaf() {
                return Ok((node, block_index, path));
            }
            let child_idx = node.child_for(&self.codec, key);
            path.push(block_index);
            block_index = node.children[child_idx];
        }
    }

    pub fn find(&self, key: &[Value]) -> Result<Option<u32>> {
        if self.root == 0 {
            return Ok(None);
        }
        let (node, _, _) = self.descend(key)?;
        let at = node.lower_bound(&self.codec, key);
        if at < node.keys.len() && self.codec.compare(&node.keys[at], key) == Ordering::Equal {
            Ok(Some(node.children[at]))
        } else {
            Ok(None)
        }
    }

    /// Walks leaf links from the leaf that would hold `lower` (whether or
    /// not that exact key is present) through to the first key greater
    /// than `upper`.
    pub fn range(&self, lower: &[Value], upper: &[Value]) -> Result<Vec<(Vec<Value>, u32)>> {
        let mut out = Vec::new();
        if self.root == 0 {
            return Ok(out);
        }
        let (mut node, _, _) = self.descend(lower)?;
        let mut pos = node.lower_bound(&self.codec, lower);
        loop {
            if pos < node.keys.len() {
                if self.codec.compare(&node.keys[pos], upper) == Ordering::Greater {
                    break;
                }
                out.push((node.keys[pos].clone(), node.children[pos]));
                pos += 1;
            } else {
                let next_block = node.leaf_link();
                if next_block == 0 {
                    break;
                }
                node = self.read_node(next_block)?;
                pos = 0;
            }
        }
        Ok(out)
    }

    pub fn insert(&mut self, key: Vec<Value>, value: u32) -> Result<()> {
        if self.root == 0 {
            let block = self.allocate_block()?;
            let node = Node::new_leaf(vec![key], vec![value, 0]);
            self.write_node(block, &node)?;
            self.root = block;
            return Ok(());
        }

        let (mut node, mut current_block, mut path) = self.descend(&key)?;
        let at = node.lower_bound(&self.codec, &key);
        if at < node.keys.len() && self.codec.compare(&node.keys[at], &key) == Ordering::Equal {
            return Err(DbError::Duplicate);
        }
        node.insert(&self.codec, key, value);
        if node.num_keys() <= self.n {
            self.write_node(current_block, &node)?;
            return Ok(());
        }

        let new_block = self.allocate_block()?;
        let (sibling, mut sep_key, mut sep_child) = node.split(self.n, new_block);
        self.write_node(current_block, &node)?;
        self.write_node(sep_child, &sibling)?;

        loop {
            match path.pop() {
                None => {
                    let new_root_block = self.allocate_block()?;
                    let new_root = Node::new_internal(vec![sep_key], vec![current_block, sep_child]);
                    self.write_node(new_root_block, &new_root)?;
                    self.root = new_root_block;
                    return Ok(());
                }
                Some(parent_block) => {
                    let mut parent = self.read_node(parent_block)?;
                    parent.insert(&self.codec, sep_key.clone(), sep_child);
                    if parent.num_keys() <= self.n {
                        self.write_node(parent_block, &parent)?;
                        return Ok(());
                    }
                    let next_block = self.allocate_block()?;
                    let (parent_sibling, new_sep_key, new_sep_child) =
                        parent.split(self.n, next_block);
                    self.write_node(parent_block, &parent)?;
                    self.write_node(new_sep_child, &parent_sibling)?;
                    current_block = parent_block;
                    sep_key = new_sep_key;
                    sep_child = new_sep_child;
                }
            }
        }
    }

    pub fn delete(&mut self, key: &[Value]) -> Result<()> {
        if self.root == 0 {
            return Err(DbError::NotFound);
        }
        let (mut node, block_index, mut path) = self.descend(key)?;
        if node.remove(&self.codec, key).is_none() {
            return Err(DbError::NotFound);
        }

        if block_index == self.root {
            if node.keys.is_empty() {
                self.root = if node.is_leaf() { 0 } else { node.children[0] };
                self.free_block(block_index)?;
            } else {
                self.write_node(block_index, &node)?;
            }
            return Ok(());
        }

        let min_keys = self.min_keys();
        if node.num_keys() >= min_keys {
            self.write_node(block_index, &node)?;
            return Ok(());
        }
        self.fix_underflow(node, block_index, &mut path)
    }

    fn min_keys(&self) -> usize {
        self.n.div_ceil(2)
    }

    fn fix_underflow(&mut self, mut node: Node, block_index: u32, path: &mut Vec<u32>) -> Result<()> {
        if block_index == self.root {
            if node.keys.is_empty() {
                self.root = if node.is_leaf() { 0 } else { node.children[0] };
                self.free_block(block_index)?;
            } else {
                self.write_node(block_index, &node)?;
            }
            return Ok(());
        }

        let parent_block = path.pop().ok_or_else(|| {
            error!("non-root node {block_index} has no recorded parent during rebalance");
            DbError::StructureBroken("non-root node missing parent in path".into())
        })?;
        let mut parent = self.read_node(parent_block)?;
        let my_pos = parent
            .children
            .iter()
            .position(|&c| c == block_index)
            .ok_or_else(|| DbError::StructureBroken("child block missing from parent".into()))?;

        let min_keys = self.min_keys();

        if my_pos > 0 {
            let left_block = parent.children[my_pos - 1];
            let mut left = self.read_node(left_block)?;
            if left.num_keys() > min_keys {
                node.transfer_from_left(&mut left, &mut parent, my_pos)?;
                self.write_node(block_index, &node)?;
                self.write_node(left_block, &left)?;
                self.write_node(parent_block, &parent)?;
                return Ok(());
            }
        }

        if my_pos + 1 < parent.children.len() {
            let right_block = parent.children[my_pos + 1];
            let mut right = self.read_node(right_block)?;
            if right.num_keys() > min_keys {
                node.transfer_from_right(&mut right, &mut parent, my_pos)?;
                self.write_node(block_index, &node)?;
                self.write_node(right_block, &right)?;
                self.write_node(parent_block, &parent)?;
                return Ok(());
            }
        }

        if my_pos > 0 {
            let left_block = parent.children[my_pos - 1];
            let mut left = self.read_node(left_block)?;
            let sep_key = if node.is_leaf() {
                None
            } else {
                Some(parent.keys[my_pos - 1].clone())
            };
            left.fuse_with(node, sep_key)?;
            self.write_node(left_block, &left)?;
            self.free_block(block_index)?;
            parent.keys.remove(my_pos - 1);
            parent.children.remove(my_pos);
        } else {
            let right_block = parent.children[my_pos + 1];
            let right = self.read_node(right_block)?;
            let sep_key = if node.is_leaf() {
                None
            } else {
                Some(parent.keys[my_pos].clone())
            };
            node.fuse_with(right, sep_key)?;
            self.write_node(block_index, &node)?;
            self.free_block(right_block)?;
            parent.keys.remove(my_pos);
            parent.children.remove(my_pos + 1);
        }

        if parent.num_keys() >= min_keys {
            self.write_node(parent_block, &parent)?;
            return Ok(());
        }
        self.fix_underflow(parent, parent_block, path)
    }
}

/// Largest `n` such that `n * key_size + 4 * (n + 1) + META_SIZE <= block_size`.
fn fanout(key_size: usize, block_size: usize) -> usize {
    block_size
        .saturating_sub(4 + crate::index::node::META_SIZE)
        .checked_div(key_size + 4)
        .unwrap_or(1)
        .max(1)
}
