//! Variable-schema, fixed-width tuple storage with free-list reuse.
//!
//! Every record file starts with an 8-byte header `(first_free_rec,
//! rec_tail)`. Records are packed `record_width`-byte slots; a slot carries
//! the caller's columns plus a trailing validity byte and a 4-byte
//! next-free pointer used only while the slot is on the free chain.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::error::{DbError, Result};
use crate::format::{self, ColumnFormat, Value};
use crate::storage::BufferPool;

const HEADER_SIZE: usize = 8;

#[derive(Debug, Clone)]
pub struct RecordLayout {
    pub columns: Vec<(String, ColumnFormat)>,
}

impl RecordLayout {
    pub fn new(columns: Vec<(String, ColumnFormat)>) -> Self {
        Self { columns }
    }

    pub fn formats(&self) -> Vec<ColumnFormat> {
        self.columns.iter().map(|(_, f)| *f).collect()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|(n, _)| n == name)
    }

    /// Width in bytes of the caller-visible columns, not counting the
    /// trailing validity byte and next-free pointer.
    pub fn value_width(&self) -> usize {
        format::row_width(&self.formats())
    }

    /// Width in bytes of one slot including validity byte and next-free
    /// pointer.
    pub fn record_width(&self) -> usize {
        self.value_width() + 1 + 4
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Comparator {
    Eq,
    Lt,
    Gt,
}

/// Column-index -> list of (comparator, bound) conditions. A row matches
/// when every listed column satisfies all of its conditions.
#[derive(Debug, Clone, Default)]
pub struct Predicate(pub HashMap<usize, Vec<(Comparator, Value)>>);

impl Predicate {
    pub fn new() -> Self {
        Self(HashMap::new())
    }

    pub fn with(mut self, column: usize, comparator: Comparator, bound: Value) -> Self {
        self.0.entry(column).or_default().push((comparator, bound));
        self
    }

    pub fn matches(&self, row: &[Value]) -> bool {
        self.0.iter().all(|(idx, conds)| {
            row.get(*idx)
                .map(|value| conds.iter().all(|(cmp, bound)| matches_cmp(value, *cmp, bound)))
                .unwrap_or(false)
        })
    }
}

fn matches_cmp(value: &Value, cmp: Comparator, bound: &Value) -> bool {
    match (value, bound) {
        (Value::Int(a), Value::Int(b)) => match cmp {
            Comparator::Eq => a == b,
            Comparator::Lt => a < b,
            Comparator::Gt => a > b,
        },
        (Value::Double(a), Value::Double(b)) => match cmp {
            Comparator::Eq => a == b,
            Comparator::Lt => a < b,
            Comparator::Gt => a > b,
        },
        (Value::Str(a), Value::Str(b)) => match cmp {
            Comparator::Eq => a == b,
            Comparator::Lt => a < b,
            Comparator::Gt => a > b,
        },
        _ => false,
    }
}

/// A per-table binary record file, backed by a shared [`BufferPool`].
pub struct RecordStore<'a> {
    pool: &'a BufferPool,
    path: PathBuf,
    layout: RecordLayout,
    record_width: usize,
    slots_per_block: usize,
    block_size: usize,
}

impl<'a> RecordStore<'a> {
    pub fn new(pool: &'a BufferPool, path: impl Into<PathBuf>, layout: RecordLayout) -> Self {
        let block_size = pool.block_size();
        let record_width = layout.record_width();
        let slots_per_block = (block_size / record_width).max(1);
        Self {
            pool,
            path: path.into(),
            layout,
            record_width,
            slots_per_block,
            block_size,
        }
    }

    pub fn layout(&self) -> &RecordLayout {
        &self.layout
    }

    /// Creates the backing file and writes an empty header. Fails with
    /// [`DbError::Exists`] if the file is already present.
    pub fn init(&self) -> Result<()> {
        if self.path.exists() {
            return Err(DbError::Exists(self.path.display().to_string()));
        }
        self.write_header(-1, 0)
    }

    fn slot_byte_offset(&self, block_index: u32, local_slot: usize) -> usize {
        if block_index == 0 {
            HEADER_SIZE + local_slot * self.record_width
        } else {
            local_slot * self.record_width
        }
    }

    fn locate(&self, record_offset: u32) -> (u32, usize, usize) {
        let block_index = record_offset / self.slots_per_block as u32;
        let local_slot = (record_offset as usize) % self.slots_per_block;
        let byte_offset = self.slot_byte_offset(block_index, local_slot);
        (block_index, local_slot, byte_offset)
    }

    fn header(&self) -> Result<(i32, i32)> {
        let block = self.pool.get(&self.path, 0)?;
        let bytes = block.read()?;
        if bytes.len() < HEADER_SIZE {
            return Ok((-1, 0));
        }
        let first_free = i32::from_le_bytes(bytes[0..4].try_into().unwrap());
        let tail = i32::from_le_bytes(bytes[4..8].try_into().unwrap());
        Ok((first_free, tail))
    }

    fn write_header(&self, first_free: i32, tail: i32) -> Result<()> {
        let block = self.pool.get(&self.path, 0)?;
        let mut buf = Vec::with_capacity(HEADER_SIZE);
        buf.extend_from_slice(&first_free.to_le_bytes());
        buf.extend_from_slice(&tail.to_le_bytes());
        block.write_at(0, &buf)?;
        block.flush()
    }

    /// Packs `values` and stores them, reusing a freed slot if one is
    /// available, otherwise appending. Returns the record's global offset.
    pub fn insert(&self, values: &[Value]) -> Result<u32> {
        let packed = format::pack(&self.layout.formats(), values)?;
        let mut slot = packed;
        slot.push(b'1');
        slot.extend_from_slice(&(-1i32).to_le_bytes());

        let (first_free, tail) = self.header()?;
        if first_free >= 0 {
            let offset = first_free as u32;
            let (block_index, _, byte_offset) = self.locate(offset);
            let block = self.pool.get(&self.path, block_index)?;
            let existing = block.read()?;
            let next_free = read_next_free(&existing, byte_offset, self.record_width);
            block.write_at(byte_offset, &slot)?;
            block.flush()?;
            self.write_header(next_free, tail)?;
            Ok(offset)
        } else {
            let offset = tail as u32;
            let (block_index, _, byte_offset) = self.locate(offset);
            let block = self.pool.get(&self.path, block_index)?;
            block.write_at(byte_offset, &slot)?;
            block.flush()?;
            self.write_header(first_free, tail + 1)?;
            Ok(offset)
        }
    }

    fn live_slot(&self, record_offset: u32) -> Result<(u32, usize, Vec<u8>)> {
        let (_, tail) = self.header()?;
        if record_offset as i64 >= tail as i64 {
            return Err(DbError::InvalidRecord(format!(
                "offset {record_offset} past tail {tail}"
            )));
        }
        let (block_index, _, byte_offset) = self.locate(record_offset);
        let block = self.pool.get(&self.path, block_index)?;
        let data = block.read()?;
        if byte_offset + self.record_width > data.len() {
            return Err(DbError::InvalidRecord(format!(
                "offset {record_offset} points past allocated data"
            )));
        }
        let validity = data[byte_offset + self.layout.value_width()];
        if validity != b'1' {
            return Err(DbError::InvalidRecord(format!(
                "offset {record_offset} is not a live record"
            )));
        }
        Ok((block_index, byte_offset, data))
    }

    pub fn delete(&self, record_offset: u32) -> Result<()> {
        let (first_free, tail) = self.header()?;
        let (block_index, byte_offset, mut data) = self.live_slot(record_offset)?;
        let block = self.pool.get(&self.path, block_index)?;
        let value_width = self.layout.value_width();
        data[byte_offset + value_width] = b'0';
        data[byte_offset + value_width + 1..byte_offset + self.record_width]
            .copy_from_slice(&first_free.to_le_bytes());
        block.write(&data, false)?;
        block.flush()?;
        self.write_header(record_offset as i32, tail)
    }

    pub fn update(&self, record_offset: u32, values: &[Value]) -> Result<()> {
        let packed = format::pack(&self.layout.formats(), values)?;
        let (block_index, byte_offset, mut data) = self.live_slot(record_offset)?;
        let block = self.pool.get(&self.path, block_index)?;
        data[byte_offset..byte_offset + packed.len()].copy_from_slice(&packed);
        data[byte_offset + self.layout.value_width()] = b'1';
        data[byte_offset + self.layout.value_width() + 1..byte_offset + self.record_width]
            .copy_from_slice(&(-1i32).to_le_bytes());
        block.write(&data, false)?;
        block.flush()
    }

    pub fn read(&self, record_offset: u32) -> Result<Vec<Value>> {
        let (_, byte_offset, data) = self.live_slot(record_offset)?;
        format::unpack(
            &self.layout.formats(),
            &data[byte_offset..byte_offset + self.layout.value_width()],
        )
    }

    /// Walks every allocated slot and returns the live rows matching
    /// `predicate`, paired with their record offset.
    pub fn scan(&self, predicate: &Predicate) -> Result<Vec<(u32, Vec<Value>)>> {
        let (_, tail) = self.header()?;
        let mut out = Vec::new();
        let mut block_index = u32::MAX;
        let mut data: Vec<u8> = Vec::new();
        for offset in 0..tail as u32 {
            let (bi, _, byte_offset) = self.locate(offset);
            if bi != block_index {
                let block = self.pool.get(&self.path, bi)?;
                data = block.read()?;
                block_index = bi;
            }
            if byte_offset + self.record_width > data.len() {
                continue;
            }
            if data[byte_offset + self.layout.value_width()] != b'1' {
                continue;
            }
            let row = format::unpack(
                &self.layout.formats(),
                &data[byte_offset..byte_offset + self.layout.value_width()],
            )?;
            if predicate.matches(&row) {
                out.push((offset, row));
            }
        }
        Ok(out)
    }

    pub fn scan_delete(&self, predicate: &Predicate) -> Result<usize> {
        let matches = self.scan(predicate)?;
        for (offset, _) in &matches {
            self.delete(*offset)?;
        }
        Ok(matches.len())
    }

    pub fn scan_update(&self, predicate: &Predicate, values: &[Value]) -> Result<usize> {
        let matches = self.scan(predicate)?;
        for (offset, _) in &matches {
            self.update(*offset, values)?;
        }
        Ok(matches.len())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }
}

fn read_next_free(data: &[u8], byte_offset: usize, record_width: usize) -> i32 {
    if byte_offset + record_width > data.len() {
        return -1;
    }
    let start = byte_offset + record_width - 4;
    i32::from_le_bytes(data[start..start + 4].try_into().unwrap())
}

impl PartialEq for Comparator {
    fn eq(&self, other: &Self) -> bool {
        matches!(
            (self, other),
            (Comparator::Eq, Comparator::Eq)
                | (Comparator::Lt, Comparator::Lt)
                | (Comparator::Gt, Comparator::Gt)
        )
    }
}
impl Eq for Comparator {}
