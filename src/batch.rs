//! Batch accumulation with in-batch deduplication
//!
//! A set-based upsert cannot touch the same key twice in one statement
//! (PostgreSQL raises "ON CONFLICT DO UPDATE command cannot affect row a
//! second time", DuckDB rejects it similarly), so the accumulator keeps at most
//! one row per identifier. A later record for an identifier replaces the
//! earlier row in place, keeping the position of its first appearance.

use std::collections::HashMap;

use tracing::debug;

use crate::error::MalformedInputError;
use crate::record::{BatchRow, EntityRecord};

/// Default number of rows per batch
pub const DEFAULT_BATCH_SIZE: usize = 1000;

/// Largest batch size a configuration may ask for
pub const MAX_BATCH_SIZE: usize = 50_000;

/// Rows flushed together in one write
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Batch {
    rows: Vec<BatchRow>,
}

impl Batch {
    pub fn rows(&self) -> &[BatchRow] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

}

/// What `add` did with a record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddOutcome {
    /// The identifier was new to this batch
    Appended,
    /// An earlier row with the same identifier was overwritten
    Replaced,
}

/// Buffers rows until a batch is full
#[derive(Debug)]
pub struct BatchAccumulator {
    batch_size: usize,
    /// Capacity reserved up front for each batch
    reserve: usize,
    rows: Vec<BatchRow>,
    /// Identifier -> position in `rows`
    positions: HashMap<i64, usize>,
    replaced: usize,
}

impl BatchAccumulator {
    /// Create an accumulator; a batch size of zero is treated as one
    pub fn new(batch_size: usize) -> Self {
        let batch_size = batch_size.max(1);
        let reserve = batch_size.min(DEFAULT_BATCH_SIZE);
        Self {
            batch_size,
            reserve,
            rows: Vec::with_capacity(reserve),
            positions: HashMap::with_capacity(reserve),
            replaced: 0,
        }
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Hash a record and add its row, replacing any row with the same id
    pub fn add(&mut self, record: EntityRecord) -> Result<AddOutcome, MalformedInputError> {
        let index = record.index;
        let row = BatchRow::from_record(record)?;

        if let Some(&position) = self.positions.get(&row.id) {
            debug!(id = row.id, record = index, "replacing duplicate id within batch");
            self.rows[position] = row;
            self.replaced += 1;
            return Ok(AddOutcome::Replaced);
        }

        self.positions.insert(row.id, self.rows.len());
        self.rows.push(row);
        Ok(AddOutcome::Appended)
    }

    /// True once the buffer holds a full batch
    pub fn should_flush(&self) -> bool {
        self.rows.len() >= self.batch_size
    }

    /// Take the buffered rows, leaving the accumulator empty
    pub fn drain(&mut self) -> Batch {
        self.positions.clear();
        Batch {
            rows: std::mem::replace(&mut self.rows, Vec::with_capacity(self.reserve)),
        }
    }

    /// Rows currently buffered
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Duplicates replaced across all batches so far
    pub fn replaced_count(&self) -> usize {
        self.replaced
    }
}
