//! Size-bounded batching of serialized records.
//!
//! [`BatchPacker`] walks a slice of records once, serializing each and
//! appending it to the open [`Batch`] while it fits. A record that does not
//! fit closes the open batch; a record that could never fit is reported as
//! [`Error::RecordTooLarge`] and skipped.

use crate::event::EventRecord;
use crate::{Error, Result};
use bytes::Bytes;
use std::iter::Enumerate;
use std::slice::Iter;
use tracing::{debug, warn};

/// An ordered group of serialized records sharing one partition key.
#[derive(Debug, Clone)]
pub struct Batch {
    partition_key: String,
    records: Vec<Bytes>,
    indices: Vec<usize>,
    size_bytes: usize,
    max_size_bytes: usize,
}

impl Batch {
    pub fn new(partition_key: impl Into<String>, max_size_bytes: usize) -> Self {
        Self {
            partition_key: partition_key.into(),
            records: Vec::new(),
            indices: Vec::new(),
            size_bytes: 0,
            max_size_bytes,
        }
    }

    /// Returns true if a record of `len` bytes can be appended.
    pub fn fits(&self, len: usize) -> bool {
        self.size_bytes
            .checked_add(len)
            .is_some_and(|total| total <= self.max_size_bytes)
    }

    /// Appends a record if it fits, handing it back otherwise.
    ///
    /// `index` is the record's position in the caller's input.
    pub fn try_add(&mut self, index: usize, record: Bytes) -> std::result::Result<(), Bytes> {
        if !self.fits(record.len()) {
            return Err(record);
        }
        self.size_bytes += record.len();
        self.records.push(record);
        self.indices.push(index);
        Ok(())
    }

    pub fn partition_key(&self) -> &str {
        &self.partition_key
    }

    pub fn records(&self) -> &[Bytes] {
        &self.records
    }

    /// Input positions of the records in this batch.
    pub fn record_indices(&self) -> &[usize] {
        &self.indices
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn size_bytes(&self) -> usize {
        self.size_bytes
    }

    pub fn max_size_bytes(&self) -> usize {
        self.max_size_bytes
    }
}

/// Lazily packs records into batches of at most `max_batch_bytes`.
///
/// Every batch carries the partition key given at construction. Items are
/// `Ok(batch)` for each closed batch and `Err` for each record that could not
/// be placed; the iterator is finite and consumes its input once.
pub struct BatchPacker<'a, R> {
    records: Enumerate<Iter<'a, R>>,
    partition_key: String,
    max_batch_bytes: usize,
    open: Option<Batch>,
}

impl<'a, R: EventRecord> BatchPacker<'a, R> {
    pub fn new(records: &'a [R], partition_key: impl Into<String>, max_batch_bytes: usize) -> Self {
        Self {
            records: records.iter().enumerate(),
            partition_key: partition_key.into(),
            max_batch_bytes,
            open: None,
        }
    }

    pub fn partition_key(&self) -> &str {
        &self.partition_key
    }

    /// Input positions not yet emitted in any batch or error.
    ///
    /// Includes the records held by the open batch.
    pub fn into_unsent(self) -> Vec<usize> {
        let mut unsent = self
            .open
            .map(|batch| batch.indices)
            .unwrap_or_default();
        unsent.extend(self.records.map(|(index, _)| index));
        unsent
    }

    fn new_batch(&self) -> Batch {
        Batch::new(self.partition_key.clone(), self.max_batch_bytes)
    }
}

impl<'a, R: EventRecord> Iterator for BatchPacker<'a, R> {
    type Item = Result<Batch>;

    fn next(&mut self) -> Option<Self::Item> {
        while let Some((index, record)) = self.records.next() {
            let wire = match record.to_wire() {
                Ok(wire) => wire,
                Err(e) => {
                    warn!(index, "Failed to serialize record: {}", e);
                    return Some(Err(Error::InvalidRecord {
                        index,
                        message: e.to_string(),
                    }));
                }
            };

            if wire.len() > self.max_batch_bytes {
                warn!(
                    index,
                    size = wire.len(),
                    max = self.max_batch_bytes,
                    "Record exceeds maximum batch size"
                );
                return Some(Err(Error::RecordTooLarge {
                    index,
                    size: wire.len(),
                    max: self.max_batch_bytes,
                }));
            }

            let record_key = record.partition_key();
            if record_key != self.partition_key {
                debug!(
                    index,
                    record_key = %record_key,
                    batch_key = %self.partition_key,
                    "Record key differs from call partition key"
                );
            }

            let mut batch = match self.open.take() {
                Some(batch) => batch,
                None => self.new_batch(),
            };

            match batch.try_add(index, wire) {
                Ok(()) => self.open = Some(batch),
                Err(wire) => {
                    let mut next = self.new_batch();
                    // A record that passed the size check always fits an empty batch.
                    let _ = next.try_add(index, wire);
                    self.open = Some(next);
                    debug!(
                        records = batch.len(),
                        bytes = batch.size_bytes(),
                        "Batch full"
                    );
                    return Some(Ok(batch));
                }
            }
        }

        self.open.take().filter(|batch| !batch.is_empty()).map(Ok)
    }
}
