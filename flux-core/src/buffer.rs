/// Write buffer - per-collection queue of encoded, not-yet-appended frames
///
/// Inserts land here first. Once a collection's queue reaches the threshold
/// it is appended to the collection file in one write and cleared. Reads
/// must merge the decoded queue with the file contents.

use crate::codec;
use crate::collection::CollectionStore;
use crate::{Record, Result};
use bytes::{Bytes, BytesMut};
use std::collections::HashMap;
use tracing::debug;
use uuid::Uuid;

pub struct WriteBuffer {
    threshold: usize,
    pending: HashMap<String, Vec<Bytes>>,
}

impl WriteBuffer {
    pub fn new(threshold: usize) -> Self {
        Self {
            threshold,
            pending: HashMap::new(),
        }
    }

    /// Queue an encoded frame. Returns true once the collection's queue has
    /// reached the flush threshold.
    pub fn push(&mut self, collection: &str, frame: Bytes) -> bool {
        let queue = self.pending.entry(collection.to_string()).or_default();
        queue.push(frame);
        queue.len() >= self.threshold
    }

    /// Number of frames queued for a collection
    pub fn len(&self, collection: &str) -> usize {
        self.pending.get(collection).map_or(0, Vec::len)
    }

    pub fn has_pending(&self, collection: &str) -> bool {
        self.len(collection) > 0
    }

    /// Collections with at least one queued frame, sorted
    pub fn collections(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .pending
            .iter()
            .filter(|(_, queue)| !queue.is_empty())
            .map(|(name, _)| name.clone())
            .collect();
        names.sort();
        names
    }

    /// Decoded view of a collection's queue, in insertion order
    pub fn records(&self, collection: &str) -> Vec<Record> {
        self.pending
            .get(collection)
            .map(|queue| queue.iter().filter_map(|frame| codec::decode_frame(frame)).collect())
            .unwrap_or_default()
    }

    /// Whether a record with this identifier is queued
    pub fn contains(&self, collection: &str, id: &Uuid) -> bool {
        self.pending.get(collection).map_or(false, |queue| {
            queue.iter().any(|frame| codec::frame_id(frame) == Some(*id))
        })
    }

    /// Drop a collection's queue without writing it
    pub fn discard(&mut self, collection: &str) -> usize {
        self.pending.remove(collection).map_or(0, |queue| queue.len())
    }

    /// Append a collection's queue to its file in one pass, then clear it.
    ///
    /// On an I/O error the queue is left intact.
    pub fn flush(&mut self, collection: &str, store: &CollectionStore) -> Result<usize> {
        let count = self.len(collection);
        if count == 0 {
            return Ok(0);
        }

        let mut bytes = BytesMut::new();
        if let Some(queue) = self.pending.get(collection) {
            for frame in queue {
                bytes.extend_from_slice(frame);
            }
        }
        store.append(collection, &bytes)?;

        self.pending.remove(collection);
        debug!("Flushed {} buffered records to collection {}", count, collection);
        Ok(count)
    }

    /// Flush every collection with queued frames
    pub fn flush_all(&mut self, store: &CollectionStore) -> Result<usize> {
        let mut total = 0;
        for name in self.collections() {
            total += self.flush(&name, store)?;
        }
        Ok(total)
    }
}
