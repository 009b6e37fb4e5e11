//! Turning a raw byte stream into complete records.
//!
//! The [`Chunker`] accumulates bytes as the transport delivers them and asks
//! a protocol-supplied [`Sieve`] where the complete records are. Each record
//! is handed out once, in buffer order, stamped with the arrival time of its
//! first byte. Bytes between records are handed out separately as non-data.

mod sieve;

pub use sieve::{RegexSieve, Sieve};

use chrono::{DateTime, Utc};
use std::collections::VecDeque;
use std::fmt;
use tracing::{trace, warn};

/// Default cap on bytes held while waiting for a record to complete.
pub const DEFAULT_MAX_BUFFER: usize = 64 * 1024;

/// One slice of the stream.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Chunk {
    pub data: Vec<u8>,
    pub timestamp: DateTime<Utc>,
}

/// Accumulating buffer driven by a [`Sieve`].
pub struct Chunker {
    sieve: Box<dyn Sieve>,
    buffer: Vec<u8>,
    /// `(offset into buffer, arrival time)` of each block still in the buffer
    arrivals: VecDeque<(usize, DateTime<Utc>)>,
    data: VecDeque<Chunk>,
    non_data: VecDeque<Chunk>,
    max_buffer: usize,
}

impl Chunker {
    pub fn new(sieve: impl Sieve + 'static) -> Self {
        Self {
            sieve: Box::new(sieve),
            buffer: Vec::new(),
            arrivals: VecDeque::new(),
            data: VecDeque::new(),
            non_data: VecDeque::new(),
            max_buffer: DEFAULT_MAX_BUFFER,
        }
    }

    /// Bytes kept while no record completes; older bytes are discarded as
    /// non-data beyond this.
    pub fn with_max_buffer(mut self, max_buffer: usize) -> Self {
        self.max_buffer = max_buffer.max(1);
        self
    }

    /// Append bytes received at `timestamp` and extract any complete records.
    pub fn add_chunk(&mut self, bytes: &[u8], timestamp: DateTime<Utc>) {
        if bytes.is_empty() {
            return;
        }
        self.arrivals.push_back((self.buffer.len(), timestamp));
        self.buffer.extend_from_slice(bytes);
        self.extract();
        self.enforce_limit();
    }

    /// Next complete record, oldest first.
    pub fn next_data(&mut self) -> Option<Chunk> {
        self.data.pop_front()
    }

    /// Next run of bytes found between records, oldest first.
    pub fn next_non_data(&mut self) -> Option<Chunk> {
        self.non_data.pop_front()
    }

    /// Bytes waiting for a record to complete.
    pub fn pending(&self) -> &[u8] {
        &self.buffer
    }

    /// Drop everything, including records not yet collected.
    pub fn clean(&mut self) {
        self.buffer.clear();
        self.arrivals.clear();
        self.data.clear();
        self.non_data.clear();
    }

    fn extract(&mut self) {
        let mut ranges = self.sieve.sieve(&self.buffer);
        ranges.sort_unstable();

        let mut cursor = 0;
        for (start, end) in ranges {
            if start < cursor || start >= end || end > self.buffer.len() {
                trace!(start, end, "skipping overlapping or invalid range");
                continue;
            }
            if start > cursor {
                let chunk = self.slice(cursor, start);
                self.non_data.push_back(chunk);
            }
            let chunk = self.slice(start, end);
            self.data.push_back(chunk);
            cursor = end;
        }

        self.consume(cursor);
    }

    fn enforce_limit(&mut self) {
        if self.buffer.len() <= self.max_buffer {
            return;
        }
        let excess = self.buffer.len() - self.max_buffer;
        warn!(excess, "chunker buffer full, discarding oldest bytes");
        let chunk = self.slice(0, excess);
        self.non_data.push_back(chunk);
        self.consume(excess);
    }

    fn slice(&self, start: usize, end: usize) -> Chunk {
        Chunk {
            data: self.buffer[start..end].to_vec(),
            timestamp: self.timestamp_at(start),
        }
    }

    fn timestamp_at(&self, offset: usize) -> DateTime<Utc> {
        self.arrivals
            .iter()
            .take_while(|(start, _)| *start <= offset)
            .last()
            .map(|(_, ts)| *ts)
            .unwrap_or_else(Utc::now)
    }

    /// Remove the first `count` bytes and rebase arrival offsets.
    fn consume(&mut self, count: usize) {
        if count == 0 {
            return;
        }
        let first_kept = self.timestamp_at(count);
        self.buffer.drain(..count);
        self.arrivals.retain(|(start, _)| *start > count);
        for (start, _) in self.arrivals.iter_mut() {
            *start -= count;
        }
        if !self.buffer.is_empty() && self.arrivals.front().map_or(true, |(s, _)| *s > 0) {
            self.arrivals.push_front((0, first_kept));
        }
    }
}

impl fmt::Debug for Chunker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Chunker")
            .field("pending", &self.buffer.len())
            .field("data", &self.data.len())
            .field("non_data", &self.non_data.len())
            .finish_non_exhaustive()
    }
}
