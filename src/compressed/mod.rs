//! The compressed store: one CSV-framed record per original sequence,
//! paired with a fixed-stride byte-offset index for random access.
//!
//! A record is the original sequence's name followed by four-tuples of
//! `(coarse_seq_id, coarse_start, coarse_end, diff)`. Entry `i` of the
//! index file is the big-endian byte offset where record `i` begins, so
//! reconstruction costs one index lookup and one verified seek.

mod read;
mod write;

pub use read::Reader;
pub use write::Writer;

use crate::coarse::CoarseDb;
use crate::error::{ReadError, Result, WriteError};
use crate::seq::{CompressedSeq, OriginalSeq};

/// Concatenated CSV records, one per original sequence.
pub const FILE_COMPRESSED: &str = "compressed";
/// Fixed-stride byte offsets into the data file, one per original id.
pub const FILE_COMPRESSED_INDEX: &str = "compressed.index";

/// The compressed store half owned by a database, depending on the mode it
/// was opened in.
pub enum CompressedDb {
    Write(Writer),
    Read(Reader),
}
impl CompressedDb {
    /// Queues one compressed sequence for the writer task. Records land in
    /// the data file in send order.
    pub fn send(&self, seq: CompressedSeq) -> Result<()> {
        match self {
            Self::Write(writer) => writer.send(seq),
            Self::Read(_) => Err(WriteError::NotWritable.into()),
        }
    }

    /// Reads and reconstructs the original sequence `org_seq_id` through
    /// the coarse store.
    pub fn read_seq(&self, coarsedb: &CoarseDb, org_seq_id: usize) -> Result<OriginalSeq> {
        match self {
            Self::Write(_) => Err(ReadError::NotReadable.into()),
            Self::Read(reader) => reader.read_seq(coarsedb, org_seq_id),
        }
    }

    /// Closes the ingress channel and waits for the writer task to drain;
    /// a no-op for the read half.
    pub fn close(&mut self) -> Result<()> {
        match self {
            Self::Write(writer) => writer.close(),
            Self::Read(_) => Ok(()),
        }
    }
}
