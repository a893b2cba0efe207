use std::io;

/// Custom Result type for compseq operations, wrapping the crate [`Error`] type
pub type Result<T> = std::result::Result<T, Error>;

/// The main error type for the compseq library, encompassing all error cases
/// that can occur while building, persisting, or searching a database.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// Errors that occur while reading database files
    #[error("error reading database: {0}")]
    Read(#[from] ReadError),

    /// Errors that occur while writing database files
    #[error("error writing database: {0}")]
    Write(#[from] WriteError),

    /// Errors that occur while expanding coarse hits into original sequences
    #[error("error expanding sequence: {0}")]
    Expand(#[from] ExpandError),

    /// Standard I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Errors from the csv dependency for record framing
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
}
impl Error {
    /// Checks whether the error is a per-record decompression failure.
    ///
    /// The expand-hits driver skips hits that fail this way instead of
    /// aborting the whole batch; every other error is fatal for the batch.
    #[must_use]
    pub fn is_decompress(&self) -> bool {
        matches!(self, Self::Expand(ExpandError::Decompress { .. }))
    }
}

/// Errors raised while reading database files
#[derive(thiserror::Error, Debug)]
pub enum ReadError {
    /// A seek landed at a different position than requested. Reading at the
    /// wrong position would silently corrupt results, so this is always
    /// fatal for the operation.
    #[error("seek to offset {requested} in {file} landed at offset {landed}")]
    SeekMismatch {
        file: &'static str,
        requested: u64,
        landed: u64,
    },

    /// A sequence id beyond what the index file addresses
    #[error("sequence {requested} requested but {file} only indexes {available}")]
    OutOfRange {
        file: &'static str,
        requested: usize,
        available: usize,
    },

    /// A compressed record that does not parse as `name, (id, start, end, diff)*`
    #[error("malformed record for original sequence {id}: {reason}")]
    MalformedRecord { id: usize, reason: String },

    /// A gzip stream that could not be decoded
    #[error("gzip stream in {file}: {source}")]
    Gzip {
        file: &'static str,
        source: io::Error,
    },

    /// An entry in the params file that does not parse as `key: value`
    #[error("malformed params entry: {line:?}")]
    InvalidParams { line: String },

    /// The operation requires a database opened for reading
    #[error("database is not opened for reading")]
    NotReadable,
}

/// Errors raised while writing database files
#[derive(thiserror::Error, Debug)]
pub enum WriteError {
    /// A gzip stream that could not be encoded
    #[error("gzip stream in {file}: {source}")]
    Gzip {
        file: &'static str,
        source: io::Error,
    },

    /// A send on the compressed writer after it was closed
    #[error("compressed writer channel is closed")]
    ChannelClosed,

    /// The compressed writer task died without reporting an error
    #[error("compressed writer task panicked")]
    WriterPanicked,

    /// The operation requires a database opened for writing
    #[error("database is not opened for writing")]
    NotWritable,
}

/// Errors raised while reconstructing original sequences
#[derive(thiserror::Error, Debug)]
pub enum ExpandError {
    /// A compressed record whose coarse spans or diffs could not be resolved
    #[error("could not decompress original sequence {id}: {reason}")]
    Decompress { id: usize, reason: String },
}
