//! # compseq
//!
//! A two-tier compressive store for protein sequence databases.
//!
//! A corpus of **original** sequences is held as (a) a **coarse** database
//! of representative fragments with a k-mer seed index and (b) a
//! **compressed** database that rewrites every original as an ordered list
//! of links into coarse fragments plus per-link edit deltas. An external
//! similarity search runs against the small coarse FASTA; its hits are
//! expanded back into original sequences through the link tables with one
//! index lookup and one verified seek per record, and the reconstructed
//! originals feed the fine search stage.
//!
//! Building is concurrent: ingestion appends coarse sequences under a
//! short write lock while a dedicated writer task streams compressed
//! records to disk, and [`CoarseDb::save`] fans out into one persistence
//! task per file.
//!
//! # Example
//!
//! ```no_run
//! use compseq::{CoarseHit, Db};
//!
//! # fn main() -> compseq::Result<()> {
//! let db = Db::open_read("/data/proteins.compseq")?;
//! let hits = [CoarseHit::new(3, 1, 120, 1e-20)];
//! for oseq in db.expand_hits(hits, 1e-10)? {
//!     println!("{oseq}");
//! }
//! # Ok(())
//! # }
//! ```

/// The residue alphabet for seed hashing
mod alphabet;

/// The coarse store and its on-disk artifacts
pub mod coarse;

/// The compressed store
pub mod compressed;

/// Database handle and persisted parameters
mod db;

/// Error definitions
pub mod error;

/// Expansion of coarse hits into original sequences
pub mod expand;

/// The k-mer seed index
pub mod seeds;

/// Sequence value types
pub mod seq;

pub use alphabet::{residue_index, ALPHABET, ALPHABET_SIZE};
pub use coarse::{
    CoarseDb, FILE_COARSE_FASTA, FILE_COARSE_LINKS, FILE_COARSE_LINKS_INDEX,
    FILE_COARSE_PLAIN_LINKS, FILE_COARSE_PLAIN_SEEDS, FILE_COARSE_SEEDS,
};
pub use compressed::{CompressedDb, FILE_COMPRESSED, FILE_COMPRESSED_INDEX};
pub use db::{Db, DbParams, FILE_PARAMS};
pub use error::{Error, Result};
pub use expand::{expand_hits, CoarseHit};
pub use seeds::{SeedLoc, Seeds};
pub use seq::{
    is_low_complexity, seq_identity, CoarseSeq, CompressedSeq, DiffSolver, LinkToCoarse,
    LinkToCompressed, OriginalSeq, PassthroughDiff, Sequence,
};
