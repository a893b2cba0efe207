//! The coarse store: representative sequences, their seed index, and the
//! link tables binding coarse fragments back to compressed originals.
//!
//! The store is opened in one of three modes: fresh write, append write
//! (existing state is loaded and extended), or read (search). Sequences are
//! append-only with dense ids assigned in ingestion order; persistence
//! rewrites the seeds and link files wholesale while the coarse FASTA only
//! ever grows.

mod read;
mod write;

use std::fs::File;
use std::path::Path;
use std::sync::Arc;

use memmap2::Mmap;
use parking_lot::{Mutex, RwLock, RwLockReadGuard};
use tracing::debug;

use crate::compressed::CompressedDb;
use crate::db::{open_write_file, DbParams};
use crate::error::{ReadError, Result};
use crate::seeds::Seeds;
use crate::seq::{CoarseSeq, OriginalSeq};

/// Representative sequences, one FASTA entry per coarse id.
pub const FILE_COARSE_FASTA: &str = "coarse.fasta";
/// Gzip-framed k-mer seed table.
pub const FILE_COARSE_SEEDS: &str = "coarse.seeds";
/// Per-sequence link sections, unframed so that expansion can seek.
pub const FILE_COARSE_LINKS: &str = "coarse.links";
/// Fixed-stride byte offsets into the links file, one per coarse id.
pub const FILE_COARSE_LINKS_INDEX: &str = "coarse.links.index";
/// Optional plain-text dump of the seed table.
pub const FILE_COARSE_PLAIN_SEEDS: &str = "coarse.seeds.plain";
/// Optional plain-text dump of the link sections.
pub const FILE_COARSE_PLAIN_LINKS: &str = "coarse.links.plain";

/// File handles held by a store opened for writing.
struct WriteFiles {
    fasta: Mutex<File>,
    seeds: Mutex<File>,
    links: Mutex<File>,
    links_index: Mutex<File>,
    plain_seeds: Option<Mutex<File>>,
    plain_links: Option<Mutex<File>>,
}

/// File handles held by a store opened for searching. The links index is
/// memory-mapped (`None` when the file is empty); the links file is seeked
/// under a lock.
struct ReadFiles {
    links: Mutex<File>,
    links_index: Option<Mmap>,
}

enum Files {
    Write(WriteFiles),
    Read(ReadFiles),
}

/// The coarse database.
///
/// Owns every coarse sequence and its link chain. The sequence vector is
/// guarded by a reader/writer lock with a short write section (id
/// allocation plus append); the seed table has its own lock so ingestion
/// and persistence never observe each other mid-update.
pub struct CoarseDb {
    seqs: RwLock<Vec<Arc<CoarseSeq>>>,
    /// Number of sequences loaded from disk at open time; the suffix
    /// `[seqs_read..]` is what `save` appends to the coarse FASTA.
    seqs_read: usize,
    seeds: RwLock<Seeds>,
    files: Files,
    read_only: bool,
}
impl CoarseDb {
    /// Opens the coarse store for building under `dir`. With `append`, the
    /// existing state is loaded first and the seeds/links files are
    /// truncated: they are not amenable to appending (the links index must
    /// stay contiguous by id), so a later [`save`](Self::save) rewrites
    /// them wholesale. The coarse FASTA is never truncated.
    pub(crate) fn open_write(dir: &Path, append: bool, params: &DbParams) -> Result<Self> {
        debug!(?dir, append, "opening coarse database for writing");

        let fasta = open_write_file(dir, FILE_COARSE_FASTA, append)?;
        let seeds_file = open_write_file(dir, FILE_COARSE_SEEDS, append)?;
        let links = open_write_file(dir, FILE_COARSE_LINKS, append)?;
        let links_index = open_write_file(dir, FILE_COARSE_LINKS_INDEX, append)?;
        let plain_seeds = params
            .save_plain
            .then(|| open_write_file(dir, FILE_COARSE_PLAIN_SEEDS, append))
            .transpose()?;
        let plain_links = params
            .save_plain
            .then(|| open_write_file(dir, FILE_COARSE_PLAIN_LINKS, append))
            .transpose()?;

        let mut seqs = Vec::new();
        let mut seeds = Seeds::new(params.map_seed_size, params.low_complexity_window);
        if append {
            seqs = read::read_fasta(&fasta)?;
            read::read_seeds(&seeds_file, &mut seeds)?;
            read::read_links(&links, &seqs)?;
            write::truncate(&seeds_file)?;
            write::truncate(&links)?;
            write::truncate(&links_index)?;
            if let Some(file) = &plain_seeds {
                write::truncate(file)?;
            }
            if let Some(file) = &plain_links {
                write::truncate(file)?;
            }
        }

        let seqs_read = seqs.len();
        Ok(Self {
            seqs: RwLock::new(seqs),
            seqs_read,
            seeds: RwLock::new(seeds),
            files: Files::Write(WriteFiles {
                fasta: Mutex::new(fasta),
                seeds: Mutex::new(seeds_file),
                links: Mutex::new(links),
                links_index: Mutex::new(links_index),
                plain_seeds: plain_seeds.map(Mutex::new),
                plain_links: plain_links.map(Mutex::new),
            }),
            read_only: params.read_only,
        })
    }

    /// Opens an existing coarse store for searching. Sequences are loaded
    /// into memory; the link sections stay on disk and are resolved with
    /// one index lookup and one verified seek per expansion.
    pub(crate) fn open_read(dir: &Path, params: &DbParams) -> Result<Self> {
        debug!(?dir, "opening coarse database for reading");

        let fasta = File::open(dir.join(FILE_COARSE_FASTA))?;
        let links = File::open(dir.join(FILE_COARSE_LINKS))?;
        let links_index_file = File::open(dir.join(FILE_COARSE_LINKS_INDEX))?;
        let links_index = if links_index_file.metadata()?.len() == 0 {
            None
        } else {
            Some(unsafe { Mmap::map(&links_index_file) }?)
        };

        let seqs = read::read_fasta(&fasta)?;
        let seqs_read = seqs.len();
        Ok(Self {
            seqs: RwLock::new(seqs),
            seqs_read,
            seeds: RwLock::new(Seeds::new(
                params.map_seed_size,
                params.low_complexity_window,
            )),
            files: Files::Read(ReadFiles {
                links: Mutex::new(links),
                links_index,
            }),
            read_only: true,
        })
    }

    /// Adds an original sequence's residues as a new coarse sequence,
    /// assigning the next dense id, and indexes its k-mers. The write
    /// section covers only id allocation and the append; seed insertion
    /// happens after the sequence lock is released.
    pub fn add(&self, oseq: &[u8]) -> (u32, Arc<CoarseSeq>) {
        let seq = {
            let mut seqs = self.seqs.write();
            let id = seqs.len() as u32;
            let seq = Arc::new(CoarseSeq::new(id, "", oseq));
            seqs.push(Arc::clone(&seq));
            seq
        };
        self.seeds.write().add(seq.id(), &seq);
        (seq.id(), seq)
    }

    /// Thread-safe lookup of the coarse sequence at index `i`.
    pub fn get(&self, i: usize) -> Result<Arc<CoarseSeq>> {
        let seqs = self.seqs.read();
        match seqs.get(i) {
            Some(seq) => Ok(Arc::clone(seq)),
            None => Err(ReadError::OutOfRange {
                file: FILE_COARSE_FASTA,
                requested: i,
                available: seqs.len(),
            }
            .into()),
        }
    }

    /// Number of coarse sequences in the store.
    #[must_use]
    pub fn len(&self) -> usize {
        self.seqs.read().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.seqs.read().is_empty()
    }

    /// Number of sequences that were already on disk at open time.
    #[must_use]
    pub fn seqs_read(&self) -> usize {
        self.seqs_read
    }

    /// Read access to the seed index.
    pub fn seeds(&self) -> RwLockReadGuard<'_, Seeds> {
        self.seeds.read()
    }

    /// Follows every link of coarse sequence `id` back into the compressed
    /// store and returns the reconstructed originals, deduplicated by
    /// original id in first-seen order.
    pub fn expand(&self, comdb: &CompressedDb, id: usize) -> Result<Vec<OriginalSeq>> {
        read::expand(self, comdb, id)
    }

    /// Variant of [`expand`](Self::expand) for callers carrying the subject
    /// range of a coarse hit. The range is advisory and passes through
    /// without filtering; every link of the sequence is expanded.
    pub fn expand_range(
        &self,
        comdb: &CompressedDb,
        id: usize,
        hit_from: u32,
        hit_to: u32,
    ) -> Result<Vec<OriginalSeq>> {
        let _ = (hit_from, hit_to);
        read::expand(self, comdb, id)
    }

    /// Persists everything new since open: appends the FASTA suffix and
    /// rewrites the seeds, links, and links-index files from scratch, one
    /// parallel task per file over a frozen snapshot of the store. A store
    /// opened read-only skips seed persistence.
    pub fn save(&self) -> Result<()> {
        write::save(self)
    }
}

#[cfg(test)]
mod testing {
    use super::*;
    use crate::seq::LinkToCompressed;

    fn write_params() -> DbParams {
        DbParams {
            map_seed_size: 4,
            low_complexity_window: 3,
            save_plain: false,
            read_only: false,
        }
    }

    #[test]
    fn test_add_assigns_dense_ids() {
        let dir = tempfile::tempdir().unwrap();
        let db = CoarseDb::open_write(dir.path(), false, &write_params()).unwrap();

        let (id0, _) = db.add(b"mktayiak*");
        let (id1, _) = db.add(b"GSHMLVVH");
        assert_eq!((id0, id1), (0, 1));
        assert_eq!(db.len(), 2);
        assert_eq!(db.get(0).unwrap().residues(), b"MKTAYIAK");
        assert_eq!(db.get(1).unwrap().residues(), b"GSHMLVVH");
        assert!(db.get(2).is_err());
    }

    #[test]
    fn test_add_updates_seed_index() {
        let dir = tempfile::tempdir().unwrap();
        let db = CoarseDb::open_write(dir.path(), false, &write_params()).unwrap();

        db.add(b"MKTAYIAK");
        let seeds = db.seeds();
        let hash = seeds.hash_kmer(b"MKTA").unwrap();
        assert_eq!(seeds.bucket(hash).len(), 1);
        assert_eq!(seeds.bucket(hash)[0].seq_ind, 0);
        assert_eq!(seeds.bucket(hash)[0].res_ind, 0);
    }

    #[test]
    fn test_save_and_reload_for_append() {
        let dir = tempfile::tempdir().unwrap();
        {
            let db = CoarseDb::open_write(dir.path(), false, &write_params()).unwrap();
            let (_, seq) = db.add(b"MKTAYIAKQRQISFVK");
            seq.add_link(LinkToCompressed::new(0, 0, 16));
            seq.add_link(LinkToCompressed::new(3, 4, 12));
            db.add(b"GSHMLVVHELGSGAHW");
            db.save().unwrap();
        }

        let db = CoarseDb::open_write(dir.path(), true, &write_params()).unwrap();
        assert_eq!(db.len(), 2);
        assert_eq!(db.seqs_read(), 2);
        assert_eq!(db.get(0).unwrap().residues(), b"MKTAYIAKQRQISFVK");

        let links = db.get(0).unwrap().links();
        assert_eq!(links.len(), 2);
        assert_eq!(links[0], LinkToCompressed::new(0, 0, 16));
        assert_eq!(links[1], LinkToCompressed::new(3, 4, 12));
        assert!(db.get(1).unwrap().links().is_empty());

        let seeds = db.seeds();
        let hash = seeds.hash_kmer(b"MKTA").unwrap();
        assert_eq!(seeds.bucket(hash).len(), 1);
    }

    #[test]
    fn test_append_extends_fasta_without_rewriting() {
        let dir = tempfile::tempdir().unwrap();
        {
            let db = CoarseDb::open_write(dir.path(), false, &write_params()).unwrap();
            db.add(b"MKTAYIAKQRQISFVK");
            db.save().unwrap();
        }
        {
            let db = CoarseDb::open_write(dir.path(), true, &write_params()).unwrap();
            db.add(b"GSHMLVVHELGSGAHW");
            db.save().unwrap();
        }

        let fasta = std::fs::read_to_string(dir.path().join(FILE_COARSE_FASTA)).unwrap();
        assert_eq!(fasta, "> 0\nMKTAYIAKQRQISFVK\n> 1\nGSHMLVVHELGSGAHW\n");
    }

    #[test]
    fn test_expand_requires_read_mode() {
        let dir = tempfile::tempdir().unwrap();
        let db = CoarseDb::open_write(dir.path(), false, &write_params()).unwrap();
        db.add(b"MKTAYIAK");
        db.save().unwrap();

        let comdb = crate::compressed::CompressedDb::Write(
            crate::compressed::Writer::open(dir.path(), false).unwrap(),
        );
        assert!(db.expand(&comdb, 0).is_err());
    }
}
