//! Top-level database handle tying the coarse and compressed stores
//! together with their persisted parameters.

use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tracing::info;

use crate::coarse::CoarseDb;
use crate::compressed::{self, CompressedDb};
use crate::error::{ReadError, Result};
use crate::expand::{expand_hits, CoarseHit};
use crate::seq::{DiffSolver, OriginalSeq, PassthroughDiff};

/// Database parameters persisted alongside the stores.
pub const FILE_PARAMS: &str = "params";

/// Tunables fixed when a database is created.
///
/// In append mode the stored values win (the seed table on disk was built
/// with them); only `read_only` is taken from the caller.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DbParams {
    /// k-mer length of the seed index.
    pub map_seed_size: usize,
    /// Window used to reject seeds inside monotonic runs.
    pub low_complexity_window: usize,
    /// Enables the plain-text dumps next to the binary files.
    pub save_plain: bool,
    /// Disallows seed persistence on save.
    pub read_only: bool,
}
impl Default for DbParams {
    fn default() -> Self {
        Self {
            map_seed_size: 6,
            low_complexity_window: 10,
            save_plain: false,
            read_only: false,
        }
    }
}

/// A compressive sequence database: the coarse store, the compressed
/// store, and the parameters binding them.
pub struct Db {
    path: PathBuf,
    params: DbParams,
    /// Total residue count of the ingested originals, for the external
    /// fine-search `-dbsize` flag.
    blast_db_size: AtomicU64,
    pub coarse: CoarseDb,
    pub compressed: CompressedDb,
}
impl Db {
    /// Opens a database for building under `path`, creating the directory
    /// when needed. With `append` the existing state is loaded and
    /// extended; the stored parameters override the supplied ones except
    /// for `read_only`.
    pub fn open_write(path: impl AsRef<Path>, append: bool, params: DbParams) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        fs::create_dir_all(&path)?;

        let (params, blast_db_size) = if append {
            let (stored, blast_db_size) = read_params(&path)?;
            (
                DbParams {
                    read_only: params.read_only,
                    ..stored
                },
                blast_db_size,
            )
        } else {
            (params, 0)
        };
        info!(?path, append, ?params, "opening database for writing");

        let coarse = CoarseDb::open_write(&path, append, &params)?;
        let compressed = CompressedDb::Write(compressed::Writer::open(&path, append)?);
        Ok(Self {
            path,
            params,
            blast_db_size: AtomicU64::new(blast_db_size),
            coarse,
            compressed,
        })
    }

    /// Opens an existing database for searching, with spans reconstructed
    /// through the [`PassthroughDiff`] solver.
    pub fn open_read(path: impl AsRef<Path>) -> Result<Self> {
        Self::open_read_with_solver(path, Arc::new(PassthroughDiff))
    }

    /// Opens an existing database for searching with a caller-provided
    /// diff solver.
    pub fn open_read_with_solver(
        path: impl AsRef<Path>,
        solver: Arc<dyn DiffSolver>,
    ) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let (params, blast_db_size) = read_params(&path)?;
        info!(?path, ?params, "opening database for reading");

        let coarse = CoarseDb::open_read(&path, &params)?;
        let compressed = CompressedDb::Read(compressed::Reader::open(&path, solver)?);
        Ok(Self {
            path,
            params,
            blast_db_size: AtomicU64::new(blast_db_size),
            coarse,
            compressed,
        })
    }

    /// Directory this database lives in.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The parameters this database was opened with.
    #[must_use]
    pub fn params(&self) -> &DbParams {
        &self.params
    }

    /// Total residue count of the ingested originals.
    #[must_use]
    pub fn blast_db_size(&self) -> u64 {
        self.blast_db_size.load(Ordering::Relaxed)
    }

    /// Adds to the running original-residue total. Called by the ingestion
    /// driver once per original sequence.
    pub fn add_to_db_size(&self, residues: u64) {
        self.blast_db_size.fetch_add(residues, Ordering::Relaxed);
    }

    /// Persists all new coarse state and the database parameters.
    pub fn save(&self) -> Result<()> {
        self.coarse.save()?;
        self.save_params()
    }

    /// Expands a stream of coarse-search hits into deduplicated original
    /// sequences; see [`expand_hits`].
    pub fn expand_hits(
        &self,
        hits: impl IntoIterator<Item = CoarseHit>,
        coarse_eval_threshold: f64,
    ) -> Result<Vec<OriginalSeq>> {
        expand_hits(&self.coarse, &self.compressed, hits, coarse_eval_threshold)
    }

    /// Drains the compressed writer and closes the database. Call
    /// [`save`](Self::save) first so the coarse state is complete.
    pub fn write_close(mut self) -> Result<()> {
        self.compressed.close()
    }

    /// Closes a database opened for reading.
    pub fn read_close(self) {}

    fn save_params(&self) -> Result<()> {
        let mut writer = BufWriter::new(File::create(self.path.join(FILE_PARAMS))?);
        writeln!(writer, "MapSeedSize: {}", self.params.map_seed_size)?;
        writeln!(writer, "LowComplexityWindow: {}", self.params.low_complexity_window)?;
        writeln!(writer, "SavePlain: {}", self.params.save_plain)?;
        writeln!(writer, "BlastDBSize: {}", self.blast_db_size())?;
        writer.flush()?;
        Ok(())
    }
}

/// Opens a database file for writing: fresh databases truncate, append
/// mode keeps the contents readable for loading.
pub(crate) fn open_write_file(dir: &Path, name: &str, append: bool) -> Result<File> {
    let file = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(!append)
        .open(dir.join(name))?;
    Ok(file)
}

fn read_params(dir: &Path) -> Result<(DbParams, u64)> {
    let reader = BufReader::new(File::open(dir.join(FILE_PARAMS))?);
    let mut params = DbParams::default();
    let mut blast_db_size = 0u64;
    for line in reader.lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let Some((key, value)) = line.split_once(':') else {
            return Err(ReadError::InvalidParams { line }.into());
        };
        match key.trim() {
            "MapSeedSize" => params.map_seed_size = parse_param(value, &line)?,
            "LowComplexityWindow" => params.low_complexity_window = parse_param(value, &line)?,
            "SavePlain" => params.save_plain = parse_param(value, &line)?,
            "BlastDBSize" => blast_db_size = parse_param(value, &line)?,
            // Unknown keys are tolerated so newer databases stay readable.
            _ => {}
        }
    }
    Ok((params, blast_db_size))
}

fn parse_param<T: FromStr>(value: &str, line: &str) -> Result<T> {
    value.trim().parse().map_err(|_| {
        ReadError::InvalidParams {
            line: line.to_string(),
        }
        .into()
    })
}

#[cfg(test)]
mod testing {
    use super::*;

    #[test]
    fn test_params_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let params = DbParams {
            map_seed_size: 4,
            low_complexity_window: 8,
            save_plain: true,
            read_only: false,
        };
        {
            let db = Db::open_write(dir.path(), false, params).unwrap();
            db.add_to_db_size(12345);
            db.save().unwrap();
            db.write_close().unwrap();
        }

        let (stored, blast_db_size) = read_params(dir.path()).unwrap();
        assert_eq!(stored, params);
        assert_eq!(blast_db_size, 12345);
    }

    #[test]
    fn test_params_reject_garbage() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(FILE_PARAMS), "MapSeedSize 6\n").unwrap();
        assert!(read_params(dir.path()).is_err());

        std::fs::write(dir.path().join(FILE_PARAMS), "MapSeedSize: six\n").unwrap();
        assert!(read_params(dir.path()).is_err());
    }

    #[test]
    fn test_params_tolerate_unknown_keys() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join(FILE_PARAMS),
            "MapSeedSize: 5\nFutureKnob: yes\n",
        )
        .unwrap();
        let (params, _) = read_params(dir.path()).unwrap();
        assert_eq!(params.map_seed_size, 5);
    }

    #[test]
    fn test_append_prefers_stored_params() {
        let dir = tempfile::tempdir().unwrap();
        let params = DbParams {
            map_seed_size: 4,
            low_complexity_window: 3,
            save_plain: false,
            read_only: false,
        };
        {
            let db = Db::open_write(dir.path(), false, params).unwrap();
            db.coarse.add(b"MKTAYIAKQRQISFVK");
            db.save().unwrap();
            db.write_close().unwrap();
        }

        let db = Db::open_write(dir.path(), true, DbParams::default()).unwrap();
        assert_eq!(db.params().map_seed_size, 4);
        assert_eq!(db.params().low_complexity_window, 3);
        db.write_close().unwrap();
    }
}
