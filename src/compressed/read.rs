//! Read half of the compressed store.

use std::fs::File;
use std::io::{BufRead, BufReader, Seek, SeekFrom};
use std::path::Path;
use std::sync::Arc;

use memmap2::Mmap;
use parking_lot::Mutex;
use tracing::debug;

use crate::coarse::CoarseDb;
use crate::error::{ReadError, Result};
use crate::seq::{CompressedSeq, DiffSolver, LinkToCoarse, OriginalSeq};

use super::{FILE_COMPRESSED, FILE_COMPRESSED_INDEX};

/// Read half of the compressed store: locates records by original-sequence
/// id through the memory-mapped fixed-stride index, seeks the data file
/// with position verification, and reconstructs originals through a
/// [`DiffSolver`].
pub struct Reader {
    data: Mutex<File>,
    index: Option<Mmap>,
    solver: Arc<dyn DiffSolver>,
}
impl Reader {
    pub(crate) fn open(dir: &Path, solver: Arc<dyn DiffSolver>) -> Result<Self> {
        let data = File::open(dir.join(FILE_COMPRESSED))?;
        let index_file = File::open(dir.join(FILE_COMPRESSED_INDEX))?;
        let index = if index_file.metadata()?.len() == 0 {
            None
        } else {
            Some(unsafe { Mmap::map(&index_file) }?)
        };
        debug!(
            records = index.as_ref().map_or(0, |index| index.len() / 8),
            "opened compressed reader"
        );
        Ok(Self {
            data: Mutex::new(data),
            index,
            solver,
        })
    }

    /// Number of original sequences the index addresses.
    #[must_use]
    pub fn num_seqs(&self) -> usize {
        self.index.as_ref().map_or(0, |index| index.len() / 8)
    }

    /// Reads and reconstructs the original sequence `org_seq_id`.
    pub fn read_seq(&self, coarsedb: &CoarseDb, org_seq_id: usize) -> Result<OriginalSeq> {
        let record = self.read_record(org_seq_id)?;
        let seq = parse_record(org_seq_id, &record)?;
        seq.decompress(coarsedb, self.solver.as_ref())
    }

    /// Byte offset of record `org_seq_id` in the data file.
    fn seq_offset(&self, org_seq_id: usize) -> Result<u64> {
        let out_of_range = |available: usize| ReadError::OutOfRange {
            file: FILE_COMPRESSED_INDEX,
            requested: org_seq_id,
            available,
        };
        let Some(index) = &self.index else {
            return Err(out_of_range(0).into());
        };
        let start = org_seq_id * 8;
        if start + 8 > index.len() {
            return Err(out_of_range(index.len() / 8).into());
        }
        let mut buf = [0u8; 8];
        buf.copy_from_slice(&index[start..start + 8]);
        Ok(u64::from_be_bytes(buf))
    }

    /// Seeks to the record and reads one CSV line.
    fn read_record(&self, org_seq_id: usize) -> Result<csv::StringRecord> {
        let offset = self.seq_offset(org_seq_id)?;
        let mut data = self.data.lock();
        let landed = data.seek(SeekFrom::Start(offset))?;
        if landed != offset {
            return Err(ReadError::SeekMismatch {
                file: FILE_COMPRESSED,
                requested: offset,
                landed,
            }
            .into());
        }
        let mut line = Vec::new();
        BufReader::new(&mut *data).read_until(b'\n', &mut line)?;
        drop(data);

        let malformed = |reason: String| ReadError::MalformedRecord {
            id: org_seq_id,
            reason,
        };
        if line.is_empty() {
            return Err(malformed("record is empty".to_string()).into());
        }
        let mut csv_reader = csv::ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .from_reader(line.as_slice());
        let mut record = csv::StringRecord::new();
        let found = csv_reader
            .read_record(&mut record)
            .map_err(|err| malformed(err.to_string()))?;
        if !found {
            return Err(malformed("record is empty".to_string()).into());
        }
        Ok(record)
    }
}

/// Parses `name, (coarse_seq_id, coarse_start, coarse_end, diff)*` into a
/// [`CompressedSeq`]. A wrong field count or a non-integer where an integer
/// is expected is surfaced as a malformed record, never skipped.
fn parse_record(org_seq_id: usize, record: &csv::StringRecord) -> Result<CompressedSeq> {
    if record.is_empty() {
        return Err(ReadError::MalformedRecord {
            id: org_seq_id,
            reason: "record has no name field".to_string(),
        }
        .into());
    }
    if (record.len() - 1) % 4 != 0 {
        return Err(ReadError::MalformedRecord {
            id: org_seq_id,
            reason: format!(
                "expected four-tuples of link fields, got {} fields after the name",
                record.len() - 1
            ),
        }
        .into());
    }

    let mut seq = CompressedSeq::new(org_seq_id as u32, &record[0]);
    for i in (1..record.len()).step_by(4) {
        seq.add(LinkToCoarse::new(
            parse_field(org_seq_id, &record[i])?,
            parse_field(org_seq_id, &record[i + 1])?,
            parse_field(org_seq_id, &record[i + 2])?,
            &record[i + 3],
        ));
    }
    Ok(seq)
}

fn parse_field(org_seq_id: usize, field: &str) -> Result<u32> {
    field.parse().map_err(|_| {
        ReadError::MalformedRecord {
            id: org_seq_id,
            reason: format!("expected integer field, got {field:?}"),
        }
        .into()
    })
}

#[cfg(test)]
mod testing {
    use super::*;

    fn record(fields: &[&str]) -> csv::StringRecord {
        csv::StringRecord::from(fields.to_vec())
    }

    #[test]
    fn test_parse_record_with_links() {
        let seq = parse_record(7, &record(&["orig7", "3", "0", "16", "", "5", "2", "10", "s4X"]))
            .unwrap();
        assert_eq!(seq.id, 7);
        assert_eq!(seq.name, "orig7");
        assert_eq!(seq.links.len(), 2);
        assert_eq!(seq.links[0], LinkToCoarse::new(3, 0, 16, ""));
        assert_eq!(seq.links[1], LinkToCoarse::new(5, 2, 10, "s4X"));
    }

    #[test]
    fn test_parse_record_name_only() {
        let seq = parse_record(0, &record(&["lonely"])).unwrap();
        assert_eq!(seq.name, "lonely");
        assert!(seq.links.is_empty());
    }

    #[test]
    fn test_parse_record_bad_arity() {
        let err = parse_record(5, &record(&["orig5", "3", "0"])).unwrap_err();
        assert!(matches!(
            err,
            crate::error::Error::Read(ReadError::MalformedRecord { id: 5, .. })
        ));
    }

    #[test]
    fn test_parse_record_bad_integer() {
        let err = parse_record(5, &record(&["orig5", "3", "x", "16", ""])).unwrap_err();
        assert!(matches!(
            err,
            crate::error::Error::Read(ReadError::MalformedRecord { id: 5, .. })
        ));
    }
}
