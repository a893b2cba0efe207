//! Load and expansion paths of the coarse store.

use std::collections::HashSet;
use std::fs::File;
use std::io::{self, BufRead, BufReader, Seek, SeekFrom};
use std::sync::Arc;
use std::time::Instant;

use byteorder::{BigEndian, ReadBytesExt};
use flate2::read::GzDecoder;
use tracing::debug;

use crate::compressed::CompressedDb;
use crate::error::{ReadError, Result};
use crate::seeds::{SeedLoc, Seeds};
use crate::seq::{CoarseSeq, LinkToCompressed, OriginalSeq};

use super::{
    CoarseDb, Files, ReadFiles, FILE_COARSE_FASTA, FILE_COARSE_LINKS, FILE_COARSE_LINKS_INDEX,
    FILE_COARSE_SEEDS,
};

/// Loads the coarse FASTA. Entries were written by this crate, one header
/// and one residue line per sequence, so ids follow file order.
pub(super) fn read_fasta(file: &File) -> Result<Vec<Arc<CoarseSeq>>> {
    let timer = Instant::now();
    let mut seqs = Vec::new();
    let mut reader = BufReader::new(file);
    let mut line = String::new();
    let mut name: Option<String> = None;
    loop {
        line.clear();
        if reader.read_line(&mut line)? == 0 {
            break;
        }
        let trimmed = line.trim_end_matches(['\n', '\r']);
        if let Some(header) = trimmed.strip_prefix('>') {
            name = Some(header.trim().to_string());
        } else if let Some(name) = name.take() {
            let id = seqs.len() as u32;
            seqs.push(Arc::new(CoarseSeq::new(id, name, trimmed.as_bytes())));
        }
    }
    debug!(
        file = FILE_COARSE_FASTA,
        sequences = seqs.len(),
        elapsed = ?timer.elapsed(),
        "loaded coarse fasta"
    );
    Ok(seqs)
}

/// Loads the gzip-framed seed table. Locations are appended in file order,
/// which preserves the order they were indexed in.
pub(super) fn read_seeds(file: &File, seeds: &mut Seeds) -> Result<()> {
    if file.metadata()?.len() == 0 {
        return Ok(());
    }
    let timer = Instant::now();
    let gz_err = |source: io::Error| ReadError::Gzip {
        file: FILE_COARSE_SEEDS,
        source,
    };

    let mut gz = GzDecoder::new(BufReader::new(file));
    let mut total = 0usize;
    loop {
        let hash = match gz.read_u32::<BigEndian>() {
            Ok(hash) => hash as usize,
            Err(err) if err.kind() == io::ErrorKind::UnexpectedEof => break,
            Err(err) => return Err(gz_err(err).into()),
        };
        if hash >= seeds.num_buckets() {
            return Err(ReadError::OutOfRange {
                file: FILE_COARSE_SEEDS,
                requested: hash,
                available: seeds.num_buckets(),
            }
            .into());
        }
        let count = gz.read_u32::<BigEndian>().map_err(&gz_err)?;
        for _ in 0..count {
            let seq_ind = gz.read_u32::<BigEndian>().map_err(&gz_err)?;
            let res_ind = gz.read_u16::<BigEndian>().map_err(&gz_err)?;
            seeds.insert(hash, SeedLoc::new(seq_ind, res_ind));
            total += 1;
        }
    }
    debug!(
        file = FILE_COARSE_SEEDS,
        locations = total,
        elapsed = ?timer.elapsed(),
        "loaded seed table"
    );
    Ok(())
}

/// Loads the link sections into the in-memory link chains, in id order.
pub(super) fn read_links(file: &File, seqs: &[Arc<CoarseSeq>]) -> Result<()> {
    if file.metadata()?.len() == 0 {
        return Ok(());
    }
    let timer = Instant::now();
    let mut reader = BufReader::new(file);
    let mut total = 0usize;
    for seq in seqs {
        let count = match reader.read_u32::<BigEndian>() {
            Ok(count) => count,
            Err(err) if err.kind() == io::ErrorKind::UnexpectedEof => break,
            Err(err) => return Err(err.into()),
        };
        for _ in 0..count {
            let org_seq_id = reader.read_u32::<BigEndian>()?;
            let coarse_start = reader.read_u16::<BigEndian>()?;
            let coarse_end = reader.read_u16::<BigEndian>()?;
            seq.add_link(LinkToCompressed::new(org_seq_id, coarse_start, coarse_end));
            total += 1;
        }
    }
    debug!(
        file = FILE_COARSE_LINKS,
        links = total,
        elapsed = ?timer.elapsed(),
        "loaded coarse links"
    );
    Ok(())
}

/// Byte offset of coarse sequence `id`'s section in the links file, looked
/// up in the memory-mapped fixed-stride index.
fn link_offset(files: &ReadFiles, id: usize) -> Result<u64> {
    let out_of_range = |available: usize| ReadError::OutOfRange {
        file: FILE_COARSE_LINKS_INDEX,
        requested: id,
        available,
    };
    let Some(index) = &files.links_index else {
        return Err(out_of_range(0).into());
    };
    let start = id * 8;
    if start + 8 > index.len() {
        return Err(out_of_range(index.len() / 8).into());
    }
    let mut buf = [0u8; 8];
    buf.copy_from_slice(&index[start..start + 8]);
    Ok(u64::from_be_bytes(buf))
}

/// Follows every link of coarse sequence `id` back into the compressed
/// store: one index lookup, one verified seek, then a scan of the section's
/// `(org_seq_id, coarse_start, coarse_end)` records.
pub(super) fn expand(
    coarsedb: &CoarseDb,
    comdb: &CompressedDb,
    id: usize,
) -> Result<Vec<OriginalSeq>> {
    let Files::Read(files) = &coarsedb.files else {
        return Err(ReadError::NotReadable.into());
    };

    let offset = link_offset(files, id)?;
    let mut links = files.links.lock();
    let landed = links.seek(SeekFrom::Start(offset))?;
    if landed != offset {
        return Err(ReadError::SeekMismatch {
            file: FILE_COARSE_LINKS,
            requested: offset,
            landed,
        }
        .into());
    }

    let mut reader = BufReader::new(&mut *links);
    let num_links = reader.read_u32::<BigEndian>()?;

    // A coarse sequence can point at different pieces of the same original;
    // each original is produced once, in first-seen order.
    let mut seen = HashSet::new();
    let mut oseqs = Vec::new();
    for _ in 0..num_links {
        let org_seq_id = reader.read_u32::<BigEndian>()?;
        let _coarse_start = reader.read_u16::<BigEndian>()?;
        let _coarse_end = reader.read_u16::<BigEndian>()?;
        if !seen.insert(org_seq_id) {
            continue;
        }
        oseqs.push(comdb.read_seq(coarsedb, org_seq_id as usize)?);
    }
    Ok(oseqs)
}
