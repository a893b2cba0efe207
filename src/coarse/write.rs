//! Persistence of the coarse store.
//!
//! `save` fans out into one task per file. The tasks share a frozen
//! snapshot of the store (the caller holds the sequence and seed read
//! locks) and each owns a distinct file handle, so they run independently.

use std::fs::File;
use std::io::{self, BufWriter, Seek, SeekFrom, Write};
use std::sync::Arc;
use std::thread;
use std::time::Instant;

use byteorder::{BigEndian, WriteBytesExt};
use flate2::write::GzEncoder;
use flate2::Compression;
use parking_lot::Mutex;
use tracing::{debug, info};

use crate::error::{Result, WriteError};
use crate::seeds::Seeds;
use crate::seq::CoarseSeq;

use super::{
    CoarseDb, Files, FILE_COARSE_FASTA, FILE_COARSE_LINKS, FILE_COARSE_PLAIN_LINKS,
    FILE_COARSE_PLAIN_SEEDS, FILE_COARSE_SEEDS,
};

/// Empties a file and rewinds its cursor so the next save rewrites it from
/// the start.
pub(super) fn truncate(mut file: &File) -> io::Result<()> {
    file.set_len(0)?;
    file.seek(SeekFrom::Start(0))?;
    Ok(())
}

pub(super) fn save(coarsedb: &CoarseDb) -> Result<()> {
    let Files::Write(files) = &coarsedb.files else {
        return Err(WriteError::NotWritable.into());
    };

    let timer = Instant::now();
    let seqs_guard = coarsedb.seqs.read();
    let seeds_guard = coarsedb.seeds.read();
    let seqs: &[Arc<CoarseSeq>] = &seqs_guard;
    let seeds: &Seeds = &seeds_guard;

    let mut results = Vec::new();
    thread::scope(|scope| {
        let mut tasks = Vec::new();
        tasks.push(scope.spawn(|| save_fasta(&files.fasta, seqs, coarsedb.seqs_read)));
        tasks.push(scope.spawn(|| save_links(&files.links, &files.links_index, seqs)));
        if !coarsedb.read_only {
            tasks.push(scope.spawn(|| save_seeds(&files.seeds, seeds)));
        }
        if let Some(plain) = &files.plain_links {
            tasks.push(scope.spawn(move || save_links_plain(plain, seqs)));
        }
        if !coarsedb.read_only {
            if let Some(plain) = &files.plain_seeds {
                tasks.push(scope.spawn(move || save_seeds_plain(plain, seeds)));
            }
        }
        for task in tasks {
            results.push(task.join().expect("save task panicked"));
        }
    });
    for result in results {
        result?;
    }

    info!(sequences = seqs.len(), elapsed = ?timer.elapsed(), "saved coarse database");
    Ok(())
}

/// Appends every sequence past the `seqs_read` watermark as a FASTA entry.
fn save_fasta(file: &Mutex<File>, seqs: &[Arc<CoarseSeq>], seqs_read: usize) -> Result<()> {
    let timer = Instant::now();
    let mut file = file.lock();
    file.seek(SeekFrom::End(0))?;
    let mut writer = BufWriter::new(&mut *file);
    for seq in &seqs[seqs_read..] {
        writeln!(writer, "> {}", seq.id())?;
        writer.write_all(seq.residues())?;
        writer.write_all(b"\n")?;
    }
    writer.flush()?;
    drop(writer);
    debug!(
        file = FILE_COARSE_FASTA,
        appended = seqs.len() - seqs_read,
        elapsed = ?timer.elapsed(),
        "wrote coarse fasta"
    );
    Ok(())
}

/// Rewrites the link sections in id order and the fixed-stride offset
/// index alongside them. A section is a count followed by
/// `(org_seq_id, coarse_start, coarse_end)` records.
fn save_links(links_file: &Mutex<File>, index_file: &Mutex<File>, seqs: &[Arc<CoarseSeq>]) -> Result<()> {
    let timer = Instant::now();
    let mut links_file = links_file.lock();
    let mut index_file = index_file.lock();
    truncate(&links_file)?;
    truncate(&index_file)?;

    let mut links = BufWriter::new(&mut *links_file);
    let mut index = BufWriter::new(&mut *index_file);
    let mut offset = 0u64;
    let mut total = 0usize;
    for seq in seqs {
        index.write_u64::<BigEndian>(offset)?;
        let seq_links = seq.links();
        links.write_u32::<BigEndian>(seq_links.len() as u32)?;
        for link in &seq_links {
            links.write_u32::<BigEndian>(link.org_seq_id)?;
            links.write_u16::<BigEndian>(link.coarse_start)?;
            links.write_u16::<BigEndian>(link.coarse_end)?;
        }
        offset += 4 + 8 * seq_links.len() as u64;
        total += seq_links.len();
    }
    links.flush()?;
    index.flush()?;
    drop(links);
    drop(index);
    debug!(
        file = FILE_COARSE_LINKS,
        links = total,
        elapsed = ?timer.elapsed(),
        "wrote coarse links and index"
    );
    Ok(())
}

/// Rewrites the gzip-framed seed table: for each non-empty bucket in
/// ascending hash order, the hash, the location count, and the locations.
fn save_seeds(file: &Mutex<File>, seeds: &Seeds) -> Result<()> {
    let timer = Instant::now();
    let gz_err = |source: io::Error| WriteError::Gzip {
        file: FILE_COARSE_SEEDS,
        source,
    };

    let mut file = file.lock();
    truncate(&file)?;
    let mut gz = GzEncoder::new(BufWriter::new(&mut *file), Compression::fast());
    for (hash, locs) in seeds.iter_non_empty() {
        gz.write_u32::<BigEndian>(hash as u32).map_err(&gz_err)?;
        gz.write_u32::<BigEndian>(locs.len() as u32).map_err(&gz_err)?;
        for loc in locs {
            gz.write_u32::<BigEndian>(loc.seq_ind).map_err(&gz_err)?;
            gz.write_u16::<BigEndian>(loc.res_ind).map_err(&gz_err)?;
        }
    }
    gz.finish().map_err(&gz_err)?.flush()?;
    debug!(
        file = FILE_COARSE_SEEDS,
        locations = seeds.num_locs(),
        elapsed = ?timer.elapsed(),
        "wrote seed table"
    );
    Ok(())
}

/// Plain-text mirror of the seed table: one record per non-empty bucket,
/// the k-mer followed by its location pairs.
fn save_seeds_plain(file: &Mutex<File>, seeds: &Seeds) -> Result<()> {
    let timer = Instant::now();
    let mut file = file.lock();
    truncate(&file)?;
    let mut writer = csv::Writer::from_writer(BufWriter::new(&mut *file));
    for (hash, locs) in seeds.iter_non_empty() {
        let mut record = Vec::with_capacity(1 + 2 * locs.len());
        record.push(String::from_utf8_lossy(&seeds.unhash_kmer(hash)).into_owned());
        for loc in locs {
            record.push(loc.seq_ind.to_string());
            record.push(loc.res_ind.to_string());
        }
        writer.write_record(&record)?;
    }
    writer.flush()?;
    debug!(file = FILE_COARSE_PLAIN_SEEDS, elapsed = ?timer.elapsed(), "wrote plain seeds");
    Ok(())
}

/// Plain-text mirror of the link sections: one record per coarse sequence,
/// its id followed by link triples.
fn save_links_plain(file: &Mutex<File>, seqs: &[Arc<CoarseSeq>]) -> Result<()> {
    let timer = Instant::now();
    let mut file = file.lock();
    truncate(&file)?;
    let mut writer = csv::Writer::from_writer(BufWriter::new(&mut *file));
    for seq in seqs {
        let seq_links = seq.links();
        let mut record = Vec::with_capacity(1 + 3 * seq_links.len());
        record.push(seq.id().to_string());
        for link in &seq_links {
            record.push(link.org_seq_id.to_string());
            record.push(link.coarse_start.to_string());
            record.push(link.coarse_end.to_string());
        }
        writer.write_record(&record)?;
    }
    writer.flush()?;
    debug!(file = FILE_COARSE_PLAIN_LINKS, elapsed = ?timer.elapsed(), "wrote plain links");
    Ok(())
}
