//! Write half of the compressed store.

use std::io::{BufWriter, Seek, SeekFrom, Write as _};
use std::path::Path;
use std::thread::{self, JoinHandle};

use byteorder::{BigEndian, WriteBytesExt};
use crossbeam_channel::{bounded, Receiver, Sender};
use tracing::debug;

use crate::db::open_write_file;
use crate::error::{Result, WriteError};
use crate::seq::CompressedSeq;

use super::{FILE_COMPRESSED, FILE_COMPRESSED_INDEX};

/// Capacity of the ingress channel feeding the writer task.
const INGRESS_CAPACITY: usize = 500;

/// Write half of the compressed store.
///
/// A single background task drains the ingress channel in send order. For
/// each sequence it serializes one CSV record into a scratch buffer,
/// appends the buffer to the data file, and appends the record's starting
/// byte offset to the index file.
pub struct Writer {
    ingress: Option<Sender<CompressedSeq>>,
    task: Option<JoinHandle<Result<()>>>,
}
impl Writer {
    /// Opens the data and index files under `dir` and starts the writer
    /// task. In append mode writing continues after the existing records.
    pub(crate) fn open(dir: &Path, append: bool) -> Result<Self> {
        let mut data = open_write_file(dir, FILE_COMPRESSED, append)?;
        let mut index = open_write_file(dir, FILE_COMPRESSED_INDEX, append)?;
        let start = data.seek(SeekFrom::End(0))?;
        index.seek(SeekFrom::End(0))?;

        let (ingress, egress) = bounded(INGRESS_CAPACITY);
        let task = thread::spawn(move || drain(egress, data, index, start));
        debug!(start_offset = start, "opened compressed writer");
        Ok(Self {
            ingress: Some(ingress),
            task: Some(task),
        })
    }

    /// Queues one compressed sequence. Blocks when the channel is full;
    /// fails after [`close`](Self::close).
    pub fn send(&self, seq: CompressedSeq) -> Result<()> {
        let Some(ingress) = &self.ingress else {
            return Err(WriteError::ChannelClosed.into());
        };
        ingress
            .send(seq)
            .map_err(|_| WriteError::ChannelClosed.into())
    }

    /// Closes the ingress channel, waits for the task to drain and flush
    /// both files, and surfaces the first error it hit.
    pub fn close(&mut self) -> Result<()> {
        drop(self.ingress.take());
        match self.task.take() {
            Some(task) => match task.join() {
                Ok(result) => result,
                Err(_) => Err(WriteError::WriterPanicked.into()),
            },
            None => Ok(()),
        }
    }
}
impl Drop for Writer {
    fn drop(&mut self) {
        drop(self.ingress.take());
        if let Some(task) = self.task.take() {
            let _ = task.join();
        }
    }
}

fn drain(
    egress: Receiver<CompressedSeq>,
    data: std::fs::File,
    index: std::fs::File,
    start: u64,
) -> Result<()> {
    let mut data = BufWriter::new(data);
    let mut index = BufWriter::new(index);
    let mut byte_offset = start;
    let mut buf: Vec<u8> = Vec::new();
    let mut records = 0usize;

    for seq in egress {
        buf.clear();
        {
            let mut writer = csv::Writer::from_writer(&mut buf);
            let mut record = Vec::with_capacity(1 + 4 * seq.links.len());
            record.push(seq.name.clone());
            for link in &seq.links {
                record.push(link.coarse_seq_id.to_string());
                record.push(link.coarse_start.to_string());
                record.push(link.coarse_end.to_string());
                record.push(link.diff.clone());
            }
            writer.write_record(&record)?;
            writer.flush()?;
        }

        data.write_all(&buf)?;
        index.write_u64::<BigEndian>(byte_offset)?;
        byte_offset += buf.len() as u64;
        records += 1;
    }

    data.flush()?;
    index.flush()?;
    debug!(records, bytes = byte_offset - start, "compressed writer drained");
    Ok(())
}

#[cfg(test)]
mod testing {
    use byteorder::ReadBytesExt;

    use crate::seq::LinkToCoarse;

    use super::*;

    fn compressed_seq(id: u32, name: &str, diff: &str) -> CompressedSeq {
        let mut seq = CompressedSeq::new(id, name);
        seq.add(LinkToCoarse::new(id, 0, 16, diff));
        seq
    }

    #[test]
    fn test_records_and_index_in_send_order() {
        let dir = tempfile::tempdir().unwrap();
        {
            let mut writer = Writer::open(dir.path(), false).unwrap();
            writer.send(compressed_seq(0, "first", "")).unwrap();
            writer.send(compressed_seq(1, "second", "d4X")).unwrap();
            writer.send(compressed_seq(2, "third", "")).unwrap();
            writer.close().unwrap();
        }

        let data = std::fs::read_to_string(dir.path().join(FILE_COMPRESSED)).unwrap();
        let lines: Vec<&str> = data.lines().collect();
        assert_eq!(lines, ["first,0,0,16,", "second,1,0,16,d4X", "third,2,0,16,"]);

        // Entry j of the index is the byte offset where record j begins.
        let raw = std::fs::read(dir.path().join(FILE_COMPRESSED_INDEX)).unwrap();
        assert_eq!(raw.len(), 3 * 8);
        let mut reader = raw.as_slice();
        let mut expected = 0u64;
        for line in &lines {
            assert_eq!(reader.read_u64::<BigEndian>().unwrap(), expected);
            expected += line.len() as u64 + 1;
        }
        assert_eq!(expected, data.len() as u64);
    }

    #[test]
    fn test_append_continues_offsets() {
        let dir = tempfile::tempdir().unwrap();
        {
            let mut writer = Writer::open(dir.path(), false).unwrap();
            writer.send(compressed_seq(0, "first", "")).unwrap();
            writer.close().unwrap();
        }
        {
            let mut writer = Writer::open(dir.path(), true).unwrap();
            writer.send(compressed_seq(1, "second", "")).unwrap();
            writer.close().unwrap();
        }

        let data = std::fs::read_to_string(dir.path().join(FILE_COMPRESSED)).unwrap();
        assert_eq!(data, "first,0,0,16,\nsecond,1,0,16,\n");

        let raw = std::fs::read(dir.path().join(FILE_COMPRESSED_INDEX)).unwrap();
        let mut reader = raw.as_slice();
        assert_eq!(reader.read_u64::<BigEndian>().unwrap(), 0);
        assert_eq!(
            reader.read_u64::<BigEndian>().unwrap(),
            "first,0,0,16,\n".len() as u64
        );
    }

    #[test]
    fn test_names_with_commas_are_quoted() {
        let dir = tempfile::tempdir().unwrap();
        {
            let mut writer = Writer::open(dir.path(), false).unwrap();
            writer.send(compressed_seq(0, "sp|P1,fragment", "")).unwrap();
            writer.close().unwrap();
        }
        let data = std::fs::read_to_string(dir.path().join(FILE_COMPRESSED)).unwrap();
        assert_eq!(data, "\"sp|P1,fragment\",0,0,16,\n");
    }

    #[test]
    fn test_send_after_close_fails() {
        let dir = tempfile::tempdir().unwrap();
        let mut writer = Writer::open(dir.path(), false).unwrap();
        writer.close().unwrap();
        assert!(writer.send(compressed_seq(0, "late", "")).is_err());
    }
}
