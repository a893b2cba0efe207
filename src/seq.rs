//! Sequence value types shared by the coarse and compressed stores.
//!
//! A [`Sequence`] is an immutable residue buffer. [`CoarseSeq`] wraps one
//! with the link list binding its spans to compressed originals;
//! [`OriginalSeq`] marks a reconstructed user sequence; [`CompressedSeq`]
//! is an original rewritten as an ordered list of coarse spans plus diffs.

use std::fmt;

use parking_lot::Mutex;

use crate::coarse::CoarseDb;
use crate::error::{ExpandError, Result};

/// Computes the sequence identity of two residue strings as an integer
/// percent in `0..=100`. Returns zero when both inputs are empty.
///
/// # Panics
///
/// Panics when the lengths differ. Identity is only defined over aligned
/// residues of equal length; calling it otherwise is a programmer error.
#[must_use]
pub fn seq_identity(seq1: &[u8], seq2: &[u8]) -> usize {
    assert_eq!(
        seq1.len(),
        seq2.len(),
        "sequence identity requires equal lengths"
    );
    if seq1.is_empty() {
        return 0;
    }
    let same = seq1.iter().zip(seq2).filter(|(r1, r2)| r1 == r2).count();
    (same * 100) / seq1.len()
}

/// Reports whether the residue at `offset` sits in a low-complexity region:
/// a run of at least `window` identical residues somewhere within
/// `[offset - window, offset + window)`, clamped to the sequence bounds.
///
/// Seeds originating in such regions are discarded by the seed index.
#[must_use]
pub fn is_low_complexity(residues: &[u8], offset: usize, window: usize) -> bool {
    if window == 0 {
        return false;
    }
    let start = offset.saturating_sub(window);
    let end = (offset + window).min(residues.len());
    let mut run = 0usize;
    let mut last = None;
    for &residue in &residues[start..end] {
        if last == Some(residue) {
            run += 1;
        } else {
            run = 1;
            last = Some(residue);
        }
        if run >= window {
            return true;
        }
    }
    false
}

/// An immutable residue buffer with its display name and its position
/// within a parent sequence.
///
/// Residues are upper-cased and stripped of `'*'` at construction and never
/// mutated afterwards.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Sequence {
    pub id: u32,
    pub name: String,
    pub residues: Vec<u8>,
    /// Offset within the parent sequence when this value is a subsequence,
    /// zero otherwise.
    pub offset: u32,
}
impl Sequence {
    /// Creates a new sequence, upper-casing the residues and stripping
    /// every `'*'`.
    #[must_use]
    pub fn new(id: u32, name: impl Into<String>, residues: &[u8]) -> Self {
        let residues = residues
            .iter()
            .filter(|&&b| b != b'*')
            .map(u8::to_ascii_uppercase)
            .collect();
        Self {
            id,
            name: name.into(),
            residues,
            offset: 0,
        }
    }

    /// Returns the subsequence covering `start..end`, sharing this
    /// sequence's id and name. The new offset is this sequence's offset
    /// plus `start`, so subsequences of subsequences keep pointing into
    /// the root sequence.
    ///
    /// # Panics
    ///
    /// Panics when the range is empty or reaches past the residues.
    #[must_use]
    pub fn sub_sequence(&self, start: usize, end: usize) -> Self {
        assert!(
            start < end && end <= self.len(),
            "invalid sub sequence ({start}, {end}) for sequence with length {}",
            self.len()
        );
        Self {
            id: self.id,
            name: self.name.clone(),
            residues: self.residues[start..end].to_vec(),
            offset: self.offset + start as u32,
        }
    }

    /// Number of residues in this sequence.
    #[must_use]
    pub fn len(&self) -> usize {
        self.residues.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.residues.is_empty()
    }
}
impl fmt::Display for Sequence {
    /// FASTA rendering. Subsequences also print their range with respect
    /// to the root sequence.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.offset == 0 {
            write!(
                f,
                "> {} ({})\n{}",
                self.name,
                self.id,
                String::from_utf8_lossy(&self.residues)
            )
        } else {
            write!(
                f,
                "> {} ({}) ({}, {})\n{}",
                self.name,
                self.id,
                self.offset,
                self.len(),
                String::from_utf8_lossy(&self.residues)
            )
        }
    }
}

/// An original (user-provided) protein sequence, reconstructable from
/// coarse fragments and diffs.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OriginalSeq {
    pub seq: Sequence,
}
impl OriginalSeq {
    #[must_use]
    pub fn new(id: u32, name: impl Into<String>, residues: &[u8]) -> Self {
        Self {
            seq: Sequence::new(id, name, residues),
        }
    }

    #[must_use]
    pub fn sub_sequence(&self, start: usize, end: usize) -> Self {
        Self {
            seq: self.seq.sub_sequence(start, end),
        }
    }

    #[must_use]
    pub fn id(&self) -> u32 {
        self.seq.id
    }

    #[must_use]
    pub fn residues(&self) -> &[u8] {
        &self.seq.residues
    }
}
impl fmt::Display for OriginalSeq {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.seq.fmt(f)
    }
}

/// A back-reference from a span of a coarse sequence to the original
/// sequence that was compressed against it.
///
/// Residues `[coarse_start, coarse_end)` of the owning coarse sequence
/// correspond to a region of original sequence `org_seq_id`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LinkToCompressed {
    pub org_seq_id: u32,
    pub coarse_start: u16,
    pub coarse_end: u16,
}
impl LinkToCompressed {
    #[must_use]
    pub fn new(org_seq_id: u32, coarse_start: u16, coarse_end: u16) -> Self {
        Self {
            org_seq_id,
            coarse_start,
            coarse_end,
        }
    }
}

/// A representative sequence in the coarse store together with the links
/// binding its spans back to compressed originals.
#[derive(Debug)]
pub struct CoarseSeq {
    pub seq: Sequence,
    links: Mutex<Vec<LinkToCompressed>>,
}
impl CoarseSeq {
    #[must_use]
    pub fn new(id: u32, name: impl Into<String>, residues: &[u8]) -> Self {
        Self {
            seq: Sequence::new(id, name, residues),
            links: Mutex::new(Vec::new()),
        }
    }

    /// Appends a link under the per-sequence lock. Links are only ever
    /// appended; save order equals insertion order.
    pub fn add_link(&self, link: LinkToCompressed) {
        self.links.lock().push(link);
    }

    /// Snapshot of the link list in insertion order.
    #[must_use]
    pub fn links(&self) -> Vec<LinkToCompressed> {
        self.links.lock().clone()
    }

    #[must_use]
    pub fn id(&self) -> u32 {
        self.seq.id
    }

    #[must_use]
    pub fn residues(&self) -> &[u8] {
        &self.seq.residues
    }
}

/// A forward reference from an original sequence to the coarse span (and
/// the edit script) that reconstructs one slice of its residues.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LinkToCoarse {
    pub coarse_seq_id: u32,
    pub coarse_start: u32,
    pub coarse_end: u32,
    /// Opaque edit script consumed by a [`DiffSolver`]; empty when the
    /// span is copied through verbatim.
    pub diff: String,
}
impl LinkToCoarse {
    #[must_use]
    pub fn new(
        coarse_seq_id: u32,
        coarse_start: u32,
        coarse_end: u32,
        diff: impl Into<String>,
    ) -> Self {
        Self {
            coarse_seq_id,
            coarse_start,
            coarse_end,
            diff: diff.into(),
        }
    }
}

/// An original sequence in compressed form: an ordered list of coarse
/// spans whose decoded concatenation yields the original residues.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CompressedSeq {
    pub id: u32,
    pub name: String,
    pub links: Vec<LinkToCoarse>,
}
impl CompressedSeq {
    #[must_use]
    pub fn new(id: u32, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            links: Vec::new(),
        }
    }

    /// Appends a link; reconstruction concatenates spans in link order.
    pub fn add(&mut self, link: LinkToCoarse) {
        self.links.push(link);
    }

    /// Reconstructs the original residues by fetching each linked coarse
    /// span and applying its diff, concatenating in link order.
    pub fn decompress(&self, coarsedb: &CoarseDb, solver: &dyn DiffSolver) -> Result<OriginalSeq> {
        let mut residues = Vec::new();
        for link in &self.links {
            let coarse =
                coarsedb
                    .get(link.coarse_seq_id as usize)
                    .map_err(|_| ExpandError::Decompress {
                        id: self.id as usize,
                        reason: format!("coarse sequence {} does not exist", link.coarse_seq_id),
                    })?;
            let (start, end) = (link.coarse_start as usize, link.coarse_end as usize);
            if start > end || end > coarse.seq.len() {
                return Err(ExpandError::Decompress {
                    id: self.id as usize,
                    reason: format!(
                        "link span ({start}, {end}) is outside coarse sequence {} with length {}",
                        link.coarse_seq_id,
                        coarse.seq.len()
                    ),
                }
                .into());
            }
            let span = solver
                .apply(&coarse.residues()[start..end], &link.diff)
                .map_err(|reason| ExpandError::Decompress {
                    id: self.id as usize,
                    reason,
                })?;
            residues.extend_from_slice(&span);
        }
        Ok(OriginalSeq::new(self.id, &*self.name, &residues))
    }
}

/// Applies an opaque edit script to a coarse span, yielding the original
/// residues for that span.
///
/// The diff encoding itself lives outside the store; the store only frames
/// the strings and hands them back at reconstruction time.
pub trait DiffSolver: Send + Sync {
    /// Failures are reported as a human-readable reason; the caller
    /// attaches the offending sequence id.
    fn apply(&self, coarse_span: &[u8], diff: &str) -> std::result::Result<Vec<u8>, String>;
}

/// Solver for databases whose spans are stored verbatim. An empty diff
/// copies the span through; anything else is rejected.
#[derive(Clone, Copy, Debug, Default)]
pub struct PassthroughDiff;
impl DiffSolver for PassthroughDiff {
    fn apply(&self, coarse_span: &[u8], diff: &str) -> std::result::Result<Vec<u8>, String> {
        if diff.is_empty() {
            Ok(coarse_span.to_vec())
        } else {
            Err(format!("no diff solver registered for edit script {diff:?}"))
        }
    }
}

#[cfg(test)]
mod testing {
    use super::*;

    #[test]
    fn test_new_normalizes_residues() {
        let seq = Sequence::new(0, "test", b"mkTAyi*ak*");
        assert_eq!(seq.residues, b"MKTAYIAK");
        assert_eq!(seq.offset, 0);
    }

    #[test]
    fn test_sub_sequence_offsets_compose() {
        let seq = Sequence::new(3, "test", b"MKTAYIAKQR");
        let sub = seq.sub_sequence(2, 8);
        assert_eq!(sub.residues, b"TAYIAK");
        assert_eq!(sub.offset, 2);
        assert_eq!(sub.id, 3);

        let subsub = sub.sub_sequence(1, 3);
        assert_eq!(subsub.residues, b"AY");
        assert_eq!(subsub.offset, 3);
    }

    #[test]
    #[should_panic(expected = "invalid sub sequence")]
    fn test_sub_sequence_empty_range() {
        Sequence::new(0, "test", b"MKTA").sub_sequence(2, 2);
    }

    #[test]
    #[should_panic(expected = "invalid sub sequence")]
    fn test_sub_sequence_past_end() {
        Sequence::new(0, "test", b"MKTA").sub_sequence(1, 5);
    }

    #[test]
    fn test_seq_identity_self_is_100() {
        assert_eq!(seq_identity(b"MKTAYIAK", b"MKTAYIAK"), 100);
    }

    #[test]
    fn test_seq_identity_symmetric_and_bounded() {
        let a = b"MKTAYIAK";
        let b = b"MKTANIAQ";
        assert_eq!(seq_identity(a, b), seq_identity(b, a));
        assert!(seq_identity(a, b) <= 100);
        assert_eq!(seq_identity(a, b), 75);
    }

    #[test]
    fn test_seq_identity_empty_is_zero() {
        assert_eq!(seq_identity(b"", b""), 0);
    }

    #[test]
    #[should_panic(expected = "equal lengths")]
    fn test_seq_identity_length_mismatch() {
        seq_identity(b"MKT", b"MKTA");
    }

    #[test]
    fn test_low_complexity_detects_runs() {
        // A run of three As around offset 4.
        assert!(is_low_complexity(b"MKAAATYI", 4, 3));
        // Alternating residues never form a run.
        assert!(!is_low_complexity(b"ABABABAB", 4, 3));
        // The run sits outside the window around offset 0.
        assert!(!is_low_complexity(b"MKTYAAAA", 0, 3));
    }

    #[test]
    fn test_low_complexity_clamps_to_bounds() {
        assert!(is_low_complexity(b"AAA", 0, 3));
        assert!(is_low_complexity(b"AAA", 2, 3));
        assert!(!is_low_complexity(b"", 0, 3));
    }

    #[test]
    fn test_low_complexity_run_spanning_offset() {
        // The run is found from any offset whose window still covers it.
        let residues = b"TTTTTTTTGC";
        for offset in 0..=8 {
            assert!(is_low_complexity(residues, offset, 4), "offset {offset}");
        }
        // The window around the last residue only sees the run's tail.
        assert!(!is_low_complexity(residues, 9, 4));
    }

    #[test]
    fn test_coarse_seq_links_preserve_insertion_order() {
        let seq = CoarseSeq::new(0, "", b"MKTAYIAKQRQISFVKSHFSRQ");
        seq.add_link(LinkToCompressed::new(7, 0, 10));
        seq.add_link(LinkToCompressed::new(2, 5, 20));
        seq.add_link(LinkToCompressed::new(7, 10, 22));
        let links = seq.links();
        assert_eq!(links.len(), 3);
        assert_eq!(links[0].org_seq_id, 7);
        assert_eq!(links[1].org_seq_id, 2);
        assert_eq!(links[2], LinkToCompressed::new(7, 10, 22));
    }

    #[test]
    fn test_passthrough_diff() {
        let solver = PassthroughDiff;
        assert_eq!(solver.apply(b"MKTA", "").unwrap(), b"MKTA".to_vec());
        assert!(solver.apply(b"MKTA", "s2A").is_err());
    }

    #[test]
    fn test_display_renders_fasta() {
        let seq = Sequence::new(4, "sp|P12345", b"MKTAYIAK");
        assert_eq!(format!("{seq}"), "> sp|P12345 (4)\nMKTAYIAK");
        let sub = seq.sub_sequence(2, 6);
        assert_eq!(format!("{sub}"), "> sp|P12345 (4) (2, 4)\nTAYI");
    }
}
