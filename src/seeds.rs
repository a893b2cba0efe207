//! Hash-addressed k-mer index over the coarse store.
//!
//! Every k-mer of every coarse sequence maps to a bucket holding the
//! `(sequence index, residue offset)` locations where it occurs. Buckets
//! are addressed by [`Seeds::hash_kmer`]; the table has
//! `ALPHABET_SIZE^seed_size` buckets and locations are kept in insertion
//! order.

use crate::alphabet::{residue_index, ALPHABET, ALPHABET_SIZE};
use crate::seq::{is_low_complexity, CoarseSeq};

/// A single k-mer occurrence: the coarse sequence index and the residue
/// offset where the window starts.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SeedLoc {
    pub seq_ind: u32,
    pub res_ind: u16,
}
impl SeedLoc {
    #[must_use]
    pub fn new(seq_ind: u32, res_ind: u16) -> Self {
        Self { seq_ind, res_ind }
    }
}

/// The k-mer seed table.
///
/// Mutated only during ingestion (serialized by the driver) and during
/// load; the coarse store wraps it in a reader/writer lock so persistence
/// sees a consistent snapshot.
pub struct Seeds {
    /// One bucket per k-mer hash, in insertion order.
    locs: Vec<Vec<SeedLoc>>,
    seed_size: usize,
    low_complexity_window: usize,
    /// `powers[i] == ALPHABET_SIZE^i`, precomputed up to the seed size.
    powers: Vec<usize>,
}
impl Seeds {
    /// Allocates a table of `ALPHABET_SIZE^seed_size` empty buckets.
    #[must_use]
    pub fn new(seed_size: usize, low_complexity_window: usize) -> Self {
        let mut powers = Vec::with_capacity(seed_size + 1);
        let mut power = 1usize;
        for _ in 0..=seed_size {
            powers.push(power);
            power *= ALPHABET_SIZE;
        }
        Self {
            locs: vec![Vec::new(); powers[seed_size]],
            seed_size,
            low_complexity_window,
            powers,
        }
    }

    /// The k-mer length this table was built for.
    #[must_use]
    pub fn seed_size(&self) -> usize {
        self.seed_size
    }

    /// Number of buckets in the table.
    #[must_use]
    pub fn num_buckets(&self) -> usize {
        self.locs.len()
    }

    /// Indexes every k-mer of `seq`, skipping windows that sit in a
    /// low-complexity region or contain a byte outside the alphabet.
    pub fn add(&mut self, coarse_seq_ind: u32, seq: &CoarseSeq) {
        let residues = seq.residues();
        if residues.len() < self.seed_size {
            return;
        }
        for offset in 0..=(residues.len() - self.seed_size) {
            if is_low_complexity(residues, offset, self.low_complexity_window) {
                continue;
            }
            let Some(hash) = self.hash_kmer(&residues[offset..offset + self.seed_size]) else {
                continue;
            };
            self.locs[hash].push(SeedLoc::new(coarse_seq_ind, offset as u16));
        }
    }

    /// Hash of one k-mer window, or `None` when the window is not exactly
    /// `seed_size` bytes long or a byte does not map into the alphabet.
    #[must_use]
    pub fn hash_kmer(&self, kmer: &[u8]) -> Option<usize> {
        if kmer.len() != self.seed_size {
            return None;
        }
        let mut hash = 0;
        for (i, &residue) in kmer.iter().enumerate() {
            hash += residue_index(residue)? * self.powers[self.seed_size - i - 1];
        }
        Some(hash)
    }

    /// Exact inverse of [`hash_kmer`](Self::hash_kmer); feeds the
    /// plain-text seed dump.
    #[must_use]
    pub fn unhash_kmer(&self, mut hash: usize) -> Vec<u8> {
        let mut kmer = vec![0u8; self.seed_size];
        for residue in kmer.iter_mut().rev() {
            *residue = ALPHABET[hash % ALPHABET_SIZE];
            hash /= ALPHABET_SIZE;
        }
        kmer
    }

    /// The locations recorded for one bucket, in insertion order.
    #[must_use]
    pub fn bucket(&self, hash: usize) -> &[SeedLoc] {
        &self.locs[hash]
    }

    /// Total number of recorded locations.
    #[must_use]
    pub fn num_locs(&self) -> usize {
        self.locs.iter().map(Vec::len).sum()
    }

    /// Non-empty buckets in ascending hash order.
    pub fn iter_non_empty(&self) -> impl Iterator<Item = (usize, &[SeedLoc])> {
        self.locs
            .iter()
            .enumerate()
            .filter(|(_, locs)| !locs.is_empty())
            .map(|(hash, locs)| (hash, locs.as_slice()))
    }

    /// Loader entry point; locations arrive in saved order, which is the
    /// original insertion order.
    pub(crate) fn insert(&mut self, hash: usize, loc: SeedLoc) {
        self.locs[hash].push(loc);
    }
}
