//! Expansion of coarse-search hits into original sequences for the fine
//! search stage.
//!
//! The external coarse search runs against the coarse FASTA (or a database
//! derived from it) and reports high-scoring pairs against coarse
//! accessions. This module resolves those accessions through the link
//! tables and hands back the reconstructed originals, ready to stream to
//! the fine search.

use std::collections::HashSet;

use tracing::warn;

use crate::coarse::CoarseDb;
use crate::compressed::CompressedDb;
use crate::error::Result;
use crate::seq::OriginalSeq;

/// One high-scoring pair reported by the external coarse-search process.
///
/// `hit_from` and `hit_to` are the subject (coarse) range of the alignment
/// and `evalue` its expectation value.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CoarseHit {
    pub coarse_id: u32,
    pub hit_from: u32,
    pub hit_to: u32,
    pub evalue: f64,
}
impl CoarseHit {
    #[must_use]
    pub fn new(coarse_id: u32, hit_from: u32, hit_to: u32, evalue: f64) -> Self {
        Self {
            coarse_id,
            hit_from,
            hit_to,
            evalue,
        }
    }
}

/// Expands every hit at or below `coarse_eval_threshold` and returns the
/// union of the reconstructed originals, deduplicated by original id in
/// first-seen order across the whole batch.
///
/// A hit whose expansion fails to decompress is logged and skipped: one
/// corrupt record must not sink the batch. Any other failure aborts.
pub fn expand_hits(
    coarsedb: &CoarseDb,
    comdb: &CompressedDb,
    hits: impl IntoIterator<Item = CoarseHit>,
    coarse_eval_threshold: f64,
) -> Result<Vec<OriginalSeq>> {
    let mut used = HashSet::new();
    let mut oseqs = Vec::new();
    for hit in hits {
        if hit.evalue > coarse_eval_threshold {
            continue;
        }
        let expanded =
            match coarsedb.expand_range(comdb, hit.coarse_id as usize, hit.hit_from, hit.hit_to) {
                Ok(seqs) => seqs,
                Err(err) if err.is_decompress() => {
                    warn!(
                        coarse_id = hit.coarse_id,
                        %err,
                        "skipping coarse hit that failed to decompress"
                    );
                    continue;
                }
                Err(err) => return Err(err),
            };
        for oseq in expanded {
            if used.insert(oseq.id()) {
                oseqs.push(oseq);
            }
        }
    }
    Ok(oseqs)
}
