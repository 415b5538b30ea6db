//! Aligner seam and the built-in k-mer reference aligner.
//!
//! The filter modes only ever look at the best hit of a query, so the seam is a
//! single `top_hit` call. [`KmerAligner`] is a lightweight stand-in for a real
//! read mapper: it indexes every canonical k-mer of a FASTA reference and ranks
//! contigs by how many distinct query k-mers they share.
//!
//! Bases are packed 2 bits each (A=0, C=1, G=2, T=3), so k is limited to 32.

use std::collections::{HashMap, HashSet};
use std::fs::File;
use std::io::{BufReader, Read as IoRead};
use std::path::Path;

use seq_io::fasta::{Reader as FastaReader, Record};
use tracing::info;

use crate::error::AlignError;

/// Highest mapping quality reported by [`KmerAligner`]
pub const MAX_MAPQ: u8 = 60;

/// Best alignment of a query
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AlignmentHit {
    /// Reference contig name (first word of the FASTA header)
    pub contig: String,
    /// Mapping quality, higher is more certain
    pub mapq: u8,
}

/// Anything able to report the best reference hit for a sequence
pub trait Aligner: Send + Sync {
    fn top_hit(&self, query: &str) -> Option<AlignmentHit>;
}

#[inline]
const fn encode_base(base: u8) -> Option<u64> {
    match base {
        b'A' | b'a' => Some(0),
        b'C' | b'c' => Some(1),
        b'G' | b'g' => Some(2),
        b'T' | b't' => Some(3),
        _ => None,
    }
}

/// Canonical (strand independent) k-mers of a sequence.
///
/// Any non-ACGT base breaks the current window.
fn canonical_kmers(seq: &[u8], k: usize) -> impl Iterator<Item = u64> + '_ {
    let mask: u64 = if k == 32 { u64::MAX } else { (1u64 << (2 * k)) - 1 };
    let shift = 2 * (k as u64 - 1);
    let mut forward = 0u64;
    let mut reverse = 0u64;
    let mut filled = 0usize;

    seq.iter().filter_map(move |&base| match encode_base(base) {
        Some(code) => {
            forward = ((forward << 2) | code) & mask;
            reverse = (reverse >> 2) | ((3 - code) << shift);
            filled += 1;
            (filled >= k).then(|| forward.min(reverse))
        }
        None => {
            filled = 0;
            forward = 0;
            reverse = 0;
            None
        }
    })
}

/// Reference index mapping canonical k-mers to the contigs containing them
#[derive(Debug)]
pub struct KmerAligner {
    k: usize,
    contigs: Vec<String>,
    index: HashMap<u64, Vec<u32>>,
}

impl KmerAligner {
    /// Index a FASTA file
    pub fn from_fasta(path: impl AsRef<Path>, k: usize) -> Result<Self, AlignError> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|source| AlignError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let aligner = Self::from_reader(BufReader::new(file), k, &path.display().to_string())?;
        info!(
            reference = %path.display(),
            contigs = aligner.contigs.len(),
            kmers = aligner.index.len(),
            k,
            "Reference indexed"
        );
        Ok(aligner)
    }

    /// Index FASTA content from any reader; `name` is only used in errors
    pub fn from_reader<R: IoRead>(reader: R, k: usize, name: &str) -> Result<Self, AlignError> {
        if k == 0 || k > 32 {
            return Err(AlignError::InvalidKmerSize(k));
        }

        let mut fasta = FastaReader::new(reader);
        let mut contigs = Vec::new();
        let mut index: HashMap<u64, Vec<u32>> = HashMap::new();

        while let Some(record) = fasta.next() {
            let record = record.map_err(|e| AlignError::Parse {
                path: name.to_string(),
                message: e.to_string(),
            })?;
            let contig = record
                .id()
                .map_err(|e| AlignError::Parse {
                    path: name.to_string(),
                    message: e.to_string(),
                })?
                .to_string();

            let slot = contigs.len() as u32;
            let seq = record.full_seq();
            for kmer in canonical_kmers(&seq, k) {
                let owners = index.entry(kmer).or_default();
                if owners.last() != Some(&slot) {
                    owners.push(slot);
                }
            }
            contigs.push(contig);
        }

        if index.is_empty() {
            return Err(AlignError::EmptyIndex(name.to_string()));
        }

        Ok(Self { k, contigs, index })
    }

    pub fn kmer_size(&self) -> usize {
        self.k
    }

    pub fn contig_names(&self) -> &[String] {
        &self.contigs
    }
}

impl Aligner for KmerAligner {
    fn top_hit(&self, query: &str) -> Option<AlignmentHit> {
        let distinct: HashSet<u64> = canonical_kmers(query.as_bytes(), self.k).collect();

        let mut shared = vec![0u32; self.contigs.len()];
        for kmer in &distinct {
            if let Some(owners) = self.index.get(kmer) {
                for &slot in owners {
                    shared[slot as usize] += 1;
                }
            }
        }

        let (best, best_count) = shared
            .iter()
            .copied()
            .enumerate()
            .max_by(|(ia, a), (ib, b)| a.cmp(b).then(ib.cmp(ia)))?;
        if best_count == 0 {
            return None;
        }

        let runner_up = shared
            .iter()
            .enumerate()
            .filter(|(slot, _)| *slot != best)
            .map(|(_, &count)| count)
            .max()
            .unwrap_or(0);

        let margin = (best_count - runner_up) as u64;
        let mapq = (margin * MAX_MAPQ as u64 / best_count as u64) as u8;

        Some(AlignmentHit {
            contig: self.contigs[best].clone(),
            mapq,
        })
    }
}
