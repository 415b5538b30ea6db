//! Sequencing read model.
//!
//! A [`Read`] is one four-line FASTQ record kept verbatim: the identifier line,
//! the sequence, the separator line and the quality string. Reads coming from
//! parallel input files (paired-end, or more generally N-paired) travel together
//! as a [`PairGroup`] and are always kept or discarded as a unit.
//!
//! On the wire a read is a JSON array of exactly four strings and a batch is an
//! array of pair groups:
//!
//! ```json
//! [[["@r1", "ACGT", "+", "IIII"], ["@r1", "TTGA", "+", "IIII"]]]
//! ```

use serde::{Deserialize, Serialize};

use crate::error::ShapeError;

/// Reads from all pair slots that belong together
pub type PairGroup = Vec<Read>;

/// A single four-line FASTQ record
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "Vec<String>", into = "[String; 4]")]
pub struct Read {
    /// Identifier line, including the leading `@`
    pub id: String,
    /// Bases
    pub sequence: String,
    /// Separator line (usually `+`)
    pub separator: String,
    /// Phred quality string
    pub quality: String,
}

impl Read {
    pub fn new(
        id: impl Into<String>,
        sequence: impl Into<String>,
        separator: impl Into<String>,
        quality: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            sequence: sequence.into(),
            separator: separator.into(),
            quality: quality.into(),
        }
    }

    /// Number of bases, which is what the byte accounting counts
    pub fn bases(&self) -> usize {
        self.sequence.len()
    }

    /// The four lines in record order
    pub fn lines(&self) -> [&str; 4] {
        [&self.id, &self.sequence, &self.separator, &self.quality]
    }

    /// The record as stored for saving: four lines joined by newlines, no trailing newline
    pub fn raw(&self) -> String {
        self.lines().join("\n")
    }

    /// Leading token of a raw record, i.e. its identifier line
    pub fn id_of_raw(raw: &str) -> &str {
        raw.split('\n').next().unwrap_or_default()
    }
}

impl TryFrom<Vec<String>> for Read {
    type Error = ShapeError;

    fn try_from(lines: Vec<String>) -> Result<Self, Self::Error> {
        let count = lines.len();
        let [id, sequence, separator, quality]: [String; 4] =
            lines.try_into().map_err(|_| ShapeError::ReadArity(count))?;
        Ok(Self { id, sequence, separator, quality })
    }
}

impl From<Read> for [String; 4] {
    fn from(read: Read) -> Self {
        [read.id, read.sequence, read.separator, read.quality]
    }
}

/// Check that every group in a batch holds exactly `pair_count` reads
pub fn validate_arity(batch: &[PairGroup], pair_count: usize) -> Result<(), ShapeError> {
    for (group, reads) in batch.iter().enumerate() {
        if reads.len() != pair_count {
            return Err(ShapeError::PairArity {
                group,
                expected: pair_count,
                actual: reads.len(),
            });
        }
    }
    Ok(())
}

/// Total bases across all reads of all groups
pub fn batch_bases(batch: &[PairGroup]) -> u64 {
    batch
        .iter()
        .flat_map(|group| group.iter())
        .map(|read| read.bases() as u64)
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn read(id: &str, seq: &str) -> Read {
        Read::new(id, seq, "+", "I".repeat(seq.len()))
    }

    #[test]
    fn test_read_wire_format() {
        let r = read("@r1", "ACGT");
        let json = serde_json::to_string(&r).unwrap();
        assert_eq!(json, r#"["@r1","ACGT","+","IIII"]"#);

        let parsed: Read = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, r);
    }

    #[test]
    fn test_read_wrong_line_count_rejected() {
        let result: Result<Read, _> = serde_json::from_str(r#"["@r1","ACGT","+"]"#);
        let err = result.unwrap_err().to_string();
        assert!(err.contains("exactly 4 lines"), "unexpected error: {}", err);
    }

    #[test]
    fn test_raw_and_id() {
        let r = read("@r1 extra", "AC");
        assert_eq!(r.raw(), "@r1 extra\nAC\n+\nII");
        assert_eq!(Read::id_of_raw(&r.raw()), "@r1 extra");
        assert_eq!(r.bases(), 2);
    }

    #[test]
    fn test_validate_arity() {
        let batch = vec![
            vec![read("@a", "AC"), read("@a", "GT")],
            vec![read("@b", "AC")],
        ];
        assert!(validate_arity(&batch[..1], 2).is_ok());
        assert_eq!(
            validate_arity(&batch, 2),
            Err(ShapeError::PairArity { group: 1, expected: 2, actual: 1 })
        );
    }

    #[test]
    fn test_batch_bases() {
        let batch = vec![
            vec![read("@a", "ACGT"), read("@a", "GG")],
            vec![read("@b", "A"), read("@b", "")],
        ];
        assert_eq!(batch_bases(&batch), 7);
        assert_eq!(batch_bases(&[]), 0);
    }
}
