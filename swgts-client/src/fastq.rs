//! Streaming FASTQ input.
//!
//! Files ending in `.gz` are decompressed on the fly. Paired files are read in
//! lockstep, one record from each file per pair group, without loading any of
//! them into memory.

use flate2::read::MultiGzDecoder;
use seq_io::fastq::{Reader as FastqReader, Record};
use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};
use swgts_core::{PairGroup, Read};

use crate::error::{ClientError, Result};

/// Whether `path` names a gzip compressed file
pub fn is_gzip(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("gz"))
}

/// Open a plain or gzip compressed file for reading
pub fn open_input(path: &Path) -> Result<Box<dyn io::Read + Send>> {
    let file = File::open(path)?;
    if is_gzip(path) {
        Ok(Box::new(MultiGzDecoder::new(file)))
    } else {
        Ok(Box::new(file))
    }
}

/// Records of one FASTQ file as [`Read`]s
///
/// The separator line is normalized to `+`.
pub struct FastqStream {
    path: PathBuf,
    reader: FastqReader<Box<dyn io::Read + Send>>,
    records: usize,
}

impl FastqStream {
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let input = open_input(&path)?;
        Ok(Self::from_reader(path, input))
    }

    /// Wrap an already opened input; `path` is only used in error messages
    pub fn from_reader(path: impl Into<PathBuf>, input: Box<dyn io::Read + Send>) -> Self {
        Self {
            path: path.into(),
            reader: FastqReader::new(input),
            records: 0,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Records returned so far
    pub fn records(&self) -> usize {
        self.records
    }

    fn invalid(&self, message: impl ToString) -> ClientError {
        ClientError::Fastq {
            path: self.path.clone(),
            message: message.to_string(),
        }
    }
}

fn utf8(bytes: &[u8]) -> std::result::Result<&str, std::str::Utf8Error> {
    std::str::from_utf8(bytes)
}

impl Iterator for FastqStream {
    type Item = Result<Read>;

    fn next(&mut self) -> Option<Self::Item> {
        let converted = match self.reader.next()? {
            Ok(record) => match (utf8(record.head()), utf8(record.seq()), utf8(record.qual())) {
                (Ok(head), Ok(seq), Ok(qual)) => Ok(Read::new(format!("@{}", head), seq, "+", qual)),
                _ => Err(format!("record {} is not valid UTF-8", self.records + 1)),
            },
            Err(e) => Err(e.to_string()),
        };

        Some(match converted {
            Ok(read) => {
                self.records += 1;
                Ok(read)
            }
            Err(message) => Err(self.invalid(message)),
        })
    }
}

/// Lockstep reader over one file per pair slot
pub struct PairedReads {
    streams: Vec<FastqStream>,
    done: bool,
}

impl PairedReads {
    pub fn open<P: AsRef<Path>>(paths: &[P]) -> Result<Self> {
        let streams = paths
            .iter()
            .map(|path| FastqStream::open(path.as_ref()))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self::new(streams))
    }

    pub fn new(streams: Vec<FastqStream>) -> Self {
        Self {
            streams,
            done: false,
        }
    }
}

impl Iterator for PairedReads {
    type Item = Result<PairGroup>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done || self.streams.is_empty() {
            return None;
        }

        let mut group = Vec::with_capacity(self.streams.len());
        let mut ended = None;
        for (slot, stream) in self.streams.iter_mut().enumerate() {
            match stream.next() {
                Some(Ok(read)) => group.push(read),
                Some(Err(e)) => {
                    self.done = true;
                    return Some(Err(e));
                }
                None => {
                    ended.get_or_insert(slot);
                }
            }
        }

        match ended {
            None => Some(Ok(group)),
            Some(_) if group.is_empty() => {
                self.done = true;
                None
            }
            Some(slot) => {
                self.done = true;
                let stream = &self.streams[slot];
                Some(Err(ClientError::MismatchedPairs {
                    path: stream.path().to_path_buf(),
                    records: stream.records(),
                }))
            }
        }
    }
}
