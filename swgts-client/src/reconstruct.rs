//! Rebuild filtered FASTQ files from the ids the server kept.

use flate2::write::GzEncoder;
use flate2::Compression;
use std::collections::HashSet;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::info;

use crate::error::Result;
use crate::fastq::{is_gzip, PairedReads};

/// `sample.fastq.gz` becomes `sample.filtered.fastq.gz`
pub fn filtered_name(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let mut parts = name.splitn(2, '.');
    let stem = parts.next().unwrap_or_default();
    match parts.next() {
        Some(rest) => PathBuf::from(format!("{}.filtered.{}", stem, rest)),
        None => PathBuf::from(format!("{}.filtered", stem)),
    }
}

enum Output {
    Plain(BufWriter<File>),
    Gzip(GzEncoder<BufWriter<File>>),
}

impl Output {
    fn create(path: &Path, gzip: bool) -> Result<Self> {
        let file = BufWriter::new(File::create(path)?);
        Ok(if gzip {
            Output::Gzip(GzEncoder::new(file, Compression::default()))
        } else {
            Output::Plain(file)
        })
    }

    fn write_record(&mut self, record: &str) -> std::io::Result<()> {
        let writer: &mut dyn Write = match self {
            Output::Plain(w) => w,
            Output::Gzip(w) => w,
        };
        writer.write_all(record.as_bytes())?;
        writer.write_all(b"\n")
    }

    fn finish(self) -> std::io::Result<()> {
        match self {
            Output::Plain(mut w) => w.flush(),
            Output::Gzip(w) => w.finish()?.flush(),
        }
    }
}

/// Write every pair group whose first read id is in `saved` into `out_dir`.
///
/// Each input gets one output named by [`filtered_name`], gzip compressed when
/// the input was. Returns the written paths in input order.
pub fn reconstruct<P: AsRef<Path>>(
    files: &[P],
    saved: &HashSet<String>,
    out_dir: &Path,
) -> Result<Vec<PathBuf>> {
    std::fs::create_dir_all(out_dir)?;

    let paths: Vec<PathBuf> = files
        .iter()
        .map(|f| out_dir.join(filtered_name(f.as_ref())))
        .collect();
    let mut outputs = files
        .iter()
        .zip(&paths)
        .map(|(input, output)| Output::create(output, is_gzip(input.as_ref())))
        .collect::<Result<Vec<_>>>()?;

    let mut written = 0usize;
    for group in PairedReads::open(files)? {
        let group = group?;
        let kept = group.first().is_some_and(|read| saved.contains(&read.id));
        if !kept {
            continue;
        }
        for (read, output) in group.iter().zip(outputs.iter_mut()) {
            output.write_record(&read.raw())?;
        }
        written += 1;
    }

    for output in outputs {
        output.finish()?;
    }

    info!(groups = written, dir = %out_dir.display(), "Reconstructed filtered files");
    Ok(paths)
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::read::MultiGzDecoder;
    use std::io::Read as _;

    #[test]
    fn test_filtered_name() {
        assert_eq!(
            filtered_name(Path::new("/data/sample.fastq.gz")),
            PathBuf::from("sample.filtered.fastq.gz")
        );
        assert_eq!(filtered_name(Path::new("r_1.fq")), PathBuf::from("r_1.filtered.fq"));
        assert_eq!(filtered_name(Path::new("reads")), PathBuf::from("reads.filtered"));
    }

    #[test]
    fn test_reconstruct_keeps_saved_pairs() {
        let dir = tempfile::tempdir().unwrap();
        let r1 = dir.path().join("s_1.fq");
        let r2 = dir.path().join("s_2.fq.gz");
        std::fs::write(&r1, "@a/1\nAC\n+\nII\n@b/1\nGT\n+\nII\n").unwrap();
        {
            let mut gz = GzEncoder::new(File::create(&r2).unwrap(), Compression::default());
            gz.write_all(b"@a/2\nCC\n+\nII\n@b/2\nGG\n+\nII\n").unwrap();
            gz.finish().unwrap();
        }

        let saved: HashSet<String> = ["@b/1".to_string()].into_iter().collect();
        let out = dir.path().join("out");
        let written = reconstruct(&[&r1, &r2], &saved, &out).unwrap();

        assert_eq!(written[0], out.join("s_1.filtered.fq"));
        assert_eq!(
            std::fs::read_to_string(&written[0]).unwrap(),
            "@b/1\nGT\n+\nII\n"
        );

        let mut second = String::new();
        MultiGzDecoder::new(File::open(&written[1]).unwrap())
            .read_to_string(&mut second)
            .unwrap();
        assert_eq!(second, "@b/2\nGG\n+\nII\n");
    }
}
