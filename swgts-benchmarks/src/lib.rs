// SWGTS Benchmarking Library
//
// Filter accuracy over labelled FASTQ samples

use anyhow::Context;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use swgts_client::FastqStream;
use swgts_core::{GroupFilter, Read};
use tracing::{info, warn};

/// Ground truth carried in the read name, e.g. `@human_0042` or `@pathogen_7`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Label {
    /// Must be removed by the filter
    Human,
    /// Must survive the filter
    Pathogen,
}

impl Label {
    pub fn of(read: &Read) -> Option<Self> {
        let name = read.id.trim_start_matches('@');
        let prefix = name.split(['_', ' ', '/']).next().unwrap_or_default();
        match prefix.to_ascii_lowercase().as_str() {
            "human" => Some(Label::Human),
            "pathogen" => Some(Label::Pathogen),
            _ => None,
        }
    }
}

/// Counts with "removed by the filter" as the positive class
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfusionMatrix {
    /// Human reads removed
    pub tp: u64,
    /// Pathogen reads kept
    pub tn: u64,
    /// Pathogen reads removed
    pub fp: u64,
    /// Human reads kept
    pub fn_: u64,
}

impl ConfusionMatrix {
    pub fn record(&mut self, label: Label, kept: bool) {
        match (label, kept) {
            (Label::Human, false) => self.tp += 1,
            (Label::Pathogen, true) => self.tn += 1,
            (Label::Pathogen, false) => self.fp += 1,
            (Label::Human, true) => self.fn_ += 1,
        }
    }

    pub fn total(&self) -> u64 {
        self.tp + self.tn + self.fp + self.fn_
    }

    pub fn removed(&self) -> u64 {
        self.tp + self.fp
    }

    /// `None` when nothing was removed
    pub fn precision(&self) -> Option<f64> {
        ratio(self.tp, self.tp + self.fp)
    }

    pub fn recall(&self) -> Option<f64> {
        ratio(self.tp, self.tp + self.fn_)
    }

    pub fn f1(&self) -> Option<f64> {
        ratio(2 * self.tp, 2 * self.tp + self.fp + self.fn_)
    }
}

fn ratio(num: u64, den: u64) -> Option<f64> {
    (den > 0).then(|| num as f64 / den as f64)
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct BenchmarkConfig {
    pub name: String,
    pub sample: PathBuf,
}

impl BenchmarkConfig {
    pub fn for_sample(sample: impl Into<PathBuf>) -> Self {
        let sample = sample.into();
        let name = sample
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| sample.display().to_string());
        Self { name, sample }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct BenchmarkResult {
    pub config: BenchmarkConfig,
    pub filter: String,
    pub matrix: ConfusionMatrix,
    /// Reads whose name carries no known label
    pub unlabelled: u64,
    pub precision: Option<f64>,
    pub recall: Option<f64>,
    pub f1: Option<f64>,
    pub total_time_ms: f64,
    pub timestamp: String,
}

pub struct BenchmarkRunner {
    filter: Arc<dyn GroupFilter>,
    filter_name: String,
}

impl BenchmarkRunner {
    pub fn new(filter: Arc<dyn GroupFilter>, filter_name: impl Into<String>) -> Self {
        Self {
            filter,
            filter_name: filter_name.into(),
        }
    }

    /// Run the filter over every read of one sample
    pub fn run(&self, config: &BenchmarkConfig) -> anyhow::Result<BenchmarkResult> {
        info!(sample = %config.sample.display(), filter = %self.filter_name, "Running benchmark");
        let start = Instant::now();

        let reads = FastqStream::open(&config.sample)
            .with_context(|| format!("opening {}", config.sample.display()))?;

        let mut matrix = ConfusionMatrix::default();
        let mut unlabelled = 0u64;
        for read in reads {
            let read = read?;
            let Some(label) = Label::of(&read) else {
                if unlabelled == 0 {
                    warn!(id = %read.id, "Read name carries no human/pathogen label");
                }
                unlabelled += 1;
                continue;
            };
            let kept = self.filter.decide(std::slice::from_ref(&read));
            matrix.record(label, kept);
        }

        let total_time_ms = start.elapsed().as_secs_f64() * 1000.0;
        if matrix.removed() == 0 {
            warn!(sample = %config.name, "Nothing was filtered, this is probably suspicious");
        }
        info!(
            sample = %config.name,
            removed = matrix.removed(),
            total = matrix.total(),
            tp = matrix.tp,
            tn = matrix.tn,
            fp = matrix.fp,
            fn_ = matrix.fn_,
            "Benchmark done"
        );

        Ok(BenchmarkResult {
            config: config.clone(),
            filter: self.filter_name.clone(),
            precision: matrix.precision(),
            recall: matrix.recall(),
            f1: matrix.f1(),
            matrix,
            unlabelled,
            total_time_ms,
            timestamp: Utc::now().to_rfc3339(),
        })
    }
}

const CSV_HEADER: &str =
    "filter,sample,removed,total,elapsed_ms,tp,tn,fp,fn,precision,recall,f1";

/// Quote a text field when it would otherwise break the row
fn csv_field(value: &str) -> String {
    if value.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

fn csv_metric(value: Option<f64>) -> String {
    value.map(|v| format!("{:.6}", v)).unwrap_or_default()
}

/// One CSV row per result, with a header line
pub fn to_csv(results: &[BenchmarkResult]) -> String {
    let mut csv = String::from(CSV_HEADER);
    csv.push('\n');
    for r in results {
        csv.push_str(&format!(
            "{},{},{},{},{:.3},{},{},{},{},{},{},{}\n",
            csv_field(&r.filter),
            csv_field(&r.config.sample.display().to_string()),
            r.matrix.removed(),
            r.matrix.total(),
            r.total_time_ms,
            r.matrix.tp,
            r.matrix.tn,
            r.matrix.fp,
            r.matrix.fn_,
            csv_metric(r.precision),
            csv_metric(r.recall),
            csv_metric(r.f1),
        ));
    }
    csv
}

/// Write results as CSV, or as JSON when `path` ends in `.json`
pub fn write_results(results: &[BenchmarkResult], path: &Path) -> anyhow::Result<()> {
    let content = if path.extension().is_some_and(|ext| ext == "json") {
        serde_json::to_string_pretty(results)?
    } else {
        to_csv(results)
    };
    std::fs::write(path, content).with_context(|| format!("writing {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Removes reads whose sequence is all `A`
    struct PolyAFilter;

    impl GroupFilter for PolyAFilter {
        fn decide(&self, group: &[Read]) -> bool {
            !group.iter().all(|r| r.sequence.chars().all(|c| c == 'A'))
        }
    }

    fn read(id: &str) -> Read {
        Read::new(id, "ACGT", "+", "IIII")
    }

    #[test]
    fn test_labels() {
        assert_eq!(Label::of(&read("@human_1")), Some(Label::Human));
        assert_eq!(Label::of(&read("@Pathogen_22 extra")), Some(Label::Pathogen));
        assert_eq!(Label::of(&read("@mouse_3")), None);
    }

    #[test]
    fn test_confusion_matrix() {
        let mut m = ConfusionMatrix::default();
        m.record(Label::Human, false);
        m.record(Label::Human, false);
        m.record(Label::Human, true);
        m.record(Label::Pathogen, true);
        m.record(Label::Pathogen, false);

        assert_eq!((m.tp, m.tn, m.fp, m.fn_), (2, 1, 1, 1));
        assert_eq!(m.precision(), Some(2.0 / 3.0));
        assert_eq!(m.recall(), Some(2.0 / 3.0));
        assert_eq!(m.f1(), Some(4.0 / 6.0));
    }

    #[test]
    fn test_empty_matrix_has_no_metrics() {
        let m = ConfusionMatrix::default();
        assert_eq!(m.precision(), None);
        assert_eq!(m.f1(), None);
    }

    #[test]
    fn test_csv_quotes_awkward_paths() {
        let dir = tempfile::tempdir().unwrap();
        let sample = dir.path().join("run 1, \"lane\" 2.fastq");
        std::fs::write(&sample, "@human_1\nAAAA\n+\nIIII\n").unwrap();

        let runner = BenchmarkRunner::new(Arc::new(PolyAFilter), "poly-a");
        let result = runner.run(&BenchmarkConfig::for_sample(&sample)).unwrap();
        let csv = to_csv(&[result]);
        let row = csv.lines().nth(1).unwrap();

        let quoted = format!("\"{}\"", sample.display().to_string().replace('"', "\"\""));
        let prefix = format!("poly-a,{},", quoted);
        assert!(row.starts_with(&prefix), "unexpected row: {}", row);
        assert!(row[prefix.len()..].starts_with("1,1,"));
        assert_eq!(csv_field("plain"), "plain");
    }

    #[test]
    fn test_run_and_csv() {
        let dir = tempfile::tempdir().unwrap();
        let sample = dir.path().join("mix.fastq");
        std::fs::write(
            &sample,
            "@human_1\nAAAA\n+\nIIII\n@human_2\nACGT\n+\nIIII\n@pathogen_1\nCCCC\n+\nIIII\n@other\nAAAA\n+\nIIII\n",
        )
        .unwrap();

        let runner = BenchmarkRunner::new(Arc::new(PolyAFilter), "poly-a");
        let result = runner.run(&BenchmarkConfig::for_sample(&sample)).unwrap();
        assert_eq!(result.matrix.tp, 1);
        assert_eq!(result.matrix.fn_, 1);
        assert_eq!(result.matrix.tn, 1);
        assert_eq!(result.unlabelled, 1);
        assert_eq!(result.precision, Some(1.0));

        let csv = to_csv(&[result.clone()]);
        let mut lines = csv.lines();
        assert_eq!(lines.next(), Some(CSV_HEADER));
        assert!(lines.next().unwrap().starts_with("poly-a,"));

        let json_path = dir.path().join("results.json");
        write_results(&[result], &json_path).unwrap();
        let parsed: Vec<BenchmarkResult> =
            serde_json::from_str(&std::fs::read_to_string(json_path).unwrap()).unwrap();
        assert_eq!(parsed[0].filter, "poly-a");
    }
}
