//! Context registry.
//!
//! A context is one upload session. All of its state lives in the shared store
//! under `context:{id}:*` keys that carry the context time-to-live. Nothing ever
//! indexes contexts centrally: an abandoned context simply expires. Every
//! multi-key mutation is issued as one atomic batch that also refreshes the TTL
//! of every key the context owns.

use serde::Serialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use swgts_core::{PairGroup, Read};
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::error::ServerError;
use crate::keys::{ContextKeys, STATS_BASES};
use crate::store::{SharedStore, StoreOp};
use crate::throughput::ThroughputEstimator;

/// Result of a close request
#[derive(Debug, Clone, PartialEq)]
pub enum CloseOutcome {
    /// Finalized: the context and its keys are gone
    Closed {
        /// Grouped reads examined over the life of the context
        total: i64,
        /// Identifier line of every kept record of pair slot 0
        saved: Vec<String>,
    },
    /// Bytes are still pending, nothing was changed
    Busy { pending_bytes: i64, retry_after: f64 },
}

/// Snapshot of a context's counters
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ContextStatus {
    #[serde(rename = "pending bytes")]
    pub pending_bytes: i64,
    #[serde(rename = "processed reads")]
    pub processed_reads: i64,
    #[serde(rename = "saved reads")]
    pub saved_reads: u64,
    #[serde(rename = "pair count")]
    pub pair_count: usize,
}

/// Outcome of recording a filtered job
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobAccounting {
    Recorded { pending_bytes: i64, processed_reads: i64 },
    /// The context expired or was closed while the job was in flight
    Orphaned,
}

/// Keep only the final path component of a client supplied name
pub fn sanitize_filename(name: &str) -> Option<String> {
    Path::new(name)
        .file_name()
        .and_then(|n| n.to_str())
        .filter(|n| !n.is_empty())
        .map(str::to_string)
}

#[derive(Clone)]
pub struct ContextRegistry {
    store: SharedStore,
    ttl: Duration,
    upload_dir: PathBuf,
    throughput: ThroughputEstimator,
}

impl ContextRegistry {
    pub fn new(store: SharedStore, ttl: Duration, upload_dir: impl Into<PathBuf>) -> Self {
        let throughput = ThroughputEstimator::new(store.clone(), ttl);
        Self {
            store,
            ttl,
            upload_dir: upload_dir.into(),
            throughput,
        }
    }

    pub fn store(&self) -> &SharedStore {
        &self.store
    }

    pub fn throughput(&self) -> &ThroughputEstimator {
        &self.throughput
    }

    /// Create a context with one pair slot per filename
    #[instrument(skip(self))]
    pub async fn create(&self, filenames: &[String]) -> Result<Uuid, ServerError> {
        if filenames.is_empty() {
            return Err(ServerError::validation("filenames must not be empty."));
        }
        let names = filenames
            .iter()
            .map(|name| {
                sanitize_filename(name).ok_or_else(|| {
                    ServerError::validation(format!("'{}' is not a valid filename.", name))
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        let id = Uuid::new_v4();
        let keys = ContextKeys::new(id);
        let ttl = Some(self.ttl);

        let mut ops = vec![
            StoreOp::set(keys.pending_bytes(), 0, ttl),
            StoreOp::set(keys.pair_count(), names.len(), ttl),
            StoreOp::set(keys.processed_reads(), 0, ttl),
        ];
        for (pair, name) in names.iter().enumerate() {
            ops.push(StoreOp::set(keys.filename(pair), name, ttl));
        }
        self.store.atomic(ops).await?;

        info!(context = %id, files = ?names, "Created context");
        Ok(id)
    }

    pub async fn exists(&self, id: Uuid) -> Result<bool, ServerError> {
        Ok(self.store.exists(&ContextKeys::new(id).pair_count()).await?)
    }

    async fn counter(&self, key: &str) -> Result<i64, ServerError> {
        self.store.get_i64(key).await?.ok_or(ServerError::NotFound)
    }

    async fn stored_pair_count(&self, id: Uuid) -> Result<usize, ServerError> {
        let value = self.counter(&ContextKeys::new(id).pair_count()).await?;
        usize::try_from(value)
            .ok()
            .filter(|n| *n > 0)
            .ok_or_else(|| ServerError::Internal(format!("context {} has pair count {}", id, value)))
    }

    /// Resolve a live context. The lookup counts as activity and refreshes
    /// the TTL of every key the context owns, so submissions that are deferred
    /// and clients polling a busy close keep the context alive.
    pub async fn pair_count(&self, id: Uuid) -> Result<usize, ServerError> {
        let pair_count = self.stored_pair_count(id).await?;
        self.store.atomic(self.refresh_ops(id, pair_count)).await?;
        Ok(pair_count)
    }

    pub async fn pending_bytes(&self, id: Uuid) -> Result<i64, ServerError> {
        self.counter(&ContextKeys::new(id).pending_bytes()).await
    }

    pub async fn processed_reads(&self, id: Uuid) -> Result<i64, ServerError> {
        self.counter(&ContextKeys::new(id).processed_reads()).await
    }

    /// TTL refresh for every key of a context
    pub fn refresh_ops(&self, id: Uuid, pair_count: usize) -> Vec<StoreOp> {
        ContextKeys::new(id)
            .all(pair_count)
            .into_iter()
            .map(|key| StoreOp::expire(key, self.ttl))
            .collect()
    }

    /// Apply relative updates to both counters. Returns the new
    /// `(pending_bytes, processed_reads)`.
    pub async fn adjust(
        &self,
        id: Uuid,
        pending_delta: i64,
        processed_delta: i64,
    ) -> Result<(i64, i64), ServerError> {
        let pair_count = self.stored_pair_count(id).await?;
        let keys = ContextKeys::new(id);

        let mut ops = vec![
            StoreOp::incr_by(keys.pending_bytes(), pending_delta),
            StoreOp::incr_by(keys.processed_reads(), processed_delta),
        ];
        ops.extend(self.refresh_ops(id, pair_count));

        match self.store.atomic(ops).await?.as_slice() {
            [pending, processed] => Ok((*pending, *processed)),
            other => Err(ServerError::Internal(format!(
                "expected 2 counter replies, got {}",
                other.len()
            ))),
        }
    }

    /// Relative update of the reservation; returns the new value
    pub async fn adjust_pending_bytes(&self, id: Uuid, delta: i64) -> Result<i64, ServerError> {
        let (pending, _) = self.adjust(id, delta, 0).await?;
        Ok(pending)
    }

    /// Persist the outcome of a filtered job in one atomic batch: kept records
    /// into the per-pair sets, examined groups into `processed_reads`, release
    /// of the job's reservation, the global base counter and a throughput sample.
    #[instrument(skip(self, kept), fields(context = %id, kept = kept.len()))]
    pub async fn record_job(
        &self,
        id: Uuid,
        kept: &[PairGroup],
        examined: usize,
        byte_size: u64,
        sample: Option<f64>,
    ) -> Result<JobAccounting, ServerError> {
        let pair_count = match self.store.get_i64(&ContextKeys::new(id).pair_count()).await? {
            Some(n) if n > 0 => n as usize,
            _ => return Ok(JobAccounting::Orphaned),
        };
        let keys = ContextKeys::new(id);

        let mut ops = Vec::with_capacity(pair_count + 16);
        for pair in 0..pair_count {
            let members: Vec<String> = kept
                .iter()
                .filter_map(|group| group.get(pair))
                .map(Read::raw)
                .collect();
            ops.push(StoreOp::SAdd {
                key: keys.reads(pair),
                members,
            });
        }
        ops.push(StoreOp::incr_by(keys.processed_reads(), examined as i64));
        ops.push(StoreOp::incr_by(keys.pending_bytes(), -(byte_size as i64)));
        ops.push(StoreOp::incr_by(STATS_BASES, byte_size as i64));
        if let Some(sample) = sample {
            ops.extend(self.throughput.sample_ops(id, sample));
        }
        ops.extend(self.refresh_ops(id, pair_count));

        match self.store.atomic(ops).await?.as_slice() {
            [processed_reads, pending_bytes, _] => {
                if *pending_bytes < 0 {
                    warn!(context = %id, pending_bytes, "Pending bytes dropped below zero");
                }
                Ok(JobAccounting::Recorded {
                    pending_bytes: *pending_bytes,
                    processed_reads: *processed_reads,
                })
            }
            other => Err(ServerError::Internal(format!(
                "expected 3 counter replies, got {}",
                other.len()
            ))),
        }
    }

    /// Release the reservation of a job whose results were lost. Its groups
    /// still count as examined; nothing is kept.
    pub async fn release_job(
        &self,
        id: Uuid,
        examined: usize,
        byte_size: u64,
    ) -> Result<JobAccounting, ServerError> {
        let pair_count = match self.store.get_i64(&ContextKeys::new(id).pair_count()).await? {
            Some(n) if n > 0 => n as usize,
            _ => return Ok(JobAccounting::Orphaned),
        };
        let keys = ContextKeys::new(id);

        let mut ops = vec![
            StoreOp::incr_by(keys.processed_reads(), examined as i64),
            StoreOp::incr_by(keys.pending_bytes(), -(byte_size as i64)),
        ];
        ops.extend(self.refresh_ops(id, pair_count));

        match self.store.atomic(ops).await?.as_slice() {
            [processed_reads, pending_bytes] => Ok(JobAccounting::Recorded {
                pending_bytes: *pending_bytes,
                processed_reads: *processed_reads,
            }),
            other => Err(ServerError::Internal(format!(
                "expected 2 counter replies, got {}",
                other.len()
            ))),
        }
    }

    pub async fn status(&self, id: Uuid) -> Result<ContextStatus, ServerError> {
        let pair_count = self.pair_count(id).await?;
        let keys = ContextKeys::new(id);
        Ok(ContextStatus {
            pending_bytes: self.pending_bytes(id).await?,
            processed_reads: self.processed_reads(id).await?,
            saved_reads: self.store.scard(&keys.reads(0)).await?,
            pair_count,
        })
    }

    /// Finalize a context once nothing is pending.
    ///
    /// Not synchronized with workers: a job recorded between the pending check
    /// and the key deletion is lost together with the context.
    #[instrument(skip(self))]
    pub async fn close(&self, id: Uuid, hands_off: bool) -> Result<CloseOutcome, ServerError> {
        let pair_count = self.pair_count(id).await?;
        let pending_bytes = self.pending_bytes(id).await?;

        if pending_bytes != 0 {
            let rate = self.throughput.rate(id).await?;
            return Ok(CloseOutcome::Busy {
                pending_bytes,
                retry_after: pending_bytes as f64 * rate,
            });
        }

        let keys = ContextKeys::new(id);
        let total = self.processed_reads(id).await?;

        let mut pairs = Vec::with_capacity(pair_count);
        for pair in 0..pair_count {
            pairs.push(self.store.smembers(&keys.reads(pair)).await?);
        }

        if !hands_off {
            let dir = self.upload_dir.join(id.to_string());
            tokio::fs::create_dir_all(&dir).await?;
            for (pair, records) in pairs.iter().enumerate() {
                let filename = self
                    .store
                    .get(&keys.filename(pair))
                    .await?
                    .and_then(|name| sanitize_filename(&name))
                    .ok_or_else(|| {
                        ServerError::Internal(format!("context {} lost filename of pair {}", id, pair))
                    })?;
                tokio::fs::write(dir.join(&filename), records.join("\n")).await?;
            }
        }

        let saved: Vec<String> = pairs
            .first()
            .map(|records| {
                records
                    .iter()
                    .map(|raw| Read::id_of_raw(raw).to_string())
                    .collect()
            })
            .unwrap_or_default();

        self.store
            .atomic(vec![StoreOp::Del {
                keys: keys.all(pair_count),
            }])
            .await?;

        info!(context = %id, saved = saved.len(), total, hands_off, "Closed context");
        Ok(CloseOutcome::Closed { total, saved })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{MemoryStore, StateStore};
    use std::sync::Arc;

    fn registry(dir: &Path) -> (Arc<MemoryStore>, ContextRegistry) {
        let store = Arc::new(MemoryStore::new());
        let registry = ContextRegistry::new(store.clone(), Duration::from_secs(60), dir);
        (store, registry)
    }

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    fn group(id: &str, seqs: &[&str]) -> PairGroup {
        seqs.iter()
            .map(|s| Read::new(id, *s, "+", "I".repeat(s.len())))
            .collect()
    }

    #[test]
    fn test_sanitize_filename() {
        assert_eq!(sanitize_filename("reads_R1.fastq").as_deref(), Some("reads_R1.fastq"));
        assert_eq!(sanitize_filename("/tmp/x/../reads.fq.gz").as_deref(), Some("reads.fq.gz"));
        assert_eq!(sanitize_filename("../../etc/passwd").as_deref(), Some("passwd"));
        assert_eq!(sanitize_filename(".."), None);
        assert_eq!(sanitize_filename(""), None);
        assert_eq!(sanitize_filename("/"), None);
    }

    #[tokio::test]
    async fn test_create_initializes_counters() {
        let dir = tempfile::tempdir().unwrap();
        let (_, registry) = registry(dir.path());
        let id = registry.create(&names(&["a_R1.fq", "dir/a_R2.fq"])).await.unwrap();

        assert!(registry.exists(id).await.unwrap());
        assert_eq!(registry.pair_count(id).await.unwrap(), 2);
        assert_eq!(registry.pending_bytes(id).await.unwrap(), 0);
        assert_eq!(registry.processed_reads(id).await.unwrap(), 0);
        assert_eq!(
            registry.store().get(&ContextKeys::new(id).filename(1)).await.unwrap().as_deref(),
            Some("a_R2.fq")
        );
    }

    #[tokio::test]
    async fn test_create_rejects_bad_filenames() {
        let dir = tempfile::tempdir().unwrap();
        let (store, registry) = registry(dir.path());
        assert!(matches!(registry.create(&[]).await, Err(ServerError::Validation(_))));
        assert!(matches!(
            registry.create(&names(&["ok.fq", ".."])).await,
            Err(ServerError::Validation(_))
        ));
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn test_unknown_context_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let (_, registry) = registry(dir.path());
        let id = Uuid::new_v4();

        assert!(!registry.exists(id).await.unwrap());
        assert!(matches!(registry.pending_bytes(id).await, Err(ServerError::NotFound)));
        assert!(matches!(registry.adjust_pending_bytes(id, 5).await, Err(ServerError::NotFound)));
        assert!(matches!(registry.close(id, false).await, Err(ServerError::NotFound)));
        assert!(matches!(registry.status(id).await, Err(ServerError::NotFound)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_activity_extends_lifetime() {
        let dir = tempfile::tempdir().unwrap();
        let (store, registry) = registry(dir.path());
        let id = registry.create(&names(&["a.fq"])).await.unwrap();

        tokio::time::advance(Duration::from_secs(50)).await;
        assert_eq!(registry.adjust_pending_bytes(id, 10).await.unwrap(), 10);

        tokio::time::advance(Duration::from_secs(50)).await;
        assert!(registry.exists(id).await.unwrap());
        assert_eq!(registry.pending_bytes(id).await.unwrap(), 10);

        tokio::time::advance(Duration::from_secs(11)).await;
        assert!(!registry.exists(id).await.unwrap());
        assert!(store.is_empty().await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_polling_busy_close_keeps_context_alive() {
        let dir = tempfile::tempdir().unwrap();
        let (_, registry) = registry(dir.path());
        let id = registry.create(&names(&["a.fq"])).await.unwrap();
        registry.adjust_pending_bytes(id, 10).await.unwrap();

        for _ in 0..4 {
            tokio::time::advance(Duration::from_secs(25)).await;
            assert!(matches!(
                registry.close(id, false).await.unwrap(),
                CloseOutcome::Busy { pending_bytes: 10, .. }
            ));
        }
        assert!(registry.exists(id).await.unwrap());

        tokio::time::advance(Duration::from_secs(61)).await;
        assert!(matches!(registry.close(id, false).await, Err(ServerError::NotFound)));
    }

    #[tokio::test]
    async fn test_close_busy_does_not_mutate() {
        let dir = tempfile::tempdir().unwrap();
        let (_, registry) = registry(dir.path());
        let id = registry.create(&names(&["a.fq"])).await.unwrap();
        registry.adjust_pending_bytes(id, 40).await.unwrap();
        registry.throughput().record(id, 0.5).await.unwrap();

        let outcome = registry.close(id, false).await.unwrap();
        assert_eq!(
            outcome,
            CloseOutcome::Busy {
                pending_bytes: 40,
                retry_after: 20.0
            }
        );
        assert_eq!(registry.pending_bytes(id).await.unwrap(), 40);
        assert!(!dir.path().join(id.to_string()).exists());
    }

    #[tokio::test]
    async fn test_record_job_accounting() {
        let dir = tempfile::tempdir().unwrap();
        let (store, registry) = registry(dir.path());
        let id = registry.create(&names(&["a_1.fq", "a_2.fq"])).await.unwrap();
        registry.adjust_pending_bytes(id, 16).await.unwrap();

        let kept = vec![group("@r1", &["ACGT", "TTTT"])];
        let outcome = registry.record_job(id, &kept, 2, 16, Some(0.25)).await.unwrap();
        assert_eq!(
            outcome,
            JobAccounting::Recorded {
                pending_bytes: 0,
                processed_reads: 2
            }
        );

        assert_eq!(
            store.smembers(&ContextKeys::new(id).reads(1)).await.unwrap(),
            vec!["@r1\nTTTT\n+\nIIII"]
        );
        assert_eq!(store.get_i64(STATS_BASES).await.unwrap(), Some(16));
        assert_eq!(registry.throughput().rate(id).await.unwrap(), 0.25);
    }

    #[tokio::test]
    async fn test_record_job_for_vanished_context() {
        let dir = tempfile::tempdir().unwrap();
        let (store, registry) = registry(dir.path());
        let outcome = registry
            .record_job(Uuid::new_v4(), &[group("@r", &["A"])], 1, 1, None)
            .await
            .unwrap();
        assert_eq!(outcome, JobAccounting::Orphaned);
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn test_close_writes_output_and_deletes_state() {
        let dir = tempfile::tempdir().unwrap();
        let (store, registry) = registry(dir.path());
        let id = registry.create(&names(&["s_R1.fq", "s_R2.fq"])).await.unwrap();

        let kept = vec![group("@a", &["AC", "GT"]), group("@b", &["CC", "GG"])];
        registry.adjust_pending_bytes(id, 8).await.unwrap();
        registry.record_job(id, &kept, 3, 8, Some(0.1)).await.unwrap();

        let CloseOutcome::Closed { total, mut saved } = registry.close(id, false).await.unwrap()
        else {
            panic!("context should close");
        };
        saved.sort();
        assert_eq!(total, 3);
        assert_eq!(saved, vec!["@a", "@b"]);

        let r2 = std::fs::read_to_string(dir.path().join(id.to_string()).join("s_R2.fq")).unwrap();
        assert_eq!(r2.split('\n').count(), 8);
        assert!(r2.contains("@a\nGT\n+\nII"));
        assert!(r2.contains("@b\nGG\n+\nII"));

        assert!(!registry.exists(id).await.unwrap());
        // stats:bases is global and survives
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn test_close_hands_off_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let (_, registry) = registry(dir.path());
        let id = registry.create(&names(&["x.fq"])).await.unwrap();

        let outcome = registry.close(id, true).await.unwrap();
        assert_eq!(
            outcome,
            CloseOutcome::Closed {
                total: 0,
                saved: vec![]
            }
        );
        assert!(!dir.path().join(id.to_string()).exists());
        assert!(matches!(registry.close(id, true).await, Err(ServerError::NotFound)));
    }

    #[tokio::test]
    async fn test_status() {
        let dir = tempfile::tempdir().unwrap();
        let (_, registry) = registry(dir.path());
        let id = registry.create(&names(&["x.fq"])).await.unwrap();
        registry.adjust(id, 4, 0).await.unwrap();
        registry
            .record_job(id, &[group("@k", &["ACGT"])], 2, 4, None)
            .await
            .unwrap();

        let status = registry.status(id).await.unwrap();
        assert_eq!(
            status,
            ContextStatus {
                pending_bytes: 0,
                processed_reads: 2,
                saved_reads: 1,
                pair_count: 1
            }
        );
        let json = serde_json::to_value(&status).unwrap();
        assert_eq!(json["saved reads"], 1);
    }
}
