use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, warn};

use scout_store::{CompactionStats, CompactionStatsRepo};

use crate::error::EngineError;

/// Destination for flushed compaction records.
pub trait StatsSink: Send + Sync {
    fn write_batch(&self, batch: &[CompactionStats]) -> Result<(), EngineError>;
}

impl StatsSink for CompactionStatsRepo {
    fn write_batch(&self, batch: &[CompactionStats]) -> Result<(), EngineError> {
        Ok(self.append_batch(batch)?)
    }
}

/// Keeps flushed records in memory.
#[derive(Default)]
pub struct InMemoryStatsSink {
    records: Mutex<Vec<CompactionStats>>,
}

impl InMemoryStatsSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<CompactionStats> {
        self.records.lock().clone()
    }
}

impl StatsSink for InMemoryStatsSink {
    fn write_batch(&self, batch: &[CompactionStats]) -> Result<(), EngineError> {
        self.records.lock().extend_from_slice(batch);
        Ok(())
    }
}

/// Buffers compaction records and hands them to a sink in batches.
pub struct CompactionStatsLog {
    pending: Mutex<Vec<CompactionStats>>,
    sink: Arc<dyn StatsSink>,
    flush_every: usize,
}

impl CompactionStatsLog {
    pub fn new(sink: Arc<dyn StatsSink>, flush_every: usize) -> Self {
        Self {
            pending: Mutex::new(Vec::new()),
            sink,
            flush_every: flush_every.max(1),
        }
    }

    /// Buffer one record, flushing once `flush_every` are pending.
    pub fn record(&self, stats: CompactionStats) -> Result<(), EngineError> {
        let full = {
            let mut pending = self.pending.lock();
            pending.push(stats);
            pending.len() >= self.flush_every
        };
        if full {
            self.flush()?;
        }
        Ok(())
    }

    /// Write everything pending. On failure the records stay buffered.
    pub fn flush(&self) -> Result<(), EngineError> {
        let batch = std::mem::take(&mut *self.pending.lock());
        if batch.is_empty() {
            return Ok(());
        }
        match self.sink.write_batch(&batch) {
            Ok(()) => {
                debug!(count = batch.len(), "compaction stats flushed");
                Ok(())
            }
            Err(e) => {
                let mut pending = self.pending.lock();
                let newer = std::mem::replace(&mut *pending, batch);
                pending.extend(newer);
                Err(e)
            }
        }
    }

    pub fn pending_count(&self) -> usize {
        self.pending.lock().len()
    }
}

impl Drop for CompactionStatsLog {
    fn drop(&mut self) {
        if let Err(e) = self.flush() {
            warn!(error = %e, "failed to flush compaction stats on shutdown");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use scout_store::{Database, StoreError};

    fn stats(n: usize) -> CompactionStats {
        CompactionStats {
            timestamp: Utc::now(),
            message_count: n,
            token_count: 1000,
            tokens_removed: 10,
        }
    }

    struct FailingSink;

    impl StatsSink for FailingSink {
        fn write_batch(&self, _batch: &[CompactionStats]) -> Result<(), EngineError> {
            Err(StoreError::Database("disk I/O error".into()).into())
        }
    }

    #[test]
    fn flushes_every_n_records() {
        let sink = Arc::new(InMemoryStatsSink::new());
        let log = CompactionStatsLog::new(sink.clone(), 3);

        log.record(stats(1)).unwrap();
        log.record(stats(2)).unwrap();
        assert!(sink.records().is_empty());
        assert_eq!(log.pending_count(), 2);

        log.record(stats(3)).unwrap();
        assert_eq!(sink.records().len(), 3);
        assert_eq!(log.pending_count(), 0);
    }

    #[test]
    fn failed_flush_keeps_records() {
        let log = CompactionStatsLog::new(Arc::new(FailingSink), 2);
        log.record(stats(1)).unwrap();
        assert!(log.record(stats(2)).is_err());
        assert_eq!(log.pending_count(), 2);
    }

    #[test]
    fn drop_flushes_remainder() {
        let sink = Arc::new(InMemoryStatsSink::new());
        {
            let log = CompactionStatsLog::new(sink.clone(), 10);
            log.record(stats(1)).unwrap();
        }
        assert_eq!(sink.records().len(), 1);
    }

    #[test]
    fn repo_sink_persists() {
        let repo = Arc::new(CompactionStatsRepo::new(Database::in_memory().unwrap()));
        let log = CompactionStatsLog::new(repo.clone(), 1);
        log.record(stats(7)).unwrap();
        assert_eq!(repo.count().unwrap(), 1);
    }
}
