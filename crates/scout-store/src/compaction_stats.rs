use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use crate::database::Database;
use crate::error::StoreError;

/// One compaction event. Immutable once recorded.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompactionStats {
    pub timestamp: DateTime<Utc>,
    /// History length before compaction.
    pub message_count: usize,
    /// Token pressure that triggered compaction.
    pub token_count: u64,
    pub tokens_removed: u64,
}

/// A persisted [`CompactionStats`] with its row id.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompactionStatsRow {
    pub id: i64,
    #[serde(flatten)]
    pub stats: CompactionStats,
}

/// Append-only log of compaction events.
pub struct CompactionStatsRepo {
    db: Database,
}

impl CompactionStatsRepo {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Insert all records in one transaction.
    #[instrument(skip(self, batch), fields(count = batch.len()))]
    pub fn append_batch(&self, batch: &[CompactionStats]) -> Result<(), StoreError> {
        if batch.is_empty() {
            return Ok(());
        }
        self.db.with_conn(|conn| {
            let tx = conn.transaction()?;
            {
                let mut stmt = tx.prepare(
                    "INSERT INTO compaction_stats (timestamp, message_count, token_count, tokens_removed)
                     VALUES (?1, ?2, ?3, ?4)",
                )?;
                for stats in batch {
                    stmt.execute(rusqlite::params![
                        stats.timestamp.to_rfc3339(),
                        stats.message_count as i64,
                        stats.token_count as i64,
                        stats.tokens_removed as i64,
                    ])?;
                }
            }
            tx.commit()?;
            debug!(count = batch.len(), "compaction stats flushed");
            Ok(())
        })
    }

    /// Most recent records first.
    #[instrument(skip(self))]
    pub fn list_recent(&self, limit: usize) -> Result<Vec<CompactionStatsRow>, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, timestamp, message_count, token_count, tokens_removed
                 FROM compaction_stats ORDER BY id DESC LIMIT ?1",
            )?;
            let raw = stmt
                .query_map([limit as i64], |row| -> rusqlite::Result<RawRow> {
                    Ok((
                        row.get::<_, i64>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, i64>(2)?,
                        row.get::<_, i64>(3)?,
                        row.get::<_, i64>(4)?,
                    ))
                })?
                .collect::<Result<Vec<_>, _>>()?;

            raw.into_iter().map(row_from_raw).collect()
        })
    }

    pub fn count(&self) -> Result<u64, StoreError> {
        self.db.with_conn(|conn| {
            let n: i64 =
                conn.query_row("SELECT COUNT(*) FROM compaction_stats", [], |row| row.get(0))?;
            Ok(n as u64)
        })
    }
}

type RawRow = (i64, String, i64, i64, i64);

fn row_from_raw(
    (id, ts, message_count, token_count, tokens_removed): RawRow,
) -> Result<CompactionStatsRow, StoreError> {
    Ok(CompactionStatsRow {
        id,
        stats: CompactionStats {
            timestamp: DateTime::parse_from_rfc3339(&ts)?.with_timezone(&Utc),
            message_count: message_count as usize,
            token_count: token_count as u64,
            tokens_removed: tokens_removed as u64,
        },
    })
}
