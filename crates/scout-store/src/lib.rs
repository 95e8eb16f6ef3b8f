pub mod compaction_stats;
pub mod database;
pub mod error;
pub mod schema;

pub use compaction_stats::{CompactionStats, CompactionStatsRepo, CompactionStatsRow};
pub use database::Database;
pub use error::StoreError;
