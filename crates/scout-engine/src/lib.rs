//! Orchestration for one agent conversation: the query loop, tool
//! dispatch with hooks and permissions, and history compaction.

pub mod compaction;
pub mod dispatcher;
pub mod error;
pub mod exec;
pub mod hooks;
pub mod mcp;
pub mod permissions;
pub mod prompt;
pub mod query;
pub mod registry;
pub mod tools;

pub use compaction::{CompactionEngine, CompactionStatsLog, Compacted};
pub use dispatcher::{DispatchEvent, ToolDispatcher};
pub use error::EngineError;
pub use exec::ProcessExecutor;
pub use hooks::{HookEngine, HookEvent, HookRequest};
pub use mcp::{McpClient, McpToolCatalog};
pub use permissions::{AllowAll, DenyAll, FnPermission, PermissionCheck};
pub use query::{QueryConfig, QueryEvent, QueryLoop};
pub use registry::{ToolRegistry, ToolSource};
