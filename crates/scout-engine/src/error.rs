use scout_core::errors::ProviderError;
use scout_core::messages::MessageError;
use scout_store::StoreError;

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("provider error: {0}")]
    Provider(#[from] ProviderError),

    #[error("tool {tool} finished without a result")]
    ToolStreamIncomplete { tool: String },

    #[error("max turns exceeded: {0}")]
    MaxTurnsExceeded(u32),

    #[error("compaction failed: {0}")]
    Compaction(String),

    #[error("hook error: {0}")]
    Hook(String),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error(transparent)]
    Message(#[from] MessageError),
}
