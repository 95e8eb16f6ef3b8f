pub mod bash;

use std::sync::Arc;

use crate::registry::{ToolRegistry, ToolSource};

pub use bash::BashTool;

/// Register the built-in tools.
pub fn register_builtin_tools(registry: &mut ToolRegistry) {
    registry.register(Arc::new(BashTool::new()), ToolSource::BuiltIn);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtins_registered() {
        let mut registry = ToolRegistry::new();
        register_builtin_tools(&mut registry);
        assert_eq!(registry.names(), vec!["Bash"]);
        assert_eq!(registry.source("Bash"), Some(&ToolSource::BuiltIn));
    }
}
