use async_trait::async_trait;
use serde_json::Value;

/// Asks whether a tool invocation may run.
#[async_trait]
pub trait PermissionCheck: Send + Sync {
    async fn can_use_tool(&self, tool_name: &str, input: &Value) -> bool;
}

pub struct AllowAll;

#[async_trait]
impl PermissionCheck for AllowAll {
    async fn can_use_tool(&self, _tool_name: &str, _input: &Value) -> bool {
        true
    }
}

pub struct DenyAll;

#[async_trait]
impl PermissionCheck for DenyAll {
    async fn can_use_tool(&self, _tool_name: &str, _input: &Value) -> bool {
        false
    }
}

/// Adapts a synchronous closure.
pub struct FnPermission<F>(pub F);

#[async_trait]
impl<F> PermissionCheck for FnPermission<F>
where
    F: Fn(&str, &Value) -> bool + Send + Sync,
{
    async fn can_use_tool(&self, tool_name: &str, input: &Value) -> bool {
        (self.0)(tool_name, input)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn fixed_answers() {
        assert!(AllowAll.can_use_tool("Bash", &json!({})).await);
        assert!(!DenyAll.can_use_tool("Bash", &json!({})).await);
    }

    #[tokio::test]
    async fn closure_sees_name_and_input() {
        let check = FnPermission(|name: &str, input: &Value| {
            name == "Bash" && input["command"] == "ls"
        });
        assert!(check.can_use_tool("Bash", &json!({"command": "ls"})).await);
        assert!(!check.can_use_tool("Bash", &json!({"command": "rm"})).await);
        assert!(!check.can_use_tool("Edit", &json!({"command": "ls"})).await);
    }
}
