use scout_core::errors::ProviderError;
use scout_core::messages::{AssistantContent, Message, UserContent};

/// Reject histories a backend would refuse.
///
/// A message is empty when it has no blocks, or when every block is text
/// made only of whitespace. Progress messages are never checked since they
/// are not sent.
pub fn validate_messages(messages: &[Message]) -> Result<(), ProviderError> {
    for (index, msg) in messages.iter().enumerate() {
        let empty = match msg {
            Message::User(user) => user.content.iter().all(|c| match c {
                UserContent::Text { text } => text.trim().is_empty(),
                _ => false,
            }),
            Message::Assistant(asst) => asst.content.iter().all(|c| match c {
                AssistantContent::Text { text } => text.trim().is_empty(),
                _ => false,
            }),
            Message::Progress(_) => false,
        };
        if empty {
            return Err(ProviderError::EmptyContent {
                index,
                role: msg.kind(),
            });
        }
    }
    Ok(())
}
