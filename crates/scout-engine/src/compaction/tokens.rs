use scout_core::messages::{AssistantContent, Message, UserContent};

/// Approximation: chars / 4, rounded up.
pub fn estimate_text_tokens(text: &str) -> u64 {
    (text.chars().count() as u64).div_ceil(4)
}

/// Rough size of a base64 image, minimum 85.
pub fn estimate_image_tokens(base64_data: &str) -> u64 {
    let estimated_pixels = (base64_data.len() as u64 * 3 / 4) / 3;
    (estimated_pixels / 750).max(85)
}

/// Estimated tokens for one message, including a small per-message overhead.
pub fn estimate_message_tokens(msg: &Message) -> u64 {
    const OVERHEAD: u64 = 4;
    match msg {
        Message::User(user) => {
            OVERHEAD
                + user
                    .content
                    .iter()
                    .map(|c| match c {
                        UserContent::Text { text } => estimate_text_tokens(text),
                        UserContent::Image { data, .. } => estimate_image_tokens(data),
                        UserContent::ToolResult(r) => estimate_text_tokens(&r.content),
                    })
                    .sum::<u64>()
        }
        Message::Assistant(assistant) => {
            OVERHEAD
                + assistant
                    .content
                    .iter()
                    .map(|c| match c {
                        AssistantContent::Text { text } => estimate_text_tokens(text),
                        AssistantContent::Thinking { thinking, .. } => {
                            estimate_text_tokens(thinking)
                        }
                        AssistantContent::RedactedThinking { data } => estimate_text_tokens(data),
                        AssistantContent::ToolUse(tu) => {
                            estimate_text_tokens(&tu.name)
                                + estimate_text_tokens(&tu.input.to_string())
                        }
                    })
                    .sum::<u64>()
        }
        // Never sent to a backend.
        Message::Progress(_) => 0,
    }
}

pub fn estimate_messages_tokens(messages: &[Message]) -> u64 {
    messages.iter().map(estimate_message_tokens).sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use scout_core::messages::ToolResultBlock;

    #[test]
    fn text_rounds_up() {
        assert_eq!(estimate_text_tokens(""), 0);
        assert_eq!(estimate_text_tokens("abc"), 1);
        assert_eq!(estimate_text_tokens("abcdefgh"), 2);
        assert_eq!(estimate_text_tokens("abcdefghi"), 3);
    }

    #[test]
    fn image_has_floor() {
        assert_eq!(estimate_image_tokens("aGVsbG8="), 85);
    }

    #[test]
    fn message_includes_overhead() {
        assert_eq!(estimate_message_tokens(&Message::user_text("12345678")), 6);
        assert_eq!(
            estimate_message_tokens(&Message::tool_results(vec![ToolResultBlock::success(
                "t".into(),
                "1234"
            )])),
            5
        );
        assert_eq!(estimate_message_tokens(&Message::progress("t".into(), "long output")), 0);
    }

    #[test]
    fn sums_over_history() {
        let history = vec![Message::user_text("1234"), Message::assistant_text("12345678")];
        assert_eq!(estimate_messages_tokens(&history), 5 + 6);
    }
}
