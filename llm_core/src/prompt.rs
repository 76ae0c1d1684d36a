//! Prompt template applied to user messages.

const PERSONA: &str = "You are a helpful, conversational AI assistant. \
Answer the user's question thoroughly but also try to be engaging and ask a \
follow-up question when appropriate to keep the conversation going. \
Be natural and friendly.";

/// Wrap a user message in the assistant persona.
pub fn build_prompt(user_text: &str) -> String {
    format!("{PERSONA}\n\nUser: {}", user_text.trim())
}
