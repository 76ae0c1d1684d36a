use crate::error::ApiError;

/// Trim a user message and check it against the length limit.
///
/// `Ok(None)` means there is nothing to answer: empty messages are ignored.
pub fn validate_user_message(text: &str, max_chars: usize) -> Result<Option<&str>, ApiError> {
    let text = text.trim();
    if text.is_empty() {
        return Ok(None);
    }
    if text.chars().count() > max_chars {
        return Err(ApiError::InvalidInput(format!(
            "Message too long (max {} characters)",
            max_chars
        )));
    }
    Ok(Some(text))
}

/// Validate language code format (e.g., en_US, de_DE, or just en)
pub fn is_valid_language_code(code: &str) -> bool {
    let parts: Vec<&str> = code.split('_').collect();
    match parts.len() {
        1 => parts[0].len() == 2 && parts[0].chars().all(|c| c.is_ascii_lowercase()),
        2 => {
            parts[0].len() == 2
                && parts[0].chars().all(|c| c.is_ascii_lowercase())
                && parts[1].len() == 2
                && parts[1].chars().all(|c| c.is_ascii_uppercase())
        }
        _ => false,
    }
}
