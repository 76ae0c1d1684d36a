//! Text cleanup applied before synthesis.
//!
//! Generated replies often contain markdown. The voice should not read out
//! asterisks, backticks or link targets, so these are stripped here. The
//! original text is still what the peer sees in `text_chunk` messages.

/// Strip markdown markers and normalize whitespace for natural speech.
///
/// Falls back to the input when cleaning leaves nothing speakable.
pub fn clean_for_speech(text: &str) -> String {
    let mut cleaned = strip_fenced_code(text);
    cleaned = strip_links(&cleaned);

    let mut lines = Vec::new();
    for line in cleaned.lines() {
        lines.push(strip_list_marker(line.trim_start().trim_start_matches('#').trim_start()));
    }
    cleaned = lines.join(" ");

    for marker in ["**", "__", "~~", "`", "*"] {
        cleaned = cleaned.replace(marker, "");
    }

    let mut out = String::with_capacity(cleaned.len());
    for word in cleaned.split_whitespace() {
        // Punctuation detached by markdown removal ("word ,") rejoins the word.
        if !out.is_empty() && !word.starts_with(|c: char| matches!(c, ',' | '.' | '!' | '?' | ';' | ':')) {
            out.push(' ');
        }
        out.push_str(word);
    }

    if out.chars().any(|c| c.is_alphanumeric()) {
        out
    } else {
        text.trim().to_string()
    }
}

fn strip_fenced_code(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(start) = rest.find("```") {
        match rest[start + 3..].find("```") {
            Some(end) => {
                out.push_str(&rest[..start]);
                rest = &rest[start + 3 + end + 3..];
            }
            None => break,
        }
    }
    out.push_str(rest);
    out
}

/// `[label](target)` becomes `label`.
fn strip_links(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(open) = rest.find('[') {
        let after_open = &rest[open + 1..];
        let Some(close) = after_open.find("](") else {
            break;
        };
        let Some(end) = after_open[close + 2..].find(')') else {
            break;
        };
        out.push_str(&rest[..open]);
        out.push_str(&after_open[..close]);
        rest = &after_open[close + 2 + end + 1..];
    }
    out.push_str(rest);
    out
}

fn strip_list_marker(line: &str) -> &str {
    for bullet in ["- ", "* ", "+ "] {
        if let Some(rest) = line.strip_prefix(bullet) {
            return rest;
        }
    }
    if let Some(dot) = line.find(". ") {
        if dot > 0 && line[..dot].chars().all(|c| c.is_ascii_digit()) {
            return &line[dot + 2..];
        }
    }
    line
}
