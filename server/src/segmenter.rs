//! Incremental sentence segmentation of generated text.

/// One speakable unit of a response. Ids start at 0 per response cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextUnit {
    pub sequence_id: u64,
    pub text: String,
}

/// Splits an incrementally arriving text stream into sentence-like units.
///
/// A unit ends at the earliest of `". "`, `"! "`, `"? "` or `"\n"`. Units are
/// trimmed; spans that are only whitespace are dropped without using up a
/// sequence id.
#[derive(Debug, Default)]
pub struct Segmenter {
    buffer: String,
    // Bytes before this offset are known not to start a boundary.
    scan_from: usize,
    next_id: u64,
}

impl Segmenter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a fragment and return every unit it completes, in order.
    pub fn feed(&mut self, fragment: &str) -> Vec<TextUnit> {
        self.buffer.push_str(fragment);
        let mut units = Vec::new();
        while let Some(end) = self.next_boundary() {
            let span: String = self.buffer.drain(..end).collect();
            self.scan_from = 0;
            if let Some(unit) = self.make_unit(&span) {
                units.push(unit);
            }
        }
        // A trailing '.', '!' or '?' may still be completed by the next fragment.
        self.scan_from = self.buffer.len().saturating_sub(1);
        units
    }

    /// Emit whatever remains once the input has ended.
    pub fn flush(&mut self) -> Option<TextUnit> {
        let rest = std::mem::take(&mut self.buffer);
        self.scan_from = 0;
        self.make_unit(&rest)
    }

    // Markers are ASCII, so every returned offset is a char boundary.
    fn next_boundary(&self) -> Option<usize> {
        let bytes = self.buffer.as_bytes();
        for i in self.scan_from..bytes.len() {
            match bytes[i] {
                b'\n' => return Some(i + 1),
                b'.' | b'!' | b'?' if bytes.get(i + 1) == Some(&b' ') => return Some(i + 2),
                _ => {}
            }
        }
        None
    }

    fn make_unit(&mut self, span: &str) -> Option<TextUnit> {
        let text = span.trim();
        if text.is_empty() {
            return None;
        }
        let unit = TextUnit {
            sequence_id: self.next_id,
            text: text.to_string(),
        };
        self.next_id += 1;
        Some(unit)
    }
}
