use crate::document::{Document, Position};
use serde::Serialize;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TextWindow {
    pub prefix: String,
    pub suffix: String,
}

/// Up to `before` whole lines above the cursor plus the current line up to
/// the cursor, and the rest of the current line plus up to `after` lines
/// below. Positions past the end are clipped to the document.
pub fn window_around(doc: &Document, pos: Position, before: usize, after: usize) -> TextWindow {
    let last_line = doc.line_count().saturating_sub(1);
    let line = pos.line.min(last_line);
    let character = if pos.line > last_line {
        usize::MAX
    } else {
        pos.character
    };

    let text = doc.text();
    let cursor = doc
        .offset_at(Position::new(line, character))
        .unwrap_or(text.len());

    let first = line.saturating_sub(before);
    let prefix_start = doc.line_start(first).unwrap_or(0);

    let end_line = line.saturating_add(after).min(last_line);
    let suffix_end = match (doc.line_start(end_line), doc.line(end_line)) {
        (Some(start), Some(content)) => start + content.len(),
        _ => text.len(),
    };

    TextWindow {
        prefix: text[prefix_start..cursor].to_string(),
        suffix: text[cursor..suffix_end.max(cursor)].to_string(),
    }
}
