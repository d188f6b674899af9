use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Zero-based cursor location. `character` counts chars, not bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Position {
    pub line: usize,
    pub character: usize,
}

impl Position {
    pub fn new(line: usize, character: usize) -> Self {
        Self { line, character }
    }
}

/// Immutable snapshot of an editor buffer.
#[derive(Debug, Clone)]
pub struct Document {
    path: PathBuf,
    version: i64,
    text: String,
    line_starts: Vec<usize>,
}

impl Document {
    pub fn new(path: impl Into<PathBuf>, version: i64, text: impl Into<String>) -> Self {
        let text = text.into();
        let mut line_starts = vec![0];
        for (i, b) in text.bytes().enumerate() {
            if b == b'\n' {
                line_starts.push(i + 1);
            }
        }
        Self {
            path: path.into(),
            version,
            text,
            line_starts,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn version(&self) -> i64 {
        self.version
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    /// Number of lines; a trailing newline opens one more (empty) line.
    pub fn line_count(&self) -> usize {
        self.line_starts.len()
    }

    /// Text of line `idx` without its line terminator.
    pub fn line(&self, idx: usize) -> Option<&str> {
        let (start, end) = self.line_bounds(idx)?;
        Some(&self.text[start..end])
    }

    pub fn line_start(&self, idx: usize) -> Option<usize> {
        self.line_starts.get(idx).copied()
    }

    fn line_bounds(&self, idx: usize) -> Option<(usize, usize)> {
        let start = *self.line_starts.get(idx)?;
        let mut end = match self.line_starts.get(idx + 1) {
            Some(next) => next - 1,
            None => self.text.len(),
        };
        if end > start && self.text.as_bytes()[end - 1] == b'\r' {
            end -= 1;
        }
        Some((start, end))
    }

    /// Byte offset for `pos`. The column is clipped to the end of its line;
    /// a line past the end of the document yields `None`.
    pub fn offset_at(&self, pos: Position) -> Option<usize> {
        let (start, end) = self.line_bounds(pos.line)?;
        let line = &self.text[start..end];
        let col = line
            .char_indices()
            .nth(pos.character)
            .map(|(i, _)| i)
            .unwrap_or(line.len());
        Some(start + col)
    }

    /// Position of a byte offset, clipped to the document.
    pub fn position_at(&self, offset: usize) -> Position {
        let mut offset = offset.min(self.text.len());
        while !self.text.is_char_boundary(offset) {
            offset -= 1;
        }
        let line = match self.line_starts.binary_search(&offset) {
            Ok(idx) => idx,
            Err(idx) => idx - 1,
        };
        let start = self.line_starts[line];
        Position {
            line,
            character: self.text[start..offset].chars().count(),
        }
    }

    /// Path as shown to users and the assistant backend.
    pub fn file_name(&self) -> String {
        self.path.to_string_lossy().replace('\\', "/")
    }
}
