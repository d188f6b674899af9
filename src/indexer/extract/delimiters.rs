//! Brace matching over Perl source that ignores comments, POD, heredoc bodies,
//! string literals, quote-like operators and bare `/.../` matches.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InertKind {
    Comment,
    Pod,
    Quoted,
    Heredoc,
    Data,
}

/// Byte range whose delimiters must not be counted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InertRegion {
    pub kind: InertKind,
    pub start: usize,
    pub end: usize,
}

const QUOTE_OPS: &[&[u8]] = &[b"q", b"qq", b"qw", b"qr", b"m", b"s", b"tr", b"y"];
const TWO_PART_OPS: &[&[u8]] = &[b"s", b"tr", b"y"];

/// Words after which a `/` starts a match rather than a division.
const REGEX_AFTER_WORDS: &[&[u8]] = &[
    b"split", b"grep", b"map", b"if", b"unless", b"and", b"or", b"not", b"return", b"while",
    b"until", b"when",
];

#[derive(Debug)]
struct PendingHeredoc {
    tag: Vec<u8>,
    indented: bool,
}

pub struct DelimiterScanner<'a> {
    text: &'a str,
    regions: Vec<InertRegion>,
}

impl<'a> DelimiterScanner<'a> {
    pub fn new(text: &'a str) -> Self {
        Self {
            text,
            regions: inert_regions(text.as_bytes()),
        }
    }

    pub fn regions(&self) -> &[InertRegion] {
        &self.regions
    }

    /// Whether the byte at `offset` is live code.
    pub fn is_code(&self, offset: usize) -> bool {
        self.region_at(offset).is_none()
    }

    fn region_at(&self, offset: usize) -> Option<&InertRegion> {
        let idx = self.regions.partition_point(|r| r.end <= offset);
        self.regions
            .get(idx)
            .filter(|r| r.start <= offset && offset < r.end)
    }

    /// Code bytes from `from` onwards with their offsets.
    fn code_bytes(&self, from: usize) -> impl Iterator<Item = (usize, u8)> + '_ {
        let bytes = self.text.as_bytes();
        let mut i = from;
        let mut next_region = self.regions.partition_point(|r| r.end <= from);
        std::iter::from_fn(move || loop {
            if i >= bytes.len() {
                return None;
            }
            if let Some(region) = self.regions.get(next_region) {
                if region.start <= i {
                    i = i.max(region.end);
                    next_region += 1;
                    continue;
                }
            }
            let out = (i, bytes[i]);
            i += 1;
            return Some(out);
        })
    }

    /// End (exclusive) of the block opened by the first `{` at or after `from`.
    ///
    /// Returns `None` when a `;` shows up before any `{` (a forward declaration)
    /// or when no block opens at all. An unbalanced block runs to the end of text.
    pub fn block_end(&self, from: usize) -> Option<usize> {
        let mut depth = 0usize;
        let mut opened = false;
        for (i, b) in self.code_bytes(from) {
            match b {
                b'{' => {
                    depth += 1;
                    opened = true;
                }
                b'}' if opened => {
                    depth -= 1;
                    if depth == 0 {
                        return Some(i + 1);
                    }
                }
                b';' if !opened => return None,
                _ => {}
            }
        }
        opened.then_some(self.text.len())
    }

    /// End (exclusive) of the statement starting at `from`: just past the first
    /// `;` outside any bracket pair, or at a closing brace of the enclosing block.
    pub fn statement_end(&self, from: usize) -> usize {
        let mut depth = 0usize;
        for (i, b) in self.code_bytes(from) {
            match b {
                b'{' | b'(' | b'[' => depth += 1,
                b'}' | b')' | b']' => {
                    if depth == 0 {
                        return i;
                    }
                    depth -= 1;
                }
                b';' if depth == 0 => return i + 1,
                _ => {}
            }
        }
        self.text.len()
    }

    /// Copy of the text with comments and POD replaced by spaces.
    /// Byte offsets and line breaks are preserved.
    pub fn without_comments(&self) -> String {
        let mut bytes = self.text.as_bytes().to_vec();
        for region in &self.regions {
            if matches!(region.kind, InertKind::Comment | InertKind::Pod) {
                for b in &mut bytes[region.start..region.end] {
                    if *b != b'\n' {
                        *b = b' ';
                    }
                }
            }
        }
        // Only whole comment or POD spans were blanked, so every multi-byte
        // sequence is either intact or fully replaced by ASCII spaces.
        String::from_utf8(bytes).unwrap_or_default()
    }
}

pub fn inert_regions(b: &[u8]) -> Vec<InertRegion> {
    let mut out = Vec::new();
    let mut pending: Vec<PendingHeredoc> = Vec::new();
    let mut i = 0;

    while i < b.len() {
        let c = b[i];

        if c == b'\n' {
            i += 1;
            if !pending.is_empty() {
                let start = i;
                i = skip_heredoc_bodies(b, i, &mut pending);
                out.push(region(InertKind::Heredoc, start, i));
            }
            continue;
        }

        let at_line_start = i == 0 || b[i - 1] == b'\n';
        if at_line_start {
            if c == b'=' && b.get(i + 1).is_some_and(u8::is_ascii_alphabetic) {
                let end = pod_end(b, i);
                out.push(region(InertKind::Pod, i, end));
                i = end;
                continue;
            }
            if b[i..].starts_with(b"__END__") || b[i..].starts_with(b"__DATA__") {
                out.push(region(InertKind::Data, i, b.len()));
                break;
            }
        }

        let prev = if i > 0 { Some(b[i - 1]) } else { None };
        match c {
            b'#' if prev != Some(b'$') => {
                let end = line_end(b, i);
                out.push(region(InertKind::Comment, i, end));
                i = end;
            }
            b'\'' | b'"' | b'`' if prev != Some(b'$') => {
                let end = skip_delimited(b, i + 1, c, None);
                out.push(region(InertKind::Quoted, i, end));
                i = end;
            }
            b'<' if b[i..].starts_with(b"<<") => match heredoc_marker(b, i + 2) {
                Some((heredoc, after)) => {
                    pending.push(heredoc);
                    i = after;
                }
                None => i += 2,
            },
            b'/' if regex_allowed_before(b, i) => {
                let end = skip_flags(b, skip_delimited(b, i + 1, b'/', None));
                out.push(region(InertKind::Quoted, i, end));
                i = end;
            }
            c if c.is_ascii_alphabetic() || c == b'_' => {
                let word_end = ident_end(b, i);
                let word = &b[i..word_end];
                if QUOTE_OPS.contains(&word) && quote_op_allowed_after(b, i) {
                    if let Some(end) = skip_quote_like(b, word, word_end) {
                        out.push(region(InertKind::Quoted, i, end));
                        i = end;
                        continue;
                    }
                }
                i = word_end;
            }
            _ => i += 1,
        }
    }

    out
}

fn region(kind: InertKind, start: usize, end: usize) -> InertRegion {
    InertRegion { kind, start, end }
}

fn line_end(b: &[u8], from: usize) -> usize {
    b[from..]
        .iter()
        .position(|c| *c == b'\n')
        .map(|p| from + p)
        .unwrap_or(b.len())
}

fn ident_end(b: &[u8], from: usize) -> usize {
    b[from..]
        .iter()
        .position(|c| !(c.is_ascii_alphanumeric() || *c == b'_'))
        .map(|p| from + p)
        .unwrap_or(b.len())
}

/// POD runs from a `=word` line through the next `=cut` line.
fn pod_end(b: &[u8], from: usize) -> usize {
    let mut line_start = from;
    loop {
        let end = line_end(b, line_start);
        if line_start != from && b[line_start..end].starts_with(b"=cut") {
            return end;
        }
        if end >= b.len() {
            return b.len();
        }
        line_start = end + 1;
    }
}

fn closing_for(open: u8) -> Option<u8> {
    match open {
        b'(' => Some(b')'),
        b'[' => Some(b']'),
        b'{' => Some(b'}'),
        b'<' => Some(b'>'),
        _ => None,
    }
}

/// Index just past the closing `close`, honouring backslash escapes and,
/// when `open` is given, nesting of the bracket pair.
fn skip_delimited(b: &[u8], from: usize, close: u8, open: Option<u8>) -> usize {
    let mut depth = 0usize;
    let mut i = from;
    while i < b.len() {
        let c = b[i];
        if c == b'\\' {
            i += 2;
            continue;
        }
        if Some(c) == open {
            depth += 1;
        } else if c == close {
            if depth == 0 {
                return i + 1;
            }
            depth -= 1;
        }
        i += 1;
    }
    b.len()
}

fn quote_op_allowed_after(b: &[u8], word_start: usize) -> bool {
    if word_start == 0 {
        return true;
    }
    let prev = b[word_start - 1];
    if prev.is_ascii_alphanumeric()
        || matches!(prev, b'_' | b'$' | b'@' | b'%' | b'&' | b'*' | b':' | b'\'' | b'-')
    {
        return false;
    }
    // method call such as `$obj->s(...)`
    !(prev == b'>' && word_start >= 2 && b[word_start - 2] == b'-')
}

/// Whether a `/` at `slash` sits where Perl expects a term. Start of
/// statement, after an operator or opening bracket, or after a list operator.
fn regex_allowed_before(b: &[u8], slash: usize) -> bool {
    let Some(prev_at) = b[..slash].iter().rposition(|c| !c.is_ascii_whitespace()) else {
        return true;
    };
    let prev = b[prev_at];
    if prev.is_ascii_alphanumeric() || prev == b'_' {
        let word_start = b[..=prev_at]
            .iter()
            .rposition(|c| !(c.is_ascii_alphanumeric() || *c == b'_'))
            .map_or(0, |p| p + 1);
        let sigiled = word_start > 0 && matches!(b[word_start - 1], b'$' | b'@' | b'%' | b'&');
        return !sigiled && REGEX_AFTER_WORDS.contains(&&b[word_start..=prev_at]);
    }
    matches!(
        prev,
        b'(' | b',' | b'{' | b';' | b'[' | b'=' | b'~' | b'!' | b'|' | b'&' | b'?' | b':'
    )
}

fn skip_flags(b: &[u8], mut i: usize) -> usize {
    while i < b.len() && b[i].is_ascii_alphabetic() {
        i += 1;
    }
    i
}

fn skip_spaces(b: &[u8], mut i: usize) -> usize {
    while i < b.len() && b[i].is_ascii_whitespace() {
        i += 1;
    }
    i
}

fn skip_quote_like(b: &[u8], word: &[u8], word_end: usize) -> Option<usize> {
    let open_at = skip_spaces(b, word_end);
    let open = *b.get(open_at)?;
    let spaced = open_at > word_end;
    if open.is_ascii_alphanumeric()
        || open.is_ascii_whitespace()
        || matches!(open, b'_' | b',' | b';' | b'=' | b')' | b']' | b'}' | b'>')
        || (spaced && open == b'#')
    {
        return None;
    }

    let first_end = match closing_for(open) {
        Some(close) => skip_delimited(b, open_at + 1, close, Some(open)),
        None => skip_delimited(b, open_at + 1, open, None),
    };
    if !TWO_PART_OPS.contains(&word) {
        return Some(first_end);
    }

    match closing_for(open) {
        Some(_) => {
            let second_at = skip_spaces(b, first_end);
            let second = *b.get(second_at)?;
            Some(match closing_for(second) {
                Some(close) => skip_delimited(b, second_at + 1, close, Some(second)),
                None => skip_delimited(b, second_at + 1, second, None),
            })
        }
        None => Some(skip_delimited(b, first_end, open, None)),
    }
}

/// Parses `<<"TAG"`, `<<'TAG'`, `<<TAG` and their `<<~` forms.
fn heredoc_marker(b: &[u8], from: usize) -> Option<(PendingHeredoc, usize)> {
    let mut i = from;
    let indented = b.get(i) == Some(&b'~');
    if indented {
        i += 1;
    }
    let c = *b.get(i)?;
    if c == b'"' || c == b'\'' {
        let end = b[i + 1..].iter().position(|x| *x == c)? + i + 1;
        let tag = b[i + 1..end].to_vec();
        if tag.is_empty() {
            return None;
        }
        return Some((PendingHeredoc { tag, indented }, end + 1));
    }
    if c.is_ascii_alphabetic() || c == b'_' {
        let end = ident_end(b, i);
        return Some((
            PendingHeredoc {
                tag: b[i..end].to_vec(),
                indented,
            },
            end,
        ));
    }
    None
}

fn skip_heredoc_bodies(b: &[u8], from: usize, pending: &mut Vec<PendingHeredoc>) -> usize {
    let mut i = from;
    for heredoc in pending.drain(..) {
        loop {
            if i >= b.len() {
                return b.len();
            }
            let end = line_end(b, i);
            let mut line = &b[i..end];
            if line.last() == Some(&b'\r') {
                line = &line[..line.len() - 1];
            }
            if heredoc.indented {
                let trimmed = line
                    .iter()
                    .position(|c| !c.is_ascii_whitespace())
                    .unwrap_or(line.len());
                line = &line[trimmed..];
            }
            i = (end + 1).min(b.len());
            if line == heredoc.tag.as_slice() {
                break;
            }
        }
    }
    i
}
