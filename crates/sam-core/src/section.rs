//! Heading-delimited segmentation of a specification document.
//!
//! Sections own whole lines, terminators included, so the preamble followed by
//! every section's `content` reproduces the source byte for byte.

use serde::Serialize;

// ---------------------------------------------------------------------------
// Source lines
// ---------------------------------------------------------------------------

/// One line of the source with its byte offset. `raw` keeps the terminator.
#[derive(Debug, Clone, Copy)]
pub(crate) struct SourceLine<'a> {
    pub index: usize,
    pub start: usize,
    pub raw: &'a str,
}

impl<'a> SourceLine<'a> {
    /// The line without its `\n` / `\r\n` terminator.
    pub fn text(&self) -> &'a str {
        let t = self.raw.strip_suffix('\n').unwrap_or(self.raw);
        t.strip_suffix('\r').unwrap_or(t)
    }

    pub fn end(&self) -> usize {
        self.start + self.raw.len()
    }
}

pub(crate) fn source_lines(text: &str) -> Vec<SourceLine<'_>> {
    let mut start = 0;
    text.split_inclusive('\n')
        .enumerate()
        .map(|(index, raw)| {
            let line = SourceLine { index, start, raw };
            start += raw.len();
            line
        })
        .collect()
}

/// Parse a heading line into `(depth, title)`.
///
/// Leading whitespace is allowed; the `#` run must be followed by whitespace or
/// end the line. A closing `#` run separated by whitespace is dropped.
pub(crate) fn parse_heading(line: &str) -> Option<(usize, &str)> {
    let trimmed = line.trim_start();
    let level = trimmed.bytes().take_while(|&b| b == b'#').count();
    if level == 0 || level > 6 {
        return None;
    }
    let rest = &trimmed[level..];
    if !rest.is_empty() && !rest.starts_with(char::is_whitespace) {
        return None;
    }
    let mut title = rest.trim();
    let without_closing = title.trim_end_matches('#');
    if without_closing.len() != title.len()
        && (without_closing.is_empty() || without_closing.ends_with(char::is_whitespace))
    {
        title = without_closing.trim_end();
    }
    Some((level, title))
}

/// Tracks fenced code blocks so `# comment` lines inside them are not headings.
#[derive(Debug, Default)]
pub(crate) struct FenceTracker {
    open: Option<(char, usize)>,
}

impl FenceTracker {
    /// Feed one line; returns true when the line is fence or fenced content.
    pub fn observe(&mut self, line: &str) -> bool {
        let trimmed = line.trim_start();
        let marker = trimmed.chars().next().filter(|c| *c == '`' || *c == '~');
        let run = marker.map(|m| trimmed.chars().take_while(|c| *c == m).count());

        match (self.open, marker, run) {
            (Some((open_char, open_len)), Some(m), Some(n))
                if m == open_char && n >= open_len && trimmed[n..].trim().is_empty() =>
            {
                self.open = None;
                true
            }
            (Some(_), _, _) => true,
            (None, Some(m), Some(n)) if n >= 3 => {
                self.open = Some((m, n));
                true
            }
            (None, _, _) => false,
        }
    }
}

// ---------------------------------------------------------------------------
// Section / Segmentation
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Section {
    pub level: usize,
    pub title: String,
    /// First owned line (0-based, the heading line).
    pub line_start: usize,
    /// Last owned line (0-based, inclusive).
    pub line_end: usize,
    /// Exact source text of the owned lines, terminators included.
    pub content: String,
}

impl Section {
    pub fn line_count(&self) -> usize {
        self.line_end + 1 - self.line_start
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Segmentation {
    /// Text before the first heading (the whole document when it has none).
    pub preamble: String,
    pub sections: Vec<Section>,
}

impl Segmentation {
    /// Concatenate the preamble and every section back into the source text.
    pub fn reconstruct(&self) -> String {
        let mut out = self.preamble.clone();
        for s in &self.sections {
            out.push_str(&s.content);
        }
        out
    }
}

/// Split `text` into heading-delimited sections.
pub fn segment(text: &str) -> Segmentation {
    let lines = source_lines(text);
    let mut fences = FenceTracker::default();
    let mut headings: Vec<(usize, usize, String)> = Vec::new();

    for line in &lines {
        if fences.observe(line.text()) {
            continue;
        }
        if let Some((level, title)) = parse_heading(line.text()) {
            headings.push((line.index, level, title.to_string()));
        }
    }

    let Some(first) = headings.first() else {
        return Segmentation {
            preamble: text.to_string(),
            sections: Vec::new(),
        };
    };
    let preamble = text[..lines[first.0].start].to_string();

    let sections = headings
        .iter()
        .enumerate()
        .map(|(i, (line_start, level, title))| {
            let line_end = headings
                .get(i + 1)
                .map(|next| next.0 - 1)
                .unwrap_or(lines.len() - 1);
            Section {
                level: *level,
                title: title.clone(),
                line_start: *line_start,
                line_end,
                content: text[lines[*line_start].start..lines[line_end].end()].to_string(),
            }
        })
        .collect();

    Segmentation { preamble, sections }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
