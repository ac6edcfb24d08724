//! Byte-preserving HTML tag processor.
//!
//! The document is scanned lexically once. Visitors then edit attributes of
//! the tag they are looking at, and [`Document::render`] splices those edits
//! plus any inserted markup back into the untouched source.

pub mod tag;
mod tokenizer;

use std::ops::Range;
use thiserror::Error;

pub use tag::{Attribute, Tag, TagMut};
use tag::TagEdits;

#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
pub enum ParseError {
    #[error("unterminated tag at byte {0}")]
    UnterminatedTag(usize),

    #[error("unterminated comment at byte {0}")]
    UnterminatedComment(usize),

    #[error("unterminated raw text element starting at byte {0}")]
    UnterminatedRawText(usize),
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RenderError {
    #[error("overlapping edits at byte {0}")]
    OverlappingEdits(usize),

    #[error("insertion offset {0} is outside the document")]
    OffsetOutOfBounds(usize),
}

/// A scanned document plus the edits made to it so far.
pub struct Document<'a> {
    html: &'a str,
    tags: Vec<Tag>,
    edits: Vec<TagEdits>,
    insertions: Vec<(usize, String)>,
    head_end: Option<usize>,
    body_end: Option<usize>,
}

impl<'a> Document<'a> {
    pub fn parse(html: &'a str) -> Result<Self, ParseError> {
        let scan = tokenizer::scan(html)?;
        let edits = vec![TagEdits::default(); scan.tags.len()];
        Ok(Self {
            html,
            tags: scan.tags,
            edits,
            insertions: Vec::new(),
            head_end: scan.head_end,
            body_end: scan.body_end,
        })
    }

    /// Start tags in document order.
    pub fn tags(&self) -> &[Tag] {
        &self.tags
    }

    pub fn tag_mut(&mut self, index: usize) -> Option<TagMut<'_>> {
        let tag = self.tags.get(index)?;
        let edits = self.edits.get_mut(index)?;
        Some(TagMut::new(tag, edits))
    }

    /// Offset of the first `</head>`.
    pub fn head_end(&self) -> Option<usize> {
        self.head_end
    }

    /// Offset of the last `</body>`.
    pub fn body_end(&self) -> Option<usize> {
        self.body_end
    }

    pub fn has_element(&self, name: &str) -> bool {
        self.tags.iter().any(|t| t.name.eq_ignore_ascii_case(name))
    }

    /// Queues `markup` to be written at byte `offset` of the source.
    pub fn insert_html(&mut self, offset: usize, markup: impl Into<String>) {
        self.insertions.push((offset, markup.into()));
    }

    pub fn is_modified(&self) -> bool {
        !self.insertions.is_empty() || self.edits.iter().any(|e| !e.is_empty())
    }

    pub fn render(&self) -> Result<String, RenderError> {
        let mut replacements: Vec<(Range<usize>, &str)> = Vec::new();
        let tag_replacements: Vec<(Range<usize>, String)> = self
            .tags
            .iter()
            .zip(&self.edits)
            .filter(|(_, edits)| !edits.is_empty())
            .flat_map(|(tag, edits)| edits.replacements(tag))
            .collect();
        replacements.extend(tag_replacements.iter().map(|(r, s)| (r.clone(), s.as_str())));

        for (offset, markup) in &self.insertions {
            if *offset > self.html.len() || !self.html.is_char_boundary(*offset) {
                return Err(RenderError::OffsetOutOfBounds(*offset));
            }
            replacements.push((*offset..*offset, markup.as_str()));
        }

        // Stable sort keeps insertion order for edits at the same offset.
        replacements.sort_by_key(|(range, _)| (range.start, range.end));

        let mut out = String::with_capacity(self.html.len() + 256);
        let mut cursor = 0;
        for (range, text) in replacements {
            if range.start < cursor {
                return Err(RenderError::OverlappingEdits(range.start));
            }
            out.push_str(&self.html[cursor..range.start]);
            out.push_str(text);
            cursor = range.end;
        }
        out.push_str(&self.html[cursor..]);
        Ok(out)
    }
}
