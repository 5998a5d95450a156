//! Sentence extraction: markdown in, navigable sentence records out.

mod boundary;
mod strip;

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

pub use boundary::estimate_duration;

/// Byte offsets into the original markdown locating a sentence for
/// highlighting. May conservatively cover a wider region where the
/// position map is coarse.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SourceSpan {
    pub start: usize,
    pub end: usize,
}

/// One navigable playback unit.
#[derive(Debug, Clone)]
pub struct Sentence {
    /// Stable index within the document; dense 0..N.
    pub index: usize,
    /// Stripped plain text, ready for the synthesizer.
    pub text: String,
    /// Where this sentence lives in the original markdown.
    pub source_span: SourceSpan,
    /// Advisory spoken-duration estimate.
    pub estimated_duration: Duration,
}

/// Opaque document identity; monotonically assigned per parse.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DocumentId(u64);

static NEXT_DOCUMENT_ID: AtomicU64 = AtomicU64::new(1);

impl DocumentId {
    fn next() -> Self {
        Self(NEXT_DOCUMENT_ID.fetch_add(1, Ordering::Relaxed))
    }
}

/// A parsed document: the original markdown plus its ordered sentences.
/// Immutable after parsing.
#[derive(Debug)]
pub struct Document {
    pub id: DocumentId,
    pub markdown: String,
    sentences: Vec<Sentence>,
}

impl Document {
    pub fn sentences(&self) -> &[Sentence] {
        &self.sentences
    }

    pub fn sentence(&self, index: usize) -> Option<&Sentence> {
        self.sentences.get(index)
    }

    pub fn len(&self) -> usize {
        self.sentences.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sentences.is_empty()
    }
}

/// Abbreviations whose trailing period never ends a sentence: titles,
/// units, initialisms. Multi-dot entries are matched without their final
/// period ("e.g." is listed as "e.g").
pub fn default_abbreviations() -> HashSet<String> {
    [
        // Titles
        "mr", "mrs", "ms", "dr", "prof", "rev", "hon", "sr", "jr", "st",
        // Units
        "ft", "yd", "mi", "oz", "lb", "kg", "km", "cm", "mm", "hr", "sec",
        // Initialisms
        "e.g", "i.e", "etc", "vs", "cf", "al", "inc", "ltd", "co", "corp", "dept", "est", "fig",
        "no", "vol", "pp", "ed", "approx",
    ]
    .into_iter()
    .map(str::to_owned)
    .collect()
}

/// Markdown-to-sentence extractor. Pure; performs no I/O.
#[derive(Debug, Clone)]
pub struct Extractor {
    abbreviations: HashSet<String>,
}

impl Default for Extractor {
    fn default() -> Self {
        Self {
            abbreviations: default_abbreviations(),
        }
    }
}

impl Extractor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the abbreviation list.
    pub fn with_abbreviations(mut self, abbreviations: HashSet<String>) -> Self {
        self.abbreviations = abbreviations;
        self
    }

    /// Parse markdown into a document. Empty or whitespace-only input
    /// produces a document with no sentences.
    pub fn parse(&self, markdown: &str) -> Document {
        let stripped = strip::strip_markdown(markdown);
        let ranges = boundary::split_sentences(&stripped.text, &self.abbreviations);

        let sentences = ranges
            .into_iter()
            .enumerate()
            .map(|(index, range)| {
                let text = stripped.text[range.clone()].to_owned();
                let source = stripped.source_span(range);
                Sentence {
                    index,
                    estimated_duration: estimate_duration(&text),
                    source_span: SourceSpan {
                        start: source.start,
                        end: source.end,
                    },
                    text,
                }
            })
            .collect();

        Document {
            id: DocumentId::next(),
            markdown: markdown.to_owned(),
            sentences,
        }
    }
}
