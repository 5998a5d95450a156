//! Markdown stripping with a position map back to the source.

use pulldown_cmark::{Event, Options, Parser, Tag, TagEnd};
use std::ops::Range;

/// One contiguous run of stripped text and the source range it came from.
#[derive(Debug, Clone)]
struct Fragment {
    stripped: Range<usize>,
    source: Range<usize>,
}

/// Stripped plain text plus the byte-offset map to the original markdown.
#[derive(Debug, Default)]
pub struct Stripped {
    pub text: String,
    fragments: Vec<Fragment>,
    pending_space: bool,
}

impl Stripped {
    fn push_text(&mut self, t: &str, source: Range<usize>) {
        let start = self.text.len();
        for ch in t.chars() {
            if ch.is_whitespace() {
                self.pending_space = true;
                continue;
            }
            if self.pending_space && !self.text.is_empty() {
                self.text.push(' ');
            }
            self.pending_space = false;
            self.text.push(ch);
        }
        if self.text.len() > start {
            self.fragments.push(Fragment {
                stripped: start..self.text.len(),
                source,
            });
        }
    }

    fn push_separator(&mut self) {
        self.pending_space = true;
    }

    /// Map a stripped byte range to a source span.
    ///
    /// The span is the union of all source fragments overlapping the range,
    /// which is conservative where the map is coarse (a sentence spanning a
    /// removed code block covers the whole original region).
    pub fn source_span(&self, range: Range<usize>) -> Range<usize> {
        let mut span: Option<Range<usize>> = None;
        for frag in &self.fragments {
            if frag.stripped.start < range.end && range.start < frag.stripped.end {
                span = Some(match span {
                    Some(s) => s.start.min(frag.source.start)..s.end.max(frag.source.end),
                    None => frag.source.clone(),
                });
            }
        }
        span.unwrap_or(0..0)
    }
}

/// Strip markdown down to speakable prose.
///
/// Code blocks are removed entirely; inline code keeps its inner text;
/// links collapse to display text; emphasis, heading, list, and quote
/// markers disappear; HTML is dropped; whitespace collapses to single
/// spaces.
pub fn strip_markdown(markdown: &str) -> Stripped {
    let options =
        Options::ENABLE_TABLES | Options::ENABLE_STRIKETHROUGH | Options::ENABLE_TASKLISTS;
    let parser = Parser::new_ext(markdown, options);

    let mut out = Stripped::default();
    let mut code_block_depth = 0usize;

    for (event, range) in parser.into_offset_iter() {
        match event {
            Event::Start(Tag::CodeBlock(_)) => code_block_depth += 1,
            Event::End(TagEnd::CodeBlock) => {
                code_block_depth = code_block_depth.saturating_sub(1);
                out.push_separator();
            }
            Event::Text(t) if code_block_depth == 0 => out.push_text(&t, range),
            Event::Code(t) => out.push_text(&t, range),
            Event::SoftBreak | Event::HardBreak => out.push_separator(),
            Event::End(
                TagEnd::Paragraph
                | TagEnd::Heading(_)
                | TagEnd::Item
                | TagEnd::BlockQuote(_)
                | TagEnd::TableCell
                | TagEnd::TableRow
                | TagEnd::Table,
            ) => out.push_separator(),
            // HTML tags are removed; their text content does not survive.
            Event::Html(_) | Event::InlineHtml(_) => {}
            _ => {}
        }
    }

    out
}
