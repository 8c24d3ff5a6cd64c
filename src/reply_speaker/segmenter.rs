//! Text segmentation for streamed replies.
//!
//! Two stages, both incremental:
//! 1. [`MarkupFilter`] drops stage directions (`(..)`, `（..）`, `[..]`, `{..}`,
//!    `【..】`) unless they sit inside a closed double-quoted span, and
//!    collapses whitespace runs to one space.
//! 2. [`Segmenter`] cuts the filtered text into sentences ending in one of
//!    `。！？.!?` and numbers them.
//!
//! Segment text keeps its leading space (`" World?"`); callers trim before
//! synthesis via [`Segment::speakable_text`].

use std::mem;

const TERMINATORS: &[char] = &['。', '！', '？', '.', '!', '?'];

/// Closing marks that stay attached to the sentence they follow.
const CLOSERS: &[char] = &['"', '”', '’', '」', '』', ')', '）'];

fn bracket_close(ch: char) -> Option<char> {
    match ch {
        '(' => Some(')'),
        '（' => Some('）'),
        '[' => Some(']'),
        '{' => Some('}'),
        '【' => Some('】'),
        _ => None,
    }
}

fn quote_close(ch: char) -> Option<char> {
    match ch {
        '"' => Some('"'),
        '“' => Some('”'),
        _ => None,
    }
}

#[derive(Debug, Default)]
enum FilterState {
    #[default]
    Text,
    Quoted {
        close: char,
    },
    /// Inside a quote after a bracket opened; `held` waits for the closing quote.
    QuotedHeld {
        close: char,
        held: String,
    },
    /// Inside a stage direction; `held` is released only if it never closes.
    Bracketed {
        close: char,
        held: String,
    },
}

/// Streaming stage-direction filter.
///
/// A bracket opened in one fragment and closed in a later one is still
/// stripped. Brackets inside a quote are held until the quote closes; if it
/// never does they are stripped like any other. A bracket still open when
/// the stream finishes is kept as text.
#[derive(Debug, Default)]
pub struct MarkupFilter {
    state: FilterState,
    emitted_any: bool,
    pending_space: bool,
}

impl MarkupFilter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Filter the next fragment, returning whatever is speakable so far.
    pub fn push(&mut self, fragment: &str) -> String {
        let mut out = String::with_capacity(fragment.len());
        for ch in fragment.chars() {
            self.push_char(ch, &mut out);
        }
        out
    }

    /// Flush held text at end of stream and reset for reuse.
    pub fn finish(&mut self) -> String {
        let mut out = String::new();
        loop {
            match mem::take(&mut self.state) {
                // Unclosed quote: refilter what it held without protection.
                FilterState::QuotedHeld { held, .. } => {
                    for ch in held.chars() {
                        self.push_char(ch, &mut out);
                    }
                }
                FilterState::Bracketed { held, .. } => {
                    for ch in held.chars() {
                        self.emit(ch, &mut out);
                    }
                    break;
                }
                FilterState::Text | FilterState::Quoted { .. } => break,
            }
        }
        self.emitted_any = false;
        self.pending_space = false;
        out
    }

    fn push_char(&mut self, ch: char, out: &mut String) {
        match &mut self.state {
            FilterState::Bracketed { close, held } => {
                if ch == *close {
                    self.state = FilterState::Text;
                } else {
                    held.push(ch);
                }
            }
            FilterState::Quoted { close } => {
                let close = *close;
                if bracket_close(ch).is_some() {
                    self.state = FilterState::QuotedHeld {
                        close,
                        held: ch.to_string(),
                    };
                    return;
                }
                self.emit(ch, out);
                if ch == close {
                    self.state = FilterState::Text;
                }
            }
            FilterState::QuotedHeld { close, held } => {
                if ch != *close {
                    held.push(ch);
                    return;
                }
                let held = mem::take(held);
                for held_ch in held.chars() {
                    self.emit(held_ch, out);
                }
                self.emit(ch, out);
                self.state = FilterState::Text;
            }
            FilterState::Text => {
                if let Some(close) = quote_close(ch) {
                    self.emit(ch, out);
                    self.state = FilterState::Quoted { close };
                } else if let Some(close) = bracket_close(ch) {
                    self.state = FilterState::Bracketed {
                        close,
                        held: ch.to_string(),
                    };
                } else {
                    self.emit(ch, out);
                }
            }
        }
    }

    fn emit(&mut self, ch: char, out: &mut String) {
        if ch.is_whitespace() {
            // Leading whitespace is dropped, inner runs collapse to one space.
            if self.emitted_any {
                self.pending_space = true;
            }
            return;
        }
        if self.pending_space {
            // No space before a terminator left behind by a stripped bracket.
            if !TERMINATORS.contains(&ch) {
                out.push(' ');
            }
            self.pending_space = false;
        }
        out.push(ch);
        self.emitted_any = true;
    }
}

/// Strip stage directions from a complete piece of text.
pub fn filter_stage_directions(text: &str) -> String {
    let mut filter = MarkupFilter::new();
    let mut out = filter.push(text);
    out.push_str(&filter.finish());
    out
}

/// One sentence of speakable text, numbered in arrival order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    pub sequence: u64,
    pub text: String,
}

impl Segment {
    /// Text as sent to the synthesizer.
    pub fn speakable_text(&self) -> &str {
        self.text.trim()
    }
}

/// Incremental sentence cutter with a carry buffer for unterminated text.
#[derive(Debug, Default)]
pub struct Segmenter {
    filter: MarkupFilter,
    carry: String,
    /// Byte offset in `carry` where the next boundary scan resumes.
    scanned: usize,
    next_sequence: u64,
}

impl Segmenter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Filter a raw reply fragment and accumulate the result.
    pub fn push(&mut self, raw: &str) -> Vec<Segment> {
        let speakable = self.filter.push(raw);
        self.accumulate(&speakable)
    }

    /// Append already-filtered text and cut every complete sentence.
    ///
    /// A sentence is complete once its terminator run (plus any closing
    /// quotes) is followed by another character, so `?!` stays together.
    pub fn accumulate(&mut self, speakable: &str) -> Vec<Segment> {
        if speakable.is_empty() {
            return Vec::new();
        }
        self.carry.push_str(speakable);

        let mut segments = Vec::new();
        loop {
            match sentence_end(&self.carry, self.scanned) {
                Ok(end) => {
                    let rest = self.carry.split_off(end);
                    let sentence = mem::replace(&mut self.carry, rest);
                    self.scanned = 0;
                    if let Some(segment) = self.make_segment(sentence) {
                        segments.push(segment);
                    }
                }
                Err(resume) => {
                    self.scanned = resume;
                    break;
                }
            }
        }
        segments
    }

    /// Emit whatever remains as one final segment, terminated or not.
    pub fn finalize(&mut self) -> Option<Segment> {
        let tail = self.filter.finish();
        self.carry.push_str(&tail);
        let text = mem::take(&mut self.carry);
        self.scanned = 0;
        self.make_segment(text)
    }

    /// Unterminated text waiting for a sentence boundary.
    pub fn carry(&self) -> &str {
        &self.carry
    }

    /// Sequence number the next segment will receive.
    pub fn next_sequence(&self) -> u64 {
        self.next_sequence
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }

    fn make_segment(&mut self, text: String) -> Option<Segment> {
        if !is_speakable(&text) {
            return None;
        }
        let segment = Segment {
            sequence: self.next_sequence,
            text,
        };
        self.next_sequence += 1;
        Some(segment)
    }
}

fn is_speakable(text: &str) -> bool {
    text.chars()
        .any(|c| !c.is_whitespace() && !TERMINATORS.contains(&c) && !CLOSERS.contains(&c))
}

/// Byte offset just past the first complete sentence in `text`, scanning
/// from `from`. On failure returns the offset a later scan can resume at.
fn sentence_end(text: &str, from: usize) -> Result<usize, usize> {
    let mut prev = text[..from].chars().next_back();
    let mut chars = text[from..]
        .char_indices()
        .map(|(i, c)| (from + i, c))
        .peekable();

    while let Some((offset, ch)) = chars.next() {
        let next = chars.peek().map(|&(_, c)| c);
        if !is_terminator(prev, ch, next) {
            prev = Some(ch);
            continue;
        }
        while chars
            .next_if(|&(_, c)| TERMINATORS.contains(&c) || CLOSERS.contains(&c))
            .is_some()
        {}
        // A run reaching the end of the buffer may still grow.
        return chars.peek().map(|&(end, _)| end).ok_or(offset);
    }
    Err(text.len())
}

fn is_terminator(prev: Option<char>, ch: char, next: Option<char>) -> bool {
    if !TERMINATORS.contains(&ch) {
        return false;
    }
    // `3.14` is a decimal; `3.` at the end of the buffer is still undecided.
    if ch == '.' && prev.is_some_and(|p| p.is_ascii_digit()) {
        if let Some(next) = next {
            return !next.is_ascii_digit();
        }
    }
    true
}
