//! Incremental CRLF line tokenizer
//!
//! Turns an arbitrary sequence of byte chunks into [`Line`]s of space
//! separated [`Word`]s. The result depends only on the concatenated bytes,
//! never on where the transport happened to split them:
//!
//! - `' '` ends the current word; runs of spaces never yield empty words
//! - `'\r'` is dropped
//! - `'\n'` ends the current word and delivers the line, even if empty
//! - at end of stream, pending content is delivered once as a final line

use bytes::BytesMut;

use crate::types::{Line, Word, CR, LF, SPACE};

/// Initial capacity of the word buffer
const WORD_CAPACITY: usize = 64;

/// Stateful tokenizer for one stream
#[derive(Debug)]
pub struct LineTokenizer {
    word: BytesMut,
    line: Line,
}

impl Default for LineTokenizer {
    fn default() -> Self {
        Self::new()
    }
}

impl LineTokenizer {
    pub fn new() -> Self {
        Self {
            word: BytesMut::with_capacity(WORD_CAPACITY),
            line: Line::default(),
        }
    }

    /// Consume `chunk` and return every line it completed, in wire order
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<Line> {
        let mut completed = Vec::new();
        self.feed_with(chunk, |line| completed.push(line));
        completed
    }

    /// Consume `chunk`, handing each completed line to `on_line` as soon as
    /// its terminator is seen
    pub fn feed_with<F>(&mut self, chunk: &[u8], mut on_line: F)
    where
        F: FnMut(Line),
    {
        let mut start = 0;
        for (i, &byte) in chunk.iter().enumerate() {
            match byte {
                SPACE | CR | LF => {
                    self.word.extend_from_slice(&chunk[start..i]);
                    start = i + 1;
                    match byte {
                        SPACE => self.flush_word(),
                        LF => {
                            self.flush_word();
                            on_line(std::mem::take(&mut self.line));
                        }
                        _ => {}
                    }
                }
                _ => {}
            }
        }
        self.word.extend_from_slice(&chunk[start..]);
    }

    /// Signal end of stream
    ///
    /// Returns the unterminated trailing line if anything is pending, at most
    /// once; the tokenizer is empty afterwards.
    pub fn finish(&mut self) -> Option<Line> {
        if !self.has_pending() {
            return None;
        }
        self.flush_word();
        Some(std::mem::take(&mut self.line))
    }

    /// Whether bytes or words are buffered for an unterminated line
    pub fn has_pending(&self) -> bool {
        !self.word.is_empty() || !self.line.is_empty()
    }

    fn flush_word(&mut self) {
        if !self.word.is_empty() {
            let bytes = self.word.split().freeze();
            self.line.push(Word::from_tokenizer(bytes));
        }
    }
}
