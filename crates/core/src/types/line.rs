//! Word and line types produced by the tokenizer

use bytes::Bytes;
use std::borrow::Cow;
use std::fmt;

/// Bytes that separate or terminate words on the wire
pub(crate) const SPACE: u8 = b' ';
pub(crate) const CR: u8 = b'\r';
pub(crate) const LF: u8 = b'\n';

/// A maximal run of bytes between space/CR/LF delimiters
///
/// Always non-empty and never contains a delimiter byte. Backed by `Bytes`
/// so cloning a word (e.g. when listeners keep it) does not copy.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Word(Bytes);

impl Word {
    /// Create a word, rejecting empty input or input containing delimiters
    pub fn new(bytes: impl Into<Bytes>) -> Option<Self> {
        let bytes = bytes.into();
        if bytes.is_empty() || bytes.iter().any(|b| matches!(*b, SPACE | CR | LF)) {
            return None;
        }
        Some(Self(bytes))
    }

    /// Wrap bytes already known to satisfy the word invariant
    pub(crate) fn from_tokenizer(bytes: Bytes) -> Self {
        debug_assert!(!bytes.is_empty());
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Word as text, replacing invalid UTF-8 sequences
    pub fn to_str_lossy(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.0)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Always false; present for API symmetry with `len`
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn into_bytes(self) -> Bytes {
        self.0
    }
}

impl AsRef<[u8]> for Word {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl PartialEq<str> for Word {
    fn eq(&self, other: &str) -> bool {
        self.0.as_ref() == other.as_bytes()
    }
}

impl PartialEq<&str> for Word {
    fn eq(&self, other: &&str) -> bool {
        self.0.as_ref() == other.as_bytes()
    }
}

impl fmt::Display for Word {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_str_lossy())
    }
}

/// Ordered words between two line terminators (or stream boundaries)
///
/// An empty line is valid: a bare CRLF on the wire yields one.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct Line {
    words: Vec<Word>,
}

impl Line {
    pub fn new(words: Vec<Word>) -> Self {
        Self { words }
    }

    pub fn words(&self) -> &[Word] {
        &self.words
    }

    pub fn len(&self) -> usize {
        self.words.len()
    }

    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Word> {
        self.words.get(index)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Word> {
        self.words.iter()
    }

    /// Words as owned strings, replacing invalid UTF-8 sequences
    pub fn to_strings(&self) -> Vec<String> {
        self.words.iter().map(|w| w.to_str_lossy().into_owned()).collect()
    }

    pub fn into_words(self) -> Vec<Word> {
        self.words
    }

    pub(crate) fn push(&mut self, word: Word) {
        self.words.push(word);
    }
}

impl From<Vec<Word>> for Line {
    fn from(words: Vec<Word>) -> Self {
        Self::new(words)
    }
}

impl<'a> IntoIterator for &'a Line {
    type Item = &'a Word;
    type IntoIter = std::slice::Iter<'a, Word>;

    fn into_iter(self) -> Self::IntoIter {
        self.words.iter()
    }
}

impl IntoIterator for Line {
    type Item = Word;
    type IntoIter = std::vec::IntoIter<Word>;

    fn into_iter(self) -> Self::IntoIter {
        self.words.into_iter()
    }
}

impl fmt::Display for Line {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, word) in self.words.iter().enumerate() {
            if i > 0 {
                f.write_str(" ")?;
            }
            write!(f, "{}", word)?;
        }
        Ok(())
    }
}
