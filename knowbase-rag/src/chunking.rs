//! Document chunking strategies.
//!
//! This module provides the [`Chunker`] trait and two implementations:
//!
//! - [`FixedSizeChunker`]: overlapping windows of a fixed number of characters
//! - [`WordChunker`]: whitespace-separated words packed up to a maximum length

use crate::error::{RagError, Result};

/// A strategy for splitting document text into passages.
pub trait Chunker: Send + Sync {
    /// Split `text` into ordered chunk texts.
    ///
    /// Returns an empty `Vec` if the text is empty.
    fn chunk(&self, text: &str) -> Vec<String>;
}

/// Splits text into overlapping windows of `chunk_size` characters.
///
/// Consecutive windows start `chunk_size - chunk_overlap` characters apart.
/// The last window may be shorter than `chunk_size`. Sizes and offsets are
/// counted in `char`s, so a window never splits a UTF-8 sequence.
///
/// # Example
///
/// ```rust,ignore
/// use knowbase_rag::FixedSizeChunker;
///
/// let chunker = FixedSizeChunker::new(500, 50)?;
/// for window in chunker.windows(&text) {
///     println!("{} @ {}", window.ordinal, window.start);
/// }
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FixedSizeChunker {
    chunk_size: usize,
    chunk_overlap: usize,
}

impl FixedSizeChunker {
    /// Create a new `FixedSizeChunker`.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::ConfigError`] unless `chunk_size > chunk_overlap`.
    pub fn new(chunk_size: usize, chunk_overlap: usize) -> Result<Self> {
        if chunk_overlap >= chunk_size {
            return Err(RagError::ConfigError(format!(
                "chunk_overlap ({chunk_overlap}) must be less than chunk_size ({chunk_size})"
            )));
        }
        Ok(Self { chunk_size, chunk_overlap })
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    pub fn chunk_overlap(&self) -> usize {
        self.chunk_overlap
    }

    /// Lazily iterate over the windows of `text`.
    ///
    /// The iterator is cheap to clone, and cloning it before the first call
    /// to `next` restarts the sequence.
    pub fn windows<'a>(&self, text: &'a str) -> Windows<'a> {
        Windows {
            text,
            chunk_size: self.chunk_size,
            step: self.chunk_size - self.chunk_overlap,
            byte_pos: 0,
            char_pos: 0,
            ordinal: 0,
            exhausted: text.is_empty(),
        }
    }
}

impl Chunker for FixedSizeChunker {
    fn chunk(&self, text: &str) -> Vec<String> {
        self.windows(text).map(|w| w.text.to_string()).collect()
    }
}

/// One window produced by [`FixedSizeChunker::windows`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TextWindow<'a> {
    /// Position of the window in the sequence, starting at 0.
    pub ordinal: usize,
    /// Character offset of the window within the source text.
    pub start: usize,
    /// The window's text.
    pub text: &'a str,
}

/// Iterator over fixed-size overlapping windows of a string.
#[derive(Debug, Clone)]
pub struct Windows<'a> {
    text: &'a str,
    chunk_size: usize,
    step: usize,
    byte_pos: usize,
    char_pos: usize,
    ordinal: usize,
    exhausted: bool,
}

/// Byte offset of the `n`th char after `from`, or the end of `text`.
fn advance(text: &str, from: usize, n: usize) -> usize {
    text[from..].char_indices().nth(n).map_or(text.len(), |(i, _)| from + i)
}

impl<'a> Iterator for Windows<'a> {
    type Item = TextWindow<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.exhausted {
            return None;
        }

        let start = self.byte_pos;
        let end = advance(self.text, start, self.chunk_size);
        let window = TextWindow { ordinal: self.ordinal, start: self.char_pos, text: &self.text[start..end] };

        if end == self.text.len() {
            // Any further window would lie inside this one.
            self.exhausted = true;
        } else {
            self.byte_pos = advance(self.text, start, self.step);
            self.char_pos += self.step;
            self.ordinal += 1;
        }

        Some(window)
    }
}

/// Packs whitespace-separated words into chunks of at most `max_length`
/// characters, joined by single spaces.
///
/// A single word longer than `max_length` becomes a chunk of its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WordChunker {
    max_length: usize,
}

impl WordChunker {
    /// Create a new `WordChunker`.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::ConfigError`] if `max_length` is zero.
    pub fn new(max_length: usize) -> Result<Self> {
        if max_length == 0 {
            return Err(RagError::ConfigError("max_length must be greater than zero".to_string()));
        }
        Ok(Self { max_length })
    }
}

impl Chunker for WordChunker {
    fn chunk(&self, text: &str) -> Vec<String> {
        let mut chunks = Vec::new();
        let mut current = String::new();
        let mut current_len = 0;

        for word in text.split_whitespace() {
            let word_len = word.chars().count();
            if !current.is_empty() && current_len + 1 + word_len > self.max_length {
                chunks.push(std::mem::take(&mut current));
                current_len = 0;
            }
            if !current.is_empty() {
                current.push(' ');
                current_len += 1;
            }
            current.push_str(word);
            current_len += word_len;
        }

        if !current.is_empty() {
            chunks.push(current);
        }

        chunks
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn starts(chunker: &FixedSizeChunker, text: &str) -> Vec<usize> {
        chunker.windows(text).map(|w| w.start).collect()
    }

    #[test]
    fn twelve_hundred_chars_yield_three_windows() {
        let text = "a".repeat(1200);
        let chunker = FixedSizeChunker::new(500, 50).unwrap();
        assert_eq!(starts(&chunker, &text), vec![0, 450, 900]);

        let windows: Vec<_> = chunker.windows(&text).collect();
        assert_eq!(windows[0].text.len(), 500);
        assert_eq!(windows[1].text.len(), 500);
        assert_eq!(windows[2].text.len(), 300);
        assert_eq!(windows.iter().map(|w| w.ordinal).collect::<Vec<_>>(), vec![0, 1, 2]);
    }

    #[test]
    fn empty_text_yields_nothing() {
        let chunker = FixedSizeChunker::new(500, 50).unwrap();
        assert_eq!(chunker.windows("").count(), 0);
        assert!(chunker.chunk("").is_empty());
    }

    #[test]
    fn short_text_is_a_single_window() {
        let chunker = FixedSizeChunker::new(10, 3).unwrap();
        assert_eq!(chunker.chunk("hello"), vec!["hello".to_string()]);
    }

    #[test]
    fn no_window_is_contained_in_its_predecessor() {
        let chunker = FixedSizeChunker::new(10, 5).unwrap();
        let text = "0123456789abcde";
        assert_eq!(chunker.chunk(text), vec!["0123456789".to_string(), "56789abcde".to_string()]);
    }

    #[test]
    fn overlap_must_be_smaller_than_size() {
        assert!(matches!(FixedSizeChunker::new(10, 10), Err(RagError::ConfigError(_))));
        assert!(matches!(FixedSizeChunker::new(0, 0), Err(RagError::ConfigError(_))));
        assert!(FixedSizeChunker::new(1, 0).is_ok());
    }

    #[test]
    fn windows_respect_char_boundaries() {
        let chunker = FixedSizeChunker::new(3, 1).unwrap();
        let chunks = chunker.chunk("héllo wörld");
        assert_eq!(chunks[0], "hél");
        assert_eq!(chunks[1], "llo");
        assert!(chunks.iter().all(|c| c.chars().count() <= 3));
    }

    #[test]
    fn cloned_iterator_restarts() {
        let chunker = FixedSizeChunker::new(4, 1).unwrap();
        let windows = chunker.windows("abcdefghij");
        let first: Vec<_> = windows.clone().collect();
        let second: Vec<_> = windows.collect();
        assert_eq!(first, second);
    }

    #[test]
    fn word_chunker_packs_words() {
        let chunker = WordChunker::new(11).unwrap();
        let chunks = chunker.chunk("alpha beta gamma delta\n\nepsilon");
        assert_eq!(chunks, vec!["alpha beta", "gamma delta", "epsilon"]);
    }

    #[test]
    fn word_chunker_keeps_long_words_whole() {
        let chunker = WordChunker::new(4).unwrap();
        assert_eq!(chunker.chunk("extraordinary no"), vec!["extraordinary", "no"]);
        assert!(chunker.chunk("   ").is_empty());
    }
}
