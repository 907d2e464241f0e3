//! Splits a growing response into speakable chunks.
//!
//! A chunk is released when the latest token carries a terminator, or when
//! the chunk is past its length threshold and the token is pure whitespace.
//! Neither rule fires inside an open quotation. Instead, an open-quote chunk
//! is released at the first token boundary past the quote ceiling. The first
//! chunk of a turn uses a shorter threshold so audio starts sooner.

use crate::config::SegmenterConfig;

#[derive(Debug, Clone)]
pub struct Segmenter {
    first_chunk_chars: usize,
    chunk_chars: usize,
    quote_ceiling_chars: usize,
    terminators: Vec<char>,
    current: String,
    current_chars: usize,
    in_quote: bool,
    first_pending: bool,
}

impl Segmenter {
    pub fn new(config: &SegmenterConfig) -> Self {
        Self {
            first_chunk_chars: config.first_chunk_chars,
            chunk_chars: config.chunk_chars,
            quote_ceiling_chars: config.quote_ceiling_chars,
            terminators: config.terminators.chars().collect(),
            current: String::new(),
            current_chars: 0,
            in_quote: false,
            first_pending: true,
        }
    }

    /// Append a token; returns a chunk when one is ready.
    pub fn push(&mut self, token: &str) -> Option<String> {
        for ch in token.chars() {
            match ch {
                '"' => self.in_quote = !self.in_quote,
                '\u{201C}' => self.in_quote = true,
                '\u{201D}' => self.in_quote = false,
                _ => {}
            }
        }
        self.current.push_str(token);
        self.current_chars += token.chars().count();

        if self.in_quote {
            return if self.current_chars > self.quote_ceiling_chars {
                self.take()
            } else {
                None
            };
        }

        let threshold = if self.first_pending {
            self.first_chunk_chars
        } else {
            self.chunk_chars
        };
        let at_boundary = token.chars().any(|c| self.terminators.contains(&c));
        let long_at_space = self.current_chars > threshold
            && !token.is_empty()
            && token.chars().all(char::is_whitespace);

        if at_boundary || long_at_space {
            self.take()
        } else {
            None
        }
    }

    /// Release whatever is buffered, regardless of the rules.
    pub fn flush(&mut self) -> Option<String> {
        self.take()
    }

    /// Start a new turn.
    pub fn reset(&mut self) {
        self.current.clear();
        self.current_chars = 0;
        self.in_quote = false;
        self.first_pending = true;
    }

    pub fn pending_chars(&self) -> usize {
        self.current_chars
    }

    fn take(&mut self) -> Option<String> {
        let text = self.current.trim().to_string();
        self.current.clear();
        self.current_chars = 0;
        if text.is_empty() {
            return None;
        }
        self.first_pending = false;
        Some(text)
    }
}
