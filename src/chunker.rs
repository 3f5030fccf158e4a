use std::sync::LazyLock;

use log::debug;
use regex::Regex;

use crate::char_len;

const PARAGRAPH_SEP: &str = "\n\n";
const SPACE_SEP: &str = " ";

static SENTENCE_END: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[.!?]\s+").expect("valid regex"));

/// Split `text` into chunks of at most `max_size` characters.
///
/// A single word longer than `max_size` is returned as its own oversized chunk.
pub fn split(text: &str, max_size: usize) -> Vec<String> {
    if char_len(text) <= max_size {
        return vec![text.to_string()];
    }

    let mut chunks = Vec::new();
    let mut packer = Packer::new(PARAGRAPH_SEP, max_size);
    for paragraph in text.split(PARAGRAPH_SEP).map(str::trim).filter(|p| !p.is_empty()) {
        if char_len(paragraph) > max_size {
            chunks.extend(packer.take());
            chunks.extend(split_sentences(paragraph, max_size));
        } else {
            chunks.extend(packer.push(paragraph));
        }
    }
    chunks.extend(packer.take());

    if !chunks.is_empty() {
        debug!(
            "Split {} chars into {} chunks (max {max_size}, average {})",
            char_len(text),
            chunks.len(),
            chunks.iter().map(|c| char_len(c)).sum::<usize>() / chunks.len()
        );
    }
    chunks
}

fn split_sentences(paragraph: &str, max_size: usize) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut packer = Packer::new(SPACE_SEP, max_size);
    for sentence in sentences(paragraph) {
        if char_len(sentence) > max_size {
            chunks.extend(packer.take());
            chunks.extend(split_words(sentence, max_size));
        } else {
            chunks.extend(packer.push(sentence));
        }
    }
    chunks.extend(packer.take());
    chunks
}

fn split_words(sentence: &str, max_size: usize) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut packer = Packer::new(SPACE_SEP, max_size);
    for word in sentence.split_whitespace() {
        // an oversized word lands in a chunk of its own
        chunks.extend(packer.push(word));
    }
    chunks.extend(packer.take());
    chunks
}

/// Sentences end at `.`, `!` or `?` followed by whitespace; the punctuation
/// stays with the sentence and the whitespace is dropped.
fn sentences(text: &str) -> Vec<&str> {
    let mut out = Vec::new();
    let mut last = 0;
    for m in SENTENCE_END.find_iter(text) {
        let end = m.start() + 1;
        let sentence = text[last..end].trim();
        if !sentence.is_empty() {
            out.push(sentence);
        }
        last = m.end();
    }
    let tail = text[last..].trim();
    if !tail.is_empty() {
        out.push(tail);
    }
    out
}

/// Greedy packing of pieces joined by `sep`
struct Packer {
    sep: &'static str,
    max_size: usize,
    current: String,
    current_len: usize,
}

impl Packer {
    fn new(sep: &'static str, max_size: usize) -> Self {
        Self {
            sep,
            max_size,
            current: String::new(),
            current_len: 0,
        }
    }

    /// Add a piece; returns the finished chunk when the piece did not fit
    fn push(&mut self, piece: &str) -> Option<String> {
        let piece_len = char_len(piece);
        let sep_len = char_len(self.sep);

        if self.current.is_empty() {
            self.current.push_str(piece);
            self.current_len = piece_len;
            return None;
        }

        if self.current_len + sep_len + piece_len > self.max_size {
            let done = self.take();
            self.current.push_str(piece);
            self.current_len = piece_len;
            return done;
        }

        self.current.push_str(self.sep);
        self.current.push_str(piece);
        self.current_len += sep_len + piece_len;
        None
    }

    fn take(&mut self) -> Option<String> {
        if self.current.is_empty() {
            return None;
        }
        self.current_len = 0;
        Some(std::mem::take(&mut self.current))
    }
}
