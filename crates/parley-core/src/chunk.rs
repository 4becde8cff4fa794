//! Sentence-boundary text chunker.
//!
//! Splits knowledge text into [`Chunk`]s built from whole sentences. A
//! sentence ends at a `.` followed by whitespace.
//!
//! # Algorithm
//!
//! 1. Split the trimmed text into sentences.
//! 2. Append sentences to a running buffer (joined by a single space) while
//!    the buffer plus the next sentence stays under `min_size` bytes.
//! 3. When adding the next sentence would meet or exceed `min_size`, flush
//!    the buffer as a chunk and start a new buffer with that sentence.
//! 4. Flush whatever remains at the end.
//!
//! Sentences are never hard-split: a sentence longer than `target_size`
//! becomes one oversized chunk. Empty or whitespace-only text yields no
//! chunks.
//!
//! # Example
//!
//! ```rust
//! use parley_core::chunk::{split_text, ChunkingOptions};
//!
//! let chunks = split_text("Our refund window is 30 days. Ask us anything.", &ChunkingOptions::default());
//! assert_eq!(chunks.len(), 1);
//! assert_eq!(chunks[0].text, "Our refund window is 30 days. Ask us anything.");
//! ```

/// A bounded span of knowledge text prepared for embedding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    /// Position of the chunk within its source text, starting at 0.
    pub index: usize,
    pub text: String,
}

/// Chunk sizing, in bytes.
#[derive(Debug, Clone, Copy)]
pub struct ChunkingOptions {
    /// Nominal chunk size. Chunks above it are only produced by single
    /// oversized sentences.
    pub target_size: usize,
    /// Buffer size at which the running chunk is flushed.
    pub min_size: usize,
}

impl Default for ChunkingOptions {
    fn default() -> Self {
        Self {
            target_size: 256,
            min_size: 200,
        }
    }
}

/// Split text into sentence-aligned chunks.
///
/// Concatenating the returned chunks with single spaces reproduces the
/// input sentences in order.
pub fn split_text(text: &str, options: &ChunkingOptions) -> Vec<Chunk> {
    let mut chunks = Vec::new();
    let mut buffer = String::new();

    for sentence in split_sentences(text.trim()) {
        if buffer.len() + sentence.len() < options.min_size {
            if !buffer.is_empty() {
                buffer.push(' ');
            }
            buffer.push_str(sentence);
        } else {
            flush(&mut chunks, &mut buffer, options);
            buffer.push_str(sentence);
        }
    }
    flush(&mut chunks, &mut buffer, options);

    chunks
}

fn flush(chunks: &mut Vec<Chunk>, buffer: &mut String, options: &ChunkingOptions) {
    let text = buffer.trim();
    if !text.is_empty() {
        if text.len() > options.target_size {
            tracing::debug!(
                len = text.len(),
                target = options.target_size,
                "oversized sentence kept as a single chunk"
            );
        }
        chunks.push(Chunk {
            index: chunks.len(),
            text: text.to_string(),
        });
    }
    buffer.clear();
}

/// Split on `.` followed by whitespace. The period stays with its
/// sentence; the separating whitespace is dropped.
fn split_sentences(text: &str) -> Vec<&str> {
    let mut sentences = Vec::new();
    let mut start = 0;
    let mut chars = text.char_indices().peekable();

    while let Some((_, c)) = chars.next() {
        if c != '.' {
            continue;
        }
        let Some(&(end, next)) = chars.peek() else {
            break;
        };
        if !next.is_whitespace() {
            continue;
        }
        sentences.push(&text[start..end]);
        while let Some(&(_, w)) = chars.peek() {
            if !w.is_whitespace() {
                break;
            }
            chars.next();
        }
        start = chars.peek().map(|&(i, _)| i).unwrap_or(text.len());
    }

    if start < text.len() {
        sentences.push(&text[start..]);
    }

    sentences.retain(|s| !s.trim().is_empty());
    sentences
}
