
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::scanner::Document;

/// Separators tried from coarsest to finest when splitting a document.
const SEPARATORS: [&str; 3] = ["\n\n", "\n", " "];

/// Bounded text segment derived from a document, the unit that gets
/// embedded and indexed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    pub content: String,
    pub source_path: String,
    pub sequence_index: usize,
}

/// Configuration for document chunking. Sizes are in characters.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ChunkingConfig {
    pub chunk_size: usize,
    pub chunk_overlap: usize,
}

impl Default for ChunkingConfig {
    #[inline]
    fn default() -> Self {
        Self {
            chunk_size: 8000,
            chunk_overlap: 100,
        }
    }
}

/// Splits documents into overlapping chunks along semantic boundaries.
///
/// Text is first broken at paragraph boundaries; any piece still larger than
/// `chunk_size` is re-split at line boundaries, then at spaces. The resulting
/// pieces are packed into windows of at most `chunk_size` characters, and
/// every window after the first starts with the trailing `chunk_overlap`
/// characters of the previous window.
#[derive(Debug, Clone)]
pub struct TextSplitter {
    chunk_size: usize,
    chunk_overlap: usize,
}

impl TextSplitter {
    #[inline]
    pub fn new(config: &ChunkingConfig) -> Self {
        Self {
            chunk_size: config.chunk_size.max(1),
            chunk_overlap: config.chunk_overlap,
        }
    }

    /// Split a document into ordered chunks. Empty and whitespace-only
    /// documents yield no chunks.
    #[inline]
    pub fn split_document(&self, document: &Document) -> Vec<Chunk> {
        if document.content.trim().is_empty() {
            return Vec::new();
        }

        let pieces = self.split_text(&document.content, &SEPARATORS, &document.source_path);
        let windows = self.merge_pieces(pieces);

        debug!(
            "Split {} into {} chunks (size {}, overlap {})",
            document.source_path,
            windows.len(),
            self.chunk_size,
            self.chunk_overlap
        );

        windows
            .into_iter()
            .enumerate()
            .map(|(sequence_index, content)| Chunk {
                content,
                source_path: document.source_path.clone(),
                sequence_index,
            })
            .collect()
    }

    /// Break text into pieces no larger than `chunk_size`, trying the given
    /// separators from coarsest to finest. Each piece keeps its trailing
    /// separator so that windows can be rebuilt by plain concatenation.
    fn split_text(&self, text: &str, separators: &[&str], source_path: &str) -> Vec<String> {
        if char_len(text) <= self.chunk_size {
            return vec![text.to_string()];
        }

        let Some((separator, finer)) = separators.split_first() else {
            // An indivisible run with no separators at all is cut at the
            // chunk limit and the remainder dropped. This lossy behavior is
            // kept for compatibility with the original splitter.
            warn!(
                "Truncating an unbreakable {}-character run in {} to {} characters",
                char_len(text),
                source_path,
                self.chunk_size
            );
            return vec![take_chars(text, self.chunk_size)];
        };

        if !text.contains(separator) {
            return self.split_text(text, finer, source_path);
        }

        let mut pieces = Vec::new();
        for piece in split_keeping_separator(text, separator) {
            if char_len(piece) <= self.chunk_size {
                pieces.push(piece.to_string());
            } else {
                pieces.extend(self.split_text(piece, finer, source_path));
            }
        }
        pieces
    }

    /// Pack pieces into windows of at most `chunk_size` characters, seeding
    /// each window after the first with the previous window's tail.
    fn merge_pieces(&self, pieces: Vec<String>) -> Vec<String> {
        let mut windows: Vec<String> = Vec::new();
        let mut window = String::new();
        let mut window_len = 0usize;

        for piece in pieces {
            let piece_len = char_len(&piece);
            if window_len > 0 && window_len + piece_len > self.chunk_size {
                windows.push(window);
                let seed = tail_chars(
                    windows.last().map_or("", String::as_str),
                    self.chunk_overlap,
                );
                // A seed that would push the next piece over the limit is
                // dropped, giving up overlap rather than the size bound.
                if char_len(&seed) + piece_len > self.chunk_size {
                    window = String::new();
                } else {
                    window = seed;
                }
                window_len = char_len(&window);
            }

            window.push_str(&piece);
            window_len += piece_len;
        }

        if !window.is_empty() {
            windows.push(window);
        }
        windows
    }
}

fn char_len(text: &str) -> usize {
    text.chars().count()
}

fn take_chars(text: &str, n: usize) -> String {
    text.chars().take(n).collect()
}

fn tail_chars(text: &str, n: usize) -> String {
    let len = char_len(text);
    text.chars().skip(len.saturating_sub(n)).collect()
}

/// Split on a separator, keeping the separator attached to the piece before
/// it. Concatenating the returned pieces reproduces the input exactly.
fn split_keeping_separator<'a>(text: &'a str, separator: &str) -> Vec<&'a str> {
    let mut pieces = Vec::new();
    let mut start = 0;
    for (at, matched) in text.match_indices(separator) {
        let end = at + matched.len();
        if let Some(piece) = text.get(start..end)
            && !piece.is_empty()
        {
            pieces.push(piece);
        }
        start = end;
    }
    if let Some(rest) = text.get(start..)
        && !rest.is_empty()
    {
        pieces.push(rest);
    }
    pieces
}
