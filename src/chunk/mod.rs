/// Splits long text into overlapping, bounded-size segments on natural
/// boundaries. Sizes are measured in characters, never bytes, so slicing
/// stays valid for multi-byte text.
#[derive(Debug, Clone, Copy)]
pub struct Chunker {
    chunk_size: usize,
    overlap: usize,
}

/// One segment of the source text. Chunks only live for the duration of a
/// single summarization run and are never persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk<'a> {
    pub index: usize,
    pub text: &'a str,
}

impl Chunk<'_> {
    pub fn char_len(&self) -> usize {
        self.text.chars().count()
    }

    pub fn word_count(&self) -> usize {
        self.text.split_whitespace().count()
    }
}

impl Chunker {
    /// The overlap is clamped to half the chunk size so every step is
    /// guaranteed to advance through the input.
    pub fn new(chunk_size: usize, overlap: usize) -> Self {
        let chunk_size = chunk_size.max(1);
        Self {
            chunk_size,
            overlap: overlap.min(chunk_size / 2),
        }
    }

    /// Returns a fresh pass over the input. The sequence is lazy,
    /// deterministic, and restartable: the same text and parameters always
    /// produce the same chunks.
    pub fn chunks<'a>(&self, text: &'a str) -> ChunkIter<'a> {
        ChunkIter {
            text,
            pos: 0,
            index: 0,
            done: text.is_empty(),
            chunk_size: self.chunk_size,
            overlap: self.overlap,
        }
    }

    pub fn count(&self, text: &str) -> usize {
        self.chunks(text).count()
    }
}

pub struct ChunkIter<'a> {
    text: &'a str,
    pos: usize,
    index: usize,
    done: bool,
    chunk_size: usize,
    overlap: usize,
}

impl<'a> Iterator for ChunkIter<'a> {
    type Item = Chunk<'a>;

    fn next(&mut self) -> Option<Chunk<'a>> {
        if self.done {
            return None;
        }

        let rest = &self.text[self.pos..];

        // Byte offset of the first character past the window, if any.
        let window_end = rest.char_indices().nth(self.chunk_size).map(|(i, _)| i);

        let Some(window_end) = window_end else {
            self.done = true;
            let chunk = Chunk {
                index: self.index,
                text: rest,
            };
            self.index += 1;
            return Some(chunk);
        };

        let window = &rest[..window_end];
        let cut = split_point(window, self.overlap);
        let chunk_text = &window[..cut];

        let cut_chars = chunk_text.chars().count();
        let advance_chars = cut_chars - self.overlap;
        let advance_bytes = chunk_text
            .char_indices()
            .nth(advance_chars)
            .map(|(i, _)| i)
            .unwrap_or(chunk_text.len());

        self.pos += advance_bytes;
        let chunk = Chunk {
            index: self.index,
            text: chunk_text,
        };
        self.index += 1;
        Some(chunk)
    }
}

/// Picks the byte offset to cut a full window at, preferring the softest
/// boundary that still advances past the overlap region: paragraph break,
/// then line break, then sentence-ending punctuation, then whitespace,
/// then a hard cut at the window edge.
fn split_point(window: &str, overlap: usize) -> usize {
    let candidates = [
        window.rfind("\n\n").map(|i| i + 2),
        window.rfind('\n').map(|i| i + 1),
        last_sentence_end(window),
        last_whitespace(window),
    ];

    for candidate in candidates.into_iter().flatten() {
        if window[..candidate].chars().count() > overlap {
            return candidate;
        }
    }

    window.len()
}

fn last_sentence_end(window: &str) -> Option<usize> {
    let mut best = None;
    let mut prev: Option<(usize, char)> = None;
    for (i, c) in window.char_indices() {
        if let Some((pi, pc)) = prev {
            if matches!(pc, '.' | '!' | '?') && c.is_whitespace() {
                best = Some(pi + pc.len_utf8());
            }
        }
        prev = Some((i, c));
    }
    best
}

fn last_whitespace(window: &str) -> Option<usize> {
    window
        .char_indices()
        .filter(|(_, c)| c.is_whitespace())
        .next_back()
        .map(|(i, c)| i + c.len_utf8())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_text_yields_single_chunk() {
        let chunker = Chunker::new(100, 10);
        let chunks: Vec<_> = chunker.chunks("short text").collect();
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].index, 0);
        assert_eq!(chunks[0].text, "short text");
    }

    #[test]
    fn empty_text_yields_no_chunks() {
        let chunker = Chunker::new(100, 10);
        assert_eq!(chunker.count(""), 0);
    }

    #[test]
    fn prefers_paragraph_break_over_hard_cut() {
        let text = format!("{}\n\n{}", "a".repeat(50), "b".repeat(200));
        let chunker = Chunker::new(60, 10);
        let chunks: Vec<_> = chunker.chunks(&text).collect();
        assert!(chunks[0].text.ends_with("\n\n"));
        assert_eq!(chunks[0].text.trim_end(), "a".repeat(50));
    }

    #[test]
    fn prefers_sentence_end_when_no_line_breaks() {
        let text = "First sentence here. Second sentence follows. ".repeat(20);
        let chunker = Chunker::new(100, 10);
        let first = chunker.chunks(&text).next().expect("first chunk");
        assert!(first.text.trim_end().ends_with('.'));
    }

    #[test]
    fn hard_cut_when_no_boundaries_exist() {
        let text = "x".repeat(1000);
        let chunker = Chunker::new(100, 10);
        let chunks: Vec<_> = chunker.chunks(&text).collect();
        // Each full chunk is 100 chars and the cursor advances 90 per step.
        assert_eq!(chunks.len(), 11);
        assert!(chunks.iter().all(|c| c.char_len() <= 100));
    }

    #[test]
    fn consecutive_chunks_share_the_overlap() {
        let text = "x".repeat(500);
        let chunker = Chunker::new(100, 20);
        let chunks: Vec<_> = chunker.chunks(&text).collect();
        for pair in chunks.windows(2) {
            let prev_tail: String = pair[0]
                .text
                .chars()
                .skip(pair[0].char_len() - 20)
                .collect();
            let next_head: String = pair[1].text.chars().take(20).collect();
            assert_eq!(prev_tail, next_head);
        }
    }

    #[test]
    fn chunks_cover_the_entire_input() {
        let text = "word ".repeat(400);
        let chunker = Chunker::new(100, 10);
        let chunks: Vec<_> = chunker.chunks(&text).collect();
        assert!(text.starts_with(chunks.first().expect("first chunk").text));
        assert!(text.ends_with(chunks.last().expect("last chunk").text));
    }

    #[test]
    fn same_input_yields_same_sequence() {
        let text = format!(
            "{}\n\n{}\n{}",
            "intro ".repeat(40),
            "body. ".repeat(60),
            "outro ".repeat(40)
        );
        let chunker = Chunker::new(120, 15);
        let first: Vec<_> = chunker.chunks(&text).collect();
        let second: Vec<_> = chunker.chunks(&text).collect();
        assert_eq!(first, second);
    }

    #[test]
    fn multibyte_text_never_splits_a_codepoint() {
        let text = "これは長い日本語の文章です。".repeat(50);
        let chunker = Chunker::new(40, 5);
        let chunks: Vec<_> = chunker.chunks(&text).collect();
        assert!(chunks.len() > 1);
        for chunk in &chunks {
            assert!(chunk.char_len() <= 40);
            // Slicing panics on invalid boundaries, so reaching here means
            // every cut landed on a character boundary.
            assert!(!chunk.text.is_empty());
        }
    }

    #[test]
    fn uniform_text_of_known_length_splits_into_twelve_chunks() {
        // 1000 + 11 * (1000 - 100) characters walks to exactly 12 chunks.
        let text = "y".repeat(10_900);
        let chunker = Chunker::new(1000, 100);
        assert_eq!(chunker.count(&text), 12);
    }
}
