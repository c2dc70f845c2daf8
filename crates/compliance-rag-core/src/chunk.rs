//! Page-aware overlapping text chunker.
//!
//! Splits extracted document text into [`Chunk`]s of roughly
//! `max_tokens` tokens with `overlap_tokens` of shared context between
//! neighbours. Every chunk is an exact byte slice of the document text, so
//! the ordered chunk sequence reconstructs the text losslessly once the
//! overlap is dropped.
//!
//! # Algorithm
//!
//! 1. Convert token budgets to byte budgets using a 4 chars/token ratio.
//! 2. From the current start, look for the best break in
//!    `(start + target/2, start + target]`, preferring in order: a page
//!    boundary, a paragraph break (`\n\n`), a sentence end, whitespace,
//!    and finally a hard cut on a UTF-8 char boundary.
//! 3. Start the next chunk `overlap` bytes before the previous end,
//!    snapped forward to the next word start. The start always advances.
//! 4. Record the page holding most of the chunk's bytes plus every page
//!    the chunk touches.
//! 5. Guarantee at least one chunk per document (even for empty text).
//!
//! Chunk ids are UUIDv5 of `document_id:generation:position`, where the
//! generation hashes the text and the chunking configuration. Re-chunking
//! identical content therefore yields identical ids.
//!
//! # Example
//!
//! ```rust
//! use compliance_rag_core::chunk::{chunk_text, ChunkingConfig};
//!
//! let chunks = chunk_text("doc-123", "Hello world.\n\nSecond paragraph.", &[], &ChunkingConfig::default());
//! assert_eq!(chunks.len(), 1);
//! assert_eq!(chunks[0].position, 0);
//! ```

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::models::{Chunk, ChunkKind, PageSpan};

/// Approximate characters-per-token ratio.
pub const CHARS_PER_TOKEN: usize = 4;

/// Share of non-empty lines that must look tabular for a table chunk.
const TABLE_LINE_RATIO: f64 = 0.6;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkingConfig {
    pub max_tokens: usize,
    pub overlap_tokens: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            max_tokens: 250,
            overlap_tokens: 50,
        }
    }
}

impl ChunkingConfig {
    pub fn max_chars(&self) -> usize {
        (self.max_tokens * CHARS_PER_TOKEN).max(1)
    }

    pub fn overlap_chars(&self) -> usize {
        (self.overlap_tokens * CHARS_PER_TOKEN).min(self.max_chars() - 1)
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_tokens == 0 {
            return Err(Error::InvalidInput("chunking.max_tokens must be > 0".into()));
        }
        if self.overlap_tokens >= self.max_tokens {
            return Err(Error::InvalidInput(format!(
                "chunking.overlap_tokens ({}) must be smaller than max_tokens ({})",
                self.overlap_tokens, self.max_tokens
            )));
        }
        Ok(())
    }
}

/// Content hash identifying the chunk set produced from `text` under `config`.
pub fn generation_id(text: &str, config: &ChunkingConfig) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    hasher.update(format!(":{}:{}", config.max_tokens, config.overlap_tokens).as_bytes());
    let digest = format!("{:x}", hasher.finalize());
    digest[..16].to_string()
}

/// Split `text` into overlapping, page-anchored chunks.
///
/// `pages` are the byte spans of each page in `text`, in order. An empty
/// slice treats the whole text as page 1.
///
/// # Guarantees
///
/// - At least one chunk is always returned (even for empty text).
/// - Positions are contiguous: `0, 1, 2, …, N-1`.
/// - `chunk.text == text[chunk.start..chunk.end]`.
/// - Consecutive chunks overlap by at most the configured overlap and
///   leave no gaps.
pub fn chunk_text(
    document_id: &str,
    text: &str,
    pages: &[PageSpan],
    config: &ChunkingConfig,
) -> Vec<Chunk> {
    let generation = generation_id(text, config);
    let breaks: Vec<usize> = pages
        .iter()
        .map(|p| p.start)
        .filter(|&b| b > 0 && b < text.len())
        .collect();

    split_spans(text, &breaks, config.max_chars(), config.overlap_chars())
        .into_iter()
        .enumerate()
        .map(|(position, (start, end))| {
            make_chunk(document_id, &generation, position as u32, text, start, end, pages)
        })
        .collect()
}

fn split_spans(text: &str, page_breaks: &[usize], max: usize, overlap: usize) -> Vec<(usize, usize)> {
    let len = text.len();
    if len <= max {
        return vec![(0, len)];
    }

    let mut spans = Vec::new();
    let mut start = 0;
    let mut prev_end = 0;
    loop {
        if len - start <= max {
            spans.push((start, len));
            break;
        }
        let end = find_break(text, start, prev_end, max, page_breaks);
        spans.push((start, end));
        start = next_start(text, start, end, overlap);
        prev_end = end;
    }
    spans
}

/// Best break in `(max(start + max/2, prev_end), start + max]`.
fn find_break(text: &str, start: usize, prev_end: usize, max: usize, page_breaks: &[usize]) -> usize {
    let floor = (start + max / 2).max(prev_end);
    let mut limit = snap_back(text, start + max);
    if limit <= floor {
        limit = snap_forward(text, floor + 1);
    }

    if let Some(&b) = page_breaks.iter().rev().find(|&&b| b > floor && b <= limit) {
        return b;
    }

    let window = &text[start..limit];
    let min_rel = floor - start;

    if let Some(p) = window.rfind("\n\n") {
        if p + 2 > min_rel {
            return start + p + 2;
        }
    }

    let mut sentence_end = None;
    let mut whitespace_end = None;
    let mut chars = window.char_indices().rev().peekable();
    while let Some((i, c)) = chars.next() {
        if i < min_rel {
            break;
        }
        if c.is_whitespace() {
            let after = i + c.len_utf8();
            if whitespace_end.is_none() && after > min_rel {
                whitespace_end = Some(after);
            }
            if let Some(&(_, prev)) = chars.peek() {
                if matches!(prev, '.' | '?' | '!' | ';') && after > min_rel {
                    sentence_end = Some(after);
                    break;
                }
            }
        }
    }

    start + sentence_end.or(whitespace_end).unwrap_or(window.len())
}

fn next_start(text: &str, start: usize, end: usize, overlap: usize) -> usize {
    if overlap == 0 || end <= start + overlap {
        return end;
    }
    let candidate = snap_forward(text, end - overlap);
    if candidate <= start || candidate >= end {
        return end;
    }
    if text[..candidate].ends_with(char::is_whitespace) {
        return candidate;
    }
    let region = &text[candidate..end];
    region
        .find(char::is_whitespace)
        .and_then(|ws| region[ws..].find(|c: char| !c.is_whitespace()).map(|p| candidate + ws + p))
        .filter(|&p| p < end)
        .unwrap_or(candidate)
}

/// Snap a byte index back to the nearest valid UTF-8 char boundary.
fn snap_back(s: &str, index: usize) -> usize {
    if index >= s.len() {
        return s.len();
    }
    let mut i = index;
    while i > 0 && !s.is_char_boundary(i) {
        i -= 1;
    }
    i
}

fn snap_forward(s: &str, index: usize) -> usize {
    let mut i = index.min(s.len());
    while i < s.len() && !s.is_char_boundary(i) {
        i += 1;
    }
    i
}

fn make_chunk(
    document_id: &str,
    generation: &str,
    position: u32,
    text: &str,
    start: usize,
    end: usize,
    pages: &[PageSpan],
) -> Chunk {
    let (page, touched) = page_coverage(pages, start, end);
    let slice = &text[start..end];
    let id = Uuid::new_v5(
        &Uuid::NAMESPACE_OID,
        format!("{document_id}:{generation}:{position}").as_bytes(),
    );

    Chunk {
        id: id.to_string(),
        document_id: document_id.to_string(),
        position,
        page,
        pages: touched,
        start,
        end,
        text: slice.to_string(),
        kind: detect_kind(slice),
        generation: generation.to_string(),
        periods: Vec::new(),
        embedding: None,
    }
}

/// Majority page (earliest on ties) and every page overlapping `[start, end)`.
fn page_coverage(pages: &[PageSpan], start: usize, end: usize) -> (u32, Vec<u32>) {
    let mut best: Option<(u32, usize)> = None;
    let mut touched = Vec::new();
    for p in pages {
        let overlap = end.min(p.end).saturating_sub(start.max(p.start));
        if overlap == 0 {
            continue;
        }
        touched.push(p.number);
        if best.map_or(true, |(_, b)| overlap > b) {
            best = Some((p.number, overlap));
        }
    }
    match best {
        Some((page, _)) => (page, touched),
        None => {
            // Empty chunk or text outside every span: anchor to the containing page.
            let page = pages
                .iter()
                .find(|p| start >= p.start && start <= p.end)
                .or(pages.first())
                .map_or(1, |p| p.number);
            (page, vec![page])
        }
    }
}

fn detect_kind(text: &str) -> ChunkKind {
    let lines: Vec<&str> = text.lines().filter(|l| !l.trim().is_empty()).collect();
    if lines.len() < 2 {
        return ChunkKind::Text;
    }
    let tabular = lines.iter().filter(|l| looks_tabular(l)).count();
    if tabular as f64 / lines.len() as f64 >= TABLE_LINE_RATIO {
        ChunkKind::Table
    } else {
        ChunkKind::Text
    }
}

fn looks_tabular(line: &str) -> bool {
    let trimmed = line.trim();
    trimmed.contains('|') || trimmed.contains('\t') || trimmed.contains("   ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn cfg(max_tokens: usize, overlap_tokens: usize) -> ChunkingConfig {
        ChunkingConfig {
            max_tokens,
            overlap_tokens,
        }
    }

    fn reconstruct(chunks: &[Chunk]) -> String {
        let mut out = String::new();
        let mut covered: usize = 0;
        for c in chunks {
            out.push_str(&c.text[covered.saturating_sub(c.start)..]);
            covered = c.end;
        }
        out
    }

    #[test]
    fn test_small_text_single_chunk() {
        let chunks = chunk_text("doc1", "Hello, world!", &[], &ChunkingConfig::default());
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].position, 0);
        assert_eq!(chunks[0].text, "Hello, world!");
        assert_eq!(chunks[0].page, 1);
    }

    #[test]
    fn test_empty_text() {
        let chunks = chunk_text("doc1", "", &[], &ChunkingConfig::default());
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].text, "");
        assert_eq!(chunks[0].pages, vec![1]);
    }

    #[test]
    fn test_positions_contiguous_and_lossless() {
        let text = (0..80)
            .map(|i| format!("Control {i} is reviewed quarterly by the audit committee."))
            .collect::<Vec<_>>()
            .join(" ");
        let chunks = chunk_text("doc1", &text, &[], &cfg(20, 5));
        assert!(chunks.len() > 1);
        for (i, c) in chunks.iter().enumerate() {
            assert_eq!(c.position, i as u32);
            assert_eq!(c.text, &text[c.start..c.end]);
        }
        assert_eq!(reconstruct(&chunks), text);
    }

    #[test]
    fn test_adjacent_chunks_share_overlap() {
        let text = "word ".repeat(200);
        let chunks = chunk_text("doc1", &text, &[], &cfg(10, 3));
        for pair in chunks.windows(2) {
            let shared = pair[0].end - pair[1].start;
            assert!(shared > 0, "expected overlap between neighbours");
            assert!(shared <= 12);
            assert!(pair[1].start > pair[0].start);
        }
    }

    #[test]
    fn test_prefers_sentence_breaks() {
        let text = "The first sentence is here. The second sentence follows it. And a third one ends.";
        let chunks = chunk_text("doc1", text, &[], &cfg(10, 0));
        assert!(chunks.len() > 1);
        assert!(chunks[0].text.ends_with(". "), "got {:?}", chunks[0].text);
    }

    #[test]
    fn test_break_on_page_boundary() {
        let p1 = "a".repeat(30) + " ";
        let p2 = "b".repeat(30);
        let text = format!("{p1}{p2}");
        let pages = vec![
            PageSpan { number: 1, start: 0, end: p1.len() },
            PageSpan { number: 2, start: p1.len(), end: text.len() },
        ];
        let chunks = chunk_text("doc1", &text, &pages, &cfg(10, 0));
        assert_eq!(chunks[0].end, p1.len());
        assert_eq!(chunks[0].page, 1);
        assert_eq!(chunks.last().unwrap().page, 2);
    }

    #[test]
    fn test_straddling_chunk_records_both_pages() {
        let text = "Page one text. Page two has much more text in it.";
        let split = "Page one text. ".len();
        let pages = vec![
            PageSpan { number: 1, start: 0, end: split },
            PageSpan { number: 2, start: split, end: text.len() },
        ];
        let chunks = chunk_text("doc1", text, &pages, &ChunkingConfig::default());
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].pages, vec![1, 2]);
        assert_eq!(chunks[0].page, 2);
    }

    #[test]
    fn test_multibyte_utf8_chars() {
        let text = "┌──────────────────┐\n│ Hello world      │\n└──────────────────┘".repeat(5);
        let chunks = chunk_text("doc1", &text, &[], &cfg(3, 1));
        assert!(chunks.len() > 1);
        assert_eq!(reconstruct(&chunks), text);
    }

    #[test]
    fn test_deterministic_ids() {
        let text = "Alpha\n\nBeta\n\nGamma\n\nDelta ".repeat(20);
        let c1 = chunk_text("doc1", &text, &[], &cfg(8, 2));
        let c2 = chunk_text("doc1", &text, &[], &cfg(8, 2));
        assert_eq!(c1, c2);
        let c3 = chunk_text("doc1", &format!("{text}!"), &[], &cfg(8, 2));
        assert_ne!(c1[0].id, c3[0].id);
    }

    #[test]
    fn test_table_detection() {
        let table = "| Control | Owner |\n| AC-1 | CFO |\n| AC-2 | CIO |";
        let chunks = chunk_text("doc1", table, &[], &ChunkingConfig::default());
        assert!(chunks[0].is_table());
        let prose = "Management maintains controls.\nThey are tested yearly.";
        let chunks = chunk_text("doc1", prose, &[], &ChunkingConfig::default());
        assert!(!chunks[0].is_table());
    }

    #[test]
    fn test_validate_rejects_overlap_ge_max() {
        assert!(cfg(10, 10).validate().is_err());
        assert!(cfg(0, 0).validate().is_err());
        assert!(cfg(10, 2).validate().is_ok());
    }

    proptest! {
        #[test]
        fn prop_chunks_reconstruct_text(
            text in "[a-zé .\n]{0,600}",
            max_tokens in 1usize..40,
            overlap_frac in 0usize..100,
        ) {
            let overlap_tokens = max_tokens * overlap_frac / 100;
            let config = cfg(max_tokens, overlap_tokens.min(max_tokens - 1));
            let chunks = chunk_text("doc", &text, &[], &config);
            prop_assert!(!chunks.is_empty());
            prop_assert_eq!(reconstruct(&chunks), text.clone());
            for pair in chunks.windows(2) {
                prop_assert!(pair[1].start > pair[0].start);
                prop_assert!(pair[1].start <= pair[0].end);
                prop_assert!(pair[1].end > pair[0].end);
                prop_assert!(pair[0].end - pair[1].start <= config.overlap_chars());
            }
        }
    }
}
