use crate::error::IngestError;
use crate::models::{Chunk, IngestionOptions, PageSpan, PageText};
use regex::Regex;
use std::collections::VecDeque;

/// Glyph ids that PDF text extraction emits when a font has no unicode map.
const FONT_ARTIFACT_PATTERN: &str = r"\(cid:\d+\)";

#[derive(Debug, Clone)]
pub struct TextCleaner {
    artifact_re: Regex,
}

impl TextCleaner {
    pub fn new() -> Result<Self, IngestError> {
        Ok(Self {
            artifact_re: Regex::new(FONT_ARTIFACT_PATTERN)?,
        })
    }

    /// Strips font artifact tags and collapses every whitespace run to one space.
    pub fn clean(&self, raw: &str) -> String {
        let stripped = self.artifact_re.replace_all(raw, "");
        normalize_whitespace(&stripped)
    }
}

pub fn normalize_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[derive(Debug, Clone)]
pub struct ChunkingConfig {
    chunk_size: usize,
    overlap: usize,
    separators: Vec<String>,
}

impl ChunkingConfig {
    pub fn new(
        chunk_size: usize,
        overlap: usize,
        separators: Vec<String>,
    ) -> Result<Self, IngestError> {
        if chunk_size == 0 {
            return Err(IngestError::InvalidChunkConfig(
                "chunk size must be positive".to_string(),
            ));
        }

        if overlap >= chunk_size {
            return Err(IngestError::InvalidChunkConfig(format!(
                "overlap {overlap} must be smaller than chunk size {chunk_size}"
            )));
        }

        Ok(Self {
            chunk_size,
            overlap,
            separators,
        })
    }
}

impl TryFrom<IngestionOptions> for ChunkingConfig {
    type Error = IngestError;

    fn try_from(value: IngestionOptions) -> Result<Self, Self::Error> {
        Self::new(value.chunk_size, value.chunk_overlap, value.separators)
    }
}

/// Turns cleaned pages into overlapping chunks that remember their page span.
#[derive(Debug, Clone)]
pub struct PageChunker {
    config: ChunkingConfig,
}

impl PageChunker {
    pub fn new(config: ChunkingConfig) -> Self {
        Self { config }
    }

    pub fn from_options(options: IngestionOptions) -> Result<Self, IngestError> {
        Ok(Self::new(ChunkingConfig::try_from(options)?))
    }

    /// Chunks pages in order. Each page after the first non-empty one is
    /// prefixed with the tail of the nearest preceding page that had text, and
    /// its first part is attributed to both pages.
    pub fn chunk(&self, pages: &[PageText]) -> Vec<Chunk> {
        let mut chunks = Vec::new();
        let mut previous: Option<&PageText> = None;

        for page in pages {
            if page.text.trim().is_empty() {
                continue;
            }

            let to_split = match previous {
                Some(prev) => {
                    let carried = tail_chars(&prev.text, self.config.overlap);
                    if carried.is_empty() {
                        page.text.clone()
                    } else {
                        format!("{carried} {}", page.text)
                    }
                }
                None => page.text.clone(),
            };

            let parts = self
                .split_text(&to_split)
                .into_iter()
                .filter(|part| !part.trim().is_empty());

            for (index, part) in parts.enumerate() {
                let page_span = match previous {
                    Some(prev) if index == 0 => {
                        PageSpan::straddling(prev.page_number, page.page_number)
                    }
                    _ => PageSpan::single(page.page_number),
                };

                chunks.push(Chunk {
                    source_id: page.source_id.clone(),
                    page_span,
                    chunk_id: make_chunk_id(&page.source_id, page.page_number, index),
                    text: part,
                });
            }

            previous = Some(page);
        }

        chunks
    }

    /// Splits text into parts of at most `chunk_size` characters, trying the
    /// separators in order before falling back to a hard character cut.
    /// Separators stay attached to the start of the piece that follows them.
    pub fn split_text(&self, text: &str) -> Vec<String> {
        self.split_recursive(text, &self.config.separators)
    }

    fn split_recursive(&self, text: &str, separators: &[String]) -> Vec<String> {
        let chosen = separators
            .iter()
            .enumerate()
            .find(|(_, candidate)| candidate.is_empty() || text.contains(candidate.as_str()));

        let Some((position, separator)) = chosen else {
            return hard_cut(text, self.config.chunk_size, self.config.overlap);
        };
        let remaining = if separator.is_empty() {
            &[][..]
        } else {
            &separators[position + 1..]
        };

        let splits: Vec<&str> = if separator.is_empty() {
            text.char_indices()
                .map(|(start, ch)| &text[start..start + ch.len_utf8()])
                .collect()
        } else {
            split_keeping_separator(text, separator)
        };

        let mut parts = Vec::new();
        let mut pending: Vec<&str> = Vec::new();

        for split in splits {
            if char_len(split) < self.config.chunk_size {
                pending.push(split);
                continue;
            }

            if !pending.is_empty() {
                parts.extend(self.merge_splits(&pending));
                pending.clear();
            }

            if remaining.is_empty() {
                parts.extend(hard_cut(split, self.config.chunk_size, self.config.overlap));
            } else {
                parts.extend(self.split_recursive(split, remaining));
            }
        }

        if !pending.is_empty() {
            parts.extend(self.merge_splits(&pending));
        }

        parts
    }

    /// Greedily packs small splits into parts, keeping up to `overlap`
    /// characters of trailing splits as the head of the next part.
    fn merge_splits(&self, splits: &[&str]) -> Vec<String> {
        let chunk_size = self.config.chunk_size;
        let overlap = self.config.overlap;

        let mut parts = Vec::new();
        let mut current: VecDeque<&str> = VecDeque::new();
        let mut total = 0usize;

        for split in splits {
            let len = char_len(split);

            if total + len > chunk_size && !current.is_empty() {
                push_joined(&mut parts, &current);

                while let Some(front) = current.front().copied() {
                    if total <= overlap && total + len <= chunk_size {
                        break;
                    }
                    total = total.saturating_sub(char_len(front));
                    current.pop_front();
                }
            }

            current.push_back(split);
            total += len;
        }

        push_joined(&mut parts, &current);
        parts
    }
}

/// `"a. b. c"` on `". "` gives `["a", ". b", ". c"]`.
fn split_keeping_separator<'a>(text: &'a str, separator: &str) -> Vec<&'a str> {
    let mut pieces = Vec::new();
    let mut start = 0;
    for (index, _) in text.match_indices(separator) {
        pieces.push(&text[start..index]);
        start = index;
    }
    pieces.push(&text[start..]);
    pieces.retain(|piece| !piece.is_empty());
    pieces
}

fn push_joined(parts: &mut Vec<String>, current: &VecDeque<&str>) {
    let joined: String = current.iter().copied().collect();
    let trimmed = joined.trim();
    if !trimmed.is_empty() {
        parts.push(trimmed.to_string());
    }
}

fn hard_cut(text: &str, max_chars: usize, overlap_chars: usize) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    let mut pieces = Vec::new();
    let mut start = 0;

    while start < chars.len() {
        let end = (start + max_chars).min(chars.len());
        let piece: String = chars[start..end].iter().collect();
        let piece = piece.trim();
        if !piece.is_empty() {
            pieces.push(piece.to_string());
        }
        if end == chars.len() {
            break;
        }
        start = start.saturating_add(max_chars.saturating_sub(overlap_chars).max(1));
    }

    pieces
}

fn tail_chars(text: &str, count: usize) -> &str {
    if count == 0 {
        return "";
    }
    match text.char_indices().rev().nth(count - 1) {
        Some((start, _)) => &text[start..],
        None => text,
    }
}

fn char_len(text: &str) -> usize {
    text.chars().count()
}

pub fn make_chunk_id(source_id: &str, page_number: u32, index: usize) -> String {
    format!("{source_id}_p{page_number}_c{index}")
}
