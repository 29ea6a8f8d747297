use serde::{Deserialize, Serialize};
use std::fmt;

/// One cleaned page of a source document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageText {
    pub source_id: String,
    pub page_number: u32,
    pub text: String,
}

impl PageText {
    pub fn new(source_id: impl Into<String>, page_number: u32, text: impl Into<String>) -> Self {
        Self {
            source_id: source_id.into(),
            page_number,
            text: text.into(),
        }
    }
}

/// The page or pair of pages a chunk's text was drawn from.
///
/// Always ascending and free of duplicates; a single page is stored with
/// `first == last`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "Vec<u32>", try_from = "Vec<u32>")]
pub struct PageSpan {
    first: u32,
    last: u32,
}

impl PageSpan {
    pub fn single(page: u32) -> Self {
        Self {
            first: page,
            last: page,
        }
    }

    pub fn straddling(previous: u32, current: u32) -> Self {
        Self {
            first: previous.min(current),
            last: previous.max(current),
        }
    }

    pub fn first(&self) -> u32 {
        self.first
    }

    pub fn last(&self) -> u32 {
        self.last
    }

    pub fn pages(&self) -> Vec<u32> {
        if self.first == self.last {
            vec![self.first]
        } else {
            vec![self.first, self.last]
        }
    }

    /// Comma-joined form stored in collection metadata, e.g. `"3,4"`.
    pub fn to_metadata_value(&self) -> String {
        self.pages()
            .iter()
            .map(u32::to_string)
            .collect::<Vec<_>>()
            .join(",")
    }

    pub fn parse(value: &str) -> Option<Self> {
        let pages = value
            .split(',')
            .map(|part| part.trim().parse::<u32>().ok())
            .collect::<Option<Vec<_>>>()?;
        Self::try_from(pages).ok()
    }
}

impl fmt::Display for PageSpan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_metadata_value())
    }
}

impl From<PageSpan> for Vec<u32> {
    fn from(value: PageSpan) -> Self {
        value.pages()
    }
}

impl TryFrom<Vec<u32>> for PageSpan {
    type Error = String;

    fn try_from(value: Vec<u32>) -> Result<Self, Self::Error> {
        match value.as_slice() {
            [page] => Ok(Self::single(*page)),
            [first, last] if first < last => Ok(Self {
                first: *first,
                last: *last,
            }),
            other => Err(format!("invalid page span {other:?}")),
        }
    }
}

/// A unit of text submitted for embedding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    pub source_id: String,
    pub page_span: PageSpan,
    pub chunk_id: String,
    pub text: String,
}

#[derive(Debug, Clone)]
pub struct IngestionOptions {
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    pub separators: Vec<String>,
}

impl Default for IngestionOptions {
    fn default() -> Self {
        Self {
            chunk_size: 1_000,
            chunk_overlap: 200,
            separators: ["\n\n", "\n", ". ", " "]
                .into_iter()
                .map(str::to_string)
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::PageSpan;

    #[test]
    fn page_span_metadata_value_is_comma_joined() {
        assert_eq!(PageSpan::straddling(3, 4).to_metadata_value(), "3,4");
        assert_eq!(PageSpan::single(7).to_metadata_value(), "7");
        assert_eq!(PageSpan::straddling(5, 5).pages(), vec![5]);
    }

    #[test]
    fn page_span_parse_rejects_descending_pairs() {
        assert_eq!(PageSpan::parse("3, 4"), Some(PageSpan::straddling(3, 4)));
        assert_eq!(PageSpan::parse("4,3"), None);
        assert_eq!(PageSpan::parse("N/A"), None);
        assert_eq!(PageSpan::parse("1,2,3"), None);
    }

    #[test]
    fn page_span_serializes_as_list() -> Result<(), serde_json::Error> {
        let encoded = serde_json::to_string(&PageSpan::straddling(1, 2))?;
        assert_eq!(encoded, "[1,2]");
        let decoded: PageSpan = serde_json::from_str("[9]")?;
        assert_eq!(decoded, PageSpan::single(9));
        Ok(())
    }
}
