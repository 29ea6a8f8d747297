use crate::error::IngestError;
use lopdf::Document;
use std::path::Path;

/// Uncleaned text of one PDF page, numbered from 1.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawPage {
    pub number: u32,
    pub text: String,
}

impl RawPage {
    pub fn new(number: u32, text: impl Into<String>) -> Self {
        Self {
            number,
            text: text.into(),
        }
    }
}

pub trait PdfExtractor {
    fn extract_pages(&self, path: &Path) -> Result<Vec<RawPage>, IngestError>;
}

#[derive(Default)]
pub struct LopdfExtractor;

impl PdfExtractor for LopdfExtractor {
    fn extract_pages(&self, path: &Path) -> Result<Vec<RawPage>, IngestError> {
        let bytes = std::fs::read(path)?;
        if bytes.is_empty() {
            return Err(IngestError::PdfParse(format!(
                "{} is empty or unreadable",
                path.display()
            )));
        }

        let document =
            Document::load_mem(&bytes).map_err(|error| IngestError::PdfParse(error.to_string()))?;

        let mut pages = Vec::new();
        for (page_no, _page_id) in document.get_pages() {
            let text = document
                .extract_text(&[page_no])
                .map_err(|error| IngestError::PdfParse(error.to_string()))?;

            pages.push(RawPage {
                number: page_no,
                text,
            });
        }

        if pages.iter().all(|page| page.text.trim().is_empty()) {
            return Err(IngestError::PdfParse(format!(
                "pdf had no readable page text: {}",
                path.display()
            )));
        }

        Ok(pages)
    }
}

pub fn extract_page_texts(path: &Path) -> Result<Vec<RawPage>, IngestError> {
    LopdfExtractor.extract_pages(path)
}
