pub mod layout;
pub mod sections;
pub mod title;

use log::{debug, info, trace};
use lopdf::Document;
use std::fmt;
use std::path::{Path, PathBuf};

use crate::error::PaperError;
use layout::PageLayout;
pub use sections::{SectionIndex, SectionMap};

/// Synthetic section holding the resolved title.
pub const TITLE_SECTION: &str = "title";
/// Synthetic section holding the title page minus the abstract.
pub const PAPER_INFO_SECTION: &str = "paper_info";

/// A parsed paper: metadata plus the section structure recovered from its PDF.
pub struct Paper {
    pub path: PathBuf,
    pub url: String,
    pub authors: Vec<String>,
    title: String,
    abstract_text: String,
    title_page: usize,
    pages: Vec<String>,
    section_page_index: SectionIndex,
    sections: SectionMap,
}

impl fmt::Debug for Paper {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Paper")
            .field("title", &self.title)
            .field("url", &self.url)
            .field("authors", &self.authors)
            .field("pages", &self.pages.len())
            .field("sections", &self.sections.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Builder collecting the metadata known before a PDF is parsed.
pub struct PaperBuilder {
    path: PathBuf,
    title: String,
    url: String,
    abstract_text: String,
    authors: Vec<String>,
}

impl PaperBuilder {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            title: String::new(),
            url: String::new(),
            abstract_text: String::new(),
            authors: Vec::new(),
        }
    }

    pub fn title(mut self, title: impl Into<String>) -> Self {
        self.title = title.into();
        self
    }

    pub fn url(mut self, url: impl Into<String>) -> Self {
        self.url = url.into();
        self
    }

    pub fn abstract_text(mut self, abstract_text: impl Into<String>) -> Self {
        self.abstract_text = abstract_text.into();
        self
    }

    pub fn authors<I, S>(mut self, authors: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.authors = authors.into_iter().map(Into::into).collect();
        self
    }

    /// Read and parse the PDF at the builder's path.
    pub fn load(self) -> Result<Paper, PaperError> {
        let document = Document::load(&self.path).map_err(|source| PaperError::PdfLoad {
            path: self.path.clone(),
            source,
        })?;
        Ok(self.parse_document(&document))
    }

    /// Parse a PDF already held in memory.
    pub fn load_bytes(self, bytes: &[u8]) -> Result<Paper, PaperError> {
        let document = Document::load_mem(bytes).map_err(|source| PaperError::PdfLoad {
            path: self.path.clone(),
            source,
        })?;
        Ok(self.parse_document(&document))
    }

    fn parse_document(self, document: &Document) -> Paper {
        let layouts = layout::extract_pages(document);
        self.assemble(layouts)
    }

    /// Assemble a paper from pages that were already laid out.
    pub fn assemble(self, layouts: Vec<PageLayout>) -> Paper {
        let (title, title_page) = if self.title.is_empty() {
            let resolved = title::resolve_title(&layouts);
            debug!("Resolved title '{}' on page {}", resolved.title, resolved.page);
            (resolved.title, resolved.page)
        } else {
            (self.title, 0)
        };

        let pages: Vec<String> = layouts.into_iter().map(|l| l.text).collect();
        let section_page_index = sections::locate_sections(&pages);
        let mut section_map =
            sections::assemble_sections(&section_page_index, &pages, !self.abstract_text.is_empty());

        let paper_info = paper_info(&pages, title_page, &section_map, &self.abstract_text);
        section_map.insert(TITLE_SECTION, title.clone());
        section_map.insert(PAPER_INFO_SECTION, paper_info);
        trace!("Sections for {}: {:?}", self.path.display(), section_map.keys().collect::<Vec<_>>());

        Paper {
            path: self.path,
            url: self.url,
            authors: self.authors,
            title,
            abstract_text: self.abstract_text,
            title_page,
            pages,
            section_page_index,
            sections: section_map,
        }
    }
}

/// Title-page text with the abstract cut out.
fn paper_info(pages: &[String], title_page: usize, sections: &SectionMap, abstract_text: &str) -> String {
    let page_text = pages.get(title_page).map(String::as_str).unwrap_or_default();
    let abstract_text = sections.get("Abstract").unwrap_or(abstract_text);
    if abstract_text.is_empty() {
        page_text.to_string()
    } else {
        page_text.replace(abstract_text, "")
    }
}

impl Paper {
    pub fn builder(path: impl Into<PathBuf>) -> PaperBuilder {
        PaperBuilder::new(path)
    }

    /// Parse a local PDF that comes with no metadata.
    pub fn open(path: impl AsRef<Path>) -> Result<Paper, PaperError> {
        let path = path.as_ref();
        info!("Parsing PDF: {}", path.display());
        PaperBuilder::new(path).load()
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn abstract_text(&self) -> &str {
        &self.abstract_text
    }

    pub fn title_page(&self) -> usize {
        self.title_page
    }

    pub fn pages(&self) -> &[String] {
        &self.pages
    }

    pub fn section_page_index(&self) -> &SectionIndex {
        &self.section_page_index
    }

    pub fn sections(&self) -> &SectionMap {
        &self.sections
    }

    pub fn paper_info(&self) -> &str {
        self.sections.get(PAPER_INFO_SECTION).unwrap_or_default()
    }

    /// Text of the first real section, or the title when none was found.
    pub fn lead_section(&self) -> &str {
        self.sections
            .iter()
            .next()
            .map(|(_, text)| text)
            .unwrap_or_default()
    }

    pub fn method_section(&self) -> Option<&str> {
        self.sections
            .find_by_keyword(&["method", "approach"])
            .map(|(_, text)| text)
    }

    pub fn conclusion_section(&self) -> Option<&str> {
        self.sections.find_by_keyword(&["conclu"]).map(|(_, text)| text)
    }

    /// Take a title reported back by the summary stage. Only applies while the
    /// title is still unknown.
    pub fn adopt_title(&mut self, title: &str) -> bool {
        if !self.title.is_empty() || title.is_empty() {
            return false;
        }
        info!("Adopting title from summary: {}", title);
        self.title = title.to_string();
        self.sections.insert(TITLE_SECTION, title);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::paper::layout::TextRun;

    fn layout(text: &str, runs: &[(f32, &str)]) -> PageLayout {
        PageLayout {
            text: text.to_string(),
            runs: runs
                .iter()
                .map(|(s, t)| TextRun { text: t.to_string(), font_size: *s })
                .collect(),
        }
    }

    #[test]
    fn test_single_abstract_page() {
        let paper = Paper::builder("test.pdf").assemble(vec![layout(
            "Abstract\nThis is a test abstract.\n",
            &[(10.0, "Abstract")],
        )]);
        let keys: Vec<&str> = paper.sections().keys().collect();
        assert_eq!(keys, vec!["Abstract", TITLE_SECTION, PAPER_INFO_SECTION]);
        assert_eq!(paper.sections().get("Abstract"), Some("This is a test abstract."));
        assert!(paper.method_section().is_none());
        assert!(paper.conclusion_section().is_none());
    }

    #[test]
    fn test_paper_info_strips_external_abstract() {
        let paper = Paper::builder("x.pdf")
            .title("Known Title")
            .abstract_text("We do things.")
            .assemble(vec![layout(
                "Known Title\nAbstract\nWe do things.\nIntroduction\nIntro.\n",
                &[],
            )]);
        assert_eq!(paper.title(), "Known Title");
        assert_eq!(paper.paper_info(), "Known Title\nAbstract\n\nIntroduction\nIntro.\n");
        // First discovered heading (Abstract) is skipped when the abstract is known.
        assert!(paper.sections().get("Abstract").is_none());
        assert_eq!(paper.lead_section(), "Intro.");
    }

    #[test]
    fn test_lead_section_falls_back_to_title() {
        let paper = Paper::builder("x.pdf")
            .title("Only A Title")
            .assemble(vec![layout("no headings at all\n", &[])]);
        assert_eq!(paper.lead_section(), "Only A Title");
    }

    #[test]
    fn test_adopt_title_only_when_unknown() {
        let mut paper = Paper::builder("x.pdf").assemble(vec![layout("nothing\n", &[])]);
        assert_eq!(paper.title(), "");
        assert!(paper.adopt_title("Recovered Title"));
        assert_eq!(paper.sections().get(TITLE_SECTION), Some("Recovered Title"));
        assert!(!paper.adopt_title("Another"));
        assert_eq!(paper.title(), "Recovered Title");
    }
}
