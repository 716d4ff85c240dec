use log::{debug, trace};

/// Canonical section headings, in lookup order.
pub const SECTION_HEADINGS: [&str; 27] = [
    "Abstract",
    "Introduction",
    "Related Work",
    "Background",
    "Introduction and Motivation",
    "Computation Function",
    "Routing Function",
    "Preliminary",
    "Problem Formulation",
    "Methods",
    "Methodology",
    "Method",
    "Approach",
    "Approaches",
    "Materials and Methods",
    "Experiment Settings",
    "Experiment",
    "Experimental Results",
    "Evaluation",
    "Experiments",
    "Results",
    "Findings",
    "Data Analysis",
    "Discussion",
    "Results and Discussion",
    "Conclusion",
    "References",
];

/// When a section runs over several pages, the cut-off on its end page is the
/// offset of the next heading measured in the *start* page's text. Kept for
/// compatibility with existing summaries; set to `false` to measure against
/// the end page instead.
pub const END_OFFSET_FROM_START_PAGE: bool = true;

/// Ordered heading -> first page index, in the order headings were discovered.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SectionIndex {
    entries: Vec<(&'static str, usize)>,
}

impl SectionIndex {
    pub fn get(&self, name: &str) -> Option<usize> {
        self.entries.iter().find(|(n, _)| *n == name).map(|(_, p)| *p)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&'static str, usize)> + '_ {
        self.entries.iter().copied()
    }

    /// Record a heading unless it is already known; the first page wins.
    fn record(&mut self, name: &'static str, page: usize) {
        if !self.contains(name) {
            self.entries.push((name, page));
        }
    }
}

/// Ordered section name -> section text.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SectionMap {
    entries: Vec<(String, String)>,
}

impl SectionMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace, keeping the original position of an existing key.
    pub fn insert(&mut self, name: impl Into<String>, text: impl Into<String>) {
        let name = name.into();
        let text = text.into();
        match self.entries.iter_mut().find(|(n, _)| *n == name) {
            Some(entry) => entry.1 = text,
            None => self.entries.push((name, text)),
        }
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, t)| t.as_str())
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(n, _)| n.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(n, t)| (n.as_str(), t.as_str()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// First section whose lower-cased name contains any of `needles`.
    pub fn find_by_keyword(&self, needles: &[&str]) -> Option<(&str, &str)> {
        self.iter().find(|(name, _)| {
            let lower = name.to_lowercase();
            needles.iter().any(|n| lower.contains(n))
        })
    }
}

fn heading_matches(page_text: &str, name: &str) -> Option<usize> {
    if name == "Abstract" {
        return page_text.find(name);
    }
    page_text
        .find(&format!("{name}\n"))
        .or_else(|| page_text.find(&format!("{}\n", name.to_uppercase())))
}

/// First candidate heading that appears on the page, with its byte offset.
///
/// "Abstract" matches anywhere; every other heading must end a line, in its
/// literal or upper-cased form.
pub fn locate_heading<'a>(page_text: &str, candidates: &[&'a str]) -> Option<(&'a str, usize)> {
    candidates
        .iter()
        .find_map(|name| heading_matches(page_text, name).map(|offset| (*name, offset)))
}

/// Byte span of a heading's text within a page, literal form first.
pub fn heading_span(page_text: &str, name: &str) -> Option<(usize, usize)> {
    page_text
        .find(name)
        .map(|start| (start, start + name.len()))
        .or_else(|| {
            let upper = name.to_uppercase();
            page_text.find(&upper).map(|start| (start, start + upper.len()))
        })
}

pub fn heading_offset(page_text: &str, name: &str) -> Option<usize> {
    heading_span(page_text, name).map(|(start, _)| start)
}

/// Map every canonical heading to the first page it occurs on.
pub fn locate_sections<S: AsRef<str>>(pages: &[S]) -> SectionIndex {
    let mut index = SectionIndex::default();
    for (page_idx, page) in pages.iter().enumerate() {
        let text = page.as_ref();
        for &name in SECTION_HEADINGS.iter() {
            if index.contains(name) {
                continue;
            }
            if locate_heading(text, &[name]).is_some() {
                index.record(name, page_idx);
            }
        }
    }
    trace!("Section page index: {:?}", index);
    index
}

fn clamp_to_boundary(text: &str, idx: usize) -> usize {
    let mut idx = idx.min(text.len());
    while !text.is_char_boundary(idx) {
        idx -= 1;
    }
    idx
}

fn slice(text: &str, start: usize, end: usize) -> &str {
    let start = clamp_to_boundary(text, start);
    let end = clamp_to_boundary(text, end);
    if start >= end {
        ""
    } else {
        &text[start..end]
    }
}

/// Where a section's body begins on its start page: right after the heading,
/// or the top of the page when the heading text cannot be found again.
fn body_start(page_text: &str, name: &str) -> usize {
    match heading_span(page_text, name) {
        Some((_, end)) => end,
        None => {
            debug!("Heading '{}' not found in its start page, slicing from 0", name);
            0
        }
    }
}

/// Where the next section begins; 0 when the heading text is absent.
fn body_end(page_text: &str, next: &str) -> usize {
    heading_offset(page_text, next).unwrap_or(0)
}

pub fn normalize_section_text(raw: &str) -> String {
    raw.replace("-\n", "").replace('\n', " ").trim().to_string()
}

/// Slice page text into one string per discovered heading.
///
/// With `skip_first` set (an abstract is already known) the first
/// discovered heading is left out.
pub fn assemble_sections<S: AsRef<str>>(
    index: &SectionIndex,
    pages: &[S],
    skip_first: bool,
) -> SectionMap {
    let names: Vec<(&str, usize)> = index.iter().collect();
    let mut sections = SectionMap::new();

    for (i, &(name, start_page)) in names.iter().enumerate() {
        if i == 0 && skip_first {
            continue;
        }
        let next = names.get(i + 1).copied();
        let end_page = next.map(|(_, p)| p).unwrap_or(pages.len());
        trace!("Section '{}' spans pages {}..{}", name, start_page, end_page);

        let Some(start_text): Option<&str> = pages.get(start_page).map(|p| p.as_ref()) else {
            continue;
        };
        let mut raw = String::new();

        if start_page == end_page {
            let from = body_start(start_text, name);
            let to = match next {
                Some((next_name, _)) => body_end(start_text, next_name),
                None => start_text.len(),
            };
            raw.push_str(slice(start_text, from, to));
        } else {
            let from = body_start(start_text, name);
            raw.push_str(slice(start_text, from, start_text.len()));
            for page in pages.iter().take(end_page).skip(start_page + 1) {
                raw.push_str(page.as_ref());
            }
            let end_text: Option<&str> = pages.get(end_page).map(|p| p.as_ref());
            if let (Some((next_name, _)), Some(end_text)) = (next, end_text) {
                let reference = if END_OFFSET_FROM_START_PAGE { start_text } else { end_text };
                let to = body_end(reference, next_name);
                raw.push_str(slice(end_text, 0, to));
            }
        }

        sections.insert(name, normalize_section_text(&raw));
    }
    sections
}
