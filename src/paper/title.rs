use log::trace;

use crate::paper::layout::PageLayout;

/// Only the leading pages are considered when guessing a title.
pub const TITLE_SCAN_PAGES: usize = 4;
/// Runs within this many points of one of the two largest sizes count as title text.
const FONT_SIZE_TOLERANCE: f32 = 0.3;
const MIN_FRAGMENT_CHARS: usize = 4;

/// A title guessed from font statistics and the page it was found on.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResolvedTitle {
    pub title: String,
    pub page: usize,
}

/// Guess a paper title from the largest fonts on its leading pages.
///
/// Fragments sitting on the same page as the first fragment are joined with
/// a space; anything on a later page is ignored, so a large running header
/// on page 3 never extends a title found on page 1.
pub fn resolve_title(pages: &[PageLayout]) -> ResolvedTitle {
    let scanned = &pages[..pages.len().min(TITLE_SCAN_PAGES)];

    let mut sizes: Vec<f32> = vec![0.0];
    sizes.extend(scanned.iter().flat_map(|p| p.runs.iter().map(|r| r.font_size)));
    sizes.sort_by(f32::total_cmp);
    let top1 = sizes[sizes.len() - 1];
    let top2 = if sizes.len() >= 2 { sizes[sizes.len() - 2] } else { top1 };
    trace!("Largest font sizes: {:?}", &sizes[sizes.len().saturating_sub(10)..]);

    let mut fragments: Vec<&str> = Vec::new();
    let mut title_page: Option<usize> = None;

    for (page_idx, page) in scanned.iter().enumerate() {
        for run in &page.runs {
            let near_top = (run.font_size - top1).abs() < FONT_SIZE_TOLERANCE
                || (run.font_size - top2).abs() < FONT_SIZE_TOLERANCE;
            if !near_top
                || run.text.chars().count() <= MIN_FRAGMENT_CHARS
                || run.text.contains("arXiv")
            {
                continue;
            }
            match title_page {
                None => {
                    title_page = Some(page_idx);
                    fragments.push(&run.text);
                }
                Some(p) if p == page_idx => fragments.push(&run.text),
                Some(_) => {}
            }
        }
    }

    ResolvedTitle {
        title: fragments.join(" ").replace('\n', " "),
        page: title_page.unwrap_or(0),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::paper::layout::TextRun;

    fn page(runs: &[(f32, &str)]) -> PageLayout {
        PageLayout {
            text: String::new(),
            runs: runs
                .iter()
                .map(|(size, text)| TextRun { text: text.to_string(), font_size: *size })
                .collect(),
        }
    }

    #[test]
    fn test_joins_largest_runs_on_first_page() {
        let pages = vec![page(&[
            (17.2, "Attention Is All"),
            (17.2, "You Need"),
            (11.0, "Ashish Vaswani"),
            (9.0, "Abstract"),
        ])];
        let resolved = resolve_title(&pages);
        assert_eq!(resolved.title, "Attention Is All You Need");
        assert_eq!(resolved.page, 0);
    }

    #[test]
    fn test_second_largest_size_also_counts() {
        let pages = vec![page(&[(20.0, "Main Title"), (19.8, "Subtitle line"), (10.0, "Body text")])];
        assert_eq!(resolve_title(&pages).title, "Main Title Subtitle line");
    }

    #[test]
    fn test_skips_short_and_arxiv_runs() {
        let pages = vec![page(&[
            (24.0, "arXiv:2301.00001v1 [cs.CL] 1 Jan 2023"),
            (24.0, "Tiny"),
            (24.0, "Graph Networks Revisited"),
        ])];
        assert_eq!(resolve_title(&pages).title, "Graph Networks Revisited");
    }

    #[test]
    fn test_later_page_fragments_are_not_appended() {
        // Known limitation: only the earliest page's near-max runs are used,
        // even when a later page has an equally large run.
        let pages = vec![
            page(&[(10.0, "Some header")]),
            page(&[(18.0, "Real Paper Title")]),
            page(&[(18.0, "Appendix Heading")]),
        ];
        let resolved = resolve_title(&pages);
        assert_eq!(resolved.title, "Real Paper Title");
        assert_eq!(resolved.page, 1);
    }

    #[test]
    fn test_newlines_replaced() {
        let pages = vec![page(&[(16.0, "Line one\nline two")])];
        assert_eq!(resolve_title(&pages).title, "Line one line two");
    }

    #[test]
    fn test_pages_beyond_scan_window_ignored() {
        let mut pages: Vec<PageLayout> = (0..TITLE_SCAN_PAGES).map(|_| page(&[])).collect();
        pages.push(page(&[(30.0, "Far away title")]));
        let resolved = resolve_title(&pages);
        assert_eq!(resolved, ResolvedTitle::default());
    }
}
