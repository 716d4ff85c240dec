use backoff::future::retry;
use chrono::{DateTime, Local};
use log::{debug, info, warn};
use once_cell::sync::Lazy;
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use reqwest::Client;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tokio::task::JoinSet;

use crate::error::PaperError;
use crate::export::{sanitize_title, timestamp};
use crate::paper::Paper;
use crate::retry::RetryPolicy;

pub mod biorxiv;

pub const DEFAULT_ARXIV_BASE: &str = "http://export.arxiv.org";

static HTTP_CLIENT: Lazy<Client> = Lazy::new(Client::new);

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SortCriterion {
    #[default]
    Relevance,
    LastUpdatedDate,
    SubmittedDate,
}

impl SortCriterion {
    fn as_query(self) -> &'static str {
        match self {
            SortCriterion::Relevance => "relevance",
            SortCriterion::LastUpdatedDate => "lastUpdatedDate",
            SortCriterion::SubmittedDate => "submittedDate",
        }
    }
}

impl FromStr for SortCriterion {
    type Err = String;

    /// Unknown names fall back to relevance.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "LastUpdatedDate" | "lastUpdatedDate" => SortCriterion::LastUpdatedDate,
            "SubmittedDate" | "submittedDate" => SortCriterion::SubmittedDate,
            _ => SortCriterion::Relevance,
        })
    }
}

/// One search hit: an `<entry>` of an arXiv Atom feed or a bioRxiv record.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FeedEntry {
    pub title: String,
    pub summary: String,
    pub authors: Vec<String>,
    pub entry_id: String,
    pub pdf_url: String,
    pub updated: String,
}

impl FeedEntry {
    /// Link to the PDF, derived from the abstract URL when the feed has none.
    pub fn pdf_link(&self) -> String {
        if !self.pdf_url.is_empty() {
            return self.pdf_url.clone();
        }
        self.entry_id.replacen("/abs/", "/pdf/", 1)
    }
}

fn attribute(e: &BytesStart, name: &[u8]) -> Option<String> {
    e.attributes()
        .flatten()
        .find(|a| a.key.as_ref() == name)
        .and_then(|a| a.unescape_value().ok().map(|v| v.into_owned()))
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Field {
    None,
    Id,
    Updated,
    Title,
    Summary,
    AuthorName,
}

/// Parse an arXiv Atom feed into entries, in feed order.
pub fn parse_feed(xml: &str) -> Result<Vec<FeedEntry>, PaperError> {
    let mut entries = Vec::new();
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut current: Option<FeedEntry> = None;
    let mut field = Field::None;
    let mut text = String::new();
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(ref e)) => {
                match e.local_name().as_ref() {
                    b"entry" => current = Some(FeedEntry::default()),
                    b"id" if current.is_some() => field = Field::Id,
                    b"updated" if current.is_some() => field = Field::Updated,
                    b"title" if current.is_some() => field = Field::Title,
                    b"summary" if current.is_some() => field = Field::Summary,
                    b"name" if current.is_some() => field = Field::AuthorName,
                    _ => {}
                }
                text.clear();
            }
            Ok(Event::Empty(ref e)) => {
                if let (Some(entry), b"link") = (current.as_mut(), e.local_name().as_ref()) {
                    let is_pdf = attribute(e, b"title").as_deref() == Some("pdf")
                        || attribute(e, b"type").as_deref() == Some("application/pdf");
                    if is_pdf {
                        entry.pdf_url = attribute(e, b"href").unwrap_or_default();
                    }
                }
            }
            Ok(Event::Text(ref e)) => {
                if field != Field::None {
                    let chunk = e
                        .unescape()
                        .map_err(|err| PaperError::FeedParse(err.to_string()))?;
                    text.push_str(&chunk);
                }
            }
            Ok(Event::CData(ref e)) => {
                if field != Field::None {
                    text.push_str(&String::from_utf8_lossy(e));
                }
            }
            Ok(Event::End(ref e)) => {
                if e.local_name().as_ref() == b"entry" {
                    if let Some(entry) = current.take() {
                        entries.push(entry);
                    }
                } else if let Some(entry) = current.as_mut() {
                    match field {
                        Field::Id => entry.entry_id = text.trim().to_string(),
                        Field::Updated => entry.updated = text.trim().to_string(),
                        Field::Title => entry.title = collapse_whitespace(&text),
                        Field::Summary => entry.summary = text.trim().to_string(),
                        Field::AuthorName => entry.authors.push(text.trim().to_string()),
                        Field::None => {}
                    }
                }
                field = Field::None;
                text.clear();
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(PaperError::FeedParse(e.to_string())),
            _ => {}
        }
        buf.clear();
    }

    Ok(entries)
}

/// Join hyphenated line breaks and unwrap the remaining lines.
pub fn normalize_abstract(summary: &str) -> String {
    summary.replace("-\n", "-").replace('\n', " ")
}

/// Keep entries whose abstract mentions every key, ignoring case.
pub fn filter_entries(entries: Vec<FeedEntry>, keys: &[String]) -> Vec<FeedEntry> {
    if keys.is_empty() {
        return entries;
    }
    let keys: Vec<String> = keys.iter().map(|k| k.to_lowercase()).collect();
    entries
        .into_iter()
        .filter(|entry| {
            let abstract_text = normalize_abstract(&entry.summary).to_lowercase();
            keys.iter().all(|k| abstract_text.contains(k.as_str()))
        })
        .collect()
}

/// `<root>/pdf_files/<query[:25]>-<YYYY-MM-DD-HH>`
pub fn download_dir(root: &Path, query: &str, now: &DateTime<Local>) -> PathBuf {
    let cleaned = query
        .replace("au:", "")
        .replace("title: ", "")
        .replace("ti: ", "")
        .replace(':', " ");
    let short: String = cleaned.chars().take(25).collect();
    root.join("pdf_files")
        .join(format!("{}-{}", short, timestamp(now)))
}

/// Downloads PDFs for feed entries and loads them as papers.
#[derive(Debug, Clone, Default)]
pub struct PdfFetcher {
    host: Option<String>,
    retry: RetryPolicy,
}

impl PdfFetcher {
    pub fn new(retry: RetryPolicy) -> Self {
        Self { host: None, retry }
    }

    /// Send every PDF request to `host`, keeping the path of the entry's link.
    pub fn rebased(mut self, host: impl Into<String>) -> Self {
        self.host = Some(host.into().trim_end_matches('/').to_string());
        self
    }

    /// Fetch one entry's PDF into `dir`, retrying transient failures.
    pub async fn download_pdf(&self, entry: &FeedEntry, dir: &Path) -> Result<PathBuf, PaperError> {
        let url = self.rebase(&entry.pdf_link());
        let path = dir.join(format!("{}.pdf", sanitize_title(&entry.title)));

        let operation = || async {
            debug!("Downloading {}", url);
            let response = HTTP_CLIENT
                .get(&url)
                .send()
                .await
                .map_err(|e| backoff::Error::transient(PaperError::NetworkError(e)))?;
            let status = response.status();
            if !status.is_success() {
                let err = PaperError::ApiError(format!("PDF download returned status {}", status));
                return Err(if status.is_server_error() || status.as_u16() == 429 {
                    backoff::Error::transient(err)
                } else {
                    backoff::Error::permanent(err)
                });
            }
            response
                .bytes()
                .await
                .map_err(|e| backoff::Error::transient(PaperError::NetworkError(e)))
        };

        let bytes = retry(self.retry.backoff(), operation).await?;
        tokio::fs::write(&path, &bytes).await?;
        info!("Saved {}", path.display());
        Ok(path)
    }

    fn rebase(&self, url: &str) -> String {
        let Some(host) = &self.host else {
            return url.to_string();
        };
        match url.find("://").and_then(|i| url[i + 3..].find('/').map(|j| i + 3 + j)) {
            Some(path_start) => format!("{}{}", host, &url[path_start..]),
            None => url.to_string(),
        }
    }

    /// Download and parse every entry concurrently. Failed entries are
    /// logged and skipped; the rest keep feed order.
    pub async fn download_all(
        &self,
        entries: Vec<FeedEntry>,
        dir: &Path,
    ) -> Result<Vec<Paper>, PaperError> {
        tokio::fs::create_dir_all(dir).await?;
        info!("All papers: {}", entries.len());

        let mut tasks = JoinSet::new();
        for (index, entry) in entries.into_iter().enumerate() {
            let fetcher = self.clone();
            let dir = dir.to_path_buf();
            tasks.spawn(async move {
                let path = fetcher.download_pdf(&entry, &dir).await?;
                Paper::builder(path)
                    .title(entry.title)
                    .url(entry.entry_id)
                    .abstract_text(normalize_abstract(&entry.summary))
                    .authors(entry.authors)
                    .load()
                    .map(|paper| (index, paper))
            });
        }

        let mut papers = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(Ok(found)) => papers.push(found),
                Ok(Err(e)) => warn!("download_error: {}", e),
                Err(e) => warn!("download task failed: {}", e),
            }
        }
        papers.sort_by_key(|(index, _)| *index);
        Ok(papers.into_iter().map(|(_, paper)| paper).collect())
    }
}

/// Client for the arXiv export API.
#[derive(Debug, Clone)]
pub struct ArxivClient {
    base_url: String,
    fetcher: PdfFetcher,
}

impl Default for ArxivClient {
    fn default() -> Self {
        Self::new(DEFAULT_ARXIV_BASE)
    }
}

impl ArxivClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        // PDF links in the feed point at arxiv.org; a custom host serves them too.
        let fetcher = if base_url == DEFAULT_ARXIV_BASE {
            PdfFetcher::default()
        } else {
            PdfFetcher::default().rebased(base_url.as_str())
        };
        Self { base_url, fetcher }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.fetcher.retry = retry;
        self
    }

    pub async fn search(
        &self,
        query: &str,
        max_results: usize,
        sort: SortCriterion,
    ) -> Result<Vec<FeedEntry>, PaperError> {
        let url = format!("{}/api/query", self.base_url);
        info!("Querying arXiv: {} (max {} results)", query, max_results);
        let max_results = max_results.to_string();
        let response = HTTP_CLIENT
            .get(&url)
            .query(&[
                ("search_query", query),
                ("start", "0"),
                ("max_results", max_results.as_str()),
                ("sortBy", sort.as_query()),
                ("sortOrder", "descending"),
            ])
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(PaperError::ApiError(format!(
                "arXiv API returned status {}",
                response.status()
            )));
        }
        let body = response.text().await?;
        let entries = parse_feed(&body)?;
        for (index, entry) in entries.iter().enumerate() {
            debug!("index={}, title={} {}", index, entry.title, entry.updated);
        }
        Ok(entries)
    }

    pub async fn download_pdf(&self, entry: &FeedEntry, dir: &Path) -> Result<PathBuf, PaperError> {
        self.fetcher.download_pdf(entry, dir).await
    }

    pub async fn download_all(
        &self,
        entries: Vec<FeedEntry>,
        dir: &Path,
    ) -> Result<Vec<Paper>, PaperError> {
        self.fetcher.download_all(entries, dir).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    const FEED: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<feed xmlns="http://www.w3.org/2005/Atom">
  <title type="html">ArXiv Query</title>
  <id>http://arxiv.org/api/abc</id>
  <entry>
    <id>http://arxiv.org/abs/2301.00001v1</id>
    <updated>2023-01-02T00:00:00Z</updated>
    <title>Robots that
      Chat &amp; Plan</title>
    <summary>We study chat-
based robot planning.
It works.</summary>
    <author><name>Ada Lovelace</name></author>
    <author><name>Alan Turing</name></author>
    <link href="http://arxiv.org/abs/2301.00001v1" rel="alternate" type="text/html"/>
    <link title="pdf" href="http://arxiv.org/pdf/2301.00001v1" rel="related" type="application/pdf"/>
  </entry>
  <entry>
    <id>http://arxiv.org/abs/2301.00002v1</id>
    <updated>2023-01-03T00:00:00Z</updated>
    <title>Another Paper</title>
    <summary>Nothing about planning.</summary>
    <author><name>Grace Hopper</name></author>
  </entry>
</feed>"#;

    #[test]
    fn test_parse_feed() {
        let entries = parse_feed(FEED).unwrap();
        assert_eq!(entries.len(), 2);
        let first = &entries[0];
        assert_eq!(first.title, "Robots that Chat & Plan");
        assert_eq!(first.entry_id, "http://arxiv.org/abs/2301.00001v1");
        assert_eq!(first.authors, vec!["Ada Lovelace", "Alan Turing"]);
        assert_eq!(first.pdf_link(), "http://arxiv.org/pdf/2301.00001v1");
        assert_eq!(first.updated, "2023-01-02T00:00:00Z");
        // No pdf link in the feed: derived from the id.
        assert_eq!(entries[1].pdf_link(), "http://arxiv.org/pdf/2301.00002v1");
    }

    #[test]
    fn test_normalize_abstract() {
        assert_eq!(
            normalize_abstract("We study chat-\nbased robot planning.\nIt works."),
            "We study chat-based robot planning. It works."
        );
    }

    #[test]
    fn test_filter_requires_every_key() {
        let entries = parse_feed(FEED).unwrap();
        let kept = filter_entries(entries.clone(), &["ROBOT".to_string(), "chat-based".to_string()]);
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].title, "Robots that Chat & Plan");

        assert_eq!(filter_entries(entries.clone(), &[]).len(), 2);
        assert!(filter_entries(entries, &["robot".into(), "quantum".into()]).is_empty());
    }

    #[test]
    fn test_download_dir_name() {
        let now = Local.with_ymd_and_hms(2023, 5, 1, 14, 30, 0).unwrap();
        let dir = download_dir(Path::new("/tmp/out"), "ti: large language models for robotics", &now);
        assert_eq!(
            dir,
            PathBuf::from("/tmp/out/pdf_files/large language models for-2023-05-01-14")
        );
    }

    #[test]
    fn test_sort_criterion_names() {
        assert_eq!("LastUpdatedDate".parse::<SortCriterion>().unwrap(), SortCriterion::LastUpdatedDate);
        assert_eq!("anything".parse::<SortCriterion>().unwrap(), SortCriterion::Relevance);
    }

    #[test]
    fn test_rebase_to_custom_host() {
        let client = ArxivClient::new("http://127.0.0.1:1234/");
        assert_eq!(
            client.fetcher.rebase("http://arxiv.org/pdf/2301.00001v1"),
            "http://127.0.0.1:1234/pdf/2301.00001v1"
        );
        let default = ArxivClient::default();
        assert_eq!(default.fetcher.rebase("http://arxiv.org/pdf/x"), "http://arxiv.org/pdf/x");
    }
}
