//! bioRxiv and medRxiv listings from the `details` endpoint of
//! api.biorxiv.org, mapped onto [`FeedEntry`] so the rest of the pipeline
//! treats them like arXiv hits.

use backoff::future::retry;
use chrono::{DateTime, Local, NaiveDate};
use log::{debug, info};
use serde::Deserialize;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use super::{collapse_whitespace, FeedEntry, PdfFetcher, HTTP_CLIENT};
use crate::error::PaperError;
use crate::export::timestamp;
use crate::paper::Paper;
use crate::retry::RetryPolicy;

pub const DEFAULT_BIORXIV_API: &str = "https://api.biorxiv.org";

/// Records the details endpoint returns per page.
const PAGE_SIZE: usize = 100;

/// Subject collections offered by bioRxiv.
pub const CATEGORIES: &[&str] = &[
    "animal behavior and cognition",
    "biochemistry",
    "bioengineering",
    "bioinformatics",
    "biophysics",
    "cancer biology",
    "cell biology",
    "clinical trials",
    "developmental biology",
    "ecology",
    "epidemiology",
    "evolutionary biology",
    "genetics",
    "genomics",
    "immunology",
    "microbiology",
    "molecular biology",
    "neuroscience",
    "paleontology",
    "pathology",
    "pharmacology and toxicology",
    "physiology",
    "plant biology",
    "scientific communication and education",
    "synthetic biology",
    "systems biology",
    "zoology",
];

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum PreprintServer {
    #[default]
    Biorxiv,
    Medrxiv,
}

impl PreprintServer {
    fn as_path(self) -> &'static str {
        match self {
            PreprintServer::Biorxiv => "biorxiv",
            PreprintServer::Medrxiv => "medrxiv",
        }
    }

    /// Site hosting the full-text PDFs.
    pub fn content_base(self) -> &'static str {
        match self {
            PreprintServer::Biorxiv => "https://www.biorxiv.org",
            PreprintServer::Medrxiv => "https://www.medrxiv.org",
        }
    }
}

impl FromStr for PreprintServer {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "biorxiv" => Ok(PreprintServer::Biorxiv),
            "medrxiv" => Ok(PreprintServer::Medrxiv),
            other => Err(format!("unknown server '{}', expected biorxiv or medrxiv", other)),
        }
    }
}

/// Posting window: the last N days, or an inclusive date range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interval {
    Days(u32),
    Range { start: NaiveDate, end: NaiveDate },
}

impl Default for Interval {
    fn default() -> Self {
        Interval::Days(2)
    }
}

impl fmt::Display for Interval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Interval::Days(days) => write!(f, "{}d", days),
            Interval::Range { start, end } => {
                write!(f, "{}/{}", start.format("%Y-%m-%d"), end.format("%Y-%m-%d"))
            }
        }
    }
}

impl FromStr for Interval {
    type Err = String;

    /// `YYYY-MM-DD:YYYY-MM-DD`, or a day count.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if let Some((start, end)) = s.split_once(':') {
            let parse = |d: &str| {
                NaiveDate::parse_from_str(d.trim(), "%Y-%m-%d")
                    .map_err(|e| format!("invalid date '{}': {}", d, e))
            };
            let (start, end) = (parse(start)?, parse(end)?);
            if start > end {
                return Err(format!("start date {} is after end date {}", start, end));
            }
            return Ok(Interval::Range { start, end });
        }
        s.parse::<u32>()
            .map(Interval::Days)
            .map_err(|_| format!("expected START:END dates or a day count, got '{}'", s))
    }
}

#[derive(Debug, Deserialize)]
struct DetailsPage {
    #[serde(default)]
    collection: Vec<Record>,
}

#[derive(Debug, Deserialize)]
struct Record {
    doi: String,
    title: String,
    #[serde(default)]
    authors: String,
    #[serde(default)]
    date: String,
    #[serde(default)]
    version: serde_json::Value,
    #[serde(default)]
    category: String,
    #[serde(default, rename = "abstract")]
    abstract_text: String,
}

/// `Surname, A.; Other, B.` lists use `;`; anything else is split on `,`.
pub fn split_authors(authors: &str) -> Vec<String> {
    let separator = if authors.contains(';') { ';' } else { ',' };
    authors
        .split(separator)
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .map(str::to_string)
        .collect()
}

impl Record {
    fn version(&self) -> String {
        match &self.version {
            serde_json::Value::String(v) => v.clone(),
            serde_json::Value::Number(v) => v.to_string(),
            _ => "1".to_string(),
        }
    }

    fn into_entry(self, content_base: &str) -> FeedEntry {
        let doi = self.doi.replace('\\', "");
        let pdf_url = format!("{}/content/{}v{}.full.pdf", content_base, doi, self.version());
        FeedEntry {
            title: collapse_whitespace(&self.title),
            summary: self.abstract_text.trim().to_string(),
            authors: split_authors(&self.authors),
            entry_id: format!("https://doi.org/{}", doi),
            pdf_url,
            updated: self.date,
        }
    }
}

fn in_categories(record: &Record, categories: &[String]) -> bool {
    categories.is_empty()
        || categories
            .iter()
            .any(|c| c.trim().eq_ignore_ascii_case(record.category.trim()))
}

/// `<root>/pdf_files/<categories joined by '-'>-<YYYY-MM-DD-HH>`
pub fn download_dir(root: &Path, categories: &[String], now: &DateTime<Local>) -> PathBuf {
    root.join("pdf_files")
        .join(format!("{}-{}", categories.join("-"), timestamp(now)))
}

/// Client for the bioRxiv/medRxiv details API.
#[derive(Debug, Clone)]
pub struct BiorxivClient {
    api_base: String,
    content_base: String,
    server: PreprintServer,
    retry: RetryPolicy,
}

impl Default for BiorxivClient {
    fn default() -> Self {
        Self::new(PreprintServer::default())
    }
}

impl BiorxivClient {
    pub fn new(server: PreprintServer) -> Self {
        Self {
            api_base: DEFAULT_BIORXIV_API.to_string(),
            content_base: server.content_base().to_string(),
            server,
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_content_base(mut self, content_base: impl Into<String>) -> Self {
        self.content_base = content_base.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Preprints posted in `interval`, newest listing order preserved, keeping
    /// only `categories` when any are given and at most `max_results`.
    pub async fn search(
        &self,
        interval: Interval,
        categories: &[String],
        max_results: usize,
    ) -> Result<Vec<FeedEntry>, PaperError> {
        info!(
            "Querying {}: {} (categories {:?}, max {} results)",
            self.server.as_path(),
            interval,
            categories,
            max_results
        );

        let mut entries = Vec::new();
        let mut cursor = 0;
        while entries.len() < max_results {
            let page = self.fetch_page(interval, cursor).await?;
            let fetched = page.collection.len();
            entries.extend(
                page.collection
                    .into_iter()
                    .filter(|record| in_categories(record, categories))
                    .map(|record| record.into_entry(&self.content_base)),
            );
            if fetched < PAGE_SIZE {
                break;
            }
            cursor += fetched;
        }
        entries.truncate(max_results);

        for (index, entry) in entries.iter().enumerate() {
            debug!("index={}, title={} {}", index, entry.title, entry.updated);
        }
        Ok(entries)
    }

    async fn fetch_page(&self, interval: Interval, cursor: usize) -> Result<DetailsPage, PaperError> {
        let url = format!(
            "{}/details/{}/{}/{}",
            self.api_base,
            self.server.as_path(),
            interval,
            cursor
        );

        let operation = || async {
            debug!("GET {}", url);
            let response = HTTP_CLIENT
                .get(&url)
                .send()
                .await
                .map_err(|e| backoff::Error::transient(PaperError::NetworkError(e)))?;
            let status = response.status();
            if !status.is_success() {
                let err = PaperError::ApiError(format!("bioRxiv API returned status {}", status));
                return Err(if status.is_server_error() || status.as_u16() == 429 {
                    backoff::Error::transient(err)
                } else {
                    backoff::Error::permanent(err)
                });
            }
            response
                .text()
                .await
                .map_err(|e| backoff::Error::transient(PaperError::NetworkError(e)))
        };

        let body = retry(self.retry.backoff(), operation).await?;
        serde_json::from_str(body.trim()).map_err(|e| PaperError::FeedParse(e.to_string()))
    }

    /// Download and parse every entry; see [`PdfFetcher::download_all`].
    pub async fn download_all(
        &self,
        entries: Vec<FeedEntry>,
        dir: &Path,
    ) -> Result<Vec<Paper>, PaperError> {
        PdfFetcher::new(self.retry).download_all(entries, dir).await
    }
}
