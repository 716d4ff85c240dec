use chrono::Local;
use log::{info, trace, warn};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::task::JoinSet;
use walkdir::WalkDir;

use crate::error::PaperError;
use crate::export::{export, export_path, ExportFormat};
use crate::paper::Paper;
use crate::summary::Summarizer;

fn is_pdf(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("pdf"))
}

/// A single `.pdf` file, or every `.pdf` below a directory in path order.
pub fn collect_pdfs(path: &Path) -> Result<Vec<PathBuf>, PaperError> {
    if path.is_file() {
        return Ok(if is_pdf(path) { vec![path.to_path_buf()] } else { Vec::new() });
    }
    if !path.is_dir() {
        return Err(PaperError::Io(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            format!("{} does not exist", path.display()),
        )));
    }
    let mut pdfs: Vec<PathBuf> = WalkDir::new(path)
        .into_iter()
        .filter_map(|entry| match entry {
            Ok(entry) => Some(entry),
            Err(e) => {
                warn!("Skipping unreadable entry: {}", e);
                None
            }
        })
        .filter(|entry| entry.file_type().is_file() && is_pdf(entry.path()))
        .map(|entry| entry.into_path())
        .collect();
    pdfs.sort();
    for (index, pdf) in pdfs.iter().enumerate() {
        trace!("paper_index={}, name={:?}", index, pdf.file_name());
    }
    Ok(pdfs)
}

/// Where a paper comes from: a local file still to be parsed, or a paper
/// built from a downloaded feed entry.
pub enum PaperSource {
    Local(PathBuf),
    Loaded(Paper),
}

impl PaperSource {
    fn into_paper(self) -> Result<Paper, PaperError> {
        match self {
            PaperSource::Local(path) => Paper::open(path),
            PaperSource::Loaded(paper) => Ok(paper),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ExportOptions {
    pub root: PathBuf,
    pub format: ExportFormat,
}

/// Summarizes papers and exports one report per paper.
pub struct Pipeline {
    summarizer: Arc<Summarizer>,
    output: Arc<ExportOptions>,
}

impl Pipeline {
    pub fn new(summarizer: Summarizer, output: ExportOptions) -> Self {
        Self {
            summarizer: Arc::new(summarizer),
            output: Arc::new(output),
        }
    }

    pub fn summarizer(&self) -> &Summarizer {
        &self.summarizer
    }

    /// Process every source; failures are logged and skipped. Returns the
    /// written report files in input order.
    pub async fn run(&self, sources: Vec<PaperSource>, concurrent: bool) -> Vec<PathBuf> {
        info!("paper_num: {}", sources.len());
        let mut written: Vec<(usize, PathBuf)> = Vec::new();

        if concurrent {
            let mut tasks = JoinSet::new();
            for (index, source) in sources.into_iter().enumerate() {
                let summarizer = Arc::clone(&self.summarizer);
                let output = Arc::clone(&self.output);
                tasks.spawn(async move {
                    let result = process_one(&summarizer, &output, source, index).await;
                    result.map(|path| (index, path))
                });
            }
            while let Some(joined) = tasks.join_next().await {
                match joined {
                    Ok(Some(found)) => written.push(found),
                    Ok(None) => {}
                    Err(e) => warn!("Paper task aborted: {}", e),
                }
            }
            written.sort_by_key(|(index, _)| *index);
        } else {
            for (index, source) in sources.into_iter().enumerate() {
                if let Some(path) = process_one(&self.summarizer, &self.output, source, index).await {
                    written.push((index, path));
                }
            }
        }

        self.summarizer.log_usage();
        written.into_iter().map(|(_, path)| path).collect()
    }
}

/// Parse, summarize and export one paper, logging any failure.
async fn process_one(
    summarizer: &Summarizer,
    output: &ExportOptions,
    source: PaperSource,
    index: usize,
) -> Option<PathBuf> {
    let mut paper = match source.into_paper() {
        Ok(paper) => paper,
        Err(e) => {
            warn!("Paper {} skipped: {}", index + 1, e);
            return None;
        }
    };
    info!("Summarizing paper {}: {}", index + 1, paper.path.display());

    let report = match summarizer.summarize(&mut paper, index).await {
        Ok(report) => report,
        Err(e) => {
            warn!("Paper {} ('{}') failed: {}", index + 1, paper.title(), e);
            return None;
        }
    };
    let path = export_path(&output.root, &report.title, &Local::now(), output.format);
    match export(&report.render(), &path, output.format).await {
        Ok(written) => Some(written),
        Err(e) => {
            warn!("Paper {} could not be exported to {}: {}", index + 1, path.display(), e);
            None
        }
    }
}
