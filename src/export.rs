use chrono::{DateTime, Local};
use log::{debug, info, trace, warn};
use std::fmt;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use crate::error::PaperError;

/// Longest title prefix used in an export file name.
const MAX_TITLE_CHARS: usize = 80;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ExportFormat {
    #[default]
    Md,
    Txt,
    Pdf,
    Tex,
}

impl ExportFormat {
    pub fn extension(self) -> &'static str {
        match self {
            ExportFormat::Md => "md",
            ExportFormat::Txt => "txt",
            ExportFormat::Pdf => "pdf",
            ExportFormat::Tex => "tex",
        }
    }

    fn needs_pandoc(self) -> bool {
        matches!(self, ExportFormat::Pdf | ExportFormat::Tex)
    }
}

impl FromStr for ExportFormat {
    type Err = PaperError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim_start_matches('.').to_ascii_lowercase().as_str() {
            "md" => Ok(ExportFormat::Md),
            "txt" => Ok(ExportFormat::Txt),
            "pdf" => Ok(ExportFormat::Pdf),
            "tex" => Ok(ExportFormat::Tex),
            other => Err(PaperError::UnsupportedFormat(other.to_string())),
        }
    }
}

impl fmt::Display for ExportFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

/// Replace characters that are not allowed in file names with `_`.
pub fn sanitize_title(title: &str) -> String {
    title
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            other => other,
        })
        .collect()
}

/// Hour-resolution stamp used in output names, e.g. `2023-05-01-14`.
pub fn timestamp(now: &DateTime<Local>) -> String {
    now.format("%Y-%m-%d-%H").to_string()
}

/// `<root>/export/<stamp>-<title[:80]>.<ext>`
pub fn export_path(root: &Path, title: &str, now: &DateTime<Local>, format: ExportFormat) -> PathBuf {
    let short: String = title.chars().take(MAX_TITLE_CHARS).collect();
    root.join("export").join(format!(
        "{}-{}.{}",
        timestamp(now),
        sanitize_title(&short),
        format.extension()
    ))
}

/// Exclusively create `path`, or the first free `<stem>-<n>.<ext>` beside it.
pub async fn reserve_unique(path: &Path) -> Result<(PathBuf, File), PaperError> {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let extension = path.extension().map(|e| e.to_string_lossy().into_owned());

    let mut candidate = path.to_path_buf();
    let mut n = 0u32;
    loop {
        match OpenOptions::new().write(true).create_new(true).open(&candidate).await {
            Ok(file) => return Ok((candidate, file)),
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                n += 1;
                let name = match &extension {
                    Some(ext) => format!("{}-{}.{}", stem, n, ext),
                    None => format!("{}-{}", stem, n),
                };
                debug!("{} exists, trying {}", candidate.display(), name);
                candidate = path.with_file_name(name);
            }
            Err(e) => return Err(PaperError::Io(e)),
        }
    }
}

async fn write_new(path: &Path, content: &str) -> Result<PathBuf, PaperError> {
    let (written, mut file) = reserve_unique(path).await?;
    file.write_all(content.as_bytes()).await?;
    file.flush().await?;
    Ok(written)
}

/// Write `content` next to `path`, converting with pandoc for pdf and tex.
///
/// An existing file is never overwritten; a numbered sibling is used instead.
/// Returns the file actually written. When conversion is impossible the
/// markdown copy is kept and returned instead.
pub async fn export(content: &str, path: &Path, format: ExportFormat) -> Result<PathBuf, PaperError> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }

    if !format.needs_pandoc() {
        let written = write_new(path, content).await?;
        info!("Exported {}", written.display());
        return Ok(written);
    }

    let (output, placeholder) = reserve_unique(path).await?;
    drop(placeholder);
    let md_path = write_new(&output.with_extension("md"), content).await?;
    match convert_with_pandoc(&md_path, &output).await {
        Ok(()) => {
            tokio::fs::remove_file(&md_path).await?;
            info!("Exported {}", output.display());
            Ok(output)
        }
        Err(e) => {
            warn!("Could not produce {} ({}), keeping {}", format, e, md_path.display());
            if let Err(e) = tokio::fs::remove_file(&output).await {
                debug!("Could not remove {}: {}", output.display(), e);
            }
            Ok(md_path)
        }
    }
}

async fn convert_with_pandoc(input: &Path, output: &Path) -> Result<(), PaperError> {
    debug!("pandoc {} -o {}", input.display(), output.display());
    let result = Command::new("pandoc").arg(input).arg("-o").arg(output).output().await;
    let out = match result {
        Ok(out) => out,
        Err(e) if e.kind() == ErrorKind::NotFound => return Err(PaperError::PandocMissing),
        Err(e) => return Err(PaperError::Io(e)),
    };
    if !out.stdout.is_empty() {
        trace!("pandoc stdout:\n{}", String::from_utf8_lossy(&out.stdout));
    }
    if out.status.success() {
        Ok(())
    } else {
        Err(PaperError::ApiError(format!(
            "pandoc exited with {}: {}",
            out.status,
            String::from_utf8_lossy(&out.stderr).trim()
        )))
    }
}
