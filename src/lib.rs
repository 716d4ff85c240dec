//! Scholarly-paper triage: recover title and sections from PDFs and
//! summarize them through a chat-completion API.

pub mod config;
pub mod error;
pub mod export;
pub mod paper;
pub mod pipeline;
pub mod retry;
pub mod search;
pub mod summary;

pub use error::PaperError;
pub use paper::Paper;
