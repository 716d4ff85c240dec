pub mod budget;
pub mod client;
pub mod credentials;
pub mod prompts;

use backoff::future::retry_notify;
use log::{debug, info, trace, warn};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::error::PaperError;
use crate::paper::Paper;
use crate::retry::RetryPolicy;
use budget::TokenBudget;
use client::{ChatCompletion, ChatError, ChatMessage, ChatProvider, Usage};
use credentials::ChatApiPool;
use prompts::Language;

/// Extra tokens added on top of the reported prompt size when re-clipping.
pub const OVERFLOW_EXTRA_TOKENS: usize = 150;
/// Price estimate per 1000 tokens, in dollars.
pub const PRICE_PER_1K_TOKENS: f64 = 0.002;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Summary,
    Method,
    Conclusion,
}

impl Stage {
    pub fn name(self) -> &'static str {
        match self {
            Stage::Summary => "summary",
            Stage::Method => "method",
            Stage::Conclusion => "conclusion",
        }
    }

    /// Tokens set aside for the prompt template and the answer.
    pub fn reserved_tokens(self) -> usize {
        match self {
            Stage::Summary => 1100,
            Stage::Method | Stage::Conclusion => 800,
        }
    }

    fn overflow_margin(self) -> usize {
        match self {
            Stage::Summary => 1000,
            Stage::Method | Stage::Conclusion => 800,
        }
    }

    fn messages(self, key_words: &str, language: Language, clipped: &str) -> Vec<ChatMessage> {
        match self {
            Stage::Summary => prompts::summary_messages(key_words, language, clipped),
            Stage::Method => prompts::method_messages(key_words, language, clipped),
            Stage::Conclusion => prompts::conclusion_messages(key_words, language, clipped),
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Reservation used for the single re-clip after a context overflow.
pub fn overflow_reservation(stage: Stage, offending_tokens: usize) -> usize {
    offending_tokens + stage.overflow_margin() + OVERFLOW_EXTRA_TOKENS
}

/// Running token totals reported by the provider.
#[derive(Debug, Default)]
pub struct TokenUsage {
    prompt: AtomicU64,
    completion: AtomicU64,
    total: AtomicU64,
}

impl TokenUsage {
    pub fn record(&self, usage: &Usage) {
        self.prompt.fetch_add(usage.prompt_tokens, Ordering::Relaxed);
        self.completion.fetch_add(usage.completion_tokens, Ordering::Relaxed);
        self.total.fetch_add(usage.total_tokens, Ordering::Relaxed);
    }

    pub fn prompt_tokens(&self) -> u64 {
        self.prompt.load(Ordering::Relaxed)
    }

    pub fn completion_tokens(&self) -> u64 {
        self.completion.load(Ordering::Relaxed)
    }

    pub fn total_tokens(&self) -> u64 {
        self.total.load(Ordering::Relaxed)
    }

    pub fn estimated_price(&self) -> f64 {
        self.total_tokens() as f64 / 1000.0 * PRICE_PER_1K_TOKENS
    }
}

/// Rendered output of the three stages for one paper.
#[derive(Debug, Clone, PartialEq)]
pub struct SummaryReport {
    pub index: usize,
    pub title: String,
    pub summary: String,
    pub method: Option<String>,
    pub conclusion: String,
}

impl SummaryReport {
    pub fn render(&self) -> String {
        let mut blocks = vec![format!("## Paper:{}", self.index + 1)];
        blocks.push(self.summary.trim().to_string());
        if let Some(method) = &self.method {
            blocks.push(method.trim().to_string());
        }
        blocks.push(self.conclusion.trim().to_string());
        blocks.join("\n\n")
    }
}

impl fmt::Display for SummaryReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.render())
    }
}

/// Value of the first `Title:` line in a summary answer.
pub fn extract_title(summary: &str) -> Option<&str> {
    summary
        .lines()
        .find_map(|line| line.split_once("Title:"))
        .map(|(_, rest)| rest.trim())
        .filter(|t| !t.is_empty())
}

/// Drives the summary, method and conclusion chat stages for a paper.
pub struct Summarizer {
    provider: Arc<dyn ChatProvider>,
    pool: ChatApiPool,
    budget: TokenBudget,
    retry: RetryPolicy,
    key_words: String,
    language: Language,
    usage: TokenUsage,
}

impl Summarizer {
    pub fn new(provider: Arc<dyn ChatProvider>, pool: ChatApiPool, budget: TokenBudget) -> Self {
        Self {
            provider,
            pool,
            budget,
            retry: RetryPolicy::default(),
            key_words: String::new(),
            language: Language::default(),
            usage: TokenUsage::default(),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_key_words(mut self, key_words: impl Into<String>) -> Self {
        self.key_words = key_words.into();
        self
    }

    pub fn with_language(mut self, language: Language) -> Self {
        self.language = language;
        self
    }

    pub fn pool(&self) -> &ChatApiPool {
        &self.pool
    }

    pub fn usage(&self) -> &TokenUsage {
        &self.usage
    }

    pub fn log_usage(&self) {
        info!(
            "TOKENS: {} / PRICES: ${:.6}",
            self.usage.total_tokens(),
            self.usage.estimated_price()
        );
    }

    /// Run every stage for one paper. The paper's title is adopted from the
    /// summary answer when it was unknown.
    pub async fn summarize(&self, paper: &mut Paper, index: usize) -> Result<SummaryReport, PaperError> {
        let summary_input = format!(
            "Title:{}Url:{}Abstrat:{}Paper_info:{}{}",
            paper.title(),
            paper.url,
            paper.abstract_text(),
            paper.paper_info(),
            paper.lead_section()
        );
        let summary = self.run_stage(Stage::Summary, &summary_input).await?;
        if paper.title().is_empty() {
            if let Some(title) = extract_title(&summary) {
                paper.adopt_title(title);
            }
        }

        let method = match paper.method_section() {
            Some(section) => {
                let input = format!("<summary>{}\n\n<Methods>:\n\n{}", summary, section);
                Some(self.run_stage(Stage::Method, &input).await?)
            }
            None => {
                debug!("No method section in paper {}, skipping method stage", index + 1);
                None
            }
        };

        let mut conclusion_input = format!(
            "<summary>{}\n <Method summary>:\n{}",
            summary,
            method.as_deref().unwrap_or_default()
        );
        if let Some(section) = paper.conclusion_section() {
            conclusion_input.push_str("\n\n<Conclusion>:\n\n");
            conclusion_input.push_str(section);
        }
        let conclusion = self.run_stage(Stage::Conclusion, &conclusion_input).await?;

        Ok(SummaryReport {
            index,
            title: paper.title().to_string(),
            summary,
            method,
            conclusion,
        })
    }

    /// Clip, ask, and on a context overflow re-clip once with the reported size.
    async fn run_stage(&self, stage: Stage, text: &str) -> Result<String, PaperError> {
        let clipped = self.budget.clip(text, stage.reserved_tokens());
        let first = self
            .call_with_retry(stage, &stage.messages(&self.key_words, self.language, clipped))
            .await;

        let completion = match first {
            Ok(completion) => completion,
            Err(ChatError::ContextOverflow {
                offending_tokens: Some(offending),
            }) => {
                let reserved = overflow_reservation(stage, offending);
                warn!(
                    "{} prompt overflowed at {} tokens, re-clipping with {} reserved",
                    stage, offending, reserved
                );
                let clipped = self.budget.clip(text, reserved);
                self.call_with_retry(stage, &stage.messages(&self.key_words, self.language, clipped))
                    .await
                    .map_err(|source| PaperError::Chat {
                        stage: stage.name(),
                        source,
                    })?
            }
            Err(source) => {
                return Err(PaperError::Chat {
                    stage: stage.name(),
                    source,
                })
            }
        };

        self.usage.record(&completion.usage);
        trace!(
            "{} usage: prompt {} / completion {} / total {} in {:.2}s",
            stage,
            completion.usage.prompt_tokens,
            completion.usage.completion_tokens,
            completion.usage.total_tokens,
            completion.elapsed.as_secs_f64()
        );
        let text = prompts::format_text(&completion.text);
        trace!("{} result:\n{}", stage, text);
        Ok(text)
    }

    /// One provider call per attempt, each with the next key from the pool.
    async fn call_with_retry(
        &self,
        stage: Stage,
        messages: &[ChatMessage],
    ) -> Result<ChatCompletion, ChatError> {
        let operation = move || {
            let key = self.pool.next_key();
            async move {
                self.provider.complete(key, messages).await.map_err(|e| {
                    if e.is_transient() {
                        backoff::Error::transient(e)
                    } else {
                        backoff::Error::permanent(e)
                    }
                })
            }
        };
        let notify = |e: ChatError, wait: Duration| {
            warn!("{} call failed ({}), retrying in {:?}", stage, e, wait);
        };
        retry_notify(self.retry.backoff(), operation, notify).await
    }
}
