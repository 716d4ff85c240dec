use log::debug;
use std::sync::Arc;
use tiktoken_rs::CoreBPE;

use crate::error::PaperError;

/// Context window of the chat model, in tokens.
pub const MAX_TOKENS: usize = 4096;

/// Counts model tokens in a piece of text.
pub trait TokenCounter: Send + Sync {
    fn count(&self, text: &str) -> usize;
}

/// GPT-2 byte-pair encoding (`r50k_base` shares its merges).
pub struct Gpt2Counter {
    bpe: CoreBPE,
}

impl Gpt2Counter {
    pub fn new() -> Result<Self, PaperError> {
        let bpe = tiktoken_rs::r50k_base().map_err(|e| PaperError::Tokenizer(e.to_string()))?;
        Ok(Self { bpe })
    }
}

impl TokenCounter for Gpt2Counter {
    fn count(&self, text: &str) -> usize {
        self.bpe.encode_ordinary(text).len()
    }
}

/// Clips prompt text so it fits the context window next to a reservation.
#[derive(Clone)]
pub struct TokenBudget {
    counter: Arc<dyn TokenCounter>,
    max_tokens: usize,
}

impl TokenBudget {
    pub fn new(counter: Arc<dyn TokenCounter>) -> Self {
        Self {
            counter,
            max_tokens: MAX_TOKENS,
        }
    }

    /// Budget against a context window other than the default.
    pub fn with_max_tokens(counter: Arc<dyn TokenCounter>, max_tokens: usize) -> Self {
        Self { counter, max_tokens }
    }

    pub fn gpt2() -> Result<Self, PaperError> {
        Ok(Self::new(Arc::new(Gpt2Counter::new()?)))
    }

    pub fn max_tokens(&self) -> usize {
        self.max_tokens
    }

    pub fn count(&self, text: &str) -> usize {
        self.counter.count(text)
    }

    /// Keep the character prefix proportional to the tokens still available
    /// once `reserved` tokens are set aside.
    pub fn clip<'a>(&self, text: &'a str, reserved: usize) -> &'a str {
        let tokens = self.counter.count(text);
        if text.is_empty() || tokens == 0 {
            return text;
        }
        let chars = text.chars().count();
        let available = self.max_tokens.saturating_sub(reserved);
        let clip_index = (chars * available / tokens).min(chars);
        debug!(
            "Clipping prompt: {} tokens, {} chars, reserved {}, keeping {} chars",
            tokens, chars, reserved, clip_index
        );
        match text.char_indices().nth(clip_index) {
            Some((byte_idx, _)) => &text[..byte_idx],
            None => text,
        }
    }
}
