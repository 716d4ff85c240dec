use log::{debug, warn};
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::error::PaperError;

/// Keys this short are treated as placeholders and dropped.
pub const MIN_KEY_LEN: usize = 20;

/// First three characters of a key followed by `***`.
pub fn mask_key(key: &str) -> String {
    let prefix: String = key.chars().take(3).collect();
    format!("{}***", prefix)
}

/// Round-robin pool of chat API keys.
///
/// The cursor wraps back to the first key once it reaches the last index,
/// so with more than one key the final key is never handed out.
#[derive(Debug)]
pub struct ChatApiPool {
    keys: Vec<String>,
    cursor: AtomicUsize,
}

impl ChatApiPool {
    pub fn new<I, S>(keys: I) -> Result<Self, PaperError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut valid = Vec::new();
        for key in keys {
            let key = key.as_ref().trim();
            if key.chars().count() > MIN_KEY_LEN {
                valid.push(key.to_string());
            } else {
                warn!("Ignoring API key {}: too short ({} chars)", mask_key(key), key.chars().count());
            }
        }
        if valid.is_empty() {
            return Err(PaperError::Config(
                "no usable API key; add one with `papersum config OPENAI_API_KEY=...`".to_string(),
            ));
        }
        debug!("Loaded {} API keys", valid.len());
        Ok(Self {
            keys: valid,
            cursor: AtomicUsize::new(0),
        })
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    pub fn cursor(&self) -> usize {
        self.cursor.load(Ordering::SeqCst)
    }

    /// Hand out the key under the cursor and advance it.
    pub fn next_key(&self) -> &str {
        let wrap_at = self.keys.len().saturating_sub(1);
        let previous = self
            .cursor
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |cur| {
                let next = cur + 1;
                Some(if next >= wrap_at { 0 } else { next })
            })
            .unwrap_or_else(|cur| cur);
        &self.keys[previous.min(self.keys.len() - 1)]
    }
}
