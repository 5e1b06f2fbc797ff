//! Summarization adapter over the language model capability.
//!
//! Reduces long captured text to a short or detailed form before it is
//! stored or ranked. The adapter acquires one long-lived session lazily:
//! a successful acquisition is cached and reused, a failed one leaves the
//! cell empty so the next call probes the capability again. It degrades
//! gracefully: if the capability is not ready, session creation fails, or
//! the model returns nothing, the input text comes back unchanged.
//! Summarization never fails.

use std::sync::Arc;
use tokio::sync::OnceCell;

use crate::llm::{LanguageModel, ModelSession};
use crate::models::{ChatTurn, SamplingParams};

const SUMMARIZER_ROLE: &str =
    "You are a summarizer for email text. Reply with the summary only, no preamble.";

const SHORT_INSTRUCTION: &str = "Summarize the following text into brief key points:";
const FULL_INSTRUCTION: &str =
    "Summarize the following text in detail, preserving the meaning and clarity:";

/// How much of the original text the summary should keep.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Detail {
    Short,
    Full,
}

/// Session acquisition failed; the cell stays empty so the next call can
/// try again once the capability comes up.
struct SessionUnavailable;

pub struct Summarizer {
    model: Arc<dyn LanguageModel>,
    session: OnceCell<Arc<dyn ModelSession>>,
}

impl Summarizer {
    pub fn new(model: Arc<dyn LanguageModel>) -> Self {
        Self {
            model,
            session: OnceCell::new(),
        }
    }

    /// Summarize `text` at the requested detail level.
    ///
    /// Returns the input unchanged when the capability is not ready or the
    /// summary comes back empty.
    pub async fn summarize(&self, text: &str, detail: Detail) -> String {
        if text.trim().is_empty() {
            return text.to_string();
        }

        let session = match self
            .session
            .get_or_try_init(|| async { self.open_session().await })
            .await
        {
            Ok(s) => s,
            Err(SessionUnavailable) => return text.to_string(),
        };

        let instruction = match detail {
            Detail::Short => SHORT_INSTRUCTION,
            Detail::Full => FULL_INSTRUCTION,
        };

        match session.prompt(&format!("{}\n\n{}", instruction, text)).await {
            Ok(summary) => {
                let summary = summary.trim();
                if summary.is_empty() {
                    text.to_string()
                } else {
                    summary.to_string()
                }
            }
            Err(_) => text.to_string(),
        }
    }

    async fn open_session(&self) -> Result<Arc<dyn ModelSession>, SessionUnavailable> {
        if !self.model.availability().await.is_ready() {
            return Err(SessionUnavailable);
        }

        let seed = [ChatTurn::system(SUMMARIZER_ROLE)];
        let params = SamplingParams {
            temperature: 0.3,
            top_k: 40,
        };

        match self.model.open_session(&seed, params).await {
            Ok(session) => Ok(Arc::from(session)),
            Err(_) => Err(SessionUnavailable),
        }
    }
}
