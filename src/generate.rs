//! Draft response generation from matched prior records.
//!
//! Builds a seed conversation that replays each matched record as one user
//! turn (its input) followed by one assistant turn (its output) — the chat
//! history the model is meant to imitate — and asks for a single
//! non-streamed completion with the new incoming text as the final prompt.
//!
//! Returns `None` (never an error) when the capability is not ready or
//! generation fails; the caller treats that as "fall back to a manual
//! reply".

use std::sync::Arc;

use crate::config::ModelConfig;
use crate::llm::LanguageModel;
use crate::models::{ChatTurn, Record, SamplingParams};

const GENERATOR_INSTRUCTION: &str = "You draft email replies. Answer the new email strictly in \
    the style and substance of the example replies in this conversation. If the examples do not \
    cover the question, keep the reply short and neutral.";

pub struct ResponseGenerator {
    model: Arc<dyn LanguageModel>,
    params: SamplingParams,
}

impl ResponseGenerator {
    pub fn new(model: Arc<dyn LanguageModel>, config: &ModelConfig) -> Self {
        Self {
            model,
            params: SamplingParams {
                temperature: config.temperature,
                top_k: config.top_k,
            },
        }
    }

    /// Draft a reply to `query` imitating the matched records.
    pub async fn generate(&self, query: &str, matches: &[Record]) -> Option<String> {
        if !self.model.availability().await.is_ready() {
            return None;
        }

        let mut seed = Vec::with_capacity(1 + matches.len() * 2);
        seed.push(ChatTurn::system(GENERATOR_INSTRUCTION));
        for record in matches {
            seed.push(ChatTurn::user(record.input.clone()));
            seed.push(ChatTurn::assistant(record.output.clone()));
        }

        let session = self.model.open_session(&seed, self.params).await.ok()?;
        session.prompt(query).await.ok()
    }
}
