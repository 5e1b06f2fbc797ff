//! Suggestion pipeline: draft a reply for the conversation on screen.
//!
//! Triggered when the user navigates into a conversation view (or is
//! already in one at startup). Phases:
//!
//! `Extracting → FetchingCorpus → Ranking → Generating → Delivered`,
//! branching to a terminal no-data / no-match / generation-failed status at
//! the corresponding step.
//!
//! Every outcome, including the degraded ones, surfaces as a status event;
//! nothing escapes a run uncaught.

use anyhow::Result;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

use crate::config::Config;
use crate::extract::{self, Selectors};
use crate::generate::ResponseGenerator;
use crate::llm;
use crate::models::StatusKind;
use crate::page::{PageSource, SnapshotFile};
use crate::rank::SimilarityRanker;
use crate::status::StatusBus;
use crate::store::RecordStore;
use crate::summarize::{Detail, Summarizer};

/// Length of the incoming-text snippet included in the success payload.
const SNIPPET_CHARS: usize = 120;

pub struct SuggestPipeline {
    page: Arc<dyn PageSource>,
    selectors: Selectors,
    store: Arc<RecordStore>,
    summarizer: Arc<Summarizer>,
    ranker: SimilarityRanker,
    generator: ResponseGenerator,
    bus: Arc<StatusBus>,
    settle_delay: Duration,
    store_ready_timeout_ms: u64,
    fetch_attempts: u32,
}

impl SuggestPipeline {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: &Config,
        page: Arc<dyn PageSource>,
        selectors: Selectors,
        store: Arc<RecordStore>,
        summarizer: Arc<Summarizer>,
        ranker: SimilarityRanker,
        generator: ResponseGenerator,
        bus: Arc<StatusBus>,
    ) -> Self {
        Self {
            page,
            selectors,
            store,
            summarizer,
            ranker,
            generator,
            bus,
            settle_delay: Duration::from_millis(config.watcher.settle_delay_ms),
            store_ready_timeout_ms: config.watcher.store_ready_timeout_ms,
            fetch_attempts: config.retrieval.fetch_attempts,
        }
    }

    /// One suggestion run. Returns the drafted reply when one was
    /// delivered; the status bus carries the full outcome either way.
    pub async fn run(&self) -> Option<String> {
        // Let the page finish rendering after a navigation.
        tokio::time::sleep(self.settle_delay).await;

        self.bus
            .publish(StatusKind::Status, json!({ "phase": "extracting" }))
            .await;

        let incoming = match self.page.snapshot().await {
            Ok(html) => extract::last_incoming(&html, &self.selectors),
            Err(_) => None,
        };

        // Nothing extractable means we are not looking at a conversation;
        // stop without complaining.
        let incoming = incoming?;

        self.bus
            .publish(StatusKind::Status, json!({ "phase": "fetching_corpus" }))
            .await;

        if !self
            .store
            .wait_until_ready(self.store_ready_timeout_ms)
            .await
        {
            self.bus
                .publish(
                    StatusKind::Error,
                    json!({ "phase": "fetching_corpus", "message": "store not ready" }),
                )
                .await;
            return None;
        }

        let corpus = match self.store.fetch_all(self.fetch_attempts).await {
            Ok(records) => records,
            Err(e) => {
                self.bus
                    .publish(
                        StatusKind::Error,
                        json!({ "phase": "fetching_corpus", "message": e.to_string() }),
                    )
                    .await;
                return None;
            }
        };

        if corpus.is_empty() {
            self.bus
                .publish(
                    StatusKind::Status,
                    json!({ "phase": "no_data", "message": "no training data yet" }),
                )
                .await;
            return None;
        }

        let summary = self.summarizer.summarize(&incoming, Detail::Short).await;

        self.bus
            .publish(StatusKind::Status, json!({ "phase": "ranking" }))
            .await;

        let matches = self.ranker.rank(&summary, &corpus).await;
        if matches.is_empty() {
            self.bus
                .publish(
                    StatusKind::Status,
                    json!({ "phase": "no_matches", "message": "no similar prior emails" }),
                )
                .await;
            return None;
        }

        self.bus
            .publish(StatusKind::Status, json!({ "phase": "generating" }))
            .await;

        let response = match self.generator.generate(&incoming, &matches).await {
            Some(text) => text,
            None => {
                self.bus
                    .publish(
                        StatusKind::Status,
                        json!({
                            "phase": "generation_failed",
                            "message": "model unavailable, reply manually",
                        }),
                    )
                    .await;
                return None;
            }
        };

        self.bus
            .publish(
                StatusKind::Response,
                json!({
                    "phase": "delivered",
                    "response": response,
                    "summary": summary,
                    "matches": matches.len(),
                    "input_snippet": snippet(&incoming),
                }),
            )
            .await;

        Some(response)
    }
}

fn snippet(text: &str) -> String {
    text.chars().take(SNIPPET_CHARS).collect()
}

/// CLI entry point — one suggestion run against the configured snapshot,
/// printing the drafted reply.
pub async fn run_suggest(config: &Config) -> Result<()> {
    let selectors = Selectors::new(&config.page)?;
    let page: Arc<dyn PageSource> = Arc::new(SnapshotFile::new(&config.page.snapshot)?);

    let store = Arc::new(RecordStore::new(config));
    let model: Arc<dyn llm::LanguageModel> = Arc::from(llm::create_model(&config.model)?);
    let summarizer = Arc::new(Summarizer::new(model.clone()));
    let ranker = SimilarityRanker::new(model.clone(), &config.retrieval);
    let generator = ResponseGenerator::new(model, &config.model);
    let bus = Arc::new(StatusBus::new());

    let pipeline = SuggestPipeline::new(
        config,
        page,
        selectors,
        store.clone(),
        summarizer,
        ranker,
        generator,
        bus.clone(),
    );

    let response = pipeline.run().await;

    match response {
        Some(text) => {
            println!("--- Suggested reply ---");
            println!("{}", text);
            if let Some(event) = bus.last().await {
                println!();
                println!("matches: {}", event.data["matches"]);
            }
            println!("ok");
        }
        None => match bus.last().await {
            Some(event) => println!("no suggestion: {}", event.data),
            None => println!("no suggestion: no conversation on the page"),
        },
    }

    store.close().await;
    Ok(())
}
