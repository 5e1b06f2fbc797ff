//! Capture pipeline: persist every observed (incoming, outgoing) pair.
//!
//! Triggered by a send signal. The pipeline snapshots the incoming message
//! before the page updates with the user's reply, waits for that reply to
//! appear, summarizes both sides, and appends a record holding the raw and
//! summarized forms. Phases:
//!
//! `AwaitingSend → CapturingReply → Summarizing → Persisted` (or `Aborted`
//! on timeout or store failure).
//!
//! A cooldown window collapses rapid repeat triggers into one run. Nothing
//! escapes a run uncaught — failures become status events.

use anyhow::Result;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::config::Config;
use crate::extract::{self, Selectors};
use crate::llm;
use crate::models::{NewRecord, StatusKind};
use crate::page::{self, PageSource, SnapshotFile};
use crate::status::StatusBus;
use crate::store::RecordStore;
use crate::summarize::{Detail, Summarizer};

/// Placeholder stored when a reply was sent with no extractable incoming
/// message (e.g. a fresh outbound thread).
const NO_INCOMING: &str = "(no incoming text)";

pub struct CapturePipeline {
    page: Arc<dyn PageSource>,
    selectors: Selectors,
    store: Arc<RecordStore>,
    summarizer: Arc<Summarizer>,
    bus: Arc<StatusBus>,
    reply_timeout: Duration,
    poll_interval: Duration,
    cooldown: Duration,
    last_trigger: Mutex<Option<Instant>>,
}

impl CapturePipeline {
    pub fn new(
        config: &Config,
        page: Arc<dyn PageSource>,
        selectors: Selectors,
        store: Arc<RecordStore>,
        summarizer: Arc<Summarizer>,
        bus: Arc<StatusBus>,
    ) -> Self {
        Self {
            page,
            selectors,
            store,
            summarizer,
            bus,
            reply_timeout: Duration::from_millis(config.watcher.reply_timeout_ms),
            poll_interval: Duration::from_millis(config.watcher.poll_interval_ms),
            cooldown: Duration::from_millis(config.watcher.send_cooldown_ms),
            last_trigger: Mutex::new(None),
        }
    }

    /// React to a send trigger. Returns whether a capture run started;
    /// triggers inside the cooldown window are ignored.
    pub async fn handle_send(&self) -> bool {
        {
            let mut last = self.last_trigger.lock().await;
            let now = Instant::now();
            if let Some(previous) = *last {
                if now.duration_since(previous) < self.cooldown {
                    return false;
                }
            }
            *last = Some(now);
        }

        self.run().await;
        true
    }

    /// One capture cycle. Converts every failure into a status event.
    pub async fn run(&self) {
        self.bus
            .publish(StatusKind::Status, json!({ "phase": "awaiting_send" }))
            .await;

        // Snapshot the incoming message before the page updates with the
        // user's own reply.
        let input_before_send = match self.page.snapshot().await {
            Ok(html) => extract::last_incoming(&html, &self.selectors),
            Err(_) => None,
        };

        self.bus
            .publish(StatusKind::Status, json!({ "phase": "capturing_reply" }))
            .await;

        let reply = match page::await_new_reply(
            self.page.as_ref(),
            &self.selectors,
            input_before_send.as_deref(),
            self.reply_timeout,
            self.poll_interval,
        )
        .await
        {
            Ok(reply) => reply,
            Err(_) => {
                self.bus
                    .publish(
                        StatusKind::Status,
                        json!({
                            "phase": "aborted",
                            "level": "warning",
                            "message": "no reply detected before the timeout",
                        }),
                    )
                    .await;
                return;
            }
        };

        self.bus
            .publish(StatusKind::Status, json!({ "phase": "summarizing" }))
            .await;

        let raw_input = input_before_send.unwrap_or_else(|| NO_INCOMING.to_string());
        let input = self.summarizer.summarize(&raw_input, Detail::Short).await;
        let output = self.summarizer.summarize(&reply, Detail::Full).await;

        let record = NewRecord {
            input,
            output,
            raw_input: Some(raw_input),
            raw_output: Some(reply),
            timestamp: Some(chrono::Utc::now().to_rfc3339()),
        };

        match self.store.append(record).await {
            Ok(id) => {
                self.bus
                    .publish(StatusKind::Status, json!({ "phase": "persisted", "id": id }))
                    .await;
            }
            Err(e) => {
                self.bus
                    .publish(
                        StatusKind::Error,
                        json!({ "phase": "aborted", "message": e.to_string() }),
                    )
                    .await;
            }
        }
    }
}

/// CLI entry point — run one capture cycle against the configured snapshot.
///
/// The caller sends their reply in the mail client while this waits; the
/// browser bridge updates the snapshot and the watcher picks the reply up.
pub async fn run_capture(config: &Config) -> Result<()> {
    let selectors = Selectors::new(&config.page)?;
    let page: Arc<dyn PageSource> = Arc::new(SnapshotFile::new(&config.page.snapshot)?);

    let store = Arc::new(RecordStore::new(config));
    if !store
        .wait_until_ready(config.watcher.store_ready_timeout_ms)
        .await
    {
        anyhow::bail!(
            "store not ready after {}ms (run `mailcue init` first?)",
            config.watcher.store_ready_timeout_ms
        );
    }

    let model: Arc<dyn llm::LanguageModel> = Arc::from(llm::create_model(&config.model)?);
    let summarizer = Arc::new(Summarizer::new(model));
    let bus = Arc::new(StatusBus::new());

    let pipeline = CapturePipeline::new(config, page, selectors, store.clone(), summarizer, bus.clone());

    println!("capture: waiting for a new reply on the page...");
    pipeline.run().await;

    match bus.last().await {
        Some(event) => {
            println!("capture finished: {}", event.data);
            println!("ok");
        }
        None => println!("capture finished with no status"),
    }

    store.close().await;
    Ok(())
}
