//! Long-running watch mode.
//!
//! Wires the whole pipeline together: readiness of the record store, a
//! model availability probe, the HTTP surface, and an event loop that
//! reacts to page mutations (new conversation on screen → suggestion run)
//! and send signals (user clicked send → capture run). Ctrl-C stops it.

use anyhow::Result;
use notify::{RecommendedWatcher, RecursiveMode, Watcher};
use serde_json::json;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::watch;

use crate::capture::CapturePipeline;
use crate::config::Config;
use crate::extract::{self, Selectors};
use crate::generate::ResponseGenerator;
use crate::llm;
use crate::models::StatusKind;
use crate::page::{PageSource, SnapshotFile};
use crate::rank::SimilarityRanker;
use crate::server::{self, AppState};
use crate::status::StatusBus;
use crate::store::RecordStore;
use crate::suggest::SuggestPipeline;
use crate::summarize::Summarizer;

/// Startup lifecycle, surfaced on the status channel so the browser bridge
/// can tell "not started" from "starting" from "up".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InitState {
    Uninitialized,
    Initializing,
    Ready,
}

impl InitState {
    pub fn as_str(&self) -> &'static str {
        match self {
            InitState::Uninitialized => "uninitialized",
            InitState::Initializing => "initializing",
            InitState::Ready => "ready",
        }
    }
}

/// Watches the send-signal file the browser bridge touches on every send
/// click. The parent directory is watched and events are filtered down to
/// the signal's file name, since the snapshot lives in the same directory.
pub struct SendSignal {
    rx: watch::Receiver<u64>,
    _watcher: Option<RecommendedWatcher>,
}

impl SendSignal {
    pub fn new(path: &Path) -> Result<Self> {
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir)?;
        }

        let (tx, rx) = watch::channel(0u64);
        let watcher = Self::spawn_watcher(path, tx);
        Ok(Self { rx, _watcher: watcher })
    }

    fn spawn_watcher(path: &Path, tx: watch::Sender<u64>) -> Option<RecommendedWatcher> {
        let dir = path.parent()?.to_path_buf();
        let target = path.file_name()?.to_os_string();

        let mut watcher = notify::recommended_watcher(move |event: notify::Result<notify::Event>| {
            if let Ok(event) = event {
                if event
                    .paths
                    .iter()
                    .any(|p| p.file_name() == Some(target.as_os_str()))
                {
                    tx.send_modify(|n| *n += 1);
                }
            }
        })
        .ok()?;

        watcher.watch(&dir, RecursiveMode::NonRecursive).ok()?;
        Some(watcher)
    }

    pub fn triggers(&self) -> watch::Receiver<u64> {
        self.rx.clone()
    }
}

async fn publish_state(bus: &StatusBus, state: InitState) {
    bus.publish(
        StatusKind::Status,
        json!({ "phase": "init", "state": state.as_str() }),
    )
    .await;
}

/// Run watch mode until Ctrl-C.
pub async fn run_watch(config: &Config) -> Result<()> {
    let bus = Arc::new(StatusBus::new());
    publish_state(&bus, InitState::Initializing).await;

    if let Some(dir) = config.page.snapshot.parent() {
        std::fs::create_dir_all(dir)?;
    }

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
    let availability = model.availability().await;
    bus.publish(
        StatusKind::Status,
        json!({ "phase": "model_probe", "availability": availability.as_str() }),
    )
    .await;

    let summarizer = Arc::new(Summarizer::new(model.clone()));
    let capture = Arc::new(CapturePipeline::new(
        config,
        page.clone(),
        selectors.clone(),
        store.clone(),
        summarizer.clone(),
        bus.clone(),
    ));
    let suggest = Arc::new(SuggestPipeline::new(
        config,
        page.clone(),
        selectors.clone(),
        store.clone(),
        summarizer,
        SimilarityRanker::new(model.clone(), &config.retrieval),
        ResponseGenerator::new(model, &config.model),
        bus.clone(),
    ));

    let state = AppState {
        store: store.clone(),
        bus: bus.clone(),
        fetch_attempts: config.retrieval.fetch_attempts,
    };
    let server_config = config.clone();
    tokio::spawn(async move {
        if let Err(e) = server::run_server(&server_config, state).await {
            eprintln!("server stopped: {}", e);
        }
    });

    let send_signal = SendSignal::new(&config.watcher.send_signal)?;

    publish_state(&bus, InitState::Ready).await;
    println!("watching {}", config.page.snapshot.display());

    event_loop(page, selectors, capture, suggest, send_signal.triggers()).await;

    println!("shutting down");
    store.close().await;
    Ok(())
}

/// React to page mutations and send triggers until Ctrl-C.
///
/// A suggestion run starts when the newest incoming message changes (one at
/// a time; a change arriving mid-run is picked up by the next mutation). A
/// capture run starts on every send trigger, subject to the pipeline's own
/// cooldown.
async fn event_loop(
    page: Arc<dyn PageSource>,
    selectors: Selectors,
    capture: Arc<CapturePipeline>,
    suggest: Arc<SuggestPipeline>,
    mut send_triggers: watch::Receiver<u64>,
) {
    let mut mutations = page.mutations();
    mutations.mark_unchanged();
    send_triggers.mark_unchanged();

    let suggestion_running = Arc::new(AtomicBool::new(false));

    let mut last_incoming = current_incoming(page.as_ref(), &selectors).await;
    if last_incoming.is_some() {
        spawn_suggestion(&suggest, &suggestion_running);
    }

    let mut mutations_live = true;
    let mut triggers_live = true;

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            changed = mutations.changed(), if mutations_live => {
                if changed.is_err() {
                    mutations_live = false;
                    continue;
                }
                let incoming = current_incoming(page.as_ref(), &selectors).await;
                if incoming != last_incoming {
                    last_incoming = incoming;
                    if last_incoming.is_some() {
                        spawn_suggestion(&suggest, &suggestion_running);
                    }
                }
            }
            changed = send_triggers.changed(), if triggers_live => {
                if changed.is_err() {
                    triggers_live = false;
                    continue;
                }
                let capture = capture.clone();
                tokio::spawn(async move {
                    capture.handle_send().await;
                });
            }
        }
    }
}

async fn current_incoming(page: &dyn PageSource, selectors: &Selectors) -> Option<String> {
    let html = page.snapshot().await.ok()?;
    extract::last_incoming(&html, selectors)
}

fn spawn_suggestion(suggest: &Arc<SuggestPipeline>, running: &Arc<AtomicBool>) {
    if running
        .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
        .is_err()
    {
        return;
    }

    let suggest = suggest.clone();
    let running = running.clone();
    tokio::spawn(async move {
        suggest.run().await;
        running.store(false, Ordering::SeqCst);
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn init_state_names() {
        assert_eq!(InitState::Uninitialized.as_str(), "uninitialized");
        assert_eq!(InitState::Initializing.as_str(), "initializing");
        assert_eq!(InitState::Ready.as_str(), "ready");
    }

    #[tokio::test]
    async fn send_signal_fires_on_the_signal_file_only() {
        let tmp = tempfile::TempDir::new().unwrap();
        let signal_path = tmp.path().join("send.signal");

        let signal = SendSignal::new(&signal_path).unwrap();
        let mut triggers = signal.triggers();
        triggers.mark_unchanged();

        // A sibling file changing must not count as a send.
        std::fs::write(tmp.path().join("page.html"), "<html></html>").unwrap();
        tokio::time::sleep(Duration::from_millis(300)).await;
        assert!(!triggers.has_changed().unwrap());

        std::fs::write(&signal_path, "1").unwrap();
        tokio::time::timeout(Duration::from_secs(5), triggers.changed())
            .await
            .expect("signal write was not observed")
            .unwrap();
    }

    #[tokio::test]
    async fn send_signal_creates_the_parent_directory() {
        let tmp = tempfile::TempDir::new().unwrap();
        let signal_path = tmp.path().join("nested").join("send.signal");

        let _signal = SendSignal::new(&signal_path).unwrap();
        assert!(signal_path.parent().unwrap().is_dir());
    }
}
