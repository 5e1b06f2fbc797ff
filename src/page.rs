//! Page snapshot access and the reply watcher.
//!
//! A [`PageSource`] yields the current HTML of the mail client view plus a
//! change-notification channel. The shipped implementation,
//! [`SnapshotFile`], reads a snapshot file kept current by the browser
//! bridge and watches it with `notify`.
//!
//! [`await_new_reply`] races those change notifications against an interval
//! poll to spot the moment a freshly-sent reply appears, with a hard
//! deadline covering both paths. Both producers feed one `select!` loop, so
//! resolution is exactly-once and the loser is torn down when the function
//! returns.

use anyhow::Result;
use async_trait::async_trait;
use notify::{RecommendedWatcher, RecursiveMode, Watcher};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::watch;

use crate::extract::{self, Selectors};

/// Watching for a new reply gave up before one appeared.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WatchTimeout;

impl std::fmt::Display for WatchTimeout {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "timed out waiting for a new reply")
    }
}

impl std::error::Error for WatchTimeout {}

/// A live view of the mail client page.
#[async_trait]
pub trait PageSource: Send + Sync {
    /// The current page HTML. An empty string means the page is not
    /// available yet; extraction treats it as having no messages.
    async fn snapshot(&self) -> Result<String>;

    /// Change notifications. The receiver observes a bumped counter
    /// whenever the page may have mutated; spurious bumps are fine.
    fn mutations(&self) -> watch::Receiver<u64>;
}

/// Page source backed by an HTML snapshot file on disk.
pub struct SnapshotFile {
    path: PathBuf,
    rx: watch::Receiver<u64>,
    // Held so the filesystem watcher stays alive as long as the source.
    _watcher: Option<RecommendedWatcher>,
}

impl SnapshotFile {
    /// Watch `path` for changes. The file does not need to exist yet; the
    /// parent directory is watched so atomic replace-writes are seen too.
    pub fn new(path: &Path) -> Result<Self> {
        let (tx, rx) = watch::channel(0u64);

        let watcher = Self::spawn_watcher(path, tx);
        Ok(Self {
            path: path.to_path_buf(),
            rx,
            _watcher: watcher,
        })
    }

    fn spawn_watcher(path: &Path, tx: watch::Sender<u64>) -> Option<RecommendedWatcher> {
        let dir = path.parent()?.to_path_buf();
        if !dir.is_dir() {
            return None;
        }

        let mut watcher = notify::recommended_watcher(move |event: notify::Result<_>| {
            if event.is_ok() {
                tx.send_modify(|n| *n += 1);
            }
        })
        .ok()?;

        watcher.watch(&dir, RecursiveMode::NonRecursive).ok()?;
        Some(watcher)
    }
}

#[async_trait]
impl PageSource for SnapshotFile {
    async fn snapshot(&self) -> Result<String> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(html) => Ok(html),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(String::new()),
            Err(e) => Err(e.into()),
        }
    }

    fn mutations(&self) -> watch::Receiver<u64> {
        self.rx.clone()
    }
}

/// Wait until the newest outgoing message differs from `previous`.
///
/// Attempts extraction immediately, then races page mutation notifications
/// against an interval poll (the poll covers notification gaps). The first
/// differing, non-empty text wins; [`WatchTimeout`] is returned once the
/// deadline passes, whichever path is active.
pub async fn await_new_reply(
    page: &dyn PageSource,
    selectors: &Selectors,
    previous: Option<&str>,
    timeout: Duration,
    poll_interval: Duration,
) -> Result<String, WatchTimeout> {
    let deadline = tokio::time::Instant::now() + timeout;
    let mut mutations = page.mutations();
    mutations.mark_unchanged();

    let mut poll = tokio::time::interval(poll_interval);
    poll.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    // Immediate attempt before subscribing to either producer.
    if let Some(text) = try_extract(page, selectors, previous).await {
        return Ok(text);
    }

    let mut mutations_live = true;

    loop {
        tokio::select! {
            _ = tokio::time::sleep_until(deadline) => return Err(WatchTimeout),
            changed = mutations.changed(), if mutations_live => {
                if changed.is_err() {
                    // Sender dropped; the poll path keeps covering us.
                    mutations_live = false;
                    continue;
                }
                if let Some(text) = try_extract(page, selectors, previous).await {
                    return Ok(text);
                }
            }
            _ = poll.tick() => {
                if let Some(text) = try_extract(page, selectors, previous).await {
                    return Ok(text);
                }
            }
        }
    }
}

async fn try_extract(
    page: &dyn PageSource,
    selectors: &Selectors,
    previous: Option<&str>,
) -> Option<String> {
    let html = page.snapshot().await.ok()?;
    let latest = extract::last_outgoing(&html, selectors)?;
    if Some(latest.as_str()) != previous {
        Some(latest)
    } else {
        None
    }
}
