//! Change propagation between the repository and everything that displays it.
//!
//! Two sources feed one update path. A same-process broadcast goes out after
//! every repository mutation; it carries no payload, so observers re-read the
//! repository. A watcher thread notices writes committed by other processes
//! sharing the store and forwards the new raw value. Either way the observer
//! replaces its list wholesale.

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::Result;
use crossbeam_channel::{unbounded, Receiver, Sender};
use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::ordering;
use crate::repository::Repository;
use crate::storage::KeyValueStore;
use crate::story::Story;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncEvent {
    /// This process changed the list.
    Local,
    /// Another process changed the list. `raw` is the new stored value.
    Remote { raw: Option<String> },
}

#[derive(Debug, Default)]
pub struct SyncBridge {
    subscribers: Mutex<Vec<Sender<SyncEvent>>>,
}

impl SyncBridge {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self) -> Receiver<SyncEvent> {
        let (tx, rx) = unbounded();
        self.subscribers.lock().push(tx);
        rx
    }

    pub fn notify_local(&self) {
        self.broadcast(SyncEvent::Local);
    }

    pub fn notify_remote(&self, raw: Option<String>) {
        self.broadcast(SyncEvent::Remote { raw });
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().len()
    }

    fn broadcast(&self, event: SyncEvent) {
        // Dropped receivers are pruned here.
        self.subscribers
            .lock()
            .retain(|tx| tx.send(event.clone()).is_ok());
    }
}

/// Tracks the store's foreign-write counter and reports when it moves.
#[derive(Debug)]
pub struct ChangeDetector {
    key: String,
    last_version: u64,
}

impl ChangeDetector {
    pub fn new(store: &dyn KeyValueStore, key: impl Into<String>) -> Result<Self> {
        Ok(Self {
            key: key.into(),
            last_version: store.external_version()?,
        })
    }

    /// Returns the new raw value when another context wrote since last poll.
    pub fn poll(&mut self, store: &dyn KeyValueStore) -> Result<Option<Option<String>>> {
        let version = store.external_version()?;
        if version == self.last_version {
            return Ok(None);
        }
        self.last_version = version;
        Ok(Some(store.get(&self.key)?))
    }
}

/// Background thread that turns foreign writes into `SyncEvent::Remote`.
pub struct Watcher {
    stop: Sender<()>,
    handle: Option<thread::JoinHandle<()>>,
}

impl Watcher {
    pub fn spawn(
        store: Arc<dyn KeyValueStore>,
        bridge: Arc<SyncBridge>,
        key: &str,
        interval: Duration,
    ) -> Result<Self> {
        let mut detector = ChangeDetector::new(store.as_ref(), key)?;
        let (stop_tx, stop_rx) = unbounded::<()>();
        let interval = if interval.is_zero() {
            Duration::from_millis(250)
        } else {
            interval
        };

        let handle = thread::spawn(move || loop {
            crossbeam_channel::select! {
                recv(stop_rx) -> _ => break,
                default(interval) => {
                    match detector.poll(store.as_ref()) {
                        Ok(Some(raw)) => {
                            debug!("sync: foreign write detected");
                            bridge.notify_remote(raw);
                        }
                        Ok(None) => {}
                        Err(err) => warn!("sync: poll failed: {err:#}"),
                    }
                }
            }
        });

        Ok(Self {
            stop: stop_tx,
            handle: Some(handle),
        })
    }

    fn shutdown(&mut self) {
        let _ = self.stop.send(());
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for Watcher {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// An observer's view of the story list, kept in index-strip order.
pub struct StoryFeed {
    stories: Vec<Story>,
    events: Receiver<SyncEvent>,
}

impl StoryFeed {
    pub fn new(repo: &Repository) -> Self {
        let events = repo.bridge().subscribe();
        let mut feed = Self {
            stories: Vec::new(),
            events,
        };
        feed.replace(repo.load());
        feed
    }

    pub fn stories(&self) -> &[Story] {
        &self.stories
    }

    /// Applies every pending notification. Returns whether the list changed.
    pub fn drain(&mut self, repo: &Repository) -> bool {
        let mut changed = false;
        while let Ok(event) = self.events.try_recv() {
            self.apply(event, repo);
            changed = true;
        }
        changed
    }

    pub fn apply(&mut self, event: SyncEvent, repo: &Repository) {
        let next = match event {
            SyncEvent::Local => repo.load(),
            SyncEvent::Remote { raw } => repo.parse_live(raw.as_deref()),
        };
        self.replace(next);
    }

    fn replace(&mut self, mut stories: Vec<Story>) {
        ordering::index_strip_order(&mut stories);
        self.stories = stories;
    }
}
