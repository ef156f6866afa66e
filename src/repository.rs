use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::ordering;
use crate::storage::KeyValueStore;
use crate::story::{Clock, Story};
use crate::sync::SyncBridge;

pub const DEFAULT_KEY: &str = "stories";

/// The persisted story list. The whole list lives under one key as a JSON
/// array and is always rewritten wholesale; the last writer wins.
pub struct Repository {
    store: Arc<dyn KeyValueStore>,
    clock: Arc<dyn Clock>,
    bridge: Arc<SyncBridge>,
    key: String,
}

impl Repository {
    pub fn new(
        store: Arc<dyn KeyValueStore>,
        clock: Arc<dyn Clock>,
        bridge: Arc<SyncBridge>,
        key: impl Into<String>,
    ) -> Self {
        Self {
            store,
            clock,
            bridge,
            key: key.into(),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn bridge(&self) -> &Arc<SyncBridge> {
        &self.bridge
    }

    pub fn store(&self) -> &Arc<dyn KeyValueStore> {
        &self.store
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Live stories in stored order. Never fails: a missing or unreadable
    /// value is an empty list.
    pub fn load(&self) -> Vec<Story> {
        match self.store.get(&self.key) {
            Ok(raw) => self.parse_live(raw.as_deref()),
            Err(err) => {
                warn!("repository: read failed, treating as empty: {err:#}");
                Vec::new()
            }
        }
    }

    /// Live stories for a rewrite. Unlike `load`, a failed store read is an
    /// error so a mutation never overwrites a list it could not see.
    fn load_for_write(&self) -> Result<Vec<Story>> {
        let raw = self
            .store
            .get(&self.key)
            .context("repository: read before write")?;
        Ok(self.parse_live(raw.as_deref()))
    }

    /// Decodes a raw stored value and drops expired entries.
    pub fn parse_live(&self, raw: Option<&str>) -> Vec<Story> {
        let now = self.now();
        let mut stories = decode(raw);
        stories.retain(|story| story.is_live(now));
        stories
    }

    /// Creates a story for an encoded image and persists it.
    pub fn add_story(&self, src: String) -> Result<Story> {
        let story = Story::new(src, self.now());
        self.append(story.clone())?;
        info!(id = %story.id, "story created");
        Ok(story)
    }

    /// Merges `story` into the live list, keeps index-strip order, saves.
    pub fn append(&self, story: Story) -> Result<()> {
        let mut stories = self.load_for_write()?;
        stories.retain(|existing| existing.id != story.id);
        stories.push(story);
        ordering::index_strip_order(&mut stories);
        self.save(&stories)
    }

    /// Overwrites the stored list verbatim and notifies this process.
    pub fn save(&self, stories: &[Story]) -> Result<()> {
        let raw = serde_json::to_string(stories).context("repository: encode stories")?;
        self.store.set(&self.key, &raw)?;
        debug!(count = stories.len(), "repository: saved");
        self.bridge.notify_local();
        Ok(())
    }

    /// Flags `id` as viewed, prunes expired entries and rewrites the list
    /// in post-viewing order. Unknown ids only prune and reorder.
    pub fn mark_viewed(&self, id: &str) -> Result<()> {
        let mut stories = self.load_for_write()?;
        for story in stories.iter_mut().filter(|story| story.id == id) {
            story.is_viewed = true;
        }
        ordering::persisted_order(&mut stories);
        self.save(&stories)
    }
}

fn decode(raw: Option<&str>) -> Vec<Story> {
    let Some(raw) = raw else {
        return Vec::new();
    };
    match serde_json::from_str(raw) {
        Ok(stories) => stories,
        Err(err) => {
            warn!("repository: stored value is not a story list: {err}");
            Vec::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStore;
    use crate::story::ManualClock;
    use crate::sync::SyncEvent;
    use chrono::{Duration, TimeZone};
    use std::sync::atomic::{AtomicBool, Ordering};

    /// Store whose reads can be switched to fail, like a locked database.
    #[derive(Default)]
    struct FlakyStore {
        inner: MemoryStore,
        fail_reads: AtomicBool,
    }

    impl KeyValueStore for FlakyStore {
        fn get(&self, key: &str) -> Result<Option<String>> {
            if self.fail_reads.load(Ordering::SeqCst) {
                anyhow::bail!("database is locked");
            }
            self.inner.get(key)
        }

        fn set(&self, key: &str, value: &str) -> Result<()> {
            self.inner.set(key, value)
        }

        fn external_version(&self) -> Result<u64> {
            self.inner.external_version()
        }
    }

    fn flaky_repo(store: Arc<FlakyStore>) -> Repository {
        Repository::new(
            store,
            Arc::new(ManualClock::new(
                Utc.with_ymd_and_hms(2025, 3, 1, 8, 0, 0).unwrap(),
            )),
            Arc::new(SyncBridge::new()),
            DEFAULT_KEY,
        )
    }

    struct Fixture {
        store: Arc<MemoryStore>,
        clock: Arc<ManualClock>,
        repo: Repository,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(MemoryStore::new());
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2025, 3, 1, 8, 0, 0).unwrap(),
        ));
        let repo = Repository::new(
            store.clone(),
            clock.clone(),
            Arc::new(SyncBridge::new()),
            DEFAULT_KEY,
        );
        Fixture { store, clock, repo }
    }

    #[test]
    fn load_without_value_is_empty() {
        let fx = fixture();
        assert!(fx.repo.load().is_empty());
    }

    #[test]
    fn load_with_garbage_is_empty() {
        let fx = fixture();
        fx.store.set(DEFAULT_KEY, "{not json").unwrap();
        assert!(fx.repo.load().is_empty());
        fx.store.set(DEFAULT_KEY, r#"{"id":"a"}"#).unwrap();
        assert!(fx.repo.load().is_empty());
    }

    #[test]
    fn appended_story_reloads_identically() {
        let fx = fixture();
        let story = fx.repo.add_story("data:image/png;base64,AAAA".into()).unwrap();
        fx.clock.advance(Duration::hours(1));
        assert_eq!(fx.repo.load(), vec![story]);
    }

    #[test]
    fn load_never_returns_expired() {
        let fx = fixture();
        fx.repo.add_story("a".into()).unwrap();
        fx.clock.advance(Duration::hours(12));
        let b = fx.repo.add_story("b".into()).unwrap();
        fx.clock.advance(Duration::hours(12));
        assert_eq!(fx.repo.load(), vec![b]);
    }

    #[test]
    fn append_prunes_expired_entries_on_write() {
        let fx = fixture();
        fx.repo.add_story("a".into()).unwrap();
        fx.clock.advance(Duration::hours(25));
        fx.repo.add_story("b".into()).unwrap();
        let raw = fx.store.get(DEFAULT_KEY).unwrap().unwrap();
        let stored: Vec<Story> = serde_json::from_str(&raw).unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].src, "b");
    }

    #[test]
    fn append_replaces_duplicate_id() {
        let fx = fixture();
        let mut story = fx.repo.add_story("a".into()).unwrap();
        story.src = "a2".into();
        fx.repo.append(story.clone()).unwrap();
        assert_eq!(fx.repo.load(), vec![story]);
    }

    #[test]
    fn append_keeps_unviewed_first() {
        let fx = fixture();
        let a = fx.repo.add_story("a".into()).unwrap();
        fx.repo.mark_viewed(&a.id).unwrap();
        let b = fx.repo.add_story("b".into()).unwrap();
        let ids: Vec<_> = fx.repo.load().into_iter().map(|s| s.id).collect();
        assert_eq!(ids, [b.id, a.id]);
    }

    #[test]
    fn every_mutation_notifies() {
        let fx = fixture();
        let rx = fx.repo.bridge().subscribe();
        let a = fx.repo.add_story("a".into()).unwrap();
        fx.repo.mark_viewed(&a.id).unwrap();
        fx.repo.save(&[]).unwrap();
        let events: Vec<_> = rx.try_iter().collect();
        assert_eq!(events, vec![SyncEvent::Local; 3]);
    }

    #[test]
    fn mark_viewed_reorders_by_creation_then_viewed() {
        let fx = fixture();
        let a = fx.repo.add_story("a".into()).unwrap();
        fx.clock.advance(Duration::minutes(1));
        let b = fx.repo.add_story("b".into()).unwrap();
        fx.clock.advance(Duration::minutes(1));
        let c = fx.repo.add_story("c".into()).unwrap();
        fx.repo.mark_viewed(&b.id).unwrap();
        let loaded = fx.repo.load();
        let ids: Vec<_> = loaded.iter().map(|s| s.id.clone()).collect();
        assert_eq!(ids, [a.id, c.id, b.id.clone()]);
        assert!(loaded[2].is_viewed);
    }

    #[test]
    fn mark_viewed_with_unknown_id_still_saves() {
        let fx = fixture();
        fx.repo.add_story("a".into()).unwrap();
        let rx = fx.repo.bridge().subscribe();
        fx.repo.mark_viewed("placeholder").unwrap();
        assert_eq!(rx.try_recv().unwrap(), SyncEvent::Local);
        assert!(fx.repo.load().iter().all(|s| !s.is_viewed));
    }

    #[test]
    fn failed_read_aborts_append_and_keeps_list() {
        let store = Arc::new(FlakyStore::default());
        let repo = flaky_repo(store.clone());
        for i in 0..3 {
            repo.add_story(format!("s{i}")).unwrap();
        }

        store.fail_reads.store(true, Ordering::SeqCst);
        assert!(repo.load().is_empty());
        assert!(repo.add_story("new".into()).is_err());

        store.fail_reads.store(false, Ordering::SeqCst);
        assert_eq!(repo.load().len(), 3);
    }

    #[test]
    fn failed_read_aborts_mark_viewed() {
        let store = Arc::new(FlakyStore::default());
        let repo = flaky_repo(store.clone());
        let a = repo.add_story("a".into()).unwrap();
        repo.add_story("b".into()).unwrap();
        let rx = repo.bridge().subscribe();

        store.fail_reads.store(true, Ordering::SeqCst);
        assert!(repo.mark_viewed(&a.id).is_err());
        assert!(rx.try_recv().is_err());

        store.fail_reads.store(false, Ordering::SeqCst);
        let loaded = repo.load();
        assert_eq!(loaded.len(), 2);
        assert!(loaded.iter().all(|s| !s.is_viewed));
    }
}
