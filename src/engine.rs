use std::sync::Arc;
use std::time::Instant;

use anyhow::Result;
use tracing::debug;

use crate::playback::{Carousel, Controller, Transition};
use crate::repository::Repository;
use crate::selection;
use crate::story::Story;
use crate::sync::StoryFeed;

/// What the presentation layer talks to: the live list for the index strip,
/// the queue and index for the player, and the add / select / exit handlers.
pub struct Engine<C: Carousel> {
    repo: Arc<Repository>,
    feed: StoryFeed,
    controller: Controller<C>,
}

impl<C: Carousel> Engine<C> {
    pub fn new(repo: Arc<Repository>, carousel: C) -> Self {
        let feed = StoryFeed::new(&repo);
        let controller = Controller::new(repo.clone(), carousel);
        Self {
            repo,
            feed,
            controller,
        }
    }

    pub fn repository(&self) -> &Arc<Repository> {
        &self.repo
    }

    pub fn stories(&self) -> &[Story] {
        self.feed.stories()
    }

    pub fn queue(&self) -> &[Story] {
        self.controller.queue()
    }

    pub fn current_index(&self) -> Option<usize> {
        self.controller.current_index()
    }

    pub fn controller(&self) -> &Controller<C> {
        &self.controller
    }

    pub fn is_playing(&self) -> bool {
        self.controller.is_open()
    }

    pub fn add_story(&mut self, src: String) -> Result<Story> {
        let story = self.repo.add_story(src)?;
        self.poll_sync();
        Ok(story)
    }

    /// Opens playback for `id`. Returns `Ok(false)` without side effects
    /// when the id is not in the current list.
    pub fn select_story(&mut self, id: &str, now: Instant) -> Result<bool> {
        let Some(queue) = selection::build_queue(self.feed.stories(), id, self.repo.now()) else {
            debug!(id, "select: story not in list");
            return Ok(false);
        };
        let opened = self.controller.open(queue, now);
        self.poll_sync();
        opened.map(|_| true)
    }

    pub fn exit_playback(&mut self) -> Transition {
        self.controller.exit()
    }

    pub fn on_carousel_select(&mut self, index: usize, now: Instant) -> Result<Option<Transition>> {
        let transition = self.controller.on_select(index, now);
        self.poll_sync();
        transition
    }

    pub fn tick(&mut self, now: Instant) -> Result<Option<Transition>> {
        let transition = self.controller.tick(now);
        self.poll_sync();
        transition
    }

    /// Applies pending change notifications. Returns whether the list moved.
    pub fn poll_sync(&mut self) -> bool {
        self.feed.drain(&self.repo)
    }
}
