//! Timed slideshow over a playback queue.
//!
//! ```text
//!   Idle ──open──▶ Viewing(i) ──timer, i < last──▶ Viewing(i + 1)
//!                    │    │
//!                    │    └──timer, i == last──▶ Exited ─▶ Idle
//!                    └──────close──────────────▶ Exited ─▶ Idle
//! ```
//!
//! Exactly one timer is armed while viewing. Every transition cancels it
//! first, and leaving `Viewing` never re-arms it, so nothing fires after
//! the session is closed.

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;
use tracing::{debug, info};

use crate::repository::Repository;
use crate::story::Story;

pub const SLIDE_INTERVAL: Duration = Duration::from_millis(3000);

/// Slide container the controller drives.
pub trait Carousel {
    /// Resets to the first slide of a fresh deck of `slides` items.
    fn mount(&mut self, slides: usize);
    fn selected_snap(&self) -> usize;
    fn scroll_next(&mut self);
    /// Jumps to `index`, clamped to the last slide.
    fn scroll_to(&mut self, index: usize);
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Timer {
    deadline: Option<Instant>,
}

impl Timer {
    pub fn arm(&mut self, now: Instant) {
        self.deadline = Some(now + SLIDE_INTERVAL);
    }

    pub fn cancel(&mut self) {
        self.deadline = None;
    }

    pub fn is_armed(&self) -> bool {
        self.deadline.is_some()
    }

    /// Disarms and returns true once the deadline has passed.
    pub fn fire_if_due(&mut self, now: Instant) -> bool {
        match self.deadline {
            Some(deadline) if now >= deadline => {
                self.deadline = None;
                true
            }
            _ => false,
        }
    }

    /// Fraction of the interval already elapsed, for progress bars.
    pub fn progress(&self, now: Instant) -> f64 {
        match self.deadline {
            Some(deadline) => {
                let remaining = deadline.saturating_duration_since(now);
                1.0 - remaining.as_secs_f64() / SLIDE_INTERVAL.as_secs_f64()
            }
            None => 0.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackState {
    Idle,
    Viewing { index: usize },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Opened { index: usize },
    Advanced { index: usize },
    /// Session over; the queue is gone and the controller is idle again.
    Exited,
}

pub struct Controller<C: Carousel> {
    repo: Arc<Repository>,
    carousel: C,
    state: PlaybackState,
    queue: Vec<Story>,
    timer: Timer,
}

impl<C: Carousel> Controller<C> {
    pub fn new(repo: Arc<Repository>, carousel: C) -> Self {
        Self {
            repo,
            carousel,
            state: PlaybackState::Idle,
            queue: Vec::new(),
            timer: Timer::default(),
        }
    }

    pub fn state(&self) -> PlaybackState {
        self.state
    }

    pub fn is_open(&self) -> bool {
        matches!(self.state, PlaybackState::Viewing { .. })
    }

    pub fn queue(&self) -> &[Story] {
        &self.queue
    }

    pub fn current_index(&self) -> Option<usize> {
        match self.state {
            PlaybackState::Viewing { index } => Some(index),
            PlaybackState::Idle => None,
        }
    }

    pub fn current(&self) -> Option<&Story> {
        self.current_index().and_then(|index| self.queue.get(index))
    }

    pub fn timer(&self) -> &Timer {
        &self.timer
    }

    pub fn carousel(&self) -> &C {
        &self.carousel
    }

    /// Starts a session over `queue`, replacing any running one.
    ///
    /// The viewed-state write for the first slide happens before this
    /// returns; its error is reported but the session stays open.
    pub fn open(&mut self, queue: Vec<Story>, now: Instant) -> Result<Transition> {
        self.timer.cancel();
        info!(slides = queue.len(), "playback opened");
        self.carousel.mount(queue.len());
        self.queue = queue;
        let index = self.carousel.selected_snap();
        self.enter(index, now)?;
        Ok(Transition::Opened { index })
    }

    /// Carousel reported a new position, e.g. after a manual swipe.
    ///
    /// The carousel is moved there first and its resulting snap becomes the
    /// current index, so later timer advances continue from it.
    pub fn on_select(&mut self, index: usize, now: Instant) -> Result<Option<Transition>> {
        let PlaybackState::Viewing { index: current } = self.state else {
            return Ok(None);
        };
        self.carousel.scroll_to(index);
        let snapped = self.carousel.selected_snap();
        if snapped == current {
            return Ok(None);
        }
        self.enter(snapped, now)?;
        Ok(Some(Transition::Advanced { index: snapped }))
    }

    /// Drives the timer. Advances one slide, or exits on the last one.
    pub fn tick(&mut self, now: Instant) -> Result<Option<Transition>> {
        let PlaybackState::Viewing { index } = self.state else {
            return Ok(None);
        };
        if !self.timer.fire_if_due(now) {
            return Ok(None);
        }

        if self.is_last(index) {
            return Ok(Some(self.exit()));
        }

        self.carousel.scroll_next();
        let next = self.carousel.selected_snap();
        self.enter(next, now)?;
        Ok(Some(Transition::Advanced { index: next }))
    }

    /// Closes the session from any state. Safe to call when idle.
    pub fn exit(&mut self) -> Transition {
        self.timer.cancel();
        if self.is_open() {
            info!("playback exited");
        }
        self.state = PlaybackState::Idle;
        self.queue.clear();
        Transition::Exited
    }

    fn is_last(&self, index: usize) -> bool {
        // An empty queue has no last index; treat it as finished.
        match self.queue.len().checked_sub(1) {
            Some(last) => index >= last,
            None => true,
        }
    }

    fn enter(&mut self, index: usize, now: Instant) -> Result<()> {
        self.timer.cancel();
        self.state = PlaybackState::Viewing { index };
        self.timer.arm(now);
        debug!(index, "playback: viewing");
        match self.queue.get(index) {
            Some(story) => self.repo.mark_viewed(&story.id),
            None => Ok(()),
        }
    }
}
