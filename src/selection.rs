use chrono::{DateTime, Utc};

use crate::story::Story;

/// Builds the playback queue for a story picked from the index strip.
///
/// The picked story comes first, or an expired placeholder when it is no
/// longer live. Every other live story follows in its current relative
/// order. Returns `None` when `id` is not in `stories`, in which case no
/// session should start.
pub fn build_queue(stories: &[Story], id: &str, now: DateTime<Utc>) -> Option<Vec<Story>> {
    let selected = stories.iter().find(|story| story.id == id)?;
    let first = if selected.is_live(now) {
        selected.clone()
    } else {
        Story::expired_placeholder()
    };

    let mut queue = Vec::with_capacity(stories.len());
    queue.push(first);
    queue.extend(
        stories
            .iter()
            .filter(|story| story.id != id && story.is_live(now))
            .cloned(),
    );
    Some(queue)
}
