use std::cmp::Ordering;

use crate::story::Story;

/// Unviewed before viewed. Stories with the same viewed state keep their
/// relative order.
pub fn index_strip_order(stories: &mut [Story]) {
    stories.sort_by(by_viewed);
}

/// Order written back after a story was watched: oldest first, then the
/// viewed split as the dominant key. Both passes are stable, so creation
/// order survives inside each group.
pub fn persisted_order(stories: &mut [Story]) {
    stories.sort_by(|a, b| a.created_at.cmp(&b.created_at));
    stories.sort_by(by_viewed);
}

fn by_viewed(a: &Story, b: &Story) -> Ordering {
    a.is_viewed.cmp(&b.is_viewed)
}
