//! Breadth-first work queue of pages still to clone.

use std::collections::{HashSet, VecDeque};
use url::Url;

use crate::naming::strip_fragment;

/// FIFO queue of page URLs plus the set of pages already dequeued.
///
/// URLs are keyed with their fragment removed, so `/about` and
/// `/about#team` are the same page. A URL enters the queue at most once per
/// run and a visited URL is never queued again.
#[derive(Debug, Default)]
pub struct Frontier {
    queue: VecDeque<Url>,
    queued: HashSet<String>,
    visited: HashSet<String>,
}

impl Frontier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues `url` unless it was queued or visited before. Returns whether
    /// it was added.
    pub fn push(&mut self, url: &Url) -> bool {
        let url = strip_fragment(url);
        let key = url.to_string();
        if self.visited.contains(&key) || !self.queued.insert(key) {
            return false;
        }
        self.queue.push_back(url);
        true
    }

    pub fn pop(&mut self) -> Option<Url> {
        self.queue.pop_front()
    }

    /// Records a visit. Returns `false` when the page was already visited.
    pub fn mark_visited(&mut self, url: &Url) -> bool {
        self.visited.insert(strip_fragment(url).to_string())
    }

    pub fn is_visited(&self, url: &Url) -> bool {
        self.visited.contains(strip_fragment(url).as_str())
    }

    /// Pages waiting in the queue.
    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn visited_count(&self) -> usize {
        self.visited.len()
    }
}
