use std::collections::{HashSet, VecDeque};

/// Seen-URL set plus FIFO queue of detail pages still to visit. A URL is
/// accepted at most once for the lifetime of the crawl.
#[derive(Debug, Default)]
pub struct Frontier {
    seen: HashSet<String>,
    pending: VecDeque<String>,
}

impl Frontier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns false if the URL was already seen.
    pub fn enqueue(&mut self, url: impl Into<String>) -> bool {
        let url = normalize(url.into());
        if self.seen.insert(url.clone()) {
            self.pending.push_back(url);
            true
        } else {
            false
        }
    }

    /// Marks a URL as visited without queueing it, for pages the caller
    /// fetches itself (listing pages). Returns false if already seen.
    pub fn mark_seen(&mut self, url: impl Into<String>) -> bool {
        self.seen.insert(normalize(url.into()))
    }

    pub fn next(&mut self) -> Option<String> {
        self.pending.pop_front()
    }

    pub fn seen_count(&self) -> usize {
        self.seen.len()
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }
}

// Fragments never change the served document.
fn normalize(mut url: String) -> String {
    if let Some(idx) = url.find('#') {
        url.truncate(idx);
    }
    url
}
