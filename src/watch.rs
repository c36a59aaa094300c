use std::time::Duration;

use crate::backoff::jitter;
use crate::client::QueryOption;

/// Blocking-query state of one watched resource.
///
/// A response is only a change when its index differs from the one the query
/// was issued with; an equal index means the wait elapsed with nothing new.
/// The very first response of a fresh watcher is always a change.
///
/// Indexes below 1 are stored as 1: an index of 0 would make the next read
/// return at once instead of blocking.
#[derive(Debug, Clone)]
pub struct BlockingQuery {
    last_index: Option<u64>,
    wait_time: Duration,
    dc: Option<String>,
    allow_stale: bool,
}

impl BlockingQuery {
    pub fn new(wait_time: Duration, dc: Option<String>, allow_stale: bool) -> Self {
        Self {
            last_index: None,
            wait_time,
            dc,
            allow_stale,
        }
    }

    /// Options for the next read, with a freshly jittered wait.
    pub fn options(&self) -> QueryOption {
        QueryOption {
            wait_index: self.last_index.unwrap_or(0),
            wait_time: Some(jitter(self.wait_time)),
            dc: self.dc.clone(),
            tag: None,
            allow_stale: self.allow_stale,
        }
    }

    /// Records `new_index` and returns whether the response carries a change.
    ///
    /// An index lower than the stored one (catalog state reset) is accepted
    /// and replaces it.
    pub fn advance(&mut self, new_index: u64) -> bool {
        let new_index = new_index.max(1);
        match self.last_index {
            Some(last) if last == new_index => false,
            _ => {
                self.last_index = Some(new_index);
                true
            }
        }
    }

    pub fn last_index(&self) -> Option<u64> {
        self.last_index
    }
}
