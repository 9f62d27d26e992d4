use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

/// Number of live sessions per topic in this process.
///
/// The broker has no notion of who is reading a topic, so this only sees the
/// sessions of the current gateway instance.
#[derive(Debug, Clone, Default)]
pub struct TopicLeases {
    holders: Arc<Mutex<HashMap<String, usize>>>,
}

impl TopicLeases {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, usize>> {
        self.holders.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn acquire(&self, topic: &str) -> TopicLease {
        *self.lock().entry(topic.to_string()).or_insert(0) += 1;
        TopicLease {
            topic: topic.to_string(),
            leases: self.clone(),
            released: false,
        }
    }

    pub fn holders(&self, topic: &str) -> usize {
        self.lock().get(topic).copied().unwrap_or(0)
    }

    /// Drops one hold; true when it was the last one.
    fn release(&self, topic: &str) -> bool {
        let mut holders = self.lock();
        let Some(count) = holders.get_mut(topic) else {
            return false;
        };
        *count -= 1;
        if *count == 0 {
            holders.remove(topic);
            return true;
        }
        false
    }
}

/// One session's hold on a topic; released on drop if not released before.
#[derive(Debug)]
pub struct TopicLease {
    topic: String,
    leases: TopicLeases,
    released: bool,
}

impl TopicLease {
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Gives up the hold. Returns whether no session holds the topic any
    /// more; decrement and check happen under one lock.
    pub fn release(mut self) -> bool {
        self.released = true;
        self.leases.release(&self.topic)
    }
}

impl Drop for TopicLease {
    fn drop(&mut self) {
        if !self.released {
            self.leases.release(&self.topic);
        }
    }
}
