use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

/// Sliding-window request counter keyed by client address.
#[derive(Debug, Clone)]
pub struct ClientRateLimiter {
    hits: Arc<Mutex<HashMap<String, VecDeque<Instant>>>>,
    window: Duration,
    max_requests: usize,
}

impl ClientRateLimiter {
    pub fn new(window: Duration, max_requests: usize) -> Self {
        Self {
            hits: Arc::new(Mutex::new(HashMap::new())),
            window,
            max_requests,
        }
    }

    pub fn allow(&self, client: &str) -> bool {
        self.allow_at(client, Instant::now())
    }

    #[cfg(test)]
    fn tracked_clients(&self) -> usize {
        self.hits.lock().len()
    }

    fn allow_at(&self, client: &str, now: Instant) -> bool {
        let mut hits = self.hits.lock();

        // Clients whose whole history has aged out are forgotten.
        hits.retain(|_, queue| {
            self.expire(queue, now);
            !queue.is_empty()
        });

        let queue = hits.entry(client.to_string()).or_default();
        if queue.len() >= self.max_requests {
            return false;
        }

        queue.push_back(now);
        true
    }

    fn expire(&self, queue: &mut VecDeque<Instant>, now: Instant) {
        while queue
            .front()
            .is_some_and(|first| now.duration_since(*first) > self.window)
        {
            queue.pop_front();
        }
    }
}
