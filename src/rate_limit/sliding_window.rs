//! Sliding window rate limiter.
//!
//! Admits a request only if fewer than `max_requests` were admitted within
//! the trailing window. Unlike the token bucket, capacity restores
//! continuously as old admissions age out rather than in refill ticks.

use crate::error::RateLimitError;
use anyhow::Result;
use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::{Duration, Instant};

pub struct SlidingWindowRateLimiter {
    window_size: Duration,
    max_requests: usize,
    requests: Mutex<VecDeque<Instant>>,
}

impl SlidingWindowRateLimiter {
    pub fn new(window_size: Duration, max_requests: usize) -> Self {
        Self {
            window_size,
            max_requests,
            requests: Mutex::new(VecDeque::with_capacity(max_requests)),
        }
    }

    /// Blocks until a slot is available in the current window.
    pub async fn wait(&self) {
        loop {
            let wait = {
                let mut requests = self.requests.lock().unwrap();
                Self::cleanup(&mut requests, self.window_size);

                if requests.len() < self.max_requests {
                    requests.push_back(Instant::now());
                    return;
                }

                // Oldest admission leaves the window first
                let oldest = requests[0];
                self.window_size.saturating_sub(oldest.elapsed())
            };

            if wait.is_zero() {
                continue;
            }
            tokio::time::sleep(wait).await;
        }
    }

    /// Like [`wait`](Self::wait), but gives up after `timeout`.
    pub async fn wait_timeout(&self, timeout: Duration) -> Result<()> {
        match tokio::time::timeout(timeout, self.wait()).await {
            Ok(()) => Ok(()),
            Err(_) => {
                let retry_after = {
                    let mut requests = self.requests.lock().unwrap();
                    Self::cleanup(&mut requests, self.window_size);
                    requests
                        .front()
                        .map(|oldest| self.window_size.saturating_sub(oldest.elapsed()))
                        .unwrap_or(Duration::ZERO)
                };
                Err(RateLimitError::new(retry_after).into())
            }
        }
    }

    /// Attempts to take a slot without blocking.
    pub fn try_acquire(&self) -> bool {
        let mut requests = self.requests.lock().unwrap();
        Self::cleanup(&mut requests, self.window_size);

        if requests.len() < self.max_requests {
            requests.push_back(Instant::now());
            true
        } else {
            false
        }
    }

    /// Slots available in the current window after cleanup.
    pub fn available(&self) -> usize {
        let mut requests = self.requests.lock().unwrap();
        Self::cleanup(&mut requests, self.window_size);
        self.max_requests - requests.len()
    }

    /// Evicts admissions older than the window.
    fn cleanup(requests: &mut VecDeque<Instant>, window_size: Duration) {
        while let Some(oldest) = requests.front() {
            if oldest.elapsed() > window_size {
                requests.pop_front();
            } else {
                break;
            }
        }
    }
}
