//! Cooperative quit signal
//!
//! Any thread may request quit. Loops either poll [`Shutdown::is_requested`]
//! or sleep in [`Shutdown::wait_timeout`], which returns as soon as quit is
//! requested instead of at the end of the tick.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Condvar, Mutex};
use std::time::Duration;

#[derive(Debug, Default)]
pub struct Shutdown {
    requested: AtomicBool,
    lock: Mutex<()>,
    wake: Condvar,
}

impl Shutdown {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request(&self) {
        // Taking the lock orders the store against a waiter's check
        let _guard = self.lock.lock().unwrap_or_else(|p| p.into_inner());
        self.requested.store(true, Ordering::Release);
        self.wake.notify_all();
    }

    #[inline]
    pub fn is_requested(&self) -> bool {
        self.requested.load(Ordering::Acquire)
    }

    /// Sleep up to `timeout`; true if quit has been requested
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let guard = self.lock.lock().unwrap_or_else(|p| p.into_inner());
        let result = self
            .wake
            .wait_timeout_while(guard, timeout, |_| !self.is_requested());
        drop(result);
        self.is_requested()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use std::time::Instant;

    #[test]
    fn test_times_out_when_not_requested() {
        let shutdown = Shutdown::new();
        assert!(!shutdown.wait_timeout(Duration::from_millis(5)));
        assert!(!shutdown.is_requested());
    }

    #[test]
    fn test_request_wakes_waiter() {
        let shutdown = Arc::new(Shutdown::new());
        let waiter = {
            let shutdown = Arc::clone(&shutdown);
            thread::spawn(move || {
                let start = Instant::now();
                let quit = shutdown.wait_timeout(Duration::from_secs(10));
                (quit, start.elapsed())
            })
        };

        thread::sleep(Duration::from_millis(20));
        shutdown.request();
        let (quit, waited) = waiter.join().unwrap();
        assert!(quit);
        assert!(waited < Duration::from_secs(5));
    }

    #[test]
    fn test_requested_before_wait_returns_immediately() {
        let shutdown = Shutdown::new();
        shutdown.request();
        assert!(shutdown.wait_timeout(Duration::from_secs(10)));
    }
}
