//! Headless realtime driver
//!
//! Stands in for an audio device: runs [`Rig::process`] on a dedicated
//! thread once per block period with silent input, and throws the output
//! away. Used when no device is wanted or available, and in tests.

use std::io;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use super::{BlockBuffers, Rig};

/// Longest sleep between blocks, so quit is seen promptly with big blocks
const MAX_TICK: Duration = Duration::from_millis(10);

pub struct RealtimeLoop {
    handle: Option<JoinHandle<u64>>,
}

impl RealtimeLoop {
    /// Start driving `rig` in blocks of `frames`
    pub fn start(rig: Arc<Rig>, frames: usize) -> io::Result<Self> {
        let frames = frames.max(1);
        let period = Duration::from_secs_f64(frames as f64 / rig.sample_rate().max(1) as f64);

        let handle = thread::Builder::new()
            .name("realtime".to_string())
            .spawn(move || {
                log::info!("Headless realtime loop: {} frames every {:?}", frames, period);
                let shutdown = rig.shutdown_signal();
                let mut buffers = BlockBuffers::new(rig.deck_count(), frames);
                let mut blocks = 0u64;
                let mut deadline = Instant::now();

                while !shutdown.is_requested() {
                    let now = Instant::now();
                    if now >= deadline {
                        rig.process(&mut buffers);
                        blocks += 1;
                        deadline += period;
                        // Fell far behind; don't try to catch up in a burst
                        if now > deadline + period * 4 {
                            deadline = now + period;
                        }
                        continue;
                    }
                    shutdown.wait_timeout((deadline - now).min(MAX_TICK));
                }

                log::info!("Headless realtime loop stopped after {} blocks", blocks);
                blocks
            })?;

        Ok(Self {
            handle: Some(handle),
        })
    }

    /// Wait for the loop to exit after quit; returns blocks processed
    pub fn join(mut self) -> u64 {
        self.handle
            .take()
            .and_then(|handle| handle.join().ok())
            .unwrap_or(0)
    }
}

impl Drop for RealtimeLoop {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            if !handle.is_finished() {
                log::warn!("Realtime loop dropped while running; it stops on quit");
            }
        }
    }
}
