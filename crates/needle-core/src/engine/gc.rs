//! RT-safe deferred deallocation for tracks
//!
//! A loaded track can hold hundreds of megabytes of PCM. When a deck swaps
//! tracks, the previous one may be released while the audio thread still
//! holds the last reference. Wrapping tracks in `basedrop::Shared` means the
//! final drop only enqueues the pointer; a dedicated collector thread does
//! the actual free.
//!
//! ```ignore
//! use basedrop::Shared;
//! use crate::engine::gc::gc_handle;
//!
//! let track = Shared::new(&gc_handle(), track);
//! drop(track); // queued for the collector, not freed here
//! ```

use basedrop::{Collector, Handle};
use std::sync::mpsc;
use std::sync::OnceLock;
use std::thread;
use std::time::Duration;

/// Interval between collection passes
const COLLECT_INTERVAL: Duration = Duration::from_millis(100);

static GC_HANDLE: OnceLock<Handle> = OnceLock::new();

fn init_gc() -> Handle {
    let (tx, rx) = mpsc::channel();

    thread::Builder::new()
        .name("track-gc".to_string())
        .spawn(move || {
            // Collector is !Sync, so it lives on this thread
            let mut collector = Collector::new();
            tx.send(collector.handle()).expect("Failed to send GC handle");

            log::info!("Track GC thread started");

            loop {
                collector.collect();
                thread::sleep(COLLECT_INTERVAL);
            }
        })
        .expect("Failed to spawn track GC thread");

    rx.recv().expect("Failed to receive GC handle")
}

/// Handle for creating `Shared<T>` allocations
pub fn gc_handle() -> Handle {
    GC_HANDLE.get_or_init(init_gc).clone()
}

#[cfg(test)]
mod tests {
    use super::*;
    use basedrop::Shared;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    struct Flagged(Arc<AtomicBool>);

    impl Drop for Flagged {
        fn drop(&mut self) {
            self.0.store(true, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_drop_is_deferred_to_collector() {
        let dropped = Arc::new(AtomicBool::new(false));
        let shared = Shared::new(&gc_handle(), Flagged(Arc::clone(&dropped)));
        drop(shared);

        for _ in 0..50 {
            if dropped.load(Ordering::SeqCst) {
                return;
            }
            thread::sleep(Duration::from_millis(20));
        }
        panic!("collector never released the value");
    }
}
