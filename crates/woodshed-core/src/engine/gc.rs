//! Deferred deallocation for audio-thread data.
//!
//! Freeing a multi-minute clip is a syscall-heavy operation that has no
//! business inside an audio callback. Clips handed to the audio thread are
//! wrapped in `basedrop::Shared`; dropping the last reference there only
//! enqueues a pointer, and a collector thread owned by the engine reclaims
//! the memory at its leisure.
//!
//! The collector is engine-owned rather than a process global: sessions
//! hold a clone of the handle, and the thread shuts down when the last
//! owner drops.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};
use std::thread;
use std::time::Duration;

use basedrop::{Collector, Handle};

/// How often the collector sweeps; reclamation latency, not audio latency.
const SWEEP_INTERVAL: Duration = Duration::from_millis(100);

/// Engine-owned basedrop collector thread.
pub struct AudioGc {
    handle: Handle,
    shutdown: Arc<AtomicBool>,
    thread: Option<thread::JoinHandle<()>>,
}

impl AudioGc {
    /// Spawn the collector thread and return its owner.
    pub fn spawn() -> Self {
        let shutdown = Arc::new(AtomicBool::new(false));
        let shutdown_flag = Arc::clone(&shutdown);
        let (handle_tx, handle_rx) = mpsc::channel();

        let thread = thread::Builder::new()
            .name("audio-gc".to_string())
            .spawn(move || {
                // Collector is !Send; it lives its whole life on this thread
                let mut collector = Collector::new();
                if handle_tx.send(collector.handle()).is_err() {
                    return;
                }
                while !shutdown_flag.load(Ordering::Acquire) {
                    collector.collect();
                    thread::park_timeout(SWEEP_INTERVAL);
                }
                // Final sweep so shutdown does not strand queued drops
                collector.collect();
            })
            .expect("failed to spawn audio-gc thread");

        let handle = handle_rx
            .recv()
            .expect("audio-gc thread died before sending its handle");

        Self {
            handle,
            shutdown,
            thread: Some(thread),
        }
    }

    /// Handle for wrapping values in `basedrop::Shared`
    pub fn handle(&self) -> Handle {
        self.handle.clone()
    }
}

impl Drop for AudioGc {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::Release);
        if let Some(thread) = self.thread.take() {
            thread.thread().unpark();
            let _ = thread.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use basedrop::Shared;

    #[test]
    fn shared_values_survive_and_collect() {
        let gc = AudioGc::spawn();
        let value = Shared::new(&gc.handle(), vec![1.0f32; 1024]);
        let clone = value.clone();
        assert_eq!(clone.len(), 1024);
        drop(value);
        drop(clone);
        // Dropping the gc joins the collector, which sweeps the queue
        drop(gc);
    }

    #[test]
    fn shutdown_is_prompt() {
        let gc = AudioGc::spawn();
        let start = std::time::Instant::now();
        drop(gc);
        assert!(start.elapsed() < Duration::from_secs(2));
    }
}
