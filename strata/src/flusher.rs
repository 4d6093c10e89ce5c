//! The background flusher: a worker thread that periodically writes every
//! dirty buffer-pool page back to disk.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crate::buffer_pool::BufferPool;
use crate::error::Result;

pub const DEFAULT_FLUSH_INTERVAL: Duration = Duration::from_secs(20);

/// Handle to the flusher thread. Shutting down awaits any in-flight flush
/// and then performs one final `flush_all`.
pub struct Flusher {
    pool: Arc<BufferPool>,
    stop: Arc<AtomicBool>,
    handle: Option<thread::JoinHandle<()>>,
}

impl Flusher {
    pub fn start(pool: Arc<BufferPool>, interval: Duration) -> Self {
        let stop = Arc::new(AtomicBool::new(false));

        let pool_clone = pool.clone();
        let stop_clone = stop.clone();
        let handle = thread::Builder::new()
            .name("strata-flusher".into())
            .spawn(move || {
                let mut last_flush = Instant::now();
                while !stop_clone.load(Ordering::SeqCst) {
                    // Short ticks keep shutdown prompt without busy-waiting.
                    thread::sleep(Duration::from_millis(20).min(interval));
                    if last_flush.elapsed() < interval {
                        continue;
                    }
                    crate::strata_debug_log!("[flusher] flush_all");
                    if let Err(e) = pool_clone.flush_all() {
                        eprintln!("[flusher] flush_all failed: {e}");
                    }
                    last_flush = Instant::now();
                }
            })
            .expect("spawning the flusher thread");

        Flusher {
            pool,
            stop,
            handle: Some(handle),
        }
    }

    /// Stop the worker, wait for it, then flush once more.
    pub fn shutdown(&mut self) -> Result<()> {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
            self.pool.flush_all()?;
        }
        Ok(())
    }
}

impl Drop for Flusher {
    fn drop(&mut self) {
        if let Err(e) = self.shutdown() {
            eprintln!("[flusher] shutdown flush failed: {e}");
        }
    }
}
