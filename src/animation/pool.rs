//! Frame buffer pool used while recording.

use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam::queue::SegQueue;
use log::{debug, warn};

/// Lock-free queue of frame-sized byte buffers.
///
/// Every pooled buffer has exactly the current frame size; changing the size
/// empties the pool. When the pool runs dry a buffer is allocated on demand
/// and the miss is counted.
#[derive(Debug)]
pub struct BufferPool {
    queue: SegQueue<Vec<u8>>,
    frame_size: AtomicUsize,
    low_water_mark: usize,
    batch_size: usize,
    misses: AtomicU64,
}

impl BufferPool {
    pub fn new(low_water_mark: usize, batch_size: usize) -> Self {
        Self {
            queue: SegQueue::new(),
            frame_size: AtomicUsize::new(0),
            low_water_mark,
            batch_size: batch_size.max(1),
            misses: AtomicU64::new(0),
        }
    }

    pub fn frame_size(&self) -> usize {
        self.frame_size.load(Ordering::Acquire)
    }

    /// Buffers currently pooled.
    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Times `acquire` had to allocate because the pool was empty.
    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    /// Set the frame size. Returns true and clears the pool if it changed.
    pub fn configure(&self, frame_size: usize) -> bool {
        let previous = self.frame_size.swap(frame_size, Ordering::AcqRel);
        if previous == frame_size {
            return false;
        }
        let mut dropped = 0usize;
        while self.queue.pop().is_some() {
            dropped += 1;
        }
        debug!(
            "Buffer pool resized {} -> {} bytes, dropped {} buffers",
            previous, frame_size, dropped
        );
        true
    }

    /// Take a buffer of the current frame size.
    pub fn acquire(&self) -> Vec<u8> {
        let size = self.frame_size();
        while let Some(buffer) = self.queue.pop() {
            // a top-up racing a resize can leave an old-size buffer behind
            if buffer.len() == size {
                return buffer;
            }
        }
        self.misses.fetch_add(1, Ordering::Relaxed);
        warn!("Buffer pool exhausted, allocating a {}-byte frame", size);
        vec![0u8; size]
    }

    /// Return a buffer. Buffers of a stale size are dropped.
    pub fn release(&self, buffer: Vec<u8>) {
        if buffer.len() == self.frame_size() {
            self.queue.push(buffer);
        }
    }

    /// Add one batch if the pool is below its low-water mark.
    /// Returns the number of buffers added.
    pub fn top_up(&self) -> usize {
        if self.queue.len() >= self.low_water_mark {
            return 0;
        }
        let size = self.frame_size();
        if size == 0 {
            return 0;
        }
        for _ in 0..self.batch_size {
            self.queue.push(vec![0u8; size]);
        }
        self.batch_size
    }

    /// Top up repeatedly until the low-water mark is reached.
    pub fn fill(&self) {
        while self.top_up() > 0 {}
    }
}

/// Background thread that keeps a [`BufferPool`] above its low-water mark.
pub struct TopUpWorker {
    running: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl TopUpWorker {
    pub fn spawn(pool: Arc<BufferPool>, interval: Duration) -> io::Result<Self> {
        let running = Arc::new(AtomicBool::new(true));
        let flag = running.clone();
        let handle = thread::Builder::new()
            .name("facelink-pool".into())
            .spawn(move || {
                while flag.load(Ordering::Acquire) {
                    pool.top_up();
                    thread::sleep(interval);
                }
            })?;
        Ok(Self {
            running,
            handle: Some(handle),
        })
    }

    pub fn stop(&mut self) {
        self.running.store(false, Ordering::Release);
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                warn!("Buffer pool top-up thread panicked");
            }
        }
    }
}

impl Drop for TopUpWorker {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_top_up_respects_low_water_mark() {
        let pool = BufferPool::new(10, 4);
        assert_eq!(pool.top_up(), 0, "no frame size yet");

        pool.configure(16);
        assert_eq!(pool.top_up(), 4);
        pool.fill();
        assert_eq!(pool.len(), 12);
        assert_eq!(pool.top_up(), 0);
    }

    #[test]
    fn test_resize_clears_pool() {
        let pool = BufferPool::new(8, 8);
        pool.configure(16);
        pool.fill();
        assert!(!pool.configure(16));
        assert_eq!(pool.len(), 8);

        assert!(pool.configure(32));
        assert!(pool.is_empty());
        pool.release(vec![0u8; 16]);
        assert!(pool.is_empty(), "stale-size buffer must be dropped");
    }

    #[test]
    fn test_exhausted_pool_allocates() {
        let pool = BufferPool::new(2, 1);
        pool.configure(8);
        pool.fill();
        assert_eq!(pool.len(), 2);

        let buffers: Vec<Vec<u8>> = (0..5).map(|_| pool.acquire()).collect();
        assert!(buffers.iter().all(|b| b.len() == 8));
        assert_eq!(pool.misses(), 3);

        for buffer in buffers {
            pool.release(buffer);
        }
        assert_eq!(pool.len(), 5);
    }

    #[test]
    fn test_worker_refills_in_background() {
        let pool = Arc::new(BufferPool::new(6, 3));
        pool.configure(4);
        let mut worker = TopUpWorker::spawn(pool.clone(), Duration::from_millis(1)).unwrap();

        let deadline = std::time::Instant::now() + Duration::from_secs(2);
        while pool.len() < 6 && std::time::Instant::now() < deadline {
            thread::sleep(Duration::from_millis(2));
        }
        worker.stop();
        assert!(pool.len() >= 6);
    }
}
