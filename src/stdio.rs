//! Stdio Router (SPEC_FULL.md §4.K): a shared input queue used by
//! interactive process consumers, plus plain output-sink callbacks.

use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

/// A FIFO byte queue with one-shot waiters, shared between a writer (the
/// embedder's terminal, or a process's stdin feed) and a reader (the
/// process's stdin-reading closure).
#[derive(Clone)]
pub struct StdinQueue {
    inner: Arc<(Mutex<VecDeque<u8>>, Condvar)>,
    closed: Arc<Mutex<bool>>,
}

impl StdinQueue {
    pub fn new() -> Self {
        StdinQueue {
            inner: Arc::new((Mutex::new(VecDeque::new()), Condvar::new())),
            closed: Arc::new(Mutex::new(false)),
        }
    }

    pub fn push(&self, data: &[u8]) {
        let (queue, cv) = &*self.inner;
        let mut queue = queue.lock();
        queue.extend(data.iter().copied());
        cv.notify_all();
    }

    pub fn close(&self) {
        *self.closed.lock() = true;
        self.inner.1.notify_all();
    }

    pub fn is_closed(&self) -> bool {
        *self.closed.lock()
    }

    /// Non-blocking read: returns an empty vector immediately if nothing is
    /// queued, splitting at most `max` bytes off the front otherwise.
    pub fn read(&self, max: usize) -> Vec<u8> {
        let (queue, _) = &*self.inner;
        let mut queue = queue.lock();
        drain(&mut queue, max)
    }

    /// Blocks until at least one byte is available, the queue is closed, or
    /// `timeout` elapses (used by batch mode, which reads the whole
    /// concatenated queue up front and never truly waits past closure).
    pub fn blocking_read(&self, max: usize, timeout: Duration) -> Vec<u8> {
        let (queue, cv) = &*self.inner;
        let mut queue = queue.lock();
        if queue.is_empty() && !self.is_closed() {
            cv.wait_for(&mut queue, timeout);
        }
        drain(&mut queue, max)
    }
}

impl Default for StdinQueue {
    fn default() -> Self {
        StdinQueue::new()
    }
}

fn drain(queue: &mut VecDeque<u8>, max: usize) -> Vec<u8> {
    let take = max.min(queue.len());
    queue.drain(..take).collect()
}

/// Plain callback sinks for stdout/stderr, matching §4.K's "output sinks
/// are plain callbacks to the embedder's terminal".
pub struct OutputSink {
    on_write: Box<dyn Fn(&[u8]) + Send + Sync>,
}

impl OutputSink {
    pub fn new(on_write: impl Fn(&[u8]) + Send + Sync + 'static) -> Self {
        OutputSink {
            on_write: Box::new(on_write),
        }
    }

    pub fn write(&self, data: &[u8]) {
        (self.on_write)(data);
    }
}
