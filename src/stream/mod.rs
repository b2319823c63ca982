//! Stream & Pollable Primitives (SPEC_FULL.md §4.F).
//!
//! Input and output streams wrap plain closures rather than concrete I/O
//! types, mirroring the way the teacher crate's `io_ops` module separates
//! the blocking and non-blocking backends behind one trait. `splice` is not
//! part of this surface (§4.F).

use std::sync::Arc;

/// A subscription object reporting readiness. A *ready* pollable is always
/// ready and never blocks; other pollables block until their backing
/// channel signals.
pub trait Pollable: Send + Sync {
    fn block(&self);
    fn ready(&self) -> bool;
}

/// A pollable that is always ready, used when the underlying resource
/// (an in-memory buffer, a closed stream) is immediately available.
pub struct ReadyPollable;

impl Pollable for ReadyPollable {
    fn block(&self) {}
    fn ready(&self) -> bool {
        true
    }
}

/// A custom input stream wrapping a closure supplying `blocking_read`; the
/// non-blocking variants are derived (§4.F).
pub struct CustomInputStream {
    blocking_read: Box<dyn Fn(usize) -> Vec<u8> + Send + Sync>,
    has_data: Box<dyn Fn() -> bool + Send + Sync>,
}

impl CustomInputStream {
    pub fn new(
        blocking_read: impl Fn(usize) -> Vec<u8> + Send + Sync + 'static,
        has_data: impl Fn() -> bool + Send + Sync + 'static,
    ) -> Self {
        CustomInputStream {
            blocking_read: Box::new(blocking_read),
            has_data: Box::new(has_data),
        }
    }

    /// Non-blocking read: returns an empty slice when nothing is ready yet.
    pub fn read(&self, len: usize) -> Vec<u8> {
        if (self.has_data)() {
            (self.blocking_read)(len)
        } else {
            Vec::new()
        }
    }

    pub fn blocking_read(&self, len: usize) -> Vec<u8> {
        (self.blocking_read)(len)
    }

    pub fn skip(&self, len: usize) -> usize {
        self.read(len).len()
    }

    pub fn blocking_skip(&self, len: usize) -> usize {
        self.blocking_read(len).len()
    }

    pub fn subscribe(&self) -> Arc<dyn Pollable> {
        Arc::new(ReadyPollable)
    }
}

/// A custom output stream wrapping write/flush callbacks; `write_zeroes`
/// and its blocking variant are derived from `write` (§4.F).
pub struct CustomOutputStream {
    write: Box<dyn Fn(&[u8]) -> std::io::Result<()> + Send + Sync>,
    flush: Box<dyn Fn() -> std::io::Result<()> + Send + Sync>,
    check_write: Box<dyn Fn() -> u64 + Send + Sync>,
}

impl CustomOutputStream {
    pub fn new(
        write: impl Fn(&[u8]) -> std::io::Result<()> + Send + Sync + 'static,
        flush: impl Fn() -> std::io::Result<()> + Send + Sync + 'static,
        check_write: impl Fn() -> u64 + Send + Sync + 'static,
    ) -> Self {
        CustomOutputStream {
            write: Box::new(write),
            flush: Box::new(flush),
            check_write: Box::new(check_write),
        }
    }

    pub fn check_write(&self) -> u64 {
        (self.check_write)()
    }

    pub fn write(&self, data: &[u8]) -> std::io::Result<()> {
        (self.write)(data)
    }

    pub fn blocking_write_and_flush(&self, data: &[u8]) -> std::io::Result<()> {
        (self.write)(data)?;
        (self.flush)()
    }

    pub fn flush(&self) -> std::io::Result<()> {
        (self.flush)()
    }

    pub fn blocking_flush(&self) -> std::io::Result<()> {
        (self.flush)()
    }

    pub fn write_zeroes(&self, len: u64) -> std::io::Result<()> {
        (self.write)(&vec![0u8; len as usize])
    }

    pub fn blocking_write_zeroes(&self, len: u64) -> std::io::Result<()> {
        self.write_zeroes(len)?;
        (self.flush)()
    }

    pub fn subscribe(&self) -> Arc<dyn Pollable> {
        Arc::new(ReadyPollable)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[test]
    fn input_stream_derives_non_blocking_from_closure() {
        let buf = Arc::new(Mutex::new(b"hello".to_vec()));
        let read_buf = buf.clone();
        let has_buf = buf.clone();
        let stream = CustomInputStream::new(
            move |n| {
                let mut b = read_buf.lock();
                let take = n.min(b.len());
                b.drain(..take).collect()
            },
            move || !has_buf.lock().is_empty(),
        );
        assert_eq!(stream.read(3), b"hel");
        assert_eq!(stream.read(10), b"lo");
        assert_eq!(stream.read(10), Vec::<u8>::new());
    }

    #[test]
    fn output_stream_write_zeroes() {
        let out = Arc::new(Mutex::new(Vec::new()));
        let write_out = out.clone();
        let stream = CustomOutputStream::new(
            move |data| {
                write_out.lock().extend_from_slice(data);
                Ok(())
            },
            || Ok(()),
            || 1024,
        );
        stream.write_zeroes(3).unwrap();
        assert_eq!(*out.lock(), vec![0, 0, 0]);
    }

    #[test]
    fn ready_pollable_never_blocks() {
        let pollable = ReadyPollable;
        assert!(pollable.ready());
        pollable.block();
    }
}
