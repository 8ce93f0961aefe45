//! Process-wide pool of output buffers.

use std::ops::{Deref, DerefMut};
use std::sync::LazyLock;

use crossbeam::channel::{Receiver, Sender};

const POOL_SIZE: usize = 32;

static BUFFERS: LazyLock<BufferPool> = LazyLock::new(|| BufferPool::new(POOL_SIZE));

/// Take a cleared buffer from the shared pool, allocating when it is empty.
pub fn acquire() -> PooledBuffer {
    BUFFERS.get()
}

struct BufferPool {
    sender: Sender<Vec<u8>>,
    receiver: Receiver<Vec<u8>>,
}

impl BufferPool {
    fn new(size: usize) -> Self {
        let (sender, receiver) = crossbeam::channel::bounded(size);
        BufferPool { sender, receiver }
    }

    fn get(&self) -> PooledBuffer {
        let mut buf = self.receiver.try_recv().unwrap_or_default();
        buf.clear();
        PooledBuffer {
            buf: Some(buf),
            pool: self.sender.clone(),
        }
    }
}

/// A byte buffer on loan from the pool; dropping it hands the allocation
/// back (or releases it when the pool is full).
#[derive(Debug)]
pub struct PooledBuffer {
    buf: Option<Vec<u8>>,
    pool: Sender<Vec<u8>>,
}

impl Deref for PooledBuffer {
    type Target = Vec<u8>;

    fn deref(&self) -> &Vec<u8> {
        // buf is always Some until Drop runs
        self.buf.as_ref().expect("BUG: buffer already returned")
    }
}

impl DerefMut for PooledBuffer {
    fn deref_mut(&mut self) -> &mut Vec<u8> {
        // buf is always Some until Drop runs
        self.buf.as_mut().expect("BUG: buffer already returned")
    }
}

impl Drop for PooledBuffer {
    fn drop(&mut self) {
        if let Some(buf) = self.buf.take() {
            let _ = self.pool.try_send(buf);
        }
    }
}
