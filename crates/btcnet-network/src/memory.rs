//! # Buffer Pool
//!
//! Reusable payload buffers for large message deserialization. Block
//! payloads run to megabytes; recycling their backing storage keeps the
//! read loop from reallocating per message.

use std::ops::{Deref, DerefMut};
use std::sync::Arc;

use parking_lot::Mutex;

const DEFAULT_CAPACITY: usize = 32;
const DEFAULT_BUFFER_SIZE: usize = 64 * 1024;

/// Thread-safe pool of reusable byte buffers; clones share the pool.
#[derive(Clone)]
pub struct BufferPool {
    buffers: Arc<Mutex<Vec<Vec<u8>>>>,
    capacity: usize,
    buffer_size: usize,
}

impl BufferPool {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY, DEFAULT_BUFFER_SIZE)
    }

    pub fn with_capacity(capacity: usize, buffer_size: usize) -> Self {
        Self {
            buffers: Arc::new(Mutex::new(Vec::with_capacity(capacity))),
            capacity,
            buffer_size,
        }
    }

    /// Take a cleared buffer; allocates when the pool is dry.
    pub fn get(&self) -> PooledBuffer {
        let buffer = self
            .buffers
            .lock()
            .pop()
            .unwrap_or_else(|| Vec::with_capacity(self.buffer_size));

        PooledBuffer {
            buffer: Some(buffer),
            pool: self.clone(),
        }
    }

    /// Buffers currently idle in the pool.
    pub fn idle(&self) -> usize {
        self.buffers.lock().len()
    }

    fn put(&self, mut buffer: Vec<u8>) {
        let mut buffers = self.buffers.lock();
        if buffers.len() < self.capacity {
            buffer.clear();
            buffers.push(buffer);
        }
    }
}

impl Default for BufferPool {
    fn default() -> Self {
        Self::new()
    }
}

/// A buffer on loan from the pool; returns on drop.
pub struct PooledBuffer {
    buffer: Option<Vec<u8>>,
    pool: BufferPool,
}

impl Deref for PooledBuffer {
    type Target = Vec<u8>;

    fn deref(&self) -> &Vec<u8> {
        self.buffer.as_ref().expect("buffer present until drop")
    }
}

impl DerefMut for PooledBuffer {
    fn deref_mut(&mut self) -> &mut Vec<u8> {
        self.buffer.as_mut().expect("buffer present until drop")
    }
}

impl Drop for PooledBuffer {
    fn drop(&mut self) {
        if let Some(buffer) = self.buffer.take() {
            self.pool.put(buffer);
        }
    }
}
