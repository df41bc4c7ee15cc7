use std::{
    ops::{Deref, DerefMut},
    sync::Arc,
};

use crate::Encoder;

/// Raw serializer for a buffer pool
pub trait Serialize {
    /// The message type this serializer writes.
    type Message;

    /// Write one complete frame for `message` into a pooled buffer.
    ///
    /// The buffer is empty when you receive it.
    fn serialize_into_buffer(&mut self, message: Self::Message, buffer: &mut Vec<u8>);
}

/// An encoder that wraps a serializer, offering it raw byte vectors. These vectors
/// are reset and reused to minimize allocation cost.
#[derive(Debug)]
pub struct PooledEncoder<TSerializer> {
    serializer: TSerializer,
    reused_buffers: Arc<crossbeam::queue::ArrayQueue<Vec<u8>>>,
}

impl<TSerializer> PooledEncoder<TSerializer>
where
    TSerializer: Serialize,
{
    /// Create a pooled encoder with default pool size.
    ///
    /// Small pools do well even on busy connections: when demand outgrows the pool,
    /// the extra buffers are simply allocated and dropped.
    pub fn new(serializer: TSerializer) -> Self {
        Self::new_with_pool_size(8, serializer)
    }

    /// Create a pooled encoder with explicit pool size.
    pub fn new_with_pool_size(pool_size: usize, serializer: TSerializer) -> Self {
        Self {
            serializer,
            reused_buffers: Arc::new(crossbeam::queue::ArrayQueue::new(pool_size.max(1))),
        }
    }
}

impl<TSerializer> Default for PooledEncoder<TSerializer>
where
    TSerializer: Serialize + Default,
{
    fn default() -> Self {
        Self::new_with_pool_size(8, TSerializer::default())
    }
}

impl<TSerializer> Encoder for PooledEncoder<TSerializer>
where
    TSerializer: Serialize,
{
    type Message = TSerializer::Message;
    type Serialized = Reusable;

    fn encode(&mut self, message: Self::Message) -> Self::Serialized {
        let mut buffer = self.reused_buffers.pop().unwrap_or_default();
        self.serializer.serialize_into_buffer(message, &mut buffer);
        Reusable::new(buffer, self.reused_buffers.clone())
    }
}

/// A reusable wrapper for a serializer buffer, which can be treated as a bytes::Buf.
///
/// The buffer goes back to its pool when this is dropped.
#[derive(Debug)]
pub struct Reusable {
    inner: Vec<u8>,
    cursor: usize,
    reused_buffers: Arc<crossbeam::queue::ArrayQueue<Vec<u8>>>,
}

impl Reusable {
    fn new(buffer: Vec<u8>, reused_buffers: Arc<crossbeam::queue::ArrayQueue<Vec<u8>>>) -> Self {
        Self {
            inner: buffer,
            cursor: 0,
            reused_buffers,
        }
    }
}

impl Drop for Reusable {
    fn drop(&mut self) {
        self.inner.clear();
        // don't worry about it if the reuse queue is full
        let _ = self.reused_buffers.push(std::mem::take(&mut self.inner));
    }
}

impl bytes::Buf for Reusable {
    #[inline(always)]
    fn remaining(&self) -> usize {
        self.inner.len() - self.cursor
    }

    #[inline(always)]
    fn chunk(&self) -> &[u8] {
        &self.inner[self.cursor..]
    }

    #[inline(always)]
    fn advance(&mut self, cnt: usize) {
        assert!(
            self.cursor + cnt <= self.inner.len(),
            "cannot advance past the end of the buffer"
        );
        self.cursor += cnt;
    }
}

impl Deref for Reusable {
    type Target = [u8];

    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}

impl DerefMut for Reusable {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.inner
    }
}
