//! Growable FIFO byte queue with bulk socket fill and drain.

use std::io::{self, ErrorKind};

use crate::connect::Socket;

const INITIAL_CAPACITY: usize = 4096;

/// How a bulk socket transfer stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transfer {
    /// The socket would block. Carries the bytes moved before it did.
    Blocked(usize),
    /// The read limit was reached, or the queue ran empty.
    Complete(usize),
    /// The peer closed its side after the given bytes were read.
    Eof(usize),
}

impl Transfer {
    pub fn bytes(&self) -> usize {
        match *self {
            Transfer::Blocked(n) | Transfer::Complete(n) | Transfer::Eof(n) => n,
        }
    }

    pub fn is_eof(&self) -> bool {
        matches!(self, Transfer::Eof(_))
    }
}

/// A byte FIFO over one contiguous allocation.
///
/// Unread bytes live in `storage[read..write]`. When an append does not fit
/// in the tail the unread bytes move to offset 0. If they still do not fit
/// the storage grows to `size + capacity + requested`. Storage never shrinks.
#[derive(Debug)]
pub struct ByteQueue {
    storage: Vec<u8>,
    read: usize,
    write: usize,
}

impl Default for ByteQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl ByteQueue {
    pub fn new() -> Self {
        Self::with_capacity(INITIAL_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        ByteQueue {
            storage: vec![0; capacity],
            read: 0,
            write: 0,
        }
    }

    /// Number of unread bytes.
    pub fn size(&self) -> usize {
        self.write - self.read
    }

    pub fn is_empty(&self) -> bool {
        self.read == self.write
    }

    pub fn capacity(&self) -> usize {
        self.storage.len()
    }

    /// The unread bytes, oldest first.
    pub fn as_slice(&self) -> &[u8] {
        &self.storage[self.read..self.write]
    }

    /// Drop every unread byte. Capacity is kept.
    pub fn clear(&mut self) {
        self.read = 0;
        self.write = 0;
    }

    pub fn append(&mut self, bytes: &[u8]) {
        self.reserve(bytes.len());
        self.storage[self.write..self.write + bytes.len()].copy_from_slice(bytes);
        self.write += bytes.len();
    }

    pub fn append_u8(&mut self, x: u8) {
        self.append(&[x]);
    }

    pub fn append_u16(&mut self, x: u16) {
        self.append(&x.to_be_bytes());
    }

    pub fn append_u32(&mut self, x: u32) {
        self.append(&x.to_be_bytes());
    }

    pub fn append_u64(&mut self, x: u64) {
        self.append(&x.to_be_bytes());
    }

    /// Remove and return the first `n` bytes.
    ///
    /// # Panics
    ///
    /// Panics if fewer than `n` bytes are queued.
    pub fn extract(&mut self, n: usize) -> Vec<u8> {
        let mut out = vec![0; n];
        self.extract_into(&mut out);
        out
    }

    /// Fill `buf` from the head of the queue.
    ///
    /// # Panics
    ///
    /// Panics if fewer than `buf.len()` bytes are queued.
    pub fn extract_into(&mut self, buf: &mut [u8]) {
        let n = buf.len();
        assert!(
            n <= self.size(),
            "extract of {n} bytes from a queue holding {}",
            self.size()
        );
        buf.copy_from_slice(&self.storage[self.read..self.read + n]);
        self.consume(n);
    }

    pub fn extract_u8(&mut self) -> u8 {
        u8::from_be_bytes(self.extract_array())
    }

    pub fn extract_u16(&mut self) -> u16 {
        u16::from_be_bytes(self.extract_array())
    }

    pub fn extract_u32(&mut self) -> u32 {
        u32::from_be_bytes(self.extract_array())
    }

    pub fn extract_u64(&mut self) -> u64 {
        u64::from_be_bytes(self.extract_array())
    }

    fn extract_array<const N: usize>(&mut self) -> [u8; N] {
        let mut out = [0; N];
        self.extract_into(&mut out);
        out
    }

    /// Read from `socket` until it would block, reaches EOF, or `limit`
    /// bytes have been queued.
    ///
    /// Fatal errors are returned as `Err`; bytes read before the error stay
    /// queued.
    pub fn fill_from<S: Socket + ?Sized>(
        &mut self,
        socket: &mut S,
        limit: usize,
    ) -> io::Result<Transfer> {
        let mut total = 0;
        while total < limit {
            if self.tail_room() == 0 {
                let want = (limit - total).min(self.capacity().max(INITIAL_CAPACITY));
                if self.size() < self.capacity() {
                    self.compact();
                } else {
                    self.grow(want);
                }
            }
            let room = self.tail_room().min(limit - total);
            match socket.try_recv(&mut self.storage[self.write..self.write + room]) {
                Ok(0) => return Ok(Transfer::Eof(total)),
                Ok(n) => {
                    self.write += n;
                    total += n;
                }
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) if e.kind() == ErrorKind::WouldBlock => return Ok(Transfer::Blocked(total)),
                Err(e) => return Err(e),
            }
        }
        Ok(Transfer::Complete(total))
    }

    /// Write queued bytes to `socket` until it would block or the queue is
    /// empty.
    pub fn drain_to<S: Socket + ?Sized>(&mut self, socket: &mut S) -> io::Result<Transfer> {
        let mut total = 0;
        while !self.is_empty() {
            match socket.try_send(self.as_slice()) {
                Ok(0) => {
                    return Err(io::Error::new(
                        ErrorKind::WriteZero,
                        "socket accepted no bytes",
                    ))
                }
                Ok(n) => {
                    self.consume(n);
                    total += n;
                }
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) if e.kind() == ErrorKind::WouldBlock => return Ok(Transfer::Blocked(total)),
                Err(e) => return Err(e),
            }
        }
        Ok(Transfer::Complete(total))
    }

    fn tail_room(&self) -> usize {
        self.capacity() - self.write
    }

    fn reserve(&mut self, len: usize) {
        if self.tail_room() >= len {
            return;
        }
        if self.size() + len <= self.capacity() {
            self.compact();
        } else {
            self.grow(len);
        }
    }

    /// Move the unread bytes to offset 0 without reallocating.
    fn compact(&mut self) {
        let size = self.size();
        self.storage.copy_within(self.read..self.write, 0);
        self.read = 0;
        self.write = size;
    }

    fn grow(&mut self, len: usize) {
        let size = self.size();
        let mut storage = vec![0; size + self.capacity() + len];
        storage[..size].copy_from_slice(self.as_slice());
        self.storage = storage;
        self.read = 0;
        self.write = size;
    }

    fn consume(&mut self, n: usize) {
        self.read += n;
        if self.read == self.write {
            self.clear();
        }
    }
}
