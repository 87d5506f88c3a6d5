// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Single-producer, single-consumer rings shared with the kernel
//!
//! Each ring has a producer cursor and a consumer cursor living in memory
//! the kernel also touches. A side owns exactly one of the two cursors and
//! keeps a cached copy of the opposite one so that steady-state batches
//! don't generate cross-domain loads. The cursor words are 32-bit per the
//! ABI; all arithmetic is modulo 2^32.
//!
//! Publication protocol: write entries, then release-store the advanced own
//! cursor. Observation protocol: acquire-load the opposite cursor before
//! declaring space or availability.

use crate::{
    if_xdp::{MmapOffsets, RingFlags, RingOffset, RxTxDescriptor, UmemDescriptor},
    mmap::Mmap,
    syscall,
};
use core::{
    mem::size_of,
    num::Wrapping,
    ptr::NonNull,
    sync::atomic::{AtomicU32, Ordering},
};
use std::{io::Result, os::unix::io::AsRawFd};

struct Cursor<T> {
    /// Local copy of the producer cursor; authoritative on the producer side
    cached_producer: Wrapping<u32>,
    /// Local copy of the consumer cursor; authoritative on the consumer side
    cached_consumer: Wrapping<u32>,
    depth: u32,
    mask: u32,
    producer: NonNull<AtomicU32>,
    consumer: NonNull<AtomicU32>,
    flags: NonNull<AtomicU32>,
    entries: NonNull<T>,
}

impl<T: Copy> Cursor<T> {
    /// # Safety
    ///
    /// `area` must be a live ring mapping laid out according to `offsets`,
    /// with space for `depth` entries of `T`.
    unsafe fn new(area: &Mmap, offsets: &RingOffset, depth: u32) -> Self {
        let base = area.addr().as_ptr();

        Self::from_raw(
            NonNull::new_unchecked(base.add(offsets.producer as usize) as _),
            NonNull::new_unchecked(base.add(offsets.consumer as usize) as _),
            NonNull::new_unchecked(base.add(offsets.flags as usize) as _),
            NonNull::new_unchecked(base.add(offsets.desc as usize) as _),
            depth,
        )
    }

    /// # Safety
    ///
    /// The pointers must outlive the cursor and `depth` must be a power of
    /// two matching the length of the entry array.
    unsafe fn from_raw(
        producer: NonNull<AtomicU32>,
        consumer: NonNull<AtomicU32>,
        flags: NonNull<AtomicU32>,
        entries: NonNull<T>,
        depth: u32,
    ) -> Self {
        debug_assert!(depth.is_power_of_two());

        Self {
            cached_producer: Wrapping(0),
            cached_consumer: Wrapping(0),
            depth,
            mask: depth - 1,
            producer,
            consumer,
            flags,
            entries,
        }
    }

    #[inline]
    fn producer(&self) -> &AtomicU32 {
        unsafe { self.producer.as_ref() }
    }

    #[inline]
    fn consumer(&self) -> &AtomicU32 {
        unsafe { self.consumer.as_ref() }
    }

    /// Number of filled entries according to the cached cursors
    #[inline]
    fn filled(&self) -> u32 {
        (self.cached_producer - self.cached_consumer).0
    }

    /// Number of free slots according to the cached cursors
    #[inline]
    fn free(&self) -> u32 {
        self.depth - self.filled()
    }

    /// Returns the number of free slots, reloading the shared consumer
    /// cursor only if the cached view can't satisfy `watermark`
    #[inline]
    fn acquire_free(&mut self, watermark: u32) -> u32 {
        let free = self.free();
        if free >= watermark {
            return free;
        }

        self.cached_consumer.0 = self.consumer().load(Ordering::Acquire);
        self.free()
    }

    /// Returns the number of filled entries, reloading the shared producer
    /// cursor only if the cached view can't satisfy `watermark`
    #[inline]
    fn acquire_filled(&mut self, watermark: u32) -> u32 {
        let filled = self.filled();
        if filled >= watermark {
            return filled;
        }

        self.cached_producer.0 = self.producer().load(Ordering::Acquire);
        self.filled()
    }

    /// Writes an entry `offset` slots past the producer cursor
    ///
    /// The slot must have been granted by `acquire_free`.
    #[inline]
    fn write(&mut self, offset: u32, entry: T) {
        let index = (self.cached_producer + Wrapping(offset)).0 & self.mask;
        unsafe { self.entries.as_ptr().add(index as usize).write(entry) }
    }

    /// Reads the entry `offset` slots past the consumer cursor
    ///
    /// The slot must have been granted by `acquire_filled`.
    #[inline]
    fn read(&self, offset: u32) -> T {
        let index = (self.cached_consumer + Wrapping(offset)).0 & self.mask;
        unsafe { self.entries.as_ptr().add(index as usize).read() }
    }

    /// Publishes `len` written entries to the opposite side
    #[inline]
    fn publish(&mut self, len: u32) {
        debug_assert!(len <= self.free());
        self.cached_producer += len;
        self.producer().store(self.cached_producer.0, Ordering::Release);
    }

    /// Returns `len` consumed entries to the opposite side
    #[inline]
    fn release(&mut self, len: u32) {
        debug_assert!(len <= self.filled());
        self.cached_consumer += len;
        self.consumer().store(self.cached_consumer.0, Ordering::Release);
    }

    #[inline]
    fn flags(&self) -> RingFlags {
        let bits = unsafe { self.flags.as_ref() }.load(Ordering::Relaxed);
        RingFlags::from_bits_truncate(bits)
    }
}

/// Keeps the memory behind a cursor alive
enum Backing {
    Kernel(#[allow(dead_code)] Mmap),
    #[cfg(test)]
    Local(#[allow(dead_code)] std::sync::Arc<dyn core::any::Any + Send + Sync>),
}

/// The owned half of a ring this side produces into
pub(crate) struct Producer<T> {
    cursor: Cursor<T>,
    #[allow(dead_code)]
    backing: Backing,
}

unsafe impl<T: Copy + Send> Send for Producer<T> {}

impl<T: Copy> Producer<T> {
    /// Publishes up to `entries.len()` entries, in order
    ///
    /// Returns the number actually published; the caller retains the tail.
    #[inline]
    pub fn enqueue(&mut self, entries: &[T]) -> usize {
        self.enqueue_from(entries, |entry| *entry)
    }

    /// Publishes up to `entries.len()` entries after mapping them through `f`
    #[inline]
    pub fn enqueue_from<U, F: Fn(&U) -> T>(&mut self, entries: &[U], f: F) -> usize {
        let count = self.cursor.acquire_free(entries.len() as u32);
        let count = (entries.len() as u32).min(count);

        if count == 0 {
            return 0;
        }

        for (offset, entry) in entries[..count as usize].iter().enumerate() {
            self.cursor.write(offset as u32, f(entry));
        }

        self.cursor.publish(count);
        count as usize
    }

    /// Number of free slots visible without touching shared memory
    #[inline]
    pub fn free(&mut self, watermark: u32) -> u32 {
        self.cursor.acquire_free(watermark)
    }

    #[inline]
    pub fn needs_wakeup(&self) -> bool {
        self.cursor.flags().contains(RingFlags::NEED_WAKEUP)
    }

    #[cfg(test)]
    pub fn cursor(&self) -> u32 {
        self.cursor.cached_producer.0
    }
}

/// The owned half of a ring this side consumes from
pub(crate) struct Consumer<T> {
    cursor: Cursor<T>,
    #[allow(dead_code)]
    backing: Backing,
}

unsafe impl<T: Copy + Send> Send for Consumer<T> {}

impl<T: Copy> Consumer<T> {
    /// Drains up to `entries.len()` entries, in order
    ///
    /// Returns the number actually drained.
    #[inline]
    pub fn dequeue(&mut self, entries: &mut [T]) -> usize {
        self.dequeue_into(entries, |entry| entry)
    }

    /// Drains up to `entries.len()` entries after mapping them through `f`
    #[inline]
    pub fn dequeue_into<U, F: Fn(T) -> U>(&mut self, entries: &mut [U], f: F) -> usize {
        let count = self.cursor.acquire_filled(entries.len() as u32);
        let count = (entries.len() as u32).min(count);

        if count == 0 {
            return 0;
        }

        for (offset, entry) in entries[..count as usize].iter_mut().enumerate() {
            *entry = f(self.cursor.read(offset as u32));
        }

        self.cursor.release(count);
        count as usize
    }

    /// Number of filled entries visible without touching shared memory
    #[inline]
    pub fn filled(&mut self, watermark: u32) -> u32 {
        self.cursor.acquire_filled(watermark)
    }

    #[inline]
    pub fn needs_wakeup(&self) -> bool {
        self.cursor.flags().contains(RingFlags::NEED_WAKEUP)
    }

    #[cfg(test)]
    pub fn cursor(&self) -> u32 {
        self.cursor.cached_consumer.0
    }
}

/// The Fill ring: this side hands frames to the kernel for receive
pub struct Fill(pub(crate) Producer<UmemDescriptor>);

impl Fill {
    pub(crate) fn new(fd: &impl AsRawFd, offsets: &MmapOffsets, depth: u32) -> Result<Self> {
        syscall::set_fill_ring_size(fd, depth)?;

        let len = offsets.fill.desc as usize + depth as usize * size_of::<UmemDescriptor>();
        let area = Mmap::new_ring(len, MmapOffsets::FILL_RING, fd)?;
        let cursor = unsafe { Cursor::new(&area, &offsets.fill, depth) };

        Ok(Self(Producer {
            cursor,
            backing: Backing::Kernel(area),
        }))
    }
}

/// The RX ring: the kernel hands this side received packets
pub struct Rx(pub(crate) Consumer<RxTxDescriptor>);

impl Rx {
    pub(crate) fn new(fd: &impl AsRawFd, offsets: &MmapOffsets, depth: u32) -> Result<Self> {
        syscall::set_rx_ring_size(fd, depth)?;

        let len = offsets.rx.desc as usize + depth as usize * size_of::<RxTxDescriptor>();
        let area = Mmap::new_ring(len, MmapOffsets::RX_RING, fd)?;
        let cursor = unsafe { Cursor::new(&area, &offsets.rx, depth) };

        Ok(Self(Consumer {
            cursor,
            backing: Backing::Kernel(area),
        }))
    }
}

/// The TX ring: this side hands the kernel packets to transmit
pub struct Tx(pub(crate) Producer<RxTxDescriptor>);

impl Tx {
    pub(crate) fn new(fd: &impl AsRawFd, offsets: &MmapOffsets, depth: u32) -> Result<Self> {
        syscall::set_tx_ring_size(fd, depth)?;

        let len = offsets.tx.desc as usize + depth as usize * size_of::<RxTxDescriptor>();
        let area = Mmap::new_ring(len, MmapOffsets::TX_RING, fd)?;
        let cursor = unsafe { Cursor::new(&area, &offsets.tx, depth) };

        Ok(Self(Producer {
            cursor,
            backing: Backing::Kernel(area),
        }))
    }
}

/// The Completion ring: the kernel returns transmitted frames here
pub struct Completion(pub(crate) Consumer<UmemDescriptor>);

impl Completion {
    pub(crate) fn new(fd: &impl AsRawFd, offsets: &MmapOffsets, depth: u32) -> Result<Self> {
        syscall::set_completion_ring_size(fd, depth)?;

        let len = offsets.completion.desc as usize + depth as usize * size_of::<UmemDescriptor>();
        let area = Mmap::new_ring(len, MmapOffsets::COMPLETION_RING, fd)?;
        let cursor = unsafe { Cursor::new(&area, &offsets.completion, depth) };

        Ok(Self(Consumer {
            cursor,
            backing: Backing::Kernel(area),
        }))
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use core::cell::UnsafeCell;
    use std::sync::Arc;

    /// Shared state standing in for a kernel ring mapping
    pub(crate) struct Shared<T> {
        producer: AtomicU32,
        consumer: AtomicU32,
        flags: AtomicU32,
        entries: Box<[UnsafeCell<T>]>,
    }

    unsafe impl<T: Copy + Send> Send for Shared<T> {}
    unsafe impl<T: Copy + Send> Sync for Shared<T> {}

    impl<T> Shared<T> {
        pub fn set_need_wakeup(&self, value: bool) {
            let bits = if value { RingFlags::NEED_WAKEUP.bits() } else { 0 };
            self.flags.store(bits, Ordering::Relaxed);
        }
    }

    /// Creates both halves of a ring over one local allocation
    ///
    /// The returned `Shared` handle can flip the ring flags word.
    pub(crate) fn channel<T: Copy + Default + Send + 'static>(
        depth: u32,
    ) -> (Producer<T>, Consumer<T>, Arc<Shared<T>>) {
        assert!(depth.is_power_of_two());

        let shared = Arc::new(Shared {
            producer: AtomicU32::new(0),
            consumer: AtomicU32::new(0),
            flags: AtomicU32::new(0),
            entries: (0..depth).map(|_| UnsafeCell::new(T::default())).collect(),
        });

        let cursor = || unsafe {
            Cursor::from_raw(
                NonNull::from(&shared.producer),
                NonNull::from(&shared.consumer),
                NonNull::from(&shared.flags),
                NonNull::new_unchecked(shared.entries.as_ptr() as *mut T),
                depth,
            )
        };

        let producer = Producer {
            cursor: cursor(),
            backing: Backing::Local(shared.clone()),
        };
        let consumer = Consumer {
            cursor: cursor(),
            backing: Backing::Local(shared.clone()),
        };

        (producer, consumer, shared)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bolero::{check, generator::*};
    use std::collections::VecDeque;

    #[derive(Clone, Copy, Debug, TypeGenerator)]
    enum Op {
        Enqueue(u8),
        Dequeue(u8),
    }

    /// Drives a ring against a queue model: every accepted entry must come
    /// back out exactly once, in order, and counts must match occupancy.
    #[test]
    fn ring_oracle_test() {
        check!()
            .with_type::<(u8, Vec<Op>)>()
            .for_each(|(depth_exp, ops)| {
                let depth = 1u32 << (depth_exp % 8);
                let (mut producer, mut consumer, _shared) =
                    testing::channel::<UmemDescriptor>(depth);

                let mut model = VecDeque::new();
                let mut next = 0u64;

                for op in ops.iter().copied() {
                    match op {
                        Op::Enqueue(count) => {
                            let entries: Vec<_> = (0..count as u64)
                                .map(|i| UmemDescriptor { address: next + i })
                                .collect();
                            let accepted = producer.enqueue(&entries);

                            let expected = (count as usize).min(depth as usize - model.len());
                            assert_eq!(accepted, expected);

                            model.extend(entries[..accepted].iter().copied());
                            next += accepted as u64;
                        }
                        Op::Dequeue(count) => {
                            let mut out = vec![UmemDescriptor::default(); count as usize];
                            let drained = consumer.dequeue(&mut out);

                            let expected = (count as usize).min(model.len());
                            assert_eq!(drained, expected);

                            for entry in &out[..drained] {
                                assert_eq!(*entry, model.pop_front().unwrap());
                            }
                        }
                    }
                }
            });
    }

    /// Cursor wrap: single-frame cycles well past 2^32 / depth slot reuses
    #[test]
    fn cursor_wrap_test() {
        let (mut producer, mut consumer, _shared) = testing::channel::<UmemDescriptor>(4);

        let mut out = [UmemDescriptor::default(); 1];
        for cycle in 0..1_000_000u64 {
            let entry = UmemDescriptor { address: cycle };
            assert_eq!(producer.enqueue(&[entry]), 1);
            assert_eq!(consumer.dequeue(&mut out), 1);
            // exactly-once delivery
            assert_eq!(out[0], entry);
        }

        assert_eq!(producer.cursor(), 1_000_000);
        assert_eq!(consumer.cursor(), producer.cursor());
    }

    /// A zero-length batch must not advance any cursor
    #[test]
    fn empty_batch_test() {
        let (mut producer, mut consumer, _shared) = testing::channel::<UmemDescriptor>(8);

        assert_eq!(producer.enqueue(&[]), 0);
        assert_eq!(producer.cursor(), 0);

        let mut out = [];
        assert_eq!(consumer.dequeue(&mut out), 0);
        assert_eq!(consumer.cursor(), 0);
    }

    /// A full ring grants exactly the remaining space
    #[test]
    fn single_slot_test() {
        let (mut producer, _consumer, _shared) = testing::channel::<UmemDescriptor>(4);

        let entries: Vec<_> = (0..3u64).map(|address| UmemDescriptor { address }).collect();
        assert_eq!(producer.enqueue(&entries), 3);

        // one slot left; a batch of two gets a short count of one
        let entries: Vec<_> = (3..5u64).map(|address| UmemDescriptor { address }).collect();
        assert_eq!(producer.enqueue(&entries), 1);
        assert_eq!(producer.enqueue(&entries), 0);
    }

    #[test]
    fn need_wakeup_test() {
        let (producer, consumer, shared) = testing::channel::<UmemDescriptor>(4);

        assert!(!producer.needs_wakeup());
        assert!(!consumer.needs_wakeup());

        shared.set_need_wakeup(true);
        assert!(producer.needs_wakeup());
        assert!(consumer.needs_wakeup());

        shared.set_need_wakeup(false);
        assert!(!producer.needs_wakeup());
    }
}
