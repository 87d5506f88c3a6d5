// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Per-connection resource pools
//!
//! A connection owns fixed-count pools of streams, packet-metadata records
//! and ACK records, all allocated together when the connection is created
//! and never resized. Records link into intrusive free lists by pool
//! index; acquire and release are O(1) head operations.
//!
//! Stream capacity is per stream type and QUIC has four of them
//! (client/server × bidi/uni), so the stream pool holds four slots per
//! configured concurrent stream.

use tracing::debug;

/// Free-list terminator
pub const NIL: u32 = u32::MAX;

/// Stream-id value marking an unallocated stream slot
pub const STREAM_ID_INVALID: u64 = u64::MAX;

const STREAM_TYPES: u32 = 4;

#[derive(Clone, Copy, Debug)]
pub struct ConnConfig {
    /// Concurrent stream limit, per stream type
    pub max_concur_streams: u32,
    /// Packets allowed in flight before loss accounting blocks new sends
    pub max_in_flight_pkts: u32,
}

/// A stream slot
///
/// Unallocated slots carry [`STREAM_ID_INVALID`].
#[derive(Clone, Copy, Debug)]
pub struct Stream {
    next: u32,
    pub stream_id: u64,
    /// Next byte offset to transmit
    pub tx_offs: u64,
    /// Next byte offset expected from the peer
    pub rx_offs: u64,
}

/// Loss-accounting record for one in-flight packet
#[derive(Clone, Copy, Debug, Default)]
pub struct PktMeta {
    next: u32,
    pub pkt_number: u64,
    /// Send timestamp, microseconds
    pub tx_time: u64,
}

/// One pending ACK range
#[derive(Clone, Copy, Debug, Default)]
pub struct Ack {
    next: u32,
    /// First packet number in the range
    pub lo: u64,
    /// Last packet number in the range, inclusive
    pub hi: u64,
}

/// Intrusive free-list link shared by all pool record types
trait FreeLink {
    fn next(&self) -> u32;
    fn set_next(&mut self, next: u32);
    /// Returns the record to its unallocated state
    fn reset(&mut self);
}

macro_rules! free_link {
    ($ty:ident) => {
        impl FreeLink for $ty {
            #[inline]
            fn next(&self) -> u32 {
                self.next
            }

            #[inline]
            fn set_next(&mut self, next: u32) {
                self.next = next;
            }

            #[inline]
            fn reset(&mut self) {
                *self = Self::default();
            }
        }
    };
}

free_link!(Stream);
free_link!(PktMeta);
free_link!(Ack);

impl Default for Stream {
    fn default() -> Self {
        Self {
            next: NIL,
            stream_id: STREAM_ID_INVALID,
            tx_offs: 0,
            rx_offs: 0,
        }
    }
}

/// Links every record of a fresh pool into one free list, in index order
fn link_pool<T: FreeLink>(pool: &mut [T]) -> u32 {
    let len = pool.len() as u32;
    for (index, record) in pool.iter_mut().enumerate() {
        let next = index as u32 + 1;
        record.set_next(if next < len { next } else { NIL });
    }
    if len > 0 {
        0
    } else {
        NIL
    }
}

fn pool_alloc<T: FreeLink>(pool: &mut [T], head: &mut u32) -> Option<u32> {
    let index = *head;
    if index == NIL {
        return None;
    }

    *head = pool[index as usize].next();
    pool[index as usize].set_next(NIL);
    Some(index)
}

fn pool_free<T: FreeLink>(pool: &mut [T], head: &mut u32, index: u32) {
    let record = &mut pool[index as usize];
    record.reset();
    record.set_next(*head);
    *head = index;
}

fn pool_free_len<T: FreeLink>(pool: &[T], head: u32) -> usize {
    let mut len = 0;
    let mut index = head;
    while index != NIL {
        index = pool[index as usize].next();
        len += 1;
        assert!(len <= pool.len(), "free list cycle");
    }
    len
}

pub struct Conn {
    streams: Box<[Stream]>,
    pkt_meta: Box<[PktMeta]>,
    acks: Box<[Ack]>,
    stream_free: u32,
    pkt_meta_free: u32,
    ack_free: u32,
}

impl Conn {
    /// Bytes one connection pins for its header and pools
    ///
    /// The pools are sized `4 * max_concur_streams` streams and
    /// `max_in_flight_pkts` each of packet metadata and ACK records, every
    /// section aligned to the strictest member alignment.
    pub fn footprint(config: &ConnConfig) -> usize {
        use core::mem::{align_of, size_of};

        let align = align_of::<Conn>()
            .max(align_of::<Stream>())
            .max(align_of::<PktMeta>())
            .max(align_of::<Ack>());
        let align_up = |value: usize| (value + align - 1) & !(align - 1);

        let streams = STREAM_TYPES as usize * config.max_concur_streams as usize;
        let pkts = config.max_in_flight_pkts as usize;

        align_up(size_of::<Conn>())
            + align_up(streams * size_of::<Stream>())
            + align_up(pkts * size_of::<PktMeta>())
            + align_up(pkts * size_of::<Ack>())
    }

    /// Creates a connection with every pool full and every slot free
    pub fn new(config: &ConnConfig) -> Self {
        let stream_cnt = (STREAM_TYPES * config.max_concur_streams) as usize;
        let pkt_cnt = config.max_in_flight_pkts as usize;

        let mut streams: Box<[Stream]> = vec![Stream::default(); stream_cnt].into();
        let mut pkt_meta: Box<[PktMeta]> = vec![PktMeta::default(); pkt_cnt].into();
        let mut acks: Box<[Ack]> = vec![Ack::default(); pkt_cnt].into();

        let stream_free = link_pool(&mut streams);
        let pkt_meta_free = link_pool(&mut pkt_meta);
        let ack_free = link_pool(&mut acks);

        debug!(
            streams = stream_cnt,
            pkts = pkt_cnt,
            footprint = Self::footprint(config),
            "created connection pools"
        );

        Self {
            streams,
            pkt_meta,
            acks,
            stream_free,
            pkt_meta_free,
            ack_free,
        }
    }

    // Streams ------------------------------------------------------------

    /// Acquires a stream slot, assigning it `stream_id`
    ///
    /// Returns the slot index, or `None` when the connection is at its
    /// concurrent stream limit.
    pub fn alloc_stream(&mut self, stream_id: u64) -> Option<u32> {
        let index = pool_alloc(&mut self.streams, &mut self.stream_free)?;
        self.streams[index as usize].stream_id = stream_id;
        Some(index)
    }

    /// Releases a stream slot back to the pool
    pub fn free_stream(&mut self, index: u32) {
        debug_assert_ne!(self.streams[index as usize].stream_id, STREAM_ID_INVALID);
        pool_free(&mut self.streams, &mut self.stream_free, index);
    }

    #[inline]
    pub fn stream(&self, index: u32) -> &Stream {
        &self.streams[index as usize]
    }

    #[inline]
    pub fn stream_mut(&mut self, index: u32) -> &mut Stream {
        &mut self.streams[index as usize]
    }

    /// Number of unallocated stream slots
    pub fn free_stream_len(&self) -> usize {
        pool_free_len(&self.streams, self.stream_free)
    }

    // Packet metadata ----------------------------------------------------

    pub fn alloc_pkt_meta(&mut self) -> Option<u32> {
        pool_alloc(&mut self.pkt_meta, &mut self.pkt_meta_free)
    }

    pub fn free_pkt_meta(&mut self, index: u32) {
        pool_free(&mut self.pkt_meta, &mut self.pkt_meta_free, index);
    }

    #[inline]
    pub fn pkt_meta(&self, index: u32) -> &PktMeta {
        &self.pkt_meta[index as usize]
    }

    #[inline]
    pub fn pkt_meta_mut(&mut self, index: u32) -> &mut PktMeta {
        &mut self.pkt_meta[index as usize]
    }

    pub fn free_pkt_meta_len(&self) -> usize {
        pool_free_len(&self.pkt_meta, self.pkt_meta_free)
    }

    // ACK records --------------------------------------------------------

    pub fn alloc_ack(&mut self) -> Option<u32> {
        pool_alloc(&mut self.acks, &mut self.ack_free)
    }

    pub fn free_ack(&mut self, index: u32) {
        pool_free(&mut self.acks, &mut self.ack_free, index);
    }

    #[inline]
    pub fn ack(&self, index: u32) -> &Ack {
        &self.acks[index as usize]
    }

    #[inline]
    pub fn ack_mut(&mut self, index: u32) -> &mut Ack {
        &mut self.acks[index as usize]
    }

    pub fn free_ack_len(&self) -> usize {
        pool_free_len(&self.acks, self.ack_free)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;

    fn test_config() -> ConnConfig {
        ConnConfig {
            max_concur_streams: 4,
            max_in_flight_pkts: 8,
        }
    }

    /// S4: pool counts and footprint match the configured partition
    #[test]
    fn partition_test() {
        use core::mem::{align_of, size_of};

        let config = test_config();
        let conn = Conn::new(&config);

        assert_eq!(conn.streams.len(), 16);
        assert_eq!(conn.pkt_meta.len(), 8);
        assert_eq!(conn.acks.len(), 8);

        assert_eq!(conn.free_stream_len(), 16);
        assert_eq!(conn.free_pkt_meta_len(), 8);
        assert_eq!(conn.free_ack_len(), 8);

        for stream in conn.streams.iter() {
            assert_eq!(stream.stream_id, STREAM_ID_INVALID);
        }

        let align = align_of::<Conn>()
            .max(align_of::<Stream>())
            .max(align_of::<PktMeta>())
            .max(align_of::<Ack>());
        let align_up = |value: usize| (value + align - 1) & !(align - 1);
        let expected = align_up(size_of::<Conn>())
            + align_up(16 * size_of::<Stream>())
            + align_up(8 * size_of::<PktMeta>())
            + align_up(8 * size_of::<Ack>());
        assert_eq!(Conn::footprint(&config), expected);
    }

    /// Free-list traversal terminates after exactly `pool - acquired` steps
    #[test]
    fn free_list_closure_test() {
        let mut conn = Conn::new(&test_config());

        let mut held = Vec::new();
        for acquired in 1..=8 {
            held.push(conn.alloc_pkt_meta().unwrap());
            assert_eq!(conn.free_pkt_meta_len(), 8 - acquired);
        }
        assert!(conn.alloc_pkt_meta().is_none());

        // indices are distinct
        let distinct: BTreeSet<_> = held.iter().copied().collect();
        assert_eq!(distinct.len(), held.len());

        for (released, index) in held.into_iter().enumerate() {
            conn.free_pkt_meta(index);
            assert_eq!(conn.free_pkt_meta_len(), released + 1);
        }
    }

    #[test]
    fn stream_lifecycle_test() {
        let mut conn = Conn::new(&test_config());

        let index = conn.alloc_stream(0x42).unwrap();
        assert_eq!(conn.stream(index).stream_id, 0x42);

        conn.stream_mut(index).tx_offs = 1200;

        conn.free_stream(index);
        assert_eq!(conn.stream(index).stream_id, STREAM_ID_INVALID);
        assert_eq!(conn.stream(index).tx_offs, 0);
        assert_eq!(conn.free_stream_len(), 16);
    }

    #[test]
    fn exhaustion_test() {
        let mut conn = Conn::new(&test_config());

        for _ in 0..16 {
            assert!(conn.alloc_stream(7).is_some());
        }
        assert!(conn.alloc_stream(7).is_none());

        for _ in 0..8 {
            assert!(conn.alloc_ack().is_some());
        }
        assert!(conn.alloc_ack().is_none());
    }

    /// LIFO reuse keeps the working set hot
    #[test]
    fn reuse_order_test() {
        let mut conn = Conn::new(&test_config());

        let a = conn.alloc_ack().unwrap();
        let b = conn.alloc_ack().unwrap();
        conn.free_ack(a);
        conn.free_ack(b);

        assert_eq!(conn.alloc_ack(), Some(b));
        assert_eq!(conn.alloc_ack(), Some(a));
    }
}
