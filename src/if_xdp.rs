// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Bindings for the AF_XDP kernel interface
//!
//! The layouts in this module are part of the kernel ABI and must match
//! `<linux/if_xdp.h>` exactly. See
//! <https://www.kernel.org/doc/html/latest/networking/af_xdp.html>.

use bitflags::bitflags;
use core::mem::size_of;
use zerocopy::{AsBytes, FromBytes, FromZeroes};

/// Option level for AF_XDP sockets in `setsockopt`/`getsockopt` calls
pub const SOL_XDP: libc::c_int = 283;

/// Options for AF_XDP sockets
///
/// The values correspond to the `XDP_*` socket option names.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(i32)]
pub enum SocketOption {
    MmapOffsets = 1,
    RxRing = 2,
    TxRing = 3,
    UmemReg = 4,
    UmemFillRing = 5,
    UmemCompletionRing = 6,
    Statistics = 7,
    Options = 8,
}

bitflags!(
    /// Flags for the `sxdp_flags` field in [`SockAddrXdp`]
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
    pub struct XdpFlags: u16 {
        const SHARED_UMEM = 1 << 0;
        /// Force copy-mode
        const COPY = 1 << 1;
        /// Force zero-copy mode
        const ZEROCOPY = 1 << 2;
        /// If this option is set, the driver might go sleep and in that case
        /// the `NEED_WAKEUP` flag in the fill and/or TX rings will be set.
        const USE_NEED_WAKEUP = 1 << 3;
    }
);

bitflags!(
    /// Flags for the `flags` field in [`UmemReg`]
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
    pub struct UmemFlags: u32 {
        const UNALIGNED_CHUNK_FLAG = 1 << 0;
    }
);

bitflags!(
    /// Flags set by the kernel in the ring flags word
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
    pub struct RingFlags: u32 {
        /// The kernel requests a wakeup syscall to make progress on the ring
        const NEED_WAKEUP = 1 << 0;
    }
);

/// XDP attach mode for the redirect program on an interface
///
/// Values are from `<linux/if_link.h>`. The mode is consumed by whoever
/// installs the XDP program; the socket itself only records it.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[repr(u32)]
pub enum XdpMode {
    /// Let the kernel pick the best available mode
    #[default]
    Auto = 0,
    /// Generic `sk_buff` mode, hardware-agnostic
    Skb = 1 << 1,
    /// Native driver XDP
    Drv = 1 << 2,
    /// Hardware-offloaded XDP
    Hw = 1 << 3,
}

/// Address for an AF_XDP socket, used in `bind` calls
///
/// Mirrors `struct sockaddr_xdp`.
#[derive(Clone, Copy, Debug)]
#[repr(C)]
pub struct SockAddrXdp {
    pub family: u16,
    pub flags: XdpFlags,
    pub ifindex: u32,
    pub queue_id: u32,
    pub shared_umem_fd: u32,
}

impl Default for SockAddrXdp {
    #[inline]
    fn default() -> Self {
        Self {
            family: libc::AF_XDP as _,
            flags: Default::default(),
            ifindex: 0,
            queue_id: 0,
            shared_umem_fd: 0,
        }
    }
}

/// UMEM registration, used with [`SocketOption::UmemReg`]
///
/// Mirrors `struct xdp_umem_reg`. Note that the kernel derives the option
/// version from the option length, so this struct must not carry padding.
#[derive(Clone, Copy, Debug, Default)]
#[repr(C)]
pub struct UmemReg {
    /// Start address of the packet data area
    pub addr: u64,
    /// Length of the packet data area in bytes
    pub len: u64,
    /// Size of each frame (chunk) in bytes; must be a power of two
    pub chunk_size: u32,
    /// Reserved headroom bytes at the start of each frame
    pub headroom: u32,
    pub flags: UmemFlags,
    /// Length of the TX metadata area per frame (Linux >= 6.8)
    ///
    /// Kept explicit so the struct has no trailing padding: the kernel
    /// derives the option version from the option length and would read
    /// padding bytes as this field.
    pub tx_metadata_len: u32,
}

/// Offsets into a ring mapping for a single ring (Linux >= 5.4)
///
/// Mirrors `struct xdp_ring_offset`.
#[derive(Clone, Copy, Debug, Default)]
#[repr(C)]
pub struct RingOffset {
    /// Offset of the producer cursor word
    pub producer: u64,
    /// Offset of the consumer cursor word
    pub consumer: u64,
    /// Offset of the descriptor array
    pub desc: u64,
    /// Offset of the ring flags word
    pub flags: u64,
}

/// Offsets for a single ring as returned by kernels before 5.4
///
/// The flags word was appended in 5.4; older kernels place it right after
/// the consumer cursor.
#[derive(Clone, Copy, Debug, Default)]
#[repr(C)]
pub struct RingOffsetV1 {
    pub producer: u64,
    pub consumer: u64,
    pub desc: u64,
}

impl From<RingOffsetV1> for RingOffset {
    #[inline]
    fn from(v1: RingOffsetV1) -> Self {
        Self {
            producer: v1.producer,
            consumer: v1.consumer,
            desc: v1.desc,
            flags: v1.consumer + size_of::<u32>() as u64,
        }
    }
}

/// Offsets for all four rings of a socket, used with
/// [`SocketOption::MmapOffsets`]
///
/// Mirrors `struct xdp_mmap_offsets`.
#[derive(Clone, Copy, Debug, Default)]
#[repr(C)]
pub struct MmapOffsets {
    pub rx: RingOffset,
    pub tx: RingOffset,
    pub fill: RingOffset,
    pub completion: RingOffset,
}

impl MmapOffsets {
    /// `mmap` page offset of the RX ring
    pub const RX_RING: usize = 0;
    /// `mmap` page offset of the TX ring
    pub const TX_RING: usize = 0x8000_0000;
    /// `mmap` page offset of the Fill ring
    pub const FILL_RING: usize = 0x1_0000_0000;
    /// `mmap` page offset of the Completion ring
    pub const COMPLETION_RING: usize = 0x1_8000_0000;
}

/// [`MmapOffsets`] layout returned by kernels before 5.4
#[derive(Clone, Copy, Debug, Default)]
#[repr(C)]
pub struct MmapOffsetsV1 {
    pub rx: RingOffsetV1,
    pub tx: RingOffsetV1,
    pub fill: RingOffsetV1,
    pub completion: RingOffsetV1,
}

impl From<MmapOffsetsV1> for MmapOffsets {
    #[inline]
    fn from(v1: MmapOffsetsV1) -> Self {
        Self {
            rx: v1.rx.into(),
            tx: v1.tx.into(),
            fill: v1.fill.into(),
            completion: v1.completion.into(),
        }
    }
}

/// Entry in the RX and TX rings
///
/// Mirrors `struct xdp_desc`.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, Hash, AsBytes, FromBytes, FromZeroes,
)]
#[repr(C)]
pub struct RxTxDescriptor {
    /// Byte offset of the packet data from the start of the UMEM area
    pub address: u64,
    /// Length of the packet data in bytes
    pub len: u32,
    /// Undefined by the current ABI; must be zero on TX
    pub options: u32,
}

/// Entry in the Fill and Completion rings
///
/// A bare frame offset from the start of the UMEM area.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, Hash, AsBytes, FromBytes, FromZeroes,
)]
#[repr(C)]
pub struct UmemDescriptor {
    pub address: u64,
}

impl From<RxTxDescriptor> for UmemDescriptor {
    #[inline]
    fn from(desc: RxTxDescriptor) -> Self {
        Self {
            address: desc.address,
        }
    }
}

/// Socket statistics, used with [`SocketOption::Statistics`]
///
/// Mirrors `struct xdp_statistics` (Linux >= 5.9).
#[derive(Clone, Copy, Debug, Default)]
#[repr(C)]
pub struct XdpStatistics {
    /// Dropped for reasons other than invalid descriptor
    pub rx_dropped: u64,
    /// Dropped due to an invalid descriptor
    pub rx_invalid_descriptors: u64,
    /// Dropped due to an invalid descriptor
    pub tx_invalid_descriptors: u64,
    /// Dropped due to the RX ring being full
    pub rx_ring_full: u64,
    /// Failed to retrieve an item from the Fill ring
    pub rx_fill_ring_empty_descriptors: u64,
    /// Failed to retrieve an item from the TX ring
    pub tx_ring_empty_descriptors: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    /// The kernel distinguishes option versions by length so any padding or
    /// field drift silently changes the call being made.
    #[test]
    fn abi_layout_test() {
        assert_eq!(size_of::<SockAddrXdp>(), 16);
        assert_eq!(size_of::<UmemReg>(), 32);
        assert_eq!(size_of::<RingOffset>(), 32);
        assert_eq!(size_of::<MmapOffsets>(), 4 * 32);
        assert_eq!(size_of::<MmapOffsetsV1>(), 4 * 24);
        assert_eq!(size_of::<RxTxDescriptor>(), 16);
        assert_eq!(size_of::<UmemDescriptor>(), 8);
        assert_eq!(size_of::<XdpStatistics>(), 48);
    }

    #[test]
    fn ring_offset_v1_test() {
        let v1 = RingOffsetV1 {
            producer: 128,
            consumer: 192,
            desc: 256,
        };
        let v2: RingOffset = v1.into();
        assert_eq!(v2.producer, 128);
        assert_eq!(v2.consumer, 192);
        // v1 kernels place the flags word right after the consumer cursor
        assert_eq!(v2.flags, 196);
        assert_eq!(v2.desc, 256);
    }
}
