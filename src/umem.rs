// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! UMEM frame memory
//!
//! A single page-aligned area holding every frame for one socket. The area
//! is split into an RX partition followed by a TX partition so that a frame
//! offset never changes direction over the socket's lifetime. Ownership of
//! an individual frame moves between userspace and the kernel exclusively
//! through ring entries; the bytes themselves never move.

use crate::{
    if_xdp::{UmemFlags, UmemReg},
    mmap::Mmap,
};
use core::ptr::NonNull;
use std::io::Result;

#[derive(Debug)]
pub struct Umem {
    area: Mmap,
    frame_sz: u32,
    rx_depth: u32,
    tx_depth: u32,
}

impl Umem {
    pub(crate) fn new(frame_sz: u32, rx_depth: u32, tx_depth: u32) -> Result<Self> {
        debug_assert!(frame_sz.is_power_of_two());

        let len = (rx_depth as usize + tx_depth as usize) * frame_sz as usize;
        let area = Mmap::new_umem(len)?;

        Ok(Self {
            area,
            frame_sz,
            rx_depth,
            tx_depth,
        })
    }

    /// Total size of the area in bytes
    #[inline]
    pub fn len(&self) -> usize {
        self.area.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.area.is_empty()
    }

    #[inline]
    pub fn frame_sz(&self) -> u32 {
        self.frame_sz
    }

    /// Number of frames in the area
    #[inline]
    pub fn frame_count(&self) -> u32 {
        self.rx_depth + self.tx_depth
    }

    /// First byte of the area in the local address space
    #[inline]
    pub fn base_addr(&self) -> NonNull<u8> {
        self.area.addr()
    }

    /// Offsets of the frames in the RX partition
    #[inline]
    pub fn rx_frames(&self) -> impl Iterator<Item = u64> + '_ {
        let frame_sz = self.frame_sz as u64;
        (0..self.rx_depth as u64).map(move |index| index * frame_sz)
    }

    /// Offsets of the frames in the TX partition
    #[inline]
    pub fn tx_frames(&self) -> impl Iterator<Item = u64> + '_ {
        let frame_sz = self.frame_sz as u64;
        let base = self.rx_depth as u64 * frame_sz;
        (0..self.tx_depth as u64).map(move |index| base + index * frame_sz)
    }

    /// Registration record for [`crate::syscall::set_umem`]
    pub(crate) fn as_umem_reg(&self) -> UmemReg {
        UmemReg {
            addr: self.area.addr().as_ptr() as u64,
            len: self.area.len() as u64,
            chunk_size: self.frame_sz,
            headroom: 0,
            flags: UmemFlags::empty(),
            tx_metadata_len: 0,
        }
    }

    /// Packet bytes at `offset`, as published in an RX ring entry
    ///
    /// # Panics
    ///
    /// Panics if the range escapes the frame it starts in; a descriptor
    /// that does so is a corrupt ring entry.
    #[inline]
    pub fn frame(&self, offset: u64, len: u32) -> &[u8] {
        self.validate(offset, len);
        unsafe {
            core::slice::from_raw_parts(
                self.area.addr().as_ptr().add(offset as usize),
                len as usize,
            )
        }
    }

    /// Writable packet bytes at `offset` for a userspace-owned frame
    #[inline]
    pub fn frame_mut(&mut self, offset: u64, len: u32) -> &mut [u8] {
        self.validate(offset, len);
        unsafe {
            core::slice::from_raw_parts_mut(
                self.area.addr().as_ptr().add(offset as usize),
                len as usize,
            )
        }
    }

    #[inline]
    fn validate(&self, offset: u64, len: u32) {
        let frame_sz = self.frame_sz as u64;
        assert!(offset < self.area.len() as u64);
        assert!(offset % frame_sz + len as u64 <= frame_sz);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partition_test() {
        let umem = Umem::new(2048, 64, 64).unwrap();

        assert_eq!(umem.len(), 128 * 2048);
        assert_eq!(umem.frame_count(), 128);

        let rx: Vec<_> = umem.rx_frames().collect();
        let tx: Vec<_> = umem.tx_frames().collect();
        assert_eq!(rx.len(), 64);
        assert_eq!(tx.len(), 64);

        // partitions are disjoint and contiguous
        assert_eq!(rx[0], 0);
        assert_eq!(rx[63], 63 * 2048);
        assert_eq!(tx[0], 64 * 2048);
        assert_eq!(tx[63], 127 * 2048);
    }

    #[test]
    fn frame_access_test() {
        let mut umem = Umem::new(2048, 2, 2).unwrap();

        let frame = umem.frame_mut(2048, 4);
        frame.copy_from_slice(&[1, 2, 3, 4]);
        assert_eq!(umem.frame(2048, 4), &[1, 2, 3, 4]);
    }

    #[test]
    #[should_panic]
    fn frame_overrun_test() {
        let umem = Umem::new(2048, 2, 2).unwrap();
        // crosses a frame boundary
        let _ = umem.frame(2047, 2);
    }
}
