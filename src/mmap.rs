// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Owned memory mappings shared with the kernel

use core::ptr::NonNull;
use std::{
    io::{Error, Result},
    os::unix::io::AsRawFd,
};

/// An owned `mmap` region, unmapped on drop
#[derive(Debug)]
pub struct Mmap {
    addr: NonNull<u8>,
    len: usize,
}

/// Safety: the region is plain memory; synchronization of its contents is
/// the responsibility of the structures placed inside it
unsafe impl Send for Mmap {}
unsafe impl Sync for Mmap {}

impl Mmap {
    /// Maps one of the socket's rings at the given ABI page offset
    pub fn new_ring(len: usize, offset: usize, fd: &impl AsRawFd) -> Result<Self> {
        let addr = unsafe {
            libc::mmap(
                core::ptr::null_mut(),
                len,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_SHARED | libc::MAP_POPULATE,
                fd.as_raw_fd(),
                offset as _,
            )
        };

        Self::from_raw(addr, len)
    }

    /// Maps an anonymous, page-aligned region for use as UMEM backing
    pub fn new_umem(len: usize) -> Result<Self> {
        let addr = unsafe {
            libc::mmap(
                core::ptr::null_mut(),
                len,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_PRIVATE | libc::MAP_ANONYMOUS,
                -1,
                0,
            )
        };

        Self::from_raw(addr, len)
    }

    fn from_raw(addr: *mut libc::c_void, len: usize) -> Result<Self> {
        if addr == libc::MAP_FAILED {
            return Err(Error::from_raw_os_error(errno::errno().0));
        }

        // mmap never returns NULL on success
        let addr = unsafe { NonNull::new_unchecked(addr as *mut u8) };

        Ok(Self { addr, len })
    }

    #[inline]
    pub fn addr(&self) -> NonNull<u8> {
        self.addr
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

impl Drop for Mmap {
    fn drop(&mut self) {
        let _ = unsafe { libc::munmap(self.addr.as_ptr() as _, self.len) };
    }
}
