// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! AF_XDP socket handle

use crate::{
    if_xdp::{SockAddrXdp, XdpFlags},
    syscall,
};
use std::{
    io::Result,
    os::unix::io::{AsRawFd, OwnedFd, RawFd},
};

/// An open AF_XDP socket, closed on drop
///
/// Closing the descriptor releases every kernel object hanging off it: the
/// UMEM registration, the four ring mappings, and any XSKMAP entries that
/// point at it.
#[derive(Debug)]
pub struct Socket {
    fd: OwnedFd,
}

impl Socket {
    pub fn open() -> Result<Self> {
        let fd = syscall::socket()?;
        Ok(Self { fd })
    }

    /// Binds the socket to `queue_id` on the interface with `ifindex`
    pub fn bind(&self, ifindex: u32, queue_id: u32, flags: XdpFlags) -> Result<()> {
        let addr = SockAddrXdp {
            ifindex,
            queue_id,
            flags,
            ..Default::default()
        };
        syscall::bind(&self.fd, &addr)
    }
}

impl AsRawFd for Socket {
    #[inline]
    fn as_raw_fd(&self) -> RawFd {
        self.fd.as_raw_fd()
    }
}
