// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Raw kernel calls for AF_XDP socket setup and wakeup
//!
//! Everything here either runs at initialization time, where errors are
//! surfaced to the caller once, or is a wakeup kick on the steady-state
//! path, where the kernel's "try again" answers are not errors.

use crate::if_xdp::{
    MmapOffsets, MmapOffsetsV1, SockAddrXdp, SocketOption, UmemReg, XdpStatistics, SOL_XDP,
};
use core::mem::size_of;
use std::{
    ffi::CString,
    io::{Error, ErrorKind, Result},
    os::unix::io::{AsRawFd, FromRawFd, OwnedFd},
};

macro_rules! libc_call {
    ($expr:expr) => {{
        let res = unsafe { $expr };
        if res < 0 {
            Err(Error::from_raw_os_error(errno::errno().0))
        } else {
            Ok(res)
        }
    }};
}

/// Opens an AF_XDP socket
pub fn socket() -> Result<OwnedFd> {
    let fd = libc_call!(libc::socket(libc::AF_XDP, libc::SOCK_RAW, 0))?;
    Ok(unsafe { OwnedFd::from_raw_fd(fd) })
}

/// Resolves an interface name to its index
pub fn if_nametoindex(name: &str) -> Result<u32> {
    let name = CString::new(name)
        .map_err(|_| Error::new(ErrorKind::InvalidInput, "interface name contains a NUL byte"))?;
    let index = unsafe { libc::if_nametoindex(name.as_ptr()) };
    if index == 0 {
        return Err(Error::from_raw_os_error(errno::errno().0));
    }
    Ok(index)
}

fn set_option<T>(fd: &impl AsRawFd, option: SocketOption, value: &T) -> Result<()> {
    libc_call!(libc::setsockopt(
        fd.as_raw_fd(),
        SOL_XDP,
        option as _,
        value as *const T as _,
        size_of::<T>() as _,
    ))?;
    Ok(())
}

fn get_option<T: Default>(fd: &impl AsRawFd, option: SocketOption) -> Result<(T, u32)> {
    let mut value = T::default();
    let mut len: libc::socklen_t = size_of::<T>() as _;
    libc_call!(libc::getsockopt(
        fd.as_raw_fd(),
        SOL_XDP,
        option as _,
        &mut value as *mut T as _,
        &mut len,
    ))?;
    Ok((value, len))
}

/// Registers a UMEM region with the socket
pub fn set_umem(fd: &impl AsRawFd, umem: &UmemReg) -> Result<()> {
    set_option(fd, SocketOption::UmemReg, umem)
}

/// Sets the number of descriptors in the Fill ring
pub fn set_fill_ring_size(fd: &impl AsRawFd, len: u32) -> Result<()> {
    set_option(fd, SocketOption::UmemFillRing, &len)
}

/// Sets the number of descriptors in the Completion ring
pub fn set_completion_ring_size(fd: &impl AsRawFd, len: u32) -> Result<()> {
    set_option(fd, SocketOption::UmemCompletionRing, &len)
}

/// Sets the number of descriptors in the RX ring
pub fn set_rx_ring_size(fd: &impl AsRawFd, len: u32) -> Result<()> {
    set_option(fd, SocketOption::RxRing, &len)
}

/// Sets the number of descriptors in the TX ring
pub fn set_tx_ring_size(fd: &impl AsRawFd, len: u32) -> Result<()> {
    set_option(fd, SocketOption::TxRing, &len)
}

/// Queries the ring mmap offsets for the socket
///
/// Kernels before 5.4 return the V1 layout, distinguished by the returned
/// option length.
pub fn offsets(fd: &impl AsRawFd) -> Result<MmapOffsets> {
    let (offsets, len) = get_option::<MmapOffsets>(fd, SocketOption::MmapOffsets)?;

    if len as usize == size_of::<MmapOffsets>() {
        return Ok(offsets);
    }

    if len as usize == size_of::<MmapOffsetsV1>() {
        // the value was only partially written; reinterpret the prefix
        let v1 = unsafe { *(&offsets as *const MmapOffsets as *const MmapOffsetsV1) };
        return Ok(v1.into());
    }

    Err(Error::new(
        ErrorKind::InvalidData,
        "kernel returned unknown xdp_mmap_offsets layout",
    ))
}

/// Queries socket statistics
pub fn statistics(fd: &impl AsRawFd) -> Result<XdpStatistics> {
    let (stats, _len) = get_option(fd, SocketOption::Statistics)?;
    Ok(stats)
}

/// Binds the socket to an interface queue
pub fn bind(fd: &impl AsRawFd, addr: &SockAddrXdp) -> Result<()> {
    libc_call!(libc::bind(
        fd.as_raw_fd(),
        addr as *const SockAddrXdp as _,
        size_of::<SockAddrXdp>() as _,
    ))?;
    Ok(())
}

/// Kicks the kernel to make progress on the TX ring
///
/// Issued when the TX ring carries `NEED_WAKEUP`. The kernel answers
/// `EAGAIN`/`EBUSY`/`ENOBUFS` when it is already busy making progress;
/// those are successful kicks, not errors.
pub fn wake_tx(fd: &impl AsRawFd) -> Result<()> {
    let res = libc_call!(libc::sendto(
        fd.as_raw_fd(),
        core::ptr::null(),
        0,
        libc::MSG_DONTWAIT,
        core::ptr::null(),
        0,
    ));

    match res {
        Ok(_) => Ok(()),
        Err(err) => match err.raw_os_error() {
            Some(libc::EAGAIN) | Some(libc::EBUSY) | Some(libc::ENOBUFS) | Some(libc::EINTR) => {
                Ok(())
            }
            _ => Err(err),
        },
    }
}

/// Kicks the kernel to make progress on the Fill and RX rings
pub fn wake_rx(fd: &impl AsRawFd) -> Result<()> {
    let mut pollfd = libc::pollfd {
        fd: fd.as_raw_fd(),
        events: libc::POLLIN,
        revents: 0,
    };

    match libc_call!(libc::poll(&mut pollfd, 1, 0)) {
        Ok(_) => Ok(()),
        Err(err) => match err.raw_os_error() {
            Some(libc::EAGAIN) | Some(libc::EINTR) => Ok(()),
            _ => Err(err),
        },
    }
}
