// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Kernel-bypass packet I/O for a QUIC dataplane
//!
//! The crate binds an application to a NIC queue over AF_XDP and exposes
//! the shared-memory rings as a polled, batch-oriented sink/source
//! interface, plus the arena-backed per-connection pools the stack above
//! allocates from.
//!
//! Layering, bottom up:
//!
//! * [`if_xdp`]: the kernel ABI, descriptor layouts, flags, options
//! * [`syscall`] / [`mmap`]: socket setup calls and shared mappings
//! * [`ring`]: the four single-producer/single-consumer rings
//! * [`umem`]: frame memory, partitioned between RX and TX
//! * [`xsk`]: the socket driver, its lifecycle and non-blocking batch ops
//! * [`aio`]: the batch adapter pumping packets between the rings and an
//!   upstream consumer/producer pair
//! * [`inet`]: byte-exact L2 header types
//! * [`conn`]: per-connection stream/packet/ACK pools
//!
//! Everything is single-threaded per socket and allocation-free after
//! initialization; the only concurrency is with the kernel, through the
//! rings' acquire/release cursor protocol.

pub mod aio;
pub mod conn;
pub mod if_xdp;
pub mod inet;
pub mod mmap;
pub mod ring;
pub mod socket;
pub mod syscall;
pub mod umem;
pub mod xsk;

pub use aio::{AioConfig, AioError, Buffer, Sink, XskAio};
pub use xsk::{FrameMeta, State, Xsk, XskConfig, XskError};
