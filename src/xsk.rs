// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! AF_XDP socket driver
//!
//! [`Xsk`] binds one UMEM area and the four rings to a single NIC queue and
//! exposes the ring operations as non-blocking batch calls. It is a thin,
//! ordering-aware wrapper: policy (batching, frame bookkeeping, retry)
//! lives in [`crate::aio`].
//!
//! Lifecycle: `new` (format) → `bind` → `join` → `leave` → drop. Exactly
//! one live join per socket; the kernel objects exist only between `join`
//! and `leave`.

use crate::{
    if_xdp::{RxTxDescriptor, UmemDescriptor, XdpFlags, XdpMode, XdpStatistics},
    ring,
    socket::Socket,
    syscall,
    umem::Umem,
};
use aya::maps::{MapData, XskMap};
use std::{
    borrow::BorrowMut,
    io,
    os::unix::io::{AsRawFd, RawFd},
};
use tracing::{debug, warn};

/// Tag at the start of every formatted socket region
///
/// Validated on lifecycle transitions to catch stale or foreign handles.
pub const XSK_MAGIC: u64 = 0xf17e_da2c_3778_736b;

/// Sizing and mode parameters for one socket
#[derive(Clone, Copy, Debug)]
pub struct XskConfig {
    /// Frame size in bytes; power of two, typically 2048 or 4096
    pub frame_sz: u32,
    /// Fill ring depth
    pub fr_depth: u32,
    /// RX ring depth
    pub rx_depth: u32,
    /// TX ring depth
    pub tx_depth: u32,
    /// Completion ring depth
    pub cr_depth: u32,
    /// XDP attach mode for the redirect program
    pub xdp_mode: XdpMode,
}

impl Default for XskConfig {
    fn default() -> Self {
        Self {
            frame_sz: 2048,
            fr_depth: 2048,
            rx_depth: 2048,
            tx_depth: 2048,
            cr_depth: 2048,
            xdp_mode: XdpMode::Auto,
        }
    }
}

impl XskConfig {
    fn validate(&self) -> Result<(), XskError> {
        for (name, value) in [
            ("frame_sz", self.frame_sz),
            ("fr_depth", self.fr_depth),
            ("rx_depth", self.rx_depth),
            ("tx_depth", self.tx_depth),
            ("cr_depth", self.cr_depth),
        ] {
            if value == 0 || !value.is_power_of_two() {
                warn!(name, value, "config value must be a nonzero power of two");
                return Err(XskError::Config(name));
            }
        }

        // 2048 is the smallest chunk size the kernel accepts
        if self.frame_sz < 2048 {
            return Err(XskError::Config("frame_sz"));
        }

        Ok(())
    }

    /// Size of the UMEM area this configuration pins, in bytes
    pub fn umem_len(&self) -> usize {
        (self.rx_depth as usize + self.tx_depth as usize) * self.frame_sz as usize
    }
}

/// Lifecycle state of an [`Xsk`]
///
/// The unformatted and deleted states of the lifecycle are unrepresentable:
/// they correspond to the value not having been constructed yet, or having
/// been dropped.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum State {
    /// Region formatted; no interface recorded, no kernel objects
    Formatted,
    /// Interface and queue recorded; no kernel objects
    Bound,
    /// Kernel socket live, rings mapped, redirection active
    Joined,
    /// A previous join was torn down
    Left,
}

#[derive(Debug, thiserror::Error)]
pub enum XskError {
    #[error("config field `{0}` is invalid")]
    Config(&'static str),
    #[error("operation requires state {required:?} but the socket is {actual:?}")]
    State { required: State, actual: State },
    #[error("magic tag mismatch; not a live xsk region")]
    Magic,
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error("failed to update the redirect map: {0}")]
    Redirect(#[from] aya::maps::MapError),
}

/// Packet descriptor at the driver boundary
///
/// Describes a packet by frame offset without exposing raw ring entries.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FrameMeta {
    /// Byte offset of the packet from the start of the UMEM area
    pub offset: u64,
    /// Packet length in bytes
    pub len: u32,
    /// Undefined for now; must be zero on TX
    pub flags: u32,
}

impl From<RxTxDescriptor> for FrameMeta {
    #[inline]
    fn from(desc: RxTxDescriptor) -> Self {
        Self {
            offset: desc.address,
            len: desc.len,
            flags: desc.options,
        }
    }
}

impl From<FrameMeta> for RxTxDescriptor {
    #[inline]
    fn from(meta: FrameMeta) -> Self {
        Self {
            address: meta.offset,
            len: meta.len,
            options: meta.flags,
        }
    }
}

pub(crate) struct Rings {
    pub fill: ring::Fill,
    pub rx: ring::Rx,
    pub tx: ring::Tx,
    pub completion: ring::Completion,
}

pub struct Xsk {
    magic: u64,
    state: State,
    config: XskConfig,
    ifname: Option<String>,
    ifindex: u32,
    queue_id: u32,
    umem: Umem,
    socket: Option<Socket>,
    rings: Option<Rings>,
}

impl Xsk {
    /// Formats a new socket region: validates the config and lays out UMEM
    ///
    /// Does not touch the kernel beyond reserving the frame memory.
    pub fn new(config: XskConfig) -> Result<Self, XskError> {
        config.validate()?;

        let umem = Umem::new(config.frame_sz, config.rx_depth, config.tx_depth)?;

        debug!(
            frame_sz = config.frame_sz,
            umem_len = umem.len(),
            "formatted xsk region"
        );

        Ok(Self {
            magic: XSK_MAGIC,
            state: State::Formatted,
            config,
            ifname: None,
            ifindex: 0,
            queue_id: 0,
            umem,
            socket: None,
            rings: None,
        })
    }

    /// Records the interface queue this socket will join
    pub fn bind(&mut self, ifname: &str, queue_id: u32) -> Result<(), XskError> {
        self.check_magic()?;
        self.expect_unjoined()?;

        let ifindex = syscall::if_nametoindex(ifname)?;

        self.ifname = Some(ifname.to_string());
        self.ifindex = ifindex;
        self.queue_id = queue_id;
        self.state = State::Bound;

        debug!(ifname, ifindex, queue_id, "bound xsk");
        Ok(())
    }

    /// Clears a previously recorded interface binding
    pub fn unbind(&mut self) -> Result<(), XskError> {
        self.check_magic()?;
        self.expect_unjoined()?;

        self.ifname = None;
        self.ifindex = 0;
        self.queue_id = 0;
        self.state = State::Formatted;
        Ok(())
    }

    /// Joins the bound interface queue and starts packet redirection
    ///
    /// Opens the AF_XDP socket, registers UMEM, maps the four rings, binds
    /// to the recorded queue and inserts the socket into the shared XSKMAP
    /// of the pre-installed redirect program.
    pub fn join<T: BorrowMut<MapData>>(
        &mut self,
        redirect_map: &mut XskMap<T>,
    ) -> Result<(), XskError> {
        self.check_magic()?;

        match self.state {
            State::Bound => {}
            State::Left if self.ifname.is_some() => {}
            actual => {
                return Err(XskError::State {
                    required: State::Bound,
                    actual,
                })
            }
        }

        let config = self.config;
        let socket = Socket::open()?;

        syscall::set_umem(&socket, &self.umem.as_umem_reg())?;

        let offsets = syscall::offsets(&socket)?;

        let rings = Rings {
            fill: ring::Fill::new(&socket, &offsets, config.fr_depth)?,
            rx: ring::Rx::new(&socket, &offsets, config.rx_depth)?,
            tx: ring::Tx::new(&socket, &offsets, config.tx_depth)?,
            completion: ring::Completion::new(&socket, &offsets, config.cr_depth)?,
        };

        let mut flags = XdpFlags::USE_NEED_WAKEUP;
        match config.xdp_mode {
            XdpMode::Skb => flags |= XdpFlags::COPY,
            XdpMode::Drv | XdpMode::Hw => flags |= XdpFlags::ZEROCOPY,
            XdpMode::Auto => {}
        }

        socket.bind(self.ifindex, self.queue_id, flags)?;

        redirect_map.set(self.queue_id, socket.as_raw_fd(), 0)?;

        debug!(
            ifindex = self.ifindex,
            queue_id = self.queue_id,
            fd = socket.as_raw_fd(),
            "joined xsk"
        );

        self.socket = Some(socket);
        self.rings = Some(rings);
        self.state = State::Joined;
        Ok(())
    }

    /// Tears down the kernel objects of a live join
    ///
    /// Closing the socket also evicts its XSKMAP entries, stopping
    /// redirection.
    pub fn leave(&mut self) -> Result<(), XskError> {
        self.check_magic()?;

        if self.state != State::Joined {
            return Err(XskError::State {
                required: State::Joined,
                actual: self.state,
            });
        }

        self.rings = None;
        self.socket = None;
        self.state = State::Left;

        debug!(ifindex = self.ifindex, queue_id = self.queue_id, "left xsk");
        Ok(())
    }

    fn check_magic(&self) -> Result<(), XskError> {
        if self.magic != XSK_MAGIC {
            return Err(XskError::Magic);
        }
        Ok(())
    }

    fn expect_unjoined(&self) -> Result<(), XskError> {
        if self.state == State::Joined {
            return Err(XskError::State {
                required: State::Formatted,
                actual: self.state,
            });
        }
        Ok(())
    }

    // I/O ---------------------------------------------------------------

    /// Publishes up to `offsets.len()` frames onto the Fill ring
    ///
    /// Returns the number published; the caller retains the tail.
    #[inline]
    pub fn rx_enqueue(&mut self, offsets: &[u64]) -> usize {
        let Some(rings) = &mut self.rings else {
            return 0;
        };
        rings
            .fill
            .0
            .enqueue_from(offsets, |offset| UmemDescriptor { address: *offset })
    }

    /// [`Self::rx_enqueue`] taking packet descriptors, ignoring the
    /// redundant length and flags
    #[inline]
    pub fn rx_enqueue_meta(&mut self, meta: &[FrameMeta]) -> usize {
        let Some(rings) = &mut self.rings else {
            return 0;
        };
        rings.fill.0.enqueue_from(meta, |meta| UmemDescriptor {
            address: meta.offset,
        })
    }

    /// Drains up to `meta.len()` received packets from the RX ring
    #[inline]
    pub fn rx_complete(&mut self, meta: &mut [FrameMeta]) -> usize {
        let Some(rings) = &mut self.rings else {
            return 0;
        };
        rings.rx.0.dequeue_into(meta, FrameMeta::from)
    }

    /// Publishes up to `meta.len()` packets onto the TX ring
    ///
    /// Issues the wakeup kick when the kernel requests one. Returns the
    /// number published; the caller retains the tail.
    #[inline]
    pub fn tx_enqueue(&mut self, meta: &[FrameMeta]) -> usize {
        let Some(rings) = &mut self.rings else {
            return 0;
        };

        let count = rings.tx.0.enqueue_from(meta, |meta| RxTxDescriptor::from(*meta));

        if rings.tx.0.needs_wakeup() {
            if let Some(socket) = &self.socket {
                if let Err(error) = syscall::wake_tx(socket) {
                    // never fatal on the steady-state path
                    warn!(?error, "tx wakeup failed");
                }
            }
        }

        count
    }

    /// Drains up to `offsets.len()` completed transmissions
    ///
    /// Completion means hardware handoff, not delivery.
    #[inline]
    pub fn tx_complete(&mut self, offsets: &mut [u64]) -> usize {
        let Some(rings) = &mut self.rings else {
            return 0;
        };
        rings
            .completion
            .0
            .dequeue_into(offsets, |desc| desc.address)
    }

    /// [`Self::tx_complete`] filling packet descriptors
    #[inline]
    pub fn tx_complete_meta(&mut self, meta: &mut [FrameMeta]) -> usize {
        let Some(rings) = &mut self.rings else {
            return 0;
        };
        rings.completion.0.dequeue_into(meta, |desc| FrameMeta {
            offset: desc.address,
            len: 0,
            flags: 0,
        })
    }

    /// Whether the kernel requests a wakeup to make RX progress
    #[inline]
    pub fn rx_need_wakeup(&self) -> bool {
        self.rings
            .as_ref()
            .is_some_and(|rings| rings.fill.0.needs_wakeup())
    }

    /// Whether the kernel requests a wakeup to make TX progress
    #[inline]
    pub fn tx_need_wakeup(&self) -> bool {
        self.rings
            .as_ref()
            .is_some_and(|rings| rings.tx.0.needs_wakeup())
    }

    // Accessors ----------------------------------------------------------

    #[inline]
    pub fn state(&self) -> State {
        self.state
    }

    #[inline]
    pub fn config(&self) -> &XskConfig {
        &self.config
    }

    /// Raw socket descriptor of a live join
    #[inline]
    pub fn fd(&self) -> Option<RawFd> {
        self.socket.as_ref().map(|socket| socket.as_raw_fd())
    }

    /// Interface name recorded by [`Self::bind`]
    #[inline]
    pub fn ifname(&self) -> Option<&str> {
        self.ifname.as_deref()
    }

    #[inline]
    pub fn ifindex(&self) -> u32 {
        self.ifindex
    }

    #[inline]
    pub fn queue_id(&self) -> u32 {
        self.queue_id
    }

    #[inline]
    pub fn umem(&self) -> &Umem {
        &self.umem
    }

    #[inline]
    pub fn umem_mut(&mut self) -> &mut Umem {
        &mut self.umem
    }

    /// Kernel-side drop and error counters for a live join
    pub fn statistics(&self) -> io::Result<XdpStatistics> {
        let socket = self
            .socket
            .as_ref()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "xsk is not joined"))?;
        syscall::statistics(socket)
    }

    #[cfg(test)]
    pub(crate) fn ring_cursors(&self) -> (u32, u32, u32, u32) {
        let rings = self.rings.as_ref().unwrap();
        (
            rings.fill.0.cursor(),
            rings.rx.0.cursor(),
            rings.tx.0.cursor(),
            rings.completion.0.cursor(),
        )
    }
}

impl Drop for Xsk {
    fn drop(&mut self) {
        // unformat so stale copies of the handle fail magic validation
        self.magic = 0;
    }
}


#[cfg(test)]
mod tests {
    use super::{testing::*, *};

    fn test_config() -> XskConfig {
        XskConfig {
            frame_sz: 2048,
            fr_depth: 64,
            rx_depth: 64,
            tx_depth: 64,
            cr_depth: 64,
            xdp_mode: XdpMode::Auto,
        }
    }

    #[test]
    fn config_validation_test() {
        let mut config = test_config();
        config.rx_depth = 0;
        assert!(matches!(
            Xsk::new(config),
            Err(XskError::Config("rx_depth"))
        ));

        let mut config = test_config();
        config.tx_depth = 48;
        assert!(matches!(
            Xsk::new(config),
            Err(XskError::Config("tx_depth"))
        ));

        let mut config = test_config();
        config.frame_sz = 1024;
        assert!(matches!(
            Xsk::new(config),
            Err(XskError::Config("frame_sz"))
        ));
    }

    #[test]
    fn lifecycle_test() {
        let mut xsk = Xsk::new(test_config()).unwrap();
        assert_eq!(xsk.state(), State::Formatted);

        // not joined; batch ops report zero progress rather than failing
        assert_eq!(xsk.rx_enqueue(&[0]), 0);
        assert_eq!(xsk.tx_complete(&mut [0]), 0);

        xsk.bind("lo", 0).unwrap();
        assert_eq!(xsk.state(), State::Bound);
        assert_eq!(xsk.ifname(), Some("lo"));
        assert!(xsk.ifindex() > 0);

        xsk.unbind().unwrap();
        assert_eq!(xsk.state(), State::Formatted);

        assert!(matches!(
            xsk.leave(),
            Err(XskError::State {
                required: State::Joined,
                ..
            })
        ));
    }

    #[test]
    fn unknown_interface_test() {
        let mut xsk = Xsk::new(test_config()).unwrap();
        assert!(matches!(
            xsk.bind("no-such-interface-0", 0),
            Err(XskError::Io(_))
        ));
        assert_eq!(xsk.state(), State::Formatted);
    }

    /// A frame pushed through FILL → RX and its TX partner through
    /// TX → COMPLETION both come back under their original offsets.
    #[test]
    fn loopback_round_trip_test() {
        let (mut xsk, mut kernel) = loopback(test_config());

        let rx_offset = xsk.umem().rx_frames().next().unwrap();
        let tx_offset = xsk.umem().tx_frames().next().unwrap();

        assert_eq!(xsk.rx_enqueue(&[rx_offset]), 1);

        let payload = [0xa5u8; 64];
        xsk.umem_mut()
            .frame_mut(tx_offset, 64)
            .copy_from_slice(&payload);

        let meta = FrameMeta {
            offset: tx_offset,
            len: 64,
            flags: 0,
        };
        assert_eq!(xsk.tx_enqueue(&[meta]), 1);

        assert_eq!(kernel.loopback_burst(8), 1);

        let mut received = [FrameMeta::default(); 8];
        assert_eq!(xsk.rx_complete(&mut received), 1);
        assert_eq!(received[0].offset, rx_offset);
        assert_eq!(received[0].len, 64);
        assert_eq!(xsk.umem().frame(rx_offset, 64), &payload);

        let mut completed = [0u64; 8];
        assert_eq!(xsk.tx_complete(&mut completed), 1);
        assert_eq!(completed[0], tx_offset);
    }

    /// Ring-space exhaustion is a short count, not an error
    #[test]
    fn tx_short_count_test() {
        let mut config = test_config();
        config.tx_depth = 4;
        config.cr_depth = 4;
        let (mut xsk, mut kernel) = loopback(config);

        let meta: Vec<FrameMeta> = xsk
            .umem()
            .tx_frames()
            .map(|offset| FrameMeta {
                offset,
                len: 1,
                flags: 0,
            })
            .collect();
        assert_eq!(meta.len(), 4);

        assert_eq!(xsk.tx_enqueue(&[]), 0);
        assert_eq!(xsk.tx_enqueue(&meta[..3]), 3);
        // one slot left; a batch of two gets exactly one in
        let last_two = [meta[3], meta[3]];
        assert_eq!(xsk.tx_enqueue(&last_two), 1);
        assert_eq!(xsk.tx_enqueue(&last_two), 0);

        assert_eq!(kernel.complete_tx(16), 4);

        let mut completed = [0u64; 8];
        assert_eq!(xsk.tx_complete(&mut completed), 4);
        // FIFO within the ring
        for (index, offset) in xsk.umem().tx_frames().enumerate() {
            assert_eq!(completed[index], offset);
        }
    }
}
