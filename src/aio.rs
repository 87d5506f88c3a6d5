// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Batch I/O adapter over a joined [`Xsk`]
//!
//! Turns the polling, partial-progress driver API into two batch
//! endpoints: received packets are delivered to an upstream [`Sink`], and
//! the adapter itself is a [`Sink`] that upstream producers hand outgoing
//! batches to. The owning thread pumps everything by calling
//! [`XskAio::housekeep`] on each tick; nothing blocks or suspends.
//!
//! All state is allocated when the adapter is built. The TX free stack is
//! the single source of truth for which TX-partition frames are owned by
//! userspace; frames leave it through [`Sink::receive`] and come back
//! through Completion ring drains.

use crate::xsk::{FrameMeta, State, Xsk};
use core::{fmt, marker::PhantomData};
use tracing::{debug, error, warn};

/// A borrowed packet payload at the adapter boundary
///
/// Plain pointer-and-length so batches can live in preallocated scratch;
/// the lifetime parameter ties safe constructions to their backing bytes.
#[derive(Clone, Copy)]
pub struct Buffer<'a> {
    data: *const u8,
    len: usize,
    _lifetime: PhantomData<&'a [u8]>,
}

impl<'a> Buffer<'a> {
    #[inline]
    pub fn new(data: &'a [u8]) -> Self {
        Self {
            data: data.as_ptr(),
            len: data.len(),
            _lifetime: PhantomData,
        }
    }

    #[inline]
    pub fn data(&self) -> &'a [u8] {
        unsafe { core::slice::from_raw_parts(self.data, self.len) }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Erases the lifetime for storage in the adapter's scratch batch
    ///
    /// The scratch slice is only ever handed out for the duration of one
    /// `Sink::receive` call, while the frames it points into are
    /// userspace-owned.
    #[inline]
    fn erased(data: &[u8]) -> Buffer<'static> {
        Buffer {
            data: data.as_ptr(),
            len: data.len(),
            _lifetime: PhantomData,
        }
    }
}

impl fmt::Debug for Buffer<'_> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Buffer").field("len", &self.len).finish()
    }
}

/// An ordered, non-blocking sink for batches of packet buffers
///
/// The receiver processes buffers in order and returns how many it
/// consumed; the sender retries the tail later. Buffers must not be
/// referenced after the call returns.
pub trait Sink {
    fn receive(&mut self, batch: &[Buffer<'_>]) -> usize;
}

#[derive(Clone, Copy, Debug)]
pub struct AioConfig {
    /// Must match the TX ring depth of the socket being joined
    pub tx_depth: u32,
    /// Scratch size for one RX or TX batch; typically 64 to 256
    pub batch_cnt: u32,
}

#[derive(Debug, thiserror::Error)]
pub enum AioError {
    #[error("config field `{0}` is invalid")]
    Config(&'static str),
    #[error("adapter tx_depth {adapter} does not match xsk tx_depth {xsk}")]
    DepthMismatch { adapter: u32, xsk: u32 },
    #[error("xsk is not joined")]
    NotJoined,
    #[error("fill ring rejected a frame while priming; was the xsk left unclean?")]
    UncleanXsk,
}

pub struct XskAio {
    xsk: Xsk,
    /// Upstream consumer of received packets
    rx: Option<Box<dyn Sink>>,
    batch_cnt: usize,
    /// Scratch for one batch of ring descriptors
    meta: Box<[FrameMeta]>,
    /// Scratch for one batch of payload buffers
    batch: Box<[Buffer<'static>]>,
    /// Offsets of userspace-owned TX frames; `stack[..top]` is live
    tx_stack: Box<[u64]>,
    top: usize,
}

impl XskAio {
    /// Joins the adapter to a joined socket, priming both directions
    ///
    /// Every RX-partition frame is handed to the kernel through the Fill
    /// ring and every TX-partition frame is pushed onto the free stack, so
    /// the frame-conservation invariant holds from the first tick.
    pub fn join(config: AioConfig, mut xsk: Xsk) -> Result<Self, AioError> {
        if config.batch_cnt == 0 {
            return Err(AioError::Config("batch_cnt"));
        }
        if config.tx_depth == 0 {
            return Err(AioError::Config("tx_depth"));
        }

        if config.tx_depth != xsk.config().tx_depth {
            return Err(AioError::DepthMismatch {
                adapter: config.tx_depth,
                xsk: xsk.config().tx_depth,
            });
        }

        if xsk.state() != State::Joined {
            return Err(AioError::NotJoined);
        }

        // prime the RX path one frame at a time; any rejection means the
        // fill ring still carries entries from a previous life
        let rx_frames: Vec<u64> = xsk.umem().rx_frames().collect();
        for offset in rx_frames {
            if xsk.rx_enqueue(&[offset]) != 1 {
                return Err(AioError::UncleanXsk);
            }
        }

        let tx_stack: Box<[u64]> = xsk.umem().tx_frames().collect();
        let top = tx_stack.len();

        let batch_cnt = config.batch_cnt as usize;

        debug!(batch_cnt, tx_depth = config.tx_depth, "joined xsk aio");

        Ok(Self {
            xsk,
            rx: None,
            batch_cnt,
            meta: vec![FrameMeta::default(); batch_cnt].into(),
            batch: vec![Buffer::erased(&[]); batch_cnt].into(),
            tx_stack,
            top,
        })
    }

    /// Detaches from the socket and returns it
    ///
    /// In-flight kernel state is left as is; the caller decides whether to
    /// `leave` the socket too or join a fresh adapter to it.
    pub fn leave(self) -> Xsk {
        self.xsk
    }

    /// Registers the upstream consumer for received packets
    pub fn set_rx(&mut self, sink: Box<dyn Sink>) {
        self.rx = Some(sink);
    }

    /// The sink upstream producers transmit through
    pub fn tx_sink(&mut self) -> &mut dyn Sink {
        self
    }

    /// One cooperative tick: deliver received packets, replenish the Fill
    /// ring, reclaim completed TX frames
    pub fn housekeep(&mut self) {
        let drained = self.xsk.rx_complete(&mut self.meta);

        if drained > 0 {
            for index in 0..drained {
                let meta = self.meta[index];
                let frame = self.xsk.umem().frame(meta.offset, meta.len);
                self.batch[index] = Buffer::erased(frame);
            }

            if let Some(rx) = &mut self.rx {
                let accepted = rx.receive(&self.batch[..drained]);
                if accepted < drained {
                    // the consumer contract requires full acceptance; the
                    // short remainder is dropped, not buffered
                    warn!(accepted, drained, "rx sink returned a short accept");
                }
            }

            // the frames go straight back to the kernel either way
            let replenished = self.xsk.rx_enqueue_meta(&self.meta[..drained]);
            if replenished < drained {
                error!(
                    replenished,
                    drained, "frames lost replenishing the fill ring"
                );
            }
        }

        self.tx_complete();
    }

    /// Drains TX completions into the free stack
    pub fn tx_complete(&mut self) {
        let drained = self.xsk.tx_complete(&mut self.tx_stack[self.top..]);
        self.top += drained;
        debug_assert!(self.top <= self.tx_stack.len());
    }

    /// Publishes `self.meta[..len]`, retrying until the whole batch is on
    /// the TX ring
    ///
    /// Forward progress is guaranteed: the interleaved completion drains
    /// observe the kernel's ring consumption, and the number of distinct
    /// in-flight TX frames can never exceed the ring depth.
    fn flush_pending(&mut self, len: usize) {
        let mut sent = 0;
        while sent < len {
            sent += self.xsk.tx_enqueue(&self.meta[sent..len]);
            if sent < len {
                self.tx_complete();
            }
        }
    }

    #[cfg(test)]
    pub(crate) fn tx_top(&self) -> usize {
        self.top
    }

    #[cfg(test)]
    pub(crate) fn xsk_handle(&self) -> &Xsk {
        &self.xsk
    }
}

impl Sink for XskAio {
    /// Copies a batch of payloads into free TX frames and transmits them
    ///
    /// Returns the number of buffers consumed; a short return means the
    /// free stack ran dry and the caller should retry after completions
    /// have been reclaimed. Oversize payloads are dropped (and counted as
    /// consumed) with an error log.
    fn receive(&mut self, batch: &[Buffer<'_>]) -> usize {
        // reclaim whatever the kernel already finished with
        self.tx_complete();

        let frame_sz = self.xsk.config().frame_sz;
        let mut pending = 0;

        for (index, buffer) in batch.iter().enumerate() {
            if self.top == 0 {
                self.flush_pending(pending);
                return index;
            }

            if buffer.len() > frame_sz as usize {
                error!(
                    len = buffer.len(),
                    frame_sz, "payload exceeds frame size; dropping"
                );
                continue;
            }

            if pending == self.batch_cnt {
                self.flush_pending(pending);
                pending = 0;
            }

            self.top -= 1;
            let offset = self.tx_stack[self.top];

            self.xsk
                .umem_mut()
                .frame_mut(offset, buffer.len() as u32)
                .copy_from_slice(buffer.data());

            self.meta[pending] = FrameMeta {
                offset,
                len: buffer.len() as u32,
                flags: 0,
            };
            pending += 1;
        }

        if pending > 0 {
            // best-effort residual flush; anything the ring refuses stays
            // userspace-owned, so hand it straight back to the stack
            let sent = self.xsk.tx_enqueue(&self.meta[..pending]);
            for meta in &self.meta[sent..pending] {
                self.tx_stack[self.top] = meta.offset;
                self.top += 1;
            }
            if sent < pending {
                debug!(sent, pending, "residual tx flush came up short");
            }
        }

        batch.len()
    }
}
