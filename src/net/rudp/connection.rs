//! Per-peer reliability state: send window, retransmission, reordering.

use std::collections::BTreeMap;
use std::net::{SocketAddr, UdpSocket};
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender};
use parking_lot::{Condvar, Mutex};

use super::packet::{Segment, SegmentKind};
use super::{RudpError, RudpOptions, MAX_MESSAGE};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Status {
    Open,
    Closed,
    Lost { retries: u32 },
}

struct InFlight {
    segment: Bytes,
    last_sent: Instant,
    retries: u32,
    rto: Duration,
}

/// In-order delivery with a bounded buffer for early arrivals.
struct ReorderBuffer {
    next_expected: u32,
    early: BTreeMap<u32, Bytes>,
    capacity: usize,
}

impl ReorderBuffer {
    fn new(capacity: usize) -> Self {
        Self {
            next_expected: 0,
            early: BTreeMap::new(),
            capacity,
        }
    }

    /// Whether `seq` has not been delivered yet.
    fn is_new(&self, seq: u32) -> bool {
        seq >= self.next_expected
    }

    fn buffered(&self) -> usize {
        self.early.len()
    }

    /// Accept `seq` and return whatever became deliverable, in order.
    /// `None` means the segment was dropped and must not be acknowledged.
    fn accept(&mut self, seq: u32, payload: Bytes) -> Option<Vec<Bytes>> {
        let mut ready = Vec::new();
        if seq == self.next_expected {
            ready.push(payload);
            self.next_expected = self.next_expected.wrapping_add(1);
            while let Some(next) = self.early.remove(&self.next_expected) {
                ready.push(next);
                self.next_expected = self.next_expected.wrapping_add(1);
            }
        } else if seq > self.next_expected && !self.early.contains_key(&seq) {
            if self.early.len() < self.capacity {
                self.early.insert(seq, payload);
            } else {
                tracing::trace!(seq, "Reorder buffer full, dropping segment");
                return None;
            }
        }
        Some(ready)
    }
}

struct State {
    status: Status,
    next_seq: u32,
    in_flight: BTreeMap<u32, InFlight>,
    reorder: ReorderBuffer,
}

pub(crate) struct Connection {
    peer: SocketAddr,
    socket: Arc<UdpSocket>,
    options: RudpOptions,
    state: Mutex<State>,
    window_open: Condvar,
    delivery_capacity: usize,
    delivered_tx: Sender<Bytes>,
    delivered_rx: Receiver<Bytes>,
}

impl Connection {
    pub(crate) fn new(peer: SocketAddr, socket: Arc<UdpSocket>, options: RudpOptions) -> Arc<Self> {
        // Room for a full reorder buffer flushing behind one in-order segment.
        let delivery_capacity = options.window.max(1) * 4 + options.reorder_buffer + 1;
        let (delivered_tx, delivered_rx) = channel::bounded(delivery_capacity);
        let reorder = ReorderBuffer::new(options.reorder_buffer);
        Arc::new(Self {
            peer,
            socket,
            options,
            state: Mutex::new(State {
                status: Status::Open,
                next_seq: 0,
                in_flight: BTreeMap::new(),
                reorder,
            }),
            window_open: Condvar::new(),
            delivery_capacity,
            delivered_tx,
            delivered_rx,
        })
    }

    pub(crate) fn peer(&self) -> SocketAddr {
        self.peer
    }

    pub(crate) fn status(&self) -> Status {
        self.state.lock().status
    }

    pub(crate) fn send_control(&self, kind: SegmentKind, seq: u32) {
        if let Err(e) = self.socket.send_to(&Segment::control(kind, seq).encode(), self.peer) {
            tracing::trace!(peer = %self.peer, error = %e, "Control segment not sent");
        }
    }

    /// Queue one message, blocking while the send window is full.
    pub(crate) fn send(&self, payload: Bytes) -> Result<(), RudpError> {
        if payload.len() > MAX_MESSAGE {
            return Err(RudpError::MessageTooLarge {
                len: payload.len(),
                max: MAX_MESSAGE,
            });
        }

        let segment = {
            let mut state = self.state.lock();
            loop {
                check_open(state.status)?;
                if state.in_flight.len() < self.options.window {
                    break;
                }
                self.window_open.wait_for(&mut state, self.options.tick);
            }
            let seq = state.next_seq;
            state.next_seq = seq.wrapping_add(1);
            let segment = Segment::data(seq, payload).encode();
            state.in_flight.insert(
                seq,
                InFlight {
                    segment: segment.clone(),
                    last_sent: Instant::now(),
                    retries: 0,
                    rto: self.options.retransmit,
                },
            );
            segment
        };

        self.socket.send_to(&segment, self.peer)?;
        Ok(())
    }

    /// Next delivered message, waiting up to `timeout`.
    pub(crate) fn recv_timeout(&self, timeout: Duration) -> Result<Option<Bytes>, RudpError> {
        match self.delivered_rx.recv_timeout(timeout) {
            Ok(message) => Ok(Some(message)),
            Err(RecvTimeoutError::Timeout) => {
                check_open(self.status())?;
                Ok(None)
            }
            Err(RecvTimeoutError::Disconnected) => Err(RudpError::Closed),
        }
    }

    /// Handle a segment addressed to this connection (driver thread).
    pub(crate) fn on_segment(&self, segment: Segment) {
        match segment.kind {
            SegmentKind::Data => {
                let seq = segment.seq;
                let ready = {
                    let mut state = self.state.lock();
                    if state.status != Status::Open {
                        return;
                    }
                    // Left unacknowledged, the peer retransmits once the reader catches up.
                    if state.reorder.is_new(seq)
                        && self.delivered_tx.len() + state.reorder.buffered() >= self.delivery_capacity
                    {
                        tracing::trace!(peer = %self.peer, seq, "Delivery queue full, withholding ack");
                        return;
                    }
                    match state.reorder.accept(seq, segment.payload) {
                        Some(ready) => ready,
                        None => return,
                    }
                };
                self.send_control(SegmentKind::Ack, seq);
                for message in ready {
                    if self.delivered_tx.try_send(message).is_err() {
                        tracing::warn!(peer = %self.peer, seq, "Delivery queue overflow, message dropped");
                    }
                }
            }
            SegmentKind::Ack => {
                let mut state = self.state.lock();
                if state.in_flight.remove(&segment.seq).is_some() {
                    self.window_open.notify_all();
                }
            }
            SegmentKind::Fin => {
                tracing::debug!(peer = %self.peer, "Peer closed virtual connection");
                self.mark(Status::Closed);
            }
            SegmentKind::Syn | SegmentKind::SynAck => {}
        }
    }

    /// Retransmit overdue segments. Returns false once the connection is done.
    pub(crate) fn tick(&self, now: Instant) -> bool {
        let mut resend = Vec::new();
        {
            let mut state = self.state.lock();
            if state.status != Status::Open {
                return false;
            }
            let mut lost = None;
            for pending in state.in_flight.values_mut() {
                if now.duration_since(pending.last_sent) < pending.rto {
                    continue;
                }
                if pending.retries >= self.options.max_retries {
                    lost = Some(pending.retries);
                    break;
                }
                pending.retries += 1;
                pending.last_sent = now;
                pending.rto = (pending.rto * 2).min(self.options.max_retransmit);
                resend.push(pending.segment.clone());
            }
            if let Some(retries) = lost {
                tracing::warn!(peer = %self.peer, retries, "Virtual connection lost");
                state.status = Status::Lost { retries };
                state.in_flight.clear();
                self.window_open.notify_all();
                return false;
            }
        }

        for segment in resend {
            let _ = self.socket.send_to(&segment, self.peer);
        }
        true
    }

    /// Close locally and tell the peer.
    pub(crate) fn close(&self) {
        if self.mark(Status::Closed) {
            self.send_control(SegmentKind::Fin, 0);
        }
    }

    /// Move out of `Open`. Returns true if this call did it.
    fn mark(&self, status: Status) -> bool {
        let mut state = self.state.lock();
        if state.status != Status::Open {
            return false;
        }
        state.status = status;
        state.in_flight.clear();
        self.window_open.notify_all();
        true
    }
}

fn check_open(status: Status) -> Result<(), RudpError> {
    match status {
        Status::Open => Ok(()),
        Status::Closed => Err(RudpError::Closed),
        Status::Lost { retries } => Err(RudpError::ConnectionLost { retries }),
    }
}
