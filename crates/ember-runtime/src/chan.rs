//! Bounded FIFO channels with suspending send and receive.
//!
//! A channel of capacity N buffers up to N values. When the buffer is full a
//! sender parks; when it is empty a receiver parks. Parked tasks queue in
//! arrival order and are served oldest first: a sender that finds a parked
//! receiver hands its value straight to that receiver, and a receiver that
//! frees a buffer slot admits exactly the oldest parked sender. Capacity 0 is
//! a rendezvous: every send waits for a matching receive.

use std::collections::{HashMap, HashSet, VecDeque};
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard};
use std::task::{Context, Poll, Waker};

use ember_value::Value;

use crate::diag::diag;
use crate::metrics::{hit, Metrics};

type WaiterId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ChanError {
    #[error("channel closed")]
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, thiserror::Error)]
pub enum TrySendError {
    #[error("channel full")]
    Full(Value),
    #[error("channel closed")]
    Closed(Value),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum TryRecvError {
    #[error("channel empty")]
    Empty,
    #[error("channel closed")]
    Closed,
}

struct ParkedSender {
    id: WaiterId,
    value: Value,
    waker: Waker,
}

struct ParkedReceiver {
    id: WaiterId,
    waker: Waker,
}

struct State {
    buf: VecDeque<Value>,
    capacity: usize,
    closed: bool,
    senders: VecDeque<ParkedSender>,
    receivers: VecDeque<ParkedReceiver>,
    // Values handed directly to parked receivers, keyed by receiver.
    delivered: HashMap<WaiterId, Value>,
    // Parked senders whose value has been taken.
    accepted: HashSet<WaiterId>,
    next_id: WaiterId,
}

impl State {
    fn next_id(&mut self) -> WaiterId {
        self.next_id += 1;
        self.next_id
    }

    fn try_send(&mut self, value: Value) -> Result<(), TrySendError> {
        if self.closed {
            return Err(TrySendError::Closed(value));
        }
        // A parked receiver implies an empty buffer.
        if let Some(r) = self.receivers.pop_front() {
            self.delivered.insert(r.id, value);
            r.waker.wake();
            return Ok(());
        }
        if self.buf.len() < self.capacity {
            self.buf.push_back(value);
            return Ok(());
        }
        Err(TrySendError::Full(value))
    }

    fn try_recv(&mut self) -> Result<Value, TryRecvError> {
        if let Some(value) = self.buf.pop_front() {
            if let Some(s) = self.senders.pop_front() {
                self.buf.push_back(s.value);
                self.accepted.insert(s.id);
                s.waker.wake();
            }
            return Ok(value);
        }
        if let Some(s) = self.senders.pop_front() {
            self.accepted.insert(s.id);
            s.waker.wake();
            return Ok(s.value);
        }
        if self.closed {
            return Err(TryRecvError::Closed);
        }
        Err(TryRecvError::Empty)
    }
}

#[derive(Clone)]
pub struct Channel {
    state: Arc<Mutex<State>>,
    metrics: Option<Arc<Metrics>>,
}

impl Channel {
    pub fn new(capacity: usize) -> Channel {
        Channel {
            metrics: None,
            state: Arc::new(Mutex::new(State {
                buf: VecDeque::with_capacity(capacity.min(1024)),
                capacity,
                closed: false,
                senders: VecDeque::new(),
                receivers: VecDeque::new(),
                delivered: HashMap::new(),
                accepted: HashSet::new(),
                next_id: 0,
            })),
        }
    }

    /// A channel whose completed sends and receives feed `metrics`.
    pub fn with_metrics(capacity: usize, metrics: Arc<Metrics>) -> Channel {
        Channel {
            metrics: Some(metrics),
            ..Channel::new(capacity)
        }
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn note_send(&self) {
        if let Some(m) = &self.metrics {
            hit(&m.chan_sends);
        }
    }

    fn note_recv(&self) {
        if let Some(m) = &self.metrics {
            hit(&m.chan_recvs);
        }
    }

    pub fn capacity(&self) -> usize {
        self.lock().capacity
    }

    /// Values currently buffered (excludes values held by parked senders).
    pub fn len(&self) -> usize {
        self.lock().buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    pub fn parked_senders(&self) -> usize {
        self.lock().senders.len()
    }

    pub fn parked_receivers(&self) -> usize {
        self.lock().receivers.len()
    }

    pub fn try_send(&self, value: Value) -> Result<(), TrySendError> {
        let res = self.lock().try_send(value);
        if res.is_ok() {
            self.note_send();
        }
        res
    }

    pub fn try_recv(&self) -> Result<Value, TryRecvError> {
        let res = self.lock().try_recv();
        if res.is_ok() {
            self.note_recv();
        }
        res
    }

    pub fn send(&self, value: Value) -> Send<'_> {
        Send {
            chan: self,
            value: Some(value),
            parked: None,
        }
    }

    pub fn recv(&self) -> Recv<'_> {
        Recv {
            chan: self,
            parked: None,
        }
    }

    /// Closes the channel. Parked senders fail; receivers drain what is
    /// buffered and then fail. Returns false if it was already closed.
    pub fn close(&self) -> bool {
        let mut st = self.lock();
        if st.closed {
            return false;
        }
        st.closed = true;
        if !st.senders.is_empty() || !st.receivers.is_empty() {
            diag!(
                "channel closed with {} parked senders, {} parked receivers",
                st.senders.len(),
                st.receivers.len()
            );
        }
        for s in st.senders.drain(..) {
            s.waker.wake();
        }
        for r in st.receivers.drain(..) {
            r.waker.wake();
        }
        true
    }
}

impl std::fmt::Debug for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let st = self.lock();
        f.debug_struct("Channel")
            .field("capacity", &st.capacity)
            .field("len", &st.buf.len())
            .field("closed", &st.closed)
            .finish()
    }
}

/// Future returned by [`Channel::send`]. Dropping it before completion
/// withdraws the value.
pub struct Send<'a> {
    chan: &'a Channel,
    value: Option<Value>,
    parked: Option<WaiterId>,
}

impl Future for Send<'_> {
    type Output = Result<(), ChanError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        let res = this.poll_send(cx);
        if let Poll::Ready(Ok(())) = res {
            this.chan.note_send();
        }
        res
    }
}

impl Send<'_> {
    fn poll_send(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), ChanError>> {
        let this = self;
        let mut st = this.chan.lock();

        if let Some(id) = this.parked {
            if st.accepted.remove(&id) {
                this.parked = None;
                return Poll::Ready(Ok(()));
            }
            if st.closed {
                st.senders.retain(|s| s.id != id);
                this.parked = None;
                return Poll::Ready(Err(ChanError::Closed));
            }
            if let Some(s) = st.senders.iter_mut().find(|s| s.id == id) {
                s.waker.clone_from(cx.waker());
            }
            return Poll::Pending;
        }

        let Some(value) = this.value.take() else {
            return Poll::Ready(Ok(()));
        };
        match st.try_send(value) {
            Ok(()) => Poll::Ready(Ok(())),
            Err(TrySendError::Closed(_)) => Poll::Ready(Err(ChanError::Closed)),
            Err(TrySendError::Full(value)) => {
                let id = st.next_id();
                st.senders.push_back(ParkedSender {
                    id,
                    value,
                    waker: cx.waker().clone(),
                });
                this.parked = Some(id);
                Poll::Pending
            }
        }
    }
}

impl Drop for Send<'_> {
    fn drop(&mut self) {
        let Some(id) = self.parked else {
            return;
        };
        let mut st = self.chan.lock();
        if !st.accepted.remove(&id) {
            st.senders.retain(|s| s.id != id);
        }
    }
}

/// Future returned by [`Channel::recv`]. Dropping it after a value was
/// handed over puts that value back at the head of the channel.
pub struct Recv<'a> {
    chan: &'a Channel,
    parked: Option<WaiterId>,
}

impl Future for Recv<'_> {
    type Output = Result<Value, ChanError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        let res = this.poll_recv(cx);
        if let Poll::Ready(Ok(_)) = res {
            this.chan.note_recv();
        }
        res
    }
}

impl Recv<'_> {
    fn poll_recv(&mut self, cx: &mut Context<'_>) -> Poll<Result<Value, ChanError>> {
        let this = self;
        let mut st = this.chan.lock();

        if let Some(id) = this.parked {
            if let Some(value) = st.delivered.remove(&id) {
                this.parked = None;
                return Poll::Ready(Ok(value));
            }
            if st.closed {
                st.receivers.retain(|r| r.id != id);
                this.parked = None;
                return Poll::Ready(Err(ChanError::Closed));
            }
            if let Some(r) = st.receivers.iter_mut().find(|r| r.id == id) {
                r.waker.clone_from(cx.waker());
            }
            return Poll::Pending;
        }

        match st.try_recv() {
            Ok(value) => Poll::Ready(Ok(value)),
            Err(TryRecvError::Closed) => Poll::Ready(Err(ChanError::Closed)),
            Err(TryRecvError::Empty) => {
                let id = st.next_id();
                st.receivers.push_back(ParkedReceiver {
                    id,
                    waker: cx.waker().clone(),
                });
                this.parked = Some(id);
                Poll::Pending
            }
        }
    }
}

impl Drop for Recv<'_> {
    fn drop(&mut self) {
        let Some(id) = self.parked else {
            return;
        };
        let mut st = self.chan.lock();
        st.receivers.retain(|r| r.id != id);
        let Some(value) = st.delivered.remove(&id) else {
            return;
        };
        if let Some(r) = st.receivers.pop_front() {
            st.delivered.insert(r.id, value);
            r.waker.wake();
        } else {
            // May briefly exceed capacity; the next receive drains it.
            st.buf.push_front(value);
        }
    }
}
