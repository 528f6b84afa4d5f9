//! FIFO channels for inter-task communication.
//!
//! A channel is configured by two orthogonal knobs: [`Capacity`] (how many
//! admitted items may wait) and [`Overflow`] (what a send does when there
//! is no room). Both halves clone: cloned senders interleave into one
//! queue (fan-in), cloned receivers compete for items (fan-out), and every
//! admitted item is delivered to exactly one receiver.
//!
//! Send and receive take the calling task's [`TaskContext`] so a suspended
//! operation observes cancellation within one suspension-point latency.

use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::task::{Context, Poll, Waker};

use crate::context::TaskContext;
use crate::error::{RecvError, SendError};

/// How many admitted items a channel buffers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Capacity {
    /// No buffer: a send only completes against a waiting receiver.
    Rendezvous,
    /// At most `n` buffered items.
    Bounded(usize),
    /// No admission limit.
    Unbounded,
}

/// What a send does when the channel has no room for the item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Overflow {
    /// Suspend the sender until room appears. The only policy under which
    /// `send` ever waits.
    #[default]
    Suspend,
    /// Evict the oldest buffered item to admit the new one. Never waits.
    DropOldest,
    /// Discard the new item. Never waits.
    DropLatest,
}

struct State<T> {
    queue: VecDeque<T>,
    capacity: Capacity,
    overflow: Overflow,
    closed: bool,
    senders: usize,
    receivers: usize,
    /// Receivers currently suspended; gates rendezvous admission.
    parked_receivers: usize,
    send_wakers: Vec<Waker>,
    recv_wakers: Vec<Waker>,
}

impl<T> State<T> {
    fn has_room(&self) -> bool {
        match self.capacity {
            Capacity::Unbounded => true,
            Capacity::Bounded(n) => self.queue.len() < n,
            Capacity::Rendezvous => self.queue.len() < self.parked_receivers,
        }
    }
}

struct Shared<T> {
    state: Mutex<State<T>>,
}

impl<T> Shared<T> {
    fn lock(&self) -> MutexGuard<'_, State<T>> {
        self.state.lock().expect("channel lock poisoned")
    }

    fn close(&self) {
        let (senders, receivers) = {
            let mut st = self.lock();
            st.closed = true;
            (std::mem::take(&mut st.send_wakers), std::mem::take(&mut st.recv_wakers))
        };
        for w in senders {
            w.wake();
        }
        for w in receivers {
            w.wake();
        }
    }
}

fn register(wakers: &mut Vec<Waker>, waker: &Waker) {
    if !wakers.iter().any(|w| w.will_wake(waker)) {
        wakers.push(waker.clone());
    }
}

/// Creates a channel. `Bounded(0)` is normalized to `Rendezvous`.
pub fn channel<T>(capacity: Capacity, overflow: Overflow) -> (Sender<T>, Receiver<T>) {
    let capacity = match capacity {
        Capacity::Bounded(0) => Capacity::Rendezvous,
        other => other,
    };
    let shared = Arc::new(Shared {
        state: Mutex::new(State {
            queue: VecDeque::new(),
            capacity,
            overflow,
            closed: false,
            senders: 1,
            receivers: 1,
            parked_receivers: 0,
            send_wakers: Vec::new(),
            recv_wakers: Vec::new(),
        }),
    });
    (Sender { shared: Arc::clone(&shared) }, Receiver { shared })
}

/// The producing half. Clone for fan-in.
pub struct Sender<T> {
    shared: Arc<Shared<T>>,
}

impl<T> Sender<T> {
    /// Delivers `item`, suspending only under the `Suspend` overflow
    /// policy while the channel is full.
    pub fn send<'a>(&'a self, cx: &'a TaskContext, item: T) -> SendFut<'a, T> {
        SendFut { shared: &self.shared, cx, item: Some(item) }
    }

    /// Non-suspending send attempt; a full `Suspend`-policy channel hands
    /// the item back as `Full`.
    pub fn try_send(&self, item: T) -> Result<(), SendError<T>> {
        let mut st = self.shared.lock();
        if st.closed {
            return Err(SendError::Closed(item));
        }
        match admit(&mut st, item) {
            Admission::Accepted => {
                let wakers = std::mem::take(&mut st.recv_wakers);
                drop(st);
                for w in wakers {
                    w.wake();
                }
                Ok(())
            }
            Admission::Discarded => Ok(()),
            Admission::NoRoom(item) => Err(SendError::Full(item)),
        }
    }

    /// Closes the channel for all senders and receivers. Idempotent;
    /// already-buffered items still drain.
    pub fn close(&self) {
        self.shared.close();
    }

    pub fn is_closed(&self) -> bool {
        self.shared.lock().closed
    }
}

impl<T> Clone for Sender<T> {
    fn clone(&self) -> Self {
        self.shared.lock().senders += 1;
        Sender { shared: Arc::clone(&self.shared) }
    }
}

impl<T> Drop for Sender<T> {
    fn drop(&mut self) {
        let last = {
            let mut st = self.shared.lock();
            st.senders -= 1;
            st.senders == 0
        };
        if last {
            self.shared.close();
        }
    }
}

enum Admission<T> {
    Accepted,
    Discarded,
    NoRoom(T),
}

fn admit<T>(st: &mut State<T>, item: T) -> Admission<T> {
    if st.has_room() {
        st.queue.push_back(item);
        return Admission::Accepted;
    }
    match st.overflow {
        Overflow::Suspend => Admission::NoRoom(item),
        Overflow::DropOldest => {
            // Nothing is buffered on a rendezvous channel; the new item is
            // the only thing there is to drop.
            if st.queue.pop_front().is_some() {
                st.queue.push_back(item);
                Admission::Accepted
            } else {
                Admission::Discarded
            }
        }
        Overflow::DropLatest => Admission::Discarded,
    }
}

/// Future returned by [`Sender::send`].
#[must_use = "futures do nothing unless polled or .awaited"]
pub struct SendFut<'a, T> {
    shared: &'a Arc<Shared<T>>,
    cx: &'a TaskContext,
    item: Option<T>,
}

impl<T> Unpin for SendFut<'_, T> {}

impl<T> Future for SendFut<'_, T> {
    type Output = Result<(), SendError<T>>;

    fn poll(self: Pin<&mut Self>, pcx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        let item = this.item.take().expect("send future polled after completion");
        let mut st = this.shared.lock();
        if this.cx.is_cancelled() {
            return Poll::Ready(Err(SendError::Cancelled(item)));
        }
        if st.closed {
            return Poll::Ready(Err(SendError::Closed(item)));
        }
        match admit(&mut st, item) {
            Admission::Accepted => {
                let wakers = std::mem::take(&mut st.recv_wakers);
                drop(st);
                for w in wakers {
                    w.wake();
                }
                Poll::Ready(Ok(()))
            }
            Admission::Discarded => Poll::Ready(Ok(())),
            Admission::NoRoom(item) => {
                this.item = Some(item);
                register(&mut st.send_wakers, pcx.waker());
                drop(st);
                this.cx.token().register(pcx.waker());
                Poll::Pending
            }
        }
    }
}

/// The consuming half. Clone for fan-out; receivers compete per item.
pub struct Receiver<T> {
    shared: Arc<Shared<T>>,
}

impl<T> Receiver<T> {
    /// Takes the next item, suspending until one is admitted or the
    /// channel is closed and drained.
    pub fn recv<'a>(&'a self, cx: &'a TaskContext) -> RecvFut<'a, T> {
        RecvFut { shared: &self.shared, cx, parked: false }
    }

    /// Non-suspending receive attempt.
    pub fn try_recv(&self) -> Result<T, RecvError> {
        let mut st = self.shared.lock();
        if let Some(item) = st.queue.pop_front() {
            let wakers = std::mem::take(&mut st.send_wakers);
            drop(st);
            for w in wakers {
                w.wake();
            }
            return Ok(item);
        }
        if st.closed { Err(RecvError::Closed) } else { Err(RecvError::Empty) }
    }

    /// Closes the channel for all senders and receivers. Idempotent.
    pub fn close(&self) {
        self.shared.close();
    }

    pub fn is_closed(&self) -> bool {
        self.shared.lock().closed
    }
}

impl<T> Clone for Receiver<T> {
    fn clone(&self) -> Self {
        self.shared.lock().receivers += 1;
        Receiver { shared: Arc::clone(&self.shared) }
    }
}

impl<T> Drop for Receiver<T> {
    fn drop(&mut self) {
        let last = {
            let mut st = self.shared.lock();
            st.receivers -= 1;
            st.receivers == 0
        };
        if last {
            self.shared.close();
        }
    }
}

/// Future returned by [`Receiver::recv`].
#[must_use = "futures do nothing unless polled or .awaited"]
pub struct RecvFut<'a, T> {
    shared: &'a Arc<Shared<T>>,
    cx: &'a TaskContext,
    parked: bool,
}

impl<T> Unpin for RecvFut<'_, T> {}

impl<T> Future for RecvFut<'_, T> {
    type Output = Result<T, RecvError>;

    fn poll(self: Pin<&mut Self>, pcx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        let mut st = this.shared.lock();
        if let Some(item) = st.queue.pop_front() {
            if this.parked {
                this.parked = false;
                st.parked_receivers -= 1;
            }
            let wakers = std::mem::take(&mut st.send_wakers);
            drop(st);
            for w in wakers {
                w.wake();
            }
            return Poll::Ready(Ok(item));
        }
        if this.cx.is_cancelled() {
            if this.parked {
                this.parked = false;
                st.parked_receivers -= 1;
            }
            return Poll::Ready(Err(RecvError::Cancelled));
        }
        if st.closed {
            if this.parked {
                this.parked = false;
                st.parked_receivers -= 1;
            }
            return Poll::Ready(Err(RecvError::Closed));
        }
        let newly_parked = if this.parked {
            Vec::new()
        } else {
            this.parked = true;
            st.parked_receivers += 1;
            // A newly waiting receiver is what admits a rendezvous send.
            std::mem::take(&mut st.send_wakers)
        };
        register(&mut st.recv_wakers, pcx.waker());
        drop(st);
        for w in newly_parked {
            w.wake();
        }
        this.cx.token().register(pcx.waker());
        Poll::Pending
    }
}

impl<T> Drop for RecvFut<'_, T> {
    fn drop(&mut self) {
        if self.parked {
            self.shared.lock().parked_receivers -= 1;
        }
    }
}

static SELECT_ROTATION: AtomicUsize = AtomicUsize::new(0);

/// Resolves to the first receiver with an item, as `(index, item)`.
///
/// When several channels are ready at once the winner is picked from a
/// start offset that rotates per call, so no ready channel is starved
/// across repeated selects. Fails with `Closed` only once every channel is
/// closed and drained.
pub fn select<'a, T>(cx: &'a TaskContext, receivers: &'a [&'a Receiver<T>]) -> SelectFut<'a, T> {
    let offset = SELECT_ROTATION.fetch_add(1, Ordering::Relaxed);
    SelectFut { cx, receivers, offset, parked: false }
}

/// Future returned by [`select`].
#[must_use = "futures do nothing unless polled or .awaited"]
pub struct SelectFut<'a, T> {
    cx: &'a TaskContext,
    receivers: &'a [&'a Receiver<T>],
    offset: usize,
    parked: bool,
}

impl<T> Unpin for SelectFut<'_, T> {}

impl<T> SelectFut<'_, T> {
    fn unpark_all(&mut self) {
        if self.parked {
            self.parked = false;
            for rx in self.receivers {
                rx.shared.lock().parked_receivers -= 1;
            }
        }
    }
}

impl<T> Future for SelectFut<'_, T> {
    type Output = Result<(usize, T), RecvError>;

    fn poll(self: Pin<&mut Self>, pcx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        if this.receivers.is_empty() {
            return Poll::Ready(Err(RecvError::Closed));
        }
        if this.cx.is_cancelled() {
            this.unpark_all();
            return Poll::Ready(Err(RecvError::Cancelled));
        }

        let len = this.receivers.len();
        let start = this.offset % len;
        let mut all_closed = true;
        for step in 0..len {
            let idx = (start + step) % len;
            let shared = &this.receivers[idx].shared;
            let mut st = shared.lock();
            if let Some(item) = st.queue.pop_front() {
                if this.parked {
                    st.parked_receivers -= 1;
                }
                let wakers = std::mem::take(&mut st.send_wakers);
                drop(st);
                for w in wakers {
                    w.wake();
                }
                // Never hold two channel locks at once.
                if this.parked {
                    this.parked = false;
                    for (other, rx) in this.receivers.iter().enumerate() {
                        if other != idx {
                            rx.shared.lock().parked_receivers -= 1;
                        }
                    }
                }
                return Poll::Ready(Ok((idx, item)));
            }
            if !st.closed {
                all_closed = false;
            }
        }

        if all_closed {
            this.unpark_all();
            return Poll::Ready(Err(RecvError::Closed));
        }

        let newly_parked = !this.parked;
        if newly_parked {
            this.parked = true;
        }
        for rx in this.receivers {
            let mut st = rx.shared.lock();
            if newly_parked {
                st.parked_receivers += 1;
            }
            register(&mut st.recv_wakers, pcx.waker());
            let wakers = if newly_parked {
                std::mem::take(&mut st.send_wakers)
            } else {
                Vec::new()
            };
            drop(st);
            for w in wakers {
                w.wake();
            }
        }
        this.cx.token().register(pcx.waker());
        Poll::Pending
    }
}

impl<T> Drop for SelectFut<'_, T> {
    fn drop(&mut self) {
        self.unpark_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RecvError;
    use futures::executor::block_on;

    #[test]
    fn bounded_zero_is_rendezvous() {
        let (tx, _rx) = channel::<u32>(Capacity::Bounded(0), Overflow::Suspend);
        assert!(matches!(tx.shared.lock().capacity, Capacity::Rendezvous));
    }

    #[test]
    fn try_send_and_try_recv_round_trip() {
        let (tx, rx) = channel(Capacity::Bounded(2), Overflow::Suspend);
        tx.try_send(1).unwrap();
        tx.try_send(2).unwrap();
        assert!(matches!(tx.try_send(3), Err(SendError::Full(3))));
        assert_eq!(rx.try_recv(), Ok(1));
        assert_eq!(rx.try_recv(), Ok(2));
        assert_eq!(rx.try_recv(), Err(RecvError::Empty));
    }

    #[test]
    fn drop_oldest_keeps_the_newest() {
        let (tx, rx) = channel(Capacity::Bounded(1), Overflow::DropOldest);
        tx.try_send(1).unwrap();
        tx.try_send(2).unwrap();
        assert_eq!(rx.try_recv(), Ok(2));
    }

    #[test]
    fn drop_latest_keeps_the_oldest() {
        let (tx, rx) = channel(Capacity::Bounded(1), Overflow::DropLatest);
        tx.try_send(1).unwrap();
        tx.try_send(2).unwrap();
        assert_eq!(rx.try_recv(), Ok(1));
    }

    #[test]
    fn closed_channel_drains_before_reporting_closure() {
        let cx = TaskContext::detached();
        let (tx, rx) = channel(Capacity::Unbounded, Overflow::Suspend);
        tx.try_send("a").unwrap();
        tx.close();
        assert!(matches!(tx.try_send("b"), Err(SendError::Closed("b"))));
        assert_eq!(block_on(rx.recv(&cx)), Ok("a"));
        assert_eq!(block_on(rx.recv(&cx)), Err(RecvError::Closed));
    }

    #[test]
    fn dropping_the_last_sender_closes() {
        let cx = TaskContext::detached();
        let (tx, rx) = channel(Capacity::Unbounded, Overflow::Suspend);
        let tx2 = tx.clone();
        tx.try_send(1).unwrap();
        drop(tx);
        drop(tx2);
        assert_eq!(block_on(rx.recv(&cx)), Ok(1));
        assert_eq!(block_on(rx.recv(&cx)), Err(RecvError::Closed));
    }
}
