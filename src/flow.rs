//! Cold asynchronous sequences.
//!
//! A [`Flow`] is a recipe for producing values: nothing runs at
//! construction, and every terminal operation re-runs the generator from
//! scratch. Intermediate operators compose a new recipe; the terminal
//! operators ([`collect`](Flow::collect) and friends) are the only places
//! evaluation is driven, and they honor the caller's cancellation between
//! items.
//!
//! Failure is carried in-band: each stream item is an [`Outcome`], and the
//! first `Err` terminates the sequence. The generator cannot intercept its
//! own failure; only a downstream [`catch`](Flow::catch) can, and because
//! `catch` composes at its position in the chain it can never see errors
//! raised by stages after it.

use std::future::{Future, poll_fn};
use std::pin::{Pin, pin};
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};

use futures::FutureExt;
use futures::future::{self, BoxFuture};
use futures::stream::{self, BoxStream, Stream, StreamExt};

use crate::channel::{Capacity, Overflow, Receiver, channel};
use crate::context::TaskContext;
use crate::dispatch::Dispatcher;
use crate::error::{Outcome, TaskError};

pub(crate) type FlowStream<T> = BoxStream<'static, Outcome<T>>;

/// A cold, lazily-evaluated sequence of `T`.
///
/// Cheap to clone; clones share the recipe, and every collection runs an
/// independent evaluation.
pub struct Flow<T> {
    factory: Arc<dyn Fn() -> FlowStream<T> + Send + Sync + 'static>,
}

impl<T> Clone for Flow<T> {
    fn clone(&self) -> Self {
        Flow { factory: Arc::clone(&self.factory) }
    }
}

/// Hands values from a generator to its collector, one at a time.
///
/// Emission is a suspension point: the generator does not run ahead of the
/// collector unless a [`buffer`](Flow::buffer) stage says so.
pub struct Emitter<T> {
    slot: Arc<Slot<T>>,
}

impl<T> Clone for Emitter<T> {
    fn clone(&self) -> Self {
        Emitter { slot: Arc::clone(&self.slot) }
    }
}

struct Slot<T> {
    value: Mutex<Option<T>>,
}

impl<T> Slot<T> {
    fn put(&self, value: T) -> Result<(), T> {
        let mut slot = self.value.lock().expect("emitter slot lock poisoned");
        if slot.is_some() {
            return Err(value);
        }
        *slot = Some(value);
        Ok(())
    }

    fn take(&self) -> Option<T> {
        self.value.lock().expect("emitter slot lock poisoned").take()
    }

    fn is_empty(&self) -> bool {
        self.value.lock().expect("emitter slot lock poisoned").is_none()
    }
}

impl<T> Emitter<T> {
    /// Emits one value downstream; resolves once the collector took it.
    pub fn emit(&self, value: T) -> Emit<'_, T> {
        Emit { slot: &self.slot, value: Some(value), placed: false }
    }
}

/// Future returned by [`Emitter::emit`].
#[must_use = "futures do nothing unless polled or .awaited"]
pub struct Emit<'a, T> {
    slot: &'a Slot<T>,
    value: Option<T>,
    placed: bool,
}

impl<T> Unpin for Emit<'_, T> {}

impl<T> Future for Emit<'_, T> {
    type Output = ();

    fn poll(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        if !this.placed {
            let value = this.value.take().expect("emit future polled after completion");
            match this.slot.put(value) {
                // Yield so the collector drains the slot before the
                // generator moves on.
                Ok(()) => {
                    this.placed = true;
                    Poll::Pending
                }
                Err(value) => {
                    this.value = Some(value);
                    Poll::Pending
                }
            }
        } else if this.slot.is_empty() {
            Poll::Ready(())
        } else {
            Poll::Pending
        }
    }
}

struct GenStream<T> {
    generator: Option<BoxFuture<'static, Outcome<()>>>,
    slot: Arc<Slot<T>>,
    trailing_error: Option<TaskError>,
}

impl<T> Unpin for GenStream<T> {}

impl<T> Stream for GenStream<T> {
    type Item = Outcome<T>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        let Some(generator) = this.generator.as_mut() else {
            return Poll::Ready(this.trailing_error.take().map(Err));
        };
        match generator.as_mut().poll(cx) {
            Poll::Pending => match this.slot.take() {
                Some(value) => Poll::Ready(Some(Ok(value))),
                None => Poll::Pending,
            },
            Poll::Ready(Ok(())) => {
                this.generator = None;
                Poll::Ready(this.slot.take().map(Ok))
            }
            Poll::Ready(Err(error)) => {
                this.generator = None;
                match this.slot.take() {
                    Some(value) => {
                        this.trailing_error = Some(error);
                        Poll::Ready(Some(Ok(value)))
                    }
                    None => Poll::Ready(Some(Err(error))),
                }
            }
        }
    }
}

/// Builds a flow from a generator. The generator runs once per collection,
/// never at construction.
pub fn flow<T, G, Fut>(generator: G) -> Flow<T>
where
    T: Send + 'static,
    G: Fn(Emitter<T>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Outcome<()>> + Send + 'static,
{
    Flow::from_factory(move || {
        let slot = Arc::new(Slot { value: Mutex::new(None) });
        let emitter = Emitter { slot: Arc::clone(&slot) };
        GenStream {
            generator: Some(generator(emitter).boxed()),
            slot,
            trailing_error: None,
        }
        .boxed()
    })
}

/// A flow over a fixed set of values.
pub fn flow_of<T>(items: Vec<T>) -> Flow<T>
where
    T: Clone + Send + Sync + 'static,
{
    Flow::from_factory(move || stream::iter(items.clone().into_iter().map(Ok)).boxed())
}

impl<T> Flow<T>
where
    T: Send + 'static,
{
    pub(crate) fn from_factory(
        factory: impl Fn() -> FlowStream<T> + Send + Sync + 'static,
    ) -> Self {
        Flow { factory: Arc::new(factory) }
    }

    /// A flow over a clonable iterator.
    pub fn from_iter<I>(iter: I) -> Self
    where
        I: IntoIterator<Item = T> + Clone + Send + Sync + 'static,
        I::IntoIter: Send,
    {
        Flow::from_factory(move || stream::iter(iter.clone().into_iter().map(Ok)).boxed())
    }

    pub(crate) fn open(&self) -> FlowStream<T> {
        (self.factory)()
    }

    /// Transforms each value.
    pub fn map<U, F>(self, f: F) -> Flow<U>
    where
        U: Send + 'static,
        F: Fn(T) -> U + Send + Sync + 'static,
    {
        let f = Arc::new(f);
        Flow::from_factory(move || {
            let f = Arc::clone(&f);
            self.open().map(move |item| item.map(|v| f(v))).boxed()
        })
    }

    /// Keeps only the values the predicate accepts.
    pub fn filter<F>(self, predicate: F) -> Flow<T>
    where
        F: Fn(&T) -> bool + Send + Sync + 'static,
    {
        let predicate = Arc::new(predicate);
        Flow::from_factory(move || {
            let predicate = Arc::clone(&predicate);
            self.open()
                .filter(move |item| {
                    let keep = match item {
                        Ok(value) => predicate(value),
                        Err(_) => true,
                    };
                    future::ready(keep)
                })
                .boxed()
        })
    }

    /// Rewrites each upstream value into zero or more downstream ones via
    /// an emitter, with suspension allowed in between.
    pub fn transform<U, F, Fut>(self, f: F) -> Flow<U>
    where
        U: Send + 'static,
        F: Fn(T, Emitter<U>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Outcome<()>> + Send + 'static,
    {
        let f = Arc::new(f);
        let source = self;
        flow(move |emitter| {
            let f = Arc::clone(&f);
            let mut upstream = source.open();
            async move {
                while let Some(item) = upstream.next().await {
                    match item {
                        Ok(value) => f(value, emitter.clone()).await?,
                        Err(error) => return Err(error),
                    }
                }
                Ok(())
            }
        })
    }

    /// Ends the flow after `n` items.
    pub fn take(self, n: usize) -> Flow<T> {
        Flow::from_factory(move || self.open().take(n).boxed())
    }

    /// Discards the first `n` values (errors are never discarded).
    pub fn skip(self, n: usize) -> Flow<T> {
        Flow::from_factory(move || {
            let mut remaining = n;
            self.open()
                .filter(move |item| {
                    let keep = match item {
                        Err(_) => true,
                        Ok(_) if remaining == 0 => true,
                        Ok(_) => {
                            remaining -= 1;
                            false
                        }
                    };
                    future::ready(keep)
                })
                .boxed()
        })
    }

    /// Decouples producer and consumer speed: the generator runs on its
    /// own execution context and may run up to `capacity` items ahead.
    pub fn buffer(self, capacity: usize) -> Flow<T> {
        self.through_channel(Capacity::Bounded(capacity.max(1)), Overflow::Suspend)
    }

    /// Keeps only the latest value when the consumer lags: intermediate
    /// values a slow consumer never asked for are dropped.
    pub fn conflate(self) -> Flow<T> {
        self.through_channel(Capacity::Bounded(1), Overflow::DropOldest)
    }

    fn through_channel(self, capacity: Capacity, overflow: Overflow) -> Flow<T> {
        Flow::from_factory(move || {
            let (tx, rx) = channel::<Outcome<T>>(capacity, overflow);
            let mut upstream = self.open();
            let cx = TaskContext::detached();
            Dispatcher::Compute.spawn(Box::pin(async move {
                while let Some(item) = upstream.next().await {
                    if tx.send(&cx, item).await.is_err() {
                        // The collector went away; stop producing.
                        return;
                    }
                }
                tx.close();
            }));
            receiver_stream(rx).boxed()
        })
    }

    /// Drains each inner flow completely before starting the next.
    pub fn flat_map_concat<U, F>(self, f: F) -> Flow<U>
    where
        U: Send + 'static,
        F: Fn(T) -> Flow<U> + Send + Sync + 'static,
    {
        let f = Arc::new(f);
        Flow::from_factory(move || {
            let f = Arc::clone(&f);
            self.open()
                .map(move |item| match item {
                    Ok(value) => f(value).open(),
                    Err(error) => stream::once(future::ready(Err(error))).boxed(),
                })
                .flatten()
                .boxed()
        })
    }

    /// Runs up to `concurrency` inner flows at once, interleaving their
    /// outputs in arrival order.
    pub fn flat_map_merge<U, F>(self, concurrency: usize, f: F) -> Flow<U>
    where
        U: Send + 'static,
        F: Fn(T) -> Flow<U> + Send + Sync + 'static,
    {
        let f = Arc::new(f);
        Flow::from_factory(move || {
            let f = Arc::clone(&f);
            self.open()
                .map(move |item| match item {
                    Ok(value) => f(value).open(),
                    Err(error) => stream::once(future::ready(Err(error))).boxed(),
                })
                .flatten_unordered(concurrency)
                .boxed()
        })
    }

    /// Every new upstream value cancels the in-flight inner flow and
    /// starts a fresh one.
    pub fn flat_map_latest<U, F>(self, f: F) -> Flow<U>
    where
        U: Send + 'static,
        F: Fn(T) -> Flow<U> + Send + Sync + 'static,
    {
        let f = Arc::new(f);
        Flow::from_factory(move || {
            let f = Arc::clone(&f);
            let outer = self.open().map(move |item| item.map(|v| f(v)));
            FlattenLatest { outer: outer.boxed(), inner: None, outer_done: false }.boxed()
        })
    }

    /// Intercepts an upstream terminal error and continues with the
    /// fallback flow. Errors raised after this stage are not its business.
    pub fn catch<F>(self, fallback: F) -> Flow<T>
    where
        F: Fn(TaskError) -> Flow<T> + Send + Sync + 'static,
    {
        let fallback: Arc<dyn Fn(TaskError) -> Flow<T> + Send + Sync> = Arc::new(fallback);
        Flow::from_factory(move || {
            CatchStream {
                inner: self.open(),
                fallback: Arc::clone(&fallback),
                switched: false,
            }
            .boxed()
        })
    }

    /// Observes how the flow ended: `None` for a normal end, the error
    /// otherwise. Observation only; propagation continues regardless.
    pub fn on_completion<F>(self, observer: F) -> Flow<T>
    where
        F: Fn(Option<&TaskError>) + Send + Sync + 'static,
    {
        let observer: Arc<dyn Fn(Option<&TaskError>) + Send + Sync> = Arc::new(observer);
        Flow::from_factory(move || {
            OnCompletionStream {
                inner: self.open(),
                observer: Arc::clone(&observer),
                fired: false,
            }
            .boxed()
        })
    }

    /// Drives the flow, running `handler` to completion for every value.
    pub async fn collect<F, Fut>(&self, cx: &TaskContext, mut handler: F) -> Outcome<()>
    where
        F: FnMut(T) -> Fut,
        Fut: Future<Output = ()>,
    {
        let mut stream = self.open();
        loop {
            match next_item(cx, &mut stream).await? {
                Some(Ok(value)) => handler(value).await,
                Some(Err(error)) => return Err(error),
                None => return Ok(()),
            }
        }
    }

    /// Like [`collect`](Flow::collect), but a newly arrived value cancels
    /// the in-progress handler and restarts it with the new value.
    pub async fn collect_latest<F, Fut>(&self, cx: &TaskContext, mut handler: F) -> Outcome<()>
    where
        F: FnMut(T) -> Fut,
        Fut: Future<Output = ()>,
    {
        let mut stream = self.open();
        let mut in_flight: Option<Pin<Box<Fut>>> = None;
        let mut source_done = false;
        let mut result: Outcome<()> = Ok(());
        poll_fn(|pcx| {
            if cx.is_cancelled() {
                return Poll::Ready(Err(TaskError::Cancelled));
            }
            cx.token().register(pcx.waker());
            while !source_done {
                match stream.poll_next_unpin(pcx) {
                    // Dropping the previous handler future is the
                    // cancellation.
                    Poll::Ready(Some(Ok(value))) => in_flight = Some(Box::pin(handler(value))),
                    Poll::Ready(Some(Err(error))) => {
                        source_done = true;
                        in_flight = None;
                        result = Err(error);
                    }
                    Poll::Ready(None) => source_done = true,
                    Poll::Pending => break,
                }
            }
            if let Some(fut) = in_flight.as_mut() {
                match fut.as_mut().poll(pcx) {
                    Poll::Ready(()) => in_flight = None,
                    Poll::Pending => return Poll::Pending,
                }
            }
            if source_done {
                Poll::Ready(result.clone())
            } else {
                Poll::Pending
            }
        })
        .await
    }

    /// Collects every value into a vector.
    pub async fn to_vec(&self, cx: &TaskContext) -> Outcome<Vec<T>> {
        let mut stream = self.open();
        let mut values = Vec::new();
        loop {
            match next_item(cx, &mut stream).await? {
                Some(Ok(value)) => values.push(value),
                Some(Err(error)) => return Err(error),
                None => return Ok(values),
            }
        }
    }

    /// Evaluates just far enough to produce the first value.
    pub async fn first(&self, cx: &TaskContext) -> Outcome<Option<T>> {
        let mut stream = self.open();
        match next_item(cx, &mut stream).await? {
            Some(Ok(value)) => Ok(Some(value)),
            Some(Err(error)) => Err(error),
            None => Ok(None),
        }
    }

    /// Counts the values the flow produces.
    pub async fn count(&self, cx: &TaskContext) -> Outcome<usize> {
        let mut stream = self.open();
        let mut n = 0;
        loop {
            match next_item(cx, &mut stream).await? {
                Some(Ok(_)) => n += 1,
                Some(Err(error)) => return Err(error),
                None => return Ok(n),
            }
        }
    }
}

/// One step of a terminal operator: the next stream event, or
/// `Err(Cancelled)` if the caller's cancellation arrives first.
async fn next_item<T>(
    cx: &TaskContext,
    stream: &mut FlowStream<T>,
) -> Outcome<Option<Outcome<T>>> {
    let mut interrupted = pin!(cx.cancelled());
    poll_fn(|pcx| {
        if interrupted.as_mut().poll(pcx).is_ready() {
            return Poll::Ready(Err(TaskError::Cancelled));
        }
        stream.poll_next_unpin(pcx).map(Ok)
    })
    .await
}

fn receiver_stream<T: Send + 'static>(
    rx: Receiver<Outcome<T>>,
) -> impl Stream<Item = Outcome<T>> + Send {
    stream::unfold((rx, TaskContext::detached()), |(rx, cx)| async move {
        match rx.recv(&cx).await {
            Ok(item) => Some((item, (rx, cx))),
            Err(_) => None,
        }
    })
}

struct FlattenLatest<U> {
    outer: BoxStream<'static, Outcome<Flow<U>>>,
    inner: Option<FlowStream<U>>,
    outer_done: bool,
}

impl<U> Unpin for FlattenLatest<U> {}

impl<U: Send + 'static> Stream for FlattenLatest<U> {
    type Item = Outcome<U>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        // Drain the outer stream first; only the newest inner flow runs.
        while !this.outer_done {
            match this.outer.poll_next_unpin(cx) {
                Poll::Ready(Some(Ok(next))) => this.inner = Some(next.open()),
                Poll::Ready(Some(Err(error))) => {
                    this.outer_done = true;
                    this.inner = None;
                    return Poll::Ready(Some(Err(error)));
                }
                Poll::Ready(None) => this.outer_done = true,
                Poll::Pending => break,
            }
        }
        if let Some(inner) = this.inner.as_mut() {
            match inner.poll_next_unpin(cx) {
                Poll::Ready(Some(item)) => return Poll::Ready(Some(item)),
                Poll::Ready(None) => this.inner = None,
                Poll::Pending => return Poll::Pending,
            }
        }
        if this.outer_done && this.inner.is_none() {
            Poll::Ready(None)
        } else {
            Poll::Pending
        }
    }
}

struct CatchStream<T> {
    inner: FlowStream<T>,
    fallback: Arc<dyn Fn(TaskError) -> Flow<T> + Send + Sync>,
    switched: bool,
}

impl<T> Unpin for CatchStream<T> {}

impl<T: Send + 'static> Stream for CatchStream<T> {
    type Item = Outcome<T>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        loop {
            match this.inner.poll_next_unpin(cx) {
                Poll::Ready(Some(Err(error))) if !this.switched => {
                    this.switched = true;
                    this.inner = (this.fallback)(error).open();
                }
                other => return other,
            }
        }
    }
}

struct OnCompletionStream<T> {
    inner: FlowStream<T>,
    observer: Arc<dyn Fn(Option<&TaskError>) + Send + Sync>,
    fired: bool,
}

impl<T> Unpin for OnCompletionStream<T> {}

impl<T: Send + 'static> Stream for OnCompletionStream<T> {
    type Item = Outcome<T>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        match this.inner.poll_next_unpin(cx) {
            Poll::Ready(Some(Err(error))) => {
                if !this.fired {
                    this.fired = true;
                    (this.observer)(Some(&error));
                }
                Poll::Ready(Some(Err(error)))
            }
            Poll::Ready(None) => {
                if !this.fired {
                    this.fired = true;
                    (this.observer)(None);
                }
                Poll::Ready(None)
            }
            other => other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::executor::block_on;

    #[test]
    fn construction_does_no_work() {
        let touched = Arc::new(std::sync::atomic::AtomicBool::new(false));
        let touched2 = Arc::clone(&touched);
        let _flow = flow(move |emitter| {
            touched2.store(true, std::sync::atomic::Ordering::SeqCst);
            async move {
                emitter.emit(1).await;
                Ok(())
            }
        });
        assert!(
            !touched.load(std::sync::atomic::Ordering::SeqCst),
            "generator must not run before collection"
        );
    }

    #[test]
    fn each_collection_restarts_the_generator() {
        let cx = TaskContext::detached();
        let runs = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let runs2 = Arc::clone(&runs);
        let numbers = flow(move |emitter| {
            runs2.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            async move {
                for i in 1..=3 {
                    emitter.emit(i).await;
                }
                Ok(())
            }
        });
        assert_eq!(block_on(numbers.to_vec(&cx)), Ok(vec![1, 2, 3]));
        assert_eq!(block_on(numbers.to_vec(&cx)), Ok(vec![1, 2, 3]));
        assert_eq!(runs.load(std::sync::atomic::Ordering::SeqCst), 2);
    }

    #[test]
    fn operators_compose_lazily() {
        let cx = TaskContext::detached();
        let flow = flow_of((1..=10).collect::<Vec<i32>>())
            .filter(|n| n % 2 == 0)
            .map(|n| n * n)
            .take(3);
        let out = flow.to_vec(&cx);
        assert_eq!(block_on(out), Ok(vec![4, 16, 36]));
    }

    #[test]
    fn skip_discards_leading_values() {
        let cx = TaskContext::detached();
        let flow = flow_of(vec![1, 2, 3, 4]).skip(2);
        let out = flow.to_vec(&cx);
        assert_eq!(block_on(out), Ok(vec![3, 4]));
    }

    #[test]
    fn first_stops_the_generator_early() {
        let cx = TaskContext::detached();
        let emitted = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let emitted2 = Arc::clone(&emitted);
        let numbers = flow(move |emitter| {
            let emitted = Arc::clone(&emitted2);
            async move {
                for i in 1..=100 {
                    emitter.emit(i).await;
                    emitted.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                }
                Ok(())
            }
        });
        assert_eq!(block_on(numbers.first(&cx)), Ok(Some(1)));
        assert!(
            emitted.load(std::sync::atomic::Ordering::SeqCst) < 100,
            "first must not drain the whole sequence"
        );
    }

    #[test]
    fn count_and_from_iter_agree() {
        let cx = TaskContext::detached();
        let numbers = Flow::from_iter(1..=25);
        assert_eq!(block_on(numbers.count(&cx)), Ok(25));
    }

    #[test]
    fn catch_switches_to_the_fallback() {
        let cx = TaskContext::detached();
        let source = flow(|emitter| async move {
            emitter.emit(1).await;
            crate::error::fail("generator broke")
        });
        let flow = source.catch(|_| flow_of(vec![99]));
        let out = flow.to_vec(&cx);
        assert_eq!(block_on(out), Ok(vec![1, 99]));
    }

    #[test]
    fn on_completion_sees_the_cause() {
        let cx = TaskContext::detached();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen2 = Arc::clone(&seen);
        let flow = flow_of(vec![1, 2]).on_completion(move |cause| {
            seen2.lock().unwrap().push(cause.is_none());
        });
        let out = flow.to_vec(&cx);
        assert_eq!(block_on(out), Ok(vec![1, 2]));
        assert_eq!(*seen.lock().unwrap(), vec![true]);
    }
}
