//! Event bus: ordered, asynchronous message delivery.
//!
//! Producers (controllers, language runtimes, network listeners) post from
//! any thread; posting is a non-blocking enqueue. Delivery happens serially
//! on one dedicated thread that owns the scheduling loop:
//!
//! ```text
//!   post() ──► unbounded channel ──► schedule heap ──► ready FIFO ──► listeners
//!                                     (due, seq)       (held while paused)
//! ```
//!
//! Ordering: entries become ready in order of due time, FIFO by post
//! sequence for equal due times. Ready messages are delivered in the order
//! they became ready. While paused, timers keep running and ready messages
//! accumulate; `resume()` drains them before live delivery continues.

mod schedule;
mod speed;

pub use schedule::CancelHandle;

use parking_lot::{Mutex, RwLock};
use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::message::{Message, MessageKind};
use crate::recovery::with_recovery;
use crate::types::{BusConfig, Error, Result};
use schedule::{Repeat, ScheduleQueue, Scheduled};
use speed::SpeedMeter;

/// Receives messages delivered by the bus.
///
/// Called on the bus thread. Implementations must not block for long: slow
/// listeners delay every other delivery. Errors and panics are logged and do
/// not affect other listeners.
pub trait MessageListener: Send + Sync + fmt::Debug {
    fn on_message(&self, message: &Message) -> Result<()>;
}

struct Registration {
    listener: Arc<dyn MessageListener>,
    kinds: Option<Vec<MessageKind>>,
}

impl Registration {
    fn accepts(&self, kind: MessageKind) -> bool {
        self.kinds.as_ref().map_or(true, |kinds| kinds.contains(&kind))
    }
}

enum Request {
    Schedule(Scheduled),
    Resume,
}

struct Worker {
    shutdown: CancellationToken,
    thread: JoinHandle<mpsc::UnboundedReceiver<Request>>,
}

struct Shared {
    config: BusConfig,
    tx: mpsc::UnboundedSender<Request>,
    rx: Mutex<Option<mpsc::UnboundedReceiver<Request>>>,
    listeners: RwLock<Vec<Registration>>,
    paused: AtomicBool,
    pending: AtomicUsize,
    sequence: AtomicU64,
    speed: Mutex<SpeedMeter>,
    worker: Mutex<Option<Worker>>,
}

/// Cloneable handle to one event bus.
///
/// The dispatch thread holds a handle of its own; call [`EventBus::stop`]
/// to release it.
#[derive(Clone)]
pub struct EventBus {
    inner: Arc<Shared>,
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus")
            .field("running", &self.is_running())
            .field("paused", &self.is_paused())
            .field("pending", &self.get_pending())
            .field("listeners", &self.inner.listeners.read().len())
            .finish()
    }
}

impl EventBus {
    pub fn new(config: BusConfig) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let speed = SpeedMeter::new(config.speed_window);
        Self {
            inner: Arc::new(Shared {
                config,
                tx,
                rx: Mutex::new(Some(rx)),
                listeners: RwLock::new(Vec::new()),
                paused: AtomicBool::new(false),
                pending: AtomicUsize::new(0),
                sequence: AtomicU64::new(0),
                speed: Mutex::new(speed),
                worker: Mutex::new(None),
            }),
        }
    }

    // =========================================================================
    // Posting
    // =========================================================================

    /// Enqueue for delivery as soon as possible.
    pub fn post(&self, message: Message) -> Result<()> {
        self.enqueue(message, Duration::ZERO, None)
    }

    /// Enqueue for delivery no earlier than `now + delay`.
    pub fn post_delayed(&self, message: Message, delay: Duration) -> Result<()> {
        self.enqueue(message, delay, None)
    }

    /// Deliver first after `delay`, then every `interval` until cancelled.
    pub fn post_every(
        &self,
        message: Message,
        delay: Duration,
        interval: Duration,
    ) -> Result<CancelHandle> {
        if interval.is_zero() {
            return Err(Error::validation("periodic post needs a non-zero interval"));
        }
        let handle = CancelHandle::new();
        self.enqueue(
            message,
            delay,
            Some(Repeat {
                interval,
                handle: handle.clone(),
            }),
        )?;
        Ok(handle)
    }

    fn enqueue(&self, message: Message, delay: Duration, repeat: Option<Repeat>) -> Result<()> {
        let max = self.inner.config.max_pending;
        let queued = self.inner.pending.fetch_add(1, Ordering::SeqCst);
        if max > 0 && queued >= max {
            self.inner.pending.fetch_sub(1, Ordering::SeqCst);
            tracing::warn!(msg = %message, max_pending = max, "bus full, message rejected");
            return Err(Error::quota_exceeded(format!(
                "bus holds {} pending messages (max {})",
                queued, max
            )));
        }

        let entry = Scheduled {
            due: Instant::now() + delay,
            seq: self.inner.next_seq(),
            message: Arc::new(message),
            repeat,
        };

        self.inner.tx.send(Request::Schedule(entry)).map_err(|_| {
            self.inner.pending.fetch_sub(1, Ordering::SeqCst);
            Error::internal("bus channel closed")
        })
    }

    // =========================================================================
    // Pause / resume
    // =========================================================================

    /// Withhold delivery to listeners. Posts are still accepted and timers
    /// still run.
    pub fn pause(&self) {
        if !self.inner.paused.swap(true, Ordering::SeqCst) {
            tracing::debug!("bus paused");
        }
    }

    /// Deliver everything that became due while paused, then resume live
    /// delivery.
    pub fn resume(&self) {
        if self.inner.paused.swap(false, Ordering::SeqCst) {
            tracing::debug!("bus resumed");
            let _ = self.inner.tx.send(Request::Resume);
        }
    }

    pub fn is_paused(&self) -> bool {
        self.inner.paused.load(Ordering::SeqCst)
    }

    // =========================================================================
    // Listeners
    // =========================================================================

    /// Register a listener for every message.
    pub fn add(&self, listener: Arc<dyn MessageListener>) {
        self.register(listener, None);
    }

    /// Register a listener for messages of the given kinds only.
    pub fn add_filtered(&self, listener: Arc<dyn MessageListener>, kinds: &[MessageKind]) {
        self.register(listener, Some(kinds.to_vec()));
    }

    fn register(&self, listener: Arc<dyn MessageListener>, kinds: Option<Vec<MessageKind>>) {
        let mut listeners = self.inner.listeners.write();
        let ptr = thin_ptr(&listener);
        if let Some(existing) = listeners.iter_mut().find(|r| thin_ptr(&r.listener) == ptr) {
            existing.kinds = kinds;
        } else {
            listeners.push(Registration { listener, kinds });
        }
        tracing::debug!(listeners = listeners.len(), "listener registered");
    }

    /// Unregister a listener. Returns whether it was registered.
    pub fn remove<L: MessageListener + ?Sized>(&self, listener: &Arc<L>) -> bool {
        let ptr = thin_ptr(listener);
        let mut listeners = self.inner.listeners.write();
        let before = listeners.len();
        listeners.retain(|r| thin_ptr(&r.listener) != ptr);
        before != listeners.len()
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Spawn the dispatch thread.
    pub fn start(&self) -> Result<()> {
        let mut worker = self.inner.worker.lock();
        if worker.is_some() {
            return Err(Error::state_transition("bus already started"));
        }

        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .build()?;

        let rx = self
            .inner
            .rx
            .lock()
            .take()
            .ok_or_else(|| Error::internal("bus receiver unavailable"))?;
        let shutdown = CancellationToken::new();
        let shared = Arc::clone(&self.inner);
        let token = shutdown.clone();

        let thread = std::thread::Builder::new()
            .name(self.inner.config.thread_name.clone())
            .spawn(move || runtime.block_on(dispatch_loop(shared, rx, token)))?;

        *worker = Some(Worker { shutdown, thread });
        tracing::info!(thread = %self.inner.config.thread_name, "bus started");
        Ok(())
    }

    /// Stop the dispatch thread and drop every undelivered message.
    pub fn stop(&self) {
        let Some(worker) = self.inner.worker.lock().take() else {
            return;
        };
        worker.shutdown.cancel();

        if worker.thread.thread().id() == std::thread::current().id() {
            // Stopped from inside a listener: the loop exits after this
            // delivery, but the receiver cannot be reclaimed.
            tracing::warn!("bus stopped from its own thread; it cannot be restarted");
            return;
        }

        match worker.thread.join() {
            Ok(mut rx) => {
                while rx.try_recv().is_ok() {}
                *self.inner.rx.lock() = Some(rx);
            }
            Err(_) => tracing::error!("bus dispatch thread panicked"),
        }
        self.inner.pending.store(0, Ordering::SeqCst);
        tracing::info!("bus stopped");
    }

    pub fn is_running(&self) -> bool {
        self.inner.worker.lock().is_some()
    }

    // =========================================================================
    // Diagnostics
    // =========================================================================

    /// Messages delivered per minute over the trailing speed window.
    pub fn get_speed(&self) -> u64 {
        self.inner.speed.lock().per_minute(Instant::now())
    }

    pub fn reset_speed(&self) {
        self.inner.speed.lock().reset();
    }

    /// Messages currently queued, due or not yet due.
    pub fn get_pending(&self) -> usize {
        self.inner.pending.load(Ordering::SeqCst)
    }
}

fn thin_ptr<L: ?Sized>(listener: &Arc<L>) -> *const () {
    Arc::as_ptr(listener) as *const ()
}

impl Shared {
    fn next_seq(&self) -> u64 {
        self.sequence.fetch_add(1, Ordering::SeqCst)
    }

    /// Move a due entry into the ready FIFO, rescheduling periodic posts.
    fn fire(&self, entry: Scheduled, queue: &mut ScheduleQueue, ready: &mut VecDeque<Arc<Message>>) {
        let Scheduled {
            due,
            message,
            repeat,
            ..
        } = entry;

        let Some(repeat) = repeat else {
            ready.push_back(message);
            return;
        };

        if repeat.handle.is_cancelled() {
            self.pending.fetch_sub(1, Ordering::SeqCst);
            return;
        }

        // The firing copy is counted on its own; the schedule entry stays.
        self.pending.fetch_add(1, Ordering::SeqCst);
        ready.push_back(Arc::clone(&message));

        // Late firings are not caught up in a burst.
        let now = Instant::now();
        let mut next = due + repeat.interval;
        if next <= now {
            next = now + repeat.interval;
        }
        queue.push(Scheduled {
            due: next,
            seq: self.next_seq(),
            message,
            repeat: Some(repeat),
        });
    }

    /// Deliver ready messages in order until drained or paused.
    fn flush(&self, ready: &mut VecDeque<Arc<Message>>) {
        while !self.paused.load(Ordering::SeqCst) {
            let Some(message) = ready.pop_front() else {
                break;
            };
            self.deliver(&message);
            self.pending.fetch_sub(1, Ordering::SeqCst);
        }
    }

    fn deliver(&self, message: &Message) {
        let kind = message.kind();
        let targets: Vec<Arc<dyn MessageListener>> = self
            .listeners
            .read()
            .iter()
            .filter(|r| r.accepts(kind))
            .map(|r| Arc::clone(&r.listener))
            .collect();

        for listener in targets {
            if let Err(err) = with_recovery(|| listener.on_message(message), "bus.deliver") {
                tracing::error!(
                    msg = %message,
                    listener = ?listener,
                    error = %err,
                    "listener failed"
                );
            }
        }

        self.speed.lock().record(Instant::now());
    }
}

async fn dispatch_loop(
    shared: Arc<Shared>,
    mut rx: mpsc::UnboundedReceiver<Request>,
    shutdown: CancellationToken,
) -> mpsc::UnboundedReceiver<Request> {
    let mut queue = ScheduleQueue::default();
    let mut ready: VecDeque<Arc<Message>> = VecDeque::new();

    loop {
        let next_due = queue.next_due();
        let wait = async move {
            match next_due {
                Some(due) => tokio::time::sleep_until(due).await,
                None => std::future::pending::<()>().await,
            }
        };

        tokio::select! {
            biased;
            _ = shutdown.cancelled() => break,
            request = rx.recv() => match request {
                Some(Request::Schedule(entry)) => queue.push(entry),
                Some(Request::Resume) => {}
                None => break,
            },
            _ = wait => {}
        }

        let now = Instant::now();
        while let Some(entry) = queue.pop_due(now) {
            shared.fire(entry, &mut queue, &mut ready);
        }
        shared.flush(&mut ready);

        if shutdown.is_cancelled() {
            break;
        }
    }

    tracing::debug!(
        dropped = queue.len() + ready.len(),
        "bus loop exiting, dropping undelivered messages"
    );
    queue.clear();
    ready.clear();
    rx
}
