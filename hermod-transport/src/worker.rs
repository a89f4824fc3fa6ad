//! The worker threads and the scanner growing their number under backlog.

use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
    thread::{self, JoinHandle},
    time::Duration,
};

use hermod_common::{MessageContext, delivery, internal, traits::DeferredStore};
use hermod_ffi::{CallStack, Chain, PluginManager, PluginSignal, Throwable};
use parking_lot::{Condvar, Mutex};

use crate::{
    error::TransportError,
    pool::ContextPool,
    source::{MessageSource, QueuedMessage},
};

/// Default for how long an idle worker waits for work, and how often the
/// scanner looks at the backlog.
pub const SCAN_INTERVAL: Duration = Duration::from_secs(1);

/// Consecutive empty polls after which a worker above the minimum retires.
pub const MAX_TIMES_NOT_SERVED: u32 = 5;

/// A flag threads can sleep on until it is raised.
#[derive(Default)]
pub(crate) struct Latch {
    raised: Mutex<bool>,
    signal: Condvar,
}

impl Latch {
    pub(crate) fn wait(&self) {
        let mut raised = self.raised.lock();
        while !*raised {
            self.signal.wait(&mut raised);
        }
    }

    /// Sleep up to `timeout`, returning `true` if the latch is raised.
    pub(crate) fn wait_for(&self, timeout: Duration) -> bool {
        let mut raised = self.raised.lock();
        if !*raised {
            self.signal.wait_for(&mut raised, timeout);
        }
        *raised
    }

    pub(crate) fn raise(&self) {
        *self.raised.lock() = true;
        self.signal.notify_all();
    }
}

/// What a worker owns while it runs: the context queued messages are loaded
/// into and the call stack of its chain.
pub(crate) struct ThreadData {
    slot: usize,
    context: MessageContext,
    stack: CallStack,
}

impl ThreadData {
    fn new(slot: usize) -> Self {
        Self {
            slot,
            context: MessageContext::default(),
            stack: CallStack::default(),
        }
    }
}

/// State the workers, the scanner and the runtime share.
pub(crate) struct Shared {
    pub(crate) plugins: PluginManager,
    pub(crate) pool: Arc<ContextPool>,
    source: Arc<dyn MessageSource>,
    deferred: Option<Arc<dyn DeferredStore>>,
    threads_min: usize,
    threads_max: usize,
    interval: Duration,
    created: AtomicUsize,
    stopping: AtomicBool,
    /// Raised once startup completes.
    pub(crate) gate: Latch,
    /// Raised to stop the scanner.
    pub(crate) halt: Latch,
    /// Locked before `free` whenever both are needed.
    active: Mutex<Vec<(usize, JoinHandle<()>)>>,
    free: Mutex<Vec<ThreadData>>,
}

impl Shared {
    pub(crate) fn new(
        plugins: PluginManager,
        pool: Arc<ContextPool>,
        source: Arc<dyn MessageSource>,
        deferred: Option<Arc<dyn DeferredStore>>,
        threads_min: usize,
        threads_max: usize,
        interval: Duration,
    ) -> Self {
        Self {
            plugins,
            pool,
            source,
            deferred,
            threads_min,
            threads_max,
            interval,
            created: AtomicUsize::new(0),
            stopping: AtomicBool::new(false),
            gate: Latch::default(),
            halt: Latch::default(),
            active: Mutex::default(),
            free: Mutex::new((0..threads_max).rev().map(ThreadData::new).collect()),
        }
    }

    pub(crate) const fn threads_min(&self) -> usize {
        self.threads_min
    }

    pub(crate) const fn threads_max(&self) -> usize {
        self.threads_max
    }

    pub(crate) fn created(&self) -> usize {
        self.created.load(Ordering::Acquire)
    }

    pub(crate) fn is_stopping(&self) -> bool {
        self.stopping.load(Ordering::Acquire)
    }

    /// Returns `true` if the flag was already set.
    pub(crate) fn set_stopping(&self) -> bool {
        self.stopping.swap(true, Ordering::AcqRel)
    }

    /// Run `context` through the hooks on a fresh chain.
    pub(crate) fn dispatch(&self, stack: &mut CallStack, context: &mut MessageContext) -> bool {
        stack.reset();
        Chain::new(self.plugins.services().registry(), &*self.pool, stack).dispatch(context)
    }

    /// Start another worker if the pool is below its maximum.
    ///
    /// # Errors
    ///
    /// [`TransportError::Spawn`] if the thread could not be created.
    pub(crate) fn grow(self: &Arc<Self>) -> Result<bool, TransportError> {
        let mut active = self.active.lock();

        if self
            .created
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |created| {
                (created < self.threads_max).then_some(created + 1)
            })
            .is_err()
        {
            return Ok(false);
        }

        let Some(data) = self.free.lock().pop() else {
            self.created.fetch_sub(1, Ordering::AcqRel);
            return Ok(false);
        };

        let slot = data.slot;
        let shared = Arc::clone(self);
        match thread::Builder::new()
            .name(format!("hermod/worker-{slot}"))
            .spawn(move || shared.work(data))
        {
            Ok(handle) => {
                active.push((slot, handle));
                Ok(true)
            }
            Err(source) => {
                self.created.fetch_sub(1, Ordering::AcqRel);
                Err(TransportError::Spawn {
                    name: format!("hermod/worker-{slot}"),
                    source,
                })
            }
        }
    }

    /// The handles of every live worker, leaving the list empty.
    pub(crate) fn take_active(&self) -> Vec<(usize, JoinHandle<()>)> {
        std::mem::take(&mut *self.active.lock())
    }

    /// Claim permission to retire, which only succeeds above the minimum.
    fn may_retire(&self) -> bool {
        self.created
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |created| {
                (created > self.threads_min).then(|| created - 1)
            })
            .is_ok()
    }

    /// Give the slot back. The handle goes before the data does, so a
    /// `grow` reusing the slot never finds the old handle still listed.
    fn retire(&self, data: ThreadData) {
        let slot = data.slot;
        let mut active = self.active.lock();

        // Dropping our own handle detaches the thread.
        active.retain(|(owner, _)| *owner != slot);
        self.free.lock().push(data);
    }

    fn work(&self, mut data: ThreadData) {
        self.gate.wait();
        internal!(level = DEBUG, "Worker {} started", data.slot);
        self.plugins.notify_all(PluginSignal::ThreadCreate);

        let mut not_served = 0u32;
        while !self.is_stopping() {
            if let Some(message) = self.source.dequeue() {
                not_served = 0;
                self.deliver_queued(&mut data, message);
                continue;
            }

            if let Some(throwable) = self.pool.dequeue() {
                not_served = 0;
                self.deliver_pending(&mut data, throwable);
                continue;
            }

            not_served = not_served.saturating_add(1);
            if not_served > MAX_TIMES_NOT_SERVED && self.may_retire() {
                internal!(level = DEBUG, "Worker {} retiring", data.slot);
                self.plugins.notify_all(PluginSignal::ThreadDestroy);
                self.retire(data);
                return;
            }

            self.pool.wait(self.interval);
        }

        internal!(level = DEBUG, "Worker {} stopping", data.slot);
        self.plugins.notify_all(PluginSignal::ThreadDestroy);
    }

    fn deliver_queued(&self, data: &mut ThreadData, message: QueuedMessage) {
        if let Err(err) = message.fill(&mut data.context) {
            delivery!(level = ERROR, "{}: dropping unparseable message: {err}", data.context);
            self.source.release(message);
            return;
        }

        if !self.dispatch(&mut data.stack, &mut data.context) {
            delivery!(level = WARN, "{}: no hook delivered the message", data.context);
            self.keep(&message, &data.context);
        }

        self.source.release(message);
    }

    fn deliver_pending(&self, data: &mut ThreadData, mut throwable: Throwable) {
        if !self.dispatch(&mut data.stack, throwable.context_mut()) {
            delivery!(level = WARN, "{}: no hook delivered the message", throwable.context());
        }

        self.pool.put(throwable);
    }

    /// Persist a queued message no hook delivered, preferring the retry
    /// store over the queue's own storage.
    fn keep(&self, message: &QueuedMessage, context: &MessageContext) {
        if let Some(store) = &self.deferred {
            match store.defer(context, message.arrival) {
                Ok(id) => {
                    delivery!(level = INFO, "{context}: saved as retry record {id}");
                    return;
                }
                Err(err) => {
                    delivery!(level = ERROR, "{context}: unable to save for retry: {err}");
                }
            }
        }

        if !self.source.save(message, context) {
            delivery!(level = ERROR, "{context}: message could not be kept and is lost");
        }
    }

    /// Grow the pool once per interval while the queue holds messages.
    pub(crate) fn scan(self: &Arc<Self>) {
        while !self.halt.wait_for(self.interval) {
            if !self.source.holding() {
                continue;
            }

            match self.grow() {
                Ok(true) => internal!(level = DEBUG, "Backlog present, worker added"),
                Ok(false) => {}
                Err(err) => internal!(level = WARN, "{err}"),
            }
        }
    }
}
