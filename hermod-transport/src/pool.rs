use std::{collections::VecDeque, ptr, time::Duration};

use hermod_common::{BoundType, MessageContext, internal};
use hermod_ffi::{ContextHost, Throwable};
use parking_lot::{Condvar, Mutex};

struct Slots {
    free: Vec<(usize, Box<MessageContext>)>,
    /// Address of the context handed out from each slot.
    outstanding: Vec<Option<usize>>,
}

fn addr(context: &MessageContext) -> usize {
    ptr::from_ref(context).addr()
}

/// Pre-allocated contexts for messages plugins create, and the queue of
/// such messages waiting for a worker.
pub struct ContextPool {
    slots: Mutex<Slots>,
    pending: Mutex<VecDeque<Throwable>>,
    wake: Condvar,
}

impl ContextPool {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            slots: Mutex::new(Slots {
                free: (0..capacity)
                    .rev()
                    .map(|slot| (slot, Box::default()))
                    .collect(),
                outstanding: vec![None; capacity],
            }),
            pending: Mutex::default(),
            wake: Condvar::new(),
        }
    }

    /// A free context, marked as created by an application.
    pub fn get(&self) -> Option<Throwable> {
        let mut slots = self.slots.lock();
        let (slot, mut context) = slots.free.pop()?;
        slots.outstanding[slot] = Some(addr(&context));
        drop(slots);

        context.control.bound_type = BoundType::SelfOriginated;
        Some(Throwable::new(slot, context))
    }

    /// Reset a context and make it available again. Contexts this pool did
    /// not hand out, or already took back, are refused.
    pub fn put(&self, throwable: Throwable) {
        let (slot, mut context) = throwable.into_parts();

        let mut slots = self.slots.lock();
        if slots.outstanding.get(slot).copied().flatten() != Some(addr(&context)) {
            drop(slots);
            internal!(level = WARN, "Refusing context {slot} that was not handed out");
            return;
        }

        context.clear();
        slots.outstanding[slot] = None;
        slots.free.push((slot, context));
    }

    /// Queue a context for dispatch and wake one worker.
    pub fn enqueue(&self, throwable: Throwable) {
        self.pending.lock().push_back(throwable);
        self.wake.notify_one();
    }

    pub fn dequeue(&self) -> Option<Throwable> {
        self.pending.lock().pop_front()
    }

    /// Block until something is enqueued, a wake-up is broadcast or
    /// `timeout` passes.
    pub fn wait(&self, timeout: Duration) {
        let mut pending = self.pending.lock();
        if pending.is_empty() {
            self.wake.wait_for(&mut pending, timeout);
        }
    }

    pub fn wake_one(&self) {
        self.wake.notify_one();
    }

    pub fn wake_all(&self) {
        self.wake.notify_all();
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.slots.lock().outstanding.len()
    }

    /// Contexts currently available from [`get`](Self::get).
    #[must_use]
    pub fn available(&self) -> usize {
        self.slots.lock().free.len()
    }

    /// Contexts waiting for a worker.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.pending.lock().len()
    }
}

impl ContextHost for ContextPool {
    fn get_context(&self) -> Option<Throwable> {
        self.get()
    }

    fn put_context(&self, context: Throwable) {
        self.put(context);
    }

    fn enqueue_context(&self, context: Throwable) {
        self.enqueue(context);
    }
}
