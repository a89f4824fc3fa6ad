//! One pass of a message through the registered hooks.

use hermod_common::{MessageContext, delivery};

use crate::{
    error::ThrowError,
    hook::HookId,
    registry::{HookEntry, HookRegistry},
};

/// How many throws may be nested on one chain.
pub const MAX_THROWING_NUM: usize = 16;

/// A context borrowed from the free pool. It must be handed back through
/// [`ContextHost::put_context`], [`ContextHost::enqueue_context`] or
/// [`Chain::throw`].
#[derive(Debug)]
pub struct Throwable {
    slot: usize,
    context: Box<MessageContext>,
}

impl Throwable {
    #[must_use]
    pub const fn new(slot: usize, context: Box<MessageContext>) -> Self {
        Self { slot, context }
    }

    #[must_use]
    pub const fn slot(&self) -> usize {
        self.slot
    }

    #[must_use]
    pub fn context(&self) -> &MessageContext {
        &self.context
    }

    pub fn context_mut(&mut self) -> &mut MessageContext {
        &mut self.context
    }

    #[must_use]
    pub fn into_parts(self) -> (usize, Box<MessageContext>) {
        (self.slot, self.context)
    }
}

/// Owner of the pool of free contexts and of the queue of contexts waiting
/// to be dispatched by a worker.
pub trait ContextHost: Send + Sync {
    /// A free context with its bound type set to self-originated, or `None`
    /// if the pool is exhausted.
    fn get_context(&self) -> Option<Throwable>;

    /// Reset the context and return it to the pool.
    fn put_context(&self, context: Throwable);

    /// Queue the context for dispatch by the next idle worker.
    fn enqueue_context(&self, context: Throwable);
}

/// Which hooks are active on a chain, tracked like a call stack so a hook
/// that throws a message is skipped while that message is dispatched.
#[derive(Debug)]
pub struct CallStack {
    last_hook: Option<HookId>,
    last_thrower: Option<HookId>,
    throwing: Vec<Option<HookId>>,
    capacity: usize,
}

impl Default for CallStack {
    fn default() -> Self {
        Self::with_capacity(MAX_THROWING_NUM)
    }
}

impl CallStack {
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            last_hook: None,
            last_thrower: None,
            throwing: Vec::with_capacity(capacity),
            capacity,
        }
    }

    /// Forget the previous message. The throwing list is already empty
    /// between messages.
    pub const fn reset(&mut self) {
        self.last_hook = None;
        self.last_thrower = None;
    }

    #[must_use]
    pub const fn last_hook(&self) -> Option<HookId> {
        self.last_hook
    }

    #[must_use]
    pub const fn last_thrower(&self) -> Option<HookId> {
        self.last_thrower
    }

    #[must_use]
    pub fn depth(&self) -> usize {
        self.throwing.len()
    }
}

pub struct Chain<'a> {
    registry: &'a HookRegistry,
    contexts: &'a dyn ContextHost,
    stack: &'a mut CallStack,
}

impl<'a> Chain<'a> {
    pub fn new(
        registry: &'a HookRegistry,
        contexts: &'a dyn ContextHost,
        stack: &'a mut CallStack,
    ) -> Self {
        Self {
            registry,
            contexts,
            stack,
        }
    }

    #[must_use]
    pub const fn stack(&self) -> &CallStack {
        &*self.stack
    }

    #[must_use]
    pub const fn contexts(&self) -> &'a dyn ContextHost {
        self.contexts
    }

    pub fn get_context(&self) -> Option<Throwable> {
        self.contexts.get_context()
    }

    pub fn put_context(&self, context: Throwable) {
        self.contexts.put_context(context);
    }

    pub fn enqueue_context(&self, context: Throwable) {
        self.contexts.enqueue_context(context);
    }

    fn try_hook(&mut self, entry: &HookEntry, context: &mut MessageContext) -> bool {
        if self.stack.last_thrower == Some(entry.id()) {
            return false;
        }
        let Some(_in_flight) = entry.enter() else {
            return false;
        };
        self.stack.last_hook = Some(entry.id());
        entry.hook().deliver(context, self)
    }

    /// Offer `context` to each hook in registration order, then to the local
    /// and the remote delivery hook, stopping at the first that handles it.
    ///
    /// The hook currently throwing on this chain is skipped.
    pub fn dispatch(&mut self, context: &mut MessageContext) -> bool {
        let snapshot = self.registry.snapshot();

        for entry in &snapshot.hooks {
            if self.try_hook(entry, context) {
                return true;
            }
        }

        let terminals = &snapshot.terminals;
        for entry in terminals.local.iter().chain(terminals.remote.iter()) {
            if self.try_hook(entry, context) {
                return true;
            }
        }

        false
    }

    /// Dispatch a pool context from inside a hook, on behalf of that hook.
    ///
    /// The context is returned to the pool whatever the outcome.
    ///
    /// # Errors
    ///
    /// [`ThrowError::Loop`] if the current hook is already throwing further
    /// up this chain, [`ThrowError::Depth`] if no more throws can be nested.
    pub fn throw(&mut self, mut throwable: Throwable) -> Result<bool, ThrowError> {
        let hook = self.stack.last_hook;

        if self.stack.throwing.contains(&hook) {
            delivery!(level = WARN, "{}: message loop detected", throwable.context());
            self.contexts.put_context(throwable);
            return Err(ThrowError::Loop);
        }
        if self.stack.throwing.len() >= self.stack.capacity {
            delivery!(
                level = WARN,
                "{}: exceeded the maximum depth a thread can throw",
                throwable.context()
            );
            self.contexts.put_context(throwable);
            return Err(ThrowError::Depth);
        }

        let (last_hook, last_thrower) = (self.stack.last_hook, self.stack.last_thrower);
        self.stack.last_thrower = hook;
        self.stack.throwing.push(hook);

        let handled = self.dispatch(throwable.context_mut());
        if !handled {
            delivery!(
                level = INFO,
                "{}: message cannot be processed by any registered hook",
                throwable.context()
            );
        }

        self.stack.throwing.pop();
        self.contexts.put_context(throwable);
        self.stack.last_hook = last_hook;
        self.stack.last_thrower = last_thrower;

        Ok(handled)
    }
}
