use std::{fmt, ptr};

use hermod_common::MessageContext;

use crate::chain::Chain;

/// Identity of a registered hook: the address of the hook object, or of the
/// function for native hooks. Two registrations with the same id are the same
/// hook.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct HookId(usize);

impl HookId {
    #[must_use]
    pub const fn from_addr(addr: usize) -> Self {
        Self(addr)
    }

    #[must_use]
    pub const fn addr(self) -> usize {
        self.0
    }
}

impl fmt::Debug for HookId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "HookId({:#x})", self.0)
    }
}

/// A message processing step.
///
/// `deliver` returns `true` once the message has been handled, which stops the
/// chain. Returning `false` passes the message on to the next hook and finally
/// to the local and remote delivery hooks.
pub trait Hook: Send + Sync {
    fn deliver(&self, context: &mut MessageContext, chain: &mut Chain<'_>) -> bool;

    fn id(&self) -> HookId {
        HookId(ptr::from_ref(self).cast::<()>().addr())
    }
}

impl<F> Hook for F
where
    F: Fn(&mut MessageContext, &mut Chain<'_>) -> bool + Send + Sync,
{
    fn deliver(&self, context: &mut MessageContext, chain: &mut Chain<'_>) -> bool {
        self(context, chain)
    }
}
