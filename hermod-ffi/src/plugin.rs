use std::{ptr, sync::Arc};

use crate::{
    chain::ContextHost,
    error::RegisterError,
    hook::{Hook, HookId},
    registry::Terminal,
    services::{Identity, ServiceAddr, Services},
};

/// Lifecycle notifications delivered to a plugin.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PluginSignal {
    Init = 0,
    Free = 1,
    ThreadCreate = 2,
    ThreadDestroy = 3,
}

/// A unit of hooks loaded and unloaded together.
pub trait Plugin: Send + Sync {
    /// Register hooks and resolve services. Returning `false` aborts the load
    /// and tears down whatever was registered.
    fn init(&self, host: &mut PluginHost<'_>) -> bool;

    /// [`PluginSignal::Free`] before unloading, and the thread signals as
    /// workers come and go.
    fn notify(&self, _signal: PluginSignal) {}
}

/// Console command handler of a plugin.
pub trait Talk: Send + Sync {
    fn talk(&self, args: &[&str]) -> String;

    fn id(&self) -> usize {
        ptr::from_ref(self).cast::<()>().addr()
    }
}

impl<F> Talk for F
where
    F: Fn(&[&str]) -> String + Send + Sync,
{
    fn talk(&self, args: &[&str]) -> String {
        self(args)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TalkOutcome {
    TalkOk(String),
    NoTalk,
    NoFile,
}

/// What a plugin can reach while it initialises.
pub struct PluginHost<'a> {
    services: &'a Arc<Services>,
}

impl<'a> PluginHost<'a> {
    pub(crate) const fn new(services: &'a Arc<Services>) -> Self {
        Self { services }
    }

    /// A handle the plugin may keep for use from its hooks.
    #[must_use]
    pub fn services(&self) -> Arc<Services> {
        Arc::clone(self.services)
    }

    /// # Errors
    ///
    /// See [`Services::register_hook`].
    pub fn register_hook(&mut self, hook: Arc<dyn Hook>) -> Result<HookId, RegisterError> {
        self.services.register_hook(hook)
    }

    /// # Errors
    ///
    /// See [`Services::register_terminal`].
    pub fn register_local(&mut self, hook: Arc<dyn Hook>) -> Result<HookId, RegisterError> {
        self.services.register_terminal(Terminal::Local, hook)
    }

    /// # Errors
    ///
    /// See [`Services::register_terminal`].
    pub fn register_remote(&mut self, hook: Arc<dyn Hook>) -> Result<HookId, RegisterError> {
        self.services.register_terminal(Terminal::Remote, hook)
    }

    pub fn unregister_hook(&mut self, id: HookId) -> bool {
        self.services.unregister_hook(id)
    }

    /// # Errors
    ///
    /// See [`Services::register_talk`].
    pub fn register_talk(&mut self, talk: Arc<dyn Talk>) -> Result<(), RegisterError> {
        self.services.register_talk(talk)
    }

    pub fn query_service(&mut self, name: &str) -> Option<ServiceAddr> {
        self.services.query(name)
    }

    #[must_use]
    pub fn plugin_name(&self) -> Option<Arc<str>> {
        self.services.plugin_name()
    }

    #[must_use]
    pub fn identity(&self) -> &Identity {
        self.services.identity()
    }

    #[must_use]
    pub fn contexts(&self) -> Option<Arc<dyn ContextHost>> {
        self.services.contexts()
    }
}
