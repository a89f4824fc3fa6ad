//! The service namespace plugins resolve host functionality from.

use std::{
    ffi::{CString, c_void},
    path::{Path, PathBuf},
    ptr::NonNull,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
};

use hermod_common::plugin;
use libloading::Library;
use parking_lot::{Mutex, RwLock};
use serde::Deserialize;

use crate::{
    chain::ContextHost,
    error::RegisterError,
    hook::{Hook, HookId},
    native,
    plugin::Talk,
    registry::{HookRegistry, Terminal},
};

/// Version reported to native plugins on init.
pub const SERVICE_VERSION: i32 = 1;

mod defaults {
    use std::path::PathBuf;

    pub(super) fn config_path() -> PathBuf {
        PathBuf::from("../config")
    }

    pub(super) fn data_path() -> PathBuf {
        PathBuf::from("../data")
    }
}

/// Host details handed out to plugins.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Identity {
    #[serde(default)]
    pub host_id: String,
    #[serde(default)]
    pub default_domain: String,
    #[serde(default)]
    pub admin_mailbox: String,
    #[serde(default = "defaults::config_path")]
    pub config_path: PathBuf,
    #[serde(default = "defaults::data_path")]
    pub data_path: PathBuf,
    #[serde(default)]
    pub queue_path: Option<PathBuf>,
}

impl Default for Identity {
    fn default() -> Self {
        Self {
            host_id: String::new(),
            default_domain: String::new(),
            admin_mailbox: String::new(),
            config_path: defaults::config_path(),
            data_path: defaults::data_path(),
            queue_path: None,
        }
    }
}

/// [`Identity`] as NUL-terminated strings for native plugins.
struct CIdentity {
    host_id: CString,
    default_domain: CString,
    admin_mailbox: CString,
    config_path: CString,
    data_path: CString,
    queue_path: Option<CString>,
}

impl CIdentity {
    fn new(identity: &Identity) -> Self {
        let path = |p: &Path| native::c_string(&p.to_string_lossy());
        Self {
            host_id: native::c_string(&identity.host_id),
            default_domain: native::c_string(&identity.default_domain),
            admin_mailbox: native::c_string(&identity.admin_mailbox),
            config_path: path(identity.config_path.as_path()),
            data_path: path(identity.data_path.as_path()),
            queue_path: identity.queue_path.as_deref().map(path),
        }
    }
}

/// Pool sizes reported through `get_threads_num` and `get_context_num`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Capacity {
    pub threads_max: usize,
    pub free_contexts: usize,
}

/// Address of a service function.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ServiceAddr(NonNull<c_void>);

// SAFETY: the address of a function is valid on any thread.
unsafe impl Send for ServiceAddr {}
unsafe impl Sync for ServiceAddr {}

impl ServiceAddr {
    #[must_use]
    pub fn from_ptr(ptr: *const c_void) -> Option<Self> {
        NonNull::new(ptr.cast_mut()).map(Self)
    }

    #[must_use]
    pub const fn as_ptr(self) -> *const c_void {
        self.0.as_ptr().cast_const()
    }
}

/// Services provided outside the transport, shared between plugins and
/// reference counted per plugin.
pub trait ServiceDirectory: Send + Sync {
    fn query(&self, name: &str, plugin: &str) -> Option<ServiceAddr>;

    fn release(&self, name: &str, plugin: &str);
}

/// A directory that provides nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoServices;

impl ServiceDirectory for NoServices {
    fn query(&self, _name: &str, _plugin: &str) -> Option<ServiceAddr> {
        None
    }

    fn release(&self, _name: &str, _plugin: &str) {}
}

/// A directory service acquired by a plugin.
#[derive(Debug, Clone)]
pub(crate) struct ServiceRef {
    pub(crate) name: String,
    addr: ServiceAddr,
}

/// The plugin currently running its init.
pub(crate) struct LoadContext {
    pub(crate) name: Arc<str>,
    c_name: CString,
    pub(crate) library: Option<Arc<Library>>,
    pub(crate) references: Vec<ServiceRef>,
}

pub struct Services {
    registry: Arc<HookRegistry>,
    identity: Identity,
    c_identity: CIdentity,
    capacity: Capacity,
    domainlist_valid: AtomicBool,
    directory: Arc<dyn ServiceDirectory>,
    contexts: RwLock<Option<Arc<dyn ContextHost>>>,
    loading: Mutex<Option<LoadContext>>,
    talks: Mutex<Vec<(Arc<str>, Arc<dyn Talk>)>>,
}

impl Services {
    #[must_use]
    pub fn new(
        identity: Identity,
        capacity: Capacity,
        directory: Arc<dyn ServiceDirectory>,
    ) -> Self {
        Self {
            registry: Arc::new(HookRegistry::new()),
            c_identity: CIdentity::new(&identity),
            identity,
            capacity,
            domainlist_valid: AtomicBool::new(false),
            directory,
            contexts: RwLock::new(None),
            loading: Mutex::new(None),
            talks: Mutex::default(),
        }
    }

    #[must_use]
    pub const fn registry(&self) -> &Arc<HookRegistry> {
        &self.registry
    }

    #[must_use]
    pub const fn identity(&self) -> &Identity {
        &self.identity
    }

    #[must_use]
    pub const fn capacity(&self) -> Capacity {
        self.capacity
    }

    /// Make the context pool reachable through `get_context`,
    /// `put_context` and `enqueue_context`.
    pub fn attach_contexts(&self, contexts: Arc<dyn ContextHost>) {
        *self.contexts.write() = Some(contexts);
    }

    #[must_use]
    pub fn contexts(&self) -> Option<Arc<dyn ContextHost>> {
        self.contexts.read().clone()
    }

    #[must_use]
    pub fn threads_num(&self) -> usize {
        self.capacity.threads_max
    }

    #[must_use]
    pub fn context_num(&self) -> usize {
        self.capacity.threads_max + self.capacity.free_contexts
    }

    #[must_use]
    pub fn is_domainlist_valid(&self) -> bool {
        self.domainlist_valid.load(Ordering::Relaxed)
    }

    pub fn set_domainlist_valid(&self, valid: bool) {
        self.domainlist_valid.store(valid, Ordering::Relaxed);
    }

    pub(crate) fn begin_load(&self, name: Arc<str>, library: Option<Arc<Library>>) {
        *self.loading.lock() = Some(LoadContext {
            c_name: native::c_string(&name),
            name,
            library,
            references: Vec::new(),
        });
    }

    pub(crate) fn end_load(&self) -> Option<LoadContext> {
        self.loading.lock().take()
    }

    fn with_load<T>(&self, f: impl FnOnce(&mut LoadContext) -> T) -> Option<T> {
        self.loading.lock().as_mut().map(f)
    }

    /// Name of the plugin currently initialising.
    #[must_use]
    pub fn plugin_name(&self) -> Option<Arc<str>> {
        self.with_load(|load| Arc::clone(&load.name))
    }

    pub(crate) fn loading_library(&self) -> Option<Arc<Library>> {
        self.with_load(|load| load.library.clone()).flatten()
    }

    /// Add a hook for the plugin currently initialising.
    ///
    /// # Errors
    ///
    /// [`RegisterError::NoLoadContext`] outside a plugin's init,
    /// [`RegisterError::Duplicate`] if the hook is already registered.
    pub fn register_hook(&self, hook: Arc<dyn Hook>) -> Result<HookId, RegisterError> {
        let owner = self.plugin_name().ok_or(RegisterError::NoLoadContext)?;
        self.registry.register(hook, &owner)
    }

    /// # Errors
    ///
    /// [`RegisterError::NoLoadContext`] outside a plugin's init,
    /// [`RegisterError::TerminalTaken`] if another hook fills the role.
    pub fn register_terminal(
        &self,
        which: Terminal,
        hook: Arc<dyn Hook>,
    ) -> Result<HookId, RegisterError> {
        let owner = self.plugin_name().ok_or(RegisterError::NoLoadContext)?;
        self.registry.register_terminal(which, hook, &owner)
    }

    pub fn unregister_hook(&self, id: HookId) -> bool {
        self.registry.unregister(id).is_some()
    }

    /// Install the console handler of the plugin currently initialising,
    /// replacing any it installed before.
    ///
    /// # Errors
    ///
    /// [`RegisterError::NoLoadContext`] outside a plugin's init.
    pub fn register_talk(&self, talk: Arc<dyn Talk>) -> Result<(), RegisterError> {
        let owner = self.plugin_name().ok_or(RegisterError::NoLoadContext)?;
        let mut talks = self.talks.lock();
        talks.retain(|(name, _)| *name != owner);
        talks.push((owner, talk));
        Ok(())
    }

    pub fn unregister_talk(&self, id: usize) -> bool {
        let mut talks = self.talks.lock();
        let before = talks.len();
        talks.retain(|(_, talk)| talk.id() != id);
        talks.len() != before
    }

    pub(crate) fn talk(&self, plugin: &str) -> Option<Arc<dyn Talk>> {
        self.talks
            .lock()
            .iter()
            .find(|(name, _)| **name == *plugin)
            .map(|(_, talk)| Arc::clone(talk))
    }

    pub(crate) fn drop_talk(&self, plugin: &str) {
        self.talks.lock().retain(|(name, _)| **name != *plugin);
    }

    /// Resolve a service by name on behalf of the plugin currently
    /// initialising: built-in services first, then what this plugin already
    /// acquired, then the external directory.
    pub fn query(&self, name: &str) -> Option<ServiceAddr> {
        let mut loading = self.loading.lock();
        let load = loading.as_mut()?;

        if let Some(addr) = native::builtin(name) {
            return Some(addr);
        }

        if let Some(acquired) = load.references.iter().find(|r| r.name == name) {
            return Some(acquired.addr);
        }

        let addr = self.directory.query(name, &load.name)?;
        plugin!("{} acquired service {name}", load.name);
        load.references.push(ServiceRef {
            name: name.to_owned(),
            addr,
        });
        Some(addr)
    }

    pub(crate) fn release(&self, plugin: &str, references: &[ServiceRef]) {
        for reference in references {
            self.directory.release(&reference.name, plugin);
        }
    }

    pub(crate) fn c_plugin_name(&self) -> *const libc::c_char {
        self.loading
            .lock()
            .as_ref()
            .map_or(std::ptr::null(), |load| load.c_name.as_ptr())
    }

    pub(crate) fn c_host_id(&self) -> *const libc::c_char {
        self.c_identity.host_id.as_ptr()
    }

    pub(crate) fn c_default_domain(&self) -> *const libc::c_char {
        self.c_identity.default_domain.as_ptr()
    }

    pub(crate) fn c_admin_mailbox(&self) -> *const libc::c_char {
        self.c_identity.admin_mailbox.as_ptr()
    }

    pub(crate) fn c_config_path(&self) -> *const libc::c_char {
        self.c_identity.config_path.as_ptr()
    }

    pub(crate) fn c_data_path(&self) -> *const libc::c_char {
        self.c_identity.data_path.as_ptr()
    }

    pub(crate) fn c_queue_path(&self) -> *const libc::c_char {
        self.c_identity
            .queue_path
            .as_ref()
            .map_or(std::ptr::null(), |path| path.as_ptr())
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::expect_used, clippy::unwrap_used)]

    use std::sync::atomic::AtomicUsize;

    use hermod_common::MessageContext;
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::chain::Chain;

    /// Hands out a fixed address and counts releases per name.
    #[derive(Default)]
    struct Directory {
        queries: AtomicUsize,
        released: Mutex<Vec<(String, String)>>,
    }

    static SERVICE: u8 = 0;

    impl ServiceDirectory for Directory {
        fn query(&self, name: &str, _plugin: &str) -> Option<ServiceAddr> {
            self.queries.fetch_add(1, Ordering::SeqCst);
            (name == "spam_filter")
                .then(|| ServiceAddr::from_ptr(std::ptr::from_ref(&SERVICE).cast()))
                .flatten()
        }

        fn release(&self, name: &str, plugin: &str) {
            self.released.lock().push((name.to_owned(), plugin.to_owned()));
        }
    }

    fn services(directory: Arc<dyn ServiceDirectory>) -> Services {
        Services::new(
            Identity::default(),
            Capacity {
                threads_max: 8,
                free_contexts: 24,
            },
            directory,
        )
    }

    #[test]
    fn identity_defaults() {
        let identity = Identity::default();
        assert_eq!(identity.config_path, PathBuf::from("../config"));
        assert_eq!(identity.data_path, PathBuf::from("../data"));
        assert_eq!(identity.queue_path, None);
    }

    #[test]
    fn counts() {
        let services = services(Arc::new(NoServices));
        assert_eq!(services.threads_num(), 8);
        assert_eq!(services.context_num(), 32);
    }

    #[test]
    fn registration_needs_a_load_context() {
        let services = services(Arc::new(NoServices));
        let hook: Arc<dyn Hook> = Arc::new(|_: &mut MessageContext, _: &mut Chain<'_>| true);

        assert_eq!(
            services.register_hook(Arc::clone(&hook)),
            Err(RegisterError::NoLoadContext)
        );
        assert!(services.query("register_hook").is_none());

        services.begin_load(Arc::from("a.so"), None);
        assert!(services.register_hook(Arc::clone(&hook)).is_ok());
        assert!(services.query("register_hook").is_some());
        assert!(services.end_load().is_some());

        assert!(services.unregister_hook(hook.id()));
        assert!(!services.unregister_hook(hook.id()));
    }

    #[test]
    fn directory_services_are_cached_per_plugin() {
        let directory = Arc::new(Directory::default());
        let services = services(Arc::clone(&directory) as Arc<dyn ServiceDirectory>);

        services.begin_load(Arc::from("a.so"), None);
        let first = services.query("spam_filter").unwrap();
        let second = services.query("spam_filter").unwrap();
        assert_eq!(first, second);
        assert!(services.query("unknown").is_none());
        let load = services.end_load().unwrap();

        assert_eq!(directory.queries.load(Ordering::SeqCst), 2);
        assert_eq!(load.references.len(), 1);

        services.release(&load.name, &load.references);
        assert_eq!(
            *directory.released.lock(),
            vec![("spam_filter".to_owned(), "a.so".to_owned())]
        );
    }

    #[test]
    fn talk_is_per_plugin() {
        let services = services(Arc::new(NoServices));
        let talk: Arc<dyn Talk> = Arc::new(|args: &[&str]| args.join(","));

        assert_eq!(
            services.register_talk(Arc::clone(&talk)),
            Err(RegisterError::NoLoadContext)
        );

        services.begin_load(Arc::from("a.so"), None);
        services.register_talk(Arc::clone(&talk)).unwrap();
        services.end_load();

        assert_eq!(services.talk("a.so").unwrap().talk(&["x", "y"]), "x,y");
        assert!(services.unregister_talk(talk.id()));
        assert!(services.talk("a.so").is_none());
    }
}
