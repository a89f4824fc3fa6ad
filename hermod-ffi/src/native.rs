//! The C ABI of shared-library plugins.
//!
//! A plugin exports [`ENTRY_SYMBOL`] with the [`EntryFn`] signature. On
//! [`PluginSignal::Init`] it receives a [`HostApi`] and resolves everything
//! else through `query_service`; the other signals pass a null table.
//!
//! Built-in services take the `host` pointer of the [`HostApi`] as their first
//! argument, except `throw_context`, which takes the chain pointer handed to
//! the hook that is throwing. Contexts cross the boundary as opaque
//! `*mut Throwable` handles; [`crate::context`] exposes their contents.

use std::{
    ffi::{CStr, CString, c_void},
    ptr,
    sync::Arc,
};

use hermod_common::{MessageContext, plugin};
use libc::{c_char, c_int};
use libloading::Library;

use crate::{
    chain::{Chain, Throwable},
    hook::{Hook, HookId},
    plugin::{Plugin, PluginHost, PluginSignal, Talk},
    registry::Terminal,
    services::{SERVICE_VERSION, ServiceAddr, Services},
};

pub const ENTRY_SYMBOL: &[u8] = b"HOOK_LibMain\0";

/// Size of the buffer a native console handler writes its reply into.
const TALK_BUFFER: usize = 4096;

pub type EntryFn = unsafe extern "C" fn(PluginSignal, *const HostApi) -> bool;
pub type HookFn = unsafe extern "C" fn(*mut MessageContext, *mut c_void) -> bool;
pub type TalkFn = unsafe extern "C" fn(c_int, *const *const c_char, *mut c_char, c_int);
pub type QueryFn = unsafe extern "C" fn(*const c_void, *const c_char) -> *const c_void;

#[repr(C)]
pub struct HostApi {
    pub version: c_int,
    pub host: *const c_void,
    pub query_service: QueryFn,
}

/// Strip interior NULs so the conversion cannot fail.
pub(crate) fn c_string(value: &str) -> CString {
    let bytes: Vec<u8> = value.bytes().filter(|&b| b != 0).collect();
    CString::new(bytes).unwrap_or_default()
}

pub struct NativePlugin {
    entry: EntryFn,
    _library: Option<Arc<Library>>,
}

impl NativePlugin {
    /// # Safety
    ///
    /// `entry` must follow the plugin ABI and stay callable for as long as
    /// `library` (if any) is loaded.
    #[must_use]
    pub const unsafe fn new(entry: EntryFn, library: Option<Arc<Library>>) -> Self {
        Self {
            entry,
            _library: library,
        }
    }
}

impl Plugin for NativePlugin {
    fn init(&self, host: &mut PluginHost<'_>) -> bool {
        let services = host.services();
        let api = HostApi {
            version: SERVICE_VERSION,
            host: Arc::as_ptr(&services).cast(),
            query_service: hermod_query_service,
        };
        unsafe { (self.entry)(PluginSignal::Init, &raw const api) }
    }

    fn notify(&self, signal: PluginSignal) {
        unsafe {
            (self.entry)(signal, ptr::null());
        }
    }
}

struct NativeHook {
    func: HookFn,
    _library: Option<Arc<Library>>,
}

impl Hook for NativeHook {
    fn deliver(&self, context: &mut MessageContext, chain: &mut Chain<'_>) -> bool {
        unsafe { (self.func)(ptr::from_mut(context), ptr::from_mut(chain).cast()) }
    }

    fn id(&self) -> HookId {
        HookId::from_addr(self.func as usize)
    }
}

struct NativeTalk {
    func: TalkFn,
    _library: Option<Arc<Library>>,
}

impl Talk for NativeTalk {
    fn talk(&self, args: &[&str]) -> String {
        let owned: Vec<CString> = args.iter().map(|arg| c_string(arg)).collect();
        let argv: Vec<*const c_char> = owned.iter().map(|arg| arg.as_ptr()).collect();
        let mut result = vec![0 as c_char; TALK_BUFFER];
        let argc = c_int::try_from(argv.len()).unwrap_or(c_int::MAX);
        let length = c_int::try_from(result.len()).unwrap_or(c_int::MAX);

        unsafe {
            (self.func)(argc, argv.as_ptr(), result.as_mut_ptr(), length);
        }

        // Guard against a handler that filled the buffer without a NUL.
        if let Some(last) = result.last_mut() {
            *last = 0;
        }
        unsafe { CStr::from_ptr(result.as_ptr()) }
            .to_string_lossy()
            .into_owned()
    }

    fn id(&self) -> usize {
        self.func as usize
    }
}

fn addr(ptr: *const ()) -> Option<ServiceAddr> {
    ServiceAddr::from_ptr(ptr.cast())
}

/// Address of a built-in service.
#[rustfmt::skip]
pub(crate) fn builtin(name: &str) -> Option<ServiceAddr> {
    let ptr = match name {
        "register_hook" => hermod_register_hook as *const (),
        "register_local" => hermod_register_local as *const (),
        "register_remote" => hermod_register_remote as *const (),
        "unregister_hook" => hermod_unregister_hook as *const (),
        "register_talk" => hermod_register_talk as *const (),
        "unregister_talk" => hermod_unregister_talk as *const (),
        "get_host_ID" => hermod_get_host_id as *const (),
        "get_default_domain" => hermod_get_default_domain as *const (),
        "get_admin_mailbox" => hermod_get_admin_mailbox as *const (),
        "get_plugin_name" => hermod_get_plugin_name as *const (),
        "get_config_path" => hermod_get_config_path as *const (),
        "get_data_path" => hermod_get_data_path as *const (),
        "get_queue_path" => hermod_get_queue_path as *const (),
        "get_threads_num" => hermod_get_threads_num as *const (),
        "get_context_num" => hermod_get_context_num as *const (),
        "get_context" => hermod_get_context as *const (),
        "put_context" => hermod_put_context as *const (),
        "enqueue_context" => hermod_enqueue_context as *const (),
        "throw_context" => hermod_throw_context as *const (),
        "is_domainlist_valid" => hermod_is_domainlist_valid as *const (),
        _ => return None,
    };
    addr(ptr)
}

/// # Safety
///
/// `host` must be the pointer from a live [`HostApi`].
unsafe fn services<'a>(host: *const c_void) -> Option<&'a Services> {
    unsafe { host.cast::<Services>().as_ref() }
}

fn count(n: usize) -> c_int {
    c_int::try_from(n).unwrap_or(c_int::MAX)
}

/// # Safety
///
/// `host` must come from the [`HostApi`] and `name` be NUL-terminated.
pub unsafe extern "C" fn hermod_query_service(
    host: *const c_void,
    name: *const c_char,
) -> *const c_void {
    if name.is_null() {
        return ptr::null();
    }
    let Some(services) = (unsafe { services(host) }) else {
        return ptr::null();
    };
    let Ok(name) = unsafe { CStr::from_ptr(name) }.to_str() else {
        return ptr::null();
    };

    services
        .query(name)
        .map_or(ptr::null(), ServiceAddr::as_ptr)
}

unsafe fn register(host: *const c_void, func: Option<HookFn>, role: Option<Terminal>) -> bool {
    let (Some(services), Some(func)) = (unsafe { services(host) }, func) else {
        return false;
    };
    let hook: Arc<dyn Hook> = Arc::new(NativeHook {
        func,
        _library: services.loading_library(),
    });

    let result = match role {
        None => services.register_hook(hook),
        Some(which) => services.register_terminal(which, hook),
    };
    result
        .inspect_err(|err| plugin!(level = WARN, "Native registration refused: {err}"))
        .is_ok()
}

/// # Safety
///
/// `host` must come from the [`HostApi`].
pub unsafe extern "C" fn hermod_register_hook(host: *const c_void, func: Option<HookFn>) -> bool {
    unsafe { register(host, func, None) }
}

/// # Safety
///
/// `host` must come from the [`HostApi`].
pub unsafe extern "C" fn hermod_register_local(host: *const c_void, func: Option<HookFn>) -> bool {
    unsafe { register(host, func, Some(Terminal::Local)) }
}

/// # Safety
///
/// `host` must come from the [`HostApi`].
pub unsafe extern "C" fn hermod_register_remote(
    host: *const c_void,
    func: Option<HookFn>,
) -> bool {
    unsafe { register(host, func, Some(Terminal::Remote)) }
}

/// # Safety
///
/// `host` must come from the [`HostApi`].
pub unsafe extern "C" fn hermod_unregister_hook(
    host: *const c_void,
    func: Option<HookFn>,
) -> bool {
    match (unsafe { services(host) }, func) {
        (Some(services), Some(func)) => {
            services.unregister_hook(HookId::from_addr(func as usize))
        }
        _ => false,
    }
}

/// # Safety
///
/// `host` must come from the [`HostApi`].
pub unsafe extern "C" fn hermod_register_talk(host: *const c_void, func: Option<TalkFn>) -> bool {
    let (Some(services), Some(func)) = (unsafe { services(host) }, func) else {
        return false;
    };
    services
        .register_talk(Arc::new(NativeTalk {
            func,
            _library: services.loading_library(),
        }))
        .is_ok()
}

/// # Safety
///
/// `host` must come from the [`HostApi`].
pub unsafe extern "C" fn hermod_unregister_talk(
    host: *const c_void,
    func: Option<TalkFn>,
) -> bool {
    match (unsafe { services(host) }, func) {
        (Some(services), Some(func)) => services.unregister_talk(func as usize),
        _ => false,
    }
}

macro_rules! string_service {
    ($name:ident, $getter:ident) => {
        /// # Safety
        ///
        /// `host` must come from the [`HostApi`]. The string lives as long
        /// as the host.
        pub unsafe extern "C" fn $name(host: *const c_void) -> *const c_char {
            unsafe { services(host) }.map_or(ptr::null(), Services::$getter)
        }
    };
}

string_service!(hermod_get_host_id, c_host_id);
string_service!(hermod_get_default_domain, c_default_domain);
string_service!(hermod_get_admin_mailbox, c_admin_mailbox);
string_service!(hermod_get_config_path, c_config_path);
string_service!(hermod_get_data_path, c_data_path);
string_service!(hermod_get_queue_path, c_queue_path);

/// Name of the plugin being initialised; null at any other time.
///
/// # Safety
///
/// `host` must come from the [`HostApi`].
pub unsafe extern "C" fn hermod_get_plugin_name(host: *const c_void) -> *const c_char {
    unsafe { services(host) }.map_or(ptr::null(), Services::c_plugin_name)
}

/// # Safety
///
/// `host` must come from the [`HostApi`].
pub unsafe extern "C" fn hermod_get_threads_num(host: *const c_void) -> c_int {
    unsafe { services(host) }.map_or(0, |services| count(services.threads_num()))
}

/// # Safety
///
/// `host` must come from the [`HostApi`].
pub unsafe extern "C" fn hermod_get_context_num(host: *const c_void) -> c_int {
    unsafe { services(host) }.map_or(0, |services| count(services.context_num()))
}

/// # Safety
///
/// `host` must come from the [`HostApi`].
pub unsafe extern "C" fn hermod_is_domainlist_valid(host: *const c_void) -> bool {
    unsafe { services(host) }.is_some_and(Services::is_domainlist_valid)
}

/// A free context, or null if none is available.
///
/// # Safety
///
/// `host` must come from the [`HostApi`].
pub unsafe extern "C" fn hermod_get_context(host: *const c_void) -> *mut Throwable {
    unsafe { services(host) }
        .and_then(Services::contexts)
        .and_then(|contexts| contexts.get_context())
        .map_or(ptr::null_mut(), |throwable| Box::into_raw(Box::new(throwable)))
}

/// # Safety
///
/// `context` must be a handle from `get_context` that has not been handed
/// back yet; it is consumed.
unsafe fn take(context: *mut Throwable) -> Option<Throwable> {
    (!context.is_null()).then(|| *unsafe { Box::from_raw(context) })
}

/// # Safety
///
/// `host` must come from the [`HostApi`]; `context` must be a handle from
/// `get_context` that has not been handed back yet.
pub unsafe extern "C" fn hermod_put_context(host: *const c_void, context: *mut Throwable) {
    let Some(throwable) = (unsafe { take(context) }) else {
        return;
    };
    match unsafe { services(host) }.and_then(Services::contexts) {
        Some(contexts) => contexts.put_context(throwable),
        None => plugin!(level = ERROR, "put_context: no context pool is attached"),
    }
}

/// # Safety
///
/// As for [`hermod_put_context`].
pub unsafe extern "C" fn hermod_enqueue_context(host: *const c_void, context: *mut Throwable) {
    let Some(throwable) = (unsafe { take(context) }) else {
        return;
    };
    match unsafe { services(host) }.and_then(Services::contexts) {
        Some(contexts) => contexts.enqueue_context(throwable),
        None => plugin!(level = ERROR, "enqueue_context: no context pool is attached"),
    }
}

/// Dispatch `context` on behalf of the calling hook. The context is consumed
/// whatever the outcome.
///
/// # Safety
///
/// `chain` must be the pointer the calling hook received; `context` must be
/// a handle from `get_context` that has not been handed back yet.
pub unsafe extern "C" fn hermod_throw_context(chain: *mut c_void, context: *mut Throwable) -> bool {
    let Some(throwable) = (unsafe { take(context) }) else {
        return false;
    };
    let Some(chain) = (unsafe { chain.cast::<Chain<'_>>().as_mut() }) else {
        plugin!(level = ERROR, "throw_context called outside of a hook");
        drop(throwable);
        return false;
    };
    chain.throw(throwable).unwrap_or(false)
}

#[cfg(test)]
mod tests {
    #![allow(clippy::expect_used, clippy::unwrap_used)]

    use std::sync::atomic::{AtomicBool, Ordering};

    use pretty_assertions::assert_eq;

    use super::*;
    use crate::{
        chain::{CallStack, ContextHost},
        services::{Capacity, Identity, NoServices},
    };

    fn services() -> Arc<Services> {
        Arc::new(Services::new(
            Identity {
                host_id: "mx1".into(),
                default_domain: "example.com".into(),
                ..Identity::default()
            },
            Capacity {
                threads_max: 4,
                free_contexts: 10,
            },
            Arc::new(NoServices),
        ))
    }

    unsafe extern "C" fn accept(context: *mut MessageContext, _chain: *mut c_void) -> bool {
        unsafe { (*context).control.is_spam = true };
        true
    }

    unsafe extern "C" fn echo(argc: c_int, argv: *const *const c_char, out: *mut c_char, len: c_int) {
        let args = unsafe { std::slice::from_raw_parts(argv, argc as usize) };
        let reply = unsafe { CStr::from_ptr(args[argc as usize - 1]) }.to_bytes();
        let n = reply.len().min(len as usize - 1);
        unsafe {
            ptr::copy_nonoverlapping(reply.as_ptr().cast(), out, n);
            *out.add(n) = 0;
        }
    }

    fn host(services: &Arc<Services>) -> *const c_void {
        Arc::as_ptr(services).cast()
    }

    #[test]
    fn builtins_resolve_only_while_loading() {
        let services = services();
        let name = c"get_host_ID";

        assert!(unsafe { hermod_query_service(host(&services), name.as_ptr()) }.is_null());

        services.begin_load(Arc::from("native.so"), None);
        let found = unsafe { hermod_query_service(host(&services), name.as_ptr()) };
        assert_eq!(found, hermod_get_host_id as *const c_void);
        assert!(
            unsafe { hermod_query_service(host(&services), c"no_such_service".as_ptr()) }
                .is_null()
        );
        services.end_load();
    }

    #[test]
    fn string_and_count_services() {
        let services = services();
        let host = host(&services);

        unsafe {
            assert_eq!(CStr::from_ptr(hermod_get_host_id(host)), c"mx1");
            assert_eq!(CStr::from_ptr(hermod_get_default_domain(host)), c"example.com");
            assert_eq!(CStr::from_ptr(hermod_get_config_path(host)), c"../config");
            assert_eq!(CStr::from_ptr(hermod_get_data_path(host)), c"../data");
            assert!(hermod_get_queue_path(host).is_null());
            assert!(hermod_get_plugin_name(host).is_null());
            assert_eq!(hermod_get_threads_num(host), 4);
            assert_eq!(hermod_get_context_num(host), 14);
            assert!(!hermod_is_domainlist_valid(host));
        }

        services.set_domainlist_valid(true);
        assert!(unsafe { hermod_is_domainlist_valid(host) });
    }

    #[test]
    fn native_hooks_register_and_deliver() {
        let services = services();
        let host = host(&services);

        assert!(!unsafe { hermod_register_hook(host, Some(accept)) });

        services.begin_load(Arc::from("native.so"), None);
        assert_eq!(
            unsafe { CStr::from_ptr(hermod_get_plugin_name(host)) },
            c"native.so"
        );
        assert!(unsafe { hermod_register_hook(host, Some(accept)) });
        assert!(!unsafe { hermod_register_hook(host, Some(accept)) });
        assert!(!unsafe { hermod_register_hook(host, None) });
        services.end_load();

        struct NoPool;
        impl ContextHost for NoPool {
            fn get_context(&self) -> Option<Throwable> {
                None
            }
            fn put_context(&self, _context: Throwable) {}
            fn enqueue_context(&self, _context: Throwable) {}
        }

        let mut stack = CallStack::default();
        let mut context = MessageContext::default();
        assert!(Chain::new(services.registry(), &NoPool, &mut stack).dispatch(&mut context));
        assert!(context.control.is_spam);
        assert_eq!(
            stack.last_hook(),
            Some(HookId::from_addr(accept as usize))
        );

        assert!(unsafe { hermod_unregister_hook(host, Some(accept)) });
        assert!(services.registry().is_empty());
    }

    #[test]
    fn native_talk_round_trip() {
        let services = services();
        let host = host(&services);

        services.begin_load(Arc::from("native.so"), None);
        assert!(unsafe { hermod_register_talk(host, Some(echo)) });
        services.end_load();

        let talk = services.talk("native.so").unwrap();
        assert_eq!(talk.talk(&["native.so", "status"]), "status");

        assert!(unsafe { hermod_unregister_talk(host, Some(echo)) });
        assert!(services.talk("native.so").is_none());
    }

    static FREED: AtomicBool = AtomicBool::new(false);

    unsafe extern "C" fn lib_main(signal: PluginSignal, api: *const HostApi) -> bool {
        match signal {
            PluginSignal::Init => unsafe {
                let api = &*api;
                assert_eq!(api.version, SERVICE_VERSION);
                let register = (api.query_service)(api.host, c"register_local".as_ptr());
                let register: unsafe extern "C" fn(*const c_void, Option<HookFn>) -> bool =
                    std::mem::transmute(register);
                register(api.host, Some(accept))
            },
            PluginSignal::Free => {
                FREED.store(true, Ordering::SeqCst);
                true
            }
            _ => true,
        }
    }

    #[test]
    fn native_plugin_init_and_free() {
        let services = services();
        let plugin = unsafe { NativePlugin::new(lib_main, None) };

        services.begin_load(Arc::from("local.so"), None);
        assert!(plugin.init(&mut PluginHost::new(&services)));
        services.end_load();

        assert_eq!(
            services.registry().terminal_owner(Terminal::Local).as_deref(),
            Some("local.so")
        );

        plugin.notify(PluginSignal::Free);
        assert!(FREED.load(Ordering::SeqCst));
    }

    #[test]
    fn c_strings_drop_interior_nuls() {
        assert_eq!(c_string("a\0b").as_bytes(), b"ab");
        assert_eq!(c_string("").as_bytes(), b"");
    }
}
