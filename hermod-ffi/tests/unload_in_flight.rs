#![allow(clippy::expect_used, clippy::unwrap_used)]

use std::{
    sync::{
        Arc, Barrier,
        atomic::{AtomicBool, Ordering},
    },
    thread,
};

use hermod_common::MessageContext;
use hermod_ffi::{
    CallStack, Capacity, Chain, ContextHost, Hook, Identity, NoServices, Plugin, PluginHost,
    PluginManager, Throwable,
};

struct NoPool;

impl ContextHost for NoPool {
    fn get_context(&self) -> Option<Throwable> {
        None
    }

    fn put_context(&self, _context: Throwable) {}

    fn enqueue_context(&self, _context: Throwable) {}
}

/// Holds its hook inside `deliver` until the test lets it go.
struct Blocker {
    entered: Arc<Barrier>,
    release: Arc<Barrier>,
    dropped: Arc<AtomicBool>,
}

impl Plugin for Blocker {
    fn init(&self, host: &mut PluginHost<'_>) -> bool {
        let (entered, release) = (Arc::clone(&self.entered), Arc::clone(&self.release));
        let hook: Arc<dyn Hook> = Arc::new(move |_: &mut MessageContext, _: &mut Chain<'_>| {
            entered.wait();
            release.wait();
            true
        });
        host.register_hook(hook).is_ok()
    }
}

impl Drop for Blocker {
    fn drop(&mut self) {
        self.dropped.store(true, Ordering::SeqCst);
    }
}

#[test]
fn plugin_outlives_its_executing_hook() {
    let manager = Arc::new(PluginManager::new(
        Identity::default(),
        Capacity {
            threads_max: 1,
            free_contexts: 0,
        },
        "/nonexistent",
        Arc::new(NoServices),
    ));

    let entered = Arc::new(Barrier::new(2));
    let release = Arc::new(Barrier::new(2));
    let dropped = Arc::new(AtomicBool::new(false));
    manager
        .add(
            "blocker.so",
            Arc::new(Blocker {
                entered: Arc::clone(&entered),
                release: Arc::clone(&release),
                dropped: Arc::clone(&dropped),
            }),
        )
        .unwrap();

    let worker = {
        let manager = Arc::clone(&manager);
        thread::spawn(move || {
            let mut stack = CallStack::default();
            let mut context = MessageContext::default();
            Chain::new(manager.services().registry(), &NoPool, &mut stack).dispatch(&mut context)
        })
    };

    entered.wait();
    manager.unload("blocker.so").unwrap();
    manager.clean_pending();

    assert_eq!(
        manager.enum_plugins(),
        vec!["blocker.so\t\t--unloading".to_owned()]
    );
    assert!(!dropped.load(Ordering::SeqCst));

    release.wait();
    assert!(worker.join().unwrap());

    manager.clean_pending();
    assert!(manager.enum_plugins().is_empty());
    assert!(dropped.load(Ordering::SeqCst));
}

#[test]
fn unloaded_hooks_are_not_entered() {
    let manager = PluginManager::new(
        Identity::default(),
        Capacity {
            threads_max: 1,
            free_contexts: 0,
        },
        "/nonexistent",
        Arc::new(NoServices),
    );

    let entered = Arc::new(Barrier::new(2));
    let release = Arc::new(Barrier::new(2));
    manager
        .add(
            "blocker.so",
            Arc::new(Blocker {
                entered,
                release,
                dropped: Arc::new(AtomicBool::new(false)),
            }),
        )
        .unwrap();
    manager.unload("blocker.so").unwrap();

    let mut stack = CallStack::default();
    let mut context = MessageContext::default();
    let handled =
        Chain::new(manager.services().registry(), &NoPool, &mut stack).dispatch(&mut context);
    assert!(!handled);
}
