use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    thread::{self, JoinHandle},
};

use hermod_common::{MessageContext, internal, traits::DeferredStore};
use hermod_ffi::{CallStack, ContextHost, PluginManager, ServiceDirectory};
use hermod_spool::RetryTransport;
use hermod_tracing::traced;
use parking_lot::Mutex;

use crate::{
    config::TransportConfig,
    error::TransportError,
    pool::ContextPool,
    source::MessageSource,
    worker::Shared,
};

/// Everything the transport runs on: the plugins and their hooks, the
/// context pool and the workers.
pub struct TransportRuntime {
    config: TransportConfig,
    shared: Arc<Shared>,
    scanner: Mutex<Option<JoinHandle<()>>>,
    started: AtomicBool,
}

impl TransportRuntime {
    /// # Errors
    ///
    /// [`TransportError::Config`] if the configuration does not validate.
    pub fn new(
        config: TransportConfig,
        source: Arc<dyn MessageSource>,
        directory: Arc<dyn ServiceDirectory>,
        deferred: Option<Arc<dyn DeferredStore>>,
    ) -> Result<Self, TransportError> {
        config.validate()?;

        let plugins = PluginManager::new(
            config.identity.clone(),
            config.capacity(),
            config.plugin_dir.clone(),
            directory,
        );
        let pool = Arc::new(ContextPool::new(config.free_contexts));
        plugins.services().attach_contexts(Arc::clone(&pool) as Arc<dyn ContextHost>);
        plugins.services().set_domainlist_valid(config.domainlist_valid);

        let shared = Arc::new(Shared::new(
            plugins,
            pool,
            source,
            deferred,
            config.threads_min,
            config.threads_max,
            config.scan_interval(),
        ));

        Ok(Self {
            config,
            shared,
            scanner: Mutex::new(None),
            started: AtomicBool::new(false),
        })
    }

    /// Load the configured plugins, then start the workers and the scanner.
    ///
    /// Plugins added with [`PluginManager::add`] beforehand stay loaded.
    ///
    /// # Errors
    ///
    /// A plugin failing to load, no plugin providing the local or remote
    /// delivery hook, or a thread failing to spawn. The runtime should be
    /// stopped afterwards.
    #[traced(instrument(level = tracing::Level::TRACE, skip_all, err), timing(precision = "ms"))]
    pub fn start(&self) -> Result<(), TransportError> {
        if self.started.swap(true, Ordering::AcqRel) {
            return Err(TransportError::AlreadyRunning);
        }

        for plugin in &self.config.plugins {
            self.shared.plugins.load(plugin)?;
        }
        self.shared.plugins.check_terminals()?;

        for _ in 0..self.config.threads_min {
            self.shared.grow()?;
        }
        self.shared.gate.raise();

        let shared = Arc::clone(&self.shared);
        let scanner = thread::Builder::new()
            .name("hermod/scanner".into())
            .spawn(move || shared.scan())
            .map_err(|source| TransportError::Spawn {
                name: "hermod/scanner".into(),
                source,
            })?;
        *self.scanner.lock() = Some(scanner);

        internal!(
            level = INFO,
            "Transport started with {} workers",
            self.shared.created()
        );
        Ok(())
    }

    /// Stop the scanner and the workers, wait for them to finish, then free
    /// the plugins. A hook that never returns keeps this waiting.
    #[traced(instrument(level = tracing::Level::TRACE, skip_all), timing(precision = "ms"))]
    pub fn stop(&self) {
        if self.shared.set_stopping() {
            return;
        }

        self.shared.halt.raise();
        let scanner = self.scanner.lock().take();
        if scanner.is_some_and(|scanner| scanner.join().is_err()) {
            internal!(level = ERROR, "Scanner thread panicked");
        }

        self.shared.gate.raise();
        self.shared.pool.wake_all();
        for (slot, worker) in self.shared.take_active() {
            if worker.join().is_err() {
                internal!(level = ERROR, "Worker {slot} panicked");
            }
        }

        self.shared.plugins.stop();
        internal!(level = INFO, "Transport stopped");
    }

    #[must_use]
    pub fn threads_min(&self) -> usize {
        self.shared.threads_min()
    }

    #[must_use]
    pub fn threads_max(&self) -> usize {
        self.shared.threads_max()
    }

    /// Workers currently alive.
    #[must_use]
    pub fn threads_created(&self) -> usize {
        self.shared.created()
    }

    #[must_use]
    pub fn plugins(&self) -> &PluginManager {
        &self.shared.plugins
    }

    #[must_use]
    pub fn contexts(&self) -> &Arc<ContextPool> {
        &self.shared.pool
    }

    /// Wake one idle worker, for a queue that just received a message.
    pub fn wakeup_one(&self) {
        self.shared.pool.wake_one();
    }

    /// The dispatch path, for the retry store.
    #[must_use]
    pub fn redelivery(&self) -> Redelivery {
        Redelivery {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl Drop for TransportRuntime {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Hands deferred messages back to the hooks of a running transport.
pub struct Redelivery {
    shared: Arc<Shared>,
}

impl RetryTransport for Redelivery {
    fn redeliver(&self, context: &mut MessageContext) -> bool {
        self.shared.dispatch(&mut CallStack::default(), context)
    }

    fn inject(&self, context: MessageContext) -> bool {
        let Some(mut throwable) = self.shared.pool.get() else {
            internal!(level = WARN, "No free context to queue {context}");
            return false;
        };

        *throwable.context_mut() = context;
        self.shared.pool.enqueue(throwable);
        true
    }
}
