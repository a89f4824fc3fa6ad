use std::sync::Arc;

use anyhow::Context;
use hermod_common::{Signal, internal, logging, traits::DeferredStore};
use hermod_ffi::NoServices;
use hermod_spool::{RetryConfig, RetryStore, SubnetVerifier};
use hermod_tracing::traced;
use hermod_transport::{NoSource, TransportConfig, TransportRuntime};
use serde::Deserialize;
use tokio::sync::broadcast::{self, error::RecvError};

/// The whole process as configured: the transport and the retry store
/// behind it.
///
/// ```ron
/// Hermod (
///     transport: (
///         plugins: ["local_delivery.so", "remote_delivery.so"],
///         identity: (host_id: "mx1.example.com", default_domain: "example.com"),
///     ),
///     retry: (path: "/var/lib/hermod/cache", bounce_policy: Verify),
/// )
/// ```
#[derive(Debug, Default, Deserialize)]
pub struct Hermod {
    #[serde(default)]
    transport: TransportConfig,
    #[serde(default)]
    retry: RetryConfig,
}

#[traced(instrument(level = tracing::Level::TRACE, skip_all, err))]
async fn shutdown(sender: broadcast::Sender<Signal>) -> anyhow::Result<()> {
    let mut terminate = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            internal!(level = INFO, "CTRL+C entered, shutting down");
        }
        _ = terminate.recv() => {
            internal!(level = INFO, "Terminate signal received, shutting down");
        }
    };

    sender
        .send(Signal::Shutdown)
        .map_err(|err| anyhow::anyhow!("Nothing is waiting for shutdown: {err}"))?;

    Ok(())
}

impl Hermod {
    /// Validate the configuration without starting anything.
    ///
    /// # Errors
    ///
    /// The first section that does not validate.
    pub fn check(&self) -> anyhow::Result<()> {
        self.transport
            .validate()
            .context("Invalid transport section")?;
        self.retry.validate().context("Invalid retry section")?;
        Ok(())
    }

    /// Bounces are sent from `postmaster@` this domain.
    fn postmaster_domain(&self) -> &str {
        let identity = &self.transport.identity;
        if identity.default_domain.is_empty() {
            &identity.host_id
        } else {
            &identity.default_domain
        }
    }

    /// Run until SIGINT or SIGTERM.
    ///
    /// # Errors
    ///
    /// If startup fails; see [`run_until`](Self::run_until).
    pub async fn run(self) -> anyhow::Result<()> {
        logging::init();

        let (sender, receiver) = broadcast::channel(4);
        tokio::spawn(async move {
            if let Err(err) = shutdown(sender).await {
                internal!(level = ERROR, "Unable to listen for signals: {err}");
            }
        });

        self.run_until(receiver).await
    }

    /// Start the transport and the retry store, and stop both once
    /// [`Signal::Shutdown`] arrives or every sender is gone.
    ///
    /// # Errors
    ///
    /// An invalid configuration, an unusable retry directory, a plugin that
    /// fails to load or a missing delivery hook.
    #[traced(instrument(level = tracing::Level::TRACE, skip_all, err), timing(precision = "s"))]
    pub async fn run_until(self, mut signals: broadcast::Receiver<Signal>) -> anyhow::Result<()> {
        self.check()?;

        // Startup joins threads when it fails, so it stays off the async workers.
        let postmaster = self.postmaster_domain().to_owned();
        let running = tokio::task::spawn_blocking(move || {
            Running::start(self.transport, &self.retry, &postmaster)
        })
        .await??;

        internal!(level = INFO, "Controller running");

        loop {
            match signals.recv().await {
                Ok(Signal::Shutdown) | Err(RecvError::Closed) => break,
                Err(RecvError::Lagged(missed)) => {
                    internal!(level = DEBUG, "Missed {missed} signals");
                }
            }
        }

        internal!(level = INFO, "Shutting down...");
        tokio::task::spawn_blocking(move || running.stop()).await?;

        Ok(())
    }
}

/// The transport and the retry store feeding back into it.
struct Running {
    store: Arc<RetryStore>,
    runtime: TransportRuntime,
}

impl Running {
    /// Blocks while plugins load and threads spawn. Whatever was started
    /// before a failure is stopped as it drops.
    fn start(
        transport: TransportConfig,
        retry: &RetryConfig,
        postmaster: &str,
    ) -> anyhow::Result<Self> {
        let store = Arc::new(RetryStore::new(retry, postmaster)?);
        let runtime = TransportRuntime::new(
            transport,
            Arc::new(NoSource),
            Arc::new(NoServices),
            Some(Arc::clone(&store) as Arc<dyn DeferredStore>),
        )?;

        runtime.start()?;
        let verifier = SubnetVerifier::new().context("Unable to set up the DNS resolver")?;
        store.run(Arc::new(runtime.redelivery()), Arc::new(verifier))?;

        Ok(Self { store, runtime })
    }

    fn stop(self) {
        self.store.stop();
        self.runtime.stop();
    }
}
