use std::{
    fs::{self, File, OpenOptions},
    io::{Seek, SeekFrom, Write},
    path::{Path, PathBuf},
    sync::{
        Arc,
        atomic::{AtomicU32, AtomicU64, Ordering},
    },
    thread::{self, JoinHandle},
    time::{Duration, Instant, SystemTime},
};

use hermod_common::{
    BoundType, FailureKind, MessageContext, delivery, error::DeferError, internal,
    traits::DeferredStore,
};
use hermod_tracing::traced;
use parking_lot::{Condvar, Mutex};

use crate::{
    bounce::NoticeBounce,
    config::{BouncePolicy, RetryConfig},
    error::{Result, SpoolError},
    id::IdAllocator,
    record::{self, IN_PROGRESS, MARKER_LEN, RetryRecord},
    traits::{BounceProducer, IpDomainVerifier, RetryTransport},
};

/// What one directory pass did.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ScanReport {
    /// Completed records that were attempted.
    pub attempted: usize,
    pub delivered: usize,
    /// Left in place for the next pass.
    pub deferred: usize,
    /// Dropped after a permanent failure or too many attempts.
    pub failed: usize,
    /// Completed records that could not be decoded and were deleted.
    pub discarded: usize,
    pub bounced: usize,
}

/// How a delivery attempt ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    Delivered,
    Failed(FailureKind),
}

#[derive(Default)]
struct Stop {
    stopped: Mutex<bool>,
    signal: Condvar,
}

impl Stop {
    /// Sleep up to `timeout`, returning `true` if asked to stop.
    fn wait(&self, timeout: Duration) -> bool {
        let mut stopped = self.stopped.lock();
        if !*stopped && !timeout.is_zero() {
            self.signal.wait_for(&mut stopped, timeout);
        }
        *stopped
    }

    fn is_set(&self) -> bool {
        *self.stopped.lock()
    }

    fn set(&self, value: bool) {
        *self.stopped.lock() = value;
        self.signal.notify_all();
    }
}

struct Inner {
    path: PathBuf,
    ids: IdAllocator,
    scan_interval: AtomicU64,
    max_retries: AtomicU32,
    bounce_policy: BouncePolicy,
    postmaster: String,
    bouncer: Arc<dyn BounceProducer>,
    stop: Stop,
}

/// Durable store for messages awaiting another delivery attempt, one file
/// per message, rescanned periodically by a background thread.
pub struct RetryStore {
    inner: Arc<Inner>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl RetryStore {
    /// Open (creating if needed) the directory in `config`. Bounces are sent
    /// from `postmaster@<postmaster_domain>`.
    ///
    /// # Errors
    ///
    /// If the configuration is invalid, or the directory cannot be created or
    /// listed.
    pub fn new(config: &RetryConfig, postmaster_domain: &str) -> Result<Self> {
        config.validate()?;

        fs::create_dir_all(&config.path)?;
        if !config.path.is_dir() {
            return Err(SpoolError::Validation(format!(
                "{} is not a directory",
                config.path.display()
            )));
        }

        let ids = IdAllocator::recover(&config.path)?;
        internal!(
            level = INFO,
            "Retry store at {} (scan every {}s, {} attempts)",
            config.path.display(),
            config.scan_interval_secs,
            config.max_retries
        );

        Ok(Self {
            inner: Arc::new(Inner {
                path: config.path.clone(),
                ids,
                scan_interval: AtomicU64::new(config.scan_interval_secs),
                max_retries: AtomicU32::new(config.max_retries),
                bounce_policy: config.bounce_policy,
                postmaster: format!("postmaster@{postmaster_domain}"),
                bouncer: Arc::new(NoticeBounce::new(postmaster_domain)),
                stop: Stop::default(),
            }),
            worker: Mutex::new(None),
        })
    }

    /// Replace the bounce notice builder. Only possible before [`run`](Self::run).
    #[must_use]
    pub fn with_bouncer(mut self, bouncer: Arc<dyn BounceProducer>) -> Self {
        if let Some(inner) = Arc::get_mut(&mut self.inner) {
            inner.bouncer = bouncer;
        }
        self
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.inner.path
    }

    #[must_use]
    pub fn scan_interval(&self) -> Duration {
        Duration::from_secs(self.inner.scan_interval.load(Ordering::Relaxed))
    }

    /// Takes effect from the next wait of the background thread.
    pub fn set_scan_interval(&self, interval: Duration) {
        self.inner
            .scan_interval
            .store(interval.as_secs().max(1), Ordering::Relaxed);
    }

    #[must_use]
    pub fn max_retries(&self) -> u32 {
        self.inner.max_retries.load(Ordering::Relaxed)
    }

    pub fn set_max_retries(&self, retries: u32) {
        self.inner.max_retries.store(retries.max(1), Ordering::Relaxed);
    }

    /// Persist `context`, returning its record id.
    ///
    /// The completion marker is written as 0 and set to 1 only once the
    /// whole record is on disk; a failure at any step removes the file.
    ///
    /// # Errors
    ///
    /// [`SpoolError::Encoding`] if the envelope cannot be stored, or the I/O
    /// error that interrupted the write.
    #[traced(instrument(level = tracing::Level::TRACE, skip_all, ret), timing(precision = "us"))]
    pub fn put(&self, context: &MessageContext, arrival: SystemTime) -> Result<u32> {
        let body = record::encode_body(context, arrival)?;
        let id = self.inner.ids.next_id();
        let path = self.inner.path.join(id.to_string());

        if let Err(err) = write_record(&path, &body) {
            delivery!(
                level = ERROR,
                "{context}: unable to write retry record {}: {err}",
                path.display()
            );
            let _ = fs::remove_file(&path);
            return Err(err.into());
        }

        delivery!(level = INFO, "{context}: deferred as retry record {id}");
        Ok(id)
    }

    /// One pass over the directory.
    #[traced(instrument(level = tracing::Level::TRACE, skip_all, ret), timing(precision = "ms"))]
    pub fn scan_once(
        &self,
        transport: &dyn RetryTransport,
        verifier: &dyn IpDomainVerifier,
    ) -> ScanReport {
        self.inner.scan(transport, verifier)
    }

    /// Start the background thread rescanning the directory.
    ///
    /// # Errors
    ///
    /// [`SpoolError::AlreadyRunning`] if it is running, or the error spawning
    /// the thread.
    pub fn run(
        &self,
        transport: Arc<dyn RetryTransport>,
        verifier: Arc<dyn IpDomainVerifier>,
    ) -> Result<()> {
        let mut worker = self.worker.lock();
        if worker.is_some() {
            return Err(SpoolError::AlreadyRunning);
        }

        self.inner.stop.set(false);
        let inner = Arc::clone(&self.inner);
        let handle = thread::Builder::new()
            .name("hermod/retry".into())
            .spawn(move || inner.work(transport.as_ref(), verifier.as_ref()))?;
        *worker = Some(handle);

        internal!(level = DEBUG, "Retry store thread started");
        Ok(())
    }

    /// Stop and join the background thread, if running.
    #[traced(instrument(level = tracing::Level::TRACE, skip_all), timing(precision = "ms"))]
    pub fn stop(&self) {
        let Some(handle) = self.worker.lock().take() else {
            return;
        };

        self.inner.stop.set(true);
        if handle.join().is_err() {
            internal!(level = ERROR, "Retry store thread panicked");
        }
    }
}

impl Drop for RetryStore {
    fn drop(&mut self) {
        self.stop();
    }
}

impl DeferredStore for RetryStore {
    fn defer(
        &self,
        context: &MessageContext,
        arrival: SystemTime,
    ) -> std::result::Result<u64, DeferError> {
        self.put(context, arrival).map(u64::from).map_err(Into::into)
    }
}

fn write_record(path: &Path, body: &[u8]) -> std::io::Result<()> {
    let mut file = File::create(path)?;
    file.write_all(&IN_PROGRESS.to_le_bytes())?;
    file.write_all(body)?;
    file.sync_data()?;

    file.seek(SeekFrom::Start(0))?;
    file.write_all(&1i32.to_le_bytes())?;
    file.sync_data()
}

fn write_times(path: &Path, times: i32) -> std::io::Result<()> {
    let mut file = OpenOptions::new().write(true).open(path)?;
    file.write_all(&times.to_le_bytes())
}

impl Inner {
    fn work(&self, transport: &dyn RetryTransport, verifier: &dyn IpDomainVerifier) {
        let mut wait = Duration::from_secs(self.scan_interval.load(Ordering::Relaxed));

        while !self.stop.wait(wait) {
            let begin = Instant::now();
            let report = self.scan(transport, verifier);
            internal!("Retry pass: {report:?}");

            let interval = Duration::from_secs(self.scan_interval.load(Ordering::Relaxed));
            wait = interval.saturating_sub(begin.elapsed());
        }

        internal!(level = DEBUG, "Retry store thread stopped");
    }

    fn scan(&self, transport: &dyn RetryTransport, verifier: &dyn IpDomainVerifier) -> ScanReport {
        let mut report = ScanReport::default();

        let entries = match fs::read_dir(&self.path) {
            Ok(entries) => entries,
            Err(err) => {
                internal!(
                    level = ERROR,
                    "Unable to list {}: {err}",
                    self.path.display()
                );
                return report;
            }
        };

        for entry in entries.flatten() {
            if self.stop.is_set() {
                break;
            }

            let path = entry.path();
            let Ok(metadata) = fs::metadata(&path) else {
                continue;
            };
            if !metadata.is_file() || metadata.len() < MARKER_LEN as u64 {
                continue;
            }

            self.process(&path, transport, verifier, &mut report);
        }

        report
    }

    fn process(
        &self,
        path: &Path,
        transport: &dyn RetryTransport,
        verifier: &dyn IpDomainVerifier,
        report: &mut ScanReport,
    ) {
        let Ok(bytes) = fs::read(path) else {
            return;
        };
        if record::marker(&bytes).is_none_or(|marker| marker == IN_PROGRESS) {
            return;
        }

        let RetryRecord {
            times,
            arrival,
            mut context,
        } = match record::decode(&bytes) {
            Ok(record) => record,
            Err(err) => {
                internal!(
                    level = WARN,
                    "Discarding unreadable retry record {}: {err}",
                    path.display()
                );
                let _ = fs::remove_file(path);
                report.discarded += 1;
                return;
            }
        };
        report.attempted += 1;

        let max_retries = i32::try_from(self.max_retries.load(Ordering::Relaxed)).unwrap_or(i32::MAX);
        let exhausted = max_retries <= times;

        let outcome = if transport.redeliver(&mut context) {
            Outcome::Delivered
        } else {
            Outcome::Failed(
                context
                    .control
                    .failure
                    .as_ref()
                    .map_or(FailureKind::Temporary, |failure| failure.kind),
            )
        };

        let (remove, mut bounce, kind) = match outcome {
            Outcome::Delivered => (true, false, FailureKind::Permanent),
            Outcome::Failed(FailureKind::Temporary) => {
                (exhausted, exhausted, FailureKind::Permanent)
            }
            Outcome::Failed(kind) => (true, true, kind),
        };

        if remove {
            if let Err(err) = fs::remove_file(path) {
                internal!(level = ERROR, "Unable to remove {}: {err}", path.display());
            }
            if outcome == Outcome::Delivered {
                delivery!(level = INFO, "{context}: delivered on attempt {times}");
                report.delivered += 1;
            } else {
                delivery!(level = WARN, "{context}: giving up after {times} attempt(s)");
                report.failed += 1;
            }
        } else {
            if let Err(err) = write_times(path, times.saturating_add(1)) {
                internal!(
                    level = ERROR,
                    "Unable to update attempts of {}: {err}",
                    path.display()
                );
            }
            report.deferred += 1;
        }

        bounce &= context.control.need_bounce;
        if bounce && context.control.bound_type == BoundType::Inbound {
            bounce = self.policy_allows(&context, verifier);
        }

        if bounce && self.send_bounce(&context, arrival, kind, transport) {
            report.bounced += 1;
        }
    }

    fn policy_allows(&self, context: &MessageContext, verifier: &dyn IpDomainVerifier) -> bool {
        match self.bounce_policy {
            BouncePolicy::None => false,
            BouncePolicy::Always => true,
            BouncePolicy::Verify => {
                let Some(last_hop) = context.mail.header("X-Lasthop") else {
                    return false;
                };
                let Some(domain) = context.control.from_domain() else {
                    return false;
                };

                let verified = verifier.verify(domain, &last_hop);
                if !verified {
                    delivery!(
                        level = INFO,
                        "{context}: original address {last_hop} does not match {domain}, \
                         not bouncing"
                    );
                }
                verified
            }
        }
    }

    fn send_bounce(
        &self,
        context: &MessageContext,
        arrival: SystemTime,
        kind: FailureKind,
        transport: &dyn RetryTransport,
    ) -> bool {
        if context.control.from.is_empty() {
            delivery!(level = DEBUG, "{context}: null sender, not bouncing");
            return false;
        }

        let failure = context.control.failure.as_ref();
        let remote_ip = failure.and_then(|failure| failure.remote_ip.as_deref());
        let reason = failure.map_or("retry limit reached", |failure| failure.reason.as_str());

        let mail = match self
            .bouncer
            .produce(context, arrival, kind, remote_ip, reason)
        {
            Ok(mail) => mail,
            Err(err) => {
                delivery!(level = ERROR, "{context}: unable to build bounce: {err}");
                return false;
            }
        };

        let mut notice = MessageContext {
            mail,
            ..MessageContext::default()
        };
        notice.control.bound_type = BoundType::SelfOriginated;
        notice.control.from.clone_from(&self.postmaster);
        notice.control.recipients.push(context.control.from.clone());

        let queued = transport.inject(notice);
        if !queued {
            delivery!(level = WARN, "{context}: no context free for the bounce");
        }
        queued
    }
}
