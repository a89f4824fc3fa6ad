#![allow(clippy::expect_used, clippy::unwrap_used)]

use std::{
    collections::VecDeque,
    fs,
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicUsize, Ordering},
        mpsc,
    },
    thread,
    time::{Duration, Instant, SystemTime},
};

use hermod_common::{BoundType, MessageContext, traits::DeferredStore};
use hermod_ffi::{Chain, Hook, NoServices, Plugin, PluginError, PluginHost, PluginSignal};
use hermod_spool::{RetryConfig, RetryStore, RetryTransport, record};
use hermod_transport::{
    MAX_TIMES_NOT_SERVED, MessageSource, NoSource, QueuedMessage, TransportConfig, TransportError,
    TransportRuntime,
};
use parking_lot::Mutex;
use pretty_assertions::assert_eq;

fn eventually(mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(10);
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(10));
    }
    false
}

fn config() -> TransportConfig {
    TransportConfig {
        threads_min: 1,
        threads_max: 2,
        free_contexts: 4,
        plugin_dir: "/nonexistent".into(),
        ..TransportConfig::default()
    }
}

/// Provides the delivery hooks, accepting or declining everything, and
/// optionally a hook in front of them that always passes.
struct Delivery {
    accept: bool,
    delivered: Mutex<Option<mpsc::Sender<i32>>>,
    passed: Arc<AtomicUsize>,
    filter: bool,
}

impl Delivery {
    fn accepting(delivered: mpsc::Sender<i32>) -> Self {
        Self {
            accept: true,
            delivered: Mutex::new(Some(delivered)),
            passed: Arc::default(),
            filter: false,
        }
    }

    fn declining(passed: Arc<AtomicUsize>) -> Self {
        Self {
            accept: false,
            delivered: Mutex::new(None),
            passed,
            filter: true,
        }
    }
}

impl Plugin for Delivery {
    fn init(&self, host: &mut PluginHost<'_>) -> bool {
        if self.filter {
            let passed = Arc::clone(&self.passed);
            let filter: Arc<dyn Hook> = Arc::new(move |_: &mut MessageContext, _: &mut Chain<'_>| {
                passed.fetch_add(1, Ordering::SeqCst);
                false
            });
            if host.register_hook(filter).is_err() {
                return false;
            }
        }

        let accept = self.accept;
        let delivered = self.delivered.lock().clone();
        let local: Arc<dyn Hook> = Arc::new(move |context: &mut MessageContext, _: &mut Chain<'_>| {
            if let Some(delivered) = &delivered {
                delivered.send(context.control.queue_id).unwrap();
            }
            accept
        });
        let remote: Arc<dyn Hook> =
            Arc::new(|_: &mut MessageContext, _: &mut Chain<'_>| false);

        host.register_local(local).is_ok() && host.register_remote(remote).is_ok()
    }
}

#[derive(Default)]
struct Queue {
    messages: Mutex<VecDeque<QueuedMessage>>,
    released: Mutex<Vec<i32>>,
    saved: Mutex<Vec<i32>>,
}

impl MessageSource for Queue {
    fn dequeue(&self) -> Option<QueuedMessage> {
        self.messages.lock().pop_front()
    }

    fn save(&self, message: &QueuedMessage, _context: &MessageContext) -> bool {
        self.saved.lock().push(message.flush_id);
        true
    }

    fn release(&self, message: QueuedMessage) {
        self.released.lock().push(message.flush_id);
    }

    fn holding(&self) -> bool {
        !self.messages.lock().is_empty()
    }
}

fn queued(flush_id: i32) -> QueuedMessage {
    QueuedMessage {
        flush_id,
        bound_type: BoundType::Inbound,
        is_spam: false,
        need_bounce: true,
        from: "alice@example.com".into(),
        recipients: vec!["bob@example.org".into()],
        mail: b"Subject: status\r\n\r\nall good\r\n".to_vec(),
        arrival: SystemTime::now(),
    }
}

#[test]
fn plugin_created_messages_are_dispatched() {
    let runtime =
        TransportRuntime::new(config(), Arc::new(NoSource), Arc::new(NoServices), None).unwrap();
    let (sender, delivered) = mpsc::channel();
    runtime
        .plugins()
        .add("delivery.so", Arc::new(Delivery::accepting(sender)))
        .unwrap();
    runtime.start().unwrap();
    assert_eq!(runtime.threads_created(), 1);

    let pool = runtime.contexts();
    let mut throwable = pool.get().unwrap();
    throwable.context_mut().control.queue_id = 42;
    pool.enqueue(throwable);

    assert_eq!(delivered.recv_timeout(Duration::from_secs(10)).unwrap(), 42);
    assert!(eventually(|| pool.available() == 4));

    runtime.stop();
    assert!(runtime.plugins().plugins().is_empty());
}

#[test]
fn delivery_hooks_are_required() {
    let runtime =
        TransportRuntime::new(config(), Arc::new(NoSource), Arc::new(NoServices), None).unwrap();

    let err = runtime.start().unwrap_err();
    assert!(matches!(
        err,
        TransportError::Plugin(PluginError::MissingTerminal("local"))
    ));
    assert!(matches!(runtime.start(), Err(TransportError::AlreadyRunning)));
}

#[test]
fn configured_plugins_must_load() {
    let config = TransportConfig {
        plugins: vec!["missing.so".into()],
        ..config()
    };
    let runtime =
        TransportRuntime::new(config, Arc::new(NoSource), Arc::new(NoServices), None).unwrap();

    let err = runtime.start().unwrap_err();
    assert!(matches!(err, TransportError::Plugin(ref err) if err.is_load_failure()));
    assert!(!err.is_config());
    assert_eq!(runtime.threads_created(), 0);
}

#[test]
fn undelivered_queue_messages_become_retry_records() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(
        RetryStore::new(
            &RetryConfig {
                path: dir.path().to_path_buf(),
                ..RetryConfig::default()
            },
            "mx.example.net",
        )
        .unwrap(),
    );

    let queue = Arc::new(Queue::default());
    queue.messages.lock().push_back(queued(7));

    let runtime = TransportRuntime::new(
        config(),
        Arc::clone(&queue) as Arc<dyn MessageSource>,
        Arc::new(NoServices),
        Some(Arc::clone(&store) as Arc<dyn DeferredStore>),
    )
    .unwrap();
    let passed = Arc::new(AtomicUsize::new(0));
    runtime
        .plugins()
        .add("declining.so", Arc::new(Delivery::declining(Arc::clone(&passed))))
        .unwrap();
    runtime.start().unwrap();

    assert!(eventually(|| queue.released.lock().contains(&7)));
    runtime.stop();

    assert_eq!(passed.load(Ordering::SeqCst), 1);
    assert!(queue.saved.lock().is_empty());

    let bytes = fs::read(dir.path().join("1")).unwrap();
    assert_eq!(record::marker(&bytes), Some(1));

    let record = record::decode(&bytes).unwrap();
    let control = &record.context.control;
    assert_eq!(control.queue_id, 7);
    assert_eq!(control.bound_type, BoundType::Inbound);
    assert_eq!(control.from, "alice@example.com");
    assert_eq!(control.recipients, vec!["bob@example.org".to_owned()]);
    assert_eq!(record.context.mail.header("Subject").as_deref(), Some("status"));
}

#[test]
fn without_a_retry_store_the_queue_keeps_the_message() {
    let queue = Arc::new(Queue::default());
    queue.messages.lock().push_back(queued(9));

    let runtime = TransportRuntime::new(
        config(),
        Arc::clone(&queue) as Arc<dyn MessageSource>,
        Arc::new(NoServices),
        None,
    )
    .unwrap();
    runtime
        .plugins()
        .add("declining.so", Arc::new(Delivery::declining(Arc::default())))
        .unwrap();
    runtime.start().unwrap();

    assert!(eventually(|| queue.released.lock().contains(&9)));
    runtime.stop();

    assert_eq!(*queue.saved.lock(), vec![9]);
}

#[test]
fn redelivery_uses_the_running_hooks() {
    let runtime =
        TransportRuntime::new(config(), Arc::new(NoSource), Arc::new(NoServices), None).unwrap();
    let (sender, delivered) = mpsc::channel();
    runtime
        .plugins()
        .add("delivery.so", Arc::new(Delivery::accepting(sender)))
        .unwrap();
    runtime.start().unwrap();

    let redelivery = runtime.redelivery();
    let mut context = MessageContext::default();
    context.control.queue_id = 3;
    assert!(redelivery.redeliver(&mut context));
    assert_eq!(delivered.recv_timeout(Duration::from_secs(1)).unwrap(), 3);

    let mut notice = MessageContext::default();
    notice.control.queue_id = 5;
    notice.control.bound_type = BoundType::SelfOriginated;
    assert!(redelivery.inject(notice));
    assert_eq!(delivered.recv_timeout(Duration::from_secs(10)).unwrap(), 5);

    runtime.stop();
}

/// Counts the workers through the thread signals every plugin receives.
struct Census {
    delivery: Delivery,
    live: AtomicUsize,
    peak: AtomicUsize,
    created: AtomicUsize,
    destroyed: AtomicUsize,
}

impl Census {
    fn new() -> Self {
        Self {
            delivery: Delivery::declining(Arc::default()),
            live: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
            created: AtomicUsize::new(0),
            destroyed: AtomicUsize::new(0),
        }
    }
}

impl Plugin for Census {
    fn init(&self, host: &mut PluginHost<'_>) -> bool {
        self.delivery.init(host)
    }

    fn notify(&self, signal: PluginSignal) {
        match signal {
            PluginSignal::ThreadCreate => {
                self.created.fetch_add(1, Ordering::SeqCst);
                let live = self.live.fetch_add(1, Ordering::SeqCst) + 1;
                self.peak.fetch_max(live, Ordering::SeqCst);
            }
            PluginSignal::ThreadDestroy => {
                self.destroyed.fetch_add(1, Ordering::SeqCst);
                self.live.fetch_sub(1, Ordering::SeqCst);
            }
            PluginSignal::Init | PluginSignal::Free => {}
        }
    }
}

/// A queue that never hands out a message but can claim to hold some.
#[derive(Default)]
struct Backlog {
    held: AtomicBool,
}

impl MessageSource for Backlog {
    fn dequeue(&self) -> Option<QueuedMessage> {
        None
    }

    fn save(&self, _message: &QueuedMessage, _context: &MessageContext) -> bool {
        false
    }

    fn release(&self, _message: QueuedMessage) {}

    fn holding(&self) -> bool {
        self.held.load(Ordering::SeqCst)
    }
}

fn elastic(scan_interval_ms: u64) -> (TransportRuntime, Arc<Backlog>, Arc<Census>) {
    let backlog = Arc::new(Backlog::default());
    let runtime = TransportRuntime::new(
        TransportConfig {
            threads_min: 1,
            threads_max: 4,
            scan_interval_ms,
            ..config()
        },
        Arc::clone(&backlog) as Arc<dyn MessageSource>,
        Arc::new(NoServices),
        None,
    )
    .unwrap();

    let census = Arc::new(Census::new());
    runtime
        .plugins()
        .add("census.so", Arc::clone(&census) as Arc<dyn Plugin>)
        .unwrap();

    (runtime, backlog, census)
}

#[test]
fn backlog_grows_the_pool_to_the_maximum() {
    let (runtime, backlog, census) = elastic(50);
    backlog.held.store(true, Ordering::SeqCst);
    runtime.start().unwrap();

    assert!(eventually(|| census.peak.load(Ordering::SeqCst) == 4));
    thread::sleep(Duration::from_millis(200));
    assert_eq!(census.peak.load(Ordering::SeqCst), 4);
    assert!(runtime.threads_created() <= runtime.threads_max());

    runtime.stop();
}

#[test]
fn idle_workers_retire_to_the_minimum() {
    let (runtime, backlog, census) = elastic(20);
    backlog.held.store(true, Ordering::SeqCst);
    runtime.start().unwrap();
    assert!(eventually(|| census.peak.load(Ordering::SeqCst) >= 3));

    backlog.held.store(false, Ordering::SeqCst);
    assert!(eventually(|| {
        runtime.threads_created() == 1 && census.live.load(Ordering::SeqCst) == 1
    }));

    // The minimum never retires.
    thread::sleep(Duration::from_millis(60 * u64::from(MAX_TIMES_NOT_SERVED)));
    assert_eq!(runtime.threads_created(), runtime.threads_min());
    assert_eq!(census.live.load(Ordering::SeqCst), 1);

    runtime.stop();
    assert_eq!(census.live.load(Ordering::SeqCst), 0);
}

#[test]
fn stop_joins_every_worker_while_the_pool_churns() {
    let (runtime, backlog, census) = elastic(5);
    runtime.start().unwrap();

    let deadline = Instant::now() + Duration::from_millis(1500);
    while Instant::now() < deadline {
        backlog.held.fetch_xor(true, Ordering::SeqCst);
        thread::sleep(Duration::from_millis(15));
    }
    runtime.stop();

    let created = census.created.load(Ordering::SeqCst);
    assert!(created > 1, "the pool never grew");
    assert_eq!(census.destroyed.load(Ordering::SeqCst), created);
    assert_eq!(census.live.load(Ordering::SeqCst), 0);
    assert!(census.peak.load(Ordering::SeqCst) <= 4);
}
