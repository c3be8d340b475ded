use super::*;
use crate::core::error::QueryError;
use crate::core::types::{Operation, Query, QueryResponse};
use crate::core::{KVConfig, KVStore};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::mpsc;

type LinkItem = ReplicationResult<Option<MasterEvent>>;
type ConnectHook = Box<dyn FnOnce() + Send>;

/// Next outcome of a connection attempt
enum Outcome {
    Refuse,
    Accept(mpsc::UnboundedReceiver<LinkItem>),
}

/// Connector that plays back scripted outcomes; refuses once the script runs dry
#[derive(Default)]
struct ScriptedConnector {
    outcomes: Mutex<VecDeque<Outcome>>,
    attempts: Mutex<Vec<(MasterTarget, Instant)>>,
    hook: Mutex<Option<ConnectHook>>,
}

impl ScriptedConnector {
    fn refuse(&self) {
        self.outcomes.lock().push_back(Outcome::Refuse);
    }

    /// Queue an accepted link; the sender feeds it, dropping it closes the stream
    fn accept(&self) -> mpsc::UnboundedSender<LinkItem> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.outcomes.lock().push_back(Outcome::Accept(rx));
        tx
    }

    /// Run `hook` inside the next connect, just before it returns
    fn before_connect_returns(&self, hook: impl FnOnce() + Send + 'static) {
        *self.hook.lock() = Some(Box::new(hook));
    }

    fn attempts(&self) -> usize {
        self.attempts.lock().len()
    }

    fn last_target(&self) -> Option<MasterTarget> {
        self.attempts.lock().last().map(|(target, _)| target.clone())
    }

    fn attempt_times(&self) -> Vec<Instant> {
        self.attempts.lock().iter().map(|(_, at)| *at).collect()
    }
}

#[async_trait]
impl MasterConnector for ScriptedConnector {
    async fn connect(
        &self,
        target: &MasterTarget,
        _offset: u64,
    ) -> ReplicationResult<Box<dyn MasterLink>> {
        self.attempts.lock().push((target.clone(), Instant::now()));
        let outcome = self.outcomes.lock().pop_front();
        let hook = self.hook.lock().take();
        if let Some(hook) = hook {
            hook();
        }
        match outcome {
            Some(Outcome::Accept(rx)) => Ok(Box::new(ChannelLink { rx })),
            Some(Outcome::Refuse) | None => Err(ReplicationError::ConnectionFailed(format!(
                "{} refused",
                target
            ))),
        }
    }
}

struct ChannelLink {
    rx: mpsc::UnboundedReceiver<LinkItem>,
}

#[async_trait]
impl MasterLink for ChannelLink {
    async fn next_event(&mut self) -> ReplicationResult<Option<MasterEvent>> {
        match self.rx.recv().await {
            Some(item) => item,
            None => Ok(None),
        }
    }
}

#[derive(Default)]
struct CountingCallback {
    failures: AtomicUsize,
    resumes: AtomicUsize,
}

impl FailoverCallback for CountingCallback {
    fn on_failure(&self) {
        self.failures.fetch_add(1, Ordering::SeqCst);
    }

    fn on_resume(&self) {
        self.resumes.fetch_add(1, Ordering::SeqCst);
    }
}

struct Harness {
    slave: Arc<SlaveNode>,
    kv: Arc<KVStore>,
    connector: Arc<ScriptedConnector>,
    callback: Arc<CountingCallback>,
}

fn fast_config() -> ReplicationConfig {
    ReplicationConfig {
        initial_backoff_ms: 10,
        backoff_cap_ms: 1000,
        ..ReplicationConfig::default()
    }
}

fn start(
    replication: ReplicationConfig,
    failover: FailoverConfig,
    connector: Arc<ScriptedConnector>,
) -> Harness {
    start_with_store(replication, failover, connector, KVConfig::default())
}

fn start_with_store(
    replication: ReplicationConfig,
    failover: FailoverConfig,
    connector: Arc<ScriptedConnector>,
    kv_config: KVConfig,
) -> Harness {
    let kv = Arc::new(KVStore::new(kv_config));
    let callback = Arc::new(CountingCallback::default());
    let slave = SlaveNode::start_with_callback(
        replication,
        failover,
        kv.clone(),
        connector.clone(),
        Some(callback.clone() as Arc<dyn FailoverCallback>),
    )
    .unwrap();

    Harness {
        slave,
        kv,
        connector,
        callback,
    }
}

async fn wait_until<F: Fn() -> bool>(what: &str, condition: F) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !condition() {
        assert!(Instant::now() < deadline, "timed out waiting for {}", what);
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

fn set_op(offset: u64, key: &str, value: &str) -> LinkItem {
    Ok(Some(MasterEvent::Operation(ReplicationOperation {
        offset,
        timestamp: 0,
        operation: Operation::Set {
            key: key.to_string(),
            value: value.as_bytes().to_vec(),
            ttl: None,
        },
    })))
}

fn heartbeat(master_offset: u64) -> LinkItem {
    Ok(Some(MasterEvent::Heartbeat { master_offset }))
}

#[tokio::test]
async fn test_replicates_operations() {
    let connector = Arc::new(ScriptedConnector::default());
    let tx = connector.accept();
    let h = start(fast_config(), FailoverConfig::default(), connector);

    tx.send(set_op(0, "key1", "value1")).unwrap();
    tx.send(set_op(1, "key2", "value2")).unwrap();

    let kv = h.kv.clone();
    wait_until("operations applied", || kv.get("key2").is_some()).await;

    assert_eq!(h.kv.get("key1"), Some(b"value1".to_vec()));
    let status = h.slave.status();
    assert_eq!(status.state, LinkState::Connected);
    assert_eq!(status.serving_mode, ServingMode::Responding);
    assert_eq!(status.applied_offset, 2);

    h.slave.shutdown().await;
}

#[tokio::test]
async fn test_disconnect_fails_over_and_reconnects() {
    let connector = Arc::new(ScriptedConnector::default());
    let first = connector.accept();
    let _second = connector.accept();
    let h = start(fast_config(), FailoverConfig::default(), connector);

    let slave = h.slave.clone();
    wait_until("first connection", || {
        slave.status().state == LinkState::Connected
    })
    .await;

    // Master goes away
    drop(first);

    let connector = h.connector.clone();
    wait_until("reconnect", || connector.attempts() == 2).await;
    let slave = h.slave.clone();
    wait_until("connected again", || {
        slave.status().state == LinkState::Connected
    })
    .await;

    assert_eq!(h.callback.failures.load(Ordering::SeqCst), 1);
    assert_eq!(h.callback.resumes.load(Ordering::SeqCst), 1);
    assert_eq!(h.slave.status().total_failures, 1);
    assert_eq!(h.slave.status().serving_mode, ServingMode::Responding);

    h.slave.shutdown().await;
}

#[tokio::test]
async fn test_backoff_grows_between_refused_attempts() {
    let connector = Arc::new(ScriptedConnector::default());
    connector.refuse();
    connector.refuse();
    connector.refuse();
    let _tx = connector.accept();

    let replication = ReplicationConfig {
        initial_backoff_ms: 20,
        backoff_cap_ms: 10_000,
        ..ReplicationConfig::default()
    };
    let h = start(replication, FailoverConfig::default(), connector);

    let slave = h.slave.clone();
    wait_until("connected after retries", || {
        slave.status().state == LinkState::Connected
    })
    .await;

    let times = h.connector.attempt_times();
    assert_eq!(times.len(), 4);
    assert!(times[1] - times[0] >= Duration::from_millis(20));
    assert!(times[2] - times[1] >= Duration::from_millis(40));
    assert!(times[3] - times[2] >= Duration::from_millis(80));

    // Successful reconnect resets the delay
    assert_eq!(h.slave.controller().current_backoff(), Duration::from_millis(20));
    // One failure episode, however many attempts it took
    assert_eq!(h.callback.failures.load(Ordering::SeqCst), 1);

    h.slave.shutdown().await;
}

#[tokio::test]
async fn test_gives_up_on_flapping_master_until_reset() {
    let connector = Arc::new(ScriptedConnector::default());
    // Three links that close right away
    drop(connector.accept());
    drop(connector.accept());
    drop(connector.accept());

    let mut failover = FailoverConfig::default();
    failover.give_up.max_reconnects = 3;
    let h = start(fast_config(), failover, connector);

    let slave = h.slave.clone();
    wait_until("given up", || slave.status().state == LinkState::GivenUp).await;

    // No further attempts while given up
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(h.connector.attempts(), 3);
    assert!(h.slave.status().given_up);
    assert_eq!(h.slave.status().serving_mode, ServingMode::FailedOver);

    let _tx = h.connector.accept();
    let message = h.slave.control::<&str>("failover_reset", &[]).unwrap();
    assert!(message.contains("reset"), "unexpected reply: {}", message);

    let slave = h.slave.clone();
    wait_until("reconnected after reset", || {
        slave.status().state == LinkState::Connected
    })
    .await;
    assert_eq!(h.connector.attempts(), 4);
    assert_eq!(h.slave.status().recent_reconnects, 1);

    h.slave.shutdown().await;
}

#[tokio::test]
async fn test_new_master_redirects_live_connection() {
    let connector = Arc::new(ScriptedConnector::default());
    let _old = connector.accept();
    let _new = connector.accept();
    let h = start(fast_config(), FailoverConfig::default(), connector);

    let slave = h.slave.clone();
    wait_until("connected", || slave.status().state == LinkState::Connected).await;

    let message = h.slave.control("new_master", &["10.0.0.5", "6379"]).unwrap();
    assert!(message.contains("10.0.0.5:6379"), "unexpected reply: {}", message);

    let connector = h.connector.clone();
    wait_until("redirected", || connector.attempts() == 2).await;
    assert_eq!(
        h.connector.last_target(),
        Some(MasterTarget::new("10.0.0.5", 6379))
    );

    let slave = h.slave.clone();
    wait_until("connected to new master", || {
        slave.status().state == LinkState::Connected
    })
    .await;
    assert_eq!(h.slave.status().master, MasterTarget::new("10.0.0.5", 6379));

    h.slave.shutdown().await;
}

#[tokio::test]
async fn test_new_master_while_connecting_skips_old_master() {
    let connector = Arc::new(ScriptedConnector::default());
    let old = connector.accept();
    let _new = connector.accept();
    old.send(set_op(0, "stale", "from old master")).unwrap();
    let h = start(fast_config(), FailoverConfig::default(), connector);

    // The old master accepts us, then the operator retargets before we resume
    let controller = Arc::clone(h.slave.controller());
    h.connector.before_connect_returns(move || {
        controller.redirect(MasterTarget::new("10.0.0.5", 6379));
    });

    let slave = h.slave.clone();
    wait_until("connected to new master", || {
        let status = slave.status();
        status.state == LinkState::Connected
            && status.master == MasterTarget::new("10.0.0.5", 6379)
    })
    .await;

    assert_eq!(h.connector.attempts(), 2);
    assert_eq!(h.kv.get("stale"), None);
    let status = h.slave.status();
    assert_eq!(status.recent_reconnects, 1);
    assert_eq!(status.total_failures, 0);
    assert_eq!(h.callback.failures.load(Ordering::SeqCst), 0);

    h.slave.shutdown().await;
}

#[tokio::test]
async fn test_new_master_invalid_port_changes_nothing() {
    let connector = Arc::new(ScriptedConnector::default());
    let _tx = connector.accept();
    let h = start(fast_config(), FailoverConfig::default(), connector);

    let slave = h.slave.clone();
    wait_until("connected", || slave.status().state == LinkState::Connected).await;
    let before = h.slave.status().master;

    assert_eq!(
        h.slave.control("new_master", &["host", "not_a_port"]),
        Err(ControlError::InvalidPort("not_a_port".to_string()))
    );

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(h.slave.status().master, before);
    assert_eq!(h.slave.status().state, LinkState::Connected);
    assert_eq!(h.connector.attempts(), 1);

    h.slave.shutdown().await;
}

#[tokio::test]
async fn test_shutdown_interrupts_backoff_sleep() {
    let connector = Arc::new(ScriptedConnector::default());
    connector.refuse();

    let replication = ReplicationConfig {
        initial_backoff_ms: 60_000,
        backoff_cap_ms: 60_000,
        ..ReplicationConfig::default()
    };
    let h = start(replication, FailoverConfig::default(), connector);

    let connector = h.connector.clone();
    wait_until("first attempt", || connector.attempts() == 1).await;

    tokio::time::timeout(Duration::from_secs(2), h.slave.shutdown())
        .await
        .expect("shutdown should interrupt the backoff sleep");
    assert!(!h.slave.is_running());
    assert_eq!(h.connector.attempts(), 1);
}

#[tokio::test]
async fn test_shutdown_interrupts_stream_read() {
    let connector = Arc::new(ScriptedConnector::default());
    let _tx = connector.accept();
    let h = start(fast_config(), FailoverConfig::default(), connector);

    let slave = h.slave.clone();
    wait_until("connected", || slave.status().state == LinkState::Connected).await;

    tokio::time::timeout(Duration::from_secs(2), h.slave.shutdown())
        .await
        .expect("shutdown should interrupt the stream read");
    assert!(!h.slave.is_running());
    // Shutdown is not a failure episode
    assert_eq!(h.callback.failures.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_store_failure_counts_as_connection_failure() {
    let connector = Arc::new(ScriptedConnector::default());
    let tx = connector.accept();
    let h = start_with_store(
        fast_config(),
        FailoverConfig::default(),
        connector,
        KVConfig {
            max_memory_mb: 0,
            ..KVConfig::default()
        },
    );

    tx.send(set_op(0, "key", "value")).unwrap();

    let slave = h.slave.clone();
    wait_until("failure recorded", || slave.status().total_failures >= 1).await;
    assert_eq!(h.slave.status().applied_offset, 0);

    h.slave.shutdown().await;
}

#[tokio::test]
async fn test_query_gating_follows_serving_mode() {
    let connector = Arc::new(ScriptedConnector::default());
    let h = start(
        ReplicationConfig {
            initial_backoff_ms: 60_000,
            backoff_cap_ms: 60_000,
            ..ReplicationConfig::default()
        },
        FailoverConfig::default(),
        connector,
    );

    // Never connected: failed over, not serving locally
    assert_eq!(
        h.slave.serve_query(Query::Get { key: "a".into() }),
        Err(QueryError::Unavailable)
    );
    h.slave.shutdown().await;

    let connector = Arc::new(ScriptedConnector::default());
    let tx = connector.accept();
    let h = start(fast_config(), FailoverConfig::default(), connector);
    tx.send(set_op(0, "a", "1")).unwrap();
    let kv = h.kv.clone();
    wait_until("replicated", || kv.get("a").is_some()).await;

    assert_eq!(
        h.slave.serve_query(Query::Get { key: "a".into() }),
        Ok(QueryResponse::Value(Some(b"1".to_vec())))
    );
    assert_eq!(
        h.slave.serve_query(Query::Delete { key: "a".into() }),
        Err(QueryError::ReadOnlyReplica)
    );
    h.slave.shutdown().await;
}

#[tokio::test]
async fn test_serves_writes_locally_when_failed_over() {
    let connector = Arc::new(ScriptedConnector::default());
    let tx = connector.accept();

    let failover = FailoverConfig {
        serve_queries_while_failed_over: true,
        ..FailoverConfig::default()
    };
    let replication = ReplicationConfig {
        initial_backoff_ms: 60_000,
        backoff_cap_ms: 60_000,
        ..ReplicationConfig::default()
    };
    let h = start(replication, failover, connector);

    let slave = h.slave.clone();
    wait_until("connected", || slave.status().state == LinkState::Connected).await;
    drop(tx);

    let slave = h.slave.clone();
    wait_until("failed over", || {
        slave.status().serving_mode == ServingMode::FailedOver
    })
    .await;

    assert_eq!(
        h.slave.serve_query(Query::Set {
            key: "local".into(),
            value: b"write".to_vec(),
            ttl: None,
        }),
        Ok(QueryResponse::Stored)
    );
    assert_eq!(h.kv.get("local"), Some(b"write".to_vec()));

    h.slave.shutdown().await;
}

#[tokio::test]
async fn test_invalid_config_is_rejected() {
    let connector = Arc::new(ScriptedConnector::default());
    let kv = Arc::new(KVStore::new(KVConfig::default()));
    let replication = ReplicationConfig {
        master_port: 0,
        ..ReplicationConfig::default()
    };

    let result = SlaveNode::start(replication, FailoverConfig::default(), kv, connector);
    assert!(matches!(result, Err(ReplicationError::InvalidConfig(_))));
}

#[tokio::test]
async fn test_heartbeat_reports_lag() {
    let connector = Arc::new(ScriptedConnector::default());
    let tx = connector.accept();
    let replication = ReplicationConfig {
        initial_backoff_ms: 60_000,
        backoff_cap_ms: 60_000,
        ..ReplicationConfig::default()
    };
    let h = start(replication, FailoverConfig::default(), connector);

    let slave = h.slave.clone();
    wait_until("connected", || slave.status().state == LinkState::Connected).await;
    assert_eq!(h.slave.status().lag, None);

    tx.send(set_op(0, "a", "1")).unwrap();
    tx.send(set_op(1, "b", "2")).unwrap();
    tx.send(heartbeat(5)).unwrap();

    wait_until("heartbeat recorded", || {
        slave.status().master_offset == Some(5)
    })
    .await;
    let status = h.slave.status();
    assert_eq!(status.applied_offset, 2);
    assert_eq!(status.lag, Some(3));

    // Lag is only known while the link is up
    drop(tx);
    wait_until("link lost", || slave.status().total_failures == 1).await;
    assert_eq!(h.slave.status().master_offset, None);
    assert_eq!(h.slave.status().lag, None);

    h.slave.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_drop_waits_for_replication_loop() {
    let connector = Arc::new(ScriptedConnector::default());
    let tx = connector.accept();
    let h = start(fast_config(), FailoverConfig::default(), connector);

    let controller = Arc::clone(h.slave.controller());
    wait_until("connected", || {
        controller.link_state() == LinkState::Connected
    })
    .await;

    // No shutdown(): dropping the last handle must stop the loop by itself
    drop(h);
    assert_eq!(Arc::strong_count(&controller), 1);
    assert!(tx.is_closed());
}

#[tokio::test]
async fn test_drop_stops_replication_loop_on_current_thread() {
    let connector = Arc::new(ScriptedConnector::default());
    let tx = connector.accept();
    let h = start(fast_config(), FailoverConfig::default(), connector);

    let controller = Arc::clone(h.slave.controller());
    wait_until("connected", || {
        controller.link_state() == LinkState::Connected
    })
    .await;

    drop(h);
    wait_until("loop released", || Arc::strong_count(&controller) == 1).await;
    assert!(tx.is_closed());
}
