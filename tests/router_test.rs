//! Router semantics against an in-memory connector: single-flighted
//! creation, cached reuse, probe-failure recreation, shared errors, and
//! shutdown tolerance.

use async_trait::async_trait;
use campus_core::router::{ConnectionRouter, Connector};
use campus_core::CoreError;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Default)]
struct FakeState {
    connects: AtomicUsize,
    disconnects: AtomicUsize,
    fail_connect: AtomicBool,
    fail_probe_once: AtomicBool,
    fail_disconnect: AtomicBool,
}

/// Counts lifecycle calls; connections are just sequence numbers.
#[derive(Clone, Default)]
struct FakeConnector {
    state: Arc<FakeState>,
    connect_delay: Duration,
}

impl FakeConnector {
    fn with_delay(delay: Duration) -> Self {
        FakeConnector {
            state: Arc::new(FakeState::default()),
            connect_delay: delay,
        }
    }

    fn connects(&self) -> usize {
        self.state.connects.load(Ordering::SeqCst)
    }

    fn disconnects(&self) -> usize {
        self.state.disconnects.load(Ordering::SeqCst)
    }

    fn set_fail_connect(&self, fail: bool) {
        self.state.fail_connect.store(fail, Ordering::SeqCst);
    }

    fn fail_next_probe(&self) {
        self.state.fail_probe_once.store(true, Ordering::SeqCst);
    }

    fn set_fail_disconnect(&self, fail: bool) {
        self.state.fail_disconnect.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl Connector for FakeConnector {
    type Conn = usize;

    async fn connect(&self, database: &str) -> Result<usize, BoxError> {
        let n = self.state.connects.fetch_add(1, Ordering::SeqCst) + 1;
        tokio::time::sleep(self.connect_delay).await;
        if self.state.fail_connect.load(Ordering::SeqCst) {
            return Err(format!("connection refused to {}", database).into());
        }
        Ok(n)
    }

    async fn probe(&self, _conn: &usize) -> bool {
        !self.state.fail_probe_once.swap(false, Ordering::SeqCst)
    }

    async fn disconnect(&self, _conn: &usize) -> Result<(), BoxError> {
        self.state.disconnects.fetch_add(1, Ordering::SeqCst);
        if self.state.fail_disconnect.load(Ordering::SeqCst) {
            return Err("close failed".into());
        }
        Ok(())
    }
}

fn router(fake: &FakeConnector) -> ConnectionRouter<FakeConnector> {
    ConnectionRouter::new(fake.clone(), "school_erp_system".into(), "school_erp_trust_".into())
}

#[tokio::test]
async fn concurrent_acquires_create_exactly_one_connection() {
    let fake = FakeConnector::with_delay(Duration::from_millis(20));
    let router = Arc::new(router(&fake));

    let mut tasks = Vec::new();
    for _ in 0..8 {
        let r = router.clone();
        tasks.push(tokio::spawn(async move { r.acquire("abc").await }));
    }
    let mut handles = Vec::new();
    for t in tasks {
        handles.push(t.await.unwrap().unwrap());
    }

    assert_eq!(fake.connects(), 1);
    let first = *handles[0].conn();
    assert!(handles.iter().all(|h| *h.conn() == first));
}

#[tokio::test]
async fn second_acquire_reuses_the_cached_handle() {
    let fake = FakeConnector::default();
    let router = router(&fake);

    let a = router.acquire("abc").await.unwrap();
    let b = router.acquire("abc").await.unwrap();

    assert_eq!(fake.connects(), 1);
    assert!(Arc::ptr_eq(&a, &b));
    assert_eq!(a.database(), "school_erp_trust_abc");
}

#[tokio::test]
async fn distinct_tenants_get_distinct_connections() {
    let fake = FakeConnector::default();
    let router = router(&fake);

    let a = router.acquire("demo").await.unwrap();
    let b = router.acquire("maroon").await.unwrap();

    assert_eq!(fake.connects(), 2);
    assert_eq!(a.database(), "school_erp_trust_demo");
    assert_eq!(b.database(), "school_erp_trust_maroon");
}

#[tokio::test]
async fn failed_probe_evicts_and_recreates_transparently() {
    let fake = FakeConnector::default();
    let router = router(&fake);

    let a = router.acquire("abc").await.unwrap();
    fake.fail_next_probe();
    let b = router.acquire("abc").await.unwrap();

    assert_eq!(fake.connects(), 2);
    assert!(!Arc::ptr_eq(&a, &b));
    assert_eq!(fake.disconnects(), 1);
}

#[tokio::test]
async fn creation_failure_is_shared_by_concurrent_waiters() {
    let fake = FakeConnector::with_delay(Duration::from_millis(20));
    fake.set_fail_connect(true);
    let router = Arc::new(router(&fake));

    let mut tasks = Vec::new();
    for _ in 0..5 {
        let r = router.clone();
        tasks.push(tokio::spawn(async move { r.acquire("abc").await }));
    }
    for t in tasks {
        match t.await.unwrap() {
            Err(CoreError::Connection { tenant, reason }) => {
                assert_eq!(tenant, "abc");
                assert!(reason.contains("connection refused"));
            }
            other => panic!("expected connection error, got {:?}", other.map(|h| h.database().to_string())),
        }
    }
    assert_eq!(fake.connects(), 1);

    // The failed slot is cleared, so a later caller retries fresh.
    fake.set_fail_connect(false);
    let handle = router.acquire("abc").await.unwrap();
    assert_eq!(fake.connects(), 2);
    assert_eq!(handle.database(), "school_erp_trust_abc");
}

#[tokio::test]
async fn evict_closes_and_forgets_the_handle() {
    let fake = FakeConnector::default();
    let router = router(&fake);

    router.acquire("abc").await.unwrap();
    router.evict("abc").await;
    assert_eq!(fake.disconnects(), 1);

    router.acquire("abc").await.unwrap();
    assert_eq!(fake.connects(), 2);
}

#[tokio::test]
async fn shutdown_attempts_every_close_despite_failures() {
    let fake = FakeConnector::default();
    let router = router(&fake);

    router.acquire("demo").await.unwrap();
    router.acquire("maroon").await.unwrap();
    router.acquire_system().await.unwrap();

    fake.set_fail_disconnect(true);
    router.shutdown_all().await;
    assert_eq!(fake.disconnects(), 3);

    // The map is drained; a new acquire reconnects.
    fake.set_fail_disconnect(false);
    router.acquire("demo").await.unwrap();
    assert_eq!(fake.connects(), 4);
}

#[tokio::test]
async fn system_handle_uses_the_system_database() {
    let fake = FakeConnector::default();
    let router = router(&fake);

    let system = router.acquire_system().await.unwrap();
    assert_eq!(system.database(), "school_erp_system");
}

#[tokio::test]
async fn invalid_tenant_codes_are_rejected_before_connecting() {
    let fake = FakeConnector::default();
    let router = router(&fake);

    assert!(matches!(
        router.acquire("Not A Code").await,
        Err(CoreError::Validation(_))
    ));
    assert_eq!(fake.connects(), 0);
}

#[tokio::test]
async fn health_report_probes_every_cached_handle() {
    let fake = FakeConnector::default();
    let router = router(&fake);

    router.acquire("demo").await.unwrap();
    router.acquire_system().await.unwrap();

    let report = router.health_report().await;
    assert_eq!(report.len(), 2);
    assert_eq!(report[0].key, "@system");
    assert_eq!(report[1].key, "demo");
    assert!(report.iter().all(|h| h.alive));
}
