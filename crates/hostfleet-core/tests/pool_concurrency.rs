mod common;

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;

use hostfleet_core::{ExecutorFactory, ExecutorPool};
use hostfleet_exec::{ErrorKind, ExecError, HostIdentity, RemoteExecutor};

use common::{MockFactory, Script, host};

#[tokio::test]
async fn test_concurrent_get_creates_one_session() {
    let factory = Arc::new(
        MockFactory::new(&[("node-1", Script::ok())]).with_connect_delay(Duration::from_millis(50)),
    );
    let pool = Arc::new(ExecutorPool::new(factory.clone()));

    let mut handles = Vec::new();
    for _ in 0..16 {
        let pool = pool.clone();
        handles.push(tokio::spawn(async move { pool.get(&host("node-1")).await }));
    }

    let mut executors = Vec::new();
    for handle in handles {
        executors.push(handle.await.unwrap().ok().unwrap());
    }

    assert_eq!(factory.created(), 1);
    assert!(executors.windows(2).all(|w| Arc::ptr_eq(&w[0], &w[1])));
    assert_eq!(pool.len().await, 1);
}

#[tokio::test]
async fn test_different_hosts_connect_in_parallel() {
    let names = ["a", "b", "c", "d"];
    let scripts: Vec<(&str, Script)> = names.iter().map(|n| (*n, Script::ok())).collect();
    let factory = Arc::new(MockFactory::new(&scripts).with_connect_delay(Duration::from_millis(300)));
    let pool = Arc::new(ExecutorPool::new(factory.clone()));

    let start = Instant::now();
    let mut handles = Vec::new();
    for name in names {
        let pool = pool.clone();
        handles.push(tokio::spawn(async move { pool.get(&host(name)).await.is_ok() }));
    }
    for handle in handles {
        assert!(handle.await.unwrap());
    }

    assert!(start.elapsed() < Duration::from_millis(900));
    assert_eq!(factory.created(), 4);
}

/// Refuses the first connection attempt, then delegates
struct FlakyFactory {
    attempts: AtomicUsize,
    inner: MockFactory,
}

#[async_trait]
impl ExecutorFactory for FlakyFactory {
    async fn create(&self, host: &HostIdentity) -> Result<Arc<dyn RemoteExecutor>, ExecError> {
        if self.attempts.fetch_add(1, Ordering::SeqCst) == 0 {
            return Err(ExecError::ConnectionFailed("connection reset".to_string()));
        }
        self.inner.create(host).await
    }
}

#[tokio::test]
async fn test_failed_creation_is_retried() {
    let factory = Arc::new(FlakyFactory {
        attempts: AtomicUsize::new(0),
        inner: MockFactory::new(&[("node-1", Script::ok())]),
    });
    let pool = ExecutorPool::new(factory.clone());

    let err = pool.get(&host("node-1")).await.err().unwrap();
    assert_eq!(err.kind(), ErrorKind::Connection);
    assert!(pool.is_empty().await);

    let executor = pool.get(&host("node-1")).await.ok().unwrap();
    assert_eq!(executor.target(), "node-1");
    assert_eq!(pool.len().await, 1);
    assert_eq!(factory.attempts.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_evict_closes_and_recreates() {
    let factory = Arc::new(MockFactory::new(&[("node-1", Script::ok())]));
    let pool = ExecutorPool::new(factory.clone());

    let first = pool.get(&host("node-1")).await.ok().unwrap();
    assert!(pool.evict("node-1").await);
    assert!(!pool.evict("node-1").await);

    let second = pool.get(&host("node-1")).await.ok().unwrap();
    assert!(!Arc::ptr_eq(&first, &second));
    assert_eq!(factory.created(), 2);
}
