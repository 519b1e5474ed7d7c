//! Registry of active connection handlers
//!
//! Maps each [`ConnId`] to at most one [`Handler`]. Construction is
//! serialized per key: the first caller for an absent id installs a shared
//! construction future and every concurrent caller for the same id awaits
//! that same future, so the factory runs exactly once.

use crate::error::{PoolError, TunnelError};
use crate::handler::Handler;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures::future::{BoxFuture, FutureExt, Shared};
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tunmux_proto::ConnId;

type HandlerFuture = Shared<BoxFuture<'static, Result<Arc<dyn Handler>, PoolError>>>;

enum Slot {
    /// Factory is still running
    Pending {
        generation: u64,
        future: HandlerFuture,
    },
    Ready {
        generation: u64,
        handler: Arc<dyn Handler>,
    },
}

impl Slot {
    fn generation(&self) -> u64 {
        match self {
            Slot::Pending { generation, .. } | Slot::Ready { generation, .. } => *generation,
        }
    }
}

struct PoolInner {
    entries: DashMap<ConnId, Slot>,
    next_generation: AtomicU64,
}

/// Concurrent handler registry shared by the dial loop and the TUN side
#[derive(Clone)]
pub struct Pool {
    inner: Arc<PoolInner>,
}

impl Pool {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(PoolInner {
                entries: DashMap::new(),
                next_generation: AtomicU64::new(0),
            }),
        }
    }

    /// Look up a handler without creating one.
    ///
    /// A handler whose construction is still in flight is reported as absent.
    pub fn get(&self, id: &ConnId) -> Option<Arc<dyn Handler>> {
        match self.inner.entries.get(id)?.value() {
            Slot::Ready { handler, .. } => Some(handler.clone()),
            Slot::Pending { .. } => None,
        }
    }

    /// Return the handler for `id`, creating it with `factory` when absent.
    ///
    /// Among all callers racing on the same absent id, exactly one runs
    /// `factory` and gets `created == true`; the others receive the same
    /// handler, or the same error if construction fails. A failed
    /// construction leaves no entry behind, so a later call may retry.
    pub async fn get_or_create<F, Fut>(
        &self,
        ctx: &CancellationToken,
        id: ConnId,
        factory: F,
    ) -> Result<(Arc<dyn Handler>, bool), PoolError>
    where
        F: FnOnce(CancellationToken, Release) -> Fut + Send + 'static,
        Fut: Future<Output = Result<Arc<dyn Handler>, TunnelError>> + Send + 'static,
    {
        let (future, created) = match self.inner.entries.entry(id) {
            Entry::Occupied(entry) => match entry.get() {
                Slot::Ready { handler, .. } => return Ok((handler.clone(), false)),
                Slot::Pending { future, .. } => (future.clone(), false),
            },
            Entry::Vacant(entry) => {
                let generation = self.inner.next_generation.fetch_add(1, Ordering::Relaxed);
                let release = Release {
                    pool: Arc::downgrade(&self.inner),
                    id,
                    generation,
                };
                let ctx = ctx.clone();
                // The factory only runs on first poll, after the map lock is gone
                let construct = async move { factory(ctx, release).await };
                let future = Self::construct(Arc::downgrade(&self.inner), id, generation, construct)
                    .boxed()
                    .shared();
                entry.insert(Slot::Pending {
                    generation,
                    future: future.clone(),
                });
                (future, true)
            }
        };

        if created {
            // Finish construction even if every waiter is dropped
            tokio::spawn(future.clone());
        }
        let handler = future.await?;
        Ok((handler, created))
    }

    async fn construct<Fut>(
        pool: Weak<PoolInner>,
        id: ConnId,
        generation: u64,
        factory: Fut,
    ) -> Result<Arc<dyn Handler>, PoolError>
    where
        Fut: Future<Output = Result<Arc<dyn Handler>, TunnelError>>,
    {
        let result = factory.await.map_err(|e| PoolError::HandlerCreation {
            id,
            reason: e.to_string(),
        });

        let Some(inner) = pool.upgrade() else {
            return result;
        };
        match &result {
            Ok(handler) => {
                // The handler may already have released itself
                if let Some(mut slot) = inner.entries.get_mut(&id) {
                    if slot.generation() == generation {
                        *slot = Slot::Ready {
                            generation,
                            handler: handler.clone(),
                        };
                    }
                }
            }
            Err(e) => {
                debug!("{}", e);
                inner
                    .entries
                    .remove_if(&id, |_, slot| slot.generation() == generation);
            }
        }
        result
    }

    /// Number of entries, including those still under construction
    pub fn len(&self) -> usize {
        self.inner.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.entries.is_empty()
    }

    /// Close every ready handler. Handlers remove themselves through their
    /// release callback.
    pub async fn close_all(&self, ctx: &CancellationToken) {
        let handlers: Vec<Arc<dyn Handler>> = self
            .inner
            .entries
            .iter()
            .filter_map(|entry| match entry.value() {
                Slot::Ready { handler, .. } => Some(handler.clone()),
                Slot::Pending { .. } => None,
            })
            .collect();

        for handler in handlers {
            handler.close(ctx).await;
        }
    }
}

impl Default for Pool {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Pool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pool").field("len", &self.len()).finish()
    }
}

/// Removes one pool entry when its handler goes away.
///
/// Safe to call any number of times, and after the pool itself is gone. It
/// only removes the entry it was issued for: once a newer handler holds the
/// same id, a stale release is a no-op.
#[derive(Clone)]
pub struct Release {
    pool: Weak<PoolInner>,
    id: ConnId,
    generation: u64,
}

impl Release {
    pub fn release(&self) {
        if let Some(inner) = self.pool.upgrade() {
            if inner
                .entries
                .remove_if(&self.id, |_, slot| slot.generation() == self.generation)
                .is_some()
            {
                debug!("Released handler for {}", self.id);
            }
        }
    }

    pub fn id(&self) -> ConnId {
        self.id
    }
}

impl fmt::Debug for Release {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Release")
            .field("id", &self.id)
            .field("generation", &self.generation)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::any::Any;
    use std::sync::atomic::{AtomicBool, AtomicUsize};
    use std::sync::Mutex;
    use std::time::Duration;
    use tunmux_proto::{IpProtocol, Message};

    struct TestHandler {
        release: Release,
        closed: AtomicBool,
    }

    #[async_trait]
    impl Handler for TestHandler {
        async fn handle_message(&self, _ctx: &CancellationToken, _msg: Message) {}

        async fn close(&self, _ctx: &CancellationToken) {
            self.closed.store(true, Ordering::SeqCst);
            self.release.release();
        }

        fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
            self
        }
    }

    fn conn_id(port: u16) -> ConnId {
        ConnId::new(
            IpProtocol::Udp,
            format!("10.0.0.1:{}", port).parse().unwrap(),
            "10.0.0.2:53".parse().unwrap(),
        )
    }

    async fn create(pool: &Pool, id: ConnId) -> (Arc<dyn Handler>, Release) {
        let slot = Arc::new(Mutex::new(None));
        let captured = slot.clone();
        let (handler, created) = pool
            .get_or_create(&CancellationToken::new(), id, move |_ctx, release| async move {
                *captured.lock().unwrap() = Some(release.clone());
                Ok::<_, TunnelError>(Arc::new(TestHandler {
                    release,
                    closed: AtomicBool::new(false),
                }) as Arc<dyn Handler>)
            })
            .await
            .unwrap();
        assert!(created);
        let release = slot.lock().unwrap().take().unwrap();
        (handler, release)
    }

    #[tokio::test]
    async fn test_get_absent() {
        let pool = Pool::new();
        assert!(pool.get(&conn_id(1)).is_none());
        assert!(pool.is_empty());
    }

    #[tokio::test]
    async fn test_get_or_create_then_get() {
        let pool = Pool::new();
        let (handler, _release) = create(&pool, conn_id(1)).await;

        let found = pool.get(&conn_id(1)).unwrap();
        assert!(Arc::ptr_eq(&handler, &found));
        assert_eq!(pool.len(), 1);

        // A second call returns the existing handler without creating
        let (again, created) = pool
            .get_or_create(&CancellationToken::new(), conn_id(1), |_ctx, _release| async {
                Err::<Arc<dyn Handler>, _>(TunnelError::Handler("must not run".to_string()))
            })
            .await
            .unwrap();
        assert!(!created);
        assert!(Arc::ptr_eq(&handler, &again));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_get_or_create_runs_factory_once() {
        let pool = Pool::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let id = conn_id(7);

        let mut tasks = Vec::new();
        for _ in 0..32 {
            let pool = pool.clone();
            let calls = calls.clone();
            tasks.push(tokio::spawn(async move {
                pool.get_or_create(&CancellationToken::new(), id, move |_ctx, release| async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(20)).await;
                    Ok::<_, TunnelError>(Arc::new(TestHandler {
                        release,
                        closed: AtomicBool::new(false),
                    }) as Arc<dyn Handler>)
                })
                .await
                .unwrap()
            }));
        }

        let mut results = Vec::new();
        for task in tasks {
            results.push(task.await.unwrap());
        }

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(results.iter().filter(|(_, created)| *created).count(), 1);
        let first = &results[0].0;
        assert!(results.iter().all(|(h, _)| Arc::ptr_eq(h, first)));
        assert_eq!(pool.len(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_failed_construction_is_shared_and_not_inserted() {
        let pool = Pool::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let id = conn_id(9);

        let mut tasks = Vec::new();
        for _ in 0..8 {
            let pool = pool.clone();
            let calls = calls.clone();
            tasks.push(tokio::spawn(async move {
                pool.get_or_create(&CancellationToken::new(), id, move |_ctx, _release| async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(20)).await;
                    Err::<Arc<dyn Handler>, _>(TunnelError::Handler("dial refused".to_string()))
                })
                .await
            }));
        }

        for task in tasks {
            let err = task.await.unwrap().err().unwrap();
            assert_eq!(
                err,
                PoolError::HandlerCreation {
                    id,
                    reason: "Handler error: dial refused".to_string()
                }
            );
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(pool.get(&id).is_none());
        assert!(pool.is_empty());

        // A later attempt may retry
        let (_handler, _release) = create(&pool, id).await;
        assert!(pool.get(&id).is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_construction_survives_dropped_caller() {
        let pool = Pool::new();
        let id = conn_id(3);
        let waiter = {
            let pool = pool.clone();
            tokio::spawn(async move {
                pool.get_or_create(&CancellationToken::new(), id, |_ctx, release| async move {
                    tokio::time::sleep(Duration::from_millis(50)).await;
                    Ok::<_, TunnelError>(Arc::new(TestHandler {
                        release,
                        closed: AtomicBool::new(false),
                    }) as Arc<dyn Handler>)
                })
                .await
            })
        };

        tokio::time::sleep(Duration::from_millis(10)).await;
        waiter.abort();
        assert!(pool.get(&id).is_none());

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(pool.get(&id).is_some());
    }

    #[tokio::test]
    async fn test_release_removes_entry_and_is_idempotent() {
        let pool = Pool::new();
        let (_h1, release1) = create(&pool, conn_id(1)).await;
        let (_h2, _release2) = create(&pool, conn_id(2)).await;
        assert_eq!(pool.len(), 2);

        release1.release();
        assert!(pool.get(&conn_id(1)).is_none());
        assert_eq!(pool.len(), 1);

        release1.release();
        assert!(pool.get(&conn_id(2)).is_some());
        assert_eq!(pool.len(), 1);
    }

    #[tokio::test]
    async fn test_stale_release_keeps_newer_handler() {
        let pool = Pool::new();
        let (_old, old_release) = create(&pool, conn_id(1)).await;
        old_release.release();

        let (new, _new_release) = create(&pool, conn_id(1)).await;
        old_release.release();

        let found = pool.get(&conn_id(1)).unwrap();
        assert!(Arc::ptr_eq(&new, &found));
    }

    #[tokio::test]
    async fn test_release_after_pool_dropped() {
        let pool = Pool::new();
        let (_h, release) = create(&pool, conn_id(1)).await;
        drop(pool);
        release.release();
        assert_eq!(release.id(), conn_id(1));
    }

    #[tokio::test]
    async fn test_close_all_empties_pool() {
        let pool = Pool::new();
        let (h1, _) = create(&pool, conn_id(1)).await;
        let (_h2, _) = create(&pool, conn_id(2)).await;

        pool.close_all(&CancellationToken::new()).await;
        assert!(pool.is_empty());

        let h1 = h1.into_any().downcast::<TestHandler>().unwrap();
        assert!(h1.closed.load(Ordering::SeqCst));
    }
}
