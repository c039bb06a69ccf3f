use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use tokio::sync::{RwLock, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info};

use super::http_adapter_client::{DEFAULT_REQUEST_TIMEOUT, HttpAdapterClient};
use crate::app::{AdapterClient, AdapterClientError, ClientPool};
use crate::domain::registration::AdapterEndpoint;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolConfig {
    pub eviction_interval: Duration,
    pub expiration: Duration,
    pub request_timeout: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            eviction_interval: Duration::from_secs(60),
            expiration: Duration::from_secs(300),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }
}

struct PooledClient {
    client: Arc<HttpAdapterClient>,
    /// Milliseconds since the pool was created.
    last_access: AtomicU64,
}

/// Adapter clients shared per endpoint, evicted once idle for `expiration`.
pub struct HttpClientPool {
    config: PoolConfig,
    created: Instant,
    clients: RwLock<HashMap<AdapterEndpoint, Arc<PooledClient>>>,
}

static SHARED: OnceLock<Arc<HttpClientPool>> = OnceLock::new();

impl HttpClientPool {
    pub fn new(config: PoolConfig) -> Self {
        Self {
            config,
            created: Instant::now(),
            clients: RwLock::default(),
        }
    }

    /// Process-wide pool with the default configuration.
    pub fn shared() -> Arc<HttpClientPool> {
        SHARED
            .get_or_init(|| Arc::new(HttpClientPool::new(PoolConfig::default())))
            .clone()
    }

    pub async fn len(&self) -> usize {
        self.clients.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    fn now_millis(&self) -> u64 {
        self.created.elapsed().as_millis() as u64
    }

    fn touch(&self, pooled: &PooledClient) {
        pooled.last_access.store(self.now_millis(), Ordering::Relaxed);
    }

    /// Drops every client idle for longer than the expiration window.
    pub async fn evict_expired(&self) -> usize {
        let now = self.now_millis();
        let expiration = self.config.expiration.as_millis() as u64;

        let mut clients = self.clients.write().await;
        let before = clients.len();
        clients.retain(|_, pooled| {
            now.saturating_sub(pooled.last_access.load(Ordering::Relaxed)) <= expiration
        });
        before - clients.len()
    }

    /// Runs eviction every `eviction_interval` until `shutdown` flips to true or is dropped.
    pub fn spawn_eviction(self: &Arc<Self>, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        let pool = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(pool.config.eviction_interval);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let evicted = pool.evict_expired().await;
                        if evicted > 0 {
                            debug!(evicted, "evicted idle scanner adapter clients");
                        }
                    }
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            info!("client pool eviction stopped");
                            return;
                        }
                    }
                }
            }
        })
    }
}

#[async_trait::async_trait]
impl ClientPool for HttpClientPool {
    async fn get(
        &self,
        endpoint: &AdapterEndpoint,
    ) -> Result<Arc<dyn AdapterClient>, AdapterClientError> {
        if let Some(pooled) = self.clients.read().await.get(endpoint) {
            self.touch(pooled);
            return Ok(pooled.client.clone());
        }

        let mut clients = self.clients.write().await;
        if let Some(pooled) = clients.get(endpoint) {
            self.touch(pooled);
            return Ok(pooled.client.clone());
        }

        let client = Arc::new(HttpAdapterClient::new(endpoint, self.config.request_timeout)?);
        clients.insert(
            endpoint.clone(),
            Arc::new(PooledClient {
                client: client.clone(),
                last_access: AtomicU64::new(self.now_millis()),
            }),
        );
        debug!(url = %endpoint.url, "created scanner adapter client");
        Ok(client)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::registration::{AccessCredential, AuthType};
    use serial_test::serial;

    fn endpoint(url: &str, credential: &str) -> AdapterEndpoint {
        AdapterEndpoint {
            url: url.to_string(),
            auth: AuthType::Bearer,
            credential: Some(AccessCredential(credential.to_string())),
            skip_cert_verify: false,
        }
    }

    fn short_lived() -> PoolConfig {
        PoolConfig {
            eviction_interval: Duration::from_secs(1),
            expiration: Duration::from_secs(5),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn the_same_endpoint_shares_one_client() {
        let pool = HttpClientPool::new(PoolConfig::default());

        let a = pool.get(&endpoint("http://a", "t1")).await.unwrap();
        let b = pool.get(&endpoint("http://a", "t1")).await.unwrap();
        pool.get(&endpoint("http://a", "t2")).await.unwrap();

        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(pool.len().await, 2);
    }

    #[tokio::test]
    async fn concurrent_misses_construct_one_client() {
        let pool = Arc::new(HttpClientPool::new(PoolConfig::default()));

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let pool = pool.clone();
                tokio::spawn(async move { pool.get(&endpoint("http://a", "t1")).await.unwrap() })
            })
            .collect();
        let clients = futures::future::try_join_all(handles).await.unwrap();

        assert!(clients.windows(2).all(|w| Arc::ptr_eq(&w[0], &w[1])));
        assert_eq!(pool.len().await, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn idle_clients_are_evicted_and_used_ones_kept() {
        let pool = HttpClientPool::new(short_lived());
        pool.get(&endpoint("http://idle", "t")).await.unwrap();
        pool.get(&endpoint("http://busy", "t")).await.unwrap();

        tokio::time::advance(Duration::from_secs(4)).await;
        pool.get(&endpoint("http://busy", "t")).await.unwrap();
        tokio::time::advance(Duration::from_secs(2)).await;

        assert_eq!(pool.evict_expired().await, 1);
        assert_eq!(pool.len().await, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn the_eviction_task_runs_until_shutdown() {
        let pool = Arc::new(HttpClientPool::new(short_lived()));
        pool.get(&endpoint("http://idle", "t")).await.unwrap();
        let (shutdown, receiver) = watch::channel(false);
        let task = pool.spawn_eviction(receiver);

        tokio::time::sleep(Duration::from_secs(7)).await;
        assert!(pool.is_empty().await);

        shutdown.send(true).unwrap();
        task.await.unwrap();
    }

    #[tokio::test]
    #[serial]
    async fn the_shared_pool_is_a_single_instance() {
        let a = HttpClientPool::shared();
        let b = HttpClientPool::shared();

        assert!(Arc::ptr_eq(&a, &b));
    }
}
