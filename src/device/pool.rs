//! Device connection pool
//!
//! Owns at most one live connection per distinct target. Connections are
//! established lazily under a per-target mutex, so concurrent callers for
//! the same device share a single in-flight connect instead of storming it.
//! A failed operation tears the connection down so the next call starts
//! fresh; a background sweeper evicts connections idle beyond a TTL.

use std::future::Future;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::{Duration, Instant};

use dashmap::DashMap;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::{DeviceClient, DeviceError, DeviceTarget};
use crate::shared::ShutdownSignal;

struct PoolEntry {
    target: DeviceTarget,
    /// Slot for the live client. The mutex also serializes connection
    /// establishment for this target.
    client: Mutex<Option<Arc<DeviceClient>>>,
    last_used: StdMutex<Instant>,
}

impl PoolEntry {
    fn touch(&self) {
        *self.last_used.lock().unwrap_or_else(|e| e.into_inner()) = Instant::now();
    }

    fn idle_for(&self) -> Duration {
        self.last_used
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .elapsed()
    }
}

pub struct DevicePool {
    entries: DashMap<String, Arc<PoolEntry>>,
    connect_timeout: Duration,
    call_timeout: Duration,
    idle_ttl: Duration,
    sweep_interval: Duration,
}

impl DevicePool {
    pub fn new(
        connect_timeout: Duration,
        call_timeout: Duration,
        idle_ttl: Duration,
        sweep_interval: Duration,
    ) -> Self {
        Self {
            entries: DashMap::new(),
            connect_timeout,
            call_timeout,
            idle_ttl,
            sweep_interval,
        }
    }

    pub fn size(&self) -> usize {
        self.entries.len()
    }

    /// Run `operation` against a live connection to `target`, establishing
    /// one if needed. Any error from the operation marks the connection
    /// unhealthy and disconnects it, so a poisoned handle is never reused.
    pub async fn with_connection<T, E, F, Fut>(
        &self,
        target: &DeviceTarget,
        operation: F,
    ) -> Result<T, E>
    where
        E: From<DeviceError>,
        F: FnOnce(Arc<DeviceClient>) -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let entry = self
            .entries
            .entry(target.key())
            .or_insert_with(|| {
                Arc::new(PoolEntry {
                    target: target.clone(),
                    client: Mutex::new(None),
                    last_used: StdMutex::new(Instant::now()),
                })
            })
            .clone();
        entry.touch();

        let client = {
            let mut slot = entry.client.lock().await;
            match slot.as_ref() {
                Some(client) if !client.is_closed() => client.clone(),
                _ => {
                    let client = Arc::new(
                        DeviceClient::connect(
                            &entry.target,
                            self.connect_timeout,
                            self.call_timeout,
                        )
                        .await
                        .map_err(E::from)?,
                    );
                    *slot = Some(client.clone());
                    client
                }
            }
        };

        match operation(client).await {
            Ok(value) => {
                entry.touch();
                Ok(value)
            }
            Err(e) => {
                let mut slot = entry.client.lock().await;
                if let Some(client) = slot.take() {
                    client.disconnect();
                }
                Err(e)
            }
        }
    }

    /// Start the idle-eviction sweep (teacher-style background task).
    pub fn start_sweeper(self: &Arc<Self>, shutdown: ShutdownSignal) {
        let pool = Arc::clone(self);
        tokio::spawn(async move {
            info!(
                interval_secs = pool.sweep_interval.as_secs(),
                idle_ttl_secs = pool.idle_ttl.as_secs(),
                "Device pool sweeper started"
            );
            let mut interval = tokio::time::interval(pool.sweep_interval);
            interval.tick().await; // first tick fires immediately; skip it

            loop {
                tokio::select! {
                    _ = interval.tick() => pool.sweep().await,
                    _ = shutdown.wait() => {
                        debug!("Device pool sweeper shutting down");
                        break;
                    }
                }
            }
        });
    }

    async fn sweep(&self) {
        let stale: Vec<(String, Arc<PoolEntry>)> = self
            .entries
            .iter()
            .filter(|e| e.value().idle_for() > self.idle_ttl)
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect();

        for (key, entry) in stale {
            let mut slot = entry.client.lock().await;
            if let Some(client) = slot.take() {
                client.disconnect();
            }
            drop(slot);
            self.entries.remove(&key);
            warn!(endpoint = %entry.target.endpoint, "Evicted idle switcher connection");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ErrorKind;

    fn pool() -> DevicePool {
        DevicePool::new(
            Duration::from_millis(200),
            Duration::from_millis(200),
            Duration::from_secs(1800),
            Duration::from_secs(600),
        )
    }

    #[test]
    fn test_target_key_includes_credential() {
        let a = DeviceTarget {
            endpoint: "ws://h:4455".into(),
            password: "x".into(),
        };
        let b = DeviceTarget {
            endpoint: "ws://h:4455".into(),
            password: "y".into(),
        };
        assert_ne!(a.key(), b.key());
        assert_eq!(a.key(), a.clone().key());
    }

    #[tokio::test]
    async fn test_unreachable_target_fails_within_bound() {
        let pool = pool();
        let target = DeviceTarget {
            // Reserved TEST-NET address: nothing listens there.
            endpoint: "ws://192.0.2.1:4455".into(),
            password: String::new(),
        };

        let started = Instant::now();
        let result: Result<(), ErrorKind> = pool
            .with_connection(&target, |_client| async { Ok::<(), ErrorKind>(()) })
            .await;
        assert!(result.is_err());
        // Bounded by the connect timeout, not a TCP stack default.
        assert!(started.elapsed() < Duration::from_secs(2));

        // The entry exists (for reuse) but holds no live client.
        assert_eq!(pool.size(), 1);
    }
}
