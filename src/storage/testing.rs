/// In-memory backend with failure and latency injection for tests.
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;

use super::StorageBackend;
use crate::addressing::StorageKey;
use crate::error::{Result, StorageError, WriteCause};

pub(crate) struct MemoryBackend {
    id: String,
    objects: Mutex<HashMap<String, Bytes>>,
    fail_on: Vec<String>,
    unhealthy: Option<String>,
    delay: Duration,
    health_delay: Duration,
    writes: AtomicUsize,
    health_checks: AtomicUsize,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
}

impl MemoryBackend {
    pub fn new(id: &str) -> Self {
        Self {
            id: id.to_string(),
            objects: Mutex::new(HashMap::new()),
            fail_on: Vec::new(),
            unhealthy: None,
            delay: Duration::ZERO,
            health_delay: Duration::ZERO,
            writes: AtomicUsize::new(0),
            health_checks: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            peak_in_flight: AtomicUsize::new(0),
        }
    }

    /// Fail every store whose key contains `fragment`.
    pub fn failing_on(mut self, fragment: &str) -> Self {
        self.fail_on.push(fragment.to_string());
        self
    }

    pub fn unhealthy(mut self, reason: &str) -> Self {
        self.unhealthy = Some(reason.to_string());
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn with_health_delay(mut self, delay: Duration) -> Self {
        self.health_delay = delay;
        self
    }

    /// Successful writes so far.
    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    pub fn health_checks(&self) -> usize {
        self.health_checks.load(Ordering::SeqCst)
    }

    pub fn peak_in_flight(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }

    pub fn stored_keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.objects.lock().unwrap().keys().cloned().collect();
        keys.sort();
        keys
    }

    async fn write(&self, key: &StorageKey, data: Bytes) -> Result<String> {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if self.fail_on.iter().any(|f| key.as_str().contains(f.as_str())) {
            return Err(StorageError::Write {
                backend: self.id.clone(),
                cause: WriteCause::Transient(format!("injected failure for {key}")),
            });
        }
        self.objects
            .lock()
            .unwrap()
            .insert(key.as_str().to_string(), data);
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(format!("mem://{}/{key}", self.id))
    }
}

#[async_trait]
impl StorageBackend for MemoryBackend {
    fn id(&self) -> &str {
        &self.id
    }

    async fn store(&self, key: &StorageKey, data: Bytes) -> Result<String> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_flight.fetch_max(now, Ordering::SeqCst);
        let result = self.write(key, data).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        result
    }

    async fn retrieve(&self, uri: &str) -> Result<Bytes> {
        let prefix = format!("mem://{}/", self.id);
        let key = uri
            .strip_prefix(prefix.as_str())
            .ok_or_else(|| StorageError::InvalidUri {
                backend: self.id.clone(),
                uri: uri.to_string(),
            })?;
        self.objects
            .lock()
            .unwrap()
            .get(key)
            .cloned()
            .ok_or_else(|| StorageError::NotFound {
                backend: self.id.clone(),
                uri: uri.to_string(),
            })
    }

    async fn health_check(&self) -> Result<()> {
        self.health_checks.fetch_add(1, Ordering::SeqCst);
        if !self.health_delay.is_zero() {
            tokio::time::sleep(self.health_delay).await;
        }
        match &self.unhealthy {
            Some(reason) => Err(StorageError::HealthCheck {
                backend: self.id.clone(),
                reason: reason.clone(),
            }),
            None => Ok(()),
        }
    }
}
