//! The blob-cache engine and its lifecycle state machine.

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::oneshot;
use vaultcache_core::{
    CacheElement, CacheError, CacheKey, CacheMetrics, CacheOperation, Clock, NoopMetrics, Result,
    SystemClock, NEVER_EXPIRE,
};
use vaultcache_storage::{Cipher, NoopCipher, StorageDriver, StorageLocation};

use crate::fetch::FetchCoalescer;
use crate::queue::{OperationQueue, PendingKind, PendingOp, PendingOutcome, QueueConfig, Scheduler};

const OPEN: u8 = 0;
const SHUTTING_DOWN: u8 = 1;
const CLOSED: u8 = 2;

/// Parameters for [`Engine::open`]/[`Engine::open_in_memory`].
pub struct EngineConfig {
    pub cipher: Arc<dyn Cipher>,
    pub clock: Arc<dyn Clock>,
    pub metrics: Arc<dyn CacheMetrics>,
    pub queue: QueueConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            cipher: Arc::new(NoopCipher),
            clock: Arc::new(SystemClock),
            metrics: Arc::new(NoopMetrics),
            queue: QueueConfig::default(),
        }
    }
}

impl EngineConfig {
    pub fn with_cipher(mut self, cipher: Arc<dyn Cipher>) -> Self {
        self.cipher = cipher;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<dyn CacheMetrics>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn with_queue(mut self, queue: QueueConfig) -> Self {
        self.queue = queue;
        self
    }
}

/// Asynchronous, persistent key-to-byte-string blob cache. Cloning is
/// cheap: every clone shares the same writer thread and queue.
#[derive(Clone)]
pub struct Engine {
    queue: Arc<OperationQueue>,
    scheduler: Arc<Scheduler>,
    storage: Arc<StorageDriver>,
    clock: Arc<dyn Clock>,
    metrics: Arc<dyn CacheMetrics>,
    state: Arc<AtomicU8>,
    fetches: FetchCoalescer,
}

impl Engine {
    pub fn open(path: impl AsRef<Path>, config: EngineConfig) -> Result<Self> {
        let storage = Arc::new(StorageDriver::open(
            StorageLocation::Path(path.as_ref().to_path_buf()),
            config.cipher,
            config.clock.clone(),
        )?);
        Ok(Self::from_storage(
            storage,
            config.clock,
            config.metrics,
            config.queue,
        ))
    }

    pub fn open_in_memory(config: EngineConfig) -> Result<Self> {
        let storage = Arc::new(StorageDriver::open(
            StorageLocation::Memory,
            config.cipher,
            config.clock.clone(),
        )?);
        Ok(Self::from_storage(
            storage,
            config.clock,
            config.metrics,
            config.queue,
        ))
    }

    fn from_storage(
        storage: Arc<StorageDriver>,
        clock: Arc<dyn Clock>,
        metrics: Arc<dyn CacheMetrics>,
        queue_config: QueueConfig,
    ) -> Self {
        let queue = Arc::new(OperationQueue::with_soft_limit(queue_config.max_queue_depth));
        let scheduler = Arc::new(Scheduler::spawn(
            queue.clone(),
            storage.clone(),
            metrics.clone(),
            queue_config,
        ));
        Self {
            queue,
            scheduler,
            storage,
            clock,
            metrics,
            state: Arc::new(AtomicU8::new(OPEN)),
            fetches: FetchCoalescer::new(),
        }
    }

    pub(crate) fn clock_now(&self) -> i64 {
        self.clock.now()
    }

    pub(crate) fn metrics(&self) -> &Arc<dyn CacheMetrics> {
        &self.metrics
    }

    /// Shared single-flight map for [`crate::ObjectCache::get_or_fetch_object`]
    /// and [`crate::ObjectCache::get_and_fetch_latest`]. Scoped to this
    /// engine instance.
    pub(crate) fn fetches(&self) -> &FetchCoalescer {
        &self.fetches
    }

    fn check_open(&self) -> Result<()> {
        if self.state.load(Ordering::SeqCst) != OPEN {
            return Err(CacheError::Disposed);
        }
        Ok(())
    }

    pub(crate) async fn submit(&self, kind: PendingKind) -> Result<PendingOutcome> {
        self.check_open()?;
        let (tx, rx) = oneshot::channel();
        self.queue.push(PendingOp { kind, sink: tx });
        rx.await.map_err(|_| CacheError::Disposed)?
    }

    async fn timed<T>(
        &self,
        op: CacheOperation,
        fut: impl std::future::Future<Output = Result<T>>,
    ) -> Result<T> {
        let start = Instant::now();
        let out = fut.await;
        self.metrics.record_latency(op, start.elapsed());
        out
    }

    /// Stores `value` under `key`, replacing any existing row. `expiration`
    /// defaults to the never-expire sentinel.
    pub async fn insert(
        &self,
        key: impl CacheKey,
        value: Vec<u8>,
        expiration: Option<i64>,
    ) -> Result<()> {
        self.timed(CacheOperation::Insert, async {
            let key = key.full_key();
            if key.is_empty() {
                return Err(CacheError::ArgumentNull("key".into()));
            }
            let now = self.clock.now();
            let el = CacheElement::new(key, value, now)
                .with_expiration(expiration.unwrap_or(NEVER_EXPIRE));
            self.submit(PendingKind::Insert(vec![el])).await?;
            Ok(())
        })
        .await
    }

    /// Bulk form of [`Engine::insert`]: a single `BulkInsert` for the whole
    /// map.
    pub async fn insert_many(
        &self,
        entries: HashMap<String, Vec<u8>>,
        expiration: Option<i64>,
    ) -> Result<()> {
        self.timed(CacheOperation::Insert, async {
            if entries.is_empty() {
                return Ok(());
            }
            let now = self.clock.now();
            let exp = expiration.unwrap_or(NEVER_EXPIRE);
            let mut rows = Vec::with_capacity(entries.len());
            for (key, value) in entries {
                if key.is_empty() {
                    return Err(CacheError::ArgumentNull("key".into()));
                }
                rows.push(CacheElement::new(key, value, now).with_expiration(exp));
            }
            self.submit(PendingKind::Insert(rows)).await?;
            Ok(())
        })
        .await
    }

    /// Fails with `KeyNotFound` if `key` is absent or expired.
    pub async fn get(&self, key: impl CacheKey) -> Result<Vec<u8>> {
        self.timed(CacheOperation::Get, async {
            let key = key.full_key();
            if key.is_empty() {
                return Err(CacheError::ArgumentNull("key".into()));
            }
            let rows = self.select_by_key(vec![key.clone()]).await?;
            match rows.into_iter().next() {
                Some(row) => {
                    self.metrics.record_hit(&key);
                    Ok(row.value)
                }
                None => {
                    self.metrics.record_miss(&key);
                    Err(CacheError::KeyNotFound(key))
                }
            }
        })
        .await
    }

    /// Missing or expired keys are simply absent from the returned map; no
    /// error.
    pub async fn get_many(&self, keys: Vec<String>) -> Result<HashMap<String, Vec<u8>>> {
        self.timed(CacheOperation::Get, async {
            if keys.is_empty() {
                return Ok(HashMap::new());
            }
            let rows = self.select_by_key(keys).await?;
            Ok(rows.into_iter().map(|r| (r.key, r.value)).collect())
        })
        .await
    }

    pub async fn get_created_at(&self, key: impl CacheKey) -> Result<Option<i64>> {
        let key = key.full_key();
        if key.is_empty() {
            return Err(CacheError::ArgumentNull("key".into()));
        }
        let rows = self.select_by_key(vec![key]).await?;
        Ok(rows.into_iter().next().map(|r| r.created_at))
    }

    pub async fn get_created_at_many(&self, keys: Vec<String>) -> Result<HashMap<String, i64>> {
        if keys.is_empty() {
            return Ok(HashMap::new());
        }
        let rows = self.select_by_key(keys).await?;
        Ok(rows.into_iter().map(|r| (r.key, r.created_at)).collect())
    }

    pub async fn get_all_keys(&self) -> Result<Vec<String>> {
        self.timed(CacheOperation::GetAllKeys, async {
            match self.submit(PendingKind::GetKeys).await? {
                PendingOutcome::Keys(keys) => Ok(keys),
                _ => unreachable!("GetKeys always yields PendingOutcome::Keys"),
            }
        })
        .await
    }

    pub async fn invalidate(&self, key: impl CacheKey) -> Result<()> {
        self.invalidate_many(vec![key.full_key()]).await
    }

    /// Idempotent: missing keys are silently ignored.
    pub async fn invalidate_many(&self, keys: Vec<String>) -> Result<()> {
        self.timed(CacheOperation::Invalidate, async {
            if keys.is_empty() {
                return Ok(());
            }
            self.submit(PendingKind::InvalidateByKey(keys)).await?;
            Ok(())
        })
        .await
    }

    pub async fn invalidate_all(&self) -> Result<()> {
        self.timed(CacheOperation::InvalidateAll, async {
            self.submit(PendingKind::InvalidateAll).await?;
            Ok(())
        })
        .await
    }

    /// Resolves after every operation enqueued before this call has been
    /// written.
    pub async fn flush(&self) -> Result<()> {
        self.check_open()?;
        let start = Instant::now();
        self.scheduler.flush().await?;
        self.metrics
            .record_latency(CacheOperation::Flush, start.elapsed());
        Ok(())
    }

    /// Deletes expired rows and compacts the backing file.
    pub async fn vacuum(&self) -> Result<()> {
        self.timed(CacheOperation::Vacuum, async {
            self.submit(PendingKind::Vacuum).await?;
            Ok(())
        })
        .await
    }

    /// Transitions `Open -> ShuttingDown -> Closed`. Idempotent; later
    /// callers observe the first call's outcome.
    pub async fn shutdown(&self) -> Result<()> {
        if self.state.swap(SHUTTING_DOWN, Ordering::SeqCst) != OPEN {
            return Ok(());
        }
        self.scheduler.shutdown().await?;
        self.storage.shutdown().await?;
        self.state.store(CLOSED, Ordering::SeqCst);
        Ok(())
    }

    pub(crate) async fn select_by_key(&self, keys: Vec<String>) -> Result<Vec<CacheElement>> {
        match self.submit(PendingKind::SelectByKey(keys)).await? {
            PendingOutcome::Rows(rows) => Ok(rows),
            _ => unreachable!("SelectByKey always yields PendingOutcome::Rows"),
        }
    }

    pub(crate) async fn select_by_type(&self, type_name: &str) -> Result<Vec<CacheElement>> {
        match self
            .submit(PendingKind::SelectByType(vec![type_name.to_string()]))
            .await?
        {
            PendingOutcome::Rows(rows) => Ok(rows),
            _ => unreachable!("SelectByType always yields PendingOutcome::Rows"),
        }
    }

    pub(crate) async fn invalidate_by_type(&self, type_name: &str) -> Result<()> {
        self.submit(PendingKind::InvalidateByType(vec![type_name.to_string()]))
            .await?;
        Ok(())
    }

    pub(crate) async fn insert_row(&self, row: CacheElement) -> Result<()> {
        self.submit(PendingKind::Insert(vec![row])).await?;
        Ok(())
    }

    pub(crate) async fn insert_rows(&self, rows: Vec<CacheElement>) -> Result<()> {
        if rows.is_empty() {
            return Ok(());
        }
        self.submit(PendingKind::Insert(rows)).await?;
        Ok(())
    }
}
