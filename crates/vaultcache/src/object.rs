//! The typed-object layer: wraps/unwraps arbitrary application values
//! as blobs tagged with a stable type name.

use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Instant;

use serde::de::DeserializeOwned;
use serde::Serialize;
use vaultcache_core::{
    CacheError, CacheKey, CacheObject, CacheOperation, JsonSerializer, Result, Serializer,
    NEVER_EXPIRE,
};

use crate::engine::Engine;

/// A view over an [`Engine`] that serializes/deserializes values of a given
/// wire format. Cheap to construct; holds only an `Arc` and a serializer
/// value (serializers are zero-sized by default).
#[derive(Clone)]
pub struct ObjectCache<S: Serializer = JsonSerializer> {
    engine: Engine,
    serializer: S,
}

impl ObjectCache<JsonSerializer> {
    pub fn new(engine: Engine) -> Self {
        Self::with_serializer(engine, JsonSerializer)
    }
}

impl<S: Serializer> ObjectCache<S> {
    pub fn with_serializer(engine: Engine, serializer: S) -> Self {
        Self { engine, serializer }
    }

    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    /// Serializes `value`, tags it with `T::TYPE_TAG`, and stores it under
    /// `key`.
    pub async fn insert_object<T: CacheObject + Serialize>(
        &self,
        key: impl CacheKey,
        value: &T,
        expiration: Option<i64>,
    ) -> Result<()> {
        let key = key.full_key();
        if key.is_empty() {
            return Err(CacheError::ArgumentNull("key".into()));
        }
        let bytes = self.serializer.serialize(value)?;
        let now = self.engine.clock_now();
        let row = vaultcache_core::CacheElement::new(key, bytes, now)
            .with_type_name(T::TYPE_TAG)
            .with_expiration(expiration.unwrap_or(NEVER_EXPIRE));
        self.engine.insert_row(row).await
    }

    /// Bulk form: one `BulkInsert` for the whole map.
    pub async fn insert_objects<T: CacheObject + Serialize>(
        &self,
        values: HashMap<String, T>,
        expiration: Option<i64>,
    ) -> Result<()> {
        if values.is_empty() {
            return Ok(());
        }
        let now = self.engine.clock_now();
        let exp = expiration.unwrap_or(NEVER_EXPIRE);
        let mut rows = Vec::with_capacity(values.len());
        for (key, value) in values {
            if key.is_empty() {
                return Err(CacheError::ArgumentNull("key".into()));
            }
            let bytes = self.serializer.serialize(&value)?;
            rows.push(
                vaultcache_core::CacheElement::new(key, bytes, now)
                    .with_type_name(T::TYPE_TAG)
                    .with_expiration(exp),
            );
        }
        self.engine.insert_rows(rows).await
    }

    /// `KeyNotFound` if absent/expired; `Deserialization` if the stored
    /// bytes don't decode as `T` (the `TypeName` column is not checked
    /// against `T::TYPE_TAG` — a mismatch surfaces as a decode failure).
    pub async fn get_object<T: CacheObject + DeserializeOwned>(
        &self,
        key: impl CacheKey,
    ) -> Result<T> {
        let bytes = self.engine.get(key).await?;
        self.serializer.deserialize(&bytes)
    }

    /// Rows that fail to deserialize are omitted, not fatal.
    pub async fn get_objects<T: CacheObject + DeserializeOwned>(
        &self,
        keys: Vec<String>,
    ) -> Result<HashMap<String, T>> {
        if keys.is_empty() {
            return Ok(HashMap::new());
        }
        let rows = self.engine.select_by_key(keys).await?;
        Ok(rows
            .into_iter()
            .filter_map(|row| {
                let value = self.serializer.deserialize(&row.value).ok()?;
                Some((row.key, value))
            })
            .collect())
    }

    /// All live instances of `T`, in unspecified order. Deserialization
    /// failures are dropped silently, as with [`ObjectCache::get_objects`].
    pub async fn get_all_objects<T: CacheObject + DeserializeOwned>(
        &self,
    ) -> Result<Vec<T>> {
        let rows = self.engine.select_by_type(T::TYPE_TAG).await?;
        Ok(rows
            .into_iter()
            .filter_map(|row| self.serializer.deserialize(&row.value).ok())
            .collect())
    }

    pub async fn invalidate_object<T: CacheObject>(&self, key: impl CacheKey) -> Result<()> {
        self.engine.invalidate(key).await
    }

    pub async fn invalidate_all_objects<T: CacheObject>(&self) -> Result<()> {
        self.engine.invalidate_by_type(T::TYPE_TAG).await
    }

    pub async fn get_object_created_at<T: CacheObject>(
        &self,
        key: impl CacheKey,
    ) -> Result<Option<i64>> {
        self.engine.get_created_at(key).await
    }

    pub async fn get_created_at(&self, keys: Vec<String>) -> Result<HashMap<String, i64>> {
        self.engine.get_created_at_many(keys).await
    }

    /// Get-or-fetch: returns the live cached value under `key` if one
    /// deserializes; otherwise runs `fetch` exactly once across any number
    /// of concurrent callers racing on `key`, stores the result, and
    /// delivers it to every waiter. If `fetch` fails, every waiter observes
    /// the same `Fetch` error and nothing is written.
    pub async fn get_or_fetch_object<T, F, Fut>(
        &self,
        key: impl CacheKey,
        fetch: F,
        expiration: Option<i64>,
    ) -> Result<T>
    where
        T: CacheObject + Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<T>>,
    {
        let key = key.full_key();
        if key.is_empty() {
            return Err(CacheError::ArgumentNull("key".into()));
        }
        let metrics = self.engine.metrics().clone();
        let start = Instant::now();
        if let Ok(cached) = self.get_object::<T>(key.clone()).await {
            metrics.record_latency(CacheOperation::Fetch, start.elapsed());
            return Ok(cached);
        }

        let dedup_key = format!("{}:{key}", T::TYPE_TAG);
        let serializer = self.serializer.clone();
        let engine = self.engine.clone();
        let insert_key = key.clone();

        let bytes = engine
            .fetches()
            .run(&dedup_key, move || async move {
                let value = fetch().await?;
                let bytes = serializer.serialize(&value)?;
                let now = engine.clock_now();
                let row = vaultcache_core::CacheElement::new(insert_key, bytes.clone(), now)
                    .with_type_name(T::TYPE_TAG)
                    .with_expiration(expiration.unwrap_or(NEVER_EXPIRE));
                // The fetched value is already in hand; a write failure here
                // is surfaced as a diagnostic only, not to waiters.
                if let Err(e) = engine.insert_row(row).await {
                    tracing::warn!(
                        error = %e,
                        "get_or_fetch_object: fetch succeeded but caching the result failed"
                    );
                }
                Ok(bytes)
            })
            .await?;

        metrics.record_latency(CacheOperation::Fetch, start.elapsed());
        self.serializer.deserialize(&bytes)
    }

    /// Get-and-fetch-latest: a two-emission stream. If a live cached value
    /// is present, it is emitted first. `fetch` then runs (subject to
    /// `should_fetch`, which receives `Some(CreatedAt)` when a cached row
    /// exists and `None` on a miss — a miss always triggers the fetch,
    /// regardless of what the predicate would do with a real timestamp)
    /// and its result, or error, is emitted second. On success the fetched
    /// value is stored under `key` unless `skip_cache_if` accepts the
    /// freshly fetched value (an escape hatch for callers who already
    /// cached the value through a different validation path). On failure,
    /// `key` is invalidated when `invalidate_on_error` is set.
    #[allow(clippy::too_many_arguments)]
    pub async fn get_and_fetch_latest<T, F, Fut>(
        &self,
        key: impl CacheKey,
        fetch: F,
        should_fetch: Option<impl Fn(Option<i64>) -> bool + Send + 'static>,
        skip_cache_if: Option<impl Fn(&T) -> bool + Send + 'static>,
        expiration: Option<i64>,
        invalidate_on_error: bool,
    ) -> Result<tokio_stream::wrappers::ReceiverStream<Result<T>>>
    where
        T: CacheObject + Serialize + DeserializeOwned + Send + 'static,
        F: FnOnce() -> Fut + Send + 'static,
        Fut: std::future::Future<Output = Result<T>> + Send + 'static,
    {
        let key = key.full_key();
        if key.is_empty() {
            return Err(CacheError::ArgumentNull("key".into()));
        }

        let (tx, rx) = tokio::sync::mpsc::channel(2);
        let engine = self.engine.clone();
        let serializer = self.serializer.clone();
        let metrics = self.engine.metrics().clone();
        let first_key = key.clone();

        tokio::spawn(async move {
            let lookup_start = Instant::now();
            let cached: Option<T> = match engine.select_by_key(vec![first_key.clone()]).await {
                Ok(rows) => rows.into_iter().next().and_then(|row| {
                    serializer
                        .deserialize::<T>(&row.value)
                        .ok()
                        .map(|value| (value, row.created_at))
                }),
                Err(_) => None,
            };

            let created_at = cached.as_ref().map(|(_, created_at)| *created_at);
            if cached.is_some() {
                metrics.record_hit(&first_key);
            } else {
                metrics.record_miss(&first_key);
            }
            if let Some((value, _)) = cached {
                if tx.send(Ok(value)).await.is_err() {
                    return;
                }
            }

            let should_run = match &should_fetch {
                Some(pred) => created_at.is_none() || pred(created_at),
                None => true,
            };
            if !should_run {
                metrics.record_latency(CacheOperation::Fetch, lookup_start.elapsed());
                return;
            }

            let fetch_start = Instant::now();
            match fetch().await {
                Ok(value) => {
                    let skip_insert = skip_cache_if
                        .as_ref()
                        .map(|pred| pred(&value))
                        .unwrap_or(false);
                    if !skip_insert {
                        if let Ok(bytes) = serializer.serialize(&value) {
                            let now = engine.clock_now();
                            let row = vaultcache_core::CacheElement::new(first_key, bytes, now)
                                .with_type_name(T::TYPE_TAG)
                                .with_expiration(expiration.unwrap_or(NEVER_EXPIRE));
                            if let Err(e) = engine.insert_row(row).await {
                                tracing::warn!(
                                    error = %e,
                                    "get_and_fetch_latest: refreshed value could not be cached"
                                );
                            }
                        }
                    }
                    metrics.record_latency(CacheOperation::Fetch, fetch_start.elapsed());
                    let _ = tx.send(Ok(value)).await;
                }
                Err(e) => {
                    if invalidate_on_error {
                        let _ = engine.invalidate(first_key).await;
                    }
                    metrics.record_latency(CacheOperation::Fetch, fetch_start.elapsed());
                    let _ = tx.send(Err(e)).await;
                }
            }
        });

        Ok(tokio_stream::wrappers::ReceiverStream::new(rx))
    }
}

/// A strongly typed handle bound to a single [`CacheObject`] type, for
/// callers who don't want to repeat the turbofish at every call site.
pub struct TypedObjectCache<T, S: Serializer = JsonSerializer> {
    inner: ObjectCache<S>,
    _marker: PhantomData<T>,
}

impl<T: CacheObject, S: Serializer> TypedObjectCache<T, S> {
    pub fn new(inner: ObjectCache<S>) -> Self {
        Self {
            inner,
            _marker: PhantomData,
        }
    }

    pub async fn insert(
        &self,
        key: impl CacheKey,
        value: &T,
        expiration: Option<i64>,
    ) -> Result<()>
    where
        T: Serialize,
    {
        self.inner.insert_object(key, value, expiration).await
    }

    pub async fn get(&self, key: impl CacheKey) -> Result<T>
    where
        T: DeserializeOwned,
    {
        self.inner.get_object(key).await
    }

    pub async fn get_all(&self) -> Result<Vec<T>>
    where
        T: DeserializeOwned,
    {
        self.inner.get_all_objects().await
    }

    pub async fn invalidate(&self, key: impl CacheKey) -> Result<()> {
        self.inner.invalidate_object::<T>(key).await
    }

    pub async fn invalidate_all(&self) -> Result<()> {
        self.inner.invalidate_all_objects::<T>().await
    }
}

/// Convenience so an [`Engine`] can hand out object caches without the
/// caller importing [`ObjectCache`] separately.
pub trait ObjectCacheExt {
    fn objects(&self) -> ObjectCache<JsonSerializer>;
}

impl ObjectCacheExt for Engine {
    fn objects(&self) -> ObjectCache<JsonSerializer> {
        ObjectCache::new(self.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::EngineConfig;
    use serde::Deserialize;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Widget {
        name: String,
    }

    impl CacheObject for Widget {
        const TYPE_TAG: &'static str = "widget";
    }

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Gadget {
        count: u32,
    }

    impl CacheObject for Gadget {
        const TYPE_TAG: &'static str = "gadget";
    }

    #[tokio::test]
    async fn insert_and_get_object_round_trips() {
        let engine = Engine::open_in_memory(EngineConfig::default()).unwrap();
        let objects = ObjectCache::new(engine);
        let widget = Widget { name: "foo".into() };
        objects.insert_object("k", &widget, None).await.unwrap();
        let got: Widget = objects.get_object("k").await.unwrap();
        assert_eq!(got, widget);
    }

    #[tokio::test]
    async fn get_object_on_missing_key_is_key_not_found() {
        let engine = Engine::open_in_memory(EngineConfig::default()).unwrap();
        let objects = ObjectCache::new(engine);
        let err = objects.get_object::<Widget>("missing").await.unwrap_err();
        assert!(matches!(err, CacheError::KeyNotFound(_)));
    }

    #[tokio::test]
    async fn invalidate_all_objects_only_affects_its_own_type() {
        let engine = Engine::open_in_memory(EngineConfig::default()).unwrap();
        let objects = ObjectCache::new(engine);
        objects
            .insert_object("w1", &Widget { name: "a".into() }, None)
            .await
            .unwrap();
        objects
            .insert_object("g1", &Gadget { count: 1 }, None)
            .await
            .unwrap();

        objects.invalidate_all_objects::<Widget>().await.unwrap();

        let widgets: Vec<Widget> = objects.get_all_objects().await.unwrap();
        assert!(widgets.is_empty());
        let gadgets: Vec<Gadget> = objects.get_all_objects().await.unwrap();
        assert_eq!(gadgets, vec![Gadget { count: 1 }]);
    }

    #[tokio::test]
    async fn get_objects_omits_rows_of_the_wrong_shape() {
        let engine = Engine::open_in_memory(EngineConfig::default()).unwrap();
        let objects = ObjectCache::new(engine.clone());
        objects
            .insert_object("w1", &Widget { name: "a".into() }, None)
            .await
            .unwrap();
        // Insert a row under the object layer's key that isn't valid JSON
        // for Widget: this simulates a foreign/corrupt payload.
        engine.insert("w2", b"not json".to_vec(), None).await.unwrap();

        let got: HashMap<String, Widget> = objects
            .get_objects(vec!["w1".into(), "w2".into()])
            .await
            .unwrap();
        assert_eq!(got.len(), 1);
        assert!(got.contains_key("w1"));
    }

    #[tokio::test]
    async fn get_or_fetch_returns_live_cached_value_without_fetching() {
        let engine = Engine::open_in_memory(EngineConfig::default()).unwrap();
        let objects = ObjectCache::new(engine);
        let widget = Widget { name: "cached".into() };
        objects.insert_object("k", &widget, None).await.unwrap();

        let got = objects
            .get_or_fetch_object("k", || async { panic!("fetch should not run on a hit") }, None)
            .await
            .unwrap();
        assert_eq!(got, widget);
    }

    #[tokio::test]
    async fn get_or_fetch_dedups_concurrent_misses() {
        use std::sync::atomic::{AtomicUsize, Ordering};

        let engine = Engine::open_in_memory(EngineConfig::default()).unwrap();
        let objects = Arc::new(ObjectCache::new(engine));
        let calls = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..10 {
            let objects = objects.clone();
            let calls = calls.clone();
            handles.push(tokio::spawn(async move {
                objects
                    .get_or_fetch_object::<Widget, _, _>(
                        "k",
                        move || async move {
                            calls.fetch_add(1, Ordering::SeqCst);
                            tokio::time::sleep(std::time::Duration::from_millis(50)).await;
                            Ok(Widget { name: "fetched".into() })
                        },
                        None,
                    )
                    .await
            }));
        }

        let mut results = Vec::new();
        for h in handles {
            results.push(h.await.unwrap().unwrap());
        }

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(results
            .iter()
            .all(|w| w == &Widget { name: "fetched".into() }));

        let stored: Widget = objects.get_object("k").await.unwrap();
        assert_eq!(stored, Widget { name: "fetched".into() });
    }

    #[tokio::test]
    async fn get_or_fetch_propagates_fetch_failure_without_caching() {
        let engine = Engine::open_in_memory(EngineConfig::default()).unwrap();
        let objects = ObjectCache::new(engine);

        let err = objects
            .get_or_fetch_object::<Widget, _, _>(
                "k",
                || async { Err(CacheError::Fetch("upstream down".into())) },
                None,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, CacheError::Fetch(_)));
        assert!(objects.get_object::<Widget>("k").await.is_err());
    }

    #[tokio::test]
    async fn get_and_fetch_latest_emits_cached_then_fetched() {
        use tokio_stream::StreamExt;

        let engine = Engine::open_in_memory(EngineConfig::default()).unwrap();
        let objects = ObjectCache::new(engine);
        let v1 = Widget { name: "v1".into() };
        objects.insert_object("K", &v1, None).await.unwrap();

        let v2 = Widget { name: "v2".into() };
        let v2_clone = v2.clone();
        let mut stream = objects
            .get_and_fetch_latest::<Widget, _, _>(
                "K",
                move || async move { Ok(v2_clone) },
                None::<fn(Option<i64>) -> bool>,
                None::<fn(&Widget) -> bool>,
                None,
                false,
            )
            .await
            .unwrap();

        let first = stream.next().await.unwrap().unwrap();
        assert_eq!(first, v1);
        let second = stream.next().await.unwrap().unwrap();
        assert_eq!(second, v2);
        assert!(stream.next().await.is_none());

        let latest: Widget = objects.get_object("K").await.unwrap();
        assert_eq!(latest, v2);
    }

    #[tokio::test]
    async fn get_and_fetch_latest_emits_only_fetched_value_on_miss() {
        use tokio_stream::StreamExt;

        let engine = Engine::open_in_memory(EngineConfig::default()).unwrap();
        let objects = ObjectCache::new(engine);
        let v = Widget { name: "only".into() };
        let v_clone = v.clone();

        let mut stream = objects
            .get_and_fetch_latest::<Widget, _, _>(
                "K",
                move || async move { Ok(v_clone) },
                None::<fn(Option<i64>) -> bool>,
                None::<fn(&Widget) -> bool>,
                None,
                false,
            )
            .await
            .unwrap();

        let only = stream.next().await.unwrap().unwrap();
        assert_eq!(only, v);
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn get_and_fetch_latest_always_fetches_on_a_miss_even_with_a_rejecting_predicate() {
        use tokio_stream::StreamExt;

        let engine = Engine::open_in_memory(EngineConfig::default()).unwrap();
        let objects = ObjectCache::new(engine);
        let v = Widget { name: "fetched".into() };
        let v_clone = v.clone();

        // A predicate that would reject any real timestamp must not be able
        // to suppress the fetch on a miss, where there is no CreatedAt at all.
        let mut stream = objects
            .get_and_fetch_latest::<Widget, _, _>(
                "K",
                move || async move { Ok(v_clone) },
                Some(|created_at: Option<i64>| created_at.is_some()),
                None::<fn(&Widget) -> bool>,
                None,
                false,
            )
            .await
            .unwrap();

        let only = stream.next().await.unwrap().unwrap();
        assert_eq!(only, v);
        assert!(stream.next().await.is_none());
    }

    #[derive(Default)]
    struct RecordingMetrics {
        hits: parking_lot::Mutex<Vec<String>>,
        misses: parking_lot::Mutex<Vec<String>>,
        fetch_latencies: parking_lot::Mutex<usize>,
    }

    impl vaultcache_core::CacheMetrics for RecordingMetrics {
        fn record_hit(&self, key: &str) {
            self.hits.lock().push(key.to_string());
        }
        fn record_miss(&self, key: &str) {
            self.misses.lock().push(key.to_string());
        }
        fn record_latency(&self, operation: CacheOperation, _duration: std::time::Duration) {
            if operation == CacheOperation::Fetch {
                *self.fetch_latencies.lock() += 1;
            }
        }
    }

    #[tokio::test]
    async fn get_or_fetch_object_records_fetch_latency_on_a_miss() {
        let metrics = Arc::new(RecordingMetrics::default());
        let engine = Engine::open_in_memory(EngineConfig::default().with_metrics(metrics.clone()))
            .unwrap();
        let objects = ObjectCache::new(engine);
        let v = Widget {
            name: "fetched".into(),
        };
        let v_clone = v.clone();

        let got = objects
            .get_or_fetch_object::<Widget, _, _>("K", move || async move { Ok(v_clone) }, None)
            .await
            .unwrap();

        assert_eq!(got, v);
        assert_eq!(*metrics.fetch_latencies.lock(), 1);
    }

    #[tokio::test]
    async fn get_and_fetch_latest_records_hit_or_miss_and_fetch_latency() {
        use tokio_stream::StreamExt;

        let metrics = Arc::new(RecordingMetrics::default());
        let engine = Engine::open_in_memory(EngineConfig::default().with_metrics(metrics.clone()))
            .unwrap();
        let objects = ObjectCache::new(engine);
        let v = Widget {
            name: "fetched".into(),
        };
        let v_clone = v.clone();

        let mut stream = objects
            .get_and_fetch_latest::<Widget, _, _>(
                "K",
                move || async move { Ok(v_clone) },
                None::<fn(Option<i64>) -> bool>,
                None::<fn(&Widget) -> bool>,
                None,
                false,
            )
            .await
            .unwrap();

        let only = stream.next().await.unwrap().unwrap();
        assert_eq!(only, v);
        assert!(stream.next().await.is_none());

        assert_eq!(metrics.misses.lock().as_slice(), ["K"]);
        assert!(metrics.hits.lock().is_empty());
        assert_eq!(*metrics.fetch_latencies.lock(), 1);
    }
}
