use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::api::{ApiClient, ApiError};
use crate::models::Interview;

/// An entity type that can be served from the stale-while-revalidate cache.
pub trait CachedEntity: DeserializeOwned + Clone + Send + Sync + 'static {
    /// Partial data a caller may already hold for an entity.
    type Seed: Send;

    /// Collection path segment, fetched as `GET /<RESOURCE>/{id}`.
    const RESOURCE: &'static str;

    fn id(&self) -> i64;

    /// Synthesize a complete record, defaulting whatever the seed lacks.
    fn from_seed(id: i64, seed: Self::Seed) -> Self;
}

#[derive(Debug, Clone)]
pub struct CacheEntry<T> {
    pub value: T,
    pub fetched_at: DateTime<Utc>,
}

impl<T> CacheEntry<T> {
    pub fn new(value: T) -> Self {
        Self {
            value,
            fetched_at: Utc::now(),
        }
    }

    pub fn age_minutes(&self) -> i64 {
        (Utc::now() - self.fetched_at).num_minutes()
    }

    pub fn age_display(&self) -> String {
        let minutes = self.age_minutes();
        if minutes < 1 {
            "just now".to_string()
        } else if minutes < 60 {
            format!("{}m ago", minutes)
        } else if minutes < 1440 {
            format!("{}h ago", minutes / 60)
        } else {
            format!("{}d ago", minutes / 1440)
        }
    }
}

/// Process-wide stale-while-revalidate cache for one entity type.
///
/// Entries are overwritten by every successful fetch and never evicted.
/// Clones share the same map.
pub struct EntityCache<T: CachedEntity> {
    api: ApiClient,
    entries: Arc<RwLock<HashMap<i64, CacheEntry<T>>>>,
    _entity: PhantomData<fn() -> T>,
}

pub type InterviewCache = EntityCache<Interview>;

impl<T: CachedEntity> Clone for EntityCache<T> {
    fn clone(&self) -> Self {
        Self {
            api: self.api.clone(),
            entries: self.entries.clone(),
            _entity: PhantomData,
        }
    }
}

impl<T: CachedEntity> EntityCache<T> {
    pub fn new(api: ApiClient) -> Self {
        Self {
            api,
            entries: Arc::new(RwLock::new(HashMap::new())),
            _entity: PhantomData,
        }
    }

    /// Deliver what is available now, then deliver the server's copy.
    ///
    /// With a seed, a record synthesized from it is delivered before any
    /// network activity; otherwise a cached entry is delivered if present.
    /// Both happen on the first poll, before the fetch suspends. The fresh
    /// value then replaces the cache entry and is delivered again. A failed
    /// fetch is returned and leaves the existing entry in place.
    pub async fn fetch_with_cache<F>(
        &self,
        id: i64,
        seed: Option<T::Seed>,
        mut on_data: F,
    ) -> Result<(), ApiError>
    where
        F: FnMut(T),
    {
        self.deliver_current(id, seed, &mut on_data);
        let fresh = self.revalidate(id).await?;
        on_data(fresh);
        Ok(())
    }

    /// Run [`fetch_with_cache`](Self::fetch_with_cache) in the background.
    ///
    /// The seed or cached delivery still happens before this returns. Fetch
    /// failures are logged and reported through the join handle.
    pub fn spawn_fetch<F>(
        &self,
        id: i64,
        seed: Option<T::Seed>,
        mut on_data: F,
    ) -> JoinHandle<Result<(), ApiError>>
    where
        F: FnMut(T) + Send + 'static,
    {
        self.deliver_current(id, seed, &mut on_data);

        let cache = self.clone();
        tokio::spawn(async move {
            let result = cache.revalidate(id).await.map(on_data);
            if let Err(ref e) = result {
                warn!(resource = T::RESOURCE, id, error = %e, "Background fetch failed");
            }
            result
        })
    }

    /// Fetch the entity and store it under `id`, returning the fresh value.
    pub async fn revalidate(&self, id: i64) -> Result<T, ApiError> {
        let fresh = self.fetch(id).await?;
        if fresh.id() != id {
            debug!(
                resource = T::RESOURCE,
                id,
                body_id = fresh.id(),
                "Response id differs from requested id"
            );
        }
        self.insert_at(id, fresh.clone());
        Ok(fresh)
    }

    /// Seed-synthesized record if a seed was given, else the cached entry.
    fn deliver_current<F>(&self, id: i64, seed: Option<T::Seed>, on_data: &mut F)
    where
        F: FnMut(T),
    {
        match seed {
            Some(seed) => on_data(T::from_seed(id, seed)),
            None => {
                if let Some(cached) = self.get(id) {
                    debug!(resource = T::RESOURCE, id, "Serving cached entry");
                    on_data(cached);
                }
            }
        }
    }

    async fn fetch(&self, id: i64) -> Result<T, ApiError> {
        self.api
            .get_json(&format!("/{}/{}", T::RESOURCE, id))
            .await
    }

    /// Cached value for `id`, without touching the network.
    pub fn get(&self, id: i64) -> Option<T> {
        self.entry(id).map(|entry| entry.value)
    }

    pub fn entry(&self, id: i64) -> Option<CacheEntry<T>> {
        self.entries
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(&id)
            .cloned()
    }

    /// Store a value under its own id, replacing any previous entry.
    pub fn insert(&self, value: T) {
        self.insert_at(value.id(), value);
    }

    /// Store a value under `id`, replacing any previous entry.
    pub fn insert_at(&self, id: i64, value: T) {
        self.entries
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(id, CacheEntry::new(value));
    }

    pub fn len(&self) -> usize {
        self.entries.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.entries.write().unwrap_or_else(|e| e.into_inner()).clear();
    }
}

// ============================================================================
// Tests
// ============================================================================
