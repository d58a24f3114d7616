use std::collections::HashMap;
use std::hash::Hash;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use uuid::Uuid;

use taskflow_shared::{CustomFieldValue, Project, Task, UserProfile};

use crate::store::{EntityStore, StoreResult};

const DEFAULT_PURGE_THRESHOLD: usize = 1024;

/// In-process map with a per-entry expiry.
///
/// Reads are allowed to be stale for up to `ttl`; nothing here is a source of
/// truth, so a miss always falls through to the store. Once the map holds
/// `purge_threshold` entries, each insert first drops the expired ones.
pub struct TtlCache<K, V> {
    entries: RwLock<HashMap<K, (Instant, V)>>,
    ttl: Duration,
    purge_threshold: usize,
}

impl<K, V> TtlCache<K, V>
where
    K: Eq + Hash,
    V: Clone,
{
    pub fn new(ttl: Duration) -> Self {
        Self::with_purge_threshold(ttl, DEFAULT_PURGE_THRESHOLD)
    }

    pub fn with_purge_threshold(ttl: Duration, purge_threshold: usize) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            ttl,
            purge_threshold: purge_threshold.max(1),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Get a live entry; expired entries read as a miss
    pub async fn get(&self, key: &K) -> Option<V> {
        let entries = self.entries.read().await;
        match entries.get(key) {
            Some((expires_at, value)) if *expires_at > Instant::now() => Some(value.clone()),
            _ => None,
        }
    }

    pub async fn put(&self, key: K, value: V) {
        let now = Instant::now();
        let mut entries = self.entries.write().await;
        if entries.len() >= self.purge_threshold {
            entries.retain(|_, (expires_at, _)| *expires_at > now);
        }
        entries.insert(key, (now + self.ttl, value));
    }

    /// Returns true if an entry was removed
    pub async fn invalidate(&self, key: &K) -> bool {
        self.entries.write().await.remove(key).is_some()
    }

    pub async fn invalidate_all(&self) {
        self.entries.write().await.clear();
    }

    /// Drop expired entries. Returns how many were removed.
    pub async fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|_, (expires_at, _)| *expires_at > now);
        before - entries.len()
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

/// Key for the entity cache
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum EntityKey {
    Task(Uuid),
    Project(Uuid),
    User(Uuid),
    CustomFieldValue { field_id: Uuid, entity_id: Uuid },
}

#[derive(Debug, Clone)]
pub enum CachedEntity {
    Task(Task),
    Project(Project),
    User(UserProfile),
    CustomFieldValue(Option<CustomFieldValue>),
}

/// Memoized lookups of the entities actions and templates read.
///
/// Every lookup is load-through: a miss queries the store and populates the
/// cache. Store errors are returned to the caller, which decides how to degrade.
pub struct EntityCache {
    inner: TtlCache<EntityKey, CachedEntity>,
}

impl EntityCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            inner: TtlCache::new(ttl),
        }
    }

    pub async fn get(&self, key: &EntityKey) -> Option<CachedEntity> {
        self.inner.get(key).await
    }

    pub async fn put(&self, key: EntityKey, value: CachedEntity) {
        self.inner.put(key, value).await;
    }

    pub async fn invalidate(&self, key: &EntityKey) -> bool {
        self.inner.invalidate(key).await
    }

    pub async fn invalidate_all(&self) {
        self.inner.invalidate_all().await;
    }

    pub async fn task(&self, store: &dyn EntityStore, id: Uuid) -> StoreResult<Option<Task>> {
        let key = EntityKey::Task(id);
        if let Some(CachedEntity::Task(task)) = self.inner.get(&key).await {
            return Ok(Some(task));
        }

        let task = store.get_task(id).await?;
        if let Some(task) = &task {
            self.inner.put(key, CachedEntity::Task(task.clone())).await;
        }
        Ok(task)
    }

    pub async fn project(&self, store: &dyn EntityStore, id: Uuid) -> StoreResult<Option<Project>> {
        let key = EntityKey::Project(id);
        if let Some(CachedEntity::Project(project)) = self.inner.get(&key).await {
            return Ok(Some(project));
        }

        let project = store.get_project(id).await?;
        if let Some(project) = &project {
            self.inner.put(key, CachedEntity::Project(project.clone())).await;
        }
        Ok(project)
    }

    pub async fn user(&self, store: &dyn EntityStore, id: Uuid) -> StoreResult<Option<UserProfile>> {
        let key = EntityKey::User(id);
        if let Some(CachedEntity::User(user)) = self.inner.get(&key).await {
            return Ok(Some(user));
        }

        let user = store.get_user(id).await?;
        if let Some(user) = &user {
            self.inner.put(key, CachedEntity::User(user.clone())).await;
        }
        Ok(user)
    }

    /// Value lookup. Absent values are cached too so repeated templates
    /// referencing an unset field do not hit the store every time.
    pub async fn custom_field_value(
        &self,
        store: &dyn EntityStore,
        field_id: Uuid,
        entity_id: Uuid,
        entity_type: &str,
    ) -> StoreResult<Option<CustomFieldValue>> {
        let key = EntityKey::CustomFieldValue { field_id, entity_id };
        if let Some(CachedEntity::CustomFieldValue(value)) = self.inner.get(&key).await {
            return Ok(value);
        }

        let value = store
            .get_custom_field_value(field_id, entity_id, entity_type)
            .await?;
        self.inner
            .put(key, CachedEntity::CustomFieldValue(value.clone()))
            .await;
        Ok(value)
    }
}

/// Default TTL values in seconds
pub mod ttl {
    pub const ENTITY: u64 = 300; // 5 minutes
    pub const ACTIVE_WORKFLOWS: u64 = 300; // 5 minutes
}
