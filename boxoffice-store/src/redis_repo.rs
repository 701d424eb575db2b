use async_trait::async_trait;
use boxoffice_core::{EventRepository, StoreResult, UserRepository};
use boxoffice_shared::{Event, User};
use redis::{AsyncCommands, RedisResult};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;

const USER_TTL_SECS: u64 = 60 * 60;
const EVENT_TTL_SECS: u64 = 2 * 60 * 60;
const EVENT_LIST_TTL_SECS: u64 = 60 * 60;
const EVENT_LIST_KEY: &str = "events:all";

#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),
    #[error("Cache encoding error: {0}")]
    Encode(#[from] serde_json::Error),
}

#[derive(Clone)]
pub struct RedisClient {
    client: redis::Client,
}

impl RedisClient {
    pub async fn new(connection_string: &str) -> Result<Self, redis::RedisError> {
        let client = redis::Client::open(connection_string)?;
        Ok(Self { client })
    }

    pub async fn ping(&self) -> RedisResult<()> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        redis::cmd("PING").query_async::<String>(&mut conn).await?;
        Ok(())
    }

    /// `Ok(None)` on a miss or an entry that no longer deserializes.
    pub async fn get_json<T: DeserializeOwned>(&self, key: &str) -> RedisResult<Option<T>> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let raw: Option<String> = conn.get(key).await?;
        Ok(raw.and_then(|json| match serde_json::from_str(&json) {
            Ok(value) => Some(value),
            Err(e) => {
                warn!(key, error = %e, "Discarding undecodable cache entry");
                None
            }
        }))
    }

    pub async fn set_json<T: Serialize>(
        &self,
        key: &str,
        value: &T,
        ttl_seconds: u64,
    ) -> Result<(), CacheError> {
        let json = serde_json::to_string(value)?;
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        conn.set_ex::<_, _, ()>(key, json, ttl_seconds).await?;
        Ok(())
    }

    pub async fn del(&self, key: &str) -> RedisResult<()> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        conn.del::<_, ()>(key).await
    }
}

fn user_key(id: Uuid) -> String {
    format!("user:{}", id)
}

fn user_email_key(email: &str) -> String {
    format!("user:email:{}", email)
}

fn event_key(id: Uuid) -> String {
    format!("event:{}", id)
}

/// Look-aside cache in front of a user repository. Cache errors are logged
/// and the inner repository answers.
pub struct CachedUserRepository {
    inner: Arc<dyn UserRepository>,
    cache: RedisClient,
}

impl CachedUserRepository {
    pub fn new(inner: Arc<dyn UserRepository>, cache: RedisClient) -> Self {
        Self { inner, cache }
    }

    async fn remember(&self, user: &User) {
        if let Err(e) = self.cache.set_json(&user_key(user.id), user, USER_TTL_SECS).await {
            warn!(user_id = %user.id, error = %e, "Failed to cache user");
        }
        if let Err(e) = self
            .cache
            .set_json(&user_email_key(user.email.expose()), &user.id, USER_TTL_SECS)
            .await
        {
            warn!(user_id = %user.id, error = %e, "Failed to cache user email index");
        }
    }
}

#[async_trait]
impl UserRepository for CachedUserRepository {
    async fn create(&self, user: &User) -> StoreResult<()> {
        self.inner.create(user).await?;
        self.remember(user).await;
        Ok(())
    }

    async fn get_by_id(&self, id: Uuid) -> StoreResult<User> {
        match self.cache.get_json::<User>(&user_key(id)).await {
            Ok(Some(user)) => {
                debug!(user_id = %id, "User cache hit");
                return Ok(user);
            }
            Ok(None) => {}
            Err(e) => warn!(user_id = %id, error = %e, "User cache read failed"),
        }

        let user = self.inner.get_by_id(id).await?;
        self.remember(&user).await;
        Ok(user)
    }

    async fn get_by_email(&self, email: &str) -> StoreResult<User> {
        match self.cache.get_json::<Uuid>(&user_email_key(email)).await {
            Ok(Some(id)) => return self.get_by_id(id).await,
            Ok(None) => {}
            Err(e) => warn!(error = %e, "User email cache read failed"),
        }

        let user = self.inner.get_by_email(email).await?;
        self.remember(&user).await;
        Ok(user)
    }
}

/// Look-aside cache in front of an event repository, including the full
/// event listing.
pub struct CachedEventRepository {
    inner: Arc<dyn EventRepository>,
    cache: RedisClient,
}

impl CachedEventRepository {
    pub fn new(inner: Arc<dyn EventRepository>, cache: RedisClient) -> Self {
        Self { inner, cache }
    }
}

#[async_trait]
impl EventRepository for CachedEventRepository {
    async fn create(&self, event: &Event) -> StoreResult<()> {
        self.inner.create(event).await?;
        if let Err(e) = self.cache.set_json(&event_key(event.id), event, EVENT_TTL_SECS).await {
            warn!(event_id = %event.id, error = %e, "Failed to cache event");
        }
        if let Err(e) = self.cache.del(EVENT_LIST_KEY).await {
            warn!(error = %e, "Failed to invalidate event listing");
        }
        Ok(())
    }

    async fn get_by_id(&self, id: Uuid) -> StoreResult<Event> {
        match self.cache.get_json::<Event>(&event_key(id)).await {
            Ok(Some(event)) => {
                debug!(event_id = %id, "Event cache hit");
                return Ok(event);
            }
            Ok(None) => {}
            Err(e) => warn!(event_id = %id, error = %e, "Event cache read failed"),
        }

        let event = self.inner.get_by_id(id).await?;
        if let Err(e) = self.cache.set_json(&event_key(id), &event, EVENT_TTL_SECS).await {
            warn!(event_id = %id, error = %e, "Failed to cache event");
        }
        Ok(event)
    }

    async fn list(&self) -> StoreResult<Vec<Event>> {
        match self.cache.get_json::<Vec<Event>>(EVENT_LIST_KEY).await {
            Ok(Some(events)) => return Ok(events),
            Ok(None) => {}
            Err(e) => warn!(error = %e, "Event listing cache read failed"),
        }

        let events = self.inner.list().await?;
        if let Err(e) = self.cache.set_json(EVENT_LIST_KEY, &events, EVENT_LIST_TTL_SECS).await {
            warn!(error = %e, "Failed to cache event listing");
        }
        Ok(events)
    }
}
