//! Durable storage for audit events.
//!
//! Retention is a standing storage policy: MongoDB removes records through a
//! TTL index on `timestamp`, and reads never return anything older than the
//! retention horizon even while the TTL monitor lags behind.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use futures::TryStreamExt;
use mongodb::{
    bson::{doc, DateTime as BsonDateTime, Document},
    error::ErrorKind,
    options::{FindOptions, IndexOptions},
    Client as MongoClient, Collection, Database, IndexModel,
};
use service_core::error::AppError;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc, Mutex,
};

use super::clock::{Clock, SystemClock};
use crate::models::{AuditEvent, AuditQuery};

pub const AUDIT_COLLECTION: &str = "audit_events";
const TTL_INDEX: &str = "timestamp_ttl_idx";
const INDEX_OPTIONS_CONFLICT: i32 = 85;

#[async_trait]
pub trait AuditStore: Send + Sync {
    /// Append one event. There is no update path.
    async fn insert(&self, event: &AuditEvent) -> Result<(), AppError>;
    /// Events matching `query`, newest first, within the retention horizon.
    async fn query(&self, query: &AuditQuery) -> Result<Vec<AuditEvent>, AppError>;
    async fn health_check(&self) -> Result<(), AppError>;
}

#[derive(Clone)]
pub struct MongoAuditStore {
    client: MongoClient,
    db: Database,
    retention: Duration,
    clock: Arc<dyn Clock>,
}

impl MongoAuditStore {
    pub async fn connect(uri: &str, database: &str, retention: Duration) -> Result<Self, AppError> {
        tracing::info!(database = %database, "Connecting to MongoDB");
        let client = MongoClient::with_uri_str(uri).await.map_err(|e| {
            tracing::error!("Failed to connect to MongoDB: {}", e);
            AppError::DatabaseError(anyhow::anyhow!(e.to_string()))
        })?;
        let db = client.database(database);
        tracing::info!(database = %database, "Successfully connected to MongoDB database");

        Ok(Self {
            client,
            db,
            retention,
            clock: Arc::new(SystemClock),
        })
    }

    pub fn events(&self) -> Collection<AuditEvent> {
        self.db.collection(AUDIT_COLLECTION)
    }

    pub async fn initialize_indexes(&self) -> Result<(), AppError> {
        tracing::info!("Creating MongoDB indexes for audit events");

        self.ensure_ttl_index().await?;

        let compound = [
            ("org_time_idx", doc! { "org_id": 1, "timestamp": -1 }),
            ("kind_time_idx", doc! { "kind": 1, "timestamp": -1 }),
            ("user_time_idx", doc! { "user_id": 1, "timestamp": -1 }),
        ];

        for (name, keys) in compound {
            let index = IndexModel::builder()
                .keys(keys)
                .options(IndexOptions::builder().name(name.to_string()).build())
                .build();

            self.events().create_index(index, None).await.map_err(|e| {
                tracing::error!("Failed to create {} index: {}", name, e);
                AppError::DatabaseError(anyhow::anyhow!(e.to_string()))
            })?;
        }

        tracing::info!("Successfully created all MongoDB indexes");
        Ok(())
    }

    async fn ensure_ttl_index(&self) -> Result<(), AppError> {
        let expire_after = self.retention.to_std().map_err(|e| {
            AppError::ConfigError(anyhow::anyhow!("Invalid audit retention: {}", e))
        })?;

        let ttl_index = IndexModel::builder()
            .keys(doc! { "timestamp": 1 })
            .options(
                IndexOptions::builder()
                    .name(TTL_INDEX.to_string())
                    .expire_after(expire_after)
                    .build(),
            )
            .build();

        match self.events().create_index(ttl_index, None).await {
            Ok(_) => Ok(()),
            Err(e) if is_index_options_conflict(&e) => {
                // Retention changed since the index was built: adjust it in place.
                tracing::info!(
                    retention_days = self.retention.num_days(),
                    "Updating audit TTL index expiry"
                );
                self.db
                    .run_command(
                        doc! {
                            "collMod": AUDIT_COLLECTION,
                            "index": {
                                "name": TTL_INDEX,
                                "expireAfterSeconds": expire_after.as_secs() as i64,
                            },
                        },
                        None,
                    )
                    .await
                    .map(|_| ())
                    .map_err(|e| {
                        tracing::error!("Failed to update TTL index: {}", e);
                        AppError::DatabaseError(anyhow::anyhow!(e.to_string()))
                    })
            }
            Err(e) => {
                tracing::error!("Failed to create TTL index: {}", e);
                Err(AppError::DatabaseError(anyhow::anyhow!(e.to_string())))
            }
        }
    }
}

fn is_index_options_conflict(err: &mongodb::error::Error) -> bool {
    matches!(*err.kind, ErrorKind::Command(ref c) if c.code == INDEX_OPTIONS_CONFLICT)
}

/// Oldest timestamp still inside the retention window. Saturates at the
/// earliest representable instant.
pub fn retention_horizon(now: DateTime<Utc>, retention: Duration) -> DateTime<Utc> {
    now.checked_sub_signed(retention)
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

/// Translate an [`AuditQuery`] into a MongoDB filter bounded below by `horizon`.
pub fn query_filter(query: &AuditQuery, horizon: DateTime<Utc>) -> Document {
    let mut filter = Document::new();

    if let Some(user_id) = &query.user_id {
        filter.insert("user_id", user_id.as_str());
    }
    if let Some(org_id) = &query.org_id {
        filter.insert("org_id", org_id.as_str());
    }
    if let Some(kind) = query.kind {
        filter.insert("kind", kind.as_str());
    }

    let lower = query.from.map_or(horizon, |from| from.max(horizon));
    let mut timestamp = doc! { "$gte": BsonDateTime::from_chrono(lower) };
    if let Some(to) = query.to {
        timestamp.insert("$lt", BsonDateTime::from_chrono(to));
    }
    filter.insert("timestamp", timestamp);

    filter
}

#[async_trait]
impl AuditStore for MongoAuditStore {
    async fn insert(&self, event: &AuditEvent) -> Result<(), AppError> {
        self.events().insert_one(event, None).await?;
        Ok(())
    }

    async fn query(&self, query: &AuditQuery) -> Result<Vec<AuditEvent>, AppError> {
        let horizon = retention_horizon(self.clock.now(), self.retention);
        let options = FindOptions::builder()
            .sort(doc! { "timestamp": -1 })
            .limit(query.effective_limit())
            .build();

        let cursor = self
            .events()
            .find(query_filter(query, horizon), options)
            .await
            .map_err(|e| {
                tracing::error!("Failed to query audit events: {}", e);
                AppError::DatabaseError(anyhow::anyhow!(e.to_string()))
            })?;

        cursor.try_collect().await.map_err(|e| {
            tracing::error!("Failed to read audit events: {}", e);
            AppError::DatabaseError(anyhow::anyhow!(e.to_string()))
        })
    }

    async fn health_check(&self) -> Result<(), AppError> {
        self.client
            .database("admin")
            .run_command(doc! { "ping": 1 }, None)
            .await
            .map_err(|e| {
                tracing::error!("MongoDB health check failed: {}", e);
                AppError::DatabaseError(anyhow::anyhow!(e.to_string()))
            })?;
        Ok(())
    }
}

/// Process-local audit store with the same retention contract, for tests and
/// local runs without MongoDB.
pub struct InMemoryAuditStore {
    events: Mutex<Vec<AuditEvent>>,
    retention: Duration,
    clock: Arc<dyn Clock>,
    unavailable: AtomicBool,
}

impl InMemoryAuditStore {
    pub fn new(retention: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            events: Mutex::new(Vec::new()),
            retention,
            clock,
            unavailable: AtomicBool::new(false),
        }
    }

    /// Make every subsequent operation fail as if storage were down.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    pub fn len(&self) -> usize {
        self.events.lock().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop records past the retention horizon, as the TTL monitor would.
    pub fn purge_expired(&self) -> Result<usize, AppError> {
        let horizon = retention_horizon(self.clock.now(), self.retention);
        let mut events = self.lock()?;
        let before = events.len();
        events.retain(|e| e.timestamp >= horizon);
        Ok(before - events.len())
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Vec<AuditEvent>>, AppError> {
        self.events.lock().map_err(|e| {
            AppError::InternalError(anyhow::anyhow!("Audit store mutex poisoned: {}", e))
        })
    }

    fn check_available(&self) -> Result<(), AppError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(AppError::DatabaseError(anyhow::anyhow!(
                "audit store unavailable"
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl AuditStore for InMemoryAuditStore {
    async fn insert(&self, event: &AuditEvent) -> Result<(), AppError> {
        self.check_available()?;
        self.lock()?.push(event.clone());
        Ok(())
    }

    async fn query(&self, query: &AuditQuery) -> Result<Vec<AuditEvent>, AppError> {
        self.check_available()?;
        let horizon = retention_horizon(self.clock.now(), self.retention);

        let mut found: Vec<AuditEvent> = self
            .lock()?
            .iter()
            .filter(|e| e.timestamp >= horizon && query.matches(e))
            .cloned()
            .collect();

        found.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        found.truncate(query.effective_limit() as usize);
        Ok(found)
    }

    async fn health_check(&self) -> Result<(), AppError> {
        self.check_available()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ActorContext, AuditEventKind, Severity};
    use crate::services::clock::ManualClock;
    use serde_json::json;

    fn event_at(kind: AuditEventKind, org: &str, at: DateTime<Utc>) -> AuditEvent {
        let actor = ActorContext::default().with_user("u1").with_org(org);
        AuditEvent::new(kind, Severity::Info, &actor, json!({}), at)
    }

    #[test]
    fn test_query_filter_fields() {
        let horizon = Utc::now() - Duration::days(90);
        let query = AuditQuery {
            org_id: Some("acme".to_string()),
            kind: Some(AuditEventKind::CsrfViolation),
            ..Default::default()
        };

        let filter = query_filter(&query, horizon);
        assert_eq!(filter.get_str("org_id").unwrap(), "acme");
        assert_eq!(filter.get_str("kind").unwrap(), "CSRF_VIOLATION");
        assert!(filter.get("user_id").is_none());

        let ts = filter.get_document("timestamp").unwrap();
        assert_eq!(
            ts.get_datetime("$gte").unwrap().timestamp_millis(),
            horizon.timestamp_millis()
        );
        assert!(ts.get("$lt").is_none());
    }

    #[test]
    fn test_query_filter_never_reaches_past_horizon() {
        let horizon = Utc::now() - Duration::days(90);
        let query = AuditQuery {
            from: Some(horizon - Duration::days(30)),
            to: Some(horizon + Duration::days(1)),
            ..Default::default()
        };

        let ts = query_filter(&query, horizon)
            .get_document("timestamp")
            .unwrap()
            .clone();
        assert_eq!(
            ts.get_datetime("$gte").unwrap().timestamp_millis(),
            horizon.timestamp_millis()
        );
        assert!(ts.get_datetime("$lt").is_ok());
    }

    #[tokio::test]
    async fn test_memory_store_orders_newest_first_and_filters() {
        let clock = ManualClock::default();
        let store = InMemoryAuditStore::new(Duration::days(90), Arc::new(clock.clone()));
        let now = clock.now();

        store
            .insert(&event_at(AuditEventKind::LoginSuccess, "acme", now - Duration::hours(2)))
            .await
            .unwrap();
        store
            .insert(&event_at(AuditEventKind::CsrfViolation, "acme", now - Duration::hours(1)))
            .await
            .unwrap();
        store
            .insert(&event_at(AuditEventKind::CsrfViolation, "globex", now))
            .await
            .unwrap();

        let acme = store.query(&AuditQuery::for_org("acme")).await.unwrap();
        assert_eq!(acme.len(), 2);
        assert!(acme[0].timestamp > acme[1].timestamp);

        let csrf = store
            .query(&AuditQuery::for_kind(AuditEventKind::CsrfViolation))
            .await
            .unwrap();
        assert_eq!(csrf.len(), 2);
        assert_eq!(csrf[0].org_id.as_deref(), Some("globex"));
    }

    #[tokio::test]
    async fn test_memory_store_hides_and_purges_expired() {
        let clock = ManualClock::default();
        let store = InMemoryAuditStore::new(Duration::days(90), Arc::new(clock.clone()));

        store
            .insert(&event_at(AuditEventKind::Logout, "acme", clock.now()))
            .await
            .unwrap();

        clock.advance(Duration::days(89));
        assert_eq!(store.query(&AuditQuery::default()).await.unwrap().len(), 1);

        clock.advance(Duration::days(2));
        assert!(store.query(&AuditQuery::default()).await.unwrap().is_empty());
        assert_eq!(store.purge_expired().unwrap(), 1);
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_oversized_retention_saturates_horizon() {
        let clock = ManualClock::default();
        let retention = Duration::days(200_000_000);
        assert_eq!(retention_horizon(clock.now(), retention), DateTime::<Utc>::MIN_UTC);

        let store = InMemoryAuditStore::new(retention, Arc::new(clock.clone()));
        store
            .insert(&event_at(AuditEventKind::Logout, "acme", clock.now()))
            .await
            .unwrap();

        assert_eq!(store.query(&AuditQuery::default()).await.unwrap().len(), 1);
        assert_eq!(store.purge_expired().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_memory_store_unavailable() {
        let store = InMemoryAuditStore::new(Duration::days(90), Arc::new(ManualClock::default()));
        store.set_unavailable(true);

        let result = store
            .insert(&event_at(AuditEventKind::Logout, "acme", Utc::now()))
            .await;
        assert!(matches!(result, Err(AppError::DatabaseError(_))));
        assert!(store.health_check().await.is_err());

        store.set_unavailable(false);
        assert!(store.health_check().await.is_ok());
    }
}
