use chrono::Utc;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use tokio::sync::OnceCell;
use tracing::warn;

use crate::domain::{NotificationStatus, StatusRecord};

const STATUS_TTL_SECONDS: u64 = 24 * 60 * 60;
const TEMPLATE_CACHE_TTL_SECONDS: u64 = 3600;
const IDEMPOTENCY_TTL_SECONDS: u64 = 24 * 60 * 60;

/// Cache-of-convenience in front of Redis, not a source of truth. Writes are
/// fire-and-forget from the pipeline's perspective: a connection or write
/// failure is logged and swallowed, never surfaced as a delivery failure.
///
/// The connection is established lazily on first use and shared by a
/// single-flight latch (`OnceCell`) so concurrent first-use callers pay for
/// one connect attempt, not one each.
pub struct StatusStore {
    url: String,
    conn: OnceCell<ConnectionManager>,
}

impl StatusStore {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            conn: OnceCell::new(),
        }
    }

    async fn connection(&self) -> Result<ConnectionManager, redis::RedisError> {
        self.conn
            .get_or_try_init(|| async {
                let client = redis::Client::open(self.url.clone())?;
                client.get_connection_manager().await
            })
            .await
            .cloned()
    }

    /// Record the latest status for a notification. Never propagates an
    /// error to the caller: a store outage must not be mistaken for a
    /// delivery failure.
    pub async fn set_status(
        &self,
        notification_id: &str,
        service: &str,
        status: NotificationStatus,
        error: Option<String>,
        retry_count: u32,
    ) {
        let record = StatusRecord {
            notification_id: notification_id.to_string(),
            status,
            error,
            retry_count,
            updated_at: Utc::now(),
            service: service.to_string(),
        };

        if let Err(e) = self.try_set_status(&record).await {
            warn!(
                notification_id,
                error = %e,
                "status store write failed, continuing without status visibility"
            );
        }
    }

    async fn try_set_status(&self, record: &StatusRecord) -> Result<(), redis::RedisError> {
        let mut conn = self.connection().await?;
        let payload = serde_json::to_string(record)
            .map_err(|e| redis::RedisError::from((redis::ErrorKind::TypeError, "serialize", e.to_string())))?;
        let key = format!("notification:status:{}", record.notification_id);
        conn.set_ex::<_, _, ()>(key, payload, STATUS_TTL_SECONDS).await
    }

    /// Read back the last known status for a notification, used by the
    /// admin status-lookup API. Unlike `set_status`, failures are surfaced —
    /// the admin API is allowed to report the store as unhealthy.
    pub async fn get_status(
        &self,
        notification_id: &str,
    ) -> Result<Option<StatusRecord>, redis::RedisError> {
        let mut conn = self.connection().await?;
        let key = format!("notification:status:{}", notification_id);
        let payload: Option<String> = conn.get(key).await?;
        match payload {
            Some(raw) => {
                let record = serde_json::from_str(&raw).map_err(|e| {
                    redis::RedisError::from((redis::ErrorKind::TypeError, "deserialize", e.to_string()))
                })?;
                Ok(Some(record))
            }
            None => Ok(None),
        }
    }

    /// Liveness probe for the admin `/health` endpoint.
    pub async fn health(&self) -> bool {
        match self.connection().await {
            Ok(mut conn) => redis::cmd("PING")
                .query_async::<String>(&mut conn)
                .await
                .is_ok(),
            Err(_) => false,
        }
    }

    /// Cache a fetched template descriptor under `template:{code}` with a
    /// 1h TTL. Optional use by the template client; not required for
    /// correctness.
    pub async fn cache_template(&self, code: &str, descriptor_json: &str) {
        if let Ok(mut conn) = self.connection().await {
            let key = format!("template:{code}");
            let _: Result<(), _> = conn
                .set_ex::<_, _, ()>(key, descriptor_json, TEMPLATE_CACHE_TTL_SECONDS)
                .await;
        }
    }

    /// Mark a `request_id` as seen under `idempotent:{request_id}`. The
    /// marker exists for an upstream producer to short-circuit duplicate
    /// enqueues; the consume loop itself never calls this.
    pub async fn mark_idempotent(&self, request_id: &str) -> Result<(), redis::RedisError> {
        let mut conn = self.connection().await?;
        let key = format!("idempotent:{request_id}");
        conn.set_ex::<_, _, ()>(key, "1", IDEMPOTENCY_TTL_SECONDS).await
    }

    pub async fn is_duplicate(&self, request_id: &str) -> Result<bool, redis::RedisError> {
        let mut conn = self.connection().await?;
        let key = format!("idempotent:{request_id}");
        conn.exists(key).await
    }
}
