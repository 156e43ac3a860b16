// Message store: the durable home of message records and their seen-by sets.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Context;
use chrono::{DateTime, Utc};
use parley_common::types::MessageRecord;
use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::config::GatewayConfig;
use crate::db::migrations::run_migrations;
use crate::db::pool::{check_pool_health, create_pg_pool};

const MESSAGE_COLUMNS: &str =
    "id, sender_id, receiver_id, text, image, seen_by, created_at, updated_at";

#[derive(Clone)]
pub enum MessageStore {
    Postgres(sqlx::PgPool),
    Memory(Arc<RwLock<HashMap<String, MessageRecord>>>),
}

#[derive(Debug, sqlx::FromRow)]
struct MessageRow {
    id: String,
    sender_id: String,
    receiver_id: String,
    text: Option<String>,
    image: Option<String>,
    seen_by: Vec<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<MessageRow> for MessageRecord {
    fn from(row: MessageRow) -> Self {
        Self {
            id: row.id,
            sender_id: row.sender_id,
            receiver_id: row.receiver_id,
            text: row.text,
            image: row.image,
            seen_by: row.seen_by,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

impl MessageStore {
    /// Opens the configured backend. Without a database URL the store lives
    /// in process memory and is lost on restart.
    pub async fn connect(config: &GatewayConfig) -> anyhow::Result<Self> {
        let Some(database_url) = config.database_url.as_deref() else {
            warn!("no database configured; using in-memory message store");
            return Ok(Self::in_memory());
        };

        let pool = create_pg_pool(database_url, &config.pool)
            .await
            .context("failed to initialize gateway PostgreSQL pool")?;
        check_pool_health(&pool).await.context("gateway PostgreSQL is not healthy")?;
        run_migrations(&pool).await?;
        info!("connected postgres message store");

        Ok(Self::Postgres(pool))
    }

    pub fn in_memory() -> Self {
        Self::Memory(Arc::new(RwLock::new(HashMap::new())))
    }

    pub const fn backend_name(&self) -> &'static str {
        match self {
            Self::Postgres(_) => "postgres",
            Self::Memory(_) => "memory",
        }
    }

    /// Adds `viewer_id` to the message's seen-by set and returns the updated
    /// record, or `None` when no message has this id. Adding a viewer that is
    /// already present leaves the set unchanged.
    pub async fn mark_seen(
        &self,
        message_id: &str,
        viewer_id: &str,
    ) -> anyhow::Result<Option<MessageRecord>> {
        match self {
            Self::Postgres(pool) => {
                let row = sqlx::query_as::<_, MessageRow>(&format!(
                    r#"
                    UPDATE messages
                    SET seen_by = CASE
                            WHEN $2 = ANY(seen_by) THEN seen_by
                            ELSE array_append(seen_by, $2)
                        END,
                        updated_at = CASE
                            WHEN $2 = ANY(seen_by) THEN updated_at
                            ELSE now()
                        END
                    WHERE id = $1
                    RETURNING {MESSAGE_COLUMNS}
                    "#
                ))
                .bind(message_id)
                .bind(viewer_id)
                .fetch_optional(pool)
                .await
                .with_context(|| format!("failed to mark message {message_id} as seen"))?;

                Ok(row.map(MessageRecord::from))
            }
            Self::Memory(store) => {
                let mut guard = store.write().await;
                Ok(guard.get_mut(message_id).map(|record| {
                    record.add_viewer(viewer_id);
                    record.clone()
                }))
            }
        }
    }

    pub async fn get(&self, message_id: &str) -> anyhow::Result<Option<MessageRecord>> {
        match self {
            Self::Postgres(pool) => {
                let row = sqlx::query_as::<_, MessageRow>(&format!(
                    "SELECT {MESSAGE_COLUMNS} FROM messages WHERE id = $1"
                ))
                .bind(message_id)
                .fetch_optional(pool)
                .await
                .with_context(|| format!("failed to load message {message_id}"))?;

                Ok(row.map(MessageRecord::from))
            }
            Self::Memory(store) => Ok(store.read().await.get(message_id).cloned()),
        }
    }

    pub async fn insert(&self, record: MessageRecord) -> anyhow::Result<()> {
        match self {
            Self::Postgres(pool) => {
                sqlx::query(
                    r#"
                    INSERT INTO messages
                        (id, sender_id, receiver_id, text, image, seen_by, created_at, updated_at)
                    VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
                    "#,
                )
                .bind(&record.id)
                .bind(&record.sender_id)
                .bind(&record.receiver_id)
                .bind(&record.text)
                .bind(&record.image)
                .bind(&record.seen_by)
                .bind(record.created_at)
                .bind(record.updated_at)
                .execute(pool)
                .await
                .with_context(|| format!("failed to insert message {}", record.id))?;

                Ok(())
            }
            Self::Memory(store) => {
                store.write().await.insert(record.id.clone(), record);
                Ok(())
            }
        }
    }
}
