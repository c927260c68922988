//! SQLite-backed message bus.
//!
//! All topics share one append-only table; each consumer group keeps its
//! highest committed message id per topic.

use async_trait::async_trait;
use chrono::Utc;
use sqlx::{QueryBuilder, Sqlite, SqlitePool};
use std::sync::RwLock;

use super::parse_datetime;
use crate::domain::errors::BusError;
use crate::domain::ports::{BusMessage, MessageBus};

pub struct SqliteMessageBus {
    pool: SqlitePool,
    group_id: String,
    topics: RwLock<Vec<String>>,
}

impl SqliteMessageBus {
    pub fn new(pool: SqlitePool, group_id: impl Into<String>) -> Self {
        Self {
            pool,
            group_id: group_id.into(),
            topics: RwLock::new(Vec::new()),
        }
    }

    pub fn group_id(&self) -> &str {
        &self.group_id
    }

    fn subscribed(&self) -> Vec<String> {
        self.topics.read().map(|t| t.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl MessageBus for SqliteMessageBus {
    async fn subscribe(&self, topics: &[String]) -> Result<(), BusError> {
        for topic in topics {
            sqlx::query("INSERT OR IGNORE INTO bus_offsets (group_id, topic, committed) VALUES (?, ?, 0)")
                .bind(&self.group_id)
                .bind(topic)
                .execute(&self.pool)
                .await?;
        }

        let mut current = self.topics.write().map_err(|_| BusError::Closed)?;
        for topic in topics {
            if !current.contains(topic) {
                current.push(topic.clone());
            }
        }
        Ok(())
    }

    async fn consume_one(&self) -> Result<Option<BusMessage>, BusError> {
        let topics = self.subscribed();
        if topics.is_empty() {
            return Err(BusError::NotSubscribed);
        }

        let mut query = QueryBuilder::<Sqlite>::new(
            "SELECT m.id, m.topic, m.key, m.payload, m.published_at FROM bus_messages m \
             JOIN bus_offsets o ON o.topic = m.topic AND o.group_id = ",
        );
        query.push_bind(&self.group_id);
        query.push(" WHERE m.id > o.committed AND m.topic IN (");
        let mut list = query.separated(", ");
        for topic in &topics {
            list.push_bind(topic);
        }
        list.push_unseparated(") ORDER BY m.id LIMIT 1");

        let row: Option<MessageRow> = query.build_query_as().fetch_optional(&self.pool).await?;
        row.map(BusMessage::try_from).transpose()
    }

    async fn commit(&self, message: &BusMessage) -> Result<(), BusError> {
        sqlx::query(
            r#"INSERT INTO bus_offsets (group_id, topic, committed) VALUES (?, ?, ?)
               ON CONFLICT (group_id, topic) DO UPDATE SET committed = MAX(committed, excluded.committed)"#,
        )
        .bind(&self.group_id)
        .bind(&message.topic)
        .bind(message.offset)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn publish(&self, topic: &str, key: Option<&str>, payload: &[u8]) -> Result<i64, BusError> {
        let result = sqlx::query(
            "INSERT INTO bus_messages (topic, key, payload, published_at) VALUES (?, ?, ?, ?)",
        )
        .bind(topic)
        .bind(key)
        .bind(payload)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(result.last_insert_rowid())
    }
}

#[derive(sqlx::FromRow)]
struct MessageRow {
    id: i64,
    topic: String,
    key: Option<String>,
    payload: Vec<u8>,
    published_at: String,
}

impl TryFrom<MessageRow> for BusMessage {
    type Error = BusError;

    fn try_from(row: MessageRow) -> Result<Self, Self::Error> {
        let published_at =
            parse_datetime(&row.published_at).map_err(|e| BusError::Serialization(e.to_string()))?;
        Ok(Self {
            topic: row.topic,
            offset: row.id,
            key: row.key,
            payload: row.payload,
            published_at,
        })
    }
}
