//! SQLite implementation of the TaskStateStore.
//!
//! Set membership lives in `task_subjects`, one row per member, so set-adds are
//! single `INSERT OR IGNORE ... WHERE EXISTS` statements and never rewrite the
//! instance row.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{SqliteConnection, SqlitePool};

use super::{parse_datetime, parse_optional_datetime};
use crate::domain::errors::StoreError;
use crate::domain::models::{SetAdd, TaskInstance};
use crate::domain::ports::TaskStateStore;

const REQUIRED: &str = "required";
const READY: &str = "ready";

#[derive(Clone)]
pub struct SqliteTaskStateStore {
    pool: SqlitePool,
}

impl SqliteTaskStateStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    async fn load(&self, row: TaskInstanceRow) -> Result<TaskInstance, StoreError> {
        let subjects: Vec<SubjectRow> = sqlx::query_as(
            "SELECT kind, subject FROM task_subjects WHERE instance_id = ? ORDER BY seq",
        )
        .bind(&row.id)
        .fetch_all(&self.pool)
        .await?;

        let mut instance: TaskInstance = row.try_into()?;
        for SubjectRow { kind, subject } in subjects {
            if kind == REQUIRED {
                instance.required.push(subject);
            } else {
                instance.ready.push(subject);
            }
        }
        Ok(instance)
    }

    async fn load_all(&self, rows: Vec<TaskInstanceRow>) -> Result<Vec<TaskInstance>, StoreError> {
        let mut instances = Vec::with_capacity(rows.len());
        for row in rows {
            instances.push(self.load(row).await?);
        }
        Ok(instances)
    }

    /// Why a conditional set insert touched no rows.
    async fn explain_noop(&self, id: &str, kind: &str, subject: &str) -> Result<SetAdd, StoreError> {
        let (exists, member): (bool, bool) = sqlx::query_as(
            r#"SELECT
                 EXISTS(SELECT 1 FROM task_instances WHERE id = ?1),
                 EXISTS(SELECT 1 FROM task_subjects WHERE instance_id = ?1 AND kind = ?2 AND subject = ?3)"#,
        )
        .bind(id)
        .bind(kind)
        .bind(subject)
        .fetch_one(&self.pool)
        .await?;

        Ok(match (exists, member) {
            (false, _) => SetAdd::InstanceMissing,
            (true, true) => SetAdd::AlreadyPresent,
            (true, false) if kind == READY => SetAdd::NotRequired,
            (true, false) => SetAdd::AtCapacity,
        })
    }
}

async fn insert_subjects(
    conn: &mut SqliteConnection,
    id: &str,
    kind: &str,
    subjects: &[String],
) -> Result<(), StoreError> {
    for subject in subjects {
        sqlx::query("INSERT OR IGNORE INTO task_subjects (instance_id, kind, subject) VALUES (?, ?, ?)")
            .bind(id)
            .bind(kind)
            .bind(subject)
            .execute(&mut *conn)
            .await?;
    }
    Ok(())
}

#[async_trait]
impl TaskStateStore for SqliteTaskStateStore {
    async fn find_by_product(&self, product: &str) -> Result<Vec<TaskInstance>, StoreError> {
        let rows: Vec<TaskInstanceRow> = sqlx::query_as(
            "SELECT * FROM task_instances WHERE product = ? ORDER BY created_at, rowid",
        )
        .bind(product)
        .fetch_all(&self.pool)
        .await?;
        self.load_all(rows).await
    }

    async fn find_by_id(&self, id: &str) -> Result<Option<TaskInstance>, StoreError> {
        let row: Option<TaskInstanceRow> = sqlx::query_as("SELECT * FROM task_instances WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(r) => Ok(Some(self.load(r).await?)),
            None => Ok(None),
        }
    }

    async fn insert_if_absent(&self, instance: &TaskInstance) -> Result<bool, StoreError> {
        let args_json = serde_json::to_string(&instance.args)?;

        let mut tx = self.pool.begin().await?;
        let result = sqlx::query(
            r#"INSERT OR IGNORE INTO task_instances (id, product, task_template_id, is_multi_dependency,
               args, created_at, last_updated, dependencies_ready, delay_ready_time)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(&instance.id)
        .bind(&instance.product)
        .bind(&instance.task_template_id)
        .bind(instance.is_multi_dependency)
        .bind(&args_json)
        .bind(instance.created_at.to_rfc3339())
        .bind(instance.last_updated.to_rfc3339())
        .bind(instance.dependencies_ready.map(|t| t.to_rfc3339()))
        .bind(instance.delay_ready_time.map(|t| t.to_rfc3339()))
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 0 {
            return Ok(false);
        }

        insert_subjects(&mut tx, &instance.id, REQUIRED, &instance.required).await?;
        insert_subjects(&mut tx, &instance.id, READY, &instance.ready).await?;
        tx.commit().await?;
        Ok(true)
    }

    async fn add_to_required_set(&self, id: &str, subject: &str) -> Result<SetAdd, StoreError> {
        let result = sqlx::query(
            r#"INSERT OR IGNORE INTO task_subjects (instance_id, kind, subject)
               SELECT ?1, 'required', ?2
               WHERE EXISTS (SELECT 1 FROM task_instances WHERE id = ?1)"#,
        )
        .bind(id)
        .bind(subject)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 1 {
            return Ok(SetAdd::Added);
        }
        self.explain_noop(id, REQUIRED, subject).await
    }

    async fn add_to_required_set_bounded(
        &self,
        id: &str,
        subject: &str,
        limit: usize,
    ) -> Result<SetAdd, StoreError> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let result = sqlx::query(
            r#"INSERT OR IGNORE INTO task_subjects (instance_id, kind, subject)
               SELECT ?1, 'required', ?2
               WHERE EXISTS (SELECT 1 FROM task_instances WHERE id = ?1)
                 AND (SELECT COUNT(*) FROM task_subjects WHERE instance_id = ?1 AND kind = 'required') < ?3"#,
        )
        .bind(id)
        .bind(subject)
        .bind(limit)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 1 {
            return Ok(SetAdd::Added);
        }
        self.explain_noop(id, REQUIRED, subject).await
    }

    async fn add_to_ready_set(
        &self,
        id: &str,
        subject: &str,
        now: DateTime<Utc>,
    ) -> Result<SetAdd, StoreError> {
        let mut tx = self.pool.begin().await?;
        let result = sqlx::query(
            r#"INSERT OR IGNORE INTO task_subjects (instance_id, kind, subject)
               SELECT ?1, 'ready', ?2
               WHERE EXISTS (SELECT 1 FROM task_subjects
                             WHERE instance_id = ?1 AND kind = 'required' AND subject = ?2)"#,
        )
        .bind(id)
        .bind(subject)
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 0 {
            tx.rollback().await?;
            return self.explain_noop(id, READY, subject).await;
        }

        sqlx::query("UPDATE task_instances SET last_updated = ? WHERE id = ?")
            .bind(now.to_rfc3339())
            .bind(id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(SetAdd::Added)
    }

    async fn schedule_delay(&self, id: &str, at: DateTime<Utc>) -> Result<bool, StoreError> {
        let result = sqlx::query(
            "UPDATE task_instances SET delay_ready_time = ? WHERE id = ? AND delay_ready_time IS NULL",
        )
        .bind(at.to_rfc3339())
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn delete_by_id(&self, id: &str) -> Result<u64, StoreError> {
        let result = sqlx::query("DELETE FROM task_instances WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn scan_all(&self) -> Result<Vec<TaskInstance>, StoreError> {
        let rows: Vec<TaskInstanceRow> =
            sqlx::query_as("SELECT * FROM task_instances ORDER BY created_at, rowid")
                .fetch_all(&self.pool)
                .await?;
        self.load_all(rows).await
    }
}

#[derive(sqlx::FromRow)]
struct TaskInstanceRow {
    id: String,
    product: String,
    task_template_id: String,
    is_multi_dependency: bool,
    args: String,
    created_at: String,
    last_updated: String,
    dependencies_ready: Option<String>,
    delay_ready_time: Option<String>,
}

impl TryFrom<TaskInstanceRow> for TaskInstance {
    type Error = StoreError;

    fn try_from(row: TaskInstanceRow) -> Result<Self, Self::Error> {
        Ok(Self {
            args: serde_json::from_str(&row.args)?,
            created_at: parse_datetime(&row.created_at)?,
            last_updated: parse_datetime(&row.last_updated)?,
            dependencies_ready: parse_optional_datetime(row.dependencies_ready.as_deref())?,
            delay_ready_time: parse_optional_datetime(row.delay_ready_time.as_deref())?,
            id: row.id,
            product: row.product,
            task_template_id: row.task_template_id,
            is_multi_dependency: row.is_multi_dependency,
            required: Vec::new(),
            ready: Vec::new(),
        })
    }
}

#[derive(sqlx::FromRow)]
struct SubjectRow {
    kind: String,
    subject: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::sqlite::create_migrated_test_pool;
    use crate::domain::models::Bindings;

    async fn setup() -> SqliteTaskStateStore {
        SqliteTaskStateStore::new(create_migrated_test_pool().await.unwrap())
    }

    fn fan_in(product: &str) -> TaskInstance {
        let mut args = Bindings::new();
        args.insert("x".to_string(), "1".to_string());
        TaskInstance::fan_in(product, "file:///out/{x}", args, Utc::now())
    }

    #[tokio::test]
    async fn test_insert_if_absent_round_trip() {
        let store = setup().await;
        let instance = fan_in("file:///out/1");

        assert!(store.insert_if_absent(&instance).await.unwrap());
        assert!(!store.insert_if_absent(&instance).await.unwrap());

        let loaded = store.find_by_id("file:///out/1").await.unwrap().unwrap();
        assert_eq!(loaded.product, "file:///out/1");
        assert_eq!(loaded.args["x"], "1");
        assert!(loaded.is_multi_dependency);
        assert!(loaded.required.is_empty());
    }

    #[tokio::test]
    async fn test_fan_out_insert_keeps_required() {
        let store = setup().await;
        let instance = TaskInstance::fan_out("file:///p", "t", "file:///a/1", Bindings::new(), Utc::now());
        store.insert_if_absent(&instance).await.unwrap();

        let found = store.find_by_product("file:///p").await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].required, ["file:///a/1"]);
    }

    #[tokio::test]
    async fn test_required_set_is_idempotent_and_ordered() {
        let store = setup().await;
        store.insert_if_absent(&fan_in("file:///out/1")).await.unwrap();

        assert_eq!(store.add_to_required_set("file:///out/1", "file:///b/1").await.unwrap(), SetAdd::Added);
        assert_eq!(store.add_to_required_set("file:///out/1", "file:///a/1").await.unwrap(), SetAdd::Added);
        assert_eq!(
            store.add_to_required_set("file:///out/1", "file:///b/1").await.unwrap(),
            SetAdd::AlreadyPresent
        );
        assert_eq!(
            store.add_to_required_set("file:///missing", "file:///a/1").await.unwrap(),
            SetAdd::InstanceMissing
        );

        let loaded = store.find_by_id("file:///out/1").await.unwrap().unwrap();
        assert_eq!(loaded.required, ["file:///b/1", "file:///a/1"]);
    }

    #[tokio::test]
    async fn test_bounded_required_set() {
        let store = setup().await;
        let instance = TaskInstance::fan_out("file:///p", "t", "file:///a/1", Bindings::new(), Utc::now());
        store.insert_if_absent(&instance).await.unwrap();

        assert_eq!(
            store.add_to_required_set_bounded(&instance.id, "file:///a/2", 1).await.unwrap(),
            SetAdd::AtCapacity
        );
        assert_eq!(
            store.add_to_required_set_bounded(&instance.id, "file:///a/1", 1).await.unwrap(),
            SetAdd::AlreadyPresent
        );
        assert_eq!(
            store.add_to_required_set_bounded(&instance.id, "file:///a/2", 2).await.unwrap(),
            SetAdd::Added
        );
    }

    #[tokio::test]
    async fn test_ready_set_requires_membership_and_stamps_once() {
        let store = setup().await;
        let mut instance = fan_in("file:///out/1");
        instance.last_updated = Utc::now() - chrono::Duration::hours(1);
        store.insert_if_absent(&instance).await.unwrap();
        store.add_to_required_set("file:///out/1", "file:///a/1").await.unwrap();

        assert_eq!(
            store.add_to_ready_set("file:///out/1", "file:///zzz", Utc::now()).await.unwrap(),
            SetAdd::NotRequired
        );

        let stamp = Utc::now();
        assert_eq!(
            store.add_to_ready_set("file:///out/1", "file:///a/1", stamp).await.unwrap(),
            SetAdd::Added
        );
        let later = stamp + chrono::Duration::minutes(1);
        assert_eq!(
            store.add_to_ready_set("file:///out/1", "file:///a/1", later).await.unwrap(),
            SetAdd::AlreadyPresent
        );

        let loaded = store.find_by_id("file:///out/1").await.unwrap().unwrap();
        assert_eq!(loaded.ready, ["file:///a/1"]);
        assert_eq!(loaded.last_updated.timestamp_millis(), stamp.timestamp_millis());

        assert_eq!(
            store.add_to_ready_set("file:///gone", "file:///a/1", Utc::now()).await.unwrap(),
            SetAdd::InstanceMissing
        );
    }

    #[tokio::test]
    async fn test_schedule_delay_once() {
        let store = setup().await;
        store.insert_if_absent(&fan_in("file:///out/1")).await.unwrap();

        let at = Utc::now();
        assert!(store.schedule_delay("file:///out/1", at).await.unwrap());
        assert!(!store.schedule_delay("file:///out/1", at + chrono::Duration::seconds(5)).await.unwrap());

        let loaded = store.find_by_id("file:///out/1").await.unwrap().unwrap();
        assert_eq!(loaded.delay_ready_time.unwrap().timestamp_millis(), at.timestamp_millis());
    }

    #[tokio::test]
    async fn test_delete_cascades_and_reports_rows() {
        let store = setup().await;
        store.insert_if_absent(&fan_in("file:///out/1")).await.unwrap();
        store.add_to_required_set("file:///out/1", "file:///a/1").await.unwrap();

        assert_eq!(store.delete_by_id("file:///out/1").await.unwrap(), 1);
        assert_eq!(store.delete_by_id("file:///out/1").await.unwrap(), 0);
        assert!(store.scan_all().await.unwrap().is_empty());

        // A recreated instance starts with empty sets.
        store.insert_if_absent(&fan_in("file:///out/1")).await.unwrap();
        let loaded = store.find_by_id("file:///out/1").await.unwrap().unwrap();
        assert!(loaded.required.is_empty());
    }
}
