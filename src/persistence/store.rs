//! SQLite-based run history store

use crate::core::state::RunStatus;
use crate::persistence::{PersistenceBackend, RunRecord};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqlitePool};
use std::path::{Path, PathBuf};
use uuid::Uuid;

const COLUMNS: &str = "id, workflow_name, workflow_path, status, started_at, ended_at, \
                       inputs, skip_pr_gates, error, steps_completed, steps_total, \
                       config_snapshot";

/// SQLite run store
pub struct SqliteRunStore {
    pool: SqlitePool,
}

impl SqliteRunStore {
    /// Open (creating if needed) the database at `db_path`
    pub async fn new(db_path: impl AsRef<Path>) -> Result<Self> {
        let db_path = db_path.as_ref();
        if let Some(parent) = db_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }

        let options = SqliteConnectOptions::new()
            .filename(db_path)
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await
            .with_context(|| format!("Failed to open database {}", db_path.display()))?;

        let store = Self { pool };
        store.init().await?;
        Ok(store)
    }

    /// `<data_local_dir>/jobflow/runs.db`
    pub fn default_path() -> PathBuf {
        dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("jobflow")
            .join("runs.db")
    }

    /// Create store with default path
    pub async fn with_default_path() -> Result<Self> {
        Self::new(Self::default_path()).await
    }

    /// Initialize database schema
    async fn init(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS runs (
                id TEXT PRIMARY KEY,
                workflow_name TEXT NOT NULL,
                workflow_path TEXT NOT NULL,
                status TEXT NOT NULL,
                started_at TEXT NOT NULL,
                ended_at TEXT,
                inputs TEXT NOT NULL DEFAULT '{}',
                skip_pr_gates INTEGER NOT NULL DEFAULT 0,
                error TEXT,
                steps_completed INTEGER NOT NULL DEFAULT 0,
                steps_total INTEGER NOT NULL DEFAULT 0,
                config_snapshot TEXT
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .context("Failed to create runs table")?;
        self.migrate().await?;

        for statement in [
            "CREATE INDEX IF NOT EXISTS idx_runs_workflow ON runs(workflow_name)",
            "CREATE INDEX IF NOT EXISTS idx_runs_started_at ON runs(started_at)",
        ] {
            sqlx::query(statement).execute(&self.pool).await?;
        }

        Ok(())
    }

    /// Bring databases created by older versions up to the current columns
    async fn migrate(&self) -> Result<()> {
        let columns = sqlx::query("PRAGMA table_info(runs)")
            .fetch_all(&self.pool)
            .await
            .context("Failed to inspect runs table")?;
        let has_snapshot = columns
            .iter()
            .any(|row| row.try_get::<String, _>("name").is_ok_and(|name| name == "config_snapshot"));

        if !has_snapshot {
            sqlx::query("ALTER TABLE runs ADD COLUMN config_snapshot TEXT")
                .execute(&self.pool)
                .await
                .context("Failed to add config_snapshot column")?;
        }
        Ok(())
    }

    fn from_row(row: &SqliteRow) -> Result<RunRecord> {
        let status: String = row.try_get("status")?;
        let inputs: String = row.try_get("inputs")?;
        Ok(RunRecord {
            run_id: Uuid::parse_str(&row.try_get::<String, _>("id")?)?,
            workflow_name: row.try_get("workflow_name")?,
            workflow_path: row.try_get("workflow_path")?,
            status: status.parse::<RunStatus>().map_err(anyhow::Error::msg)?,
            started_at: row.try_get::<DateTime<Utc>, _>("started_at")?,
            ended_at: row.try_get::<Option<DateTime<Utc>>, _>("ended_at")?,
            inputs: serde_json::from_str(&inputs).context("Corrupt inputs column")?,
            skip_pr_gates: row.try_get("skip_pr_gates")?,
            error: row.try_get("error")?,
            steps_completed: row.try_get::<i64, _>("steps_completed")? as usize,
            steps_total: row.try_get::<i64, _>("steps_total")? as usize,
            config_snapshot: row.try_get("config_snapshot")?,
        })
    }
}

#[async_trait::async_trait]
impl PersistenceBackend for SqliteRunStore {
    async fn save_run(&self, run: &RunRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT OR REPLACE INTO runs
            (id, workflow_name, workflow_path, status, started_at, ended_at,
             inputs, skip_pr_gates, error, steps_completed, steps_total, config_snapshot)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
            "#,
        )
        .bind(run.run_id.to_string())
        .bind(&run.workflow_name)
        .bind(&run.workflow_path)
        .bind(run.status.as_str())
        .bind(run.started_at)
        .bind(run.ended_at)
        .bind(serde_json::to_string(&run.inputs)?)
        .bind(run.skip_pr_gates)
        .bind(&run.error)
        .bind(run.steps_completed as i64)
        .bind(run.steps_total as i64)
        .bind(&run.config_snapshot)
        .execute(&self.pool)
        .await
        .context("Failed to save run")?;

        Ok(())
    }

    async fn load_run(&self, run_id: Uuid) -> Result<Option<RunRecord>> {
        let row = sqlx::query(&format!("SELECT {} FROM runs WHERE id = ?1", COLUMNS))
            .bind(run_id.to_string())
            .fetch_optional(&self.pool)
            .await
            .context("Failed to load run")?;

        row.as_ref().map(Self::from_row).transpose()
    }

    async fn list_runs(&self, workflow_name: Option<&str>, limit: usize) -> Result<Vec<RunRecord>> {
        let rows = match workflow_name {
            Some(name) => {
                sqlx::query(&format!(
                    "SELECT {} FROM runs WHERE workflow_name = ?1 ORDER BY started_at DESC LIMIT ?2",
                    COLUMNS
                ))
                .bind(name)
                .bind(limit as i64)
                .fetch_all(&self.pool)
                .await
            }
            None => {
                sqlx::query(&format!(
                    "SELECT {} FROM runs ORDER BY started_at DESC LIMIT ?1",
                    COLUMNS
                ))
                .bind(limit as i64)
                .fetch_all(&self.pool)
                .await
            }
        }
        .context("Failed to list runs")?;

        rows.iter().map(Self::from_row).collect()
    }

    async fn list_workflows(&self) -> Result<Vec<String>> {
        let rows = sqlx::query("SELECT DISTINCT workflow_name FROM runs ORDER BY workflow_name ASC")
            .fetch_all(&self.pool)
            .await
            .context("Failed to list workflows")?;

        rows.iter()
            .map(|row| row.try_get("workflow_name").map_err(Into::into))
            .collect()
    }
}
