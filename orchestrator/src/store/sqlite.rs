//! Durable store on SQLite

use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqlitePool};
use tracing::info;

use crate::errors::DeployError;
use crate::models::deployment::{Deployment, DeploymentStatus};
use crate::models::job::{DeploymentJob, JobStatus};
use crate::models::tenant::Tenant;
use crate::store::Store;

const SCHEMA: &[&str] = &[
    r#"CREATE TABLE IF NOT EXISTS tenants (
        id TEXT PRIMARY KEY NOT NULL,
        token TEXT NOT NULL,
        model TEXT,
        channel TEXT,
        api_key TEXT,
        status TEXT NOT NULL,
        runtime_status TEXT NOT NULL,
        container_name TEXT,
        container_id TEXT,
        runtime_port INTEGER,
        webhook_secret TEXT,
        webhook_url TEXT,
        last_heartbeat_at TEXT,
        created_at TEXT NOT NULL
    )"#,
    r#"CREATE TABLE IF NOT EXISTS deployments (
        seq INTEGER PRIMARY KEY AUTOINCREMENT,
        id TEXT NOT NULL UNIQUE,
        tenant_id TEXT NOT NULL REFERENCES tenants(id) ON DELETE CASCADE,
        status TEXT NOT NULL,
        logs TEXT NOT NULL DEFAULT '',
        error TEXT,
        created_at TEXT NOT NULL
    )"#,
    r#"CREATE TABLE IF NOT EXISTS deployment_jobs (
        seq INTEGER PRIMARY KEY AUTOINCREMENT,
        id TEXT NOT NULL UNIQUE,
        tenant_id TEXT NOT NULL REFERENCES tenants(id) ON DELETE CASCADE,
        type TEXT NOT NULL,
        status TEXT NOT NULL,
        payload TEXT,
        attempt INTEGER NOT NULL DEFAULT 0,
        started_at TEXT,
        finished_at TEXT,
        logs TEXT NOT NULL DEFAULT '',
        error TEXT,
        created_at TEXT NOT NULL
    )"#,
    "CREATE INDEX IF NOT EXISTS deployment_jobs_queue ON deployment_jobs (status, seq)",
];

const JOB_COLUMNS: &str = "id, tenant_id, type, status, payload, attempt, started_at, finished_at, logs, error, created_at";

const DEPLOYMENT_COLUMNS: &str = "id, tenant_id, status, logs, error, created_at";

/// Store backed by a SQLite database
#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Open (creating if needed) the database at `url` and ensure the schema.
    pub async fn connect(url: &str, max_connections: u32) -> Result<Self, DeployError> {
        let options = SqliteConnectOptions::from_str(url)?
            .create_if_missing(true)
            .foreign_keys(true)
            .busy_timeout(Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await?;

        let store = Self { pool };
        store.migrate().await?;
        info!("Connected to job store at {}", url);
        Ok(store)
    }

    /// Private in-memory database, mostly for tests
    pub async fn in_memory() -> Result<Self, DeployError> {
        // Every connection to :memory: is its own database
        Self::connect("sqlite::memory:", 1).await
    }

    async fn migrate(&self) -> Result<(), DeployError> {
        for statement in SCHEMA {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        Ok(())
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

fn port_from_db(value: Option<i64>) -> Result<Option<u16>, DeployError> {
    value
        .map(|v| u16::try_from(v).map_err(|_| DeployError::StorageError(format!("Invalid port {}", v))))
        .transpose()
}

fn tenant_from_row(row: &SqliteRow) -> Result<Tenant, DeployError> {
    Ok(Tenant {
        id: row.try_get("id")?,
        token: row.try_get("token")?,
        model: row.try_get("model")?,
        channel: row.try_get("channel")?,
        api_key: row.try_get("api_key")?,
        status: row.try_get::<String, _>("status")?.parse()?,
        runtime_status: row.try_get::<String, _>("runtime_status")?.parse()?,
        container_name: row.try_get("container_name")?,
        container_id: row.try_get("container_id")?,
        runtime_port: port_from_db(row.try_get("runtime_port")?)?,
        webhook_secret: row.try_get("webhook_secret")?,
        webhook_url: row.try_get("webhook_url")?,
        last_heartbeat_at: row.try_get("last_heartbeat_at")?,
        created_at: row.try_get("created_at")?,
    })
}

fn deployment_from_row(row: &SqliteRow) -> Result<Deployment, DeployError> {
    Ok(Deployment {
        id: row.try_get("id")?,
        tenant_id: row.try_get("tenant_id")?,
        status: row.try_get::<String, _>("status")?.parse()?,
        logs: row.try_get("logs")?,
        error: row.try_get("error")?,
        created_at: row.try_get("created_at")?,
    })
}

fn job_from_row(row: &SqliteRow) -> Result<DeploymentJob, DeployError> {
    let attempt: i64 = row.try_get("attempt")?;
    Ok(DeploymentJob {
        id: row.try_get("id")?,
        tenant_id: row.try_get("tenant_id")?,
        job_type: row.try_get::<String, _>("type")?.parse()?,
        status: row.try_get::<String, _>("status")?.parse()?,
        payload: row.try_get("payload")?,
        attempt: u32::try_from(attempt).unwrap_or(0),
        started_at: row.try_get("started_at")?,
        finished_at: row.try_get("finished_at")?,
        logs: row.try_get("logs")?,
        error: row.try_get("error")?,
        created_at: row.try_get("created_at")?,
    })
}

fn terminated(line: &str) -> String {
    if line.ends_with('\n') {
        line.to_string()
    } else {
        format!("{}\n", line)
    }
}

#[async_trait]
impl Store for SqliteStore {
    async fn insert_tenant(&self, tenant: &Tenant) -> Result<(), DeployError> {
        sqlx::query(
            r#"INSERT INTO tenants
               (id, token, model, channel, api_key, status, runtime_status, container_name,
                container_id, runtime_port, webhook_secret, webhook_url, last_heartbeat_at, created_at)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(&tenant.id)
        .bind(&tenant.token)
        .bind(&tenant.model)
        .bind(&tenant.channel)
        .bind(&tenant.api_key)
        .bind(tenant.status.as_str())
        .bind(tenant.runtime_status.as_str())
        .bind(&tenant.container_name)
        .bind(&tenant.container_id)
        .bind(tenant.runtime_port.map(i64::from))
        .bind(&tenant.webhook_secret)
        .bind(&tenant.webhook_url)
        .bind(tenant.last_heartbeat_at)
        .bind(tenant.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_tenant(&self, id: &str) -> Result<Option<Tenant>, DeployError> {
        let row = sqlx::query("SELECT * FROM tenants WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(tenant_from_row).transpose()
    }

    async fn save_tenant(&self, tenant: &Tenant) -> Result<(), DeployError> {
        let result = sqlx::query(
            r#"UPDATE tenants SET
                 token = ?, model = ?, channel = ?, api_key = ?, status = ?, runtime_status = ?,
                 container_name = ?, container_id = ?, runtime_port = ?, webhook_secret = ?,
                 webhook_url = ?, last_heartbeat_at = ?
               WHERE id = ?"#,
        )
        .bind(&tenant.token)
        .bind(&tenant.model)
        .bind(&tenant.channel)
        .bind(&tenant.api_key)
        .bind(tenant.status.as_str())
        .bind(tenant.runtime_status.as_str())
        .bind(&tenant.container_name)
        .bind(&tenant.container_id)
        .bind(tenant.runtime_port.map(i64::from))
        .bind(&tenant.webhook_secret)
        .bind(&tenant.webhook_url)
        .bind(tenant.last_heartbeat_at)
        .bind(&tenant.id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DeployError::NotFound(format!("Tenant {}", tenant.id)));
        }
        Ok(())
    }

    async fn delete_tenant(&self, id: &str) -> Result<bool, DeployError> {
        // Deployments and jobs go with it through ON DELETE CASCADE
        let result = sqlx::query("DELETE FROM tenants WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn insert_deployment(&self, deployment: &Deployment) -> Result<(), DeployError> {
        sqlx::query(
            "INSERT INTO deployments (id, tenant_id, status, logs, error, created_at) VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(&deployment.id)
        .bind(&deployment.tenant_id)
        .bind(deployment.status.as_str())
        .bind(&deployment.logs)
        .bind(&deployment.error)
        .bind(deployment.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_deployment(&self, id: &str) -> Result<Option<Deployment>, DeployError> {
        let row = sqlx::query(&format!("SELECT {} FROM deployments WHERE id = ?", DEPLOYMENT_COLUMNS))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(deployment_from_row).transpose()
    }

    async fn set_deployment_status(
        &self,
        id: &str,
        status: DeploymentStatus,
        error: Option<&str>,
    ) -> Result<(), DeployError> {
        sqlx::query("UPDATE deployments SET status = ?, error = COALESCE(?, error) WHERE id = ?")
            .bind(status.as_str())
            .bind(error)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn append_deployment_log(&self, id: &str, line: &str) -> Result<(), DeployError> {
        sqlx::query("UPDATE deployments SET logs = logs || ? WHERE id = ?")
            .bind(terminated(line))
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn insert_job(&self, job: &DeploymentJob) -> Result<(), DeployError> {
        sqlx::query(&format!(
            "INSERT INTO deployment_jobs ({}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            JOB_COLUMNS
        ))
        .bind(&job.id)
        .bind(&job.tenant_id)
        .bind(job.job_type.as_str())
        .bind(job.status.as_str())
        .bind(&job.payload)
        .bind(i64::from(job.attempt))
        .bind(job.started_at)
        .bind(job.finished_at)
        .bind(&job.logs)
        .bind(&job.error)
        .bind(job.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_job(&self, id: &str) -> Result<Option<DeploymentJob>, DeployError> {
        let row = sqlx::query(&format!("SELECT {} FROM deployment_jobs WHERE id = ?", JOB_COLUMNS))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(job_from_row).transpose()
    }

    async fn oldest_queued_job(&self) -> Result<Option<DeploymentJob>, DeployError> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM deployment_jobs WHERE status = ? ORDER BY seq ASC LIMIT 1",
            JOB_COLUMNS
        ))
        .bind(JobStatus::Queued.as_str())
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(job_from_row).transpose()
    }

    async fn try_claim_job(&self, id: &str, started_at: DateTime<Utc>) -> Result<bool, DeployError> {
        let result = sqlx::query(
            r#"UPDATE deployment_jobs
               SET status = ?, started_at = ?, attempt = attempt + 1
               WHERE id = ? AND status = ?"#,
        )
        .bind(JobStatus::Running.as_str())
        .bind(started_at)
        .bind(id)
        .bind(JobStatus::Queued.as_str())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn append_job_log(&self, id: &str, line: &str) -> Result<(), DeployError> {
        sqlx::query("UPDATE deployment_jobs SET logs = logs || ? WHERE id = ?")
            .bind(terminated(line))
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn finish_job(
        &self,
        id: &str,
        status: JobStatus,
        error: Option<&str>,
        finished_at: DateTime<Utc>,
    ) -> Result<(), DeployError> {
        let result = sqlx::query(
            "UPDATE deployment_jobs SET status = ?, error = ?, finished_at = ? WHERE id = ?",
        )
        .bind(status.as_str())
        .bind(error)
        .bind(finished_at)
        .bind(id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DeployError::NotFound(format!("Job {}", id)));
        }
        Ok(())
    }

    async fn tenant_jobs(&self, tenant_id: &str) -> Result<Vec<DeploymentJob>, DeployError> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM deployment_jobs WHERE tenant_id = ? ORDER BY seq DESC",
            JOB_COLUMNS
        ))
        .bind(tenant_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(job_from_row).collect()
    }

    async fn tenant_deployments(&self, tenant_id: &str) -> Result<Vec<Deployment>, DeployError> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM deployments WHERE tenant_id = ? ORDER BY seq DESC",
            DEPLOYMENT_COLUMNS
        ))
        .bind(tenant_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(deployment_from_row).collect()
    }
}
