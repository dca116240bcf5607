//! Postgres-backed store implementing every storage trait.
//!
//! Schema and migrations are owned elsewhere; the queries below assume:
//!
//! ```text
//! users              (id BIGINT PK, username TEXT UNIQUE, admin BOOL)
//! groups             (id BIGINT PK, name TEXT UNIQUE)
//! group_user         (group_id BIGINT, user_id BIGINT, group_admin BOOL)
//! project_group      (group_id BIGINT, project_key TEXT, role INT)
//! pipeline_group     (group_id BIGINT, project_key TEXT, pipeline_name TEXT, role INT)
//! application_group  (group_id BIGINT, project_key TEXT, application_id BIGINT,
//!                     application_name TEXT, role INT)
//! environment_group  (group_id BIGINT, project_key TEXT, environment_name TEXT, role INT)
//! hatchery           (id BIGINT PK, uid TEXT UNIQUE, name TEXT UNIQUE, group_id BIGINT)
//! worker_model       (id BIGINT PK, name TEXT, group_id BIGINT)
//! worker_token       (token TEXT PK, group_id BIGINT, expires_at TIMESTAMPTZ NULL)
//! worker             (id UUID PK, name TEXT UNIQUE, group_id BIGINT, hatchery_id BIGINT NULL,
//!                     model_id BIGINT NULL, status TEXT, last_beat TIMESTAMPTZ,
//!                     binary_capabilities TEXT[], uptodate BOOL)
//! job                (id BIGINT PK, worker_name TEXT, worker_id UUID)
//! ```
//!
//! `role` holds [`PermissionLevel::code`].

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Postgres, Row, Transaction};
use tracing::instrument;

use tollgate_auth::{
    ApplicationGroup, EnvironmentGroup, Group, HatcheryPrincipal, PermissionLevel,
    PermissionStore, PipelineGroup, PrincipalStore, ProjectGroup, UserPrincipal, WorkerModel,
    WorkerPrincipal,
};
use tollgate_core::{
    ApplicationId, GroupId, HatcheryId, JobId, ModelId, StoreError, StoreResult, UserId, WorkerId,
    WorkerStatus,
};
use tollgate_fleet::{
    Hatchery, JobAssignment, JobLookup, RegistrationStore, RegistryTx, Worker, WorkerRegistry,
    WorkerToken,
};

const WORKER_COLUMNS: &str = "id, name, group_id, hatchery_id, model_id, status, last_beat, \
                              binary_capabilities, uptodate";

#[derive(Debug, Clone)]
pub struct PostgresStore {
    pool: Arc<PgPool>,
}

impl PostgresStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }

    pub async fn connect(database_url: &str) -> StoreResult<Self> {
        let pool = PgPool::connect(database_url)
            .await
            .map_err(|e| map_sqlx_error("connect", e))?;
        Ok(Self::new(pool))
    }

    async fn load_permission_rows<T>(
        &self,
        operation: &str,
        sql: &str,
        group_id: GroupId,
        map: impl Fn(&PgRow) -> StoreResult<T>,
    ) -> StoreResult<Vec<T>> {
        let rows = sqlx::query(sql)
            .bind(group_id.get())
            .fetch_all(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error(operation, e))?;
        rows.iter().map(map).collect()
    }
}

#[async_trait]
impl PrincipalStore for PostgresStore {
    #[instrument(skip(self), err)]
    async fn load_user_by_username(&self, username: &str) -> StoreResult<UserPrincipal> {
        let row = sqlx::query("SELECT id, username, admin FROM users WHERE username = $1")
            .bind(username)
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("load_user_by_username", e))?
            .ok_or_else(|| StoreError::not_found("user", username))?;

        Ok(UserPrincipal {
            id: UserId::new(get(&row, "id")?),
            username: get(&row, "username")?,
            admin: get(&row, "admin")?,
            groups: Vec::new(),
        })
    }

    #[instrument(skip_all, err)]
    async fn load_hatchery_by_uid(&self, uid: &str) -> StoreResult<HatcheryPrincipal> {
        let row = sqlx::query("SELECT id, name, group_id FROM hatchery WHERE uid = $1")
            .bind(uid)
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("load_hatchery_by_uid", e))?
            .ok_or_else(|| StoreError::not_found("hatchery", "<uid>"))?;

        Ok(HatcheryPrincipal {
            id: HatcheryId::new(get(&row, "id")?),
            name: get(&row, "name")?,
            group_id: GroupId::new(get(&row, "group_id")?),
            groups: Vec::new(),
        })
    }

    #[instrument(skip(self), err)]
    async fn load_worker_principal(&self, id: WorkerId) -> StoreResult<WorkerPrincipal> {
        let w = WorkerRegistry::load_worker(self, id).await?;
        Ok(WorkerPrincipal {
            id: w.id,
            name: w.name,
            group_id: w.group_id,
            hatchery_id: w.hatchery_id,
            model_id: w.model_id,
            status: w.status,
            last_beat: w.last_beat,
            groups: Vec::new(),
        })
    }
}

#[async_trait]
impl PermissionStore for PostgresStore {
    #[instrument(skip(self), err)]
    async fn load_user_groups(&self, user_id: UserId) -> StoreResult<Vec<Group>> {
        let rows = sqlx::query("SELECT group_id FROM group_user WHERE user_id = $1 ORDER BY group_id")
            .bind(user_id.get())
            .fetch_all(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("load_user_groups", e))?;

        let mut groups = Vec::with_capacity(rows.len());
        for row in &rows {
            groups.push(self.load_group(GroupId::new(get(row, "group_id")?)).await?);
        }
        Ok(groups)
    }

    #[instrument(skip(self), err)]
    async fn load_group(&self, id: GroupId) -> StoreResult<Group> {
        let row = sqlx::query("SELECT id, name FROM groups WHERE id = $1")
            .bind(id.get())
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("load_group", e))?
            .ok_or_else(|| StoreError::not_found("group", id))?;

        let mut group = Group::new(id, get::<String>(&row, "name")?);

        group.admins = self
            .load_permission_rows(
                "load_group_admins",
                "SELECT user_id FROM group_user WHERE group_id = $1 AND group_admin",
                id,
                |r| Ok(UserId::new(get(r, "user_id")?)),
            )
            .await?;

        group.project_groups = self
            .load_permission_rows(
                "load_project_groups",
                "SELECT project_key, role FROM project_group WHERE group_id = $1",
                id,
                |r| {
                    Ok(ProjectGroup {
                        project_key: get(r, "project_key")?,
                        permission: role(r)?,
                    })
                },
            )
            .await?;

        group.pipeline_groups = self
            .load_permission_rows(
                "load_pipeline_groups",
                "SELECT project_key, pipeline_name, role FROM pipeline_group WHERE group_id = $1",
                id,
                |r| {
                    Ok(PipelineGroup {
                        pipeline_name: get(r, "pipeline_name")?,
                        project_key: get(r, "project_key")?,
                        permission: role(r)?,
                    })
                },
            )
            .await?;

        group.application_groups = self
            .load_permission_rows(
                "load_application_groups",
                "SELECT project_key, application_id, application_name, role \
                 FROM application_group WHERE group_id = $1",
                id,
                |r| {
                    Ok(ApplicationGroup {
                        application_id: ApplicationId::new(get(r, "application_id")?),
                        application_name: get(r, "application_name")?,
                        project_key: get(r, "project_key")?,
                        permission: role(r)?,
                    })
                },
            )
            .await?;

        group.environment_groups = self
            .load_permission_rows(
                "load_environment_groups",
                "SELECT project_key, environment_name, role FROM environment_group WHERE group_id = $1",
                id,
                |r| {
                    Ok(EnvironmentGroup {
                        environment_name: get(r, "environment_name")?,
                        project_key: get(r, "project_key")?,
                        permission: role(r)?,
                    })
                },
            )
            .await?;

        Ok(group)
    }

    #[instrument(skip(self), err)]
    async fn load_group_by_name(&self, name: &str) -> StoreResult<Group> {
        let row = sqlx::query("SELECT id FROM groups WHERE name = $1")
            .bind(name)
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("load_group_by_name", e))?
            .ok_or_else(|| StoreError::not_found("group", name))?;
        self.load_group(GroupId::new(get(&row, "id")?)).await
    }

    #[instrument(skip(self), err)]
    async fn load_worker_model(&self, id: ModelId) -> StoreResult<WorkerModel> {
        let row = sqlx::query("SELECT id, name, group_id FROM worker_model WHERE id = $1")
            .bind(id.get())
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("load_worker_model", e))?
            .ok_or_else(|| StoreError::not_found("worker_model", id))?;

        Ok(WorkerModel {
            id,
            name: get(&row, "name")?,
            group_id: GroupId::new(get(&row, "group_id")?),
        })
    }
}

#[async_trait]
impl WorkerRegistry for PostgresStore {
    async fn begin(&self) -> StoreResult<Box<dyn RegistryTx>> {
        let tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;
        Ok(Box::new(PgRegistryTx { tx }))
    }

    #[instrument(skip(self), err)]
    async fn load_worker(&self, id: WorkerId) -> StoreResult<Worker> {
        let row = sqlx::query(&format!("SELECT {WORKER_COLUMNS} FROM worker WHERE id = $1"))
            .bind(id.as_uuid())
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("load_worker", e))?
            .ok_or_else(|| StoreError::not_found("worker", id))?;
        worker_from_row(&row)
    }

    #[instrument(skip(self), err)]
    async fn load_worker_by_name(&self, name: &str) -> StoreResult<Worker> {
        let row = sqlx::query(&format!("SELECT {WORKER_COLUMNS} FROM worker WHERE name = $1"))
            .bind(name)
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("load_worker_by_name", e))?
            .ok_or_else(|| StoreError::not_found("worker", name))?;
        worker_from_row(&row)
    }

    #[instrument(skip(self, worker), fields(worker_id = %worker.id, name = %worker.name), err)]
    async fn insert_worker(&self, worker: &Worker) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO worker (
                id, name, group_id, hatchery_id, model_id, status, last_beat,
                binary_capabilities, uptodate
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(worker.id.as_uuid())
        .bind(&worker.name)
        .bind(worker.group_id.get())
        .bind(worker.hatchery_id.map(HatcheryId::get))
        .bind(worker.model_id.map(ModelId::get))
        .bind(worker.status.as_str())
        .bind(worker.last_beat)
        .bind(&worker.binary_capabilities)
        .bind(worker.uptodate)
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("insert_worker", e))?;
        Ok(())
    }

    async fn refresh_worker(&self, id: WorkerId, at: DateTime<Utc>) -> StoreResult<()> {
        let res = sqlx::query("UPDATE worker SET last_beat = $2 WHERE id = $1")
            .bind(id.as_uuid())
            .bind(at)
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("refresh_worker", e))?;
        if res.rows_affected() == 0 {
            return Err(StoreError::not_found("worker", id));
        }
        Ok(())
    }

    #[instrument(skip(self), err)]
    async fn set_status(&self, id: WorkerId, status: WorkerStatus) -> StoreResult<()> {
        let res = sqlx::query("UPDATE worker SET status = $2 WHERE id = $1")
            .bind(id.as_uuid())
            .bind(status.as_str())
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("set_status", e))?;
        if res.rows_affected() == 0 {
            return Err(StoreError::not_found("worker", id));
        }
        Ok(())
    }

    #[instrument(skip(self), err)]
    async fn compare_and_set_status(
        &self,
        id: WorkerId,
        expected: WorkerStatus,
        new: WorkerStatus,
    ) -> StoreResult<bool> {
        let row = sqlx::query(
            r#"
            WITH target AS (SELECT id, status FROM worker WHERE id = $1),
                 updated AS (
                     UPDATE worker SET status = $3
                     WHERE id = $1 AND status = $2
                     RETURNING id
                 )
            SELECT
                EXISTS (SELECT 1 FROM target) AS found,
                EXISTS (SELECT 1 FROM updated) AS applied
            "#,
        )
        .bind(id.as_uuid())
        .bind(expected.as_str())
        .bind(new.as_str())
        .fetch_one(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("compare_and_set_status", e))?;

        if !get::<bool>(&row, "found")? {
            return Err(StoreError::not_found("worker", id));
        }
        get(&row, "applied")
    }

    #[instrument(skip(self), err)]
    async fn delete_worker(&self, id: WorkerId) -> StoreResult<bool> {
        let res = sqlx::query("DELETE FROM worker WHERE id = $1")
            .bind(id.as_uuid())
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("delete_worker", e))?;
        Ok(res.rows_affected() > 0)
    }

    #[instrument(skip(self), err)]
    async fn list_workers(&self, status: Option<WorkerStatus>) -> StoreResult<Vec<Worker>> {
        let rows = sqlx::query(&format!(
            "SELECT {WORKER_COLUMNS} FROM worker WHERE ($1::TEXT IS NULL OR status = $1) ORDER BY name"
        ))
        .bind(status.map(WorkerStatus::as_str))
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("list_workers", e))?;
        rows.iter().map(worker_from_row).collect()
    }
}

/// Rolled back by sqlx when dropped without `commit`.
struct PgRegistryTx {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl RegistryTx for PgRegistryTx {
    async fn load_worker(&mut self, id: WorkerId) -> StoreResult<Worker> {
        let row = sqlx::query(&format!("SELECT {WORKER_COLUMNS} FROM worker WHERE id = $1 FOR UPDATE"))
            .bind(id.as_uuid())
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error("tx_load_worker", e))?
            .ok_or_else(|| StoreError::not_found("worker", id))?;
        worker_from_row(&row)
    }

    async fn update_status(&mut self, id: WorkerId, status: WorkerStatus) -> StoreResult<()> {
        let res = sqlx::query("UPDATE worker SET status = $2 WHERE id = $1")
            .bind(id.as_uuid())
            .bind(status.as_str())
            .execute(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error("tx_update_status", e))?;
        if res.rows_affected() == 0 {
            return Err(StoreError::not_found("worker", id));
        }
        Ok(())
    }

    async fn commit(self: Box<Self>) -> StoreResult<()> {
        self.tx
            .commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))
    }
}

#[async_trait]
impl RegistrationStore for PostgresStore {
    #[instrument(skip_all, err)]
    async fn load_token(&self, token: &str) -> StoreResult<WorkerToken> {
        let row = sqlx::query("SELECT token, group_id, expires_at FROM worker_token WHERE token = $1")
            .bind(token)
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("load_token", e))?
            .ok_or_else(|| StoreError::not_found("worker_token", "<redacted>"))?;

        Ok(WorkerToken {
            token: get(&row, "token")?,
            group_id: GroupId::new(get(&row, "group_id")?),
            expires_at: get(&row, "expires_at")?,
        })
    }

    #[instrument(skip(self), err)]
    async fn load_hatchery_by_name(&self, name: &str) -> StoreResult<Hatchery> {
        let row = sqlx::query("SELECT id, uid, name, group_id FROM hatchery WHERE name = $1")
            .bind(name)
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("load_hatchery_by_name", e))?
            .ok_or_else(|| StoreError::not_found("hatchery", name))?;

        Ok(Hatchery {
            id: HatcheryId::new(get(&row, "id")?),
            uid: get(&row, "uid")?,
            name: get(&row, "name")?,
            group_id: GroupId::new(get(&row, "group_id")?),
        })
    }

    async fn worker_model_exists(&self, id: ModelId) -> StoreResult<bool> {
        let row = sqlx::query("SELECT EXISTS (SELECT 1 FROM worker_model WHERE id = $1) AS found")
            .bind(id.get())
            .fetch_one(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("worker_model_exists", e))?;
        get(&row, "found")
    }
}

#[async_trait]
impl JobLookup for PostgresStore {
    #[instrument(skip(self), err)]
    async fn load_job(&self, id: JobId) -> StoreResult<JobAssignment> {
        let row = sqlx::query("SELECT worker_name, worker_id FROM job WHERE id = $1")
            .bind(id.get())
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("load_job", e))?
            .ok_or_else(|| StoreError::not_found("job", id))?;

        Ok(JobAssignment {
            job_id: id,
            worker_name: get(&row, "worker_name")?,
            worker_id: WorkerId::from_uuid(get(&row, "worker_id")?),
        })
    }
}

fn worker_from_row(row: &PgRow) -> StoreResult<Worker> {
    let status: String = get(row, "status")?;
    let status = status
        .parse::<WorkerStatus>()
        .map_err(|e| StoreError::Backend(format!("worker row: {e}")))?;

    Ok(Worker {
        id: WorkerId::from_uuid(get(row, "id")?),
        name: get(row, "name")?,
        group_id: GroupId::new(get(row, "group_id")?),
        hatchery_id: get::<Option<i64>>(row, "hatchery_id")?.map(HatcheryId::new),
        model_id: get::<Option<i64>>(row, "model_id")?.map(ModelId::new),
        status,
        last_beat: get(row, "last_beat")?,
        binary_capabilities: get::<Option<Vec<String>>>(row, "binary_capabilities")?.unwrap_or_default(),
        uptodate: get(row, "uptodate")?,
    })
}

fn role(row: &PgRow) -> StoreResult<PermissionLevel> {
    let code: i32 = get(row, "role")?;
    PermissionLevel::from_code(code)
        .ok_or_else(|| StoreError::Backend(format!("unknown permission level {code}")))
}

fn get<'r, T>(row: &'r PgRow, column: &str) -> StoreResult<T>
where
    T: sqlx::Decode<'r, Postgres> + sqlx::Type<Postgres>,
{
    row.try_get(column)
        .map_err(|e| StoreError::Backend(format!("failed to read column {column}: {e}")))
}

/// Map SQLx errors to StoreError.
fn map_sqlx_error(operation: &str, err: sqlx::Error) -> StoreError {
    match err {
        sqlx::Error::Database(db_err) => {
            let msg = format!("database error in {}: {}", operation, db_err.message());
            match db_err.code().as_deref() {
                // unique violation
                Some("23505") => StoreError::Conflict(msg),
                _ => StoreError::Backend(msg),
            }
        }
        sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) | sqlx::Error::Tls(_) => {
            StoreError::Unavailable(format!("{} in {}", err, operation))
        }
        sqlx::Error::RowNotFound => {
            StoreError::Backend(format!("unexpected row not found in {}", operation))
        }
        _ => StoreError::Backend(format!("sqlx error in {}: {}", operation, err)),
    }
}
