//! Postgres (Diesel) implementation of `flow_core::RunStore`.
//!
//! Diesel/r2d2 are synchronous; each trait method off-loads its blocking
//! query onto `tokio::task::spawn_blocking` rather than pulling in an async
//! Postgres driver. Every entity is stored as a single `data JSONB` column
//! (see `schema.rs`), keyed by the columns the contract actually filters
//! on.

use std::sync::Arc;

use async_trait::async_trait;
use diesel::prelude::*;
use diesel::r2d2::{self, ConnectionManager};
use diesel::upsert::excluded;
use log::warn;
use serde_json::Value;
use uuid::Uuid;

use flow_core::errors::CoreEngineError;
use flow_core::RunStore;
use flow_domain::{
    BlockDefinition, BlockDefinitionSet, BlockGroupRun, Run, RunId, StepRun, StepRunId, TenantId, WorkflowVersion,
    WorkflowVersionId,
};

use crate::error::PersistenceError;
use crate::migrations::run_pending_migrations;
use crate::schema::{block_definitions, block_group_runs, runs, step_runs, workflow_versions};

pub type PgPool = r2d2::Pool<ConnectionManager<PgConnection>>;

/// Abstracts over how a connection is obtained, so tests can swap in a fake
/// provider without standing up r2d2.
pub trait ConnectionProvider: Send + Sync + 'static {
    fn connection(&self) -> Result<r2d2::PooledConnection<ConnectionManager<PgConnection>>, PersistenceError>;
}

pub struct PoolProvider {
    pub pool: PgPool,
}

impl ConnectionProvider for PoolProvider {
    fn connection(&self) -> Result<r2d2::PooledConnection<ConnectionManager<PgConnection>>, PersistenceError> {
        self.pool.get().map_err(|e| PersistenceError::TransientIo(format!("pool error: {e}")))
    }
}

fn is_retryable(e: &PersistenceError) -> bool {
    match e {
        PersistenceError::SerializationConflict | PersistenceError::TransientIo(_) => true,
        PersistenceError::Unknown(msg) => {
            let m = msg.to_lowercase();
            m.contains("deadlock detected")
                || m.contains("could not serialize access due to concurrent update")
                || m.contains("connection closed")
                || m.contains("connection refused")
                || m.contains("timeout")
        }
        _ => false,
    }
}

fn with_retry<F, T>(mut f: F) -> Result<T, PersistenceError>
where
    F: FnMut() -> Result<T, PersistenceError>,
{
    let mut attempts = 0;
    loop {
        match f() {
            Err(e) if is_retryable(&e) && attempts < 3 => {
                let delay_ms = 15 * (attempts + 1);
                warn!("retryable persistence error (attempt {}): {e} -> sleeping {delay_ms}ms", attempts + 1);
                std::thread::sleep(std::time::Duration::from_millis(delay_ms));
                attempts += 1;
            }
            r => return r,
        }
    }
}

#[derive(Queryable, Insertable)]
#[diesel(table_name = runs)]
struct RunRow {
    id: Uuid,
    tenant_id: Uuid,
    workflow_version_id: Uuid,
    status: String,
    data: Value,
}

#[derive(Queryable, Insertable)]
#[diesel(table_name = step_runs)]
struct StepRunRow {
    id: Uuid,
    run_id: Uuid,
    step_id: Uuid,
    sequence_number: i64,
    data: Value,
}

#[derive(Queryable, Insertable)]
#[diesel(table_name = block_group_runs)]
struct BlockGroupRunRow {
    id: Uuid,
    run_id: Uuid,
    block_group_id: Uuid,
    data: Value,
}

#[derive(Queryable, Insertable)]
#[diesel(table_name = workflow_versions)]
struct WorkflowVersionRow {
    id: Uuid,
    tenant_id: Uuid,
    data: Value,
}

#[derive(Queryable, Insertable)]
#[diesel(table_name = block_definitions)]
struct BlockDefinitionRow {
    id: Uuid,
    tenant_id: Uuid,
    slug: String,
    data: Value,
}

/// Postgres-backed `RunStore`. Generic over `ConnectionProvider` so tests can
/// swap in a fake without a live database.
pub struct PgRunStore<P: ConnectionProvider> {
    provider: Arc<P>,
}

impl<P: ConnectionProvider> PgRunStore<P> {
    pub fn new(provider: P) -> Self {
        Self { provider: Arc::new(provider) }
    }
}

impl<P: ConnectionProvider> Clone for PgRunStore<P> {
    fn clone(&self) -> Self {
        Self { provider: Arc::clone(&self.provider) }
    }
}

fn internal(e: PersistenceError) -> CoreEngineError {
    e.into()
}

async fn blocking<P, F, T>(provider: Arc<P>, f: F) -> Result<T, CoreEngineError>
where
    P: ConnectionProvider,
    F: FnOnce(&Arc<P>) -> Result<T, PersistenceError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(move || f(&provider))
        .await
        .map_err(|e| CoreEngineError::Internal(format!("blocking task panicked: {e}")))?
        .map_err(internal)
}

#[async_trait]
impl<P: ConnectionProvider> RunStore for PgRunStore<P> {
    async fn upsert_run(&self, run: &Run) -> Result<(), CoreEngineError> {
        let row = RunRow {
            id: run.id.0,
            tenant_id: run.tenant_id.0,
            workflow_version_id: run.workflow_version.0,
            status: format!("{:?}", run.status),
            data: serde_json::to_value(run).expect("serialize run"),
        };
        blocking(Arc::clone(&self.provider), move |provider| {
            with_retry(|| {
                let mut conn = provider.connection()?;
                diesel::insert_into(runs::table)
                    .values(&row)
                    .on_conflict(runs::id)
                    .do_update()
                    .set((runs::status.eq(excluded(runs::status)), runs::data.eq(excluded(runs::data))))
                    .execute(&mut conn)
                    .map(|_| ())
                    .map_err(PersistenceError::from)
            })
        })
        .await
    }

    async fn get_run(&self, id: RunId) -> Result<Option<Run>, CoreEngineError> {
        blocking(Arc::clone(&self.provider), move |provider| {
            with_retry(|| {
                let mut conn = provider.connection()?;
                let row: Option<RunRow> = runs::table.find(id.0).first(&mut conn).optional()?;
                Ok(row.map(|r| serde_json::from_value(r.data).expect("deserialize run")))
            })
        })
        .await
    }

    async fn append_step_run(&self, step_run: &StepRun) -> Result<(), CoreEngineError> {
        let row = StepRunRow {
            id: step_run.id.0,
            run_id: step_run.run_id.0,
            step_id: step_run.step_id.0,
            sequence_number: step_run.sequence_number as i64,
            data: serde_json::to_value(step_run).expect("serialize step_run"),
        };
        blocking(Arc::clone(&self.provider), move |provider| {
            with_retry(|| {
                let mut conn = provider.connection()?;
                diesel::insert_into(step_runs::table).values(&row).execute(&mut conn).map(|_| ()).map_err(PersistenceError::from)
            })
        })
        .await
    }

    async fn update_step_run(&self, step_run: &StepRun) -> Result<(), CoreEngineError> {
        let id = step_run.id.0;
        let data = serde_json::to_value(step_run).expect("serialize step_run");
        blocking(Arc::clone(&self.provider), move |provider| {
            with_retry(|| {
                let mut conn = provider.connection()?;
                diesel::update(step_runs::table.find(id))
                    .set(step_runs::data.eq(&data))
                    .execute(&mut conn)
                    .map(|_| ())
                    .map_err(PersistenceError::from)
            })
        })
        .await
    }

    async fn list_step_runs(&self, run_id: RunId) -> Result<Vec<StepRun>, CoreEngineError> {
        blocking(Arc::clone(&self.provider), move |provider| {
            with_retry(|| {
                let mut conn = provider.connection()?;
                let rows: Vec<StepRunRow> = step_runs::table
                    .filter(step_runs::run_id.eq(run_id.0))
                    .order(step_runs::sequence_number.asc())
                    .load(&mut conn)?;
                Ok(rows.into_iter().map(|r| serde_json::from_value(r.data).expect("deserialize step_run")).collect())
            })
        })
        .await
    }

    async fn get_step_run(&self, id: StepRunId) -> Result<Option<StepRun>, CoreEngineError> {
        blocking(Arc::clone(&self.provider), move |provider| {
            with_retry(|| {
                let mut conn = provider.connection()?;
                let row: Option<StepRunRow> = step_runs::table.find(id.0).first(&mut conn).optional()?;
                Ok(row.map(|r| serde_json::from_value(r.data).expect("deserialize step_run")))
            })
        })
        .await
    }

    async fn upsert_block_group_run(&self, group_run: &BlockGroupRun) -> Result<(), CoreEngineError> {
        let row = BlockGroupRunRow {
            id: group_run.id.0,
            run_id: group_run.run_id.0,
            block_group_id: group_run.block_group_id.0,
            data: serde_json::to_value(group_run).expect("serialize block_group_run"),
        };
        blocking(Arc::clone(&self.provider), move |provider| {
            with_retry(|| {
                let mut conn = provider.connection()?;
                diesel::insert_into(block_group_runs::table)
                    .values(&row)
                    .on_conflict(block_group_runs::id)
                    .do_update()
                    .set(block_group_runs::data.eq(excluded(block_group_runs::data)))
                    .execute(&mut conn)
                    .map(|_| ())
                    .map_err(PersistenceError::from)
            })
        })
        .await
    }

    async fn list_block_group_runs(&self, run_id: RunId) -> Result<Vec<BlockGroupRun>, CoreEngineError> {
        blocking(Arc::clone(&self.provider), move |provider| {
            with_retry(|| {
                let mut conn = provider.connection()?;
                let rows: Vec<BlockGroupRunRow> =
                    block_group_runs::table.filter(block_group_runs::run_id.eq(run_id.0)).load(&mut conn)?;
                Ok(rows.into_iter().map(|r| serde_json::from_value(r.data).expect("deserialize block_group_run")).collect())
            })
        })
        .await
    }

    async fn find_workflow_version(&self, id: WorkflowVersionId) -> Result<Option<WorkflowVersion>, CoreEngineError> {
        blocking(Arc::clone(&self.provider), move |provider| {
            with_retry(|| {
                let mut conn = provider.connection()?;
                let row: Option<WorkflowVersionRow> = workflow_versions::table.find(id.0).first(&mut conn).optional()?;
                Ok(row.map(|r| serde_json::from_value(r.data).expect("deserialize workflow_version")))
            })
        })
        .await
    }

    async fn find_block_definition(
        &self,
        tenant_id: TenantId,
        slug: &str,
    ) -> Result<Option<BlockDefinition>, CoreEngineError> {
        let slug = slug.to_string();
        blocking(Arc::clone(&self.provider), move |provider| {
            with_retry(|| {
                let mut conn = provider.connection()?;
                let row: Option<BlockDefinitionRow> = block_definitions::table
                    .filter(block_definitions::tenant_id.eq(tenant_id.0))
                    .filter(block_definitions::slug.eq(&slug))
                    .first(&mut conn)
                    .optional()?;
                Ok(row.map(|r| serde_json::from_value(r.data).expect("deserialize block_definition")))
            })
        })
        .await
    }

    async fn block_definitions_for(&self, version: &WorkflowVersion) -> Result<BlockDefinitionSet, CoreEngineError> {
        let tenant_id = version.tenant_id.0;
        let ids: Vec<Uuid> = version.steps.iter().filter_map(|s| s.block_definition_id.map(|id| id.0)).collect();
        blocking(Arc::clone(&self.provider), move |provider| {
            with_retry(|| {
                let mut conn = provider.connection()?;
                let mut seen = std::collections::HashSet::new();
                let mut definitions = Vec::new();
                let mut frontier = ids.clone();
                while let Some(id) = frontier.pop() {
                    if !seen.insert(id) {
                        continue;
                    }
                    let row: Option<BlockDefinitionRow> = block_definitions::table
                        .filter(block_definitions::tenant_id.eq(tenant_id))
                        .filter(block_definitions::id.eq(id))
                        .first(&mut conn)
                        .optional()?;
                    if let Some(row) = row {
                        let def: BlockDefinition = serde_json::from_value(row.data).expect("deserialize block_definition");
                        if let Some(parent) = def.parent_block_id {
                            frontier.push(parent.0);
                        }
                        definitions.push(def);
                    }
                }
                Ok(BlockDefinitionSet { definitions })
            })
        })
        .await
    }
}

pub fn build_pool(database_url: &str, min_size: u32, max_size: u32) -> Result<PgPool, PersistenceError> {
    let validated_min = min_size.max(1);
    let validated_max = max_size.max(1).max(validated_min);
    let manager = ConnectionManager::<PgConnection>::new(database_url);
    let pool = r2d2::Pool::builder()
        .min_idle(Some(validated_min))
        .max_size(validated_max)
        .build(manager)
        .map_err(|e| PersistenceError::TransientIo(format!("pool build: {e}")))?;
    {
        let mut conn = pool.get().map_err(|e| PersistenceError::TransientIo(format!("pool get for migrations: {e}")))?;
        run_pending_migrations(&mut conn)?;
    }
    Ok(pool)
}

pub fn build_dev_pool_from_env() -> Result<PgPool, PersistenceError> {
    crate::config::init_dotenv();
    let cfg = crate::config::DbConfig::from_env();
    build_pool(&cfg.url, cfg.min_connections, cfg.max_connections)
}
