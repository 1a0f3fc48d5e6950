//! flow-persistence: the Postgres-backed `RunStore` implementation.
//!
//! Modules:
//! - `pg`: Diesel/r2d2 implementation of `flow_core::RunStore`.
//! - `migrations`: embedded Diesel migration runner.
//! - `config`: `DATABASE_URL`/pool-size configuration from the environment.
//! - `schema`: hand-written Diesel table definitions.

pub mod config;
pub mod error;
pub mod migrations;
pub mod pg;
pub mod schema;

pub use config::init_dotenv;
pub use error::PersistenceError;
pub use pg::{build_dev_pool_from_env, build_pool, ConnectionProvider, PgPool, PgRunStore, PoolProvider};
