use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::SqlitePool;

use crate::Result;

pub mod groups;
pub mod nodes;
pub mod services;

pub type Db = SqlitePool;

pub use groups::{GroupRecord, NewGroup};
pub use nodes::{NewNode, NodeKind, NodeRecord, NodeStatus, NodeUpdate};
pub use services::{NewService, ServiceRecord};

static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("./migrations");

pub async fn init_pool(database_url: &str) -> Result<Db> {
    let is_memory = database_url.starts_with("sqlite::memory");

    ensure_db_dir(database_url)?;

    let mut opts = SqliteConnectOptions::from_str(database_url)?
        .create_if_missing(true)
        // ON DELETE SET NULL on the node back-references needs this.
        .foreign_keys(true);

    let pool_opts = if is_memory {
        // A private in-memory database lives and dies with its connection,
        // so pin the pool to exactly one connection and never recycle it.
        // Each pool then owns an isolated database with nothing on disk.
        SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
    } else {
        opts = opts.journal_mode(SqliteJournalMode::Wal);
        SqlitePoolOptions::new().max_connections(5)
    };

    let pool = pool_opts
        .acquire_timeout(Duration::from_secs(5))
        .connect_with(opts)
        .await?;

    Ok(pool)
}

fn ensure_db_dir(database_url: &str) -> Result<()> {
    if let Some(path_str) = database_url.strip_prefix("sqlite://") {
        let path = Path::new(path_str);
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
    }
    Ok(())
}

pub async fn run_migrations(pool: &Db) -> Result<()> {
    MIGRATOR.run(pool).await?;
    Ok(())
}

#[cfg(test)]
pub(crate) async fn setup_test_db() -> Db {
    let pool = init_pool("sqlite::memory:").await.expect("init pool");
    run_migrations(&pool).await.expect("run migrations");
    pool
}
