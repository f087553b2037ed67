use std::str::FromStr;
use std::time::Duration;

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::SqlitePool;

/// Initialize the SQLite connection pool.
///
/// WAL mode lets the API process and worker process(es) share one database
/// file; the busy timeout absorbs short write contention between them.
pub async fn init_pool(database_url: &str) -> Result<SqlitePool, sqlx::Error> {
    ensure_parent_dir(database_url);

    let options = SqliteConnectOptions::from_str(database_url)?
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .busy_timeout(Duration::from_secs(5));

    SqlitePoolOptions::new()
        .max_connections(5)
        .acquire_timeout(Duration::from_secs(10))
        .connect_with(options)
        .await
}

/// Run database migrations.
pub async fn run_migrations(pool: &SqlitePool) -> Result<(), sqlx::Error> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .map_err(|e| sqlx::Error::Migrate(Box::new(e)))
}

/// Create the parent directory of a file-backed database path so that a
/// fresh checkout can open `sqlite:data/app.db` directly. Failures are left
/// for the connect call to report.
fn ensure_parent_dir(database_url: &str) {
    let Some(path) = database_url.strip_prefix("sqlite:") else {
        return;
    };
    let path = path.trim_start_matches("//");
    if path.is_empty() || path.starts_with(':') {
        return;
    }
    if let Some(parent) = std::path::Path::new(path).parent() {
        if !parent.as_os_str().is_empty() {
            let _ = std::fs::create_dir_all(parent);
        }
    }
}

pub mod queries;
