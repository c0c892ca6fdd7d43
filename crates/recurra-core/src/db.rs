use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};
use std::path::Path;

use crate::error::CoreError;

pub use sqlx::SqlitePool as DbPool;

const MAX_CONNECTIONS: u32 = 5;

/// Opens the event database at `db_path`, creating the file and its parent
/// directory on first use, and applies the embedded schema migrations.
pub async fn establish_connection(db_path: &str) -> Result<SqlitePool, CoreError> {
    let path = Path::new(db_path);
    match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() && !dir.exists() => {
            tokio::fs::create_dir_all(dir).await?;
        }
        _ => {}
    }
    if !path.exists() {
        tokio::fs::File::create(path).await?;
    }

    let pool = SqlitePoolOptions::new()
        .max_connections(MAX_CONNECTIONS)
        .connect(db_path)
        .await?;
    sqlx::migrate!("./migrations").run(&pool).await?;

    Ok(pool)
}
