use std::path::PathBuf;
use std::time::Duration;

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::SqlitePool;
use tracing::info;

/// Open (creating if needed) the record-store database and apply migrations.
///
/// Accepts `sqlite:<path>` or a bare path; relative paths resolve against the
/// working directory.
pub async fn connect(database_url: &str) -> anyhow::Result<SqlitePool> {
    let db_path = resolve_path(database_url)?;
    if let Some(parent) = db_path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }

    let options = SqliteConnectOptions::new()
        .filename(&db_path)
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .busy_timeout(Duration::from_secs(5));

    let pool = SqlitePoolOptions::new()
        .max_connections(8)
        .connect_with(options)
        .await?;

    sqlx::migrate!("./migrations").run(&pool).await?;
    info!(path = %db_path.display(), "record store ready");
    Ok(pool)
}

fn resolve_path(database_url: &str) -> anyhow::Result<PathBuf> {
    let raw = database_url
        .strip_prefix("sqlite://")
        .or_else(|| database_url.strip_prefix("sqlite:"))
        .unwrap_or(database_url);
    if raw.is_empty() || raw == ":memory:" {
        return Err(anyhow::anyhow!(
            "record store needs a file-backed database, got '{database_url}'"
        ));
    }
    Ok(std::env::current_dir()?.join(raw))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_path_strips_scheme() {
        let cwd = std::env::current_dir().unwrap();
        assert_eq!(resolve_path("sqlite:./data/x.db").unwrap(), cwd.join("./data/x.db"));
        assert_eq!(resolve_path("/tmp/x.db").unwrap(), PathBuf::from("/tmp/x.db"));
        assert!(resolve_path("sqlite::memory:").is_err());
    }

    #[tokio::test]
    async fn test_connect_creates_parent_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/chaos.db");
        let pool = connect(&format!("sqlite:{}", path.display())).await.unwrap();
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM records")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(count, 0);
        assert!(path.exists());
    }
}
