use std::path::Path;

use sqlx::migrate::{MigrateError, Migrator};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::{Pool, Sqlite};
use tokio::fs::DirBuilder;

/// An error returned by the SQLite backed stores.
#[derive(Debug, thiserror::Error)]
pub enum SqliteStoreError {
    /// The directory of the database file could not be created.
    #[error("failed to create the database directory")]
    FileSetup(#[source] std::io::Error),

    /// Opening the database failed.
    #[error("failed to set up the database")]
    Setup(#[source] sqlx::Error),

    /// Running the migrations failed.
    #[error("failed to migrate the database")]
    Migration(#[source] MigrateError),

    /// A write was not applied.
    #[error("failed to write to the database")]
    Write(#[source] sqlx::Error),

    /// A query failed.
    #[error("failed to read from the database")]
    Read(#[source] sqlx::Error),
}

/// Opens the database at `path`, creating it if missing, and applies all migrations.
pub(crate) async fn connect(
    path: &Path,
    migrator: &Migrator,
) -> Result<Pool<Sqlite>, SqliteStoreError> {
    tally_log::info!("opening database {}", path.display());
    create_directory(path).await?;

    let options = SqliteConnectOptions::new()
        .filename(path)
        // The collector reads the raw log while the worker writes to it.
        .journal_mode(SqliteJournalMode::Wal)
        // WAL mode is safe from corruption with synchronous=NORMAL.
        .synchronous(SqliteSynchronous::Normal)
        .create_if_missing(true);

    let db = SqlitePoolOptions::new()
        .connect_with(options)
        .await
        .map_err(SqliteStoreError::Setup)?;

    migrator
        .run(&db)
        .await
        .map_err(SqliteStoreError::Migration)?;

    Ok(db)
}

async fn create_directory(path: &Path) -> Result<(), SqliteStoreError> {
    let Some(parent) = path.parent() else {
        return Ok(());
    };

    if !parent.as_os_str().is_empty() && !parent.exists() {
        tally_log::debug!("creating directory for database: {}", parent.display());
        DirBuilder::new()
            .recursive(true)
            .create(parent)
            .await
            .map_err(SqliteStoreError::FileSetup)?;
    }

    Ok(())
}
