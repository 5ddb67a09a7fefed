use mariner_core::RepoError;
use sqlx::postgres::PgPoolOptions;
use sqlx::{Pool, Postgres};
use std::time::Duration;
use tracing::info;

#[derive(Clone)]
pub struct DbClient {
    pub pool: Pool<Postgres>,
}

impl DbClient {
    pub async fn new(connection_string: &str, max_connections: u32) -> Result<Self, sqlx::Error> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(Duration::from_secs(3))
            .connect(connection_string)
            .await?;

        Ok(Self { pool })
    }

    pub async fn migrate(&self) -> Result<(), sqlx::migrate::MigrateError> {
        info!("Running database migrations...");
        sqlx::migrate!("../migrations").run(&self.pool).await?;
        info!("Migrations completed successfully.");
        Ok(())
    }
}

/// Translate driver errors into the repository vocabulary.
///
/// Serialization failures (40001) and deadlocks (40P01) become `Conflict` so
/// callers can retry them.
pub(crate) fn map_sqlx(err: sqlx::Error) -> RepoError {
    if let sqlx::Error::Database(db) = &err {
        let message = db.message().to_string();
        match db.code().as_deref() {
            Some("23505") => return RepoError::Duplicate(message),
            Some("23503") => return RepoError::InUse(message),
            Some("40001") | Some("40P01") => return RepoError::Conflict(message),
            _ => {}
        }
    }

    match err {
        sqlx::Error::RowNotFound => RepoError::NotFound("row not found".into()),
        other => RepoError::Backend(Box::new(other)),
    }
}

/// A stored value that no longer parses into its domain type.
pub(crate) fn corrupt(column: &str, detail: String) -> RepoError {
    RepoError::Backend(format!("invalid {} in storage: {}", column, detail).into())
}
