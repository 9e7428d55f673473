mod repository;

pub use repository::*;

/// SQL migration for the initial schema
pub const MIGRATION_001_INITIAL: &str = include_str!("migrations/001_initial.sql");

/// An open database transaction; dropping it without commit rolls back.
pub type DbTransaction = sqlx::Transaction<'static, sqlx::Sqlite>;

const SQLITE_BUSY: i32 = 5;
const SQLITE_LOCKED: i32 = 6;

fn database_error(err: &anyhow::Error) -> Option<&(dyn sqlx::error::DatabaseError + 'static)> {
    match err.downcast_ref::<sqlx::Error>()? {
        sqlx::Error::Database(db_err) => Some(db_err.as_ref()),
        _ => None,
    }
}

/// True when SQLite gave up waiting for another writer's lock.
pub fn is_busy(err: &anyhow::Error) -> bool {
    database_error(err)
        .and_then(|db_err| db_err.code())
        .and_then(|code| code.parse::<i32>().ok())
        .is_some_and(|code| matches!(code & 0xff, SQLITE_BUSY | SQLITE_LOCKED))
}

/// True when a write hit a UNIQUE constraint.
pub fn is_unique_violation(err: &anyhow::Error) -> bool {
    database_error(err).is_some_and(|db_err| db_err.is_unique_violation())
}
