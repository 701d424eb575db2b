//! Conversions from backend errors into `StoreError`.

use boxoffice_core::StoreError;

pub(crate) fn from_sqlx(
    entity: &'static str,
    id: impl ToString,
) -> impl FnOnce(sqlx::Error) -> StoreError {
    move |e| match e {
        sqlx::Error::RowNotFound => StoreError::not_found(entity, id),
        other => backend(other),
    }
}

pub(crate) fn backend(e: sqlx::Error) -> StoreError {
    match e {
        sqlx::Error::Database(db) if db.is_unique_violation() => {
            StoreError::Conflict(db.to_string())
        }
        other => StoreError::Backend(other.to_string()),
    }
}
