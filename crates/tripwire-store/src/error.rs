/// Errors that can occur within the storage layer.
///
/// At the engine's capability boundary these are mapped onto the engine's
/// own taxonomy (`SourceUnavailable` / `Query` / `Persistence`), so the
/// evaluation loop never sees a sqlite type.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// An underlying SQLite error.
    #[error("Store: SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// A required record was not found.
    #[error("Store: {entity} not found (id={id})")]
    NotFound { entity: &'static str, id: String },

    /// A stored column value could not be interpreted.
    #[error("Store: invalid value in column '{column}': {detail}")]
    InvalidColumn {
        column: &'static str,
        detail: String,
    },
}

/// Convenience `Result` alias for storage operations.
pub type Result<T> = std::result::Result<T, StoreError>;
