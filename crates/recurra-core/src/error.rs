use thiserror::Error;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Database error")]
    Database(#[from] sqlx::Error),

    #[error("Migration error")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("IO error")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(#[from] Box<figment::Error>),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// The persisted rule text cannot be parsed. Never retried.
    #[error("Malformed recurrence rule: {0}")]
    MalformedRule(String),

    /// A bookkeeping invariant does not hold. The surrounding transaction must be
    /// rolled back; the engine never repairs this on its own.
    #[error("Inconsistent recurrence state: {0}")]
    InconsistentState(String),

    #[error("Dependent entity cleanup failed: {0}")]
    DependencyCleanup(String),

    #[error("Concurrent modification of {0}")]
    ConcurrentModification(String),
}

impl From<figment::Error> for CoreError {
    fn from(err: figment::Error) -> Self {
        CoreError::Config(Box::new(err))
    }
}
