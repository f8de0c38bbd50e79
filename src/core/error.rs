use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(String),

    #[error("Serialization error: {0}")]
    Serialize(String),

    #[error("Corrupt session file '{0}': {1}")]
    Corrupt(String, String),

    #[error("No initial_run factory configured; cannot create run state for session '{0}'")]
    NoRunFactory(String),

    #[error("Field '{0}' is not a list field of the session payload")]
    NotAList(String),
}

pub type Result<T> = std::result::Result<T, StoreError>;

impl From<std::io::Error> for StoreError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}
