use thiserror::Error;

/// Errors surfaced by session getters and backends.
#[derive(Debug, Error)]
pub enum Error {
    /// The key is absent from the session values.
    #[error("key `{0}` does not exist in the session")]
    NotFound(String),

    /// The key is present but its value cannot be converted to the requested type.
    #[error("unable to find the {expected} with key: {key}, found: {found}")]
    TypeCoercion {
        expected: &'static str,
        key: String,
        found: String,
    },

    /// Connecting to, reading from or writing to a backend failed.
    #[error("session backend unavailable: {0}")]
    BackendUnavailable(String),

    /// A stored record could not be encoded or decoded.
    #[error("malformed session record: {0}")]
    Malformed(String),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
