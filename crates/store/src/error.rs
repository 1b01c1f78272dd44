use crate::Rid;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("misuse: {0}")]
    Misuse(&'static str),
    #[error("out of range: {0}")]
    Range(String),
    #[error("no such artifact")]
    NotFound,
    #[error("artifact already exists")]
    AlreadyExists,
    #[error("artifact {0} is a phantom (hash known, content absent)")]
    Phantom(Rid),
    #[error("access violation: {0}")]
    Access(&'static str),
    #[error("type mismatch: {0}")]
    TypeMismatch(&'static str),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Db(#[from] rusqlite::Error),
    #[error(transparent)]
    Delta(#[from] delta::Error),
    #[error(transparent)]
    Diff(#[from] textdiff::Error),
    #[error(transparent)]
    Artifact(#[from] deck::Error),
    #[error("checksum mismatch: {0}")]
    Checksum(String),
    /// A store-level invariant does not hold (delta loop, hash mismatch on
    /// re-read). Not recoverable without repository surgery; the message
    /// carries the RID involved.
    #[error("repository consistency failure: {0}")]
    Consistency(String),
}

pub type Result<T> = std::result::Result<T, Error>;
