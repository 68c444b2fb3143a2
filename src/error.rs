pub type RelayResult<T> = Result<T, RelayError>;

/// Room-scoped failures travel back on the operation's ack, so every
/// `Display` string here is safe to hand to a client verbatim. The store
/// source error stays attached for logging but never reaches the wire.
#[derive(thiserror::Error, Debug)]
pub enum RelayError {
    #[error("Missing {0}.")]
    MissingField(&'static str),

    #[error("Wrong password. Try again.")]
    WrongPassword,

    #[error("{0} not found.")]
    NotFound(&'static str),

    #[error("Storage unavailable. Try again.")]
    Store(#[from] sqlx::Error),
}

impl RelayError {
    /// True for failures the caller may simply retry with different input.
    pub fn is_rejection(&self) -> bool {
        !matches!(self, RelayError::Store(_))
    }
}
