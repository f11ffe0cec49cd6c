use thiserror::Error;

use crate::repositories::ApiError;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("A response is already being generated for this conversation")]
    TurnInFlight,

    #[error("Cannot send an empty message")]
    EmptyMessage,

    #[error(transparent)]
    Api(#[from] ApiError),
}

pub type SessionResult<T> = Result<T, SessionError>;
