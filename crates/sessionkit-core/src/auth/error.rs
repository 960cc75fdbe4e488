use thiserror::Error;

use crate::api::ApiError;

#[derive(Error, Debug)]
pub enum AuthError {
    #[error("Another authentication operation is already in progress")]
    TransitionInFlight,

    #[error("No user is signed in")]
    NotAuthenticated,

    #[error("Credential cannot be sent as an Authorization header")]
    InvalidCredential,

    #[error("{0:#}")]
    Persistence(#[source] anyhow::Error),

    #[error("Invalid user profile: {0}")]
    InvalidProfile(#[from] serde_json::Error),

    #[error(transparent)]
    Api(#[from] ApiError),
}
