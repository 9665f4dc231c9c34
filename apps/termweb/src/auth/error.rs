use thiserror::Error;

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("auth store io: {0}")]
    Io(#[from] std::io::Error),
    #[error("auth store is malformed: {0}")]
    Malformed(String),
    #[error("unknown session {0}")]
    UnknownSession(String),
    #[error("oauth provider {0} is not configured")]
    ProviderNotConfigured(String),
    #[error("oauth exchange failed: {0}")]
    Exchange(String),
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
}
