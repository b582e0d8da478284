//! Error types for the authorization flow

/// Terminal failures of the authorization flow.
///
/// Every variant aborts the flow. Cache write problems are not errors; they
/// surface as [`CacheWarning`] instead.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("unable to read client credential file: {0}")]
    Read(String),

    #[error("error parsing credential file: {0}")]
    Parse(String),

    #[error("unable to start callback listener: {0}")]
    Listen(String),

    #[error("unable to get valid token. code = \"{code}\": {reason}")]
    Exchange { code: String, reason: String },

    #[error("authorization flow error: {0}")]
    Flow(String),
}

impl Error {
    pub(crate) fn exchange(code: &str, reason: impl Into<String>) -> Self {
        Self::Exchange {
            code: code.to_owned(),
            reason: reason.into(),
        }
    }
}

/// Non-fatal failure to persist a token to the cache.
///
/// The token is still usable in-process; the next run simply repeats the
/// authorization.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unable to write token to local cache: {0}")]
pub struct CacheWarning(pub String);

/// Result alias for auth operations.
pub type Result<T> = std::result::Result<T, Error>;
