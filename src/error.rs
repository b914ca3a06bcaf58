use thiserror::Error;

/// Every failure a forum operation can surface to its caller.
#[derive(Error, Debug)]
pub enum ForumError {
    /// An authenticated call was attempted without a stored token.
    /// Raised before any network activity.
    #[error("authentication token not found")]
    Auth,

    /// The API answered with a non-success envelope, or without data.
    /// Carries the server message verbatim.
    #[error("{0}")]
    Api(String),

    /// The request was cancelled, either superseded by a newer request
    /// to the same URL or through `cancel_all_pending`.
    #[error("request to {url} was aborted")]
    Aborted { url: String },

    /// Failure of the underlying fetch primitive (DNS, connection reset, timeout).
    #[error(transparent)]
    Transport(#[from] anyhow::Error),

    #[error("unexpected response shape: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("token storage error: {0}")]
    Storage(String),
}

impl ForumError {
    pub fn is_auth(&self) -> bool {
        matches!(self, ForumError::Auth)
    }

    /// Network-level failures, aborts included.
    pub fn is_transport(&self) -> bool {
        matches!(self, ForumError::Transport(_) | ForumError::Aborted { .. })
    }
}

impl From<rusqlite::Error> for ForumError {
    fn from(err: rusqlite::Error) -> Self {
        ForumError::Storage(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, ForumError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn api_error_displays_server_message_verbatim() {
        let err = ForumError::Api("thread not found".to_string());
        assert_eq!(err.to_string(), "thread not found");
        assert!(!err.is_transport());
    }

    #[test]
    fn aborted_counts_as_transport() {
        let err = ForumError::Aborted { url: "https://example.test/threads".to_string() };
        assert!(err.is_transport());
        assert!(!err.is_auth());
    }

    #[test]
    fn transport_error_is_transparent() {
        let err = ForumError::from(anyhow::anyhow!("connection reset"));
        assert_eq!(err.to_string(), "connection reset");
        assert!(err.is_transport());
    }
}
