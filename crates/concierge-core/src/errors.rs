use std::time::Duration;

/// Failure of an oracle invocation. Any of these ends the run.
#[derive(Clone, Debug, PartialEq, thiserror::Error)]
pub enum OracleError {
    /// The oracle refused the request (bad credentials, invalid input, exhausted script).
    #[error("oracle rejected the request: {0}")]
    Rejected(String),
    #[error("oracle unavailable: {0}")]
    Unavailable(String),
    /// The reply could not be turned into an assistant message.
    #[error("malformed oracle reply: {0}")]
    MalformedReply(String),
    #[error("oracle timed out after {0:?}")]
    Timeout(Duration),
}

impl OracleError {
    /// Short classification string for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Rejected(_) => "rejected",
            Self::Unavailable(_) => "unavailable",
            Self::MalformedReply(_) => "malformed_reply",
            Self::Timeout(_) => "timeout",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds() {
        assert_eq!(OracleError::Rejected("bad key".into()).kind(), "rejected");
        assert_eq!(OracleError::MalformedReply("no content".into()).kind(), "malformed_reply");
        assert_eq!(OracleError::Timeout(Duration::from_secs(30)).kind(), "timeout");
    }

    #[test]
    fn display_carries_detail() {
        let err = OracleError::Unavailable("connection refused".into());
        assert_eq!(err.to_string(), "oracle unavailable: connection refused");
    }
}
