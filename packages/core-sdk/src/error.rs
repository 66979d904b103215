use thiserror::Error;

/**
 * \brief Rejection reasons for `begin_send`. Never written to the conversation log.
 */
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum InvalidInput {
    #[error("message is empty")]
    Empty,
    #[error("a reply is already in flight")]
    Busy,
}

/**
 * \brief Failure of a single transport call.
 * \details `Display` is the human-readable cause embedded in the assistant error notice.
 */
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /** \brief Non-success HTTP status. `api` names the transport ("GraphQL" / "API"). */
    #[error("{api} request failed: {status}")]
    Status { api: &'static str, status: u16 },
    /** \brief GraphQL `errors` list, messages joined with "; ". */
    #[error("GraphQL error: {0}")]
    Remote(String),
    #[error("{0}")]
    Malformed(String),
    #[error("network error: {0}")]
    Network(String),
    /** \brief The cancellation token fired before the call settled. */
    #[error("request cancelled")]
    Cancelled,
}

impl TransportError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, TransportError::Cancelled)
    }
}

impl From<reqwest::Error> for TransportError {
    fn from(err: reqwest::Error) -> Self {
        TransportError::Network(err.to_string())
    }
}
