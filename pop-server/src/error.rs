//! Typed failures surfaced to the JSON-RPC layer.
//!
//! Every variant maps to a stable protocol error code via [`HubError::code`]:
//!
//! | code | meaning |
//! |------|---------|
//! | -1 | invalid action (unknown RPC method) |
//! | -2 | invalid resource (unknown channel, not subscribed) |
//! | -3 | resource already exists (duplicate message or channel) |
//! | -4 | invalid message data |
//! | -5 | access denied (wrong sender identity) |
//! | -6 | internal server error |

/// Error returned by channel, hub and pipeline operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HubError {
    /// Malformed base64 or JSON.
    #[error("failed to decode message data: {0}")]
    DecodeError(String),
    /// Payload fails structural validation.
    #[error("failed to verify json schema: {0}")]
    SchemaViolation(String),
    /// `message_id` is not `hash(data, signature)`.
    #[error("message_id is {got}, should be {expected}")]
    InvalidMessageId { expected: String, got: String },
    /// Bad sender key or signature, or a server-side signing failure.
    #[error("invalid signature: {0}")]
    SignatureInvalid(String),
    /// The message id was already admitted to this channel.
    #[error("message {0} already exists")]
    DuplicateMessage(String),
    /// Sender is not allowed to post this message.
    #[error("{0}")]
    Unauthorized(String),
    /// Vote cardinality or index violates the question's voting method.
    #[error("invalid ballot: {0}")]
    InvalidBallot(String),
    /// Vote references a question absent from the election.
    #[error("no question with question id {0} exists")]
    UnknownQuestion(String),
    /// Well-formed message that is not acceptable in the current state.
    #[error("{0}")]
    InvalidRequest(String),
    #[error("client is not subscribed to this channel")]
    NotSubscribed,
    #[error("channel {0} does not exist")]
    UnknownChannel(String),
    #[error("unknown method: {0}")]
    InvalidMethod(String),
    #[error("internal error: {0}")]
    Internal(String),
}

impl HubError {
    /// Protocol error code for this failure.
    pub fn code(&self) -> i32 {
        match self {
            HubError::InvalidMethod(_) => -1,
            HubError::NotSubscribed | HubError::UnknownChannel(_) => -2,
            HubError::DuplicateMessage(_) => -3,
            HubError::DecodeError(_)
            | HubError::SchemaViolation(_)
            | HubError::InvalidMessageId { .. }
            | HubError::SignatureInvalid(_)
            | HubError::InvalidBallot(_)
            | HubError::UnknownQuestion(_)
            | HubError::InvalidRequest(_) => -4,
            HubError::Unauthorized(_) => -5,
            HubError::Internal(_) => -6,
        }
    }
}

pub type Result<T> = std::result::Result<T, HubError>;
