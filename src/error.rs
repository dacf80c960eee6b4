use thiserror::Error;

/// The error taxonomy of the engine.
///
/// [`AbeError::AccessDenied`] is the single expected, recoverable failure:
/// a well-formed key whose policy the ciphertext's attribute set does not
/// satisfy. It deliberately carries no payload, so neither the error value
/// nor its rendering depends on which attributes were missing. Everything
/// else is fail-fast: malformed bytes, malformed policies, or an internal
/// inconsistency that indicates a bug rather than bad input.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum AbeError {
    /// A serialized object or an attribute set that fails structural
    /// validation: truncated streams, out-of-range thresholds, unknown
    /// descriptor tags, duplicate or ill-formed attribute names.
    #[error("malformed input: {0}")]
    MalformedInput(String),
    /// The key's policy is not satisfied by the ciphertext's attributes.
    #[error("access denied")]
    AccessDenied,
    /// An internal algorithmic inconsistency, e.g. a pruned leaf without a
    /// matching commitment. Seeing this is a bug, not bad input.
    #[error("invariant violation: {0}")]
    InvariantViolation(String),
    /// A malformed policy tree handed to keygen: a threshold outside
    /// `[1, children]`, an ill-formed leaf, or an attribute outside the
    /// universe.
    #[error("invalid policy: {0}")]
    InvalidPolicy(String),
}

impl AbeError {
    pub(crate) fn malformed(msg: impl Into<String>) -> AbeError {
        AbeError::MalformedInput(msg.into())
    }

    pub(crate) fn invariant(msg: impl Into<String>) -> AbeError {
        AbeError::InvariantViolation(msg.into())
    }

    pub(crate) fn policy(msg: impl Into<String>) -> AbeError {
        AbeError::InvalidPolicy(msg.into())
    }
}

impl From<std::string::FromUtf8Error> for AbeError {
    fn from(_: std::string::FromUtf8Error) -> Self {
        AbeError::malformed("attribute name is not valid utf-8")
    }
}
