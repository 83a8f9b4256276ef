//! Error taxonomy shared by the orchestrators and the chain collaborators.

use thiserror::Error;

/// Failure reported by a chain collaborator (RPC node, contract, event decoding).
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ChainError {
    #[error("transport error: {0}")]
    /// The endpoint could not be reached or returned a non-JSON response.
    Transport(String),
    #[error("rpc error {code}: {message}")]
    /// The node answered with a JSON-RPC error object.
    Rpc {
        /// JSON-RPC error code.
        code: i64,
        /// Node-supplied message, usually carrying the revert reason.
        message: String,
    },
    #[error("transaction {tx_hash} reverted: {reason}")]
    /// The transaction was mined with status 0.
    Reverted {
        /// Hash of the reverted transaction.
        tx_hash: String,
        /// Decoded revert reason, or a placeholder when the node gave none.
        reason: String,
    },
    #[error("decode error: {0}")]
    /// A response or log could not be decoded.
    Decode(String),
    #[error("event {0} not found in receipt")]
    /// The expected event was absent from the transaction receipt.
    MissingEvent(String),
}

/// Errors surfaced to the operator by the round lifecycle client.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ClientError {
    #[error("round directory unavailable: {0}")]
    /// The on-chain round listing could not be completed.
    DirectoryUnavailable(String),
    #[error("token approval failed for {participant}: {reason}")]
    /// Token approval reverted or could not be mined.
    AuthorizationFailed {
        /// Participant address.
        participant: String,
        /// Underlying failure.
        reason: String,
    },
    #[error("sign-up failed for {participant}: {reason}")]
    /// Contribution transaction reverted or its `SignUp` event was missing.
    SignUpFailed {
        /// Participant address.
        participant: String,
        /// Underlying failure.
        reason: String,
    },
    #[error("vote submission failed for {participant}: {reason}")]
    /// Message batch transaction reverted or could not be mined.
    SubmissionFailed {
        /// Participant address.
        participant: String,
        /// Underlying failure.
        reason: String,
    },
    #[error("{participant} succeeded on chain in {tx_hash} but the session was not saved: {reason}")]
    /// The chain step was mined but the session file could not record it.
    RecordNotSaved {
        /// Participant address.
        participant: String,
        /// Hash of the mined transaction.
        tx_hash: String,
        /// Underlying session failure.
        reason: String,
    },
    #[error("allocation of {requested} credits exceeds balance of {balance}")]
    /// Vote allocations would spend more than the participant owns.
    AllocationExceedsBalance {
        /// Sum of the requested allocation credits.
        requested: u128,
        /// Participant voice credit balance.
        balance: u128,
    },
    #[error("invalid allocation: {0}")]
    /// Allocation list is malformed (zero recipient, empty recipient set).
    InvalidAllocation(String),
    #[error("session error: {0}")]
    /// Session file could not be read, decoded, or written.
    Session(String),
    #[error("cipher error: {0}")]
    /// Message sealing or key decoding failed.
    Cipher(String),
    #[error("chain error: {0}")]
    /// A chain read outside of the classified steps failed.
    Chain(#[from] ChainError),
    #[error("configuration error: {0}")]
    /// Missing or malformed configuration.
    Config(String),
}

impl ClientError {
    /// Participant address carried by per-participant failures.
    pub fn participant(&self) -> Option<&str> {
        match self {
            Self::AuthorizationFailed { participant, .. }
            | Self::SignUpFailed { participant, .. }
            | Self::SubmissionFailed { participant, .. }
            | Self::RecordNotSaved { participant, .. } => Some(participant),
            _ => None,
        }
    }
}
