use crate::provider::Server;

/// Errors surfaced by the foreign-chain provider layer and everything built
/// on top of it.
///
/// Transport and protocol failures are folded into `Network`: a server that
/// answers garbage is operationally indistinguishable from one that does not
/// answer at all, and both are retried against another server before this
/// error ever reaches a caller. `NotFound` is different; it is a statement
/// about the chain, not about the server, and is never retried.
#[derive(Debug, thiserror::Error)]
pub enum ForeignChainError {
    #[error("foreign chain network failure: {message}")]
    Network {
        message: String,
        /// Upstream daemon error code, when one was embedded in the server's
        /// error message (e.g. bitcoind's -5 "not found").
        daemon_error_code: Option<i64>,
        /// Server that produced the well-formed error response, if any.
        server: Option<Server>,
    },

    #[error("not found: {0}")]
    NotFound(String),

    #[error("insufficient funds: required {required}, available {available}")]
    InsufficientFunds { required: u64, available: u64 },

    #[error("invalid address: {0}")]
    InvalidAddress(String),

    #[error("{0} is not supported by this backend")]
    Unsupported(&'static str),
}

impl ForeignChainError {
    pub fn network(message: impl Into<String>) -> Self {
        ForeignChainError::Network {
            message: message.into(),
            daemon_error_code: None,
            server: None,
        }
    }

    pub fn daemon_error_code(&self) -> Option<i64> {
        match self {
            ForeignChainError::Network {
                daemon_error_code, ..
            } => *daemon_error_code,
            _ => None,
        }
    }
}

/// Validation failures from the HTLC script codec.
///
/// These fail fast and are never coerced into a network retry. Structure
/// mismatches encountered while *scanning* third-party transactions are not
/// errors at all; a scriptSig that doesn't match our template simply isn't
/// ours and the scan continues.
#[derive(Debug, PartialEq, Eq, thiserror::Error)]
pub enum HtlcError {
    #[error("lock time {0} is below the protocol minimum of 1500000000")]
    LockTimeTooLow(u32),

    #[error("malformed base58 address")]
    InvalidAddress,

    #[error("transaction signing failed: {0}")]
    Signing(String),
}
